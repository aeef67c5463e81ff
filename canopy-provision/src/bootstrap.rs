//! Two-node control-plane bootstrap
//!
//! Node 1 installs k3s against the external datastore with a placeholder
//! token; node 2 joins with the token harvested from node 1. The harvested
//! kubeconfig is rewritten to point at node 1's public address.

use crate::error::{ProvisionError, ProvisionResult};
use crate::remote::{shell_quote, RemoteExecutor};
use canopy_common::Instance;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{info, warn};

/// Join secret used for the first server; the real token is read back afterwards
pub const PLACEHOLDER_TOKEN: &str = "SECRET";
pub const TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/token";
pub const KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";
pub const EXPECTED_NODES: usize = 2;

#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub k3s_version: String,
    pub datastore_user: String,
    /// Pause before joining node 2 and before counting nodes
    pub join_delay: Duration,
}

impl BootstrapOptions {
    pub fn new(k3s_version: impl Into<String>) -> Self {
        Self {
            k3s_version: k3s_version.into(),
            datastore_user: "tfadmin".to_string(),
            join_delay: Duration::from_secs(10),
        }
    }
}

/// Material harvested from a bootstrapped control plane
#[derive(Debug, Clone)]
pub struct Bootstrapped {
    /// Kubeconfig with the server address rewritten to node 1
    pub kubeconfig: String,
    pub node_count: usize,
    /// `https://<node1>:6443`
    pub api_server: String,
}

/// k3s server install command for one node
pub fn server_command(instance: &Instance, opts: &BootstrapOptions, token: &str, node_ip: IpAddr) -> String {
    let datastore = format!(
        "mysql://{}:{}@tcp({})/k3s",
        opts.datastore_user, instance.datastore_password, instance.datastore_endpoint
    );
    format!(
        "curl -sfL https://get.k3s.io | INSTALL_K3S_VERSION={} sh -s - server --token={} --datastore-endpoint={} --tls-san {} --node-external-ip {}",
        shell_quote(&opts.k3s_version),
        shell_quote(token),
        shell_quote(&datastore),
        instance.url,
        node_ip
    )
}

pub fn api_server(node1: IpAddr) -> String {
    format!("https://{}:6443", node1)
}

/// Point the harvested kubeconfig at node 1
pub fn rewrite_kubeconfig(kubeconfig: &str, node1: IpAddr) -> String {
    let server = api_server(node1);
    kubeconfig
        .replace("https://127.0.0.1:6443", &server)
        .replace("https://localhost:6443", &server)
}

/// `kubectl get nodes | wc -l` minus the header line
pub fn parse_node_count(output: &str) -> Option<usize> {
    output.trim().parse::<usize>().ok().map(|n| n.saturating_sub(1))
}

/// Bootstrap both nodes of `instance`, strictly node 1 before node 2
pub async fn bootstrap_control_plane(
    exec: &dyn RemoteExecutor,
    instance: &Instance,
    opts: &BootstrapOptions,
) -> ProvisionResult<Bootstrapped> {
    let label = instance.label();
    info!(instance = %label, node = %instance.node1, version = %opts.k3s_version, "Installing first server");

    exec.exec(&server_command(instance, opts, PLACEHOLDER_TOKEN, instance.node1), instance.node1)
        .await?;

    let token = exec
        .exec(&format!("sudo cat {}", TOKEN_PATH), instance.node1)
        .await?;
    if token.trim().is_empty() {
        return Err(ProvisionError::Bootstrap {
            instance: label,
            detail: format!("{} on {} is empty", TOKEN_PATH, instance.node1),
        });
    }

    let kubeconfig = exec
        .exec(&format!("sudo cat {}", KUBECONFIG_PATH), instance.node1)
        .await?;
    if kubeconfig.trim().is_empty() {
        return Err(ProvisionError::Bootstrap {
            instance: label,
            detail: format!("{} on {} is empty", KUBECONFIG_PATH, instance.node1),
        });
    }

    tokio::time::sleep(opts.join_delay).await;

    info!(instance = %label, node = %instance.node2, "Joining second server");
    exec.exec(&server_command(instance, opts, token.trim(), instance.node2), instance.node2)
        .await?;

    tokio::time::sleep(opts.join_delay).await;

    let count_output = exec
        .exec("sudo k3s kubectl get nodes | wc -l", instance.node1)
        .await?;
    let node_count = parse_node_count(&count_output).unwrap_or(0);
    if node_count != EXPECTED_NODES {
        warn!(
            instance = %label,
            expected = EXPECTED_NODES,
            actual = node_count,
            "Unexpected node count after join"
        );
    } else {
        info!(instance = %label, nodes = node_count, "Control plane formed");
    }

    Ok(Bootstrapped {
        kubeconfig: rewrite_kubeconfig(&kubeconfig, instance.node1),
        node_count,
        api_server: api_server(instance.node1),
    })
}
