//! Shared fakes for the pipeline tests
#![allow(dead_code)]

use async_trait::async_trait;
use canopy_common::{cluster_name, ClusterImportRecord};
use canopy_provision::bootstrap::{KUBECONFIG_PATH, TOKEN_PATH};
use canopy_provision::infra::{output_key, Backend, InfraEngine, InfraError, InfraVars, OutputMap};
use canopy_provision::installer::{ChartInstaller, InstallError};
use canopy_provision::management::{
    AuthError, ClusterStatus, ManagementApi, ManagementError, ManifestError, RegisterError,
    SessionToken,
};
use canopy_provision::probes::{LivenessCheck, ProbeError};
use canopy_provision::remote::{RemoteExecutor, TransportError};
use canopy_provision::state::{StateStore, StateStoreError};
use canopy_provision::validation::{PublicIpSource, ValidationError};
use canopy_provision::{CanopyConfig, Collaborators};
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const INSTALL_COMMAND: &str = "helm install rancher rancher-latest/rancher \\\n  --namespace cattle-system \\\n  --set hostname=placeholder \\\n  --set bootstrapPassword=hunter2 \\\n  --set tls=external \\\n  --set agentTLSMode=system-store";

pub const HOST_URL: &str = "host.example.com";

pub fn tenant_url(ordinal: usize) -> String {
    format!("tenant{}.example.com", ordinal)
}

pub fn node1(index: usize) -> IpAddr {
    format!("10.0.{}.1", index).parse().unwrap()
}

/// A config with `total` instances rooted in `root`
pub fn test_config(total: usize, root: &Path) -> CanopyConfig {
    let mut config = CanopyConfig::from_yaml(&CanopyConfig::generate_sample()).unwrap();
    config.total_instances = total;
    config.install.commands = vec![INSTALL_COMMAND.to_string(); total];
    config.k3s.versions = vec!["v1.30.4+k3s1".to_string(); total];
    config.paths.work_dir = root.join("work");
    config.paths.terraform_dir = root.join("terraform");
    std::fs::create_dir_all(&config.paths.terraform_dir).unwrap();
    config
}

/// Engine outputs for `total` instances; index 1 is the host
pub fn outputs(total: usize) -> OutputMap {
    let mut map = OutputMap::new();
    for n in 1..=total {
        let url = if n == 1 { HOST_URL.to_string() } else { tenant_url(n - 1) };
        map.insert(output_key(n, "server1_ip"), node1(n).to_string());
        map.insert(output_key(n, "server2_ip"), format!("10.0.{}.2", n));
        map.insert(output_key(n, "mysql_endpoint"), format!("db{}.example.com:3306", n));
        map.insert(output_key(n, "mysql_password"), format!("dbpw{}", n));
        map.insert(output_key(n, "rancher_url"), url);
    }
    map
}

#[derive(Default)]
pub struct RecordingInfra {
    pub outputs: OutputMap,
    pub apply_calls: AtomicUsize,
    pub destroy_calls: AtomicUsize,
    pub fail_destroy: bool,
}

impl RecordingInfra {
    pub fn new(outputs: OutputMap) -> Self {
        Self {
            outputs,
            ..Default::default()
        }
    }
}

#[async_trait]
impl InfraEngine for RecordingInfra {
    async fn apply(&self, vars: &InfraVars, _backend: &Backend) -> Result<OutputMap, InfraError> {
        assert!(vars.instance_count >= 2);
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.outputs.clone())
    }

    async fn destroy(&self, _vars: &InfraVars, _backend: &Backend) -> Result<(), InfraError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_destroy {
            return Err(InfraError::Command {
                step: "destroy",
                status: 1,
                stderr: "state locked".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryState {
    pub objects: Mutex<BTreeSet<String>>,
    pub uploads: Mutex<Vec<PathBuf>>,
    pub deleted: Mutex<Vec<String>>,
    pub cleared: AtomicUsize,
}

impl MemoryState {
    pub fn with_object(key: &str) -> Self {
        let state = Self::default();
        state.objects.lock().unwrap().insert(key.to_string());
        state
    }
}

#[async_trait]
impl StateStore for MemoryState {
    async fn exists(&self, key: &str) -> Result<bool, StateStoreError> {
        Ok(self.objects.lock().unwrap().contains(key))
    }

    async fn upload_dir(&self, dir: &Path) -> Result<(), StateStoreError> {
        self.uploads.lock().unwrap().push(dir.to_path_buf());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        self.objects.lock().unwrap().remove(key);
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StateStoreError> {
        self.objects.lock().unwrap().clear();
        self.cleared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Answers bootstrap reads; records every command
#[derive(Default)]
pub struct ScriptedRemote {
    pub calls: Mutex<Vec<(IpAddr, String)>>,
}

impl ScriptedRemote {
    pub fn commands_on(&self, host: IpAddr) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _)| *h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedRemote {
    async fn exec(&self, command: &str, host: IpAddr) -> Result<String, TransportError> {
        self.calls.lock().unwrap().push((host, command.to_string()));
        let out = if command.contains(TOKEN_PATH) {
            format!("K10token-{}::server:abc", host)
        } else if command.contains(KUBECONFIG_PATH) {
            "apiVersion: v1\nclusters:\n- cluster:\n    server: https://127.0.0.1:6443\n".to_string()
        } else if command.contains("wc -l") {
            "3".to_string()
        } else {
            String::new()
        };
        Ok(out)
    }
}

/// Management plane that accepts everything unless told otherwise
#[derive(Default)]
pub struct ScriptedManagement {
    pub registered: Mutex<Vec<usize>>,
    pub manifest_requests: AtomicUsize,
    pub terms_accepted: AtomicUsize,
    /// Ordinal whose manifest lookup finds no tokens
    pub manifest_fails_for: Option<usize>,
    /// Logins rejected before the first one succeeds
    pub auth_failures: usize,
    pub auth_calls: AtomicUsize,
}

impl ScriptedManagement {
    pub fn rejecting_logins(times: usize) -> Self {
        Self {
            auth_failures: times,
            ..Default::default()
        }
    }
}

#[async_trait]
impl ManagementApi for ScriptedManagement {
    async fn authenticate(&self, base_url: &str, username: &str, password: &str) -> Result<SessionToken, AuthError> {
        assert_eq!(base_url, HOST_URL);
        assert_eq!(username, "admin");
        assert_eq!(password, "hunter2");
        let n = self.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.auth_failures {
            return Err(AuthError::Login(ManagementError::Status {
                endpoint: "/v3-public/localProviders/local?action=login".to_string(),
                status: 503,
                body: "service starting".to_string(),
            }));
        }
        Ok(SessionToken::new("token-abc:long"))
    }

    async fn register_cluster(
        &self,
        _base_url: &str,
        _token: &SessionToken,
        ordinal: usize,
    ) -> Result<ClusterImportRecord, RegisterError> {
        self.registered.lock().unwrap().push(ordinal);
        Ok(ClusterImportRecord::new(ordinal))
    }

    async fn fetch_manifest_url(&self, _base_url: &str, _token: &SessionToken) -> Result<String, ManifestError> {
        self.manifest_requests.fetch_add(1, Ordering::SeqCst);
        let latest = self.registered.lock().unwrap().last().copied().unwrap_or(0);
        if self.manifest_fails_for == Some(latest) {
            return Err(ManifestError::NoTokens);
        }
        Ok(format!("https://{}/v3/import/{}.yaml", HOST_URL, cluster_name(latest)))
    }

    async fn cluster_status(
        &self,
        _base_url: &str,
        _token: &SessionToken,
        name: &str,
    ) -> Result<ClusterStatus, ManagementError> {
        let registered = self.registered.lock().unwrap();
        if registered.iter().any(|o| cluster_name(*o) == name) {
            Ok(ClusterStatus {
                phase: Some("Active".to_string()),
                ready: true,
            })
        } else {
            Err(ManagementError::ClusterNotFound(name.to_string()))
        }
    }

    async fn accept_terms(&self, _base_url: &str, _token: &SessionToken) -> Result<(), ManagementError> {
        self.terms_accepted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Refuses connections a set number of times per URL, then reports live
#[derive(Default)]
pub struct FlakyLiveness {
    pub failures: HashMap<String, usize>,
    pub calls: Mutex<HashMap<String, usize>>,
    /// Clock reading at every probe, in call order
    pub probed_at: Mutex<Vec<tokio::time::Instant>>,
}

impl FlakyLiveness {
    pub fn failing(url: &str, times: usize) -> Self {
        let mut failures = HashMap::new();
        failures.insert(url.to_string(), times);
        Self {
            failures,
            ..Default::default()
        }
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl LivenessCheck for FlakyLiveness {
    async fn is_live(&self, base_url: &str) -> Result<bool, ProbeError> {
        self.probed_at.lock().unwrap().push(tokio::time::Instant::now());
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(base_url.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if n <= self.failures.get(base_url).copied().unwrap_or(0) {
            return Err(ProbeError::Request {
                url: format!("https://{}/", base_url),
                detail: "connection refused".to_string(),
            });
        }
        Ok(true)
    }
}

/// Fails for bundle directories whose name is listed
#[derive(Default)]
pub struct ScriptedInstaller {
    pub fail_dirs: Vec<String>,
    pub installed: Mutex<Vec<PathBuf>>,
}

impl ScriptedInstaller {
    pub fn failing(dir_name: &str) -> Self {
        Self {
            fail_dirs: vec![dir_name.to_string()],
            ..Default::default()
        }
    }

    pub fn installed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .installed
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ChartInstaller for ScriptedInstaller {
    async fn install(&self, bundle_dir: &Path) -> Result<(), InstallError> {
        assert!(bundle_dir.join("install.sh").exists(), "install.sh written before install");
        self.installed.lock().unwrap().push(bundle_dir.to_path_buf());

        let name = bundle_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.fail_dirs.contains(&name) {
            return Err(InstallError::Failed {
                dir: bundle_dir.to_path_buf(),
                status: 1,
                stderr: "Error: INSTALLATION FAILED: context deadline exceeded".to_string(),
            });
        }
        Ok(())
    }
}

pub struct FixedIp(pub IpAddr);

#[async_trait]
impl PublicIpSource for FixedIp {
    async fn public_ip(&self) -> Result<IpAddr, ValidationError> {
        Ok(self.0)
    }
}

/// Handles on every fake so tests can inspect them after a run
pub struct Fakes {
    pub infra: Arc<RecordingInfra>,
    pub state: Arc<MemoryState>,
    pub remote: Arc<ScriptedRemote>,
    pub management: Arc<ScriptedManagement>,
    pub liveness: Arc<FlakyLiveness>,
    pub installer: Arc<ScriptedInstaller>,
}

impl Fakes {
    pub fn new(total: usize) -> Self {
        Self {
            infra: Arc::new(RecordingInfra::new(outputs(total))),
            state: Arc::new(MemoryState::default()),
            remote: Arc::new(ScriptedRemote::default()),
            management: Arc::new(ScriptedManagement::default()),
            liveness: Arc::new(FlakyLiveness::default()),
            installer: Arc::new(ScriptedInstaller::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            infra: self.infra.clone(),
            state: self.state.clone(),
            remote: self.remote.clone(),
            management: self.management.clone(),
            liveness: self.liveness.clone(),
            installer: self.installer.clone(),
            ip_source: Arc::new(FixedIp("198.51.100.1".parse().unwrap())),
        }
    }
}
