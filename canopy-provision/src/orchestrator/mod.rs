//! Provisioning pipeline
//!
//! `Validating -> ProvisioningInfra -> InstallingHost -> AuthenticatingHost
//! -> Phase1 -> Phase2 -> Done`, with `Failed` reachable from every step.
//!
//! Phase 1 walks the tenants one at a time and stops the run on the first
//! failure. Phase 2 runs one task per tenant; a failing tenant never cancels
//! its siblings and the failures are reported together once every task has
//! finished.

mod report;
mod session;

pub use report::RunReport;
pub use session::ProvisioningSession;

use crate::bootstrap::{bootstrap_control_plane, BootstrapOptions};
use crate::config::CanopyConfig;
use crate::error::{Phase2Failure, ProvisionError, ProvisionResult};
use crate::infra::{parse_instances, Backend, InfraEngine, InfraVars, TerraformCli};
use crate::installer::{
    extract_bootstrap_password, import_command, write_import_script, write_install_bundle,
    write_kubeconfig, ChartInstaller, ScriptInstaller, DEFAULT_ADMIN_PASSWORD,
};
use crate::management::{
    wait_for_auth_ready, wait_for_cluster_active, ManagementApi, ManagementClient, SessionToken,
};
use crate::poller::PollSpec;
use crate::probes::{wait_until_live, HttpLiveness, LivenessCheck};
use crate::remote::{RemoteExecutor, SshExecutor};
use crate::state::{AwsCliStore, StateStore};
use crate::validation::{Gate, IpDiscovery, PublicIpSource};
use canopy_common::{cluster_name, Instance, PhaseKind, RunState, TenantPhaseResult};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// External systems the pipeline drives
#[derive(Clone)]
pub struct Collaborators {
    pub infra: Arc<dyn InfraEngine>,
    pub state: Arc<dyn StateStore>,
    pub remote: Arc<dyn RemoteExecutor>,
    pub management: Arc<dyn ManagementApi>,
    pub liveness: Arc<dyn LivenessCheck>,
    pub installer: Arc<dyn ChartInstaller>,
    pub ip_source: Arc<dyn PublicIpSource>,
}

impl Collaborators {
    /// terraform, aws CLI, ssh, reqwest and bash
    pub fn production(config: &CanopyConfig) -> ProvisionResult<Self> {
        let http_timeout = config.timeouts.probe_request();

        Ok(Self {
            infra: Arc::new(TerraformCli::new(config.paths.terraform_dir.clone())),
            state: Arc::new(AwsCliStore::new(&config.state, &config.infra)),
            remote: Arc::new(SshExecutor::from_config(&config.ssh)),
            management: Arc::new(ManagementClient::from_config(&config.management)?),
            liveness: Arc::new(HttpLiveness::new(http_timeout)?),
            installer: Arc::new(ScriptInstaller::new()),
            ip_source: Arc::new(IpDiscovery::new(config.network.ip_services.clone(), http_timeout)?),
        })
    }
}

/// Inputs of one Phase 2 task, owned so the task can outlive the loop that spawned it
struct TenantInstall {
    ordinal: usize,
    dir: PathBuf,
    command: String,
    url: String,
    ready: PollSpec,
    initial_delay: Duration,
    settle_delay: Duration,
    installer: Arc<dyn ChartInstaller>,
    liveness: Arc<dyn LivenessCheck>,
    session: Arc<ProvisioningSession>,
}

impl TenantInstall {
    async fn run(self) -> TenantPhaseResult {
        let ordinal = self.ordinal;
        match self.install().await {
            Ok(()) => {
                info!(ordinal, url = %self.url, "Tenant install finished");
                TenantPhaseResult::success(ordinal, PhaseKind::Install)
            }
            Err(e) => {
                error!(ordinal, url = %self.url, error = %e, "Tenant install failed");
                TenantPhaseResult::failure(ordinal, PhaseKind::Install, e.to_string())
            }
        }
    }

    async fn install(&self) -> ProvisionResult<()> {
        info!(
            ordinal = self.ordinal,
            host = %self.session.host_url,
            "Installing tenant management plane"
        );
        write_install_bundle(&self.dir, &self.command, &self.url, None).await?;
        self.installer.install(&self.dir).await?;
        wait_until_live(
            self.liveness.as_ref(),
            &self.url,
            &self.ready,
            self.initial_delay,
            self.settle_delay,
        )
        .await?;
        Ok(())
    }
}

pub struct Orchestrator {
    config: Arc<CanopyConfig>,
    deps: Collaborators,
    state: RunState,
    report: RunReport,
    session: Option<Arc<ProvisioningSession>>,
}

impl Orchestrator {
    pub fn new(config: CanopyConfig, deps: Collaborators) -> Self {
        Self {
            config: Arc::new(config),
            deps,
            state: RunState::Validating,
            report: RunReport::default(),
            session: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// Host session, once the host has authenticated
    pub fn session(&self) -> Option<&ProvisioningSession> {
        self.session.as_deref()
    }

    fn transition(&mut self, next: RunState) {
        info!(from = %self.state, to = %next, "Run state");
        self.state = next;
        self.report.state = next;
    }

    /// Pre-flight checks only; touches no infrastructure
    pub async fn validate(&self) -> ProvisionResult<()> {
        Gate::new(self.deps.ip_source.as_ref(), self.deps.state.as_ref())
            .run(&self.config)
            .await
    }

    /// Drive the whole pipeline
    pub async fn run(&mut self) -> ProvisionResult<RunReport> {
        let started = Instant::now();
        self.report.started_at = Utc::now();

        let outcome = self.execute().await;
        self.report.finished_at = Some(Utc::now());

        match outcome {
            Ok(()) => {
                self.transition(RunState::Done);
                info!(
                    elapsed = ?started.elapsed(),
                    host = self.report.host_url.as_deref().unwrap_or_default(),
                    tenants = ?self.report.tenant_urls,
                    "Provisioning complete"
                );
                Ok(self.report.clone())
            }
            Err(e) => {
                let failed_in = self.state;
                self.transition(RunState::Failed);
                self.report.error = Some(e.to_string());
                error!(
                    state = %failed_in,
                    ordinal = e.tenant_ordinal(),
                    elapsed = ?started.elapsed(),
                    error = %e,
                    "Provisioning failed"
                );
                Err(e)
            }
        }
    }

    async fn execute(&mut self) -> ProvisionResult<()> {
        let config = Arc::clone(&self.config);

        self.validate().await?;

        self.transition(RunState::ProvisioningInfra);
        let instances = self.provision_infra(&config).await?;
        let Some((host, tenants)) = instances.split_first() else {
            return Err(crate::infra::InfraError::MissingOutput("infra1_rancher_url".to_string()).into());
        };
        self.report.host_url = Some(host.url.clone());
        self.report.tenant_urls = tenants.iter().map(|t| (t.ordinal, t.url.clone())).collect();

        self.transition(RunState::InstallingHost);
        self.install_host(&config, host).await?;
        let (password, token) = self.wait_for_host_auth(&config, host).await?;

        self.transition(RunState::AuthenticatingHost);
        let session = Arc::new(self.authenticate_host(&config, host, tenants, password, token).await);
        self.session = Some(Arc::clone(&session));
        self.report.host_ready = true;

        self.transition(RunState::Phase1);
        for tenant in tenants {
            if let Err(e) = self.import_tenant(&config, &session, tenant).await {
                self.report.phase1.push(TenantPhaseResult::failure(
                    tenant.ordinal,
                    PhaseKind::Import,
                    e.to_string(),
                ));
                return Err(ProvisionError::Phase1 {
                    ordinal: tenant.ordinal,
                    source: Box::new(e),
                });
            }
            self.report
                .phase1
                .push(TenantPhaseResult::success(tenant.ordinal, PhaseKind::Import));
        }

        self.transition(RunState::Phase2);
        let results = self.install_tenants(&config, &session, tenants).await;
        let failures: Vec<TenantPhaseResult> = results.iter().filter(|r| !r.succeeded).cloned().collect();
        self.report.phase2 = results;

        if !failures.is_empty() {
            return Err(Phase2Failure { failures }.into());
        }

        Ok(())
    }

    async fn provision_infra(&self, config: &CanopyConfig) -> ProvisionResult<Vec<Instance>> {
        let vars = InfraVars::from_config(config);
        let backend = Backend::from_config(config);

        let outputs = self.deps.infra.apply(&vars, &backend).await?;
        let instances = parse_instances(&outputs, config.total_instances)?;

        if let Err(e) = self.deps.state.upload_dir(&config.paths.terraform_dir).await {
            warn!(error = %e, "Failed to upload infrastructure module to the state bucket");
        }

        for instance in &instances {
            info!(
                instance = %instance.label(),
                infra = instance.infra_index(),
                url = %instance.url,
                node1 = %instance.node1,
                node2 = %instance.node2,
                "Instance provisioned"
            );
        }
        Ok(instances)
    }

    fn bootstrap_options(config: &CanopyConfig, ordinal: usize) -> BootstrapOptions {
        BootstrapOptions {
            k3s_version: config.k3s_version(ordinal).unwrap_or_default().to_string(),
            datastore_user: config.k3s.datastore_user.clone(),
            join_delay: config.timeouts.join_delay(),
        }
    }

    async fn install_host(&self, config: &CanopyConfig, host: &Instance) -> ProvisionResult<()> {
        let command = config.host_command().unwrap_or_default();
        let dir = config.instance_dir(host);

        let control_plane = bootstrap_control_plane(
            self.deps.remote.as_ref(),
            host,
            &Self::bootstrap_options(config, 0),
        )
        .await?;
        info!(
            api_server = %control_plane.api_server,
            nodes = control_plane.node_count,
            "Host control plane ready"
        );

        write_install_bundle(&dir, command, &host.url, Some(control_plane.kubeconfig.as_str())).await?;
        self.deps.installer.install(&dir).await?;

        let outcome = wait_until_live(
            self.deps.liveness.as_ref(),
            &host.url,
            &config.timeouts.host_ready(&host.url),
            config.timeouts.liveness_initial_delay(),
            config.timeouts.liveness_settle(),
        )
        .await?;
        info!(url = %host.url, attempts = outcome.attempts, elapsed = ?outcome.elapsed, "Host is live");
        Ok(())
    }

    /// Last step of the host install: block until the admin login succeeds
    async fn wait_for_host_auth(
        &self,
        config: &CanopyConfig,
        host: &Instance,
    ) -> ProvisionResult<(String, SessionToken)> {
        let password = config
            .host_command()
            .and_then(extract_bootstrap_password)
            .unwrap_or_else(|| DEFAULT_ADMIN_PASSWORD.to_string());

        let token = wait_for_auth_ready(
            self.deps.management.as_ref(),
            &host.url,
            &config.host.admin_username,
            &password,
            &config.timeouts.auth_ready(&host.url),
        )
        .await?;
        info!(url = %host.url, "Host authentication ready");
        Ok((password, token))
    }

    async fn authenticate_host(
        &self,
        config: &CanopyConfig,
        host: &Instance,
        tenants: &[Instance],
        password: String,
        token: SessionToken,
    ) -> ProvisioningSession {
        if config.host.accept_terms {
            if let Err(e) = self.deps.management.accept_terms(&host.url, &token).await {
                warn!(error = %e, "Failed to accept terms through the settings API");
            }
        }

        let addresses = tenants.iter().map(|t| (t.ordinal, t.node1)).collect();
        ProvisioningSession::new(host.url.clone(), password, token, addresses)
    }

    async fn import_tenant(
        &mut self,
        config: &CanopyConfig,
        session: &ProvisioningSession,
        tenant: &Instance,
    ) -> ProvisionResult<()> {
        let ordinal = tenant.ordinal;
        let dir = config.instance_dir(tenant);
        info!(ordinal, url = %tenant.url, "Importing tenant");

        let control_plane = bootstrap_control_plane(
            self.deps.remote.as_ref(),
            tenant,
            &Self::bootstrap_options(config, ordinal),
        )
        .await?;
        debug!(ordinal, api_server = %control_plane.api_server, nodes = control_plane.node_count, "Tenant control plane ready");
        write_kubeconfig(&dir, &control_plane.kubeconfig).await?;

        let api = self.deps.management.as_ref();
        let record = api
            .register_cluster(&session.host_url, session.token(), ordinal)
            .await?;

        tokio::time::sleep(config.timeouts.manifest_delay()).await;

        let manifest_url = api.fetch_manifest_url(&session.host_url, session.token()).await?;
        let mut record = record.with_manifest_url(&manifest_url);
        write_import_script(&dir, &manifest_url).await?;

        let node = session.tenant_address(ordinal).unwrap_or(tenant.node1);
        self.deps.remote.exec(&import_command(&manifest_url), node).await?;

        let outcome = wait_for_cluster_active(
            api,
            &session.host_url,
            session.token(),
            ordinal,
            &config.timeouts.cluster_active(&cluster_name(ordinal)),
        )
        .await?;
        info!(ordinal, cluster = %record.name, attempts = outcome.attempts, "Tenant cluster active");

        record.phase = Some("Active".to_string());
        self.report.imports.push(record);
        Ok(())
    }

    /// One task per tenant; handles are joined in ordinal order into a preallocated result set
    async fn install_tenants(
        &self,
        config: &CanopyConfig,
        session: &Arc<ProvisioningSession>,
        tenants: &[Instance],
    ) -> Vec<TenantPhaseResult> {
        let mut handles: Vec<(usize, JoinHandle<TenantPhaseResult>)> = Vec::with_capacity(tenants.len());

        for tenant in tenants {
            let task = TenantInstall {
                ordinal: tenant.ordinal,
                dir: config.instance_dir(tenant),
                command: config.tenant_command(tenant.ordinal).unwrap_or_default().to_string(),
                url: tenant.url.clone(),
                ready: config.timeouts.tenant_ready(&tenant.url),
                initial_delay: config.timeouts.liveness_initial_delay(),
                settle_delay: config.timeouts.liveness_settle(),
                installer: Arc::clone(&self.deps.installer),
                liveness: Arc::clone(&self.deps.liveness),
                session: Arc::clone(session),
            };
            handles.push((tenant.ordinal, tokio::spawn(task.run())));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (ordinal, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => TenantPhaseResult::failure(ordinal, PhaseKind::Install, format!("install task aborted: {}", e)),
            };
            results.push(result);
        }

        results
    }
}
