//! Common types shared between canopy-provision and canopy-cli

pub mod import;

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

pub use import::{cluster_name, ClusterImportRecord, IMPORT_NAMESPACE};

/// Role an instance plays in the topology
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,   // runs the management plane
    Tenant, // imported into the host
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Tenant => write!(f, "tenant"),
        }
    }
}

/// One provisioned cluster unit (two server nodes sharing an external datastore)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub role: Role,
    /// 0 for the host, 1-based for tenants
    pub ordinal: usize,
    pub datastore_endpoint: String,
    #[serde(skip_serializing)]
    pub datastore_password: String,
    /// Externally reachable hostname (no scheme)
    pub url: String,
    /// Bootstraps the control plane
    pub node1: IpAddr,
    /// Joins the control plane bootstrapped by `node1`
    pub node2: IpAddr,
}

impl Instance {
    /// Build the host instance
    pub fn host(
        datastore_endpoint: impl Into<String>,
        datastore_password: impl Into<String>,
        url: impl Into<String>,
        node1: IpAddr,
        node2: IpAddr,
    ) -> Self {
        Self {
            role: Role::Host,
            ordinal: 0,
            datastore_endpoint: datastore_endpoint.into(),
            datastore_password: datastore_password.into(),
            url: url.into(),
            node1,
            node2,
        }
    }

    /// Build a tenant instance; `ordinal` must be at least 1
    pub fn tenant(
        ordinal: usize,
        datastore_endpoint: impl Into<String>,
        datastore_password: impl Into<String>,
        url: impl Into<String>,
        node1: IpAddr,
        node2: IpAddr,
    ) -> Result<Self> {
        if ordinal == 0 {
            return Err(Error::InvalidOrdinal(ordinal));
        }

        Ok(Self {
            role: Role::Tenant,
            ordinal,
            datastore_endpoint: datastore_endpoint.into(),
            datastore_password: datastore_password.into(),
            url: url.into(),
            node1,
            node2,
        })
    }

    /// Index of this instance in the infrastructure outputs (`infra<N>_...`)
    pub fn infra_index(&self) -> usize {
        self.ordinal + 1
    }

    /// Name of the local working directory for this instance
    pub fn work_dir_name(&self) -> String {
        match self.role {
            Role::Host => "host-rancher".to_string(),
            Role::Tenant => format!("tenant-{}-rancher", self.ordinal),
        }
    }

    /// Human label used in logs ("host", "tenant 2")
    pub fn label(&self) -> String {
        match self.role {
            Role::Host => "host".to_string(),
            Role::Tenant => format!("tenant {}", self.ordinal),
        }
    }
}

/// Tenant onboarding stage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Sequential bring-up and import
    Import,
    /// Parallel software install
    Install,
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Import => write!(f, "phase 1 (import)"),
            Self::Install => write!(f, "phase 2 (install)"),
        }
    }
}

/// Per-tenant outcome of one phase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantPhaseResult {
    pub ordinal: usize,
    pub phase: PhaseKind,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TenantPhaseResult {
    pub fn success(ordinal: usize, phase: PhaseKind) -> Self {
        Self {
            ordinal,
            phase,
            succeeded: true,
            error: None,
        }
    }

    pub fn failure(ordinal: usize, phase: PhaseKind, error: impl Into<String>) -> Self {
        Self {
            ordinal,
            phase,
            succeeded: false,
            error: Some(error.into()),
        }
    }
}

/// Pipeline state of one provisioning run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Validating,
    ProvisioningInfra,
    InstallingHost,
    AuthenticatingHost,
    Phase1,
    Phase2,
    Done,
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::ProvisioningInfra => "provisioning_infra",
            Self::InstallingHost => "installing_host",
            Self::AuthenticatingHost => "authenticating_host",
            Self::Phase1 => "phase1",
            Self::Phase2 => "phase2",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Model-level errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid tenant ordinal: {0} (tenant ordinals start at 1)")]
    InvalidOrdinal(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
