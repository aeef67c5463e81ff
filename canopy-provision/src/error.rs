//! Provisioning error taxonomy
//!
//! Each external boundary has its own error type; `ProvisionError` wraps them
//! and adds tenant attribution for the two tenant phases.

use crate::config::ConfigError;
use crate::infra::InfraError;
use crate::installer::InstallError;
use crate::management::{AuthError, ManagementError, ManifestError, RegisterError};
use crate::poller::PollTimeout;
use crate::probes::ProbeError;
use crate::remote::TransportError;
use crate::state::StateStoreError;
use crate::validation::ValidationError;
use canopy_common::TenantPhaseResult;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Infrastructure error: {0}")]
    Infrastructure(#[from] InfraError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Timeout(#[from] PollTimeout),

    #[error("Registration error: {0}")]
    Registration(#[from] RegisterError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Management API error: {0}")]
    Management(#[from] ManagementError),

    #[error("Liveness probe error: {0}")]
    Probe(#[from] ProbeError),

    #[error("Install error: {0}")]
    Install(#[from] InstallError),

    #[error("State store error: {0}")]
    StateStore(#[from] StateStoreError),

    #[error("Bootstrap of {instance} failed: {detail}")]
    Bootstrap { instance: String, detail: String },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A Phase 1 failure; halts the whole run
    #[error("Phase 1 failed for tenant {ordinal}: {source}")]
    Phase1 {
        ordinal: usize,
        #[source]
        source: Box<ProvisionError>,
    },

    /// Aggregated Phase 2 failures, raised after every tenant task finished
    #[error("{0}")]
    Phase2(#[from] Phase2Failure),
}

impl ProvisionError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProvisionError::Io {
            path: path.into(),
            source,
        }
    }

    /// Tenant ordinal the error is attributed to, if any
    pub fn tenant_ordinal(&self) -> Option<usize> {
        match self {
            ProvisionError::Phase1 { ordinal, .. } => Some(*ordinal),
            _ => None,
        }
    }
}

/// Every failing tenant of Phase 2
#[derive(Debug, Clone)]
pub struct Phase2Failure {
    pub failures: Vec<TenantPhaseResult>,
}

impl Phase2Failure {
    pub fn ordinals(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.ordinal).collect()
    }
}

impl std::fmt::Display for Phase2Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Phase 2 failed for {} tenant(s):", self.failures.len())?;
        for failure in &self.failures {
            write!(
                f,
                " [tenant {}: {}]",
                failure.ordinal,
                failure.error.as_deref().unwrap_or("unknown error")
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for Phase2Failure {}

pub type ProvisionResult<T> = std::result::Result<T, ProvisionError>;
