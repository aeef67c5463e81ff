//! Infrastructure engine boundary
//!
//! The engine materializes every instance from a variables object and hands
//! back a flat output map keyed by `infra<N>_<field>`.

mod outputs;
mod terraform;

pub use outputs::{output_key, parse_instances};
pub use terraform::{TerraformCli, TFVARS_FILE};

use crate::config::{CanopyConfig, InfraConfig};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Flattened engine outputs
pub type OutputMap = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("Failed to write {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run terraform {step}: {source}")]
    Spawn {
        step: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("terraform {step} exited with status {status}: {stderr}")]
    Command {
        step: &'static str,
        status: i32,
        stderr: String,
    },

    #[error("Failed to decode terraform outputs: {0}")]
    Decode(String),

    #[error("Missing infrastructure output '{0}'")]
    MissingOutput(String),

    #[error("Infrastructure output '{key}' is not a valid address: {value}")]
    InvalidOutput { key: String, value: String },
}

/// Variables handed to the engine
#[derive(Debug, Clone, Serialize)]
pub struct InfraVars {
    #[serde(flatten)]
    pub infra: InfraConfig,
    pub instance_count: usize,
}

impl InfraVars {
    pub fn from_config(config: &CanopyConfig) -> Self {
        Self {
            infra: config.infra.clone(),
            instance_count: config.total_instances,
        }
    }
}

/// Remote state location passed to the engine's init step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub bucket: String,
    pub key: String,
    pub region: String,
}

impl Backend {
    pub fn from_config(config: &CanopyConfig) -> Self {
        Self {
            bucket: config.state.bucket.clone(),
            key: config.state.key.clone(),
            region: config.state.region.clone(),
        }
    }
}

/// A declarative infrastructure engine; calls are never issued concurrently
#[async_trait]
pub trait InfraEngine: Send + Sync {
    async fn apply(&self, vars: &InfraVars, backend: &Backend) -> Result<OutputMap, InfraError>;

    async fn destroy(&self, vars: &InfraVars, backend: &Backend) -> Result<(), InfraError>;
}
