pub mod config;
pub mod provision;
pub mod teardown;

use anyhow::{Context, Result};
use canopy_provision::logging::WorkerGuard;
use canopy_provision::CanopyConfig;
use std::path::Path;

/// Load the configuration and start logging; hold the guard until exit
pub fn load(path: Option<&Path>) -> Result<(CanopyConfig, Option<WorkerGuard>)> {
    let config = CanopyConfig::load(path).context("Failed to load configuration")?;
    let guard = config
        .logging
        .init()
        .context("Failed to initialize logging")?;

    tracing::debug!(instances = config.total_instances, "Configuration loaded");
    Ok((config, guard))
}
