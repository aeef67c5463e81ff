//! Best-effort environment teardown
//!
//! Every step runs regardless of earlier failures; the failures are logged
//! and returned together.

use crate::config::CanopyConfig;
use crate::error::ProvisionError;
use crate::infra::{Backend, InfraVars, TFVARS_FILE};
use crate::orchestrator::Collaborators;
use crate::state::lock_key;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Local artefacts a run leaves behind
pub fn local_artifacts(config: &CanopyConfig) -> Vec<PathBuf> {
    let tf = &config.paths.terraform_dir;
    let mut paths = vec![config.paths.work_dir.join("host-rancher")];
    paths.extend((1..config.total_instances).map(|n| config.paths.work_dir.join(format!("tenant-{}-rancher", n))));
    paths.extend([
        tf.join(".terraform"),
        tf.join(".terraform.lock.hcl"),
        tf.join("terraform.tfstate"),
        tf.join("terraform.tfstate.backup"),
        tf.join(TFVARS_FILE),
    ]);
    paths
}

async fn remove_path(path: &Path) -> Result<bool, ProvisionError> {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ProvisionError::io(path, e)),
    }
}

pub async fn teardown(config: &CanopyConfig, deps: &Collaborators) -> Result<(), Vec<ProvisionError>> {
    let mut errors: Vec<ProvisionError> = Vec::new();

    info!("Destroying infrastructure");
    if let Err(e) = deps
        .infra
        .destroy(&InfraVars::from_config(config), &Backend::from_config(config))
        .await
    {
        warn!(error = %e, "Infrastructure destroy failed");
        errors.push(e.into());
    }

    for path in local_artifacts(config) {
        match remove_path(&path).await {
            Ok(true) => info!(path = %path.display(), "Removed"),
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "Cleanup failed");
                errors.push(e);
            }
        }
    }

    if let Err(e) = deps.state.clear().await {
        warn!(bucket = %config.state.bucket, error = %e, "Failed to clear state bucket");
        errors.push(e.into());
    }

    let lock = lock_key(&config.state.key);
    if let Err(e) = deps.state.delete(&lock).await {
        warn!(key = %lock, error = %e, "Failed to delete state lock");
        errors.push(e.into());
    }

    if errors.is_empty() {
        info!("Teardown complete");
        Ok(())
    } else {
        warn!(failures = errors.len(), "Teardown finished with errors");
        Err(errors)
    }
}
