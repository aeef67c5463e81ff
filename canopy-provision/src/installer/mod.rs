//! Management software installation on a cluster
//!
//! Every instance gets a working directory holding `install.sh`, the
//! harvested `kube_config.yaml` and, for tenants, `import.sh`.

mod script;

pub use script::{
    extract_bootstrap_password, import_command, render_import_script, render_install_script,
    target_command, DEFAULT_ADMIN_PASSWORD,
};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

pub const INSTALL_SCRIPT: &str = "install.sh";
pub const KUBECONFIG_FILE: &str = "kube_config.yaml";
pub const IMPORT_SCRIPT: &str = "import.sh";

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0:?} is missing from the install bundle")]
    MissingArtifact(PathBuf),

    #[error("Failed to run install script in {dir:?}: {source}")]
    Spawn {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Install script in {dir:?} exited with status {status}: {stderr}")]
    Failed {
        dir: PathBuf,
        status: i32,
        stderr: String,
    },
}

/// Runs the install step for an instance whose bundle has been written
#[async_trait]
pub trait ChartInstaller: Send + Sync {
    async fn install(&self, bundle_dir: &Path) -> Result<(), InstallError>;
}

async fn write_file(path: PathBuf, contents: &str, executable: bool) -> Result<PathBuf, InstallError> {
    tokio::fs::write(&path, contents)
        .await
        .map_err(|source| InstallError::Write {
            path: path.clone(),
            source,
        })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if executable {
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(|source| InstallError::Write {
                    path: path.clone(),
                    source,
                })?;
        }
    }
    #[cfg(not(unix))]
    let _ = executable;

    Ok(path)
}

async fn ensure_dir(dir: &Path) -> Result<(), InstallError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| InstallError::Write {
            path: dir.to_path_buf(),
            source,
        })
}

/// Write the harvested kubeconfig into an instance directory
pub async fn write_kubeconfig(dir: &Path, kubeconfig: &str) -> Result<PathBuf, InstallError> {
    ensure_dir(dir).await?;
    write_file(dir.join(KUBECONFIG_FILE), kubeconfig, false).await
}

/// Write `install.sh` (and the kubeconfig, when given) into an instance directory
pub async fn write_install_bundle(
    dir: &Path,
    helm_command: &str,
    url: &str,
    kubeconfig: Option<&str>,
) -> Result<PathBuf, InstallError> {
    ensure_dir(dir).await?;
    if let Some(kubeconfig) = kubeconfig {
        write_file(dir.join(KUBECONFIG_FILE), kubeconfig, false).await?;
    }

    let script = write_file(
        dir.join(INSTALL_SCRIPT),
        &render_install_script(helm_command, url),
        true,
    )
    .await?;
    info!(path = %script.display(), "Wrote install script");
    Ok(script)
}

pub async fn write_import_script(dir: &Path, manifest_url: &str) -> Result<PathBuf, InstallError> {
    ensure_dir(dir).await?;
    write_file(dir.join(IMPORT_SCRIPT), &render_import_script(manifest_url), true).await
}

/// Runs `bash install.sh` inside the bundle with `KUBECONFIG` pointed at it
#[derive(Debug, Clone, Default)]
pub struct ScriptInstaller;

impl ScriptInstaller {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChartInstaller for ScriptInstaller {
    async fn install(&self, bundle_dir: &Path) -> Result<(), InstallError> {
        let dir = match tokio::fs::canonicalize(bundle_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(InstallError::MissingArtifact(bundle_dir.to_path_buf()))
            }
            Err(source) => {
                return Err(InstallError::Spawn {
                    dir: bundle_dir.to_path_buf(),
                    source,
                })
            }
        };
        let script = dir.join(INSTALL_SCRIPT);
        let kubeconfig = dir.join(KUBECONFIG_FILE);

        for artifact in [&script, &kubeconfig] {
            if !artifact.exists() {
                return Err(InstallError::MissingArtifact(artifact.clone()));
            }
        }

        debug!(dir = %dir.display(), "Executing install script");

        let output = Command::new("bash")
            .arg(&script)
            .current_dir(&dir)
            .env("KUBECONFIG", &kubeconfig)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| InstallError::Spawn {
                dir: dir.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(20).collect();
            return Err(InstallError::Failed {
                dir,
                status: output.status.code().unwrap_or(-1),
                stderr: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
            });
        }

        info!(dir = %dir.display(), "Install script completed");
        Ok(())
    }
}
