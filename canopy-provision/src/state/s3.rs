use super::{StateStore, StateStoreError};
use crate::config::{InfraConfig, StateConfig};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

/// S3 through the `aws` CLI
#[derive(Debug, Clone)]
pub struct AwsCliStore {
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
}

impl AwsCliStore {
    pub fn new(state: &StateConfig, infra: &InfraConfig) -> Self {
        Self {
            bucket: state.bucket.clone(),
            region: state.region.clone(),
            access_key: infra.aws_access_key.clone(),
            secret_key: infra.aws_secret_key.clone(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("aws");
        cmd.env("AWS_ACCESS_KEY_ID", &self.access_key)
            .env("AWS_SECRET_ACCESS_KEY", &self.secret_key)
            .env("AWS_DEFAULT_REGION", &self.region)
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, operation: &'static str, key: &str, args: &[&str]) -> Result<String, StateStoreError> {
        debug!(operation, bucket = %self.bucket, key, "aws");

        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|source| StateStoreError::Spawn { operation, source })?;

        if !output.status.success() {
            return Err(StateStoreError::Command {
                operation,
                bucket: self.bucket.clone(),
                key: key.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// head-object reports a missing key as a 404 on stderr
pub fn is_not_found(stderr: &str) -> bool {
    stderr.contains("Not Found") || stderr.contains("(404)") || stderr.contains("NoSuchKey")
}

#[async_trait]
impl StateStore for AwsCliStore {
    async fn exists(&self, key: &str) -> Result<bool, StateStoreError> {
        let result = self
            .run(
                "s3api head-object",
                key,
                &["s3api", "head-object", "--bucket", &self.bucket, "--key", key],
            )
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(StateStoreError::Command { ref stderr, .. }) if is_not_found(stderr) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn upload_dir(&self, dir: &Path) -> Result<(), StateStoreError> {
        if !dir.is_dir() {
            return Err(StateStoreError::NotADirectory(dir.to_path_buf()));
        }

        let prefix = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = format!("s3://{}/{}", self.bucket, prefix);
        let source = dir.to_string_lossy();

        self.run("s3 cp", &prefix, &["s3", "cp", &source, &target, "--recursive", "--only-show-errors"])
            .await?;
        info!(dir = %dir.display(), %target, "Uploaded directory");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        self.run(
            "s3api delete-object",
            key,
            &["s3api", "delete-object", "--bucket", &self.bucket, "--key", key],
        )
        .await
        .map(|_| ())
    }

    async fn clear(&self) -> Result<(), StateStoreError> {
        let target = format!("s3://{}", self.bucket);
        self.run("s3 rm", "*", &["s3", "rm", &target, "--recursive", "--only-show-errors"])
            .await?;
        info!(bucket = %self.bucket, "Cleared bucket");
        Ok(())
    }
}
