use super::{Backend, InfraEngine, InfraError, InfraVars, OutputMap};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

pub const TFVARS_FILE: &str = "terraform.tfvars.json";

/// Drives the `terraform` binary inside the module directory
#[derive(Debug, Clone)]
pub struct TerraformCli {
    dir: PathBuf,
    binary: String,
}

impl TerraformCli {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            binary: "terraform".to_string(),
        }
    }

    fn command(&self, vars: &InfraVars) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(&self.dir)
            .env("AWS_ACCESS_KEY_ID", &vars.infra.aws_access_key)
            .env("AWS_SECRET_ACCESS_KEY", &vars.infra.aws_secret_key)
            .env("TF_IN_AUTOMATION", "1")
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, step: &'static str, vars: &InfraVars, args: &[String]) -> Result<String, InfraError> {
        debug!(step, ?args, dir = %self.dir.display(), "Running terraform");

        let output = self
            .command(vars)
            .arg(step)
            .args(args)
            .output()
            .await
            .map_err(|source| InfraError::Spawn { step, source })?;

        if !output.status.success() {
            return Err(InfraError::Command {
                step,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn write_vars(&self, vars: &InfraVars) -> Result<PathBuf, InfraError> {
        let path = self.dir.join(TFVARS_FILE);
        let body = serde_json::to_string_pretty(vars).map_err(|e| InfraError::Decode(e.to_string()))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| InfraError::Io {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    async fn init(&self, vars: &InfraVars, backend: &Backend) -> Result<(), InfraError> {
        let args = vec![
            "-input=false".to_string(),
            "-no-color".to_string(),
            format!("-backend-config=bucket={}", backend.bucket),
            format!("-backend-config=key={}", backend.key),
            format!("-backend-config=region={}", backend.region),
        ];
        self.run("init", vars, &args).await.map(|_| ())
    }
}

fn var_file_args() -> Vec<String> {
    vec![
        "-auto-approve".to_string(),
        "-input=false".to_string(),
        "-no-color".to_string(),
        format!("-var-file={}", TFVARS_FILE),
    ]
}

/// Flatten `terraform output -json` (`{name: {value, ...}}`) into strings
pub fn flatten_outputs(json: &str) -> Result<OutputMap, InfraError> {
    let parsed: serde_json::Map<String, Value> =
        serde_json::from_str(json).map_err(|e| InfraError::Decode(e.to_string()))?;

    Ok(parsed
        .into_iter()
        .filter_map(|(name, output)| {
            let value = match output.get("value")? {
                Value::String(s) => s.clone(),
                Value::Null => return None,
                other => other.to_string(),
            };
            Some((name, value))
        })
        .collect())
}

#[async_trait]
impl InfraEngine for TerraformCli {
    async fn apply(&self, vars: &InfraVars, backend: &Backend) -> Result<OutputMap, InfraError> {
        let vars_path = self.write_vars(vars).await?;
        info!(vars = %vars_path.display(), instances = vars.instance_count, "Applying infrastructure");

        self.init(vars, backend).await?;
        self.run("apply", vars, &var_file_args()).await?;

        let json = self
            .run("output", vars, &["-json".to_string(), "-no-color".to_string()])
            .await?;
        let outputs = flatten_outputs(&json)?;
        info!(outputs = outputs.len(), "Infrastructure applied");
        Ok(outputs)
    }

    async fn destroy(&self, vars: &InfraVars, backend: &Backend) -> Result<(), InfraError> {
        if !self.dir.join(TFVARS_FILE).exists() {
            self.write_vars(vars).await?;
        }

        self.init(vars, backend).await?;
        self.run("destroy", vars, &var_file_args()).await?;
        info!(dir = %self.dir.display(), "Infrastructure destroyed");
        Ok(())
    }
}
