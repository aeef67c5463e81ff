use super::{trim_output, RemoteExecutor, TransportError};
use crate::config::SshConfig;
use async_trait::async_trait;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// ssh exits with 255 when the connection itself failed
const SSH_CONNECT_FAILURE: i32 = 255;

/// One `ssh` process per command; no session is kept between calls
#[derive(Debug, Clone)]
pub struct SshExecutor {
    user: String,
    key_path: PathBuf,
    port: u16,
    connect_timeout: Duration,
}

impl SshExecutor {
    pub fn new(user: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            key_path: key_path.into(),
            port: 22,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &SshConfig) -> Self {
        Self {
            user: config.user.clone(),
            key_path: config.key_path.clone(),
            port: config.port,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    fn command(&self, command: &str, host: IpAddr) -> Command {
        let mut ssh_cmd = Command::new("ssh");

        ssh_cmd
            .arg("-i")
            .arg(&self.key_path)
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()))
            .arg("-p")
            .arg(self.port.to_string())
            .arg(format!("{}@{}", self.user, host))
            .arg(command)
            .kill_on_drop(true);

        ssh_cmd
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn exec(&self, command: &str, host: IpAddr) -> Result<String, TransportError> {
        if !self.key_path.exists() {
            return Err(TransportError::KeyNotFound(self.key_path.clone()));
        }

        debug!(%host, command, "Running remote command");

        let output = self
            .command(command, host)
            .output()
            .await
            .map_err(|source| TransportError::Spawn { host, source })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        match output.status.code() {
            Some(0) => Ok(trim_output(&String::from_utf8_lossy(&output.stdout)).to_string()),
            Some(SSH_CONNECT_FAILURE) => Err(TransportError::Connect { host, detail: stderr }),
            code => Err(TransportError::Command {
                host,
                status: code.unwrap_or(-1),
                stderr,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_output() {
        assert_eq!(trim_output("K10abc::server:xyz\r\n"), "K10abc::server:xyz");
        assert_eq!(trim_output("3\n\n"), "3");
        assert_eq!(trim_output("no newline"), "no newline");
    }

    #[test]
    fn test_command_arguments() {
        let exec = SshExecutor::new("ubuntu", "/keys/node.pem").with_port(2222);
        let cmd = exec.command("sudo cat /etc/rancher/k3s/k3s.yaml", "10.0.0.5".parse().unwrap());
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(args[0], "-i");
        assert_eq!(args[1], "/keys/node.pem");
        assert!(args.contains(&"UserKnownHostsFile=/dev/null".to_string()));
        assert!(args.contains(&"2222".to_string()));
        assert!(args.contains(&"ubuntu@10.0.0.5".to_string()));
        assert_eq!(args.last().unwrap(), "sudo cat /etc/rancher/k3s/k3s.yaml");
    }

    #[tokio::test]
    async fn test_missing_key_rejected_before_spawn() {
        let exec = SshExecutor::new("ubuntu", "/nonexistent/canopy.pem");
        let err = exec.exec("true", "10.0.0.5".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, TransportError::KeyNotFound(_)));
    }
}
