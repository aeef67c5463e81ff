//! Remote command execution on cluster nodes

mod ssh;

pub use ssh::SshExecutor;

use async_trait::async_trait;
use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("SSH key not found: {0:?}")]
    KeyNotFound(PathBuf),

    #[error("Failed to spawn ssh for {host}: {source}")]
    Spawn {
        host: IpAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not connect to {host}: {detail}")]
    Connect { host: IpAddr, detail: String },

    #[error("Command on {host} exited with status {status}: {stderr}")]
    Command {
        host: IpAddr,
        status: i32,
        stderr: String,
    },
}

/// Runs a shell command on a node and returns its stdout
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn exec(&self, command: &str, host: IpAddr) -> Result<String, TransportError>;
}

/// Strip the trailing line ending a remote shell leaves behind
pub fn trim_output(output: &str) -> &str {
    output.trim_end_matches(['\r', '\n'])
}

/// Single-quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
