//! Pre-flight validation
//! Everything here runs before the infrastructure engine is touched

use crate::config::CanopyConfig;
use crate::error::ProvisionResult;
use crate::state::StateStore;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Bounds on total instances (host included)
pub const MIN_INSTANCES: usize = 2;
pub const MAX_INSTANCES: usize = 4;

static INSTALL_VERB_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bhelm\s+(install|upgrade)\b").unwrap()
});

/// Flags every install command must carry, with the pattern that detects each
static REQUIRED_FLAGS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("--set hostname=", r"--set\s+hostname="),
        ("--set bootstrapPassword=", r"--set\s+bootstrapPassword="),
        ("--set tls=external", r"--set\s+tls=external\b"),
        ("--set agentTLSMode=", r"--set\s+agentTLSMode="),
    ]
    .into_iter()
    .map(|(flag, pattern)| (flag, Regex::new(pattern).unwrap()))
    .collect()
});

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("total_instances must be between 2 and 4 (1 host + at least 1 tenant), got {got}")]
    InstanceCount { got: usize },

    #[error("Number of {what} ({actual}) does not match total_instances ({expected})")]
    CountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Install command {index} is neither 'helm install' nor 'helm upgrade'")]
    MissingInstallVerb { index: usize },

    #[error("Install command {index} is missing required flag '{flag}'")]
    MissingFlag { index: usize, flag: &'static str },

    #[error("Public IP {actual} does not match allowed IP {expected}")]
    IpMismatch { expected: IpAddr, actual: IpAddr },

    #[error("Could not determine public IP: {0}")]
    IpDiscovery(String),

    #[error("State object s3://{bucket}/{key} already exists; tear down the previous environment first")]
    StateAlreadyExists { bucket: String, key: String },
}

/// Topology and install command checks
pub fn validate(config: &CanopyConfig) -> Result<(), ValidationError> {
    let total = config.total_instances;
    if !(MIN_INSTANCES..=MAX_INSTANCES).contains(&total) {
        return Err(ValidationError::InstanceCount { got: total });
    }

    let counts = [
        ("install commands", config.install.commands.len()),
        ("k3s versions", config.k3s.versions.len()),
    ];
    for (what, actual) in counts {
        if actual != total {
            return Err(ValidationError::CountMismatch {
                what,
                expected: total,
                actual,
            });
        }
    }

    for (index, command) in config.install.commands.iter().enumerate() {
        validate_install_command(index, command)?;
    }

    Ok(())
}

pub fn validate_install_command(index: usize, command: &str) -> Result<(), ValidationError> {
    if !INSTALL_VERB_REGEX.is_match(command) {
        return Err(ValidationError::MissingInstallVerb { index });
    }

    match REQUIRED_FLAGS.iter().find(|(_, re)| !re.is_match(command)) {
        Some((flag, _)) => Err(ValidationError::MissingFlag { index, flag: *flag }),
        None => Ok(()),
    }
}

/// Source of the caller's public IP
#[async_trait]
pub trait PublicIpSource: Send + Sync {
    async fn public_ip(&self) -> Result<IpAddr, ValidationError>;
}

/// Queries echo services in order; the first usable answer wins
pub struct IpDiscovery {
    client: Client,
    services: Vec<String>,
}

impl IpDiscovery {
    pub fn new(services: Vec<String>, timeout: Duration) -> Result<Self, ValidationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ValidationError::IpDiscovery(e.to_string()))?;
        Ok(Self { client, services })
    }

    async fn query(&self, service: &str) -> Result<IpAddr, String> {
        let response = self.client.get(service).send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let body = response.text().await.map_err(|e| e.to_string())?;
        body.trim().parse().map_err(|_| format!("unparsable answer '{}'", body.trim()))
    }
}

#[async_trait]
impl PublicIpSource for IpDiscovery {
    async fn public_ip(&self) -> Result<IpAddr, ValidationError> {
        let mut failures = Vec::new();

        for service in &self.services {
            match self.query(service).await {
                Ok(ip) => {
                    debug!(%service, %ip, "Discovered public IP");
                    return Ok(ip);
                }
                Err(e) => {
                    warn!(%service, error = %e, "Public IP service failed");
                    failures.push(format!("{}: {}", service, e));
                }
            }
        }

        Err(ValidationError::IpDiscovery(if failures.is_empty() {
            "no IP services configured".to_string()
        } else {
            failures.join("; ")
        }))
    }
}

pub async fn check_caller_ip(source: &dyn PublicIpSource, allowed: IpAddr) -> Result<(), ValidationError> {
    let actual = source.public_ip().await?;
    if actual != allowed {
        return Err(ValidationError::IpMismatch {
            expected: allowed,
            actual,
        });
    }
    Ok(())
}

/// Every pre-flight check, in order
pub struct Gate<'a> {
    ip_source: &'a dyn PublicIpSource,
    state: &'a dyn StateStore,
}

impl<'a> Gate<'a> {
    pub fn new(ip_source: &'a dyn PublicIpSource, state: &'a dyn StateStore) -> Self {
        Self { ip_source, state }
    }

    pub async fn run(&self, config: &CanopyConfig) -> ProvisionResult<()> {
        validate(config)?;

        if let Some(allowed) = config.network.allowed_ip {
            check_caller_ip(self.ip_source, allowed).await?;
            info!(ip = %allowed, "Caller IP allowed");
        }

        if self.state.exists(&config.state.key).await? {
            return Err(ValidationError::StateAlreadyExists {
                bucket: config.state.bucket.clone(),
                key: config.state.key.clone(),
            }
            .into());
        }

        info!(
            instances = config.total_instances,
            tenants = config.tenant_count(),
            "Validation passed"
        );
        Ok(())
    }
}
