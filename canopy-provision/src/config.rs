//! Configuration management for Canopy
//!
//! The configuration is loaded once, from (highest priority first):
//! 1. Environment variables (`CANOPY_*`, secrets and paths only)
//! 2. Configuration file (YAML or TOML)
//!
//! Required fields have no serde defaults, so a file missing one of them is
//! rejected when it is parsed rather than when the field is first used.

use crate::logging::LoggingConfig;
use crate::poller::PollSpec;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main configuration struct for Canopy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanopyConfig {
    /// Host plus tenants
    pub total_instances: usize,
    /// Per-instance install commands (index 0 is the host)
    pub install: InstallConfig,
    /// Per-instance k3s versions (index 0 is the host)
    pub k3s: K3sConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub management: ManagementConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    pub ssh: SshConfig,
    pub infra: InfraConfig,
    pub state: StateConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Helm install/upgrade command per instance
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct K3sConfig {
    /// k3s version pin per instance
    pub versions: Vec<String>,
    /// Datastore user embedded in the datastore endpoint
    #[serde(default = "default_datastore_user")]
    pub datastore_user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    /// Accept the management plane's terms through its settings API
    #[serde(default = "default_true")]
    pub accept_terms: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementConfig {
    /// Skip certificate verification for management API calls
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Poll timeouts and intervals, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub host_ready_secs: u64,
    pub host_ready_interval_secs: u64,
    pub auth_ready_secs: u64,
    pub auth_ready_interval_secs: u64,
    pub cluster_active_secs: u64,
    pub cluster_active_interval_secs: u64,
    pub tenant_ready_secs: u64,
    pub tenant_ready_interval_secs: u64,
    /// Sleep before the first liveness probe
    pub liveness_initial_delay_secs: u64,
    /// Sleep after the liveness probe succeeds
    pub liveness_settle_secs: u64,
    /// Sleep between cluster registration and manifest lookup
    pub manifest_delay_secs: u64,
    /// Sleep between bootstrapping node 1 and joining node 2
    pub join_delay_secs: u64,
    /// Per-request timeout of the liveness probe
    pub probe_request_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// When set, the caller's public IP must match before anything runs
    #[serde(default)]
    pub allowed_ip: Option<IpAddr>,
    /// Public-IP echo services, tried in order
    #[serde(default = "default_ip_services")]
    pub ip_services: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_user")]
    pub user: String,
    /// Private key used for every node
    pub key_path: PathBuf,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Variables handed to the infrastructure engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraConfig {
    pub aws_access_key: String,
    pub aws_secret_key: String,
    pub aws_prefix: String,
    pub aws_vpc: String,
    pub aws_subnet_a: String,
    pub aws_subnet_b: String,
    pub aws_subnet_c: String,
    pub aws_ami: String,
    pub aws_subnet_id: String,
    pub aws_security_group_id: String,
    pub aws_pem_key_name: String,
    pub aws_rds_password: String,
    pub aws_route53_fqdn: String,
    pub aws_ec2_instance_type: String,
}

/// Remote state location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub bucket: String,
    pub region: String,
    #[serde(default = "default_state_key")]
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Parent of the per-instance working directories
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Infrastructure module directory
    #[serde(default = "default_terraform_dir")]
    pub terraform_dir: PathBuf,
}

fn default_datastore_user() -> String {
    "tfadmin".to_string()
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

fn default_ip_services() -> Vec<String> {
    vec![
        "https://api.ipify.org".to_string(),
        "https://ifconfig.me/ip".to_string(),
        "https://icanhazip.com".to_string(),
    ]
}

fn default_ssh_user() -> String {
    "ubuntu".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_state_key() -> String {
    "terraform.tfstate".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_terraform_dir() -> PathBuf {
    PathBuf::from("terraform/aws")
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            admin_username: default_admin_username(),
            accept_terms: true,
        }
    }
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            accept_invalid_certs: false,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            host_ready_secs: 600,
            host_ready_interval_secs: 20,
            auth_ready_secs: 600,
            auth_ready_interval_secs: 15,
            cluster_active_secs: 600,
            cluster_active_interval_secs: 15,
            tenant_ready_secs: 480,
            tenant_ready_interval_secs: 20,
            liveness_initial_delay_secs: 30,
            liveness_settle_secs: 30,
            manifest_delay_secs: 120,
            join_delay_secs: 10,
            probe_request_secs: 15,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            allowed_ip: None,
            ip_services: default_ip_services(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            terraform_dir: default_terraform_dir(),
        }
    }
}

impl TimeoutsConfig {
    /// Host HTTP liveness wait
    pub fn host_ready(&self, url: &str) -> PollSpec {
        PollSpec::new(
            format!("host {} to respond", url),
            Duration::from_secs(self.host_ready_interval_secs),
            Duration::from_secs(self.host_ready_secs),
        )
        .log_every(3)
    }

    /// Host authentication readiness wait
    pub fn auth_ready(&self, url: &str) -> PollSpec {
        PollSpec::new(
            format!("authentication on {}", url),
            Duration::from_secs(self.auth_ready_interval_secs),
            Duration::from_secs(self.auth_ready_secs),
        )
        .log_every(4)
    }

    /// Imported cluster activation wait
    pub fn cluster_active(&self, cluster: &str) -> PollSpec {
        PollSpec::new(
            format!("cluster {} to become Active", cluster),
            Duration::from_secs(self.cluster_active_interval_secs),
            Duration::from_secs(self.cluster_active_secs),
        )
        .log_every(4)
    }

    /// Tenant HTTP liveness wait
    pub fn tenant_ready(&self, url: &str) -> PollSpec {
        PollSpec::new(
            format!("tenant {} to respond", url),
            Duration::from_secs(self.tenant_ready_interval_secs),
            Duration::from_secs(self.tenant_ready_secs),
        )
        .log_every(3)
    }

    pub fn liveness_initial_delay(&self) -> Duration {
        Duration::from_secs(self.liveness_initial_delay_secs)
    }

    pub fn liveness_settle(&self) -> Duration {
        Duration::from_secs(self.liveness_settle_secs)
    }

    pub fn manifest_delay(&self) -> Duration {
        Duration::from_secs(self.manifest_delay_secs)
    }

    pub fn join_delay(&self) -> Duration {
        Duration::from_secs(self.join_delay_secs)
    }

    pub fn probe_request(&self) -> Duration {
        Duration::from_secs(self.probe_request_secs)
    }
}

impl CanopyConfig {
    /// Locate, parse, override and validate the configuration
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::find_config_file().ok_or(ConfigError::NotFound)?,
        };

        let mut config = Self::load_from_file(&path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration file; the format follows the extension
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e.to_string()))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("CANOPY_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("./canopy.yml")),
            Some(PathBuf::from("./config.yml")),
            Some(PathBuf::from("./canopy.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CANOPY_SSH_KEY_PATH") {
            self.ssh.key_path = PathBuf::from(path);
        }
        if let Ok(key) = std::env::var("CANOPY_AWS_ACCESS_KEY") {
            self.infra.aws_access_key = key;
        }
        if let Ok(key) = std::env::var("CANOPY_AWS_SECRET_KEY") {
            self.infra.aws_secret_key = key;
        }
        if let Ok(bucket) = std::env::var("CANOPY_S3_BUCKET") {
            self.state.bucket = bucket;
        }
        if let Ok(path) = std::env::var("CANOPY_WORK_DIR") {
            self.paths.work_dir = PathBuf::from(path);
        }
        if let Ok(level) = std::env::var("CANOPY_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Reject values that can never work, independent of topology checks
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssh.key_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation("ssh.key_path cannot be empty".to_string()));
        }

        if self.state.bucket.is_empty() || self.state.region.is_empty() {
            return Err(ConfigError::Validation(
                "state.bucket and state.region are required".to_string(),
            ));
        }

        let t = &self.timeouts;
        let intervals = [
            ("host_ready_interval_secs", t.host_ready_interval_secs),
            ("auth_ready_interval_secs", t.auth_ready_interval_secs),
            ("cluster_active_interval_secs", t.cluster_active_interval_secs),
            ("tenant_ready_interval_secs", t.tenant_ready_interval_secs),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Validation(format!(
                "timeouts.{} must be greater than 0",
                name
            )));
        }

        Ok(())
    }

    /// Number of tenant instances
    pub fn tenant_count(&self) -> usize {
        self.total_instances.saturating_sub(1)
    }

    /// Host install command
    pub fn host_command(&self) -> Option<&str> {
        self.install.commands.first().map(String::as_str)
    }

    /// Install command of a tenant ordinal (1-based)
    pub fn tenant_command(&self, ordinal: usize) -> Option<&str> {
        self.install.commands.get(ordinal).map(String::as_str)
    }

    /// k3s version of an instance (0 = host)
    pub fn k3s_version(&self, ordinal: usize) -> Option<&str> {
        self.k3s.versions.get(ordinal).map(String::as_str)
    }

    /// Working directory of an instance
    pub fn instance_dir(&self, instance: &canopy_common::Instance) -> PathBuf {
        self.paths.work_dir.join(instance.work_dir_name())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let helm = |url: &str| {
            format!(
                "helm install rancher rancher-latest/rancher \\\n  --namespace cattle-system \\\n  --set hostname={} \\\n  --set bootstrapPassword=change-me \\\n  --set tls=external \\\n  --set agentTLSMode=system-store",
                url
            )
        };

        let sample = Self {
            total_instances: 2,
            install: InstallConfig {
                commands: vec![helm("placeholder"), helm("placeholder")],
            },
            k3s: K3sConfig {
                versions: vec!["v1.30.4+k3s1".to_string(), "v1.30.4+k3s1".to_string()],
                datastore_user: default_datastore_user(),
            },
            host: HostConfig::default(),
            management: ManagementConfig::default(),
            timeouts: TimeoutsConfig::default(),
            network: NetworkConfig::default(),
            ssh: SshConfig {
                user: default_ssh_user(),
                key_path: PathBuf::from("~/.ssh/canopy.pem"),
                port: default_ssh_port(),
                connect_timeout_secs: default_connect_timeout(),
            },
            infra: InfraConfig {
                aws_access_key: String::new(),
                aws_secret_key: String::new(),
                aws_prefix: "canopy".to_string(),
                aws_vpc: "vpc-".to_string(),
                aws_subnet_a: "subnet-".to_string(),
                aws_subnet_b: "subnet-".to_string(),
                aws_subnet_c: "subnet-".to_string(),
                aws_ami: "ami-".to_string(),
                aws_subnet_id: "subnet-".to_string(),
                aws_security_group_id: "sg-".to_string(),
                aws_pem_key_name: "canopy".to_string(),
                aws_rds_password: String::new(),
                aws_route53_fqdn: "example.com".to_string(),
                aws_ec2_instance_type: "m5.xlarge".to_string(),
            },
            state: StateConfig {
                bucket: "canopy-state".to_string(),
                region: "us-east-2".to_string(),
                key: default_state_key(),
            },
            paths: PathsConfig::default(),
            logging: LoggingConfig::default(),
        };

        serde_yaml::to_string(&sample).unwrap_or_default()
    }
}

/// Configuration errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("No configuration file found (set CANOPY_CONFIG or create ./canopy.yml)")]
    NotFound,

    #[error("Failed to read config file {0:?}: {1}")]
    FileRead(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Config validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const MINIMAL: &str = r#"
total_instances: 2
install:
  commands:
    - "helm install rancher rancher-latest/rancher --set hostname=placeholder --set bootstrapPassword=pw"
    - "helm install rancher rancher-latest/rancher --set hostname=placeholder --set bootstrapPassword=pw"
k3s:
  versions: ["v1.30.4+k3s1", "v1.30.4+k3s1"]
ssh:
  key_path: /tmp/key.pem
infra:
  aws_access_key: AKIA
  aws_secret_key: secret
  aws_prefix: canopy
  aws_vpc: vpc-1
  aws_subnet_a: subnet-a
  aws_subnet_b: subnet-b
  aws_subnet_c: subnet-c
  aws_ami: ami-1
  aws_subnet_id: subnet-1
  aws_security_group_id: sg-1
  aws_pem_key_name: canopy
  aws_rds_password: rdspw
  aws_route53_fqdn: example.com
  aws_ec2_instance_type: m5.large
state:
  bucket: canopy-state
  region: us-east-2
"#;

    #[test]
    fn test_minimal_yaml_applies_defaults() {
        let config = CanopyConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.total_instances, 2);
        assert_eq!(config.tenant_count(), 1);
        assert_eq!(config.ssh.user, "ubuntu");
        assert_eq!(config.ssh.port, 22);
        assert_eq!(config.state.key, "terraform.tfstate");
        assert_eq!(config.k3s.datastore_user, "tfadmin");
        assert_eq!(config.timeouts.host_ready_secs, 600);
        assert_eq!(config.network.ip_services.len(), 3);
        assert!(config.network.allowed_ip.is_none());
        assert!(config.host.accept_terms);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let without_state = MINIMAL.split("state:").next().unwrap();
        let err = CanopyConfig::from_yaml(without_state).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(ref msg) if msg.contains("state")));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = CanopyConfig::from_yaml(MINIMAL).unwrap();
        config.timeouts.cluster_active_interval_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cluster_active_interval_secs"));
    }

    #[test]
    fn test_per_instance_lookups() {
        let config = CanopyConfig::from_yaml(MINIMAL).unwrap();
        assert!(config.host_command().unwrap().contains("helm install"));
        assert!(config.tenant_command(1).is_some());
        assert!(config.tenant_command(2).is_none());
        assert_eq!(config.k3s_version(0), Some("v1.30.4+k3s1"));
    }

    #[test]
    fn test_timeouts_build_poll_specs() {
        let timeouts = TimeoutsConfig::default();
        let spec = timeouts.host_ready("host.example.com");
        assert_eq!(spec.interval, Duration::from_secs(20));
        assert_eq!(spec.timeout, Duration::from_secs(600));
        assert_eq!(spec.log_every, 3);
        assert_eq!(timeouts.cluster_active("imported-tenant-1").log_every, 4);
    }

    #[test]
    fn test_generate_sample_config_round_trips() {
        let sample = CanopyConfig::generate_sample();
        assert!(sample.contains("total_instances: 2"));
        assert!(sample.contains("bootstrapPassword"));
        let parsed = CanopyConfig::from_yaml(&sample).unwrap();
        assert_eq!(parsed.install.commands.len(), 2);
    }

    #[test]
    fn test_toml_config() {
        let config: CanopyConfig = serde_yaml::from_str(MINIMAL).unwrap();
        let as_toml = toml::to_string(&config).unwrap();
        let parsed = CanopyConfig::from_toml(&as_toml).unwrap();
        assert_eq!(parsed.state.bucket, "canopy-state");
    }
}
