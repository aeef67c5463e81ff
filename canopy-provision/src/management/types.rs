//! Wire types of the management API

use canopy_common::IMPORT_NAMESPACE;
use serde::{Deserialize, Serialize};

/// Long-lived API token obtained after login
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginRequest<'a> {
    pub description: String,
    pub response_type: &'static str,
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct TokenRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub metadata: serde_json::Value,
    pub description: &'static str,
    pub ttl: u64,
}

impl Default for TokenRequest {
    fn default() -> Self {
        Self {
            kind: "token",
            metadata: serde_json::json!({}),
            description: "ADMIN_TOKEN",
            ttl: 0,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ClusterRegistration {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub metadata: RegistrationMetadata,
    pub spec: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegistrationMetadata {
    pub namespace: &'static str,
    pub name: String,
}

impl ClusterRegistration {
    pub fn new(name: String) -> Self {
        Self {
            kind: "provisioning.cattle.io.cluster",
            metadata: RegistrationMetadata {
                namespace: IMPORT_NAMESPACE,
                name,
            },
            spec: serde_json::json!({}),
        }
    }
}

/// One entry of `GET /v3/clusterregistrationtokens`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationToken {
    #[serde(default)]
    pub manifest_url: String,
    #[serde(rename = "createdTS", default)]
    pub created_ts: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// One entry of `GET /v1/provisioning.cattle.io.clusters`
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterResource {
    pub metadata: ResourceMetadata,
    #[serde(default)]
    pub status: Option<ClusterStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceMetadata {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ClusterStatus {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub ready: bool,
}

impl ClusterStatus {
    pub fn is_active(&self) -> bool {
        self.ready || self.phase.as_deref() == Some("Active")
    }

    pub fn describe(&self) -> String {
        format!(
            "phase={} ready={}",
            self.phase.as_deref().unwrap_or("<none>"),
            self.ready
        )
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SettingValue<'a> {
    pub value: &'a str,
}

/// The most recently created registration token
pub fn select_latest_manifest(tokens: &[RegistrationToken]) -> Option<&RegistrationToken> {
    tokens.iter().max_by_key(|t| t.created_ts)
}
