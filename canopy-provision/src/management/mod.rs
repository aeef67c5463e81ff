//! Client for the host's cluster management API
//!
//! Covers the two-step token handshake, tenant cluster registration,
//! registration-token lookup, cluster status and terms acceptance. The
//! readiness waits that compose these calls with the poller live here too.

mod client;
mod types;

pub use client::ManagementClient;
pub use types::{
    select_latest_manifest, ClusterResource, ClusterStatus, RegistrationToken, ResourceMetadata,
    SessionToken,
};

use crate::error::ProvisionResult;
use crate::poller::{poll_until_ready, PollOutcome, PollSpec, PollTimeout};
use async_trait::async_trait;
use canopy_common::{cluster_name, ClusterImportRecord};
use std::sync::Mutex;
use thiserror::Error;

/// Failure of a single management API call
#[derive(Debug, Error)]
pub enum ManagementError {
    #[error("Request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Unexpected response from {endpoint}: {detail}")]
    Decode { endpoint: String, detail: String },

    #[error("Invalid management URL '{0}'")]
    InvalidUrl(String),

    #[error("Cluster {0} is not listed")]
    ClusterNotFound(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Login failed: {0}")]
    Login(#[source] ManagementError),

    #[error("Token exchange failed: {0}")]
    TokenExchange(#[source] ManagementError),

    #[error("Management API returned an empty token")]
    EmptyToken,
}

#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("Registering cluster {name} failed: {source}")]
    Request {
        name: String,
        #[source]
        source: ManagementError,
    },
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Listing registration tokens failed: {0}")]
    Request(#[from] ManagementError),

    #[error("No registration tokens listed")]
    NoTokens,

    #[error("Latest registration token has an empty manifest URL")]
    EmptyManifestUrl,
}

/// Calls the orchestrator makes against a management plane
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Log in with the local provider, then exchange the login bearer for an API token
    async fn authenticate(
        &self,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> Result<SessionToken, AuthError>;

    /// Register the import cluster of a tenant; not idempotent
    async fn register_cluster(
        &self,
        base_url: &str,
        token: &SessionToken,
        ordinal: usize,
    ) -> Result<ClusterImportRecord, RegisterError>;

    /// Manifest URL of the most recent registration token
    async fn fetch_manifest_url(&self, base_url: &str, token: &SessionToken) -> Result<String, ManifestError>;

    async fn cluster_status(
        &self,
        base_url: &str,
        token: &SessionToken,
        name: &str,
    ) -> Result<ClusterStatus, ManagementError>;

    /// Mark the terms as accepted and the first login as done
    async fn accept_terms(&self, base_url: &str, token: &SessionToken) -> Result<(), ManagementError>;
}

/// Poll the token handshake until it succeeds, returning the token it produced
pub async fn wait_for_auth_ready(
    api: &dyn ManagementApi,
    base_url: &str,
    username: &str,
    password: &str,
    spec: &PollSpec,
) -> ProvisionResult<SessionToken> {
    let slot: Mutex<Option<SessionToken>> = Mutex::new(None);
    let slot_ref = &slot;

    poll_until_ready(spec, move || async move {
        let token = api.authenticate(base_url, username, password).await?;
        if let Ok(mut guard) = slot_ref.lock() {
            *guard = Some(token);
        }
        Ok::<_, AuthError>(true)
    })
    .await?;

    let token = slot.into_inner().ok().flatten();
    token.ok_or_else(|| AuthError::EmptyToken.into())
}

/// Poll the cluster list until the tenant's import cluster is active
pub async fn wait_for_cluster_active(
    api: &dyn ManagementApi,
    base_url: &str,
    token: &SessionToken,
    ordinal: usize,
    spec: &PollSpec,
) -> Result<PollOutcome, PollTimeout> {
    let name = cluster_name(ordinal);
    let name = name.as_str();

    poll_until_ready(spec, move || async move {
        let status = api.cluster_status(base_url, token, name).await?;
        tracing::debug!(cluster = name, status = %status.describe(), "Cluster status");
        Ok::<_, ManagementError>(status.is_active())
    })
    .await
}
