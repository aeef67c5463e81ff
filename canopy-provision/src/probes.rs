//! HTTP liveness of an installed management plane

use crate::poller::{poll_until_ready, PollOutcome, PollSpec, PollTimeout};
use async_trait::async_trait;
use reqwest::{redirect, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Status codes that prove the server is answering
pub const ACCEPTED_STATUS: [u16; 5] = [200, 302, 401, 403, 404];

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Request to {url} failed: {detail}")]
    Request { url: String, detail: String },
}

/// Anything that can say whether a base URL is serving
#[async_trait]
pub trait LivenessCheck: Send + Sync {
    async fn is_live(&self, base_url: &str) -> Result<bool, ProbeError>;
}

/// Probes the root path, then the API path
pub struct HttpLiveness {
    client: Client,
}

impl HttpLiveness {
    /// Certificates are not verified: the targets serve self-signed certs until
    /// the chart finishes issuing real ones.
    pub fn new(request_timeout: Duration) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(redirect::Policy::none())
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    async fn status_of(&self, url: &str) -> Result<StatusCode, ProbeError> {
        let response = self.client.get(url).send().await.map_err(|e| ProbeError::Request {
            url: url.to_string(),
            detail: e.to_string(),
        })?;
        Ok(response.status())
    }
}

pub fn is_accepted(status: StatusCode) -> bool {
    ACCEPTED_STATUS.contains(&status.as_u16())
}

/// Prefix `https://` unless the host already carries a scheme
pub fn https_base(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    }
}

#[async_trait]
impl LivenessCheck for HttpLiveness {
    async fn is_live(&self, base_url: &str) -> Result<bool, ProbeError> {
        let base = https_base(base_url);

        for path in ["/", "/v3"] {
            let url = format!("{}{}", base, path);
            let status = self.status_of(&url).await?;
            debug!(%url, %status, "Liveness probe");
            if !is_accepted(status) {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// Sleep `initial_delay`, poll until live, then sleep `settle_delay`
pub async fn wait_until_live(
    check: &dyn LivenessCheck,
    base_url: &str,
    spec: &PollSpec,
    initial_delay: Duration,
    settle_delay: Duration,
) -> Result<PollOutcome, PollTimeout> {
    if !initial_delay.is_zero() {
        debug!(url = base_url, ?initial_delay, "Delaying first liveness probe");
        tokio::time::sleep(initial_delay).await;
    }

    let outcome = poll_until_ready(spec, || check.is_live(base_url)).await?;

    if !settle_delay.is_zero() {
        info!(url = base_url, ?settle_delay, "Endpoint live, letting it settle");
        tokio::time::sleep(settle_delay).await;
    }

    Ok(outcome)
}
