//! Bounded readiness polling
//!
//! Every wait in a run (host liveness, authentication, cluster activation,
//! tenant liveness) goes through [`poll_until_ready`]. A probe error counts
//! as "not ready yet"; only the deadline ends the loop unsuccessfully.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

/// What to poll, how often, and for how long
#[derive(Debug, Clone)]
pub struct PollSpec {
    pub label: String,
    pub interval: Duration,
    pub timeout: Duration,
    /// Log progress on every n-th attempt
    pub log_every: u32,
}

impl PollSpec {
    pub fn new(label: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            interval,
            timeout,
            log_every: 3,
        }
    }

    pub fn log_every(mut self, n: u32) -> Self {
        self.log_every = n.max(1);
        self
    }
}

/// A successful poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    pub attempts: u32,
    pub elapsed: Duration,
}

/// The deadline passed without a ready probe
#[derive(Debug, Clone, Error)]
#[error("Timed out after {elapsed:?} ({attempts} attempts) waiting for {label}; last status: {last_status}")]
pub struct PollTimeout {
    pub label: String,
    pub elapsed: Duration,
    pub attempts: u32,
    pub last_status: String,
}

/// Run `probe` every `spec.interval` until it reports ready or `spec.timeout` passes
pub async fn poll_until_ready<F, Fut, E>(spec: &PollSpec, mut probe: F) -> Result<PollOutcome, PollTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: Display,
{
    let start = Instant::now();
    let mut attempts: u32 = 0;
    let mut last_status = String::from("no attempt made");

    while start.elapsed() < spec.timeout {
        attempts += 1;

        match probe().await {
            Ok(true) => {
                let elapsed = start.elapsed();
                info!(target: "canopy::poll", attempts, ?elapsed, "{} ready", spec.label);
                return Ok(PollOutcome { attempts, elapsed });
            }
            Ok(false) => last_status = "not ready".to_string(),
            Err(e) => last_status = e.to_string(),
        }

        if (attempts - 1) % spec.log_every.max(1) == 0 {
            info!(
                target: "canopy::poll",
                attempts,
                elapsed = ?start.elapsed(),
                status = %last_status,
                "Waiting for {}",
                spec.label
            );
        } else {
            debug!(target: "canopy::poll", attempts, status = %last_status, "Waiting for {}", spec.label);
        }

        tokio::time::sleep(spec.interval).await;
    }

    Err(PollTimeout {
        label: spec.label.clone(),
        elapsed: start.elapsed(),
        attempts,
        last_status,
    })
}
