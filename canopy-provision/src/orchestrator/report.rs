use canopy_common::{ClusterImportRecord, PhaseKind, RunState, TenantPhaseResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// What a run achieved, filled in as it progresses
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_url: Option<String>,
    /// Host answered the liveness probe and accepted a login
    pub host_ready: bool,
    pub tenant_urls: BTreeMap<usize, String>,
    pub imports: Vec<ClusterImportRecord>,
    pub phase1: Vec<TenantPhaseResult>,
    pub phase2: Vec<TenantPhaseResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self {
            state: RunState::Validating,
            started_at: Utc::now(),
            finished_at: None,
            host_url: None,
            host_ready: false,
            tenant_urls: BTreeMap::new(),
            imports: Vec::new(),
            phase1: Vec::new(),
            phase2: Vec::new(),
            error: None,
        }
    }
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == RunState::Done
    }

    /// Every tenant finished the given phase successfully
    pub fn phase_succeeded(&self, phase: PhaseKind, tenants: usize) -> bool {
        let results = match phase {
            PhaseKind::Import => &self.phase1,
            PhaseKind::Install => &self.phase2,
        };
        results.len() == tenants && results.iter().all(|r| r.succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TenantPhaseResult> {
        self.phase1.iter().chain(self.phase2.iter()).filter(|r| !r.succeeded)
    }
}
