//! Cluster import records

use serde::{Deserialize, Serialize};

/// Namespace tenant clusters are registered into on the host
pub const IMPORT_NAMESPACE: &str = "fleet-default";

/// Registered name of the cluster for a tenant ordinal
pub fn cluster_name(ordinal: usize) -> String {
    format!("imported-tenant-{}", ordinal)
}

/// One tenant's registration into the host's management plane
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterImportRecord {
    pub ordinal: usize,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl ClusterImportRecord {
    pub fn new(ordinal: usize) -> Self {
        Self {
            ordinal,
            name: cluster_name(ordinal),
            manifest_url: None,
            phase: None,
        }
    }

    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.manifest_url = Some(url.into());
        self
    }

    pub fn is_active(&self) -> bool {
        self.phase.as_deref() == Some("Active")
    }
}
