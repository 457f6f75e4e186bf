//! Read-only deployment-status collaborator.
//!
//! Deployment tracking lives in a separate service; the gateway only polls
//! it on behalf of the UI. This module is the consumed interface plus the
//! types crossing it — implementations are wired in by the host.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A provisioned resource inside a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployedResource {
    pub logical_id: String,
    pub resource_type: String,
    pub status: String,
}

/// A status-change event on a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub timestamp: DateTime<Utc>,
    pub resource: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Snapshot returned by the status service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub status: String,
    pub resources: Vec<DeployedResource>,
    pub events: Vec<DeploymentEvent>,
    pub outputs: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
    #[error("deployment not found: {0}")]
    NotFound(String),
    #[error("status service unavailable: {0}")]
    Unavailable(String),
}

/// Contract the gateway consumes; read-only by design.
#[async_trait]
pub trait DeploymentStatusProvider: Send + Sync {
    async fn get_status(&self, resource_name: &str) -> Result<DeploymentStatus, DeploymentError>;
}
