//! Agent directory lookup contract.
//!
//! Populating the directory is somebody else's job; the gateway only
//! consumes `lookup`. [`StaticDirectory`] backs the contract with a fixed
//! map, loaded from a JSON file or built in code, which is enough for
//! single-box deployments and for tests.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Connection parameters for one logical agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Endpoint with a `{resource}` placeholder. Absent means the agent is
    /// registered but not yet wired to an execution endpoint.
    pub endpoint_template: Option<String>,
    /// Opaque resource identifier substituted into the template.
    pub resource_identifier: Option<String>,
    /// Region component of the credential scope used when signing.
    pub credential_scope: String,
}

/// Lookup contract consumed by the coordinator.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn lookup(&self, agent_id: &str) -> Option<AgentRecord>;
}

/// Fixed-map directory.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    agents: HashMap<String, AgentRecord>,
}

impl StaticDirectory {
    pub fn new(agents: HashMap<String, AgentRecord>) -> Self {
        Self { agents }
    }

    /// Load the directory from a JSON file mapping agent id to record.
    pub fn load(path: &Path) -> Result<Self, std::io::Error> {
        let contents = std::fs::read_to_string(path)?;
        let agents: HashMap<String, AgentRecord> = serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        tracing::info!(count = agents.len(), "loaded agent directory from {}", path.display());
        Ok(Self { agents })
    }
}

#[async_trait]
impl AgentDirectory for StaticDirectory {
    async fn lookup(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.get(agent_id).cloned()
    }
}
