//! Workflow state and checkpoint persistence.
//!
//! A workflow is a multi-step process driven by exactly one driver at a
//! time. The store keeps its state plus an append-only checkpoint trail so
//! a restarted driver can resume from the most recent successful step
//! instead of replaying the whole workflow.
//!
//! Discipline is validate-then-persist: `updated_at` is bumped first, ids
//! and monotonicity are checked, and only then is anything written. The
//! file-backed store writes temp-then-rename so a failed persist leaves the
//! previous state intact for readers. Writers to *different* workflows never
//! contend; two drivers on the *same* workflow are outside the design and
//! get last-writer-wins.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Success,
    Failure,
}

/// Durable record that a step ran. Appended, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub step_id: String,
    pub status: CheckpointStatus,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
}

/// Full state of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: WorkflowStatus,
    pub current_step: Option<String>,
    pub checkpoints: Vec<Checkpoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(workflow_id: impl Into<String>, kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            kind: kind.into(),
            status: WorkflowStatus::Running,
            current_step: None,
            checkpoints: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("workflow not found: {0}")]
    NotFound(String),
    #[error("invalid id: {0:?}")]
    InvalidId(String),
    #[error("stale write for workflow {0}: updated_at is behind the stored state")]
    StaleWrite(String),
    #[error("storage error: {0}")]
    Internal(String),
}

/// Keyed workflow persistence.
///
/// `create_checkpoint` appends to the workflow's trail and additionally
/// files the checkpoint under the `(workflow_id, step_id)` key that
/// `get_checkpoint` reads in O(1).
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Validate, bump `updated_at`, persist. Returns the stored state.
    async fn save_state(&self, state: WorkflowState) -> Result<WorkflowState, StoreError>;

    async fn load_state(&self, workflow_id: &str) -> Result<Option<WorkflowState>, StoreError>;

    /// Returns whether anything was deleted.
    async fn delete_state(&self, workflow_id: &str) -> Result<bool, StoreError>;

    async fn list_states(&self) -> Result<Vec<WorkflowState>, StoreError>;

    async fn create_checkpoint(
        &self,
        workflow_id: &str,
        checkpoint: Checkpoint,
    ) -> Result<(), StoreError>;

    async fn get_checkpoint(
        &self,
        workflow_id: &str,
        step_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError>;

    /// Newest-to-oldest scan for the most recent successful step.
    async fn last_successful_checkpoint(
        &self,
        workflow_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError>;
}

fn validate_id(id: &str) -> Result<(), StoreError> {
    let well_formed = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if well_formed {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

/// Shared validate-and-bump step for both stores.
fn prepare_save(
    mut state: WorkflowState,
    stored: Option<&WorkflowState>,
) -> Result<WorkflowState, StoreError> {
    validate_id(&state.workflow_id)?;
    for checkpoint in &state.checkpoints {
        validate_id(&checkpoint.step_id)?;
    }
    if let Some(stored) = stored {
        if state.updated_at < stored.updated_at {
            return Err(StoreError::StaleWrite(state.workflow_id));
        }
    }
    // Strictly monotonic even when two saves land in the same millisecond.
    let now = Utc::now();
    state.updated_at = if now > state.updated_at {
        now
    } else {
        state.updated_at + Duration::milliseconds(1)
    };
    Ok(state)
}

fn last_success(state: &WorkflowState) -> Option<Checkpoint> {
    state
        .checkpoints
        .iter()
        .rev()
        .find(|c| c.status == CheckpointStatus::Success)
        .cloned()
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory store
// ─────────────────────────────────────────────────────────────────────────────

/// Reference store for development and tests. Data is lost on restart;
/// production deployments put a durable keyed store behind the same trait.
#[derive(Default)]
pub struct MemoryWorkflowStore {
    states: RwLock<HashMap<String, WorkflowState>>,
    checkpoints: RwLock<HashMap<(String, String), Checkpoint>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn save_state(&self, state: WorkflowState) -> Result<WorkflowState, StoreError> {
        let mut states = self
            .states
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let stored = states.get(&state.workflow_id).cloned();
        let prepared = prepare_save(state, stored.as_ref())?;
        states.insert(prepared.workflow_id.clone(), prepared.clone());
        Ok(prepared)
    }

    async fn load_state(&self, workflow_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        Ok(self
            .states
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .get(workflow_id)
            .cloned())
    }

    async fn delete_state(&self, workflow_id: &str) -> Result<bool, StoreError> {
        let removed = self
            .states
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .remove(workflow_id)
            .is_some();
        self.checkpoints
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .retain(|(wf, _), _| wf.as_str() != workflow_id);
        Ok(removed)
    }

    async fn list_states(&self) -> Result<Vec<WorkflowState>, StoreError> {
        let mut states: Vec<WorkflowState> = self
            .states
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .values()
            .cloned()
            .collect();
        states.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(states)
    }

    async fn create_checkpoint(
        &self,
        workflow_id: &str,
        checkpoint: Checkpoint,
    ) -> Result<(), StoreError> {
        validate_id(&checkpoint.step_id)?;
        let mut state = self
            .load_state(workflow_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
        state.checkpoints.push(checkpoint.clone());
        self.save_state(state).await?;
        self.checkpoints
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .insert(
                (workflow_id.to_string(), checkpoint.step_id.clone()),
                checkpoint,
            );
        Ok(())
    }

    async fn get_checkpoint(
        &self,
        workflow_id: &str,
        step_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self
            .checkpoints
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?
            .get(&(workflow_id.to_string(), step_id.to_string()))
            .cloned())
    }

    async fn last_successful_checkpoint(
        &self,
        workflow_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError> {
        let state = self
            .load_state(workflow_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
        Ok(last_success(&state))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File-backed store
// ─────────────────────────────────────────────────────────────────────────────

/// JSON-file-per-workflow store.
///
/// Layout under the data dir: `states/<workflow>.json` and
/// `checkpoints/<workflow>/<step>.json`. Ids are validated before use, so
/// they are safe as file names. Writes go to a temp file first and are
/// renamed into place; rename is atomic on the same filesystem.
pub struct FileWorkflowStore {
    root: PathBuf,
}

impl FileWorkflowStore {
    pub fn new(root: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root.join("states"))
            .and_then(|()| std::fs::create_dir_all(root.join("checkpoints")))
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(Self { root })
    }

    fn state_path(&self, workflow_id: &str) -> PathBuf {
        self.root.join("states").join(format!("{workflow_id}.json"))
    }

    fn checkpoint_path(&self, workflow_id: &str, step_id: &str) -> PathBuf {
        self.root
            .join("checkpoints")
            .join(workflow_id)
            .join(format!("{step_id}.json"))
    }

    fn write_atomic<T: Serialize>(&self, path: &PathBuf, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        let contents = serde_json::to_string_pretty(value)
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).map_err(|e| StoreError::Internal(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(())
    }

    fn read_state(&self, workflow_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        let path = self.state_path(workflow_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&path).map_err(|e| StoreError::Internal(e.to_string()))?;
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| StoreError::Internal(e.to_string()))
    }
}

#[async_trait]
impl WorkflowStore for FileWorkflowStore {
    async fn save_state(&self, state: WorkflowState) -> Result<WorkflowState, StoreError> {
        validate_id(&state.workflow_id)?;
        let stored = self.read_state(&state.workflow_id)?;
        let prepared = prepare_save(state, stored.as_ref())?;
        self.write_atomic(&self.state_path(&prepared.workflow_id), &prepared)?;
        Ok(prepared)
    }

    async fn load_state(&self, workflow_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        validate_id(workflow_id)?;
        self.read_state(workflow_id)
    }

    async fn delete_state(&self, workflow_id: &str) -> Result<bool, StoreError> {
        validate_id(workflow_id)?;
        let path = self.state_path(workflow_id);
        let existed = path.exists();
        if existed {
            std::fs::remove_file(&path).map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        let checkpoint_dir = self.root.join("checkpoints").join(workflow_id);
        if checkpoint_dir.exists() {
            std::fs::remove_dir_all(&checkpoint_dir)
                .map_err(|e| StoreError::Internal(e.to_string()))?;
        }
        Ok(existed)
    }

    async fn list_states(&self) -> Result<Vec<WorkflowState>, StoreError> {
        let mut states = Vec::new();
        let entries = std::fs::read_dir(self.root.join("states"))
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Internal(e.to_string()))?;
            let contents = std::fs::read_to_string(entry.path())
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            match serde_json::from_str::<WorkflowState>(&contents) {
                Ok(state) => states.push(state),
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), "skipping unreadable state: {e}");
                }
            }
        }
        states.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(states)
    }

    async fn create_checkpoint(
        &self,
        workflow_id: &str,
        checkpoint: Checkpoint,
    ) -> Result<(), StoreError> {
        validate_id(workflow_id)?;
        validate_id(&checkpoint.step_id)?;
        let mut state = self
            .read_state(workflow_id)?
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
        state.checkpoints.push(checkpoint.clone());
        self.save_state(state).await?;
        self.write_atomic(
            &self.checkpoint_path(workflow_id, &checkpoint.step_id),
            &checkpoint,
        )?;
        Ok(())
    }

    async fn get_checkpoint(
        &self,
        workflow_id: &str,
        step_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError> {
        validate_id(workflow_id)?;
        validate_id(step_id)?;
        let path = self.checkpoint_path(workflow_id, step_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            std::fs::read_to_string(&path).map_err(|e| StoreError::Internal(e.to_string()))?;
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| StoreError::Internal(e.to_string()))
    }

    async fn last_successful_checkpoint(
        &self,
        workflow_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError> {
        let state = self
            .load_state(workflow_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
        Ok(last_success(&state))
    }
}
