//! Invocation coordinator: logical agent id in, ordered text deltas out.
//!
//! The coordinator resolves an agent through the directory, mints a session
//! token when the caller did not supply one, opens the signed session, and
//! numbers the resulting deltas. It classifies upstream failures so a caller
//! can build a retry policy, but never retries by itself — a partially
//! streamed invocation is not idempotent, and a retry has to start a fresh
//! invocation with its own connection.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use crate::directory::AgentDirectory;
use crate::session::{InvokeParams, SessionClient, SessionError};

/// Lifecycle of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Pending,
    Streaming,
    Completed,
    Failed,
}

/// One conversational turn against the remote service.
#[derive(Debug, Clone, Serialize)]
pub struct Invocation {
    pub id: Uuid,
    pub agent_id: String,
    pub session_id: String,
    pub endpoint: String,
    pub created_at: DateTime<Utc>,
    pub status: InvocationStatus,
}

/// An ordered text delta. Sequence numbers are strictly increasing within
/// one invocation; reordering or dropping one is a correctness violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDelta {
    pub sequence: u64,
    pub text: String,
}

/// Upstream failure classes for the caller's retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpstreamErrorKind {
    NotFound,
    AccessDenied,
    RateLimited,
    InvalidInput,
    QuotaExceeded,
    Transient,
}

/// Classify a session failure into a retry-policy class.
///
/// Handshake rejections carry the remote status code; everything that broke
/// at the transport level is transient from the caller's point of view.
pub fn classify_upstream(error: &SessionError) -> UpstreamErrorKind {
    match error {
        SessionError::Rejected { status } => match status {
            400 | 422 => UpstreamErrorKind::InvalidInput,
            401 | 403 => UpstreamErrorKind::AccessDenied,
            404 => UpstreamErrorKind::NotFound,
            402 | 413 => UpstreamErrorKind::QuotaExceeded,
            429 => UpstreamErrorKind::RateLimited,
            _ => UpstreamErrorKind::Transient,
        },
        SessionError::Endpoint(_) | SessionError::Sign(_) => UpstreamErrorKind::InvalidInput,
        SessionError::Connection(_) | SessionError::Stream(_) | SessionError::Frame(_) => {
            UpstreamErrorKind::Transient
        }
    }
}

/// Coordinator failure surfaced before any streaming starts.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("unknown agent: {0}")]
    NotFound(String),
    #[error("agent {0} has no endpoint configured")]
    Misconfigured(String),
}

/// Resolves agents and drives one invocation end-to-end.
pub struct Coordinator {
    directory: Arc<dyn AgentDirectory>,
    client: SessionClient,
}

impl Coordinator {
    pub fn new(directory: Arc<dyn AgentDirectory>, client: SessionClient) -> Self {
        Self { directory, client }
    }

    /// Resolve `agent_id` and open a streaming invocation.
    ///
    /// Returns the invocation record (status `Pending`) together with the
    /// delta stream. When `session_id` is absent a fresh token is minted so
    /// the remote side can correlate turns; the token stays opaque here.
    pub async fn invoke(
        &self,
        agent_id: &str,
        prompt: String,
        session_id: Option<String>,
    ) -> Result<
        (
            Invocation,
            impl Stream<Item = Result<TextDelta, SessionError>> + Send + 'static,
        ),
        CoordinatorError,
    > {
        let record = self
            .directory
            .lookup(agent_id)
            .await
            .ok_or_else(|| CoordinatorError::NotFound(agent_id.to_string()))?;

        let (endpoint_template, resource_identifier) =
            match (record.endpoint_template, record.resource_identifier) {
                (Some(template), Some(resource)) => (template, resource),
                _ => return Err(CoordinatorError::Misconfigured(agent_id.to_string())),
            };

        let session_id = session_id.unwrap_or_else(new_session_token);

        let invocation = Invocation {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            session_id: session_id.clone(),
            endpoint: endpoint_template.clone(),
            created_at: Utc::now(),
            status: InvocationStatus::Pending,
        };
        tracing::info!(
            invocation = %invocation.id,
            agent = agent_id,
            session = %session_id,
            "starting invocation"
        );

        let chunks = self.client.invoke(InvokeParams {
            endpoint_template,
            resource_identifier,
            prompt,
            session_token: session_id,
            region: record.credential_scope,
        });

        let mut sequence = 0u64;
        let deltas = chunks.map(move |item| {
            item.map(|text| {
                let delta = TextDelta { sequence, text };
                sequence += 1;
                delta
            })
        });

        Ok((invocation, deltas))
    }
}

/// Mint an opaque session token: millisecond timestamp plus random suffix.
pub fn new_session_token() -> String {
    format!(
        "{}-{:08x}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}
