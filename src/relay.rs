//! Relay between one invocation's delta stream and the HTTP client.
//!
//! The relay turns the coordinator's pull stream into push events with a
//! hard contract: one `{chunk}` event per delta in upstream order, then
//! exactly one terminal event — `{done: true}` on clean completion or
//! `{error}` on any failure — and nothing after the terminal. Cancellation
//! (downstream disconnect, explicit cancel, idle timeout) tears the
//! upstream session down promptly; dropping the relay stream drops the
//! session stream and with it the connection.
//!
//! Active invocations live in an explicit registry addressed by invocation
//! id. Entries are installed when the relay starts and removed by a drop
//! guard once the terminal event is delivered or the client goes away.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::coordinator::{classify_upstream, Invocation, InvocationStatus, TextDelta};
use crate::session::SessionError;

/// Relay tuning knobs.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// No flush for this long terminates the stream with `{error: "timeout"}`.
    pub idle_timeout: Duration,
    /// Cap on the accumulated response text.
    pub max_response_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            max_response_bytes: 4 * 1024 * 1024,
        }
    }
}

/// One event pushed to the HTTP client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RelayEvent {
    Chunk { chunk: String },
    Done { done: bool },
    Error { error: String },
}

impl RelayEvent {
    pub fn chunk(text: String) -> Self {
        Self::Chunk { chunk: text }
    }

    pub fn done() -> Self {
        Self::Done { done: true }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// True for `done` and `error`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }
}

struct ActiveInvocation {
    invocation: Invocation,
    cancel: CancellationToken,
}

/// Registry of in-flight invocations, addressed by invocation id.
#[derive(Default)]
pub struct InvocationRegistry {
    inner: RwLock<HashMap<Uuid, ActiveInvocation>>,
}

impl InvocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an invocation and hand back its cancellation token. Pair
    /// with a [`RegistryGuard`] so the entry is removed when the relay
    /// finishes.
    pub fn register(&self, invocation: Invocation) -> CancellationToken {
        let id = invocation.id;
        let cancel = CancellationToken::new();
        self.inner.write().unwrap().insert(
            id,
            ActiveInvocation {
                invocation,
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Request cancellation of an in-flight invocation.
    pub fn cancel(&self, id: Uuid) -> bool {
        let inner = self.inner.read().unwrap();
        match inner.get(&id) {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn set_status(&self, id: Uuid, status: InvocationStatus) {
        if let Some(active) = self.inner.write().unwrap().get_mut(&id) {
            active.invocation.status = status;
        }
    }

    /// Snapshot of all in-flight invocations.
    pub fn snapshot(&self) -> Vec<Invocation> {
        self.inner
            .read()
            .unwrap()
            .values()
            .map(|a| a.invocation.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: Uuid) {
        self.inner.write().unwrap().remove(&id);
    }
}

/// Removes the registry entry when the relay stream is dropped.
pub struct RegistryGuard {
    registry: Arc<InvocationRegistry>,
    id: Uuid,
}

impl RegistryGuard {
    pub fn new(registry: Arc<InvocationRegistry>, id: Uuid) -> Self {
        Self { registry, id }
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

/// Adapt a delta stream into relay events.
///
/// The returned stream upholds the terminal contract regardless of how the
/// upstream behaves; the registry guard travels inside it so the entry is
/// removed on any exit, including the client disconnecting mid-stream.
pub fn relay_events<S>(
    invocation_id: Uuid,
    registry: Arc<InvocationRegistry>,
    guard: RegistryGuard,
    cancel: CancellationToken,
    deltas: S,
    config: RelayConfig,
) -> impl Stream<Item = RelayEvent> + Send + 'static
where
    S: Stream<Item = Result<TextDelta, SessionError>> + Send + 'static,
{
    async_stream::stream! {
        let _guard = guard;
        let mut deltas = Box::pin(deltas);
        let mut accumulated = 0usize;
        let mut next_sequence = 0u64;
        let mut streamed = false;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::info!(invocation = %invocation_id, "invocation cancelled");
                    registry.set_status(invocation_id, InvocationStatus::Failed);
                    yield RelayEvent::error("cancelled");
                    break;
                }
                next = deltas.next() => next,
                () = tokio::time::sleep(config.idle_timeout) => {
                    tracing::warn!(invocation = %invocation_id, "idle timeout, tearing down");
                    cancel.cancel();
                    registry.set_status(invocation_id, InvocationStatus::Failed);
                    yield RelayEvent::error("timeout");
                    break;
                }
            };

            match next {
                Some(Ok(delta)) => {
                    // Upstream ordering is load-bearing.
                    debug_assert_eq!(delta.sequence, next_sequence);
                    next_sequence = delta.sequence + 1;
                    if !streamed {
                        streamed = true;
                        registry.set_status(invocation_id, InvocationStatus::Streaming);
                    }
                    accumulated += delta.text.len();
                    if accumulated > config.max_response_bytes {
                        tracing::warn!(
                            invocation = %invocation_id,
                            limit = config.max_response_bytes,
                            "response exceeds buffer limit"
                        );
                        cancel.cancel();
                        registry.set_status(invocation_id, InvocationStatus::Failed);
                        yield RelayEvent::error("response too large");
                        break;
                    }
                    yield RelayEvent::chunk(delta.text);
                }
                Some(Err(error)) => {
                    let kind = classify_upstream(&error);
                    tracing::error!(
                        invocation = %invocation_id,
                        ?kind,
                        %error,
                        "upstream failure"
                    );
                    registry.set_status(invocation_id, InvocationStatus::Failed);
                    yield RelayEvent::error(short_message(&error));
                    break;
                }
                None => {
                    registry.set_status(invocation_id, InvocationStatus::Completed);
                    yield RelayEvent::done();
                    break;
                }
            }
        }
    }
}

/// Short, non-sensitive message for the client; detail stays in the logs.
fn short_message(error: &SessionError) -> String {
    if error.is_connection_phase() {
        "could not reach the agent service".to_string()
    } else {
        "stream interrupted".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn delta(sequence: u64, text: &str) -> Result<TextDelta, SessionError> {
        Ok(TextDelta {
            sequence,
            text: text.to_string(),
        })
    }

    fn invocation() -> Invocation {
        Invocation {
            id: Uuid::new_v4(),
            agent_id: "a".to_string(),
            session_id: "s".to_string(),
            endpoint: "wss://x/{resource}".to_string(),
            created_at: chrono::Utc::now(),
            status: InvocationStatus::Pending,
        }
    }

    fn run_relay<S>(
        registry: &Arc<InvocationRegistry>,
        deltas: S,
        config: RelayConfig,
    ) -> impl Stream<Item = RelayEvent>
    where
        S: Stream<Item = Result<TextDelta, SessionError>> + Send + 'static,
    {
        let inv = invocation();
        let id = inv.id;
        let cancel = registry.register(inv);
        let guard = RegistryGuard::new(Arc::clone(registry), id);
        relay_events(id, Arc::clone(registry), guard, cancel, deltas, config)
    }

    #[tokio::test]
    async fn test_chunks_then_exactly_one_done() {
        let registry = Arc::new(InvocationRegistry::new());
        let deltas = stream::iter(vec![delta(0, "a"), delta(1, "b"), delta(2, "c")]);
        let events: Vec<RelayEvent> =
            run_relay(&registry, deltas, RelayConfig::default()).collect().await;

        assert_eq!(
            events,
            vec![
                RelayEvent::chunk("a".to_string()),
                RelayEvent::chunk("b".to_string()),
                RelayEvent::chunk("c".to_string()),
                RelayEvent::done(),
            ]
        );
        assert!(registry.is_empty(), "entry removed after terminal");
    }

    #[tokio::test]
    async fn test_error_after_partial_output() {
        let registry = Arc::new(InvocationRegistry::new());
        let deltas = stream::iter(vec![
            delta(0, "partial"),
            Err(SessionError::Stream("reset".to_string())),
        ]);
        let events: Vec<RelayEvent> =
            run_relay(&registry, deltas, RelayConfig::default()).collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], RelayEvent::chunk("partial".to_string()));
        assert!(matches!(events[1], RelayEvent::Error { .. }));
    }

    #[tokio::test]
    async fn test_zero_chunk_failure_is_single_error() {
        let registry = Arc::new(InvocationRegistry::new());
        let deltas = stream::iter(vec![Err(SessionError::Connection("refused".to_string()))]);
        let events: Vec<RelayEvent> =
            run_relay(&registry, deltas, RelayConfig::default()).collect().await;

        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_emits_error_terminal() {
        let registry = Arc::new(InvocationRegistry::new());
        let config = RelayConfig {
            idle_timeout: Duration::from_millis(50),
            ..RelayConfig::default()
        };
        let events: Vec<RelayEvent> =
            run_relay(&registry, stream::pending(), config).collect().await;

        assert_eq!(events, vec![RelayEvent::error("timeout")]);
    }

    #[tokio::test]
    async fn test_explicit_cancel_terminates() {
        let registry = Arc::new(InvocationRegistry::new());
        let inv = invocation();
        let id = inv.id;
        let cancel = registry.register(inv);
        let guard = RegistryGuard::new(Arc::clone(&registry), id);
        assert!(registry.cancel(id), "cancel reaches the live entry");

        let events: Vec<RelayEvent> = relay_events(
            id,
            Arc::clone(&registry),
            guard,
            cancel,
            stream::pending(),
            RelayConfig::default(),
        )
        .collect()
        .await;

        assert_eq!(events, vec![RelayEvent::error("cancelled")]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_response_rejected() {
        let registry = Arc::new(InvocationRegistry::new());
        let config = RelayConfig {
            max_response_bytes: 8,
            ..RelayConfig::default()
        };
        let deltas = stream::iter(vec![delta(0, "12345"), delta(1, "67890")]);
        let events: Vec<RelayEvent> = run_relay(&registry, deltas, config).collect().await;

        assert_eq!(events.last(), Some(&RelayEvent::error("response too large")));
        assert_eq!(events.len(), 2, "first chunk flowed, second tripped the cap");
    }

    #[tokio::test]
    async fn test_dropping_stream_removes_registry_entry() {
        let registry = Arc::new(InvocationRegistry::new());
        let events = run_relay(&registry, stream::pending(), RelayConfig::default());
        assert_eq!(registry.len(), 1);
        drop(events);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_event_wire_shapes() {
        assert_eq!(
            serde_json::to_string(&RelayEvent::chunk("hi".to_string())).unwrap(),
            r#"{"chunk":"hi"}"#
        );
        assert_eq!(
            serde_json::to_string(&RelayEvent::done()).unwrap(),
            r#"{"done":true}"#
        );
        assert_eq!(
            serde_json::to_string(&RelayEvent::error("boom")).unwrap(),
            r#"{"error":"boom"}"#
        );
    }
}
