//! Signed streaming session against the remote agent execution service.
//!
//! One invocation = one authenticated WebSocket. The client signs the
//! upgrade request, sends a single initiation message carrying the prompt
//! and session metadata, then yields decoded text deltas as they arrive.
//! Chunks are yielded the moment the frame codec produces them; nothing is
//! held back for batching, keeping time-to-first-byte low.
//!
//! Failure modes stay distinguishable for the caller's retry policy:
//! [`SessionError::Connection`]/[`SessionError::Rejected`] mean the session
//! never produced output, while [`SessionError::Stream`] means output flowed
//! and then the transfer broke, so whatever was accumulated is incomplete.

mod signer;

pub use signer::{RequestSigner, SignError, SigningCredentials};

use chrono::Utc;
use futures::{SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;

use crate::protocol::{Control, Frame, FrameDecoder, FrameError};

/// Placeholder in an endpoint template replaced by the resource identifier.
const RESOURCE_PLACEHOLDER: &str = "{resource}";

/// Parameters for one streaming invocation.
#[derive(Debug, Clone)]
pub struct InvokeParams {
    /// Endpoint with a `{resource}` placeholder, e.g.
    /// `wss://agents.example.com/invoke/{resource}`.
    pub endpoint_template: String,
    /// Opaque resource identifier; URL-encoded into the template.
    pub resource_identifier: String,
    /// Prompt for this conversational turn.
    pub prompt: String,
    /// Opaque token correlating turns into one conversation.
    pub session_token: String,
    /// Region used for the credential scope of this invocation.
    pub region: String,
}

/// Session failure.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("handshake rejected with status {status}")]
    Rejected { status: u16 },
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Sign(#[from] SignError),
}

impl SessionError {
    /// True when the failure happened before any output could flow.
    pub fn is_connection_phase(&self) -> bool {
        matches!(
            self,
            Self::Endpoint(_) | Self::Connection(_) | Self::Rejected { .. } | Self::Sign(_)
        )
    }
}

/// Client for signed streaming sessions.
pub struct SessionClient {
    credentials: SigningCredentials,
    max_frame_bytes: usize,
}

impl SessionClient {
    pub fn new(credentials: SigningCredentials, max_frame_bytes: usize) -> Self {
        Self {
            credentials,
            max_frame_bytes,
        }
    }

    /// Open one authenticated connection and stream decoded text deltas.
    ///
    /// The connection closes on every exit path: clean end-of-stream and
    /// errors close explicitly, and dropping the stream mid-flight drops the
    /// socket with it.
    pub fn invoke(
        &self,
        params: InvokeParams,
    ) -> impl Stream<Item = Result<String, SessionError>> + Send + 'static {
        let mut credentials = self.credentials.clone();
        credentials.region = params.region.clone();
        let max_frame_bytes = self.max_frame_bytes;

        async_stream::try_stream! {
            let mut endpoint = build_endpoint(
                &params.endpoint_template,
                &params.resource_identifier,
            )?;
            RequestSigner::new(credentials).sign(&mut endpoint, Utc::now())?;

            let (mut ws, _response) = connect_async(endpoint.as_str())
                .await
                .map_err(map_connect_error)?;
            tracing::debug!(host = ?endpoint.host_str(), "session established");

            let initiation = serde_json::json!({
                "prompt": params.prompt,
                "session": params.session_token,
            });
            ws.send(Message::Text(initiation.to_string()))
                .await
                .map_err(|e| SessionError::Connection(format!("initiation failed: {e}")))?;

            let mut decoder = FrameDecoder::new(max_frame_bytes);
            let mut finished = false;

            while !finished {
                let text = match ws.next().await {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) => Err(SessionError::Stream(
                        "closed before end of stream".to_string(),
                    ))?,
                    // Pings are answered by tungstenite itself.
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => Err(SessionError::Stream(e.to_string()))?,
                    // Peer vanished without the end-of-stream control.
                    None => Err(SessionError::Stream("connection lost".to_string()))?,
                };

                for frame in decoder.decode(&text)? {
                    match frame {
                        Frame::Data(chunk) => yield chunk,
                        Frame::Control(Control::End) => {
                            finished = true;
                            break;
                        }
                        Frame::Control(Control::Ping) => {}
                    }
                }
            }

            let _ = ws.close(None).await;
        }
    }
}

/// Substitute the URL-encoded resource identifier into the template.
fn build_endpoint(template: &str, resource: &str) -> Result<Url, SessionError> {
    if !template.contains(RESOURCE_PLACEHOLDER) {
        return Err(SessionError::Endpoint(format!(
            "template is missing {RESOURCE_PLACEHOLDER}"
        )));
    }
    let encoded = urlencoding::encode(resource);
    let raw = template.replace(RESOURCE_PLACEHOLDER, &encoded);
    Url::parse(&raw).map_err(|e| SessionError::Endpoint(format!("{raw}: {e}")))
}

fn map_connect_error(err: tungstenite::Error) -> SessionError {
    match err {
        tungstenite::Error::Http(response) => SessionError::Rejected {
            status: response.status().as_u16(),
        },
        other => SessionError::Connection(other.to_string()),
    }
}
