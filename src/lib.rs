//! # Agent Gateway
//!
//! Streaming gateway between a deployment UI and a remote agent execution
//! service.
//!
//! ## Architecture
//!
//! ```text
//!   HTTP client (SSE)
//!        ▲
//!        │ {chunk} ... {done}|{error}
//!   ┌────┴────────┐      ┌──────────────┐
//!   │  Streaming  │◄─────│  Invocation  │
//!   │    Relay    │      │ Coordinator  │
//!   └─────────────┘      └──────┬───────┘
//!                               │ signed WebSocket, one per turn
//!                        ┌──────┴───────┐
//!                        │   Session    │──► Frame Codec
//!                        │    Client    │
//!                        └──────────────┘
//! ```
//!
//! ## Invocation flow
//! 1. Validate the inbound request, resolve the agent in the directory
//! 2. Open one signed connection, send the prompt, decode wire frames
//! 3. Relay ordered text deltas as SSE with exactly one terminal event
//! 4. Classify the completed text into typed sections and tabs
//!
//! ## Modules
//! - `protocol`: wire framing for the persistent connection
//! - `session`: signed streaming sessions
//! - `coordinator`: agent resolution and invocation ownership
//! - `relay`: SSE adaptation, cancellation, invocation registry
//! - `classifier`: section/tab classification of completed responses
//! - `workflow`: workflow state and checkpoint persistence

pub mod api;
pub mod classifier;
pub mod config;
pub mod coordinator;
pub mod deployments;
pub mod directory;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod workflow;

pub use config::Config;
