//! Gateway configuration.
//!
//! Everything comes from the environment with workable defaults, so a bare
//! `agent-gateway` starts locally and a deployment overrides what it needs.

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::DEFAULT_MAX_FRAME_BYTES;
use crate::session::SigningCredentials;

/// Runtime configuration for the gateway.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address for the HTTP server.
    pub bind_addr: String,
    /// Signing key id for upstream handshakes.
    pub signing_key_id: String,
    /// Signing secret for upstream handshakes.
    pub signing_secret: String,
    /// Default region for the credential scope.
    pub region: String,
    /// Service name in the credential scope.
    pub service: String,
    /// Relay idle timeout.
    pub idle_timeout: Duration,
    /// Max size of a single wire frame.
    pub max_frame_bytes: usize,
    /// Max accumulated response size before classification.
    pub max_response_bytes: usize,
    /// Data directory for the file-backed workflow store.
    pub data_dir: PathBuf,
    /// Optional agent directory file (JSON map of id -> record).
    pub directory_path: Option<PathBuf>,
}

impl Config {
    /// Build configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("GATEWAY_BIND", "0.0.0.0:8080"),
            signing_key_id: env_or("GATEWAY_SIGNING_KEY_ID", "local-dev"),
            signing_secret: env_or("GATEWAY_SIGNING_SECRET", "local-dev-secret"),
            region: env_or("GATEWAY_REGION", "us-east-1"),
            service: env_or("GATEWAY_SERVICE", "agent-exec"),
            idle_timeout: Duration::from_secs(env_parsed("GATEWAY_IDLE_TIMEOUT_SECS", 60)),
            max_frame_bytes: env_parsed("GATEWAY_MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES),
            max_response_bytes: env_parsed("GATEWAY_MAX_RESPONSE_BYTES", 4 * 1024 * 1024),
            data_dir: PathBuf::from(env_or("GATEWAY_DATA_DIR", ".agent-gateway")),
            directory_path: std::env::var("GATEWAY_DIRECTORY_FILE").ok().map(PathBuf::from),
        }
    }

    pub fn signing_credentials(&self) -> SigningCredentials {
        SigningCredentials {
            key_id: self.signing_key_id.clone(),
            secret: self.signing_secret.clone(),
            region: self.region.clone(),
            service: self.service.clone(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
