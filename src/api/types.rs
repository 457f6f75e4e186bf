//! Request types crossing the HTTP boundary.

use serde::Deserialize;

/// Body of `POST /api/invoke`.
#[derive(Debug, Clone, Deserialize)]
pub struct InvokeRequest {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl InvokeRequest {
    /// Reject malformed requests before any upstream work happens.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.agent_id.trim().is_empty() {
            return Err("agent_id is required");
        }
        if self.prompt.trim().is_empty() {
            return Err("prompt is required");
        }
        Ok(())
    }
}

/// Body of `POST /api/classify`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyRequest {
    pub raw: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_prompt_rejected() {
        let request: InvokeRequest =
            serde_json::from_str(r#"{"agent_id": "deploy-assistant"}"#).unwrap();
        assert_eq!(request.validate(), Err("prompt is required"));
    }

    #[test]
    fn test_blank_agent_id_rejected() {
        let request: InvokeRequest =
            serde_json::from_str(r#"{"agent_id": "  ", "prompt": "hi"}"#).unwrap();
        assert_eq!(request.validate(), Err("agent_id is required"));
    }

    #[test]
    fn test_well_formed_accepted() {
        let request: InvokeRequest = serde_json::from_str(
            r#"{"agent_id": "deploy-assistant", "prompt": "hi", "session_id": "s-1"}"#,
        )
        .unwrap();
        assert!(request.validate().is_ok());
        assert_eq!(request.session_id.as_deref(), Some("s-1"));
    }
}
