//! Handshake request signing for the agent execution service.
//!
//! The service authenticates callers by a signature over the upgrade
//! request rather than a long-lived secret embedded in the URL. The
//! signature covers the method, path, canonical host header, timestamp, and
//! credential scope, and is attached as query parameters so the WebSocket
//! handshake carries everything the remote side needs to verify it.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

const SIGNING_ALGORITHM: &str = "GW1-HMAC-SHA256";
const SCOPE_TERMINATOR: &str = "gw1_request";

/// Credentials used to sign handshake requests.
#[derive(Debug, Clone)]
pub struct SigningCredentials {
    pub key_id: String,
    pub secret: String,
    pub region: String,
    pub service: String,
}

/// Signing failure. Only malformed endpoint URLs can fail here.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("endpoint has no host: {0}")]
    MissingHost(String),
}

/// Signs handshake requests with a derived per-day key.
pub struct RequestSigner {
    credentials: SigningCredentials,
}

impl RequestSigner {
    pub fn new(credentials: SigningCredentials) -> Self {
        Self { credentials }
    }

    /// Attach signature query parameters to `endpoint` for a GET upgrade
    /// request issued at `now`.
    pub fn sign(&self, endpoint: &mut Url, now: DateTime<Utc>) -> Result<(), SignError> {
        let host = endpoint
            .host_str()
            .ok_or_else(|| SignError::MissingHost(endpoint.to_string()))?
            .to_string();

        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!(
            "{}/{}/{}/{}",
            date, self.credentials.region, self.credentials.service, SCOPE_TERMINATOR
        );

        let canonical_request = format!(
            "GET\n{}\nhost:{}\nx-gw-date:{}\n{}",
            endpoint.path(),
            host,
            timestamp,
            scope
        );

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            SIGNING_ALGORITHM,
            timestamp,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let key = self.derive_key(&date);
        let signature = hex::encode(hmac_bytes(&key, string_to_sign.as_bytes()));

        endpoint
            .query_pairs_mut()
            .append_pair("X-Gw-Algorithm", SIGNING_ALGORITHM)
            .append_pair(
                "X-Gw-Credential",
                &format!("{}/{}", self.credentials.key_id, scope),
            )
            .append_pair("X-Gw-Date", &timestamp)
            .append_pair("X-Gw-SignedHeaders", "host;x-gw-date")
            .append_pair("X-Gw-Signature", &signature);

        Ok(())
    }

    /// Chained HMAC key derivation: secret -> date -> region -> service.
    fn derive_key(&self, date: &str) -> Vec<u8> {
        let seed = format!("GW1{}", self.credentials.secret);
        let k_date = hmac_bytes(seed.as_bytes(), date.as_bytes());
        let k_region = hmac_bytes(&k_date, self.credentials.region.as_bytes());
        let k_service = hmac_bytes(&k_region, self.credentials.service.as_bytes());
        hmac_bytes(&k_service, SCOPE_TERMINATOR.as_bytes())
    }
}

fn hmac_bytes(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC-SHA256 accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn credentials() -> SigningCredentials {
        SigningCredentials {
            key_id: "GWKEY123".to_string(),
            secret: "topsecret".to_string(),
            region: "eu-central-1".to_string(),
            service: "agent-exec".to_string(),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn test_signature_params_attached() {
        let signer = RequestSigner::new(credentials());
        let mut url = Url::parse("wss://agents.example.com/invoke/my-agent").unwrap();
        signer.sign(&mut url, fixed_now()).unwrap();

        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let get = |k: &str| query.iter().find(|(key, _)| key == k).map(|(_, v)| v.clone());

        assert_eq!(get("X-Gw-Algorithm").unwrap(), SIGNING_ALGORITHM);
        assert_eq!(get("X-Gw-Date").unwrap(), "20250601T123000Z");
        assert!(get("X-Gw-Credential")
            .unwrap()
            .starts_with("GWKEY123/20250601/eu-central-1/agent-exec/"));
        assert_eq!(get("X-Gw-Signature").unwrap().len(), 64);
    }

    #[test]
    fn test_signature_deterministic_for_fixed_time() {
        let mut a = Url::parse("wss://agents.example.com/invoke/x").unwrap();
        let mut b = Url::parse("wss://agents.example.com/invoke/x").unwrap();
        RequestSigner::new(credentials()).sign(&mut a, fixed_now()).unwrap();
        RequestSigner::new(credentials()).sign(&mut b, fixed_now()).unwrap();
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn test_signature_depends_on_secret() {
        let mut a = Url::parse("wss://agents.example.com/invoke/x").unwrap();
        let mut b = Url::parse("wss://agents.example.com/invoke/x").unwrap();
        RequestSigner::new(credentials()).sign(&mut a, fixed_now()).unwrap();

        let mut other = credentials();
        other.secret = "different".to_string();
        RequestSigner::new(other).sign(&mut b, fixed_now()).unwrap();

        assert_ne!(a.query(), b.query());
    }

    #[test]
    fn test_missing_host_rejected() {
        let signer = RequestSigner::new(credentials());
        let mut url = Url::parse("unix:/tmp/agent.sock").unwrap();
        assert!(signer.sign(&mut url, fixed_now()).is_err());
    }
}
