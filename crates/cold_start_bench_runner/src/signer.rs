//! Ed25519 request signing for interaction probes.
//!
//! The key pair is derived from a fixed seed so every invocation, and the
//! services' own contract tests, agree on the public key.

use cold_start_bench_core::config::RequestType;
use ed25519_dalek::{Signer as _, SigningKey};
use sha2::{Digest, Sha256};

const KEY_SEED_PHRASE: &str = "discord-bot-test-suite-ed25519-test-key-seed-v1";

pub const SIGNATURE_HEADER: &str = "X-Signature-Ed25519";
pub const TIMESTAMP_HEADER: &str = "X-Signature-Timestamp";

const PING_BODY: &str = r#"{"type":1}"#;
const SLASH_COMMAND_BODY: &str = r#"{"type":2,"id":"123456789","application_id":"987654321","token":"test-token-redacted","guild_id":"111222333","channel_id":"444555666","member":{"user":{"id":"777888999","username":"testuser"}},"data":{"id":"cmd123","name":"test","type":1}}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub signature: String,
    pub timestamp: String,
}

impl SignedHeaders {
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header(SIGNATURE_HEADER, &self.signature)
            .header(TIMESTAMP_HEADER, &self.timestamp)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
    }
}

#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
}

impl Default for Signer {
    fn default() -> Self {
        Self::new()
    }
}

impl Signer {
    pub fn new() -> Self {
        let seed: [u8; 32] = Sha256::digest(KEY_SEED_PHRASE.as_bytes()).into();
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Hex public key, injected into workloads as `DISCORD_PUBLIC_KEY`.
    pub fn public_key_hex(&self) -> String {
        to_hex(self.key.verifying_key().as_bytes())
    }

    /// Sign with the current Unix time. Call once per request: targets reject
    /// timestamps older than a few seconds.
    pub fn sign_request(&self, body: &[u8]) -> SignedHeaders {
        self.sign_request_with_timestamp(body, chrono::Utc::now().timestamp())
    }

    pub fn sign_request_with_timestamp(&self, body: &[u8], timestamp: i64) -> SignedHeaders {
        let timestamp = timestamp.to_string();
        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);
        let signature = self.key.sign(&message);
        SignedHeaders {
            signature: to_hex(&signature.to_bytes()),
            timestamp,
        }
    }
}

pub fn request_body(request_type: RequestType) -> &'static [u8] {
    match request_type {
        RequestType::Ping => PING_BODY.as_bytes(),
        RequestType::SlashCommand => SLASH_COMMAND_BODY.as_bytes(),
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
