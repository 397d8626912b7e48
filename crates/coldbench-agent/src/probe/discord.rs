//! Discord interaction webhook probe.
//!
//! Requests are signed the way Discord signs interactions: Ed25519 over
//! `timestamp || body`, hex signature in `X-Signature-Ed25519`, unix
//! timestamp in `X-Signature-Timestamp`. The key pair is derived from a
//! fixed seed so that deployed units can be configured with the matching
//! public key through `DISCORD_PUBLIC_KEY`.

use std::collections::BTreeMap;

use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};

use coldbench_core::epoch_secs;

use super::{ContractVector, Expectation, ProbeRequest, ServiceProbe, json_type_field};

pub const DEFAULT_KEY_SEED: &str = "discord-bot-test-suite-ed25519-test-key-seed-v1";
pub const SIGNATURE_HEADER: &str = "X-Signature-Ed25519";
pub const TIMESTAMP_HEADER: &str = "X-Signature-Timestamp";
pub const PUBLIC_KEY_ENV: &str = "DISCORD_PUBLIC_KEY";

const PING: &[u8] = br#"{"type":1}"#;
const PONG_TYPE: u64 = 1;
const DEFERRED_RESPONSE_TYPE: u64 = 5;
const EXPIRED_AGE_SECS: u64 = 3600;

const SLASH_COMMAND: &str = r#"{"type":2,"id":"123456789","application_id":"987654321","token":"test-token-redacted","guild_id":"111222333","channel_id":"444555666","member":{"user":{"id":"777888999","username":"testuser"}},"data":{"id":"cmd123","name":"test","type":1}}"#;

pub struct DiscordWebhookProbe {
    service_type: String,
    path: String,
    key: SigningKey,
}

impl DiscordWebhookProbe {
    pub fn new(service_type: &str, path: &str, key_seed: Option<&str>) -> Self {
        let seed: [u8; 32] = Sha256::digest(key_seed.unwrap_or(DEFAULT_KEY_SEED).as_bytes()).into();
        Self {
            service_type: service_type.to_string(),
            path: path.to_string(),
            key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    pub fn sign(&self, timestamp: &str, body: &[u8]) -> String {
        let mut message = Vec::with_capacity(timestamp.len() + body.len());
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body);
        hex::encode(self.key.sign(&message).to_bytes())
    }

    fn signed(&self, body: &[u8], timestamp: u64) -> ProbeRequest {
        let ts = timestamp.to_string();
        ProbeRequest::post_json(&self.path, body.to_vec())
            .with_header(SIGNATURE_HEADER, self.sign(&ts, body))
            .with_header(TIMESTAMP_HEADER, ts)
    }
}

impl ServiceProbe for DiscordWebhookProbe {
    fn service_type(&self) -> &str {
        &self.service_type
    }

    fn build_request(&self) -> ProbeRequest {
        self.signed(PING, epoch_secs())
    }

    fn validate_response(&self, status: u16, body: &[u8]) -> Result<(), String> {
        if status != 200 {
            return Err(format!("ping answered {status}"));
        }
        match json_type_field(body)? {
            PONG_TYPE => Ok(()),
            other => Err(format!("ping answered type {other}, expected {PONG_TYPE}")),
        }
    }

    fn contract_vectors(&self) -> Vec<ContractVector> {
        let now = epoch_secs();
        let ts = now.to_string();
        let unauthorized = Expectation::status(401);

        vec![
            ContractVector {
                name: "valid_ping".into(),
                request: self.signed(PING, now),
                expect: Expectation {
                    statuses: vec![200],
                    json_type: Some(PONG_TYPE),
                },
            },
            ContractVector {
                name: "missing_signature".into(),
                request: ProbeRequest::post_json(&self.path, PING.to_vec())
                    .with_header(TIMESTAMP_HEADER, ts.clone()),
                expect: unauthorized.clone(),
            },
            ContractVector {
                name: "missing_timestamp".into(),
                request: ProbeRequest::post_json(&self.path, PING.to_vec())
                    .with_header(SIGNATURE_HEADER, self.sign(&ts, PING)),
                expect: unauthorized.clone(),
            },
            ContractVector {
                name: "invalid_signature".into(),
                request: ProbeRequest::post_json(&self.path, PING.to_vec())
                    .with_header(SIGNATURE_HEADER, hex::encode([0u8; 64]))
                    .with_header(TIMESTAMP_HEADER, ts.clone()),
                expect: unauthorized.clone(),
            },
            ContractVector {
                name: "expired_timestamp".into(),
                request: self.signed(PING, now.saturating_sub(EXPIRED_AGE_SECS)),
                expect: unauthorized,
            },
            ContractVector {
                name: "malformed_json".into(),
                request: self.signed(b"{not json", now),
                expect: Expectation {
                    statuses: vec![400, 401],
                    json_type: None,
                },
            },
            ContractVector {
                name: "slash_command".into(),
                request: self.signed(SLASH_COMMAND.as_bytes(), now),
                expect: Expectation {
                    statuses: vec![200],
                    json_type: Some(DEFERRED_RESPONSE_TYPE),
                },
            },
        ]
    }

    fn deploy_env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(PUBLIC_KEY_ENV.to_string(), self.public_key_hex())])
    }
}
