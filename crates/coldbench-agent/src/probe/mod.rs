//! Service-type knowledge: how to build a valid request, how to judge a
//! response, and which canonical vectors define contract compliance.
//!
//! One [`ServiceProbe`] variant exists per service type. The Agent picks its
//! probe from `[probe]` in its own config; nothing outside the Agent knows
//! which one is in use.

pub mod discord;
pub mod http;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::ProbeConfig;
use crate::error::AgentResult;

pub use discord::DiscordWebhookProbe;
pub use http::HttpProbe;

/// A request ready to be sent to a unit, relative to its base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ProbeRequest {
    pub fn get(path: &str) -> Self {
        Self {
            method: "GET".into(),
            path: path.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn post_json(path: &str, body: Vec<u8>) -> Self {
        Self {
            method: "POST".into(),
            path: path.into(),
            headers: vec![("content-type".into(), "application/json".into())],
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

/// What a contract vector accepts as a correct answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    /// Any of these status codes passes.
    pub statuses: Vec<u16>,
    /// If set, the body must be JSON with this numeric `type` field.
    pub json_type: Option<u64>,
}

impl Expectation {
    pub fn status(code: u16) -> Self {
        Self {
            statuses: vec![code],
            json_type: None,
        }
    }

    pub fn check(&self, status: u16, body: &[u8]) -> Result<(), String> {
        if !self.statuses.contains(&status) {
            return Err(format!("expected status {:?}, got {status}", self.statuses));
        }
        if let Some(expected) = self.json_type {
            let found = json_type_field(body)?;
            if found != expected {
                return Err(format!("expected response type {expected}, got {found}"));
            }
        }
        Ok(())
    }
}

/// Extract the numeric `type` field of a JSON body.
pub(crate) fn json_type_field(body: &[u8]) -> Result<u64, String> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| format!("response is not JSON: {e}"))?;
    value
        .get("type")
        .and_then(|t| t.as_u64())
        .ok_or_else(|| "response has no numeric type field".to_string())
}

/// One canonical request/response pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractVector {
    pub name: String,
    pub request: ProbeRequest,
    pub expect: Expectation,
}

pub trait ServiceProbe: Send + Sync {
    fn service_type(&self) -> &str;

    /// Request used for cold-start and warm measurements. Built fresh per
    /// call so time-dependent signatures stay valid.
    fn build_request(&self) -> ProbeRequest;

    /// Whether a measurement response counts as a success.
    fn validate_response(&self, status: u16, body: &[u8]) -> Result<(), String>;

    fn contract_vectors(&self) -> Vec<ContractVector>;

    /// Environment handed to the platform when deploying a unit.
    fn deploy_env(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }
}

pub fn from_config(service_type: &str, config: &ProbeConfig) -> AgentResult<Arc<dyn ServiceProbe>> {
    Ok(match config {
        ProbeConfig::DiscordWebhook { path, key_seed } => Arc::new(DiscordWebhookProbe::new(
            service_type,
            path,
            key_seed.as_deref(),
        )),
        ProbeConfig::Http {
            path,
            method,
            body,
            expect_status,
            contract,
        } => Arc::new(HttpProbe::new(
            service_type,
            method,
            path,
            body.clone(),
            *expect_status,
            contract,
        )?),
    })
}
