//! HTTP driver for benchmark requests.
//!
//! Time to first byte is taken when response headers arrive, before the
//! body is read; total latency includes the body.

use std::time::{Duration, Instant};

use crate::error::{AgentError, AgentResult};
use crate::probe::ProbeRequest;

#[derive(Debug, Clone, PartialEq)]
pub struct Timed {
    pub ttfb_ms: f64,
    pub total_ms: f64,
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Clone)]
pub struct HttpDriver {
    client: reqwest::Client,
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl HttpDriver {
    pub fn new() -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("coldbench/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AgentError::Config(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// Send `req` to `base_url`. Transport failures and timeouts are
    /// returned as `Err`; any HTTP status is `Ok`.
    pub async fn send(
        &self,
        base_url: &str,
        req: &ProbeRequest,
        timeout: Duration,
    ) -> Result<Timed, String> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), req.path);
        let method = reqwest::Method::from_bytes(req.method.as_bytes())
            .map_err(|e| format!("method {}: {e}", req.method))?;

        let mut builder = self.client.request(method, &url).timeout(timeout);
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !req.body.is_empty() {
            builder = builder.body(req.body.clone());
        }

        let start = Instant::now();
        let resp = builder.send().await.map_err(|e| describe(&e))?;
        let ttfb = start.elapsed();
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(|e| describe(&e))?;
        let total = start.elapsed();

        Ok(Timed {
            ttfb_ms: millis(ttfb),
            total_ms: millis(total),
            status,
            body: body.to_vec(),
        })
    }
}

fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}
