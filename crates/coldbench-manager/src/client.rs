//! HTTP client for the Agent API.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use coldbench_core::*;

use crate::error::{ManagerError, ManagerResult};

/// Calls one Agent at a time; cheap to clone.
#[derive(Clone)]
pub struct AgentClient {
    http: reqwest::Client,
    token: Option<String>,
}

impl AgentClient {
    pub fn new(token: Option<String>, timeout: Duration) -> ManagerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ManagerError::Config(format!("http client: {e}")))?;
        Ok(Self { http, token })
    }

    pub async fn deploy(
        &self,
        agent: &AgentDescriptor,
        request: &BenchmarkRequest,
    ) -> ManagerResult<DeployResponse> {
        self.post(agent, "/deploy", request).await
    }

    pub async fn status(&self, agent: &AgentDescriptor, run_id: &str) -> ManagerResult<StatusRecord> {
        self.get(agent, &format!("/status/{run_id}")).await
    }

    pub async fn results(
        &self,
        agent: &AgentDescriptor,
        run_id: &str,
    ) -> ManagerResult<ResultsDocument> {
        self.get(agent, &results_path(run_id)).await
    }

    pub async fn cleanup(&self, agent: &AgentDescriptor, run_id: &str) -> ManagerResult<CleanupResponse> {
        let body = RunRef {
            run_id: run_id.to_string(),
        };
        self.post(agent, "/cleanup", &body).await
    }

    async fn get<T: DeserializeOwned>(&self, agent: &AgentDescriptor, path: &str) -> ManagerResult<T> {
        let request = self.http.get(url(agent, path));
        self.send(agent, path, request).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        agent: &AgentDescriptor,
        path: &str,
        body: &B,
    ) -> ManagerResult<T> {
        let request = self.http.post(url(agent, path)).json(body);
        self.send(agent, path, request).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        agent: &AgentDescriptor,
        path: &str,
        mut request: reqwest::RequestBuilder,
    ) -> ManagerResult<T> {
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let unreachable = |reason: String| ManagerError::Unreachable {
            service_type: agent.service_type.clone(),
            reason,
        };

        let response = request.send().await.map_err(|e| unreachable(e.to_string()))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| unreachable(e.to_string()))?;
        debug!(service_type = %agent.service_type, %path, status = status.as_u16(), "agent call");

        if status.is_success() {
            return serde_json::from_slice(&bytes)
                .map_err(|e| unreachable(format!("{path}: malformed response: {e}")));
        }
        let (kind, message) = match serde_json::from_slice::<ErrorBody>(&bytes) {
            Ok(body) => (body.kind, body.error),
            Err(_) => (
                "unknown".to_string(),
                String::from_utf8_lossy(&bytes).into_owned(),
            ),
        };
        Err(ManagerError::Rejected {
            service_type: agent.service_type.clone(),
            status: status.as_u16(),
            kind,
            message,
        })
    }
}

fn url(agent: &AgentDescriptor, path: &str) -> String {
    format!("{}{path}", agent.endpoint.trim_end_matches('/'))
}
