//! manager.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use coldbench_core::{AgentDescriptor, BenchmarkConfig};
use coldbench_state::StoreConfig;

use crate::error::{ManagerError, ManagerResult};

pub const TOKEN_ENV: &str = "COLDBENCH_AUTH_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub store: StoreConfig,
    pub auth_token: Option<String>,
    pub auth_token_env: Option<String>,
    /// Static ecosystem entries, merged under the registry.
    #[serde(default)]
    pub agents: Vec<AgentDescriptor>,
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Concurrent Agent calls.
    pub parallelism: usize,
    pub deploy_call_timeout_secs: u64,
    pub collect_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub discovery_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parallelism: 8,
            deploy_call_timeout_secs: 120,
            collect_timeout_secs: 7200,
            poll_interval_secs: 30,
            discovery_timeout_secs: 10,
        }
    }
}

impl OrchestratorConfig {
    pub fn deploy_call_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_call_timeout_secs)
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_secs(self.collect_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }
}

/// Regression and improvement thresholds, in percent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    pub regression_threshold_pct: f64,
    pub improvement_threshold_pct: f64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            regression_threshold_pct: 10.0,
            improvement_threshold_pct: 10.0,
        }
    }
}

impl ManagerConfig {
    pub fn from_file(path: &Path) -> ManagerResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ManagerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ManagerResult<Self> {
        let config: ManagerConfig =
            toml::from_str(content).map_err(|e| ManagerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ManagerResult<()> {
        self.benchmark.validate()?;
        for agent in &self.agents {
            agent.validate()?;
        }
        if self.orchestrator.parallelism == 0 {
            return Err(ManagerError::Config(
                "orchestrator.parallelism must be at least 1".into(),
            ));
        }
        if self.report.regression_threshold_pct < 0.0 || self.report.improvement_threshold_pct < 0.0
        {
            return Err(ManagerError::Config("report thresholds must be non-negative".into()));
        }
        Ok(())
    }

    /// Bearer token: inline value, then the named env var, then
    /// `COLDBENCH_AUTH_TOKEN`.
    pub fn resolve_token(&self) -> Option<String> {
        if let Some(token) = &self.auth_token {
            return Some(token.clone());
        }
        let var = self.auth_token_env.as_deref().unwrap_or(TOKEN_ENV);
        std::env::var(var).ok().filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
auth_token = "s3cret"

[store]
backend = "redb"
path = "/var/lib/coldbench/state.redb"

[[agents]]
service_type = "discord-webhook"
endpoint = "http://discord-agent:8080"

[[agents.implementations]]
name = "go-gin"

[benchmark]
cold_start_iterations = 3

[orchestrator]
collect_timeout_secs = 600

[report]
regression_threshold_pct = 15.0
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let cfg = ManagerConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.agents.len(), 1);
        assert!(cfg.agents[0].enabled);
        assert_eq!(cfg.benchmark.cold_start_iterations, 3);
        assert_eq!(cfg.benchmark.warm_requests, 100);
        assert_eq!(cfg.orchestrator.collect_timeout_secs, 600);
        assert_eq!(cfg.orchestrator.parallelism, 8);
        assert_eq!(cfg.report.regression_threshold_pct, 15.0);
        assert_eq!(cfg.report.improvement_threshold_pct, 10.0);
        assert_eq!(cfg.resolve_token().as_deref(), Some("s3cret"));
    }

    #[test]
    fn rejects_invalid_static_agent() {
        let raw = SAMPLE.replace("http://discord-agent:8080", "ftp://nope");
        assert!(matches!(
            ManagerConfig::from_toml_str(&raw),
            Err(ManagerError::Config(_))
        ));
    }

    #[test]
    fn rejects_zero_iterations() {
        let raw = SAMPLE.replace("cold_start_iterations = 3", "cold_start_iterations = 0");
        assert!(ManagerConfig::from_toml_str(&raw).is_err());
    }
}
