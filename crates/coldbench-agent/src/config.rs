//! agent.toml configuration parser.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use coldbench_core::{ImplementationEntry, ImplementationStatus};
use coldbench_state::StoreConfig;

use crate::error::{AgentError, AgentResult};

pub const TOKEN_ENV: &str = "COLDBENCH_AUTH_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub service_type: String,
    #[serde(default = "default_listen")]
    pub listen: u16,
    /// Base URL under which this Agent is reachable; its trigger targets
    /// `{public_url}/measure`.
    pub public_url: String,
    pub auth_token: Option<String>,
    pub auth_token_env: Option<String>,
    pub store: StoreConfig,
    pub probe: ProbeConfig,
    pub platform: PlatformConfig,
    #[serde(default)]
    pub implementations: Vec<ImplementationEntry>,
    #[serde(default)]
    pub defaults: AgentDefaults,
    #[serde(default)]
    pub trigger: TriggerSettings,
}

fn default_listen() -> u16 {
    8080
}

/// How this Agent talks to the service it benchmarks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProbeConfig {
    DiscordWebhook {
        #[serde(default = "default_root")]
        path: String,
        /// Seed string for the deterministic signing key.
        key_seed: Option<String>,
    },
    Http {
        #[serde(default = "default_root")]
        path: String,
        #[serde(default = "default_method")]
        method: String,
        body: Option<String>,
        #[serde(default = "default_expect")]
        expect_status: u16,
        #[serde(default)]
        contract: Vec<HttpContractEntry>,
    },
}

fn default_root() -> String {
    "/".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_expect() -> u16 {
    200
}

/// `[[probe.contract]]` entry of the generic HTTP probe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpContractEntry {
    pub name: String,
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    pub body: Option<String>,
    pub expect_status: u16,
}

/// Where deployment units run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PlatformConfig {
    /// Units already exist; the endpoint is rendered from a template.
    Static { endpoint_template: String },
    /// Shell commands wrapping a platform CLI.
    Command {
        deploy: String,
        delete: String,
        instance_count: Option<String>,
        #[serde(default = "default_shell")]
        shell: String,
    },
}

fn default_shell() -> String {
    "sh".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentDefaults {
    /// Dimensions applied to units when a run carries no matrix.
    pub dimensions: BTreeMap<String, String>,
    pub measure_delay_minutes: u64,
    pub deploy_parallelism: usize,
    pub measure_parallelism: usize,
    pub deploy_timeout_secs: u64,
    /// Cap on one unit's measurement. Unset, the cap is the worst case
    /// implied by the run's benchmark config.
    pub measure_timeout_secs: Option<u64>,
    pub idle_poll_timeout_secs: u64,
    pub idle_poll_interval_ms: u64,
    pub retry_backoff_ms: u64,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            dimensions: BTreeMap::new(),
            measure_delay_minutes: 20,
            deploy_parallelism: 4,
            measure_parallelism: 4,
            deploy_timeout_secs: 300,
            measure_timeout_secs: None,
            idle_poll_timeout_secs: 120,
            idle_poll_interval_ms: 2000,
            retry_backoff_ms: 2000,
        }
    }
}

impl AgentDefaults {
    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout_secs)
    }

    pub fn measure_timeout(&self) -> Option<Duration> {
        self.measure_timeout_secs.map(Duration::from_secs)
    }

    pub fn idle_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_poll_timeout_secs)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// `[trigger]`: the dispatcher embedded in the Agent process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriggerSettings {
    pub embedded_dispatcher: bool,
    pub poll_interval_secs: u64,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            embedded_dispatcher: true,
            poll_interval_secs: 15,
        }
    }
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> AgentResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> AgentResult<Self> {
        let config: AgentConfig =
            toml::from_str(content).map_err(|e| AgentError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AgentResult<()> {
        if self.service_type.is_empty() || self.service_type.contains('/') {
            return Err(AgentError::Config(format!(
                "service_type {:?} is not a valid path segment",
                self.service_type
            )));
        }
        if !(self.public_url.starts_with("http://") || self.public_url.starts_with("https://")) {
            return Err(AgentError::Config(format!(
                "public_url {:?} must be an http(s) URL",
                self.public_url
            )));
        }
        if self.defaults.deploy_parallelism == 0 || self.defaults.measure_parallelism == 0 {
            return Err(AgentError::Config("parallelism must be at least 1".into()));
        }
        for (name, value) in &self.defaults.dimensions {
            crate::matrix::check_dimension_token("default dimension name", name)?;
            crate::matrix::check_dimension_token(&format!("default dimension {name:?} value"), value)?;
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

    pub fn measure_url(&self) -> String {
        format!("{}/measure", self.public_url.trim_end_matches('/'))
    }

    pub fn active_implementations(&self) -> Vec<String> {
        self.implementations
            .iter()
            .filter(|i| i.status == ImplementationStatus::Active)
            .map(|i| i.name.clone())
            .collect()
    }
}
