//! Deployment platforms.
//!
//! A [`Platform`] creates and destroys deployment units and, when it can,
//! reports how many instances of a unit are running. `None` from
//! [`Platform::instance_count`] means the platform cannot tell, and idle
//! checks are tagged `unknown` rather than failed.

pub mod command;
pub mod static_endpoint;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use coldbench_core::DeployedService;

use crate::config::PlatformConfig;
use crate::error::AgentResult;

pub use command::CommandPlatform;
pub use static_endpoint::StaticPlatform;

/// Everything a platform needs to create one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSpec {
    pub unit_id: String,
    pub service_type: String,
    pub run_id: String,
    pub implementation: String,
    pub dimensions: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
}

impl UnitSpec {
    fn vars(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("unit_id".to_string(), self.unit_id.clone()),
            ("service_type".to_string(), self.service_type.clone()),
            ("run_id".to_string(), self.run_id.clone()),
            ("implementation".to_string(), self.implementation.clone()),
        ];
        for (k, v) in &self.dimensions {
            vars.push((format!("dim.{k}"), v.clone()));
        }
        vars
    }
}

fn unit_vars(unit: &DeployedService) -> Vec<(String, String)> {
    let mut vars = vec![
        ("unit_id".to_string(), unit.deployment_unit_id.clone()),
        ("implementation".to_string(), unit.implementation.clone()),
        ("endpoint".to_string(), unit.endpoint.clone().unwrap_or_default()),
    ];
    for (k, v) in &unit.dimensions {
        vars.push((format!("dim.{k}"), v.clone()));
    }
    vars
}

/// Replace `{name}` placeholders. Unknown placeholders are left as-is.
pub fn render(template: &str, vars: &[(String, String)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        out = out.replace(&format!("{{{k}}}"), v);
    }
    out
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// Create the unit and return its base URL.
    async fn deploy(&self, unit: &UnitSpec) -> AgentResult<String>;

    /// Tear the unit down. Deleting an absent unit succeeds.
    async fn delete(&self, unit: &DeployedService) -> AgentResult<()>;

    async fn instance_count(&self, unit: &DeployedService) -> AgentResult<Option<u32>>;
}

pub fn from_config(config: &PlatformConfig) -> Arc<dyn Platform> {
    match config {
        PlatformConfig::Static { endpoint_template } => {
            Arc::new(StaticPlatform::new(endpoint_template))
        }
        PlatformConfig::Command {
            deploy,
            delete,
            instance_count,
            shell,
        } => Arc::new(CommandPlatform::new(
            shell,
            deploy,
            delete,
            instance_count.as_deref(),
        )),
    }
}
