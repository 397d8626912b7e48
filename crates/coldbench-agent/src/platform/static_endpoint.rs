//! Units that already run somewhere; deploy only resolves their URL.

use async_trait::async_trait;
use tracing::debug;

use coldbench_core::DeployedService;

use super::{Platform, UnitSpec, render};
use crate::error::AgentResult;

pub struct StaticPlatform {
    endpoint_template: String,
}

impl StaticPlatform {
    pub fn new(endpoint_template: &str) -> Self {
        Self {
            endpoint_template: endpoint_template.to_string(),
        }
    }
}

#[async_trait]
impl Platform for StaticPlatform {
    async fn deploy(&self, unit: &UnitSpec) -> AgentResult<String> {
        let endpoint = render(&self.endpoint_template, &unit.vars());
        debug!(unit = %unit.unit_id, %endpoint, "static endpoint resolved");
        Ok(endpoint)
    }

    async fn delete(&self, _unit: &DeployedService) -> AgentResult<()> {
        Ok(())
    }

    async fn instance_count(&self, _unit: &DeployedService) -> AgentResult<Option<u32>> {
        Ok(None)
    }
}
