//! Platform driven by shell commands, typically wrapping a cloud CLI.
//!
//! Templates see `{unit_id}`, `{implementation}`, `{run_id}`,
//! `{service_type}`, `{endpoint}` and `{dim.<name>}`. Substituted values are
//! single-quoted for the shell, so placeholders must not be quoted again in
//! the template. The same values, plus the probe's deploy environment, are
//! exported to the child process as `COLDBENCH_*` variables.
//! The last non-empty stdout line of the deploy command is the unit URL;
//! the instance-count command must print a single integer.

use std::collections::BTreeMap;
use std::io::ErrorKind;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use coldbench_core::DeployedService;

use super::{Platform, UnitSpec, render, unit_vars};
use crate::error::{AgentError, AgentResult};

pub struct CommandPlatform {
    shell: String,
    deploy: String,
    delete: String,
    instance_count: Option<String>,
}

/// POSIX single-quoting: `it's` becomes `'it'\''s'`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

fn env_name(var: &str) -> String {
    let mut name = String::from("COLDBENCH_");
    for c in var.chars() {
        name.push(if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' });
    }
    name
}

impl CommandPlatform {
    pub fn new(shell: &str, deploy: &str, delete: &str, instance_count: Option<&str>) -> Self {
        Self {
            shell: shell.to_string(),
            deploy: deploy.to_string(),
            delete: delete.to_string(),
            instance_count: instance_count.map(String::from),
        }
    }

    async fn run(
        &self,
        template: &str,
        vars: &[(String, String)],
        extra_env: &BTreeMap<String, String>,
    ) -> AgentResult<String> {
        let quoted: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.clone(), shell_quote(v)))
            .collect();
        let script = render(template, &quoted);
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&script).kill_on_drop(true);
        for (k, v) in vars {
            cmd.env(env_name(k), v);
        }
        cmd.envs(extra_env);

        debug!(%script, "running platform command");
        let output = cmd.output().await.map_err(|e| {
            let message = format!("spawn {}: {e}", self.shell);
            match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => AgentError::Config(message),
                _ => AgentError::Transient(message),
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = format!("command exited with {}: {}", output.status, stderr.trim());
            // 126 and 127 are the shell's "not executable" and "not found".
            return Err(match output.status.code() {
                Some(126 | 127) => AgentError::Config(message),
                _ => AgentError::Transient(message),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Platform for CommandPlatform {
    async fn deploy(&self, unit: &UnitSpec) -> AgentResult<String> {
        let stdout = self.run(&self.deploy, &unit.vars(), &unit.env).await?;
        let endpoint = stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .next_back()
            .ok_or_else(|| AgentError::Transient("deploy command printed no endpoint".into()))?;
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(AgentError::Config(format!(
                "deploy command printed {endpoint:?}, expected a URL"
            )));
        }
        Ok(endpoint.to_string())
    }

    async fn delete(&self, unit: &DeployedService) -> AgentResult<()> {
        self.run(&self.delete, &unit_vars(unit), &BTreeMap::new())
            .await
            .map(|_| ())
    }

    async fn instance_count(&self, unit: &DeployedService) -> AgentResult<Option<u32>> {
        let Some(template) = &self.instance_count else {
            return Ok(None);
        };
        let stdout = self.run(template, &unit_vars(unit), &BTreeMap::new()).await?;
        match stdout.trim().parse::<u32>() {
            Ok(n) => Ok(Some(n)),
            Err(_) => {
                warn!(unit = %unit.deployment_unit_id, output = %stdout.trim(), "instance count is not an integer");
                Err(AgentError::Transient(format!(
                    "instance count output {:?}",
                    stdout.trim()
                )))
            }
        }
    }
}
