//! The Agent's reading of the opaque `agent_config` payload, and matrix
//! expansion into deployment units.
//!
//! ```json
//! {
//!   "implementations": ["go-gin", "rust-actix"],
//!   "matrix": { "cpu": [1, 2], "memory": ["512Mi", "1Gi"] },
//!   "schedule": { "measure_delay_minutes": 20 }
//! }
//! ```
//!
//! With a matrix the unit list is the full cross-product of implementations
//! and every dimension's values; without one, each implementation gets one
//! unit carrying the Agent's default dimensions.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use coldbench_core::AgentConfigPayload;

use crate::error::{AgentError, AgentResult};

const MAX_UNIT_ID_LEN: usize = 63;
const MAX_DIMENSION_LEN: usize = 63;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub implementations: Option<Vec<String>>,
    pub matrix: Option<BTreeMap<String, Vec<Value>>>,
    pub schedule: Option<ScheduleConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub measure_delay_minutes: Option<u64>,
}

impl RunConfig {
    pub fn from_payload(payload: &AgentConfigPayload) -> AgentResult<Self> {
        serde_json::from_value(Value::Object(payload.clone()))
            .map_err(|e| AgentError::Config(format!("agent_config: {e}")))
    }

    pub fn measure_delay_minutes(&self) -> Option<u64> {
        self.schedule.as_ref().and_then(|s| s.measure_delay_minutes)
    }
}

/// One concrete unit to deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitPlan {
    pub implementation: String,
    pub dimensions: BTreeMap<String, String>,
}

/// Expand a run's configuration into deployment units.
///
/// `available` are the Agent's active implementations; the run may select a
/// subset but never name an implementation outside it.
pub fn expand(
    run: &RunConfig,
    available: &[String],
    default_dimensions: &BTreeMap<String, String>,
) -> AgentResult<Vec<UnitPlan>> {
    let implementations: Vec<String> = match &run.implementations {
        Some(selected) => {
            for name in selected {
                if !available.contains(name) {
                    return Err(AgentError::Config(format!(
                        "implementation {name:?} is not active on this agent"
                    )));
                }
            }
            let mut unique = Vec::new();
            for name in selected {
                if !unique.contains(name) {
                    unique.push(name.clone());
                }
            }
            unique
        }
        None => available.to_vec(),
    };
    if implementations.is_empty() {
        return Err(AgentError::Config("no implementations to deploy".into()));
    }

    let combinations = match &run.matrix {
        Some(matrix) => cross_product(matrix)?,
        None => vec![default_dimensions.clone()],
    };

    let mut units = Vec::with_capacity(implementations.len() * combinations.len());
    for implementation in &implementations {
        for dimensions in &combinations {
            units.push(UnitPlan {
                implementation: implementation.clone(),
                dimensions: dimensions.clone(),
            });
        }
    }
    Ok(units)
}

fn cross_product(matrix: &BTreeMap<String, Vec<Value>>) -> AgentResult<Vec<BTreeMap<String, String>>> {
    let mut combos = vec![BTreeMap::new()];
    for (name, values) in matrix {
        let mut rendered = Vec::with_capacity(values.len());
        for v in values {
            let s = dimension_value(name, v)?;
            if !rendered.contains(&s) {
                rendered.push(s);
            }
        }
        if rendered.is_empty() {
            return Err(AgentError::Config(format!(
                "matrix dimension {name:?} has no values"
            )));
        }

        let mut next = Vec::with_capacity(combos.len() * rendered.len());
        for combo in &combos {
            for value in &rendered {
                let mut c = combo.clone();
                c.insert(name.clone(), value.clone());
                next.push(c);
            }
        }
        combos = next;
    }
    Ok(combos)
}

fn dimension_value(name: &str, v: &Value) -> AgentResult<String> {
    check_dimension_token("matrix dimension name", name)?;
    let value = match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => {
            return Err(AgentError::Config(format!(
                "matrix dimension {name:?}: unsupported value {other}"
            )));
        }
    };
    check_dimension_token(&format!("matrix dimension {name:?} value"), &value)?;
    Ok(value)
}

/// Dimension names and values end up in platform templates, so both are
/// limited to `[A-Za-z0-9._-]`.
pub fn check_dimension_token(what: &str, token: &str) -> AgentResult<()> {
    let ok = !token.is_empty()
        && token.len() <= MAX_DIMENSION_LEN
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(AgentError::Config(format!(
            "{what} {token:?} must match [A-Za-z0-9._-]{{1,{MAX_DIMENSION_LEN}}}"
        )))
    }
}

/// `{service_type}-{implementation}-{run_id}-{index}`, restricted to
/// `[a-z0-9-]` and at most 63 characters. The index suffix is always kept.
pub fn unit_id(service_type: &str, implementation: &str, run_id: &str, index: usize) -> String {
    let suffix = format!("-{index}");
    let raw = format!("{service_type}-{implementation}-{run_id}").to_ascii_lowercase();

    let mut prefix = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' };
        if c == '-' && (prefix.is_empty() || prefix.ends_with('-')) {
            continue;
        }
        prefix.push(c);
    }
    prefix.truncate(MAX_UNIT_ID_LEN - suffix.len());
    let prefix = prefix.trim_end_matches('-');
    format!("{prefix}{suffix}")
}
