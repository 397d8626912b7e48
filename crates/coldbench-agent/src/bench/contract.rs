//! Contract validation: replay the probe's canonical vectors and score them.

use std::time::Duration;

use tracing::{debug, info};

use coldbench_core::{ContractCompliance, ContractFailure};

use crate::driver::HttpDriver;
use crate::probe::ServiceProbe;

/// `None` when the probe defines no vectors.
pub async fn check_contract(
    driver: &HttpDriver,
    probe: &dyn ServiceProbe,
    endpoint: &str,
    timeout: Duration,
) -> Option<ContractCompliance> {
    let vectors = probe.contract_vectors();
    if vectors.is_empty() {
        return None;
    }

    let mut failures = Vec::new();
    for vector in &vectors {
        let outcome = match driver.send(endpoint, &vector.request, timeout).await {
            Ok(timed) => vector.expect.check(timed.status, &timed.body),
            Err(e) => Err(e),
        };
        if let Err(reason) = outcome {
            debug!(%endpoint, vector = %vector.name, %reason, "contract vector failed");
            failures.push(ContractFailure {
                name: vector.name.clone(),
                reason,
            });
        }
    }

    let total = vectors.len() as u32;
    let passed = total - failures.len() as u32;
    let percentage = passed as f64 * 100.0 / total as f64;
    info!(%endpoint, passed, total, "contract checked");
    Some(ContractCompliance {
        total,
        passed,
        percentage,
        failures,
    })
}
