//! Bounded wait for a unit to reach zero instances.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use coldbench_core::{DeployedService, IdleState};

use crate::platform::Platform;

const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Poll the platform until the unit reports zero instances or `timeout`
/// elapses. The poll interval doubles after each non-idle answer, capped at
/// 30s. Errors from the platform are logged and polling continues.
pub async fn wait_for_idle(
    platform: &dyn Platform,
    unit: &DeployedService,
    timeout: Duration,
    interval: Duration,
) -> IdleState {
    let deadline = Instant::now() + timeout;
    let mut interval = interval.max(Duration::from_millis(1));

    loop {
        match platform.instance_count(unit).await {
            Ok(None) => return IdleState::Unknown,
            Ok(Some(0)) => return IdleState::Verified,
            Ok(Some(n)) => {
                debug!(unit = %unit.deployment_unit_id, instances = n, "waiting for scale to zero");
            }
            Err(e) => {
                warn!(unit = %unit.deployment_unit_id, error = %e, "instance count failed");
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return IdleState::NotReached;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
        interval = (interval * 2).min(MAX_POLL_INTERVAL);
    }
}
