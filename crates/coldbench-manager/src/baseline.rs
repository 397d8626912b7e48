//! Baseline management. A baseline only changes through [`promote`].

use tracing::info;

use coldbench_core::{Baseline, epoch_secs};
use coldbench_state::RunStore;

use crate::error::{ManagerError, ManagerResult};

/// Pin a collected run as the regression baseline.
pub fn promote(store: &RunStore, run_id: &str) -> ManagerResult<Baseline> {
    let run = store
        .get_run(run_id)?
        .ok_or_else(|| ManagerError::NotFound(format!("run document for run {run_id}")))?;
    let previous = store.get_baseline()?.map(|b| b.run.run_id);
    let baseline = Baseline {
        promoted_at: epoch_secs(),
        run,
    };
    store.put_baseline(&baseline)?;
    info!(%run_id, previous = previous.as_deref().unwrap_or("none"), "baseline promoted");
    Ok(baseline)
}
