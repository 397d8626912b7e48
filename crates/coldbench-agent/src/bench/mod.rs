//! Measurement algorithms run by the Measure handler against one unit.
//!
//! Within a unit, cold-start iterations are strictly sequential and the
//! warm phase starts only after the last cold-start iteration.

pub mod coldstart;
pub mod contract;
pub mod idle;
pub mod warm;

pub use coldstart::{ColdStartParams, measure_cold_starts};
pub use contract::check_contract;
pub use idle::wait_for_idle;
pub use warm::{WarmParams, measure_warm};
