//! Cold-start measurement: N sequential requests, each preceded by a wait
//! for the unit to be idle.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use coldbench_core::{ColdStartResult, ColdStartSample, DeployedService, IdleState, Statistics};

use crate::driver::HttpDriver;
use crate::platform::Platform;
use crate::probe::ServiceProbe;

use super::idle::wait_for_idle;

#[derive(Debug, Clone)]
pub struct ColdStartParams {
    pub iterations: u32,
    pub request_timeout: Duration,
    /// Idle wait before the first iteration. The trigger delay has already
    /// elapsed, so this is short.
    pub first_idle_timeout: Duration,
    /// Idle wait before later iterations, after the unit was just woken.
    pub scale_to_zero_timeout: Duration,
    pub idle_poll_interval: Duration,
    /// No iteration starts after this instant; samples taken so far are kept.
    pub deadline: Instant,
}

pub async fn measure_cold_starts(
    driver: &HttpDriver,
    probe: &dyn ServiceProbe,
    platform: &dyn Platform,
    unit: &DeployedService,
    endpoint: &str,
    params: &ColdStartParams,
) -> ColdStartResult {
    let mut samples = Vec::with_capacity(params.iterations as usize);

    for iteration in 0..params.iterations {
        let remaining = params.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(unit = %unit.deployment_unit_id, iteration, "unit deadline reached, stopping cold starts");
            break;
        }
        let idle_timeout = if iteration == 0 {
            params.first_idle_timeout
        } else {
            params.scale_to_zero_timeout
        };
        let idle = wait_for_idle(
            platform,
            unit,
            idle_timeout.min(remaining),
            params.idle_poll_interval,
        )
        .await;
        if idle == IdleState::Unknown && iteration > 0 {
            // No instance introspection: give the platform the full window.
            tokio::time::sleep_until(
                (Instant::now() + params.scale_to_zero_timeout).min(params.deadline),
            )
            .await;
        }
        if Instant::now() >= params.deadline {
            warn!(unit = %unit.deployment_unit_id, iteration, "unit deadline reached while waiting for idle");
            break;
        }
        if idle == IdleState::NotReached {
            warn!(unit = %unit.deployment_unit_id, iteration, "unit not idle, measuring anyway");
        }

        let request = probe.build_request();
        let sample = match driver.send(endpoint, &request, params.request_timeout).await {
            Ok(timed) => match probe.validate_response(timed.status, &timed.body) {
                Ok(()) => ColdStartSample {
                    iteration,
                    idle,
                    latency_ms: Some(timed.ttfb_ms),
                    status_code: Some(timed.status),
                    error: None,
                },
                Err(reason) => ColdStartSample {
                    iteration,
                    idle,
                    latency_ms: None,
                    status_code: Some(timed.status),
                    error: Some(reason),
                },
            },
            Err(reason) => ColdStartSample {
                iteration,
                idle,
                latency_ms: None,
                status_code: None,
                error: Some(reason),
            },
        };
        debug!(
            unit = %unit.deployment_unit_id,
            iteration,
            latency_ms = sample.latency_ms,
            error = sample.error.as_deref(),
            "cold start sample"
        );
        samples.push(sample);
    }

    let result = summarize(samples);
    info!(
        unit = %unit.deployment_unit_id,
        ok = result.success_count,
        failed = result.failure_count,
        non_idle = result.non_idle_starts,
        p50_ms = result.statistics.map(|s| s.p50),
        "cold start measured"
    );
    result
}

/// Fold samples into a result. Non-idle samples stay in the statistics and
/// are counted separately.
pub fn summarize(samples: Vec<ColdStartSample>) -> ColdStartResult {
    let measurements_ms: Vec<f64> = samples.iter().filter_map(|s| s.latency_ms).collect();
    let success_count = measurements_ms.len() as u32;
    let failure_count = samples.len() as u32 - success_count;
    let non_idle_starts = samples
        .iter()
        .filter(|s| s.idle == IdleState::NotReached)
        .count() as u32;

    ColdStartResult {
        statistics: Statistics::compute(&measurements_ms),
        measurements_ms,
        samples,
        success_count,
        failure_count,
        non_idle_starts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::idle::tests::{ScriptedPlatform, unit};
    use crate::probe::HttpProbe;
    use crate::testutil;

    fn sample(iteration: u32, idle: IdleState, latency: Option<f64>) -> ColdStartSample {
        ColdStartSample {
            iteration,
            idle,
            latency_ms: latency,
            status_code: latency.map(|_| 200),
            error: latency.is_none().then(|| "boom".to_string()),
        }
    }

    #[test]
    fn summarize_keeps_non_idle_samples() {
        let r = summarize(vec![
            sample(0, IdleState::Verified, Some(142.0)),
            sample(1, IdleState::NotReached, Some(148.0)),
            sample(2, IdleState::Verified, None),
            sample(3, IdleState::Verified, Some(151.0)),
        ]);
        assert_eq!(r.measurements_ms, vec![142.0, 148.0, 151.0]);
        assert_eq!(r.success_count, 3);
        assert_eq!(r.failure_count, 1);
        assert_eq!(r.non_idle_starts, 1);
        assert_eq!(r.statistics.unwrap().p50, 148.0);
    }

    #[tokio::test]
    async fn measures_each_iteration() {
        let base = testutil::serve(testutil::ok_service()).await;
        let probe = HttpProbe::new("svc", "GET", "/", None, 200, &[]).unwrap();
        let platform = ScriptedPlatform::new(vec![Ok(Some(0)), Ok(Some(1)), Ok(Some(0)), Ok(Some(0))]);
        let params = ColdStartParams {
            iterations: 3,
            request_timeout: Duration::from_secs(5),
            first_idle_timeout: Duration::from_secs(5),
            scale_to_zero_timeout: Duration::from_secs(5),
            idle_poll_interval: Duration::from_millis(1),
            deadline: Instant::now() + Duration::from_secs(60),
        };

        let r = measure_cold_starts(&HttpDriver::new().unwrap(), &probe, &platform, &unit(), &base, &params).await;
        assert_eq!(r.success_count, 3);
        assert_eq!(r.samples.len(), 3);
        assert!(r.samples.iter().all(|s| s.idle == IdleState::Verified));
        assert_eq!(r.statistics.unwrap().count, 3);
    }

    #[tokio::test]
    async fn unreachable_unit_records_failures() {
        let probe = HttpProbe::new("svc", "GET", "/", None, 200, &[]).unwrap();
        let platform = ScriptedPlatform::new(vec![Ok(None), Ok(None)]);
        let params = ColdStartParams {
            iterations: 2,
            request_timeout: Duration::from_secs(2),
            first_idle_timeout: Duration::ZERO,
            scale_to_zero_timeout: Duration::ZERO,
            idle_poll_interval: Duration::from_millis(1),
            deadline: Instant::now() + Duration::from_secs(60),
        };
        let r = measure_cold_starts(
            &HttpDriver::new().unwrap(),
            &probe,
            &platform,
            &unit(),
            "http://127.0.0.1:1",
            &params,
        )
        .await;
        assert_eq!(r.success_count, 0);
        assert_eq!(r.failure_count, 2);
        assert!(r.statistics.is_none());
        assert!(r.samples.iter().all(|s| s.idle == IdleState::Unknown && s.error.is_some()));
    }

    #[tokio::test]
    async fn deadline_stops_iterations_and_keeps_samples() {
        let base = testutil::serve(testutil::ok_service()).await;
        let probe = HttpProbe::new("svc", "GET", "/", None, 200, &[]).unwrap();
        let platform = ScriptedPlatform::new(vec![Ok(None), Ok(None), Ok(None), Ok(None)]);
        let params = ColdStartParams {
            iterations: 4,
            request_timeout: Duration::from_secs(5),
            first_idle_timeout: Duration::ZERO,
            scale_to_zero_timeout: Duration::from_secs(30),
            idle_poll_interval: Duration::from_millis(1),
            deadline: Instant::now() + Duration::from_millis(300),
        };

        let started = Instant::now();
        let r = measure_cold_starts(&HttpDriver::new().unwrap(), &probe, &platform, &unit(), &base, &params).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(r.samples.len(), 1);
        assert_eq!(r.success_count, 1);
        assert_eq!(r.statistics.unwrap().count, 1);
    }
}
