//! Warm throughput: a fixed number of requests at fixed concurrency
//! against a unit that is already serving.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{info, warn};

use coldbench_core::{Statistics, WarmResult};

use crate::driver::HttpDriver;
use crate::probe::ServiceProbe;

#[derive(Debug, Clone)]
pub struct WarmParams {
    pub total_requests: u32,
    pub concurrency: u32,
    pub request_timeout: Duration,
}

#[derive(Default)]
struct WorkerTally {
    latencies: Vec<f64>,
    failed: u32,
}

pub async fn measure_warm(
    driver: HttpDriver,
    probe: Arc<dyn ServiceProbe>,
    endpoint: &str,
    params: &WarmParams,
) -> WarmResult {
    let next = Arc::new(AtomicU32::new(0));
    let workers = params.concurrency.clamp(1, params.total_requests.max(1));
    let start = Instant::now();

    let mut set = JoinSet::new();
    for _ in 0..workers {
        let driver = driver.clone();
        let probe = probe.clone();
        let next = next.clone();
        let endpoint = endpoint.to_string();
        let total = params.total_requests;
        let timeout = params.request_timeout;

        set.spawn(async move {
            let mut tally = WorkerTally::default();
            while next.fetch_add(1, Ordering::Relaxed) < total {
                let request = probe.build_request();
                match driver.send(&endpoint, &request, timeout).await {
                    Ok(timed) if probe.validate_response(timed.status, &timed.body).is_ok() => {
                        tally.latencies.push(timed.total_ms);
                    }
                    _ => tally.failed += 1,
                }
            }
            tally
        });
    }

    let mut latencies = Vec::with_capacity(params.total_requests as usize);
    let mut failed = 0u32;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(tally) => {
                latencies.extend(tally.latencies);
                failed += tally.failed;
            }
            Err(e) => warn!(error = %e, "warm worker panicked"),
        }
    }
    let duration = start.elapsed();

    let successful = latencies.len() as u32;
    let total = successful + failed;
    let secs = duration.as_secs_f64();
    let result = WarmResult {
        total_requests: total,
        successful,
        failed,
        duration_ms: secs * 1000.0,
        statistics: Statistics::compute(&latencies),
        throughput: if secs > 0.0 { total as f64 / secs } else { 0.0 },
        error_rate: if total > 0 { failed as f64 / total as f64 } else { 0.0 },
    };
    info!(
        %endpoint,
        requests = total,
        failed,
        rps = result.throughput,
        p50_ms = result.statistics.map(|s| s.p50),
        "warm requests measured"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::HttpProbe;
    use crate::testutil;

    fn probe() -> Arc<dyn ServiceProbe> {
        Arc::new(HttpProbe::new("svc", "GET", "/", None, 200, &[]).unwrap())
    }

    #[tokio::test]
    async fn issues_exact_request_count() {
        let (app, hits) = testutil::counting_service();
        let base = testutil::serve(app).await;
        let params = WarmParams {
            total_requests: 25,
            concurrency: 4,
            request_timeout: Duration::from_secs(5),
        };
        let r = measure_warm(HttpDriver::new().unwrap(), probe(), &base, &params).await;
        assert_eq!(r.total_requests, 25);
        assert_eq!(r.successful, 25);
        assert_eq!(r.failed, 0);
        assert_eq!(r.error_rate, 0.0);
        assert!(r.throughput > 0.0);
        assert_eq!(r.statistics.unwrap().count, 25);
        assert_eq!(hits.load(Ordering::SeqCst), 25);
    }

    #[tokio::test]
    async fn failures_raise_error_rate() {
        let params = WarmParams {
            total_requests: 4,
            concurrency: 8,
            request_timeout: Duration::from_secs(2),
        };
        let r = measure_warm(HttpDriver::new().unwrap(), probe(), "http://127.0.0.1:1", &params).await;
        assert_eq!(r.total_requests, 4);
        assert_eq!(r.failed, 4);
        assert_eq!(r.error_rate, 1.0);
        assert!(r.statistics.is_none());
    }
}
