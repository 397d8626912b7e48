//! Background loop that delivers due trigger jobs.
//!
//! Each tick lists `triggers/`, and for every pending job whose `fire_at`
//! has passed POSTs `{"run_id": ...}` to its target with the bearer token.
//! A 2xx or 4xx answer ends the job (`fired`); the target has either
//! accepted the run or rejected it for good. Connection errors and 5xx
//! answers are retried on later ticks with doubling delay until
//! `max_attempts` is reached.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use coldbench_core::{RunRef, epoch_secs};

use crate::error::{TriggerError, TriggerResult};
use crate::job::{JobState, TriggerJob};
use crate::scheduler::{StoreScheduler, TriggerScheduler};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    /// Base retry delay, doubled per failed attempt.
    pub retry_backoff: Duration,
    /// Only fire jobs owned by this service type. `None` fires everything.
    pub owner: Option<String>,
    pub auth_token: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(30),
            max_attempts: 5,
            retry_backoff: Duration::from_secs(30),
            owner: None,
            auth_token: None,
        }
    }
}

enum Delivery {
    Accepted(u16),
    Rejected(u16),
    Retry(String),
}

pub struct TriggerDispatcher {
    scheduler: StoreScheduler,
    client: reqwest::Client,
    config: DispatchConfig,
}

impl TriggerDispatcher {
    pub fn new(scheduler: StoreScheduler, config: DispatchConfig) -> TriggerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TriggerError::Invalid(format!("http client: {e}")))?;
        Ok(Self {
            scheduler,
            client,
            config,
        })
    }

    /// Run until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            owner = self.config.owner.as_deref().unwrap_or("*"),
            "trigger dispatcher started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.tick(epoch_secs()).await {
                        error!(error = %e, "trigger dispatch tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("trigger dispatcher shutting down");
                    break;
                }
            }
        }
    }

    /// Fire every job due at `now`. Returns how many jobs were delivered.
    pub async fn tick(&self, now: u64) -> TriggerResult<usize> {
        let mut fired = 0;
        for job in self.scheduler.list()? {
            if !job.is_due(now) || !self.owns(&job) {
                continue;
            }
            if self.fire(job, now).await? {
                fired += 1;
            }
        }
        Ok(fired)
    }

    fn owns(&self, job: &TriggerJob) -> bool {
        self.config
            .owner
            .as_deref()
            .is_none_or(|owner| owner == job.owner)
    }

    async fn fire(&self, mut job: TriggerJob, now: u64) -> TriggerResult<bool> {
        job.attempts += 1;
        let outcome = self.deliver(&job).await;

        let delivered = match outcome {
            Delivery::Accepted(code) => {
                info!(job_id = %job.id, run_id = %job.run_id, status = code, "trigger fired");
                job.state = JobState::Fired;
                job.fired_at = Some(now);
                true
            }
            Delivery::Rejected(code) => {
                warn!(job_id = %job.id, run_id = %job.run_id, status = code, "trigger target rejected run");
                job.state = JobState::Fired;
                job.fired_at = Some(now);
                job.last_error = Some(format!("target answered {code}"));
                true
            }
            Delivery::Retry(reason) => {
                job.last_error = Some(reason.clone());
                if job.attempts >= self.config.max_attempts {
                    error!(job_id = %job.id, attempts = job.attempts, %reason, "trigger abandoned");
                    job.state = JobState::Failed;
                } else {
                    let delay = self.retry_delay(job.attempts);
                    job.fire_at = now + delay.as_secs();
                    warn!(job_id = %job.id, attempts = job.attempts, retry_in_secs = delay.as_secs(), %reason, "trigger delivery failed");
                }
                false
            }
        };

        if !self.scheduler.update(&job)? {
            debug!(job_id = %job.id, "trigger deleted during delivery");
        }
        Ok(delivered)
    }

    fn retry_delay(&self, attempts: u32) -> Duration {
        let factor = 1u32 << attempts.saturating_sub(1).min(6);
        self.config.retry_backoff * factor
    }

    async fn deliver(&self, job: &TriggerJob) -> Delivery {
        let mut request = self.client.post(&job.target).json(&RunRef {
            run_id: job.run_id.clone(),
        });
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(resp) => {
                let code = resp.status();
                if code.is_success() {
                    Delivery::Accepted(code.as_u16())
                } else if code.is_client_error() {
                    Delivery::Rejected(code.as_u16())
                } else {
                    Delivery::Retry(format!("target answered {code}"))
                }
            }
            Err(e) => Delivery::Retry(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::Json;
    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;

    use coldbench_state::RunStore;

    use crate::job::TriggerSpec;

    #[derive(Clone)]
    struct Target {
        hits: Arc<AtomicU32>,
        answer: StatusCode,
        /// Jobs deleted while the request is handled, as Measure does.
        delete_on_hit: Option<(StoreScheduler, String)>,
    }

    async fn measure(
        State(t): State<Target>,
        headers: HeaderMap,
        Json(body): Json<RunRef>,
    ) -> StatusCode {
        assert_eq!(body.run_id, "r1");
        assert_eq!(
            headers.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer secret")
        );
        t.hits.fetch_add(1, Ordering::SeqCst);
        if let Some((sched, id)) = &t.delete_on_hit {
            sched.delete(id).await.unwrap();
        }
        t.answer
    }

    async fn spawn_target(answer: StatusCode) -> (String, Arc<AtomicU32>) {
        spawn_target_with(answer, None).await
    }

    async fn spawn_target_with(
        answer: StatusCode,
        delete_on_hit: Option<(StoreScheduler, String)>,
    ) -> (String, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let app = Router::new()
            .route("/measure", post(measure))
            .with_state(Target {
                hits: hits.clone(),
                answer,
                delete_on_hit,
            });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/measure"), hits)
    }

    fn dispatcher(sched: &StoreScheduler, owner: Option<&str>) -> TriggerDispatcher {
        TriggerDispatcher::new(
            sched.clone(),
            DispatchConfig {
                owner: owner.map(String::from),
                auth_token: Some("secret".into()),
                retry_backoff: Duration::from_secs(10),
                max_attempts: 2,
                ..Default::default()
            },
        )
        .unwrap()
    }

    async fn schedule(sched: &StoreScheduler, target: &str) -> String {
        sched
            .create(&TriggerSpec {
                owner: "svc".into(),
                run_id: "r1".into(),
                target: target.into(),
                fire_at: 100,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn fires_due_job_once() {
        let (target, hits) = spawn_target(StatusCode::ACCEPTED).await;
        let sched = StoreScheduler::new(RunStore::in_memory().unwrap());
        let id = schedule(&sched, &target).await;
        let d = dispatcher(&sched, None);

        assert_eq!(d.tick(99).await.unwrap(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert_eq!(d.tick(100).await.unwrap(), 1);
        assert_eq!(d.tick(200).await.unwrap(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let job = sched.get(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Fired);
        assert_eq!(job.fired_at, Some(100));
    }

    #[tokio::test]
    async fn client_error_ends_job() {
        let (target, hits) = spawn_target(StatusCode::GONE).await;
        let sched = StoreScheduler::new(RunStore::in_memory().unwrap());
        let id = schedule(&sched, &target).await;
        let d = dispatcher(&sched, None);

        d.tick(100).await.unwrap();
        d.tick(500).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let job = sched.get(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Fired);
        assert!(job.last_error.unwrap().contains("410"));
    }

    #[tokio::test]
    async fn server_error_retries_then_gives_up() {
        let (target, hits) = spawn_target(StatusCode::SERVICE_UNAVAILABLE).await;
        let sched = StoreScheduler::new(RunStore::in_memory().unwrap());
        let id = schedule(&sched, &target).await;
        let d = dispatcher(&sched, None);

        assert_eq!(d.tick(100).await.unwrap(), 0);
        let job = sched.get(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.fire_at, 110);

        // Not yet due again.
        d.tick(105).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        d.tick(110).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        let job = sched.get(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn job_deleted_during_delivery_stays_deleted() {
        let sched = StoreScheduler::new(RunStore::in_memory().unwrap());
        let job_id = "measure-svc-r1".to_string();
        let (target, hits) =
            spawn_target_with(StatusCode::OK, Some((sched.clone(), job_id.clone()))).await;
        assert_eq!(schedule(&sched, &target).await, job_id);
        let d = dispatcher(&sched, None);

        assert_eq!(d.tick(100).await.unwrap(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(sched.get(&job_id).await.unwrap().is_none());
        assert!(sched.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn owner_filter_skips_foreign_jobs() {
        let (target, hits) = spawn_target(StatusCode::OK).await;
        let sched = StoreScheduler::new(RunStore::in_memory().unwrap());
        schedule(&sched, &target).await;

        let d = dispatcher(&sched, Some("other"));
        assert_eq!(d.tick(1_000).await.unwrap(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let d = dispatcher(&sched, Some("svc"));
        assert_eq!(d.tick(1_000).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let sched = StoreScheduler::new(RunStore::in_memory().unwrap());
        let d = dispatcher(&sched, None);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(d.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
