//! Submit-then-poll driver for remote contextualization jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use discovery_client::PollConfig;
use discovery_core::{
    defaults, Error, JobClient, JobId, JobKind, JobRequest, JobSnapshot, JobStatus, Result,
};

/// How often a job is polled and for how long.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay before the second poll.
    pub initial_interval: Duration,
    /// Upper bound for any delay.
    pub max_interval: Duration,
    /// Growth factor applied after each non-terminal poll.
    pub multiplier: f64,
    /// Give up after this long. `None` polls until a terminal status.
    pub max_duration: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            max_interval: Duration::from_millis(defaults::POLL_MAX_INTERVAL_MS),
            multiplier: defaults::POLL_BACKOFF_MULTIPLIER,
            max_duration: Some(Duration::from_secs(defaults::POLL_TIMEOUT_SECS)),
        }
    }
}

impl PollPolicy {
    /// Constant interval with no timeout.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
            max_duration: None,
        }
    }

    pub fn with_max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Delay that follows `current`. Never exceeds `max_interval`, even for
    /// a multiplier so large the product is not a valid `Duration`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let factor = self.multiplier.max(1.0);
        Duration::try_from_secs_f64(factor * current.as_secs_f64())
            .map_or(self.max_interval, |d| d.min(self.max_interval))
    }

    /// The sequence of delays between polls.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        std::iter::successors(Some(self.initial_interval.min(self.max_interval)), |d| {
            Some(self.next_delay(*d))
        })
    }
}

impl From<&PollConfig> for PollPolicy {
    fn from(config: &PollConfig) -> Self {
        Self {
            initial_interval: Duration::from_millis(config.interval_ms),
            max_interval: Duration::from_millis(config.max_interval_ms),
            multiplier: config.multiplier,
            max_duration: (config.timeout_secs > 0).then(|| Duration::from_secs(config.timeout_secs)),
        }
    }
}

/// Drives one remote job from submission to a terminal status.
///
/// Polls are strictly sequential: the next status request is issued only
/// after the previous response has been handled and the delay has elapsed.
/// Nothing is polled once `Completed` or `Failed` has been observed.
#[derive(Clone)]
pub struct JobPoller {
    client: Arc<dyn JobClient>,
    policy: PollPolicy,
}

impl JobPoller {
    pub fn new(client: Arc<dyn JobClient>, policy: PollPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub fn client(&self) -> Arc<dyn JobClient> {
        self.client.clone()
    }

    /// Start a job. Any failure is reported as [`Error::Submission`].
    pub async fn submit(&self, request: &JobRequest) -> Result<JobId> {
        match self.client.submit(request).await {
            Ok(job_id) => {
                info!(job_kind = %request.kind, job_id = %job_id, "Job submitted");
                Ok(job_id)
            }
            Err(e) => {
                warn!(job_kind = %request.kind, error = %e, "Job submission failed");
                Err(Error::Submission(e.to_string()))
            }
        }
    }

    /// Poll until the job reaches a terminal status.
    ///
    /// Returns the `Completed` snapshot. A `Failed` status is
    /// [`Error::JobFailed`], a failed status request is [`Error::Poll`], and
    /// exceeding the policy's `max_duration` is [`Error::Timeout`]. None of
    /// these are retried.
    pub async fn wait(&self, kind: JobKind, job_id: &JobId) -> Result<JobSnapshot> {
        match self.policy.max_duration {
            Some(limit) => tokio::time::timeout(limit, self.poll_loop(kind, job_id))
                .await
                .unwrap_or_else(|_| {
                    warn!(job_kind = %kind, job_id = %job_id, "Job polling timed out");
                    Err(Error::Timeout {
                        job_id: job_id.to_string(),
                        waited_secs: limit.as_secs(),
                    })
                }),
            None => self.poll_loop(kind, job_id).await,
        }
    }

    /// Submit a job and wait for it.
    pub async fn run(&self, request: &JobRequest) -> Result<JobSnapshot> {
        let job_id = self.submit(request).await?;
        self.wait(request.kind, &job_id).await
    }

    async fn poll_loop(&self, kind: JobKind, job_id: &JobId) -> Result<JobSnapshot> {
        let started = Instant::now();
        let mut delays = self.policy.delays();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let snapshot = self
                .client
                .status(kind, job_id)
                .await
                .map_err(|e| Error::Poll(e.to_string()))?;

            debug!(
                job_kind = %kind,
                job_id = %job_id,
                attempt,
                status = %snapshot.status,
                "Job status"
            );

            match snapshot.status {
                JobStatus::Completed => {
                    info!(
                        job_kind = %kind,
                        job_id = %job_id,
                        attempt,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Job completed"
                    );
                    return Ok(snapshot);
                }
                JobStatus::Failed => {
                    let message = snapshot
                        .error_message
                        .unwrap_or_else(|| "the remote job reported Failed".to_string());
                    warn!(job_kind = %kind, job_id = %job_id, error = %message, "Job failed");
                    return Err(Error::JobFailed {
                        job_id: job_id.to_string(),
                        message,
                    });
                }
                JobStatus::Pending | JobStatus::Running => {}
            }

            // `delays` is infinite
            let delay = delays.next().unwrap_or(self.policy.max_interval);
            debug!(job_id = %job_id, delay_ms = delay.as_millis() as u64, "Next poll scheduled");
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use discovery_client::mock::{MockPlatform, ScriptedStatus, ScriptedSubmit};
    use serde_json::json;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_default_policy_backs_off_and_caps() {
        let delays: Vec<_> = PollPolicy::default().delays().take(9).collect();
        assert_eq!(
            delays,
            vec![
                ms(1000),
                ms(1500),
                ms(2250),
                ms(3375),
                Duration::from_micros(5_062_500),
                Duration::from_micros(7_593_750),
                ms(10_000),
                ms(10_000),
                ms(10_000),
            ]
        );
    }

    #[test]
    fn test_fixed_policy() {
        let policy = PollPolicy::fixed(ms(1000));
        assert!(policy.delays().take(5).all(|d| d == ms(1000)));
        assert_eq!(policy.max_duration, None);
    }

    #[test]
    fn test_policy_from_config() {
        let config = PollConfig {
            interval_ms: 200,
            max_interval_ms: 800,
            multiplier: 2.0,
            timeout_secs: 0,
        };
        let policy = PollPolicy::from(&config);
        assert_eq!(policy.max_duration, None);
        let delays: Vec<_> = policy.delays().take(4).collect();
        assert_eq!(delays, vec![ms(200), ms(400), ms(800), ms(800)]);
    }

    #[test]
    fn test_next_delay_saturates_at_max_interval() {
        for multiplier in [1e20, f64::INFINITY, f64::MAX] {
            let policy = PollPolicy {
                multiplier,
                ..PollPolicy::default()
            };
            assert_eq!(policy.next_delay(ms(1000)), ms(10_000));
            assert_eq!(policy.next_delay(ms(10_000)), ms(10_000));
        }
        let policy = PollPolicy {
            multiplier: f64::NAN,
            ..PollPolicy::default()
        };
        assert_eq!(policy.next_delay(ms(1000)), ms(1000));
    }

    fn poller(mock: &MockPlatform, policy: PollPolicy) -> JobPoller {
        JobPoller::new(Arc::new(mock.clone()), policy)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_stops_at_completed() {
        let mock = MockPlatform::new()
            .with_status(JobKind::PnidConvert, ScriptedStatus::status(JobStatus::Pending))
            .with_status(JobKind::PnidConvert, ScriptedStatus::status(JobStatus::Running))
            .with_status(
                JobKind::PnidConvert,
                ScriptedStatus::completed(json!({ "svgUrl": "http://x/y.svg" })),
            );

        let snapshot = poller(&mock, PollPolicy::default())
            .wait(JobKind::PnidConvert, &JobId::Number(42))
            .await
            .unwrap();
        assert_eq!(snapshot.svg_url(), Some("http://x/y.svg"));
        assert_eq!(mock.status_count(JobKind::PnidConvert), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_failed_status() {
        let mock = MockPlatform::new()
            .with_status(JobKind::PnidParse, ScriptedStatus::status(JobStatus::Running))
            .with_status(JobKind::PnidParse, ScriptedStatus::failed("Could not read PDF"));

        let err = poller(&mock, PollPolicy::default())
            .wait(JobKind::PnidParse, &JobId::Number(7))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobFailed { ref message, .. } if message == "Could not read PDF"));
        assert_eq!(mock.status_count(JobKind::PnidParse), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_http_error_is_poll_error() {
        let mock =
            MockPlatform::new().with_status(JobKind::PnidParse, ScriptedStatus::HttpError(502));

        let err = poller(&mock, PollPolicy::default())
            .wait(JobKind::PnidParse, &JobId::Number(7))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Poll(_)));
        assert_eq!(mock.status_count(JobKind::PnidParse), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let mock = MockPlatform::new()
            .with_status(JobKind::EntityExtraction, ScriptedStatus::status(JobStatus::Running));
        let policy = PollPolicy::fixed(ms(1000)).with_max_duration(Some(ms(4500)));

        let started = Instant::now();
        let err = poller(&mock, policy)
            .wait(JobKind::EntityExtraction, &JobId::from("job-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { waited_secs: 4, .. }));
        assert_eq!(started.elapsed(), ms(4500));
        // Polls at t = 0, 1, 2, 3, 4; the one due at t = 5 never happens
        assert_eq!(mock.status_count(JobKind::EntityExtraction), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_spacing_follows_policy() {
        let mock = MockPlatform::new()
            .with_status(JobKind::PnidParse, ScriptedStatus::status(JobStatus::Running))
            .with_status(JobKind::PnidParse, ScriptedStatus::status(JobStatus::Running))
            .with_status(JobKind::PnidParse, ScriptedStatus::status(JobStatus::Running))
            .with_status(JobKind::PnidParse, ScriptedStatus::completed(json!({})));

        let started = Instant::now();
        poller(&mock, PollPolicy::default())
            .wait(JobKind::PnidParse, &JobId::Number(1))
            .await
            .unwrap();
        // 1000 + 1500 + 2250
        assert_eq!(started.elapsed(), ms(4750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_multiplier_keeps_polling_at_cap() {
        let mock = MockPlatform::new()
            .with_status(JobKind::PnidParse, ScriptedStatus::status(JobStatus::Running))
            .with_status(JobKind::PnidParse, ScriptedStatus::status(JobStatus::Running))
            .with_status(JobKind::PnidParse, ScriptedStatus::status(JobStatus::Running))
            .with_status(JobKind::PnidParse, ScriptedStatus::completed(json!({})));
        let policy = PollPolicy {
            multiplier: 1e20,
            ..PollPolicy::default()
        };

        let started = Instant::now();
        poller(&mock, policy)
            .wait(JobKind::PnidParse, &JobId::Number(1))
            .await
            .unwrap();
        // 1000 + 10000 + 10000
        assert_eq!(started.elapsed(), ms(21_000));
        assert_eq!(mock.status_count(JobKind::PnidParse), 4);
    }

    #[tokio::test]
    async fn test_submit_failure_maps_to_submission() {
        let mock =
            MockPlatform::new().with_submit(JobKind::PnidParse, ScriptedSubmit::Reject(500));
        let request = JobRequest {
            kind: JobKind::PnidParse,
            body: json!({}),
        };

        let err = poller(&mock, PollPolicy::default())
            .run(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Submission(_)));
        assert_eq!(mock.status_count(JobKind::PnidParse), 0);
    }
}
