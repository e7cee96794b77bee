//! Drives asynchronous provider jobs to a terminal status.

use crate::error::{sanitize_error_message, GenerationError, Result};
use crate::image::{AsyncProvider, Credential, GenerationResult, JobStatus, ProviderJob};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Default delay between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default total time allowed for a job to finish.
pub const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(120);

/// Time source for the polling loop.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Waits for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock that only moves when slept on.
///
/// `sleep` advances time instantly, so polling runs are deterministic. Test
/// use only: a pending in-flight check moves it straight to the deadline.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

#[cfg(any(test, feature = "test-util"))]
impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-util"))]
impl ManualClock {
    /// Creates a clock at offset zero.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Time advanced so far.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += by;
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Polls a job at a fixed cadence until it succeeds, fails, or the deadline
/// passes.
///
/// Status checks are strictly sequential. No check is issued once the
/// deadline has elapsed, and a check still in flight at the deadline is
/// dropped.
#[derive(Clone)]
pub struct JobPoller {
    interval: Duration,
    deadline: Duration,
    clock: Arc<dyn Clock>,
}

impl Default for JobPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_POLL_DEADLINE)
    }
}

impl std::fmt::Debug for JobPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPoller")
            .field("interval", &self.interval)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl JobPoller {
    /// Creates a poller on the tokio clock.
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self {
            interval,
            deadline,
            clock: Arc::new(TokioClock),
        }
    }

    /// Replaces the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Delay between status checks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Total time allowed per job.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Drives `job` to completion.
    pub async fn poll(
        &self,
        provider: &dyn AsyncProvider,
        job: ProviderJob,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult> {
        let started = self.clock.now();
        let deadline_at = started + self.deadline;
        let created_at = job.created_at;
        let mut job = job;
        let mut polls: u32 = 0;

        loop {
            match job.status {
                JobStatus::Succeeded => {
                    tracing::info!(
                        provider = %provider.id(),
                        job_id = %job.id,
                        polls,
                        elapsed_ms = self.clock.now().duration_since(started).as_millis() as u64,
                        "job succeeded"
                    );
                    return provider.normalize(&job);
                }
                JobStatus::Failed => {
                    let detail = job
                        .error
                        .as_deref()
                        .map(sanitize_error_message)
                        .unwrap_or_else(|| "job failed without detail".into());
                    tracing::warn!(
                        provider = %provider.id(),
                        job_id = %job.id,
                        polls,
                        detail = %detail,
                        "job failed"
                    );
                    return Err(GenerationError::ProviderUnavailable(detail));
                }
                JobStatus::Pending | JobStatus::Running => {}
            }

            let remaining = deadline_at.saturating_duration_since(self.clock.now());
            if remaining.is_zero() {
                return Err(self.timed_out(&job, polls));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                _ = self.clock.sleep(self.interval.min(remaining)) => {}
            }

            let remaining = deadline_at.saturating_duration_since(self.clock.now());
            if remaining.is_zero() {
                return Err(self.timed_out(&job, polls));
            }

            polls += 1;
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                polled = provider.poll(&job.id, credential) => polled?,
                _ = self.clock.sleep(remaining) => {
                    tracing::warn!(
                        job_id = %job.id,
                        polls,
                        "abandoning in-flight status check at deadline"
                    );
                    return Err(self.timed_out(&job, polls));
                }
            };

            tracing::debug!(
                provider = %provider.id(),
                job_id = %job.id,
                status = %next.status,
                polls,
                "polled job"
            );

            job = ProviderJob { created_at, ..next };
        }
    }

    fn timed_out(&self, job: &ProviderJob, polls: u32) -> GenerationError {
        tracing::warn!(
            job_id = %job.id,
            status = %job.status,
            polls,
            deadline_secs = self.deadline.as_secs(),
            "job did not finish before deadline"
        );
        GenerationError::Timeout(self.deadline)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::image::{GenerationRequest, ProviderId};
    use crate::normalize::ResultNormalizer;
    use crate::ErrorKind;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::Notify;

    const REPLICATE_OUTPUT: ResultNormalizer =
        ResultNormalizer::new(ProviderId::Replicate, &["/output/0", "/output"]);

    /// Async provider that replays a fixed sequence of poll responses.
    pub(crate) struct ScriptedJobs {
        pub submitted: JobStatus,
        pub script: Mutex<VecDeque<Result<ProviderJob>>>,
        pub poll_times: Mutex<Vec<Duration>>,
        pub clock: Option<Arc<ManualClock>>,
        pub hang: bool,
        pub cancel_on_poll: Option<(usize, CancellationToken)>,
        pub entered: Arc<Notify>,
    }

    impl ScriptedJobs {
        pub(crate) fn new(script: Vec<Result<ProviderJob>>) -> Self {
            Self {
                submitted: JobStatus::Pending,
                script: Mutex::new(script.into()),
                poll_times: Mutex::new(Vec::new()),
                clock: None,
                hang: false,
                cancel_on_poll: None,
                entered: Arc::new(Notify::new()),
            }
        }

        pub(crate) fn with_clock(mut self, clock: Arc<ManualClock>) -> Self {
            self.clock = Some(clock);
            self
        }

        pub(crate) fn polls(&self) -> usize {
            self.poll_times.lock().unwrap().len()
        }
    }

    pub(crate) fn running() -> Result<ProviderJob> {
        Ok(ProviderJob::new("job-1", JobStatus::Running))
    }

    pub(crate) fn succeeded(output: &str) -> Result<ProviderJob> {
        Ok(ProviderJob::new("job-1", JobStatus::Succeeded)
            .with_output(json!({ "output": [output] })))
    }

    #[async_trait]
    impl AsyncProvider for ScriptedJobs {
        async fn submit(&self, _: &GenerationRequest, _: &Credential) -> Result<ProviderJob> {
            Ok(ProviderJob::new("job-1", self.submitted))
        }

        async fn poll(&self, _: &str, _: &Credential) -> Result<ProviderJob> {
            let at = self.clock.as_ref().map(|c| c.elapsed()).unwrap_or_default();
            let count = {
                let mut times = self.poll_times.lock().unwrap();
                times.push(at);
                times.len()
            };
            if let Some((n, token)) = &self.cancel_on_poll {
                if count == *n {
                    token.cancel();
                }
            }
            self.entered.notify_one();
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(running)
        }

        fn normalize(&self, job: &ProviderJob) -> Result<GenerationResult> {
            let output = job
                .output
                .as_ref()
                .ok_or_else(|| GenerationError::unexpected("no output"))?;
            REPLICATE_OUTPUT.normalize(output)
        }

        fn id(&self) -> ProviderId {
            ProviderId::Replicate
        }
    }

    fn poller(clock: &Arc<ManualClock>, deadline_secs: u64) -> JobPoller {
        JobPoller::new(Duration::from_secs(1), Duration::from_secs(deadline_secs))
            .with_clock(clock.clone())
    }

    fn cred() -> Credential {
        Credential::new("r8-test")
    }

    #[tokio::test]
    async fn test_running_then_succeeded() {
        let clock = Arc::new(ManualClock::new());
        let jobs = ScriptedJobs::new(vec![
            running(),
            running(),
            running(),
            succeeded("https://x/y.png"),
        ])
        .with_clock(clock.clone());

        let result = poller(&clock, 120)
            .poll(
                &jobs,
                ProviderJob::new("job-1", JobStatus::Pending),
                &cred(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.image_url(), "https://x/y.png");
        assert_eq!(jobs.polls(), 4);
        assert_eq!(clock.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_base64_output_becomes_data_uri() {
        let clock = Arc::new(ManualClock::new());
        let jobs = ScriptedJobs::new(vec![
            Ok(ProviderJob::new("job-1", JobStatus::Running)),
            succeeded("Zm9v"),
        ]);

        let result = poller(&clock, 120)
            .poll(
                &jobs,
                ProviderJob::new("job-1", JobStatus::Pending),
                &cred(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.image_url(), "data:image/png;base64,Zm9v");
    }

    #[tokio::test]
    async fn test_already_terminal_issues_no_poll() {
        let clock = Arc::new(ManualClock::new());
        let jobs = ScriptedJobs::new(vec![]);
        let job = ProviderJob::new("job-1", JobStatus::Succeeded)
            .with_output(json!({"output": "https://x/done.png"}));

        let result = poller(&clock, 120)
            .poll(&jobs, job, &cred(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.image_url(), "https://x/done.png");
        assert_eq!(jobs.polls(), 0);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_never_finishing_job_times_out() {
        let clock = Arc::new(ManualClock::new());
        let jobs = ScriptedJobs::new(vec![]).with_clock(clock.clone());

        let err = poller(&clock, 5)
            .poll(
                &jobs,
                ProviderJob::new("job-1", JobStatus::Running),
                &cred(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(jobs.polls(), 4);
        let times = jobs.poll_times.lock().unwrap();
        assert!(times.iter().all(|t| *t < Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_in_flight_poll_abandoned_at_deadline() {
        let clock = Arc::new(ManualClock::new());
        let mut jobs = ScriptedJobs::new(vec![]).with_clock(clock.clone());
        jobs.hang = true;

        let err = poller(&clock, 3)
            .poll(
                &jobs,
                ProviderJob::new("job-1", JobStatus::Pending),
                &cred(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(jobs.polls(), 1);
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_failed_job_is_provider_unavailable() {
        let clock = Arc::new(ManualClock::new());
        let jobs = ScriptedJobs::new(vec![
            running(),
            Ok(ProviderJob::new("job-1", JobStatus::Failed).with_error("NSFW content detected")),
        ]);

        let err = poller(&clock, 120)
            .poll(
                &jobs,
                ProviderJob::new("job-1", JobStatus::Pending),
                &cred(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
        assert_eq!(err.provider_detail().as_deref(), Some("NSFW content detected"));
    }

    #[tokio::test]
    async fn test_succeeded_without_output_is_unexpected_response() {
        let clock = Arc::new(ManualClock::new());
        for output in [json!({"output": []}), json!({"output": ""}), json!({})] {
            let jobs = ScriptedJobs::new(vec![Ok(
                ProviderJob::new("job-1", JobStatus::Succeeded).with_output(output)
            )]);
            let err = poller(&clock, 120)
                .poll(
                    &jobs,
                    ProviderJob::new("job-1", JobStatus::Pending),
                    &cred(),
                    &CancellationToken::new(),
                )
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnexpectedResponse);
        }
    }

    #[tokio::test]
    async fn test_poll_error_propagates_without_retry() {
        let clock = Arc::new(ManualClock::new());
        let jobs = ScriptedJobs::new(vec![
            Err(GenerationError::RateLimited { retry_after: None }),
            succeeded("https://x/y.png"),
        ]);

        let err = poller(&clock, 120)
            .poll(
                &jobs,
                ProviderJob::new("job-1", JobStatus::Pending),
                &cred(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(jobs.polls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_between_polls() {
        let clock = Arc::new(ManualClock::new());
        let cancel = CancellationToken::new();
        let mut jobs = ScriptedJobs::new(vec![]).with_clock(clock.clone());
        jobs.cancel_on_poll = Some((2, cancel.clone()));

        let err = poller(&clock, 120)
            .poll(
                &jobs,
                ProviderJob::new("job-1", JobStatus::Running),
                &cred(),
                &cancel,
            )
            .await
            .unwrap_err();

        // The second check still returns; the wait before a third one is cut short.
        assert!(matches!(err, GenerationError::Cancelled));
        assert_eq!(jobs.polls(), 2);
        assert_eq!(clock.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancelled_during_in_flight_poll() {
        let cancel = CancellationToken::new();
        let mut jobs = ScriptedJobs::new(vec![running()]);
        jobs.hang = true;

        let entered = jobs.entered.clone();
        let canceller = cancel.clone();
        let handle = tokio::spawn(async move {
            entered.notified().await;
            canceller.cancel();
        });

        // Real timers: only the cancellation can end the hung check.
        let err = JobPoller::new(Duration::from_millis(10), Duration::from_secs(120))
            .poll(
                &jobs,
                ProviderJob::new("job-1", JobStatus::Pending),
                &cred(),
                &cancel,
            )
            .await
            .unwrap_err();
        handle.await.unwrap();

        assert!(matches!(err, GenerationError::Cancelled));
        assert_eq!(jobs.polls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_next_poll() {
        let clock = Arc::new(ManualClock::new());
        let jobs = ScriptedJobs::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = poller(&clock, 120)
            .poll(
                &jobs,
                ProviderJob::new("job-1", JobStatus::Running),
                &cred(),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::Cancelled));
        assert_eq!(jobs.polls(), 0);
    }
}
