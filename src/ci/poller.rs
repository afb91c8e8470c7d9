use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::ci::cache::{CacheKey, CheckCache, QueryKind};
use crate::config::CiConfig;
use crate::error::{AppError, Result};
use crate::platform::types::{AggregateState, CheckAggregate};
use crate::platform::Platform;

/// Tuning for [`CiPoller::wait_for_checks`].
#[derive(Debug, Clone)]
pub struct PollOptions {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_factor: f64,
    /// How long an empty check list is tolerated before concluding no checks exist.
    pub grace_window: Duration,
    /// Overall budget for the wait.
    pub timeout: Duration,
    /// Resolve `Failure` on the first failed check instead of waiting for pending ones.
    pub fail_fast: bool,
    pub max_fetch_retries: u32,
    pub request_timeout: Duration,
    pub cache_ttl: Duration,
}

impl From<&CiConfig> for PollOptions {
    fn from(config: &CiConfig) -> Self {
        Self {
            initial_interval: Duration::from_secs(config.initial_interval_secs),
            max_interval: Duration::from_secs(config.max_interval_secs),
            backoff_factor: config.backoff_factor,
            grace_window: Duration::from_secs(config.grace_secs),
            timeout: Duration::from_secs(config.timeout_secs),
            fail_fast: config.fail_fast,
            max_fetch_retries: config.max_fetch_retries,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            cache_ttl: config.cache_ttl(),
        }
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::from(&CiConfig::default())
    }
}

/// Emitted once per poll tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PollProgress {
    Checks {
        passed: u32,
        failed: u32,
        pending: u32,
        total: u32,
    },
    /// The platform reports no checks for the ref yet.
    NoChecksYet {
        waited_secs: u64,
        grace_secs: u64,
    },
}

/// Terminal result of a CI wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedState {
    Success {
        aggregate: CheckAggregate,
        /// The grace window elapsed without any check being registered.
        no_checks_configured: bool,
    },
    Failure {
        aggregate: CheckAggregate,
    },
    TimedOut {
        last: Option<CheckAggregate>,
        elapsed: Duration,
    },
}

#[derive(Debug, Clone, Copy)]
enum PollPhase {
    Polling,
    ZeroChecksGrace { since: Instant },
}

/// Geometric backoff between ticks, capped at `max`.
#[derive(Debug, Clone)]
struct Backoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl Backoff {
    fn new(options: &PollOptions) -> Self {
        Self {
            initial: options.initial_interval,
            max: options.max_interval,
            factor: options.backoff_factor,
            current: options.initial_interval,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.mul_f64(self.factor).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Polls aggregated check status for a ref until it reaches a terminal state.
///
/// The loop is cooperative: one status query in flight, then a sleep. Only
/// one `wait_for_checks` call should run per poller at a time.
pub struct CiPoller {
    platform: Arc<dyn Platform>,
    cache: CheckCache,
    options: PollOptions,
}

impl CiPoller {
    pub fn new(platform: Arc<dyn Platform>, options: PollOptions) -> Self {
        Self {
            platform,
            cache: CheckCache::new(options.cache_ttl),
            options,
        }
    }

    pub fn options(&self) -> &PollOptions {
        &self.options
    }

    pub async fn wait_for_checks(
        &self,
        repo_full_name: &str,
        git_ref: &str,
        on_progress: &mut dyn FnMut(PollProgress),
    ) -> Result<ResolvedState> {
        let key = CacheKey::new(repo_full_name, git_ref, QueryKind::CheckAggregate);
        let grace = self.options.grace_window;
        let started = Instant::now();
        let deadline = started + self.options.timeout;

        let mut phase = PollPhase::Polling;
        let mut backoff = Backoff::new(&self.options);
        let mut last: Option<CheckAggregate> = None;

        tracing::info!(
            repo = repo_full_name,
            git_ref,
            timeout_secs = self.options.timeout.as_secs(),
            "Waiting for CI checks"
        );

        loop {
            let tick = Instant::now();
            let Some(aggregate) = self
                .fetch(repo_full_name, git_ref, &key, tick, deadline)
                .await?
            else {
                let elapsed = Instant::now().duration_since(started);
                tracing::warn!(
                    repo = repo_full_name,
                    git_ref,
                    elapsed_secs = elapsed.as_secs(),
                    "Timed out waiting for CI checks while querying status"
                );
                return Ok(ResolvedState::TimedOut { last, elapsed });
            };
            let now = Instant::now();

            match aggregate.state() {
                AggregateState::UnknownEmpty => {
                    let since = match phase {
                        PollPhase::ZeroChecksGrace { since } => since,
                        PollPhase::Polling => {
                            tracing::debug!(
                                grace_secs = grace.as_secs(),
                                "No checks registered yet, entering grace window"
                            );
                            phase = PollPhase::ZeroChecksGrace { since: now };
                            now
                        }
                    };
                    let waited = now.duration_since(since);
                    on_progress(PollProgress::NoChecksYet {
                        waited_secs: waited.as_secs(),
                        grace_secs: grace.as_secs(),
                    });

                    if waited >= grace {
                        tracing::warn!(
                            repo = repo_full_name,
                            git_ref,
                            "No CI checks registered within grace window, treating as none configured"
                        );
                        return Ok(ResolvedState::Success {
                            aggregate,
                            no_checks_configured: true,
                        });
                    }
                }
                state => {
                    if let PollPhase::ZeroChecksGrace { .. } = phase {
                        tracing::debug!(total = aggregate.total, "Checks registered, leaving grace window");
                        phase = PollPhase::Polling;
                    }

                    on_progress(PollProgress::Checks {
                        passed: aggregate.passed,
                        failed: aggregate.failed,
                        pending: aggregate.pending,
                        total: aggregate.total,
                    });

                    match state {
                        AggregateState::Success => {
                            tracing::info!(total = aggregate.total, "All CI checks passed");
                            return Ok(ResolvedState::Success {
                                aggregate,
                                no_checks_configured: false,
                            });
                        }
                        AggregateState::Failure
                            if self.options.fail_fast || aggregate.pending == 0 =>
                        {
                            tracing::warn!(
                                failed = ?aggregate.failed_names(),
                                "CI checks failed"
                            );
                            return Ok(ResolvedState::Failure { aggregate });
                        }
                        _ => {}
                    }

                    if last
                        .as_ref()
                        .is_some_and(|prev| aggregate.pending < prev.pending)
                    {
                        backoff.reset();
                    }
                }
            }

            if now >= deadline {
                tracing::warn!(
                    repo = repo_full_name,
                    git_ref,
                    pending = aggregate.pending,
                    "Timed out waiting for CI checks"
                );
                return Ok(ResolvedState::TimedOut {
                    elapsed: now.duration_since(started),
                    last: Some(aggregate),
                });
            }

            let mut delay = backoff.next_delay();
            if let PollPhase::ZeroChecksGrace { since } = phase {
                delay = delay.min((since + grace).saturating_duration_since(now));
            }
            delay = delay.min(deadline.saturating_duration_since(now));

            tracing::debug!(delay_ms = delay.as_millis() as u64, "Next CI poll scheduled");
            last = Some(aggregate);
            tokio::time::sleep(delay).await;
        }
    }

    /// Fetch through the cache, retrying transient failures a bounded number of times.
    ///
    /// Entries cached before `tick` are not reused. Returns `None` once `deadline`
    /// passes: no request or retry delay is allowed to run beyond it.
    async fn fetch(
        &self,
        repo_full_name: &str,
        git_ref: &str,
        key: &CacheKey,
        tick: Instant,
        deadline: Instant,
    ) -> Result<Option<CheckAggregate>> {
        let mut attempt = 0u32;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let request_timeout = self.options.request_timeout.min(remaining);

            let result = self
                .cache
                .get_since(key, tick, || async {
                    match tokio::time::timeout(
                        request_timeout,
                        self.platform.fetch_check_aggregate(repo_full_name, git_ref),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(AppError::Network(format!(
                            "Check status query timed out after {:.1}s",
                            request_timeout.as_secs_f64()
                        ))),
                    }
                })
                .await;

            match result {
                Ok(aggregate) => return Ok(Some(aggregate)),
                Err(e) if e.is_transient() && Instant::now() >= deadline => {
                    tracing::debug!(error = %e, "Check status query cut off by the CI deadline");
                    return Ok(None);
                }
                Err(e) if e.is_transient() && attempt < self.options.max_fetch_retries => {
                    attempt += 1;
                    let delay = (self.options.initial_interval * attempt)
                        .min(deadline.saturating_duration_since(Instant::now()));
                    tracing::warn!(
                        attempt,
                        max_retries = self.options.max_fetch_retries,
                        error = %e,
                        "Check status query failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergeMethod;
    use crate::platform::types::{CheckOutcome, CheckRun, CreatePullRequest, PullRequest};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    type Script = Box<dyn Fn(Duration, u32) -> Result<CheckAggregate> + Send + Sync>;

    /// Status source driven by elapsed virtual time and call count.
    struct ScriptedStatus {
        started: Instant,
        calls: AtomicU32,
        script: Script,
    }

    impl ScriptedStatus {
        fn new(script: impl Fn(Duration, u32) -> Result<CheckAggregate> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                started: Instant::now(),
                calls: AtomicU32::new(0),
                script: Box::new(script),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Platform for ScriptedStatus {
        async fn default_branch(&self, _repo: &str) -> Result<String> {
            Ok("main".to_string())
        }

        async fn find_open_pull_request(&self, _repo: &str, _head: &str) -> Result<Option<PullRequest>> {
            Ok(None)
        }

        async fn create_pull_request(&self, _repo: &str, _pr: &CreatePullRequest) -> Result<PullRequest> {
            Err(AppError::Internal("not scripted".to_string()))
        }

        async fn fetch_check_aggregate(&self, _repo: &str, _git_ref: &str) -> Result<CheckAggregate> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            (self.script)(self.started.elapsed(), n)
        }

        async fn merge_pull_request(&self, _repo: &str, _pr: u64, _method: MergeMethod) -> Result<bool> {
            Ok(true)
        }
    }

    fn checks(passed: usize, failed: usize, pending: usize) -> CheckAggregate {
        let mut runs = Vec::new();
        let mut push = |prefix: &str, n: usize, outcome| {
            for i in 0..n {
                runs.push(CheckRun {
                    name: format!("{prefix}-{i}"),
                    outcome,
                    details_url: None,
                });
            }
        };
        push("ok", passed, CheckOutcome::Passed);
        push("bad", failed, CheckOutcome::Failed);
        push("wip", pending, CheckOutcome::Pending);
        CheckAggregate::from_checks(runs)
    }

    fn poller(status: Arc<ScriptedStatus>) -> CiPoller {
        CiPoller::new(status, PollOptions::default())
    }

    async fn wait(poller: &CiPoller) -> (Result<ResolvedState>, Vec<PollProgress>) {
        let mut events = Vec::new();
        let result = poller
            .wait_for_checks("acme/widgets", "abc123", &mut |e| events.push(e))
            .await;
        (result, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_checks_registered_during_grace_resolve_normally() {
        let status = ScriptedStatus::new(|elapsed, _| {
            if elapsed < Duration::from_secs(10) {
                Ok(checks(0, 0, 0))
            } else {
                Ok(checks(3, 0, 0))
            }
        });
        let poller = poller(status.clone());
        let start = Instant::now();

        let (result, events) = wait(&poller).await;

        match result.unwrap() {
            ResolvedState::Success {
                aggregate,
                no_checks_configured,
            } => {
                assert!(!no_checks_configured);
                assert_eq!(aggregate.total, 3);
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(20));
        assert!(matches!(events[0], PollProgress::NoChecksYet { .. }));
        assert_eq!(
            events.last(),
            Some(&PollProgress::Checks {
                passed: 3,
                failed: 0,
                pending: 0,
                total: 3
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_checks_for_whole_grace_window() {
        let status = ScriptedStatus::new(|_, _| Ok(checks(0, 0, 0)));
        let poller = poller(status.clone());
        let start = Instant::now();

        let (result, events) = wait(&poller).await;

        match result.unwrap() {
            ResolvedState::Success {
                no_checks_configured,
                ..
            } => assert!(no_checks_configured),
            other => panic!("expected success, got {other:?}"),
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(20), "resolved early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(21), "resolved late: {elapsed:?}");
        assert!(events
            .iter()
            .all(|e| matches!(e, PollProgress::NoChecksYet { grace_secs: 20, .. })));
        assert!(status.calls() > 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_resolves_immediately() {
        let status = ScriptedStatus::new(|_, _| Ok(checks(1, 1, 0)));
        let poller = poller(status.clone());

        let (result, events) = wait(&poller).await;

        match result.unwrap() {
            ResolvedState::Failure { aggregate } => {
                assert_eq!(aggregate.total, 2);
                assert_eq!(aggregate.failed_names(), vec!["bad-0".to_string()]);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(status.calls(), 1);
        assert_eq!(events.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_disabled_waits_for_pending() {
        let status = ScriptedStatus::new(|_, n| {
            if n < 2 {
                Ok(checks(1, 1, 1))
            } else {
                Ok(checks(2, 1, 0))
            }
        });
        let options = PollOptions {
            fail_fast: false,
            ..PollOptions::default()
        };
        let poller = CiPoller::new(status.clone(), options);

        let (result, _) = wait(&poller).await;
        assert!(matches!(result.unwrap(), ResolvedState::Failure { .. }));
        assert_eq!(status.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_with_last_aggregate() {
        let status = ScriptedStatus::new(|_, _| Ok(checks(1, 0, 2)));
        let options = PollOptions {
            timeout: Duration::from_secs(60),
            ..PollOptions::default()
        };
        let poller = CiPoller::new(status, options);
        let start = Instant::now();

        let (result, _) = wait(&poller).await;
        match result.unwrap() {
            ResolvedState::TimedOut { last, elapsed } => {
                assert_eq!(last.unwrap().pending, 2);
                assert!(elapsed >= Duration::from_secs(60));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_window_longer_than_timeout_times_out() {
        let status = ScriptedStatus::new(|_, _| Ok(checks(0, 0, 0)));
        let options = PollOptions {
            timeout: Duration::from_secs(10),
            ..PollOptions::default()
        };
        let poller = CiPoller::new(status, options);

        let (result, _) = wait(&poller).await;
        assert!(matches!(result.unwrap(), ResolvedState::TimedOut { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let status = ScriptedStatus::new(|_, n| {
            if n < 2 {
                Err(AppError::Network("connection reset".to_string()))
            } else {
                Ok(checks(2, 0, 0))
            }
        });
        let poller = poller(status.clone());

        let (result, _) = wait(&poller).await;
        assert!(matches!(result.unwrap(), ResolvedState::Success { .. }));
        assert_eq!(status.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let status = ScriptedStatus::new(|_, _| Err(AppError::Network("unreachable".to_string())));
        let poller = poller(status.clone());

        let (result, _) = wait(&poller).await;
        assert!(matches!(result, Err(AppError::Network(_))));
        assert_eq!(status.calls(), 1 + PollOptions::default().max_fetch_retries);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_errors_are_not_retried() {
        let status = ScriptedStatus::new(|_, _| {
            Err(AppError::GitHubApi {
                status: Some(401),
                message: "Bad credentials".to_string(),
            })
        });
        let poller = poller(status.clone());

        let (result, _) = wait(&poller).await;
        assert!(result.is_err());
        assert_eq!(status.calls(), 1);
    }

    /// Status API that never answers.
    struct Hanging;

    #[async_trait]
    impl Platform for Hanging {
        async fn default_branch(&self, _repo: &str) -> Result<String> {
            Ok("main".to_string())
        }

        async fn find_open_pull_request(&self, _repo: &str, _head: &str) -> Result<Option<PullRequest>> {
            Ok(None)
        }

        async fn create_pull_request(&self, _repo: &str, _pr: &CreatePullRequest) -> Result<PullRequest> {
            Err(AppError::Internal("not scripted".to_string()))
        }

        async fn fetch_check_aggregate(&self, _repo: &str, _git_ref: &str) -> Result<CheckAggregate> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(checks(1, 0, 0))
        }

        async fn merge_pull_request(&self, _repo: &str, _pr: u64, _method: MergeMethod) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_status_query_times_out_at_deadline() {
        let options = PollOptions {
            timeout: Duration::from_secs(10),
            ..PollOptions::default()
        };
        let poller = CiPoller::new(Arc::new(Hanging), options);
        let start = Instant::now();

        let (result, events) = wait(&poller).await;

        match result.unwrap() {
            ResolvedState::TimedOut { last, elapsed } => {
                assert!(last.is_none());
                assert!(elapsed >= Duration::from_secs(10));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(11), "overran: {:?}", start.elapsed());
        assert!(events.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_delays_stop_at_deadline() {
        let status = ScriptedStatus::new(|_, _| Err(AppError::Network("connection reset".to_string())));
        let options = PollOptions {
            timeout: Duration::from_secs(5),
            ..PollOptions::default()
        };
        let poller = CiPoller::new(status.clone(), options);
        let start = Instant::now();

        let (result, _) = wait(&poller).await;

        assert!(matches!(result.unwrap(), ResolvedState::TimedOut { last: None, .. }));
        assert!(start.elapsed() < Duration::from_secs(6));
        // attempts at 0s and 3s; the second retry delay is cut to the 5s deadline
        assert_eq!(status.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_grace_gap_does_not_reuse_cached_empty_status() {
        // The last grace tick comes 1s after the previous one, inside the 2s cache TTL
        let status = ScriptedStatus::new(|elapsed, _| {
            if elapsed < Duration::from_millis(3500) {
                Ok(checks(0, 0, 0))
            } else {
                Ok(checks(3, 0, 0))
            }
        });
        let options = PollOptions {
            grace_window: Duration::from_secs(4),
            ..PollOptions::default()
        };
        let poller = CiPoller::new(status.clone(), options);
        let start = Instant::now();

        let (result, _) = wait(&poller).await;

        match result.unwrap() {
            ResolvedState::Success {
                aggregate,
                no_checks_configured,
            } => {
                assert!(!no_checks_configured);
                assert_eq!(aggregate.total, 3);
            }
            other => panic!("expected success, got {other:?}"),
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_millis(4100));
        assert_eq!(status.calls(), 3);
    }

    #[test]
    fn test_backoff_grows_to_cap_and_resets() {
        let mut backoff = Backoff::new(&PollOptions {
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(10),
            backoff_factor: 2.0,
            ..PollOptions::default()
        });
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 10, 10]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_resets_backoff() {
        // pending drops on the fourth tick; the following delay returns to the initial interval
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let recorded = ticks.clone();
        let status = ScriptedStatus::new(move |elapsed, n| {
            recorded.lock().unwrap().push(elapsed);
            match n {
                0..=3 => Ok(checks(0, 0, 3)),
                4 => Ok(checks(1, 0, 2)),
                _ => Ok(checks(3, 0, 0)),
            }
        });
        let poller = poller(status);

        let (result, _) = wait(&poller).await;
        assert!(matches!(result.unwrap(), ResolvedState::Success { .. }));

        let ticks = ticks.lock().unwrap();
        let gaps: Vec<Duration> = ticks.windows(2).map(|w| w[1] - w[0]).collect();
        // 3s, 4.5s, 6.75s, 10.125s, then reset to 3s
        assert!(gaps[3] > gaps[2]);
        assert_eq!(gaps[4], Duration::from_secs(3));
    }
}
