use std::future::Future;
use std::sync::Arc;

use crate::ci::{CiPoller, ResolvedState};
use crate::diagnostics::{suggest, ClassifiedError, SuggestionContext};
use crate::error::{AppError, Result};
use crate::execution::{ExecutionTracker, StepHandle};
use crate::local::LocalCheck;
use crate::output::{ProgressEvent, ProgressSink};
use crate::platform::types::{CreatePullRequest, PullRequest};
use crate::platform::Platform;
use crate::ship::types::{
    steps, CheckSummary, ShipData, ShipOptions, ShipReport, WaitData, WaitReport,
};
use crate::workspace::LocalRepository;

/// Lines of script output kept in a failure message.
const SCRIPT_OUTPUT_TAIL: usize = 20;

/// A fatal failure, with the step it happened in (`None` before any step ran).
struct StepFailure {
    step: Option<&'static str>,
    error: AppError,
}

impl StepFailure {
    fn preflight(error: AppError) -> Self {
        Self { step: None, error }
    }
}

/// What the workflow has learned so far; becomes the report's `data`.
#[derive(Debug, Default)]
struct ShipState {
    repo: String,
    branch: String,
    default_branch: String,
    pr: Option<PullRequest>,
    checks: Option<CheckSummary>,
    merged: bool,
    branch_deleted: bool,
}

/// Tracker plus progress sink, kept in step with each other.
struct Run<'a> {
    tracker: ExecutionTracker,
    sink: &'a mut dyn ProgressSink,
}

impl<'a> Run<'a> {
    fn new(sink: &'a mut dyn ProgressSink) -> Self {
        Self {
            tracker: ExecutionTracker::new(),
            sink,
        }
    }

    fn begin(&mut self, name: &'static str) -> StepHandle {
        self.sink.emit(ProgressEvent::StepStarted { name });
        self.tracker.start_step(name)
    }

    fn skip(&mut self, name: &'static str, reason: &str) {
        tracing::info!(step = name, reason, "Skipping step");
        self.tracker.skip_step(name, reason);
        self.sink.emit(ProgressEvent::StepSkipped {
            name,
            reason: reason.to_string(),
        });
    }

    fn end<T>(
        &mut self,
        handle: StepHandle,
        name: &'static str,
        result: Result<T>,
    ) -> std::result::Result<T, StepFailure> {
        match result {
            Ok(value) => {
                let duration_ms = self.tracker.complete_step(handle).unwrap_or_default();
                self.sink.emit(ProgressEvent::StepCompleted { name, duration_ms });
                Ok(value)
            }
            Err(error) => {
                let reason = error.to_string();
                tracing::error!(step = name, error = %reason, "Step failed");
                self.tracker.fail_step(handle, &reason);
                self.sink.emit(ProgressEvent::StepFailed { name, reason });
                Err(StepFailure {
                    step: Some(name),
                    error,
                })
            }
        }
    }

    async fn step<T, F>(&mut self, name: &'static str, work: F) -> std::result::Result<T, StepFailure>
    where
        F: Future<Output = Result<T>>,
    {
        let handle = self.begin(name);
        let result = work.await;
        self.end(handle, name, result)
    }
}

/// Sequences verify, security, push, PR, CI wait, merge and cleanup.
///
/// Phases run one after another and the first fatal failure halts the rest.
/// The execution log is frozen on every exit path.
pub struct ShipOrchestrator {
    options: ShipOptions,
    platform: Arc<dyn Platform>,
    repo: Arc<dyn LocalRepository>,
    verifier: Option<Box<dyn LocalCheck>>,
    scanner: Option<Box<dyn LocalCheck>>,
    poller: CiPoller,
}

impl ShipOrchestrator {
    pub fn new(
        options: ShipOptions,
        platform: Arc<dyn Platform>,
        repo: Arc<dyn LocalRepository>,
        poller: CiPoller,
    ) -> Self {
        Self {
            options,
            platform,
            repo,
            verifier: None,
            scanner: None,
            poller,
        }
    }

    pub fn with_verifier(mut self, verifier: Box<dyn LocalCheck>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_security_scanner(mut self, scanner: Box<dyn LocalCheck>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub async fn run(&self, sink: &mut dyn ProgressSink) -> ShipReport {
        let mut run = Run::new(sink);
        let mut state = ShipState::default();

        let outcome = match self.preflight(&mut state).await {
            Ok(()) => self.run_steps(&mut run, &mut state).await,
            Err(e) => Err(StepFailure::preflight(e)),
        };

        let execution = run.tracker.finish();
        let error = outcome.err().map(|failure| self.diagnose(&failure, &state));

        match &error {
            None => tracing::info!(
                branch = %state.branch,
                merged = state.merged,
                total_ms = execution.total_duration_ms,
                "Ship workflow finished"
            ),
            Some(e) => tracing::warn!(
                branch = %state.branch,
                kind = %e.kind,
                "Ship workflow failed"
            ),
        }

        ShipReport {
            success: error.is_none(),
            data: ShipData {
                merged: state.merged,
                pr_number: state.pr.as_ref().map(|pr| pr.number),
                pr_url: state.pr.map(|pr| pr.url),
                branch: state.branch,
                default_branch: state.default_branch,
                branch_deleted: state.branch_deleted,
                checks: state.checks,
                execution,
            },
            error,
        }
    }

    /// Resolve repository, branch and base before any step is recorded.
    async fn preflight(&self, state: &mut ShipState) -> Result<()> {
        state.repo = match &self.options.repository {
            Some(repo) => repo.clone(),
            None => self.repo.remote_slug().await?,
        };
        state.branch = self.repo.current_branch().await?;
        state.default_branch = match &self.options.base {
            Some(base) => base.clone(),
            None => self.platform.default_branch(&state.repo).await?,
        };

        if state.branch == state.default_branch {
            return Err(AppError::InvalidState(format!(
                "Refusing to ship from {}; check out a feature branch first",
                state.default_branch
            )));
        }

        tracing::info!(
            repo = %state.repo,
            branch = %state.branch,
            base = %state.default_branch,
            "Starting ship workflow"
        );
        Ok(())
    }

    async fn run_steps(
        &self,
        run: &mut Run<'_>,
        state: &mut ShipState,
    ) -> std::result::Result<(), StepFailure> {
        self.local_check(
            run,
            steps::VERIFICATION,
            self.options.skip_verify,
            "--skip-verify",
            "no verification script",
            self.verifier.as_deref(),
            AppError::Verification,
        )
        .await?;

        self.local_check(
            run,
            steps::SECURITY,
            self.options.skip_security,
            "--skip-security",
            "no security script",
            self.scanner.as_deref(),
            AppError::Security,
        )
        .await?;

        run.step(steps::PUSH, self.repo.push(&state.branch)).await?;

        self.open_pull_request(run, state).await?;

        if self.options.skip_ci {
            run.skip(steps::WAIT_CI, "--skip-ci");
        } else {
            self.wait_for_ci(run, state).await?;
        }

        if !self.options.merge {
            run.skip(steps::MERGE, "--no-merge");
            run.skip(steps::CLEANUP, "--no-merge");
            return Ok(());
        }

        let pr_number = state.pr.as_ref().map(|pr| pr.number).unwrap_or_default();
        run.step(steps::MERGE, async {
            let merged = self
                .platform
                .merge_pull_request(&state.repo, pr_number, self.options.merge_method)
                .await?;
            if !merged {
                return Err(AppError::MergeRejected(format!(
                    "GitHub did not merge PR #{pr_number}"
                )));
            }
            Ok(())
        })
        .await?;
        state.merged = true;

        if !self.options.delete_branch {
            run.skip(steps::CLEANUP, "--keep-branch");
            return Ok(());
        }

        run.step(steps::CLEANUP, async {
            self.repo.switch_branch(&state.default_branch).await?;
            self.repo.delete_local_branch(&state.branch).await?;
            if !self.repo.delete_remote_branch(&state.branch).await? {
                tracing::debug!(branch = %state.branch, "Remote branch was already gone");
            }
            Ok(())
        })
        .await?;
        state.branch_deleted = true;

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn local_check(
        &self,
        run: &mut Run<'_>,
        name: &'static str,
        skipped: bool,
        skip_flag: &str,
        missing_reason: &str,
        check: Option<&dyn LocalCheck>,
        to_error: fn(String) -> AppError,
    ) -> std::result::Result<(), StepFailure> {
        if skipped {
            run.skip(name, skip_flag);
            return Ok(());
        }
        let Some(check) = check else {
            run.skip(name, missing_reason);
            return Ok(());
        };

        run.step(name, async {
            let output = check.run().await?;
            if output.ok {
                Ok(())
            } else {
                Err(to_error(format!(
                    "`{}` exited with a failure\n{}",
                    check.label(),
                    output.tail(SCRIPT_OUTPUT_TAIL)
                )))
            }
        })
        .await
    }

    async fn open_pull_request(
        &self,
        run: &mut Run<'_>,
        state: &mut ShipState,
    ) -> std::result::Result<(), StepFailure> {
        let existing = match self
            .platform
            .find_open_pull_request(&state.repo, &state.branch)
            .await
        {
            Ok(existing) => existing,
            Err(e) => {
                let handle = run.begin(steps::CREATE_PR);
                return run.end(handle, steps::CREATE_PR, Err(e));
            }
        };

        let (pr, reused) = match existing {
            Some(pr) => {
                tracing::info!(pr = pr.number, "Reusing open pull request");
                run.skip(steps::CREATE_PR, "existing PR");
                (pr, true)
            }
            None => {
                let request = CreatePullRequest {
                    title: self
                        .options
                        .title
                        .clone()
                        .unwrap_or_else(|| state.branch.clone()),
                    body: self.options.body.clone().unwrap_or_default(),
                    head_branch: state.branch.clone(),
                    base_branch: state.default_branch.clone(),
                    draft: self.options.draft,
                };
                let pr = run
                    .step(
                        steps::CREATE_PR,
                        self.platform.create_pull_request(&state.repo, &request),
                    )
                    .await?;
                tracing::info!(pr = pr.number, url = %pr.url, "Opened pull request");
                (pr, false)
            }
        };

        run.sink.emit(ProgressEvent::PullRequest {
            number: pr.number,
            url: pr.url.clone(),
            reused,
        });
        state.pr = Some(pr);
        Ok(())
    }

    async fn wait_for_ci(
        &self,
        run: &mut Run<'_>,
        state: &mut ShipState,
    ) -> std::result::Result<(), StepFailure> {
        let handle = run.begin(steps::WAIT_CI);
        let result = match self.repo.head_sha().await {
            Ok(sha) => {
                let sink = &mut *run.sink;
                let (checks, result) =
                    await_checks(&self.poller, &state.repo, &sha, sink).await;
                state.checks = checks;
                result
            }
            Err(e) => Err(e),
        };
        run.end(handle, steps::WAIT_CI, result)
    }

    fn diagnose(&self, failure: &StepFailure, state: &ShipState) -> ClassifiedError {
        diagnose(
            failure,
            state.pr.as_ref().map(|pr| pr.url.clone()),
            self.poller.options().timeout.as_secs(),
        )
    }
}

fn diagnose(
    failure: &StepFailure,
    pr_url: Option<String>,
    ci_timeout_secs: u64,
) -> ClassifiedError {
    let skip_flag = match failure.step {
        Some(steps::VERIFICATION) => Some("--skip-verify"),
        Some(steps::SECURITY) => Some("--skip-security"),
        Some(steps::WAIT_CI) => Some("--skip-ci"),
        _ => None,
    };
    let failed_checks = match &failure.error {
        AppError::ChecksFailed { failed } => failed.clone(),
        _ => Vec::new(),
    };
    let context = SuggestionContext {
        skip_flag,
        failed_checks,
        pr_url,
        ci_timeout_secs: Some(ci_timeout_secs),
    };

    let classified = ClassifiedError::from_error(&failure.error);
    let suggestion = suggest(classified.kind, &context);
    classified.with_suggestion(suggestion)
}

/// Wait for CI on `git_ref` and turn the resolved state into a summary plus
/// a step result.
async fn await_checks(
    poller: &CiPoller,
    repo: &str,
    git_ref: &str,
    sink: &mut dyn ProgressSink,
) -> (Option<CheckSummary>, Result<()>) {
    let resolved = poller
        .wait_for_checks(repo, git_ref, &mut |progress| {
            sink.emit(ProgressEvent::Ci(progress))
        })
        .await;

    match resolved {
        Ok(ResolvedState::Success {
            aggregate,
            no_checks_configured,
        }) => (
            Some(CheckSummary::from_aggregate(&aggregate, no_checks_configured)),
            Ok(()),
        ),
        Ok(ResolvedState::Failure { aggregate }) => (
            Some(CheckSummary::from_aggregate(&aggregate, false)),
            Err(AppError::ChecksFailed {
                failed: aggregate.failed_names(),
            }),
        ),
        Ok(ResolvedState::TimedOut { last, elapsed }) => {
            let error = AppError::CiTimeout {
                elapsed_secs: elapsed.as_secs(),
                pending: last.as_ref().map(|a| a.pending).unwrap_or_default(),
                total: last.as_ref().map(|a| a.total).unwrap_or_default(),
            };
            (
                last.map(|a| CheckSummary::from_aggregate(&a, false)),
                Err(error),
            )
        }
        Err(e) => (None, Err(e)),
    }
}

/// Run only the CI wait against `git_ref`, as `shipflow wait` does.
pub async fn wait_for_ref(
    poller: &CiPoller,
    repo: &str,
    git_ref: &str,
    sink: &mut dyn ProgressSink,
) -> WaitReport {
    let mut run = Run::new(sink);
    let handle = run.begin(steps::WAIT_CI);
    let (checks, result) = await_checks(poller, repo, git_ref, &mut *run.sink).await;
    let outcome = run.end(handle, steps::WAIT_CI, result);
    let execution = run.tracker.finish();

    let error = outcome
        .err()
        .map(|failure| diagnose(&failure, None, poller.options().timeout.as_secs()));

    WaitReport {
        success: error.is_none(),
        data: WaitData {
            git_ref: git_ref.to_string(),
            checks,
            execution,
        },
        error,
    }
}
