use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

/// Terminal status of a workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Skipped,
    Failed,
}

/// One entry of the execution log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    pub name: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Frozen execution log emitted once at workflow end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub steps: Vec<ExecutionStep>,
    pub total_duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Handle to a started step, used to finalize it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepHandle(usize);

#[derive(Debug)]
struct TrackedStep {
    name: String,
    /// `None` while the step is in progress.
    status: Option<StepStatus>,
    started: Option<Instant>,
    duration_ms: Option<u64>,
    reason: Option<String>,
}

/// Append-only log of workflow steps.
///
/// Steps appear in the order they were started or skipped. A step only ever
/// moves from in-progress to one terminal status; later attempts to finalize
/// it again are ignored.
#[derive(Debug)]
pub struct ExecutionTracker {
    started_at: DateTime<Utc>,
    started: Instant,
    steps: Vec<TrackedStep>,
    summary: Option<ExecutionSummary>,
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
            steps: Vec::new(),
            summary: None,
        }
    }

    pub fn start_step(&mut self, name: &str) -> StepHandle {
        tracing::debug!(step = name, "Step started");
        self.steps.push(TrackedStep {
            name: name.to_string(),
            status: None,
            started: Some(Instant::now()),
            duration_ms: None,
            reason: None,
        });
        StepHandle(self.steps.len() - 1)
    }

    pub fn complete_step(&mut self, handle: StepHandle) -> Option<u64> {
        self.finalize(handle, StepStatus::Completed, None)
    }

    pub fn fail_step(&mut self, handle: StepHandle, reason: &str) -> Option<u64> {
        self.finalize(handle, StepStatus::Failed, Some(reason.to_string()))
    }

    pub fn skip_step(&mut self, name: &str, reason: &str) {
        tracing::debug!(step = name, reason, "Step skipped");
        self.steps.push(TrackedStep {
            name: name.to_string(),
            status: Some(StepStatus::Skipped),
            started: None,
            duration_ms: None,
            reason: Some(reason.to_string()),
        });
    }

    /// Freeze the log. Calling it again returns the same summary.
    ///
    /// Steps still in progress are recorded as failed.
    pub fn finish(&mut self) -> ExecutionSummary {
        if let Some(summary) = &self.summary {
            return summary.clone();
        }

        let open: Vec<StepHandle> = self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status.is_none())
            .map(|(i, _)| StepHandle(i))
            .collect();
        for handle in open {
            self.fail_step(handle, "interrupted before completion");
        }

        // Overlapping steps can sum past the wall clock; the total never reports less.
        let step_sum: u64 = self.steps.iter().filter_map(|s| s.duration_ms).sum();
        let total_duration_ms = (self.started.elapsed().as_millis() as u64).max(step_sum);
        let completed_at = self.started_at
            + chrono::Duration::milliseconds(i64::try_from(total_duration_ms).unwrap_or(i64::MAX));

        let summary = ExecutionSummary {
            steps: self
                .steps
                .iter()
                .map(|s| ExecutionStep {
                    name: s.name.clone(),
                    // every step is terminal after the loop above
                    status: s.status.unwrap_or(StepStatus::Failed),
                    duration_ms: s.duration_ms,
                    reason: s.reason.clone(),
                })
                .collect(),
            total_duration_ms,
            started_at: self.started_at,
            completed_at,
        };

        self.summary = Some(summary.clone());
        summary
    }

    fn finalize(
        &mut self,
        handle: StepHandle,
        status: StepStatus,
        reason: Option<String>,
    ) -> Option<u64> {
        if self.summary.is_some() {
            tracing::debug!("Ignoring step update after finish");
            return None;
        }

        let step = self.steps.get_mut(handle.0)?;
        if step.status.is_some() {
            tracing::debug!(step = %step.name, "Step already finalized");
            return None;
        }

        let duration_ms = step
            .started
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or(0);
        step.status = Some(status);
        step.duration_ms = Some(duration_ms);
        step.reason = reason;

        tracing::debug!(step = %step.name, ?status, duration_ms, "Step finished");
        Some(duration_ms)
    }
}
