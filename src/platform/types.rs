use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub head_branch: String,
    pub base_branch: String,
}

#[derive(Debug, Clone)]
pub struct CreatePullRequest {
    pub title: String,
    pub body: String,
    pub head_branch: String,
    pub base_branch: String,
    pub draft: bool,
}

/// Outcome of a single check as reported by the hosting platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Passed,
    Failed,
    Pending,
}

/// One CI job or commit status attached to a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub outcome: CheckOutcome,
    pub details_url: Option<String>,
}

/// Derived state of a [`CheckAggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateState {
    Success,
    Failure,
    Pending,
    /// No checks registered yet; may be a registration race.
    UnknownEmpty,
}

/// Pass/fail/pending tally across all checks for one commit at one instant.
///
/// `passed + failed + pending == total` always holds because the counts are
/// only ever derived from the check list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAggregate {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub pending: u32,
    #[serde(skip)]
    pub checks: Vec<CheckRun>,
}

impl CheckAggregate {
    pub fn from_checks(checks: Vec<CheckRun>) -> Self {
        let count = |outcome| checks.iter().filter(|c| c.outcome == outcome).count() as u32;
        Self {
            total: checks.len() as u32,
            passed: count(CheckOutcome::Passed),
            failed: count(CheckOutcome::Failed),
            pending: count(CheckOutcome::Pending),
            checks,
        }
    }

    pub fn state(&self) -> AggregateState {
        if self.total == 0 {
            AggregateState::UnknownEmpty
        } else if self.failed > 0 {
            AggregateState::Failure
        } else if self.pending > 0 {
            AggregateState::Pending
        } else {
            AggregateState::Success
        }
    }

    pub fn failed_checks(&self) -> Vec<&CheckRun> {
        self.checks
            .iter()
            .filter(|c| c.outcome == CheckOutcome::Failed)
            .collect()
    }

    pub fn failed_names(&self) -> Vec<String> {
        self.failed_checks()
            .into_iter()
            .map(|c| c.name.clone())
            .collect()
    }
}
