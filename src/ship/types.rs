use serde::Serialize;

use crate::config::{AppConfig, MergeMethod};
use crate::diagnostics::{suggest, ClassifiedError, SuggestionContext};
use crate::error::AppError;
use crate::execution::{ExecutionSummary, ExecutionTracker};
use crate::platform::types::CheckAggregate;

/// Step names recorded in the execution log.
pub mod steps {
    pub const VERIFICATION: &str = "verification";
    pub const SECURITY: &str = "security";
    pub const PUSH: &str = "push";
    pub const CREATE_PR: &str = "create-pr";
    pub const WAIT_CI: &str = "wait-ci";
    pub const MERGE: &str = "merge";
    pub const CLEANUP: &str = "cleanup";
}

/// Workflow switches, merged from config and CLI flags.
#[derive(Debug, Clone)]
pub struct ShipOptions {
    pub skip_verify: bool,
    pub skip_security: bool,
    pub skip_ci: bool,
    pub merge: bool,
    pub merge_method: MergeMethod,
    pub delete_branch: bool,
    pub draft: bool,
    /// Overrides the repository's default branch as PR base.
    pub base: Option<String>,
    /// `owner/name`; derived from the origin remote when absent.
    pub repository: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
}

impl Default for ShipOptions {
    fn default() -> Self {
        Self {
            skip_verify: false,
            skip_security: false,
            skip_ci: false,
            merge: true,
            merge_method: MergeMethod::Squash,
            delete_branch: true,
            draft: false,
            base: None,
            repository: None,
            title: None,
            body: None,
        }
    }
}

impl From<&AppConfig> for ShipOptions {
    fn from(config: &AppConfig) -> Self {
        let ship = &config.ship;
        Self {
            skip_verify: ship.skip_verify,
            skip_security: ship.skip_security,
            skip_ci: ship.skip_ci,
            merge: ship.merge,
            merge_method: ship.merge_method,
            delete_branch: ship.delete_branch,
            draft: ship.draft,
            base: ship.base.clone(),
            repository: config.github.repository.clone(),
            title: ship.title.clone(),
            body: ship.body.clone(),
        }
    }
}

/// Final check tally of a resolved CI wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSummary {
    pub passed: u32,
    pub failed: u32,
    pub pending: u32,
    pub total: u32,
    pub no_checks_configured: bool,
}

impl CheckSummary {
    pub fn from_aggregate(aggregate: &CheckAggregate, no_checks_configured: bool) -> Self {
        Self {
            passed: aggregate.passed,
            failed: aggregate.failed,
            pending: aggregate.pending,
            total: aggregate.total,
            no_checks_configured,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipData {
    pub merged: bool,
    pub pr_number: Option<u64>,
    pub pr_url: Option<String>,
    pub branch: String,
    pub default_branch: String,
    pub branch_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<CheckSummary>,
    pub execution: ExecutionSummary,
}

/// Machine-readable result of `shipflow ship`.
#[derive(Debug, Clone, Serialize)]
pub struct ShipReport {
    pub success: bool,
    pub data: ShipData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ClassifiedError>,
}

impl ShipReport {
    /// Report for a run that failed before the workflow started, e.g. on
    /// missing credentials or an unreadable config file.
    pub fn failed_before_start(error: &AppError) -> Self {
        Self {
            success: false,
            data: ShipData {
                merged: false,
                pr_number: None,
                pr_url: None,
                branch: String::new(),
                default_branch: String::new(),
                branch_deleted: false,
                checks: None,
                execution: ExecutionTracker::new().finish(),
            },
            error: Some(classify_setup_error(error)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitData {
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<CheckSummary>,
    pub execution: ExecutionSummary,
}

/// Machine-readable result of `shipflow wait`.
#[derive(Debug, Clone, Serialize)]
pub struct WaitReport {
    pub success: bool,
    pub data: WaitData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ClassifiedError>,
}

impl WaitReport {
    /// Report for a wait that failed before polling started.
    pub fn failed_before_start(git_ref: Option<&str>, error: &AppError) -> Self {
        Self {
            success: false,
            data: WaitData {
                git_ref: git_ref.unwrap_or_default().to_string(),
                checks: None,
                execution: ExecutionTracker::new().finish(),
            },
            error: Some(classify_setup_error(error)),
        }
    }
}

fn classify_setup_error(error: &AppError) -> ClassifiedError {
    let classified = ClassifiedError::from_error(error);
    let suggestion = suggest(classified.kind, &SuggestionContext::default());
    classified.with_suggestion(suggestion)
}
