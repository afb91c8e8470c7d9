use serde_json::Value;

use crate::error::{AppError, Result};
use crate::platform::types::{CheckOutcome, CheckRun, PullRequest};

/// Map a REST pull request object to our platform type.
pub fn map_pull_request(pr: &Value) -> Result<PullRequest> {
    let number = pr["number"]
        .as_u64()
        .ok_or_else(|| AppError::GitHubApi {
            status: None,
            message: "Pull request response has no number".to_string(),
        })?;

    Ok(PullRequest {
        number,
        url: pr["html_url"].as_str().unwrap_or_default().to_string(),
        head_branch: pr["head"]["ref"].as_str().unwrap_or_default().to_string(),
        base_branch: pr["base"]["ref"].as_str().unwrap_or_default().to_string(),
    })
}

/// Map the `check_runs` array of a `/commits/{ref}/check-runs` response.
pub fn map_check_runs(response: &Value) -> Vec<CheckRun> {
    response["check_runs"]
        .as_array()
        .map(|runs| {
            runs.iter()
                .map(|run| CheckRun {
                    name: run["name"].as_str().unwrap_or("unknown").to_string(),
                    outcome: check_run_outcome(
                        run["status"].as_str().unwrap_or(""),
                        run["conclusion"].as_str(),
                    ),
                    details_url: run["details_url"]
                        .as_str()
                        .or_else(|| run["html_url"].as_str())
                        .map(|s| s.to_string()),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Whether a paged listing reports more entries than the `collected` so far.
/// An empty page always ends the listing.
pub fn has_more_pages(response: &Value, list_key: &str, collected: usize) -> bool {
    let page_len = response[list_key].as_array().map_or(0, Vec::len);
    let total = response["total_count"].as_u64().unwrap_or(0);
    page_len > 0 && (collected as u64) < total
}

/// Map the `statuses` array of a `/commits/{ref}/status` response.
pub fn map_commit_statuses(response: &Value) -> Vec<CheckRun> {
    response["statuses"]
        .as_array()
        .map(|statuses| {
            statuses
                .iter()
                .map(|status| CheckRun {
                    name: status["context"].as_str().unwrap_or("unknown").to_string(),
                    outcome: commit_status_outcome(status["state"].as_str().unwrap_or("")),
                    details_url: status["target_url"].as_str().map(|s| s.to_string()),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn check_run_outcome(status: &str, conclusion: Option<&str>) -> CheckOutcome {
    if status != "completed" {
        return CheckOutcome::Pending;
    }
    match conclusion {
        Some("success") | Some("neutral") | Some("skipped") => CheckOutcome::Passed,
        Some(_) => CheckOutcome::Failed,
        None => CheckOutcome::Pending,
    }
}

fn commit_status_outcome(state: &str) -> CheckOutcome {
    match state {
        "success" => CheckOutcome::Passed,
        "failure" | "error" => CheckOutcome::Failed,
        _ => CheckOutcome::Pending,
    }
}
