use async_trait::async_trait;
use octocrab::Octocrab;
use serde::Serialize;
use serde_json::json;

use crate::config::{GitHubConfig, MergeMethod};
use crate::error::{AppError, Result};
use crate::platform::types::*;
use crate::platform::Platform;

use super::mapper;

pub struct GitHubPlatform {
    client: Octocrab,
}

#[derive(Serialize)]
struct ListPullsQuery<'a> {
    state: &'a str,
    head: &'a str,
    per_page: u8,
}

#[derive(Serialize)]
struct PageQuery {
    per_page: u8,
    page: u32,
}

const PAGE_SIZE: u8 = 100;

/// Upper bound on pages fetched per listing (1000 entries).
const MAX_PAGES: u32 = 10;

impl GitHubPlatform {
    /// Walk a paged check listing until `total_count` entries are collected.
    async fn fetch_paged_checks(
        &self,
        route: &str,
        list_key: &str,
        map: fn(&serde_json::Value) -> Vec<CheckRun>,
    ) -> Result<Vec<CheckRun>> {
        let mut checks = Vec::new();
        for page in 1..=MAX_PAGES {
            let response: serde_json::Value = self
                .client
                .get(
                    route,
                    Some(&PageQuery {
                        per_page: PAGE_SIZE,
                        page,
                    }),
                )
                .await?;
            checks.extend(map(&response));

            if !mapper::has_more_pages(&response, list_key, checks.len()) {
                break;
            }
            if page == MAX_PAGES {
                tracing::warn!(
                    route,
                    collected = checks.len(),
                    "Check listing truncated at page limit"
                );
            }
        }
        Ok(checks)
    }

    pub fn new(config: &GitHubConfig, token: String) -> Result<Self> {
        let mut builder = Octocrab::builder().personal_token(token);
        if let Some(api_url) = &config.api_url {
            builder = builder
                .base_uri(api_url.as_str())
                .map_err(|e| AppError::Config(format!("Invalid github.api_url {api_url}: {e}")))?;
        }

        let client = builder.build().map_err(|e| AppError::GitHubApi {
            status: None,
            message: format!("Failed to build octocrab client: {e}"),
        })?;

        Ok(Self { client })
    }

    fn parse_repo(repo_full_name: &str) -> Result<(&str, &str)> {
        let parts: Vec<&str> = repo_full_name.splitn(2, '/').collect();
        if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(AppError::Config(format!(
                "Invalid repo name: {repo_full_name}"
            )));
        }
        Ok((parts[0], parts[1]))
    }
}

#[async_trait]
impl Platform for GitHubPlatform {
    async fn default_branch(&self, repo_full_name: &str) -> Result<String> {
        let (owner, repo) = Self::parse_repo(repo_full_name)?;

        let response: serde_json::Value = self
            .client
            .get(format!("/repos/{owner}/{repo}"), None::<&()>)
            .await?;

        Ok(response["default_branch"]
            .as_str()
            .unwrap_or("main")
            .to_string())
    }

    async fn find_open_pull_request(
        &self,
        repo_full_name: &str,
        head_branch: &str,
    ) -> Result<Option<PullRequest>> {
        let (owner, repo) = Self::parse_repo(repo_full_name)?;
        let head = format!("{owner}:{head_branch}");

        let pulls: Vec<serde_json::Value> = self
            .client
            .get(
                format!("/repos/{owner}/{repo}/pulls"),
                Some(&ListPullsQuery {
                    state: "open",
                    head: &head,
                    per_page: 1,
                }),
            )
            .await?;

        pulls.first().map(mapper::map_pull_request).transpose()
    }

    async fn create_pull_request(
        &self,
        repo_full_name: &str,
        pr: &CreatePullRequest,
    ) -> Result<PullRequest> {
        let (owner, repo) = Self::parse_repo(repo_full_name)?;

        let created: serde_json::Value = self
            .client
            .post(
                format!("/repos/{owner}/{repo}/pulls"),
                Some(&json!({
                    "title": pr.title,
                    "body": pr.body,
                    "head": pr.head_branch,
                    "base": pr.base_branch,
                    "draft": pr.draft,
                })),
            )
            .await?;

        mapper::map_pull_request(&created)
    }

    async fn fetch_check_aggregate(
        &self,
        repo_full_name: &str,
        git_ref: &str,
    ) -> Result<CheckAggregate> {
        let (owner, repo) = Self::parse_repo(repo_full_name)?;
        let encoded_ref = urlencoding::encode(git_ref);

        let mut checks = self
            .fetch_paged_checks(
                &format!("/repos/{owner}/{repo}/commits/{encoded_ref}/check-runs"),
                "check_runs",
                mapper::map_check_runs,
            )
            .await?;

        // Legacy commit statuses (external CI services) live on a separate endpoint
        checks.extend(
            self.fetch_paged_checks(
                &format!("/repos/{owner}/{repo}/commits/{encoded_ref}/status"),
                "statuses",
                mapper::map_commit_statuses,
            )
            .await?,
        );

        tracing::debug!(
            repo = repo_full_name,
            git_ref,
            checks = checks.len(),
            "Fetched check status"
        );

        Ok(CheckAggregate::from_checks(checks))
    }

    async fn merge_pull_request(
        &self,
        repo_full_name: &str,
        pr_number: u64,
        method: MergeMethod,
    ) -> Result<bool> {
        let (owner, repo) = Self::parse_repo(repo_full_name)?;

        let response: std::result::Result<serde_json::Value, AppError> = self
            .client
            .put(
                format!("/repos/{owner}/{repo}/pulls/{pr_number}/merge"),
                Some(&json!({ "merge_method": method.as_str() })),
            )
            .await
            .map_err(AppError::from);

        match response {
            Ok(body) => Ok(body["merged"].as_bool().unwrap_or(false)),
            // 405: not mergeable, 409: head moved since the checks ran
            Err(AppError::GitHubApi {
                status: Some(405 | 409),
                message,
            }) => Err(AppError::MergeRejected(message)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repo() {
        assert_eq!(
            GitHubPlatform::parse_repo("acme/widgets").unwrap(),
            ("acme", "widgets")
        );
        assert!(GitHubPlatform::parse_repo("widgets").is_err());
        assert!(GitHubPlatform::parse_repo("/widgets").is_err());
    }
}
