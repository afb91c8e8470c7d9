pub mod github;
pub mod types;

use async_trait::async_trait;

use crate::config::MergeMethod;
use crate::error::Result;
use types::*;

#[async_trait]
pub trait Platform: Send + Sync {
    /// Name of the repository's default branch.
    async fn default_branch(&self, repo_full_name: &str) -> Result<String>;

    /// Find an open pull request whose head is `head_branch`.
    async fn find_open_pull_request(
        &self,
        repo_full_name: &str,
        head_branch: &str,
    ) -> Result<Option<PullRequest>>;

    /// Create a pull request.
    async fn create_pull_request(
        &self,
        repo_full_name: &str,
        pr: &CreatePullRequest,
    ) -> Result<PullRequest>;

    /// Fetch the combined check-run and commit-status tally for a ref.
    async fn fetch_check_aggregate(
        &self,
        repo_full_name: &str,
        git_ref: &str,
    ) -> Result<CheckAggregate>;

    /// Merge a pull request. Returns whether the platform reports it merged.
    async fn merge_pull_request(
        &self,
        repo_full_name: &str,
        pr_number: u64,
        method: MergeMethod,
    ) -> Result<bool>;
}
