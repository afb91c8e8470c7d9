use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::workspace::git;

/// Local git operations the ship workflow needs.
#[async_trait]
pub trait LocalRepository: Send + Sync {
    async fn current_branch(&self) -> Result<String>;

    async fn head_sha(&self) -> Result<String>;

    /// `owner/name` of the `origin` remote.
    async fn remote_slug(&self) -> Result<String>;

    async fn push(&self, branch: &str) -> Result<()>;

    async fn switch_branch(&self, branch: &str) -> Result<()>;

    async fn delete_local_branch(&self, branch: &str) -> Result<()>;

    /// Delete the branch on origin. Returns `false` if it was already gone.
    async fn delete_remote_branch(&self, branch: &str) -> Result<bool>;
}

/// `git2`-backed repository at a working-tree path.
pub struct GitRepository {
    path: PathBuf,
    token: Option<String>,
}

impl GitRepository {
    pub fn new(path: impl Into<PathBuf>, token: Option<String>) -> Self {
        Self {
            path: path.into(),
            token,
        }
    }
}

#[async_trait]
impl LocalRepository for GitRepository {
    async fn current_branch(&self) -> Result<String> {
        git::current_branch(&self.path).await
    }

    async fn head_sha(&self) -> Result<String> {
        git::head_sha(&self.path).await
    }

    async fn remote_slug(&self) -> Result<String> {
        let url = git::origin_url(&self.path).await?;
        git::parse_repo_slug(&url).ok_or_else(|| {
            AppError::Config(format!(
                "Cannot derive owner/name from origin URL {url}; set github.repository"
            ))
        })
    }

    async fn push(&self, branch: &str) -> Result<()> {
        tracing::info!(branch, "Pushing branch to origin");
        git::push(&self.path, branch, self.token.as_deref()).await
    }

    async fn switch_branch(&self, branch: &str) -> Result<()> {
        git::switch_branch(&self.path, branch).await
    }

    async fn delete_local_branch(&self, branch: &str) -> Result<()> {
        git::delete_local_branch(&self.path, branch).await
    }

    async fn delete_remote_branch(&self, branch: &str) -> Result<bool> {
        match git::delete_remote_branch(&self.path, branch, self.token.as_deref()).await {
            Ok(()) => Ok(true),
            // The host may already have removed the head branch on merge
            Err(AppError::Git(message))
                if message.contains("does not exist") || message.contains("not found") =>
            {
                tracing::debug!(branch, "Remote branch already deleted");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
