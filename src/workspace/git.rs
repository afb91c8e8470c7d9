use std::path::Path;

use git2::{BranchType, Cred, CredentialType, PushOptions, RemoteCallbacks, Repository};

use crate::error::{AppError, Result};

/// Give up after this many credential prompts; libgit2 keeps asking otherwise.
const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

/// Validate a branch name to prevent argument injection.
/// Rejects names starting with `-` as defence in depth.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.is_empty() || name.starts_with('-') {
        return Err(AppError::Git(format!("Invalid branch name: '{name}'")));
    }
    Ok(())
}

/// Extract `owner/name` from a GitHub remote URL (HTTPS, SCP-style or ssh://).
pub fn parse_repo_slug(url: &str) -> Option<String> {
    let path = if let Some(rest) = url.strip_prefix("git@") {
        rest.split_once(':')?.1
    } else {
        let without_scheme = url.split_once("://")?.1;
        without_scheme.split_once('/')?.1
    };

    let path = path.trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let mut parts = path.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
            Some(format!("{owner}/{name}"))
        }
        _ => None,
    }
}

/// Build `PushOptions` that authenticate via credential callback.
///
/// A token is offered for HTTPS remotes; SSH remotes go through the agent;
/// anything else falls back to the configured git credential helper.
fn make_push_options(token: Option<&str>, config: git2::Config) -> PushOptions<'_> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0u32;
    callbacks.credentials(move |url, username_from_url, allowed_types| {
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::from_str(
                "authentication failed: credentials were rejected",
            ));
        }
        if let Some(token) = token {
            if allowed_types.contains(CredentialType::USER_PASS_PLAINTEXT) {
                return Cred::userpass_plaintext("x-access-token", token);
            }
        }
        if allowed_types.contains(CredentialType::SSH_KEY) {
            return Cred::ssh_key_from_agent(username_from_url.unwrap_or("git"));
        }
        Cred::credential_helper(&config, url, username_from_url)
    });
    callbacks.push_update_reference(|refname, status| match status {
        Some(message) => Err(git2::Error::from_str(&format!(
            "remote rejected {refname}: {message}"
        ))),
        None => Ok(()),
    });

    let mut opts = PushOptions::new();
    opts.remote_callbacks(callbacks);
    opts
}

fn push_refspec(dir: &Path, refspec: &str, token: Option<&str>) -> Result<()> {
    let repo = Repository::open(dir)?;
    let mut remote = repo.find_remote("origin")?;
    let mut push_opts = make_push_options(token, repo.config()?);
    remote.push(&[refspec], Some(&mut push_opts))?;
    Ok(())
}

/// Name of the checked-out branch. Fails on a detached HEAD.
pub async fn current_branch(dir: &Path) -> Result<String> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let head = repo.head()?;
        if !head.is_branch() {
            return Err(AppError::InvalidState(
                "HEAD is detached; check out the branch to ship".to_string(),
            ));
        }
        head.shorthand()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::Git("Branch name is not valid UTF-8".to_string()))
    })
    .await
    .map_err(|e| AppError::Git(format!("Current-branch task panicked: {e}")))?
}

/// Full SHA of the commit at HEAD.
pub async fn head_sha(dir: &Path) -> Result<String> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let commit = repo.head()?.peel_to_commit()?;
        Ok(commit.id().to_string())
    })
    .await
    .map_err(|e| AppError::Git(format!("Head-sha task panicked: {e}")))?
}

/// URL of the `origin` remote.
pub async fn origin_url(dir: &Path) -> Result<String> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let remote = repo.find_remote("origin")?;
        remote
            .url()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::Git("Remote 'origin' has no URL".to_string()))
    })
    .await
    .map_err(|e| AppError::Git(format!("Origin-url task panicked: {e}")))?
}

/// Push the branch to origin.
pub async fn push(dir: &Path, branch_name: &str, token: Option<&str>) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let refspec = format!("refs/heads/{branch_name}:refs/heads/{branch_name}");
    let token = token.map(|t| t.to_string());

    tokio::task::spawn_blocking(move || push_refspec(&dir, &refspec, token.as_deref()))
        .await
        .map_err(|e| AppError::Git(format!("Push task panicked: {e}")))?
}

/// Delete the branch on origin.
pub async fn delete_remote_branch(dir: &Path, branch_name: &str, token: Option<&str>) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let refspec = format!(":refs/heads/{branch_name}");
    let token = token.map(|t| t.to_string());

    tokio::task::spawn_blocking(move || push_refspec(&dir, &refspec, token.as_deref()))
        .await
        .map_err(|e| AppError::Git(format!("Delete-remote-branch task panicked: {e}")))?
}

/// Checkout a branch, creating it from `origin/<branch>` when it only exists remotely.
pub async fn switch_branch(dir: &Path, branch_name: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let local_ref = format!("refs/heads/{branch_name}");

        if repo.find_reference(&local_ref).is_err() {
            let remote_ref = repo
                .find_reference(&format!("refs/remotes/origin/{branch_name}"))
                .map_err(|_| {
                    AppError::Git(format!(
                        "Branch {branch_name} exists neither locally nor on origin"
                    ))
                })?;
            let commit = remote_ref.peel_to_commit()?;
            repo.branch(&branch_name, &commit, false)?;
        }

        let obj = repo.revparse_single(&local_ref)?;
        repo.checkout_tree(&obj, None)?;
        repo.set_head(&local_ref)?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Switch-branch task panicked: {e}")))?
}

/// Delete a local branch. The branch must not be checked out.
pub async fn delete_local_branch(dir: &Path, branch_name: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut branch = repo.find_branch(&branch_name, BranchType::Local)?;
        branch.delete()?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Delete-branch task panicked: {e}")))?
}
