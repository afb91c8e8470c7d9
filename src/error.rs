use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("GitHub API error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    GitHubApi {
        status: Option<u16>,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Security scan failed: {0}")]
    Security(String),

    #[error("CI checks failed: {}", .failed.join(", "))]
    ChecksFailed { failed: Vec<String> },

    #[error("CI checks did not resolve within {elapsed_secs}s ({pending} of {total} still pending)")]
    CiTimeout {
        elapsed_secs: u64,
        pending: u32,
        total: u32,
    },

    #[error("Merge rejected: {0}")]
    MergeRejected(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Network(_) => true,
            AppError::GitHubApi {
                status: Some(status),
                ..
            } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<octocrab::Error> for AppError {
    fn from(e: octocrab::Error) -> Self {
        match e {
            octocrab::Error::GitHub { source, .. } => AppError::GitHubApi {
                status: Some(source.status_code.as_u16()),
                message: source.message,
            },
            transport @ (octocrab::Error::Hyper { .. } | octocrab::Error::Service { .. }) => {
                AppError::Network(transport.to_string())
            }
            other => AppError::GitHubApi {
                status: None,
                message: other.to_string(),
            },
        }
    }
}

impl From<git2::Error> for AppError {
    fn from(e: git2::Error) -> Self {
        AppError::Git(e.message().to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
