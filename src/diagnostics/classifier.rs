use serde::Serialize;

use crate::error::AppError;

/// Closed taxonomy of workflow failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    AuthFailure,
    NetworkFailure,
    CheckFailure,
    VerificationFailure,
    SecurityFailure,
    Timeout,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthFailure => "auth-failure",
            ErrorKind::NetworkFailure => "network-failure",
            ErrorKind::CheckFailure => "check-failure",
            ErrorKind::VerificationFailure => "verification-failure",
            ErrorKind::SecurityFailure => "security-failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure mapped onto the taxonomy, with the original text kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    #[serde(rename = "message")]
    pub raw_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ClassifiedError {
    pub fn from_error(error: &AppError) -> Self {
        Self {
            kind: classify(error),
            raw_message: error.to_string(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: Option<String>) -> Self {
        self.suggestion = suggestion;
        self
    }
}

const AUTH_MARKERS: &[&str] = &[
    "bad credentials",
    "authentication",
    "unauthorized",
    "could not read username",
    "permission denied",
    "requires authentication",
    "no github token",
    "invalid token",
];

const NETWORK_MARKERS: &[&str] = &[
    "rate limit",
    "could not resolve host",
    "failed to resolve address",
    "connection refused",
    "connection reset",
    "network is unreachable",
    "timed out",
    "operation timed out",
    "broken pipe",
    "dns error",
    "tls handshake",
];

/// Map a workflow error onto the taxonomy. Never fails; unmatched errors are `Unknown`.
pub fn classify(error: &AppError) -> ErrorKind {
    match error {
        AppError::Verification(_) => ErrorKind::VerificationFailure,
        AppError::Security(_) => ErrorKind::SecurityFailure,
        AppError::ChecksFailed { .. } => ErrorKind::CheckFailure,
        AppError::CiTimeout { .. } => ErrorKind::Timeout,
        AppError::Network(_) => ErrorKind::NetworkFailure,
        AppError::GitHubApi { status, message } => classify_status(*status, message),
        AppError::Io(e) => match e.kind() {
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected => ErrorKind::NetworkFailure,
            std::io::ErrorKind::PermissionDenied => ErrorKind::AuthFailure,
            _ => classify_message(&e.to_string()),
        },
        AppError::Git(message) | AppError::Internal(message) => classify_message(message),
        AppError::Config(message) if message.to_ascii_lowercase().contains("token") => {
            ErrorKind::AuthFailure
        }
        AppError::Config(_)
        | AppError::MergeRejected(_)
        | AppError::InvalidState(_)
        | AppError::Serialization(_) => ErrorKind::Unknown,
    }
}

fn classify_status(status: Option<u16>, message: &str) -> ErrorKind {
    let lowered = message.to_ascii_lowercase();
    match status {
        // GitHub reports exhausted rate limits as 403
        Some(403 | 429) if lowered.contains("rate limit") => ErrorKind::NetworkFailure,
        Some(401 | 403) => ErrorKind::AuthFailure,
        Some(408 | 429) => ErrorKind::NetworkFailure,
        Some(s) if s >= 500 => ErrorKind::NetworkFailure,
        _ => classify_message(message),
    }
}

/// Map raw failure text onto the taxonomy by well-known substrings.
pub fn classify_message(message: &str) -> ErrorKind {
    let lowered = message.to_ascii_lowercase();
    if NETWORK_MARKERS.iter().any(|m| lowered.contains(m)) {
        ErrorKind::NetworkFailure
    } else if AUTH_MARKERS.iter().any(|m| lowered.contains(m)) {
        ErrorKind::AuthFailure
    } else {
        ErrorKind::Unknown
    }
}
