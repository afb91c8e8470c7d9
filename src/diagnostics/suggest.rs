use super::classifier::ErrorKind;

/// Contextual fields that sharpen a remediation hint.
#[derive(Debug, Clone, Default)]
pub struct SuggestionContext {
    /// CLI flag that bypasses the failed phase, e.g. `--skip-verify`.
    pub skip_flag: Option<&'static str>,
    pub failed_checks: Vec<String>,
    pub pr_url: Option<String>,
    pub ci_timeout_secs: Option<u64>,
}

/// Remediation text for a failure kind. `None` is a valid answer.
pub fn suggest(kind: ErrorKind, context: &SuggestionContext) -> Option<String> {
    match kind {
        ErrorKind::AuthFailure => Some(
            "Check that GITHUB_TOKEN (or github.token) is set and grants repo access, \
             and that your git credentials can push to origin."
                .to_string(),
        ),
        ErrorKind::NetworkFailure => Some(
            "Check your network connection and GitHub's status, then re-run the same command."
                .to_string(),
        ),
        ErrorKind::CheckFailure => {
            let mut text = if context.failed_checks.is_empty() {
                "Fix the failing CI checks, push again and re-run.".to_string()
            } else {
                format!(
                    "Fix the failing CI checks ({}), push again and re-run.",
                    context.failed_checks.join(", ")
                )
            };
            if let Some(url) = &context.pr_url {
                text.push_str(&format!(" Details: {url}"));
            }
            Some(text)
        }
        ErrorKind::VerificationFailure => Some(with_skip_flag(
            "Fix the problems reported by the verification script",
            context.skip_flag,
        )),
        ErrorKind::SecurityFailure => Some(with_skip_flag(
            "Review the findings reported by the security scanner",
            context.skip_flag,
        )),
        ErrorKind::Timeout => Some(match (context.ci_timeout_secs, &context.pr_url) {
            (Some(secs), Some(url)) => format!(
                "CI did not finish within {secs}s. Check {url}, or re-run with a longer --ci-timeout."
            ),
            (Some(secs), None) => format!(
                "CI did not finish within {secs}s. Re-run with a longer --ci-timeout."
            ),
            _ => "CI did not finish in time. Re-run with a longer --ci-timeout.".to_string(),
        }),
        ErrorKind::Unknown => None,
    }
}

fn with_skip_flag(base: &str, skip_flag: Option<&str>) -> String {
    match skip_flag {
        Some(flag) => format!("{base}, or re-run with {flag} to bypass this step."),
        None => format!("{base}."),
    }
}
