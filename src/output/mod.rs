pub mod human;

use std::io::Write;

use serde::Serialize;

use crate::ci::PollProgress;
use crate::error::Result;
use crate::ship::types::{ShipReport, WaitReport};

/// Rendering mode, fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// Incremental workflow event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    StepStarted {
        name: &'static str,
    },
    StepCompleted {
        name: &'static str,
        duration_ms: u64,
    },
    StepSkipped {
        name: &'static str,
        reason: String,
    },
    StepFailed {
        name: &'static str,
        reason: String,
    },
    PullRequest {
        number: u64,
        url: String,
        reused: bool,
    },
    Ci(PollProgress),
}

/// Receiver of progress events.
pub trait ProgressSink {
    fn emit(&mut self, event: ProgressEvent);
}

/// Final results the formatter knows how to render.
pub trait Report: Serialize {
    fn human_lines(&self) -> Vec<String>;
}

impl Report for ShipReport {
    fn human_lines(&self) -> Vec<String> {
        human::format_ship_report(self)
    }
}

impl Report for WaitReport {
    fn human_lines(&self) -> Vec<String> {
        human::format_wait_report(self)
    }
}

/// Renders progress and the final result, either as text lines or as one JSON document.
///
/// In JSON mode progress is only buffered; the single document is written by
/// [`OutputFormatter::render_result`].
pub struct OutputFormatter<W: Write> {
    mode: OutputMode,
    out: W,
    buffered: Vec<ProgressEvent>,
}

impl<W: Write> OutputFormatter<W> {
    pub fn new(mode: OutputMode, out: W) -> Self {
        Self {
            mode,
            out,
            buffered: Vec::new(),
        }
    }

    pub fn render_progress(&mut self, event: ProgressEvent) {
        match self.mode {
            OutputMode::Human => {
                let line = human::format_progress(&event);
                if let Err(e) = writeln!(self.out, "{line}").and_then(|_| self.out.flush()) {
                    tracing::debug!(error = %e, "Failed to write progress line");
                }
            }
            OutputMode::Json => self.buffered.push(event),
        }
    }

    pub fn render_result<R: Report>(&mut self, report: &R) -> Result<()> {
        match self.mode {
            OutputMode::Human => {
                for line in report.human_lines() {
                    writeln!(self.out, "{line}")?;
                }
            }
            OutputMode::Json => {
                serde_json::to_writer_pretty(&mut self.out, report)?;
                writeln!(self.out)?;
            }
        }
        self.out.flush()?;
        Ok(())
    }

    /// Progress events held back in JSON mode.
    pub fn buffered(&self) -> &[ProgressEvent] {
        &self.buffered
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ProgressSink for OutputFormatter<W> {
    fn emit(&mut self, event: ProgressEvent) {
        self.render_progress(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{ClassifiedError, ErrorKind};
    use crate::execution::ExecutionTracker;
    use crate::ship::types::{CheckSummary, ShipData};

    fn report(success: bool) -> ShipReport {
        let mut tracker = ExecutionTracker::new();
        tracker.skip_step("verification", "--skip-verify");
        tracker.skip_step("security", "--skip-security");
        for name in ["push", "create-pr", "wait-ci", "merge", "cleanup"] {
            let handle = tracker.start_step(name);
            tracker.complete_step(handle);
        }

        ShipReport {
            success,
            data: ShipData {
                merged: success,
                pr_number: Some(123),
                pr_url: Some("https://github.com/acme/widgets/pull/123".to_string()),
                branch: "feature/login".to_string(),
                default_branch: "main".to_string(),
                branch_deleted: success,
                checks: Some(CheckSummary {
                    passed: 0,
                    failed: 0,
                    pending: 0,
                    total: 0,
                    no_checks_configured: true,
                }),
                execution: tracker.finish(),
            },
            error: (!success).then(|| ClassifiedError {
                kind: ErrorKind::NetworkFailure,
                raw_message: "Network error: reset".to_string(),
                suggestion: Some("Retry".to_string()),
            }),
        }
    }

    #[test]
    fn test_json_mode_buffers_progress_and_emits_one_document() {
        let mut formatter = OutputFormatter::new(OutputMode::Json, Vec::new());
        for i in 0..25 {
            formatter.render_progress(ProgressEvent::Ci(PollProgress::Checks {
                passed: i,
                failed: 0,
                pending: 3,
                total: 3 + i,
            }));
        }
        formatter.render_progress(ProgressEvent::StepStarted { name: "wait-ci" });
        assert_eq!(formatter.buffered().len(), 26);

        formatter.render_result(&report(true)).unwrap();
        let written = String::from_utf8(formatter.into_inner()).unwrap();

        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["success"], true);
        let data = &value["data"];
        for key in [
            "merged",
            "prNumber",
            "prUrl",
            "branch",
            "defaultBranch",
            "branchDeleted",
            "execution",
        ] {
            assert!(data.get(key).is_some(), "missing {key}");
        }
        assert_eq!(data["prNumber"], 123);
        assert_eq!(data["execution"]["steps"].as_array().unwrap().len(), 7);
        assert!(value.get("error").is_none());
        assert_eq!(written.matches("\"execution\"").count(), 1);
    }

    #[test]
    fn test_json_failure_embeds_error() {
        let mut formatter = OutputFormatter::new(OutputMode::Json, Vec::new());
        formatter.render_result(&report(false)).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&formatter.into_inner()).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["kind"], "network-failure");
        assert_eq!(value["error"]["suggestion"], "Retry");
    }

    #[test]
    fn test_human_mode_writes_progress_immediately() {
        let mut formatter = OutputFormatter::new(OutputMode::Human, Vec::new());
        formatter.render_progress(ProgressEvent::StepSkipped {
            name: "verification",
            reason: "--skip-verify".to_string(),
        });
        assert!(formatter.buffered().is_empty());

        let written = String::from_utf8(formatter.into_inner()).unwrap();
        let plain = console::strip_ansi_codes(&written);
        assert!(plain.contains("verification"));
        assert!(plain.contains("--skip-verify"));
    }

    #[test]
    fn test_human_result_is_not_json() {
        let mut formatter = OutputFormatter::new(OutputMode::Human, Vec::new());
        formatter.render_result(&report(true)).unwrap();
        let written = String::from_utf8(formatter.into_inner()).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&written).is_err());
        assert!(console::strip_ansi_codes(&written).contains("#123"));
    }
}
