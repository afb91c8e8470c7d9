//! Text rendering for interactive use.

use console::{style, Emoji};

use crate::ci::PollProgress;
use crate::diagnostics::ClassifiedError;
use crate::execution::{ExecutionSummary, StepStatus};
use crate::output::ProgressEvent;
use crate::ship::types::{CheckSummary, ShipReport, WaitReport};

static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR] ");
static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[SKIP] ");
static RUNNING: Emoji<'_, '_> = Emoji("▶️  ", "[>] ");
static CLOCK: Emoji<'_, '_> = Emoji("⏱️  ", "[T] ");
static LINK: Emoji<'_, '_> = Emoji("🔗 ", "-> ");
static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "* ");
static HINT: Emoji<'_, '_> = Emoji("💡 ", "hint: ");

pub fn format_progress(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::StepStarted { name } => {
            format!("{RUNNING}{}", style(name).bold())
        }
        ProgressEvent::StepCompleted { name, duration_ms } => format!(
            "{CHECK}{} {}",
            style(name).green(),
            style(format!("({})", format_duration(*duration_ms))).dim()
        ),
        ProgressEvent::StepSkipped { name, reason } => format!(
            "{SKIP}{} {}",
            style(name).dim(),
            style(format!("skipped: {reason}")).dim()
        ),
        ProgressEvent::StepFailed { name, reason } => format!(
            "{CROSS}{} {}",
            style(name).red().bold(),
            style(first_line(reason)).red()
        ),
        ProgressEvent::PullRequest { number, url, reused } => {
            let verb = if *reused { "Reusing" } else { "Opened" };
            format!("   {LINK}{verb} PR #{number} {}", style(url).underlined())
        }
        ProgressEvent::Ci(progress) => format_ci_progress(progress),
    }
}

fn format_ci_progress(progress: &PollProgress) -> String {
    match progress {
        PollProgress::Checks {
            passed,
            failed,
            pending,
            total,
        } => {
            let failed_text = if *failed > 0 {
                style(format!("{failed} failed")).red().to_string()
            } else {
                format!("{failed} failed")
            };
            format!(
                "   {CLOCK}CI: {} passed, {failed_text}, {pending} pending of {total}",
                style(passed).green()
            )
        }
        PollProgress::NoChecksYet {
            waited_secs,
            grace_secs,
        } => format!(
            "   {CLOCK}CI: no checks reported yet ({waited_secs}s of {grace_secs}s grace)"
        ),
    }
}

/// One-line description of a resolved CI wait.
pub fn format_checks(checks: &CheckSummary) -> String {
    if checks.no_checks_configured {
        "No CI checks configured for this commit".to_string()
    } else if checks.failed > 0 {
        format!("{} of {} CI checks failed", checks.failed, checks.total)
    } else if checks.pending > 0 {
        format!(
            "{} of {} CI checks still pending",
            checks.pending, checks.total
        )
    } else {
        format!("All {} CI checks passed", checks.total)
    }
}

pub fn format_ship_report(report: &ShipReport) -> Vec<String> {
    let data = &report.data;
    let mut lines = vec![String::new()];

    if report.success {
        let headline = if data.merged {
            format!("Shipped {} into {}", data.branch, data.default_branch)
        } else {
            format!("{} is ready for review", data.branch)
        };
        lines.push(format!("{SPARKLE}{}", style(headline).green().bold()));
    } else {
        lines.push(format!(
            "{CROSS}{}",
            style(format!("Failed to ship {}", data.branch)).red().bold()
        ));
    }

    if let (Some(number), Some(url)) = (data.pr_number, &data.pr_url) {
        lines.push(format!("   PR #{number}: {url}"));
    }
    if let Some(checks) = &data.checks {
        lines.push(format!("   {}", format_checks(checks)));
    }
    if data.merged {
        lines.push(format!("   Merged: yes, branch deleted: {}", yes_no(data.branch_deleted)));
    }

    lines.extend(format_execution(&data.execution));
    if let Some(error) = &report.error {
        lines.extend(format_error(error));
    }
    lines
}

pub fn format_wait_report(report: &WaitReport) -> Vec<String> {
    let data = &report.data;
    let mut lines = vec![String::new()];

    let headline = match &data.checks {
        Some(checks) => format_checks(checks),
        None => "CI did not resolve".to_string(),
    };
    if report.success {
        lines.push(format!("{CHECK}{} on {}", style(headline).green().bold(), data.git_ref));
    } else {
        lines.push(format!("{CROSS}{} on {}", style(headline).red().bold(), data.git_ref));
    }

    lines.extend(format_execution(&data.execution));
    if let Some(error) = &report.error {
        lines.extend(format_error(error));
    }
    lines
}

fn format_execution(summary: &ExecutionSummary) -> Vec<String> {
    let mut lines = vec![String::new(), style("Steps").bold().to_string()];
    for step in &summary.steps {
        let status = match step.status {
            StepStatus::Completed => style("completed").green(),
            StepStatus::Skipped => style("skipped").dim(),
            StepStatus::Failed => style("failed").red(),
        };
        let mut line = format!("   {:<14}{status}", step.name);
        if let Some(ms) = step.duration_ms {
            line.push_str(&format!(" {}", style(format_duration(ms)).dim()));
        }
        if let Some(reason) = &step.reason {
            line.push_str(&format!(" {}", style(format!("({})", first_line(reason))).dim()));
        }
        lines.push(line);
    }
    lines.push(format!(
        "   {}",
        style(format!("total {}", format_duration(summary.total_duration_ms))).dim()
    ));
    lines
}

fn format_error(error: &ClassifiedError) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        format!("{} {}", style(format!("[{}]", error.kind)).red().bold(), error.raw_message),
    ];
    if let Some(suggestion) = &error.suggestion {
        lines.push(format!("{HINT}{}", style(suggestion).yellow()));
    }
    lines
}

fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(text: &str) -> String {
        console::strip_ansi_codes(text).into_owned()
    }

    fn summary(no_checks_configured: bool, total: u32) -> CheckSummary {
        CheckSummary {
            passed: total,
            failed: 0,
            pending: 0,
            total,
            no_checks_configured,
        }
    }

    #[test]
    fn test_zero_checks_wording_differs_from_all_passed() {
        let none = format_checks(&summary(true, 0));
        let all = format_checks(&summary(false, 4));
        assert_eq!(none, "No CI checks configured for this commit");
        assert_eq!(all, "All 4 CI checks passed");
        assert!(!none.contains("passed"));
    }

    #[test]
    fn test_failed_checks_wording() {
        let checks = CheckSummary {
            passed: 2,
            failed: 1,
            pending: 0,
            total: 3,
            no_checks_configured: false,
        };
        assert_eq!(format_checks(&checks), "1 of 3 CI checks failed");
    }

    #[test]
    fn test_no_checks_yet_progress() {
        let line = plain(&format_progress(&ProgressEvent::Ci(PollProgress::NoChecksYet {
            waited_secs: 7,
            grace_secs: 20,
        })));
        assert!(line.contains("no checks reported yet (7s of 20s grace)"));
    }

    #[test]
    fn test_checks_progress() {
        let line = plain(&format_progress(&ProgressEvent::Ci(PollProgress::Checks {
            passed: 2,
            failed: 1,
            pending: 3,
            total: 6,
        })));
        assert!(line.contains("2 passed, 1 failed, 3 pending of 6"));
    }

    #[test]
    fn test_failed_step_shows_first_line_only() {
        let line = plain(&format_progress(&ProgressEvent::StepFailed {
            name: "verification",
            reason: "Verification failed\nline two".to_string(),
        }));
        assert!(line.contains("Verification failed"));
        assert!(!line.contains("line two"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(250), "250ms");
        assert_eq!(format_duration(1_500), "1.5s");
        assert_eq!(format_duration(125_000), "2m05s");
    }
}
