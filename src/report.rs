//! Console reporting - preview table, live step lines, tails, summary
//!
//! Everything here formats plain strings; [`Reporter`] adds color when stdout
//! is a terminal.

use crate::core::result::{StepRunResult, StepStatus, WorkflowRunResult};
use crate::core::runtime::mask_text;
use crate::core::scheduler::RunEvent;
use crate::core::workflow::Workflow;
use crate::lint::{LintIssue, Severity};
use crossterm::style::{StyledContent, Stylize};
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::Path;

/// Lines of stdout/stderr shown after a step
pub const TAIL_LINES: usize = 12;

const RUN_COLUMN_WIDTH: usize = 48;

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let cut: String = text.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

/// First non-blank line of a script
pub fn first_line(run: &str) -> &str {
    run.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

fn preview_row(index: usize, step: &crate::core::workflow::Step) -> Vec<String> {
    let mut run = first_line(&step.run).to_string();
    if step.run.trim().lines().count() > 1 {
        run.push_str(" …");
    }
    vec![
        index.to_string(),
        step.name.clone(),
        truncate(&run, RUN_COLUMN_WIDTH),
        step.target.to_string(),
        if step.needs.is_empty() {
            "-".to_string()
        } else {
            step.needs.join(",")
        },
        step.if_expr.clone().unwrap_or_else(|| "-".to_string()),
        format!(
            "{}/{}s/{}",
            step.retries.max,
            step.retries.delay.as_secs_f64(),
            step.retries.backoff
        ),
        if step.continue_on_error { "yes" } else { "no" }.to_string(),
    ]
}

/// Aligned table of every step, without running anything
pub fn render_preview(workflow: &Workflow) -> String {
    let header: Vec<String> = ["#", "step", "run", "target", "needs", "if", "retries", "coe"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let mut rows = vec![header];
    rows.extend(
        workflow
            .steps
            .iter()
            .enumerate()
            .map(|(i, step)| preview_row(i + 1, step)),
    );

    let columns = rows[0].len();
    let widths: Vec<usize> = (0..columns)
        .map(|c| rows.iter().map(|r| r[c].chars().count()).max().unwrap_or(0))
        .collect();

    let mut out = format!("workflow: {} ({} steps)\n", workflow.name, workflow.steps.len());
    for row in &rows {
        let line: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{:<width$}", cell, width = w))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    }
    out
}

/// Plain one-line description of a run event
pub fn format_event(event: &RunEvent) -> String {
    match event {
        RunEvent::RunStarted {
            run_id,
            workflow,
            total,
        } => format!("▶ {} ({} steps, run {})", workflow, total, run_id),
        RunEvent::StepStarted {
            index,
            total,
            step,
            attempt,
            max_attempts,
        } => {
            if *max_attempts > 1 {
                format!("[{}/{}] {} (attempt {}/{})", index, total, step, attempt, max_attempts)
            } else {
                format!("[{}/{}] {}", index, total, step)
            }
        }
        RunEvent::AttemptFailed {
            step,
            attempt,
            exit_code,
            error,
        } => format!(
            "  attempt {} of {} failed (exit {}){}",
            attempt,
            step,
            exit_code,
            error.as_ref().map(|e| format!(": {}", e)).unwrap_or_default()
        ),
        RunEvent::RetryScheduled {
            next_attempt,
            delay,
            ..
        } => format!("  retry {} in {:.1}s", next_attempt, delay.as_secs_f64()),
        RunEvent::StepFinished { result, .. } => format_result(result),
        RunEvent::Halted { step } => format!("■ halted after '{}' failed", step),
    }
}

/// `STATUS name (exit N, 1.23s) note`
pub fn format_result(result: &StepRunResult) -> String {
    let mut line = format!(
        "{} {} (exit {}, {:.2}s)",
        result.status(),
        result.step,
        result.exit_code,
        result.duration.as_secs_f64()
    );
    if let Some(backend) = &result.backend {
        line.push_str(&format!(" on {}", backend));
    }
    if let Some(reason) = &result.meta.reason {
        line.push_str(&format!(" - {}", reason));
    } else if let Some(error) = &result.error {
        line.push_str(&format!(" - {}", error));
    }
    if let (Some(label), Some(hint)) = (&result.meta.remote_error, &result.meta.remote_hint) {
        line.push_str(&format!("\n  ssh: {} ({})", label, hint));
    }
    line
}

/// Last `n` lines of `text`
pub fn tail_lines(text: &str, n: usize) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].to_vec()
}

fn read_lossy(path: &Path) -> Option<String> {
    std::fs::read(path)
        .ok()
        .map(|b| String::from_utf8_lossy(&b).into_owned())
}

/// Masked tails of a result's stdout and stderr artifacts
pub fn render_tails(result: &StepRunResult, masks: &[String]) -> Option<String> {
    let mut out = String::new();
    for (label, path) in [("stdout", &result.stdout_path), ("stderr", &result.stderr_path)] {
        let Some(text) = path.as_deref().and_then(read_lossy) else {
            continue;
        };
        let masked = mask_text(&text, masks);
        let tail = tail_lines(&masked, TAIL_LINES);
        if tail.is_empty() {
            continue;
        }
        out.push_str(&format!("  ┌ {}\n", label));
        for line in tail {
            out.push_str(&format!("  │ {}\n", line));
        }
    }
    (!out.is_empty()).then_some(out)
}

pub fn render_outputs(outputs: &BTreeMap<String, String>, masks: &[String]) -> Option<String> {
    if outputs.is_empty() {
        return None;
    }
    let mut out = String::from("  outputs:\n");
    for (key, value) in outputs {
        out.push_str(&format!("    {} = {}\n", key, mask_text(value, masks)));
    }
    Some(out)
}

pub fn render_summary(run: &WorkflowRunResult) -> String {
    let summary = run.summary();
    let mut out = format!(
        "{}: OK {} · SOFT_FAIL {} · FAIL {} · SKIPPED {} · {:.2}s",
        if run.ok() { "success" } else { "failed" },
        summary.ok,
        summary.soft_fail,
        summary.fail,
        summary.skipped,
        summary.total_duration.as_secs_f64()
    );
    if let Some((name, duration)) = &summary.longest {
        out.push_str(&format!(" · longest: {} ({:.2}s)", name, duration.as_secs_f64()));
    }
    out
}

pub fn render_lint(issues: &[LintIssue]) -> String {
    if issues.is_empty() {
        return "no issues found\n".to_string();
    }
    let mut out = String::new();
    for issue in issues {
        out.push_str(&format!(
            "[{}] {}: {}\n    → {}\n",
            issue.severity,
            issue.step.as_deref().unwrap_or("workflow"),
            issue.problem,
            issue.recommendation
        ));
    }
    let errors = issues.iter().filter(|i| i.severity == Severity::Error).count();
    out.push_str(&format!(
        "{} error(s), {} warning(s)\n",
        errors,
        issues.len() - errors
    ));
    out
}

/// Prints reports to stdout, colored on a terminal
pub struct Reporter {
    color: bool,
}

impl Reporter {
    pub fn new() -> Self {
        Self {
            color: std::io::stdout().is_terminal(),
        }
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    fn paint(&self, status: Option<StepStatus>, text: String) -> StyledContent<String> {
        let styled = text.stylize();
        if !self.color {
            return styled;
        }
        match status {
            Some(StepStatus::Ok) => styled.green(),
            Some(StepStatus::SoftFail) => styled.yellow(),
            Some(StepStatus::Fail) => styled.red().bold(),
            Some(StepStatus::Skipped) => styled.dark_grey(),
            None => styled,
        }
    }

    pub fn event(&self, event: &RunEvent) {
        let line = format_event(event);
        match event {
            RunEvent::StepFinished {
                result,
                outputs,
                masks,
                ..
            } => {
                println!("{}", self.paint(Some(result.status()), line));
                if !result.ok || result.meta.soft_fail {
                    if let Some(tails) = render_tails(result, masks) {
                        print!("{}", tails);
                    }
                }
                if let Some(block) = render_outputs(outputs, masks) {
                    print!("{}", block);
                }
            }
            RunEvent::AttemptFailed { .. } | RunEvent::Halted { .. } => {
                println!("{}", self.paint(Some(StepStatus::Fail), line))
            }
            _ => println!("{}", self.paint(None, line)),
        }
    }

    pub fn summary(&self, run: &WorkflowRunResult) {
        let status = if run.ok() {
            StepStatus::Ok
        } else {
            StepStatus::Fail
        };
        println!("{}", self.paint(Some(status), render_summary(run)));
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}
