// Terminal rendering for targets and result sets

use colored::Colorize;
use fleet_core::application::ArtifactDescriptor;
use fleet_core::domain::{ExecutionState, ResultSet, Target, TargetExecution};
use tabled::settings::Style;
use tabled::{Table, Tabled};

const DETAIL_WIDTH: usize = 60;

#[derive(Tabled)]
struct TargetRow {
    #[tabled(rename = "TARGET")]
    id: String,
    #[tabled(rename = "MANAGED")]
    managed: bool,
    #[tabled(rename = "PLATFORM")]
    platform: String,
    #[tabled(rename = "TAGS")]
    tags: String,
}

#[derive(Tabled)]
struct ExecutionRow {
    #[tabled(rename = "TARGET")]
    target: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "CODE")]
    code: String,
    #[tabled(rename = "DURATION")]
    duration: String,
    #[tabled(rename = "DETAIL")]
    detail: String,
}

pub fn targets_table(targets: &[Target]) -> String {
    let rows = targets.iter().map(|t| TargetRow {
        id: t.id.clone(),
        managed: t.managed,
        platform: t.platform.clone().unwrap_or_default(),
        tags: t
            .tags
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(","),
    });
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn executions_table(result_set: &ResultSet, only: Option<ExecutionState>) -> String {
    let rows = result_set
        .executions
        .values()
        .filter(|e| only.map_or(true, |s| e.state == s))
        .map(|e| ExecutionRow {
            target: e.target_id.clone(),
            state: e.state.to_string(),
            code: e.response_code.map(|c| c.to_string()).unwrap_or_default(),
            duration: match (e.started_at, e.finished_at) {
                (Some(start), Some(end)) => format!("{}ms", end - start),
                _ => String::new(),
            },
            detail: detail(e),
        });
    Table::new(rows).with(Style::rounded()).to_string()
}

/// One line explaining the outcome: failure reason, else first output line
fn detail(execution: &TargetExecution) -> String {
    let text = execution
        .reason
        .as_deref()
        .or_else(|| first_line(&execution.stderr))
        .or_else(|| first_line(&execution.stdout))
        .unwrap_or("");
    if text.chars().count() > DETAIL_WIDTH {
        let cut: String = text.chars().take(DETAIL_WIDTH - 1).collect();
        format!("{}…", cut)
    } else {
        text.to_string()
    }
}

fn first_line(s: &str) -> Option<&str> {
    s.lines().map(str::trim).find(|l| !l.is_empty())
}

pub fn print_header(result_set: &ResultSet) {
    let dispatch = &result_set.dispatch;
    println!(
        "{} {}",
        "Dispatch".cyan().bold(),
        dispatch.id.as_str().bold()
    );
    println!("  {} {}", "Document:".bold(), dispatch.metadata.document);
    if let Some(comment) = &dispatch.metadata.comment {
        println!("  {} {}", "Comment:".bold(), comment);
    }
    if let Some(parent) = &dispatch.retry_of {
        println!("  {} {}", "Retry of:".bold(), parent);
    }
    println!("  {} {}", "Commands:".bold(), dispatch.payload.commands().join(" && "));
}

pub fn print_summary(result_set: &ResultSet) {
    let summary = result_set.summary();
    let line = summary.to_string();
    let styled = if summary.failed + summary.timed_out > 0 {
        format!("✗ {}", line).red().bold()
    } else if result_set.is_completed() {
        format!("✓ {}", line).green().bold()
    } else {
        format!("… {}", line).yellow().bold()
    };
    println!("{}", styled);
}

pub fn print_artifacts(artifacts: &[ArtifactDescriptor]) {
    for artifact in artifacts {
        println!(
            "  {} {} ({} records)",
            "Exported".green(),
            artifact.path,
            artifact.record_count
        );
    }
}
