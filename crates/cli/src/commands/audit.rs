use super::{cancellation_token, AppContext};
use audit_core::Result;
use audit_sync::SyncOutcome;
use colored::*;
use std::path::{Path, PathBuf};

pub async fn run(
    config: Option<&Path>,
    organization: Option<String>,
    output_dir: Option<PathBuf>,
) -> Result<i32> {
    let context = AppContext::load(config, organization, output_dir).await?;
    let orchestrator = context.orchestrator(true)?;

    println!(
        "{} {} targets, organization {}",
        "audit:".cyan().bold(),
        context.settings.targets.len(),
        context.settings.audit.organization
    );

    let cancel = cancellation_token();
    let outcome = orchestrator.audit(&cancel).await?;
    print_summary(&outcome);

    // the run completed, but unreachable targets surface in the exit code
    Ok(if outcome.unreachable > 0 { 2 } else { 0 })
}

pub fn print_summary(outcome: &SyncOutcome) {
    println!(
        "{} run {} (baseline {})",
        "done:".green().bold(),
        outcome.run_id,
        outcome
            .baseline_run
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".into()),
    );
    println!(
        "  findings: {}   active: {}   exceptions: {}   compliant: {}",
        outcome.stats.total_findings,
        outcome.stats.active_issues.to_string().red().bold(),
        outcome
            .stats
            .documented_exceptions
            .to_string()
            .yellow()
            .bold(),
        outcome.stats.compliant_items.to_string().green(),
    );
    if !outcome.stats.change_counts.is_empty() {
        let changes: Vec<String> = outcome
            .stats
            .change_counts
            .iter()
            .map(|(change_type, count)| format!("{change_type}={count}"))
            .collect();
        println!("  changes:  {}", changes.join("  "));
    }
    if outcome.unreachable > 0 {
        println!(
            "  {} {} target(s) unreachable",
            "warning:".yellow().bold(),
            outcome.unreachable
        );
    }
    println!("  report:   {}", outcome.report_path.display());
}
