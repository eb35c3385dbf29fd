use super::{audit::print_summary, cancellation_token, AppContext};
use audit_core::Result;
use colored::*;
use std::path::{Path, PathBuf};

pub async fn run(config: Option<&Path>, report: Option<PathBuf>) -> Result<i32> {
    let context = AppContext::load(config, None, None).await?;
    let orchestrator = context.orchestrator(true)?;

    let report_path = report.unwrap_or_else(|| context.settings.audit.report_path());
    println!(
        "{} reconciling {}",
        "sync:".cyan().bold(),
        report_path.display()
    );

    let cancel = cancellation_token();
    let outcome = orchestrator.sync(&report_path, &cancel).await?;
    print_summary(&outcome);
    println!("  actions:  {} recorded", outcome.actions_recorded);

    Ok(if outcome.unreachable > 0 { 2 } else { 0 })
}
