use super::AppContext;
use audit_core::Result;
use colored::*;
use std::path::Path;

pub async fn run(config: Option<&Path>) -> Result<i32> {
    let context = AppContext::load(config, None, None).await?;
    let orchestrator = context.orchestrator(false)?;

    let Some((run, stats)) = orchestrator.status().await? else {
        println!("{} no completed runs yet", "status:".cyan().bold());
        return Ok(0);
    };

    println!(
        "{} run {} ({}, {}{})",
        "status:".cyan().bold(),
        run.id,
        run.organization,
        run.started_at.format("%Y-%m-%d"),
        if run.finalized { ", finalized" } else { "" },
    );
    println!("  total findings:        {}", stats.total_findings);
    println!(
        "  active issues:         {}",
        stats.active_issues.to_string().red().bold()
    );
    println!(
        "  documented exceptions: {}",
        stats.documented_exceptions.to_string().yellow().bold()
    );
    println!(
        "  compliant items:       {}",
        stats.compliant_items.to_string().green()
    );
    println!("  informational:         {}", stats.informational_items);

    if !stats.change_counts.is_empty() {
        println!("  changes since baseline:");
        for (change_type, count) in &stats.change_counts {
            println!("    {:<20} {}", change_type.to_string(), count);
        }
    }
    Ok(0)
}
