use super::AppContext;
use audit_core::Result;
use colored::*;
use std::path::Path;

pub async fn run(
    config: Option<&Path>,
    run_id: Option<i64>,
    force: bool,
    freeze: bool,
) -> Result<i32> {
    let context = AppContext::load(config, None, None).await?;
    let orchestrator = context.orchestrator(false)?;

    if freeze {
        let id = orchestrator.finalize(run_id, force).await?;
        println!("{} run {} frozen for archival", "finalize:".green().bold(), id);
    } else {
        let id = orchestrator.definalize(run_id).await?;
        println!("{} run {} unfrozen", "definalize:".green().bold(), id);
    }
    Ok(0)
}
