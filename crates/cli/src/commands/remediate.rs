use super::AppContext;
use audit_core::{AuthKind, Error, Result};
use audit_remediate::RemediationGenerator;
use chrono::Utc;
use colored::*;
use std::path::Path;

pub async fn run(config: Option<&Path>, level: Option<u8>, dry_run: bool) -> Result<i32> {
    let context = AppContext::load(config, None, None).await?;
    let level = level.unwrap_or(context.settings.remediation.default_level);

    let run = context
        .store
        .latest_completed_run()
        .await?
        .ok_or_else(|| Error::invalid_input("no completed run; run audit first"))?;
    let facts = context.store.load_facts(run.id).await?;
    let annotations = context.store.load_annotations().await?;

    // the logins used to audit are never remediation targets
    let connecting_logins: Vec<String> = context
        .settings
        .targets
        .iter()
        .filter(|t| t.auth == AuthKind::Sql)
        .filter_map(|t| t.username.clone())
        .collect();

    let generator = RemediationGenerator::new(level, connecting_logins)?;
    let generated_at = Utc::now();

    if dry_run {
        let scripts = generator.generate(0, &facts, &annotations, generated_at);
        println!(
            "{} run {} at level {}: {} file(s), {} change(s), {} exception(s) skipped",
            "dry-run:".cyan().bold(),
            run.id,
            level,
            scripts.files.len(),
            scripts.items.len(),
            scripts.skipped_exceptions
        );
        for file in &scripts.files {
            println!("  would write {}", file.name);
        }
        return Ok(0);
    }

    let remediation_run_id = context.store.begin_remediation_run(run.id, level).await?;
    let scripts = generator.generate(remediation_run_id, &facts, &annotations, generated_at);
    context.store.record_remediation_items(&scripts.items).await?;
    context
        .store
        .complete_remediation_run(
            remediation_run_id,
            scripts.files.len() as u32,
            scripts.skipped_exceptions,
        )
        .await?;

    let script_dir = context
        .settings
        .audit
        .output_dir
        .join("remediation")
        .join(run.id.to_string());
    std::fs::create_dir_all(&script_dir)?;
    for file in &scripts.files {
        std::fs::write(script_dir.join(&file.name), &file.content)?;
    }
    std::fs::write(
        script_dir.join("manifest.txt"),
        manifest(run.id, level, &scripts, generated_at),
    )?;

    println!(
        "{} {} file(s) under {} ({} exception(s) skipped)",
        "remediate:".green().bold(),
        scripts.files.len(),
        script_dir.display(),
        scripts.skipped_exceptions
    );
    Ok(0)
}

fn manifest(
    run_id: i64,
    level: u8,
    scripts: &audit_remediate::GeneratedScripts,
    generated_at: chrono::DateTime<Utc>,
) -> String {
    let mut out = format!(
        "remediation manifest\nrun: {run_id}\naggressiveness: {level}\ngenerated: {}\nskipped exceptions: {}\n\nfiles:\n",
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        scripts.skipped_exceptions
    );
    for file in &scripts.files {
        out.push_str("  ");
        out.push_str(&file.name);
        out.push('\n');
    }
    out
}
