use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;
use std::env;

/// Maintenance utility: dump run summaries from a history database.
/// Usage: inspect-history [path-to-history.db]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| "out/history.db".to_string());

    let options = SqliteConnectOptions::new()
        .filename(&path)
        .read_only(true);
    let pool = SqlitePool::connect_with(options).await?;

    let runs = sqlx::query(
        "SELECT id, organization, status, started_at, ended_at, finalized FROM audit_runs ORDER BY id",
    )
    .fetch_all(&pool)
    .await?;

    if runs.is_empty() {
        println!("no runs in {path}");
        return Ok(());
    }

    println!("{:<5} {:<16} {:<10} {:<26} {:<9} {:<8} {:<8}", "run", "org", "status", "started", "facts", "actions", "frozen");
    for run in runs {
        let id: i64 = run.get("id");
        let facts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM facts WHERE run_id = ?1")
            .bind(id)
            .fetch_one(&pool)
            .await?;
        let actions: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM actions WHERE sync_run_id = ?1")
                .bind(id)
                .fetch_one(&pool)
                .await?;
        println!(
            "{:<5} {:<16} {:<10} {:<26} {:<9} {:<8} {:<8}",
            id,
            run.get::<String, _>("organization"),
            run.get::<String, _>("status"),
            run.get::<String, _>("started_at"),
            facts,
            actions,
            if run.get::<i64, _>("finalized") != 0 { "yes" } else { "no" },
        );
    }

    let annotations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM annotations")
        .fetch_one(&pool)
        .await?;
    let orphaned: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM annotations WHERE state = 'orphaned'")
            .fetch_one(&pool)
            .await?;
    println!("\nannotations: {annotations} ({orphaned} orphaned)");

    Ok(())
}
