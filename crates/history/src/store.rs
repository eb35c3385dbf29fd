use crate::lock::HistoryLock;
use crate::schema::{MIGRATIONS, SCHEMA_VERSION};
use audit_core::model::annotation::AnnotationFields;
use audit_core::{
    Action, Annotation, AnnotationState, AuditRun, ChangeType, CompositeKey, EntityKind, Error,
    ErrorCode, Fact, KeyIndex, RemediationItem, Result, RiskLevel, RowUuid, RunStatus, Status,
};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// The canonical system of record. Append-only for runs, facts and actions;
/// annotations are updated in place with their history captured in
/// `annotation_history`. All writes run inside transactions.
pub struct HistoryStore {
    pool: SqlitePool,
    _lock: HistoryLock,
}

impl HistoryStore {
    /// Open (creating if absent) the history database at `path`, apply any
    /// pending migrations and reconcile half-written runs. Acquires the
    /// process-wide writer lock for the lifetime of the handle.
    pub async fn open(path: &Path) -> Result<HistoryStore> {
        let lock = HistoryLock::acquire(path)?;

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = HistoryStore { pool, _lock: lock };
        store.migrate().await?;
        store.reconcile_stale_runs().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let current = self.schema_version().await?;
        if current > SCHEMA_VERSION {
            return Err(Error::new(
                ErrorCode::SchemaMismatch,
                format!(
                    "history schema version {} is newer than supported version {}",
                    current, SCHEMA_VERSION
                ),
            ));
        }

        for (version, sql) in MIGRATIONS {
            if *version <= current {
                continue;
            }
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            for statement in split_statements(sql) {
                sqlx::query(&statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
            sqlx::query(
                "INSERT INTO schema_meta (key, value) VALUES ('schema_version', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )
            .bind(version.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            info!(version, "applied history schema migration");
        }
        Ok(())
    }

    async fn schema_version(&self) -> Result<i64> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_meta'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        if exists == 0 {
            return Ok(0);
        }

        let version: Option<String> =
            sqlx::query_scalar("SELECT value FROM schema_meta WHERE key = 'schema_version'")
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        match version {
            Some(v) => v.parse::<i64>().map_err(|_| {
                Error::new(ErrorCode::SchemaMismatch, format!("bad schema version {v:?}"))
            }),
            None => Ok(0),
        }
    }

    /// A half-written run (`status = running`) left by a crashed process is
    /// marked failed; nothing from it is deleted.
    async fn reconcile_stale_runs(&self) -> Result<()> {
        let result = sqlx::query(
            "UPDATE audit_runs SET status = 'failed', ended_at = ?1 WHERE status = 'running'",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() > 0 {
            warn!(
                count = result.rows_affected(),
                "marked stale running runs as failed"
            );
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Runs

    pub async fn begin_run(
        &self,
        organization: &str,
        config_hash: &str,
        baseline_ref: Option<i64>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO audit_runs (organization, config_hash, baseline_ref, started_at, status)
             VALUES (?1, ?2, ?3, ?4, 'running')",
        )
        .bind(organization)
        .bind(config_hash)
        .bind(baseline_ref)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let run_id = result.last_insert_rowid();
        debug!(run_id, organization, "began audit run");
        Ok(run_id)
    }

    pub async fn complete_run(&self, run_id: i64, status: RunStatus) -> Result<()> {
        let result = sqlx::query("UPDATE audit_runs SET status = ?1, ended_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::run_not_found(run_id));
        }
        info!(run_id, status = %status, "completed audit run");
        Ok(())
    }

    pub async fn set_finalized(&self, run_id: i64, finalized: bool) -> Result<()> {
        let run = self.get_run(run_id).await?;
        if run.status != RunStatus::Completed {
            return Err(Error::new(
                ErrorCode::InvalidInput,
                format!("run {} is {}, only completed runs can be finalized", run_id, run.status),
            ));
        }
        sqlx::query("UPDATE audit_runs SET finalized = ?1 WHERE id = ?2")
            .bind(finalized as i64)
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: i64) -> Result<AuditRun> {
        let row = sqlx::query("SELECT * FROM audit_runs WHERE id = ?1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(|r| run_from_row(&r)).transpose()?.ok_or_else(|| Error::run_not_found(run_id))
    }

    /// The run that serves as the sync baseline: the most recent completed
    /// one.
    pub async fn latest_completed_run(&self) -> Result<Option<AuditRun>> {
        let row = sqlx::query(
            "SELECT * FROM audit_runs WHERE status = 'completed' ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(|r| run_from_row(&r)).transpose()
    }

    // ------------------------------------------------------------------
    // Facts & identity

    /// Bulk-insert the facts of one run. Fails on duplicate
    /// (kind, composite_key) within the run, and on a row id that already
    /// names a different entity.
    pub async fn record_facts(&self, run_id: i64, facts: &[Fact]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for fact in facts {
            let existing = sqlx::query(
                "SELECT entity_kind, composite_key FROM row_identities WHERE row_uuid = ?1",
            )
            .bind(fact.row_uuid.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

            match existing {
                None => {
                    sqlx::query(
                        "INSERT INTO row_identities
                             (row_uuid, entity_kind, composite_key, created_run_id, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .bind(fact.row_uuid.as_str())
                    .bind(fact.entity_kind.as_str())
                    .bind(fact.composite_key.canonical())
                    .bind(run_id)
                    .bind(Utc::now().to_rfc3339())
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                }
                Some(row) => {
                    let kind: String = row.get("entity_kind");
                    let key: String = row.get("composite_key");
                    if kind != fact.entity_kind.as_str() || key != fact.composite_key.canonical() {
                        return Err(Error::new(
                            ErrorCode::UuidCollision,
                            format!(
                                "row id {} already names {}:{}, refusing to attach {}:{}",
                                fact.row_uuid,
                                kind,
                                key,
                                fact.entity_kind,
                                fact.composite_key.canonical()
                            ),
                        ));
                    }
                }
            }

            sqlx::query(
                "INSERT INTO facts
                     (run_id, entity_kind, composite_key, row_uuid, attributes,
                      status, rule_id, risk_level, collected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(run_id)
            .bind(fact.entity_kind.as_str())
            .bind(fact.composite_key.canonical())
            .bind(fact.row_uuid.as_str())
            .bind(serde_json::to_string(&fact.attributes)?)
            .bind(fact.status.as_str())
            .bind(&fact.rule_id)
            .bind(fact.risk_level.as_str())
            .bind(fact.collected_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        debug!(run_id, count = facts.len(), "recorded facts");
        Ok(())
    }

    pub async fn load_facts(&self, run_id: i64) -> Result<Vec<Fact>> {
        let rows = sqlx::query("SELECT * FROM facts WHERE run_id = ?1 ORDER BY id")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(fact_from_row).collect()
    }

    /// Every row id ever issued, for the identity service's collision set.
    pub async fn all_row_uuids(&self) -> Result<Vec<RowUuid>> {
        let rows: Vec<String> = sqlx::query_scalar("SELECT row_uuid FROM row_identities")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(|s| RowUuid::parse(s)).collect()
    }

    /// Build the identity bridge: the baseline tier holds entities live in
    /// `baseline_run`, the historical tier everything ever seen.
    pub async fn key_index(&self, baseline_run: Option<i64>) -> Result<KeyIndex> {
        let mut index = KeyIndex::new();

        let rows =
            sqlx::query("SELECT row_uuid, entity_kind, composite_key FROM row_identities")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        for row in &rows {
            let (uuid, kind, key) = identity_from_row(row)?;
            index.insert_historical(kind, &key, uuid);
        }

        if let Some(run_id) = baseline_run {
            let rows = sqlx::query(
                "SELECT row_uuid, entity_kind, composite_key FROM facts WHERE run_id = ?1",
            )
            .bind(run_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            for row in &rows {
                let (uuid, kind, key) = identity_from_row(row)?;
                index.insert_baseline(kind, &key, uuid);
            }
        }

        Ok(index)
    }

    // ------------------------------------------------------------------
    // Annotations

    /// Merge operator fields for one row. The editable field set is
    /// replaced wholesale (a cleared cell clears the stored value); the
    /// prior value is captured in `annotation_history`. Returns whether
    /// anything changed.
    pub async fn upsert_annotation(
        &self,
        row_uuid: &RowUuid,
        entity_kind: EntityKind,
        composite_key: &CompositeKey,
        fields: &AnnotationFields,
        sync_run_id: Option<i64>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // legacy rows arrive from the report without a minted identity
        sqlx::query(
            "INSERT INTO row_identities
                 (row_uuid, entity_kind, composite_key, created_run_id, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4)
             ON CONFLICT(row_uuid) DO NOTHING",
        )
        .bind(row_uuid.as_str())
        .bind(entity_kind.as_str())
        .bind(composite_key.canonical())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let prior: Option<AnnotationFields> = sqlx::query(
            "SELECT purpose, justification, review_status, last_reviewed
             FROM annotations WHERE row_uuid = ?1",
        )
        .bind(row_uuid.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .map(|r| fields_from_row(&r))
        .transpose()?;

        // unchanged fields, or an untouched row that was never annotated,
        // write nothing (keeps repeated syncs history-quiet)
        if prior.as_ref() == Some(fields) || (prior.is_none() && fields.is_empty()) {
            tx.rollback().await.map_err(db_err)?;
            return Ok(false);
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO annotations
                 (row_uuid, entity_kind, composite_key, purpose, justification,
                  review_status, last_reviewed, state, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', ?8)
             ON CONFLICT(row_uuid) DO UPDATE SET
                 purpose = excluded.purpose,
                 justification = excluded.justification,
                 review_status = excluded.review_status,
                 last_reviewed = excluded.last_reviewed,
                 updated_at = excluded.updated_at",
        )
        .bind(row_uuid.as_str())
        .bind(entity_kind.as_str())
        .bind(composite_key.canonical())
        .bind(&fields.purpose)
        .bind(&fields.justification)
        .bind(&fields.review_status)
        .bind(fields.last_reviewed.map(|d| d.to_string()))
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "INSERT INTO annotation_history
                 (row_uuid, changed_at, prior_fields, new_fields, sync_run_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(row_uuid.as_str())
        .bind(now.to_rfc3339())
        .bind(prior.map(|p| serde_json::to_string(&p)).transpose()?)
        .bind(serde_json::to_string(fields)?)
        .bind(sync_run_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    pub async fn load_annotations(&self) -> Result<HashMap<RowUuid, Annotation>> {
        let rows = sqlx::query("SELECT * FROM annotations")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in &rows {
            let annotation = annotation_from_row(row)?;
            map.insert(annotation.row_uuid.clone(), annotation);
        }
        Ok(map)
    }

    /// Flip annotation states based on which entities are present in
    /// `run_id`: present rows become active, absent rows orphaned.
    /// Annotations are never deleted.
    pub async fn reconcile_annotation_states(&self, run_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            "UPDATE annotations SET state = 'orphaned'
             WHERE row_uuid NOT IN (SELECT row_uuid FROM facts WHERE run_id = ?1)",
        )
        .bind(run_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        sqlx::query(
            "UPDATE annotations SET state = 'active'
             WHERE row_uuid IN (SELECT row_uuid FROM facts WHERE run_id = ?1)",
        )
        .bind(run_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Actions

    /// Append one action. The dedup guarantee lives here: an action that
    /// already exists for (sync run, change type, row identity) is a
    /// silent no-op. Returns whether a row was inserted.
    pub async fn record_action(&self, action: &Action) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO actions
                 (sync_run_id, entity_kind, row_uuid, composite_key, change_type,
                  risk_level, description, detected_at, user_date_override, user_notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT DO NOTHING",
        )
        .bind(action.sync_run_id)
        .bind(action.entity_kind.as_str())
        .bind(action.row_uuid.as_ref().map(|u| u.as_str().to_string()))
        .bind(action.composite_key.canonical())
        .bind(action.change_type.as_str())
        .bind(action.risk_level.map(|r| r.as_str()))
        .bind(&action.description)
        .bind(action.detected_at.to_rfc3339())
        .bind(action.user_date_override.map(|d| d.to_string()))
        .bind(&action.user_notes)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a batch inside one transaction so a partial failure leaves no
    /// half-populated action log. Returns the number actually inserted.
    pub async fn record_actions(&self, actions: &[Action]) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut inserted = 0;
        for action in actions {
            let result = sqlx::query(
                "INSERT INTO actions
                     (sync_run_id, entity_kind, row_uuid, composite_key, change_type,
                      risk_level, description, detected_at, user_date_override, user_notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT DO NOTHING",
            )
            .bind(action.sync_run_id)
            .bind(action.entity_kind.as_str())
            .bind(action.row_uuid.as_ref().map(|u| u.as_str().to_string()))
            .bind(action.composite_key.canonical())
            .bind(action.change_type.as_str())
            .bind(action.risk_level.map(|r| r.as_str()))
            .bind(&action.description)
            .bind(action.detected_at.to_rfc3339())
            .bind(action.user_date_override.map(|d| d.to_string()))
            .bind(&action.user_notes)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            inserted += result.rows_affected();
        }
        tx.commit().await.map_err(db_err)?;
        Ok(inserted)
    }

    /// Merge operator edits onto an existing action row; never creates one.
    pub async fn update_action_user_fields(
        &self,
        action_id: i64,
        user_date_override: Option<NaiveDate>,
        user_notes: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE actions SET user_date_override = ?1, user_notes = ?2 WHERE id = ?3",
        )
        .bind(user_date_override.map(|d| d.to_string()))
        .bind(user_notes)
        .bind(action_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn load_actions(&self, sync_run_id: i64) -> Result<Vec<Action>> {
        let rows = sqlx::query("SELECT * FROM actions WHERE sync_run_id = ?1 ORDER BY id")
            .bind(sync_run_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(action_from_row).collect()
    }

    pub async fn load_all_actions(&self) -> Result<Vec<Action>> {
        let rows = sqlx::query("SELECT * FROM actions ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(action_from_row).collect()
    }

    // ------------------------------------------------------------------
    // Remediation snapshots

    pub async fn begin_remediation_run(&self, run_id: i64, aggressiveness: u8) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO remediation_runs (run_id, aggressiveness, generated_at)
             VALUES (?1, ?2, ?3)",
        )
        .bind(run_id)
        .bind(aggressiveness as i64)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.last_insert_rowid())
    }

    pub async fn complete_remediation_run(
        &self,
        remediation_run_id: i64,
        script_count: u32,
        skipped_exceptions: u32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE remediation_runs SET script_count = ?1, skipped_exceptions = ?2 WHERE id = ?3",
        )
        .bind(script_count as i64)
        .bind(skipped_exceptions as i64)
        .bind(remediation_run_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn record_remediation_items(&self, items: &[RemediationItem]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for item in items {
            sqlx::query(
                "INSERT INTO remediation_items
                     (remediation_run_id, rule_id, entity_kind, row_uuid, composite_key,
                      pre_change_value, statement, rollback_statement, activated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(item.remediation_run_id)
            .bind(&item.rule_id)
            .bind(item.entity_kind.as_str())
            .bind(item.row_uuid.as_ref().map(|u| u.as_str().to_string()))
            .bind(item.composite_key.canonical())
            .bind(serde_json::to_string(&item.pre_change_value)?)
            .bind(&item.statement)
            .bind(&item.rollback_statement)
            .bind(item.activated as i64)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}

// ----------------------------------------------------------------------
// Row mapping

fn db_err(e: sqlx::Error) -> Error {
    let code = match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
            ErrorCode::HistoryConstraintViolation
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => ErrorCode::HistoryConnectionError,
        _ => ErrorCode::HistoryQueryError,
    };
    Error::new(code, e.to_string()).add_trace("sqlx::Error conversion")
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            Error::new(
                ErrorCode::HistoryQueryError,
                format!("bad timestamp {raw:?}: {e}"),
            )
        })
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
        Error::new(ErrorCode::HistoryQueryError, format!("bad date {raw:?}: {e}"))
    })
}

fn parse_kind(raw: &str) -> Result<EntityKind> {
    EntityKind::parse(raw).ok_or_else(|| {
        Error::new(
            ErrorCode::HistoryQueryError,
            format!("unknown entity kind {raw:?}"),
        )
    })
}

fn run_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AuditRun> {
    let status_raw: String = row.get("status");
    let status = RunStatus::parse(&status_raw).ok_or_else(|| {
        Error::new(
            ErrorCode::HistoryQueryError,
            format!("unknown run status {status_raw:?}"),
        )
    })?;
    let started_raw: String = row.get("started_at");
    let ended_raw: Option<String> = row.get("ended_at");
    Ok(AuditRun {
        id: row.get("id"),
        organization: row.get("organization"),
        config_hash: row.get("config_hash"),
        baseline_ref: row.get("baseline_ref"),
        started_at: parse_timestamp(&started_raw)?,
        ended_at: ended_raw.as_deref().map(parse_timestamp).transpose()?,
        status,
        finalized: row.get::<i64, _>("finalized") != 0,
    })
}

fn fact_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Fact> {
    let kind = parse_kind(&row.get::<String, _>("entity_kind"))?;
    let status_raw: String = row.get("status");
    let status = Status::parse(&status_raw).ok_or_else(|| {
        Error::new(
            ErrorCode::HistoryQueryError,
            format!("unknown status {status_raw:?}"),
        )
    })?;
    let risk_raw: String = row.get("risk_level");
    let risk_level = RiskLevel::parse(&risk_raw).ok_or_else(|| {
        Error::new(
            ErrorCode::HistoryQueryError,
            format!("unknown risk level {risk_raw:?}"),
        )
    })?;
    let attributes_raw: String = row.get("attributes");
    let collected_raw: String = row.get("collected_at");
    Ok(Fact {
        run_id: row.get("run_id"),
        row_uuid: RowUuid::parse(&row.get::<String, _>("row_uuid"))?,
        entity_kind: kind,
        composite_key: CompositeKey::from_canonical(&row.get::<String, _>("composite_key")),
        attributes: serde_json::from_str(&attributes_raw)?,
        status,
        rule_id: row.get("rule_id"),
        risk_level,
        collected_at: parse_timestamp(&collected_raw)?,
    })
}

fn fields_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AnnotationFields> {
    let last_reviewed_raw: Option<String> = row.get("last_reviewed");
    Ok(AnnotationFields {
        purpose: row.get("purpose"),
        justification: row.get("justification"),
        review_status: row.get("review_status"),
        last_reviewed: last_reviewed_raw.as_deref().map(parse_date).transpose()?,
    })
}

fn annotation_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Annotation> {
    let state_raw: String = row.get("state");
    let state = AnnotationState::parse(&state_raw).ok_or_else(|| {
        Error::new(
            ErrorCode::HistoryQueryError,
            format!("unknown annotation state {state_raw:?}"),
        )
    })?;
    let updated_raw: String = row.get("updated_at");
    Ok(Annotation {
        row_uuid: RowUuid::parse(&row.get::<String, _>("row_uuid"))?,
        entity_kind: parse_kind(&row.get::<String, _>("entity_kind"))?,
        composite_key: CompositeKey::from_canonical(&row.get::<String, _>("composite_key")),
        fields: fields_from_row(row)?,
        state,
        updated_at: parse_timestamp(&updated_raw)?,
    })
}

fn action_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Action> {
    let change_raw: String = row.get("change_type");
    let change_type = ChangeType::parse(&change_raw).ok_or_else(|| {
        Error::new(
            ErrorCode::HistoryQueryError,
            format!("unknown change type {change_raw:?}"),
        )
    })?;
    let risk_raw: Option<String> = row.get("risk_level");
    let risk_level = risk_raw
        .as_deref()
        .map(|r| {
            RiskLevel::parse(r).ok_or_else(|| {
                Error::new(
                    ErrorCode::HistoryQueryError,
                    format!("unknown risk level {r:?}"),
                )
            })
        })
        .transpose()?;
    let uuid_raw: Option<String> = row.get("row_uuid");
    let detected_raw: String = row.get("detected_at");
    let override_raw: Option<String> = row.get("user_date_override");
    Ok(Action {
        id: Some(row.get("id")),
        sync_run_id: row.get("sync_run_id"),
        entity_kind: parse_kind(&row.get::<String, _>("entity_kind"))?,
        row_uuid: uuid_raw.as_deref().map(RowUuid::parse).transpose()?,
        composite_key: CompositeKey::from_canonical(&row.get::<String, _>("composite_key")),
        change_type,
        risk_level,
        description: row.get("description"),
        detected_at: parse_timestamp(&detected_raw)?,
        user_date_override: override_raw.as_deref().map(parse_date).transpose()?,
        user_notes: row.get("user_notes"),
    })
}

fn identity_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<(RowUuid, EntityKind, CompositeKey)> {
    Ok((
        RowUuid::parse(&row.get::<String, _>("row_uuid"))?,
        parse_kind(&row.get::<String, _>("entity_kind"))?,
        CompositeKey::from_canonical(&row.get::<String, _>("composite_key")),
    ))
}

/// The migration scripts hold multiple statements; SQLite's prepare API
/// executes one at a time.
fn split_statements(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|s| {
            !s.is_empty() && !s.lines().all(|l| l.trim().is_empty() || l.trim().starts_with("--"))
        })
        .map(|s| format!("{s};"))
        .collect()
}
