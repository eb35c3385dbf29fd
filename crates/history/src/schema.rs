//! Versioned schema for the history database. Migrations are additive
//! within a major version; destructive changes require a migration step
//! that preserves row ids and annotations.

/// Current schema version written to `schema_meta`
pub const SCHEMA_VERSION: i64 = 1;

/// Ordered migrations. Each entry is applied in its own transaction and
/// bumps the recorded version.
pub const MIGRATIONS: &[(i64, &str)] = &[(1, SCHEMA_V1)];

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_runs (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    organization  TEXT NOT NULL,
    config_hash   TEXT NOT NULL,
    baseline_ref  INTEGER REFERENCES audit_runs(id),
    started_at    TEXT NOT NULL,
    ended_at      TEXT,
    status        TEXT NOT NULL DEFAULT 'running',
    finalized     INTEGER NOT NULL DEFAULT 0
);

-- the uuid <-> composite-key bridge (one row per entity, ever)
CREATE TABLE IF NOT EXISTS row_identities (
    row_uuid       TEXT PRIMARY KEY,
    entity_kind    TEXT NOT NULL,
    composite_key  TEXT NOT NULL,
    created_run_id INTEGER REFERENCES audit_runs(id),
    created_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_identities_key
    ON row_identities (entity_kind, composite_key);

CREATE TABLE IF NOT EXISTS facts (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id         INTEGER NOT NULL REFERENCES audit_runs(id),
    entity_kind    TEXT NOT NULL,
    composite_key  TEXT NOT NULL,
    row_uuid       TEXT NOT NULL REFERENCES row_identities(row_uuid),
    attributes     TEXT NOT NULL,
    status         TEXT NOT NULL,
    rule_id        TEXT NOT NULL,
    risk_level     TEXT NOT NULL,
    collected_at   TEXT NOT NULL,
    UNIQUE (run_id, entity_kind, composite_key)
);
CREATE INDEX IF NOT EXISTS idx_facts_run ON facts (run_id);
CREATE INDEX IF NOT EXISTS idx_facts_uuid ON facts (row_uuid);

CREATE TABLE IF NOT EXISTS annotations (
    row_uuid       TEXT PRIMARY KEY REFERENCES row_identities(row_uuid),
    entity_kind    TEXT NOT NULL,
    composite_key  TEXT NOT NULL,
    purpose        TEXT,
    justification  TEXT,
    review_status  TEXT,
    last_reviewed  TEXT,
    state          TEXT NOT NULL DEFAULT 'active',
    updated_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS annotation_history (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    row_uuid      TEXT NOT NULL,
    changed_at    TEXT NOT NULL,
    prior_fields  TEXT,
    new_fields    TEXT NOT NULL,
    sync_run_id   INTEGER REFERENCES audit_runs(id)
);
CREATE INDEX IF NOT EXISTS idx_annotation_history_uuid
    ON annotation_history (row_uuid);

CREATE TABLE IF NOT EXISTS actions (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    sync_run_id        INTEGER NOT NULL REFERENCES audit_runs(id),
    entity_kind        TEXT NOT NULL,
    row_uuid           TEXT REFERENCES row_identities(row_uuid),
    composite_key      TEXT NOT NULL,
    change_type        TEXT NOT NULL,
    risk_level         TEXT,
    description        TEXT NOT NULL,
    detected_at        TEXT NOT NULL,
    user_date_override TEXT,
    user_notes         TEXT
);
-- the dedup guarantee: one action per sync run, change type and row
-- identity (warnings without a row id dedup on the composite key instead)
CREATE UNIQUE INDEX IF NOT EXISTS idx_actions_dedup
    ON actions (sync_run_id, change_type, COALESCE(row_uuid, composite_key));
CREATE INDEX IF NOT EXISTS idx_actions_run ON actions (sync_run_id);

CREATE TABLE IF NOT EXISTS remediation_runs (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id             INTEGER NOT NULL REFERENCES audit_runs(id),
    aggressiveness     INTEGER NOT NULL,
    generated_at       TEXT NOT NULL,
    script_count       INTEGER NOT NULL DEFAULT 0,
    skipped_exceptions INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS remediation_items (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    remediation_run_id INTEGER NOT NULL REFERENCES remediation_runs(id),
    rule_id            TEXT NOT NULL,
    entity_kind        TEXT NOT NULL,
    row_uuid           TEXT,
    composite_key      TEXT NOT NULL,
    pre_change_value   TEXT NOT NULL,
    statement          TEXT NOT NULL,
    rollback_statement TEXT,
    activated          INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_remediation_items_run
    ON remediation_items (remediation_run_id);
"#;
