use super::{fact::CompositeKey, EntityKind};
use crate::identity::RowUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<RunStatus> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit run. A half-written run is detectable (`status = running`) and
/// reconciled at the next store open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRun {
    pub id: i64,
    pub organization: String,
    pub config_hash: String,
    /// Previous completed run this run diffs against, if any
    pub baseline_ref: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Frozen for archival; finalized runs refuse further sync
    pub finalized: bool,
}

/// Snapshot of one remediation script generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationRun {
    pub id: i64,
    pub run_id: i64,
    pub aggressiveness: u8,
    pub generated_at: DateTime<Utc>,
    pub script_count: u32,
    pub skipped_exceptions: u32,
}

/// Pre-change snapshot for one remediated entity, kept for rollback and
/// auditability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationItem {
    pub id: Option<i64>,
    pub remediation_run_id: i64,
    pub rule_id: String,
    pub entity_kind: EntityKind,
    pub row_uuid: Option<RowUuid>,
    pub composite_key: CompositeKey,
    /// Value observed before the change, serialized
    pub pre_change_value: serde_json::Value,
    /// The statement that was emitted (possibly commented out)
    pub statement: String,
    /// The inverse statement, emitted as a comment in the script
    pub rollback_statement: Option<String>,
    /// Whether the statement was emitted active (uncommented)
    pub activated: bool,
}
