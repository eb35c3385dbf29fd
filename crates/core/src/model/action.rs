use super::{fact::RiskLevel, EntityKind};
use crate::identity::RowUuid;
use crate::model::fact::CompositeKey;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The state machine's label for a transition, plus `Warning` for recovered
/// errors surfaced to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    NewIssue,
    Fixed,
    Regression,
    StillFailing,
    NoChange,
    ExceptionAdded,
    ExceptionRemoved,
    ExceptionUpdated,
    Gone,
    Warning,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::NewIssue => "NEW_ISSUE",
            ChangeType::Fixed => "FIXED",
            ChangeType::Regression => "REGRESSION",
            ChangeType::StillFailing => "STILL_FAILING",
            ChangeType::NoChange => "NO_CHANGE",
            ChangeType::ExceptionAdded => "EXCEPTION_ADDED",
            ChangeType::ExceptionRemoved => "EXCEPTION_REMOVED",
            ChangeType::ExceptionUpdated => "EXCEPTION_UPDATED",
            ChangeType::Gone => "GONE",
            ChangeType::Warning => "WARNING",
        }
    }

    pub fn parse(s: &str) -> Option<ChangeType> {
        match s {
            "NEW_ISSUE" => Some(ChangeType::NewIssue),
            "FIXED" => Some(ChangeType::Fixed),
            "REGRESSION" => Some(ChangeType::Regression),
            "STILL_FAILING" => Some(ChangeType::StillFailing),
            "NO_CHANGE" => Some(ChangeType::NoChange),
            "EXCEPTION_ADDED" => Some(ChangeType::ExceptionAdded),
            "EXCEPTION_REMOVED" => Some(ChangeType::ExceptionRemoved),
            "EXCEPTION_UPDATED" => Some(ChangeType::ExceptionUpdated),
            "GONE" => Some(ChangeType::Gone),
            "WARNING" => Some(ChangeType::Warning),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry in the append-only action log. At most one action exists per
/// (row_uuid, change_type, sync_run_id); the store enforces the dedup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Persisted id; `None` until the store assigns one
    pub id: Option<i64>,
    pub sync_run_id: i64,
    pub entity_kind: EntityKind,
    /// Warning actions for unreachable targets have no row identity
    pub row_uuid: Option<RowUuid>,
    pub composite_key: CompositeKey,
    pub change_type: ChangeType,
    pub risk_level: Option<RiskLevel>,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    /// Operator edits; round-tripped, never create new rows
    pub user_date_override: Option<NaiveDate>,
    pub user_notes: Option<String>,
}

impl Action {
    pub fn new(
        sync_run_id: i64,
        entity_kind: EntityKind,
        row_uuid: Option<RowUuid>,
        composite_key: CompositeKey,
        change_type: ChangeType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            sync_run_id,
            entity_kind,
            row_uuid,
            composite_key,
            change_type,
            risk_level: None,
            description: description.into(),
            detected_at: Utc::now(),
            user_date_override: None,
            user_notes: None,
        }
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = Some(risk_level);
        self
    }

    /// The dedup key the store enforces
    pub fn dedup_key(&self) -> (Option<&str>, ChangeType, i64) {
        (
            self.row_uuid.as_ref().map(|u| u.as_str()),
            self.change_type,
            self.sync_run_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_type_round_trip() {
        for ct in [
            ChangeType::NewIssue,
            ChangeType::Fixed,
            ChangeType::Regression,
            ChangeType::StillFailing,
            ChangeType::NoChange,
            ChangeType::ExceptionAdded,
            ChangeType::ExceptionRemoved,
            ChangeType::ExceptionUpdated,
            ChangeType::Gone,
            ChangeType::Warning,
        ] {
            assert_eq!(ChangeType::parse(ct.as_str()), Some(ct));
        }
    }
}
