use super::EntityKind;
use crate::identity::RowUuid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Classification of one fact against policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pass,
    Warn,
    Fail,
    Info,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pass => "PASS",
            Status::Warn => "WARN",
            Status::Fail => "FAIL",
            Status::Info => "INFO",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "PASS" => Some(Status::Pass),
            "WARN" => Some(Status::Warn),
            "FAIL" => Some(Status::Fail),
            "INFO" => Some(Status::Info),
            _ => None,
        }
    }

    /// FAIL and WARN rows are discrepant; only those can carry exceptions.
    pub fn is_discrepant(&self) -> bool {
        matches!(self, Status::Fail | Status::Warn)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared severity of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<RiskLevel> {
        match s {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            "critical" => Some(RiskLevel::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific attribute map. Ordered so serializations are stable.
/// A null SQL value means the attribute is omitted; an empty string means
/// the attribute is present and empty.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// The ordered tuple of SQL-visible names identifying an entity within
/// (server, instance). The tuple shape is fixed per entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeKey(Vec<String>);

impl CompositeKey {
    pub fn new(parts: Vec<String>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Canonical single-string form, `|`-joined with `\` escaping, used as
    /// the storage key and the legacy lookup fallback.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                out.push('|');
            }
            for ch in part.chars() {
                if ch == '|' || ch == '\\' {
                    out.push('\\');
                }
                out.push(ch);
            }
        }
        out
    }

    pub fn from_canonical(s: &str) -> Self {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut escaped = false;
        for ch in s.chars() {
            if escaped {
                current.push(ch);
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '|' {
                parts.push(std::mem::take(&mut current));
            } else {
                current.push(ch);
            }
        }
        parts.push(current);
        Self(parts)
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// One normalized observation before identity assignment. Produced by the
/// fact normalizer; becomes a `Fact` once a row id and run id are attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub entity_kind: EntityKind,
    pub composite_key: CompositeKey,
    pub attributes: Attributes,
    pub status: Status,
    pub rule_id: String,
    pub risk_level: RiskLevel,
    pub collected_at: DateTime<Utc>,
}

/// One observation about one entity during one audit run. Facts are never
/// mutated; the next run's fact for the same entity supersedes this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub run_id: i64,
    pub row_uuid: RowUuid,
    pub entity_kind: EntityKind,
    pub composite_key: CompositeKey,
    pub attributes: Attributes,
    pub status: Status,
    pub rule_id: String,
    pub risk_level: RiskLevel,
    pub collected_at: DateTime<Utc>,
}

impl Fact {
    pub fn from_observation(run_id: i64, row_uuid: RowUuid, obs: Observation) -> Self {
        Self {
            run_id,
            row_uuid,
            entity_kind: obs.entity_kind,
            composite_key: obs.composite_key,
            attributes: obs.attributes,
            status: obs.status,
            rule_id: obs.rule_id,
            risk_level: obs.risk_level,
            collected_at: obs.collected_at,
        }
    }

    /// Identity of the entity this fact observes, independent of run.
    pub fn entity_id(&self) -> (EntityKind, String) {
        (self.entity_kind, self.composite_key.canonical())
    }
}
