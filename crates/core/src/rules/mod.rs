//! The immutable compliance policy. Rules are data: id, entity kind,
//! declared severity, a total predicate over the normalized attribute map,
//! and an optional fix template id for the remediation generator. New rules
//! are additions to the catalog table, nothing else changes.

mod catalog;

pub use catalog::catalog;

use crate::model::{Attributes, EntityKind, RiskLevel, Status};
use std::collections::HashMap;

/// One policy rule. The predicate must be total: missing inputs classify as
/// WARN, never panic.
#[derive(Clone)]
pub struct Rule {
    pub id: &'static str,
    pub title: &'static str,
    pub entity_kind: EntityKind,
    /// For kinds whose rules each target one named entity (config
    /// settings), the `setting` value this rule applies to
    pub subject: Option<&'static str>,
    pub risk_level: RiskLevel,
    pub predicate: fn(&Attributes) -> Status,
    /// Remediation template key; `None` marks the finding manual-only
    pub fix_id: Option<&'static str>,
}

impl Rule {
    /// Whether this rule covers the entity the attributes describe.
    pub fn applies_to(&self, attributes: &Attributes) -> bool {
        match self.subject {
            None => true,
            Some(subject) => {
                attributes.get("setting").and_then(|v| v.as_str()) == Some(subject)
            }
        }
    }

    pub fn evaluate(&self, attributes: &Attributes) -> Status {
        if self.entity_kind.is_informational() {
            return Status::Info;
        }
        if attributes.get("data_missing").and_then(|v| v.as_bool()) == Some(true) {
            return Status::Warn;
        }
        (self.predicate)(attributes)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("entity_kind", &self.entity_kind)
            .field("risk_level", &self.risk_level)
            .finish()
    }
}

/// Registry of all rules, indexed by id and by entity kind.
pub struct RuleCatalog {
    rules: Vec<Rule>,
    by_id: HashMap<&'static str, usize>,
}

impl RuleCatalog {
    pub(crate) fn new(rules: Vec<Rule>) -> Self {
        let by_id = rules
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id, i))
            .collect();
        Self { rules, by_id }
    }

    pub fn all(&self) -> &[Rule] {
        &self.rules
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.by_id.get(id).map(|&i| &self.rules[i])
    }

    pub fn rules_for(&self, kind: EntityKind) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |r| r.entity_kind == kind)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
