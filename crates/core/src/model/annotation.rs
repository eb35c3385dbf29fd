use super::{fact::Status, EntityKind};
use crate::identity::RowUuid;
use crate::model::fact::CompositeKey;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Review status label that designates a documented exception. Matching is
/// substring and case-insensitive so "Exception", "exception (temp)" and
/// "Approved Exception" all qualify.
pub const EXCEPTION_LABEL: &str = "exception";

/// Lifecycle of an annotation relative to its underlying fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationState {
    /// The annotated entity was present in the latest run
    Active,
    /// The entity's fact disappeared; the annotation is retained as history
    Orphaned,
}

impl AnnotationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnotationState::Active => "active",
            AnnotationState::Orphaned => "orphaned",
        }
    }

    pub fn parse(s: &str) -> Option<AnnotationState> {
        match s {
            "active" => Some(AnnotationState::Active),
            "orphaned" => Some(AnnotationState::Orphaned),
            _ => None,
        }
    }
}

/// The operator-editable fields of an annotation, exactly the set the
/// report round-trips.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationFields {
    pub purpose: Option<String>,
    pub justification: Option<String>,
    pub review_status: Option<String>,
    pub last_reviewed: Option<NaiveDate>,
}

impl AnnotationFields {
    pub fn is_empty(&self) -> bool {
        self.purpose.is_none()
            && self.justification.is_none()
            && self.review_status.is_none()
            && self.last_reviewed.is_none()
    }
}

/// An operator-authored record keyed by row uuid (primary) with the legacy
/// composite key as fallback. Annotations outlive facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub row_uuid: RowUuid,
    pub entity_kind: EntityKind,
    pub composite_key: CompositeKey,
    pub fields: AnnotationFields,
    pub state: AnnotationState,
    pub updated_at: DateTime<Utc>,
}

impl Annotation {
    pub fn new(row_uuid: RowUuid, entity_kind: EntityKind, composite_key: CompositeKey) -> Self {
        Self {
            row_uuid,
            entity_kind,
            composite_key,
            fields: AnnotationFields::default(),
            state: AnnotationState::Active,
            updated_at: Utc::now(),
        }
    }

    /// Whether the annotation text designates a waiver: a non-empty
    /// justification or a review status containing the exception label.
    pub fn designates_exception(&self) -> bool {
        let has_justification = self
            .fields
            .justification
            .as_deref()
            .map(|j| !j.trim().is_empty())
            .unwrap_or(false);
        let has_exception_status = self
            .fields
            .review_status
            .as_deref()
            .map(|s| s.to_lowercase().contains(EXCEPTION_LABEL))
            .unwrap_or(false);
        has_justification || has_exception_status
    }

    /// An annotation is an exception only when its current fact is
    /// discrepant. PASS-with-note is documentation, not an exception.
    pub fn is_exception_for(&self, current_status: Status) -> bool {
        current_status.is_discrepant() && self.designates_exception()
    }
}

/// A change to one annotation read back from an operator-edited report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationDelta {
    pub row_uuid: RowUuid,
    pub entity_kind: EntityKind,
    pub composite_key: CompositeKey,
    pub fields: AnnotationFields,
    /// Set when the reader had to repair the row (regenerated uuid); the
    /// orchestrator logs a warning action for these.
    pub repaired: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation_with(justification: Option<&str>, review_status: Option<&str>) -> Annotation {
        let mut a = Annotation::new(
            RowUuid::parse("deadbeef").unwrap(),
            EntityKind::Login,
            CompositeKey::new(vec!["S".into(), "I".into(), "rogue_admin".into()]),
        );
        a.fields.justification = justification.map(str::to_string);
        a.fields.review_status = review_status.map(str::to_string);
        a
    }

    #[test]
    fn test_exception_requires_discrepant_fact() {
        let a = annotation_with(Some("approved by CISO 2025-12-01"), Some("Exception"));
        assert!(a.is_exception_for(Status::Fail));
        assert!(a.is_exception_for(Status::Warn));
        assert!(!a.is_exception_for(Status::Pass));
        assert!(!a.is_exception_for(Status::Info));
    }

    #[test]
    fn test_exception_label_is_substring_case_insensitive() {
        assert!(annotation_with(None, Some("Approved EXCEPTION (temp)")).designates_exception());
        assert!(annotation_with(None, Some("exception")).designates_exception());
        assert!(!annotation_with(None, Some("Reviewed")).designates_exception());
    }

    #[test]
    fn test_blank_justification_is_not_an_exception() {
        assert!(!annotation_with(Some("   "), None).designates_exception());
        assert!(annotation_with(Some("ticket INC-1042"), None).designates_exception());
    }
}
