//! The single source of truth for user-visible counts. Every surface (CLI
//! summary, cover sheet, finalize validation) renders this projection; no
//! component computes counts independently.

use crate::identity::RowUuid;
use crate::model::{Action, Annotation, ChangeType, Fact, Status};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Facts classified against policy (INFO rows excluded)
    pub total_findings: u64,
    /// Discrepant facts without a documented exception
    pub active_issues: u64,
    /// Discrepant facts covered by a valid exception
    pub documented_exceptions: u64,
    /// PASS facts
    pub compliant_items: u64,
    /// INFO facts
    pub informational_items: u64,
    /// Action counts per change type for the projected sync run
    pub change_counts: BTreeMap<ChangeType, u64>,
}

impl StatsSnapshot {
    pub fn count_for(&self, change_type: ChangeType) -> u64 {
        self.change_counts.get(&change_type).copied().unwrap_or(0)
    }
}

pub struct StatsService;

impl StatsService {
    /// Project the counts from a run's facts, the current annotations and
    /// the actions recorded for it.
    pub fn project(
        facts: &[Fact],
        annotations: &HashMap<RowUuid, Annotation>,
        actions: &[Action],
    ) -> StatsSnapshot {
        let mut snapshot = StatsSnapshot::default();

        for fact in facts {
            match fact.status {
                Status::Info => {
                    snapshot.informational_items += 1;
                    continue;
                }
                Status::Pass => {
                    snapshot.compliant_items += 1;
                }
                Status::Fail | Status::Warn => {
                    let excepted = annotations
                        .get(&fact.row_uuid)
                        .map(|a| a.is_exception_for(fact.status))
                        .unwrap_or(false);
                    if excepted {
                        snapshot.documented_exceptions += 1;
                    } else {
                        snapshot.active_issues += 1;
                    }
                }
            }
            snapshot.total_findings += 1;
        }

        for action in actions {
            *snapshot.change_counts.entry(action.change_type).or_insert(0) += 1;
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompositeKey, EntityKind, RiskLevel};
    use chrono::Utc;

    fn fact(uuid: &str, status: Status) -> Fact {
        Fact {
            run_id: 1,
            row_uuid: RowUuid::parse(uuid).unwrap(),
            entity_kind: EntityKind::Login,
            composite_key: CompositeKey::new(vec![
                "S".into(),
                "I".into(),
                format!("login_{uuid}"),
            ]),
            attributes: Default::default(),
            status,
            rule_id: "LOG-001".into(),
            risk_level: RiskLevel::High,
            collected_at: Utc::now(),
        }
    }

    fn exception(uuid: &str) -> (RowUuid, Annotation) {
        let id = RowUuid::parse(uuid).unwrap();
        let mut a = Annotation::new(
            id.clone(),
            EntityKind::Login,
            CompositeKey::new(vec!["S".into(), "I".into(), format!("login_{uuid}")]),
        );
        a.fields.justification = Some("approved by CISO".into());
        a.fields.review_status = Some("Exception".into());
        (id, a)
    }

    #[test]
    fn test_exception_moves_issue_to_documented() {
        let facts = vec![
            fact("00000001", Status::Fail),
            fact("00000002", Status::Fail),
            fact("00000003", Status::Pass),
            fact("00000004", Status::Info),
        ];
        let annotations: HashMap<_, _> = [exception("00000002")].into_iter().collect();

        let snapshot = StatsService::project(&facts, &annotations, &[]);
        assert_eq!(snapshot.total_findings, 3);
        assert_eq!(snapshot.active_issues, 1);
        assert_eq!(snapshot.documented_exceptions, 1);
        assert_eq!(snapshot.compliant_items, 1);
        assert_eq!(snapshot.informational_items, 1);
    }

    #[test]
    fn test_pass_with_exception_text_not_counted() {
        let facts = vec![fact("0000000a", Status::Pass)];
        let annotations: HashMap<_, _> = [exception("0000000a")].into_iter().collect();

        let snapshot = StatsService::project(&facts, &annotations, &[]);
        assert_eq!(snapshot.documented_exceptions, 0);
        assert_eq!(snapshot.compliant_items, 1);
    }

    #[test]
    fn test_change_counts() {
        let actions = vec![
            Action::new(
                7,
                EntityKind::Login,
                Some(RowUuid::parse("00000001").unwrap()),
                CompositeKey::new(vec!["S".into(), "I".into(), "x".into()]),
                ChangeType::Fixed,
                "fixed",
            ),
            Action::new(
                7,
                EntityKind::Login,
                Some(RowUuid::parse("00000002").unwrap()),
                CompositeKey::new(vec!["S".into(), "I".into(), "y".into()]),
                ChangeType::Fixed,
                "fixed",
            ),
            Action::new(
                7,
                EntityKind::Login,
                None,
                CompositeKey::new(vec!["S".into(), "I".into()]),
                ChangeType::Warning,
                "target unreachable",
            ),
        ];

        let snapshot = StatsService::project(&[], &HashMap::new(), &actions);
        assert_eq!(snapshot.count_for(ChangeType::Fixed), 2);
        assert_eq!(snapshot.count_for(ChangeType::Warning), 1);
        assert_eq!(snapshot.count_for(ChangeType::Regression), 0);
    }
}
