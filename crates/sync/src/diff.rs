//! The diff engine: a full outer join of baseline and current facts by row
//! id, producing one transition per entity. This is the only code allowed
//! to fall back to composite-key matching (for rows that predate minted
//! ids); everything downstream works in row ids alone.

use audit_core::{Annotation, CompositeKey, EntityKind, Fact, RowUuid};
use std::collections::HashMap;

/// The pair (baseline fact, current fact) for a single entity, plus its
/// current annotation.
#[derive(Debug, Clone)]
pub struct Transition {
    pub entity_kind: EntityKind,
    pub row_uuid: RowUuid,
    pub composite_key: CompositeKey,
    pub baseline: Option<Fact>,
    pub current: Option<Fact>,
    pub annotation: Option<Annotation>,
}

pub struct DiffEngine;

impl DiffEngine {
    /// Join baseline and current facts. Output is ordered by
    /// (kind, composite key) so downstream phases are deterministic.
    pub fn diff(
        baseline: Vec<Fact>,
        current: Vec<Fact>,
        annotations: &HashMap<RowUuid, Annotation>,
    ) -> Vec<Transition> {
        let mut baseline_by_uuid: HashMap<RowUuid, Fact> = baseline
            .into_iter()
            .map(|f| (f.row_uuid.clone(), f))
            .collect();

        // legacy fallback index for baseline rows not matched by id
        let mut baseline_by_key: HashMap<(EntityKind, String), RowUuid> = baseline_by_uuid
            .values()
            .map(|f| ((f.entity_kind, f.composite_key.canonical()), f.row_uuid.clone()))
            .collect();

        let mut transitions = Vec::with_capacity(baseline_by_uuid.len() + current.len());

        for fact in current {
            let matched = if baseline_by_uuid.contains_key(&fact.row_uuid) {
                Some(fact.row_uuid.clone())
            } else {
                baseline_by_key
                    .remove(&(fact.entity_kind, fact.composite_key.canonical()))
            };

            let old = matched.and_then(|uuid| baseline_by_uuid.remove(&uuid));
            transitions.push(Transition {
                entity_kind: fact.entity_kind,
                row_uuid: fact.row_uuid.clone(),
                composite_key: fact.composite_key.clone(),
                annotation: annotations.get(&fact.row_uuid).cloned(),
                baseline: old,
                current: Some(fact),
            });
        }

        // whatever is left in the baseline disappeared this run
        for (uuid, fact) in baseline_by_uuid {
            transitions.push(Transition {
                entity_kind: fact.entity_kind,
                row_uuid: uuid.clone(),
                composite_key: fact.composite_key.clone(),
                annotation: annotations.get(&uuid).cloned(),
                baseline: Some(fact),
                current: None,
            });
        }

        transitions.sort_by(|a, b| {
            (a.entity_kind, &a.composite_key).cmp(&(b.entity_kind, &b.composite_key))
        });
        transitions
    }
}
