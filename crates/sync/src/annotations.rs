//! Merges operator-edited sheet rows into annotation deltas. Row ids are
//! lowercased on read; empty or malformed ids are repaired by resolving
//! the row's composite key against the identity bridge (preferred) or
//! minting a fresh id; duplicate ids keep the first occurrence in sheet
//! order. Every repair surfaces as a warning.

use crate::report::reader::SheetRow;
use audit_core::{AnnotationDelta, IdentityService, KeyIndex, Result, RowUuid};
use std::collections::HashSet;
use tracing::warn;

#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub deltas: Vec<AnnotationDelta>,
    pub warnings: Vec<String>,
}

pub fn merge_annotations(
    rows: &[SheetRow],
    known: &KeyIndex,
    identity: &mut IdentityService,
) -> Result<MergeOutcome> {
    let mut outcome = MergeOutcome::default();
    let mut seen: HashSet<RowUuid> = HashSet::new();

    for row in rows {
        let sheet = row.kind.sheet_name();
        let parsed = RowUuid::parse_cell(&row.uuid_cell);

        let (uuid, repaired) = match parsed {
            Ok(Some(uuid)) if !seen.contains(&uuid) => (uuid, false),
            Ok(Some(duplicate)) => {
                // keep the first occurrence; re-resolve this one by key
                match known.historical_uuid(row.kind, &row.composite_key) {
                    Some(resolved) if *resolved == duplicate => {
                        outcome.warnings.push(format!(
                            "sheet {sheet} row {}: duplicate id {duplicate} (copy-pasted row); kept the first occurrence",
                            row.row_number
                        ));
                        continue;
                    }
                    Some(resolved) => {
                        outcome.warnings.push(format!(
                            "sheet {sheet} row {}: duplicate id {duplicate} repaired to {resolved}",
                            row.row_number
                        ));
                        (resolved.clone(), true)
                    }
                    None => {
                        let minted = identity.mint_unique()?;
                        outcome.warnings.push(format!(
                            "sheet {sheet} row {}: duplicate id {duplicate} regenerated as {minted}",
                            row.row_number
                        ));
                        (minted, true)
                    }
                }
            }
            Ok(None) | Err(_) => {
                // empty or malformed cell: re-associate through the key
                // bridge so the row keeps its history
                match known.historical_uuid(row.kind, &row.composite_key) {
                    Some(resolved) if !seen.contains(resolved) => {
                        outcome.warnings.push(format!(
                            "sheet {sheet} row {}: missing id restored to {resolved}",
                            row.row_number
                        ));
                        (resolved.clone(), true)
                    }
                    _ => {
                        let minted = identity.mint_unique()?;
                        outcome.warnings.push(format!(
                            "sheet {sheet} row {}: missing id regenerated as {minted}",
                            row.row_number
                        ));
                        (minted, true)
                    }
                }
            }
        };

        identity.mark_used(&uuid);
        seen.insert(uuid.clone());
        outcome.deltas.push(AnnotationDelta {
            row_uuid: uuid,
            entity_kind: row.kind,
            composite_key: row.composite_key.clone(),
            fields: row.fields.clone(),
            repaired,
        });
    }

    if !outcome.warnings.is_empty() {
        warn!(count = outcome.warnings.len(), "annotation merge repairs");
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use audit_core::model::annotation::AnnotationFields;
    use audit_core::{CompositeKey, EntityKind, ResurfacePolicy};

    fn key(name: &str) -> CompositeKey {
        CompositeKey::new(vec!["PROD1".into(), "MSSQLSERVER".into(), name.into()])
    }

    fn sheet_row(uuid_cell: &str, name: &str, justification: Option<&str>) -> SheetRow {
        SheetRow {
            kind: EntityKind::Login,
            row_number: 2,
            uuid_cell: uuid_cell.to_string(),
            composite_key: key(name),
            fields: AnnotationFields {
                justification: justification.map(str::to_string),
                ..Default::default()
            },
        }
    }

    fn service() -> IdentityService {
        IdentityService::new(ResurfacePolicy::NewUuid, vec![])
    }

    #[test]
    fn test_clean_rows_pass_through_lowercased() {
        let rows = vec![sheet_row("DEADBEEF", "rogue_admin", Some("approved"))];
        let outcome = merge_annotations(&rows, &KeyIndex::new(), &mut service()).unwrap();
        assert_eq!(outcome.deltas.len(), 1);
        assert_eq!(outcome.deltas[0].row_uuid.as_str(), "deadbeef");
        assert!(!outcome.deltas[0].repaired);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_cleared_uuid_restored_from_key_bridge() {
        let mut known = KeyIndex::new();
        let original = RowUuid::parse("0badf00d").unwrap();
        known.insert_historical(EntityKind::Login, &key("rogue_admin"), original.clone());

        let rows = vec![sheet_row("", "rogue_admin", Some("approved"))];
        let outcome = merge_annotations(&rows, &known, &mut service()).unwrap();

        // the row keeps its identity instead of fabricating a new entity
        assert_eq!(outcome.deltas[0].row_uuid, original);
        assert!(outcome.deltas[0].repaired);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn test_unknown_row_without_uuid_gets_minted_id() {
        let rows = vec![sheet_row("", "brand_new", None)];
        let outcome = merge_annotations(&rows, &KeyIndex::new(), &mut service()).unwrap();
        assert_eq!(outcome.deltas.len(), 1);
        assert!(outcome.deltas[0].repaired);
        assert_eq!(outcome.deltas[0].row_uuid.as_str().len(), 8);
    }

    #[test]
    fn test_copy_pasted_duplicate_keeps_first_occurrence() {
        let mut known = KeyIndex::new();
        let uuid = RowUuid::parse("0badf00d").unwrap();
        known.insert_historical(EntityKind::Login, &key("rogue_admin"), uuid.clone());

        let rows = vec![
            sheet_row("0badf00d", "rogue_admin", Some("first")),
            sheet_row("0badf00d", "rogue_admin", Some("second copy")),
        ];
        let outcome = merge_annotations(&rows, &known, &mut service()).unwrap();

        assert_eq!(outcome.deltas.len(), 1);
        assert_eq!(
            outcome.deltas[0].fields.justification.as_deref(),
            Some("first")
        );
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn test_duplicate_uuid_on_different_entity_is_repaired() {
        let mut known = KeyIndex::new();
        let a = RowUuid::parse("00000001").unwrap();
        let b = RowUuid::parse("00000002").unwrap();
        known.insert_historical(EntityKind::Login, &key("alpha"), a.clone());
        known.insert_historical(EntityKind::Login, &key("bravo"), b.clone());

        // operator pasted alpha's id onto bravo's row
        let rows = vec![
            sheet_row("00000001", "alpha", Some("real")),
            sheet_row("00000001", "bravo", Some("pasted")),
        ];
        let outcome = merge_annotations(&rows, &known, &mut service()).unwrap();

        assert_eq!(outcome.deltas.len(), 2);
        assert_eq!(outcome.deltas[0].row_uuid, a);
        assert_eq!(outcome.deltas[1].row_uuid, b);
        assert!(outcome.deltas[1].repaired);
    }

    #[test]
    fn test_malformed_uuid_is_repaired() {
        let mut known = KeyIndex::new();
        let original = RowUuid::parse("0badf00d").unwrap();
        known.insert_historical(EntityKind::Login, &key("rogue_admin"), original.clone());

        let rows = vec![sheet_row("not-a-uuid", "rogue_admin", Some("approved"))];
        let outcome = merge_annotations(&rows, &known, &mut service()).unwrap();
        assert_eq!(outcome.deltas[0].row_uuid, original);
        assert!(outcome.deltas[0].repaired);
    }
}
