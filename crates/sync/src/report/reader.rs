//! Parses an operator-edited report back into structured rows. The reader
//! depends only on sheet names, the hidden first column and header labels;
//! it tolerates per-row damage (the damaged row is skipped with a warning
//! and the stored annotation is preserved).

use super::layout;
use audit_core::model::annotation::AnnotationFields;
use audit_core::text::canonical_value;
use audit_core::{CompositeKey, EntityKind, Error, ErrorCode, Result};
use calamine::{open_workbook, Data, Reader, Xlsx};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// One data row as read back from a kind sheet; the raw id cell is kept so
/// the merge layer can repair empty or malformed ids.
#[derive(Debug, Clone)]
pub struct SheetRow {
    pub kind: EntityKind,
    /// 1-based row number on the sheet, for warnings
    pub row_number: usize,
    pub uuid_cell: String,
    pub composite_key: CompositeKey,
    pub fields: AnnotationFields,
}

/// Operator edits on the actions sheet
#[derive(Debug, Clone, PartialEq)]
pub struct ActionEdit {
    pub action_id: i64,
    pub user_date_override: Option<NaiveDate>,
    pub user_notes: Option<String>,
}

#[derive(Debug, Default)]
pub struct ReportContent {
    pub rows: Vec<SheetRow>,
    pub action_edits: Vec<ActionEdit>,
    /// per-row recoveries, surfaced as Warning actions
    pub warnings: Vec<String>,
}

/// Preflight: the report must not be held open by an external viewer.
pub fn ensure_writable(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        let sentinel = parent.join(format!("~${}", name.to_string_lossy()));
        if sentinel.exists() {
            return Err(Error::report_locked(format!(
                "{} is open in another application",
                path.display()
            )));
        }
    }
    std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| {
            Error::report_locked(format!("{} is not writable: {e}", path.display()))
        })?;
    Ok(())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Float(f) => {
            if f.fract() == 0.0 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.date().to_string())
            .unwrap_or_default(),
        _ => String::new(),
    }
}

fn optional_text(cell: Option<&Data>) -> Option<String> {
    let text = cell.map(cell_text).unwrap_or_default();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_review_date(cell: Option<&Data>) -> std::result::Result<Option<NaiveDate>, String> {
    match cell {
        None | Some(Data::Empty) => Ok(None),
        Some(Data::DateTime(dt)) => match dt.as_datetime() {
            Some(d) => Ok(Some(d.date())),
            None => Err("unrepresentable date cell".to_string()),
        },
        Some(other) => {
            let text = cell_text(other);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .or_else(|_| NaiveDate::parse_from_str(trimmed, "%m/%d/%Y"))
                .map(Some)
                .map_err(|_| format!("unparseable date {trimmed:?}"))
        }
    }
}

struct HeaderMap {
    indices: HashMap<String, usize>,
}

impl HeaderMap {
    fn from_row(row: &[Data]) -> Self {
        let indices = row
            .iter()
            .enumerate()
            .filter_map(|(i, cell)| {
                let text = cell_text(cell);
                let trimmed = text.trim().to_string();
                if trimmed.is_empty() {
                    None
                } else {
                    Some((trimmed, i))
                }
            })
            .collect();
        Self { indices }
    }

    fn get(&self, header: &str) -> Option<usize> {
        self.indices.get(header).copied()
    }

    fn get_any(&self, headers: &[&str]) -> Option<usize> {
        headers.iter().find_map(|h| self.get(h))
    }
}

/// Parse the full report. Sheets that do not match a registered kind (or
/// the Actions sheet) are ignored.
pub fn read_report(path: &Path) -> Result<ReportContent> {
    let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e| {
        Error::new(
            ErrorCode::ReportParseError,
            format!("cannot open {}: {e}", path.display()),
        )
    })?;

    let mut content = ReportContent::default();
    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();

    for name in sheet_names {
        if name == layout::ACTIONS_SHEET {
            read_actions_sheet(&mut workbook, &name, &mut content)?;
            continue;
        }
        let Some(kind) = EntityKind::from_sheet_name(&name) else {
            continue;
        };
        read_kind_sheet(&mut workbook, &name, kind, &mut content)?;
    }

    debug!(
        rows = content.rows.len(),
        action_edits = content.action_edits.len(),
        warnings = content.warnings.len(),
        "read report"
    );
    Ok(content)
}

fn read_kind_sheet(
    workbook: &mut Xlsx<std::io::BufReader<std::fs::File>>,
    name: &str,
    kind: EntityKind,
    content: &mut ReportContent,
) -> Result<()> {
    let range = workbook.worksheet_range(name).map_err(|e| {
        Error::new(ErrorCode::ReportParseError, format!("sheet {name}: {e}"))
    })?;
    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(());
    };
    let headers = HeaderMap::from_row(header_row);

    let Some(id_col) = headers.get(layout::ROW_ID_HEADER) else {
        content
            .warnings
            .push(format!("sheet {name}: missing hidden id column, sheet skipped"));
        return Ok(());
    };
    let key_cols: Option<Vec<usize>> = kind
        .key_fields()
        .iter()
        .map(|f| headers.get(&layout::key_header(f)))
        .collect();
    let Some(key_cols) = key_cols else {
        content
            .warnings
            .push(format!("sheet {name}: key columns missing, sheet skipped"));
        return Ok(());
    };

    let review_col = headers.get(layout::REVIEW_STATUS_HEADER);
    let justification_col = headers.get(layout::JUSTIFICATION_HEADER);
    let reviewed_col =
        headers.get_any(&[layout::LAST_REVIEWED_HEADER, layout::LAST_REVISED_ALIAS]);
    let notes_col = headers.get_any(&[layout::NOTES_HEADER, layout::PURPOSE_ALIAS]);

    for (i, row) in rows.enumerate() {
        let row_number = i + 2;
        let key_parts: Vec<String> = key_cols
            .iter()
            .map(|&c| canonical_value(&row.get(c).map(cell_text).unwrap_or_default()))
            .collect();
        // fully blank rows (padding) are not data
        if key_parts.iter().all(|p| p.is_empty()) {
            continue;
        }

        let last_reviewed = match parse_review_date(reviewed_col.and_then(|c| row.get(c))) {
            Ok(date) => date,
            Err(reason) => {
                warn!(sheet = name, row = row_number, reason = %reason, "skipped damaged row");
                content.warnings.push(format!(
                    "sheet {name} row {row_number}: {reason}; stored annotation preserved"
                ));
                continue;
            }
        };

        content.rows.push(SheetRow {
            kind,
            row_number,
            uuid_cell: row.get(id_col).map(cell_text).unwrap_or_default(),
            composite_key: CompositeKey::new(key_parts),
            fields: AnnotationFields {
                purpose: optional_text(notes_col.and_then(|c| row.get(c))),
                justification: optional_text(justification_col.and_then(|c| row.get(c))),
                review_status: optional_text(review_col.and_then(|c| row.get(c))),
                last_reviewed,
            },
        });
    }

    Ok(())
}

fn read_actions_sheet(
    workbook: &mut Xlsx<std::io::BufReader<std::fs::File>>,
    name: &str,
    content: &mut ReportContent,
) -> Result<()> {
    let range = workbook.worksheet_range(name).map_err(|e| {
        Error::new(ErrorCode::ReportParseError, format!("sheet {name}: {e}"))
    })?;
    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok(());
    };
    let headers = HeaderMap::from_row(header_row);

    let (Some(id_col), override_col, notes_col) = (
        headers.get(layout::ACTION_ID_HEADER),
        headers.get(layout::DATE_OVERRIDE_HEADER),
        headers.get(layout::NOTES_HEADER),
    ) else {
        content
            .warnings
            .push(format!("sheet {name}: missing action id column, edits skipped"));
        return Ok(());
    };

    for (i, row) in rows.enumerate() {
        let row_number = i + 2;
        let Some(action_id) = row
            .get(id_col)
            .map(cell_text)
            .and_then(|t| t.trim().parse::<i64>().ok())
        else {
            continue;
        };

        let user_date_override = match parse_review_date(override_col.and_then(|c| row.get(c))) {
            Ok(date) => date,
            Err(reason) => {
                content.warnings.push(format!(
                    "sheet {name} row {row_number}: {reason}; date override ignored"
                ));
                None
            }
        };

        content.action_edits.push(ActionEdit {
            action_id,
            user_date_override,
            user_notes: optional_text(notes_col.and_then(|c| row.get(c))),
        });
    }

    Ok(())
}
