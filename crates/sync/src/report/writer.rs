//! Renders the history projection into the operator-editable workbook:
//! hidden id column first, locked key columns, explicitly unlocked
//! editable columns, a dropdown on the review status, the indicator
//! glyph, and the append-only Actions sheet.

use super::layout::{self, header_row};
use audit_core::{
    Action, Annotation, EntityKind, Error, ErrorCode, Fact, Result, RowUuid, Status, StatsSnapshot,
};
use chrono::{DateTime, Utc};
use rust_xlsxwriter::{Color, DataValidation, Format, Workbook, Worksheet, XlsxError};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info};

pub struct ReportContext<'a> {
    pub organization: &'a str,
    pub run_id: i64,
    pub generated_at: DateTime<Utc>,
    pub facts: &'a [Fact],
    pub annotations: &'a HashMap<RowUuid, Annotation>,
    pub actions: &'a [Action],
    pub stats: &'a StatsSnapshot,
}

fn xlsx_err(e: XlsxError) -> Error {
    Error::new(ErrorCode::ReportWriteError, e.to_string()).add_trace("XlsxError conversion")
}

/// The single glyph for a row, chosen from its status and exception state.
pub fn indicator(status: Status, annotation: Option<&Annotation>) -> &'static str {
    let excepted = annotation
        .map(|a| a.is_exception_for(status))
        .unwrap_or(false);
    if excepted {
        return layout::GLYPH_EXCEPTION;
    }
    match status {
        Status::Fail => layout::GLYPH_FAIL,
        Status::Warn => layout::GLYPH_WARN,
        Status::Pass => layout::GLYPH_PASS,
        Status::Info => "",
    }
}

struct Formats {
    header: Format,
    unlocked: Format,
}

impl Formats {
    fn new() -> Self {
        Self {
            header: Format::new()
                .set_bold()
                .set_background_color(Color::RGB(0xD9E1F2)),
            unlocked: Format::new().set_unlocked(),
        }
    }
}

/// Write the full report. The writer never rewrites an operator-edited row
/// before the reader has persisted it; the orchestrator sequences that.
pub fn write_report(path: &Path, ctx: &ReportContext) -> Result<()> {
    let mut workbook = Workbook::new();
    let formats = Formats::new();

    write_summary(workbook.add_worksheet(), ctx, &formats)?;

    let mut by_kind: BTreeMap<EntityKind, Vec<&Fact>> = BTreeMap::new();
    for fact in ctx.facts {
        by_kind.entry(fact.entity_kind).or_default().push(fact);
    }

    for (kind, mut facts) in by_kind {
        facts.sort_by(|a, b| a.composite_key.cmp(&b.composite_key));
        write_kind_sheet(workbook.add_worksheet(), kind, &facts, ctx, &formats)?;
    }

    write_actions_sheet(workbook.add_worksheet(), ctx, &formats)?;

    workbook.save(path).map_err(xlsx_err)?;
    info!(path = %path.display(), facts = ctx.facts.len(), "wrote report");
    Ok(())
}

fn write_summary(sheet: &mut Worksheet, ctx: &ReportContext, formats: &Formats) -> Result<()> {
    sheet.set_name(layout::SUMMARY_SHEET).map_err(xlsx_err)?;

    let rows: Vec<(String, String)> = vec![
        ("Organization".into(), ctx.organization.to_string()),
        ("Run".into(), ctx.run_id.to_string()),
        (
            "Generated".into(),
            ctx.generated_at.format("%Y-%m-%d %H:%M UTC").to_string(),
        ),
        (String::new(), String::new()),
        ("Total Findings".into(), ctx.stats.total_findings.to_string()),
        ("Active Issues".into(), ctx.stats.active_issues.to_string()),
        (
            "Documented Exceptions".into(),
            ctx.stats.documented_exceptions.to_string(),
        ),
        ("Compliant Items".into(), ctx.stats.compliant_items.to_string()),
        (
            "Informational".into(),
            ctx.stats.informational_items.to_string(),
        ),
    ];

    sheet
        .write_string_with_format(0, 0, "Security Audit Summary", &formats.header)
        .map_err(xlsx_err)?;
    let mut row = 2u32;
    for (label, value) in rows {
        sheet.write_string(row, 0, &label).map_err(xlsx_err)?;
        sheet.write_string(row, 1, &value).map_err(xlsx_err)?;
        row += 1;
    }

    row += 1;
    sheet
        .write_string_with_format(row, 0, "Changes This Sync", &formats.header)
        .map_err(xlsx_err)?;
    row += 1;
    for (change_type, count) in &ctx.stats.change_counts {
        sheet
            .write_string(row, 0, change_type.as_str())
            .map_err(xlsx_err)?;
        sheet
            .write_string(row, 1, &count.to_string())
            .map_err(xlsx_err)?;
        row += 1;
    }

    sheet.set_column_width(0, 26).map_err(xlsx_err)?;
    sheet.set_column_width(1, 24).map_err(xlsx_err)?;
    sheet.protect();
    Ok(())
}

fn details_summary(fact: &Fact) -> String {
    let mut out = String::new();
    for (key, value) in &fact.attributes {
        if !out.is_empty() {
            out.push_str("; ");
        }
        match value {
            serde_json::Value::String(s) => {
                out.push_str(key);
                out.push('=');
                out.push_str(s);
            }
            other => {
                out.push_str(key);
                out.push('=');
                out.push_str(&other.to_string());
            }
        }
        if out.len() > 180 {
            out.push('…');
            break;
        }
    }
    out
}

fn write_kind_sheet(
    sheet: &mut Worksheet,
    kind: EntityKind,
    facts: &[&Fact],
    ctx: &ReportContext,
    formats: &Formats,
) -> Result<()> {
    sheet.set_name(kind.sheet_name()).map_err(xlsx_err)?;

    let headers = header_row(kind);
    for (col, header) in headers.iter().enumerate() {
        sheet
            .write_string_with_format(0, col as u16, header, &formats.header)
            .map_err(xlsx_err)?;
    }

    let key_count = kind.key_fields().len();
    let first_editable = layout::first_editable_column(kind);

    for (i, fact) in facts.iter().enumerate() {
        let row = (i + 1) as u32;
        let annotation = ctx.annotations.get(&fact.row_uuid);

        sheet
            .write_string(row, 0, fact.row_uuid.as_str())
            .map_err(xlsx_err)?;
        for (k, part) in fact.composite_key.parts().iter().enumerate() {
            sheet
                .write_string(row, (k + 1) as u16, part)
                .map_err(xlsx_err)?;
        }

        let mut col = (1 + key_count) as u16;
        sheet
            .write_string(row, col, fact.status.as_str())
            .map_err(xlsx_err)?;
        col += 1;
        sheet.write_string(row, col, &fact.rule_id).map_err(xlsx_err)?;
        col += 1;
        sheet
            .write_string(row, col, fact.risk_level.as_str())
            .map_err(xlsx_err)?;
        col += 1;
        sheet
            .write_string(row, col, indicator(fact.status, annotation))
            .map_err(xlsx_err)?;
        col += 1;
        sheet
            .write_string(row, col, &details_summary(fact))
            .map_err(xlsx_err)?;

        // the four editable cells, explicitly unlocked
        let fields = annotation.map(|a| &a.fields);
        let editable: [Option<String>; 4] = [
            fields.and_then(|f| f.review_status.clone()),
            fields.and_then(|f| f.justification.clone()),
            fields.and_then(|f| f.last_reviewed.map(|d| d.to_string())),
            fields.and_then(|f| f.purpose.clone()),
        ];
        for (offset, value) in editable.iter().enumerate() {
            let col = first_editable + offset as u16;
            match value {
                Some(text) => sheet
                    .write_string_with_format(row, col, text, &formats.unlocked)
                    .map_err(xlsx_err)?,
                None => sheet
                    .write_blank(row, col, &formats.unlocked)
                    .map_err(xlsx_err)?,
            };
        }
    }

    let last_row = facts.len() as u32;
    if last_row > 0 {
        let validation = DataValidation::new()
            .allow_list_strings(&layout::REVIEW_STATUS_VALUES)
            .map_err(xlsx_err)?;
        sheet
            .add_data_validation(1, first_editable, last_row, first_editable, &validation)
            .map_err(xlsx_err)?;
    }

    sheet.set_column_width(0, 10).map_err(xlsx_err)?;
    for col in 1..=key_count {
        sheet.set_column_width(col as u16, 22).map_err(xlsx_err)?;
    }
    sheet
        .set_column_width(first_editable + 1, 36)
        .map_err(xlsx_err)?;
    sheet
        .set_column_width(first_editable + 3, 30)
        .map_err(xlsx_err)?;
    sheet.set_column_hidden(0).map_err(xlsx_err)?;
    sheet.set_freeze_panes(1, 0).map_err(xlsx_err)?;
    sheet.protect();

    debug!(sheet = kind.sheet_name(), rows = facts.len(), "wrote sheet");
    Ok(())
}

fn write_actions_sheet(
    sheet: &mut Worksheet,
    ctx: &ReportContext,
    formats: &Formats,
) -> Result<()> {
    sheet.set_name(layout::ACTIONS_SHEET).map_err(xlsx_err)?;

    let headers = [
        layout::ACTION_ID_HEADER,
        "Date",
        "Type",
        "Risk",
        "Sheet",
        "Key",
        "Description",
        layout::DATE_OVERRIDE_HEADER,
        layout::NOTES_HEADER,
    ];
    for (col, header) in headers.iter().enumerate() {
        sheet
            .write_string_with_format(0, col as u16, *header, &formats.header)
            .map_err(xlsx_err)?;
    }

    for (i, action) in ctx.actions.iter().enumerate() {
        let row = (i + 1) as u32;
        let id = action
            .id
            .ok_or_else(|| Error::internal("unpersisted action reached the report writer"))?;

        sheet
            .write_string(row, 0, &id.to_string())
            .map_err(xlsx_err)?;
        sheet
            .write_string(row, 1, &action.detected_at.format("%Y-%m-%d %H:%M").to_string())
            .map_err(xlsx_err)?;
        sheet
            .write_string(row, 2, action.change_type.as_str())
            .map_err(xlsx_err)?;
        sheet
            .write_string(row, 3, action.risk_level.map(|r| r.as_str()).unwrap_or(""))
            .map_err(xlsx_err)?;
        sheet
            .write_string(row, 4, action.entity_kind.sheet_name())
            .map_err(xlsx_err)?;
        sheet
            .write_string(row, 5, &action.composite_key.canonical())
            .map_err(xlsx_err)?;
        sheet
            .write_string(row, 6, &action.description)
            .map_err(xlsx_err)?;

        match action.user_date_override {
            Some(date) => sheet
                .write_string_with_format(row, 7, &date.to_string(), &formats.unlocked)
                .map_err(xlsx_err)?,
            None => sheet.write_blank(row, 7, &formats.unlocked).map_err(xlsx_err)?,
        };
        match &action.user_notes {
            Some(notes) => sheet
                .write_string_with_format(row, 8, notes, &formats.unlocked)
                .map_err(xlsx_err)?,
            None => sheet.write_blank(row, 8, &formats.unlocked).map_err(xlsx_err)?,
        };
    }

    sheet.set_column_width(1, 16).map_err(xlsx_err)?;
    sheet.set_column_width(5, 40).map_err(xlsx_err)?;
    sheet.set_column_width(6, 46).map_err(xlsx_err)?;
    sheet.set_column_width(8, 30).map_err(xlsx_err)?;
    sheet.set_column_hidden(0).map_err(xlsx_err)?;
    sheet.set_freeze_panes(1, 0).map_err(xlsx_err)?;
    sheet.protect();
    Ok(())
}
