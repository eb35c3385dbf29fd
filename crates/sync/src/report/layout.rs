//! The sheet contract shared by the writer and the reader. The reader
//! depends only on sheet names, the hidden first column and the header
//! labels; everything cosmetic belongs to the writer.

use audit_core::EntityKind;

/// Hidden first column on every data sheet
pub const ROW_ID_HEADER: &str = "Row ID";
/// Hidden first column on the actions sheet
pub const ACTION_ID_HEADER: &str = "Action ID";

pub const STATUS_HEADER: &str = "Status";
pub const RULE_HEADER: &str = "Rule";
pub const RISK_HEADER: &str = "Risk";
pub const INDICATOR_HEADER: &str = "Ind";
pub const DETAILS_HEADER: &str = "Details";

pub const REVIEW_STATUS_HEADER: &str = "Review Status";
pub const JUSTIFICATION_HEADER: &str = "Justification";
pub const LAST_REVIEWED_HEADER: &str = "Last Reviewed";
/// Accepted alias for the review-date column on operator-edited sheets
pub const LAST_REVISED_ALIAS: &str = "Last Revised";
pub const NOTES_HEADER: &str = "Notes";
/// Accepted alias for the notes column
pub const PURPOSE_ALIAS: &str = "Purpose";

pub const SUMMARY_SHEET: &str = "Summary";
pub const ACTIONS_SHEET: &str = "Actions";

pub const DATE_OVERRIDE_HEADER: &str = "Date Override";

/// Review-status dropdown values
pub const REVIEW_STATUS_VALUES: [&str; 3] = ["Reviewed", "Exception", "Pending"];

/// Indicator glyphs chosen from the state machine's view of the row
pub const GLYPH_EXCEPTION: &str = "✦";
pub const GLYPH_FAIL: &str = "✖";
pub const GLYPH_WARN: &str = "▲";
pub const GLYPH_PASS: &str = "✔";

/// Header label for one composite-key field
pub fn key_header(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for (i, word) in field.split('_').enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.extend(chars);
        }
    }
    out
}

/// Full header row for one kind's sheet, hidden id column included
pub fn header_row(kind: EntityKind) -> Vec<String> {
    let mut headers = vec![ROW_ID_HEADER.to_string()];
    headers.extend(kind.key_fields().iter().map(|f| key_header(f)));
    headers.extend(
        [
            STATUS_HEADER,
            RULE_HEADER,
            RISK_HEADER,
            INDICATOR_HEADER,
            DETAILS_HEADER,
            REVIEW_STATUS_HEADER,
            JUSTIFICATION_HEADER,
            LAST_REVIEWED_HEADER,
            NOTES_HEADER,
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    headers
}

/// Column index of the first editable column on a kind's sheet
pub fn first_editable_column(kind: EntityKind) -> u16 {
    // id + keys + status/rule/risk/ind/details
    (1 + kind.key_fields().len() + 5) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_headers_are_title_cased() {
        assert_eq!(key_header("login_name"), "Login Name");
        assert_eq!(key_header("server"), "Server");
        assert_eq!(key_header("database"), "Database");
    }

    #[test]
    fn test_header_row_shape() {
        let headers = header_row(EntityKind::Login);
        assert_eq!(headers[0], ROW_ID_HEADER);
        assert_eq!(headers[1], "Server");
        assert_eq!(headers[2], "Instance");
        assert_eq!(headers[3], "Login Name");
        assert_eq!(headers[4], STATUS_HEADER);
        assert_eq!(
            headers.last().map(String::as_str),
            Some(NOTES_HEADER)
        );
    }

    #[test]
    fn test_first_editable_column() {
        // login: id + 3 keys + 5 locked columns
        assert_eq!(first_editable_column(EntityKind::Login), 9);
        // instance: id + 2 keys + 5 locked columns
        assert_eq!(first_editable_column(EntityKind::Instance), 8);
    }
}
