//! Text canonicalization shared by the fact normalizer and the report
//! reader. Keys are built from stable SQL-visible names; display strings
//! may carry icon decorations that must be stripped before key
//! construction, and all text is NFC-normalized with case preserved.

use unicode_normalization::UnicodeNormalization;

/// NFC-normalize, preserving case.
pub fn nfc(s: &str) -> String {
    s.nfc().collect()
}

fn is_decoration(c: char) -> bool {
    let cp = c as u32;
    matches!(
        cp,
        0x2190..=0x2BFF   // arrows, misc symbols, dingbats
        | 0x1F000..=0x1FAFF // emoji blocks
        | 0xFE00..=0xFE0F   // variation selectors
        | 0x200D            // zero-width joiner
    )
}

/// Strip leading icon decorations ("🔌 CONNECT" -> "CONNECT") and trim
/// surrounding whitespace, then NFC-normalize.
pub fn canonical_value(s: &str) -> String {
    let stripped = s.trim_start_matches(|c: char| is_decoration(c) || c.is_whitespace());
    nfc(stripped.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icon_decorated_value_is_stripped() {
        assert_eq!(canonical_value("🔌 CONNECT"), "CONNECT");
        assert_eq!(canonical_value("⚠️ ALTER ANY LOGIN"), "ALTER ANY LOGIN");
        assert_eq!(canonical_value("CONNECT"), "CONNECT");
    }

    #[test]
    fn test_case_and_interior_text_preserved(){
        assert_eq!(canonical_value("  Payroll DB  "), "Payroll DB");
        assert_eq!(canonical_value("rogue_admin"), "rogue_admin");
    }

    #[test]
    fn test_nfc_normalization() {
        // e + combining acute composes to é
        let decomposed = "Jose\u{0301}";
        assert_eq!(canonical_value(decomposed), "Jos\u{00e9}");
    }
}
