//! RFC 4518 string preparation.
//!
//! Matching rules reference these steps as a pipeline; the standard
//! order is Transcode, Map, Normalize, Prohibit, then the
//! insignificant-character step appropriate to the syntax.

use crate::result::{LdapError, Result};

use unicode_normalization::UnicodeNormalization;

/// Code points mapped to nothing (RFC 4518, section 2.2).
const MAP_NOTHING: &[(u32, u32)] = &[
    (0x0000, 0x0008),
    (0x000E, 0x001F),
    (0x007F, 0x0084),
    (0x0086, 0x009F),
    (0x00AD, 0x00AD),
    (0x034F, 0x034F),
    (0x06DD, 0x06DD),
    (0x070F, 0x070F),
    (0x1806, 0x1806),
    (0x180B, 0x180E),
    (0x200B, 0x200F),
    (0x202A, 0x202E),
    (0x2060, 0x2063),
    (0x206A, 0x206F),
    (0xFE00, 0xFE0F),
    (0xFEFF, 0xFEFF),
    (0xFFF9, 0xFFFB),
    (0xFFFC, 0xFFFC),
    (0x1D173, 0x1D17A),
    (0xE0001, 0xE0001),
    (0xE0020, 0xE007F),
];

/// Code points mapped to SPACE (RFC 4518, section 2.2).
const MAP_SPACE: &[(u32, u32)] = &[
    (0x0009, 0x000D),
    (0x0020, 0x0020),
    (0x0085, 0x0085),
    (0x00A0, 0x00A0),
    (0x1680, 0x1680),
    (0x2000, 0x200A),
    (0x2028, 0x2029),
    (0x202F, 0x202F),
    (0x205F, 0x205F),
    (0x3000, 0x3000),
];

/// Prohibited code points (RFC 4518, section 2.4). The full RFC table
/// enumerates every unassigned code point of Unicode 3.2; this list
/// covers the stable classes: private use, non-characters, surrogates
/// as replaced by decoding, and the change-display/deprecated marks.
const PROHIBITED: &[(u32, u32)] = &[
    (0x0340, 0x0341),
    (0x200E, 0x200F),
    (0x202A, 0x202E),
    (0x206A, 0x206F),
    (0xE000, 0xF8FF),
    (0xFDD0, 0xFDEF),
    (0xFFFD, 0xFFFF),
    (0x1FFFE, 0x1FFFF),
    (0x2FFFE, 0x2FFFF),
    (0x3FFFE, 0x3FFFF),
    (0x4FFFE, 0x4FFFF),
    (0x5FFFE, 0x5FFFF),
    (0x6FFFE, 0x6FFFF),
    (0x7FFFE, 0x7FFFF),
    (0x8FFFE, 0x8FFFF),
    (0x9FFFE, 0x9FFFF),
    (0xAFFFE, 0xAFFFF),
    (0xBFFFE, 0xBFFFF),
    (0xCFFFE, 0xCFFFF),
    (0xDFFFE, 0xDFFFF),
    (0xEFFFE, 0xEFFFF),
    (0xF0000, 0xFFFFD),
    (0xFFFFE, 0xFFFFF),
    (0x100000, 0x10FFFD),
    (0x10FFFE, 0x10FFFF),
];

fn in_ranges(ranges: &[(u32, u32)], c: char) -> bool {
    let c = c as u32;
    ranges.iter().any(|&(lo, hi)| c >= lo && c <= hi)
}

/// Transcode to Unicode. Values arrive as UTF-8 strings, so this step
/// is the identity; it exists so pipelines read like the RFC.
pub fn transcode(value: &str) -> String {
    value.to_owned()
}

/// Map step: drop the mapped-to-nothing code points and fold the various
/// space characters to SPACE.
pub fn map_characters(value: &str) -> String {
    value
        .chars()
        .filter(|&c| !in_ranges(MAP_NOTHING, c))
        .map(|c| if in_ranges(MAP_SPACE, c) { ' ' } else { c })
        .collect()
}

/// Case folding for case-ignore rules.
pub fn case_fold(value: &str) -> String {
    value.chars().flat_map(char::to_lowercase).collect()
}

/// Normalize step: Unicode NFKC.
pub fn normalize(value: &str) -> String {
    value.nfkc().collect()
}

/// Prohibit step: reject values containing prohibited code points.
pub fn prohibit(value: &str) -> Result<()> {
    match value.chars().find(|&c| in_ranges(PROHIBITED, c)) {
        Some(c) => Err(LdapError::InvalidValue(format!(
            "prohibited character U+{:04X}",
            c as u32
        ))),
        None => Ok(()),
    }
}

/// Insignificant character handling for space-separated strings: the
/// value is surrounded by single spaces and each inner space sequence
/// becomes two spaces, so assertions cannot match across word
/// boundaries.
pub fn insignificant_space(value: &str) -> String {
    let trimmed = value.trim_matches(' ');
    let mut out = String::with_capacity(trimmed.len() + 2);
    out.push(' ');
    let mut in_run = false;
    for c in trimmed.chars() {
        if c == ' ' {
            if !in_run {
                out.push_str("  ");
                in_run = true;
            }
        } else {
            in_run = false;
            out.push(c);
        }
    }
    out.push(' ');
    out
}

/// Insignificant character handling for numeric strings: spaces carry no
/// meaning and are removed.
pub fn insignificant_numeric(value: &str) -> String {
    value.chars().filter(|&c| c != ' ').collect()
}

/// Insignificant character handling for telephone numbers: spaces and
/// hyphen variants are removed.
pub fn insignificant_telephone(value: &str) -> String {
    const HYPHENS: &[char] = &[
        ' ', '\u{002D}', '\u{058A}', '\u{2010}', '\u{2011}', '\u{2212}', '\u{FE63}', '\u{FF0D}',
    ];
    value.chars().filter(|c| !HYPHENS.contains(c)).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn map_drops_and_folds() {
        assert_eq!(map_characters("a\u{00AD}b\tc"), "ab c");
        assert_eq!(map_characters("x\u{200B}y"), "xy");
    }

    #[test]
    fn fold_lowercases() {
        assert_eq!(case_fold("FooBAR"), "foobar");
        assert_eq!(case_fold("İ"), "i\u{307}");
    }

    #[test]
    fn nfkc_compatibility() {
        assert_eq!(normalize("ﬀ"), "ff");
    }

    #[test]
    fn prohibited_rejected() {
        assert!(prohibit("ok").is_ok());
        assert!(prohibit("bad\u{E000}").is_err());
    }

    #[test]
    fn space_squashing() {
        assert_eq!(insignificant_space("foo  bar"), " foo  bar ");
        assert_eq!(insignificant_space("  foo "), " foo ");
        assert_eq!(insignificant_space("a b"), " a  b ");
    }

    #[test]
    fn numeric_spaces_removed() {
        assert_eq!(insignificant_numeric(" 123 456 "), "123456");
    }
}
