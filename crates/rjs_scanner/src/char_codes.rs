//! Character classification used by the scanner.

/// Check if a character is a raw line terminator (before normalization).
#[inline]
pub fn is_line_terminator(ch: char) -> bool {
    ch == '\n' || ch == '\r' || ch == '\u{2028}' || ch == '\u{2029}'
}

/// Check if a character is whitespace (not a line terminator).
#[inline]
pub fn is_white_space_single_line(ch: char) -> bool {
    matches!(
        ch,
        ' ' | '\t'
            | '\u{000B}' // vertical tab
            | '\u{000C}' // form feed
            | '\u{00A0}' // no-break space
            | '\u{1680}' // ogham space mark
            | '\u{2000}'..='\u{200A}' // various spaces
            | '\u{202F}' // narrow no-break space
            | '\u{205F}' // medium mathematical space
            | '\u{3000}' // ideographic space
    )
}

/// Check if a character is an invisible format-control (category Cf) code
/// point. These are dropped by the character source and never reach the
/// scanner.
#[inline]
pub fn is_format_control(ch: char) -> bool {
    matches!(
        ch,
        '\u{00AD}' // soft hyphen
            | '\u{0600}'..='\u{0605}' // arabic number signs
            | '\u{061C}' // arabic letter mark
            | '\u{06DD}' // arabic end of ayah
            | '\u{070F}' // syriac abbreviation mark
            | '\u{08E2}' // arabic disputed end of ayah
            | '\u{180E}' // mongolian vowel separator
            | '\u{200B}'..='\u{200F}' // zero-width and direction marks
            | '\u{202A}'..='\u{202E}' // embedding/override controls
            | '\u{2060}'..='\u{2064}' // word joiner, invisible operators
            | '\u{2066}'..='\u{206F}' // isolate and deprecated controls
            | '\u{FEFF}' // zero-width no-break space / BOM
            | '\u{FFF9}'..='\u{FFFB}' // interlinear annotation
            | '\u{110BD}' // kaithi number sign
            | '\u{110CD}'
            | '\u{1D173}'..='\u{1D17A}' // musical controls
            | '\u{E0001}' // language tag
            | '\u{E0020}'..='\u{E007F}' // tag characters
    )
}

/// Check if a character is a decimal digit.
#[inline]
pub fn is_digit(ch: char) -> bool {
    ch.is_ascii_digit()
}

/// Check if a character is an octal digit (0-7).
#[inline]
pub fn is_octal_digit(ch: char) -> bool {
    matches!(ch, '0'..='7')
}

/// Check if a character is a hex digit.
#[inline]
pub fn is_hex_digit(ch: char) -> bool {
    ch.is_ascii_hexdigit()
}

/// The numeric value of a hex digit.
#[inline]
pub fn hex_value(ch: char) -> Option<u32> {
    ch.to_digit(16)
}

/// Check if a character can start an identifier.
#[inline]
pub fn is_identifier_start(ch: char) -> bool {
    ch == '_'
        || ch == '$'
        || ch.is_ascii_alphabetic()
        || (ch as u32 > 0x7F && unicode_xid::UnicodeXID::is_xid_start(ch))
}

/// Check if a character can be part of an identifier.
#[inline]
pub fn is_identifier_part(ch: char) -> bool {
    ch == '_'
        || ch == '$'
        || ch.is_ascii_alphanumeric()
        || (ch as u32 > 0x7F && unicode_xid::UnicodeXID::is_xid_continue(ch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_terminators() {
        assert!(is_line_terminator('\n'));
        assert!(is_line_terminator('\r'));
        assert!(is_line_terminator('\u{2028}'));
        assert!(!is_line_terminator(' '));
    }

    #[test]
    fn test_format_controls() {
        assert!(is_format_control('\u{00AD}'));
        assert!(is_format_control('\u{200C}')); // zero-width non-joiner
        assert!(is_format_control('\u{FEFF}'));
        assert!(!is_format_control('\u{00A0}')); // no-break space is whitespace
    }

    #[test]
    fn test_identifier_chars() {
        assert!(is_identifier_start('a'));
        assert!(is_identifier_start('$'));
        assert!(is_identifier_start('_'));
        assert!(is_identifier_start('λ'));
        assert!(!is_identifier_start('1'));
        assert!(is_identifier_part('1'));
        assert!(!is_identifier_part('-'));
    }
}
