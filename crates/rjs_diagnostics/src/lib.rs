//! rjs_diagnostics: Diagnostic kinds and error reporting infrastructure.
//!
//! The scanner never aborts on malformed-but-bounded input; it forwards a
//! structured [`Diagnostic`] (kind + position) to a caller-supplied
//! [`ErrorReporter`] and returns an error token. Message *rendering* is the
//! caller's concern; this crate only carries the structured data and a plain
//! `Display` form.

use rjs_core::text::TextSpan;
use std::fmt;

/// Diagnostic category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCategory {
    Warning,
    Error,
}

impl fmt::Display for DiagnosticCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticCategory::Warning => write!(f, "warning"),
            DiagnosticCategory::Error => write!(f, "error"),
        }
    }
}

/// Every diagnostic the scanner can produce.
///
/// The set is closed: lexical errors are a fixed taxonomy, so kinds are an
/// enum rather than an open message table. Each kind carries a stable
/// numeric code and a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// String literal hit a newline or end of input before its closing quote.
    UnterminatedString,
    /// Block comment hit end of input before `*/`.
    UnterminatedComment,
    /// Regular-expression literal hit a newline or end of input before the
    /// terminating `/`.
    UnterminatedRegex,
    /// Markup literal hit end of input inside a tag, comment, CDATA block,
    /// processing instruction, or declaration.
    UnterminatedMarkup,
    /// Malformed escape sequence (`\uXXXX`, `\xNN`, or an identifier escape
    /// that does not decode to an identifier character).
    InvalidEscape,
    /// Malformed numeric literal (missing exponent digits, `0x` with no hex
    /// digits).
    InvalidNumericLiteral,
    /// A letter after a regular expression's flags that is not a valid flag.
    InvalidRegexFlag,
    /// A character that cannot begin any token.
    IllegalCharacter,
    /// Structurally invalid markup (`</` past balance, or a `<!` introducer
    /// that is neither a comment, CDATA, nor a declaration).
    MalformedMarkupStructure,
    /// An apparent octal literal containing `8` or `9`; the literal is
    /// re-read as decimal.
    LegacyOctalLiteral,
}

impl DiagnosticKind {
    /// The category of this diagnostic.
    pub fn category(self) -> DiagnosticCategory {
        match self {
            DiagnosticKind::LegacyOctalLiteral => DiagnosticCategory::Warning,
            _ => DiagnosticCategory::Error,
        }
    }

    /// Stable numeric code for this diagnostic.
    pub fn code(self) -> u32 {
        match self {
            DiagnosticKind::UnterminatedString => 1002,
            DiagnosticKind::UnterminatedComment => 1010,
            DiagnosticKind::UnterminatedRegex => 1015,
            DiagnosticKind::UnterminatedMarkup => 1016,
            DiagnosticKind::InvalidEscape => 1021,
            DiagnosticKind::InvalidNumericLiteral => 1024,
            DiagnosticKind::InvalidRegexFlag => 1025,
            DiagnosticKind::IllegalCharacter => 1027,
            DiagnosticKind::MalformedMarkupStructure => 1030,
            DiagnosticKind::LegacyOctalLiteral => 1031,
        }
    }

    /// The human-readable message for this diagnostic.
    pub fn message(self) -> &'static str {
        match self {
            DiagnosticKind::UnterminatedString => "Unterminated string literal.",
            DiagnosticKind::UnterminatedComment => "Unterminated comment.",
            DiagnosticKind::UnterminatedRegex => "Unterminated regular expression literal.",
            DiagnosticKind::UnterminatedMarkup => "Unterminated markup literal.",
            DiagnosticKind::InvalidEscape => "Invalid escape sequence.",
            DiagnosticKind::InvalidNumericLiteral => "Invalid numeric literal.",
            DiagnosticKind::InvalidRegexFlag => "Invalid regular expression flag.",
            DiagnosticKind::IllegalCharacter => "Illegal character.",
            DiagnosticKind::MalformedMarkupStructure => "Malformed markup structure.",
            DiagnosticKind::LegacyOctalLiteral => {
                "Octal literal contains a decimal digit; reading it as decimal."
            }
        }
    }
}

/// A realized diagnostic with location information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnostic {
    /// What went wrong.
    pub kind: DiagnosticKind,
    /// The source span where this diagnostic occurred.
    pub span: TextSpan,
    /// The 1-based line the span starts on.
    pub line: u32,
}

impl Diagnostic {
    /// Create a new diagnostic.
    pub fn new(kind: DiagnosticKind, span: TextSpan, line: u32) -> Self {
        Self { kind, span, line }
    }

    /// The category of this diagnostic.
    pub fn category(&self) -> DiagnosticCategory {
        self.kind.category()
    }

    /// Whether this is an error diagnostic.
    pub fn is_error(&self) -> bool {
        self.kind.category() == DiagnosticCategory::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}: {} RJS{}: {}",
            self.line,
            self.span.start,
            self.category(),
            self.kind.code(),
            self.kind.message()
        )
    }
}

/// Receiver for diagnostics produced during a scan.
///
/// The scanner computes positions; everything user-visible (rendering,
/// filtering, fail-fast policy) belongs to the implementor.
pub trait ErrorReporter {
    fn report(&mut self, diagnostic: Diagnostic);
}

/// A collection of diagnostics accumulated during a scan.
///
/// This is the default reporter: it simply records everything in order.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticCollection {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollection {
    pub fn new() -> Self {
        Self {
            diagnostics: Vec::new(),
        }
    }

    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| !d.is_error()).count()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn clear(&mut self) {
        self.diagnostics.clear();
    }

    /// Sort diagnostics by position.
    pub fn sort(&mut self) {
        self.diagnostics.sort_by_key(|d| d.span.start);
    }
}

impl ErrorReporter for DiagnosticCollection {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.add(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            DiagnosticKind::UnterminatedString.category(),
            DiagnosticCategory::Error
        );
        assert_eq!(
            DiagnosticKind::LegacyOctalLiteral.category(),
            DiagnosticCategory::Warning
        );
    }

    #[test]
    fn test_collection_counts() {
        let mut collection = DiagnosticCollection::new();
        assert!(!collection.has_errors());

        collection.report(Diagnostic::new(
            DiagnosticKind::LegacyOctalLiteral,
            TextSpan::new(0, 2),
            1,
        ));
        assert!(!collection.has_errors());
        assert_eq!(collection.warning_count(), 1);

        collection.report(Diagnostic::new(
            DiagnosticKind::IllegalCharacter,
            TextSpan::new(4, 1),
            1,
        ));
        assert!(collection.has_errors());
        assert_eq!(collection.error_count(), 1);
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn test_display() {
        let diag = Diagnostic::new(DiagnosticKind::UnterminatedString, TextSpan::new(3, 4), 2);
        let rendered = diag.to_string();
        assert!(rendered.contains("error"));
        assert!(rendered.contains("RJS1002"));
    }
}
