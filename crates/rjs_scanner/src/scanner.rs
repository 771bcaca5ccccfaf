//! The rjs scanner/lexer.
//!
//! Converts source text into a stream of classified tokens for the parser.
//! One scanner is constructed per source unit; each `next_token` call
//! consumes input. Regular-expression and markup literals are only produced
//! through the explicit mode-switch entries, because a bare scanner cannot
//! disambiguate `/` and `<` without grammar context.

use crate::buffer::ScanBuffer;
use crate::char_codes::*;
use crate::keywords;
use crate::source::CharacterSource;
use crate::token::{CommentKind, Token, TokenFlags, TokenKind, TokenValue};
use rjs_core::intern::StringInterner;
use rjs_core::text::TextSpan;
use rjs_diagnostics::{Diagnostic, DiagnosticCollection, DiagnosticKind, ErrorReporter};
use std::io::Read;

/// Fatal scan failure.
///
/// Everything lexically malformed is recoverable (an error token plus a
/// diagnostic); the only way a scan dies is the backing stream failing.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("failed to read source text: {0}")]
    Io(#[from] std::io::Error),
}

/// Language version the scanner targets.
///
/// Only the contextually reserved words consult this: `let` and `yield`
/// scan as plain identifiers below `Es6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LanguageVersion {
    Es3,
    Es5,
    Es6,
}

impl Default for LanguageVersion {
    fn default() -> Self {
        LanguageVersion::Es6
    }
}

/// Configuration for a scanner instance.
#[derive(Debug, Clone, Copy)]
pub struct ScannerOptions {
    /// Version/compatibility policy for contextual keywords.
    pub version: LanguageVersion,
    /// Return comments as tokens instead of skipping them as trivia.
    pub record_comments: bool,
    /// Scan future-reserved words as plain identifiers.
    pub reserved_as_names: bool,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            version: LanguageVersion::default(),
            record_comments: false,
            reserved_as_names: false,
        }
    }
}

/// Sub-state of the regex literal scanner: a `/` terminates the literal
/// only outside a `[...]` character class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegexState {
    Pattern,
    CharClass,
}

/// The scanner converts script source text into tokens.
pub struct Scanner<R: ErrorReporter = DiagnosticCollection> {
    source: CharacterSource,
    buf: ScanBuffer,
    /// Identifier interner, scoped to this scanner instance.
    names: StringInterner,
    reporter: R,
    options: ScannerOptions,

    /// Cursor over logical characters (pushback-adjusted).
    cursor: usize,
    /// Current 1-based line number.
    line: u32,
    /// Cursor index where the current line began.
    line_start: usize,
    /// Line start before the most recent newline, so one pushed-back
    /// newline can undo its increment.
    prev_line_start: usize,

    /// Start of the current token.
    token_start: usize,
    /// End of the current token (exclusive).
    token_end: usize,
    /// Line the current token starts on.
    token_line: u32,
    /// Flags of the current token.
    flags: TokenFlags,
    /// Kind of the most recently produced token.
    last_kind: TokenKind,

    /// Whether a real token (not whitespace, a comment, or a dash) has
    /// appeared on the current line. Disambiguates `--` from a clean-line
    /// `-->` comment.
    dirty_line: bool,

    // Literal side channels for the last token.
    string_value: String,
    number_value: f64,
    quote_char: Option<char>,
    regex_flags: String,
    comment_kind: Option<CommentKind>,
    comment_text: String,
}

impl Scanner<DiagnosticCollection> {
    /// Create a scanner over a full in-memory source string.
    pub fn new(text: &str) -> Self {
        Self::with_options(text, ScannerOptions::default())
    }

    /// Create a scanner over an in-memory source string with options.
    pub fn with_options(text: &str, options: ScannerOptions) -> Self {
        Self::build(
            CharacterSource::from_text(text),
            1,
            options,
            DiagnosticCollection::new(),
        )
    }

    /// Create a scanner over a streaming reader. `first_line` sets the
    /// starting line number, useful for embedded fragments.
    pub fn from_reader(reader: Box<dyn Read>, first_line: u32, options: ScannerOptions) -> Self {
        Self::build(
            CharacterSource::from_reader(reader),
            first_line,
            options,
            DiagnosticCollection::new(),
        )
    }

    /// The diagnostics accumulated by the default reporter.
    pub fn diagnostics(&self) -> &DiagnosticCollection {
        &self.reporter
    }

    /// Take the accumulated diagnostics, leaving an empty collection.
    pub fn take_diagnostics(&mut self) -> DiagnosticCollection {
        std::mem::take(&mut self.reporter)
    }
}

impl<R: ErrorReporter> Scanner<R> {
    fn build(source: CharacterSource, first_line: u32, options: ScannerOptions, reporter: R) -> Self {
        Self {
            source,
            buf: ScanBuffer::new(),
            names: StringInterner::new(),
            reporter,
            options,
            cursor: 0,
            line: first_line,
            line_start: 0,
            prev_line_start: 0,
            token_start: 0,
            token_end: 0,
            token_line: first_line,
            flags: TokenFlags::NONE,
            last_kind: TokenKind::Error,
            dirty_line: false,
            string_value: String::new(),
            number_value: 0.0,
            quote_char: None,
            regex_flags: String::new(),
            comment_kind: None,
            comment_text: String::new(),
        }
    }

    /// Rebind this scanner to a caller-supplied diagnostic reporter.
    pub fn with_reporter<R2: ErrorReporter>(self, reporter: R2) -> Scanner<R2> {
        Scanner {
            source: self.source,
            buf: self.buf,
            names: self.names,
            reporter,
            options: self.options,
            cursor: self.cursor,
            line: self.line,
            line_start: self.line_start,
            prev_line_start: self.prev_line_start,
            token_start: self.token_start,
            token_end: self.token_end,
            token_line: self.token_line,
            flags: self.flags,
            last_kind: self.last_kind,
            dirty_line: self.dirty_line,
            string_value: self.string_value,
            number_value: self.number_value,
            quote_char: self.quote_char,
            regex_flags: self.regex_flags,
            comment_kind: self.comment_kind,
            comment_text: self.comment_text,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Current 1-based line number.
    #[inline]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Current 0-based column on the current line.
    #[inline]
    pub fn column(&self) -> u32 {
        (self.cursor - self.line_start) as u32
    }

    /// Current absolute offset in logical characters.
    #[inline]
    pub fn offset(&self) -> usize {
        self.cursor
    }

    /// Start offset of the current token.
    #[inline]
    pub fn token_start(&self) -> usize {
        self.token_start
    }

    /// End offset of the current token (exclusive).
    #[inline]
    pub fn token_end(&self) -> usize {
        self.token_end
    }

    /// Line the current token started on.
    #[inline]
    pub fn token_line(&self) -> u32 {
        self.token_line
    }

    /// Span of the current token.
    pub fn token_span(&self) -> TextSpan {
        TextSpan::from_bounds(self.token_start as u32, self.token_end as u32)
    }

    /// Decoded string value of the last token (string contents, identifier
    /// spelling, regex body, markup content, or number spelling).
    #[inline]
    pub fn string_value(&self) -> &str {
        &self.string_value
    }

    /// Numeric value of the last number token.
    #[inline]
    pub fn number_value(&self) -> f64 {
        self.number_value
    }

    /// Opening quote of the last string literal.
    #[inline]
    pub fn quote_char(&self) -> Option<char> {
        self.quote_char
    }

    /// Flags of the last regex literal.
    #[inline]
    pub fn regex_flags(&self) -> &str {
        &self.regex_flags
    }

    /// Sub-kind of the most recently scanned comment.
    #[inline]
    pub fn comment_kind(&self) -> Option<CommentKind> {
        self.comment_kind
    }

    /// Raw text (delimiters included) of the most recently scanned comment.
    #[inline]
    pub fn comment_text(&self) -> &str {
        &self.comment_text
    }

    /// The identifier interner scoped to this scanner.
    pub fn interner(&self) -> &StringInterner {
        &self.names
    }

    /// The diagnostic reporter.
    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut R {
        &mut self.reporter
    }

    // ========================================================================
    // Character-level helpers
    // ========================================================================

    /// Whether one more character could be pushed back right now. Pushback
    /// is bounded, and nothing may be pushed on top of an in-flight newline.
    pub fn can_unget_char(&self) -> bool {
        self.buf.can_push() && self.buf.last() != Some('\n')
    }

    /// Read the next character, counting newlines.
    fn get_char(&mut self) -> Result<Option<char>, ScanError> {
        let c = match self.buf.pop() {
            Some(c) => Some(c),
            None => self.source.next()?,
        };
        if let Some(c) = c {
            self.cursor += 1;
            if c == '\n' {
                self.line += 1;
                self.prev_line_start = self.line_start;
                self.line_start = self.cursor;
            }
        }
        Ok(c)
    }

    /// Push a character back, undoing the line increment if it was a
    /// newline. Nothing may be pushed on top of an in-flight newline, so at
    /// most one newline is ever buffered.
    fn unget_char(&mut self, c: char) {
        debug_assert!(self.can_unget_char(), "pushback overflow or across a newline");
        self.cursor -= 1;
        if c == '\n' {
            self.line -= 1;
            self.line_start = self.prev_line_start;
        }
        self.buf.push(c);
    }

    /// Read without newline bookkeeping. Paired with
    /// `unget_char_ignore_line_end`; only used where the character is
    /// immediately pushed back unless it matches a non-newline probe, so a
    /// buffered newline is later re-counted by `get_char`.
    fn get_char_ignore_line_end(&mut self) -> Result<Option<char>, ScanError> {
        let c = match self.buf.pop() {
            Some(c) => Some(c),
            None => self.source.next()?,
        };
        if c.is_some() {
            self.cursor += 1;
        }
        Ok(c)
    }

    fn unget_char_ignore_line_end(&mut self, c: char) {
        self.cursor -= 1;
        self.buf.push(c);
    }

    /// Consume the next character if it equals `expected`.
    fn match_char(&mut self, expected: char) -> Result<bool, ScanError> {
        debug_assert_ne!(expected, '\n');
        match self.get_char_ignore_line_end()? {
            Some(c) if c == expected => Ok(true),
            Some(c) => {
                self.unget_char_ignore_line_end(c);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Look at the next character without consuming it.
    fn peek_char(&mut self) -> Result<Option<char>, ScanError> {
        match self.get_char_ignore_line_end()? {
            Some(c) => {
                self.unget_char_ignore_line_end(c);
                Ok(Some(c))
            }
            None => Ok(None),
        }
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    fn report(&mut self, kind: DiagnosticKind, start: usize) {
        let span = TextSpan::from_bounds(start as u32, self.cursor as u32);
        self.reporter.report(Diagnostic::new(kind, span, self.token_line));
    }

    /// Report `kind` over the current token and produce an error token.
    /// Scanning resumes normally on the next call.
    fn error_token(&mut self, kind: DiagnosticKind) -> Token {
        self.report(kind, self.token_start);
        self.finish(TokenKind::Error, TokenValue::None)
    }

    fn unterminated(&mut self, kind: DiagnosticKind) -> Token {
        self.flags |= TokenFlags::UNTERMINATED;
        self.error_token(kind)
    }

    /// Seal the current token.
    fn finish(&mut self, kind: TokenKind, value: TokenValue) -> Token {
        self.token_end = self.cursor;
        self.last_kind = kind;
        match kind {
            TokenKind::Eol => self.dirty_line = false,
            // Comments and dashes leave the line clean for `-->` detection.
            TokenKind::Eof | TokenKind::Comment | TokenKind::Sub | TokenKind::Dec => {}
            _ => self.dirty_line = true,
        }
        Token {
            kind,
            pos: self.token_start as u32,
            end: self.token_end as u32,
            line: self.token_line,
            flags: self.flags,
            value,
        }
    }

    // ========================================================================
    // Token dispatch
    // ========================================================================

    /// Scan and return the next token. Each call consumes input.
    pub fn next_token(&mut self) -> Result<Token, ScanError> {
        loop {
            // Skip whitespace; a newline immediately yields an EOL token.
            let c = loop {
                let start = self.cursor;
                let start_line = self.line;
                match self.get_char()? {
                    None => {
                        self.token_start = self.cursor;
                        self.token_line = self.line;
                        self.flags = TokenFlags::NONE;
                        return Ok(self.finish(TokenKind::Eof, TokenValue::None));
                    }
                    Some('\n') => {
                        self.token_start = start;
                        self.token_line = start_line;
                        self.flags = TokenFlags::NONE;
                        return Ok(self.finish(TokenKind::Eol, TokenValue::None));
                    }
                    Some(c) if is_white_space_single_line(c) => continue,
                    Some(c) => {
                        self.token_start = start;
                        self.token_line = start_line;
                        break c;
                    }
                }
            };
            self.flags = TokenFlags::NONE;

            if is_identifier_start(c) || c == '\\' {
                return self.scan_name(c);
            }
            if is_digit(c) {
                return self.scan_number(c);
            }

            let token = match c {
                '(' => self.finish(TokenKind::LeftParen, TokenValue::None),
                ')' => self.finish(TokenKind::RightParen, TokenValue::None),
                '[' => self.finish(TokenKind::LeftBracket, TokenValue::None),
                ']' => self.finish(TokenKind::RightBracket, TokenValue::None),
                '{' => self.finish(TokenKind::LeftBrace, TokenValue::None),
                '}' => self.finish(TokenKind::RightBrace, TokenValue::None),
                ',' => self.finish(TokenKind::Comma, TokenValue::None),
                ';' => self.finish(TokenKind::Semi, TokenValue::None),
                '~' => self.finish(TokenKind::BitNot, TokenValue::None),
                '?' => self.finish(TokenKind::Hook, TokenValue::None),

                ':' => {
                    let kind = if self.match_char(':')? {
                        TokenKind::ColonColon
                    } else {
                        TokenKind::Colon
                    };
                    self.finish(kind, TokenValue::None)
                }
                '.' => self.scan_dot()?,
                '"' | '\'' => self.scan_string(c)?,
                '=' => self.scan_equals()?,
                '!' => self.scan_exclamation()?,
                '+' => self.scan_plus()?,
                '*' => {
                    let kind = if self.match_char('=')? {
                        TokenKind::AssignMul
                    } else {
                        TokenKind::Mul
                    };
                    self.finish(kind, TokenValue::None)
                }
                '%' => {
                    let kind = if self.match_char('=')? {
                        TokenKind::AssignMod
                    } else {
                        TokenKind::Mod
                    };
                    self.finish(kind, TokenValue::None)
                }
                '^' => {
                    let kind = if self.match_char('=')? {
                        TokenKind::AssignBitXor
                    } else {
                        TokenKind::BitXor
                    };
                    self.finish(kind, TokenValue::None)
                }
                '&' => self.scan_ampersand()?,
                '|' => self.scan_bar()?,
                '>' => self.scan_greater_than()?,

                // These three can produce comments; in trivia mode the
                // scan restarts afterwards.
                '-' => match self.scan_minus()? {
                    Some(token) => token,
                    None => continue,
                },
                '/' => match self.scan_slash()? {
                    Some(token) => token,
                    None => continue,
                },
                '<' => match self.scan_less_than()? {
                    Some(token) => token,
                    None => continue,
                },

                _ => self.error_token(DiagnosticKind::IllegalCharacter),
            };
            return Ok(token);
        }
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn scan_dot(&mut self) -> Result<Token, ScanError> {
        if let Some(next) = self.peek_char()? {
            if is_digit(next) {
                return self.scan_number('.');
            }
        }
        let kind = if self.match_char('.')? {
            TokenKind::DotDot
        } else {
            TokenKind::Dot
        };
        Ok(self.finish(kind, TokenValue::None))
    }

    fn scan_equals(&mut self) -> Result<Token, ScanError> {
        let kind = if self.match_char('=')? {
            if self.match_char('=')? {
                TokenKind::StrictEq
            } else {
                TokenKind::Eq
            }
        } else {
            TokenKind::Assign
        };
        Ok(self.finish(kind, TokenValue::None))
    }

    fn scan_exclamation(&mut self) -> Result<Token, ScanError> {
        let kind = if self.match_char('=')? {
            if self.match_char('=')? {
                TokenKind::StrictNe
            } else {
                TokenKind::Ne
            }
        } else {
            TokenKind::Not
        };
        Ok(self.finish(kind, TokenValue::None))
    }

    fn scan_plus(&mut self) -> Result<Token, ScanError> {
        let kind = if self.match_char('+')? {
            TokenKind::Inc
        } else if self.match_char('=')? {
            TokenKind::AssignAdd
        } else {
            TokenKind::Add
        };
        Ok(self.finish(kind, TokenValue::None))
    }

    fn scan_minus(&mut self) -> Result<Option<Token>, ScanError> {
        if self.match_char('-')? {
            // A `-->` on a line with no real token yet is the tail of an
            // HTML comment.
            if !self.dirty_line && self.match_char('>')? {
                return self.scan_line_comment(CommentKind::Html, "-->");
            }
            return Ok(Some(self.finish(TokenKind::Dec, TokenValue::None)));
        }
        let kind = if self.match_char('=')? {
            TokenKind::AssignSub
        } else {
            TokenKind::Sub
        };
        Ok(Some(self.finish(kind, TokenValue::None)))
    }

    fn scan_ampersand(&mut self) -> Result<Token, ScanError> {
        let kind = if self.match_char('&')? {
            TokenKind::And
        } else if self.match_char('=')? {
            TokenKind::AssignBitAnd
        } else {
            TokenKind::BitAnd
        };
        Ok(self.finish(kind, TokenValue::None))
    }

    fn scan_bar(&mut self) -> Result<Token, ScanError> {
        let kind = if self.match_char('|')? {
            TokenKind::Or
        } else if self.match_char('=')? {
            TokenKind::AssignBitOr
        } else {
            TokenKind::BitOr
        };
        Ok(self.finish(kind, TokenValue::None))
    }

    fn scan_greater_than(&mut self) -> Result<Token, ScanError> {
        let kind = if self.match_char('>')? {
            if self.match_char('>')? {
                if self.match_char('=')? {
                    TokenKind::AssignUShr
                } else {
                    TokenKind::UShr
                }
            } else if self.match_char('=')? {
                TokenKind::AssignShr
            } else {
                TokenKind::Shr
            }
        } else if self.match_char('=')? {
            TokenKind::Ge
        } else {
            TokenKind::Gt
        };
        Ok(self.finish(kind, TokenValue::None))
    }

    fn scan_less_than(&mut self) -> Result<Option<Token>, ScanError> {
        // `<!--` starts an HTML-style comment running to end of line.
        if self.match_char('!')? {
            if self.match_char('-')? {
                if self.match_char('-')? {
                    return self.scan_line_comment(CommentKind::Html, "<!--");
                }
                self.unget_char_ignore_line_end('-');
            }
            self.unget_char_ignore_line_end('!');
        }
        let kind = if self.match_char('<')? {
            if self.match_char('=')? {
                TokenKind::AssignShl
            } else {
                TokenKind::Shl
            }
        } else if self.match_char('=')? {
            TokenKind::Le
        } else {
            TokenKind::Lt
        };
        Ok(Some(self.finish(kind, TokenValue::None)))
    }

    fn scan_slash(&mut self) -> Result<Option<Token>, ScanError> {
        if self.match_char('/')? {
            return self.scan_line_comment(CommentKind::Line, "//");
        }
        if self.match_char('*')? {
            return self.scan_block_comment();
        }
        let kind = if self.match_char('=')? {
            TokenKind::AssignDiv
        } else {
            TokenKind::Div
        };
        Ok(Some(self.finish(kind, TokenValue::None)))
    }

    // ========================================================================
    // Comments
    // ========================================================================

    /// Finish a comment: a token when comments are recorded, trivia
    /// otherwise. The raw text stays retrievable either way.
    fn comment_token(&mut self, kind: CommentKind) -> Option<Token> {
        self.comment_kind = Some(kind);
        if self.options.record_comments {
            Some(self.finish(TokenKind::Comment, TokenValue::Comment(kind)))
        } else {
            None
        }
    }

    /// A comment running to end of line. The newline is not part of it.
    fn scan_line_comment(
        &mut self,
        kind: CommentKind,
        prefix: &str,
    ) -> Result<Option<Token>, ScanError> {
        self.comment_text.clear();
        self.comment_text.push_str(prefix);
        loop {
            match self.get_char()? {
                None => break,
                Some('\n') => {
                    self.unget_char('\n');
                    break;
                }
                Some(c) => self.comment_text.push(c),
            }
        }
        Ok(self.comment_token(kind))
    }

    fn scan_block_comment(&mut self) -> Result<Option<Token>, ScanError> {
        self.comment_text.clear();
        self.comment_text.push_str("/*");
        let mut kind = CommentKind::Block;
        // `/**` begins a documentation comment, but `/**/` is an empty block.
        if self.match_char('*')? {
            if self.match_char('/')? {
                self.comment_text.push_str("*/");
                return Ok(self.comment_token(CommentKind::Block));
            }
            self.comment_text.push('*');
            kind = CommentKind::Doc;
        }
        loop {
            match self.get_char()? {
                None => {
                    self.comment_kind = Some(kind);
                    return Ok(Some(self.unterminated(DiagnosticKind::UnterminatedComment)));
                }
                Some('*') => {
                    if self.match_char('/')? {
                        self.comment_text.push_str("*/");
                        break;
                    }
                    self.comment_text.push('*');
                }
                Some(c) => self.comment_text.push(c),
            }
        }
        Ok(self.comment_token(kind))
    }

    // ========================================================================
    // Identifiers and keywords
    // ========================================================================

    fn scan_name(&mut self, first: char) -> Result<Token, ScanError> {
        self.buf.scratch_clear();
        let mut contains_escape = false;

        if first == '\\' {
            contains_escape = true;
            match self.read_identifier_escape()? {
                Some(decoded) if is_identifier_start(decoded) => self.buf.scratch_push(decoded),
                _ => return Ok(self.error_token(DiagnosticKind::InvalidEscape)),
            }
        } else {
            self.buf.scratch_push(first);
        }

        loop {
            match self.get_char()? {
                Some('\\') => {
                    contains_escape = true;
                    match self.read_identifier_escape()? {
                        Some(decoded) if is_identifier_part(decoded) => {
                            self.buf.scratch_push(decoded)
                        }
                        _ => return Ok(self.error_token(DiagnosticKind::InvalidEscape)),
                    }
                }
                Some(c) if is_identifier_part(c) => self.buf.scratch_push(c),
                Some(c) => {
                    self.unget_char(c);
                    break;
                }
                None => break,
            }
        }

        if contains_escape {
            self.flags |= TokenFlags::CONTAINS_ESCAPE;
        }
        self.string_value.clear();
        self.string_value.push_str(self.buf.scratch());

        if let Some(kind) = keywords::lookup(&self.string_value, self.options.version) {
            if kind != TokenKind::Reserved || !self.options.reserved_as_names {
                return Ok(self.finish(kind, TokenValue::None));
            }
        }
        let atom = self.names.intern(&self.string_value);
        Ok(self.finish(TokenKind::Name, TokenValue::Name(atom)))
    }

    /// Decode the `uXXXX` following a backslash. `None` means malformed;
    /// the offending character (if any) is left unconsumed.
    fn read_identifier_escape(&mut self) -> Result<Option<char>, ScanError> {
        if !self.match_char('u')? {
            return Ok(None);
        }
        let mut value: u32 = 0;
        for _ in 0..4 {
            match self.get_char_ignore_line_end()? {
                Some(c) => match hex_value(c) {
                    Some(digit) => value = (value << 4) | digit,
                    None => {
                        self.unget_char_ignore_line_end(c);
                        return Ok(None);
                    }
                },
                None => return Ok(None),
            }
        }
        Ok(char::from_u32(value))
    }

    // ========================================================================
    // Numbers
    // ========================================================================

    fn scan_number(&mut self, first: char) -> Result<Token, ScanError> {
        self.buf.scratch_clear();
        let mut base: u32 = 10;

        if first == '.' {
            self.buf.scratch_push('.');
            self.scan_decimal_digits()?;
        } else {
            let mut c = Some(first);
            if first == '0' {
                match self.get_char()? {
                    Some(x) if x == 'x' || x == 'X' => return self.scan_hex_number(),
                    Some(d) if is_digit(d) => {
                        base = 8;
                        self.flags |= TokenFlags::OCTAL;
                        self.buf.scratch_push('0');
                        c = Some(d);
                    }
                    Some(stray) => {
                        self.unget_char(stray);
                    }
                    None => {}
                }
            }

            // Integer digits. An 8 or 9 in an apparent octal literal
            // downgrades it to decimal (legacy permissive behavior).
            loop {
                match c {
                    Some(d) if is_digit(d) => {
                        if base == 8 && d >= '8' {
                            base = 10;
                            self.flags |= TokenFlags::LEGACY_OCTAL_DOWNGRADE;
                            self.report(DiagnosticKind::LegacyOctalLiteral, self.token_start);
                        }
                        self.buf.scratch_push(d);
                        c = self.get_char()?;
                    }
                    Some(stray) => {
                        self.unget_char(stray);
                        break;
                    }
                    None => break,
                }
            }

            if base == 8 {
                let value = fold_digits(self.buf.scratch(), 8);
                return Ok(self.number_token(value));
            }

            if self.match_char('.')? {
                self.buf.scratch_push('.');
                self.scan_decimal_digits()?;
            }
        }

        let exponent = if self.match_char('e')? {
            Some('e')
        } else if self.match_char('E')? {
            Some('E')
        } else {
            None
        };
        if let Some(e) = exponent {
            self.buf.scratch_push(e);
            self.flags |= TokenFlags::SCIENTIFIC;
            if self.match_char('+')? {
                self.buf.scratch_push('+');
            } else if self.match_char('-')? {
                self.buf.scratch_push('-');
            }
            if self.scan_decimal_digits()? == 0 {
                return Ok(self.error_token(DiagnosticKind::InvalidNumericLiteral));
            }
        }

        let value = self.buf.scratch().parse::<f64>().unwrap_or(f64::NAN);
        Ok(self.number_token(value))
    }

    fn scan_hex_number(&mut self) -> Result<Token, ScanError> {
        self.flags |= TokenFlags::HEX;
        let mut any = false;
        loop {
            match self.get_char()? {
                Some(h) if is_hex_digit(h) => {
                    self.buf.scratch_push(h);
                    any = true;
                }
                Some(stray) => {
                    self.unget_char(stray);
                    break;
                }
                None => break,
            }
        }
        if !any {
            return Ok(self.error_token(DiagnosticKind::InvalidNumericLiteral));
        }
        let value = fold_digits(self.buf.scratch(), 16);
        Ok(self.number_token(value))
    }

    fn scan_decimal_digits(&mut self) -> Result<usize, ScanError> {
        let mut count = 0;
        loop {
            match self.get_char()? {
                Some(d) if is_digit(d) => {
                    self.buf.scratch_push(d);
                    count += 1;
                }
                Some(stray) => {
                    self.unget_char(stray);
                    break;
                }
                None => break,
            }
        }
        Ok(count)
    }

    fn number_token(&mut self, value: f64) -> Token {
        self.number_value = value;
        self.string_value.clear();
        self.string_value.push_str(self.buf.scratch());
        self.finish(TokenKind::Number, TokenValue::Number(value))
    }

    // ========================================================================
    // Strings
    // ========================================================================

    fn scan_string(&mut self, quote: char) -> Result<Token, ScanError> {
        self.buf.scratch_clear();
        self.quote_char = Some(quote);
        loop {
            let c = match self.get_char()? {
                None => return Ok(self.unterminated(DiagnosticKind::UnterminatedString)),
                Some('\n') => {
                    self.unget_char('\n');
                    return Ok(self.unterminated(DiagnosticKind::UnterminatedString));
                }
                Some(c) => c,
            };
            if c == quote {
                break;
            }
            if c == '\\' {
                if !self.scan_string_escape()? {
                    return Ok(self.unterminated(DiagnosticKind::UnterminatedString));
                }
                continue;
            }
            self.buf.scratch_push(c);
        }
        self.string_value.clear();
        self.string_value.push_str(self.buf.scratch());
        let value = TokenValue::Str(self.string_value.clone());
        Ok(self.finish(TokenKind::String, value))
    }

    /// Decode one escape sequence into the scratch buffer. Returns false
    /// when end of input interrupted the escape.
    fn scan_string_escape(&mut self) -> Result<bool, ScanError> {
        self.flags |= TokenFlags::CONTAINS_ESCAPE;
        let c = match self.get_char()? {
            Some(c) => c,
            None => return Ok(false),
        };
        match c {
            'b' => self.buf.scratch_push('\u{0008}'),
            'f' => self.buf.scratch_push('\u{000C}'),
            'n' => self.buf.scratch_push('\n'),
            'r' => self.buf.scratch_push('\r'),
            't' => self.buf.scratch_push('\t'),
            'v' => self.buf.scratch_push('\u{000B}'),
            // A backslash before a newline is a line continuation and
            // contributes nothing.
            '\n' => {}
            'u' => {
                // Four hex digits. A bad digit abandons only the escape:
                // the literal 'u' and the digits already consumed stay in
                // the value and scanning continues.
                let mark = self.buf.scratch_len();
                self.buf.scratch_push('u');
                let mut value: u32 = 0;
                let mut complete = true;
                for _ in 0..4 {
                    match self.get_char_ignore_line_end()? {
                        Some(h) => match hex_value(h) {
                            Some(digit) => {
                                value = (value << 4) | digit;
                                self.buf.scratch_push(h);
                            }
                            None => {
                                self.unget_char_ignore_line_end(h);
                                complete = false;
                                break;
                            }
                        },
                        None => {
                            complete = false;
                            break;
                        }
                    }
                }
                if complete {
                    if let Some(decoded) = char::from_u32(value) {
                        self.buf.scratch_truncate(mark);
                        self.buf.scratch_push(decoded);
                    }
                    // A lone surrogate half keeps its raw spelling.
                }
            }
            'x' => {
                // Two hex digits; same recovery shape as \u, but reported.
                let mark = self.buf.scratch_len();
                self.buf.scratch_push('x');
                let mut value: u32 = 0;
                let mut complete = true;
                for _ in 0..2 {
                    match self.get_char_ignore_line_end()? {
                        Some(h) => match hex_value(h) {
                            Some(digit) => {
                                value = (value << 4) | digit;
                                self.buf.scratch_push(h);
                            }
                            None => {
                                self.unget_char_ignore_line_end(h);
                                complete = false;
                                break;
                            }
                        },
                        None => {
                            complete = false;
                            break;
                        }
                    }
                }
                if complete {
                    self.buf.scratch_truncate(mark);
                    if let Some(decoded) = char::from_u32(value) {
                        self.buf.scratch_push(decoded);
                    }
                } else {
                    self.report(DiagnosticKind::InvalidEscape, self.token_start);
                }
            }
            '0'..='7' => {
                // Up to three octal digits, capped so the value never
                // exceeds 0o377.
                let mut value = c as u32 - '0' as u32;
                for _ in 0..2 {
                    match self.get_char_ignore_line_end()? {
                        Some(d) if is_octal_digit(d) => {
                            let next = value * 8 + (d as u32 - '0' as u32);
                            if next > 0o377 {
                                self.unget_char_ignore_line_end(d);
                                break;
                            }
                            value = next;
                        }
                        Some(stray) => {
                            self.unget_char_ignore_line_end(stray);
                            break;
                        }
                        None => break,
                    }
                }
                if let Some(decoded) = char::from_u32(value) {
                    self.buf.scratch_push(decoded);
                }
            }
            other => self.buf.scratch_push(other),
        }
        Ok(true)
    }

    // ========================================================================
    // Regex literals (entered only on explicit caller request)
    // ========================================================================

    /// Scan a regular-expression literal. Must be called immediately after
    /// `next_token` returned `Div` or `AssignDiv`, when the grammar
    /// guarantees a literal context; for `AssignDiv` the `=` belongs to the
    /// pattern body.
    pub fn scan_regex_literal(&mut self) -> Result<Token, ScanError> {
        debug_assert!(
            matches!(self.last_kind, TokenKind::Div | TokenKind::AssignDiv),
            "regex literal scan requires a preceding '/' token"
        );
        self.flags = TokenFlags::NONE;
        self.buf.scratch_clear();
        if self.last_kind == TokenKind::AssignDiv {
            self.buf.scratch_push('=');
        }

        let mut state = RegexState::Pattern;
        loop {
            let c = match self.get_char()? {
                None => return Ok(self.unterminated(DiagnosticKind::UnterminatedRegex)),
                Some('\n') => {
                    self.unget_char('\n');
                    return Ok(self.unterminated(DiagnosticKind::UnterminatedRegex));
                }
                Some(c) => c,
            };
            match c {
                '\\' => {
                    self.buf.scratch_push('\\');
                    match self.get_char()? {
                        None => return Ok(self.unterminated(DiagnosticKind::UnterminatedRegex)),
                        Some('\n') => {
                            self.unget_char('\n');
                            return Ok(self.unterminated(DiagnosticKind::UnterminatedRegex));
                        }
                        Some(escaped) => self.buf.scratch_push(escaped),
                    }
                }
                '[' => {
                    state = RegexState::CharClass;
                    self.buf.scratch_push('[');
                }
                ']' => {
                    state = RegexState::Pattern;
                    self.buf.scratch_push(']');
                }
                '/' if state == RegexState::Pattern => break,
                _ => self.buf.scratch_push(c),
            }
        }

        self.regex_flags.clear();
        loop {
            match self.get_char()? {
                Some(c) if c.is_alphabetic() => match c {
                    'g' | 'i' | 'm' | 's' | 'u' | 'y' => self.regex_flags.push(c),
                    _ => return Ok(self.error_token(DiagnosticKind::InvalidRegexFlag)),
                },
                Some(stray) => {
                    self.unget_char(stray);
                    break;
                }
                None => break,
            }
        }

        self.string_value.clear();
        self.string_value.push_str(self.buf.scratch());
        let value = TokenValue::Str(self.string_value.clone());
        Ok(self.finish(TokenKind::Regex, value))
    }

    // ========================================================================
    // Markup literals (entered only on explicit caller request)
    // ========================================================================

    /// Scan a markup literal. Must be called immediately after `next_token`
    /// returned `Lt`, when the grammar guarantees a literal context; the
    /// `<` is re-scanned as the start of the literal.
    pub fn scan_markup_literal(&mut self) -> Result<Token, ScanError> {
        debug_assert!(
            self.last_kind == TokenKind::Lt,
            "markup literal scan requires a preceding '<' token"
        );
        self.flags = TokenFlags::NONE;
        self.buf.scratch_clear();
        if !self.can_unget_char() {
            return Ok(self.markup_malformed());
        }
        self.unget_char('<');

        let mut depth: u32 = 0;
        let mut in_tag = false;
        loop {
            let c = match self.get_char()? {
                None => return Ok(self.markup_unterminated()),
                Some(c) => c,
            };

            if in_tag {
                match c {
                    '>' => {
                        self.buf.scratch_push('>');
                        in_tag = false;
                    }
                    '/' => {
                        self.buf.scratch_push('/');
                        if self.match_char('>')? {
                            self.buf.scratch_push('>');
                            if depth == 0 {
                                return Ok(self.markup_malformed());
                            }
                            depth -= 1;
                            in_tag = false;
                        }
                    }
                    '\'' | '"' => {
                        self.buf.scratch_push(c);
                        if !self.scan_markup_quoted(c)? {
                            return Ok(self.markup_unterminated());
                        }
                    }
                    _ => self.buf.scratch_push(c),
                }
                if !in_tag && depth == 0 {
                    break;
                }
            } else {
                match c {
                    '<' => {
                        self.buf.scratch_push('<');
                        match self.get_char()? {
                            None => return Ok(self.markup_unterminated()),
                            Some('!') => {
                                self.buf.scratch_push('!');
                                match self.get_char()? {
                                    None => return Ok(self.markup_unterminated()),
                                    Some('-') => {
                                        self.buf.scratch_push('-');
                                        if !self.match_char('-')? {
                                            return Ok(self.markup_malformed());
                                        }
                                        self.buf.scratch_push('-');
                                        if !self.scan_markup_comment()? {
                                            return Ok(self.markup_unterminated());
                                        }
                                    }
                                    Some('[') => {
                                        self.buf.scratch_push('[');
                                        for expected in "CDATA[".chars() {
                                            if !self.match_char(expected)? {
                                                return Ok(self.markup_malformed());
                                            }
                                            self.buf.scratch_push(expected);
                                        }
                                        if !self.scan_markup_cdata()? {
                                            return Ok(self.markup_unterminated());
                                        }
                                    }
                                    Some(other) => {
                                        // <!DOCTYPE and friends: read to the
                                        // balanced closing '>'.
                                        self.unget_char(other);
                                        if !self.scan_markup_decl()? {
                                            return Ok(self.markup_unterminated());
                                        }
                                    }
                                }
                                if depth == 0 {
                                    break;
                                }
                            }
                            Some('?') => {
                                self.buf.scratch_push('?');
                                if !self.scan_markup_pi()? {
                                    return Ok(self.markup_unterminated());
                                }
                                if depth == 0 {
                                    break;
                                }
                            }
                            Some('/') => {
                                self.buf.scratch_push('/');
                                if depth == 0 {
                                    return Ok(self.markup_malformed());
                                }
                                depth -= 1;
                                in_tag = true;
                            }
                            Some(other) => {
                                depth += 1;
                                in_tag = true;
                                self.unget_char(other);
                            }
                        }
                    }
                    _ => self.buf.scratch_push(c),
                }
            }
        }

        self.string_value.clear();
        self.string_value.push_str(self.buf.scratch());
        let value = TokenValue::Str(self.string_value.clone());
        Ok(self.finish(TokenKind::Markup, value))
    }

    /// End of input inside a markup sub-state: the accumulated content is
    /// cleared along with the error.
    fn markup_unterminated(&mut self) -> Token {
        self.buf.scratch_clear();
        self.string_value.clear();
        self.unterminated(DiagnosticKind::UnterminatedMarkup)
    }

    fn markup_malformed(&mut self) -> Token {
        self.buf.scratch_clear();
        self.string_value.clear();
        self.error_token(DiagnosticKind::MalformedMarkupStructure)
    }

    /// `<!--` ... `-->`. Returns false at end of input.
    fn scan_markup_comment(&mut self) -> Result<bool, ScanError> {
        let mut dashes = 0;
        loop {
            match self.get_char()? {
                None => return Ok(false),
                Some(c) => {
                    self.buf.scratch_push(c);
                    match c {
                        '-' => dashes += 1,
                        '>' if dashes >= 2 => return Ok(true),
                        _ => dashes = 0,
                    }
                }
            }
        }
    }

    /// `<![CDATA[` ... `]]>`. Returns false at end of input.
    fn scan_markup_cdata(&mut self) -> Result<bool, ScanError> {
        let mut brackets = 0;
        loop {
            match self.get_char()? {
                None => return Ok(false),
                Some(c) => {
                    self.buf.scratch_push(c);
                    match c {
                        ']' => brackets += 1,
                        '>' if brackets >= 2 => return Ok(true),
                        _ => brackets = 0,
                    }
                }
            }
        }
    }

    /// `<?` ... `?>`. Returns false at end of input.
    fn scan_markup_pi(&mut self) -> Result<bool, ScanError> {
        let mut question = false;
        loop {
            match self.get_char()? {
                None => return Ok(false),
                Some(c) => {
                    self.buf.scratch_push(c);
                    match c {
                        '?' => question = true,
                        '>' if question => return Ok(true),
                        _ => question = false,
                    }
                }
            }
        }
    }

    /// `<!` ... `>` with nested angle brackets balanced. Returns false at
    /// end of input.
    fn scan_markup_decl(&mut self) -> Result<bool, ScanError> {
        let mut nesting: u32 = 1;
        loop {
            match self.get_char()? {
                None => return Ok(false),
                Some(c) => {
                    self.buf.scratch_push(c);
                    match c {
                        '<' => nesting += 1,
                        '>' => {
                            nesting -= 1;
                            if nesting == 0 {
                                return Ok(true);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// A quoted attribute value; the opening quote is already consumed.
    /// Returns false at end of input.
    fn scan_markup_quoted(&mut self, quote: char) -> Result<bool, ScanError> {
        loop {
            match self.get_char()? {
                None => return Ok(false),
                Some(c) => {
                    self.buf.scratch_push(c);
                    if c == quote {
                        return Ok(true);
                    }
                }
            }
        }
    }
}

/// Accumulate a digit string in the given base as an exact integer held in
/// a double, the way the runtime converts hex and octal literals.
fn fold_digits(digits: &str, base: u32) -> f64 {
    let mut value = 0.0f64;
    for c in digits.chars() {
        value = value * base as f64 + c.to_digit(base).unwrap_or(0) as f64;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pushback_idempotence() {
        let mut scanner = Scanner::new("ab\ncd");
        assert_eq!(scanner.get_char().unwrap(), Some('a'));
        scanner.unget_char('a');
        assert_eq!(scanner.get_char().unwrap(), Some('a'));
        assert_eq!(scanner.get_char().unwrap(), Some('b'));
    }

    #[test]
    fn test_pushback_undoes_line_increment() {
        let mut scanner = Scanner::new("a\nb");
        assert_eq!(scanner.get_char().unwrap(), Some('a'));
        assert_eq!(scanner.line(), 1);
        assert_eq!(scanner.get_char().unwrap(), Some('\n'));
        assert_eq!(scanner.line(), 2);
        scanner.unget_char('\n');
        assert_eq!(scanner.line(), 1);
        assert_eq!(scanner.get_char().unwrap(), Some('\n'));
        assert_eq!(scanner.line(), 2);
        assert_eq!(scanner.get_char().unwrap(), Some('b'));
    }

    #[test]
    fn test_match_char() {
        let mut scanner = Scanner::new("=>");
        assert!(scanner.match_char('=').unwrap());
        assert!(!scanner.match_char('=').unwrap());
        assert!(scanner.match_char('>').unwrap());
        assert!(!scanner.match_char('>').unwrap());
    }

    #[test]
    fn test_crlf_counts_one_line() {
        let mut scanner = Scanner::new("a\r\nb");
        assert_eq!(scanner.get_char().unwrap(), Some('a'));
        assert_eq!(scanner.get_char().unwrap(), Some('\n'));
        assert_eq!(scanner.line(), 2);
        assert_eq!(scanner.get_char().unwrap(), Some('b'));
        assert_eq!(scanner.get_char().unwrap(), None);
    }

    #[test]
    fn test_column_tracking() {
        let mut scanner = Scanner::new("ab\ncd");
        scanner.get_char().unwrap();
        scanner.get_char().unwrap();
        assert_eq!(scanner.column(), 2);
        scanner.get_char().unwrap(); // newline
        assert_eq!(scanner.column(), 0);
        scanner.get_char().unwrap();
        assert_eq!(scanner.column(), 1);
    }

    #[test]
    fn test_dirty_line_gates_html_close() {
        // Clean line: --> swallows the rest of the line.
        let mut scanner = Scanner::new("--> hidden\nx");
        let token = scanner.next_token().unwrap();
        assert_eq!(token.kind, TokenKind::Eol);
        let token = scanner.next_token().unwrap();
        assert_eq!(token.kind, TokenKind::Name);

        // Dirty line: --> is a decrement then a greater-than.
        let mut scanner = Scanner::new("x --> y");
        assert_eq!(scanner.next_token().unwrap().kind, TokenKind::Name);
        assert_eq!(scanner.next_token().unwrap().kind, TokenKind::Dec);
        assert_eq!(scanner.next_token().unwrap().kind, TokenKind::Gt);
        assert_eq!(scanner.next_token().unwrap().kind, TokenKind::Name);
    }

    #[test]
    fn test_fold_digits() {
        assert_eq!(fold_digits("ff", 16), 255.0);
        assert_eq!(fold_digits("777", 8), 511.0);
        assert_eq!(fold_digits("deadBEEF", 16), 3735928559.0);
    }

    #[test]
    fn test_interner_dedupes_names() {
        let mut scanner = Scanner::new("foo bar foo");
        let a = scanner.next_token().unwrap().atom();
        let b = scanner.next_token().unwrap().atom();
        let c = scanner.next_token().unwrap().atom();
        assert!(a.is_some());
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(scanner.interner().len(), 2);
    }
}
