//! rjs_scanner: Lexer/tokenizer for rjs script source.
//!
//! Converts source text into a stream of classified tokens with full
//! support for:
//! - Multi-base numeric literals (decimal, hex, legacy octal)
//! - String escape decoding
//! - Regular expression literals (on explicit parser request)
//! - Markup literals (on explicit parser request)
//! - Unicode identifiers and escaped identifier characters
//! - Streaming sources with exact line/offset bookkeeping

mod buffer;
mod char_codes;
mod keywords;
mod scanner;
mod source;
mod token;

pub use scanner::{LanguageVersion, ScanError, Scanner, ScannerOptions};
pub use token::{CommentKind, Token, TokenFlags, TokenKind, TokenValue};
