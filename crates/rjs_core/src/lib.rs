//! rjs_core: Core utilities for the rjs script front-end.
//!
//! Provides text spans and the session-scoped string interner used by the
//! scanner and its consumers.

pub mod intern;
pub mod text;

// Re-export commonly used types
pub use intern::{Atom, StringInterner};
pub use text::{TextPos, TextRange, TextSpan};
