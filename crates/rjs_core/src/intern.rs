//! String interning for a single scan/parse session.
//!
//! Identifiers are interned so that repeated spellings share one allocation
//! and compare as integers. The interner is owned by the scanner (or the
//! surrounding parse session) and passed by reference to anything that needs
//! it; there is no process-wide table.

use lasso::{Key, Rodeo, Spur};
use std::fmt;

/// An interned string identifier. This is a lightweight handle (u32)
/// that can be used to look up the actual string content.
///
/// Comparing two `Atom` values is an O(1) integer comparison.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Atom(Spur);

impl Atom {
    /// Create from a raw lasso key.
    #[inline]
    pub fn from_spur(spur: Spur) -> Self {
        Self(spur)
    }

    /// Get the raw lasso key.
    #[inline]
    pub fn as_spur(self) -> Spur {
        self.0
    }

    /// A numeric form of the handle, usable as a dense map key.
    #[inline]
    pub fn index(self) -> usize {
        self.0.into_usize()
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Atom({:?})", self.0)
    }
}

/// Session-scoped string interner.
///
/// Stores one copy of each unique string and returns lightweight handles.
/// Single-owner by construction: a scanner owns exactly one of these for its
/// lifetime, so no synchronization is involved.
pub struct StringInterner {
    rodeo: Rodeo,
}

impl StringInterner {
    /// Create a new string interner.
    pub fn new() -> Self {
        Self {
            rodeo: Rodeo::new(),
        }
    }

    /// Intern a string, returning a handle to the interned value.
    /// If the string was already interned, returns the existing handle.
    #[inline]
    pub fn intern(&mut self, s: &str) -> Atom {
        Atom::from_spur(self.rodeo.get_or_intern(s))
    }

    /// Intern a static string. More efficient than `intern` for string literals.
    #[inline]
    pub fn intern_static(&mut self, s: &'static str) -> Atom {
        Atom::from_spur(self.rodeo.get_or_intern_static(s))
    }

    /// Look up an already-interned string without interning it if absent.
    #[inline]
    pub fn get(&self, s: &str) -> Option<Atom> {
        self.rodeo.get(s).map(Atom::from_spur)
    }

    /// Resolve an interned string handle back to its string content.
    #[inline]
    pub fn resolve(&self, key: Atom) -> &str {
        self.rodeo.resolve(&key.as_spur())
    }

    /// Returns the number of interned strings.
    pub fn len(&self) -> usize {
        self.rodeo.len()
    }

    /// Returns true if no strings have been interned.
    pub fn is_empty(&self) -> bool {
        self.rodeo.is_empty()
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StringInterner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringInterner")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_and_resolve() {
        let mut interner = StringInterner::new();
        let a = interner.intern("hello");
        let b = interner.intern("hello");
        let c = interner.intern("world");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.resolve(a), "hello");
        assert_eq!(interner.resolve(c), "world");
    }

    #[test]
    fn test_get() {
        let mut interner = StringInterner::new();
        assert!(interner.get("hello").is_none());
        let a = interner.intern("hello");
        assert_eq!(interner.get("hello"), Some(a));
    }

    #[test]
    fn test_intern_static() {
        let mut interner = StringInterner::new();
        let a = interner.intern_static("static_string");
        let b = interner.intern("static_string");
        assert_eq!(a, b);
    }
}
