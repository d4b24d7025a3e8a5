//! Namespace-qualified property names

use crate::intern::IStr;
use std::fmt;

/// A (namespace, name) pair of interned strings
///
/// An empty namespace in a lookup matches any namespace. A definition with
/// an empty namespace lands in the empty namespace itself.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    /// Namespace
    pub space: IStr,
    /// Name
    pub name: IStr,
}

impl QualifiedName {
    /// Create a qualified name
    pub fn new(space: IStr, name: IStr) -> Self {
        Self { space, name }
    }

    /// True when the namespace is the lookup wildcard
    pub fn is_wildcard(&self) -> bool {
        self.space.is_empty()
    }

    /// Check whether `self`, used as a query, matches a defined name
    pub fn matches(&self, defined: &QualifiedName) -> bool {
        self.name == defined.name && (self.is_wildcard() || self.space == defined.space)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.space.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}::{}", self.space, self.name)
        }
    }
}

impl fmt::Debug for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QualifiedName({:?}, {:?})", self.space.as_str(), self.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::InternTable;

    #[test]
    fn test_wildcard_matching() {
        let table = InternTable::new();
        let public_x = QualifiedName::new(table.intern("public"), table.intern("x"));
        let private_x = QualifiedName::new(table.intern("private"), table.intern("x"));
        let any_x = QualifiedName::new(table.intern(""), table.intern("x"));
        assert!(any_x.matches(&public_x));
        assert!(any_x.matches(&private_x));
        assert!(public_x.matches(&public_x));
        assert!(!public_x.matches(&private_x));
        assert!(!public_x.matches(&any_x));
        assert_eq!(public_x.to_string(), "public::x");
        assert_eq!(any_x.to_string(), "x");
    }
}
