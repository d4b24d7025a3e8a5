//! Shared string intern table
//!
//! Every string the VM manipulates is interned, so two equal strings share
//! one allocation and compare by pointer. The table is shared by all
//! interpreters created from the same [`crate::Service`]; lookups and
//! insertions take a short lock, while the strings themselves are immutable
//! and read without locking.

use parking_lot::Mutex;
use rustc_hash::{FxHashSet, FxHasher};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

struct InternedStr {
    hash: u64,
    text: Box<str>,
}

/// Interned immutable string
///
/// Equality is identity: two `IStr`s are equal only if they came from the
/// same table entry.
#[derive(Clone)]
pub struct IStr(Arc<InternedStr>);

impl IStr {
    fn new(text: &str) -> Self {
        let mut hasher = FxHasher::default();
        text.hash(&mut hasher);
        IStr(Arc::new(InternedStr {
            hash: hasher.finish(),
            text: text.into(),
        }))
    }

    /// String contents
    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    /// Hash of the contents, computed once at intern time
    pub fn hash_code(&self) -> u64 {
        self.0.hash
    }

    /// True for the empty string
    pub fn is_empty(&self) -> bool {
        self.0.text.is_empty()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &IStr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for IStr {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for IStr {}

impl Hash for IStr {
    // Must agree with `str`'s hash so the table can be probed by `&str`
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state)
    }
}

impl Borrow<str> for IStr {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl std::ops::Deref for IStr {
    type Target = str;

    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for IStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for IStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

/// Intern table counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InternStats {
    /// Strings currently interned
    pub count: usize,
    /// Calls to `intern`
    pub lookups: u64,
    /// Calls answered by an existing entry
    pub reuse: u64,
}

#[derive(Default)]
struct InternInner {
    strings: FxHashSet<IStr>,
    lookups: u64,
    reuse: u64,
}

/// Deduplicating string pool
#[derive(Default)]
pub struct InternTable {
    inner: Mutex<InternInner>,
}

impl InternTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the canonical string equal to `text`, inserting it if needed
    pub fn intern(&self, text: &str) -> IStr {
        let mut inner = self.inner.lock();
        inner.lookups += 1;
        if let Some(existing) = inner.strings.get(text) {
            let existing = existing.clone();
            inner.reuse += 1;
            return existing;
        }
        let string = IStr::new(text);
        inner.strings.insert(string.clone());
        string
    }

    /// Return the canonical string if it is already interned
    pub fn lookup(&self, text: &str) -> Option<IStr> {
        self.inner.lock().strings.get(text).cloned()
    }

    /// Number of interned strings
    pub fn len(&self) -> usize {
        self.inner.lock().strings.len()
    }

    /// True when nothing is interned
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters
    pub fn stats(&self) -> InternStats {
        let inner = self.inner.lock();
        InternStats {
            count: inner.strings.len(),
            lookups: inner.lookups,
            reuse: inner.reuse,
        }
    }

    /// Drop strings nothing outside the table refers to. Returns the number
    /// of entries removed.
    pub fn prune(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.strings.len();
        inner.strings.retain(|s| Arc::strong_count(&s.0) > 1);
        before - inner.strings.len()
    }
}

impl fmt::Debug for InternTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternTable").field("stats", &self.stats()).finish()
    }
}
