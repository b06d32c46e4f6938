//! Identifier types.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identifier for publishers, subscribers, and destructors.
///
/// Idents are caller-chosen keys. They are ordered so that teardown can walk
/// destructors deterministically, and cheap to clone so pump tasks can carry
/// them into every reduce action.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ident(Arc<str>);

impl Ident {
    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Ident {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for Ident {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ident({})", self.0)
    }
}

/// Process-unique reactor identifier, used in tracing fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReactorId(u64);

static NEXT_REACTOR_ID: AtomicU64 = AtomicU64::new(0);

impl ReactorId {
    pub(crate) fn next() -> Self {
        Self(NEXT_REACTOR_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ReactorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reactor-{}", self.0)
    }
}
