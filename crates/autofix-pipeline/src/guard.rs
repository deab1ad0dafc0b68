//! Protected-step lookup
//!
//! The patch engine never owns the set of verified steps; it asks a
//! [`StepGuard`] supplied by the caller (normally the fix history ledger).

use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Source of truth for which step identities are immutable
pub trait StepGuard {
    /// Whether the identity is protected
    fn is_protected(&self, identity: &str) -> bool;
}

/// Guard that protects nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct Unguarded;

impl StepGuard for Unguarded {
    fn is_protected(&self, _identity: &str) -> bool {
        false
    }
}

impl StepGuard for BTreeSet<String> {
    fn is_protected(&self, identity: &str) -> bool {
        self.contains(identity)
    }
}

impl StepGuard for HashSet<String> {
    fn is_protected(&self, identity: &str) -> bool {
        self.contains(identity)
    }
}

impl<V> StepGuard for BTreeMap<String, V> {
    fn is_protected(&self, identity: &str) -> bool {
        self.contains_key(identity)
    }
}

impl<T: StepGuard + ?Sized> StepGuard for &T {
    fn is_protected(&self, identity: &str) -> bool {
        (**self).is_protected(identity)
    }
}
