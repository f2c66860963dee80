//! Self-join alias generation.
//!
//! When a relation's parent and related queries target the same table, the
//! related side needs a unique alias. The counter is an explicit value
//! injected into each session, never process-global state, and hands out
//! monotonically increasing numbers per relation kind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Prefix shared by every generated alias.
pub const ALIAS_PREFIX: &str = "relmodel_reserved";

/// Monotonic per-kind counter for self-join aliases.
///
/// Clones share the same counters, so one counter can be handed to several
/// sessions that must never produce colliding aliases.
#[derive(Debug, Clone, Default)]
pub struct AliasCounter {
    counters: Arc<Mutex<HashMap<&'static str, u64>>>,
}

impl AliasCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next alias for `kind`, e.g. `relmodel_reserved_has_many_0`.
    pub fn next(&self, kind: &'static str) -> String {
        // Recover from a poisoned lock; the map is always left consistent.
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let slot = counters.entry(kind).or_insert(0);
        let n = *slot;
        *slot += 1;
        tracing::trace!(kind, n, "Allocated self-join alias");
        format!("{ALIAS_PREFIX}_{kind}_{n}")
    }

    /// How many aliases have been handed out for `kind`.
    pub fn issued(&self, kind: &str) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.get(kind).copied().unwrap_or(0)
    }
}
