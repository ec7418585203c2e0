//! Symbol Reference Registry (spec.md §4.2): converts downstream per-session
//! interest deltas into the upstream subscribe/unsubscribe deltas that keep
//! one upstream subscription amortised across N downstream subscribers.
//!
//! Grounded on the teacher's `UpstreamManager` refcounting (atomic counters
//! behind a concurrent map), simplified to the single-process symbol case
//! spec.md describes rather than a per-(peer, conversation) key.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::metrics;

/// `symbol → positive reference count`. An entry exists iff its count is
/// ≥1; an upstream subscription for a symbol is active iff the symbol is
/// present here.
pub struct SymbolRefRegistry {
    counts: DashMap<String, AtomicI64>,
}

impl SymbolRefRegistry {
    pub fn new() -> Self {
        Self {
            counts: DashMap::new(),
        }
    }

    /// For each symbol: if its count was 0 (or absent), include it in the
    /// returned set and set the count to 1; otherwise increment. The caller
    /// is responsible for asking the Upstream Session to subscribe to the
    /// returned set — an empty result means no upstream call is needed.
    pub fn acquire(&self, symbols: &[String]) -> Vec<String> {
        let mut to_subscribe = Vec::new();
        for symbol in symbols {
            let entry = self
                .counts
                .entry(symbol.clone())
                .or_insert_with(|| AtomicI64::new(0));
            let prev = entry.fetch_add(1, Ordering::SeqCst);
            if prev == 0 {
                to_subscribe.push(symbol.clone());
            }
        }
        metrics::set_subscribed_symbols(self.counts.len());
        to_subscribe
    }

    /// For each symbol: decrement; if the count hits 0, remove the entry and
    /// include the symbol in the returned set for the caller to unsubscribe
    /// upstream. A release with no matching acquire is a caller bug — it is
    /// treated as a no-op (count floored at 0) with a diagnostic counter
    /// bump rather than a panic, per spec.md §4.2.
    ///
    /// Uses `remove_if` rather than a separate get/decrement/remove so the
    /// decrement-and-maybe-remove sequence runs under the shard's single
    /// write lock — a concurrent `acquire` for the same symbol can't land
    /// between the decrement and the removal and have its increment
    /// silently erased.
    pub fn release(&self, symbols: &[String]) -> Vec<String> {
        let mut to_unsubscribe = Vec::new();
        for symbol in symbols {
            let mut existed = false;
            let mut underflowed = false;
            let removed = self.counts.remove_if(symbol, |_, count| {
                existed = true;
                let prev = count.fetch_sub(1, Ordering::SeqCst);
                if prev <= 0 {
                    // Underflow: someone released more than was acquired.
                    count.fetch_add(1, Ordering::SeqCst);
                    underflowed = true;
                    false
                } else {
                    prev == 1
                }
            });

            if !existed || underflowed {
                metrics::record_symbol_refcount_underflow();
                continue;
            }
            if removed.is_some() {
                to_unsubscribe.push(symbol.clone());
            }
        }
        metrics::set_subscribed_symbols(self.counts.len());
        to_unsubscribe
    }

    pub fn count(&self, symbol: &str) -> i64 {
        self.counts
            .get(symbol)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.counts.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl Default for SymbolRefRegistry {
    fn default() -> Self {
        Self::new()
    }
}
