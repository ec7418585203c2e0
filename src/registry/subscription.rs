//! Subscription Registry (spec.md §4.3): tracks which downstream sessions
//! are interested in which channel keys, and answers `Lookup(event)` with
//! the set of sessions that should receive it.
//!
//! Grounded on the `reifydb` subscription registry (dual `DashMap` keyed by
//! subscription id and by connection id, so a disconnect can remove every
//! subscription for a session in one call) and on the teacher's
//! `ActorRegistry` for the general concurrent-registry shape.

use dashmap::DashMap;
use std::collections::HashSet;

use crate::registry::channel_key::{Channel, ChannelKey, SymbolScope};

/// Opaque identifier for a downstream session. A thin wrapper would add
/// nothing a `String` doesn't already give us here.
pub type SessionId = String;

pub struct SubscriptionRegistry {
    /// channel key -> sessions subscribed to it.
    by_key: DashMap<ChannelKey, HashSet<SessionId>>,
    /// session -> channel keys it holds, so `remove_all` doesn't need to
    /// scan `by_key`.
    by_session: DashMap<SessionId, HashSet<ChannelKey>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            by_key: DashMap::new(),
            by_session: DashMap::new(),
        }
    }

    /// Record that `session` wants `key`. Idempotent: subscribing twice to
    /// the same key is a no-op the second time.
    pub fn add(&self, session: &SessionId, key: ChannelKey) {
        self.by_key
            .entry(key.clone())
            .or_default()
            .insert(session.clone());
        self.by_session
            .entry(session.clone())
            .or_default()
            .insert(key);
    }

    /// Remove a single subscription. Returns `true` if it was present.
    pub fn remove(&self, session: &SessionId, key: &ChannelKey) -> bool {
        let mut removed = false;
        if let Some(mut sessions) = self.by_key.get_mut(key) {
            removed = sessions.remove(session);
            if sessions.is_empty() {
                drop(sessions);
                self.by_key.remove(key);
            }
        }
        if let Some(mut keys) = self.by_session.get_mut(session) {
            keys.remove(key);
            if keys.is_empty() {
                drop(keys);
                self.by_session.remove(session);
            }
        }
        removed
    }

    /// Remove every subscription held by `session` (disconnect/teardown
    /// path). Returns the channel keys that were removed, so the caller can
    /// release the underlying symbols from the Symbol Reference Registry.
    pub fn remove_all(&self, session: &SessionId) -> Vec<ChannelKey> {
        let Some((_, keys)) = self.by_session.remove(session) else {
            return Vec::new();
        };
        for key in &keys {
            if let Some(mut sessions) = self.by_key.get_mut(key) {
                sessions.remove(session);
                if sessions.is_empty() {
                    drop(sessions);
                    self.by_key.remove(key);
                }
            }
        }
        keys.into_iter().collect()
    }

    /// Sessions that should receive an event on `channel` for `symbol`.
    /// Matches the symbol-specific key for `channel`, the all-symbols key
    /// for `channel`, and the same two keys under the `market-data`
    /// meta-channel (resolved ambiguity: `market-data` is an ordinary
    /// channel key, not a free all-symbols firehose — see SPEC_FULL.md
    /// §4.3).
    pub fn lookup(&self, channel: Channel, symbol: &str) -> HashSet<SessionId> {
        let mut out = HashSet::new();
        for candidate_channel in [channel, Channel::MarketData] {
            if let Some(sessions) = self.by_key.get(&ChannelKey::all(candidate_channel)) {
                out.extend(sessions.iter().cloned());
            }
            if let Some(sessions) =
                self.by_key.get(&ChannelKey::symbol(candidate_channel, symbol))
            {
                out.extend(sessions.iter().cloned());
            }
        }
        out
    }

    pub fn keys_for_session(&self, session: &SessionId) -> Vec<ChannelKey> {
        self.by_session
            .get(session)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn session_count_for_key(&self, key: &ChannelKey) -> usize {
        self.by_key.get(key).map(|s| s.len()).unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.by_key.len()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_lookup_finds_session() {
        let reg = SubscriptionRegistry::new();
        let session = "s1".to_string();
        reg.add(&session, ChannelKey::symbol(Channel::Trades, "AAPL"));

        let hits = reg.lookup(Channel::Trades, "AAPL");
        assert!(hits.contains(&session));
        assert!(reg.lookup(Channel::Trades, "TSLA").is_empty());
    }

    #[test]
    fn all_scope_matches_every_symbol() {
        let reg = SubscriptionRegistry::new();
        let session = "s1".to_string();
        reg.add(&session, ChannelKey::all(Channel::Quotes));

        assert!(reg.lookup(Channel::Quotes, "AAPL").contains(&session));
        assert!(reg.lookup(Channel::Quotes, "TSLA").contains(&session));
    }

    #[test]
    fn market_data_subscription_matches_any_channel_for_its_symbol() {
        let reg = SubscriptionRegistry::new();
        let session = "s1".to_string();
        reg.add(&session, ChannelKey::symbol(Channel::MarketData, "AAPL"));

        assert!(reg.lookup(Channel::Trades, "AAPL").contains(&session));
        assert!(reg.lookup(Channel::Quotes, "AAPL").contains(&session));
        assert!(reg.lookup(Channel::Aggregates, "AAPL").contains(&session));
        assert!(!reg.lookup(Channel::Trades, "TSLA").contains(&session));
    }

    #[test]
    fn remove_drops_single_subscription_only() {
        let reg = SubscriptionRegistry::new();
        let session = "s1".to_string();
        reg.add(&session, ChannelKey::symbol(Channel::Trades, "AAPL"));
        reg.add(&session, ChannelKey::symbol(Channel::Quotes, "AAPL"));

        assert!(reg.remove(&session, &ChannelKey::symbol(Channel::Trades, "AAPL")));
        assert!(reg.lookup(Channel::Trades, "AAPL").is_empty());
        assert!(reg.lookup(Channel::Quotes, "AAPL").contains(&session));
    }

    #[test]
    fn remove_all_clears_every_subscription_for_session() {
        let reg = SubscriptionRegistry::new();
        let session = "s1".to_string();
        reg.add(&session, ChannelKey::symbol(Channel::Trades, "AAPL"));
        reg.add(&session, ChannelKey::all(Channel::Quotes));

        let removed = reg.remove_all(&session);
        assert_eq!(removed.len(), 2);
        assert!(reg.lookup(Channel::Trades, "AAPL").is_empty());
        assert!(reg.lookup(Channel::Quotes, "TSLA").is_empty());
        assert!(reg.keys_for_session(&session).is_empty());
    }

    #[test]
    fn two_sessions_on_same_key_independent_removal() {
        let reg = SubscriptionRegistry::new();
        let a = "a".to_string();
        let b = "b".to_string();
        let key = ChannelKey::symbol(Channel::Trades, "AAPL");
        reg.add(&a, key.clone());
        reg.add(&b, key.clone());

        reg.remove_all(&a);
        let hits = reg.lookup(Channel::Trades, "AAPL");
        assert!(!hits.contains(&a));
        assert!(hits.contains(&b));
    }
}
