//! Scenario 2 (reference counting): two sessions subscribing to the same
//! symbol should produce exactly one upstream acquire, and the upstream
//! release should only fire once the last session drops it.

use std::sync::Arc;

use marketgate::registry::{Channel, ChannelKey, SubscriptionRegistry, SymbolRefRegistry};

#[test]
fn two_sessions_share_one_upstream_subscription() {
    let subscriptions = SubscriptionRegistry::new();
    let symbols = Arc::new(SymbolRefRegistry::new());

    let session_a = "session-a".to_string();
    let session_b = "session-b".to_string();

    // Session A subscribes first: this is the one that should trigger an
    // upstream acquire.
    subscriptions.add(&session_a, ChannelKey::symbol(Channel::Trades, "AAPL"));
    let to_subscribe = symbols.acquire(&["AAPL".to_string()]);
    assert_eq!(to_subscribe, vec!["AAPL".to_string()]);

    // Session B subscribes second: the symbol is already held, so no new
    // upstream subscribe is needed.
    subscriptions.add(&session_b, ChannelKey::symbol(Channel::Trades, "AAPL"));
    let to_subscribe = symbols.acquire(&["AAPL".to_string()]);
    assert!(to_subscribe.is_empty());

    assert!(subscriptions.lookup(Channel::Trades, "AAPL").contains(&session_a));
    assert!(subscriptions.lookup(Channel::Trades, "AAPL").contains(&session_b));

    // Session A unsubscribes: B still needs the symbol, so no release.
    subscriptions.remove(&session_a, &ChannelKey::symbol(Channel::Trades, "AAPL"));
    let to_unsubscribe = symbols.release(&["AAPL".to_string()]);
    assert!(to_unsubscribe.is_empty());
    assert!(!subscriptions.lookup(Channel::Trades, "AAPL").contains(&session_a));
    assert!(subscriptions.lookup(Channel::Trades, "AAPL").contains(&session_b));

    // Session B unsubscribes: it was the last holder, so the symbol is
    // released upstream.
    subscriptions.remove(&session_b, &ChannelKey::symbol(Channel::Trades, "AAPL"));
    let to_unsubscribe = symbols.release(&["AAPL".to_string()]);
    assert_eq!(to_unsubscribe, vec!["AAPL".to_string()]);
    assert!(subscriptions.lookup(Channel::Trades, "AAPL").is_empty());
    assert_eq!(symbols.count("AAPL"), 0);
}

#[test]
fn refcount_soundness_tracks_subscriber_count_across_symbols() {
    let subscriptions = SubscriptionRegistry::new();
    let symbols = SymbolRefRegistry::new();

    for (session, symbol) in [("s1", "AAPL"), ("s2", "AAPL"), ("s3", "TSLA")] {
        subscriptions.add(&session.to_string(), ChannelKey::symbol(Channel::Quotes, symbol));
        symbols.acquire(&[symbol.to_string()]);
    }

    assert_eq!(symbols.count("AAPL"), 2);
    assert_eq!(symbols.count("TSLA"), 1);
    assert_eq!(subscriptions.lookup(Channel::Quotes, "AAPL").len(), 2);
    assert_eq!(subscriptions.lookup(Channel::Quotes, "TSLA").len(), 1);
}
