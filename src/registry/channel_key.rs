//! Channel key: `(channel, symbol-scope)`, the routing key of the
//! Subscription Registry (spec.md §3/§4.3).

use serde::Deserialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    Trades,
    Quotes,
    Aggregates,
    MarketData,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Trades => "trades",
            Channel::Quotes => "quotes",
            Channel::Aggregates => "aggregates",
            Channel::MarketData => "market-data",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "trades" => Some(Channel::Trades),
            "quotes" => Some(Channel::Quotes),
            "aggregates" => Some(Channel::Aggregates),
            "market-data" => Some(Channel::MarketData),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A channel subscription's symbol scope: every symbol, or one specific
/// symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolScope {
    All,
    Symbol(String),
}

impl SymbolScope {
    pub fn matches(&self, symbol: &str) -> bool {
        match self {
            SymbolScope::All => true,
            SymbolScope::Symbol(s) => s == symbol,
        }
    }
}

/// `(channel, symbol-scope)` — the unit of subscribe/unsubscribe and the
/// routing key the Broadcast Engine looks up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub channel: Channel,
    pub scope: SymbolScope,
}

impl ChannelKey {
    pub fn new(channel: Channel, scope: SymbolScope) -> Self {
        Self { channel, scope }
    }

    pub fn all(channel: Channel) -> Self {
        Self::new(channel, SymbolScope::All)
    }

    pub fn symbol(channel: Channel, symbol: impl Into<String>) -> Self {
        Self::new(channel, SymbolScope::Symbol(symbol.into()))
    }
}
