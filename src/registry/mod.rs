pub mod channel_key;
pub mod subscription;
pub mod symbol_ref;

pub use channel_key::{Channel, ChannelKey, SymbolScope};
pub use subscription::{SessionId, SubscriptionRegistry};
pub use symbol_ref::SymbolRefRegistry;
