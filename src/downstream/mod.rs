pub mod session;
pub mod sweeper;
pub mod websocket;

pub use session::DownstreamSession;
pub use websocket::{teardown_session, ws_handler};
