//! WebSocket transport for multi-session play.
//!
//! - `protocol`: the JSON message format between browser and server.
//! - `session`: connection lifecycle: register/reconnect handshake, input
//!   routing, detach on disconnect.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
