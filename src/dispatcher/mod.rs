//! # Event Dispatcher
//!
//! WebSocket transport for update stream sessions.
//!
//! - **Protocol**: JSON messages tagged by `type`
//! - **Server**: one session per connection, served by `StreamServer`
//! - **Client**: `UpdateStreamConnection` for consumers and tools

pub mod client;
pub mod errors;
pub mod protocol;
pub mod server;

pub use client::UpdateStreamConnection;
pub use errors::{DispatchError, DispatchResult};
pub use protocol::{codes, ClientMessage, ServerMessage};
pub use server::{StreamServer, StreamServerConfig};
