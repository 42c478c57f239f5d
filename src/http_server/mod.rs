//! # HTTP Status Server
//!
//! Operator-facing HTTP surface of a stream node.
//!
//! # Endpoints
//!
//! - `/health` - Health check
//! - `/debug/vars` - Update stream state and counters
//! - `/debug/role` - Role change hook

pub mod config;
pub mod server;
pub mod status_routes;

pub use config::HttpServerConfig;
pub use server::{BoundHttpServer, HttpServer};
pub use status_routes::debug_vars;
