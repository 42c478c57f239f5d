//! aerostream - a resumable, position-addressable update stream
//!
//! A node's replication log (`binlog`) is exposed to consumers as a stream
//! of DDL, DML and position events (`updatestream`), served over WebSocket
//! (`dispatcher`) with an HTTP status surface (`http_server`).

pub mod binlog;
pub mod cli;
pub mod dispatcher;
pub mod http_server;
pub mod observability;
pub mod updatestream;
