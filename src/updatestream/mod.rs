//! Update stream: the replication log as a resumable event stream
//!
//! - `framer` turns raw log statements into DDL, DML and POS events
//! - `state` gates streaming on the node's role
//! - `service` opens sessions, `session` serves them

mod errors;
mod event;
mod framer;
mod role;
mod service;
mod session;
mod state;

pub use errors::{UpdateStreamError, UpdateStreamResult, DISABLED_WHILE_STREAMING};
pub use event::{Category, Event, WireEvent};
pub use framer::{classify, StatementKind, TransactionFramer};
pub use role::{NodeRole, RoleChange};
pub use service::{ServiceStatus, UpdateStreamService};
pub use session::{SessionInfo, SessionRegistry, StreamSession};
pub use state::{ServiceState, StateSnapshot, UpdateStreamControl};
