//! Daemon runtime: the engine host loop, notify-based watch backend, child
//! process table, and Unix-socket control server.

mod backend;
mod error;
mod events;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{request_status, request_stop, send_command, DaemonCommand, DaemonReply};
pub use runtime::{run, start_blocking};
