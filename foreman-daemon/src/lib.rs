//! Daemon runtime: socket server + façade + periodic coordination activities.

mod error;
pub mod facade;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod worktree;

pub use error::DaemonError;
pub use facade::Facade;
pub use protocol::{call_op, request_shutdown, request_status, send_request, OpRequest, OpResponse};
pub use runtime::{init_tracing, run, start_blocking};
