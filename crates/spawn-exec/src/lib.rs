//! The exec worker pool (C7): spares the main loop from blocking on slow
//! remote-launch startups (§4.7).

mod plugin;
mod pool;

pub use plugin::{ExecPlugin, LocalExecPlugin};
pub use pool::{ExecWorkItem, ExecWorkerPool};
