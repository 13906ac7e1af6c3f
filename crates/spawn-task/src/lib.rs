//! The user-task plugin contract broadcast across the overlay once the tree
//! is built (§6), plus `hello`/`noop` reference implementations.

mod plugin;

pub use plugin::{HelloTask, NoopTask, TaskPlugin};
