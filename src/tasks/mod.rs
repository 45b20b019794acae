//! Tracked asynchronous operations

pub mod registry;
pub mod types;

pub use registry::{TaskRegistry, TASK_RETENTION_SECS};
pub use types::*;
