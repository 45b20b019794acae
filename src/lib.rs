//! Xfer Server
//!
//! Resumable chunked file transfer over HTTP, with asynchronous task tracking
//! for imports and exports that outlive a single request.

pub mod archive;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod tasks;
pub mod transfer;
pub mod upload;
pub mod workspace;

pub use config::Config;
pub use error::AppError;
pub use state::AppState;
