//! Transfer Controller
//!
//! Orchestrates single import and export requests end-to-end:
//! - Import: classify source (body, chunked, remote) and mode (raw, extract),
//!   drive the chunk assembler, then store or extract the artifact
//! - Export: stream a freshly packed archive of a directory
//!
//! Completion work runs as a tracked task so a slow extraction or remote
//! fetch never holds the request open past the sync window.

pub mod controller;
pub mod export;
pub mod import;
pub mod remote;
pub mod types;

pub use controller::{TransferController, SYNC_WAIT_MS};
pub use remote::{file_name_from_url, RemoteFetcher, REMOTE_TIMEOUT_SECS};
pub use types::*;
