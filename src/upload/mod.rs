//! Resumable chunked uploads
//!
//! A client announces an artifact's total length, then sends contiguous byte
//! ranges until the whole artifact has arrived. Partial data lives in the
//! scratch store until the assembled artifact is handed off.

pub mod range;
pub mod scratch;
pub mod session;
pub mod types;

pub use range::{resume_range, ByteRange};
pub use scratch::{compute_hash, digest_file, ScratchStore};
pub use session::{parse_session_id, ChunkAssembler};
pub use types::*;
