//! Archive Packing and Extraction
//!
//! Drives the `zip` crate for both directions of a transfer:
//! - Export: walk a directory tree in a stable order and stream it as a zip
//! - Import: validate every entry name, then write the tree under a root,
//!   rolling back everything on failure
//!
//! All functions here are blocking and are meant to run on
//! `tokio::task::spawn_blocking`.

pub mod pack;
pub mod path;
pub mod unpack;

pub use pack::{collect_entries, pack_entries, PackEntry, PackReport};
pub use path::{sanitize_file_name, sanitize_relative, to_slash_string, UnsafePath};
pub use unpack::{unpack_archive, UnpackOptions, UnpackReport};

/// MIME types that select extraction when no explicit option is given
pub const ARCHIVE_CONTENT_TYPES: &[&str] = &[
    "application/zip",
    "application/x-zip",
    "application/x-zip-compressed",
];

/// Archive error types
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Not a valid archive: {0}")]
    Invalid(String),

    #[error("Unsafe archive entry {0}")]
    UnsafeEntry(#[from] UnsafePath),

    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => ArchiveError::Io(e),
            other => ArchiveError::Invalid(other.to_string()),
        }
    }
}

/// Check whether a content type names an archive
pub fn is_archive_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    ARCHIVE_CONTENT_TYPES.contains(&essence.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_content_types() {
        assert!(is_archive_content_type("application/zip"));
        assert!(is_archive_content_type("Application/ZIP; charset=binary"));
        assert!(!is_archive_content_type("text/plain"));
        assert!(!is_archive_content_type("application/octet-stream"));
        assert!(!is_archive_content_type(""));
    }
}
