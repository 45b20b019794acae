//! Relative path validation
//!
//! Every archive entry name and every request path is funnelled through
//! [`sanitize_relative`] before it is joined onto a root directory.

use std::path::PathBuf;

/// A path that would resolve outside of its root
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{path:?}: {reason}")]
pub struct UnsafePath {
    /// The offending path exactly as received
    pub path: String,
    /// Why it was rejected
    pub reason: &'static str,
}

impl UnsafePath {
    fn new(path: &str, reason: &'static str) -> Self {
        Self {
            path: path.to_string(),
            reason,
        }
    }
}

/// Normalize a relative path and reject anything that escapes its root.
///
/// Both `/` and `\` are accepted as separators. Empty and `.` segments are
/// dropped, so `"a//./b/"` becomes `a/b`. The empty string yields an empty
/// path (the root itself).
///
/// Rejected:
/// - absolute paths (`/etc/passwd`, `\\server\share`)
/// - drive-prefixed paths (`C:\Windows`, `c:foo`)
/// - any `..` segment, even one that would stay inside the root
/// - NUL bytes
pub fn sanitize_relative(raw: &str) -> Result<PathBuf, UnsafePath> {
    if raw.contains('\0') {
        return Err(UnsafePath::new(raw, "contains a NUL byte"));
    }

    if raw.starts_with('/') || raw.starts_with('\\') {
        return Err(UnsafePath::new(raw, "absolute path"));
    }

    let bytes = raw.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Err(UnsafePath::new(raw, "drive-prefixed path"));
    }

    let mut normalized = PathBuf::new();
    for segment in raw.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(UnsafePath::new(raw, "parent directory traversal")),
            s if s.contains(':') => {
                return Err(UnsafePath::new(raw, "segment contains a drive or stream separator"))
            }
            s => normalized.push(s),
        }
    }

    Ok(normalized)
}

/// Validate a single file name (no separators allowed).
pub fn sanitize_file_name(raw: &str) -> Result<String, UnsafePath> {
    let normalized = sanitize_relative(raw)?;
    let mut components = normalized.components();
    match (components.next(), components.next()) {
        (Some(only), None) => Ok(only.as_os_str().to_string_lossy().into_owned()),
        (None, _) => Err(UnsafePath::new(raw, "empty file name")),
        _ => Err(UnsafePath::new(raw, "file name contains a separator")),
    }
}

/// Join normalized components back into a `/`-separated string.
pub fn to_slash_string(path: &std::path::Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_nested_paths() {
        assert_eq!(sanitize_relative("a/b/c.txt").unwrap(), PathBuf::from("a/b/c.txt"));
        assert_eq!(sanitize_relative("./a//b/").unwrap(), PathBuf::from("a/b"));
        assert_eq!(sanitize_relative("dir\\file.txt").unwrap(), PathBuf::from("dir/file.txt"));
        assert_eq!(sanitize_relative("").unwrap(), PathBuf::new());
    }

    #[test]
    fn test_rejects_traversal() {
        for raw in ["../outside.txt", "a/../../b", "a/..", "..\\evil", "ok/..\\..\\x"] {
            let err = sanitize_relative(raw).unwrap_err();
            assert_eq!(err.path, raw);
            assert_eq!(err.reason, "parent directory traversal");
        }
    }

    #[test]
    fn test_rejects_absolute_and_drive_paths() {
        assert_eq!(sanitize_relative("/etc/passwd").unwrap_err().reason, "absolute path");
        assert_eq!(sanitize_relative("\\\\server\\share").unwrap_err().reason, "absolute path");
        assert_eq!(sanitize_relative("C:\\Windows").unwrap_err().reason, "drive-prefixed path");
        assert_eq!(sanitize_relative("c:foo").unwrap_err().reason, "drive-prefixed path");
        assert!(sanitize_relative("a/b:c").is_err());
        assert!(sanitize_relative("a\0b").is_err());
    }

    #[test]
    fn test_file_name() {
        assert_eq!(sanitize_file_name("client.zip").unwrap(), "client.zip");
        assert!(sanitize_file_name("a/b.txt").is_err());
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("..").is_err());
    }

    #[test]
    fn test_slash_string() {
        let path = sanitize_relative("x\\y/z").unwrap();
        assert_eq!(to_slash_string(&path), "x/y/z");
    }
}
