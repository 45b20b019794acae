//! Zip → directory unpacker
//!
//! Extraction is all-or-nothing. Every entry name is validated before the
//! first byte is written; during extraction a journal records each created
//! path and a scratch copy of each overwritten file, and any failure replays
//! the journal backwards.

use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use super::path::{sanitize_relative, UnsafePath};
use super::ArchiveError;

/// Extraction options
#[derive(Debug, Clone)]
pub struct UnpackOptions {
    /// Replace files that already exist under the destination
    pub overwrite: bool,
    /// Scratch directory for copies of overwritten files
    pub backup_dir: PathBuf,
}

/// Summary of a finished extraction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackReport {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

impl UnpackReport {
    pub fn entries(&self) -> usize {
        self.files + self.directories
    }
}

struct PlannedEntry {
    index: usize,
    name: String,
    relative: PathBuf,
    is_dir: bool,
}

/// Extract the zip at `archive_path` under `dest`.
pub fn unpack_archive(
    archive_path: &Path,
    dest: &Path,
    options: &UnpackOptions,
) -> Result<UnpackReport, ArchiveError> {
    let file = File::open(archive_path)?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| ArchiveError::Invalid(e.to_string()))?;

    let plan = plan_entries(&mut archive)?;

    if !options.overwrite {
        if let Some(existing) = plan
            .iter()
            .find(|entry| !entry.is_dir && dest.join(&entry.relative).exists())
        {
            return Err(ArchiveError::AlreadyExists(existing.name.clone()));
        }
    }

    let mut journal = Journal::new(&options.backup_dir);
    match extract(&mut archive, &plan, dest, &mut journal) {
        Ok(report) => {
            journal.commit();
            Ok(report)
        }
        Err(e) => {
            tracing::warn!(
                dest = %dest.display(),
                created = journal.created.len(),
                restored = journal.backups.len(),
                error = %e,
                "Extraction failed, rolling back"
            );
            journal.rollback();
            Err(e)
        }
    }
}

fn plan_entries<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
) -> Result<Vec<PlannedEntry>, ArchiveError> {
    let mut plan = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index)?;
        let name = entry.name().to_string();
        let is_dir = entry.is_dir();
        let relative = sanitize_relative(&name)?;

        if relative.as_os_str().is_empty() {
            if is_dir {
                continue;
            }
            return Err(UnsafePath {
                path: name,
                reason: "empty entry name",
            }
            .into());
        }

        plan.push(PlannedEntry {
            index,
            name,
            relative,
            is_dir,
        });
    }

    Ok(plan)
}

fn extract<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    plan: &[PlannedEntry],
    dest: &Path,
    journal: &mut Journal,
) -> Result<UnpackReport, ArchiveError> {
    let mut report = UnpackReport::default();

    for planned in plan {
        if planned.is_dir {
            journal.ensure_dir(dest, &planned.relative)?;
            report.directories += 1;
            continue;
        }

        if let Some(parent) = planned.relative.parent() {
            journal.ensure_dir(dest, parent)?;
        }

        let target = dest.join(&planned.relative);
        if target.is_dir() {
            return Err(ArchiveError::AlreadyExists(planned.name.clone()));
        }
        if target.exists() {
            journal.backup(&target)?;
        } else {
            journal.created.push(target.clone());
        }

        let mut entry = archive.by_index(planned.index)?;
        let mut out = File::create(&target)?;
        report.bytes += io::copy(&mut entry, &mut out).map_err(classify_copy_error)?;
        report.files += 1;
    }

    Ok(report)
}

/// Decompression and checksum failures surface as `InvalidData`.
fn classify_copy_error(err: io::Error) -> ArchiveError {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
            ArchiveError::Invalid(err.to_string())
        }
        _ => ArchiveError::Io(err),
    }
}

// ============================================================================
// Rollback Journal
// ============================================================================

struct Journal<'a> {
    backup_dir: &'a Path,
    /// Files and directories that did not exist before, in creation order
    created: Vec<PathBuf>,
    /// (target, scratch copy) for every overwritten file
    backups: Vec<(PathBuf, PathBuf)>,
}

impl<'a> Journal<'a> {
    fn new(backup_dir: &'a Path) -> Self {
        Self {
            backup_dir,
            created: Vec::new(),
            backups: Vec::new(),
        }
    }

    fn ensure_dir(&mut self, root: &Path, relative: &Path) -> Result<(), ArchiveError> {
        let mut current = root.to_path_buf();
        for component in relative.components() {
            current.push(component);
            if !current.exists() {
                fs::create_dir(&current)?;
                self.created.push(current.clone());
            } else if !current.is_dir() {
                return Err(ArchiveError::AlreadyExists(current.display().to_string()));
            }
        }
        Ok(())
    }

    fn backup(&mut self, target: &Path) -> Result<(), ArchiveError> {
        fs::create_dir_all(self.backup_dir)?;
        let copy = self.backup_dir.join(format!("{:06}", self.backups.len()));
        fs::copy(target, &copy)?;
        self.backups.push((target.to_path_buf(), copy));
        Ok(())
    }

    fn commit(self) {
        if !self.backups.is_empty() {
            let _ = fs::remove_dir_all(self.backup_dir);
        }
    }

    fn rollback(self) {
        for path in self.created.iter().rev() {
            let result = if path.is_dir() {
                fs::remove_dir(path)
            } else {
                fs::remove_file(path)
            };
            if let Err(e) = result {
                tracing::error!(path = %path.display(), error = %e, "Rollback could not remove path");
            }
        }

        for (target, copy) in &self.backups {
            if let Err(e) = fs::copy(copy, target) {
                tracing::error!(path = %target.display(), error = %e, "Rollback could not restore file");
            }
        }

        if !self.backups.is_empty() {
            let _ = fs::remove_dir_all(self.backup_dir);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::pack::{collect_entries, pack_entries};
    use std::io::{Cursor, Write};
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buffer = Vec::new();
        {
            let mut zip = ZipWriter::new(Cursor::new(&mut buffer));
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            for (name, data) in entries {
                if name.ends_with('/') {
                    zip.add_directory(*name, options).unwrap();
                } else {
                    zip.start_file(*name, options).unwrap();
                    zip.write_all(data).unwrap();
                }
            }
            zip.finish().unwrap();
        }
        buffer
    }

    fn write_archive(dir: &TempDir, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join("upload.part");
        fs::write(&path, bytes).unwrap();
        path
    }

    fn options(scratch: &TempDir, overwrite: bool) -> UnpackOptions {
        UnpackOptions {
            overwrite,
            backup_dir: scratch.path().join("backup"),
        }
    }

    fn snapshot(root: &Path) -> Vec<(String, Option<Vec<u8>>)> {
        collect_entries(root)
            .unwrap()
            .into_iter()
            .map(|e| {
                let data = (!e.is_dir).then(|| fs::read(&e.path).unwrap());
                (e.archive_name, data)
            })
            .collect()
    }

    #[test]
    fn test_round_trip_reproduces_tree() {
        let source = TempDir::new().unwrap();
        fs::create_dir_all(source.path().join("src/js/tree")).unwrap();
        fs::create_dir_all(source.path().join("empty")).unwrap();
        fs::write(source.path().join("README"), b"readme").unwrap();
        fs::write(source.path().join("src/js/tree/nav.js"), b"function nav() {}").unwrap();
        fs::write(source.path().join("src/index.html"), vec![7u8; 100_000]).unwrap();

        let scratch = TempDir::new().unwrap();
        let mut bytes = Vec::new();
        pack_entries(&collect_entries(source.path()).unwrap(), Cursor::new(&mut bytes)).unwrap();
        let archive = write_archive(&scratch, &bytes);

        let dest = TempDir::new().unwrap();
        let report = unpack_archive(&archive, dest.path(), &options(&scratch, true)).unwrap();

        assert_eq!(report.files, 3);
        assert_eq!(report.directories, 4);
        assert_eq!(snapshot(source.path()), snapshot(dest.path()));
    }

    #[test]
    fn test_rejects_traversal_before_writing() {
        let scratch = TempDir::new().unwrap();
        let outer = TempDir::new().unwrap();
        let dest = outer.path().join("dest");
        fs::create_dir(&dest).unwrap();

        let bytes = build_zip(&[("good.txt", b"fine"), ("../outside.txt", b"escaped")]);
        let archive = write_archive(&scratch, &bytes);

        let result = unpack_archive(&archive, &dest, &options(&scratch, true));

        match result {
            Err(ArchiveError::UnsafeEntry(unsafe_path)) => {
                assert_eq!(unsafe_path.path, "../outside.txt")
            }
            other => panic!("expected UnsafeEntry, got {:?}", other),
        }
        assert!(!outer.path().join("outside.txt").exists());
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
    }

    #[test]
    fn test_rejects_absolute_entry() {
        let scratch = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let bytes = build_zip(&[("/etc/evil", b"x")]);
        let archive = write_archive(&scratch, &bytes);

        let result = unpack_archive(&archive, dest.path(), &options(&scratch, true));
        assert!(matches!(result, Err(ArchiveError::UnsafeEntry(_))));
    }

    #[test]
    fn test_invalid_archive() {
        let scratch = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let archive = write_archive(&scratch, b"this is certainly not a zip file at all");

        let result = unpack_archive(&archive, dest.path(), &options(&scratch, true));
        assert!(matches!(result, Err(ArchiveError::Invalid(_))));
        assert_eq!(fs::read_dir(dest.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_corrupt_entry_rolls_back() {
        let scratch = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(dest.path().join("keep.txt"), b"old contents").unwrap();

        let mut bytes = build_zip(&[
            ("keep.txt", b"new contents"),
            ("dir/", b""),
            ("dir/first.txt", b"first"),
            ("dir/second.txt", b"SECOND-CONTENT"),
        ]);
        let needle = b"SECOND-CONTENT";
        let at = bytes
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap();
        bytes[at] ^= 0xFF;
        let archive = write_archive(&scratch, &bytes);

        let result = unpack_archive(&archive, dest.path(), &options(&scratch, true));

        assert!(matches!(result, Err(ArchiveError::Invalid(_))));
        assert!(!dest.path().join("dir").exists());
        assert_eq!(fs::read(dest.path().join("keep.txt")).unwrap(), b"old contents");
        assert!(!scratch.path().join("backup").exists());
    }

    #[test]
    fn test_no_overwrite_conflict() {
        let scratch = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(dest.path().join("a.txt"), b"mine").unwrap();

        let bytes = build_zip(&[("b.txt", b"b"), ("a.txt", b"theirs")]);
        let archive = write_archive(&scratch, &bytes);

        let result = unpack_archive(&archive, dest.path(), &options(&scratch, false));

        assert!(matches!(result, Err(ArchiveError::AlreadyExists(name)) if name == "a.txt"));
        assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"mine");
        assert!(!dest.path().join("b.txt").exists());
    }

    #[test]
    fn test_empty_archive() {
        let scratch = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let archive = write_archive(&scratch, &build_zip(&[]));

        let report = unpack_archive(&archive, dest.path(), &options(&scratch, true)).unwrap();
        assert_eq!(report.entries(), 0);
    }
}
