//! Directory → zip packer
//!
//! The walk is pre-order with siblings sorted by file name, so the same tree
//! always produces the same entry sequence. Directories get their own entries
//! so empty directories survive a round trip.
//!
//! The zip writer patches each local header once the member is written, so
//! the sink must be seekable; exports pack into a scratch spool file.

use std::cell::Cell;
use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::ArchiveError;

/// One member of an archive being packed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    /// Name inside the archive, `/`-separated, directories end with `/`
    pub archive_name: String,
    /// Absolute path on disk
    pub path: PathBuf,
    pub is_dir: bool,
    pub len: u64,
}

/// Summary of a finished pack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackReport {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// List the entries of `root` in archive order.
pub fn collect_entries(root: &Path) -> io::Result<Vec<PackEntry>> {
    let mut entries = Vec::new();
    visit(root, "", &mut entries)?;
    Ok(entries)
}

fn visit(dir: &Path, prefix: &str, out: &mut Vec<PackEntry>) -> io::Result<()> {
    let mut children = std::fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let name = child.file_name().to_string_lossy().into_owned();
        let file_type = child.file_type()?;
        let path = child.path();

        if file_type.is_dir() {
            let archive_name = format!("{prefix}{name}/");
            out.push(PackEntry {
                archive_name: archive_name.clone(),
                path: path.clone(),
                is_dir: true,
                len: 0,
            });
            visit(&path, &archive_name, out)?;
        } else if file_type.is_file() {
            out.push(PackEntry {
                archive_name: format!("{prefix}{name}"),
                len: child.metadata()?.len(),
                path,
                is_dir: false,
            });
        } else {
            tracing::debug!(path = %path.display(), "Skipping non-regular file during export");
        }
    }

    Ok(())
}

/// Write a zip of already collected `entries` into `sink`.
///
/// If any member cannot be read the sink is fused before the writer is
/// dropped, so no central directory is emitted and the output is never a
/// well-formed archive.
pub fn pack_entries<W: Write + Seek>(
    entries: &[PackEntry],
    sink: W,
) -> Result<PackReport, ArchiveError> {
    let fuse = Rc::new(Cell::new(false));
    let mut zip = ZipWriter::new(FuseWriter {
        inner: sink,
        blown: fuse.clone(),
    });

    match write_entries(entries, &mut zip) {
        Ok(report) => {
            zip.finish()?;
            Ok(report)
        }
        Err(e) => {
            fuse.set(true);
            Err(e)
        }
    }
}

fn write_entries<W: Write + Seek>(
    entries: &[PackEntry],
    zip: &mut ZipWriter<W>,
) -> Result<PackReport, ArchiveError> {
    let mut report = PackReport::default();
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in entries {
        if entry.is_dir {
            zip.add_directory(entry.archive_name.as_str(), options)?;
            report.directories += 1;
            continue;
        }

        let mut file = File::open(&entry.path)?;
        zip.start_file(
            entry.archive_name.as_str(),
            options.large_file(entry.len >= u32::MAX as u64),
        )?;
        report.bytes += io::copy(&mut file, zip)?;
        report.files += 1;
    }

    Ok(report)
}

/// Writer that refuses all output once blown
struct FuseWriter<W> {
    inner: W,
    blown: Rc<Cell<bool>>,
}

impl<W> FuseWriter<W> {
    fn check(&self) -> io::Result<()> {
        if self.blown.get() {
            return Err(io::Error::new(io::ErrorKind::Other, "archive aborted"));
        }
        Ok(())
    }
}

impl<W: Write> Write for FuseWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.blown.get() {
            return Ok(());
        }
        self.inner.flush()
    }
}

impl<W: Seek> Seek for FuseWriter<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.check()?;
        self.inner.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use tempfile::TempDir;

    fn sample_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join("a_empty")).unwrap();
        std::fs::write(dir.path().join("z.txt"), b"last").unwrap();
        std::fs::write(dir.path().join("b/one.txt"), b"one").unwrap();
        std::fs::write(dir.path().join("b/nested/two.txt"), b"two").unwrap();
        dir
    }

    #[test]
    fn test_collect_entries_is_sorted_preorder() {
        let tree = sample_tree();
        let names: Vec<_> = collect_entries(tree.path())
            .unwrap()
            .into_iter()
            .map(|e| e.archive_name)
            .collect();

        assert_eq!(
            names,
            vec!["a_empty/", "b/", "b/nested/", "b/nested/two.txt", "b/one.txt", "z.txt"]
        );
    }

    #[test]
    fn test_pack_directory_contents() {
        let tree = sample_tree();
        let mut out = Vec::new();
        let report = pack_entries(&collect_entries(tree.path()).unwrap(), Cursor::new(&mut out)).unwrap();

        assert_eq!(report.files, 3);
        assert_eq!(report.directories, 3);
        assert_eq!(report.bytes, 10);

        let mut archive = zip::ZipArchive::new(Cursor::new(out)).unwrap();
        assert_eq!(archive.len(), 6);

        let mut contents = String::new();
        archive
            .by_name("b/nested/two.txt")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "two");
        assert!(archive.by_name("a_empty/").unwrap().is_dir());
    }

    fn entry_names(bytes: Vec<u8>) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_pack_is_deterministic() {
        let tree = sample_tree();
        let mut first = Vec::new();
        let mut second = Vec::new();
        pack_entries(&collect_entries(tree.path()).unwrap(), Cursor::new(&mut first)).unwrap();
        pack_entries(&collect_entries(tree.path()).unwrap(), Cursor::new(&mut second)).unwrap();

        assert_eq!(entry_names(first), entry_names(second));
    }

    #[test]
    fn test_missing_root_fails() {
        let dir = TempDir::new().unwrap();
        assert!(collect_entries(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_unreadable_member_never_yields_an_archive() {
        let tree = sample_tree();
        std::fs::write(tree.path().join("b/one.txt"), vec![3u8; 200_000]).unwrap();
        let entries = collect_entries(tree.path()).unwrap();
        std::fs::remove_file(tree.path().join("z.txt")).unwrap();

        let mut out = Vec::new();
        let result = pack_entries(&entries, Cursor::new(&mut out));

        assert!(matches!(result, Err(ArchiveError::Io(_))));
        assert!(!out.is_empty());
        assert!(zip::ZipArchive::new(Cursor::new(out)).is_err());
    }
}
