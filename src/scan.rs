//! Input discovery and change fingerprints.
//!
//! A scan turns an input (a directory tree, or a single debug binary) into
//! an ordered list of [`Entry`] values. Each entry carries a fingerprint
//! derived from the source's modification time, which the cache manifest
//! compares between runs without ever hashing content.

use std::fmt;
use std::fs::{self, Metadata};
use std::path::{Component, Path, PathBuf};

use time::macros::format_description;
use time::OffsetDateTime;
use walkdir::WalkDir;

use crate::error::{IoContext, PackError, Result};

/// Formatted modification timestamp, `YYYY-MM-DD HH:MM:SS.ffffff` in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One packable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Relative, slash-separated, unique within a run.
    pub path: String,
    pub size: u64,
    pub fingerprint: Fingerprint,
    /// Where the content is read from.
    pub source: PathBuf,
}

/// Fingerprint a file from its metadata.
///
/// Microsecond precision: two scans that observe no filesystem change yield
/// byte-identical fingerprints.
pub fn fingerprint(metadata: &Metadata) -> Result<Fingerprint> {
    let modified = metadata
        .modified()
        .io_context(|| "reading modification time")?;
    let format =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]");
    let stamp = OffsetDateTime::from(modified)
        .format(format)
        .map_err(|e| PackError::format(format!("formatting modification time: {e}")))?;
    Ok(Fingerprint(stamp))
}

/// Enumerate every regular file below `root`.
///
/// Directories are visited depth-first with siblings sorted by file name,
/// so the order is stable across runs and hosts. Symlinks to regular files
/// are packed with their target's content; other symlinks are skipped.
/// Names containing a newline cannot be recorded in the manifest and are
/// rejected.
pub fn scan_tree(root: &Path) -> Result<Vec<Entry>> {
    if !root.is_dir() {
        return Err(PackError::NotFound {
            what: "input directory",
            path: root.to_path_buf(),
        });
    }

    let mut entries = Vec::new();
    for ent in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let ent = ent.map_err(|e| {
            let context = format!("walking {}", root.display());
            PackError::io(context, e.into())
        })?;

        let file_type = ent.file_type();
        let metadata = if file_type.is_file() {
            ent.metadata()
                .map_err(|e| PackError::io(format!("stat {}", ent.path().display()), e.into()))?
        } else if file_type.is_symlink() {
            match fs::metadata(ent.path()) {
                Ok(md) if md.is_file() => md,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(path = %ent.path().display(), error = %e, "skipping dangling symlink");
                    continue;
                }
            }
        } else {
            continue;
        };

        let rel = ent
            .path()
            .strip_prefix(root)
            .map_err(|_| PackError::format(format!("{} escapes {}", ent.path().display(), root.display())))?;
        let path = slash_path(rel)?;

        let entry = Entry {
            size: metadata.len(),
            fingerprint: fingerprint(&metadata)?,
            source: ent.path().to_path_buf(),
            path,
        };
        tracing::debug!(path = %entry.path, size = entry.size, fingerprint = %entry.fingerprint, "scanned");
        entries.push(entry);
    }

    Ok(entries)
}

/// Scan the single debug binary a symbol table is generated from.
pub fn scan_binary(binary: &Path) -> Result<Entry> {
    let metadata = match fs::metadata(binary) {
        Ok(md) if md.is_file() => md,
        Ok(_) => {
            return Err(PackError::NotFound {
                what: "debug binary",
                path: binary.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PackError::NotFound {
                what: "debug binary",
                path: binary.to_path_buf(),
            })
        }
        Err(e) => return Err(PackError::io(format!("stat {}", binary.display()), e)),
    };

    let path = binary.to_string_lossy().into_owned();
    if path.contains('\n') {
        return Err(PackError::format(format!(
            "debug binary path contains a newline: {path:?}"
        )));
    }

    Ok(Entry {
        path,
        size: metadata.len(),
        fingerprint: fingerprint(&metadata)?,
        source: binary.to_path_buf(),
    })
}

fn slash_path(rel: &Path) -> Result<String> {
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    PackError::format(format!("path is not valid UTF-8: {}", rel.display()))
                })?;
                if part.contains('\n') {
                    return Err(PackError::format(format!(
                        "file name contains a newline: {:?}",
                        rel.display().to_string()
                    )));
                }
                parts.push(part);
            }
            Component::CurDir => {}
            _ => {
                return Err(PackError::format(format!(
                    "unexpected component in relative path '{}'",
                    rel.display()
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::write(root.join("a.txt"), b"abc").unwrap();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub/b.txt"), b"").unwrap();
        temp
    }

    #[test]
    fn scan_yields_relative_slash_paths_in_sorted_order() {
        let temp = fixture();
        fs::create_dir_all(temp.path().join("bin")).unwrap();
        fs::write(temp.path().join("bin/init"), b"#!/bin/sh\n").unwrap();

        let entries = scan_tree(temp.path()).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "bin/init", "sub/b.txt"]);
        assert_eq!(entries[0].size, 3);
        assert_eq!(entries[2].size, 0);
        assert_eq!(entries[2].source, temp.path().join("sub/b.txt"));
    }

    #[test]
    fn rescanning_unchanged_tree_is_identical() {
        let temp = fixture();
        let first = scan_tree(temp.path()).unwrap();
        let second = scan_tree(temp.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn fingerprint_has_microsecond_precision() {
        let temp = fixture();
        let md = fs::metadata(temp.path().join("a.txt")).unwrap();
        let fp = fingerprint(&md).unwrap();
        // "2024-01-02 03:04:05.123456"
        assert_eq!(fp.as_str().len(), 26);
        assert_eq!(&fp.as_str()[10..11], " ");
        assert_eq!(&fp.as_str()[19..20], ".");
    }

    #[test]
    fn missing_root_is_not_found() {
        let temp = TempDir::new().unwrap();
        let err = scan_tree(&temp.path().join("nope")).unwrap_err();
        assert!(matches!(err, PackError::NotFound { .. }));
    }

    #[test]
    fn empty_tree_has_no_entries() {
        let temp = TempDir::new().unwrap();
        assert!(scan_tree(temp.path()).unwrap().is_empty());
    }

    #[test]
    fn symlinked_files_are_followed() {
        let temp = fixture();
        std::os::unix::fs::symlink("a.txt", temp.path().join("link.txt")).unwrap();
        std::os::unix::fs::symlink("missing", temp.path().join("dangling")).unwrap();

        let entries = scan_tree(temp.path()).unwrap();
        let link = entries.iter().find(|e| e.path == "link.txt").unwrap();
        assert_eq!(link.size, 3);
        assert!(!entries.iter().any(|e| e.path == "dangling"));
    }

    #[test]
    fn scan_binary_reports_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = scan_binary(&temp.path().join("kernel.dbg")).unwrap_err();
        assert!(matches!(err, PackError::NotFound { what: "debug binary", .. }));
    }

    #[test]
    fn scan_binary_fingerprints_the_file() {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("kernel.dbg");
        fs::write(&bin, b"\x7fELF").unwrap();
        let entry = scan_binary(&bin).unwrap();
        assert_eq!(entry.size, 4);
        assert_eq!(entry.path, bin.to_string_lossy());
    }

    #[test]
    fn newline_in_file_name_is_format_error() {
        let temp = fixture();
        fs::write(temp.path().join("bad\nname"), b"x").unwrap();
        let err = scan_tree(temp.path()).unwrap_err();
        assert!(matches!(err, PackError::Format(_)));
    }

    #[test]
    fn newline_in_binary_path_is_format_error() {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("kernel\n.dbg");
        fs::write(&bin, b"\x7fELF").unwrap();
        assert!(matches!(scan_binary(&bin), Err(PackError::Format(_))));
    }
}
