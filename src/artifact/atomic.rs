//! Crash-safe output files.
//!
//! Every artifact and manifest is written to a temporary sibling of its
//! destination and renamed into place only once it is complete, so a reader
//! sees either the previous file or the new one, never a truncated mix.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{IoContext, Result};

/// An output file that only becomes visible at its destination on
/// [`commit`](PendingFile::commit). Dropping it uncommitted removes the
/// temporary file.
#[derive(Debug)]
pub struct PendingFile {
    file: File,
    tmp: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl PendingFile {
    /// Create the temporary file next to `dest`, creating parent directories.
    pub fn create(dest: &Path) -> Result<Self> {
        let parent = parent_dir(dest);
        fs::create_dir_all(parent)
            .io_context(|| format!("creating output directory {}", parent.display()))?;

        remove_stale_tmp(dest);
        let tmp = tmp_path_for(dest);
        let file = File::create(&tmp)
            .io_context(|| format!("creating temporary file {}", tmp.display()))?;
        Ok(Self {
            file,
            tmp,
            dest: dest.to_path_buf(),
            committed: false,
        })
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    pub fn tmp_path(&self) -> &Path {
        &self.tmp
    }

    /// Flush to disk and atomically replace the destination.
    pub fn commit(mut self) -> Result<()> {
        self.file
            .flush()
            .and_then(|()| self.file.sync_all())
            .io_context(|| format!("syncing {}", self.tmp.display()))?;
        fs::rename(&self.tmp, &self.dest).io_context(|| {
            format!(
                "renaming {} to {}",
                self.tmp.display(),
                self.dest.display()
            )
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Write `bytes` to `dest` through a [`PendingFile`].
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    let mut pending = PendingFile::create(dest)?;
    pending
        .file_mut()
        .write_all(bytes)
        .io_context(|| format!("writing {}", pending.tmp_path().display()))?;
    pending.commit()
}

/// Temporary sibling of `dest`; same directory so the rename never crosses
/// filesystems.
fn tmp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("artifact");
    let n = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    parent_dir(dest).join(format!(".{name}.tmp-{}-{n}", std::process::id()))
}

/// Drop temporaries an interrupted run left next to `dest`.
fn remove_stale_tmp(dest: &Path) {
    let Some(name) = dest.file_name().and_then(|s| s.to_str()) else {
        return;
    };
    let prefix = format!(".{name}.tmp-");
    let Ok(siblings) = fs::read_dir(parent_dir(dest)) else {
        return;
    };
    for ent in siblings.flatten() {
        let stale = ent
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with(&prefix));
        if stale {
            tracing::debug!(path = %ent.path().display(), "removing stale temporary file");
            let _ = fs::remove_file(ent.path());
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
