//! Build stages: scan, decide, encode, record.
//!
//! Each stage follows the same order. The cache decision is made before
//! anything is written, the container is committed before the manifest, and
//! a clean cache means the stage touches nothing.

pub mod rootfs;
pub mod symbols;

use std::path::PathBuf;

use crate::cache::CacheState;

/// What a stage did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub state: CacheState,
    /// Entries considered (files packed, or the single debug binary).
    pub entries: usize,
    /// Records written to the container; `None` when the stage was skipped.
    pub records: Option<usize>,
    /// Size of the committed container; `None` when the stage was skipped.
    pub bytes_written: Option<u64>,
    pub output: PathBuf,
}

impl StageReport {
    pub fn skipped(&self) -> bool {
        !self.state.needs_rebuild()
    }
}

/// A manifest only vouches for an output that still exists.
pub(crate) fn output_present(output: &std::path::Path) -> bool {
    let present = output.is_file();
    if !present {
        tracing::info!(output = %output.display(), "output missing; ignoring manifest");
    }
    present
}
