//! Root filesystem archive stage.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::artifact::archive;
use crate::cache::CacheState;
use crate::manifest::{self, Manifest, ManifestLayout};
use crate::scan::scan_tree;
use crate::stages::{output_present, StageReport};

/// Inputs and outputs of one archive build, all paths already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootfsJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub manifest: PathBuf,
}

/// Pack `job.input` into `job.output` unless the manifest says nothing
/// changed.
pub fn pack_rootfs(job: &RootfsJob, force: bool) -> Result<StageReport> {
    let entries = scan_tree(&job.input)
        .with_context(|| format!("scanning root filesystem tree '{}'", job.input.display()))?;

    let cached = manifest::load(&job.manifest, &job.output, ManifestLayout::Archive)
        .filter(|_| output_present(&job.output));
    let state = CacheState::decide(cached.as_ref(), &entries, force);
    tracing::info!(
        input = %job.input.display(),
        entries = entries.len(),
        %state,
        force,
        "rootfs cache decision"
    );

    if !state.needs_rebuild() {
        return Ok(StageReport {
            state,
            entries: entries.len(),
            records: None,
            bytes_written: None,
            output: job.output.clone(),
        });
    }

    let offsets = archive::encode(&entries, &job.output)
        .with_context(|| format!("writing archive '{}'", job.output.display()))?;
    let bytes = fs::metadata(&job.output)
        .with_context(|| format!("stat '{}'", job.output.display()))?
        .len();

    let record = Manifest::for_archive(&job.output, &entries, &offsets)?;
    manifest::save(&job.manifest, &record)
        .with_context(|| format!("saving manifest '{}'", job.manifest.display()))?;

    Ok(StageReport {
        state,
        entries: entries.len(),
        records: Some(offsets.len()),
        bytes_written: Some(bytes),
        output: job.output.clone(),
    })
}
