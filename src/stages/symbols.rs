//! Kernel symbol table stage.
//!
//! `nm` lists the debug binary, the listing is piped through the demangler,
//! and the result is encoded into a name-sorted table. The single debug
//! binary is the only cache key.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::artifact::atomic::write_atomic;
use crate::artifact::symbols;
use crate::cache::CacheState;
use crate::manifest::{self, Manifest, ManifestLayout};
use crate::process::{Cmd, CommandRunner};
use crate::scan::scan_binary;
use crate::stages::{output_present, StageReport};

pub const DEFAULT_NM: &str = "nm";
pub const DEFAULT_DEMANGLER: &str = "c++filt";

/// Undefined symbols have no address and cannot be indexed.
pub const NM_ARGS: &[&str] = &["--defined-only"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolsJob {
    /// Debug binary with a symbol table.
    pub input: PathBuf,
    pub output: PathBuf,
    pub manifest: PathBuf,
    pub nm: String,
    /// `None` keeps mangled names.
    pub demangler: Option<String>,
}

impl SymbolsJob {
    /// Host tools this job will run, paired with the package providing them.
    pub fn required_tools(&self) -> Vec<(&str, &str)> {
        let mut tools = vec![(self.nm.as_str(), "binutils")];
        if let Some(demangler) = &self.demangler {
            tools.push((demangler.as_str(), "binutils"));
        }
        tools
    }
}

/// Tool availability check, consulted only when the table is rebuilt.
/// The binary passes [`check_required_tools`](crate::preflight::check_required_tools).
pub type ToolCheck<'a> = &'a dyn Fn(&[(&str, &str)]) -> Result<()>;

/// Run `nm` (and the demangler, if any) and return the final listing.
pub fn list_symbols(runner: &dyn CommandRunner, job: &SymbolsJob) -> Result<String> {
    let listing = Cmd::new(job.nm.as_str())
        .args(NM_ARGS.iter().copied())
        .arg_path(&job.input)
        .error_msg(format!("listing symbols of {}", job.input.display()))
        .run_with(runner)?
        .stdout;

    let Some(demangler) = &job.demangler else {
        return Ok(listing);
    };
    let demangled = Cmd::new(demangler.as_str())
        .stdin(listing)
        .error_msg("demangling symbol listing")
        .run_with(runner)?
        .stdout;
    Ok(demangled)
}

/// Regenerate the symbol table unless the debug binary is unchanged.
pub fn export_symbols(
    job: &SymbolsJob,
    force: bool,
    runner: &dyn CommandRunner,
    check_tools: ToolCheck<'_>,
) -> Result<StageReport> {
    let binary = scan_binary(&job.input)?;
    let entries = std::slice::from_ref(&binary);

    let cached = manifest::load(&job.manifest, &job.output, ManifestLayout::SymbolTable)
        .filter(|_| output_present(&job.output));
    let state = CacheState::decide(cached.as_ref(), entries, force);
    tracing::info!(
        input = %job.input.display(),
        fingerprint = %binary.fingerprint,
        %state,
        force,
        "symbols cache decision"
    );

    if !state.needs_rebuild() {
        return Ok(StageReport {
            state,
            entries: 1,
            records: None,
            bytes_written: None,
            output: job.output.clone(),
        });
    }

    check_tools(&job.required_tools())?;
    let listing = list_symbols(runner, job).context("collecting kernel symbols")?;
    let records = symbols::dedup_and_sort(symbols::parse_listing(&listing)?);
    let bytes = symbols::encode_records(&records);
    write_atomic(&job.output, &bytes)
        .with_context(|| format!("writing symbol table '{}'", job.output.display()))?;

    manifest::save(&job.manifest, &Manifest::for_symbols(&job.output, &binary))
        .with_context(|| format!("saving manifest '{}'", job.manifest.display()))?;

    Ok(StageReport {
        state,
        entries: 1,
        records: Some(records.len()),
        bytes_written: Some(bytes.len() as u64),
        output: job.output.clone(),
    })
}
