//! Build configuration.
//!
//! Jobs can be described in a TOML file, on the command line, or both; CLI
//! values win. Relative paths in the file resolve against the file's own
//! directory so a config works regardless of the caller's working
//! directory.
//!
//! ```toml
//! [rootfs]
//! input = "build/bin/rfsroot"
//! output = "build/bin/system/rfsimg"
//!
//! [symbols]
//! input = "build/debug/system/kernel.dbg"
//! output = "build/bin/rfsroot/data/ksybs"
//! demangler = ""   # keep mangled names
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::stages::rootfs::RootfsJob;
use crate::stages::symbols::{SymbolsJob, DEFAULT_DEMANGLER, DEFAULT_NM};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildToml {
    rootfs: Option<RootfsToml>,
    symbols: Option<SymbolsToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RootfsToml {
    input: String,
    output: String,
    manifest: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SymbolsToml {
    input: String,
    output: String,
    manifest: Option<String>,
    nm: Option<String>,
    demangler: Option<String>,
}

/// Settings for the archive stage before defaults are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootfsSettings {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
}

/// Settings for the symbol stage before defaults are applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolsSettings {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub manifest: Option<PathBuf>,
    pub nm: Option<String>,
    /// `Some("")` disables demangling.
    pub demangler: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildConfig {
    pub rootfs: RootfsSettings,
    pub symbols: SymbolsSettings,
}

pub fn load_config(path: &Path) -> Result<BuildConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading build config '{}'", path.display()))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse_config(&text, base).with_context(|| format!("parsing build config '{}'", path.display()))
}

/// Parse config text, resolving relative paths against `base`.
pub fn parse_config(text: &str, base: &Path) -> Result<BuildConfig> {
    let parsed: BuildToml = toml::from_str(text)?;

    let rootfs = match parsed.rootfs {
        Some(r) => RootfsSettings {
            input: Some(resolve_path(base, &r.input)),
            output: Some(resolve_path(base, &r.output)),
            manifest: r.manifest.as_deref().map(|m| resolve_path(base, m)),
        },
        None => RootfsSettings::default(),
    };
    let symbols = match parsed.symbols {
        Some(s) => SymbolsSettings {
            input: Some(resolve_path(base, &s.input)),
            output: Some(resolve_path(base, &s.output)),
            manifest: s.manifest.as_deref().map(|m| resolve_path(base, m)),
            nm: s.nm,
            demangler: s.demangler,
        },
        None => SymbolsSettings::default(),
    };

    Ok(BuildConfig { rootfs, symbols })
}

pub(crate) fn resolve_path(base: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

/// `<output>.cache`, next to the output.
pub fn default_manifest_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(output.as_os_str());
    name.push(".cache");
    PathBuf::from(name)
}

impl RootfsSettings {
    /// Values set in `cli` replace ours.
    pub fn overlay(self, cli: RootfsSettings) -> Self {
        Self {
            input: cli.input.or(self.input),
            output: cli.output.or(self.output),
            manifest: cli.manifest.or(self.manifest),
        }
    }

    pub fn into_job(self) -> Result<RootfsJob> {
        let Some(input) = self.input else {
            bail!("no root filesystem input: pass --input or set [rootfs].input");
        };
        let Some(output) = self.output else {
            bail!("no archive output: pass --output or set [rootfs].output");
        };
        let manifest = self
            .manifest
            .unwrap_or_else(|| default_manifest_path(&output));
        Ok(RootfsJob {
            input,
            output,
            manifest,
        })
    }
}

impl SymbolsSettings {
    /// Values set in `cli` replace ours.
    pub fn overlay(self, cli: SymbolsSettings) -> Self {
        Self {
            input: cli.input.or(self.input),
            output: cli.output.or(self.output),
            manifest: cli.manifest.or(self.manifest),
            nm: cli.nm.or(self.nm),
            demangler: cli.demangler.or(self.demangler),
        }
    }

    pub fn into_job(self) -> Result<SymbolsJob> {
        let Some(input) = self.input else {
            bail!("no debug binary: pass --input or set [symbols].input");
        };
        let Some(output) = self.output else {
            bail!("no symbol table output: pass --output or set [symbols].output");
        };
        let manifest = self
            .manifest
            .unwrap_or_else(|| default_manifest_path(&output));
        let nm = match self.nm {
            Some(nm) if nm.trim().is_empty() => bail!("[symbols].nm must not be empty"),
            Some(nm) => nm,
            None => DEFAULT_NM.to_string(),
        };
        let demangler = match self.demangler {
            Some(d) if d.trim().is_empty() => None,
            Some(d) => Some(d),
            None => Some(DEFAULT_DEMANGLER.to_string()),
        };
        Ok(SymbolsJob {
            input,
            output,
            manifest,
            nm,
            demangler,
        })
    }

    /// Like [`into_job`](Self::into_job), but a default manifest that would
    /// land inside `rootfs_tree` is placed next to the tree instead. The
    /// manifest holds host paths and must not be packed into the image.
    pub fn into_job_outside(self, rootfs_tree: Option<&Path>) -> Result<SymbolsJob> {
        let explicit = self.manifest.is_some();
        let mut job = self.into_job()?;
        let Some(tree) = rootfs_tree else {
            return Ok(job);
        };
        if !job.manifest.starts_with(tree) {
            return Ok(job);
        }
        if explicit {
            tracing::warn!(
                manifest = %job.manifest.display(),
                tree = %tree.display(),
                "symbols manifest is inside the rootfs tree and will be packed"
            );
            return Ok(job);
        }

        let name = job
            .manifest
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("ksybs.cache"));
        job.manifest = tree.parent().unwrap_or_else(|| Path::new(".")).join(name);
        Ok(job)
    }
}
