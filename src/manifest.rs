//! Persisted change-detection manifest.
//!
//! Text format, one record per line:
//!
//! ```text
//! <target path>
//! <entry path>?<fingerprint>?<offset>     (archive)
//! <entry path>?<fingerprint>              (symbol table)
//! ```
//!
//! Fields are split from the right so a `?` inside an entry path survives.
//! A manifest that cannot be parsed is never an error for the caller: it is
//! discarded and the run starts cold.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifact::atomic::write_atomic;
use crate::error::{PackError, Result};
use crate::scan::{Entry, Fingerprint};

const SEP: char = '?';

/// Line shape of a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestLayout {
    /// `path?fingerprint?offset`
    Archive,
    /// `path?fingerprint`
    SymbolTable,
}

impl ManifestLayout {
    fn fields(self) -> usize {
        match self {
            Self::Archive => 3,
            Self::SymbolTable => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    pub path: String,
    pub fingerprint: Fingerprint,
    /// Archive offset of the record's length field; `None` for symbol tables.
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub target: PathBuf,
    pub layout: ManifestLayout,
    pub records: Vec<ManifestRecord>,
}

impl Manifest {
    /// Manifest for a freshly encoded archive. `offsets` pairs with `entries`.
    pub fn for_archive(target: &Path, entries: &[Entry], offsets: &[u64]) -> Result<Self> {
        if entries.len() != offsets.len() {
            return Err(PackError::format(format!(
                "{} entries but {} offsets",
                entries.len(),
                offsets.len()
            )));
        }
        let records = entries
            .iter()
            .zip(offsets)
            .map(|(e, &offset)| ManifestRecord {
                path: e.path.clone(),
                fingerprint: e.fingerprint.clone(),
                offset: Some(offset),
            })
            .collect();
        Ok(Self {
            target: target.to_path_buf(),
            layout: ManifestLayout::Archive,
            records,
        })
    }

    /// Manifest for a symbol table built from a single debug binary.
    pub fn for_symbols(target: &Path, binary: &Entry) -> Self {
        Self {
            target: target.to_path_buf(),
            layout: ManifestLayout::SymbolTable,
            records: vec![ManifestRecord {
                path: binary.path.clone(),
                fingerprint: binary.fingerprint.clone(),
                offset: None,
            }],
        }
    }

    pub fn parse(text: &str, layout: ManifestLayout) -> Result<Self> {
        let mut lines = text.lines();
        let target = match lines.next() {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => return Err(PackError::format("manifest has no target line")),
        };

        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for (idx, line) in lines.enumerate() {
            let lineno = idx + 2;
            let fields: Vec<&str> = line.rsplitn(layout.fields(), SEP).collect();
            if fields.len() != layout.fields() {
                return Err(PackError::format(format!(
                    "manifest line {lineno}: expected {} fields: {line:?}",
                    layout.fields()
                )));
            }

            // rsplitn yields right-to-left.
            let (path, fingerprint, offset) = match layout {
                ManifestLayout::Archive => {
                    let offset = fields[0].parse::<u64>().map_err(|e| {
                        PackError::format(format!("manifest line {lineno}: bad offset: {e}"))
                    })?;
                    (fields[2], fields[1], Some(offset))
                }
                ManifestLayout::SymbolTable => (fields[1], fields[0], None),
            };
            if path.is_empty() || fingerprint.is_empty() || fingerprint.contains(SEP) {
                return Err(PackError::format(format!(
                    "manifest line {lineno}: malformed record: {line:?}"
                )));
            }
            if !seen.insert(path) {
                return Err(PackError::format(format!(
                    "manifest line {lineno}: duplicate path '{path}'"
                )));
            }

            records.push(ManifestRecord {
                path: path.to_string(),
                fingerprint: Fingerprint::new(fingerprint),
                offset,
            });
        }

        Ok(Self {
            target,
            layout,
            records,
        })
    }

    pub fn render(&self) -> String {
        let mut out = format!("{}\n", self.target.display());
        for r in &self.records {
            out.push_str(&r.path);
            out.push(SEP);
            out.push_str(r.fingerprint.as_str());
            if let (ManifestLayout::Archive, Some(offset)) = (self.layout, r.offset) {
                out.push(SEP);
                out.push_str(&offset.to_string());
            }
            out.push('\n');
        }
        out
    }

    /// Every current entry recorded with the same fingerprint, and nothing
    /// else recorded.
    pub fn is_valid_for(&self, entries: &[Entry]) -> bool {
        if self.records.len() != entries.len() {
            return false;
        }
        let recorded: std::collections::HashMap<&str, &Fingerprint> = self
            .records
            .iter()
            .map(|r| (r.path.as_str(), &r.fingerprint))
            .collect();
        entries
            .iter()
            .all(|e| recorded.get(e.path.as_str()) == Some(&&e.fingerprint))
    }
}

/// Read the manifest at `manifest_path` if it describes `target`.
///
/// Absent, unreadable, malformed, and foreign-target manifests all yield
/// `None`.
pub fn load(manifest_path: &Path, target: &Path, layout: ManifestLayout) -> Option<Manifest> {
    let text = match fs::read_to_string(manifest_path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(manifest = %manifest_path.display(), "no manifest");
            return None;
        }
        Err(e) => {
            tracing::warn!(manifest = %manifest_path.display(), error = %e, "ignoring unreadable manifest");
            return None;
        }
    };

    let manifest = match Manifest::parse(&text, layout) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(manifest = %manifest_path.display(), error = %e, "discarding corrupt manifest");
            return None;
        }
    };

    if manifest.target != target {
        tracing::info!(
            manifest = %manifest_path.display(),
            recorded = %manifest.target.display(),
            target = %target.display(),
            "manifest belongs to another target"
        );
        return None;
    }
    Some(manifest)
}

pub fn is_valid(manifest: &Manifest, entries: &[Entry]) -> bool {
    manifest.is_valid_for(entries)
}

/// Replace the manifest file in one rename.
pub fn save(manifest_path: &Path, manifest: &Manifest) -> Result<()> {
    write_atomic(manifest_path, manifest.render().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(path: &str, fp: &str) -> Entry {
        Entry {
            path: path.to_string(),
            size: 0,
            fingerprint: Fingerprint::new(fp),
            source: PathBuf::from("/nonexistent").join(path),
        }
    }

    fn sample() -> (Vec<Entry>, Manifest) {
        let entries = vec![
            entry("a.txt", "2024-01-01 00:00:00.000001"),
            entry("what?.txt", "2024-01-01 00:00:00.000002"),
        ];
        let manifest =
            Manifest::for_archive(Path::new("/build/rfsimg"), &entries, &[30, 51]).unwrap();
        (entries, manifest)
    }

    #[test]
    fn render_then_parse_keeps_question_marks_in_paths() {
        let (_, manifest) = sample();
        let text = manifest.render();
        assert_eq!(
            text,
            "/build/rfsimg\n\
             a.txt?2024-01-01 00:00:00.000001?30\n\
             what?.txt?2024-01-01 00:00:00.000002?51\n"
        );
        assert_eq!(Manifest::parse(&text, ManifestLayout::Archive).unwrap(), manifest);
    }

    #[test]
    fn symbol_layout_has_two_fields() {
        let bin = entry("/build/kernel.dbg", "2024-02-02 10:00:00.500000");
        let manifest = Manifest::for_symbols(Path::new("/build/ksybs"), &bin);
        let text = manifest.render();
        assert_eq!(text, "/build/ksybs\n/build/kernel.dbg?2024-02-02 10:00:00.500000\n");
        let parsed = Manifest::parse(&text, ManifestLayout::SymbolTable).unwrap();
        assert_eq!(parsed.records[0].offset, None);
        assert!(parsed.is_valid_for(&[bin]));
    }

    #[test]
    fn validity_is_all_or_nothing() {
        let (entries, manifest) = sample();
        assert!(is_valid(&manifest, &entries));

        let mut changed = entries.clone();
        changed[1].fingerprint = Fingerprint::new("2024-01-01 00:00:00.000003");
        assert!(!is_valid(&manifest, &changed));

        assert!(!is_valid(&manifest, &entries[..1]));

        let mut extra = entries.clone();
        extra.push(entry("new", "2024-01-01 00:00:00.000004"));
        assert!(!is_valid(&manifest, &extra));

        let mut renamed = entries;
        renamed[0].path = "b.txt".to_string();
        assert!(!is_valid(&manifest, &renamed));
    }

    #[test]
    fn malformed_text_is_rejected() {
        let cases = [
            "",
            "/build/rfsimg\na.txt?fp\n",
            "/build/rfsimg\na.txt?fp?notanumber\n",
            "/build/rfsimg\na.txt?fp?1\na.txt?fp?2\n",
            "/build/rfsimg\n\n",
            "/build/rfsimg\n?fp?1\n",
        ];
        for text in cases {
            assert!(
                Manifest::parse(text, ManifestLayout::Archive).is_err(),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn load_recovers_from_corruption_and_foreign_targets() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("rfsimg.cache");
        let target = Path::new("/build/rfsimg");

        assert!(load(&path, target, ManifestLayout::Archive).is_none());

        fs::write(&path, "/build/rfsimg\ngarbage line\n").unwrap();
        assert!(load(&path, target, ManifestLayout::Archive).is_none());

        let (_, manifest) = sample();
        save(&path, &manifest).unwrap();
        assert_eq!(load(&path, target, ManifestLayout::Archive), Some(manifest));
        assert!(load(&path, Path::new("/other/rfsimg"), ManifestLayout::Archive).is_none());
    }

    #[test]
    fn offsets_must_pair_with_entries() {
        let entries = vec![entry("a", "fp")];
        assert!(Manifest::for_archive(Path::new("t"), &entries, &[]).is_err());
    }
}
