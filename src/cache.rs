//! Skip/rebuild decision.

use std::fmt;

use crate::manifest::Manifest;
use crate::scan::Entry;

/// Decided once per run, before any encoder executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// No usable manifest.
    Cold,
    /// Manifest matches every entry; the run does nothing.
    Clean,
    /// Manifest exists but is out of date, or the rebuild was forced.
    Stale,
}

impl CacheState {
    pub fn decide(manifest: Option<&Manifest>, entries: &[Entry], force: bool) -> Self {
        if force {
            return Self::Stale;
        }
        match manifest {
            None => Self::Cold,
            Some(m) if m.is_valid_for(entries) => Self::Clean,
            Some(_) => Self::Stale,
        }
    }

    pub fn needs_rebuild(self) -> bool {
        self != Self::Clean
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cold => "cold",
            Self::Clean => "clean",
            Self::Stale => "stale",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::Fingerprint;
    use std::path::{Path, PathBuf};

    fn entries(fp: &str) -> Vec<Entry> {
        vec![Entry {
            path: "a.txt".to_string(),
            size: 3,
            fingerprint: Fingerprint::new(fp),
            source: PathBuf::from("/src/a.txt"),
        }]
    }

    #[test]
    fn decision_table() {
        let current = entries("2024-01-01 00:00:00.000001");
        let manifest = Manifest::for_archive(Path::new("/out"), &current, &[30]).unwrap();
        let changed = entries("2024-01-01 00:00:00.000002");

        assert_eq!(CacheState::decide(None, &current, false), CacheState::Cold);
        assert_eq!(CacheState::decide(Some(&manifest), &current, false), CacheState::Clean);
        assert_eq!(CacheState::decide(Some(&manifest), &changed, false), CacheState::Stale);
        assert_eq!(CacheState::decide(Some(&manifest), &current, true), CacheState::Stale);
        assert_eq!(CacheState::decide(None, &current, true), CacheState::Stale);

        assert!(!CacheState::Clean.needs_rebuild());
        assert!(CacheState::Cold.needs_rebuild());
        assert!(CacheState::Stale.needs_rebuild());
    }
}
