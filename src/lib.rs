//! Incremental packaging of boot-time artifacts.
//!
//! Two containers are produced for an OS image and read positionally by
//! the boot loader and kernel:
//!
//! - **Root filesystem archive** - every file under a directory tree as
//!   (path, length, bytes) records
//! - **Kernel symbol table** - name-sorted `nm` output of the debug kernel
//!
//! A manifest beside each output records what went into it. When the inputs
//! still match, the stage does nothing.
//!
//! # Architecture
//!
//! ```text
//! scan ──► manifest::load ──► CacheState::decide ──┬─► skip
//!                                                  └─► encode ──► commit ──► manifest::save
//! ```
//!
//! Outputs are written to a temporary sibling and renamed into place, and
//! the manifest is saved only after that rename. An interrupted run leaves
//! the previous output/manifest pair intact.
//!
//! # Example
//!
//! ```rust,ignore
//! use rfs_builder::stages::rootfs::{pack_rootfs, RootfsJob};
//!
//! let job = RootfsJob {
//!     input: "build/bin/rfsroot".into(),
//!     output: "build/bin/system/rfsimg".into(),
//!     manifest: "build/bin/system/rfsimg.cache".into(),
//! };
//! let report = pack_rootfs(&job, false)?;
//! if report.skipped() {
//!     println!("{} file(s) cached", report.entries);
//! }
//! ```

pub mod artifact;
pub mod cache;
pub mod config;
pub mod error;
pub mod manifest;
pub mod preflight;
pub mod process;
pub mod scan;
pub mod stages;

pub use cache::CacheState;
pub use error::{PackError, Result};
pub use scan::{Entry, Fingerprint};
pub use stages::StageReport;
