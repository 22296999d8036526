//! Error taxonomy for the packaging engine.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackError {
    /// A required input (tree root, debug binary) does not exist.
    #[error("{what} not found: {}", path.display())]
    NotFound { what: &'static str, path: PathBuf },

    /// An external tool could not be started or exited unsuccessfully.
    #[error("external tool `{tool}` failed ({status}): {diagnostic}")]
    ExternalTool {
        tool: String,
        status: String,
        diagnostic: String,
    },

    /// Malformed manifest, listing, or container bytes.
    #[error("format error: {0}")]
    Format(String),

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl PackError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }
}

/// Attach a human-readable context to `std::io::Result`s.
pub trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| PackError::io(f(), e))
    }
}

pub type Result<T> = std::result::Result<T, PackError>;
