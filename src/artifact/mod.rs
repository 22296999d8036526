//! Binary containers read by the boot loader and kernel.
//!
//! - [`archive`] - root filesystem archive (path, length, bytes records)
//! - [`symbols`] - name-sorted kernel symbol table
//! - [`header`] - the 24-byte header both formats start with
//! - [`atomic`] - temp-file-and-rename output used for every artifact
//!
//! Both formats are positional: there is no schema in the file, and the
//! consumer parses fields in the order they are written.

pub mod archive;
pub mod atomic;
pub mod header;
pub mod symbols;

use crate::artifact::header::ContainerHeader;

/// Which container a file holds, judged by its magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Archive,
    SymbolTable,
}

impl ContainerKind {
    pub fn detect(header: &ContainerHeader) -> Option<Self> {
        match header.magic {
            archive::ARCHIVE_MAGIC => Some(Self::Archive),
            symbols::SYMBOL_MAGIC => Some(Self::SymbolTable),
            _ => None,
        }
    }
}
