//! Fixed header shared by the archive and the symbol table.
//!
//! Readers identify a container by `magic` alone, then check `version`.

use std::io::{Read, Write};

/// Size of the fixed header shared by both container formats.
pub const HEADER_LEN: u64 = 24;

/// `[u64 magic][u64 version][u64 count]`, little-endian, no padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub magic: u64,
    pub version: u64,
    pub count: u64,
}

impl ContainerHeader {
    pub fn write_to(&self, mut w: impl Write) -> std::io::Result<()> {
        w.write_all(&self.magic.to_le_bytes())?;
        w.write_all(&self.version.to_le_bytes())?;
        w.write_all(&self.count.to_le_bytes())?;
        Ok(())
    }

    pub fn read_from(mut r: impl Read) -> std::io::Result<Self> {
        Ok(Self {
            magic: read_u64(&mut r)?,
            version: read_u64(&mut r)?,
            count: read_u64(&mut r)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN as usize] {
        let mut out = [0u8; HEADER_LEN as usize];
        out[..8].copy_from_slice(&self.magic.to_le_bytes());
        out[8..16].copy_from_slice(&self.version.to_le_bytes());
        out[16..].copy_from_slice(&self.count.to_le_bytes());
        out
    }
}

pub(crate) fn read_u64(mut r: impl Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
