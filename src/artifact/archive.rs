//! Root filesystem archive container.
//!
//! Layout (all integers little-endian u64, no padding):
//!
//! ```text
//! [magic][version][count]
//! count times: [path bytes][0x00][length][length raw bytes]
//! ```
//!
//! The boot-time reader streams the file front to back, so the writer never
//! seeks: offsets are tracked by counting bytes as they are emitted.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::artifact::atomic::PendingFile;
use crate::artifact::header::{read_u64, ContainerHeader, HEADER_LEN};
use crate::error::{IoContext, PackError, Result};
use crate::scan::Entry;

pub const ARCHIVE_MAGIC: u64 = 0xF5EE_EE5F;
pub const ARCHIVE_VERSION: u64 = 1;

/// Longest path the reader accepts before giving up on a terminator.
const MAX_PATH_LEN: usize = 4096;
const COPY_BUF_LEN: usize = 64 * 1024;

/// Small Write adapter that counts bytes written
struct CountingWriter<W: Write> {
    inner: W,
    n: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let k = self.inner.write(buf)?;
        self.n += k as u64;
        Ok(k)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Streaming archive encoder over any `Write`.
pub struct ArchiveWriter<W: Write> {
    out: CountingWriter<W>,
    declared: u64,
    appended: u64,
}

impl<W: Write> ArchiveWriter<W> {
    /// Emit the header for an archive of `count` records.
    pub fn new(inner: W, count: u64) -> Result<Self> {
        let mut out = CountingWriter { inner, n: 0 };
        ContainerHeader {
            magic: ARCHIVE_MAGIC,
            version: ARCHIVE_VERSION,
            count,
        }
        .write_to(&mut out)
        .io_context(|| "writing archive header")?;
        Ok(Self {
            out,
            declared: count,
            appended: 0,
        })
    }

    /// Append one record and return its offset: the stream position of the
    /// length field, right after the path terminator.
    ///
    /// Exactly `len` bytes must be readable from `content`.
    pub fn append(&mut self, path: &str, len: u64, content: &mut dyn Read) -> Result<u64> {
        if self.appended == self.declared {
            return Err(PackError::format(format!(
                "archive declared {} records; refusing to append '{path}'",
                self.declared
            )));
        }
        if path.as_bytes().contains(&0) {
            return Err(PackError::format(format!(
                "archive path contains a NUL byte: {path:?}"
            )));
        }

        self.out
            .write_all(path.as_bytes())
            .and_then(|()| self.out.write_all(&[0]))
            .io_context(|| format!("writing path of '{path}'"))?;
        let offset = self.out.n;
        self.out
            .write_all(&len.to_le_bytes())
            .io_context(|| format!("writing length of '{path}'"))?;

        let mut buf = vec![0u8; COPY_BUF_LEN];
        let mut left = len;
        while left > 0 {
            let want = buf.len().min(left as usize);
            let k = content
                .read(&mut buf[..want])
                .io_context(|| format!("reading content of '{path}'"))?;
            if k == 0 {
                return Err(PackError::io(
                    format!("reading content of '{path}'"),
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("source ended {left} bytes early (changed during packing?)"),
                    ),
                ));
            }
            self.out
                .write_all(&buf[..k])
                .io_context(|| format!("writing content of '{path}'"))?;
            left -= k as u64;
        }
        let extra = content
            .read(&mut buf[..1])
            .io_context(|| format!("reading content of '{path}'"))?;
        if extra != 0 {
            return Err(PackError::io(
                format!("reading content of '{path}'"),
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("source is longer than the announced {len} bytes (changed during packing?)"),
                ),
            ));
        }

        self.appended += 1;
        Ok(offset)
    }

    /// Check the record count against the header and flush.
    pub fn finish(mut self) -> Result<W> {
        if self.appended != self.declared {
            return Err(PackError::format(format!(
                "archive declared {} records but {} were appended",
                self.declared, self.appended
            )));
        }
        self.out.flush().io_context(|| "flushing archive")?;
        Ok(self.out.inner)
    }
}

/// Encode `entries` into `target`, returning each entry's record offset.
///
/// The archive is assembled in a temporary sibling of `target` and renamed
/// into place only after the last record is written, so a failure leaves any
/// previous archive untouched.
pub fn encode(entries: &[Entry], target: &Path) -> Result<Vec<u64>> {
    let mut pending = PendingFile::create(target)?;

    let offsets = {
        let out = BufWriter::new(pending.file_mut());
        let mut writer = ArchiveWriter::new(out, entries.len() as u64)?;
        let mut offsets = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut src = File::open(&entry.source)
                .io_context(|| format!("opening {}", entry.source.display()))?;
            let len = src
                .metadata()
                .io_context(|| format!("stat {}", entry.source.display()))?
                .len();
            let offset = writer.append(&entry.path, len, &mut src)?;
            tracing::debug!(path = %entry.path, offset, len, "packed");
            offsets.push(offset);
        }
        writer.finish()?;
        offsets
    };

    pending.commit()?;
    Ok(offsets)
}

/// Encode in-memory `(path, content)` pairs.
pub fn encode_to_vec<P, C>(records: &[(P, C)]) -> Result<Vec<u8>>
where
    P: AsRef<str>,
    C: AsRef<[u8]>,
{
    let mut writer = ArchiveWriter::new(Vec::new(), records.len() as u64)?;
    for (path, content) in records {
        let content = content.as_ref();
        writer.append(path.as_ref(), content.len() as u64, &mut &content[..])?;
    }
    writer.finish()
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    pub path: String,
    /// Position of the length field within the container.
    pub offset: u64,
    pub data: Vec<u8>,
}

/// Sequential archive decoder.
pub struct ArchiveReader<R: Read> {
    inner: R,
    header: ContainerHeader,
    pos: u64,
    remaining: u64,
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(mut inner: R) -> Result<Self> {
        let header = ContainerHeader::read_from(&mut inner).map_err(truncated)?;
        if header.magic != ARCHIVE_MAGIC {
            return Err(PackError::format(format!(
                "not an archive container (magic {:#x})",
                header.magic
            )));
        }
        if header.version > ARCHIVE_VERSION {
            return Err(PackError::format(format!(
                "unsupported archive version {}",
                header.version
            )));
        }
        Ok(Self {
            inner,
            header,
            pos: HEADER_LEN,
            remaining: header.count,
        })
    }

    pub fn header(&self) -> ContainerHeader {
        self.header
    }

    /// Decode the next record, or `None` once `count` records were read.
    pub fn next_record(&mut self) -> Result<Option<ArchiveRecord>> {
        if self.remaining == 0 {
            return Ok(None);
        }

        let mut path = Vec::new();
        loop {
            let mut b = [0u8; 1];
            self.inner.read_exact(&mut b).map_err(truncated)?;
            self.pos += 1;
            if b[0] == 0 {
                break;
            }
            if path.len() == MAX_PATH_LEN {
                return Err(PackError::format("archive path is not NUL-terminated"));
            }
            path.push(b[0]);
        }
        let path = String::from_utf8(path)
            .map_err(|e| PackError::format(format!("archive path is not UTF-8: {e}")))?;

        let offset = self.pos;
        let len = read_u64(&mut self.inner).map_err(truncated)?;
        self.pos += 8;

        let mut data = Vec::new();
        (&mut self.inner)
            .take(len)
            .read_to_end(&mut data)
            .io_context(|| format!("reading content of '{path}'"))?;
        if data.len() as u64 != len {
            return Err(PackError::format(format!(
                "record '{path}' declares {len} bytes but only {} remain",
                data.len()
            )));
        }
        self.pos += len;
        self.remaining -= 1;

        Ok(Some(ArchiveRecord { path, offset, data }))
    }

    /// Read every remaining record and reject trailing bytes.
    pub fn read_all(mut self) -> Result<Vec<ArchiveRecord>> {
        let mut out = Vec::with_capacity(self.remaining.min(1 << 16) as usize);
        while let Some(record) = self.next_record()? {
            out.push(record);
        }
        let mut probe = [0u8; 1];
        let n = self
            .inner
            .read(&mut probe)
            .io_context(|| "checking for trailing data")?;
        if n != 0 {
            return Err(PackError::format(format!(
                "trailing data after {} records at offset {}",
                self.header.count, self.pos
            )));
        }
        Ok(out)
    }
}

fn truncated(e: std::io::Error) -> PackError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        PackError::format("archive is truncated")
    } else {
        PackError::io("reading archive", e)
    }
}
