//! Kernel symbol table container.
//!
//! ```text
//! [magic][version][count]
//! count times: [address][name_offset]
//! count times: [type byte][name bytes][0x00]
//! ```
//!
//! Index records and names share one order, sorted by name, so the kernel
//! can binary-search by name. `name_offset` is relative to the first byte
//! of the name section.

use std::collections::HashSet;

use crate::artifact::header::{ContainerHeader, HEADER_LEN};
use crate::error::{PackError, Result};

pub const SYMBOL_MAGIC: u64 = 0xF0EA_EACC;
pub const SYMBOL_VERSION: u64 = 1;

const INDEX_RECORD_LEN: usize = 16;

/// One line of `nm` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRecord {
    pub address: u64,
    /// Single-letter `nm` symbol type (`T`, `t`, `D`, ...).
    pub type_code: u8,
    pub name: String,
}

/// Parse `<hex address> <type> <name>` lines.
///
/// The name is everything after the second space, kept verbatim; demangled
/// C++ names routinely contain spaces. Blank lines are ignored.
pub fn parse_listing(text: &str) -> Result<Vec<SymbolRecord>> {
    let mut records = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let lineno = idx + 1;
        let bad = |why: &str| PackError::format(format!("symbol listing line {lineno}: {why}: {line:?}"));

        let mut fields = line.splitn(3, ' ');
        let (Some(addr), Some(kind), Some(name)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(bad("expected '<address> <type> <name>'"));
        };

        if addr.is_empty() || !addr.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(bad("address is not hexadecimal"));
        }
        let address = u64::from_str_radix(addr, 16).map_err(|_| bad("address out of range"))?;

        let type_code = match kind.as_bytes() {
            [b] if b.is_ascii_graphic() => *b,
            _ => return Err(bad("type code must be a single character")),
        };

        if name.is_empty() {
            return Err(bad("empty symbol name"));
        }
        if name.contains('\0') {
            return Err(bad("symbol name contains NUL"));
        }

        records.push(SymbolRecord {
            address,
            type_code,
            name: name.to_string(),
        });
    }
    Ok(records)
}

/// Keep the first record seen for each name, then sort by name.
///
/// The sort is stable and names are unique afterwards, so the order is
/// fully determined by the listing.
pub fn dedup_and_sort(records: Vec<SymbolRecord>) -> Vec<SymbolRecord> {
    let mut seen = HashSet::new();
    let mut unique: Vec<SymbolRecord> = records
        .into_iter()
        .filter(|r| seen.insert(r.name.clone()))
        .collect();
    unique.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
    unique
}

/// Serialize already deduplicated and sorted records.
pub fn encode_records(records: &[SymbolRecord]) -> Vec<u8> {
    let names_len: usize = records.iter().map(|r| r.name.len() + 2).sum();
    let mut out =
        Vec::with_capacity(HEADER_LEN as usize + records.len() * INDEX_RECORD_LEN + names_len);

    let header = ContainerHeader {
        magic: SYMBOL_MAGIC,
        version: SYMBOL_VERSION,
        count: records.len() as u64,
    };
    out.extend_from_slice(&header.to_bytes());

    let mut name_offset = 0u64;
    for r in records {
        out.extend_from_slice(&r.address.to_le_bytes());
        out.extend_from_slice(&name_offset.to_le_bytes());
        name_offset += r.name.len() as u64 + 2;
    }
    for r in records {
        out.push(r.type_code);
        out.extend_from_slice(r.name.as_bytes());
        out.push(0);
    }
    out
}

/// Listing text to container bytes.
pub fn encode(listing: &str) -> Result<Vec<u8>> {
    let records = parse_listing(listing)?;
    let parsed = records.len();
    let records = dedup_and_sort(records);
    tracing::debug!(parsed, unique = records.len(), "symbol listing parsed");
    Ok(encode_records(&records))
}

/// Decoded symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTable {
    records: Vec<SymbolRecord>,
}

impl SymbolTable {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN as usize {
            return Err(PackError::format("symbol table is truncated"));
        }
        let header = ContainerHeader::read_from(&bytes[..HEADER_LEN as usize])
            .map_err(|e| PackError::io("reading symbol table header", e))?;
        if header.magic != SYMBOL_MAGIC {
            return Err(PackError::format(format!(
                "not a symbol table (magic {:#x})",
                header.magic
            )));
        }
        if header.version > SYMBOL_VERSION {
            return Err(PackError::format(format!(
                "unsupported symbol table version {}",
                header.version
            )));
        }

        let count = usize::try_from(header.count)
            .map_err(|_| PackError::format("symbol count does not fit in memory"))?;
        let index_start = HEADER_LEN as usize;
        let names_start = count
            .checked_mul(INDEX_RECORD_LEN)
            .and_then(|n| n.checked_add(index_start))
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| PackError::format("symbol index is truncated"))?;
        let names = &bytes[names_start..];

        let mut records = Vec::with_capacity(count);
        let mut expected_offset = 0usize;
        for i in 0..count {
            let at = index_start + i * INDEX_RECORD_LEN;
            let address = le_u64(&bytes[at..at + 8]);
            let name_offset = le_u64(&bytes[at + 8..at + 16]);
            if name_offset != expected_offset as u64 {
                return Err(PackError::format(format!(
                    "symbol {i}: name offset {name_offset} does not follow the previous name"
                )));
            }

            let entry = &names[expected_offset.min(names.len())..];
            let (&type_code, rest) = entry
                .split_first()
                .ok_or_else(|| PackError::format("symbol name table is truncated"))?;
            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| PackError::format("symbol name is not NUL-terminated"))?;
            let name = std::str::from_utf8(&rest[..nul])
                .map_err(|e| PackError::format(format!("symbol name is not UTF-8: {e}")))?;

            records.push(SymbolRecord {
                address,
                type_code,
                name: name.to_string(),
            });
            expected_offset += nul + 2;
        }
        if expected_offset != names.len() {
            return Err(PackError::format(format!(
                "{} trailing bytes after the name table",
                names.len() - expected_offset
            )));
        }

        Ok(Self { records })
    }

    pub fn records(&self) -> &[SymbolRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find_by_name(&self, name: &str) -> Option<&SymbolRecord> {
        self.records
            .binary_search_by(|r| r.name.as_bytes().cmp(name.as_bytes()))
            .ok()
            .map(|i| &self.records[i])
    }

    /// Symbol with the greatest address not above `address`, and the
    /// distance from its start.
    pub fn symbolize(&self, address: u64) -> Option<(&SymbolRecord, u64)> {
        self.records
            .iter()
            .filter(|r| r.address <= address)
            .max_by_key(|r| r.address)
            .map(|r| (r, address - r.address))
    }
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(records: &[SymbolRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn first_seen_duplicate_wins_and_names_sort() {
        let bytes = encode("100 T foo\n200 T foo\n050 t bar\n").unwrap();
        let table = SymbolTable::decode(&bytes).unwrap();

        assert_eq!(names(table.records()), vec!["bar", "foo"]);
        assert_eq!(table.find_by_name("foo").unwrap().address, 0x100);
        assert_eq!(table.find_by_name("bar").unwrap().address, 0x50);
        assert_eq!(table.find_by_name("bar").unwrap().type_code, b't');
        assert!(table.find_by_name("baz").is_none());
    }

    #[test]
    fn exact_byte_layout() {
        let bytes = encode("050 t bar\n100 T foo\n").unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&SYMBOL_MAGIC.to_le_bytes());
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.extend_from_slice(&2u64.to_le_bytes());
        expected.extend_from_slice(&0x50u64.to_le_bytes());
        expected.extend_from_slice(&0u64.to_le_bytes());
        expected.extend_from_slice(&0x100u64.to_le_bytes());
        expected.extend_from_slice(&5u64.to_le_bytes());
        expected.extend_from_slice(b"tbar\0Tfoo\0");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn empty_listing_is_header_only() {
        let bytes = encode("").unwrap();
        assert_eq!(bytes.len() as u64, HEADER_LEN);
        assert_eq!(&bytes[16..24], &0u64.to_le_bytes());
        assert!(SymbolTable::decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn names_keep_embedded_spaces() {
        let listing = "ffffffff80001000 T kernel::init(unsigned long, char const*)\n\n";
        let records = parse_listing(listing).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].address, 0xffff_ffff_8000_1000);
        assert_eq!(records[0].name, "kernel::init(unsigned long, char const*)");
    }

    #[test]
    fn malformed_lines_are_format_errors() {
        for bad in [
            "zz T foo",
            "100 T",
            "100",
            "100 TT foo",
            "100 T ",
            "1000000000000000000 T huge",
            " 100 T foo",
        ] {
            let err = parse_listing(bad).unwrap_err();
            assert!(matches!(err, PackError::Format(_)), "{bad:?} -> {err:?}");
        }
    }

    #[test]
    fn name_offsets_accumulate_in_sorted_order() {
        let bytes = encode("1 T ccc\n2 T a\n3 T bb\n").unwrap();
        let offset = |i: usize| {
            let at = HEADER_LEN as usize + i * INDEX_RECORD_LEN + 8;
            le_u64(&bytes[at..at + 8])
        };
        // a, bb, ccc
        assert_eq!((offset(0), offset(1), offset(2)), (0, 3, 7));
    }

    #[test]
    fn symbolize_picks_closest_symbol_below() {
        let bytes = encode("1000 T start\n1400 T middle\n2000 T end\n").unwrap();
        let table = SymbolTable::decode(&bytes).unwrap();

        let (sym, delta) = table.symbolize(0x1410).unwrap();
        assert_eq!((sym.name.as_str(), delta), ("middle", 0x10));
        assert_eq!(table.symbolize(0x2000).unwrap().0.name, "end");
        assert!(table.symbolize(0xfff).is_none());
    }

    #[test]
    fn decode_rejects_wrong_magic_and_truncation() {
        let bytes = encode("100 T foo\n").unwrap();

        let mut wrong = bytes.clone();
        wrong[0] ^= 1;
        assert!(matches!(SymbolTable::decode(&wrong), Err(PackError::Format(_))));

        for cut in [10, 30, bytes.len() - 1] {
            assert!(
                matches!(SymbolTable::decode(&bytes[..cut]), Err(PackError::Format(_))),
                "cut at {cut}"
            );
        }
    }
}
