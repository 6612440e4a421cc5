//! Entry table and `SCPE` entry headers.
//!
//! Layout (little-endian):
//! - 0x00: u16 entry_table_offset
//! - entry_table_offset: repeated `(u16 id, u16 header_offset)`, closed by id `0xFFFF`
//!   (and, by convention, a zero offset)
//! - header_offset:
//!     - [4] magic `SCPE`
//!     - u32 kind (only the low byte is meaningful)
//!     - [slot_count(kind)] u16 opcode address, `0` for an unused slot

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Result, ScriptError};

pub const ENTRY_MAGIC: &[u8; 4] = b"SCPE";

/// Id that closes the entry table.
pub const ENTRY_TABLE_END: u16 = 0xFFFF;

/// Magic plus the 4-byte kind field.
pub const ENTRY_HEADER_FIXED: usize = 8;

/// Size of one `(id, offset)` row of the entry table, and of its terminator.
pub const ENTRY_ROW_SIZE: usize = 4;

/// Number of opcode slots following the header of an entry of `kind`.
pub fn slot_count(kind: u8) -> Option<usize> {
    let n = match kind {
        0 | 1 => 2,
        2 => 4,
        12 | 13 => 14,
        14 | 15 => 16,
        20 | 21 => 22,
        23 => 24,
        24 => 26,
        26..=29 => 28,
        _ => return None,
    };
    Some(n)
}

pub fn header_size(kind: u8) -> Option<usize> {
    slot_count(kind).map(|n| ENTRY_HEADER_FIXED + 2 * n)
}

fn read_u16(cur: &mut Cursor<&[u8]>) -> Result<u16> {
    let offset = cur.position();
    cur.read_u16::<LittleEndian>()
        .map_err(|_| ScriptError::UnexpectedEof { offset })
}

/// Read the leading entry-table address and the `(id, offset)` rows it points to.
///
/// Rows keep table order. A repeated id keeps the position of its first row
/// and takes the offset of its last.
pub fn read_entry_table(bytes: &[u8]) -> Result<(u16, Vec<(u16, u16)>)> {
    let mut cur = Cursor::new(bytes);
    let table_offset = read_u16(&mut cur)?;
    cur.set_position(table_offset as u64);

    let mut rows: Vec<(u16, u16)> = Vec::new();
    let mut positions: BTreeMap<u16, usize> = BTreeMap::new();
    loop {
        let id = read_u16(&mut cur)?;
        if id == ENTRY_TABLE_END {
            break;
        }
        let offset = read_u16(&mut cur)?;
        match positions.get(&id) {
            Some(&pos) => {
                log::warn!("entry {} listed twice, keeping offset 0x{:04X}", id, offset);
                rows[pos].1 = offset;
            }
            None => {
                positions.insert(id, rows.len());
                rows.push((id, offset));
            }
        }
    }

    Ok((table_offset, rows))
}

/// An entry header as stored in the image; slots are raw opcode addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    pub kind: u8,
    pub slots: Vec<u16>,
}

impl EntryHeader {
    pub fn read(bytes: &[u8], id: u16, offset: u16) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        cur.set_position(offset as u64);

        let mut magic = [0u8; 4];
        cur.read_exact(&mut magic)
            .map_err(|_| ScriptError::UnexpectedEof {
                offset: offset as u64,
            })?;
        if &magic != ENTRY_MAGIC {
            return Err(ScriptError::CorruptEntry {
                id,
                offset,
                reason: "missing SCPE magic",
            });
        }

        let kind_field = cur
            .read_u32::<LittleEndian>()
            .map_err(|_| ScriptError::UnexpectedEof {
                offset: offset as u64 + 4,
            })?;
        if kind_field > 0xFF {
            return Err(ScriptError::CorruptEntry {
                id,
                offset,
                reason: "high bytes of kind are not zero",
            });
        }
        let kind = kind_field as u8;
        let count = slot_count(kind).ok_or(ScriptError::UnknownEntryKind { id, kind })?;

        let slots = (0..count)
            .map(|_| read_u16(&mut cur))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { kind, slots })
    }
}

/// Append an entry header with the given slot addresses.
pub fn write_entry_header(out: &mut Vec<u8>, kind: u8, slots: impl IntoIterator<Item = u16>) {
    out.extend_from_slice(ENTRY_MAGIC);
    out.extend_from_slice(&(kind as u32).to_le_bytes());
    for slot in slots {
        out.extend_from_slice(&slot.to_le_bytes());
    }
}

pub fn write_entry_row(out: &mut Vec<u8>, id: u16, offset: u16) {
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
}

pub fn write_entry_table_end(out: &mut Vec<u8>) {
    write_entry_row(out, ENTRY_TABLE_END, 0);
}
