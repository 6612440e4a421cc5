//! Appending the entries of one image to another.
//!
//! The baseline image is kept byte for byte up to its entry table. Everything
//! the new entries need (their opcode chunks and headers) is placed after it,
//! embedded opcode addresses are rewritten for the new placement, and a fresh
//! entry table listing both old and new entries closes the image.
//!
//! Output layout:
//! - `[0, baseline table)`: baseline bytes, with the leading u16 rewritten
//! - relocated chunks, each one contiguous, in ascending chunk order
//! - one `SCPE` header per new entry, in ascending id order
//! - baseline table rows, then one row per new entry, then `FF FF 00 00`

use std::collections::{BTreeMap, BTreeSet};

use byteorder::{ByteOrder, LittleEndian};

use crate::dependency::Dependency;
use crate::error::{Result, ScriptError};
use crate::format::entry::{
    write_entry_header, write_entry_row, write_entry_table_end, ENTRY_HEADER_FIXED, ENTRY_ROW_SIZE,
};
use crate::script::{ChunkId, OpcodeId, Script};

/// Largest image the 16-bit addresses can describe.
pub const ADDRESS_SPACE: u32 = 0x10000;

/// Written in place of a pointer whose target was not relocated.
///
/// Only chunk members that precede an entry slot can hold such a pointer, and
/// those are unreachable from the new entries.
pub const UNPLACED_TARGET: u16 = 0xFFFF;

/// Entries of `candidate` that `baseline` does not have.
///
/// Entries present in both are left alone even if their contents differ.
pub fn new_entry_ids(baseline: &Script, candidate: &Script) -> BTreeSet<u16> {
    candidate
        .entry_ids()
        .difference(&baseline.entry_ids())
        .copied()
        .collect()
}

/// Addresses assigned to the relocated part of a candidate script.
#[derive(Debug, Clone, Default)]
pub struct Allocation {
    opcodes: BTreeMap<OpcodeId, u16>,
    chunks: BTreeMap<ChunkId, u16>,
    entries: BTreeMap<u16, u16>,
    table_offset: u16,
    len: u32,
}

impl Allocation {
    /// Lay out `dep` and the headers of `new_ids` after the baseline's used region.
    pub fn plan(
        baseline: &Script,
        candidate: &Script,
        new_ids: &BTreeSet<u16>,
        dep: &Dependency,
    ) -> Result<Self> {
        let mut cursor = baseline.entry_table_offset() as u32;
        let mut opcodes = BTreeMap::new();
        let mut chunks = BTreeMap::new();
        let mut entries = BTreeMap::new();

        for (n, &chunk_id) in dep.chunks.iter().enumerate() {
            let chunk = candidate.chunk(chunk_id);
            log::debug!(
                "chunk {}/{} ({} bytes) at 0x{:04X}",
                n + 1,
                dep.chunks.len(),
                chunk.size(),
                cursor
            );
            chunks.insert(chunk_id, cursor);
            for &op_id in chunk.opcodes() {
                opcodes.insert(op_id, cursor);
                cursor += candidate.opcode(op_id).size() as u32;
            }
        }

        for &id in new_ids {
            let entry = candidate.entry(id)?;
            entries.insert(id, cursor);
            cursor += (ENTRY_HEADER_FIXED + 2 * entry.opcodes().len()) as u32;
        }

        let table_offset = cursor;
        let rows = baseline.entry_rows().len() + new_ids.len();
        cursor += (ENTRY_ROW_SIZE * (rows + 1)) as u32;

        if cursor > ADDRESS_SPACE {
            return Err(ScriptError::AddressSpaceOverflow { required: cursor });
        }

        Ok(Self {
            opcodes: narrow(opcodes),
            chunks: narrow(chunks),
            entries: narrow(entries),
            table_offset: table_offset as u16,
            len: cursor,
        })
    }

    pub fn opcode_addr(&self, id: OpcodeId) -> Option<u16> {
        self.opcodes.get(&id).copied()
    }

    pub fn chunk_addr(&self, id: ChunkId) -> Option<u16> {
        self.chunks.get(&id).copied()
    }

    /// Where the header of new entry `id` goes.
    pub fn entry_addr(&self, id: u16) -> Option<u16> {
        self.entries.get(&id).copied()
    }

    pub fn table_offset(&self) -> u16 {
        self.table_offset
    }

    /// Length of the final image.
    pub fn len(&self) -> u32 {
        self.len
    }

    fn placed(&self, script: &Script, id: OpcodeId) -> Result<u16> {
        self.opcode_addr(id).ok_or(ScriptError::DanglingReference {
            addr: script.opcode(id).addr(),
        })
    }
}

/// Every planned address lies below the checked end of the image, so it fits in 16 bits.
fn narrow<K: Ord>(m: BTreeMap<K, u32>) -> BTreeMap<K, u16> {
    m.into_iter().map(|(k, v)| (k, v as u16)).collect()
}

/// Append the entries `new_ids` of `candidate` to `baseline`.
///
/// Nothing is produced unless the whole image fits in the address space.
/// Pointers leaving the relocated code for opcodes outside it are written as
/// [`UNPLACED_TARGET`].
pub fn relocate(baseline: &Script, candidate: &Script, new_ids: &BTreeSet<u16>) -> Result<Vec<u8>> {
    let mut dep = Dependency::new();
    for &id in new_ids {
        candidate.update_dependency(id, &mut dep)?;
    }
    log::info!(
        "{} new entries need {} opcodes in {} chunks ({} bytes)",
        new_ids.len(),
        dep.opcodes.len(),
        dep.chunks.len(),
        dep.size(candidate)
    );

    let alloc = Allocation::plan(baseline, candidate, new_ids, &dep)?;
    log::info!(
        "entry table moves from 0x{:04X} to 0x{:04X}, image is {} bytes",
        baseline.entry_table_offset(),
        alloc.table_offset(),
        alloc.len()
    );

    emit(baseline, candidate, new_ids, &dep, &alloc)
}

/// Run the whole merge: every entry of `candidate` missing from `baseline` is appended.
pub fn merge(baseline: &Script, candidate: &Script) -> Result<Vec<u8>> {
    let new_ids = new_entry_ids(baseline, candidate);
    log::info!(
        "{} baseline entries, {} candidate entries, {} new",
        baseline.entry_ids().len(),
        candidate.entry_ids().len(),
        new_ids.len()
    );
    relocate(baseline, candidate, &new_ids)
}

fn emit(
    baseline: &Script,
    candidate: &Script,
    new_ids: &BTreeSet<u16>,
    dep: &Dependency,
    alloc: &Allocation,
) -> Result<Vec<u8>> {
    let mut out: Vec<u8> = Vec::with_capacity(alloc.len() as usize);
    out.extend_from_slice(&baseline.bytes()[..baseline.entry_table_offset() as usize]);

    for &chunk_id in &dep.chunks {
        for &op_id in candidate.chunk(chunk_id).opcodes() {
            let op = candidate.opcode(op_id);
            let start = out.len();
            out.extend_from_slice(op.data());
            if let Some(ptr) = op.pointer() {
                let target = match alloc.opcode_addr(ptr.target) {
                    Some(addr) => addr,
                    None => {
                        log::debug!(
                            "0x{:04X}: target 0x{:04X} stays behind, unreachable from new entries",
                            op.addr(),
                            candidate.opcode(ptr.target).addr()
                        );
                        UNPLACED_TARGET
                    }
                };
                let at = start + ptr.arg_offset as usize;
                LittleEndian::write_u16(&mut out[at..at + 2], target);
            }
        }
    }

    for &id in new_ids {
        let entry = candidate.entry(id)?;
        let slots = entry
            .opcodes()
            .iter()
            .map(|slot| match slot {
                Some(op_id) => alloc.placed(candidate, *op_id),
                None => Ok(0),
            })
            .collect::<Result<Vec<u16>>>()?;
        write_entry_header(&mut out, entry.kind(), slots);
    }

    debug_assert_eq!(out.len(), alloc.table_offset() as usize);
    for &(id, offset) in baseline.entry_rows() {
        write_entry_row(&mut out, id, offset);
    }
    for &id in new_ids {
        let offset = alloc
            .entry_addr(id)
            .ok_or(ScriptError::UnknownEntry { id })?;
        write_entry_row(&mut out, id, offset);
    }
    write_entry_table_end(&mut out);

    LittleEndian::write_u16(&mut out[0..2], alloc.table_offset());
    debug_assert_eq!(out.len(), alloc.len() as usize);

    Ok(out)
}
