//! The decoded opcode graph of one image.
//!
//! Opcode boundaries are only known by walking: starting from every entry slot,
//! each decoded opcode queues its embedded target and, unless it ends the flow,
//! the address right after it. Every address is decoded at most once.
//!
//! Once the walk is done, opcodes are placed in an arena in ascending address
//! order and grouped into chunks: maximal runs of back-to-back opcodes that
//! fall through into each other. A chunk is the unit of relocation.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;

use serde::Serialize;

use crate::error::{Result, ScriptError};
use crate::format::entry::{read_entry_table, EntryHeader};
use crate::format::opcode::{OpcodeKind, RawOpcode};

/// Index into the opcode arena of the [`Script`] that produced it; ids of
/// different scripts must not be mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OpcodeId(usize);

impl OpcodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ChunkId(usize);

impl ChunkId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// An embedded reference to another opcode of the same script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtrArg {
    /// Offset of the 2-byte address inside the opcode's data.
    pub arg_offset: u16,
    pub target: OpcodeId,
}

#[derive(Debug, Clone)]
pub struct Opcode {
    addr: u16,
    kind: OpcodeKind,
    data: Vec<u8>,
    pointer: Option<PtrArg>,
    prev: Option<OpcodeId>,
    next: Option<OpcodeId>,
    chunk: ChunkId,
}

impl Opcode {
    /// Address in the image this opcode was decoded from.
    pub fn addr(&self) -> u16 {
        self.addr
    }

    pub fn kind(&self) -> OpcodeKind {
        self.kind
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> u16 {
        self.data.len() as u16
    }

    pub fn pointer(&self) -> Option<PtrArg> {
        self.pointer
    }

    pub fn prev(&self) -> Option<OpcodeId> {
        self.prev
    }

    pub fn next(&self) -> Option<OpcodeId> {
        self.next
    }

    pub fn chunk(&self) -> ChunkId {
        self.chunk
    }
}

#[derive(Debug, Clone, Default)]
pub struct Chunk {
    opcodes: Vec<OpcodeId>,
    size: u32,
}

impl Chunk {
    /// Members in ascending address order.
    pub fn opcodes(&self) -> &[OpcodeId] {
        &self.opcodes
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    offset: u16,
    kind: u8,
    opcodes: Vec<Option<OpcodeId>>,
}

impl Entry {
    /// Offset of the entry header in the source image.
    pub fn offset(&self) -> u16 {
        self.offset
    }

    pub fn kind(&self) -> u8 {
        self.kind
    }

    /// One item per header slot; `None` for an unused slot.
    pub fn opcodes(&self) -> &[Option<OpcodeId>] {
        &self.opcodes
    }
}

#[derive(Debug, Clone)]
pub struct Script {
    bytes: Vec<u8>,
    entry_table_offset: u16,
    entry_rows: Vec<(u16, u16)>,
    entries: BTreeMap<u16, Entry>,
    opcodes: Vec<Opcode>,
    chunks: Vec<Chunk>,
    by_addr: BTreeMap<u16, OpcodeId>,
}

/// The chunk still accepting members while linking.
struct OpenRun {
    last: OpcodeId,
    end: u32,
}

impl Script {
    pub fn parse(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();

        let (entry_table_offset, entry_rows) = read_entry_table(&bytes)?;
        log::info!(
            "entry table at 0x{:04X}: {} entries",
            entry_table_offset,
            entry_rows.len()
        );

        let mut headers: BTreeMap<u16, (u16, EntryHeader)> = BTreeMap::new();
        let mut roots: Vec<u16> = Vec::new();
        for &(id, offset) in &entry_rows {
            let header = EntryHeader::read(&bytes, id, offset)?;
            log::debug!(
                "entry {:5}: offset 0x{:04X}, kind {}",
                id,
                offset,
                header.kind
            );
            roots.extend(header.slots.iter().copied().filter(|&addr| addr != 0));
            headers.insert(id, (offset, header));
        }

        let raw = decode_reachable(&bytes, roots)?;
        log::info!("decoded {} opcodes", raw.len());

        // Ids follow address order, so the arena is sorted by address.
        let by_addr: BTreeMap<u16, OpcodeId> = raw
            .keys()
            .enumerate()
            .map(|(i, &addr)| (addr, OpcodeId(i)))
            .collect();
        let resolve = |addr: u16| {
            by_addr
                .get(&addr)
                .copied()
                .ok_or(ScriptError::DanglingReference { addr })
        };

        let mut opcodes: Vec<Opcode> = Vec::with_capacity(raw.len());
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut open: Option<OpenRun> = None;
        let mut covered: Option<(u16, u32)> = None;

        for (i, op) in raw.into_values().enumerate() {
            let id = OpcodeId(i);
            let start = op.addr as u32;
            let end = start + op.size() as u32;

            if let Some((prev, prev_end)) = covered {
                if start < prev_end {
                    return Err(ScriptError::OverlappingOpcode {
                        addr: op.addr,
                        prev,
                    });
                }
            }
            covered = Some((op.addr, end));

            let prev = match open.take() {
                Some(run) if run.end == start => Some(run.last),
                _ => {
                    chunks.push(Chunk::default());
                    None
                }
            };
            let chunk_id = ChunkId(chunks.len() - 1);
            if let Some(chunk) = chunks.last_mut() {
                chunk.opcodes.push(id);
                chunk.size += op.size() as u32;
            }
            if let Some(p) = prev {
                opcodes[p.0].next = Some(id);
            }

            let pointer = match op.pointer {
                Some(ptr) => Some(PtrArg {
                    arg_offset: ptr.arg_offset,
                    target: resolve(ptr.address)?,
                }),
                None => None,
            };

            if !op.kind.ends_flow() {
                open = Some(OpenRun { last: id, end });
            }

            opcodes.push(Opcode {
                addr: op.addr,
                kind: op.kind,
                data: op.data,
                pointer,
                prev,
                next: None,
                chunk: chunk_id,
            });
        }
        log::info!("linked {} chunks", chunks.len());

        let entries = headers
            .into_iter()
            .map(|(id, (offset, header))| {
                let slots = header
                    .slots
                    .iter()
                    .map(|&addr| if addr == 0 { Ok(None) } else { resolve(addr).map(Some) })
                    .collect::<Result<Vec<_>>>()?;
                Ok((
                    id,
                    Entry {
                        offset,
                        kind: header.kind,
                        opcodes: slots,
                    },
                ))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self {
            bytes,
            entry_table_offset,
            entry_rows,
            entries,
            opcodes,
            chunks,
            by_addr,
        })
    }

    /// The image this script was parsed from.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Where the entry table starts; everything before it is opcode and header data.
    pub fn entry_table_offset(&self) -> u16 {
        self.entry_table_offset
    }

    /// `(id, header offset)` rows in table order, duplicates folded.
    pub fn entry_rows(&self) -> &[(u16, u16)] {
        &self.entry_rows
    }

    pub fn entry_ids(&self) -> BTreeSet<u16> {
        self.entries.keys().copied().collect()
    }

    pub fn entry(&self, id: u16) -> Result<&Entry> {
        self.entries.get(&id).ok_or(ScriptError::UnknownEntry { id })
    }

    pub fn entries(&self) -> impl Iterator<Item = (u16, &Entry)> {
        self.entries.iter().map(|(&id, e)| (id, e))
    }

    /// # Panics
    ///
    /// If `id` was not handed out by this script.
    pub fn opcode(&self, id: OpcodeId) -> &Opcode {
        &self.opcodes[id.0]
    }

    pub fn opcodes(&self) -> impl Iterator<Item = (OpcodeId, &Opcode)> {
        self.opcodes.iter().enumerate().map(|(i, op)| (OpcodeId(i), op))
    }

    pub fn opcode_count(&self) -> usize {
        self.opcodes.len()
    }

    pub fn opcode_at(&self, addr: u16) -> Option<OpcodeId> {
        self.by_addr.get(&addr).copied()
    }

    /// # Panics
    ///
    /// If `id` was not handed out by this script.
    pub fn chunk(&self, id: ChunkId) -> &Chunk {
        &self.chunks[id.0]
    }

    pub fn chunks(&self) -> impl Iterator<Item = (ChunkId, &Chunk)> {
        self.chunks.iter().enumerate().map(|(i, c)| (ChunkId(i), c))
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

/// Walk the opcode graph from `roots`, decoding every reachable address once.
fn decode_reachable(bytes: &[u8], mut pending: Vec<u16>) -> Result<BTreeMap<u16, RawOpcode>> {
    let mut cur = Cursor::new(bytes);
    let mut decoded: BTreeMap<u16, RawOpcode> = BTreeMap::new();

    while let Some(addr) = pending.pop() {
        if decoded.contains_key(&addr) {
            continue;
        }

        cur.set_position(addr as u64);
        let mut op = RawOpcode::read(&mut cur)?;

        // A zero target never names an opcode: offset 0 holds the table address.
        if op.pointer.is_some_and(|ptr| ptr.address == 0) {
            op.pointer = None;
        }
        if let Some(ptr) = op.pointer {
            pending.push(ptr.address);
        }

        if !op.kind.ends_flow() {
            let next = addr as u32 + op.size() as u32;
            let next =
                u16::try_from(next).map_err(|_| ScriptError::AddressSpaceOverflow { required: next })?;
            pending.push(next);
        }

        decoded.insert(addr, op);
    }

    Ok(decoded)
}
