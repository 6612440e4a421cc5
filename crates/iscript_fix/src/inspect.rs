use iscript_core::Script;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ScriptSummary {
    pub entry_table_offset: u16,
    pub opcode_count: usize,
    pub entries: Vec<EntrySummary>,
    pub chunks: Vec<ChunkSummary>,
}

#[derive(Debug, Serialize)]
pub struct EntrySummary {
    pub id: u16,
    pub offset: u16,
    pub kind: u8,
    /// Opcode address per slot, `~` for unused slots.
    pub slots: Vec<Option<u16>>,
}

#[derive(Debug, Serialize)]
pub struct ChunkSummary {
    pub start: u16,
    pub size: u32,
    pub opcodes: usize,
}

pub fn summarize(script: &Script) -> ScriptSummary {
    let entries = script
        .entries()
        .map(|(id, entry)| EntrySummary {
            id,
            offset: entry.offset(),
            kind: entry.kind(),
            slots: entry
                .opcodes()
                .iter()
                .map(|slot| slot.map(|op| script.opcode(op).addr()))
                .collect(),
        })
        .collect();

    let chunks = script
        .chunks()
        .filter_map(|(_, chunk)| {
            let first = *chunk.opcodes().first()?;
            Some(ChunkSummary {
                start: script.opcode(first).addr(),
                size: chunk.size(),
                opcodes: chunk.opcodes().len(),
            })
        })
        .collect();

    ScriptSummary {
        entry_table_offset: script.entry_table_offset(),
        opcode_count: script.opcode_count(),
        entries,
        chunks,
    }
}
