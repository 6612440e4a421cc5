use std::collections::BTreeSet;

use crate::error::Result;
use crate::script::{ChunkId, OpcodeId, Script};

/// Opcodes and chunks that have to travel together with a set of entries.
///
/// Filled by [`Script::update_dependency`]; repeated calls accumulate the union.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependency {
    pub opcodes: BTreeSet<OpcodeId>,
    pub chunks: BTreeSet<ChunkId>,
}

impl Dependency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.opcodes.is_empty()
    }

    /// Total bytes taken by the collected chunks.
    pub fn size(&self, script: &Script) -> u32 {
        self.chunks.iter().map(|&c| script.chunk(c).size()).sum()
    }
}

impl Script {
    /// Add everything reachable from entry `id` to `dep`, following both the
    /// fallthrough and the embedded-reference edges of every opcode.
    pub fn update_dependency(&self, id: u16, dep: &mut Dependency) -> Result<()> {
        let entry = self.entry(id)?;
        let mut stack: Vec<OpcodeId> = entry.opcodes().iter().flatten().copied().collect();

        while let Some(op_id) = stack.pop() {
            if !dep.opcodes.insert(op_id) {
                continue;
            }
            let op = self.opcode(op_id);
            dep.chunks.insert(op.chunk());
            stack.extend(op.next());
            stack.extend(op.pointer().map(|ptr| ptr.target));
        }

        log::debug!(
            "entry {}: {} opcodes in {} chunks collected so far",
            id,
            dep.opcodes.len(),
            dep.chunks.len()
        );
        Ok(())
    }
}
