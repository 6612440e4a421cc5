//! `iscript.bin` container format: the entry table, entry headers and opcodes.

pub mod entry;
pub mod opcode;

pub use entry::{EntryHeader, ENTRY_MAGIC, ENTRY_TABLE_END};
pub use opcode::{OpcodeKind, RawOpcode, RawPtrArg, OPCODE_COUNT};
