//! iscript-core
//!
//! Reads `iscript.bin` images into an opcode graph and appends the entries of
//! one image to another, relocating the opcodes they depend on.
//!
//! ```text
//! bytes -> Script::parse -> Script::update_dependency -> link::relocate -> bytes
//! ```

pub mod dependency;
pub mod error;
pub mod format;
pub mod link;
pub mod script;

#[cfg(test)]
mod test_util;

pub use dependency::Dependency;
pub use error::{Result, ScriptError};
pub use link::{merge, new_entry_ids, relocate, Allocation, UNPLACED_TARGET};
pub use script::{Chunk, ChunkId, Entry, Opcode, OpcodeId, PtrArg, Script};
