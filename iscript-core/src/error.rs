use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("invalid opcode 0x{opcode:02X} at 0x{addr:04X}")]
    MalformedInput { opcode: u8, addr: u16 },

    #[error("unexpected end of image while reading at 0x{offset:X}")]
    UnexpectedEof { offset: u64 },

    #[error("corrupt entry {id} at 0x{offset:04X}: {reason}")]
    CorruptEntry {
        id: u16,
        offset: u16,
        reason: &'static str,
    },

    #[error("entry {id} has unknown kind {kind}")]
    UnknownEntryKind { id: u16, kind: u8 },

    #[error("opcode at 0x{addr:04X} overlaps opcode at 0x{prev:04X}")]
    OverlappingOpcode { addr: u16, prev: u16 },

    #[error("no entry with id {id}")]
    UnknownEntry { id: u16 },

    #[error("image overflow: 0x{required:X} bytes needed, at most 0x10000 addressable")]
    AddressSpaceOverflow { required: u32 },

    #[error("reference to 0x{addr:04X} does not name a placed opcode")]
    DanglingReference { addr: u16 },
}

pub type Result<T> = std::result::Result<T, ScriptError>;
