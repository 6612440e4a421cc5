//! Opcode shapes and the single-opcode decoder.
//!
//! The bytecode does not describe its own boundaries: every opcode starts with
//! a kind byte, and the kind alone (through [`SHAPES`]) says how many bytes
//! follow and whether one of them is a 2-byte address of another opcode.

use std::io::{Cursor, Read};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use serde::Serialize;

use crate::error::{Result, ScriptError};

/// Number of known opcode kinds; kinds are `0..OPCODE_COUNT`.
pub const OPCODE_COUNT: usize = 0x45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OpcodeKind(u8);

impl OpcodeKind {
    pub const GOTO: Self = Self(0x07);
    pub const END: Self = Self(0x16);
    pub const RETURN: Self = Self(0x36);

    pub fn new(raw: u8) -> Option<Self> {
        ((raw as usize) < OPCODE_COUNT).then_some(Self(raw))
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    pub fn shape(self) -> Shape {
        SHAPES[self.0 as usize]
    }

    /// `goto`, `end` and `return` never fall through to the next opcode.
    pub fn ends_flow(self) -> bool {
        matches!(self, Self::GOTO | Self::END | Self::RETURN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    Fixed(u16),
    /// `kind, count, [u16; count]`
    Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub length: Length,
    /// Offset of an embedded opcode address, relative to the kind byte.
    pub ptr_offset: Option<u16>,
}

const fn fixed(len: u16) -> Shape {
    Shape {
        length: Length::Fixed(len),
        ptr_offset: None,
    }
}

const fn ptr(len: u16, offset: u16) -> Shape {
    Shape {
        length: Length::Fixed(len),
        ptr_offset: Some(offset),
    }
}

const VAR: Shape = Shape {
    length: Length::Variable,
    ptr_offset: None,
};

#[rustfmt::skip]
pub static SHAPES: [Shape; OPCODE_COUNT] = [
    // 0x00
    fixed(3), fixed(3), fixed(2), fixed(2), fixed(3), fixed(2), fixed(3), ptr(3, 1),
    fixed(5), fixed(5), fixed(3), fixed(3), fixed(1), fixed(5), fixed(5), fixed(5),
    // 0x10
    fixed(5), fixed(5), fixed(3), fixed(5), fixed(5), fixed(4), fixed(1), fixed(2),
    fixed(3), VAR,      fixed(5), fixed(1), VAR,      fixed(1), fixed(4), fixed(2),
    // 0x20
    fixed(2), fixed(1), fixed(2), fixed(2), fixed(2), fixed(2), fixed(1), fixed(1),
    fixed(2), fixed(2), fixed(1), fixed(2), fixed(2), fixed(1), fixed(1), fixed(1),
    // 0x30
    fixed(1), fixed(2), fixed(1), fixed(1), fixed(2), ptr(3, 1), fixed(1), fixed(3),
    fixed(2), ptr(3, 1), ptr(5, 3), ptr(7, 5), ptr(7, 5), fixed(3), fixed(1), ptr(3, 1),
    // 0x40
    fixed(3), fixed(2), fixed(5), fixed(1), fixed(1),
];

/// An embedded address that has not been matched to an opcode yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPtrArg {
    pub arg_offset: u16,
    pub address: u16,
}

/// An opcode exactly as decoded from the image, before graph linking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOpcode {
    pub addr: u16,
    pub kind: OpcodeKind,
    /// Kind byte plus arguments, verbatim.
    pub data: Vec<u8>,
    pub pointer: Option<RawPtrArg>,
}

impl RawOpcode {
    /// Decode the opcode starting at the cursor position.
    ///
    /// On success the cursor is left just past the opcode.
    pub fn read(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        let start = cur.position();
        // Nothing past 0xFFFF is addressable, so it is outside the image.
        let addr = u16::try_from(start).map_err(|_| ScriptError::UnexpectedEof { offset: start })?;

        let opcode = cur
            .read_u8()
            .map_err(|_| ScriptError::UnexpectedEof { offset: start })?;
        let kind = OpcodeKind::new(opcode).ok_or(ScriptError::MalformedInput { opcode, addr })?;
        let shape = kind.shape();

        let len = match shape.length {
            Length::Fixed(len) => len as usize,
            Length::Variable => {
                let count = cur
                    .read_u8()
                    .map_err(|_| ScriptError::UnexpectedEof { offset: start + 1 })?;
                2 + 2 * count as usize
            }
        };

        cur.set_position(start);
        let mut data = vec![0u8; len];
        cur.read_exact(&mut data)
            .map_err(|_| ScriptError::UnexpectedEof { offset: start })?;

        let pointer = shape.ptr_offset.map(|arg_offset| {
            let off = arg_offset as usize;
            RawPtrArg {
                arg_offset,
                address: LittleEndian::read_u16(&data[off..off + 2]),
            }
        });

        Ok(Self {
            addr,
            kind,
            data,
            pointer,
        })
    }

    pub fn size(&self) -> u16 {
        self.data.len() as u16
    }
}
