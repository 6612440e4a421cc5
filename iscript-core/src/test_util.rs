use crate::format::entry::{write_entry_header, write_entry_row, write_entry_table_end};

/// Hand-assembles small images: opcodes and headers are laid out in call
/// order, the entry table is appended by [`ImageBuilder::finish`].
pub struct ImageBuilder {
    bytes: Vec<u8>,
    rows: Vec<(u16, u16)>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            bytes: vec![0, 0],
            rows: Vec::new(),
        }
    }

    pub fn pos(&self) -> u16 {
        self.bytes.len() as u16
    }

    pub fn pad_to(&mut self, addr: u16) -> &mut Self {
        assert!(addr as usize >= self.bytes.len());
        self.bytes.resize(addr as usize, 0);
        self
    }

    /// Append raw opcode bytes, returning their address.
    pub fn op(&mut self, data: &[u8]) -> u16 {
        let addr = self.pos();
        self.bytes.extend_from_slice(data);
        addr
    }

    /// Append a `goto`-style opcode (`kind`, u16 target).
    pub fn jump(&mut self, kind: u8, target: u16) -> u16 {
        let t = target.to_le_bytes();
        self.op(&[kind, t[0], t[1]])
    }

    pub fn entry(&mut self, id: u16, kind: u8, slots: &[u16]) -> u16 {
        let addr = self.pos();
        write_entry_header(&mut self.bytes, kind, slots.iter().copied());
        self.rows.push((id, addr));
        addr
    }

    pub fn finish(mut self) -> Vec<u8> {
        let table = self.pos();
        self.bytes[..2].copy_from_slice(&table.to_le_bytes());
        for (id, off) in &self.rows {
            write_entry_row(&mut self.bytes, *id, *off);
        }
        write_entry_table_end(&mut self.bytes);
        self.bytes
    }
}
