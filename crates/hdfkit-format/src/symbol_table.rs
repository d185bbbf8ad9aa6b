//! Symbol Table message, symbol table entries, and SNOD nodes.
//!
//! These back the original ("old-style") group format: a local heap holds the
//! link names and a v1 B-tree indexes SNOD nodes of entries.

use crate::cursor::{ByteWriter, Cursor};
use crate::error::{FormatError, Result};

const SNOD_SIGNATURE: [u8; 4] = *b"SNOD";

/// Symbol Table message (type 0x0011) found in old-style group headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTableMessage {
    /// Address of the group's v1 B-tree (node type 0).
    pub btree_address: u64,
    /// Address of the group's local heap.
    pub local_heap_address: u64,
}

impl SymbolTableMessage {
    pub fn parse(data: &[u8], offset_size: u8) -> Result<Self> {
        let mut c = Cursor::new(data);
        Ok(Self {
            btree_address: c.read_offset(offset_size)?,
            local_heap_address: c.read_offset(offset_size)?,
        })
    }

    pub fn serialize(&self, offset_size: u8) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_offset(self.btree_address, offset_size);
        w.write_offset(self.local_heap_address, offset_size);
        w.into_inner()
    }
}

/// Decoded 16-byte scratch pad of a symbol table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchPad {
    /// Cache type 0: nothing cached.
    None,
    /// Cache type 1: the child is a group; its symbol table addresses.
    Group(SymbolTableMessage),
    /// Cache type 2: the entry is a soft link; offset of its target in the local heap.
    SoftLink { value_offset: u32 },
}

impl ScratchPad {
    pub fn cache_type(&self) -> u32 {
        match self {
            ScratchPad::None => 0,
            ScratchPad::Group(_) => 1,
            ScratchPad::SoftLink { .. } => 2,
        }
    }
}

/// One entry of a SNOD or the superblock's root entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTableEntry {
    /// Byte offset of the link name in the group's local heap.
    pub link_name_offset: u64,
    /// Address of the child's object header (undefined for soft links).
    pub object_header_address: u64,
    pub scratch: ScratchPad,
}

impl SymbolTableEntry {
    /// Encoded size for a given offset width.
    pub fn encoded_size(offset_size: u8) -> usize {
        2 * offset_size as usize + 4 + 4 + 16
    }

    pub fn read(c: &mut Cursor<'_>, offset_size: u8) -> Result<Self> {
        let link_name_offset = c.read_offset(offset_size)?;
        let object_header_address = c.read_offset(offset_size)?;
        let cache_type = c.read_u32()?;
        c.skip(4)?;
        let pad = c.read_bytes(16)?;
        let scratch = match cache_type {
            0 => ScratchPad::None,
            1 => {
                let mut pc = Cursor::new(pad);
                ScratchPad::Group(SymbolTableMessage {
                    btree_address: pc.read_offset(offset_size)?,
                    local_heap_address: pc.read_offset(offset_size)?,
                })
            }
            2 => ScratchPad::SoftLink {
                value_offset: Cursor::new(pad).read_u32()?,
            },
            other => {
                return Err(FormatError::corrupted(
                    "symbol table entry",
                    format!("unknown cache type {other}"),
                ))
            }
        };
        Ok(Self {
            link_name_offset,
            object_header_address,
            scratch,
        })
    }

    pub fn write(&self, w: &mut ByteWriter, offset_size: u8) {
        w.write_offset(self.link_name_offset, offset_size);
        w.write_offset(self.object_header_address, offset_size);
        w.write_u32(self.scratch.cache_type());
        w.write_u32(0);
        let start = w.position();
        match self.scratch {
            ScratchPad::None => {}
            ScratchPad::Group(st) => {
                w.write_offset(st.btree_address, offset_size);
                w.write_offset(st.local_heap_address, offset_size);
            }
            ScratchPad::SoftLink { value_offset } => w.write_u32(value_offset),
        }
        let used = w.position() - start;
        w.write_zeros(16 - used);
    }
}

/// A parsed Symbol Table Node (SNOD).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolTableNode {
    pub entries: Vec<SymbolTableEntry>,
}

impl SymbolTableNode {
    pub fn parse(file_data: &[u8], address: u64, offset_size: u8) -> Result<Self> {
        let mut c = Cursor::at(file_data, address)?;
        c.expect_signature(&SNOD_SIGNATURE, "symbol table node")?;
        let version = c.read_u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                structure: "symbol table node",
                version,
            });
        }
        c.skip(1)?;
        let count = c.read_u16()? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(SymbolTableEntry::read(&mut c, offset_size)?);
        }
        Ok(Self { entries })
    }

    /// Size on disk of a node that holds up to `2 * leaf_k` entries.
    pub fn encoded_size(leaf_k: u16, offset_size: u8) -> usize {
        8 + 2 * leaf_k as usize * SymbolTableEntry::encoded_size(offset_size)
    }

    /// Serialize, zero-filling unused slots up to `2 * leaf_k` entries.
    pub fn serialize(&self, leaf_k: u16, offset_size: u8) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(Self::encoded_size(leaf_k, offset_size));
        w.write_bytes(&SNOD_SIGNATURE);
        w.write_u8(1);
        w.write_u8(0);
        w.write_u16(self.entries.len() as u16);
        for e in &self.entries {
            e.write(&mut w, offset_size);
        }
        let full = Self::encoded_size(leaf_k, offset_size);
        if w.position() < full {
            w.write_zeros(full - w.position());
        }
        w.into_inner()
    }
}
