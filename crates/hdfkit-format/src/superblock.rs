//! HDF5 superblock parsing for versions 0, 1, 2 and 3, and a v0 encoder.
//!
//! The input slice must start at the signature: callers strip the user block
//! (the base offset found by [`crate::signature::find_signature`]) first, so
//! every address in the returned structure is already relative to it.

use crate::checksum;
use crate::cursor::{ByteWriter, Cursor};
use crate::error::{FormatError, Result};
use crate::signature::HDF5_SIGNATURE;
use crate::symbol_table::{ScratchPad, SymbolTableEntry, SymbolTableMessage};

/// Consistency flag set while a writer has the file open in SWMR mode.
const SWMR_WRITE_FLAG: u32 = 0x04;

/// Parsed HDF5 superblock (all versions).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Superblock version (0–3).
    pub version: u8,
    /// Size of offsets in bytes (2, 4, or 8).
    pub offset_size: u8,
    /// Size of lengths in bytes (2, 4, or 8).
    pub length_size: u8,
    /// Group leaf node K (v0/v1; 4 otherwise).
    pub group_leaf_node_k: u16,
    /// Group internal node K (v0/v1; 16 otherwise).
    pub group_internal_node_k: u16,
    /// Indexed storage internal node K (v1 only; 32 otherwise).
    pub indexed_storage_k: u16,
    /// File consistency flags.
    pub consistency_flags: u32,
    /// Base address as stored in the file.
    pub base_address: u64,
    /// Free-space info address (v0/v1).
    pub free_space_address: Option<u64>,
    /// End-of-file address.
    pub eof_address: u64,
    /// Driver info block address (v0/v1).
    pub driver_info_address: Option<u64>,
    /// Superblock extension address (v2/v3).
    pub extension_address: Option<u64>,
    /// Address of the root group's object header.
    pub root_object_address: u64,
    /// Root group symbol table cached in the root entry (v0/v1).
    pub root_symbol_table: Option<SymbolTableMessage>,
}

impl Superblock {
    /// Parse a superblock from a slice that begins with the signature.
    pub fn parse(data: &[u8]) -> Result<Superblock> {
        let mut c = Cursor::new(data);
        let sig = c.read_bytes(8)?;
        if sig != HDF5_SIGNATURE {
            return Err(FormatError::SignatureNotFound);
        }
        let version = c.read_u8()?;
        match version {
            0 | 1 => Self::parse_v0_v1(&mut c, version),
            2 | 3 => Self::parse_v2_v3(&mut c, data, version),
            v => Err(FormatError::UnsupportedVersion {
                structure: "superblock",
                version: v,
            }),
        }
    }

    fn parse_v0_v1(c: &mut Cursor<'_>, version: u8) -> Result<Superblock> {
        let free_space_version = c.read_u8()?;
        let root_group_version = c.read_u8()?;
        c.skip(1)?;
        let shared_header_version = c.read_u8()?;
        for (structure, v) in [
            ("free-space storage", free_space_version),
            ("root group symbol table entry", root_group_version),
            ("shared header message format", shared_header_version),
        ] {
            if v != 0 {
                return Err(FormatError::UnsupportedVersion {
                    structure,
                    version: v,
                });
            }
        }
        let offset_size = c.read_u8()?;
        let length_size = c.read_u8()?;
        validate_sizes(offset_size, length_size)?;
        c.skip(1)?;
        let group_leaf_node_k = c.read_u16()?;
        let group_internal_node_k = c.read_u16()?;
        let consistency_flags = c.read_u32()?;
        let indexed_storage_k = if version == 1 {
            let k = c.read_u16()?;
            c.skip(2)?;
            k
        } else {
            32
        };
        if group_leaf_node_k == 0 || group_internal_node_k == 0 {
            return Err(FormatError::corrupted("superblock", "B-tree K of zero"));
        }

        let base_address = c.read_offset(offset_size)?;
        let free_space_address = c.read_address(offset_size)?;
        let eof_address = c.read_offset(offset_size)?;
        let driver_info_address = c.read_address(offset_size)?;
        let root = SymbolTableEntry::read(c, offset_size)?;

        let root_symbol_table = match root.scratch {
            ScratchPad::Group(st) => Some(st),
            _ => None,
        };

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            group_leaf_node_k,
            group_internal_node_k,
            indexed_storage_k,
            consistency_flags,
            base_address,
            free_space_address,
            eof_address,
            driver_info_address,
            extension_address: None,
            root_object_address: root.object_header_address,
            root_symbol_table,
        })
    }

    fn parse_v2_v3(c: &mut Cursor<'_>, data: &[u8], version: u8) -> Result<Superblock> {
        let offset_size = c.read_u8()?;
        let length_size = c.read_u8()?;
        validate_sizes(offset_size, length_size)?;
        let consistency_flags = c.read_u8()? as u32;
        if version == 3 && consistency_flags & SWMR_WRITE_FLAG != 0 {
            return Err(FormatError::UnsupportedFeature(
                "single-writer/multiple-reader (SWMR) access".into(),
            ));
        }
        let base_address = c.read_offset(offset_size)?;
        let extension_address = c.read_address(offset_size)?;
        let eof_address = c.read_offset(offset_size)?;
        let root_object_address = c.read_offset(offset_size)?;
        let end = c.position();
        c.ensure(4)?;
        checksum::verify(data, 0, end, "superblock")?;

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            group_leaf_node_k: 4,
            group_internal_node_k: 16,
            indexed_storage_k: 32,
            consistency_flags,
            base_address,
            free_space_address: None,
            eof_address,
            driver_info_address: None,
            extension_address,
            root_object_address,
            root_symbol_table: None,
        })
    }

    /// Build a version-0 superblock describing a symbol-table root group.
    pub fn new_v0(
        offset_size: u8,
        length_size: u8,
        root_object_address: u64,
        root_symbol_table: SymbolTableMessage,
        eof_address: u64,
    ) -> Self {
        Superblock {
            version: 0,
            offset_size,
            length_size,
            group_leaf_node_k: 4,
            group_internal_node_k: 16,
            indexed_storage_k: 32,
            consistency_flags: 0,
            base_address: 0,
            free_space_address: None,
            eof_address,
            driver_info_address: None,
            extension_address: None,
            root_object_address,
            root_symbol_table: Some(root_symbol_table),
        }
    }

    /// Encoded size of a version-0 superblock.
    pub fn v0_size(offset_size: u8) -> usize {
        24 + 4 * offset_size as usize + SymbolTableEntry::encoded_size(offset_size)
    }

    /// Serialize as a version-0 superblock.
    pub fn serialize_v0(&self) -> Result<Vec<u8>> {
        validate_sizes(self.offset_size, self.length_size)?;
        let os = self.offset_size;
        let mut w = ByteWriter::with_capacity(Self::v0_size(os));
        w.write_bytes(&HDF5_SIGNATURE);
        w.write_u8(0); // superblock version
        w.write_u8(0); // free-space version
        w.write_u8(0); // root group symbol table entry version
        w.write_u8(0);
        w.write_u8(0); // shared header message version
        w.write_u8(os);
        w.write_u8(self.length_size);
        w.write_u8(0);
        w.write_u16(self.group_leaf_node_k);
        w.write_u16(self.group_internal_node_k);
        w.write_u32(self.consistency_flags);
        w.write_offset(self.base_address, os);
        write_optional(&mut w, self.free_space_address, os);
        w.write_offset(self.eof_address, os);
        write_optional(&mut w, self.driver_info_address, os);
        let root = SymbolTableEntry {
            link_name_offset: 0,
            object_header_address: self.root_object_address,
            scratch: self
                .root_symbol_table
                .map(ScratchPad::Group)
                .unwrap_or(ScratchPad::None),
        };
        root.write(&mut w, os);
        Ok(w.into_inner())
    }
}

fn write_optional(w: &mut ByteWriter, addr: Option<u64>, size: u8) {
    match addr {
        Some(a) => w.write_offset(a, size),
        None => w.write_undefined(size),
    }
}

fn validate_sizes(offset_size: u8, length_size: u8) -> Result<()> {
    if !matches!(offset_size, 2 | 4 | 8) {
        return Err(FormatError::InvalidOffsetSize(offset_size));
    }
    if !matches!(length_size, 2 | 4 | 8) {
        return Err(FormatError::InvalidLengthSize(length_size));
    }
    Ok(())
}
