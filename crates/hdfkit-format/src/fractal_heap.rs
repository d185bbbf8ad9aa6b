//! HDF5 Fractal Heap: the object store behind dense link and attribute storage.
//!
//! The heap's address space is covered by a "doubling table": the root is
//! either a single direct block or an indirect block whose rows point at
//! direct blocks (early rows) and at nested indirect blocks (later rows).
//! Objects are named by heap IDs that encode either a heap offset and length
//! (managed objects) or the object bytes themselves (tiny objects).

use crate::checksum;
use crate::cursor::Cursor;
use crate::error::{FormatError, Result};

const FRHP_SIGNATURE: [u8; 4] = *b"FRHP";
const FHIB_SIGNATURE: [u8; 4] = *b"FHIB";
const FHDB_SIGNATURE: [u8; 4] = *b"FHDB";

/// Heap ID type bits (4-5 of the first byte).
const ID_MANAGED: u8 = 0;
const ID_HUGE: u8 = 1;
const ID_TINY: u8 = 2;

/// Nested indirect blocks deeper than this indicate a corrupt table.
const MAX_DEPTH: usize = 16;

/// Parsed fractal heap header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FractalHeap {
    pub address: u64,
    pub heap_id_length: u16,
    pub io_filter_encoded_length: u16,
    pub flags: u8,
    pub max_managed_object_size: u32,
    pub managed_objects_count: u64,
    pub huge_objects_count: u64,
    pub tiny_objects_count: u64,
    pub table_width: u16,
    pub starting_block_size: u64,
    pub max_direct_block_size: u64,
    /// Width in bits of heap offsets.
    pub max_heap_size: u16,
    pub root_block_address: Option<u64>,
    /// Rows in the root indirect block; 0 means the root is a direct block.
    pub current_rows_in_root_indirect_block: u16,
    offset_size: u8,
}

impl FractalHeap {
    /// Parse a fractal heap header at the given address.
    pub fn parse(file_data: &[u8], address: u64, offset_size: u8, length_size: u8) -> Result<Self> {
        let mut c = Cursor::at(file_data, address)?;
        c.expect_signature(&FRHP_SIGNATURE, "fractal heap")?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "fractal heap",
                version,
            });
        }
        let heap_id_length = c.read_u16()?;
        let io_filter_encoded_length = c.read_u16()?;
        let flags = c.read_u8()?;
        let max_managed_object_size = c.read_u32()?;
        c.read_length(length_size)?; // next huge object id
        c.read_offset(offset_size)?; // huge object B-tree
        c.read_length(length_size)?; // free space in managed blocks
        c.read_offset(offset_size)?; // free-space manager
        c.read_length(length_size)?; // managed space
        c.read_length(length_size)?; // allocated managed space
        c.read_length(length_size)?; // direct block allocation iterator
        let managed_objects_count = c.read_length(length_size)?;
        c.read_length(length_size)?; // huge object size
        let huge_objects_count = c.read_length(length_size)?;
        c.read_length(length_size)?; // tiny object size
        let tiny_objects_count = c.read_length(length_size)?;
        let table_width = c.read_u16()?;
        let starting_block_size = c.read_length(length_size)?;
        let max_direct_block_size = c.read_length(length_size)?;
        let max_heap_size = c.read_u16()?;
        c.read_u16()?; // starting rows in root indirect block
        let root_block_address = c.read_address(offset_size)?;
        let current_rows_in_root_indirect_block = c.read_u16()?;
        if io_filter_encoded_length > 0 {
            c.read_length(length_size)?;
            c.read_u32()?;
            c.skip(io_filter_encoded_length as usize)?;
        }
        let end = c.position();
        c.ensure(4)?;
        checksum::verify(file_data, address as usize, end, "fractal heap")?;

        if !table_width.is_power_of_two()
            || !starting_block_size.is_power_of_two()
            || !max_direct_block_size.is_power_of_two()
            || max_direct_block_size < starting_block_size
            || max_heap_size == 0
            || max_heap_size > 64
        {
            return Err(FormatError::corrupted(
                "fractal heap",
                "invalid doubling table parameters",
            ));
        }

        Ok(FractalHeap {
            address,
            heap_id_length,
            io_filter_encoded_length,
            flags,
            max_managed_object_size,
            managed_objects_count,
            huge_objects_count,
            tiny_objects_count,
            table_width,
            starting_block_size,
            max_direct_block_size,
            max_heap_size,
            root_block_address,
            current_rows_in_root_indirect_block,
            offset_size,
        })
    }

    /// Bytes used to store a heap offset.
    fn offset_bytes(&self) -> usize {
        (self.max_heap_size as usize).div_ceil(8)
    }

    /// Bytes used to store a managed object length in a heap ID.
    fn length_bytes(&self) -> usize {
        let dblock = (log2(self.max_direct_block_size) as usize).div_ceil(8);
        let managed = log2(self.max_managed_object_size as u64) as usize / 8 + 1;
        dblock.min(managed)
    }

    /// Rows of an indirect block that point at direct blocks.
    fn max_direct_rows(&self) -> usize {
        (log2(self.max_direct_block_size) - log2(self.starting_block_size)) as usize + 2
    }

    /// Heap space spanned by one entry of `row`.
    fn row_block_size(&self, row: usize) -> u64 {
        if row == 0 {
            self.starting_block_size
        } else {
            self.starting_block_size << (row - 1).min(63)
        }
    }

    /// Resolve a heap ID to the object's bytes.
    pub fn read_object(&self, file_data: &[u8], heap_id: &[u8]) -> Result<Vec<u8>> {
        let first = *heap_id
            .first()
            .ok_or_else(|| FormatError::corrupted("fractal heap", "empty heap ID"))?;
        if first >> 6 != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "fractal heap ID",
                version: first >> 6,
            });
        }
        match (first >> 4) & 0x03 {
            ID_MANAGED => {
                let mut c = Cursor::new(&heap_id[1..]);
                let offset = c.read_uint(self.offset_bytes())?;
                let length = c.read_uint(self.length_bytes())?;
                self.read_managed(file_data, offset, length)
            }
            ID_TINY => self.read_tiny(heap_id),
            ID_HUGE => Err(FormatError::UnsupportedFeature(
                "huge objects in fractal heaps".into(),
            )),
            t => Err(FormatError::corrupted(
                "fractal heap",
                format!("heap ID type {t}"),
            )),
        }
    }

    fn read_tiny(&self, heap_id: &[u8]) -> Result<Vec<u8>> {
        // IDs longer than 18 bytes use a 12-bit length spanning two bytes
        let (len, start) = if self.heap_id_length <= 18 {
            ((heap_id[0] & 0x0F) as usize + 1, 1)
        } else {
            let hi = (heap_id[0] & 0x0F) as usize;
            let lo = *heap_id
                .get(1)
                .ok_or_else(|| FormatError::corrupted("fractal heap", "short tiny heap ID"))?
                as usize;
            (((hi << 8) | lo) + 1, 2)
        };
        heap_id
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| FormatError::corrupted("fractal heap", "tiny object overruns its ID"))
    }

    fn read_managed(&self, file_data: &[u8], offset: u64, length: u64) -> Result<Vec<u8>> {
        if self.io_filter_encoded_length > 0 {
            return Err(FormatError::UnsupportedFeature(
                "filtered fractal heap blocks".into(),
            ));
        }
        let root = self
            .root_block_address
            .ok_or(FormatError::UndefinedAddress("fractal heap root block"))?;
        let (block_address, block_offset) = if self.current_rows_in_root_indirect_block == 0 {
            (root, 0)
        } else {
            self.locate(
                file_data,
                root,
                self.current_rows_in_root_indirect_block as usize,
                0,
                offset,
                0,
            )?
        };
        let mut c = Cursor::at(file_data, block_address)?;
        c.expect_signature(&FHDB_SIGNATURE, "fractal heap direct block")?;
        let local = offset - block_offset;
        c.seek(block_address + local)?;
        let len = usize::try_from(length)
            .map_err(|_| FormatError::corrupted("fractal heap", "object length overflow"))?;
        Ok(c.read_bytes(len)?.to_vec())
    }

    /// Walk indirect blocks to the direct block containing `target`.
    /// Returns the block's address and its starting heap offset.
    fn locate(
        &self,
        file_data: &[u8],
        iblock_address: u64,
        nrows: usize,
        iblock_offset: u64,
        target: u64,
        depth: usize,
    ) -> Result<(u64, u64)> {
        if depth > MAX_DEPTH {
            return Err(FormatError::corrupted(
                "fractal heap",
                "indirect blocks nested too deeply",
            ));
        }
        let mut c = Cursor::at(file_data, iblock_address)?;
        c.expect_signature(&FHIB_SIGNATURE, "fractal heap indirect block")?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "fractal heap indirect block",
                version,
            });
        }
        c.read_offset(self.offset_size)?; // heap header address
        c.read_uint(self.offset_bytes())?; // block offset

        let width = self.table_width as usize;
        let direct_rows = nrows.min(self.max_direct_rows());
        let entries = nrows * width;
        let mut children = Vec::with_capacity(entries);
        for _ in 0..entries {
            children.push(c.read_address(self.offset_size)?);
        }
        let end = c.position();
        c.ensure(4)?;
        checksum::verify(file_data, iblock_address as usize, end, "fractal heap indirect block")?;

        let width_bits = log2(self.table_width as u64) as usize;
        let mut heap_offset = iblock_offset;
        for row in 0..nrows {
            let span = self.row_block_size(row);
            for col in 0..width {
                if target >= heap_offset && target - heap_offset < span {
                    let child = children[row * width + col].ok_or_else(|| {
                        FormatError::corrupted(
                            "fractal heap",
                            format!("heap offset {target} lies in an unallocated block"),
                        )
                    })?;
                    if row < direct_rows {
                        return Ok((child, heap_offset));
                    }
                    let child_rows = row.checked_sub(width_bits).ok_or_else(|| {
                        FormatError::corrupted("fractal heap", "indirect row narrower than table")
                    })?;
                    return self.locate(file_data, child, child_rows, heap_offset, target, depth + 1);
                }
                heap_offset += span;
            }
        }
        Err(FormatError::corrupted(
            "fractal heap",
            format!("heap offset {target} outside indirect block"),
        ))
    }
}

fn log2(v: u64) -> u32 {
    63 - v.max(1).leading_zeros()
}
