//! HDF5 Local Heap: the name store of symbol-table groups.

use crate::cursor::{ByteWriter, Cursor};
use crate::error::{FormatError, Result};

/// Offset written as "end of free list" by the HDF5 library.
const FREE_LIST_END: u64 = 1;

/// Parsed HDF5 Local Heap header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalHeap {
    /// Size of the data segment in bytes.
    pub data_segment_size: u64,
    /// Offset of the free list head within the data segment, if any.
    pub free_list_head_offset: Option<u64>,
    /// File address of the data segment.
    pub data_segment_address: u64,
}

impl LocalHeap {
    /// Parse a local heap header at the given address.
    pub fn parse(
        file_data: &[u8],
        address: u64,
        offset_size: u8,
        length_size: u8,
    ) -> Result<LocalHeap> {
        let mut c = Cursor::at(file_data, address)?;
        c.expect_signature(b"HEAP", "local heap")?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "local heap",
                version,
            });
        }
        c.skip(3)?;
        let data_segment_size = c.read_length(length_size)?;
        let free = c.read_length(length_size)?;
        let data_segment_address = c.read_offset(offset_size)?;
        let free_list_head_offset =
            (free != FREE_LIST_END && free < data_segment_size).then_some(free);
        Ok(LocalHeap {
            data_segment_size,
            free_list_head_offset,
            data_segment_address,
        })
    }

    /// The data segment bytes.
    pub fn segment<'a>(&self, file_data: &'a [u8]) -> Result<&'a [u8]> {
        let mut c = Cursor::at(file_data, self.data_segment_address)?;
        let len = usize::try_from(self.data_segment_size)
            .map_err(|_| FormatError::corrupted("local heap", "data segment too large"))?;
        c.read_bytes(len)
    }

    /// Read a NUL-terminated string at `offset` within the data segment.
    pub fn read_string(&self, file_data: &[u8], offset: u64) -> Result<String> {
        let segment = self.segment(file_data)?;
        let rest = usize::try_from(offset)
            .ok()
            .and_then(|o| segment.get(o..))
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                FormatError::corrupted(
                    "local heap",
                    format!("offset {offset} outside {} byte segment", segment.len()),
                )
            })?;
        let end = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            FormatError::corrupted("local heap", format!("unterminated string at {offset}"))
        })?;
        Ok(String::from_utf8_lossy(&rest[..end]).into_owned())
    }
}

/// Builds a local heap whose data segment follows the header directly.
#[derive(Debug, Clone)]
pub struct LocalHeapWriter {
    segment: Vec<u8>,
}

impl Default for LocalHeapWriter {
    fn default() -> Self {
        // offset 0 holds the empty string, used by the root entry
        LocalHeapWriter {
            segment: vec![0; 8],
        }
    }
}

impl LocalHeapWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a string, returning its offset in the data segment.
    pub fn add_string(&mut self, s: &str) -> u64 {
        let offset = self.segment.len() as u64;
        self.segment.extend_from_slice(s.as_bytes());
        self.segment.push(0);
        let padded = self.segment.len().next_multiple_of(8);
        self.segment.resize(padded, 0);
        offset
    }

    fn free_block_size(length_size: u8) -> usize {
        (2 * length_size as usize).max(16)
    }

    /// Total encoded size: header plus data segment with a trailing free block.
    pub fn encoded_size(&self, offset_size: u8, length_size: u8) -> usize {
        Self::header_size(offset_size, length_size)
            + self.segment.len()
            + Self::free_block_size(length_size)
    }

    fn header_size(offset_size: u8, length_size: u8) -> usize {
        8 + 2 * length_size as usize + offset_size as usize
    }

    /// Serialize header and data segment for placement at `address`.
    pub fn serialize(&self, address: u64, offset_size: u8, length_size: u8) -> Vec<u8> {
        let ls = length_size as usize;
        let free_size = Self::free_block_size(length_size);
        let segment_size = self.segment.len() + free_size;
        let mut w = ByteWriter::with_capacity(self.encoded_size(offset_size, length_size));
        w.write_bytes(b"HEAP");
        w.write_u8(0);
        w.write_zeros(3);
        w.write_uint(segment_size as u64, ls);
        w.write_uint(self.segment.len() as u64, ls);
        w.write_offset(
            address + Self::header_size(offset_size, length_size) as u64,
            offset_size,
        );
        w.write_bytes(&self.segment);
        // free block: next free offset, then this block's size
        w.write_uint(FREE_LIST_END, ls);
        w.write_uint(free_size as u64, ls);
        w.write_zeros(free_size - 2 * ls);
        w.into_inner()
    }
}
