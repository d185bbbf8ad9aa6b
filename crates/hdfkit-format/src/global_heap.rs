//! HDF5 Global Heap collections ("GCOL"), which hold variable-length data.

use crate::cursor::{ByteWriter, Cursor};
use crate::error::{FormatError, Result};

const GCOL_SIGNATURE: [u8; 4] = *b"GCOL";

/// Collections are never smaller than this on disk.
pub const MIN_COLLECTION_SIZE: usize = 4096;

/// A parsed global heap collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeapCollection {
    pub address: u64,
    /// Total size of the collection in bytes, header included.
    pub collection_size: u64,
    pub objects: Vec<GlobalHeapObject>,
}

/// A single object in a global heap collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeapObject {
    pub index: u16,
    pub reference_count: u16,
    pub data: Vec<u8>,
}

/// Reference to a global heap object as stored inside variable-length
/// elements: sequence length, collection address, object index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalHeapId {
    /// Element count of the sequence (bytes for strings).
    pub length: u32,
    pub collection: u64,
    pub index: u32,
}

impl GlobalHeapId {
    pub fn encoded_size(offset_size: u8) -> usize {
        4 + offset_size as usize + 4
    }

    pub fn parse(data: &[u8], offset_size: u8) -> Result<Self> {
        let mut c = Cursor::new(data);
        Ok(GlobalHeapId {
            length: c.read_u32()?,
            collection: c.read_offset(offset_size)?,
            index: c.read_u32()?,
        })
    }

    pub fn write(&self, w: &mut ByteWriter, offset_size: u8) {
        w.write_u32(self.length);
        w.write_offset(self.collection, offset_size);
        w.write_u32(self.index);
    }

    /// A zero collection address marks an empty (or NULL) sequence.
    pub fn is_null(&self) -> bool {
        self.collection == 0
    }
}

impl GlobalHeapCollection {
    /// Parse the collection at `address`.
    pub fn parse(file_data: &[u8], address: u64, length_size: u8) -> Result<Self> {
        let mut c = Cursor::at(file_data, address)?;
        c.expect_signature(&GCOL_SIGNATURE, "global heap")?;
        let version = c.read_u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                structure: "global heap",
                version,
            });
        }
        c.skip(3)?;
        let collection_size = c.read_length(length_size)?;
        let start = address as usize;
        let end = start
            .checked_add(collection_size as usize)
            .filter(|&e| e <= file_data.len())
            .ok_or_else(|| {
                FormatError::corrupted(
                    "global heap",
                    format!("collection of {collection_size} bytes runs past end of file"),
                )
            })?;

        let mut objects = Vec::new();
        let object_header = 8 + length_size as usize;
        while c.position() + object_header <= end {
            let index = c.read_u16()?;
            if index == 0 {
                break; // free space runs to the end of the collection
            }
            let reference_count = c.read_u16()?;
            c.skip(4)?;
            let size = c.read_length(length_size)? as usize;
            if c.position() + size > end {
                return Err(FormatError::corrupted(
                    "global heap",
                    format!("object {index} overruns its collection"),
                ));
            }
            let data = c.read_bytes(size)?.to_vec();
            c.skip(size.next_multiple_of(8) - size)?;
            objects.push(GlobalHeapObject {
                index,
                reference_count,
                data,
            });
        }

        Ok(GlobalHeapCollection {
            address,
            collection_size,
            objects,
        })
    }

    /// Get an object by its index.
    pub fn get(&self, index: u16) -> Result<&GlobalHeapObject> {
        self.objects
            .iter()
            .find(|o| o.index == index)
            .ok_or(FormatError::HeapObjectNotFound {
                collection: self.address,
                index,
            })
    }
}

/// Accumulates objects for one collection.
#[derive(Debug, Clone, Default)]
pub struct GlobalHeapWriter {
    objects: Vec<Vec<u8>>,
}

impl GlobalHeapWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object and return its 1-based index.
    pub fn add(&mut self, data: &[u8]) -> Result<u32> {
        if self.objects.len() >= u16::MAX as usize - 1 {
            return Err(FormatError::InvalidInput(
                "too many objects for one global heap collection".into(),
            ));
        }
        self.objects.push(data.to_vec());
        Ok(self.objects.len() as u32)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn used_size(&self, length_size: u8) -> usize {
        let header = 8 + length_size as usize;
        header
            + self
                .objects
                .iter()
                .map(|o| header + o.len().next_multiple_of(8))
                .sum::<usize>()
    }

    /// Encoded size including the trailing free-space object.
    pub fn encoded_size(&self, length_size: u8) -> usize {
        let header = 8 + length_size as usize;
        (self.used_size(length_size) + header)
            .next_multiple_of(8)
            .max(MIN_COLLECTION_SIZE)
    }

    pub fn serialize(&self, length_size: u8) -> Vec<u8> {
        let ls = length_size as usize;
        let total = self.encoded_size(length_size);
        let mut w = ByteWriter::with_capacity(total);
        w.write_bytes(&GCOL_SIGNATURE);
        w.write_u8(1);
        w.write_zeros(3);
        w.write_uint(total as u64, ls);
        for (i, obj) in self.objects.iter().enumerate() {
            w.write_u16(i as u16 + 1);
            w.write_u16(1);
            w.write_zeros(4);
            w.write_uint(obj.len() as u64, ls);
            w.write_bytes(obj);
            w.write_zeros(obj.len().next_multiple_of(8) - obj.len());
        }
        let free = total - w.position();
        w.write_u16(0);
        w.write_u16(0);
        w.write_zeros(4);
        w.write_uint(free as u64, ls);
        w.write_zeros(total - w.position());
        w.into_inner()
    }
}
