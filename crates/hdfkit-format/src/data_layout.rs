//! HDF5 Data Layout message parsing (message type 0x0008).
//!
//! Versions 1 and 2 share one encoding for all classes; version 3 splits by
//! class; version 4 adds chunk index selection.  Chunked layouts store an
//! extra trailing "dimension" holding the element size, which is split off
//! into [`DataLayout::Chunked::element_size`] here.

use crate::cursor::{ByteWriter, Cursor};
use crate::dataspace::MAX_RANK;
use crate::error::{FormatError, Result};

/// How chunk addresses are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkIndex {
    /// Version 1 B-tree (node type 1), `None` when no chunk was written.
    BTreeV1 { address: Option<u64> },
    /// The whole dataset is one chunk.
    SingleChunk {
        address: Option<u64>,
        /// (stored size, filter mask) when the chunk is filtered.
        filtered: Option<(u64, u32)>,
    },
    /// Unfiltered chunks stored back to back in row-major chunk order.
    Implicit { address: Option<u64> },
}

impl ChunkIndex {
    pub fn address(&self) -> Option<u64> {
        match *self {
            ChunkIndex::BTreeV1 { address }
            | ChunkIndex::SingleChunk { address, .. }
            | ChunkIndex::Implicit { address } => address,
        }
    }
}

/// Parsed HDF5 data layout message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayout {
    /// Compact: data stored inline in the message.
    Compact { data: Vec<u8> },
    /// Contiguous: data stored at a single address in the file.
    Contiguous {
        /// File address of the data, or `None` if never allocated.
        address: Option<u64>,
        /// Size in bytes. Versions 1 and 2 do not record it.
        size: Option<u64>,
    },
    /// Chunked: data split into equally shaped chunks.
    Chunked {
        version: u8,
        /// Chunk shape in elements, one entry per dataset dimension.
        chunk_dimensions: Vec<u64>,
        /// Element size in bytes, stored as the last chunk dimension.
        element_size: u32,
        index: ChunkIndex,
    },
}

impl DataLayout {
    /// Parse a data layout message from raw message bytes.
    ///
    /// `offset_size` and `length_size` come from the superblock.
    pub fn parse(data: &[u8], offset_size: u8, length_size: u8) -> Result<DataLayout> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        match version {
            1 | 2 => Self::parse_v1_v2(&mut c, version, offset_size),
            3 | 4 => Self::parse_v3_v4(&mut c, version, offset_size, length_size),
            v => Err(FormatError::UnsupportedVersion {
                structure: "data layout",
                version: v,
            }),
        }
    }

    fn parse_v1_v2(c: &mut Cursor<'_>, version: u8, offset_size: u8) -> Result<DataLayout> {
        let ndims = c.read_u8()?;
        let class = c.read_u8()?;
        c.skip(5)?;
        check_rank(ndims)?;
        let address = if class != 0 {
            c.read_address(offset_size)?
        } else {
            None
        };
        let mut dims = Vec::with_capacity(ndims as usize);
        for _ in 0..ndims {
            dims.push(c.read_u32()? as u64);
        }
        match class {
            0 => {
                let size = c.read_u32()? as usize;
                Ok(DataLayout::Compact {
                    data: c.read_bytes(size)?.to_vec(),
                })
            }
            1 => Ok(DataLayout::Contiguous {
                address,
                size: None,
            }),
            2 => {
                let element_size = c.read_u32()?;
                // the last stored dimension is the element size again
                dims.pop();
                Ok(DataLayout::Chunked {
                    version,
                    chunk_dimensions: dims,
                    element_size,
                    index: ChunkIndex::BTreeV1 { address },
                })
            }
            other => Err(bad_class(other)),
        }
    }

    fn parse_v3_v4(
        c: &mut Cursor<'_>,
        version: u8,
        offset_size: u8,
        length_size: u8,
    ) -> Result<DataLayout> {
        let class = c.read_u8()?;
        match class {
            0 => {
                let size = c.read_u16()? as usize;
                Ok(DataLayout::Compact {
                    data: c.read_bytes(size)?.to_vec(),
                })
            }
            1 => Ok(DataLayout::Contiguous {
                address: c.read_address(offset_size)?,
                size: Some(c.read_length(length_size)?),
            }),
            2 if version == 3 => {
                let ndims = c.read_u8()?;
                check_rank(ndims.saturating_sub(1))?;
                let address = c.read_address(offset_size)?;
                let mut dims = Vec::with_capacity(ndims as usize);
                for _ in 0..ndims {
                    dims.push(c.read_u32()? as u64);
                }
                let element_size = dims.pop().unwrap_or(0) as u32;
                Ok(DataLayout::Chunked {
                    version,
                    chunk_dimensions: dims,
                    element_size,
                    index: ChunkIndex::BTreeV1 { address },
                })
            }
            2 => {
                let flags = c.read_u8()?;
                let ndims = c.read_u8()?;
                check_rank(ndims.saturating_sub(1))?;
                let width = c.read_u8()? as usize;
                if !(1..=8).contains(&width) {
                    return Err(FormatError::corrupted(
                        "data layout",
                        format!("chunk dimension width {width}"),
                    ));
                }
                let mut dims = Vec::with_capacity(ndims as usize);
                for _ in 0..ndims {
                    dims.push(c.read_uint(width)?);
                }
                let element_size = dims.pop().unwrap_or(0) as u32;
                let index = match c.read_u8()? {
                    1 => {
                        let filtered = if flags & 0x02 != 0 {
                            let size = c.read_length(length_size)?;
                            let mask = c.read_u32()?;
                            Some((size, mask))
                        } else {
                            None
                        };
                        ChunkIndex::SingleChunk {
                            address: c.read_address(offset_size)?,
                            filtered,
                        }
                    }
                    2 => ChunkIndex::Implicit {
                        address: c.read_address(offset_size)?,
                    },
                    3 => return Err(unsupported_index("fixed array")),
                    4 => return Err(unsupported_index("extensible array")),
                    5 => return Err(unsupported_index("version 2 B-tree")),
                    t => {
                        return Err(FormatError::corrupted(
                            "data layout",
                            format!("chunk index type {t}"),
                        ))
                    }
                };
                Ok(DataLayout::Chunked {
                    version,
                    chunk_dimensions: dims,
                    element_size,
                    index,
                })
            }
            3 if version == 4 => Err(FormatError::UnsupportedFeature(
                "virtual dataset layout".into(),
            )),
            other => Err(bad_class(other)),
        }
    }

    /// Serialize as a version-3 message.
    ///
    /// Only B-tree v1 chunk indexes have a version-3 encoding.
    pub fn serialize(&self, offset_size: u8, length_size: u8) -> Result<Vec<u8>> {
        let mut w = ByteWriter::new();
        w.write_u8(3);
        match self {
            DataLayout::Compact { data } => {
                let size = u16::try_from(data.len()).map_err(|_| {
                    FormatError::InvalidInput(format!(
                        "compact data of {} bytes exceeds 65535",
                        data.len()
                    ))
                })?;
                w.write_u8(0);
                w.write_u16(size);
                w.write_bytes(data);
            }
            DataLayout::Contiguous { address, size } => {
                w.write_u8(1);
                match address {
                    Some(a) => w.write_offset(*a, offset_size),
                    None => w.write_undefined(offset_size),
                }
                w.write_uint(size.unwrap_or(0), length_size as usize);
            }
            DataLayout::Chunked {
                chunk_dimensions,
                element_size,
                index: ChunkIndex::BTreeV1 { address },
                ..
            } => {
                w.write_u8(2);
                w.write_u8(chunk_dimensions.len() as u8 + 1);
                match address {
                    Some(a) => w.write_offset(*a, offset_size),
                    None => w.write_undefined(offset_size),
                }
                for &d in chunk_dimensions {
                    let d = u32::try_from(d).map_err(|_| {
                        FormatError::InvalidInput(format!("chunk dimension {d} exceeds u32"))
                    })?;
                    w.write_u32(d);
                }
                w.write_u32(*element_size);
            }
            DataLayout::Chunked { .. } => {
                return Err(FormatError::InvalidInput(
                    "only B-tree v1 chunk indexes can be written".into(),
                ))
            }
        }
        Ok(w.into_inner())
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            DataLayout::Compact { .. } => "compact",
            DataLayout::Contiguous { .. } => "contiguous",
            DataLayout::Chunked { .. } => "chunked",
        }
    }
}

fn check_rank(rank: u8) -> Result<()> {
    if rank > MAX_RANK {
        return Err(FormatError::corrupted(
            "data layout",
            format!("dimensionality {rank} exceeds {MAX_RANK}"),
        ));
    }
    Ok(())
}

fn bad_class(class: u8) -> FormatError {
    FormatError::corrupted("data layout", format!("layout class {class}"))
}

fn unsupported_index(kind: &str) -> FormatError {
    FormatError::UnsupportedFeature(format!("{kind} chunk index"))
}
