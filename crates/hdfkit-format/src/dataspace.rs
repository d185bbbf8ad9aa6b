//! HDF5 Dataspace message parsing (message type 0x0001).

use crate::cursor::{ByteWriter, Cursor};
use crate::error::{FormatError, Result};
use crate::selection::element_count;

/// HDF5 allows at most 32 dimensions.
pub const MAX_RANK: u8 = 32;

/// Type of dataspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataspaceType {
    /// Scalar (single element).
    Scalar,
    /// Simple (N-dimensional array).
    Simple,
    /// Null (no data).
    Null,
}

/// Parsed HDF5 dataspace message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    /// The type of this dataspace.
    pub space_type: DataspaceType,
    /// Current dimension sizes (empty for scalar and null).
    pub dimensions: Vec<u64>,
    /// Maximum dimension sizes, if present. `None` entries are unlimited.
    pub max_dimensions: Option<Vec<Option<u64>>>,
}

impl Dataspace {
    pub fn scalar() -> Self {
        Dataspace {
            space_type: DataspaceType::Scalar,
            dimensions: Vec::new(),
            max_dimensions: None,
        }
    }

    pub fn simple(dimensions: &[u64]) -> Self {
        Dataspace {
            space_type: DataspaceType::Simple,
            dimensions: dimensions.to_vec(),
            max_dimensions: None,
        }
    }

    /// Parse a dataspace message from raw message bytes.
    ///
    /// `length_size` is the superblock's length width used for every dimension.
    pub fn parse(data: &[u8], length_size: u8) -> Result<Dataspace> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        let rank = c.read_u8()?;
        let flags = c.read_u8()?;
        if rank > MAX_RANK {
            return Err(FormatError::corrupted(
                "dataspace",
                format!("rank {rank} exceeds {MAX_RANK}"),
            ));
        }

        let space_type = match version {
            1 => {
                c.skip(5)?;
                if rank == 0 {
                    DataspaceType::Scalar
                } else {
                    DataspaceType::Simple
                }
            }
            2 => match c.read_u8()? {
                0 => DataspaceType::Scalar,
                1 => DataspaceType::Simple,
                2 => DataspaceType::Null,
                t => {
                    return Err(FormatError::corrupted(
                        "dataspace",
                        format!("dataspace type {t}"),
                    ))
                }
            },
            v => {
                return Err(FormatError::UnsupportedVersion {
                    structure: "dataspace",
                    version: v,
                })
            }
        };

        let mut dimensions = Vec::with_capacity(rank as usize);
        for _ in 0..rank {
            dimensions.push(c.read_length(length_size)?);
        }

        let max_dimensions = if flags & 0x01 != 0 {
            let mut max_dims = Vec::with_capacity(rank as usize);
            for _ in 0..rank {
                max_dims.push(c.read_address(length_size)?);
            }
            Some(max_dims)
        } else {
            None
        };
        // v1 permutation indices (flag bit 1) are never written; ignore them.

        if element_count(&dimensions).is_none() {
            return Err(FormatError::corrupted(
                "dataspace",
                format!("extent {dimensions:?} overflows the element count"),
            ));
        }
        if space_type != DataspaceType::Simple && !dimensions.is_empty() {
            return Err(FormatError::corrupted(
                "dataspace",
                "non-simple dataspace with dimensions",
            ));
        }

        Ok(Dataspace {
            space_type,
            dimensions,
            max_dimensions,
        })
    }

    /// Serialize as a version-1 message, the form paired with v1 object headers.
    pub fn serialize(&self, length_size: u8) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u8(1);
        w.write_u8(self.rank());
        w.write_u8(if self.max_dimensions.is_some() { 0x01 } else { 0 });
        w.write_zeros(5);
        self.write_dims(&mut w, length_size);
        w.into_inner()
    }

    /// Serialize as a version-2 message (supports null dataspaces).
    pub fn serialize_v2(&self, length_size: u8) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u8(2);
        w.write_u8(self.rank());
        w.write_u8(if self.max_dimensions.is_some() { 0x01 } else { 0 });
        w.write_u8(match self.space_type {
            DataspaceType::Scalar => 0,
            DataspaceType::Simple => 1,
            DataspaceType::Null => 2,
        });
        self.write_dims(&mut w, length_size);
        w.into_inner()
    }

    fn write_dims(&self, w: &mut ByteWriter, length_size: u8) {
        for &dim in &self.dimensions {
            w.write_uint(dim, length_size as usize);
        }
        if let Some(max_dims) = &self.max_dimensions {
            for md in max_dims {
                match md {
                    Some(v) => w.write_uint(*v, length_size as usize),
                    None => w.write_undefined(length_size),
                }
            }
        }
    }

    pub fn rank(&self) -> u8 {
        self.dimensions.len() as u8
    }

    /// Total number of elements. Scalar = 1, Null = 0.
    pub fn num_elements(&self) -> u64 {
        match self.space_type {
            DataspaceType::Null => 0,
            DataspaceType::Scalar => 1,
            DataspaceType::Simple => element_count(&self.dimensions).unwrap_or(u64::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v1_simple_with_unlimited_max() {
        let ds = Dataspace {
            space_type: DataspaceType::Simple,
            dimensions: vec![10, 20],
            max_dimensions: Some(vec![None, Some(20)]),
        };
        let bytes = ds.serialize(8);
        assert_eq!(bytes.len(), 8 + 4 * 8);
        assert_eq!(Dataspace::parse(&bytes, 8).unwrap(), ds);
        assert_eq!(ds.num_elements(), 200);
    }

    #[test]
    fn v1_rank_zero_is_scalar() {
        let bytes = Dataspace::scalar().serialize(8);
        let ds = Dataspace::parse(&bytes, 8).unwrap();
        assert_eq!(ds.space_type, DataspaceType::Scalar);
        assert_eq!(ds.num_elements(), 1);
    }

    #[test]
    fn v2_null_and_four_byte_lengths() {
        let null = Dataspace {
            space_type: DataspaceType::Null,
            dimensions: vec![],
            max_dimensions: None,
        };
        let parsed = Dataspace::parse(&null.serialize_v2(8), 8).unwrap();
        assert_eq!(parsed.num_elements(), 0);

        let ds = Dataspace::simple(&[3, 4, 5]);
        let bytes = ds.serialize_v2(4);
        assert_eq!(bytes.len(), 4 + 3 * 4);
        assert_eq!(Dataspace::parse(&bytes, 4).unwrap(), ds);
    }

    #[test]
    fn zero_length_dimension_has_no_elements() {
        let ds = Dataspace::simple(&[0, 7]);
        assert_eq!(ds.num_elements(), 0);
    }

    #[test]
    fn overflowing_extent_is_corrupted() {
        let bytes = Dataspace::simple(&[1 << 40, 1 << 40]).serialize(8);
        assert!(matches!(
            Dataspace::parse(&bytes, 8),
            Err(FormatError::Corrupted { .. })
        ));
    }

    #[test]
    fn errors() {
        assert!(matches!(
            Dataspace::parse(&[3, 0, 0, 0], 8),
            Err(FormatError::UnsupportedVersion { .. })
        ));
        assert!(matches!(
            Dataspace::parse(&[2, 1, 0, 7, 0, 0, 0, 0, 0, 0, 0, 0], 8),
            Err(FormatError::Corrupted { .. })
        ));
        assert!(matches!(
            Dataspace::parse(&[1, 2, 0, 0, 0, 0, 0, 0, 1, 0], 8),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }
}
