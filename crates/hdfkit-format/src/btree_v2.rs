//! HDF5 B-tree v2 parsing ("BTHD" header, "BTIN" internal and "BTLF" leaf nodes).
//!
//! Only full in-order traversal is offered; callers filter the records.
//! Dense groups and dense attribute storage keep at most a few thousand
//! entries, so a scan is cheap next to the fractal heap reads it drives.

use crate::checksum;
use crate::cursor::Cursor;
use crate::error::{FormatError, Result};

/// Record type 5: links indexed by name hash.
pub const TYPE_LINK_NAME: u8 = 5;
/// Record type 6: links indexed by creation order.
pub const TYPE_LINK_CREATION_ORDER: u8 = 6;
/// Record type 8: attributes indexed by name hash.
pub const TYPE_ATTRIBUTE_NAME: u8 = 8;
/// Record type 9: attributes indexed by creation order.
pub const TYPE_ATTRIBUTE_CREATION_ORDER: u8 = 9;

/// Signature + version + type + checksum.
const NODE_PREFIX: usize = 10;
const MAX_DEPTH: u16 = 32;

/// Parsed B-tree v2 header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV2 {
    pub tree_type: u8,
    pub node_size: u32,
    pub record_size: u16,
    /// Depth of the tree (0 = root is a leaf).
    pub depth: u16,
    pub root_node_address: Option<u64>,
    pub num_records_in_root: u16,
    pub total_records: u64,
    geometry: Geometry,
    offset_size: u8,
}

/// Field widths derived from node and record sizes, per tree level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Geometry {
    /// Width of every "number of records" field.
    pub nrec_size: usize,
    /// Width of the "total records" field for children at each level.
    pub cum_size: Vec<usize>,
    /// Maximum records per node at each level.
    pub max_nrec: Vec<u64>,
}

/// Bytes needed to encode values up to `max`.
fn limit_enc_size(max: u64) -> usize {
    (63 - max.max(1).leading_zeros()) as usize / 8 + 1
}

impl Geometry {
    pub(crate) fn new(node_size: u32, record_size: u16, depth: u16, offset_size: u8) -> Result<Self> {
        let node = node_size as usize;
        let rec = record_size as usize;
        if rec == 0 || node <= NODE_PREFIX + rec {
            return Err(FormatError::corrupted(
                "B-tree v2",
                format!("node size {node_size} cannot hold {record_size} byte records"),
            ));
        }
        let leaf_max = ((node - NODE_PREFIX) / rec) as u64;
        let nrec_size = limit_enc_size(leaf_max);
        let mut max_nrec = vec![leaf_max];
        let mut cum_max = vec![leaf_max];
        let mut cum_size = vec![0];
        for d in 1..=depth as usize {
            let ptr = offset_size as usize + nrec_size + if d > 1 { cum_size[d - 1] } else { 0 };
            let max = node
                .checked_sub(NODE_PREFIX + ptr)
                .map(|room| room / (rec + ptr))
                .unwrap_or(0) as u64;
            if max == 0 {
                return Err(FormatError::corrupted(
                    "B-tree v2",
                    "internal node cannot hold any record",
                ));
            }
            let cum = (max + 1)
                .saturating_mul(cum_max[d - 1])
                .saturating_add(max);
            max_nrec.push(max);
            cum_max.push(cum);
            cum_size.push(limit_enc_size(cum));
        }
        Ok(Geometry {
            nrec_size,
            cum_size,
            max_nrec,
        })
    }
}

impl BTreeV2 {
    /// Parse a B-tree v2 header at the given address.
    pub fn parse(file_data: &[u8], address: u64, offset_size: u8, length_size: u8) -> Result<Self> {
        let mut c = Cursor::at(file_data, address)?;
        c.expect_signature(b"BTHD", "B-tree v2 header")?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "B-tree v2 header",
                version,
            });
        }
        let tree_type = c.read_u8()?;
        let node_size = c.read_u32()?;
        let record_size = c.read_u16()?;
        let depth = c.read_u16()?;
        c.skip(2)?; // split and merge percentages
        let root_node_address = c.read_address(offset_size)?;
        let num_records_in_root = c.read_u16()?;
        let total_records = c.read_length(length_size)?;
        let end = c.position();
        c.ensure(4)?;
        checksum::verify(file_data, address as usize, end, "B-tree v2 header")?;
        if depth > MAX_DEPTH {
            return Err(FormatError::corrupted(
                "B-tree v2",
                format!("depth {depth}"),
            ));
        }
        let geometry = Geometry::new(node_size, record_size, depth, offset_size)?;

        Ok(BTreeV2 {
            tree_type,
            node_size,
            record_size,
            depth,
            root_node_address,
            num_records_in_root,
            total_records,
            geometry,
            offset_size,
        })
    }

    /// Every record in key order, walking internal nodes at every level.
    pub fn records<'a>(&self, file_data: &'a [u8]) -> Result<Vec<&'a [u8]>> {
        let mut out = Vec::with_capacity(self.total_records.min(1 << 16) as usize);
        if let Some(root) = self.root_node_address {
            if self.num_records_in_root > 0 || self.depth > 0 {
                self.walk(file_data, root, self.num_records_in_root as u64, self.depth, &mut out)?;
            }
        }
        if out.len() as u64 != self.total_records {
            return Err(FormatError::corrupted(
                "B-tree v2",
                format!(
                    "found {} records, header says {}",
                    out.len(),
                    self.total_records
                ),
            ));
        }
        Ok(out)
    }

    fn walk<'a>(
        &self,
        file_data: &'a [u8],
        address: u64,
        nrec: u64,
        depth: u16,
        out: &mut Vec<&'a [u8]>,
    ) -> Result<()> {
        let level = depth as usize;
        if nrec > self.geometry.max_nrec[level] {
            return Err(FormatError::corrupted(
                "B-tree v2",
                format!("node at {address:#x} claims {nrec} records"),
            ));
        }
        let (sig, structure): (&[u8; 4], &'static str) = if depth == 0 {
            (b"BTLF", "B-tree v2 leaf")
        } else {
            (b"BTIN", "B-tree v2 internal node")
        };
        let mut c = Cursor::at(file_data, address)?;
        c.expect_signature(sig, structure)?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion { structure, version });
        }
        let tree_type = c.read_u8()?;
        if tree_type != self.tree_type {
            return Err(FormatError::corrupted(
                "B-tree v2",
                format!("node type {tree_type} in a type {} tree", self.tree_type),
            ));
        }
        let rec = self.record_size as usize;
        let mut records = Vec::with_capacity(nrec as usize);
        for _ in 0..nrec {
            records.push(c.read_bytes(rec)?);
        }

        if depth == 0 {
            let end = c.position();
            c.ensure(4)?;
            checksum::verify(file_data, address as usize, end, structure)?;
            out.extend(records);
            return Ok(());
        }

        let mut children = Vec::with_capacity(nrec as usize + 1);
        for _ in 0..=nrec {
            let child = c.read_offset(self.offset_size)?;
            let child_nrec = c.read_uint(self.geometry.nrec_size)?;
            if depth > 1 {
                c.read_uint(self.geometry.cum_size[level - 1])?;
            }
            children.push((child, child_nrec));
        }
        let end = c.position();
        c.ensure(4)?;
        checksum::verify(file_data, address as usize, end, structure)?;

        for (i, (child, child_nrec)) in children.into_iter().enumerate() {
            self.walk(file_data, child, child_nrec, depth - 1, out)?;
            if let Some(r) = records.get(i) {
                out.push(r);
            }
        }
        Ok(())
    }
}

/// Type 5 record: name hash and fractal heap ID of a link message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkNameRecord {
    pub hash: u32,
    pub heap_id: Vec<u8>,
}

impl LinkNameRecord {
    pub fn parse(record: &[u8]) -> Result<Self> {
        let mut c = Cursor::new(record);
        let hash = c.read_u32()?;
        Ok(LinkNameRecord {
            hash,
            heap_id: record[4..].to_vec(),
        })
    }
}

/// Type 6 record: creation order and fractal heap ID of a link message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreationOrderRecord {
    pub creation_order: u64,
    pub heap_id: Vec<u8>,
}

impl CreationOrderRecord {
    pub fn parse(record: &[u8]) -> Result<Self> {
        let mut c = Cursor::new(record);
        let creation_order = c.read_u64()?;
        Ok(CreationOrderRecord {
            creation_order,
            heap_id: record[8..].to_vec(),
        })
    }
}

/// Type 8 and 9 records: an attribute message in the fractal heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRecord {
    pub heap_id: [u8; 8],
    pub message_flags: u8,
    pub creation_order: u32,
    /// Name hash (type 8 only).
    pub hash: Option<u32>,
}

impl AttributeRecord {
    pub fn parse(record: &[u8], tree_type: u8) -> Result<Self> {
        let mut c = Cursor::new(record);
        let heap_id = c.read_array::<8>()?;
        let message_flags = c.read_u8()?;
        let creation_order = c.read_u32()?;
        let hash = if tree_type == TYPE_ATTRIBUTE_NAME {
            Some(c.read_u32()?)
        } else {
            None
        };
        Ok(AttributeRecord {
            heap_id,
            message_flags,
            creation_order,
            hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{BTreeV2Builder, FileImage};

    fn numbered(n: u32, size: usize) -> Vec<Vec<u8>> {
        (0..n)
            .map(|i| {
                let mut r = i.to_le_bytes().to_vec();
                r.resize(size, 0xAB);
                r
            })
            .collect()
    }

    fn firsts(records: &[&[u8]]) -> Vec<u32> {
        records
            .iter()
            .map(|r| u32::from_le_bytes([r[0], r[1], r[2], r[3]]))
            .collect()
    }

    #[test]
    fn single_leaf_root() {
        let mut img = FileImage::new(16);
        let recs = numbered(5, 11);
        let addr = BTreeV2Builder::new(TYPE_LINK_NAME, 512, 11, 4).build(&mut img, &recs, 0);
        let tree = BTreeV2::parse(&img.bytes, addr, 8, 8).unwrap();
        assert_eq!(tree.depth, 0);
        assert_eq!(firsts(&tree.records(&img.bytes).unwrap()), (0..5).collect::<Vec<_>>());
    }

    #[test]
    fn depth_one_tree_in_key_order() {
        let mut img = FileImage::new(16);
        // fanout 3, three records per leaf: 3*3 + 2 separators
        let recs = numbered(11, 11);
        let addr = BTreeV2Builder::new(TYPE_LINK_NAME, 128, 11, 3).build(&mut img, &recs, 1);
        let tree = BTreeV2::parse(&img.bytes, addr, 8, 8).unwrap();
        assert_eq!(tree.depth, 1);
        assert_eq!(firsts(&tree.records(&img.bytes).unwrap()), (0..11).collect::<Vec<_>>());
    }

    #[test]
    fn depth_two_tree_in_key_order() {
        let mut img = FileImage::new(16);
        // subtree of depth 1 holds 11 records; root joins 3 of them
        let recs = numbered(35, 17);
        let addr =
            BTreeV2Builder::new(TYPE_ATTRIBUTE_NAME, 256, 17, 3).build(&mut img, &recs, 2);
        let tree = BTreeV2::parse(&img.bytes, addr, 8, 8).unwrap();
        assert_eq!(tree.depth, 2);
        let all = tree.records(&img.bytes).unwrap();
        assert_eq!(firsts(&all), (0..35).collect::<Vec<_>>());
        let rec = AttributeRecord::parse(all[0], TYPE_ATTRIBUTE_NAME).unwrap();
        assert_eq!(rec.hash, Some(0xABAB_ABAB));
    }

    #[test]
    fn empty_tree_has_no_records() {
        let mut img = FileImage::new(16);
        let addr = BTreeV2Builder::new(TYPE_LINK_NAME, 512, 11, 4).build(&mut img, &[], 0);
        let tree = BTreeV2::parse(&img.bytes, addr, 8, 8).unwrap();
        assert!(tree.records(&img.bytes).unwrap().is_empty());
    }

    #[test]
    fn corrupted_leaf_checksum() {
        let mut img = FileImage::new(16);
        let recs = numbered(3, 11);
        let addr = BTreeV2Builder::new(TYPE_LINK_NAME, 512, 11, 4).build(&mut img, &recs, 0);
        // leaf is written first, right after the 16-byte prefix
        img.bytes[16 + 8] ^= 1;
        let tree = BTreeV2::parse(&img.bytes, addr, 8, 8).unwrap();
        assert!(matches!(
            tree.records(&img.bytes),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn record_decoders() {
        let mut r = 0xDEADBEEFu32.to_le_bytes().to_vec();
        r.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7]);
        let link = LinkNameRecord::parse(&r).unwrap();
        assert_eq!(link.hash, 0xDEADBEEF);
        assert_eq!(link.heap_id, vec![1, 2, 3, 4, 5, 6, 7]);

        let mut r = 9u64.to_le_bytes().to_vec();
        r.extend_from_slice(&[0; 7]);
        assert_eq!(CreationOrderRecord::parse(&r).unwrap().creation_order, 9);
    }

    #[test]
    fn geometry_widths() {
        // 512-byte nodes of 11-byte records: 45 per leaf, one byte counts
        let g = Geometry::new(512, 11, 2, 8).unwrap();
        assert_eq!(g.max_nrec[0], 45);
        assert_eq!(g.nrec_size, 1);
        assert!(g.cum_size[1] >= 2);
    }
}
