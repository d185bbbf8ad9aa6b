//! HDF5 B-tree v1 ("TREE") nodes: type 0 indexes group symbol-table nodes,
//! type 1 indexes raw data chunks.
//!
//! Nodes are read one at a time; the helpers below walk whole trees and
//! require each child to sit exactly one level below its parent, which also
//! rules out cycles in corrupt files.

use std::cmp::Ordering;

use crate::cursor::{ByteWriter, Cursor};
use crate::error::{FormatError, Result};

const TREE_SIGNATURE: [u8; 4] = *b"TREE";

/// Node type of group trees.
pub const NODE_TYPE_GROUP: u8 = 0;
/// Node type of chunk trees.
pub const NODE_TYPE_CHUNK: u8 = 1;

/// How keys are encoded for a given tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLayout {
    /// Group trees key on a local-heap name offset of `length_size` bytes.
    Group { length_size: u8 },
    /// Chunk trees key on (size, filter mask, `dims` offsets). `dims` counts
    /// the trailing element-size dimension of the layout message.
    Chunk { dims: usize },
}

impl KeyLayout {
    pub fn node_type(&self) -> u8 {
        match self {
            KeyLayout::Group { .. } => NODE_TYPE_GROUP,
            KeyLayout::Chunk { .. } => NODE_TYPE_CHUNK,
        }
    }

    pub fn key_size(&self) -> usize {
        match *self {
            KeyLayout::Group { length_size } => length_size as usize,
            KeyLayout::Chunk { dims } => 8 + 8 * dims,
        }
    }

    fn read_key(&self, c: &mut Cursor<'_>) -> Result<BTreeKey> {
        match *self {
            KeyLayout::Group { length_size } => Ok(BTreeKey::Group {
                heap_offset: c.read_length(length_size)?,
            }),
            KeyLayout::Chunk { dims } => {
                let size = c.read_u32()?;
                let filter_mask = c.read_u32()?;
                let offsets = (0..dims).map(|_| c.read_u64()).collect::<Result<_>>()?;
                Ok(BTreeKey::Chunk(ChunkKey {
                    size,
                    filter_mask,
                    offsets,
                }))
            }
        }
    }
}

/// Key of a chunk tree: stored byte size, skipped-filter mask and the chunk's
/// logical origin in element coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkKey {
    pub size: u32,
    pub filter_mask: u32,
    /// One offset per dataset dimension plus a trailing 0.
    pub offsets: Vec<u64>,
}

impl ChunkKey {
    pub fn write(&self, w: &mut ByteWriter) {
        w.write_u32(self.size);
        w.write_u32(self.filter_mask);
        for &o in &self.offsets {
            w.write_u64(o);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(8 + 8 * self.offsets.len());
        self.write(&mut w);
        w.into_inner()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BTreeKey {
    Group { heap_offset: u64 },
    Chunk(ChunkKey),
}

/// A parsed B-tree v1 node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV1Node {
    pub node_type: u8,
    /// 0 for leaves.
    pub level: u8,
    pub left_sibling: Option<u64>,
    pub right_sibling: Option<u64>,
    /// `children.len() + 1` keys.
    pub keys: Vec<BTreeKey>,
    pub children: Vec<u64>,
}

impl BTreeV1Node {
    pub fn parse(file_data: &[u8], address: u64, offset_size: u8, layout: KeyLayout) -> Result<Self> {
        let mut c = Cursor::at(file_data, address)?;
        c.expect_signature(&TREE_SIGNATURE, "v1 B-tree node")?;
        let node_type = c.read_u8()?;
        if node_type != layout.node_type() {
            return Err(FormatError::corrupted(
                "v1 B-tree node",
                format!(
                    "node type {node_type} at {address:#x}, expected {}",
                    layout.node_type()
                ),
            ));
        }
        let level = c.read_u8()?;
        let entries = c.read_u16()? as usize;
        let left_sibling = c.read_address(offset_size)?;
        let right_sibling = c.read_address(offset_size)?;
        c.ensure(entries * (layout.key_size() + offset_size as usize) + layout.key_size())?;

        let mut keys = Vec::with_capacity(entries + 1);
        let mut children = Vec::with_capacity(entries);
        for _ in 0..entries {
            keys.push(layout.read_key(&mut c)?);
            children.push(c.read_offset(offset_size)?);
        }
        keys.push(layout.read_key(&mut c)?);
        Ok(BTreeV1Node {
            node_type,
            level,
            left_sibling,
            right_sibling,
            keys,
            children,
        })
    }

    fn chunk_key(&self, i: usize) -> Result<&ChunkKey> {
        match &self.keys[i] {
            BTreeKey::Chunk(k) => Ok(k),
            BTreeKey::Group { .. } => Err(FormatError::corrupted(
                "v1 B-tree node",
                "group key in a chunk tree",
            )),
        }
    }
}

fn check_child_level(parent: &BTreeV1Node, child: &BTreeV1Node, address: u64) -> Result<()> {
    if child.level + 1 != parent.level {
        return Err(FormatError::corrupted(
            "v1 B-tree node",
            format!(
                "child at {address:#x} has level {}, parent has level {}",
                child.level, parent.level
            ),
        ));
    }
    Ok(())
}

fn walk_leaves(
    file_data: &[u8],
    node: &BTreeV1Node,
    offset_size: u8,
    layout: KeyLayout,
    visit: &mut dyn FnMut(&BTreeV1Node) -> Result<()>,
) -> Result<()> {
    if node.level == 0 {
        return visit(node);
    }
    for &child_addr in &node.children {
        let child = BTreeV1Node::parse(file_data, child_addr, offset_size, layout)?;
        check_child_level(node, &child, child_addr)?;
        walk_leaves(file_data, &child, offset_size, layout, visit)?;
    }
    Ok(())
}

/// Addresses of every symbol-table node of a group tree, in name order.
pub fn collect_symbol_table_nodes(
    file_data: &[u8],
    root: u64,
    offset_size: u8,
    length_size: u8,
) -> Result<Vec<u64>> {
    let layout = KeyLayout::Group { length_size };
    let node = BTreeV1Node::parse(file_data, root, offset_size, layout)?;
    let mut out = Vec::new();
    walk_leaves(file_data, &node, offset_size, layout, &mut |leaf| {
        out.extend_from_slice(&leaf.children);
        Ok(())
    })?;
    Ok(out)
}

/// One stored chunk as recorded in a chunk tree leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Chunk origin in element coordinates, one entry per dataset dimension.
    pub offsets: Vec<u64>,
    pub size: u32,
    pub filter_mask: u32,
    pub address: u64,
}

fn leaf_records(leaf: &BTreeV1Node, out: &mut Vec<ChunkRecord>) -> Result<()> {
    for (i, &address) in leaf.children.iter().enumerate() {
        let key = leaf.chunk_key(i)?;
        let rank = key.offsets.len().saturating_sub(1);
        out.push(ChunkRecord {
            offsets: key.offsets[..rank].to_vec(),
            size: key.size,
            filter_mask: key.filter_mask,
            address,
        });
    }
    Ok(())
}

/// Every chunk of a chunk tree, in key order. `dims` is the layout's
/// dimensionality including the element-size dimension.
pub fn collect_chunks(
    file_data: &[u8],
    root: u64,
    offset_size: u8,
    dims: usize,
) -> Result<Vec<ChunkRecord>> {
    let layout = KeyLayout::Chunk { dims };
    let node = BTreeV1Node::parse(file_data, root, offset_size, layout)?;
    let mut out = Vec::new();
    walk_leaves(file_data, &node, offset_size, layout, &mut |leaf| {
        leaf_records(leaf, &mut out)
    })?;
    Ok(out)
}

fn cmp_coords(a: &[u64], b: &[u64]) -> Ordering {
    a.iter().zip(b).map(|(x, y)| x.cmp(y)).find(|o| o.is_ne()).unwrap_or(Ordering::Equal)
}

/// Descend a chunk tree to the chunk whose origin is `origin`.
pub fn find_chunk(
    file_data: &[u8],
    root: u64,
    offset_size: u8,
    dims: usize,
    origin: &[u64],
) -> Result<Option<ChunkRecord>> {
    let layout = KeyLayout::Chunk { dims };
    let mut node = BTreeV1Node::parse(file_data, root, offset_size, layout)?;
    loop {
        // last child whose left key is <= origin
        let mut slot = None;
        for i in 0..node.children.len() {
            if cmp_coords(&node.chunk_key(i)?.offsets, origin).is_le() {
                slot = Some(i);
            } else {
                break;
            }
        }
        let Some(i) = slot else {
            return Ok(None);
        };
        if node.level == 0 {
            let key = node.chunk_key(i)?;
            let rank = origin.len();
            if key.offsets.len() < rank || key.offsets[..rank] != *origin {
                return Ok(None);
            }
            return Ok(Some(ChunkRecord {
                offsets: origin.to_vec(),
                size: key.size,
                filter_mask: key.filter_mask,
                address: node.children[i],
            }));
        }
        let child_addr = node.children[i];
        let child = BTreeV1Node::parse(file_data, child_addr, offset_size, layout)?;
        check_child_level(&node, &child, child_addr)?;
        node = child;
    }
}

/// A child entry handed to [`BTreeV1Writer`]: the keys bounding it on the
/// left and right, and its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV1Child {
    pub left_key: Vec<u8>,
    pub right_key: Vec<u8>,
    pub address: u64,
}

/// Lays out a complete multi-level tree in one contiguous region. Every node
/// is allocated at full capacity (`2K` entries) as readers expect.
#[derive(Debug, Clone, Copy)]
pub struct BTreeV1Writer {
    layout: KeyLayout,
    /// Half the node capacity (group leaf K or indexed-storage K).
    k: u16,
    offset_size: u8,
}

impl BTreeV1Writer {
    pub fn new(layout: KeyLayout, k: u16, offset_size: u8) -> Self {
        BTreeV1Writer {
            layout,
            k: k.max(1),
            offset_size,
        }
    }

    fn fanout(&self) -> usize {
        2 * self.k as usize
    }

    pub fn node_size(&self) -> usize {
        let os = self.offset_size as usize;
        let ks = self.layout.key_size();
        8 + 2 * os + self.fanout() * (ks + os) + ks
    }

    fn level_counts(&self, children: usize) -> Vec<usize> {
        let mut counts = vec![children.div_ceil(self.fanout()).max(1)];
        while let Some(&n) = counts.last() {
            if n == 1 {
                break;
            }
            counts.push(n.div_ceil(self.fanout()));
        }
        counts
    }

    /// Bytes needed for a tree over `children` entries.
    pub fn encoded_size(&self, children: usize) -> usize {
        self.level_counts(children).iter().sum::<usize>() * self.node_size()
    }

    /// Serialize the tree starting at `base`. Returns the root address and
    /// the bytes of all nodes, leaves first and root last.
    pub fn serialize(&self, children: &[BTreeV1Child], base: u64) -> Result<(u64, Vec<u8>)> {
        let ks = self.layout.key_size();
        if let Some(bad) = children
            .iter()
            .find(|c| c.left_key.len() != ks || c.right_key.len() != ks)
        {
            return Err(FormatError::InvalidInput(format!(
                "B-tree key of {} bytes, expected {ks}",
                bad.left_key.len()
            )));
        }

        let node_size = self.node_size();
        let mut w = ByteWriter::with_capacity(self.encoded_size(children.len()));
        let mut level_entries: Vec<BTreeV1Child> = children.to_vec();
        let mut level = 0u8;
        loop {
            let groups: Vec<&[BTreeV1Child]> = if level_entries.is_empty() {
                vec![&level_entries[..]]
            } else {
                level_entries.chunks(self.fanout()).collect()
            };
            let first = base + w.position() as u64;
            let mut parents = Vec::with_capacity(groups.len());
            for (i, group) in groups.iter().enumerate() {
                let addr = first + (i * node_size) as u64;
                let left = (i > 0).then(|| addr - node_size as u64);
                let right = (i + 1 < groups.len()).then(|| addr + node_size as u64);
                self.write_node(&mut w, level, group, left, right);
                if let (Some(head), Some(tail)) = (group.first(), group.last()) {
                    parents.push(BTreeV1Child {
                        left_key: head.left_key.clone(),
                        right_key: tail.right_key.clone(),
                        address: addr,
                    });
                }
            }
            if groups.len() == 1 {
                return Ok((first, w.into_inner()));
            }
            level_entries = parents;
            level += 1;
        }
    }

    fn write_node(
        &self,
        w: &mut ByteWriter,
        level: u8,
        entries: &[BTreeV1Child],
        left: Option<u64>,
        right: Option<u64>,
    ) {
        let os = self.offset_size;
        let start = w.position();
        w.write_bytes(&TREE_SIGNATURE);
        w.write_u8(self.layout.node_type());
        w.write_u8(level);
        w.write_u16(entries.len() as u16);
        for sibling in [left, right] {
            match sibling {
                Some(a) => w.write_offset(a, os),
                None => w.write_undefined(os),
            }
        }
        for e in entries {
            w.write_bytes(&e.left_key);
            w.write_offset(e.address, os);
        }
        match entries.last() {
            Some(e) => w.write_bytes(&e.right_key),
            None => w.write_zeros(self.layout.key_size()),
        }
        let used = w.position() - start;
        w.write_zeros(self.node_size() - used);
    }
}

/// Key bytes for a group tree.
pub fn group_key(heap_offset: u64, length_size: u8) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(length_size as usize);
    w.write_uint(heap_offset, length_size as usize);
    w.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_child(origin: &[u64], chunk: &[u64], address: u64) -> BTreeV1Child {
        let mut offsets = origin.to_vec();
        offsets.push(0);
        let left = ChunkKey {
            size: 100,
            filter_mask: 0,
            offsets: offsets.clone(),
        };
        let mut end: Vec<u64> = origin.iter().zip(chunk).map(|(o, c)| o + c).collect();
        end.push(0);
        let right = ChunkKey {
            size: 0,
            filter_mask: 0,
            offsets: end,
        };
        BTreeV1Child {
            left_key: left.to_bytes(),
            right_key: right.to_bytes(),
            address,
        }
    }

    fn place(prefix: usize, bytes: Vec<u8>) -> Vec<u8> {
        let mut file = vec![0u8; prefix];
        file.extend(bytes);
        file
    }

    #[test]
    fn single_leaf_chunk_tree() {
        let writer = BTreeV1Writer::new(KeyLayout::Chunk { dims: 3 }, 4, 8);
        let children = vec![
            chunk_child(&[0, 0], &[2, 2], 0x1000),
            chunk_child(&[0, 2], &[2, 2], 0x2000),
            chunk_child(&[2, 0], &[2, 2], 0x3000),
        ];
        let (root, bytes) = writer.serialize(&children, 64).unwrap();
        assert_eq!(root, 64);
        assert_eq!(bytes.len(), writer.node_size());
        let file = place(64, bytes);

        let node = BTreeV1Node::parse(&file, 64, 8, KeyLayout::Chunk { dims: 3 }).unwrap();
        assert_eq!(node.level, 0);
        assert_eq!(node.children, vec![0x1000, 0x2000, 0x3000]);
        assert_eq!(node.left_sibling, None);

        let chunks = collect_chunks(&file, 64, 8, 3).unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].offsets, vec![0, 2]);
        assert_eq!(chunks[1].size, 100);
        assert_eq!(chunks[2].address, 0x3000);
    }

    #[test]
    fn multi_level_chunk_tree_walk_and_lookup() {
        // K = 1 gives two entries per node, so 9 chunks need three levels
        let writer = BTreeV1Writer::new(KeyLayout::Chunk { dims: 2 }, 1, 8);
        let children: Vec<_> = (0..9u64)
            .map(|i| chunk_child(&[i * 4], &[4], 0x10_000 + i * 0x100))
            .collect();
        let (root, bytes) = writer.serialize(&children, 0).unwrap();
        assert_eq!(bytes.len(), writer.encoded_size(9));
        let root_node = BTreeV1Node::parse(&bytes, root, 8, KeyLayout::Chunk { dims: 2 }).unwrap();
        assert_eq!(root_node.level, 3);

        let chunks = collect_chunks(&bytes, root, 8, 2).unwrap();
        let origins: Vec<u64> = chunks.iter().map(|c| c.offsets[0]).collect();
        assert_eq!(origins, (0..9).map(|i| i * 4).collect::<Vec<_>>());

        let hit = find_chunk(&bytes, root, 8, 2, &[20]).unwrap().unwrap();
        assert_eq!(hit.address, 0x10_000 + 5 * 0x100);
        assert_eq!(find_chunk(&bytes, root, 8, 2, &[21]).unwrap(), None);
        assert_eq!(find_chunk(&bytes, root, 8, 2, &[100]).unwrap(), None);
    }

    #[test]
    fn group_tree_collects_snods_in_order() {
        let writer = BTreeV1Writer::new(KeyLayout::Group { length_size: 8 }, 2, 8);
        let children: Vec<_> = (0..7u64)
            .map(|i| BTreeV1Child {
                left_key: group_key(i * 8, 8),
                right_key: group_key(i * 8 + 8, 8),
                address: 0x500 + i * 0x40,
            })
            .collect();
        let (root, bytes) = writer.serialize(&children, 32).unwrap();
        let file = place(32, bytes);
        let snods = collect_symbol_table_nodes(&file, root, 8, 8).unwrap();
        assert_eq!(snods, (0..7).map(|i| 0x500 + i * 0x40).collect::<Vec<u64>>());
        let root_node = BTreeV1Node::parse(&file, root, 8, KeyLayout::Group { length_size: 8 }).unwrap();
        assert_eq!(root_node.level, 1);
        assert_eq!(root_node.keys.first(), Some(&BTreeKey::Group { heap_offset: 0 }));
        assert_eq!(root_node.keys.last(), Some(&BTreeKey::Group { heap_offset: 56 }));
    }

    #[test]
    fn empty_tree_is_one_empty_leaf() {
        let writer = BTreeV1Writer::new(KeyLayout::Chunk { dims: 2 }, 4, 4);
        let (root, bytes) = writer.serialize(&[], 0).unwrap();
        assert_eq!(collect_chunks(&bytes, root, 4, 2).unwrap(), vec![]);
    }

    #[test]
    fn wrong_node_type_and_signature() {
        let writer = BTreeV1Writer::new(KeyLayout::Group { length_size: 8 }, 2, 8);
        let (_, mut bytes) = writer.serialize(&[], 0).unwrap();
        assert!(matches!(
            collect_chunks(&bytes, 0, 8, 2),
            Err(FormatError::Corrupted { .. })
        ));
        bytes[0] = b'X';
        assert!(matches!(
            collect_symbol_table_nodes(&bytes, 0, 8, 8),
            Err(FormatError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn self_referencing_child_is_rejected() {
        let writer = BTreeV1Writer::new(KeyLayout::Chunk { dims: 2 }, 1, 8);
        let children: Vec<_> = (0..3u64).map(|i| chunk_child(&[i], &[1], 0x900)).collect();
        let (root, mut bytes) = writer.serialize(&children, 0).unwrap();
        // point the root's first child back at the root
        let child_pos = root as usize + 8 + 16 + 24;
        bytes[child_pos..child_pos + 8].copy_from_slice(&root.to_le_bytes());
        assert!(matches!(
            collect_chunks(&bytes, root, 8, 2),
            Err(FormatError::Corrupted { .. })
        ));
    }
}
