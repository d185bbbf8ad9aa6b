//! Builders for synthetic fractal heaps and v2 B-trees used by unit tests.
//! Everything is written with 8-byte offsets and lengths.

use crate::checksum::jenkins_lookup3;
use crate::cursor::ByteWriter;
use crate::btree_v2::Geometry;

/// A growing file image with 8-byte aligned allocations.
pub(crate) struct FileImage {
    pub bytes: Vec<u8>,
}

impl FileImage {
    pub fn new(prefix: usize) -> Self {
        FileImage {
            bytes: vec![0; prefix],
        }
    }

    pub fn alloc(&mut self, data: &[u8]) -> u64 {
        let addr = self.reserve(data.len());
        self.write_at(addr, data);
        addr
    }

    pub fn reserve(&mut self, len: usize) -> u64 {
        let start = self.bytes.len().next_multiple_of(8);
        self.bytes.resize(start + len, 0);
        start as u64
    }

    pub fn write_at(&mut self, addr: u64, data: &[u8]) {
        let a = addr as usize;
        self.bytes[a..a + data.len()].copy_from_slice(data);
    }
}

fn with_checksum(mut w: ByteWriter) -> Vec<u8> {
    let sum = jenkins_lookup3(w.as_slice());
    w.write_u32(sum);
    w.into_inner()
}

/// Lays objects out in a fractal heap's doubling table, first fit.
pub(crate) struct FractalHeapBuilder {
    width: u16,
    start: u64,
    max_direct: u64,
}

const HEAP_OFFSET_BITS: u16 = 32;

impl FractalHeapBuilder {
    pub fn new(width: u16, start: u64, max_direct: u64) -> Self {
        FractalHeapBuilder {
            width,
            start,
            max_direct,
        }
    }

    fn row_size(&self, row: usize) -> u64 {
        if row == 0 {
            self.start
        } else {
            self.start << (row - 1)
        }
    }

    fn max_direct_rows(&self) -> usize {
        (self.max_direct.trailing_zeros() - self.start.trailing_zeros()) as usize + 2
    }

    fn length_bytes(&self) -> usize {
        (self.max_direct.trailing_zeros() as usize).div_ceil(8)
    }

    fn heap_id_length(&self) -> u16 {
        1 + 4 + self.length_bytes() as u16
    }

    fn header(&self, root: Option<u64>, root_rows: u16, objects: u64) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_bytes(b"FRHP");
        w.write_u8(0);
        w.write_u16(self.heap_id_length());
        w.write_u16(0);
        w.write_u8(0);
        w.write_u32(self.max_direct as u32);
        w.write_u64(0); // next huge id
        w.write_undefined(8); // huge B-tree
        w.write_u64(0); // free space
        w.write_undefined(8); // free-space manager
        w.write_u64(0);
        w.write_u64(0);
        w.write_u64(0);
        w.write_u64(objects);
        w.write_zeros(8 * 4); // huge and tiny counts and sizes
        w.write_u16(self.width);
        w.write_u64(self.start);
        w.write_u64(self.max_direct);
        w.write_u16(HEAP_OFFSET_BITS);
        w.write_u16(1);
        match root {
            Some(a) => w.write_u64(a),
            None => w.write_undefined(8),
        }
        w.write_u16(root_rows);
        with_checksum(w)
    }

    fn heap_id(&self, offset: u64, len: usize) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u8(0);
        w.write_uint(offset, 4);
        w.write_uint(len as u64, self.length_bytes());
        w.into_inner()
    }

    /// Write one direct block, taking objects from `pending` while they fit.
    fn direct_block(
        &self,
        img: &mut FileImage,
        heap_addr: u64,
        size: u64,
        block_offset: u64,
        pending: &mut std::collections::VecDeque<Vec<u8>>,
        ids: &mut Vec<Vec<u8>>,
    ) -> u64 {
        let mut w = ByteWriter::with_capacity(size as usize);
        w.write_bytes(b"FHDB");
        w.write_u8(0);
        w.write_u64(heap_addr);
        w.write_uint(block_offset, 4);
        while let Some(obj) = pending.front() {
            if w.position() + obj.len() > size as usize {
                break;
            }
            ids.push(self.heap_id(block_offset + w.position() as u64, obj.len()));
            w.write_bytes(obj);
            pending.pop_front();
        }
        w.write_zeros(size as usize - w.position());
        img.alloc(w.as_slice())
    }

    fn indirect_block(
        &self,
        img: &mut FileImage,
        heap_addr: u64,
        nrows: usize,
        block_offset: u64,
        pending: &mut std::collections::VecDeque<Vec<u8>>,
        ids: &mut Vec<Vec<u8>>,
    ) -> u64 {
        let width_bits = self.width.trailing_zeros() as usize;
        let mut children = Vec::new();
        let mut offset = block_offset;
        for row in 0..nrows {
            let span = self.row_size(row);
            for _ in 0..self.width {
                let child = if pending.is_empty() {
                    None
                } else if row < self.max_direct_rows() {
                    Some(self.direct_block(img, heap_addr, span, offset, pending, ids))
                } else {
                    Some(self.indirect_block(
                        img,
                        heap_addr,
                        row - width_bits,
                        offset,
                        pending,
                        ids,
                    ))
                };
                children.push(child);
                offset += span;
            }
        }
        let mut w = ByteWriter::new();
        w.write_bytes(b"FHIB");
        w.write_u8(0);
        w.write_u64(heap_addr);
        w.write_uint(block_offset, 4);
        for child in children {
            match child {
                Some(a) => w.write_u64(a),
                None => w.write_undefined(8),
            }
        }
        img.alloc(&with_checksum(w))
    }

    /// A heap whose root is one direct block. Returns the header address and IDs.
    pub fn build_direct(&self, img: &mut FileImage, objects: &[Vec<u8>]) -> (u64, Vec<Vec<u8>>) {
        let header_len = self.header(None, 0, 0).len();
        let heap_addr = img.reserve(header_len);
        let mut pending = objects.iter().cloned().collect();
        let mut ids = Vec::new();
        let root = self.direct_block(img, heap_addr, self.start, 0, &mut pending, &mut ids);
        assert!(pending.is_empty(), "objects do not fit the root block");
        let header = self.header(Some(root), 0, objects.len() as u64);
        img.write_at(heap_addr, &header);
        (heap_addr, ids)
    }

    /// A heap whose root is an indirect block of `root_rows` rows.
    pub fn build_indirect(
        &self,
        img: &mut FileImage,
        objects: &[Vec<u8>],
        root_rows: u16,
    ) -> (u64, Vec<Vec<u8>>) {
        let header_len = self.header(None, 0, 0).len();
        let heap_addr = img.reserve(header_len);
        let mut pending = objects.iter().cloned().collect();
        let mut ids = Vec::new();
        let root = self.indirect_block(
            img,
            heap_addr,
            root_rows as usize,
            0,
            &mut pending,
            &mut ids,
        );
        assert!(pending.is_empty(), "objects do not fit the heap");
        let header = self.header(Some(root), root_rows, objects.len() as u64);
        img.write_at(heap_addr, &header);
        (heap_addr, ids)
    }
}

/// Builds a v2 B-tree with a fixed fanout at every level.
pub(crate) struct BTreeV2Builder {
    tree_type: u8,
    node_size: u32,
    record_size: u16,
    fanout: usize,
}

impl BTreeV2Builder {
    pub fn new(tree_type: u8, node_size: u32, record_size: u16, fanout: usize) -> Self {
        BTreeV2Builder {
            tree_type,
            node_size,
            record_size,
            fanout,
        }
    }

    fn subtree_size(&self, depth: u16) -> usize {
        if depth == 0 {
            self.fanout
        } else {
            self.fanout * self.subtree_size(depth - 1) + self.fanout - 1
        }
    }

    fn node(&self, img: &mut FileImage, g: &Geometry, records: &[Vec<u8>], depth: u16) -> u64 {
        let mut w = ByteWriter::new();
        w.write_bytes(if depth == 0 { b"BTLF" } else { b"BTIN" });
        w.write_u8(0);
        w.write_u8(self.tree_type);
        if depth == 0 {
            for r in records {
                w.write_bytes(r);
            }
            return img.alloc(&with_checksum(w));
        }

        let per_child = self.subtree_size(depth - 1);
        let mut children = Vec::new();
        let mut separators = Vec::new();
        let mut i = 0;
        loop {
            let take = per_child.min(records.len() - i);
            let chunk = &records[i..i + take];
            let addr = self.node(img, g, chunk, depth - 1);
            children.push((addr, self.own_records(take, depth - 1), take));
            i += take;
            if i < records.len() {
                separators.push(&records[i]);
                i += 1;
            } else {
                break;
            }
        }
        for r in &separators {
            w.write_bytes(r);
        }
        for (addr, nrec, total) in children {
            w.write_u64(addr);
            w.write_uint(nrec as u64, g.nrec_size);
            if depth > 1 {
                w.write_uint(total as u64, g.cum_size[depth as usize - 1]);
            }
        }
        img.alloc(&with_checksum(w))
    }

    /// Records held directly by a node of `depth` covering `total` records.
    fn own_records(&self, total: usize, depth: u16) -> usize {
        if depth == 0 {
            return total;
        }
        // children of size subtree_size(depth - 1) joined by one separator each
        let per_child = self.subtree_size(depth - 1);
        let mut n = 0;
        let mut left = total;
        loop {
            let take = per_child.min(left);
            left -= take;
            if left == 0 {
                return n;
            }
            left -= 1;
            n += 1;
        }
    }

    /// Write the tree and its header; returns the header address.
    pub fn build(&self, img: &mut FileImage, records: &[Vec<u8>], depth: u16) -> u64 {
        let g = Geometry::new(self.node_size, self.record_size, depth, 8)
            .expect("valid test geometry");
        let root = (!records.is_empty()).then(|| self.node(img, &g, records, depth));
        let root_nrec = self.own_records(records.len(), depth);
        let mut w = ByteWriter::new();
        w.write_bytes(b"BTHD");
        w.write_u8(0);
        w.write_u8(self.tree_type);
        w.write_u32(self.node_size);
        w.write_u16(self.record_size);
        w.write_u16(if root.is_some() { depth } else { 0 });
        w.write_u8(100);
        w.write_u8(40);
        match root {
            Some(a) => w.write_u64(a),
            None => w.write_undefined(8),
        }
        w.write_u16(root_nrec as u16);
        w.write_u64(records.len() as u64);
        img.alloc(&with_checksum(w))
    }
}
