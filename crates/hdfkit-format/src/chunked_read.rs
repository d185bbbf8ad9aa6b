//! Chunked dataset reading: chunk lookup through the chunk index, filter
//! decoding and placement of chunk elements into a selection.
//!
//! Filters are not seekable, so every chunk touched by a read is decoded in
//! full before the selected part is copied out.

use crate::btree_v1::{collect_chunks, find_chunk, ChunkRecord};
use crate::data_layout::{ChunkIndex, DataLayout};
use crate::error::{FormatError, Result};
use crate::fill_value::FillValue;
use crate::filter_pipeline::FilterPipeline;
use crate::filters::{check_supported, decompress_chunk};
use crate::selection::{byte_len, element_count, scatter_block, Hyperslab};

/// Reader for one chunked dataset.
#[derive(Debug, Clone)]
pub struct ChunkReader<'a> {
    file_data: &'a [u8],
    offset_size: u8,
    dims: Vec<u64>,
    chunk_dims: Vec<u64>,
    chunk_bytes: usize,
    element_size: u32,
    index: ChunkIndex,
    pipeline: FilterPipeline,
}

impl<'a> ChunkReader<'a> {
    /// Set up a reader. Fails for non-chunked layouts, rank mismatches and
    /// pipelines with filters that cannot be decoded.
    pub fn new(
        file_data: &'a [u8],
        offset_size: u8,
        dims: &[u64],
        layout: &DataLayout,
        pipeline: Option<&FilterPipeline>,
    ) -> Result<Self> {
        let DataLayout::Chunked {
            chunk_dimensions,
            element_size,
            index,
            ..
        } = layout
        else {
            return Err(FormatError::InvalidInput(format!(
                "{} layout is not chunked",
                layout.class_name()
            )));
        };
        if chunk_dimensions.len() != dims.len() {
            return Err(FormatError::corrupted(
                "data layout",
                format!(
                    "rank-{} chunks for a rank-{} dataspace",
                    chunk_dimensions.len(),
                    dims.len()
                ),
            ));
        }
        if chunk_dimensions.contains(&0) {
            return Err(FormatError::corrupted("data layout", "zero chunk dimension"));
        }
        if element_count(dims).is_none() {
            return Err(FormatError::corrupted(
                "dataspace",
                format!("extent {dims:?} overflows the element count"),
            ));
        }
        let chunk_bytes = byte_len(chunk_dimensions, *element_size as usize)?;
        if chunk_bytes > u32::MAX as usize {
            return Err(FormatError::corrupted(
                "data layout",
                format!("chunk of {chunk_bytes} bytes exceeds 4 GiB"),
            ));
        }
        let pipeline = pipeline.cloned().unwrap_or_default();
        check_supported(&pipeline)?;
        Ok(ChunkReader {
            file_data,
            offset_size,
            dims: dims.to_vec(),
            chunk_dims: chunk_dimensions.clone(),
            chunk_bytes,
            element_size: *element_size,
            index: *index,
            pipeline,
        })
    }

    pub fn chunk_dims(&self) -> &[u64] {
        &self.chunk_dims
    }

    /// Decoded size of one chunk in bytes.
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    /// Number of chunks along each axis.
    pub fn grid(&self) -> Vec<u64> {
        self.dims
            .iter()
            .zip(&self.chunk_dims)
            .map(|(d, c)| d.div_ceil(*c))
            .collect()
    }

    /// Where the chunk with the given origin is stored, or `None` if it was
    /// never written.
    pub fn locate(&self, origin: &[u64]) -> Result<Option<ChunkRecord>> {
        let chunk_bytes = self.chunk_bytes() as u64;
        match self.index {
            ChunkIndex::BTreeV1 { address: None }
            | ChunkIndex::SingleChunk { address: None, .. }
            | ChunkIndex::Implicit { address: None } => Ok(None),
            ChunkIndex::BTreeV1 {
                address: Some(root),
            } => find_chunk(
                self.file_data,
                root,
                self.offset_size,
                self.dims.len() + 1,
                origin,
            ),
            ChunkIndex::SingleChunk {
                address: Some(address),
                filtered,
            } => {
                if origin.iter().any(|&o| o != 0) {
                    return Ok(None);
                }
                let (size, filter_mask) = filtered.unwrap_or((chunk_bytes, 0));
                Ok(Some(ChunkRecord {
                    offsets: origin.to_vec(),
                    size: stored_size(size)?,
                    filter_mask,
                    address,
                }))
            }
            ChunkIndex::Implicit {
                address: Some(base),
            } => {
                let grid = self.grid();
                let mut linear = 0u64;
                for d in 0..origin.len() {
                    linear = linear * grid[d] + origin[d] / self.chunk_dims[d];
                }
                let address = linear
                    .checked_mul(chunk_bytes)
                    .and_then(|off| off.checked_add(base))
                    .ok_or_else(|| {
                        FormatError::corrupted("chunk", "implicit chunk address overflows")
                    })?;
                Ok(Some(ChunkRecord {
                    offsets: origin.to_vec(),
                    size: stored_size(chunk_bytes)?,
                    filter_mask: 0,
                    address,
                }))
            }
        }
    }

    /// Every stored chunk in coordinate order.
    pub fn stored_chunks(&self) -> Result<Vec<ChunkRecord>> {
        match self.index {
            ChunkIndex::BTreeV1 {
                address: Some(root),
            } => collect_chunks(self.file_data, root, self.offset_size, self.dims.len() + 1),
            _ => {
                let mut out = Vec::new();
                for origin in self.origins(&Hyperslab::all(&self.dims)) {
                    if let Some(r) = self.locate(&origin)? {
                        out.push(r);
                    }
                }
                Ok(out)
            }
        }
    }

    /// Decode one stored chunk to its full, unfiltered size.
    pub fn decode(&self, record: &ChunkRecord) -> Result<Vec<u8>> {
        let start = record.address as usize;
        let stored = start
            .checked_add(record.size as usize)
            .and_then(|end| self.file_data.get(start..end))
            .ok_or_else(|| {
                FormatError::corrupted(
                    "chunk",
                    format!(
                        "chunk at {:#x} of {} bytes runs past end of file",
                        record.address, record.size
                    ),
                )
            })?;
        let expected = self.chunk_bytes();
        if self.pipeline.is_empty() {
            if stored.len() < expected {
                return Err(FormatError::corrupted(
                    "chunk",
                    format!("unfiltered chunk holds {} of {expected} bytes", stored.len()),
                ));
            }
            return Ok(stored[..expected].to_vec());
        }
        decompress_chunk(
            stored,
            &self.pipeline,
            record.filter_mask,
            self.element_size,
            expected,
        )
    }

    /// Origins of all chunks the selection touches, in coordinate order.
    pub fn origins(&self, sel: &Hyperslab) -> Vec<Vec<u64>> {
        let rank = self.dims.len();
        let grid = self.grid();
        let mut out = Vec::new();
        if grid.contains(&0) || sel.num_elements() == 0 {
            return out;
        }
        // per-axis range of chunk indices overlapping the selection
        let mut lo = Vec::with_capacity(rank);
        let mut hi = Vec::with_capacity(rank);
        for d in 0..rank {
            lo.push(sel.start[d] / self.chunk_dims[d]);
            hi.push((sel.end[d] - 1) / self.chunk_dims[d] + 1);
        }
        let mut cell = lo.clone();
        loop {
            let origin: Vec<u64> = cell.iter().zip(&self.chunk_dims).map(|(c, d)| c * d).collect();
            if sel.intersects(&origin, &self.chunk_dims) {
                out.push(origin);
            }
            let mut d = rank;
            loop {
                if d == 0 {
                    return out;
                }
                d -= 1;
                cell[d] += 1;
                if cell[d] < hi[d] {
                    break;
                }
                cell[d] = lo[d];
            }
        }
    }

    /// Read a selection. Chunks never written read as the fill value.
    pub fn read(&self, sel: &Hyperslab, fill: &FillValue) -> Result<Vec<u8>> {
        sel.validate(&self.dims)?;
        let elem = self.element_size as usize;
        let mut out = fill.fill(sel.byte_len(elem)?, elem)?;
        for origin in self.origins(sel) {
            let Some(record) = self.locate(&origin)? else {
                continue;
            };
            let chunk = self.decode(&record)?;
            scatter_block(sel, &origin, &self.chunk_dims, &chunk, elem, &mut out)?;
        }
        Ok(out)
    }
}

fn stored_size(size: u64) -> Result<u32> {
    u32::try_from(size).map_err(|_| FormatError::corrupted("chunk", "chunk larger than 4 GiB"))
}
