//! Chunked dataset writing: chunk splitting, filtering and the chunk tree.

use crate::btree_v1::{BTreeV1Child, BTreeV1Writer, ChunkKey, KeyLayout};
use crate::error::{FormatError, Result};
use crate::filter_pipeline::{
    FilterDescription, FilterPipeline, FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_LZF,
    FILTER_SHUFFLE,
};
use crate::filters::compress_chunk;
use crate::selection::{byte_len, element_count, strides};

/// Indexed-storage K used for chunk trees written here.
pub const CHUNK_TREE_K: u16 = 32;

/// Filters to apply to every chunk, in pipeline order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkFilters {
    pub shuffle: bool,
    /// Deflate level 0-9.
    pub deflate: Option<u32>,
    pub lzf: bool,
    pub fletcher32: bool,
}

impl ChunkFilters {
    pub fn is_empty(&self) -> bool {
        !self.shuffle && self.deflate.is_none() && !self.lzf && !self.fletcher32
    }

    /// Pipeline message contents for these filters.
    pub fn pipeline(&self, element_size: u32) -> FilterPipeline {
        let mut filters = Vec::new();
        if self.shuffle {
            filters.push(FilterDescription::new(FILTER_SHUFFLE, 0, vec![element_size]));
        }
        if let Some(level) = self.deflate {
            filters.push(FilterDescription::new(FILTER_DEFLATE, 0, vec![level.min(9)]));
        }
        if self.lzf {
            filters.push(FilterDescription::new(FILTER_LZF, 0x0001, vec![]));
        }
        if self.fletcher32 {
            filters.push(FilterDescription::new(FILTER_FLETCHER32, 0, vec![]));
        }
        FilterPipeline { filters }
    }
}

/// Split a dense row-major array into full-size chunks in row-major chunk
/// order. Edge chunks are zero-padded past the dataset extent.
pub fn split_into_chunks(
    data: &[u8],
    dims: &[u64],
    chunk_dims: &[u64],
    element_size: usize,
) -> Result<Vec<(Vec<u64>, Vec<u8>)>> {
    let rank = dims.len();
    if chunk_dims.len() != rank || chunk_dims.contains(&0) {
        return Err(FormatError::InvalidInput(format!(
            "chunk shape {chunk_dims:?} does not fit a dataset of shape {dims:?}"
        )));
    }
    let total = element_count(dims).unwrap_or(u64::MAX);
    if byte_len(dims, element_size).ok() != Some(data.len()) {
        return Err(FormatError::InvalidInput(format!(
            "{} bytes of data for {total} elements of {element_size} bytes",
            data.len()
        )));
    }
    if rank == 0 {
        return Ok(vec![(Vec::new(), data.to_vec())]);
    }
    let grid: Vec<u64> = dims.iter().zip(chunk_dims).map(|(d, c)| d.div_ceil(*c)).collect();
    let data_strides = strides(dims);
    let chunk_strides = strides(chunk_dims);
    let chunk_len = byte_len(chunk_dims, element_size).map_err(|_| {
        FormatError::InvalidInput(format!("chunk shape {chunk_dims:?} is too large"))
    })?;
    let last = rank - 1;

    let mut out = Vec::new();
    if total == 0 {
        return Ok(out);
    }
    let mut cell = vec![0u64; rank];
    loop {
        let origin: Vec<u64> = cell.iter().zip(chunk_dims).map(|(g, c)| g * c).collect();
        let extent: Vec<u64> = (0..rank).map(|d| chunk_dims[d].min(dims[d] - origin[d])).collect();
        let mut chunk = vec![0u8; chunk_len];

        // copy one last-axis run per row of the overlap
        let run = extent[last] as usize * element_size;
        let mut row = vec![0u64; last];
        'rows: loop {
            let (mut src, mut dst) = (origin[last] * data_strides[last], 0u64);
            for d in 0..last {
                src += (origin[d] + row[d]) * data_strides[d];
                dst += row[d] * chunk_strides[d];
            }
            let (src, dst) = (src as usize * element_size, dst as usize * element_size);
            chunk[dst..dst + run].copy_from_slice(&data[src..src + run]);
            let mut d = last;
            loop {
                if d == 0 {
                    break 'rows;
                }
                d -= 1;
                row[d] += 1;
                if row[d] < extent[d] {
                    break;
                }
                row[d] = 0;
            }
        }
        out.push((origin, chunk));

        let mut d = rank;
        loop {
            if d == 0 {
                return Ok(out);
            }
            d -= 1;
            cell[d] += 1;
            if cell[d] < grid[d] {
                break;
            }
            cell[d] = 0;
        }
    }
}

/// Chunk data followed by its B-tree, laid out for one file region.
#[derive(Debug, Clone)]
pub struct ChunkedStorage {
    /// Region bytes, to be placed at the `base` given to [`build_chunked`].
    pub bytes: Vec<u8>,
    /// Root of the chunk tree, `None` for an empty dataset.
    pub btree_address: Option<u64>,
}

/// Filter every chunk and lay out the chunks then the chunk tree starting at
/// file address `base`.
pub fn build_chunked(
    data: &[u8],
    dims: &[u64],
    chunk_dims: &[u64],
    element_size: u32,
    pipeline: &FilterPipeline,
    offset_size: u8,
    base: u64,
) -> Result<ChunkedStorage> {
    let chunks = split_into_chunks(data, dims, chunk_dims, element_size as usize)?;
    if chunks.is_empty() {
        return Ok(ChunkedStorage {
            bytes: Vec::new(),
            btree_address: None,
        });
    }
    let mut bytes = Vec::new();
    let mut keys = Vec::with_capacity(chunks.len());
    for (origin, chunk) in &chunks {
        let (stored, mask) = if pipeline.is_empty() {
            (chunk.clone(), 0)
        } else {
            compress_chunk(chunk, pipeline, element_size)?
        };
        let size = u32::try_from(stored.len())
            .map_err(|_| FormatError::InvalidInput("chunk larger than 4 GiB".into()))?;
        let mut offsets = origin.clone();
        offsets.push(0);
        keys.push((
            ChunkKey {
                size,
                filter_mask: mask,
                offsets,
            },
            base + bytes.len() as u64,
        ));
        bytes.extend_from_slice(&stored);
    }

    let mut children = Vec::with_capacity(keys.len());
    for (i, (key, address)) in keys.iter().enumerate() {
        let right = match keys.get(i + 1) {
            Some((next, _)) => next.clone(),
            None => {
                let mut offsets: Vec<u64> =
                    key.offsets.iter().zip(chunk_dims).map(|(o, c)| o + c).collect();
                offsets.push(0);
                ChunkKey {
                    size: 0,
                    filter_mask: 0,
                    offsets,
                }
            }
        };
        children.push(BTreeV1Child {
            left_key: key.to_bytes(),
            right_key: right.to_bytes(),
            address: *address,
        });
    }
    let writer = BTreeV1Writer::new(
        KeyLayout::Chunk {
            dims: dims.len() + 1,
        },
        CHUNK_TREE_K,
        offset_size,
    );
    let (root, tree) = writer.serialize(&children, base + bytes.len() as u64)?;
    bytes.extend_from_slice(&tree);
    Ok(ChunkedStorage {
        bytes,
        btree_address: Some(root),
    })
}

/// Chunk shape used when the caller gives none: rows of at most about 64 KiB
/// and at least one element per axis.
pub fn default_chunk_dims(dims: &[u64], element_size: usize) -> Vec<u64> {
    const TARGET: u64 = 64 * 1024;
    let mut chunk: Vec<u64> = dims.iter().map(|&d| d.max(1)).collect();
    let mut bytes = element_count(&chunk)
        .and_then(|n| n.checked_mul(element_size as u64))
        .unwrap_or(u64::MAX);
    let mut d = 0;
    while bytes > TARGET && d < chunk.len() {
        let shrink = bytes.div_ceil(TARGET);
        let next = chunk[d].div_ceil(shrink).max(1);
        bytes = bytes / chunk[d] * next;
        chunk[d] = next;
        d += 1;
    }
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree_v1::collect_chunks;
    use crate::filters::decompress_chunk;

    #[test]
    fn splits_with_edge_padding() {
        let data: Vec<u8> = (0..9).collect();
        let chunks = split_into_chunks(&data, &[3, 3], &[2, 2], 1).unwrap();
        let origins: Vec<&[u64]> = chunks.iter().map(|(o, _)| o.as_slice()).collect();
        assert_eq!(origins, vec![&[0, 0][..], &[0, 2], &[2, 0], &[2, 2]]);
        assert_eq!(chunks[0].1, vec![0, 1, 3, 4]);
        assert_eq!(chunks[1].1, vec![2, 0, 5, 0]);
        assert_eq!(chunks[2].1, vec![6, 7, 0, 0]);
        assert_eq!(chunks[3].1, vec![8, 0, 0, 0]);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        assert!(split_into_chunks(&[0; 4], &[4], &[2, 2], 1).is_err());
        assert!(split_into_chunks(&[0; 4], &[4], &[0], 1).is_err());
        assert!(split_into_chunks(&[0; 3], &[4], &[2], 1).is_err());
    }

    #[test]
    fn chunk_tree_points_at_filtered_chunks() {
        let data: Vec<u8> = (0u32..64).flat_map(|v| v.to_le_bytes()).collect();
        let filters = ChunkFilters {
            shuffle: true,
            deflate: Some(6),
            ..Default::default()
        };
        let pipeline = filters.pipeline(4);
        let base = 0x400;
        let storage = build_chunked(&data, &[8, 8], &[4, 4], 4, &pipeline, 8, base).unwrap();

        let mut file = vec![0u8; base as usize];
        file.extend(&storage.bytes);
        let root = storage.btree_address.unwrap();
        let records = collect_chunks(&file, root, 8, 3).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[3].offsets, vec![4, 4]);

        let r = &records[1];
        let stored = &file[r.address as usize..r.address as usize + r.size as usize];
        let chunk = decompress_chunk(stored, &pipeline, r.filter_mask, 4, 64).unwrap();
        // chunk (0, 4): first row holds elements 4..8
        assert_eq!(&chunk[..4], &4u32.to_le_bytes());
        assert_eq!(&chunk[60..], &31u32.to_le_bytes());
    }

    #[test]
    fn default_chunks_stay_bounded() {
        assert_eq!(default_chunk_dims(&[10, 10], 8), vec![10, 10]);
        let big = default_chunk_dims(&[100_000, 16], 8);
        assert!(big[0] * big[1] * 8 <= 64 * 1024);
        assert_eq!(big[1], 16);
        assert_eq!(default_chunk_dims(&[0], 4), vec![1]);
    }
}
