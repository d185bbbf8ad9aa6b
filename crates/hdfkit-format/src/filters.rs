//! HDF5 filter implementations: deflate, shuffle, fletcher32 and LZF.
//!
//! Reading applies the pipeline back to front; writing front to back.  Bit
//! `i` of a chunk's filter mask marks filter `i` as skipped for that chunk.

use crate::error::{FormatError, Result};
use crate::filter_pipeline::{
    FilterDescription, FilterPipeline, FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_LZF,
    FILTER_NBIT, FILTER_SCALEOFFSET, FILTER_SHUFFLE, FILTER_SZIP,
};
use crate::lzf;

/// Undo a filter pipeline on one stored chunk.
///
/// `expected_len` is the unfiltered chunk size in bytes, used to size
/// buffers and to check the final result.
pub fn decompress_chunk(
    stored: &[u8],
    pipeline: &FilterPipeline,
    filter_mask: u32,
    element_size: u32,
    expected_len: usize,
) -> Result<Vec<u8>> {
    let mut data = stored.to_vec();

    for (i, filter) in pipeline.filters.iter().enumerate().rev() {
        if i < 32 && filter_mask & (1 << i) != 0 {
            continue;
        }
        data = match filter.filter_id {
            FILTER_SHUFFLE => unshuffle(&data, shuffle_width(filter, element_size))?,
            // a checksum stage below the deflate stage leaves 4 bytes on top
            FILTER_DEFLATE => deflate_decompress(&data, expected_len.saturating_add(4))?,
            FILTER_FLETCHER32 => fletcher32_verify(&data)?,
            FILTER_LZF => lzf::decompress(&data, expected_len)?,
            other => return Err(unsupported(filter, other)),
        };
    }

    if data.len() != expected_len {
        return Err(FormatError::FilterFailed {
            filter: "pipeline",
            reason: format!(
                "chunk decoded to {} bytes, expected {expected_len}",
                data.len()
            ),
        });
    }
    Ok(data)
}

/// Apply a filter pipeline to one chunk.
///
/// Returns the stored bytes and the filter mask to record with the chunk.
/// An optional filter that cannot shrink the data is skipped and its mask
/// bit set.
pub fn compress_chunk(
    data: &[u8],
    pipeline: &FilterPipeline,
    element_size: u32,
) -> Result<(Vec<u8>, u32)> {
    let mut result = data.to_vec();
    let mut mask = 0u32;

    for (i, filter) in pipeline.filters.iter().enumerate() {
        result = match filter.filter_id {
            FILTER_SHUFFLE => shuffle(&result, shuffle_width(filter, element_size))?,
            FILTER_DEFLATE => {
                let level = filter.client_data.first().copied().unwrap_or(6);
                deflate_compress(&result, level)?
            }
            FILTER_FLETCHER32 => fletcher32_append(&result),
            FILTER_LZF => match lzf::compress(&result) {
                Some(packed) => packed,
                None if filter.is_optional() => {
                    mask |= 1 << i;
                    result
                }
                None => {
                    return Err(FormatError::FilterFailed {
                        filter: "lzf",
                        reason: "data is incompressible".into(),
                    })
                }
            },
            other => return Err(unsupported(filter, other)),
        };
    }

    Ok((result, mask))
}

/// Reject a pipeline up front if any filter has no implementation here.
pub fn check_supported(pipeline: &FilterPipeline) -> Result<()> {
    for filter in &pipeline.filters {
        match filter.filter_id {
            FILTER_SHUFFLE | FILTER_DEFLATE | FILTER_FLETCHER32 | FILTER_LZF => {}
            other => return Err(unsupported(filter, other)),
        }
    }
    Ok(())
}

fn unsupported(filter: &FilterDescription, id: u16) -> FormatError {
    match id {
        FILTER_SZIP | FILTER_NBIT | FILTER_SCALEOFFSET => {
            FormatError::UnsupportedFeature(format!("{} filter", filter.display_name()))
        }
        #[cfg(not(feature = "deflate"))]
        FILTER_DEFLATE => {
            FormatError::UnsupportedFeature("gzip filter (built without deflate)".into())
        }
        other => FormatError::UnsupportedFilter(other),
    }
}

fn shuffle_width(filter: &FilterDescription, element_size: u32) -> usize {
    filter
        .client_data
        .first()
        .copied()
        .filter(|&w| w > 0)
        .unwrap_or(element_size) as usize
}

/// Decompress zlib-compressed data, inflating at most `limit` bytes.
#[cfg(feature = "deflate")]
fn deflate_decompress(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    use std::io::Read;
    let decoder = flate2::read::ZlibDecoder::new(data);
    let mut result = Vec::with_capacity(limit.min(data.len().saturating_mul(4)));
    decoder
        .take(limit as u64 + 1)
        .read_to_end(&mut result)
        .map_err(|e| FormatError::FilterFailed {
            filter: "gzip",
            reason: e.to_string(),
        })?;
    if result.len() > limit {
        return Err(FormatError::FilterFailed {
            filter: "gzip",
            reason: format!("chunk inflates past {limit} bytes"),
        });
    }
    Ok(result)
}

#[cfg(not(feature = "deflate"))]
fn deflate_decompress(_data: &[u8], _limit: usize) -> Result<Vec<u8>> {
    Err(FormatError::UnsupportedFeature(
        "gzip filter (built without deflate)".into(),
    ))
}

/// Compress data with zlib.
#[cfg(feature = "deflate")]
fn deflate_compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    use std::io::Write;
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::new(level.min(9)));
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| FormatError::FilterFailed {
            filter: "gzip",
            reason: e.to_string(),
        })
}

#[cfg(not(feature = "deflate"))]
fn deflate_compress(_data: &[u8], _level: u32) -> Result<Vec<u8>> {
    Err(FormatError::UnsupportedFeature(
        "gzip filter (built without deflate)".into(),
    ))
}

/// Unshuffle: on disk all byte-0s of each element come first, then all
/// byte-1s, and so on.  Trailing bytes that do not fill an element are
/// stored unshuffled.
fn unshuffle(data: &[u8], element_size: usize) -> Result<Vec<u8>> {
    if element_size <= 1 {
        return Ok(data.to_vec());
    }
    let n = data.len() / element_size;
    let mut result = data.to_vec();
    for i in 0..n {
        for j in 0..element_size {
            result[i * element_size + j] = data[j * n + i];
        }
    }
    Ok(result)
}

/// Shuffle: group bytes by position within each element.
fn shuffle(data: &[u8], element_size: usize) -> Result<Vec<u8>> {
    if element_size <= 1 {
        return Ok(data.to_vec());
    }
    let n = data.len() / element_size;
    let mut result = data.to_vec();
    for i in 0..n {
        for j in 0..element_size {
            result[j * n + i] = data[i * element_size + j];
        }
    }
    Ok(result)
}

/// HDF5's Fletcher32 over big-endian 16-bit words, folding every 360 words.
pub fn fletcher32(data: &[u8]) -> u32 {
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;
    let fold = |s: u32| (s & 0xffff) + (s >> 16);

    let mut words = data.chunks_exact(2);
    loop {
        let mut n = 0;
        for w in words.by_ref().take(360) {
            sum1 += ((w[0] as u32) << 8) | w[1] as u32;
            sum2 += sum1;
            n += 1;
        }
        if n == 0 {
            break;
        }
        sum1 = fold(sum1);
        sum2 = fold(sum2);
    }
    if let [last] = words.remainder() {
        sum1 += (*last as u32) << 8;
        sum2 += sum1;
        sum1 = fold(sum1);
        sum2 = fold(sum2);
    }
    sum1 = fold(sum1);
    sum2 = fold(sum2);
    (sum2 << 16) | sum1
}

/// Verify the trailing Fletcher32 checksum and strip it.
fn fletcher32_verify(data: &[u8]) -> Result<Vec<u8>> {
    let Some(split) = data.len().checked_sub(4) else {
        return Err(FormatError::FilterFailed {
            filter: "fletcher32",
            reason: "data too short for checksum".into(),
        });
    };
    let (payload, tail) = data.split_at(split);
    let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    let computed = fletcher32(payload);
    // files from old library versions stored the checksum byte-swapped per half
    let legacy = ((computed & 0x00ff_00ff) << 8) | ((computed & 0xff00_ff00) >> 8);
    if stored != computed && stored != legacy {
        return Err(FormatError::ChecksumMismatch {
            structure: "fletcher32 chunk",
            stored,
            computed,
        });
    }
    Ok(payload.to_vec())
}

fn fletcher32_append(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len() + 4);
    result.extend_from_slice(data);
    result.extend_from_slice(&fletcher32(data).to_le_bytes());
    result
}
