//! Raw element bytes for a selection, whatever the storage layout.

use crate::chunked_read::ChunkReader;
use crate::data_layout::DataLayout;
use crate::error::{FormatError, Result};
use crate::fill_value::FillValue;
use crate::filter_pipeline::FilterPipeline;
use crate::selection::{byte_len, gather, Hyperslab};

/// Storage-related messages of one dataset.
#[derive(Debug, Clone, Copy)]
pub struct StorageInfo<'m> {
    pub dims: &'m [u64],
    pub element_size: usize,
    pub layout: &'m DataLayout,
    pub pipeline: Option<&'m FilterPipeline>,
    pub fill: &'m FillValue,
}

/// Read the selected elements, row-major, as raw bytes.
///
/// The whole result is produced or an error returned; storage that was never
/// allocated reads as the fill value.
pub fn read_selection(
    file_data: &[u8],
    offset_size: u8,
    info: &StorageInfo<'_>,
    sel: &Hyperslab,
) -> Result<Vec<u8>> {
    sel.validate(info.dims)?;
    let elem = info.element_size;
    let total = byte_len(info.dims, elem)?;
    match info.layout {
        DataLayout::Compact { data } => {
            let data = data.get(..total).ok_or_else(|| {
                FormatError::corrupted(
                    "data layout",
                    format!("compact storage holds {} of {total} bytes", data.len()),
                )
            })?;
            gather(sel, info.dims, data, elem)
        }
        DataLayout::Contiguous { address: None, .. } => {
            info.fill.fill(sel.byte_len(elem)?, elem)
        }
        DataLayout::Contiguous {
            address: Some(address),
            size,
        } => {
            if let Some(size) = size {
                if (*size as usize) < total {
                    return Err(FormatError::corrupted(
                        "data layout",
                        format!("contiguous storage of {size} bytes for {total} bytes of data"),
                    ));
                }
            }
            let start = *address as usize;
            let region = start
                .checked_add(total)
                .and_then(|end| file_data.get(start..end))
                .ok_or_else(|| {
                    FormatError::corrupted(
                        "data layout",
                        format!("{total} bytes at {address:#x} run past end of file"),
                    )
                })?;
            gather(sel, info.dims, region, elem)
        }
        DataLayout::Chunked { element_size, .. } => {
            if *element_size as usize != elem {
                return Err(FormatError::corrupted(
                    "data layout",
                    format!("chunk element size {element_size} for a {elem}-byte datatype"),
                ));
            }
            ChunkReader::new(file_data, offset_size, info.dims, info.layout, info.pipeline)?
                .read(sel, info.fill)
        }
    }
}
