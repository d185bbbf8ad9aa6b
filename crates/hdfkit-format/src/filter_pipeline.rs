//! HDF5 Filter Pipeline message parsing (message type 0x000B).

use crate::cursor::{ByteWriter, Cursor};
use crate::error::{FormatError, Result};

/// Well-known filter IDs.
pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;
pub const FILTER_SZIP: u16 = 4;
pub const FILTER_NBIT: u16 = 5;
pub const FILTER_SCALEOFFSET: u16 = 6;
/// LZF, registered by h5py.
pub const FILTER_LZF: u16 = 32000;

/// Filter flag: the filter may fail and be skipped for a chunk.
pub const FLAG_OPTIONAL: u16 = 0x0001;

/// HDF5 pipelines hold at most 32 filters (one filter-mask bit each).
const MAX_FILTERS: usize = 32;

/// Description of a single filter in a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescription {
    /// Filter identification value.
    pub filter_id: u16,
    /// Optional filter name.
    pub name: Option<String>,
    /// Filter flags (bit 0 = optional).
    pub flags: u16,
    /// Client data values passed to the filter.
    pub client_data: Vec<u32>,
}

impl FilterDescription {
    pub fn new(filter_id: u16, flags: u16, client_data: Vec<u32>) -> Self {
        FilterDescription {
            filter_id,
            name: None,
            flags,
            client_data,
        }
    }

    pub fn is_optional(&self) -> bool {
        self.flags & FLAG_OPTIONAL != 0
    }

    /// Human-readable filter name for summaries and errors.
    pub fn display_name(&self) -> String {
        match self.filter_id {
            FILTER_DEFLATE => "gzip".into(),
            FILTER_SHUFFLE => "shuffle".into(),
            FILTER_FLETCHER32 => "fletcher32".into(),
            FILTER_SZIP => "szip".into(),
            FILTER_NBIT => "nbit".into(),
            FILTER_SCALEOFFSET => "scaleoffset".into(),
            FILTER_LZF => "lzf".into(),
            id => self.name.clone().unwrap_or_else(|| format!("filter {id}")),
        }
    }
}

/// A filter pipeline consisting of one or more filters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterPipeline {
    /// Ordered list of filters, applied front to back when writing.
    pub filters: Vec<FilterDescription>,
}

impl FilterPipeline {
    /// Parse a filter pipeline message from raw message bytes.
    pub fn parse(data: &[u8]) -> Result<FilterPipeline> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        let count = c.read_u8()? as usize;
        if count > MAX_FILTERS {
            return Err(FormatError::corrupted(
                "filter pipeline",
                format!("{count} filters"),
            ));
        }
        match version {
            1 => c.skip(6)?,
            2 => {}
            v => {
                return Err(FormatError::UnsupportedVersion {
                    structure: "filter pipeline",
                    version: v,
                })
            }
        }

        let mut filters = Vec::with_capacity(count);
        for _ in 0..count {
            let filter_id = c.read_u16()?;
            // v2 omits the name length for predefined filters
            let name_length = if version == 1 || filter_id >= 256 {
                c.read_u16()? as usize
            } else {
                0
            };
            let flags = c.read_u16()?;
            let num_client_data = c.read_u16()? as usize;

            let name = if name_length > 0 {
                let raw = c.read_bytes(name_length)?;
                if version == 1 {
                    c.skip(name_length.next_multiple_of(8) - name_length)?;
                }
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                Some(String::from_utf8_lossy(&raw[..end]).into_owned())
            } else {
                None
            };

            let mut client_data = Vec::with_capacity(num_client_data);
            for _ in 0..num_client_data {
                client_data.push(c.read_u32()?);
            }
            if version == 1 && num_client_data % 2 == 1 {
                c.skip(4)?;
            }

            filters.push(FilterDescription {
                filter_id,
                name,
                flags,
                client_data,
            });
        }

        Ok(FilterPipeline { filters })
    }

    /// Serialize as a version-1 message.
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u8(1);
        w.write_u8(self.filters.len() as u8);
        w.write_zeros(6);

        for f in &self.filters {
            w.write_u16(f.filter_id);
            let name_len = f.name.as_ref().map(|n| n.len() + 1).unwrap_or(0);
            let padded = name_len.next_multiple_of(8);
            w.write_u16(padded as u16);
            w.write_u16(f.flags);
            w.write_u16(f.client_data.len() as u16);
            if let Some(name) = &f.name {
                w.write_bytes(name.as_bytes());
                w.write_zeros(padded - name.len());
            }
            for &val in &f.client_data {
                w.write_u32(val);
            }
            if f.client_data.len() % 2 == 1 {
                w.write_zeros(4);
            }
        }

        w.into_inner()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
