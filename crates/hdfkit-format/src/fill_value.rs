//! Fill value messages (old type 0x0004 and new type 0x0005).

use crate::cursor::{ByteWriter, Cursor};
use crate::error::{FormatError, Result};
use crate::selection::zeroed;

/// Parsed fill value. `value` is `None` when no fill value is defined, in
/// which case unwritten storage reads as zeros.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FillValue {
    pub value: Option<Vec<u8>>,
}

impl FillValue {
    /// Parse the deprecated fill value message: size followed by raw bytes.
    pub fn parse_old(data: &[u8]) -> Result<FillValue> {
        let mut c = Cursor::new(data);
        let size = c.read_u32()? as usize;
        let value = (size > 0).then(|| c.read_bytes(size).map(<[u8]>::to_vec)).transpose()?;
        Ok(FillValue { value })
    }

    /// Parse the fill value message, versions 1 through 3.
    pub fn parse(data: &[u8]) -> Result<FillValue> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        let defined = match version {
            1 | 2 => {
                c.skip(2)?; // allocation time, write time
                let defined = c.read_u8()? != 0;
                if version == 2 && !defined {
                    return Ok(FillValue::default());
                }
                defined
            }
            3 => {
                let flags = c.read_u8()?;
                if flags & 0x20 == 0 {
                    return Ok(FillValue::default());
                }
                true
            }
            v => {
                return Err(FormatError::UnsupportedVersion {
                    structure: "fill value",
                    version: v,
                })
            }
        };
        let size = c.read_u32()? as usize;
        let raw = c.read_bytes(size)?;
        Ok(FillValue {
            value: (defined && size > 0).then(|| raw.to_vec()),
        })
    }

    /// Serialize as a version-2 message with early allocation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u8(2);
        w.write_u8(1); // allocation time: early
        w.write_u8(0); // write time: on allocation
        match &self.value {
            Some(v) => {
                w.write_u8(1);
                w.write_u32(v.len() as u32);
                w.write_bytes(v);
            }
            None => w.write_u8(0),
        }
        w.into_inner()
    }

    /// Produce `len` bytes of fill for an element of `element_size` bytes.
    pub fn fill(&self, len: usize, element_size: usize) -> Result<Vec<u8>> {
        let mut buf = zeroed(len)?;
        if let Some(v) = &self.value {
            if v.len() == element_size && v.iter().any(|&b| b != 0) {
                for elem in buf.chunks_mut(element_size) {
                    elem.copy_from_slice(&v[..elem.len()]);
                }
            }
        }
        Ok(buf)
    }
}
