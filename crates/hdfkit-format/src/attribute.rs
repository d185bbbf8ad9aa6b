//! Attribute message (type 0x000C), versions 1 to 3.
//!
//! Version 1 pads the name, datatype and dataspace fields to 8 bytes; later
//! versions pack them. Version 2 adds sharing flags and version 3 a name
//! character set. The raw value bytes are kept undecoded: interpreting them
//! (variable-length data in particular) needs the file.

use crate::cursor::{ByteWriter, Cursor};
use crate::dataspace::Dataspace;
use crate::datatype::{CharacterSet, Datatype};
use crate::error::{FormatError, Result};
use crate::object_header::SharedMessage;

const FLAG_DATATYPE_SHARED: u8 = 0x01;
const FLAG_DATASPACE_SHARED: u8 = 0x02;

/// A parsed attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMessage {
    pub name: String,
    pub charset: CharacterSet,
    pub datatype: Datatype,
    pub dataspace: Dataspace,
    /// `num_elements * datatype.size()` raw bytes.
    pub data: Vec<u8>,
}

impl AttributeMessage {
    pub fn new(name: impl Into<String>, datatype: Datatype, dataspace: Dataspace, data: Vec<u8>) -> Self {
        let name = name.into();
        let charset = if name.is_ascii() {
            CharacterSet::Ascii
        } else {
            CharacterSet::Utf8
        };
        AttributeMessage {
            name,
            charset,
            datatype,
            dataspace,
            data,
        }
    }

    /// Parse an attribute message. `resolve_shared` supplies the datatype of
    /// a committed (shared) type.
    pub fn parse(
        data: &[u8],
        offset_size: u8,
        length_size: u8,
        resolve_shared: &mut dyn FnMut(SharedMessage) -> Result<Datatype>,
    ) -> Result<Self> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        if !(1..=3).contains(&version) {
            return Err(FormatError::UnsupportedVersion {
                structure: "attribute message",
                version,
            });
        }
        let flags = c.read_u8()?;
        let name_size = c.read_u16()? as usize;
        let datatype_size = c.read_u16()? as usize;
        let dataspace_size = c.read_u16()? as usize;
        let charset = if version == 3 {
            match c.read_u8()? {
                0 => CharacterSet::Ascii,
                1 => CharacterSet::Utf8,
                other => {
                    return Err(FormatError::corrupted(
                        "attribute message",
                        format!("unknown name character set {other}"),
                    ))
                }
            }
        } else {
            CharacterSet::Ascii
        };
        let padded = |n: usize| if version == 1 { n.next_multiple_of(8) } else { n };

        let raw_name = c.read_bytes(padded(name_size))?;
        let name_bytes = &raw_name[..name_size];
        let name_end = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
        let name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();

        let dt_bytes = &c.read_bytes(padded(datatype_size))?[..datatype_size];
        let datatype = if flags & FLAG_DATATYPE_SHARED != 0 {
            resolve_shared(SharedMessage::parse(dt_bytes, offset_size)?)?
        } else {
            Datatype::parse(dt_bytes)?
        };
        if flags & FLAG_DATASPACE_SHARED != 0 {
            return Err(FormatError::UnsupportedFeature(format!(
                "shared dataspace in attribute {name:?}"
            )));
        }
        let ds_bytes = &c.read_bytes(padded(dataspace_size))?[..dataspace_size];
        let dataspace = Dataspace::parse(ds_bytes, length_size)?;

        let len = dataspace
            .num_elements()
            .checked_mul(datatype.size() as u64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| FormatError::corrupted("attribute message", "value size overflows"))?;
        let value = c.read_bytes(len).map_err(|_| {
            FormatError::corrupted(
                "attribute message",
                format!("attribute {name:?} holds {} of {len} value bytes", c.remaining()),
            )
        })?;

        Ok(AttributeMessage {
            name,
            charset,
            datatype,
            dataspace,
            data: value.to_vec(),
        })
    }

    /// Encode as version 1, or version 3 when the name needs UTF-8.
    pub fn serialize(&self, length_size: u8) -> Vec<u8> {
        let version = if self.charset == CharacterSet::Utf8 { 3 } else { 1 };
        let mut name = self.name.as_bytes().to_vec();
        name.push(0);
        let dt = self.datatype.to_bytes();
        let ds = if self.dataspace.space_type == crate::dataspace::DataspaceType::Null {
            self.dataspace.serialize_v2(length_size)
        } else {
            self.dataspace.serialize(length_size)
        };

        let mut w = ByteWriter::new();
        w.write_u8(version);
        w.write_u8(0);
        w.write_u16(name.len() as u16);
        w.write_u16(dt.len() as u16);
        w.write_u16(ds.len() as u16);
        if version == 3 {
            w.write_u8(1);
        }
        for field in [&name, &dt, &ds] {
            w.write_bytes(field);
            if version == 1 {
                w.write_zeros(field.len().next_multiple_of(8) - field.len());
            }
        }
        w.write_bytes(&self.data);
        w.into_inner()
    }
}
