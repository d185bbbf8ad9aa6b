//! HDF5 Link message (type 0x0006): one named edge of a new-style group.

use crate::cursor::{ByteWriter, Cursor};
use crate::datatype::CharacterSet;
use crate::error::{FormatError, Result};

const FLAG_NAME_LENGTH_SIZE: u8 = 0x03;
const FLAG_CREATION_ORDER: u8 = 0x04;
const FLAG_LINK_TYPE: u8 = 0x08;
const FLAG_CHARSET: u8 = 0x10;

const LINK_TYPE_HARD: u8 = 0;
const LINK_TYPE_SOFT: u8 = 1;
const LINK_TYPE_EXTERNAL: u8 = 64;

/// What a link points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Hard { object_header_address: u64 },
    Soft { target_path: String },
    External { filename: String, object_path: String },
}

/// A parsed Link message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMessage {
    pub name: String,
    pub target: LinkTarget,
    pub creation_order: Option<u64>,
    pub charset: CharacterSet,
}

impl LinkMessage {
    pub fn hard(name: impl Into<String>, address: u64) -> Self {
        Self::with_target(
            name,
            LinkTarget::Hard {
                object_header_address: address,
            },
        )
    }

    pub fn soft(name: impl Into<String>, target_path: impl Into<String>) -> Self {
        Self::with_target(
            name,
            LinkTarget::Soft {
                target_path: target_path.into(),
            },
        )
    }

    pub fn external(
        name: impl Into<String>,
        filename: impl Into<String>,
        object_path: impl Into<String>,
    ) -> Self {
        Self::with_target(
            name,
            LinkTarget::External {
                filename: filename.into(),
                object_path: object_path.into(),
            },
        )
    }

    fn with_target(name: impl Into<String>, target: LinkTarget) -> Self {
        let name = name.into();
        let charset = if name.is_ascii() {
            CharacterSet::Ascii
        } else {
            CharacterSet::Utf8
        };
        LinkMessage {
            name,
            target,
            creation_order: None,
            charset,
        }
    }

    pub fn parse(data: &[u8], offset_size: u8) -> Result<Self> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                structure: "link message",
                version,
            });
        }
        let flags = c.read_u8()?;
        let link_type = if flags & FLAG_LINK_TYPE != 0 {
            c.read_u8()?
        } else {
            LINK_TYPE_HARD
        };
        let creation_order = if flags & FLAG_CREATION_ORDER != 0 {
            Some(c.read_u64()?)
        } else {
            None
        };
        let charset = if flags & FLAG_CHARSET != 0 {
            match c.read_u8()? {
                0 => CharacterSet::Ascii,
                1 => CharacterSet::Utf8,
                other => {
                    return Err(FormatError::corrupted(
                        "link message",
                        format!("unknown name character set {other}"),
                    ))
                }
            }
        } else {
            CharacterSet::Ascii
        };
        let name_len = c.read_uint(1 << (flags & FLAG_NAME_LENGTH_SIZE))? as usize;
        if name_len == 0 {
            return Err(FormatError::corrupted("link message", "empty link name"));
        }
        let name = String::from_utf8_lossy(c.read_bytes(name_len)?).into_owned();

        let target = match link_type {
            LINK_TYPE_HARD => LinkTarget::Hard {
                object_header_address: c.read_offset(offset_size)?,
            },
            LINK_TYPE_SOFT => {
                let len = c.read_u16()? as usize;
                LinkTarget::Soft {
                    target_path: String::from_utf8_lossy(c.read_bytes(len)?).into_owned(),
                }
            }
            LINK_TYPE_EXTERNAL => {
                let len = c.read_u16()? as usize;
                parse_external(c.read_bytes(len)?)?
            }
            other => {
                return Err(FormatError::UnsupportedFeature(format!(
                    "user-defined link type {other}"
                )))
            }
        };

        Ok(LinkMessage {
            name,
            target,
            creation_order,
            charset,
        })
    }

    pub fn serialize(&self, offset_size: u8) -> Vec<u8> {
        let name = self.name.as_bytes();
        let (size_code, width) = match name.len() {
            0..=0xFF => (0u8, 1usize),
            0x100..=0xFFFF => (1, 2),
            _ => (2, 4),
        };
        let mut flags = size_code;
        let link_type = match self.target {
            LinkTarget::Hard { .. } => LINK_TYPE_HARD,
            LinkTarget::Soft { .. } => LINK_TYPE_SOFT,
            LinkTarget::External { .. } => LINK_TYPE_EXTERNAL,
        };
        if link_type != LINK_TYPE_HARD {
            flags |= FLAG_LINK_TYPE;
        }
        if self.creation_order.is_some() {
            flags |= FLAG_CREATION_ORDER;
        }
        if self.charset == CharacterSet::Utf8 {
            flags |= FLAG_CHARSET;
        }

        let mut w = ByteWriter::new();
        w.write_u8(1);
        w.write_u8(flags);
        if link_type != LINK_TYPE_HARD {
            w.write_u8(link_type);
        }
        if let Some(order) = self.creation_order {
            w.write_u64(order);
        }
        if self.charset == CharacterSet::Utf8 {
            w.write_u8(1);
        }
        w.write_uint(name.len() as u64, width);
        w.write_bytes(name);
        match &self.target {
            LinkTarget::Hard {
                object_header_address,
            } => w.write_offset(*object_header_address, offset_size),
            LinkTarget::Soft { target_path } => {
                w.write_u16(target_path.len() as u16);
                w.write_bytes(target_path.as_bytes());
            }
            LinkTarget::External {
                filename,
                object_path,
            } => {
                w.write_u16((filename.len() + object_path.len() + 3) as u16);
                w.write_u8(0); // version 0, no flags
                w.write_bytes(filename.as_bytes());
                w.write_u8(0);
                w.write_bytes(object_path.as_bytes());
                w.write_u8(0);
            }
        }
        w.into_inner()
    }
}

fn parse_external(value: &[u8]) -> Result<LinkTarget> {
    let mut c = Cursor::new(value);
    let header = c.read_u8()?;
    if header >> 4 != 0 {
        return Err(FormatError::UnsupportedVersion {
            structure: "external link",
            version: header >> 4,
        });
    }
    let filename = String::from_utf8_lossy(c.read_cstring()?).into_owned();
    let object_path = String::from_utf8_lossy(c.read_cstring()?).into_owned();
    Ok(LinkTarget::External {
        filename,
        object_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_link_minimal_encoding() {
        let link = LinkMessage::hard("data", 0x320);
        let bytes = link.serialize(8);
        assert_eq!(&bytes[..3], &[1, 0, 4]);
        assert_eq!(bytes.len(), 3 + 4 + 8);
        assert_eq!(LinkMessage::parse(&bytes, 8).unwrap(), link);
    }

    #[test]
    fn soft_link_with_creation_order() {
        let mut link = LinkMessage::soft("self", "/g");
        link.creation_order = Some(7);
        let bytes = link.serialize(8);
        assert_eq!(bytes[1], FLAG_LINK_TYPE | FLAG_CREATION_ORDER);
        let parsed = LinkMessage::parse(&bytes, 8).unwrap();
        assert_eq!(parsed.creation_order, Some(7));
        assert_eq!(
            parsed.target,
            LinkTarget::Soft {
                target_path: "/g".into()
            }
        );
    }

    #[test]
    fn external_link() {
        let link = LinkMessage::external("ext", "other.h5", "/data");
        let bytes = link.serialize(4);
        let parsed = LinkMessage::parse(&bytes, 4).unwrap();
        assert_eq!(parsed, link);
    }

    #[test]
    fn utf8_name_sets_charset() {
        let link = LinkMessage::hard("température", 64);
        assert_eq!(link.charset, CharacterSet::Utf8);
        let bytes = link.serialize(8);
        assert_ne!(bytes[1] & FLAG_CHARSET, 0);
        assert_eq!(LinkMessage::parse(&bytes, 8).unwrap().name, "température");
    }

    #[test]
    fn long_name_uses_two_byte_length() {
        let name = "n".repeat(300);
        let bytes = LinkMessage::hard(name.clone(), 8).serialize(8);
        assert_eq!(bytes[1] & FLAG_NAME_LENGTH_SIZE, 1);
        assert_eq!(LinkMessage::parse(&bytes, 8).unwrap().name, name);
    }

    #[test]
    fn rejects_bad_version_and_user_defined_type() {
        assert!(matches!(
            LinkMessage::parse(&[2, 0], 8),
            Err(FormatError::UnsupportedVersion { .. })
        ));
        let bytes = [1, FLAG_LINK_TYPE, 65, 1, b'x', 0, 0];
        assert!(matches!(
            LinkMessage::parse(&bytes, 8),
            Err(FormatError::UnsupportedFeature(_))
        ));
    }

    #[test]
    fn truncated_target() {
        let bytes = LinkMessage::hard("x", 1).serialize(8);
        assert!(matches!(
            LinkMessage::parse(&bytes[..bytes.len() - 2], 8),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }
}
