//! HDF5 object header parsing (v1 and v2).
//!
//! A logical header may be split across several disjoint blocks linked by
//! continuation messages.  [`MessageIter`] follows those links as it goes and
//! yields one flat sequence of messages; [`ObjectHeader::parse`] collects it.

use std::collections::{HashSet, VecDeque};

use crate::checksum;
use crate::cursor::Cursor;
use crate::error::{FormatError, Result};
use crate::message_type::{MessageType, FLAG_MUST_UNDERSTAND};

const OHDR_SIGNATURE: [u8; 4] = *b"OHDR";
const OCHK_SIGNATURE: [u8; 4] = *b"OCHK";

/// v2 header flag: messages carry a 2-byte creation order.
const V2_ATTR_CREATION_ORDER: u8 = 0x04;
/// v2 header flag: compact/dense attribute thresholds are stored.
const V2_PHASE_CHANGE: u8 = 0x10;
/// v2 header flag: access/modification/change/birth times are stored.
const V2_TIMES: u8 = 0x20;

/// A message borrowed from the file bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMessage<'a> {
    pub msg_type: MessageType,
    pub flags: u8,
    pub creation_order: Option<u16>,
    pub data: &'a [u8],
}

/// A single parsed header message with owned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMessage {
    pub msg_type: MessageType,
    pub flags: u8,
    /// Creation order (v2 only, when tracking is enabled).
    pub creation_order: Option<u16>,
    pub data: Vec<u8>,
}

/// Fixed fields read from the first header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderPrefix {
    /// Header version (1 or 2).
    pub version: u8,
    /// v2 header flags; 0 for v1.
    pub flags: u8,
    /// Object reference count (v1; 1 for v2).
    pub reference_count: u32,
    /// Modification time in seconds since the epoch (v2 with times).
    pub modification_time: Option<u32>,
    /// (max compact, min dense) attribute thresholds (v2).
    pub attribute_phase_change: Option<(u16, u16)>,
}

/// Iterator over every message of one object header, across all blocks.
///
/// NIL messages are dropped and continuation messages are consumed to queue
/// the next block.  After the first error the iterator is fused.
#[derive(Debug)]
pub struct MessageIter<'a> {
    data: &'a [u8],
    offset_size: u8,
    length_size: u8,
    version: u8,
    creation_order: bool,
    pending: VecDeque<(u64, u64)>,
    current: Option<(usize, usize)>,
    remaining: Option<usize>,
    visited: HashSet<u64>,
    failed: bool,
}

impl<'a> MessageIter<'a> {
    /// Read the header prefix at `address` and prepare to walk its messages.
    pub fn new(
        data: &'a [u8],
        address: u64,
        offset_size: u8,
        length_size: u8,
    ) -> Result<(HeaderPrefix, MessageIter<'a>)> {
        let mut c = Cursor::at(data, address)?;
        let mut iter = MessageIter {
            data,
            offset_size,
            length_size,
            version: 1,
            creation_order: false,
            pending: VecDeque::new(),
            current: None,
            remaining: None,
            visited: HashSet::from([address]),
            failed: false,
        };

        if c.peek_bytes(4)? == OHDR_SIGNATURE {
            c.skip(4)?;
            let version = c.read_u8()?;
            if version != 2 {
                return Err(FormatError::UnsupportedVersion {
                    structure: "object header",
                    version,
                });
            }
            let flags = c.read_u8()?;
            let modification_time = if flags & V2_TIMES != 0 {
                let _access = c.read_u32()?;
                let modified = c.read_u32()?;
                let _change = c.read_u32()?;
                let _birth = c.read_u32()?;
                Some(modified)
            } else {
                None
            };
            let attribute_phase_change = if flags & V2_PHASE_CHANGE != 0 {
                Some((c.read_u16()?, c.read_u16()?))
            } else {
                None
            };
            let chunk0_size = c.read_uint(1 << (flags & 0x03))? as usize;
            let start = c.position();
            c.ensure(chunk0_size + 4)?;
            checksum::verify(data, address as usize, start + chunk0_size, "object header")?;

            iter.version = 2;
            iter.creation_order = flags & V2_ATTR_CREATION_ORDER != 0;
            iter.current = Some((start, start + chunk0_size));
            let prefix = HeaderPrefix {
                version: 2,
                flags,
                reference_count: 1,
                modification_time,
                attribute_phase_change,
            };
            return Ok((prefix, iter));
        }

        let version = c.read_u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                structure: "object header",
                version,
            });
        }
        c.skip(1)?;
        let num_messages = c.read_u16()? as usize;
        let reference_count = c.read_u32()?;
        let header_size = c.read_u32()? as usize;
        c.skip(4)?;
        let start = c.position();
        c.ensure(header_size)?;

        iter.remaining = Some(num_messages);
        iter.current = Some((start, start + header_size));
        let prefix = HeaderPrefix {
            version: 1,
            flags: 0,
            reference_count,
            modification_time: None,
            attribute_phase_change: None,
        };
        Ok((prefix, iter))
    }

    fn open_block(&mut self, address: u64, length: u64) -> Result<(usize, usize)> {
        let start = address as usize;
        let end = start
            .checked_add(length as usize)
            .filter(|&e| e <= self.data.len())
            .ok_or(FormatError::UnexpectedEof {
                at: start,
                needed: length as usize,
                available: self.data.len().saturating_sub(start),
            })?;
        if self.version == 1 {
            return Ok((start, end));
        }
        if length < 8 {
            return Err(FormatError::corrupted(
                "object header continuation",
                format!("block of {length} bytes"),
            ));
        }
        let mut c = Cursor::at(self.data, address)?;
        c.expect_signature(&OCHK_SIGNATURE, "object header continuation")?;
        checksum::verify(self.data, start, end - 4, "object header continuation")?;
        Ok((start + 4, end - 4))
    }

    fn step(&mut self) -> Result<Option<RawMessage<'a>>> {
        loop {
            if self.remaining == Some(0) {
                return Ok(None);
            }
            let Some((pos, end)) = self.current else {
                let Some((addr, len)) = self.pending.pop_front() else {
                    return Ok(None);
                };
                self.current = Some(self.open_block(addr, len)?);
                continue;
            };

            let header_len = match (self.version, self.creation_order) {
                (1, _) => 8,
                (_, true) => 6,
                (_, false) => 4,
            };
            if pos + header_len > end {
                // Trailing gap in a v2 block, or the end of a v1 block.
                self.current = None;
                continue;
            }

            let mut c = Cursor::at(self.data, pos as u64)?;
            let (raw_type, size, flags, creation_order) = if self.version == 1 {
                let t = c.read_u16()?;
                let s = c.read_u16()? as usize;
                let f = c.read_u8()?;
                c.skip(3)?;
                (t, s, f, None)
            } else {
                let t = c.read_u8()? as u16;
                let s = c.read_u16()? as usize;
                let f = c.read_u8()?;
                let co = if self.creation_order {
                    Some(c.read_u16()?)
                } else {
                    None
                };
                (t, s, f, co)
            };
            let body_start = c.position();
            if body_start + size > end {
                return Err(FormatError::corrupted(
                    "object header",
                    format!("message at {pos:#x} overruns its block"),
                ));
            }
            let body = &self.data[body_start..body_start + size];
            self.current = Some((body_start + size, end));
            if let Some(r) = self.remaining.as_mut() {
                *r -= 1;
            }

            let msg_type = MessageType::from_u16(raw_type);
            match msg_type {
                MessageType::Nil => continue,
                MessageType::Continuation => {
                    let mut mc = Cursor::new(body);
                    let addr = mc.read_offset(self.offset_size)?;
                    let len = mc.read_length(self.length_size)?;
                    if !self.visited.insert(addr) {
                        return Err(FormatError::corrupted(
                            "object header",
                            format!("continuation loop back to {addr:#x}"),
                        ));
                    }
                    self.pending.push_back((addr, len));
                    continue;
                }
                MessageType::Unknown(id) if flags & FLAG_MUST_UNDERSTAND != 0 => {
                    return Err(FormatError::UnsupportedMessage(id));
                }
                _ => {
                    return Ok(Some(RawMessage {
                        msg_type,
                        flags,
                        creation_order,
                        data: body,
                    }))
                }
            }
        }
    }
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<RawMessage<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(Some(m)) => Some(Ok(m)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Parsed HDF5 object header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHeader {
    /// File address of the header.
    pub address: u64,
    pub prefix: HeaderPrefix,
    /// All non-NIL, non-continuation messages in file order.
    pub messages: Vec<HeaderMessage>,
}

impl ObjectHeader {
    /// Parse an object header at `address`.
    pub fn parse(data: &[u8], address: u64, offset_size: u8, length_size: u8) -> Result<Self> {
        let (prefix, iter) = MessageIter::new(data, address, offset_size, length_size)?;
        let messages = iter
            .map(|m| {
                m.map(|m| HeaderMessage {
                    msg_type: m.msg_type,
                    flags: m.flags,
                    creation_order: m.creation_order,
                    data: m.data.to_vec(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ObjectHeader {
            address,
            prefix,
            messages,
        })
    }

    pub fn version(&self) -> u8 {
        self.prefix.version
    }

    /// First message of the given type.
    pub fn find(&self, ty: MessageType) -> Option<&HeaderMessage> {
        self.messages.iter().find(|m| m.msg_type == ty)
    }

    /// All messages of the given type, in order.
    pub fn find_all(&self, ty: MessageType) -> impl Iterator<Item = &HeaderMessage> {
        self.messages.iter().filter(move |m| m.msg_type == ty)
    }

    pub fn has(&self, ty: MessageType) -> bool {
        self.find(ty).is_some()
    }

    /// Required message of the given type.
    pub fn require(&self, ty: MessageType, name: &'static str) -> Result<&HeaderMessage> {
        self.find(ty).ok_or(FormatError::MissingMessage(name))
    }

    /// A header with a data layout message describes a dataset.
    pub fn is_dataset(&self) -> bool {
        self.has(MessageType::DataLayout)
    }

    /// Old-style groups carry a symbol table, new-style ones link info or links.
    pub fn is_group(&self) -> bool {
        self.has(MessageType::SymbolTable)
            || self.has(MessageType::LinkInfo)
            || self.has(MessageType::Link)
            || self.has(MessageType::GroupInfo)
    }
}

/// Reference stored in place of a message whose `FLAG_SHARED` bit is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedMessage {
    /// The real message lives in another object header (e.g. a committed datatype).
    ObjectHeader(u64),
    /// The message lives in the shared-message heap.
    SharedHeap([u8; 8]),
}

impl SharedMessage {
    pub fn parse(data: &[u8], offset_size: u8) -> Result<Self> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        let kind = c.read_u8()?;
        match version {
            1 => {
                c.skip(6)?;
                Ok(SharedMessage::ObjectHeader(c.read_offset(offset_size)?))
            }
            2 => Ok(SharedMessage::ObjectHeader(c.read_offset(offset_size)?)),
            3 => match kind {
                1 => Ok(SharedMessage::SharedHeap(c.read_array::<8>()?)),
                2 => Ok(SharedMessage::ObjectHeader(c.read_offset(offset_size)?)),
                other => Err(FormatError::corrupted(
                    "shared message",
                    format!("unknown sharing type {other}"),
                )),
            },
            v => Err(FormatError::UnsupportedVersion {
                structure: "shared message",
                version: v,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::ByteWriter;
    use crate::object_header_writer::ObjectHeaderWriter;

    fn continuation(addr: u64, len: u64) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u64(addr);
        w.write_u64(len);
        w.into_inner()
    }

    #[test]
    fn v1_header_messages_in_order() {
        let mut hw = ObjectHeaderWriter::new();
        hw.add_message(MessageType::Dataspace, vec![1, 2, 3]);
        hw.add_message(MessageType::Datatype, vec![4; 8]);
        let bytes = hw.serialize_v1();
        let hdr = ObjectHeader::parse(&bytes, 0, 8, 8).unwrap();
        assert_eq!(hdr.version(), 1);
        assert_eq!(hdr.messages.len(), 2);
        assert_eq!(hdr.messages[0].msg_type, MessageType::Dataspace);
        // v1 payloads are padded to 8 bytes
        assert_eq!(&hdr.messages[0].data[..3], &[1, 2, 3]);
        assert_eq!(hdr.messages[1].data, vec![4; 8]);
    }

    #[test]
    fn v1_continuation_is_followed() {
        // Block 2: raw v1 messages at the end of the buffer.
        let mut second = ByteWriter::new();
        second.write_u16(MessageType::Attribute.to_u16());
        second.write_u16(8);
        second.write_u8(0);
        second.write_zeros(3);
        second.write_bytes(b"attrattr");

        let mut hw = ObjectHeaderWriter::new();
        hw.add_message(MessageType::Dataspace, vec![9; 8]);
        let placeholder = hw.serialize_v1().len() + 24;
        hw.add_message(
            MessageType::Continuation,
            continuation(placeholder as u64, second.position() as u64),
        );
        let mut bytes = hw.serialize_v1();
        // Fix the total count: two in the first block, one in the second.
        bytes[2..4].copy_from_slice(&3u16.to_le_bytes());
        bytes.resize(placeholder, 0);
        bytes.extend_from_slice(second.as_slice());

        let hdr = ObjectHeader::parse(&bytes, 0, 8, 8).unwrap();
        let types: Vec<_> = hdr.messages.iter().map(|m| m.msg_type).collect();
        assert_eq!(types, vec![MessageType::Dataspace, MessageType::Attribute]);
        assert_eq!(hdr.messages[1].data, b"attrattr");
    }

    #[test]
    fn continuation_loop_is_rejected() {
        let mut hw = ObjectHeaderWriter::new();
        hw.add_message(MessageType::Continuation, continuation(0, 40));
        let bytes = hw.serialize_v1();
        let err = ObjectHeader::parse(&bytes, 0, 8, 8).unwrap_err();
        assert!(matches!(err, FormatError::Corrupted { .. }));
    }

    #[test]
    fn unknown_messages_are_skipped_unless_required() {
        let mut hw = ObjectHeaderWriter::new();
        hw.add_message(MessageType::Unknown(0x30), vec![0xAA; 16]);
        hw.add_message(MessageType::Dataspace, vec![1; 8]);
        let bytes = hw.serialize_v1();
        let hdr = ObjectHeader::parse(&bytes, 0, 8, 8).unwrap();
        assert!(hdr.has(MessageType::Dataspace));
        assert_eq!(hdr.messages.len(), 2);

        let mut hw = ObjectHeaderWriter::new();
        hw.add_message_with_flags(MessageType::Unknown(0x30), vec![0; 8], FLAG_MUST_UNDERSTAND);
        let bytes = hw.serialize_v1();
        assert_eq!(
            ObjectHeader::parse(&bytes, 0, 8, 8).unwrap_err(),
            FormatError::UnsupportedMessage(0x30)
        );
    }

    #[test]
    fn v2_header_with_checksum() {
        let mut hw = ObjectHeaderWriter::new();
        hw.add_message(MessageType::Link, vec![1, 2, 3, 4]);
        hw.add_message(MessageType::LinkInfo, vec![0; 18]);
        let mut bytes = hw.serialize_v2();
        let hdr = ObjectHeader::parse(&bytes, 0, 8, 8).unwrap();
        assert_eq!(hdr.version(), 2);
        assert!(hdr.is_group());
        assert_eq!(hdr.messages[0].data, vec![1, 2, 3, 4]);

        bytes[9] ^= 0xFF;
        assert!(matches!(
            ObjectHeader::parse(&bytes, 0, 8, 8),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn v2_continuation_block() {
        // OCHK block holding one link message.
        let mut ochk = ByteWriter::new();
        ochk.write_bytes(b"OCHK");
        ochk.write_u8(MessageType::Link.to_u16() as u8);
        ochk.write_u16(3);
        ochk.write_u8(0);
        ochk.write_bytes(&[7, 7, 7]);
        let sum = checksum::jenkins_lookup3(ochk.as_slice());
        ochk.write_u32(sum);

        let mut hw = ObjectHeaderWriter::new();
        hw.add_message(MessageType::Continuation, continuation(0, 0));
        let probe = hw.serialize_v2();
        let at = probe.len() as u64;
        let mut hw = ObjectHeaderWriter::new();
        hw.add_message(
            MessageType::Continuation,
            continuation(at, ochk.position() as u64),
        );
        let mut bytes = hw.serialize_v2();
        bytes.extend_from_slice(ochk.as_slice());

        let hdr = ObjectHeader::parse(&bytes, 0, 8, 8).unwrap();
        assert_eq!(hdr.messages.len(), 1);
        assert_eq!(hdr.messages[0].msg_type, MessageType::Link);
        assert_eq!(hdr.messages[0].data, vec![7, 7, 7]);
    }

    #[test]
    fn bad_version_is_reported() {
        let mut bytes = ObjectHeaderWriter::new().serialize_v1();
        bytes[0] = 3;
        assert_eq!(
            ObjectHeader::parse(&bytes, 0, 8, 8).unwrap_err(),
            FormatError::UnsupportedVersion {
                structure: "object header",
                version: 3
            }
        );
    }

    #[test]
    fn shared_message_references() {
        let mut w = ByteWriter::new();
        w.write_u8(3);
        w.write_u8(2);
        w.write_u64(0x1234);
        assert_eq!(
            SharedMessage::parse(w.as_slice(), 8).unwrap(),
            SharedMessage::ObjectHeader(0x1234)
        );
        let mut w = ByteWriter::new();
        w.write_u8(1);
        w.write_u8(0);
        w.write_zeros(6);
        w.write_u64(0x40);
        assert_eq!(
            SharedMessage::parse(w.as_slice(), 8).unwrap(),
            SharedMessage::ObjectHeader(0x40)
        );
    }
}
