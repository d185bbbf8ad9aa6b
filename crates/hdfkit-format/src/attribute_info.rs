//! Attribute Info message (type 0x0015) and collection of an object's
//! attributes from compact and dense storage.
//!
//! Dense attributes live as attribute messages in a fractal heap indexed by a
//! v2 B-tree of type 8 (name) or 9 (creation order).

use crate::attribute::AttributeMessage;
use crate::btree_v2::{AttributeRecord, BTreeV2};
use crate::cursor::{ByteWriter, Cursor};
use crate::datatype::Datatype;
use crate::error::{FormatError, Result};
use crate::fractal_heap::FractalHeap;
use crate::message_type::{MessageType, FLAG_SHARED};
use crate::object_header::{ObjectHeader, SharedMessage};

const AINFO_TRACK_ORDER: u8 = 0x01;
const AINFO_INDEX_ORDER: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttributeInfoMessage {
    pub max_creation_index: Option<u16>,
    pub fractal_heap_address: Option<u64>,
    pub name_index_address: Option<u64>,
    pub creation_order_index_address: Option<u64>,
}

impl AttributeInfoMessage {
    pub fn parse(data: &[u8], offset_size: u8) -> Result<Self> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "attribute info message",
                version,
            });
        }
        let flags = c.read_u8()?;
        let max_creation_index = if flags & AINFO_TRACK_ORDER != 0 {
            Some(c.read_u16()?)
        } else {
            None
        };
        let fractal_heap_address = c.read_address(offset_size)?;
        let name_index_address = c.read_address(offset_size)?;
        let creation_order_index_address = if flags & AINFO_INDEX_ORDER != 0 {
            c.read_address(offset_size)?
        } else {
            None
        };
        Ok(AttributeInfoMessage {
            max_creation_index,
            fractal_heap_address,
            name_index_address,
            creation_order_index_address,
        })
    }

    pub fn serialize(&self, offset_size: u8) -> Vec<u8> {
        let mut flags = 0;
        if self.max_creation_index.is_some() {
            flags |= AINFO_TRACK_ORDER;
        }
        if self.creation_order_index_address.is_some() {
            flags |= AINFO_INDEX_ORDER;
        }
        let mut w = ByteWriter::new();
        w.write_u8(0);
        w.write_u8(flags);
        if let Some(n) = self.max_creation_index {
            w.write_u16(n);
        }
        for addr in [self.fractal_heap_address, self.name_index_address] {
            match addr {
                Some(a) => w.write_offset(a, offset_size),
                None => w.write_undefined(offset_size),
            }
        }
        if let Some(a) = self.creation_order_index_address {
            w.write_offset(a, offset_size);
        }
        w.into_inner()
    }
}

/// Every attribute of an object, compact ones first, then dense ones.
///
/// The outer error means the attribute index itself is unreadable; each
/// inner result stands alone so one bad attribute does not hide the rest.
pub fn collect_attributes(
    file_data: &[u8],
    header: &ObjectHeader,
    offset_size: u8,
    length_size: u8,
    resolve_shared: &mut dyn FnMut(SharedMessage) -> Result<Datatype>,
) -> Result<Vec<Result<AttributeMessage>>> {
    let mut out = Vec::new();
    for msg in header.find_all(MessageType::Attribute) {
        out.push(if msg.flags & FLAG_SHARED != 0 {
            Err(FormatError::UnsupportedFeature(
                "attribute stored in the shared-message heap".into(),
            ))
        } else {
            AttributeMessage::parse(&msg.data, offset_size, length_size, resolve_shared)
        });
    }

    let Some(info_msg) = header.find(MessageType::AttributeInfo) else {
        return Ok(out);
    };
    let info = AttributeInfoMessage::parse(&info_msg.data, offset_size)?;
    let Some(heap_addr) = info.fractal_heap_address else {
        return Ok(out);
    };
    let heap = FractalHeap::parse(file_data, heap_addr, offset_size, length_size)?;
    let index = info
        .creation_order_index_address
        .or(info.name_index_address)
        .ok_or(FormatError::UndefinedAddress("attribute name index"))?;
    let tree = BTreeV2::parse(file_data, index, offset_size, length_size)?;
    for record in tree.records(file_data)? {
        out.push(
            AttributeRecord::parse(record, tree.tree_type)
                .and_then(|r| heap.read_object(file_data, &r.heap_id))
                .and_then(|bytes| {
                    AttributeMessage::parse(&bytes, offset_size, length_size, resolve_shared)
                }),
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree_v2::TYPE_ATTRIBUTE_NAME;
    use crate::checksum::jenkins_lookup3;
    use crate::dataspace::Dataspace;
    use crate::object_header_writer::ObjectHeaderWriter;
    use crate::testkit::{BTreeV2Builder, FileImage, FractalHeapBuilder};

    fn no_shared(_: SharedMessage) -> Result<Datatype> {
        Err(FormatError::UnsupportedFeature("shared".into()))
    }

    fn int_attr(name: &str, v: i32) -> AttributeMessage {
        AttributeMessage::new(
            name,
            Datatype::integer(4, true),
            Dataspace::scalar(),
            v.to_le_bytes().to_vec(),
        )
    }

    #[test]
    fn info_message_round_trip() {
        let info = AttributeInfoMessage {
            max_creation_index: Some(3),
            fractal_heap_address: Some(0x100),
            name_index_address: Some(0x200),
            creation_order_index_address: None,
        };
        let bytes = info.serialize(8);
        assert_eq!(AttributeInfoMessage::parse(&bytes, 8).unwrap(), info);
    }

    #[test]
    fn compact_attributes_skip_individually() {
        let mut hw = ObjectHeaderWriter::new();
        hw.add_message(MessageType::Attribute, int_attr("a", 1).serialize(8));
        hw.add_message(MessageType::Attribute, vec![9, 0, 0, 0]);
        hw.add_message(MessageType::Attribute, int_attr("c", 3).serialize(8));
        let bytes = hw.serialize_v1();
        let header = ObjectHeader::parse(&bytes, 0, 8, 8).unwrap();
        let attrs = collect_attributes(&bytes, &header, 8, 8, &mut no_shared).unwrap();
        assert_eq!(attrs.len(), 3);
        assert_eq!(attrs[0].as_ref().unwrap().name, "a");
        assert!(attrs[1].is_err());
        assert_eq!(attrs[2].as_ref().unwrap().data, 3i32.to_le_bytes());
    }

    #[test]
    fn dense_attributes() {
        let attrs: Vec<AttributeMessage> = (0..6).map(|i| int_attr(&format!("attr{i}"), i)).collect();
        let messages: Vec<Vec<u8>> = attrs.iter().map(|a| a.serialize(8)).collect();
        let mut img = FileImage::new(64);
        let (heap_addr, ids) = FractalHeapBuilder::new(4, 512, 512).build_direct(&mut img, &messages);
        let records: Vec<Vec<u8>> = attrs
            .iter()
            .zip(&ids)
            .enumerate()
            .map(|(i, (a, id))| {
                let mut w = ByteWriter::new();
                let mut heap_id = id.clone();
                heap_id.resize(8, 0);
                w.write_bytes(&heap_id);
                w.write_u8(0);
                w.write_u32(i as u32);
                w.write_u32(jenkins_lookup3(a.name.as_bytes()));
                w.into_inner()
            })
            .collect();
        let tree = BTreeV2Builder::new(TYPE_ATTRIBUTE_NAME, 512, 17, 4).build(&mut img, &records, 0);
        let info = AttributeInfoMessage {
            fractal_heap_address: Some(heap_addr),
            name_index_address: Some(tree),
            ..Default::default()
        };
        let mut hw = ObjectHeaderWriter::new();
        hw.add_message(MessageType::AttributeInfo, info.serialize(8));
        let header_bytes = hw.serialize_v2();
        let header_addr = img.alloc(&header_bytes);
        let header = ObjectHeader::parse(&img.bytes, header_addr, 8, 8).unwrap();

        let got = collect_attributes(&img.bytes, &header, 8, 8, &mut no_shared).unwrap();
        let got: Vec<AttributeMessage> = got.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(got, attrs);
    }
}
