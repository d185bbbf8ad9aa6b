//! New-style groups: link messages stored in the object header (compact) or
//! in a fractal heap indexed by a v2 B-tree (dense).

use crate::btree_v2::{BTreeV2, CreationOrderRecord, LinkNameRecord, TYPE_LINK_CREATION_ORDER, TYPE_LINK_NAME};
use crate::checksum::jenkins_lookup3;
use crate::error::{FormatError, Result};
use crate::fractal_heap::FractalHeap;
use crate::group_v1;
use crate::link_info::LinkInfoMessage;
use crate::link_message::LinkMessage;
use crate::message_type::MessageType;
use crate::object_header::ObjectHeader;
use crate::symbol_table::SymbolTableMessage;

/// How a group header stores its links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStorage {
    SymbolTable(SymbolTableMessage),
    Compact,
    Dense(LinkInfoMessage),
}

impl GroupStorage {
    /// Classify a group header. Fails with `MissingMessage` for non-groups.
    pub fn of(header: &ObjectHeader, offset_size: u8) -> Result<Self> {
        if let Some(msg) = header.find(MessageType::SymbolTable) {
            return Ok(GroupStorage::SymbolTable(SymbolTableMessage::parse(
                &msg.data,
                offset_size,
            )?));
        }
        if let Some(msg) = header.find(MessageType::LinkInfo) {
            let info = LinkInfoMessage::parse(&msg.data, offset_size)?;
            return Ok(if info.is_dense() {
                GroupStorage::Dense(info)
            } else {
                GroupStorage::Compact
            });
        }
        if header.has(MessageType::Link) || header.has(MessageType::GroupInfo) {
            return Ok(GroupStorage::Compact);
        }
        Err(FormatError::MissingMessage("symbol table or link info"))
    }

    pub fn name(&self) -> &'static str {
        match self {
            GroupStorage::SymbolTable(_) => "symbol table",
            GroupStorage::Compact => "compact",
            GroupStorage::Dense(_) => "dense",
        }
    }
}

/// Every link of the group described by `header`.
///
/// Compact links keep header order; dense links come in creation order when
/// that index exists and in name-hash order otherwise.
pub fn read_links(
    file_data: &[u8],
    header: &ObjectHeader,
    offset_size: u8,
    length_size: u8,
) -> Result<Vec<LinkMessage>> {
    match GroupStorage::of(header, offset_size)? {
        GroupStorage::SymbolTable(stab) => {
            group_v1::read_links(file_data, &stab, offset_size, length_size)
        }
        GroupStorage::Compact => compact_links(header, offset_size),
        GroupStorage::Dense(info) => dense_links(file_data, &info, offset_size, length_size),
    }
}

/// Look up a single link by name.
pub fn find_link(
    file_data: &[u8],
    header: &ObjectHeader,
    name: &str,
    offset_size: u8,
    length_size: u8,
) -> Result<Option<LinkMessage>> {
    match GroupStorage::of(header, offset_size)? {
        GroupStorage::SymbolTable(stab) => {
            group_v1::find_link(file_data, &stab, name, offset_size, length_size)
        }
        GroupStorage::Compact => {
            Ok(compact_links(header, offset_size)?.into_iter().find(|l| l.name == name))
        }
        GroupStorage::Dense(info) => {
            find_dense_link(file_data, &info, name, offset_size, length_size)
        }
    }
}

fn compact_links(header: &ObjectHeader, offset_size: u8) -> Result<Vec<LinkMessage>> {
    header
        .find_all(MessageType::Link)
        .map(|m| LinkMessage::parse(&m.data, offset_size))
        .collect()
}

fn dense_links(
    file_data: &[u8],
    info: &LinkInfoMessage,
    offset_size: u8,
    length_size: u8,
) -> Result<Vec<LinkMessage>> {
    let (heap, tree) = open_dense(file_data, info, offset_size, length_size, true)?;
    let mut links = Vec::with_capacity(tree.total_records as usize);
    for record in tree.records(file_data)? {
        let heap_id = match tree.tree_type {
            TYPE_LINK_NAME => LinkNameRecord::parse(record)?.heap_id,
            TYPE_LINK_CREATION_ORDER => CreationOrderRecord::parse(record)?.heap_id,
            other => {
                return Err(FormatError::corrupted(
                    "link index",
                    format!("unexpected v2 B-tree record type {other}"),
                ))
            }
        };
        let bytes = heap.read_object(file_data, &heap_id)?;
        links.push(LinkMessage::parse(&bytes, offset_size)?);
    }
    Ok(links)
}

fn find_dense_link(
    file_data: &[u8],
    info: &LinkInfoMessage,
    name: &str,
    offset_size: u8,
    length_size: u8,
) -> Result<Option<LinkMessage>> {
    let (heap, tree) = open_dense(file_data, info, offset_size, length_size, false)?;
    let hash = jenkins_lookup3(name.as_bytes());
    for record in tree.records(file_data)? {
        let record = LinkNameRecord::parse(record)?;
        if record.hash != hash {
            continue;
        }
        let link = LinkMessage::parse(&heap.read_object(file_data, &record.heap_id)?, offset_size)?;
        if link.name == name {
            return Ok(Some(link));
        }
    }
    Ok(None)
}

fn open_dense(
    file_data: &[u8],
    info: &LinkInfoMessage,
    offset_size: u8,
    length_size: u8,
    prefer_creation_order: bool,
) -> Result<(FractalHeap, BTreeV2)> {
    let heap_addr = info
        .fractal_heap_address
        .ok_or(FormatError::UndefinedAddress("link fractal heap"))?;
    let heap = FractalHeap::parse(file_data, heap_addr, offset_size, length_size)?;
    let index = if prefer_creation_order {
        info.creation_order_index_address.or(info.name_index_address)
    } else {
        info.name_index_address
    };
    let index = index.ok_or(FormatError::UndefinedAddress("link name index"))?;
    let tree = BTreeV2::parse(file_data, index, offset_size, length_size)?;
    Ok((heap, tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::ByteWriter;
    use crate::link_message::LinkTarget;
    use crate::object_header_writer::ObjectHeaderWriter;
    use crate::testkit::{BTreeV2Builder, FileImage, FractalHeapBuilder};

    fn header_with(messages: Vec<(MessageType, Vec<u8>)>) -> ObjectHeader {
        let mut hw = ObjectHeaderWriter::new();
        for (t, d) in messages {
            hw.add_message(t, d);
        }
        ObjectHeader::parse(&hw.serialize_v2(), 0, 8, 8).unwrap()
    }

    #[test]
    fn compact_group_with_mixed_links() {
        let header = header_with(vec![
            (MessageType::LinkInfo, LinkInfoMessage::default().serialize(8)),
            (MessageType::GroupInfo, vec![0, 0]),
            (MessageType::Link, LinkMessage::hard("data", 0x200).serialize(8)),
            (MessageType::Link, LinkMessage::soft("alias", "/data").serialize(8)),
            (
                MessageType::Link,
                LinkMessage::external("far", "other.h5", "/x").serialize(8),
            ),
        ]);
        assert_eq!(GroupStorage::of(&header, 8).unwrap(), GroupStorage::Compact);
        let links = read_links(&[], &header, 8, 8).unwrap();
        assert_eq!(links.len(), 3);
        let far = find_link(&[], &header, "far", 8, 8).unwrap().unwrap();
        assert_eq!(
            far.target,
            LinkTarget::External {
                filename: "other.h5".into(),
                object_path: "/x".into()
            }
        );
        assert_eq!(find_link(&[], &header, "missing", 8, 8).unwrap(), None);
    }

    #[test]
    fn non_group_header() {
        let header = header_with(vec![(MessageType::Dataspace, vec![1, 0, 0, 0])]);
        assert_eq!(
            GroupStorage::of(&header, 8),
            Err(FormatError::MissingMessage("symbol table or link info"))
        );
    }

    fn dense_group(count: usize, depth: u16) -> (Vec<u8>, ObjectHeader, Vec<String>) {
        let names: Vec<String> = (0..count).map(|i| format!("link_{i:03}")).collect();
        let messages: Vec<Vec<u8>> = names
            .iter()
            .enumerate()
            .map(|(i, n)| LinkMessage::hard(n.clone(), 0x8000 + i as u64).serialize(8))
            .collect();
        let mut img = FileImage::new(64);
        let (heap_addr, ids) = FractalHeapBuilder::new(4, 512, 1024).build_indirect(&mut img, &messages, 4);

        let mut records: Vec<(u32, Vec<u8>)> = names
            .iter()
            .zip(&ids)
            .map(|(n, id)| {
                let mut w = ByteWriter::new();
                let hash = jenkins_lookup3(n.as_bytes());
                w.write_u32(hash);
                w.write_bytes(id);
                (hash, w.into_inner())
            })
            .collect();
        records.sort_by_key(|(h, _)| *h);
        let records: Vec<Vec<u8>> = records.into_iter().map(|(_, r)| r).collect();
        let record_size = 4 + ids[0].len() as u16;
        let tree = BTreeV2Builder::new(TYPE_LINK_NAME, 512, record_size, 5).build(&mut img, &records, depth);

        let info = LinkInfoMessage {
            fractal_heap_address: Some(heap_addr),
            name_index_address: Some(tree),
            ..Default::default()
        };
        let header = header_with(vec![
            (MessageType::LinkInfo, info.serialize(8)),
            (MessageType::GroupInfo, vec![0, 0]),
        ]);
        (img.bytes, header, names)
    }

    #[test]
    fn dense_group_lists_every_link() {
        let (file, header, names) = dense_group(40, 2);
        let mut got: Vec<String> = read_links(&file, &header, 8, 8)
            .unwrap()
            .into_iter()
            .map(|l| l.name)
            .collect();
        got.sort();
        assert_eq!(got, names);
    }

    #[test]
    fn dense_group_lookup_by_hash() {
        let (file, header, names) = dense_group(11, 1);
        let link = find_link(&file, &header, &names[7], 8, 8).unwrap().unwrap();
        assert_eq!(
            link.target,
            LinkTarget::Hard {
                object_header_address: 0x8007
            }
        );
        assert_eq!(find_link(&file, &header, "nope", 8, 8).unwrap(), None);
    }
}
