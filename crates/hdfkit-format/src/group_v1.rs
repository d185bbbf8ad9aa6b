//! Symbol-table ("old-style") groups: a local heap of names plus a v1 B-tree
//! over SNOD nodes.
//!
//! Entries come back as [`LinkMessage`]s so callers treat old and new groups
//! alike. Soft links are entries with scratch-pad cache type 2, whose target
//! path sits in the same local heap.

use crate::btree_v1::{collect_symbol_table_nodes, BTreeKey, BTreeV1Node, KeyLayout};
use crate::error::{FormatError, Result};
use crate::link_message::{LinkMessage, LinkTarget};
use crate::local_heap::LocalHeap;
use crate::symbol_table::{ScratchPad, SymbolTableEntry, SymbolTableMessage, SymbolTableNode};

fn entry_to_link(file_data: &[u8], heap: &LocalHeap, entry: &SymbolTableEntry) -> Result<LinkMessage> {
    let name = heap.read_string(file_data, entry.link_name_offset)?;
    match entry.scratch {
        ScratchPad::SoftLink { value_offset } => {
            let target = heap.read_string(file_data, value_offset as u64)?;
            Ok(LinkMessage::soft(name, target))
        }
        _ => Ok(LinkMessage::hard(name, entry.object_header_address)),
    }
}

/// All links of a symbol-table group, in name order.
pub fn read_links(
    file_data: &[u8],
    stab: &SymbolTableMessage,
    offset_size: u8,
    length_size: u8,
) -> Result<Vec<LinkMessage>> {
    let heap = LocalHeap::parse(file_data, stab.local_heap_address, offset_size, length_size)?;
    let snods = collect_symbol_table_nodes(file_data, stab.btree_address, offset_size, length_size)?;
    let mut links = Vec::new();
    for addr in snods {
        let node = SymbolTableNode::parse(file_data, addr, offset_size)?;
        for entry in &node.entries {
            links.push(entry_to_link(file_data, &heap, entry)?);
        }
    }
    Ok(links)
}

/// Look up one name by descending the B-tree. Child `i` of a node holds the
/// names in `(key[i], key[i + 1]]`.
pub fn find_link(
    file_data: &[u8],
    stab: &SymbolTableMessage,
    name: &str,
    offset_size: u8,
    length_size: u8,
) -> Result<Option<LinkMessage>> {
    let heap = LocalHeap::parse(file_data, stab.local_heap_address, offset_size, length_size)?;
    let layout = KeyLayout::Group { length_size };
    let key_name = |node: &BTreeV1Node, i: usize| -> Result<String> {
        match node.keys[i] {
            BTreeKey::Group { heap_offset } => heap.read_string(file_data, heap_offset),
            BTreeKey::Chunk(_) => Err(FormatError::corrupted(
                "v1 B-tree node",
                "chunk key in a group tree",
            )),
        }
    };

    let mut node = BTreeV1Node::parse(file_data, stab.btree_address, offset_size, layout)?;
    loop {
        let mut slot = None;
        for i in 0..node.children.len() {
            if name <= key_name(&node, i + 1)?.as_str() {
                slot = Some(i);
                break;
            }
        }
        let Some(i) = slot else {
            return Ok(None);
        };
        let child = node.children[i];
        if node.level == 0 {
            let snod = SymbolTableNode::parse(file_data, child, offset_size)?;
            for entry in &snod.entries {
                if heap.read_string(file_data, entry.link_name_offset)? == name {
                    return entry_to_link(file_data, &heap, entry).map(Some);
                }
            }
            return Ok(None);
        }
        let next = BTreeV1Node::parse(file_data, child, offset_size, layout)?;
        if next.level + 1 != node.level {
            return Err(FormatError::corrupted(
                "v1 B-tree node",
                format!("child at {child:#x} is not one level down"),
            ));
        }
        node = next;
    }
}

/// Address of a hard link target, or `None` for soft links.
pub fn hard_target(link: &LinkMessage) -> Option<u64> {
    match link.target {
        LinkTarget::Hard {
            object_header_address,
        } => Some(object_header_address),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree_v1::{group_key, BTreeV1Child, BTreeV1Writer};
    use crate::cursor::undefined_address;
    use crate::local_heap::LocalHeapWriter;
    use crate::testkit::FileImage;

    /// Builds a group with `per_snod` entries per SNOD and a group tree of
    /// fanout `2k`. Names must be sorted.
    fn build_group(names: &[&str], per_snod: usize, k: u16) -> (Vec<u8>, SymbolTableMessage) {
        let mut img = FileImage::new(16);
        let mut heap = LocalHeapWriter::new();
        let offsets: Vec<u64> = names.iter().map(|n| heap.add_string(n)).collect();
        let soft_target = heap.add_string("/elsewhere");

        let heap_addr = img.reserve(heap.encoded_size(8, 8));
        img.write_at(heap_addr, &heap.serialize(heap_addr, 8, 8));

        let mut children = Vec::new();
        let mut left = 0;
        for (chunk_no, chunk) in offsets.chunks(per_snod).enumerate() {
            let entries = chunk
                .iter()
                .enumerate()
                .map(|(j, &off)| {
                    let idx = chunk_no * per_snod + j;
                    if names[idx].starts_with("soft") {
                        SymbolTableEntry {
                            link_name_offset: off,
                            object_header_address: undefined_address(8),
                            scratch: ScratchPad::SoftLink {
                                value_offset: soft_target as u32,
                            },
                        }
                    } else {
                        SymbolTableEntry {
                            link_name_offset: off,
                            object_header_address: 0x1000 + idx as u64,
                            scratch: ScratchPad::None,
                        }
                    }
                })
                .collect();
            let node = SymbolTableNode { entries };
            let addr = img.alloc(&node.serialize(per_snod as u16, 8));
            let right = *chunk.last().unwrap_or(&0);
            children.push(BTreeV1Child {
                left_key: group_key(left, 8),
                right_key: group_key(right, 8),
                address: addr,
            });
            left = right;
        }
        let writer = BTreeV1Writer::new(KeyLayout::Group { length_size: 8 }, k, 8);
        let base = img.reserve(writer.encoded_size(children.len()));
        let (root, bytes) = writer.serialize(&children, base).unwrap();
        img.write_at(base, &bytes);
        (
            img.bytes,
            SymbolTableMessage {
                btree_address: root,
                local_heap_address: heap_addr,
            },
        )
    }

    #[test]
    fn lists_entries_across_snods() {
        let names = ["a", "b", "c", "d", "e"];
        let (file, stab) = build_group(&names, 2, 4);
        let links = read_links(&file, &stab, 8, 8).unwrap();
        let got: Vec<&str> = links.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(got, names);
        assert_eq!(hard_target(&links[3]), Some(0x1003));
    }

    #[test]
    fn finds_names_through_multi_level_tree() {
        let names: Vec<String> = (0..20).map(|i| format!("item{i:02}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let (file, stab) = build_group(&refs, 2, 1);
        for (i, n) in refs.iter().enumerate() {
            let link = find_link(&file, &stab, n, 8, 8).unwrap().unwrap();
            assert_eq!(hard_target(&link), Some(0x1000 + i as u64), "{n}");
        }
        assert_eq!(find_link(&file, &stab, "item99", 8, 8).unwrap(), None);
        assert_eq!(find_link(&file, &stab, "a", 8, 8).unwrap(), None);
        assert_eq!(read_links(&file, &stab, 8, 8).unwrap().len(), 20);
    }

    #[test]
    fn soft_link_entries_carry_their_target() {
        let (file, stab) = build_group(&["data", "soft_one"], 4, 4);
        let link = find_link(&file, &stab, "soft_one", 8, 8).unwrap().unwrap();
        assert_eq!(
            link.target,
            LinkTarget::Soft {
                target_path: "/elsewhere".into()
            }
        );
        assert_eq!(hard_target(&link), None);
    }

    #[test]
    fn bad_heap_address() {
        let (file, mut stab) = build_group(&["x"], 2, 2);
        stab.local_heap_address = stab.btree_address;
        assert!(matches!(
            read_links(&file, &stab, 8, 8),
            Err(FormatError::InvalidSignature { .. })
        ));
    }
}
