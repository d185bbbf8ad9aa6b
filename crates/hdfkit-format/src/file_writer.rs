//! Whole-file encoder.
//!
//! Produces a version-0 superblock, version-1 object headers and
//! symbol-table groups (local heap, SNOD nodes, group B-tree), which every
//! HDF5 reader understands. A group holding external links is written with
//! link messages instead, since symbol tables cannot express them.
//!
//! Objects are laid out bottom-up: children before parents, data before the
//! header that points at it. The superblock slot at offset 0 is filled last.

use std::collections::BTreeMap;

use crate::attribute::AttributeMessage;
use crate::btree_v1::{group_key, BTreeV1Child, BTreeV1Writer, KeyLayout};
use crate::chunked_write::{build_chunked, default_chunk_dims, ChunkFilters};
use crate::cursor::{undefined_address, ByteWriter};
use crate::data_layout::{ChunkIndex, DataLayout};
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::{FormatError, Result};
use crate::fill_value::FillValue;
use crate::global_heap::{GlobalHeapId, GlobalHeapWriter};
use crate::link_info::{GroupInfoMessage, LinkInfoMessage};
use crate::link_message::LinkMessage;
use crate::local_heap::LocalHeapWriter;
use crate::message_type::{MessageType, FLAG_CONSTANT};
use crate::object_header_writer::ObjectHeaderWriter;
use crate::superblock::Superblock;
use crate::symbol_table::{ScratchPad, SymbolTableEntry, SymbolTableMessage, SymbolTableNode};

const OFFSET_SIZE: u8 = 8;
const LENGTH_SIZE: u8 = 8;
/// Group leaf K: SNOD nodes hold up to `2 * GROUP_LEAF_K` entries.
const GROUP_LEAF_K: u16 = 4;
/// Group internal K: group tree nodes hold up to `2 * GROUP_INTERNAL_K` children.
const GROUP_INTERNAL_K: u16 = 16;
/// Largest message a version-1 header can hold.
const MAX_MESSAGE: usize = 0xFFF8;

/// Element values to store.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValues {
    /// Encoded elements, `datatype.size()` bytes each.
    Fixed(Vec<u8>),
    /// Variable-length strings, stored in a global heap.
    VlenStrings(Vec<String>),
}

impl RawValues {
    fn len_hint(&self) -> usize {
        match self {
            RawValues::Fixed(b) => b.len(),
            RawValues::VlenStrings(s) => s.len(),
        }
    }
}

/// Storage layout for a new dataset.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LayoutSpec {
    #[default]
    Contiguous,
    /// Data inline in the header; limited to what fits one message.
    Compact,
    /// Chunked with the given chunk shape, or a default shape.
    Chunked(Option<Vec<u64>>),
}

/// An attribute to attach to a group or dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeSpec {
    pub name: String,
    pub datatype: Datatype,
    /// Empty for a scalar.
    pub dims: Vec<u64>,
    pub values: RawValues,
}

/// A dataset to write.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSpec {
    pub datatype: Datatype,
    /// Empty for a scalar.
    pub dims: Vec<u64>,
    pub values: RawValues,
    pub layout: LayoutSpec,
    pub filters: ChunkFilters,
    pub fill_value: Option<Vec<u8>>,
    pub attributes: Vec<AttributeSpec>,
}

impl DatasetSpec {
    pub fn new(datatype: Datatype, dims: Vec<u64>, values: RawValues) -> Self {
        DatasetSpec {
            datatype,
            dims,
            values,
            layout: LayoutSpec::default(),
            filters: ChunkFilters::default(),
            fill_value: None,
            attributes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct GroupNode {
    attributes: Vec<AttributeSpec>,
    children: BTreeMap<String, Node>,
}

#[derive(Debug, Clone)]
enum Node {
    Group(GroupNode),
    Dataset(Box<DatasetSpec>),
    SoftLink(String),
    ExternalLink { filename: String, object_path: String },
}

impl GroupNode {
    fn has_external_links(&self) -> bool {
        self.children
            .values()
            .any(|c| matches!(c, Node::ExternalLink { .. }))
    }
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.iter().any(|p| *p == "." || *p == "..") {
        return Err(FormatError::InvalidInput(format!(
            "relative component in path {path:?}"
        )));
    }
    Ok(parts)
}

/// Builds a complete file in memory.
#[derive(Debug, Clone, Default)]
pub struct FileWriter {
    root: GroupNode,
}

impl FileWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The group at `parts`, creating missing groups on the way.
    fn group_mut(&mut self, parts: &[&str], path: &str) -> Result<&mut GroupNode> {
        let mut group = &mut self.root;
        for part in parts {
            let node = group
                .children
                .entry((*part).to_owned())
                .or_insert_with(|| Node::Group(GroupNode::default()));
            group = match node {
                Node::Group(g) => g,
                _ => {
                    return Err(FormatError::InvalidInput(format!(
                        "{part:?} in {path:?} is not a group"
                    )))
                }
            };
        }
        Ok(group)
    }

    fn insert(&mut self, path: &str, node: Node) -> Result<()> {
        let parts = split_path(path)?;
        let Some((name, parents)) = parts.split_last() else {
            return Err(FormatError::InvalidInput("the root group already exists".into()));
        };
        let group = self.group_mut(parents, path)?;
        if group.children.contains_key(*name) {
            return Err(FormatError::InvalidInput(format!("{path:?} already exists")));
        }
        group.children.insert((*name).to_owned(), node);
        Ok(())
    }

    /// Create a group and any missing parents. Existing groups are kept.
    pub fn create_group(&mut self, path: &str) -> Result<()> {
        let parts = split_path(path)?;
        self.group_mut(&parts, path).map(|_| ())
    }

    pub fn add_dataset(&mut self, path: &str, spec: DatasetSpec) -> Result<()> {
        self.insert(path, Node::Dataset(Box::new(spec)))
    }

    pub fn add_soft_link(&mut self, path: &str, target: &str) -> Result<()> {
        self.insert(path, Node::SoftLink(target.to_owned()))
    }

    pub fn add_external_link(&mut self, path: &str, filename: &str, object_path: &str) -> Result<()> {
        self.insert(
            path,
            Node::ExternalLink {
                filename: filename.to_owned(),
                object_path: object_path.to_owned(),
            },
        )
    }

    /// Attach an attribute to an existing group or dataset.
    pub fn add_attribute(&mut self, object_path: &str, attr: AttributeSpec) -> Result<()> {
        let parts = split_path(object_path)?;
        let mut group = &mut self.root;
        for (i, part) in parts.iter().enumerate() {
            match group.children.get_mut(*part) {
                Some(Node::Group(g)) => group = g,
                Some(Node::Dataset(d)) if i + 1 == parts.len() => {
                    d.attributes.push(attr);
                    return Ok(());
                }
                _ => {
                    return Err(FormatError::InvalidInput(format!(
                        "no group or dataset at {object_path:?}"
                    )))
                }
            }
        }
        group.attributes.push(attr);
        Ok(())
    }

    /// Encode the file.
    pub fn finish(self) -> Result<Vec<u8>> {
        let mut out = Output {
            w: ByteWriter::new(),
        };
        out.w.write_zeros(Superblock::v0_size(OFFSET_SIZE));
        let (root_addr, root_stab) = out.write_group(&self.root)?;
        let eof = out.w.position() as u64;
        let mut sb = Superblock::new_v0(
            OFFSET_SIZE,
            LENGTH_SIZE,
            root_addr,
            SymbolTableMessage {
                btree_address: 0,
                local_heap_address: 0,
            },
            eof,
        );
        // a link-message root has no symbol table to cache
        sb.root_symbol_table = root_stab;
        let sb_bytes = sb.serialize_v0()?;
        let mut bytes = out.w.into_inner();
        bytes[..sb_bytes.len()].copy_from_slice(&sb_bytes);
        Ok(bytes)
    }
}

struct Output {
    w: ByteWriter,
}

impl Output {
    fn place(&mut self, bytes: &[u8]) -> u64 {
        let addr = self.w.position() as u64;
        self.w.write_bytes(bytes);
        addr
    }

    fn next_address(&self) -> u64 {
        self.w.position() as u64
    }

    /// Write a group and everything below it. Returns its header address and,
    /// for symbol-table groups, the symbol table message.
    fn write_group(&mut self, group: &GroupNode) -> Result<(u64, Option<SymbolTableMessage>)> {
        let mut targets: Vec<(&str, ChildTarget)> = Vec::with_capacity(group.children.len());
        for (name, child) in &group.children {
            let target = match child {
                Node::Group(g) => {
                    let (addr, stab) = self.write_group(g)?;
                    ChildTarget::Object { addr, stab }
                }
                Node::Dataset(d) => ChildTarget::Object {
                    addr: self
                        .write_dataset(d)
                        .map_err(|e| with_context(e, name))?,
                    stab: None,
                },
                Node::SoftLink(target) => ChildTarget::Soft(target),
                Node::ExternalLink {
                    filename,
                    object_path,
                } => ChildTarget::External {
                    filename,
                    object_path,
                },
            };
            targets.push((name.as_str(), target));
        }

        let mut header = HeaderBuilder::default();
        let stab = if group.has_external_links() {
            header.push(MessageType::LinkInfo, LinkInfoMessage::default().serialize(OFFSET_SIZE), 0)?;
            header.push(MessageType::GroupInfo, GroupInfoMessage::default().serialize(), 0)?;
            for (name, target) in &targets {
                let link = match target {
                    ChildTarget::Object { addr, .. } => LinkMessage::hard(*name, *addr),
                    ChildTarget::Soft(path) => LinkMessage::soft(*name, *path),
                    ChildTarget::External {
                        filename,
                        object_path,
                    } => LinkMessage::external(*name, *filename, *object_path),
                };
                header.push(MessageType::Link, link.serialize(OFFSET_SIZE), 0)?;
            }
            None
        } else {
            let stab = self.write_symbol_table(&targets)?;
            header.push(MessageType::SymbolTable, stab.serialize(OFFSET_SIZE), 0)?;
            Some(stab)
        };
        for attr in &group.attributes {
            let msg = self.attribute_message(attr)?;
            header.push(MessageType::Attribute, msg, 0)?;
        }
        Ok((self.place(&header.finish()), stab))
    }

    fn write_symbol_table(&mut self, targets: &[(&str, ChildTarget)]) -> Result<SymbolTableMessage> {
        let mut heap = LocalHeapWriter::new();
        let mut entries = Vec::with_capacity(targets.len());
        for (name, target) in targets {
            let link_name_offset = heap.add_string(name);
            let entry = match target {
                ChildTarget::Object { addr, stab } => SymbolTableEntry {
                    link_name_offset,
                    object_header_address: *addr,
                    scratch: stab.map(ScratchPad::Group).unwrap_or(ScratchPad::None),
                },
                ChildTarget::Soft(path) => {
                    let value_offset = u32::try_from(heap.add_string(path)).map_err(|_| {
                        FormatError::InvalidInput("group name heap exceeds 4 GiB".into())
                    })?;
                    SymbolTableEntry {
                        link_name_offset,
                        object_header_address: undefined_address(OFFSET_SIZE),
                        scratch: ScratchPad::SoftLink { value_offset },
                    }
                }
                ChildTarget::External { .. } => {
                    return Err(FormatError::InvalidInput(
                        "external links need a link-message group".into(),
                    ))
                }
            };
            entries.push(entry);
        }

        let heap_addr = self.next_address();
        let heap_bytes = heap.serialize(heap_addr, OFFSET_SIZE, LENGTH_SIZE);
        self.place(&heap_bytes);

        let per_node = 2 * GROUP_LEAF_K as usize;
        let mut children = Vec::new();
        let mut left = 0;
        for node_entries in entries.chunks(per_node) {
            let right = node_entries.last().map_or(0, |e| e.link_name_offset);
            let node = SymbolTableNode {
                entries: node_entries.to_vec(),
            };
            let addr = self.place(&node.serialize(GROUP_LEAF_K, OFFSET_SIZE));
            children.push(BTreeV1Child {
                left_key: group_key(left, LENGTH_SIZE),
                right_key: group_key(right, LENGTH_SIZE),
                address: addr,
            });
            left = right;
        }
        let tree = BTreeV1Writer::new(
            KeyLayout::Group {
                length_size: LENGTH_SIZE,
            },
            GROUP_INTERNAL_K,
            OFFSET_SIZE,
        );
        let (root, bytes) = tree.serialize(&children, self.next_address())?;
        self.place(&bytes);
        Ok(SymbolTableMessage {
            btree_address: root,
            local_heap_address: heap_addr,
        })
    }

    /// Encoded element bytes; variable-length strings go to a new global
    /// heap collection first.
    fn encode_values(&mut self, datatype: &Datatype, count: u64, values: &RawValues) -> Result<Vec<u8>> {
        let bytes = match values {
            RawValues::Fixed(bytes) => {
                if datatype.has_vlen() {
                    return Err(FormatError::InvalidInput(
                        "variable-length types take string values".into(),
                    ));
                }
                bytes.clone()
            }
            RawValues::VlenStrings(strings) => {
                if !matches!(datatype, Datatype::VariableLength { .. }) {
                    return Err(FormatError::InvalidInput(format!(
                        "string values for a {} datatype",
                        datatype.class_name()
                    )));
                }
                self.write_vlen_strings(strings)?
            }
        };
        let expected = count.checked_mul(datatype.size() as u64);
        if expected != Some(bytes.len() as u64) {
            return Err(FormatError::InvalidInput(format!(
                "{} values for {count} elements of {} bytes",
                values.len_hint(),
                datatype.size()
            )));
        }
        Ok(bytes)
    }

    fn write_vlen_strings(&mut self, strings: &[String]) -> Result<Vec<u8>> {
        let mut ids = ByteWriter::with_capacity(strings.len() * (8 + OFFSET_SIZE as usize));
        for batch in strings.chunks(u16::MAX as usize - 2) {
            let mut heap = GlobalHeapWriter::new();
            let mut indices = Vec::with_capacity(batch.len());
            for s in batch {
                indices.push(heap.add(s.as_bytes())?);
            }
            let collection = self.place(&heap.serialize(LENGTH_SIZE));
            for (s, index) in batch.iter().zip(indices) {
                let length = u32::try_from(s.len())
                    .map_err(|_| FormatError::InvalidInput("string longer than 4 GiB".into()))?;
                GlobalHeapId {
                    length,
                    collection,
                    index,
                }
                .write(&mut ids, OFFSET_SIZE);
            }
        }
        Ok(ids.into_inner())
    }

    fn attribute_message(&mut self, attr: &AttributeSpec) -> Result<Vec<u8>> {
        let dataspace = dataspace_for(&attr.dims);
        let data = self
            .encode_values(&attr.datatype, dataspace.num_elements(), &attr.values)
            .map_err(|e| with_context(e, &attr.name))?;
        Ok(AttributeMessage::new(attr.name.clone(), attr.datatype.clone(), dataspace, data)
            .serialize(LENGTH_SIZE))
    }

    fn write_dataset(&mut self, spec: &DatasetSpec) -> Result<u64> {
        let dataspace = dataspace_for(&spec.dims);
        let elem = spec.datatype.size();
        if elem == 0 {
            return Err(FormatError::InvalidInput("zero-sized datatype".into()));
        }
        let raw = self.encode_values(&spec.datatype, dataspace.num_elements(), &spec.values)?;
        if let Some(fill) = &spec.fill_value {
            if fill.len() != elem as usize {
                return Err(FormatError::InvalidInput(format!(
                    "{}-byte fill value for {elem}-byte elements",
                    fill.len()
                )));
            }
        }
        if !spec.filters.is_empty() && !matches!(spec.layout, LayoutSpec::Chunked(_)) {
            return Err(FormatError::InvalidInput(
                "filters need a chunked layout".into(),
            ));
        }

        let mut pipeline = None;
        let layout = match &spec.layout {
            LayoutSpec::Contiguous => {
                let address = (!raw.is_empty()).then(|| self.place(&raw));
                DataLayout::Contiguous {
                    address,
                    size: Some(raw.len() as u64),
                }
            }
            LayoutSpec::Compact => DataLayout::Compact { data: raw },
            LayoutSpec::Chunked(chunk_dims) => {
                if spec.dims.is_empty() {
                    return Err(FormatError::InvalidInput(
                        "scalar datasets cannot be chunked".into(),
                    ));
                }
                let chunk_dims = chunk_dims
                    .clone()
                    .unwrap_or_else(|| default_chunk_dims(&spec.dims, elem as usize));
                if chunk_dims.len() != spec.dims.len() || chunk_dims.contains(&0) {
                    return Err(FormatError::InvalidInput(format!(
                        "chunk shape {chunk_dims:?} for a dataset of shape {:?}",
                        spec.dims
                    )));
                }
                let filters = spec.filters.pipeline(elem);
                let storage = build_chunked(
                    &raw,
                    &spec.dims,
                    &chunk_dims,
                    elem,
                    &filters,
                    OFFSET_SIZE,
                    self.next_address(),
                )?;
                self.w.write_bytes(&storage.bytes);
                if !filters.is_empty() {
                    pipeline = Some(filters);
                }
                DataLayout::Chunked {
                    version: 3,
                    chunk_dimensions: chunk_dims,
                    element_size: elem,
                    index: ChunkIndex::BTreeV1 {
                        address: storage.btree_address,
                    },
                }
            }
        };

        let mut header = HeaderBuilder::default();
        header.push(MessageType::Dataspace, dataspace.serialize(LENGTH_SIZE), 0)?;
        header.push(MessageType::Datatype, spec.datatype.to_bytes(), FLAG_CONSTANT)?;
        let fill = FillValue {
            value: spec.fill_value.clone(),
        };
        header.push(MessageType::FillValue, fill.serialize(), FLAG_CONSTANT)?;
        header.push(MessageType::DataLayout, layout.serialize(OFFSET_SIZE, LENGTH_SIZE)?, 0)?;
        if let Some(p) = pipeline {
            header.push(MessageType::FilterPipeline, p.serialize(), FLAG_CONSTANT)?;
        }
        for attr in &spec.attributes {
            let msg = self.attribute_message(attr)?;
            header.push(MessageType::Attribute, msg, 0)?;
        }
        Ok(self.place(&header.finish()))
    }
}

enum ChildTarget<'a> {
    Object {
        addr: u64,
        stab: Option<SymbolTableMessage>,
    },
    Soft(&'a str),
    External {
        filename: &'a str,
        object_path: &'a str,
    },
}

#[derive(Default)]
struct HeaderBuilder {
    inner: ObjectHeaderWriter,
}

impl HeaderBuilder {
    fn push(&mut self, msg_type: MessageType, data: Vec<u8>, flags: u8) -> Result<()> {
        if data.len() > MAX_MESSAGE {
            return Err(FormatError::InvalidInput(format!(
                "{msg_type:?} message of {} bytes exceeds the header message limit",
                data.len()
            )));
        }
        self.inner.add_message_with_flags(msg_type, data, flags);
        Ok(())
    }

    fn finish(self) -> Vec<u8> {
        self.inner.serialize_v1()
    }
}

fn dataspace_for(dims: &[u64]) -> Dataspace {
    if dims.is_empty() {
        Dataspace::scalar()
    } else {
        Dataspace::simple(dims)
    }
}

fn with_context(err: FormatError, name: &str) -> FormatError {
    match err {
        FormatError::InvalidInput(msg) => FormatError::InvalidInput(format!("{name}: {msg}")),
        other => other,
    }
}
