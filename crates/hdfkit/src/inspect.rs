//! Structural summaries: the object tree with types, shapes and storage,
//! without reading any element data.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use hdfkit_format::data_layout::DataLayout;
use hdfkit_format::dataspace::Dataspace;
use hdfkit_format::filter_pipeline::FilterPipeline;
use hdfkit_format::link_message::LinkTarget;
use hdfkit_format::message_type::MessageType;
use hdfkit_format::object_header::ObjectHeader;
use hdfkit_format::FormatError;
use serde::Serialize;

use crate::debug::ReadOptions;
use crate::error::{Error, Result};
use crate::reader::{attribute_messages, resolve_datatype};
use crate::resolver::Target;
use crate::source::Source;
use crate::types::DType;

/// Summary of one object and everything reachable below it by hard links.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub file: String,
    pub superblock_version: u8,
    /// Offset of the superblock in the file.
    pub base: usize,
    pub root: Node,
}

impl Summary {
    pub fn to_json(&self) -> String {
        // plain data with string keys: serialization cannot fail
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeSummary {
    pub name: String,
    pub dtype: DType,
    pub shape: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Group {
        path: String,
        address: u64,
        attributes: Vec<AttributeSummary>,
        children: Vec<Node>,
    },
    Dataset {
        path: String,
        address: u64,
        dtype: DType,
        shape: Vec<u64>,
        layout: &'static str,
        filters: Vec<String>,
        attributes: Vec<AttributeSummary>,
    },
    SoftLink {
        path: String,
        target: String,
    },
    ExternalLink {
        path: String,
        file: String,
        target: String,
    },
    /// A hard link to an object already shown elsewhere in the tree.
    Repeat {
        path: String,
        address: u64,
    },
}

impl Node {
    pub fn path(&self) -> &str {
        match self {
            Node::Group { path, .. }
            | Node::Dataset { path, .. }
            | Node::SoftLink { path, .. }
            | Node::ExternalLink { path, .. }
            | Node::Repeat { path, .. } => path,
        }
    }

    /// Direct children of a group; empty for anything else.
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Group { children, .. } => children,
            _ => &[],
        }
    }

    /// Find a node below this one by absolute path.
    pub fn find(&self, path: &str) -> Option<&Node> {
        if self.path() == path {
            return Some(self);
        }
        self.children().iter().find_map(|c| c.find(path))
    }
}

pub(crate) fn summarize(target: Target, opts: ReadOptions) -> Result<Summary> {
    let mut walk = Summarizer {
        source: target.source.clone(),
        trace: opts.trace(),
        seen: HashSet::new(),
    };
    let root = walk.node(&target.header, target.path)?;
    Ok(Summary {
        file: target.source.name.clone(),
        superblock_version: target.source.superblock.version,
        base: target.source.base(),
        root,
    })
}

struct Summarizer {
    source: Arc<Source>,
    trace: bool,
    seen: HashSet<u64>,
}

impl Summarizer {
    fn node(&mut self, header: &ObjectHeader, path: String) -> Result<Node> {
        if !self.seen.insert(header.address) {
            return Ok(Node::Repeat {
                path,
                address: header.address,
            });
        }
        if header.is_dataset() {
            return self.dataset(header, path);
        }
        let attributes = self.attributes(header, &path);
        let mut children = Vec::new();
        if header.is_group() {
            let links = self.source.links(header, &path, self.trace)?;
            for link in links.iter() {
                let child = format!("{}/{}", path.trim_end_matches('/'), link.name);
                children.push(match &link.target {
                    LinkTarget::Hard {
                        object_header_address,
                    } => {
                        let h = self.source.header(*object_header_address, &child, self.trace)?;
                        self.node(&h, child)?
                    }
                    LinkTarget::Soft { target_path } => Node::SoftLink {
                        path: child,
                        target: target_path.clone(),
                    },
                    LinkTarget::External {
                        filename,
                        object_path,
                    } => Node::ExternalLink {
                        path: child,
                        file: filename.clone(),
                        target: object_path.clone(),
                    },
                });
            }
        }
        Ok(Node::Group {
            path,
            address: header.address,
            attributes,
            children,
        })
    }

    fn dataset(&mut self, header: &ObjectHeader, path: String) -> Result<Node> {
        let source = &self.source;
        let at = || source.at(&path);
        let datatype = resolve_datatype(source, header, self.trace).map_err(|e| Error::format(at(), e))?;
        let shape = header
            .require(MessageType::Dataspace, "dataspace")
            .and_then(|m| Dataspace::parse(&m.data, source.length_size()))
            .map_err(|e| Error::format(at(), e))?
            .dimensions;
        let layout = match header
            .require(MessageType::DataLayout, "data layout")
            .and_then(|m| DataLayout::parse(&m.data, source.offset_size(), source.length_size()))
        {
            Ok(layout) => layout.class_name(),
            // still listed, only its data cannot be read
            Err(FormatError::UnsupportedFeature(_)) => "unsupported",
            Err(e) => return Err(Error::format(at(), e)),
        };
        let filters = match header.find(MessageType::FilterPipeline) {
            Some(m) => FilterPipeline::parse(&m.data)
                .map_err(|e| Error::format(at(), e))?
                .filters
                .iter()
                .map(|f| f.display_name())
                .collect(),
            None => Vec::new(),
        };
        let attributes = self.attributes(header, &path);
        Ok(Node::Dataset {
            address: header.address,
            path,
            dtype: DType::from(&datatype),
            shape,
            layout,
            filters,
            attributes,
        })
    }

    fn attributes(&self, header: &ObjectHeader, path: &str) -> Vec<AttributeSummary> {
        attribute_messages(&self.source, header, path, self.trace)
            .into_iter()
            .flatten()
            .map(|a| AttributeSummary {
                dtype: DType::from(&a.datatype),
                shape: a.dataspace.dimensions,
                name: a.name,
            })
            .collect()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} (superblock v{}, base {})", self.file, self.superblock_version, self.base)?;
        write_node(f, &self.root, 0)
    }
}

fn write_node(f: &mut fmt::Formatter<'_>, node: &Node, depth: usize) -> fmt::Result {
    let indent = "  ".repeat(depth);
    match node {
        Node::Group {
            path,
            attributes,
            children,
            ..
        } => {
            writeln!(f, "{indent}{path} group")?;
            write_attributes(f, attributes, depth + 1)?;
            for child in children {
                write_node(f, child, depth + 1)?;
            }
            Ok(())
        }
        Node::Dataset {
            path,
            dtype,
            shape,
            layout,
            filters,
            attributes,
            ..
        } => {
            write!(f, "{indent}{path} {dtype} {shape:?} {layout}")?;
            if !filters.is_empty() {
                write!(f, " [{}]", filters.join(", "))?;
            }
            writeln!(f)?;
            write_attributes(f, attributes, depth + 1)
        }
        Node::SoftLink { path, target } => writeln!(f, "{indent}{path} -> {target}"),
        Node::ExternalLink { path, file, target } => writeln!(f, "{indent}{path} -> {file}:{target}"),
        Node::Repeat { path, address } => writeln!(f, "{indent}{path} (same object as {address:#x})"),
    }
}

fn write_attributes(f: &mut fmt::Formatter<'_>, attributes: &[AttributeSummary], depth: usize) -> fmt::Result {
    let indent = "  ".repeat(depth);
    for a in attributes {
        writeln!(f, "{indent}@{} {} {:?}", a.name, a.dtype, a.shape)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(path: &str) -> Node {
        Node::Dataset {
            path: path.into(),
            address: 96,
            dtype: DType::F64,
            shape: vec![3],
            layout: "contiguous",
            filters: vec![],
            attributes: vec![],
        }
    }

    #[test]
    fn find_walks_children() {
        let root = Node::Group {
            path: "/".into(),
            address: 48,
            attributes: vec![],
            children: vec![
                leaf("/data"),
                Node::SoftLink {
                    path: "/alias".into(),
                    target: "/data".into(),
                },
            ],
        };
        assert_eq!(root.find("/data"), Some(&leaf("/data")));
        assert!(matches!(root.find("/alias"), Some(Node::SoftLink { .. })));
        assert!(root.find("/missing").is_none());
    }

    #[test]
    fn json_is_tagged_by_kind() {
        let summary = Summary {
            file: "<memory>".into(),
            superblock_version: 0,
            base: 0,
            root: leaf("/data"),
        };
        let v: serde_json::Value = serde_json::from_str(&summary.to_json()).unwrap();
        assert_eq!(v["root"]["kind"], "dataset");
        assert_eq!(v["root"]["dtype"], "f64");
        assert_eq!(v["root"]["shape"][0], 3);
    }
}
