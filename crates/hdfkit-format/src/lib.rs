//! Pure-Rust HDF5 binary format parsing and encoding.
//!
//! This crate works on byte slices holding a whole file (or everything from
//! the superblock signature onward) and knows nothing about paths on disk,
//! caching or logging. The `hdfkit` crate builds the file API on top of it.
//!
//! Layers, bottom to top:
//!
//! - [`cursor`]: bounds-checked little-endian reading and writing
//! - [`superblock`], [`object_header`] and the header messages
//!   ([`datatype`], [`dataspace`], [`data_layout`], [`fill_value`],
//!   [`filter_pipeline`], [`link_message`], [`attribute`], ...)
//! - heaps ([`local_heap`], [`global_heap`], [`fractal_heap`]) and indexes
//!   ([`btree_v1`], [`btree_v2`])
//! - groups ([`group_v1`], [`group_v2`]) and element data
//!   ([`layout_read`], [`chunked_read`], [`data_read`])
//! - [`file_writer`] for producing complete files

pub mod attribute;
pub mod attribute_info;
pub mod btree_v1;
pub mod btree_v2;
pub mod checksum;
pub mod chunked_read;
pub mod chunked_write;
pub mod cursor;
pub mod data_layout;
pub mod data_read;
pub mod dataspace;
pub mod datatype;
pub mod error;
pub mod file_writer;
pub mod fill_value;
pub mod filter_pipeline;
pub mod filters;
pub mod fractal_heap;
pub mod global_heap;
pub mod group_v1;
pub mod group_v2;
pub mod layout_read;
pub mod link_info;
pub mod link_message;
pub mod local_heap;
pub mod lzf;
pub mod message_type;
pub mod object_header;
pub mod object_header_writer;
pub mod selection;
pub mod signature;
pub mod superblock;
pub mod symbol_table;

#[cfg(test)]
mod testkit;

pub use error::{FormatError, Result};
