//! High-level API for reading and writing HDF5 files.
//!
//! This crate provides an ergonomic interface on top of `hdfkit-format`:
//! path resolution across hard, soft and external links, typed array reads
//! with slicing and block streaming, structural summaries, and a writer.
//!
//! # Reading
//!
//! ```no_run
//! use hdfkit::File;
//!
//! let file = File::open("data.h5")?;
//! let ds = file.dataset("sensors/temperature")?;
//! let values = ds.read_data()?;
//! println!("shape: {:?}, data: {:?}", ds.shape(), values);
//!
//! for block in ds.read_chunked(1024)? {
//!     let block = block?;
//!     println!("{} values", block.len());
//! }
//! # Ok::<(), hdfkit::Error>(())
//! ```
//!
//! # Writing
//!
//! ```no_run
//! use hdfkit::{write_dataset, ArrayData, WriteOptions};
//!
//! let options = WriteOptions::default().shape(&[2, 2]).chunked(&[1, 2]).gzip(6);
//! write_dataset("output.h5", "/m", ArrayData::Float64(vec![1.0, 2.0, 3.0, 4.0]), &options)?;
//! # Ok::<(), hdfkit::Error>(())
//! ```
//!
//! # Debugging
//!
//! [`set_debug`] (or [`ReadOptions::debug`] per call) makes every decoded
//! structure emit a `tracing` event and adds low-level causes to error
//! messages.

mod cache;
mod debug;
pub mod error;
pub mod inspect;
pub mod reader;
mod resolver;
mod source;
mod storage;
pub mod stream;
pub mod types;
pub mod writer;

pub use cache::CacheStats;
pub use debug::{debug_enabled, set_debug, ReadOptions};
pub use error::{Error, ErrorKind, Location, Result};
pub use inspect::{AttributeSummary, Node, Summary};
pub use reader::{Dataset, File, Group, OpenOptions};
pub use stream::ChunkedRead;
pub use types::{Attribute, DType, LinkInfo, LinkKind};
pub use writer::{write_dataset, Compression, FileBuilder, Layout, WriteOptions};

// Re-export useful types from hdfkit-format for advanced users
pub use hdfkit_format::data_read::{ArrayData, Value};
pub use hdfkit_format::selection::Hyperslab;
pub use hdfkit_format as format;
