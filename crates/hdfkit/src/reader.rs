//! Reading API: File, Dataset, and Group handles for reading HDF5 files.
//!
//! When the `mmap` feature is enabled (default), [`File::open`] maps the
//! file read-only; [`OpenOptions::mmap`] turns that off and reads the file
//! into memory instead. [`File::from_bytes`] opens an in-memory image.
//!
//! Handles borrow the `File`. Metadata they decode is cached per file (see
//! [`File::cache_stats`]); element data never is.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use hdfkit_format::attribute::AttributeMessage;
use hdfkit_format::attribute_info::collect_attributes;
use hdfkit_format::chunked_read::ChunkReader;
use hdfkit_format::data_layout::DataLayout;
use hdfkit_format::data_read::{decode_array, ArrayData};
use hdfkit_format::dataspace::{Dataspace, DataspaceType};
use hdfkit_format::datatype::Datatype;
use hdfkit_format::error::FormatError;
use hdfkit_format::fill_value::FillValue;
use hdfkit_format::filter_pipeline::FilterPipeline;
use hdfkit_format::layout_read::{read_selection, StorageInfo};
use hdfkit_format::message_type::{MessageType, FLAG_SHARED};
use hdfkit_format::object_header::{ObjectHeader, SharedMessage};
use hdfkit_format::selection::Hyperslab;
use hdfkit_format::superblock::Superblock;

use crate::cache::{CacheStats, DEFAULT_CACHE_BYTES};
use crate::debug::{structure, ReadOptions};
use crate::error::{Error, Result};
use crate::inspect::{self, Summary};
use crate::resolver::{components, normalize, Target, Walker, Want};
use crate::source::Source;
use crate::stream::ChunkedRead;
use crate::types::{Attribute, DType, LinkInfo};

/// How to open a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    /// Map the file instead of reading it (needs the `mmap` feature).
    pub mmap: bool,
    /// Byte budget of the metadata cache, per opened file.
    pub cache_bytes: usize,
    /// Default debug override for every call on this handle.
    pub debug: Option<bool>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            mmap: cfg!(feature = "mmap"),
            cache_bytes: DEFAULT_CACHE_BYTES,
            debug: None,
        }
    }
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// An open HDF5 file for reading.
pub struct File {
    root: Arc<Source>,
    /// Files reached through external links, by canonical path.
    externals: Mutex<HashMap<PathBuf, Arc<Source>>>,
    options: OpenOptions,
}

impl File {
    /// Open an HDF5 file from a filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, OpenOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<Self> {
        let trace = ReadOptions { debug: options.debug }.trace();
        let root = Source::from_path(0, path.as_ref(), options.mmap, options.cache_bytes, trace)?;
        Ok(Self::with_root(root, options))
    }

    /// Open an HDF5 file from an in-memory byte vector.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_bytes_with(data, OpenOptions::default())
    }

    /// Like [`File::from_bytes`], with explicit options. `mmap` only applies
    /// to external files reached through links.
    pub fn from_bytes_with(data: Vec<u8>, options: OpenOptions) -> Result<Self> {
        let trace = ReadOptions { debug: options.debug }.trace();
        let root = Source::from_bytes(0, data, options.cache_bytes, trace)?;
        Ok(Self::with_root(root, options))
    }

    fn with_root(root: Source, options: OpenOptions) -> Self {
        File {
            root: Arc::new(root),
            externals: Mutex::new(HashMap::new()),
            options,
        }
    }

    /// Release the file and every external file opened through it.
    pub fn close(self) {
        drop(self);
    }

    /// Path the file was opened from, or `<memory>`.
    pub fn path(&self) -> &str {
        &self.root.name
    }

    pub fn superblock(&self) -> &Superblock {
        &self.root.superblock
    }

    /// Offset of the superblock signature (size of the user block).
    pub fn base_offset(&self) -> usize {
        self.root.base()
    }

    pub fn is_mmap(&self) -> bool {
        self.root.is_mapped()
    }

    pub(crate) fn root_source(&self) -> Arc<Source> {
        self.root.clone()
    }

    /// Call options with this handle's defaults filled in.
    pub(crate) fn merged(&self, opts: &ReadOptions) -> ReadOptions {
        ReadOptions {
            debug: opts.debug.or(self.options.debug),
        }
    }

    fn resolve(&self, path: &str, want: Want, opts: &ReadOptions) -> Result<(Target, ReadOptions)> {
        let opts = self.merged(opts);
        let target = Walker::new(self, opts.trace()).resolve(path, want)?;
        Ok((target, opts))
    }

    /// Returns a handle to the root group.
    pub fn root(&self) -> Result<Group<'_>> {
        self.group("/")
    }

    /// Resolve a path and return a `Dataset` handle.
    ///
    /// The path uses `/` separators (e.g., `"/group1/values"`); a leading
    /// slash is optional.
    pub fn dataset(&self, path: &str) -> Result<Dataset<'_>> {
        self.dataset_with(path, &ReadOptions::default())
    }

    pub fn dataset_with(&self, path: &str, opts: &ReadOptions) -> Result<Dataset<'_>> {
        let (target, opts) = self.resolve(path, Want::Dataset, opts)?;
        Dataset::new(self, target, opts)
    }

    /// Resolve a path and return a `Group` handle. Use `"/"` for the root.
    pub fn group(&self, path: &str) -> Result<Group<'_>> {
        self.group_with(path, &ReadOptions::default())
    }

    pub fn group_with(&self, path: &str, opts: &ReadOptions) -> Result<Group<'_>> {
        let (target, opts) = self.resolve(path, Want::Group, opts)?;
        Ok(Group {
            file: self,
            source: target.source,
            path: target.path,
            header: target.header,
            opts,
        })
    }

    /// Read a whole dataset.
    pub fn read_data(&self, path: &str) -> Result<ArrayData> {
        self.dataset(path)?.read_data()
    }

    /// Read `start..end` by `step` of a dataset; `None` means unit steps.
    pub fn read_slice(&self, path: &str, start: &[u64], end: &[u64], step: Option<&[u64]>) -> Result<ArrayData> {
        self.dataset(path)?.read_slice(start, end, step)
    }

    /// The link named by the last component of `path`, without following it.
    pub fn get_link_info(&self, path: &str) -> Result<LinkInfo> {
        let parts = components(path);
        let Some((name, parents)) = parts.split_last() else {
            return Err(Error::invalid(self.root.at("/"), "the root group is not reached through a link"));
        };
        let group = self.group(&parents.join("/"))?;
        group.link(name)?.ok_or_else(|| Error::GroupNotFound {
            at: group.source.at(&normalize(path)),
        })
    }

    /// Structural summary of the object at `path` and everything below it.
    /// No element data is read.
    pub fn inspect(&self, path: &str) -> Result<Summary> {
        let (target, opts) = self.resolve(path, Want::Any, &ReadOptions::default())?;
        inspect::summarize(target, opts)
    }

    /// Drop all cached metadata. Later reads decode it again.
    pub fn clear_cache(&self) {
        self.root.cache.clear();
        for source in self.lock_externals().values() {
            source.cache.clear();
        }
    }

    /// Cache counters summed over this file and its external files.
    pub fn cache_stats(&self) -> CacheStats {
        let mut total = self.root.cache.stats();
        for source in self.lock_externals().values() {
            let s = source.cache.stats();
            total.hits += s.hits;
            total.misses += s.misses;
            total.evictions += s.evictions;
            total.entries += s.entries;
            total.bytes += s.bytes;
        }
        total
    }

    fn lock_externals(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Arc<Source>>> {
        self.externals.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The file an external link names, opened once per handle.
    pub(crate) fn external(&self, from: &Source, filename: &str, link: &str, trace: bool) -> Result<Arc<Source>> {
        let requested = Path::new(filename);
        let path = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            match from.directory() {
                Some(dir) => dir.join(requested),
                None => requested.to_path_buf(),
            }
        };
        if !path.exists() {
            return Err(Error::FileAccess {
                at: from.at(link),
                detail: format!("external file {} does not exist", path.display()),
                cause: None,
            });
        }
        let key = path.canonicalize().unwrap_or_else(|_| path.clone());
        if self.root.path.as_deref() == Some(key.as_path()) {
            return Ok(self.root.clone());
        }
        let mut externals = self.lock_externals();
        if let Some(source) = externals.get(&key) {
            return Ok(source.clone());
        }
        let source = Arc::new(Source::from_path(
            externals.len() + 1,
            &path,
            self.options.mmap,
            self.options.cache_bytes,
            trace,
        )?);
        externals.insert(key, source.clone());
        Ok(source)
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("path", &self.root.name)
            .field("size", &self.root.bytes().len())
            .field("superblock_version", &self.root.superblock.version)
            .field("mmap", &self.is_mmap())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Group handle
// ---------------------------------------------------------------------------

/// A lightweight handle to an HDF5 group.
pub struct Group<'f> {
    file: &'f File,
    source: Arc<Source>,
    path: String,
    header: Arc<ObjectHeader>,
    opts: ReadOptions,
}

impl<'f> Group<'f> {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Every link of the group, unresolved.
    pub fn links(&self) -> Result<Vec<LinkInfo>> {
        let links = self.source.links(&self.header, &self.path, self.opts.trace())?;
        Ok(links.iter().map(LinkInfo::from).collect())
    }

    /// One link by name, unresolved.
    pub fn link(&self, name: &str) -> Result<Option<LinkInfo>> {
        let links = self.source.links(&self.header, &self.path, self.opts.trace())?;
        Ok(links.iter().find(|l| l.name == name).map(LinkInfo::from))
    }

    /// Names of all members, in storage order.
    pub fn children(&self) -> Result<Vec<String>> {
        Ok(self.links()?.into_iter().map(|l| l.name().to_owned()).collect())
    }

    /// Names of hard-linked members that are datasets.
    pub fn datasets(&self) -> Result<Vec<String>> {
        self.hard_members(ObjectHeader::is_dataset)
    }

    /// Names of hard-linked members that are groups.
    pub fn groups(&self) -> Result<Vec<String>> {
        self.hard_members(ObjectHeader::is_group)
    }

    fn hard_members(&self, keep: fn(&ObjectHeader) -> bool) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for link in self.links()? {
            if let LinkInfo::Hard { name, address } = link {
                let child = self.child_path(&name);
                let header = self.source.header(address, &child, self.opts.trace())?;
                if keep(&header) {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }

    fn child_path(&self, name: &str) -> String {
        format!("{}/{name}", self.path.trim_end_matches('/'))
    }

    /// Get a dataset within this group by name or relative path.
    pub fn dataset(&self, name: &str) -> Result<Dataset<'f>> {
        self.file.dataset_with(&self.child_path(name), &self.opts)
    }

    /// Get a subgroup within this group by name or relative path.
    pub fn group(&self, name: &str) -> Result<Group<'f>> {
        self.file.group_with(&self.child_path(name), &self.opts)
    }

    /// Decoded attributes. Attributes that fail to decode are skipped.
    pub fn attributes(&self) -> Result<Vec<Attribute>> {
        read_attributes(&self.source, &self.header, &self.path, self.opts.trace())
    }

    pub fn attribute(&self, name: &str) -> Result<Option<Attribute>> {
        Ok(self.attributes()?.into_iter().find(|a| a.name == name))
    }
}

impl std::fmt::Debug for Group<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("file", &self.source.name)
            .field("path", &self.path)
            .field("address", &self.header.address)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Dataset handle
// ---------------------------------------------------------------------------

/// A lightweight handle to an HDF5 dataset.
///
/// Datatype and dataspace are decoded when the handle is created; storage
/// layout and filters on the first read.
pub struct Dataset<'f> {
    file: &'f File,
    source: Arc<Source>,
    path: String,
    header: Arc<ObjectHeader>,
    datatype: Datatype,
    dataspace: Dataspace,
    opts: ReadOptions,
}

impl<'f> Dataset<'f> {
    fn new(file: &'f File, target: Target, opts: ReadOptions) -> Result<Self> {
        let source = target.source;
        let header = target.header;
        let path = target.path;
        let at = || source.at(&path);
        let datatype = resolve_datatype(&source, &header, opts.trace()).map_err(|e| Error::format(at(), e))?;
        let dataspace = header
            .require(MessageType::Dataspace, "dataspace")
            .and_then(|m| Dataspace::parse(&m.data, source.length_size()))
            .map_err(|e| Error::format(at(), e))?;
        structure!(
            opts.trace(),
            file = %source.name,
            dataset = %path,
            datatype = %DType::from(&datatype),
            shape = ?dataspace.dimensions,
            "dataset"
        );
        Ok(Dataset {
            file,
            source,
            path,
            header,
            datatype,
            dataspace,
            opts,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The opened file this handle was resolved from.
    pub fn file(&self) -> &'f File {
        self.file
    }

    /// Name of the file holding the data (differs from the opened file when
    /// reached through an external link).
    pub fn file_name(&self) -> &str {
        &self.source.name
    }

    pub fn datatype(&self) -> &Datatype {
        &self.datatype
    }

    pub fn dtype(&self) -> DType {
        DType::from(&self.datatype)
    }

    /// Returns the shape (dimensions) of the dataset; empty for scalars.
    pub fn shape(&self) -> &[u64] {
        &self.dataspace.dimensions
    }

    pub fn dataspace(&self) -> &Dataspace {
        &self.dataspace
    }

    /// Number of elements.
    pub fn len(&self) -> u64 {
        self.dataspace.num_elements()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Same handle with different per-call options.
    pub fn with_options(mut self, opts: ReadOptions) -> Self {
        self.opts = opts;
        self
    }

    fn err(&self, e: FormatError) -> Error {
        Error::format(self.source.at(&self.path), e)
    }

    pub fn layout(&self) -> Result<DataLayout> {
        self.header
            .require(MessageType::DataLayout, "data layout")
            .and_then(|m| DataLayout::parse(&m.data, self.source.offset_size(), self.source.length_size()))
            .map_err(|e| self.err(e))
    }

    pub fn filters(&self) -> Result<Option<FilterPipeline>> {
        self.header
            .find(MessageType::FilterPipeline)
            .map(|m| FilterPipeline::parse(&m.data))
            .transpose()
            .map_err(|e| self.err(e))
    }

    pub fn fill_value(&self) -> Result<FillValue> {
        let parsed = match (
            self.header.find(MessageType::FillValue),
            self.header.find(MessageType::FillValueOld),
        ) {
            (Some(m), _) => FillValue::parse(&m.data),
            (None, Some(m)) => FillValue::parse_old(&m.data),
            (None, None) => Ok(FillValue::default()),
        };
        let fill = parsed.map_err(|e| self.err(e))?;
        if let Some(v) = &fill.value {
            if v.len() != self.datatype.size() as usize {
                return Err(Error::corrupted(
                    self.source.at(&self.path),
                    format!("{}-byte fill value for {}-byte elements", v.len(), self.datatype.size()),
                ));
            }
        }
        Ok(fill)
    }

    /// Decoded attributes. Attributes that fail to decode are skipped.
    pub fn attributes(&self) -> Result<Vec<Attribute>> {
        read_attributes(&self.source, &self.header, &self.path, self.opts.trace())
    }

    pub fn attribute(&self, name: &str) -> Result<Option<Attribute>> {
        Ok(self.attributes()?.into_iter().find(|a| a.name == name))
    }

    /// Read all elements, flattened in row-major order.
    pub fn read_data(&self) -> Result<ArrayData> {
        self.read_selection(&Hyperslab::all(&self.dataspace.dimensions))
    }

    /// Read `start..end` by `step` on every axis (end exclusive), flattened
    /// in row-major order. `None` steps by one.
    pub fn read_slice(&self, start: &[u64], end: &[u64], step: Option<&[u64]>) -> Result<ArrayData> {
        let step = step.map_or_else(|| vec![1; start.len()], <[u64]>::to_vec);
        self.read_selection(&Hyperslab::new(start.to_vec(), end.to_vec(), step))
    }

    /// Lazily read blocks of `rows` entries along the first axis. The blocks
    /// concatenate to [`Dataset::read_data`].
    pub fn read_chunked(&self, rows: u64) -> Result<ChunkedRead<'_, 'f>> {
        if rows == 0 {
            return Err(Error::invalid(self.source.at(&self.path), "block size of zero rows"));
        }
        Ok(ChunkedRead::new(self, rows))
    }

    pub fn read_selection(&self, sel: &Hyperslab) -> Result<ArrayData> {
        let at = || self.source.at(&self.path);
        if self.dataspace.space_type == DataspaceType::Null {
            return decode_array(&[], &self.datatype, &mut self.source.heap()).map_err(|e| self.err(e));
        }
        sel.validate(&self.dataspace.dimensions)
            .map_err(|e| Error::format(at(), e))?;
        let layout = self.layout()?;
        let pipeline = self.filters()?;
        let fill = self.fill_value()?;
        let trace = self.opts.trace();
        if trace {
            self.trace_storage(&layout, pipeline.as_ref(), sel);
        }
        let info = StorageInfo {
            dims: &self.dataspace.dimensions,
            element_size: self.datatype.size() as usize,
            layout: &layout,
            pipeline: pipeline.as_ref(),
            fill: &fill,
        };
        let bytes = self.source.bytes();
        let raw = read_selection(bytes, self.source.offset_size(), &info, sel).map_err(|e| self.err(e))?;
        decode_array(&raw, &self.datatype, &mut self.source.heap()).map_err(|e| self.err(e))
    }

    fn trace_storage(&self, layout: &DataLayout, pipeline: Option<&FilterPipeline>, sel: &Hyperslab) {
        structure!(
            true,
            file = %self.source.name,
            dataset = %self.path,
            layout = layout.class_name(),
            start = ?sel.start,
            end = ?sel.end,
            step = ?sel.step,
            "read"
        );
        if let Some(p) = pipeline {
            for (stage, filter) in p.filters.iter().enumerate() {
                structure!(true, dataset = %self.path, stage, filter = %filter.display_name(), "filter stage");
            }
        }
        if !matches!(layout, DataLayout::Chunked { .. }) {
            return;
        }
        let bytes = self.source.bytes();
        let Ok(reader) = ChunkReader::new(bytes, self.source.offset_size(), &self.dataspace.dimensions, layout, pipeline) else {
            return;
        };
        for origin in reader.origins(sel) {
            match reader.locate(&origin) {
                Ok(Some(r)) => structure!(
                    true,
                    dataset = %self.path,
                    origin = ?origin,
                    address = r.address,
                    size = r.size,
                    filter_mask = r.filter_mask,
                    "chunk"
                ),
                Ok(None) => structure!(true, dataset = %self.path, origin = ?origin, "chunk not allocated"),
                Err(e) => structure!(true, dataset = %self.path, origin = ?origin, error = %e, "chunk lookup failed"),
            }
        }
    }
}

impl std::fmt::Debug for Dataset<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("file", &self.source.name)
            .field("path", &self.path)
            .field("dtype", &self.dtype())
            .field("shape", &self.dataspace.dimensions)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Datatype of a committed (shared) type stored in another object header.
pub(crate) fn shared_datatype(source: &Source, shared: SharedMessage, trace: bool) -> std::result::Result<Datatype, FormatError> {
    match shared {
        SharedMessage::ObjectHeader(address) => {
            let header = source.parse_header(address, trace)?;
            let msg = header.require(MessageType::Datatype, "committed datatype")?;
            Datatype::parse(&msg.data)
        }
        SharedMessage::SharedHeap(_) => Err(FormatError::UnsupportedFeature(
            "datatype stored in the shared-message heap".into(),
        )),
    }
}

pub(crate) fn resolve_datatype(source: &Source, header: &ObjectHeader, trace: bool) -> std::result::Result<Datatype, FormatError> {
    let msg = header.require(MessageType::Datatype, "datatype")?;
    if msg.flags & FLAG_SHARED != 0 {
        let shared = SharedMessage::parse(&msg.data, source.offset_size())?;
        return shared_datatype(source, shared, trace);
    }
    Datatype::parse(&msg.data)
}

/// Attribute messages of an object; each entry fails on its own.
pub(crate) fn attribute_messages(
    source: &Source,
    header: &ObjectHeader,
    object: &str,
    trace: bool,
) -> Vec<std::result::Result<AttributeMessage, FormatError>> {
    let os = source.offset_size();
    let ls = source.length_size();
    let mut resolve = |shared| shared_datatype(source, shared, trace);
    match collect_attributes(source.bytes(), header, os, ls, &mut resolve) {
        Ok(all) => all,
        Err(e) => {
            // dense index unreadable: keep the compact ones
            structure!(trace, file = %source.name, object, error = %e, "attribute index skipped");
            header
                .find_all(MessageType::Attribute)
                .filter(|m| m.flags & FLAG_SHARED == 0)
                .map(|m| AttributeMessage::parse(&m.data, os, ls, &mut resolve))
                .collect()
        }
    }
}

fn read_attributes(source: &Source, header: &ObjectHeader, object: &str, trace: bool) -> Result<Vec<Attribute>> {
    let mut heap = source.heap();
    let mut out = Vec::new();
    for (i, msg) in attribute_messages(source, header, object, trace).into_iter().enumerate() {
        let decoded = msg.and_then(|m| {
            let value = if m.dataspace.space_type == DataspaceType::Null {
                decode_array(&[], &m.datatype, &mut heap)?
            } else {
                decode_array(&m.data, &m.datatype, &mut heap)?
            };
            Ok(Attribute {
                dtype: DType::from(&m.datatype),
                shape: m.dataspace.dimensions.clone(),
                name: m.name,
                value,
            })
        });
        match decoded {
            Ok(attr) => out.push(attr),
            Err(e) => {
                structure!(trace, file = %source.name, object, index = i, error = %e, "attribute skipped");
            }
        }
    }
    Ok(out)
}
