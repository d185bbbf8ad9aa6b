//! One opened container: its bytes, superblock and metadata cache.
//!
//! A [`crate::File`] owns one source for itself plus one per external file
//! reached through links.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hdfkit_format::data_read::HeapResolver;
use hdfkit_format::error::FormatError;
use hdfkit_format::global_heap::{GlobalHeapCollection, GlobalHeapId};
use hdfkit_format::group_v2;
use hdfkit_format::link_message::LinkMessage;
use hdfkit_format::object_header::ObjectHeader;
use hdfkit_format::signature::find_signature;
use hdfkit_format::superblock::Superblock;

use crate::cache::MetadataCache;
use crate::debug::structure;
use crate::error::{Error, Location, Result, MEMORY_FILE};
use crate::storage::Storage;

pub(crate) struct Source {
    /// Distinguishes sources inside one `File` for cycle detection.
    pub(crate) id: usize,
    pub(crate) name: String,
    /// Canonical path on disk, `None` for in-memory files.
    pub(crate) path: Option<PathBuf>,
    storage: Storage,
    base: usize,
    pub(crate) superblock: Superblock,
    pub(crate) cache: MetadataCache,
}

impl Source {
    pub(crate) fn from_path(id: usize, path: &Path, mmap: bool, cache_bytes: usize, trace: bool) -> Result<Source> {
        let name = path.display().to_string();
        let storage = Storage::open(path, mmap).map_err(|e| Error::io(Location::new(&name, ""), e))?;
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        Source::load(id, name, Some(canonical), storage, cache_bytes, trace)
    }

    pub(crate) fn from_bytes(id: usize, bytes: Vec<u8>, cache_bytes: usize, trace: bool) -> Result<Source> {
        Source::load(id, MEMORY_FILE.to_owned(), None, Storage::Owned(bytes), cache_bytes, trace)
    }

    fn load(
        id: usize,
        name: String,
        path: Option<PathBuf>,
        storage: Storage,
        cache_bytes: usize,
        trace: bool,
    ) -> Result<Source> {
        let at = || Location::new(&name, "");
        let all = storage.as_bytes();
        let base = find_signature(all).map_err(|e| Error::format(at(), e))? as usize;
        let superblock = Superblock::parse(&all[base..]).map_err(|e| Error::format(at(), e))?;
        structure!(
            trace,
            file = %name,
            version = superblock.version,
            base,
            offset_size = superblock.offset_size,
            length_size = superblock.length_size,
            root = superblock.root_object_address,
            mapped = storage.is_mapped(),
            "superblock"
        );
        Ok(Source {
            id,
            name,
            path,
            storage,
            base,
            superblock,
            cache: MetadataCache::new(cache_bytes),
        })
    }

    /// File bytes from the superblock on; every stored address is relative
    /// to this slice.
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.storage.as_bytes()[self.base..]
    }

    pub(crate) fn base(&self) -> usize {
        self.base
    }

    pub(crate) fn is_mapped(&self) -> bool {
        self.storage.is_mapped()
    }

    pub(crate) fn offset_size(&self) -> u8 {
        self.superblock.offset_size
    }

    pub(crate) fn length_size(&self) -> u8 {
        self.superblock.length_size
    }

    pub(crate) fn root_address(&self) -> u64 {
        self.superblock.root_object_address
    }

    pub(crate) fn at(&self, object: &str) -> Location {
        Location::new(&self.name, object)
    }

    /// Directory that relative external file names resolve against.
    pub(crate) fn directory(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }

    pub(crate) fn parse_header(&self, address: u64, trace: bool) -> std::result::Result<Arc<ObjectHeader>, FormatError> {
        if let Some(h) = self.cache.header(address) {
            return Ok(h);
        }
        let header = Arc::new(ObjectHeader::parse(
            self.bytes(),
            address,
            self.offset_size(),
            self.length_size(),
        )?);
        structure!(
            trace,
            file = %self.name,
            address,
            version = header.version(),
            messages = header.messages.len(),
            "object header"
        );
        self.cache.put_header(header.clone());
        Ok(header)
    }

    pub(crate) fn header(&self, address: u64, object: &str, trace: bool) -> Result<Arc<ObjectHeader>> {
        self.parse_header(address, trace)
            .map_err(|e| Error::format(self.at(object), e))
    }

    /// Links of the group whose header is `header`.
    pub(crate) fn links(&self, header: &ObjectHeader, object: &str, trace: bool) -> Result<Arc<Vec<LinkMessage>>> {
        if let Some(links) = self.cache.links(header.address) {
            return Ok(links);
        }
        let links = group_v2::read_links(self.bytes(), header, self.offset_size(), self.length_size())
            .map_err(|e| Error::format(self.at(object), e))?;
        structure!(
            trace,
            file = %self.name,
            group = object,
            address = header.address,
            links = links.len(),
            "group listing"
        );
        let links = Arc::new(links);
        self.cache.put_links(header.address, links.clone());
        Ok(links)
    }

    /// Global heap collection at `address`, parsed once per handle.
    pub(crate) fn collection(&self, address: u64) -> std::result::Result<Arc<GlobalHeapCollection>, FormatError> {
        if let Some(col) = self.cache.collection(address) {
            return Ok(col);
        }
        let col = Arc::new(GlobalHeapCollection::parse(self.bytes(), address, self.length_size())?);
        self.cache.put_collection(col.clone());
        Ok(col)
    }

    /// Resolver for variable-length elements stored in this file.
    pub(crate) fn heap(&self) -> SourceHeap<'_> {
        SourceHeap {
            source: self,
            last: None,
        }
    }
}

/// Global heap access backed by the source's cache. The most recent
/// collection is held locally, so runs of elements in one collection skip
/// the cache lock.
pub(crate) struct SourceHeap<'s> {
    source: &'s Source,
    last: Option<Arc<GlobalHeapCollection>>,
}

impl HeapResolver for SourceHeap<'_> {
    fn global_object(&mut self, id: &GlobalHeapId) -> std::result::Result<Vec<u8>, FormatError> {
        let col = match &self.last {
            Some(col) if col.address == id.collection => col.clone(),
            _ => {
                let col = self.source.collection(id.collection)?;
                self.last = Some(col.clone());
                col
            }
        };
        let index = u16::try_from(id.index).map_err(|_| FormatError::HeapObjectNotFound {
            collection: id.collection,
            index: u16::MAX,
        })?;
        Ok(col.get(index)?.data.clone())
    }
}
