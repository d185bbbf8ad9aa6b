//! Bounded per-handle cache of decoded metadata, keyed by file address.
//!
//! Object headers, group link listings and global heap collections are kept
//! until the byte budget is exceeded, then the oldest entries go first. Cached values are shared
//! through `Arc`, so eviction never invalidates a handle already given out.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use hdfkit_format::global_heap::GlobalHeapCollection;
use hdfkit_format::link_message::LinkMessage;
use hdfkit_format::object_header::ObjectHeader;
use serde::Serialize;

/// Default byte budget for one open file.
pub const DEFAULT_CACHE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Key {
    Header(u64),
    Links(u64),
    Heap(u64),
}

#[derive(Debug, Clone)]
enum Entry {
    Header(Arc<ObjectHeader>),
    Links(Arc<Vec<LinkMessage>>),
    Heap(Arc<GlobalHeapCollection>),
}

/// Counters since the handle was opened or last cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub bytes: usize,
}

#[derive(Debug, Default)]
struct Inner {
    map: HashMap<Key, (Entry, usize)>,
    order: VecDeque<Key>,
    stats: CacheStats,
}

#[derive(Debug)]
pub(crate) struct MetadataCache {
    budget: usize,
    inner: Mutex<Inner>,
}

fn header_cost(h: &ObjectHeader) -> usize {
    64 + h.messages.iter().map(|m| 32 + m.data.len()).sum::<usize>()
}

fn links_cost(links: &[LinkMessage]) -> usize {
    64 + links.iter().map(|l| 64 + l.name.len()).sum::<usize>()
}

fn heap_cost(col: &GlobalHeapCollection) -> usize {
    64 + col.objects.iter().map(|o| 16 + o.data.len()).sum::<usize>()
}

impl MetadataCache {
    pub(crate) fn new(budget: usize) -> Self {
        MetadataCache {
            budget,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get(&self, key: Key) -> Option<Entry> {
        let mut inner = self.lock();
        let hit = inner.map.get(&key).map(|(e, _)| e.clone());
        if hit.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        hit
    }

    fn put(&self, key: Key, entry: Entry, cost: usize) {
        if cost > self.budget {
            return;
        }
        let mut inner = self.lock();
        if let Some((_, old)) = inner.map.insert(key, (entry, cost)) {
            inner.stats.bytes -= old;
        } else {
            inner.order.push_back(key);
        }
        inner.stats.bytes += cost;
        while inner.stats.bytes > self.budget {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some((_, c)) = inner.map.remove(&oldest) {
                inner.stats.bytes -= c;
                inner.stats.evictions += 1;
            }
        }
        inner.stats.entries = inner.map.len();
    }

    pub(crate) fn header(&self, address: u64) -> Option<Arc<ObjectHeader>> {
        match self.get(Key::Header(address)) {
            Some(Entry::Header(h)) => Some(h),
            _ => None,
        }
    }

    pub(crate) fn put_header(&self, header: Arc<ObjectHeader>) {
        let cost = header_cost(&header);
        self.put(Key::Header(header.address), Entry::Header(header), cost);
    }

    pub(crate) fn links(&self, group_address: u64) -> Option<Arc<Vec<LinkMessage>>> {
        match self.get(Key::Links(group_address)) {
            Some(Entry::Links(l)) => Some(l),
            _ => None,
        }
    }

    pub(crate) fn put_links(&self, group_address: u64, links: Arc<Vec<LinkMessage>>) {
        let cost = links_cost(&links);
        self.put(Key::Links(group_address), Entry::Links(links), cost);
    }

    pub(crate) fn collection(&self, address: u64) -> Option<Arc<GlobalHeapCollection>> {
        match self.get(Key::Heap(address)) {
            Some(Entry::Heap(c)) => Some(c),
            _ => None,
        }
    }

    pub(crate) fn put_collection(&self, collection: Arc<GlobalHeapCollection>) {
        let cost = heap_cost(&collection);
        self.put(Key::Heap(collection.address), Entry::Heap(collection), cost);
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.lock();
        *inner = Inner::default();
    }

    pub(crate) fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdfkit_format::global_heap::GlobalHeapObject;
    use hdfkit_format::message_type::MessageType;
    use hdfkit_format::object_header::{HeaderMessage, HeaderPrefix};

    fn header(address: u64, payload: usize) -> Arc<ObjectHeader> {
        Arc::new(ObjectHeader {
            address,
            prefix: HeaderPrefix {
                version: 1,
                flags: 0,
                reference_count: 1,
                modification_time: None,
                attribute_phase_change: None,
            },
            messages: vec![HeaderMessage {
                msg_type: MessageType::Dataspace,
                flags: 0,
                creation_order: None,
                data: vec![0; payload],
            }],
        })
    }

    #[test]
    fn hit_and_miss_counts() {
        let cache = MetadataCache::new(DEFAULT_CACHE_BYTES);
        assert!(cache.header(0x60).is_none());
        cache.put_header(header(0x60, 10));
        assert_eq!(cache.header(0x60).unwrap().address, 0x60);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn budget_evicts_oldest() {
        let cache = MetadataCache::new(1000);
        for addr in 0..10 {
            cache.put_header(header(addr, 200));
        }
        let stats = cache.stats();
        assert!(stats.bytes <= 1000);
        assert!(stats.evictions > 0);
        assert!(cache.header(9).is_some());
        assert!(cache.header(0).is_none());
    }

    #[test]
    fn oversized_entries_are_not_kept() {
        let cache = MetadataCache::new(100);
        cache.put_header(header(1, 500));
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn kinds_share_an_address_space_without_clashing() {
        let cache = MetadataCache::new(DEFAULT_CACHE_BYTES);
        cache.put_header(header(0x40, 8));
        cache.put_collection(Arc::new(GlobalHeapCollection {
            address: 0x40,
            collection_size: 4096,
            objects: vec![GlobalHeapObject {
                index: 1,
                reference_count: 0,
                data: b"abc".to_vec(),
            }],
        }));
        assert_eq!(cache.header(0x40).unwrap().address, 0x40);
        assert_eq!(cache.collection(0x40).unwrap().objects[0].data, b"abc");
        assert!(cache.links(0x40).is_none());
        assert_eq!(cache.stats().entries, 2);
    }

    #[test]
    fn clear_drops_everything() {
        let cache = MetadataCache::new(DEFAULT_CACHE_BYTES);
        cache.put_header(header(1, 8));
        cache.put_links(1, Arc::new(vec![LinkMessage::hard("a", 2)]));
        cache.clear();
        assert!(cache.header(1).is_none());
        assert!(cache.links(1).is_none());
        assert_eq!(cache.stats().entries, 0);
    }
}
