//! Page cache mediating all page I/O.
//!
//! The cache owns a fixed number of page-sized slots, allocated once at
//! construction. Every resident page occupies exactly one slot, and every
//! slot sits on exactly one of the free, clean or dirty lists.
//!
//! # Design
//!
//! - A page id maps to at most one slot (`index`), so there is never more
//!   than one in-memory copy of a page
//! - Clean pages are kept in LRU order; only clean pages are ever evicted
//! - Dirty pages stay resident until `flush` writes them back, so a modified
//!   page is never silently dropped
//! - `flush(false)` only writes once half of the slots are dirty, batching
//!   write-back while bounding the number of unwritten pages
//!
//! # Invariants
//!
//! - `index.len() == lists.len(Clean) + lists.len(Dirty)`
//! - Free + clean + dirty == capacity
//! - Resident page ids are within `[1, page_count)`

use std::collections::HashMap;

use crate::storage::cache_list::{CacheLists, SlotList};
use crate::storage::io::{ErrorClass, Storage, StorageError};
use crate::storage::page::{NULL_PAGE, Page, PageId};

/// Counters describing cache behaviour.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from a resident slot.
    pub hits: u64,
    /// Lookups that loaded the page from storage.
    pub misses: u64,
    /// Clean pages dropped to make room.
    pub evictions: u64,
    /// Pages written back by `flush`.
    pub writes: u64,
}

struct Slot {
    page_id: PageId,
    page: Page,
}

/// A fixed-capacity page cache over a `Storage`.
///
/// # Pre-conditions
/// - `capacity` must be > 0 when creating
///
/// # Invariants
/// - Each page id is resident in at most one slot
/// - A dirty slot is only released by `flush`
pub struct PageCache<S: Storage> {
    storage: S,
    slots: Vec<Slot>,
    lists: CacheLists,
    index: HashMap<PageId, usize>,
    page_count: u32,
    stats: CacheStats,
}

impl<S: Storage> PageCache<S> {
    /// Create a cache with `capacity` slots over `storage`.
    ///
    /// `page_count` is the current number of page slots in the file; valid
    /// page ids are `[1, page_count)`.
    ///
    /// # Panics
    /// Panics if capacity is 0.
    #[must_use]
    pub fn new(storage: S, capacity: usize, page_count: u32) -> Self {
        assert!(capacity > 0, "Page cache capacity must be positive");

        let slots = (0..capacity)
            .map(|_| Slot {
                page_id: NULL_PAGE,
                page: Page::new(),
            })
            .collect();

        Self {
            storage,
            slots,
            lists: CacheLists::new(capacity),
            index: HashMap::with_capacity(capacity),
            page_count,
            stats: CacheStats::default(),
        }
    }

    /// Get the resident copy of a page, loading it if needed.
    ///
    /// A clean hit is promoted to the most-recently-used position.
    pub fn get_page(&mut self, page_id: PageId) -> Result<&Page, CacheError> {
        let slot = self.slot_for(page_id)?;
        Ok(&self.slots[slot].page)
    }

    /// Get a page for modification. The page is marked dirty.
    pub fn get_page_mut(&mut self, page_id: PageId) -> Result<&mut Page, CacheError> {
        let slot = self.slot_for(page_id)?;
        self.dirty_slot(slot);
        Ok(&mut self.slots[slot].page)
    }

    /// Mark a resident page dirty.
    ///
    /// Already-dirty pages are left alone. Marking a page that is not
    /// resident is a contract violation: callers must `get_page` first.
    pub fn mark_dirty(&mut self, page_id: PageId) -> Result<(), CacheError> {
        let slot = *self
            .index
            .get(&page_id)
            .ok_or(CacheError::NotResident(page_id))?;
        self.dirty_slot(slot);
        Ok(())
    }

    /// Write dirty pages back to storage.
    ///
    /// Unless `force` is set, nothing happens while fewer than half of the
    /// slots are dirty. Returns whether a write-back took place. Written
    /// slots are released to the free list.
    ///
    /// # Post-conditions
    /// - If `Ok(true)`, no page is dirty
    pub fn flush(&mut self, force: bool) -> Result<bool, CacheError> {
        let dirty = self.lists.len(SlotList::Dirty);
        if !force && dirty < self.capacity() / 2 {
            return Ok(false);
        }

        while let Some(slot) = self.lists.back(SlotList::Dirty) {
            let Slot { page_id, page } = &self.slots[slot];
            self.storage.write_page(*page_id, page)?;
            self.stats.writes += 1;
            self.release_slot(slot);
        }

        tracing::debug!(pages = dirty, force, "flushed dirty pages");
        Ok(true)
    }

    /// Update the valid page-id bound after the file grows.
    pub const fn set_page_count(&mut self, page_count: u32) {
        self.page_count = page_count;
    }

    /// Current valid page-id bound.
    #[must_use]
    pub const fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of dirty slots.
    #[must_use]
    pub const fn dirty_count(&self) -> usize {
        self.lists.len(SlotList::Dirty)
    }

    /// Number of resident pages, clean or dirty.
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.index.len()
    }

    /// Whether `page_id` is resident.
    #[must_use]
    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.index.contains_key(&page_id)
    }

    /// Whether `page_id` is resident and dirty.
    #[must_use]
    pub fn is_dirty(&self, page_id: PageId) -> bool {
        self.index
            .get(&page_id)
            .is_some_and(|&slot| self.lists.list_of(slot) == SlotList::Dirty)
    }

    /// Get the current statistics.
    #[must_use]
    pub const fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Get a reference to the underlying storage.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Get mutable access to the underlying storage.
    ///
    /// Writes made here bypass the cache. Only pages that are not resident
    /// may be written this way.
    pub const fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Consume the cache and return the storage. Dirty pages are dropped.
    pub fn into_storage(self) -> S {
        self.storage
    }

    fn slot_for(&mut self, page_id: PageId) -> Result<usize, CacheError> {
        if page_id == NULL_PAGE || page_id >= self.page_count {
            return Err(CacheError::PageOutOfBounds {
                page_id,
                page_count: self.page_count,
            });
        }

        if let Some(&slot) = self.index.get(&page_id) {
            self.stats.hits += 1;
            if self.lists.list_of(slot) == SlotList::Clean {
                self.lists.move_to_front(slot, SlotList::Clean);
            }
            return Ok(slot);
        }

        self.stats.misses += 1;
        let slot = self.claim_slot()?;
        self.load_into(slot, page_id)?;
        Ok(slot)
    }

    /// Take a free slot, evicting the least recently used clean page if
    /// there is none. The slot is left on the free list.
    fn claim_slot(&mut self) -> Result<usize, CacheError> {
        if let Some(slot) = self.lists.front(SlotList::Free) {
            return Ok(slot);
        }

        let Some(victim) = self.lists.back(SlotList::Clean) else {
            return Err(CacheError::Exhausted {
                capacity: self.capacity(),
            });
        };
        tracing::trace!(page_id = self.slots[victim].page_id, "evicting clean page");
        self.stats.evictions += 1;
        self.release_slot(victim);
        Ok(victim)
    }

    fn load_into(&mut self, slot: usize, page_id: PageId) -> Result<(), CacheError> {
        let page = &mut self.slots[slot].page;
        self.storage.read_page(page_id, page)?;

        let found = page.id();
        if found != page_id {
            tracing::warn!(requested = page_id, found, "page id mismatch on load");
            return Err(CacheError::PageMismatch {
                requested: page_id,
                found,
            });
        }
        if let Err(e) = page.validate() {
            tracing::warn!(page_id, error = %e, "corrupt page header on load");
            return Err(StorageError::Corruption(e.to_string()).into());
        }

        self.slots[slot].page_id = page_id;
        self.index.insert(page_id, slot);
        self.lists.move_to_front(slot, SlotList::Clean);
        Ok(())
    }

    fn dirty_slot(&mut self, slot: usize) {
        if self.lists.list_of(slot) != SlotList::Dirty {
            self.lists.move_to_front(slot, SlotList::Dirty);
        }
    }

    fn release_slot(&mut self, slot: usize) {
        let page_id = std::mem::replace(&mut self.slots[slot].page_id, NULL_PAGE);
        self.index.remove(&page_id);
        self.lists.move_to_front(slot, SlotList::Free);
    }
}

/// Errors that can occur in the page cache.
#[derive(Debug)]
pub enum CacheError {
    /// Storage error.
    Storage(StorageError),
    /// Page id outside `[1, page_count)`.
    PageOutOfBounds { page_id: PageId, page_count: u32 },
    /// The page read back carries a different id than requested.
    PageMismatch { requested: PageId, found: PageId },
    /// No free slot and no clean page to evict.
    Exhausted { capacity: usize },
    /// A page was marked dirty without being resident.
    NotResident(PageId),
}

impl CacheError {
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Storage(e) => e.class(),
            Self::PageOutOfBounds { .. } => ErrorClass::Recoverable,
            Self::PageMismatch { .. } | Self::Exhausted { .. } | Self::NotResident(_) => {
                ErrorClass::Integrity
            }
        }
    }
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::PageOutOfBounds {
                page_id,
                page_count,
            } => write!(
                f,
                "page {page_id} out of bounds (page count: {page_count})"
            ),
            Self::PageMismatch { requested, found } => {
                write!(f, "loaded page {found} while requesting page {requested}")
            }
            Self::Exhausted { capacity } => write!(
                f,
                "page cache exhausted: all {capacity} slots are dirty"
            ),
            Self::NotResident(page_id) => {
                write!(f, "page {page_id} marked dirty but not resident")
            }
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for CacheError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{FaultConfig, MemoryStorage};
    use crate::storage::page::PageType;

    /// Storage holding pages `1..count`, each stamped with its own id.
    fn seeded_storage(count: u32) -> MemoryStorage {
        let mut storage = MemoryStorage::new();
        for id in 1..count {
            let mut page = Page::new();
            page.set_id(id);
            page.reset(PageType::Leaf);
            storage.write_page(id, &page).expect("seed page");
        }
        storage.reset_stats();
        storage
    }

    fn cache(capacity: usize, pages: u32) -> PageCache<MemoryStorage> {
        PageCache::new(seeded_storage(pages), capacity, pages)
    }

    #[test]
    fn test_get_page_loads_once() {
        let mut cache = cache(4, 10);

        assert_eq!(cache.get_page(3).expect("get").id(), 3);
        assert_eq!(cache.get_page(3).expect("get").id(), 3);

        assert_eq!(cache.storage().stats().reads, 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.resident_count(), 1);
    }

    #[test]
    fn test_lru_evicts_least_recently_used_clean_page() {
        let mut cache = cache(3, 10);
        for id in [1, 2, 3] {
            cache.get_page(id).expect("get");
        }

        // Touch 1 so that 2 becomes the LRU page.
        cache.get_page(1).expect("get");
        cache.get_page(4).expect("get");

        assert!(cache.is_resident(1));
        assert!(!cache.is_resident(2));
        assert!(cache.is_resident(3));
        assert!(cache.is_resident(4));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_dirty_pages_are_never_evicted() {
        let mut cache = cache(3, 20);
        cache.get_page_mut(1).expect("get").set_key(0, 111);
        cache.get_page_mut(2).expect("get").set_key(0, 222);

        // Cycle many clean pages through the single remaining slot.
        for id in 3..20 {
            cache.get_page(id).expect("get");
        }

        assert!(cache.is_dirty(1));
        assert!(cache.is_dirty(2));
        assert_eq!(cache.get_page(1).expect("get").key(0), 111);
        assert_eq!(cache.get_page(2).expect("get").key(0), 222);
        assert_eq!(cache.storage().stats().writes, 0);
    }

    #[test]
    fn test_single_copy_per_page() {
        let mut cache = cache(2, 10);
        cache.get_page_mut(5).expect("get").set_key(0, 42);
        for id in [6, 7, 8, 5, 6] {
            cache.get_page(id).expect("get");
        }
        assert_eq!(cache.get_page(5).expect("get").key(0), 42);
        assert!(cache.resident_count() <= cache.capacity());
    }

    #[test]
    fn test_exhausted_when_every_slot_is_dirty() {
        let mut cache = cache(2, 10);
        cache.get_page_mut(1).expect("get");
        cache.get_page_mut(2).expect("get");

        let err = cache.get_page(3).expect_err("should exhaust");
        assert!(matches!(err, CacheError::Exhausted { capacity: 2 }));
        assert_eq!(err.class(), ErrorClass::Integrity);
    }

    #[test]
    fn test_flush_threshold() {
        let mut cache = cache(8, 20);
        for id in 1..4 {
            cache.get_page_mut(id).expect("get");
        }

        // 3 dirty out of 8 is below half.
        assert!(!cache.flush(false).expect("flush"));
        assert_eq!(cache.storage().stats().writes, 0);
        assert_eq!(cache.dirty_count(), 3);

        cache.get_page_mut(4).expect("get");
        assert!(cache.flush(false).expect("flush"));
        assert_eq!(cache.storage().stats().writes, 4);
        assert_eq!(cache.dirty_count(), 0);
    }

    #[test]
    fn test_forced_flush_writes_everything() {
        let mut cache = cache(8, 20);
        cache.get_page_mut(7).expect("get").set_key(3, -9);

        assert!(cache.flush(true).expect("flush"));
        assert_eq!(cache.dirty_count(), 0);
        assert!(!cache.is_resident(7));

        let stored = cache.storage().stored_page(7).expect("written");
        assert_eq!(stored.key(3), -9);

        // Nothing left to write, but a forced flush still reports it ran.
        assert!(cache.flush(true).expect("flush"));
        assert_eq!(cache.storage().stats().writes, 1);
    }

    #[test]
    fn test_mark_dirty() {
        let mut cache = cache(4, 10);
        assert!(matches!(
            cache.mark_dirty(2),
            Err(CacheError::NotResident(2))
        ));

        cache.get_page(2).expect("get");
        cache.mark_dirty(2).expect("mark");
        cache.mark_dirty(2).expect("mark again");
        assert!(cache.is_dirty(2));
        assert_eq!(cache.dirty_count(), 1);
    }

    #[test]
    fn test_page_bounds() {
        let mut cache = cache(4, 10);
        assert!(matches!(
            cache.get_page(0),
            Err(CacheError::PageOutOfBounds { page_id: 0, .. })
        ));
        let err = cache.get_page(10).expect_err("out of bounds");
        assert_eq!(err.class(), ErrorClass::Recoverable);

        cache.set_page_count(11);
        assert!(matches!(
            cache.get_page(10),
            Err(CacheError::PageMismatch { requested: 10, found: 0 })
        ));
    }

    #[test]
    fn test_page_mismatch_is_not_cached() {
        let mut storage = seeded_storage(10);
        storage.stored_page_mut(4).expect("page").set_id(9);
        let mut cache = PageCache::new(storage, 4, 10);

        let err = cache.get_page(4).expect_err("mismatch");
        assert!(matches!(err, CacheError::PageMismatch { requested: 4, found: 9 }));
        assert!(!cache.is_resident(4));
        assert!(!cache.is_resident(9));
    }

    #[test]
    fn test_corrupt_header_is_rejected_on_load() {
        let mut storage = seeded_storage(10);
        storage.stored_page_mut(3).expect("page").set_raw_record_count(400);
        let mut cache = PageCache::new(storage, 4, 10);

        let err = cache.get_page(3).expect_err("corrupt");
        assert!(matches!(err, CacheError::Storage(StorageError::Corruption(_))));
        assert_eq!(err.class(), ErrorClass::Integrity);
        assert!(!cache.is_resident(3));
    }

    #[test]
    fn test_storage_errors_propagate() {
        let mut cache = cache(4, 10);
        cache.get_page_mut(1).expect("get");
        cache.storage_mut().set_faults(FaultConfig {
            fail_reads: true,
            fail_writes: true,
            fail_syncs: false,
        });

        let err = cache.get_page(2).expect_err("read fault");
        assert_eq!(err.class(), ErrorClass::Io);

        assert!(cache.flush(true).is_err());
        // The page that failed to write is still dirty.
        assert!(cache.is_dirty(1));
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_zero_capacity_panics() {
        let _ = PageCache::new(MemoryStorage::new(), 0, 1);
    }
}
