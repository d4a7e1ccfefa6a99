//! Page allocation over the page cache.
//!
//! The pager owns the in-memory copy of the file header and hands out pages
//! from the on-disk free list. Free pages are chained through `next_page`;
//! when the list runs dry the file is extended by `EXTEND_PAGES` pages at a
//! time, written straight to storage as an already-linked free chain.
//!
//! # Invariants
//!
//! - `header.free` is `NULL_PAGE` or the id of a page of type `Free`
//! - `header.page_count` equals the cache's valid-id bound
//! - The header on disk is only rewritten after a flush that wrote pages, so
//!   it never points at pages that were not yet written back

use crate::storage::buffer_pool::{CacheError, CacheStats, PageCache};
use crate::storage::header::FileHeader;
use crate::storage::io::{ErrorClass, Storage, StorageError};
use crate::storage::page::{NULL_PAGE, Page, PageError, PageId, PageType};

/// Number of pages appended to the file when the free list is empty.
pub const EXTEND_PAGES: u32 = 1024;

/// Page allocator and header owner for one database.
pub struct Pager<S: Storage> {
    cache: PageCache<S>,
    header: FileHeader,
}

impl<S: Storage> Pager<S> {
    /// Read the header from `storage` and build a cache of `cache_pages`
    /// slots over it.
    pub fn open(mut storage: S, cache_pages: usize) -> Result<Self, PagerError> {
        let header = storage.read_header()?;
        tracing::debug!(
            root = header.root,
            free = header.free,
            page_count = header.page_count,
            "opened pager"
        );
        Ok(Self {
            cache: PageCache::new(storage, cache_pages, header.page_count),
            header,
        })
    }

    /// Root page of the tree, or `NULL_PAGE`.
    #[must_use]
    pub const fn root(&self) -> PageId {
        self.header.root
    }

    /// Set the root page. Persisted with the next header write.
    pub const fn set_root(&mut self, root: PageId) {
        self.header.root = root;
    }

    /// The in-memory header.
    #[must_use]
    pub const fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Get a page for reading.
    pub fn page(&mut self, page_id: PageId) -> Result<&Page, PagerError> {
        Ok(self.cache.get_page(page_id)?)
    }

    /// Get a page for modification; it becomes dirty.
    pub fn page_mut(&mut self, page_id: PageId) -> Result<&mut Page, PagerError> {
        Ok(self.cache.get_page_mut(page_id)?)
    }

    /// Pop a page off the free list and initialize it as `page_type`.
    ///
    /// # Post-conditions
    /// - The returned page is resident, dirty, has no parent, no next page
    ///   and no records
    pub fn create_page(&mut self, page_type: PageType) -> Result<PageId, PagerError> {
        if self.header.free == NULL_PAGE {
            self.extend(EXTEND_PAGES)?;
        }

        let page_id = self.header.free;
        let page = self.cache.get_page_mut(page_id)?;
        let found = page.page_type()?;
        if found != PageType::Free {
            tracing::warn!(page_id, ?found, "free list points at a page in use");
            return Err(PagerError::NotFree { page_id, found });
        }

        self.header.free = page.next_page();
        page.reset(page_type);
        Ok(page_id)
    }

    /// Return a page to the head of the free list.
    pub fn free_page(&mut self, page_id: PageId) -> Result<(), PagerError> {
        let next = self.header.free;
        let page = self.cache.get_page_mut(page_id)?;
        page.reset(PageType::Free);
        page.set_next_page(next);
        self.header.free = page_id;
        Ok(())
    }

    /// Append `count` free pages to the file.
    ///
    /// The new pages are chained in id order and the last one links to the
    /// previous free-list head. Page 0 is written along with the first chunk
    /// of an empty file but never handed out.
    pub fn extend(&mut self, count: u32) -> Result<(), PagerError> {
        let start = self.header.page_count;
        let new_count = start
            .checked_add(count)
            .ok_or(PagerError::FileFull { page_count: start })?;

        let mut page = Page::new();
        for page_id in start..new_count {
            page.set_id(page_id);
            page.reset(PageType::Free);
            if page_id + 1 == new_count {
                page.set_next_page(self.header.free);
            } else {
                page.set_next_page(page_id + 1);
            }
            self.cache.storage_mut().write_page(page_id, &page)?;
        }

        self.header.free = if start == 0 { 1 } else { start };
        self.header.page_count = new_count;
        self.cache.set_page_count(new_count);

        tracing::debug!(from = start, to = new_count, "extended database file");
        Ok(())
    }

    /// Write back dirty pages (see `PageCache::flush`).
    ///
    /// When pages were written the header follows them. A forced flush also
    /// syncs storage.
    pub fn flush(&mut self, force: bool) -> Result<bool, PagerError> {
        if !self.cache.flush(force)? {
            return Ok(false);
        }

        let storage = self.cache.storage_mut();
        storage.write_header(&self.header)?;
        if force {
            storage.sync()?;
        }
        Ok(true)
    }

    /// Cache statistics.
    #[must_use]
    pub const fn cache_stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    /// The page cache.
    #[must_use]
    pub const fn cache(&self) -> &PageCache<S> {
        &self.cache
    }

    /// Mutable access to the page cache.
    pub const fn cache_mut(&mut self) -> &mut PageCache<S> {
        &mut self.cache
    }

    /// Consume the pager and return the storage. Unflushed changes are lost.
    pub fn into_storage(self) -> S {
        self.cache.into_storage()
    }
}

/// Errors that can occur during page allocation.
#[derive(Debug)]
pub enum PagerError {
    /// Page cache error.
    Cache(CacheError),
    /// Storage error.
    Storage(StorageError),
    /// Malformed page contents.
    Page(PageError),
    /// The free list head is not a free page.
    NotFree { page_id: PageId, found: PageType },
    /// Page ids are exhausted.
    FileFull { page_count: u32 },
}

impl PagerError {
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Cache(e) => e.class(),
            Self::Storage(e) => e.class(),
            Self::Page(_) | Self::NotFree { .. } => ErrorClass::Integrity,
            Self::FileFull { .. } => ErrorClass::Io,
        }
    }
}

impl std::fmt::Display for PagerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cache(e) => write!(f, "cache error: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Page(e) => write!(f, "page error: {e}"),
            Self::NotFree { page_id, found } => {
                write!(f, "free list head {page_id} is a {found:?} page")
            }
            Self::FileFull { page_count } => {
                write!(f, "cannot extend file past {page_count} pages")
            }
        }
    }
}

impl std::error::Error for PagerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Cache(e) => Some(e),
            Self::Storage(e) => Some(e),
            Self::Page(e) => Some(e),
            Self::NotFree { .. } | Self::FileFull { .. } => None,
        }
    }
}

impl From<CacheError> for PagerError {
    fn from(e: CacheError) -> Self {
        Self::Cache(e)
    }
}

impl From<StorageError> for PagerError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<PageError> for PagerError {
    fn from(e: PageError) -> Self {
        Self::Page(e)
    }
}
