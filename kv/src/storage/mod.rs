//! Single-file key-value storage engine.
//!
//! # File Format
//!
//! The database is stored in a single file:
//!
//! - Bytes 0-15: file header (magic, root page, free-list head, page count)
//! - Then an array of 4KB pages; page `n` starts at `16 + 4096 * n`
//! - Page 0 is never used, so id 0 doubles as the null page
//!
//! # Layers
//!
//! - `Storage`: header and page I/O (`DatabaseFile` on disk, `MemoryStorage`
//!   in tests)
//! - `PageCache`: fixed-capacity page cache with write-back of dirty pages
//! - `Pager`: free list, file extension and the in-memory header
//! - `BTree`: the ordered index built from pages
//!
//! # Usage
//!
//! ```ignore
//! use kv::storage::{BTree, DatabaseFile};
//!
//! let file = DatabaseFile::open_or_create(path)?;
//! let mut tree = BTree::open(file, 1024)?;
//! tree.put(1, 100)?;
//! tree.flush(true)?;
//! ```

mod btree;
mod buffer_pool;
mod cache_list;
mod file;
mod header;
mod io;
mod memory;
mod page;
mod pager;

pub use btree::{BTree, BTreeError, Cursor, TreeStats};
pub use buffer_pool::{CacheError, CacheStats, PageCache};
pub use file::{DatabaseFile, FileError, page_offset};
pub use header::{FileHeader, HEADER_SIZE, HeaderError, MAGIC};
pub use io::{ErrorClass, Storage, StorageError};
pub use memory::{FaultConfig, MemoryStorage, MemoryStorageStats};
pub use page::{
    MIN_RECORDS, NULL_PAGE, ORDER, PAGE_SIZE, Page, PageError, PageId, PageType, Record,
};
pub use pager::{EXTEND_PAGES, Pager, PagerError};
