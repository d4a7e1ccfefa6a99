//! In-memory storage for deterministic testing.
//!
//! This module provides an in-memory implementation of the `Storage` trait
//! that counts every I/O call and can fail reads, writes or syncs on demand.
//! Cache and tree tests use it to assert exactly how many pages were written
//! and to exercise the error paths of the engine without touching a disk.

use std::collections::HashMap;

use crate::storage::header::{FileHeader, HEADER_SIZE};
use crate::storage::io::{Storage, StorageError};
use crate::storage::page::{Page, PageId};

/// Which operations should fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultConfig {
    /// Fail every page read.
    pub fail_reads: bool,
    /// Fail every page or header write.
    pub fail_writes: bool,
    /// Fail every sync.
    pub fail_syncs: bool,
}

/// Statistics about storage operations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStorageStats {
    /// Number of page reads.
    pub reads: u64,
    /// Number of page writes.
    pub writes: u64,
    /// Number of header writes.
    pub header_writes: u64,
    /// Number of syncs.
    pub syncs: u64,
}

/// In-memory storage implementation.
///
/// Pages that were never written read back as zeroed pages, which is what a
/// sparse file would return.
pub struct MemoryStorage {
    pages: HashMap<PageId, Page>,
    header: [u8; HEADER_SIZE],
    faults: FaultConfig,
    stats: MemoryStorageStats,
}

impl MemoryStorage {
    /// Create storage holding a fresh header and no pages.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            header: FileHeader::new().to_bytes(),
            faults: FaultConfig::default(),
            stats: MemoryStorageStats::default(),
        }
    }

    /// Get the current statistics.
    #[must_use]
    pub const fn stats(&self) -> &MemoryStorageStats {
        &self.stats
    }

    /// Reset statistics.
    pub fn reset_stats(&mut self) {
        self.stats = MemoryStorageStats::default();
    }

    /// Update the fault configuration.
    pub const fn set_faults(&mut self, faults: FaultConfig) {
        self.faults = faults;
    }

    /// Direct access to a stored page, bypassing statistics and faults.
    #[must_use]
    pub fn stored_page(&self, page_id: PageId) -> Option<&Page> {
        self.pages.get(&page_id)
    }

    /// Mutate a stored page directly, for corruption tests.
    pub fn stored_page_mut(&mut self, page_id: PageId) -> Option<&mut Page> {
        self.pages.get_mut(&page_id)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn read_header(&mut self) -> Result<FileHeader, StorageError> {
        Ok(FileHeader::from_bytes(&self.header)?)
    }

    fn write_header(&mut self, header: &FileHeader) -> Result<(), StorageError> {
        if self.faults.fail_writes {
            return Err(StorageError::InjectedFault("header write".to_string()));
        }
        self.stats.header_writes += 1;
        self.header = header.to_bytes();
        Ok(())
    }

    fn read_page(&mut self, page_id: PageId, page: &mut Page) -> Result<(), StorageError> {
        if self.faults.fail_reads {
            return Err(StorageError::InjectedFault(format!("read of page {page_id}")));
        }
        self.stats.reads += 1;
        match self.pages.get(&page_id) {
            Some(stored) => page.as_bytes_mut().copy_from_slice(stored.as_bytes()),
            None => page.as_bytes_mut().fill(0),
        }
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        if self.faults.fail_writes {
            return Err(StorageError::InjectedFault(format!("write of page {page_id}")));
        }
        self.stats.writes += 1;
        self.pages
            .entry(page_id)
            .or_default()
            .as_bytes_mut()
            .copy_from_slice(page.as_bytes());
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        if self.faults.fail_syncs {
            return Err(StorageError::InjectedFault("sync".to_string()));
        }
        self.stats.syncs += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageType;

    #[test]
    fn test_write_then_read() {
        let mut storage = MemoryStorage::new();
        let mut page = Page::new();
        page.set_id(3);
        page.set_page_type(PageType::Leaf);
        storage.write_page(3, &page).expect("write");

        let mut read = Page::new();
        storage.read_page(3, &mut read).expect("read");
        assert_eq!(read.id(), 3);
        assert_eq!(read.page_type().expect("type"), PageType::Leaf);

        assert_eq!(storage.stats().reads, 1);
        assert_eq!(storage.stats().writes, 1);
    }

    #[test]
    fn test_unwritten_page_reads_zeroed() {
        let mut storage = MemoryStorage::new();
        let mut page = Page::new();
        page.set_id(99);
        storage.read_page(5, &mut page).expect("read");
        assert_eq!(page.id(), 0);
    }

    #[test]
    fn test_header_roundtrip() {
        let mut storage = MemoryStorage::new();
        assert_eq!(storage.read_header().expect("header"), FileHeader::new());

        let header = FileHeader {
            root: 2,
            free: 9,
            page_count: 1024,
        };
        storage.write_header(&header).expect("write header");
        assert_eq!(storage.read_header().expect("header"), header);
        assert_eq!(storage.stats().header_writes, 1);
    }

    #[test]
    fn test_injected_faults() {
        let mut storage = MemoryStorage::new();
        storage.set_faults(FaultConfig {
            fail_reads: true,
            fail_writes: true,
            fail_syncs: true,
        });

        let mut page = Page::new();
        assert!(matches!(
            storage.read_page(1, &mut page),
            Err(StorageError::InjectedFault(_))
        ));
        assert!(storage.write_page(1, &page).is_err());
        assert!(storage.write_header(&FileHeader::new()).is_err());
        assert!(storage.sync().is_err());
        assert_eq!(*storage.stats(), MemoryStorageStats::default());
    }
}
