//! Storage abstraction for deterministic testing.
//!
//! This module provides a `Storage` trait that abstracts over the backing
//! store of a single database: a fixed-size file header followed by an array
//! of pages. Production code uses the file-backed `DatabaseFile`; tests use
//! the in-memory `MemoryStorage`, which can count I/O and inject faults.
//!
//! # Design
//!
//! The trait is a minimal abstraction over:
//! - Header read/write
//! - Page read/write by page id
//! - Durability (`sync`)
//!
//! Page ids are not bounds-checked here. The buffer pool owns the valid-id
//! bound; storage grows whenever a page past the current end is written.

use crate::storage::header::{FileHeader, HeaderError};
use crate::storage::page::{Page, PageId};

/// Severity of a storage engine error.
///
/// Every error type in the engine maps to one of these classes so that a
/// caller can tell a bad request from a session that must be shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input from the caller. The store is still consistent.
    Recoverable,
    /// Corruption or misconfiguration detected. Stop and close.
    Integrity,
    /// The backing store failed. Stop and close.
    Io,
}

impl ErrorClass {
    /// Whether the current session should stop issuing operations.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        !matches!(self, Self::Recoverable)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recoverable => write!(f, "recoverable"),
            Self::Integrity => write!(f, "integrity"),
            Self::Io => write!(f, "io"),
        }
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// Header error.
    Header(HeaderError),
    /// Corruption detected.
    Corruption(String),
    /// Injected fault for simulation.
    InjectedFault(String),
}

impl StorageError {
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Io(_) | Self::InjectedFault(_) => ErrorClass::Io,
            Self::Header(_) | Self::Corruption(_) => ErrorClass::Integrity,
        }
    }
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Header(e) => write!(f, "header error: {e}"),
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Header(e) => Some(e),
            Self::Corruption(_) | Self::InjectedFault(_) => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<HeaderError> for StorageError {
    fn from(e: HeaderError) -> Self {
        Self::Header(e)
    }
}

/// Abstraction over the page array and header of one database.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_page` returns the last written content for a page
/// - `read_header` returns the last written header
/// - `sync` makes all previous writes durable
pub trait Storage {
    /// Read and validate the file header.
    fn read_header(&mut self) -> Result<FileHeader, StorageError>;

    /// Write the file header.
    ///
    /// The write may be buffered until `sync` is called.
    fn write_header(&mut self, header: &FileHeader) -> Result<(), StorageError>;

    /// Read a page into `page`.
    fn read_page(&mut self, page_id: PageId, page: &mut Page) -> Result<(), StorageError>;

    /// Write a page.
    ///
    /// The write may be buffered until `sync` is called.
    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError>;

    /// Sync all pending writes to durable storage.
    fn sync(&mut self) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let e = StorageError::Corruption("page 3 has type 9".to_string());
        assert!(e.to_string().contains("page 3"));

        let e = StorageError::InjectedFault("test fault".to_string());
        assert!(e.to_string().contains("test fault"));

        let e = StorageError::from(HeaderError::InvalidMagic(7));
        assert!(e.to_string().contains("header error"));
    }

    #[test]
    fn test_storage_error_class() {
        let io = StorageError::from(std::io::Error::other("disk gone"));
        assert_eq!(io.class(), ErrorClass::Io);
        assert!(io.class().is_fatal());

        let corrupt = StorageError::Corruption("bad".to_string());
        assert_eq!(corrupt.class(), ErrorClass::Integrity);
        assert!(!ErrorClass::Recoverable.is_fatal());
    }
}
