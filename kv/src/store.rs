//! High-level store interface.
//!
//! Provides the operations a host program needs: open-or-create a database
//! file, read and write records, and close with a forced flush.
//!
//! # Error handling
//!
//! Every failure is a `StoreError`. Its `class()` tells the host whether the
//! session can continue: after an `Integrity` or `Io` error the host should
//! stop issuing operations and close.

use std::path::Path;

use crate::config::{ConfigError, StoreConfig};
use crate::storage::{BTree, BTreeError, DatabaseFile, ErrorClass, FileError, TreeStats};

/// A key-value store backed by a single database file.
pub struct Store {
    tree: BTree<DatabaseFile>,
}

impl Store {
    /// Open the database described by `config`, creating the file if it does
    /// not exist.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let file = DatabaseFile::open_or_create(&config.path)?;
        let tree = BTree::open(file, config.cache_pages)?;
        tracing::debug!(
            path = %config.path.display(),
            cache_pages = config.cache_pages,
            "opened store"
        );
        Ok(Self { tree })
    }

    /// Open the file at `path` with the default cache size.
    pub fn open_path(path: &Path) -> Result<Self, StoreError> {
        Self::open(&StoreConfig::new(path))
    }

    /// Write back every dirty page and the header, then sync.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.tree.flush(true)?;
        tracing::debug!("closed store");
        Ok(())
    }

    /// Insert or overwrite a record.
    pub fn put(&mut self, key: i64, value: i64) -> Result<(), StoreError> {
        Ok(self.tree.put(key, value)?)
    }

    /// Look up the value stored under `key`.
    pub fn get(&mut self, key: i64) -> Result<Option<i64>, StoreError> {
        Ok(self.tree.get(key)?)
    }

    /// Remove a record. Returns whether the key was present.
    pub fn delete(&mut self, key: i64) -> Result<bool, StoreError> {
        Ok(self.tree.delete(key)?)
    }

    /// The first record with a key strictly greater than `key`.
    pub fn next(&mut self, key: i64) -> Result<Option<(i64, i64)>, StoreError> {
        Ok(self.tree.next(key)?)
    }

    /// Visit every record with `min <= key < max`, in key order.
    pub fn range<F>(&mut self, min: i64, max: i64, visit: F) -> Result<(), StoreError>
    where
        F: FnMut(i64, i64),
    {
        Ok(self.tree.range(min, max, visit)?)
    }

    /// Visit every record in key order.
    pub fn iterate<F>(&mut self, visit: F) -> Result<(), StoreError>
    where
        F: FnMut(i64, i64),
    {
        Ok(self.tree.iterate(visit)?)
    }

    /// Remove every record.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        Ok(self.tree.clear()?)
    }

    /// Number of records.
    pub fn len(&mut self) -> Result<usize, StoreError> {
        Ok(self.tree.len()?)
    }

    /// Whether the store holds no records.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Check the structure of the underlying tree.
    pub fn verify(&mut self) -> Result<TreeStats, StoreError> {
        Ok(self.tree.verify()?)
    }

    /// Write back dirty pages; see `BTree::flush`.
    pub fn flush(&mut self, force: bool) -> Result<bool, StoreError> {
        Ok(self.tree.flush(force)?)
    }
}

/// Small integer status reported to hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ResultCode {
    Success = 0,
    InvalidParameter = 1,
    KeyNotFound = 2,
}

impl ResultCode {
    /// Status of a lookup: found or not found.
    #[must_use]
    pub const fn of_lookup<T>(found: Option<&T>) -> Self {
        if found.is_some() {
            Self::Success
        } else {
            Self::KeyNotFound
        }
    }

    /// The numeric code.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// Errors that can occur during store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Invalid configuration.
    Config(ConfigError),
    /// Opening or creating the database file failed.
    File(FileError),
    /// Tree error.
    Tree(BTreeError),
}

impl StoreError {
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) => ErrorClass::Recoverable,
            Self::File(FileError::Header(_)) => ErrorClass::Integrity,
            Self::File(_) => ErrorClass::Io,
            Self::Tree(e) => e.class(),
        }
    }

    /// The result code for a recoverable error, or `None` for a fatal one.
    #[must_use]
    pub const fn result_code(&self) -> Option<ResultCode> {
        match self.class() {
            ErrorClass::Recoverable => Some(ResultCode::InvalidParameter),
            ErrorClass::Integrity | ErrorClass::Io => None,
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config error: {e}"),
            Self::File(e) => write!(f, "file error: {e}"),
            Self::Tree(e) => write!(f, "tree error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::File(e) => Some(e),
            Self::Tree(e) => Some(e),
        }
    }
}

impl From<ConfigError> for StoreError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<FileError> for StoreError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}

impl From<BTreeError> for StoreError {
    fn from(e: BTreeError) -> Self {
        Self::Tree(e)
    }
}
