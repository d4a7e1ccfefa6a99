//! Store configuration module.
//!
//! This module provides configuration loading for the key-value store from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `KV_PATH`: Path of the database file (default: `./test.kdb`)
//! - `KV_CACHE_PAGES`: Number of page cache slots (default: `1024`)
//!
//! # Invariants
//!
//! - A validated config has `cache_pages >= MIN_CACHE_PAGES`

use std::path::{Path, PathBuf};

/// Store configuration.
///
/// # Post-conditions
///
/// When constructed via `from_env()`, `cache_pages` is a valid number but
/// may still be below `MIN_CACHE_PAGES`; `validate()` checks the bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Path of the database file. Created on open if missing.
    pub path: PathBuf,
    /// Number of page-sized slots in the page cache.
    /// Memory use is bounded by `cache_pages * PAGE_SIZE`.
    pub cache_pages: usize,
}

/// Error returned when loading or validating configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl StoreConfig {
    /// Default number of cache slots.
    pub const DEFAULT_CACHE_PAGES: usize = 1024;
    /// Smallest accepted number of cache slots.
    ///
    /// Dirty pages are only written back between operations, and a split or
    /// merge of an internal node dirties every child it moves.
    pub const MIN_CACHE_PAGES: usize = 1024;
    /// Default database path.
    pub const DEFAULT_PATH: &'static str = "./test.kdb";

    /// Configuration for the file at `path` with the default cache size.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache_pages: Self::DEFAULT_CACHE_PAGES,
        }
    }

    /// Replace the cache size.
    #[must_use]
    pub const fn with_cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `KV_CACHE_PAGES` is set but not a number.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = Self::load_path();
        let cache_pages = Self::load_cache_pages()?;
        Ok(Self { path, cache_pages })
    }

    /// Check the configured values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_pages < Self::MIN_CACHE_PAGES {
            return Err(ConfigError::InvalidValue {
                name: "cache_pages".to_string(),
                message: format!(
                    "{} is below the minimum of {}",
                    self.cache_pages,
                    Self::MIN_CACHE_PAGES
                ),
            });
        }
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "path".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Load the database path from environment.
    ///
    /// Returns the default if not set.
    fn load_path() -> PathBuf {
        std::env::var("KV_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(Self::DEFAULT_PATH))
    }

    /// Load the cache size from environment.
    ///
    /// Returns the default if not set.
    fn load_cache_pages() -> Result<usize, ConfigError> {
        match std::env::var("KV_CACHE_PAGES") {
            Ok(value) => parse_count("KV_CACHE_PAGES", &value),
            Err(_) => Ok(Self::DEFAULT_CACHE_PAGES),
        }
    }
}

/// Parse a non-negative count from a setting's raw value.
pub fn parse_count(name: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a valid count"),
        })
}

/// Largest demo key count. Demo records store `2 * key`, which must not
/// overflow.
pub const MAX_DEMO_KEYS: i64 = i64::MAX / 2;

/// Parse the number of keys the demo workload inserts.
pub fn parse_demo_keys(name: &str, value: &str) -> Result<i64, ConfigError> {
    let count = parse_count(name, value)?;
    i64::try_from(count)
        .ok()
        .filter(|&keys| keys <= MAX_DEMO_KEYS)
        .ok_or_else(|| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("{count} exceeds the maximum of {MAX_DEMO_KEYS}"),
        })
}
