// Layers, bottom up:
//  - storage::page / header: on-disk layout
//  - storage::file / memory: header and page I/O behind the Storage trait
//  - storage::buffer_pool: fixed-size page cache, write-back of dirty pages
//  - storage::pager: free list and file extension
//  - storage::btree: the B+ tree index
//  - store: open-or-create, close, and the record operations for hosts

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod storage;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, StoreConfig};
pub use store::{ResultCode, Store, StoreError};
