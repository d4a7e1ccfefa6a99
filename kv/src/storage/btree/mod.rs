//! B+ tree over fixed-size pages.
//!
//! Maps `i64` keys to `i64` values. Every node is one page obtained through
//! the `Pager`, and nodes refer to each other only by page id, so no node
//! stays borrowed across a page load.
//!
//! # Structure
//!
//! - Internal nodes: `n` separator keys and `n + 1` child page ids
//! - Leaf nodes: `n` key-value records, singly linked through `next_page`
//!   in ascending key order for range scans
//!
//! A separator equals the smallest key of the subtree to its right.
//!
//! # Usage
//!
//! ```
//! use kv::storage::{BTree, MemoryStorage};
//!
//! let mut tree = BTree::open(MemoryStorage::new(), 1024).unwrap();
//! tree.put(7, 70).unwrap();
//! assert_eq!(tree.get(7).unwrap(), Some(70));
//! assert!(tree.delete(7).unwrap());
//! assert_eq!(tree.get(7).unwrap(), None);
//! ```

mod cursor;
mod tree;
mod verify;

pub use cursor::Cursor;
pub use tree::{BTree, BTreeError};
pub use verify::TreeStats;
