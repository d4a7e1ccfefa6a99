//! Helpers shared by the storage tests.

use crate::storage::{BTree, MemoryStorage, NULL_PAGE, Storage};

/// Cache size used by in-memory test trees.
pub const TEST_CACHE_PAGES: usize = 1024;

/// Create an empty tree over in-memory storage.
pub fn memory_tree() -> BTree<MemoryStorage> {
    BTree::open(MemoryStorage::new(), TEST_CACHE_PAGES).expect("open in-memory tree")
}

/// Collect every record of the tree in key order.
pub fn collect<S: Storage>(tree: &mut BTree<S>) -> Vec<(i64, i64)> {
    let mut records = Vec::new();
    tree.iterate(|key, value| records.push((key, value)))
        .expect("iterate");
    records
}

/// Count the pages on the free list by walking it from the header.
pub fn free_list_len<S: Storage>(tree: &mut BTree<S>) -> usize {
    let pager = tree.pager_mut();
    let mut page_id = pager.header().free;
    let mut len = 0;
    while page_id != NULL_PAGE {
        len += 1;
        page_id = pager.page(page_id).expect("free page").next_page();
    }
    len
}
