//! B+ tree over `i64` keys and values.
//!
//! The tree works directly on raw pages obtained through the pager. Nodes
//! are addressed by page id only; no page reference is held across a call
//! that may load another page, so cache eviction never invalidates state.
//!
//! Leaves are chained left to right through `next_page`. Every non-root
//! page carries a `parent` back-link that is kept current through splits,
//! borrows and merges.

use crate::storage::btree::cursor::Cursor;
use crate::storage::io::{ErrorClass, Storage};
use crate::storage::page::{
    MIN_RECORDS, NULL_PAGE, ORDER, PageError, PageId, PageType, Record,
};
use crate::storage::pager::{Pager, PagerError};

/// A B+ tree stored in the pages of one database.
pub struct BTree<S: Storage> {
    pub(crate) pager: Pager<S>,
}

impl<S: Storage> BTree<S> {
    /// Open the tree stored in `storage`, with a page cache of
    /// `cache_pages` slots.
    pub fn open(storage: S, cache_pages: usize) -> Result<Self, BTreeError> {
        Ok(Self {
            pager: Pager::open(storage, cache_pages)?,
        })
    }

    /// Root page id, or `NULL_PAGE` for an empty tree.
    #[must_use]
    pub const fn root(&self) -> PageId {
        self.pager.root()
    }

    /// Whether the tree holds no records.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pager.root() == NULL_PAGE
    }

    /// The pager backing this tree.
    #[must_use]
    pub const fn pager(&self) -> &Pager<S> {
        &self.pager
    }

    /// Mutable access to the pager backing this tree.
    pub const fn pager_mut(&mut self) -> &mut Pager<S> {
        &mut self.pager
    }

    /// Consume the tree and return its pager. Unflushed changes stay in the
    /// pager's cache.
    pub fn into_pager(self) -> Pager<S> {
        self.pager
    }

    /// Look up the value stored for `key`.
    pub fn get(&mut self, key: i64) -> Result<Option<i64>, BTreeError> {
        let Some(leaf_id) = self.find_leaf(key)? else {
            return Ok(None);
        };
        let leaf = self.pager.page(leaf_id)?;
        Ok(leaf.search(key).ok().map(|index| leaf.record(index).value))
    }

    /// Insert `key`, or overwrite its value if it is already present.
    ///
    /// Full pages are split on the way back up. Dirty pages are written back
    /// once half of the cache is dirty.
    pub fn put(&mut self, key: i64, value: i64) -> Result<(), BTreeError> {
        let leaf_id = match self.find_leaf(key)? {
            Some(leaf_id) => leaf_id,
            None => {
                let leaf_id = self.pager.create_page(PageType::Leaf)?;
                self.pager.set_root(leaf_id);
                leaf_id
            }
        };

        let position = self.pager.page(leaf_id)?.search(key);
        match position {
            Ok(index) => {
                if self.pager.page(leaf_id)?.record(index).value != value {
                    self.pager
                        .page_mut(leaf_id)?
                        .set_record(index, Record { key, value });
                }
            }
            Err(index) => {
                self.pager.page_mut(leaf_id)?.insert_at(index, key, value);
                self.split_if_needed(leaf_id)?;
            }
        }

        self.pager.flush(false)?;
        Ok(())
    }

    /// Remove `key`. Returns whether it was present.
    pub fn delete(&mut self, key: i64) -> Result<bool, BTreeError> {
        let Some(leaf_id) = self.find_leaf(key)? else {
            return Ok(false);
        };
        let Ok(index) = self.pager.page(leaf_id)?.search(key) else {
            return Ok(false);
        };

        let leaf = self.pager.page_mut(leaf_id)?;
        leaf.remove_at(index);
        let parent_id = leaf.parent();
        if index == 0 && parent_id != NULL_PAGE && leaf.record_count() > 0 {
            let new_first = leaf.key(0);
            self.replace_separator(parent_id, key, new_first)?;
        }

        self.rebalance(leaf_id)?;
        self.pager.flush(false)?;
        Ok(true)
    }

    /// The first record with a key strictly greater than `key`.
    pub fn next(&mut self, key: i64) -> Result<Option<(i64, i64)>, BTreeError> {
        let mut cursor = self.seek(key)?;
        let entry = cursor.next_entry()?;
        match entry {
            Some((found, _)) if found == key => cursor.next_entry(),
            entry => Ok(entry),
        }
    }

    /// Visit every record with `min <= key < max`, in key order.
    pub fn range<F>(&mut self, min: i64, max: i64, mut visit: F) -> Result<(), BTreeError>
    where
        F: FnMut(i64, i64),
    {
        let mut cursor = self.seek(min)?;
        while let Some((key, value)) = cursor.next_entry()? {
            if key >= max {
                break;
            }
            visit(key, value);
        }
        Ok(())
    }

    /// Visit every record in key order.
    pub fn iterate<F>(&mut self, mut visit: F) -> Result<(), BTreeError>
    where
        F: FnMut(i64, i64),
    {
        let mut cursor = self.cursor()?;
        while let Some((key, value)) = cursor.next_entry()? {
            visit(key, value);
        }
        Ok(())
    }

    /// Number of records, counted by walking the leaf chain.
    pub fn len(&mut self) -> Result<usize, BTreeError> {
        let mut count = 0;
        let mut page_id = self.leftmost_leaf()?;
        while page_id != NULL_PAGE {
            let page = self.pager.page(page_id)?;
            count += page.record_count();
            page_id = page.next_page();
        }
        Ok(count)
    }

    /// A cursor positioned before the first record.
    pub fn cursor(&mut self) -> Result<Cursor<'_, S>, BTreeError> {
        let page_id = self.leftmost_leaf()?;
        Ok(Cursor::new(&mut self.pager, page_id, 0))
    }

    /// A cursor positioned before the first record with a key `>= key`.
    pub fn seek(&mut self, key: i64) -> Result<Cursor<'_, S>, BTreeError> {
        let Some(leaf_id) = self.find_leaf(key)? else {
            return Ok(Cursor::new(&mut self.pager, NULL_PAGE, 0));
        };
        let index = self.pager.page(leaf_id)?.insert_index(key);
        Ok(Cursor::new(&mut self.pager, leaf_id, index))
    }

    /// Remove every record, returning all tree pages to the free list.
    ///
    /// The root is detached first, so write-back part way through leaves an
    /// empty tree on disk rather than a tree pointing at free pages.
    pub fn clear(&mut self) -> Result<(), BTreeError> {
        let pages = self.collect_pages()?;
        self.pager.set_root(NULL_PAGE);
        for page_id in pages {
            self.pager.free_page(page_id)?;
            self.pager.flush(false)?;
        }
        Ok(())
    }

    /// Write back dirty pages (see `Pager::flush`).
    pub fn flush(&mut self, force: bool) -> Result<bool, BTreeError> {
        Ok(self.pager.flush(force)?)
    }

    // ========== Descent ==========

    /// Find the leaf that owns `key`, or `None` for an empty tree.
    pub(crate) fn find_leaf(&mut self, key: i64) -> Result<Option<PageId>, BTreeError> {
        let mut page_id = self.pager.root();
        if page_id == NULL_PAGE {
            return Ok(None);
        }

        loop {
            let page = self.pager.page(page_id)?;
            match page.page_type()? {
                PageType::Leaf => return Ok(Some(page_id)),
                PageType::Internal => page_id = page.child(page.child_index(key))?,
                PageType::Free => {
                    return Err(BTreeError::UnexpectedPageType {
                        page_id,
                        found: PageType::Free,
                    });
                }
            }
        }
    }

    /// The leftmost leaf, or `NULL_PAGE` for an empty tree.
    pub(crate) fn leftmost_leaf(&mut self) -> Result<PageId, BTreeError> {
        let mut page_id = self.pager.root();
        while page_id != NULL_PAGE {
            let page = self.pager.page(page_id)?;
            match page.page_type()? {
                PageType::Leaf => break,
                PageType::Internal => page_id = page.child(0)?,
                PageType::Free => {
                    return Err(BTreeError::UnexpectedPageType {
                        page_id,
                        found: PageType::Free,
                    });
                }
            }
        }
        Ok(page_id)
    }

    /// Index of `child_id` among the children of `parent_id`.
    fn child_position(&mut self, parent_id: PageId, child_id: PageId) -> Result<usize, BTreeError> {
        let parent = self.pager.page(parent_id)?;
        for position in 0..=parent.record_count() {
            if parent.child(position)? == child_id {
                return Ok(position);
            }
        }
        tracing::warn!(child_id, parent_id, "page missing from its parent");
        Err(BTreeError::OrphanPage {
            page_id: child_id,
            parent: parent_id,
        })
    }

    fn set_parent(&mut self, page_id: PageId, parent_id: PageId) -> Result<(), BTreeError> {
        self.pager.page_mut(page_id)?.set_parent(parent_id);
        Ok(())
    }

    /// All page ids of the tree, parents before children.
    fn collect_pages(&mut self) -> Result<Vec<PageId>, BTreeError> {
        let mut pages = Vec::new();
        let mut stack = Vec::new();
        if self.pager.root() != NULL_PAGE {
            stack.push(self.pager.root());
        }

        while let Some(page_id) = stack.pop() {
            pages.push(page_id);
            let page = self.pager.page(page_id)?;
            if page.page_type()? == PageType::Internal {
                for position in 0..=page.record_count() {
                    stack.push(page.child(position)?);
                }
            }
        }
        Ok(pages)
    }

    // ========== Split ==========

    fn split_if_needed(&mut self, mut page_id: PageId) -> Result<(), BTreeError> {
        while self.pager.page(page_id)?.record_count() >= ORDER {
            page_id = self.split(page_id)?;
        }
        Ok(())
    }

    /// Split a full page at `ORDER / 2` and return its parent.
    ///
    /// A leaf keeps `[0, mid)` and copies its new sibling's first key up. An
    /// internal node keeps keys `[0, mid)`, pushes key `mid` up, and hands
    /// the rest of its keys and children to the sibling.
    fn split(&mut self, page_id: PageId) -> Result<PageId, BTreeError> {
        let mid = ORDER / 2;
        let page = self.pager.page(page_id)?;
        let page_type = page.page_type()?;
        let parent_id = page.parent();
        let count = page.record_count();
        let mid_key = page.key(mid);
        if page_type == PageType::Free {
            return Err(BTreeError::UnexpectedPageType {
                page_id,
                found: page_type,
            });
        }

        let sibling_id = self.pager.create_page(page_type)?;

        if page_type == PageType::Leaf {
            let page = self.pager.page(page_id)?;
            let moved: Vec<Record> = (mid..count).map(|i| page.record(i)).collect();
            let next = page.next_page();

            let sibling = self.pager.page_mut(sibling_id)?;
            for (i, record) in moved.iter().enumerate() {
                sibling.set_record(i, *record);
            }
            sibling.set_record_count(moved.len());
            sibling.set_next_page(next);

            let page = self.pager.page_mut(page_id)?;
            page.set_record_count(mid);
            page.set_next_page(sibling_id);
        } else {
            let page = self.pager.page(page_id)?;
            let keys: Vec<i64> = (mid + 1..count).map(|i| page.key(i)).collect();
            let children = (mid + 1..=count)
                .map(|i| page.child(i))
                .collect::<Result<Vec<_>, _>>()?;

            let sibling = self.pager.page_mut(sibling_id)?;
            sibling.set_child(0, children[0]);
            for (i, key) in keys.iter().enumerate() {
                sibling.set_key(i, *key);
                sibling.set_child(i + 1, children[i + 1]);
            }
            sibling.set_record_count(keys.len());

            self.pager.page_mut(page_id)?.set_record_count(mid);
            for child in children {
                self.set_parent(child, sibling_id)?;
            }
        }

        if parent_id == NULL_PAGE {
            let root_id = self.pager.create_page(PageType::Internal)?;
            let root = self.pager.page_mut(root_id)?;
            root.set_child(0, page_id);
            root.set_key(0, mid_key);
            root.set_child(1, sibling_id);
            root.set_record_count(1);

            self.set_parent(page_id, root_id)?;
            self.set_parent(sibling_id, root_id)?;
            self.pager.set_root(root_id);
            return Ok(root_id);
        }

        let position = self.child_position(parent_id, page_id)?;
        self.pager
            .page_mut(parent_id)?
            .insert_at(position, mid_key, i64::from(sibling_id));
        self.set_parent(sibling_id, parent_id)?;
        Ok(parent_id)
    }

    // ========== Delete ==========

    /// Replace separator `old` with `new` in every ancestor, starting at
    /// `page_id` and walking up.
    fn replace_separator(&mut self, mut page_id: PageId, old: i64, new: i64) -> Result<(), BTreeError> {
        while page_id != NULL_PAGE {
            let page = self.pager.page(page_id)?;
            let parent_id = page.parent();
            if let Ok(index) = page.search(old) {
                self.pager.page_mut(page_id)?.set_key(index, new);
            }
            page_id = parent_id;
        }
        Ok(())
    }

    /// Restore the minimum fill of `page_id` after a removal, cascading up
    /// through the parents that a merge leaves short.
    fn rebalance(&mut self, mut page_id: PageId) -> Result<(), BTreeError> {
        loop {
            let page = self.pager.page(page_id)?;
            let count = page.record_count();
            if count >= MIN_RECORDS {
                return Ok(());
            }

            let parent_id = page.parent();
            if parent_id == NULL_PAGE {
                if count == 0 {
                    let page_type = page.page_type()?;
                    self.shrink_root(page_id, page_type)?;
                }
                return Ok(());
            }

            let position = self.child_position(parent_id, page_id)?;
            let parent = self.pager.page(parent_id)?;
            let left_id = if position > 0 {
                Some(parent.child(position - 1)?)
            } else {
                None
            };
            let right_id = if position < parent.record_count() {
                Some(parent.child(position + 1)?)
            } else {
                None
            };

            if let Some(left_id) = left_id {
                if self.pager.page(left_id)?.record_count() > MIN_RECORDS {
                    return self.borrow_from_left(page_id, left_id, parent_id, position);
                }
            }
            if let Some(right_id) = right_id {
                if self.pager.page(right_id)?.record_count() > MIN_RECORDS {
                    return self.borrow_from_right(page_id, right_id, parent_id, position);
                }
            }

            match (left_id, right_id) {
                (_, Some(right_id)) => self.merge(page_id, right_id, parent_id, position)?,
                (Some(left_id), None) => self.merge(left_id, page_id, parent_id, position - 1)?,
                (None, None) => {
                    return Err(BTreeError::Invariant {
                        page_id: parent_id,
                        message: "internal node with a single child".to_string(),
                    });
                }
            }
            page_id = parent_id;
        }
    }

    /// Drop an empty root. An internal root hands the tree to its only
    /// child; an empty leaf root leaves the tree empty.
    fn shrink_root(&mut self, root_id: PageId, page_type: PageType) -> Result<(), BTreeError> {
        let new_root = match page_type {
            PageType::Internal => {
                let child = self.pager.page(root_id)?.child(0)?;
                self.set_parent(child, NULL_PAGE)?;
                child
            }
            PageType::Leaf | PageType::Free => NULL_PAGE,
        };
        self.pager.set_root(new_root);
        self.pager.free_page(root_id)?;
        tracing::trace!(old_root = root_id, new_root, "tree height reduced");
        Ok(())
    }

    /// Move the last entry of the left sibling to the front of `page_id`.
    fn borrow_from_left(
        &mut self,
        page_id: PageId,
        left_id: PageId,
        parent_id: PageId,
        position: usize,
    ) -> Result<(), BTreeError> {
        let left = self.pager.page_mut(left_id)?;
        let left_count = left.record_count();
        let page_type = left.page_type()?;
        let last_key = left.key(left_count - 1);

        if page_type == PageType::Leaf {
            let value = left.record(left_count - 1).value;
            left.set_record_count(left_count - 1);
            self.pager.page_mut(page_id)?.insert_at(0, last_key, value);
            self.pager.page_mut(parent_id)?.set_key(position - 1, last_key);
        } else {
            let last_child = left.child(left_count)?;
            left.set_record_count(left_count - 1);
            let separator = self.pager.page(parent_id)?.key(position - 1);
            self.pager
                .page_mut(page_id)?
                .push_front_child(separator, last_child);
            self.pager.page_mut(parent_id)?.set_key(position - 1, last_key);
            self.set_parent(last_child, page_id)?;
        }
        Ok(())
    }

    /// Move the first entry of the right sibling to the end of `page_id`.
    fn borrow_from_right(
        &mut self,
        page_id: PageId,
        right_id: PageId,
        parent_id: PageId,
        position: usize,
    ) -> Result<(), BTreeError> {
        let right = self.pager.page_mut(right_id)?;
        let page_type = right.page_type()?;

        if page_type == PageType::Leaf {
            let first = right.record(0);
            right.remove_at(0);
            let new_first = right.key(0);

            let page = self.pager.page_mut(page_id)?;
            page.insert_at(page.record_count(), first.key, first.value);
            self.pager.page_mut(parent_id)?.set_key(position, new_first);
        } else {
            let (first_key, first_child) = right.pop_front_child()?;
            let separator = self.pager.page(parent_id)?.key(position);

            let page = self.pager.page_mut(page_id)?;
            page.insert_at(page.record_count(), separator, i64::from(first_child));
            self.pager.page_mut(parent_id)?.set_key(position, first_key);
            self.set_parent(first_child, page_id)?;
        }
        Ok(())
    }

    /// Fold `right_id` into `left_id`, drop separator `position` from the
    /// parent and free the right page.
    fn merge(
        &mut self,
        left_id: PageId,
        right_id: PageId,
        parent_id: PageId,
        position: usize,
    ) -> Result<(), BTreeError> {
        let right = self.pager.page(right_id)?;
        let page_type = right.page_type()?;
        let right_count = right.record_count();

        if page_type == PageType::Leaf {
            let moved: Vec<Record> = (0..right_count).map(|i| right.record(i)).collect();
            let next = right.next_page();

            let left = self.pager.page_mut(left_id)?;
            let base = left.record_count();
            for (i, record) in moved.iter().enumerate() {
                left.set_record(base + i, *record);
            }
            left.set_record_count(base + moved.len());
            left.set_next_page(next);
        } else {
            let keys: Vec<i64> = (0..right_count).map(|i| right.key(i)).collect();
            let children = (0..=right_count)
                .map(|i| right.child(i))
                .collect::<Result<Vec<_>, _>>()?;
            let separator = self.pager.page(parent_id)?.key(position);

            let left = self.pager.page_mut(left_id)?;
            let base = left.record_count();
            left.set_key(base, separator);
            left.set_child(base + 1, children[0]);
            for (i, key) in keys.iter().enumerate() {
                left.set_key(base + 1 + i, *key);
                left.set_child(base + 2 + i, children[i + 1]);
            }
            left.set_record_count(base + 1 + keys.len());

            for child in children {
                self.set_parent(child, left_id)?;
            }
        }

        self.pager.page_mut(parent_id)?.remove_at(position);
        self.pager.free_page(right_id)?;
        Ok(())
    }
}

/// Errors that can occur during B+ tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// Pager error.
    Pager(PagerError),
    /// Malformed page contents.
    Page(PageError),
    /// A page of the wrong type was found where a tree node was expected.
    UnexpectedPageType { page_id: PageId, found: PageType },
    /// A page whose parent does not list it as a child.
    OrphanPage { page_id: PageId, parent: PageId },
    /// A structural invariant does not hold.
    Invariant { page_id: PageId, message: String },
}

impl BTreeError {
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Pager(e) => e.class(),
            Self::Page(_)
            | Self::UnexpectedPageType { .. }
            | Self::OrphanPage { .. }
            | Self::Invariant { .. } => ErrorClass::Integrity,
        }
    }
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pager(e) => write!(f, "pager error: {e}"),
            Self::Page(e) => write!(f, "page error: {e}"),
            Self::UnexpectedPageType { page_id, found } => {
                write!(f, "unexpected {found:?} page {page_id} in tree")
            }
            Self::OrphanPage { page_id, parent } => {
                write!(f, "page {page_id} is not a child of its parent {parent}")
            }
            Self::Invariant { page_id, message } => {
                write!(f, "invariant violated at page {page_id}: {message}")
            }
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pager(e) => Some(e),
            Self::Page(e) => Some(e),
            Self::UnexpectedPageType { .. } | Self::OrphanPage { .. } | Self::Invariant { .. } => {
                None
            }
        }
    }
}

impl From<PagerError> for BTreeError {
    fn from(e: PagerError) -> Self {
        Self::Pager(e)
    }
}

impl From<PageError> for BTreeError {
    fn from(e: PageError) -> Self {
        Self::Page(e)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::storage::buffer_pool::CacheError;
    use crate::storage::io::StorageError;
    use crate::storage::memory::MemoryStorage;
    use crate::testing::{collect, free_list_len, memory_tree};

    #[test]
    fn test_basic_scenario() {
        let mut tree = memory_tree();
        tree.put(1, 2).expect("put");
        tree.put(2, 4).expect("put");
        tree.put(3, 6).expect("put");

        assert_eq!(tree.get(2).expect("get"), Some(4));
        assert_eq!(tree.next(1).expect("next"), Some((2, 4)));

        let mut visited = Vec::new();
        tree.range(1, 3, |k, v| visited.push((k, v))).expect("range");
        assert_eq!(visited, vec![(1, 2), (2, 4)]);

        assert!(tree.delete(2).expect("delete"));
        assert_eq!(tree.get(2).expect("get"), None);
        assert_eq!(collect(&mut tree), vec![(1, 2), (3, 6)]);
    }

    #[test]
    fn test_empty_tree() {
        let mut tree = memory_tree();
        assert!(tree.is_empty());
        assert_eq!(tree.get(1).expect("get"), None);
        assert_eq!(tree.next(1).expect("next"), None);
        assert!(!tree.delete(1).expect("delete"));
        assert_eq!(tree.len().expect("len"), 0);
        assert!(collect(&mut tree).is_empty());

        let mut visited = 0;
        tree.range(i64::MIN, i64::MAX, |_, _| visited += 1)
            .expect("range");
        assert_eq!(visited, 0);
    }

    #[test]
    fn test_overwrite() {
        let mut tree = memory_tree();
        tree.put(7, 1).expect("put");
        tree.put(7, 2).expect("put");
        tree.put(7, 2).expect("put");
        assert_eq!(tree.get(7).expect("get"), Some(2));
        assert_eq!(tree.len().expect("len"), 1);
    }

    #[test]
    fn test_extreme_keys() {
        let mut tree = memory_tree();
        for key in [i64::MAX, i64::MIN, 0, -1, 1] {
            tree.put(key, key.wrapping_neg()).expect("put");
        }
        let keys: Vec<i64> = collect(&mut tree).into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![i64::MIN, -1, 0, 1, i64::MAX]);
        assert_eq!(tree.next(i64::MAX).expect("next"), None);
        assert_eq!(tree.next(i64::MIN).expect("next"), Some((-1, 1)));
    }

    #[test]
    fn test_split_creates_internal_root() {
        let mut tree = memory_tree();
        let count = i64::try_from(ORDER).expect("order fits") + 1;
        for key in 1..=count {
            tree.put(key, key * 2).expect("put");
        }

        let root_id = tree.root();
        let root = tree.pager.page(root_id).expect("root");
        assert_eq!(root.page_type().expect("type"), PageType::Internal);
        assert_eq!(root.record_count(), 1);
        assert_eq!(root.parent(), NULL_PAGE);

        let entries = collect(&mut tree);
        assert_eq!(entries.len(), ORDER + 1);
        assert!(entries.iter().zip(1..).all(|(&(k, v), i)| k == i && v == i * 2));

        let stats = tree.verify().expect("verify");
        assert_eq!(stats.depth, 2);
        assert_eq!(stats.leaf_pages, 2);
        assert_eq!(stats.internal_pages, 1);
    }

    #[test]
    fn test_split_separator_is_first_key_of_right_leaf() {
        let mut tree = memory_tree();
        let count = i64::try_from(ORDER).expect("order fits");
        for key in 0..count {
            tree.put(key * 10, key).expect("put");
        }

        let root_id = tree.root();
        let root = tree.pager.page(root_id).expect("root");
        let separator = root.key(0);
        let right_id = root.child(1).expect("child");
        let right = tree.pager.page(right_id).expect("right");
        assert_eq!(right.key(0), separator);
        assert_eq!(separator, i64::try_from(ORDER / 2).expect("fits") * 10);
    }

    #[test]
    fn test_delete_missing_key_is_noop() {
        let mut tree = memory_tree();
        for key in 0..10 {
            tree.put(key, key).expect("put");
        }
        let before = collect(&mut tree);
        assert!(!tree.delete(100).expect("delete"));
        assert!(!tree.delete(-5).expect("delete"));
        assert_eq!(collect(&mut tree), before);
    }

    #[test]
    fn test_merge_two_minimal_leaves() {
        let mut tree = memory_tree();
        let count = i64::try_from(ORDER).expect("order fits");
        // Splitting at ORDER leaves 126 and 127 records; trim to 2 * MIN.
        for key in 0..count {
            tree.put(key, key).expect("put");
        }
        tree.delete(count - 1).expect("delete");

        let stats = tree.verify().expect("verify");
        assert_eq!(stats.leaf_pages, 2);
        assert_eq!(stats.records, 2 * MIN_RECORDS);

        tree.delete(0).expect("delete");
        let stats = tree.verify().expect("verify");
        assert_eq!(stats.leaf_pages, 1);
        assert_eq!(stats.depth, 1);
        assert_eq!(stats.records, 2 * MIN_RECORDS - 1);

        let keys: Vec<i64> = collect(&mut tree).into_iter().map(|(k, _)| k).collect();
        let expected: Vec<i64> = (1..count - 1).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_borrow_from_right_sibling() {
        let mut tree = memory_tree();
        let count = i64::try_from(ORDER).expect("order fits");
        for key in 0..count {
            tree.put(key, key).expect("put");
        }
        // The right leaf holds 127 records, so deleting from the left leaf
        // borrows instead of merging.
        tree.delete(0).expect("delete");

        let stats = tree.verify().expect("verify");
        assert_eq!(stats.leaf_pages, 2);
        let root_id = tree.root();
        let root = tree.pager.page(root_id).expect("root");
        let left_id = root.child(0).expect("child");
        let separator = root.key(0);
        assert_eq!(
            tree.pager.page(left_id).expect("left").record_count(),
            MIN_RECORDS
        );
        assert_eq!(tree.get(separator).expect("get"), Some(separator));
    }

    #[test]
    fn test_borrow_from_left_sibling() {
        let mut tree = memory_tree();
        let count = i64::try_from(ORDER).expect("order fits");
        for key in 0..count {
            tree.put(key * 2, key).expect("put");
        }
        // Grow the left leaf past the minimum, then shrink the right one.
        tree.put(1, -1).expect("put");
        tree.delete((count - 1) * 2).expect("delete");
        tree.delete((count - 2) * 2).expect("delete");

        let stats = tree.verify().expect("verify");
        assert_eq!(stats.leaf_pages, 2);
        let root_id = tree.root();
        let root = tree.pager.page(root_id).expect("root");
        let (separator, left_id) = (root.key(0), root.child(0).expect("child"));
        assert_eq!(separator, 250);
        assert_eq!(
            tree.pager.page(left_id).expect("left").record_count(),
            MIN_RECORDS
        );
        assert_eq!(tree.get(1).expect("get"), Some(-1));
    }

    #[test]
    fn test_separator_replaced_when_first_key_deleted() {
        let mut tree = memory_tree();
        let count = i64::try_from(ORDER).expect("order fits") + 1;
        for key in 0..count {
            tree.put(key, key).expect("put");
        }
        let root_id = tree.root();
        let separator = tree.pager.page(root_id).expect("root").key(0);

        tree.delete(separator).expect("delete");
        let new_separator = tree.pager.page(root_id).expect("root").key(0);
        assert_eq!(new_separator, separator + 1);
        tree.verify().expect("verify");
    }

    #[test]
    fn test_delete_everything_releases_pages() {
        let mut tree = memory_tree();
        let count = 5_000;
        for key in 0..count {
            tree.put(key, key).expect("put");
        }
        for key in 0..count {
            assert!(tree.delete(key).expect("delete"));
        }

        assert!(tree.is_empty());
        assert_eq!(tree.root(), NULL_PAGE);
        assert_eq!(tree.verify().expect("verify").records, 0);

        // Every page except the unused page 0 is back on the free list.
        let page_count = tree.pager().header().page_count;
        assert_eq!(free_list_len(&mut tree), page_count as usize - 1);
    }

    #[test]
    fn test_range_crosses_leaves() {
        let mut tree = memory_tree();
        for key in 0..2_000 {
            tree.put(key * 3, key).expect("put");
        }

        let mut visited = Vec::new();
        tree.range(100, 1_000, |k, _| visited.push(k)).expect("range");
        let expected: Vec<i64> = (34..334).map(|k| k * 3).collect();
        assert_eq!(visited, expected);

        // A minimum past the end of its leaf continues in the next leaf.
        let root_id = tree.root();
        let right_id = tree.pager.page(root_id).expect("root").child(1).expect("child");
        let first_right = tree.pager.page(right_id).expect("leaf").key(0);
        let mut visited = Vec::new();
        tree.range(first_right - 1, first_right + 1, |k, _| visited.push(k))
            .expect("range");
        assert_eq!(visited, vec![first_right]);
    }

    #[test]
    fn test_next_crosses_leaves() {
        let mut tree = memory_tree();
        for key in 0..1_000 {
            tree.put(key, key).expect("put");
        }
        for key in 0..999 {
            assert_eq!(tree.next(key).expect("next"), Some((key + 1, key + 1)));
        }
        assert_eq!(tree.next(999).expect("next"), None);
        assert_eq!(tree.next(-10).expect("next"), Some((0, 0)));
    }

    #[test]
    fn test_clear() {
        let mut tree = memory_tree();
        for key in 0..3_000 {
            tree.put(key, key).expect("put");
        }
        let page_count = tree.pager().header().page_count;

        tree.clear().expect("clear");
        assert!(tree.is_empty());
        assert_eq!(tree.len().expect("len"), 0);
        assert_eq!(free_list_len(&mut tree), page_count as usize - 1);

        for key in 0..3_000 {
            tree.put(key, -key).expect("put");
        }
        assert_eq!(tree.pager().header().page_count, page_count);
        assert_eq!(tree.get(17).expect("get"), Some(-17));
    }

    #[test]
    fn test_reopen_after_forced_flush() {
        let mut tree = memory_tree();
        for key in 0..10_000 {
            tree.put(key, key * 7).expect("put");
        }
        tree.flush(true).expect("flush");

        let storage = tree.into_pager().into_storage();
        let mut tree = BTree::open(storage, 64).expect("reopen");
        assert_eq!(tree.len().expect("len"), 10_000);
        assert_eq!(tree.get(4_321).expect("get"), Some(4_321 * 7));
        tree.verify().expect("verify");
    }

    #[test]
    fn test_dirty_pages_bounded_by_cache() {
        let mut tree = BTree::open(MemoryStorage::new(), 256).expect("open");
        for key in 0..20_000 {
            tree.put(key, key).expect("put");
            assert!(tree.pager().cache().dirty_count() < 128);
        }
        assert!(tree.pager().cache().storage().stats().writes > 0);
    }

    #[test]
    fn test_random_operations_match_model() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        let mut tree = memory_tree();
        let mut model = BTreeMap::new();

        for step in 0..60_000 {
            let key = rng.random_range(0..8_000);
            if rng.random_bool(0.6) {
                let value = rng.random::<i64>();
                tree.put(key, value).expect("put");
                model.insert(key, value);
            } else {
                let removed = tree.delete(key).expect("delete");
                assert_eq!(removed, model.remove(&key).is_some(), "delete {key}");
            }

            if step % 5_000 == 0 {
                let stats = tree.verify().expect("verify");
                assert_eq!(stats.records, model.len());
            }
        }

        let expected: Vec<(i64, i64)> = model.iter().map(|(&k, &v)| (k, v)).collect();
        assert_eq!(collect(&mut tree), expected);
        for probe in [-1, 0, 3_999, 7_999, 8_000] {
            let want = model.range(probe + 1..).next().map(|(&k, &v)| (k, v));
            assert_eq!(tree.next(probe).expect("next"), want);
            assert_eq!(tree.get(probe).expect("get"), model.get(&probe).copied());
        }
        tree.verify().expect("verify");
    }

    #[test]
    fn test_random_deletes_shrink_three_level_tree() {
        let mut rng = StdRng::seed_from_u64(0xDE1E7E);
        let mut tree = memory_tree();
        let mut model = BTreeMap::new();

        let mut keys: Vec<i64> = (0..120_000).collect();
        for &key in &keys {
            tree.put(key, key ^ 0x55).expect("put");
            model.insert(key, key ^ 0x55);
        }
        assert_eq!(tree.verify().expect("verify").depth, 3);

        // Deleting in random order underflows internal nodes as well as
        // leaves; the occasional insert lands in already thinned subtrees.
        keys.shuffle(&mut rng);
        let mut depths = Vec::new();
        for (step, key) in keys.into_iter().enumerate() {
            let removed = tree.delete(key).expect("delete");
            assert_eq!(removed, model.remove(&key).is_some(), "delete {key}");

            if step % 7 == 0 {
                let key = rng.random_range(0..120_000);
                let value = rng.random::<i64>();
                tree.put(key, value).expect("put");
                model.insert(key, value);
            }

            if step % 1_000 == 0 {
                let stats = tree.verify().expect("verify");
                assert_eq!(stats.records, model.len(), "step {step}");
                depths.push(stats.depth);
            }
        }

        let stats = tree.verify().expect("verify");
        assert_eq!(stats.depth, 2);
        assert_eq!(depths.first(), Some(&3));

        let expected: Vec<(i64, i64)> = model.iter().map(|(&k, &v)| (k, v)).collect();
        assert_eq!(collect(&mut tree), expected);
    }

    #[test]
    fn test_corrupt_page_header_is_an_error() {
        let mut tree = memory_tree();
        for key in 0..10 {
            tree.put(key, key).expect("put");
        }
        tree.flush(true).expect("flush");
        let root = tree.root();

        let mut storage = tree.into_pager().into_storage();
        storage
            .stored_page_mut(root)
            .expect("root")
            .set_raw_record_count(400);

        let mut tree = BTree::open(storage, 64).expect("reopen");
        let err = tree.get(9).expect_err("corrupt root");
        assert_eq!(err.class(), ErrorClass::Integrity);
        assert!(matches!(
            err,
            BTreeError::Pager(PagerError::Cache(CacheError::Storage(
                StorageError::Corruption(_)
            )))
        ));
    }

    #[test]
    fn test_descending_inserts() {
        let mut tree = memory_tree();
        for key in (0..20_000).rev() {
            tree.put(key, key).expect("put");
        }
        let stats = tree.verify().expect("verify");
        assert_eq!(stats.records, 20_000);
        assert!(stats.depth >= 2);
    }
}
