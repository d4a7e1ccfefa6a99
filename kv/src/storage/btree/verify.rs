//! Structural checks for the B+ tree.
//!
//! `verify` walks every node from the root and checks:
//! - node types, parent back-links and record counts
//! - keys ascending within a node and inside the bounds set by the
//!   separators above it
//! - all leaves at the same depth
//! - the leaf chain visiting exactly the leaves found by the walk, in order

use crate::storage::btree::tree::{BTree, BTreeError};
use crate::storage::io::Storage;
use crate::storage::page::{MIN_RECORDS, NULL_PAGE, ORDER, PageId, PageType};

/// Shape of a verified tree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels, leaves included. 0 for an empty tree.
    pub depth: usize,
    /// Number of internal nodes.
    pub internal_pages: usize,
    /// Number of leaves.
    pub leaf_pages: usize,
    /// Number of records.
    pub records: usize,
}

struct Visit {
    page_id: PageId,
    parent: PageId,
    depth: usize,
    lower: Option<i64>,
    upper: Option<i64>,
}

fn violation(page_id: PageId, message: impl Into<String>) -> BTreeError {
    let message = message.into();
    tracing::warn!(page_id, %message, "tree invariant violated");
    BTreeError::Invariant { page_id, message }
}

impl<S: Storage> BTree<S> {
    /// Check every structural invariant of the tree.
    pub fn verify(&mut self) -> Result<TreeStats, BTreeError> {
        let mut stats = TreeStats::default();
        let root = self.root();
        if root == NULL_PAGE {
            return Ok(stats);
        }

        let mut leaves = Vec::new();
        let mut stack = vec![Visit {
            page_id: root,
            parent: NULL_PAGE,
            depth: 1,
            lower: None,
            upper: None,
        }];

        while let Some(visit) = stack.pop() {
            let page_id = visit.page_id;
            let page = self.pager.page(page_id)?;
            let page_type = page.page_type()?;
            let count = page.record_count();

            if page.id() != page_id {
                return Err(violation(page_id, format!("page stamped {}", page.id())));
            }
            if page.parent() != visit.parent {
                return Err(violation(
                    page_id,
                    format!("parent is {}, expected {}", page.parent(), visit.parent),
                ));
            }
            if count >= ORDER {
                return Err(violation(page_id, format!("{count} records, order {ORDER}")));
            }
            if visit.parent != NULL_PAGE && count < MIN_RECORDS {
                return Err(violation(page_id, format!("underfull with {count} records")));
            }

            for i in 0..count {
                let key = page.key(i);
                if i > 0 && page.key(i - 1) >= key {
                    return Err(violation(page_id, format!("key {key} out of order")));
                }
                if visit.lower.is_some_and(|lower| key < lower)
                    || visit.upper.is_some_and(|upper| key >= upper)
                {
                    return Err(violation(page_id, format!("key {key} outside separators")));
                }
            }

            match page_type {
                PageType::Leaf => {
                    if stats.depth == 0 {
                        stats.depth = visit.depth;
                    } else if stats.depth != visit.depth {
                        return Err(violation(
                            page_id,
                            format!("leaf at depth {}, expected {}", visit.depth, stats.depth),
                        ));
                    }
                    if count == 0 {
                        return Err(violation(page_id, "empty leaf"));
                    }
                    stats.leaf_pages += 1;
                    stats.records += count;
                    leaves.push(page_id);
                }
                PageType::Internal => {
                    if count == 0 {
                        return Err(violation(page_id, "internal node without separators"));
                    }
                    stats.internal_pages += 1;
                    // Pushed right to left so the leftmost child is visited first.
                    for position in (0..=count).rev() {
                        stack.push(Visit {
                            page_id: page.child(position)?,
                            parent: page_id,
                            depth: visit.depth + 1,
                            lower: if position == 0 {
                                visit.lower
                            } else {
                                Some(page.key(position - 1))
                            },
                            upper: if position == count {
                                visit.upper
                            } else {
                                Some(page.key(position))
                            },
                        });
                    }
                }
                PageType::Free => {
                    return Err(BTreeError::UnexpectedPageType {
                        page_id,
                        found: page_type,
                    });
                }
            }
        }

        let mut page_id = self.leftmost_leaf()?;
        for &expected in &leaves {
            if page_id != expected {
                return Err(violation(
                    expected,
                    format!("leaf chain reached {page_id} instead"),
                ));
            }
            page_id = self.pager.page(page_id)?.next_page();
        }
        if page_id != NULL_PAGE {
            return Err(violation(page_id, "leaf chain continues past the last leaf"));
        }

        Ok(stats)
    }
}
