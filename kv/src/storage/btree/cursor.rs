//! Forward iteration over the leaf chain.

use crate::storage::btree::tree::BTreeError;
use crate::storage::io::Storage;
use crate::storage::page::{NULL_PAGE, PageId, PageType};
use crate::storage::pager::Pager;

/// A position in the leaf chain.
///
/// The cursor holds only a page id and an index, so it stays valid while
/// pages move in and out of the cache. It must not outlive a mutation of
/// the tree, which the borrow on the pager enforces.
pub struct Cursor<'a, S: Storage> {
    pager: &'a mut Pager<S>,
    page_id: PageId,
    index: usize,
}

impl<'a, S: Storage> Cursor<'a, S> {
    pub(crate) const fn new(pager: &'a mut Pager<S>, page_id: PageId, index: usize) -> Self {
        Self {
            pager,
            page_id,
            index,
        }
    }

    /// Get the next record, following `next_page` into later leaves.
    pub fn next_entry(&mut self) -> Result<Option<(i64, i64)>, BTreeError> {
        while self.page_id != NULL_PAGE {
            let page = self.pager.page(self.page_id)?;
            let found = page.page_type()?;
            if found != PageType::Leaf {
                return Err(BTreeError::UnexpectedPageType {
                    page_id: self.page_id,
                    found,
                });
            }

            if self.index < page.record_count() {
                let record = page.record(self.index);
                self.index += 1;
                return Ok(Some((record.key, record.value)));
            }

            self.page_id = page.next_page();
            self.index = 0;
        }
        Ok(None)
    }
}
