//! Page layout and constants for the storage engine.
//!
//! The storage engine uses 4KB pages as the fundamental unit of I/O and
//! caching. Every page starts with a 16-byte header followed by an array of
//! 16-byte record slots.
//!
//! # Layout
//!
//! ```text
//! offset  size  field
//! 0       4     id            (own page number)
//! 4       4     parent        (0 for the root)
//! 8       4     next_page     (leaf chain, or free-list chain)
//! 12      2     type          (0 = free, 1 = internal, 2 = leaf)
//! 14      2     record_count
//! 16      4080  ORDER + 2 slots of (key: i64, value: i64)
//! ```
//!
//! Each slot carries a key half and a value half. Key `i` lives in the key
//! half of slot `i`; value half `j` lives in slot `j`. In an internal node the
//! value halves `0..=record_count` hold the child pointers, so child `i` is
//! value half `i`. In a leaf the value of key `i` is value half `i + 1` and
//! value half 0 is unused. With this shape both node kinds insert and remove
//! with the same shift: key `i` moves together with value half `i + 1`.

// Record counts are bounded by ORDER, which fits in u16.
#![allow(clippy::cast_possible_truncation)]

/// Page size in bytes (4KB).
pub const PAGE_SIZE: usize = 4096;

/// Page size as u64 for offset calculations.
pub const PAGE_SIZE_U64: u64 = PAGE_SIZE as u64;

/// Size of the page header in bytes.
pub const PAGE_HEADER_SIZE: usize = 16;

/// Size of one record slot (key + value) in bytes.
pub const RECORD_SIZE: usize = 16;

/// Number of record slots in a page.
pub const RECORD_SLOTS: usize = (PAGE_SIZE - PAGE_HEADER_SIZE) / RECORD_SIZE;

/// Maximum record count before a page must split.
///
/// Two slots are held back: one for the transient overflow record inserted
/// just before a split, one for the extra child pointer of internal nodes.
pub const ORDER: usize = RECORD_SLOTS - 2;

/// Minimum record count of every page except the root.
pub const MIN_RECORDS: usize = (ORDER + 1) / 2 - 1;

/// A page identifier. Numbering starts at 1.
pub type PageId = u32;

/// The "no page" marker.
pub const NULL_PAGE: PageId = 0;

/// Page header field offsets.
mod offsets {
    pub const ID: usize = 0;
    pub const PARENT: usize = 4;
    pub const NEXT_PAGE: usize = 8;
    pub const PAGE_TYPE: usize = 12;
    pub const RECORD_COUNT: usize = 14;
    pub const RECORDS: usize = 16;
}

/// Page type identifiers stored in page headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PageType {
    /// Unallocated page on the free list
    Free = 0,
    /// B+ tree internal node
    Internal = 1,
    /// B+ tree leaf node
    Leaf = 2,
}

impl TryFrom<u16> for PageType {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Free),
            1 => Ok(Self::Internal),
            2 => Ok(Self::Leaf),
            _ => Err(value),
        }
    }
}

/// A key-value pair stored in a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub key: i64,
    pub value: i64,
}

/// A raw page buffer with typed accessors.
#[derive(Clone)]
pub struct Page {
    data: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// Create a new zeroed page.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// Get the raw page data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Get mutable access to the raw page data.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }

    fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.data[offset], self.data[offset + 1]])
    }

    fn write_u16(&mut self, offset: usize, value: u16) {
        self.data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn read_i64(&self, offset: usize) -> i64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.data[offset..offset + 8]);
        i64::from_le_bytes(bytes)
    }

    fn write_i64(&mut self, offset: usize, value: i64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Byte offset of record slot `index`.
    ///
    /// # Panics
    /// Panics if `index` is outside the slot array.
    fn slot_offset(index: usize) -> usize {
        assert!(
            index < RECORD_SLOTS,
            "record slot {index} out of range (slots: {RECORD_SLOTS})"
        );
        offsets::RECORDS + index * RECORD_SIZE
    }

    // ========== Header ==========

    #[must_use]
    pub fn id(&self) -> PageId {
        self.read_u32(offsets::ID)
    }

    pub fn set_id(&mut self, id: PageId) {
        self.write_u32(offsets::ID, id);
    }

    #[must_use]
    pub fn parent(&self) -> PageId {
        self.read_u32(offsets::PARENT)
    }

    pub fn set_parent(&mut self, parent: PageId) {
        self.write_u32(offsets::PARENT, parent);
    }

    #[must_use]
    pub fn next_page(&self) -> PageId {
        self.read_u32(offsets::NEXT_PAGE)
    }

    pub fn set_next_page(&mut self, next_page: PageId) {
        self.write_u32(offsets::NEXT_PAGE, next_page);
    }

    pub fn page_type(&self) -> Result<PageType, PageError> {
        let raw = self.read_u16(offsets::PAGE_TYPE);
        PageType::try_from(raw).map_err(|value| PageError::InvalidPageType {
            page_id: self.id(),
            value,
        })
    }

    pub fn set_page_type(&mut self, page_type: PageType) {
        self.write_u16(offsets::PAGE_TYPE, page_type as u16);
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        usize::from(self.read_u16(offsets::RECORD_COUNT))
    }

    pub fn set_record_count(&mut self, count: usize) {
        assert!(
            count <= ORDER,
            "record count {count} exceeds order {ORDER}"
        );
        self.write_u16(offsets::RECORD_COUNT, count as u16);
    }

    /// Overwrite the stored record count without bounds checks.
    #[cfg(test)]
    pub(crate) fn set_raw_record_count(&mut self, count: u16) {
        self.write_u16(offsets::RECORD_COUNT, count);
    }

    /// Check the header of a page read from storage.
    ///
    /// A page at rest has a known type and fewer than `ORDER` records; only
    /// a page in the middle of a split holds `ORDER`.
    pub fn validate(&self) -> Result<(), PageError> {
        self.page_type()?;
        let count = self.record_count();
        if count >= ORDER {
            return Err(PageError::RecordCountOutOfRange {
                page_id: self.id(),
                count,
            });
        }
        Ok(())
    }

    /// Reset the header for a freshly allocated page. The id is kept.
    pub fn reset(&mut self, page_type: PageType) {
        self.set_parent(NULL_PAGE);
        self.set_next_page(NULL_PAGE);
        self.set_page_type(page_type);
        self.write_u16(offsets::RECORD_COUNT, 0);
    }

    // ========== Record slots ==========

    /// Key half of slot `index`.
    #[must_use]
    pub fn key(&self, index: usize) -> i64 {
        self.read_i64(Self::slot_offset(index))
    }

    pub fn set_key(&mut self, index: usize, key: i64) {
        self.write_i64(Self::slot_offset(index), key);
    }

    /// Value half of slot `index`.
    #[must_use]
    pub fn slot_value(&self, index: usize) -> i64 {
        self.read_i64(Self::slot_offset(index) + 8)
    }

    pub fn set_slot_value(&mut self, index: usize, value: i64) {
        self.write_i64(Self::slot_offset(index) + 8, value);
    }

    /// Leaf record `index`.
    #[must_use]
    pub fn record(&self, index: usize) -> Record {
        Record {
            key: self.key(index),
            value: self.slot_value(index + 1),
        }
    }

    pub fn set_record(&mut self, index: usize, record: Record) {
        self.set_key(index, record.key);
        self.set_slot_value(index + 1, record.value);
    }

    /// Child pointer `index` of an internal node.
    pub fn child(&self, index: usize) -> Result<PageId, PageError> {
        let value = self.slot_value(index);
        match PageId::try_from(value) {
            Ok(child) if child != NULL_PAGE => Ok(child),
            _ => Err(PageError::InvalidChild {
                page_id: self.id(),
                index,
                value,
            }),
        }
    }

    pub fn set_child(&mut self, index: usize, child: PageId) {
        self.set_slot_value(index, i64::from(child));
    }

    // ========== Search ==========

    /// Lower bound: index of the first key `>= key`, or `record_count`.
    #[must_use]
    pub fn insert_index(&self, key: i64) -> usize {
        let count = self.record_count();
        if count == 0 || self.key(count - 1) < key {
            return count;
        }

        let (mut left, mut right) = (0, count - 1);
        while left < right {
            let mid = (left + right) / 2;
            if self.key(mid) < key {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        left
    }

    /// Exact-match search over the sorted key array.
    ///
    /// Returns `Ok(index)` if found, otherwise `Err(insert_index)`.
    pub fn search(&self, key: i64) -> Result<usize, usize> {
        let index = self.insert_index(key);
        if index < self.record_count() && self.key(index) == key {
            Ok(index)
        } else {
            Err(index)
        }
    }

    /// Index of the child subtree of an internal node that owns `key`.
    ///
    /// Child `i` holds keys in `[key[i-1], key[i])`; equal keys go right.
    #[must_use]
    pub fn child_index(&self, key: i64) -> usize {
        let count = self.record_count();
        if count == 0 {
            return 0;
        }
        if self.key(count - 1) <= key {
            return count;
        }
        if self.key(0) > key {
            return 0;
        }

        // Invariant: key[left] <= key < key[right]
        let (mut left, mut right) = (0, count - 1);
        while right - left > 1 {
            let mid = (left + right) / 2;
            if self.key(mid) > key {
                right = mid;
            } else {
                left = mid;
            }
        }
        right
    }

    // ========== Shifts ==========

    /// Insert `key` at `index`, with `value` in value half `index + 1`.
    ///
    /// Used for leaf inserts and for adding a separator plus its right child
    /// to an internal node.
    pub fn insert_at(&mut self, index: usize, key: i64, value: i64) {
        let count = self.record_count();
        assert!(index <= count, "insert index {index} past end {count}");
        for i in (index + 1..=count).rev() {
            self.set_key(i, self.key(i - 1));
            self.set_slot_value(i + 1, self.slot_value(i));
        }
        self.set_key(index, key);
        self.set_slot_value(index + 1, value);
        self.set_record_count(count + 1);
    }

    /// Remove key `index` together with value half `index + 1`.
    pub fn remove_at(&mut self, index: usize) {
        let count = self.record_count();
        assert!(index < count, "remove index {index} out of range {count}");
        for i in index..count - 1 {
            self.set_key(i, self.key(i + 1));
            self.set_slot_value(i + 1, self.slot_value(i + 2));
        }
        self.set_record_count(count - 1);
    }

    /// Prepend a key and a leftmost child to an internal node.
    pub fn push_front_child(&mut self, key: i64, child: PageId) {
        let count = self.record_count();
        for i in (1..=count).rev() {
            self.set_key(i, self.key(i - 1));
        }
        for i in (1..=count + 1).rev() {
            self.set_slot_value(i, self.slot_value(i - 1));
        }
        self.set_key(0, key);
        self.set_child(0, child);
        self.set_record_count(count + 1);
    }

    /// Remove and return the first key and the leftmost child of an internal
    /// node.
    pub fn pop_front_child(&mut self) -> Result<(i64, PageId), PageError> {
        let count = self.record_count();
        assert!(count > 0, "pop from empty internal node");
        let key = self.key(0);
        let child = self.child(0)?;
        for i in 0..count - 1 {
            self.set_key(i, self.key(i + 1));
        }
        for i in 0..count {
            self.set_slot_value(i, self.slot_value(i + 1));
        }
        self.set_record_count(count - 1);
        Ok((key, child))
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id())
            .field("parent", &self.parent())
            .field("next_page", &self.next_page())
            .field("page_type", &self.page_type())
            .field("record_count", &self.record_count())
            .finish_non_exhaustive()
    }
}

/// Errors related to page contents.
#[derive(Debug)]
pub enum PageError {
    /// Invalid page type in the header.
    InvalidPageType { page_id: PageId, value: u16 },
    /// A child pointer that is not a valid page id.
    InvalidChild {
        page_id: PageId,
        index: usize,
        value: i64,
    },
    /// A stored record count at or above `ORDER`.
    RecordCountOutOfRange { page_id: PageId, count: usize },
}

impl std::fmt::Display for PageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPageType { page_id, value } => {
                write!(f, "invalid page type {value} on page {page_id}")
            }
            Self::InvalidChild {
                page_id,
                index,
                value,
            } => write!(
                f,
                "invalid child pointer {value} at slot {index} of page {page_id}"
            ),
            Self::RecordCountOutOfRange { page_id, count } => {
                write!(f, "record count {count} on page {page_id} exceeds order {ORDER}")
            }
        }
    }
}

impl std::error::Error for PageError {}
