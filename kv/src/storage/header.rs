//! File header structure and serialization.
//!
//! The header occupies the first 16 bytes of the file, ahead of the page
//! array, and records where the tree and the free list start.

use crate::storage::page::{NULL_PAGE, PageId};

/// Magic number identifying a store file.
pub const MAGIC: u32 = 0xEFEF_EFEF;

/// Size of the serialized header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Header size as u64 for offset calculations.
pub const HEADER_SIZE_U64: u64 = HEADER_SIZE as u64;

/// Header field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const ROOT: usize = 4;
    pub const FREE: usize = 8;
    pub const PAGE_COUNT: usize = 12;
}

/// The file header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Root page of the tree, or `NULL_PAGE` when the tree is empty.
    pub root: PageId,
    /// Head of the on-disk free page list.
    pub free: PageId,
    /// Number of page slots in the file, including the unused page 0.
    pub page_count: u32,
}

impl FileHeader {
    /// Create a header for a fresh, empty file.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            root: NULL_PAGE,
            free: NULL_PAGE,
            page_count: 0,
        }
    }

    /// Serialize the header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        write_u32(&mut buf, offsets::MAGIC, MAGIC);
        write_u32(&mut buf, offsets::ROOT, self.root);
        write_u32(&mut buf, offsets::FREE, self.free);
        write_u32(&mut buf, offsets::PAGE_COUNT, self.page_count);
        buf
    }

    /// Deserialize a header, validating the magic number.
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self, HeaderError> {
        let magic = read_u32(buf, offsets::MAGIC);
        if magic != MAGIC {
            return Err(HeaderError::InvalidMagic(magic));
        }

        Ok(Self {
            root: read_u32(buf, offsets::ROOT),
            free: read_u32(buf, offsets::FREE),
            page_count: read_u32(buf, offsets::PAGE_COUNT),
        })
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

fn read_u32(buf: &[u8; HEADER_SIZE], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn write_u32(buf: &mut [u8; HEADER_SIZE], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Errors that can occur when reading a header.
#[derive(Debug)]
pub enum HeaderError {
    /// Invalid magic number.
    InvalidMagic(u32),
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => write!(f, "invalid magic number: {magic:#010x}"),
        }
    }
}

impl std::error::Error for HeaderError {}
