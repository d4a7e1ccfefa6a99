//! Database file I/O operations.
//!
//! This module handles reading and writing the header and pages of the
//! database file. Page `n` lives at byte offset `HEADER_SIZE + n * PAGE_SIZE`;
//! page 0 is never used.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::storage::header::{FileHeader, HEADER_SIZE, HEADER_SIZE_U64, HeaderError};
use crate::storage::io::{Storage, StorageError};
use crate::storage::page::{PAGE_SIZE_U64, Page, PageId};

/// A database file handle with low-level page I/O operations.
pub struct DatabaseFile {
    file: File,
}

impl DatabaseFile {
    /// Create a new database file at the given path.
    ///
    /// Returns an error if the file already exists. The file starts with a
    /// fresh header and no pages.
    pub fn create(path: &Path) -> Result<Self, FileError> {
        if path.exists() {
            return Err(FileError::AlreadyExists(path.to_path_buf()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(FileError::Io)?;

        file.write_all(&FileHeader::new().to_bytes())
            .map_err(FileError::Io)?;
        file.sync_all().map_err(FileError::Io)?;

        tracing::debug!(path = %path.display(), "created database file");
        Ok(Self { file })
    }

    /// Open an existing database file, validating its header.
    pub fn open(path: &Path) -> Result<Self, FileError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(FileError::Io)?;

        let mut db = Self { file };
        db.read_header()?;
        Ok(db)
    }

    /// Open the file at `path`, creating it first if it does not exist.
    pub fn open_or_create(path: &Path) -> Result<Self, FileError> {
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Read and validate the header.
    pub fn read_header(&mut self) -> Result<FileHeader, FileError> {
        let mut buf = [0u8; HEADER_SIZE];
        self.file.seek(SeekFrom::Start(0)).map_err(FileError::Io)?;
        self.file.read_exact(&mut buf).map_err(FileError::Io)?;
        FileHeader::from_bytes(&buf).map_err(FileError::Header)
    }

    /// Write the header.
    pub fn write_header(&mut self, header: &FileHeader) -> Result<(), FileError> {
        self.file.seek(SeekFrom::Start(0)).map_err(FileError::Io)?;
        self.file
            .write_all(&header.to_bytes())
            .map_err(FileError::Io)
    }

    /// Read a page from the file.
    pub fn read_page(&mut self, page_id: PageId, page: &mut Page) -> Result<(), FileError> {
        self.file
            .seek(SeekFrom::Start(page_offset(page_id)))
            .map_err(FileError::Io)?;
        self.file
            .read_exact(page.as_bytes_mut())
            .map_err(FileError::Io)
    }

    /// Write a page to the file.
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), FileError> {
        self.file
            .seek(SeekFrom::Start(page_offset(page_id)))
            .map_err(FileError::Io)?;
        self.file.write_all(page.as_bytes()).map_err(FileError::Io)
    }

    /// Sync all pending writes to disk.
    pub fn sync(&self) -> Result<(), FileError> {
        self.file.sync_all().map_err(FileError::Io)
    }

    /// Current file length in bytes.
    pub fn len(&self) -> Result<u64, FileError> {
        Ok(self.file.metadata().map_err(FileError::Io)?.len())
    }
}

/// Byte offset of a page in the file.
#[must_use]
pub fn page_offset(page_id: PageId) -> u64 {
    HEADER_SIZE_U64 + u64::from(page_id) * PAGE_SIZE_U64
}

/// Errors that can occur during file operations.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists.
    AlreadyExists(std::path::PathBuf),
    /// Header error.
    Header(HeaderError),
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
            Self::Header(e) => write!(f, "header error: {e}"),
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Header(e) => Some(e),
            Self::AlreadyExists(_) => None,
        }
    }
}

impl From<FileError> for StorageError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Io(io_err) => Self::Io(io_err),
            FileError::AlreadyExists(path) => Self::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("file already exists: {}", path.display()),
            )),
            FileError::Header(e) => Self::Header(e),
        }
    }
}

impl Storage for DatabaseFile {
    fn read_header(&mut self) -> Result<FileHeader, StorageError> {
        Self::read_header(self).map_err(StorageError::from)
    }

    fn write_header(&mut self, header: &FileHeader) -> Result<(), StorageError> {
        Self::write_header(self, header).map_err(StorageError::from)
    }

    fn read_page(&mut self, page_id: PageId, page: &mut Page) -> Result<(), StorageError> {
        Self::read_page(self, page_id, page).map_err(StorageError::from)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        Self::write_page(self, page_id, page).map_err(StorageError::from)
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        Self::sync(self).map_err(StorageError::from)
    }
}
