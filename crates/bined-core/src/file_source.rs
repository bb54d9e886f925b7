//! On-disk file access for delta documents.
//!
//! A [`FileDataSource`] wraps one open file and offers bounded reads plus, when
//! opened read-write, the low-level write primitives the repository needs to
//! patch a file in place. Sources are opened, shared and closed exclusively
//! through [`SegmentsRepository`](crate::SegmentsRepository).

use crate::error::{BinaryDataError, Result, check_range};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Access mode of a file source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditMode {
    /// The file is opened for reading only.
    ReadOnly,
    /// The file is opened for reading and writing.
    ReadWrite,
}

/// One open file backing any number of delta documents.
#[derive(Debug)]
pub struct FileDataSource {
    path: PathBuf,
    mode: Cell<EditMode>,
    /// `None` once the source has been closed.
    file: RefCell<Option<File>>,
    length: Cell<u64>,
}

impl FileDataSource {
    /// Open `path` in the requested mode.
    pub fn open(path: impl AsRef<Path>, mode: EditMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = Self::open_file(&path, mode)?;
        let length = file.metadata()?.len();
        debug!(path = %path.display(), ?mode, length, "opened file source");
        Ok(Self {
            path,
            mode: Cell::new(mode),
            file: RefCell::new(Some(file)),
            length: Cell::new(length),
        })
    }

    fn open_file(path: &Path, mode: EditMode) -> std::io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(mode == EditMode::ReadWrite)
            .open(path)
    }

    /// Path the source was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Access mode.
    pub fn mode(&self) -> EditMode {
        self.mode.get()
    }

    /// Whether the write primitives are available.
    pub fn is_writable(&self) -> bool {
        self.mode() == EditMode::ReadWrite
    }

    /// Whether the OS handle is still held.
    pub fn is_open(&self) -> bool {
        self.file.borrow().is_some()
    }

    /// Current size of the file in bytes.
    pub fn len(&self) -> u64 {
        self.length.get()
    }

    /// Returns `true` if the file is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Re-read the on-disk size, e.g. after the file was changed behind our back.
    pub fn refresh_length(&self) -> Result<u64> {
        let length = self.with_file(|file| Ok(file.metadata()?.len()))?;
        self.length.set(length);
        Ok(length)
    }

    /// Read `length` bytes starting at `offset`.
    pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        check_range(offset, length, self.len())?;
        let size = usize::try_from(length)
            .map_err(|_| BinaryDataError::out_of_range(offset, length, self.len()))?;
        let mut buffer = vec![0; size];
        self.read_into(offset, &mut buffer)?;
        Ok(buffer)
    }

    /// Fill `target` with the bytes starting at `offset`.
    pub fn read_into(&self, offset: u64, target: &mut [u8]) -> Result<()> {
        check_range(offset, target.len() as u64, self.len())?;
        if target.is_empty() {
            return Ok(());
        }
        self.with_file(|mut file| {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(target)
        })
    }

    /// Write `data` at `offset`, extending the file if needed.
    pub(crate) fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        self.with_file(|mut file| {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(data)
        })?;
        let end = offset + data.len() as u64;
        if end > self.len() {
            self.length.set(end);
        }
        Ok(())
    }

    /// Truncate or extend the file to `length` bytes.
    pub(crate) fn set_len(&self, length: u64) -> Result<()> {
        self.ensure_writable()?;
        self.with_file(|file| file.set_len(length))?;
        self.length.set(length);
        Ok(())
    }

    /// Flush written data to the storage device.
    pub(crate) fn sync(&self) -> Result<()> {
        self.with_file(|mut file| {
            file.flush()?;
            file.sync_all()
        })
    }

    /// Replace the OS handle with a fresh one for the same path.
    ///
    /// Used after the file was atomically replaced by a new one.
    pub(crate) fn reopen(&self) -> Result<()> {
        self.reopen_with_mode(self.mode())
    }

    /// Replace the OS handle with one opened in `mode`.
    ///
    /// The current handle is kept if the file cannot be opened.
    pub(crate) fn reopen_with_mode(&self, mode: EditMode) -> Result<()> {
        let file = Self::open_file(&self.path, mode)?;
        let length = file.metadata()?.len();
        *self.file.borrow_mut() = Some(file);
        self.mode.set(mode);
        self.length.set(length);
        debug!(path = %self.path.display(), ?mode, length, "reopened file source");
        Ok(())
    }

    /// Release the OS handle. Returns `false` if it was already released.
    pub(crate) fn close(&self) -> bool {
        let closed = self.file.borrow_mut().take().is_some();
        if closed {
            debug!(path = %self.path.display(), "closed file source");
        }
        closed
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_writable() {
            Ok(())
        } else {
            Err(BinaryDataError::ReadOnly)
        }
    }

    fn with_file<T>(&self, op: impl FnOnce(&File) -> std::io::Result<T>) -> Result<T> {
        let guard = self.file.borrow();
        let file = guard
            .as_ref()
            .ok_or(BinaryDataError::IllegalState("file source is closed"))?;
        Ok(op(file)?)
    }
}
