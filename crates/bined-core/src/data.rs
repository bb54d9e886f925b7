//! Editable binary data contract
//!
//! Both storage backends ([`PagedData`](crate::PagedData) and
//! [`DeltaDocument`](crate::DeltaDocument)) implement the same two traits, so
//! the edit history and the session can drive either one without knowing
//! which is active.
//!
//! Positions and lengths are byte offsets expressed as `u64`, since a delta
//! document may describe a file far larger than the address space.

use crate::error::{BinaryDataError, Result, check_position, check_range};
use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

/// Chunk size used by the default streaming implementations.
pub const DEFAULT_IO_BUFFER_SIZE: usize = 64 * 1024;

/// How a document's content is held while it is being edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileHandlingMode {
    /// The whole content is loaded into a [`PagedData`](crate::PagedData).
    #[default]
    Memory,
    /// The content is a segment overlay ([`DeltaDocument`](crate::DeltaDocument)) over the file.
    Delta,
}

/// Which kinds of mutation a document accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditationMode {
    /// No mutation at all.
    ReadOnly,
    /// Insert, remove and overwrite are all allowed.
    #[default]
    Expanding,
    /// Only overwrite is allowed; the size of the data never changes.
    Inplace,
}

impl EditationMode {
    /// Whether any mutation is allowed.
    pub fn is_editable(self) -> bool {
        self != EditationMode::ReadOnly
    }

    /// Whether size-changing edits (insert/remove) are allowed.
    pub fn allows_resize(self) -> bool {
        self == EditationMode::Expanding
    }
}

/// Read access to a sequence of bytes.
pub trait BinaryData {
    /// Number of bytes.
    fn len(&self) -> u64;

    /// Returns `true` if there are no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `target` with the bytes starting at `position`.
    ///
    /// The whole range `position..position + target.len()` must be inside the data.
    fn copy_to_slice(&self, position: u64, target: &mut [u8]) -> Result<()>;

    /// Return `length` bytes starting at `position`.
    fn get(&self, position: u64, length: u64) -> Result<Vec<u8>> {
        check_range(position, length, self.len())?;
        let length = usize::try_from(length)
            .map_err(|_| BinaryDataError::out_of_range(position, length, self.len()))?;
        let mut buffer = vec![0; length];
        self.copy_to_slice(position, &mut buffer)?;
        Ok(buffer)
    }

    /// Return the single byte at `position`.
    fn get_byte(&self, position: u64) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.copy_to_slice(position, &mut byte)?;
        Ok(byte[0])
    }

    /// Write the whole content to `writer`.
    fn save_to_stream(&self, writer: &mut dyn Write) -> Result<()> {
        let mut reader = BinaryDataReader::new(self);
        let mut buffer = vec![0; DEFAULT_IO_BUFFER_SIZE];
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            writer.write_all(&buffer[..read])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Mutable access to a sequence of bytes.
pub trait EditableBinaryData: BinaryData {
    /// Insert `data` before `position`. `position == len()` appends.
    fn insert(&mut self, position: u64, data: &[u8]) -> Result<()>;

    /// Remove up to `length` bytes starting at `position`.
    ///
    /// A range running past the end is clamped; the number of removed bytes is returned.
    fn remove(&mut self, position: u64, length: u64) -> Result<u64>;

    /// Replace the bytes at `position..position + data.len()` with `data`.
    fn overwrite(&mut self, position: u64, data: &[u8]) -> Result<()>;

    /// Remove all bytes.
    fn clear(&mut self);

    /// Replace the whole content with the bytes read from `reader`.
    fn load_from_stream(&mut self, reader: &mut dyn Read) -> Result<()>;

    /// Release all resources held by the data. The data is empty afterwards.
    fn dispose(&mut self) {
        self.clear();
    }

    /// Insert the whole content of `source` before `position`.
    fn insert_data(&mut self, position: u64, source: &dyn BinaryData) -> Result<()> {
        check_position(position, self.len())?;
        let mut reader = BinaryDataReader::new(source);
        let mut buffer = vec![0; DEFAULT_IO_BUFFER_SIZE];
        let mut target = position;
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            self.insert(target, &buffer[..read])?;
            target += read as u64;
        }
        Ok(())
    }
}

/// [`Read`] adapter over any [`BinaryData`].
pub struct BinaryDataReader<'a, D: BinaryData + ?Sized> {
    data: &'a D,
    position: u64,
}

impl<'a, D: BinaryData + ?Sized> BinaryDataReader<'a, D> {
    /// Create a reader positioned at the start of `data`.
    pub fn new(data: &'a D) -> Self {
        Self { data, position: 0 }
    }

    /// Current read position.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<D: BinaryData + ?Sized> Read for BinaryDataReader<'_, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.data.len().saturating_sub(self.position);
        let count = usize::try_from(remaining).map_or(buf.len(), |r| r.min(buf.len()));
        if count == 0 {
            return Ok(0);
        }
        self.data
            .copy_to_slice(self.position, &mut buf[..count])
            .map_err(|err| match err {
                BinaryDataError::Io(io_err) => io_err,
                other => io::Error::other(other),
            })?;
        self.position += count as u64;
        Ok(count)
    }
}

impl BinaryData for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn copy_to_slice(&self, position: u64, target: &mut [u8]) -> Result<()> {
        check_range(position, target.len() as u64, BinaryData::len(self))?;
        let start = position as usize;
        target.copy_from_slice(&self[start..start + target.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_binary_data() {
        let data: &[u8] = b"HELLO";
        assert_eq!(BinaryData::len(data), 5);
        assert_eq!(BinaryData::get(data, 1, 3).unwrap(), b"ELL");
        assert_eq!(data.get_byte(4).unwrap(), b'O');
        assert!(BinaryData::get(data, 3, 3).is_err());
    }

    #[test]
    fn test_reader_streams_everything() {
        let data: &[u8] = b"0123456789";
        let mut reader = BinaryDataReader::new(data);
        let mut small = [0u8; 4];
        assert_eq!(reader.read(&mut small).unwrap(), 4);
        assert_eq!(&small, b"0123");
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"456789");
        assert_eq!(reader.position(), 10);
    }

    #[test]
    fn test_save_to_stream() {
        let data: &[u8] = b"abc";
        let mut out = Vec::new();
        data.save_to_stream(&mut out).unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_editation_mode_flags() {
        assert!(!EditationMode::ReadOnly.is_editable());
        assert!(EditationMode::Inplace.is_editable());
        assert!(!EditationMode::Inplace.allows_resize());
        assert!(EditationMode::Expanding.allows_resize());
    }
}
