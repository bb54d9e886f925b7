//! Paged in-memory storage
//!
//! Holds the whole content in memory as a list of fixed-size pages. Every page
//! except the last one is always full, so a byte position maps to its page by
//! plain division. Size-changing edits only rebuild the pages at or after the
//! edit position; the pages before it are never touched, so the cost of an edit
//! is proportional to the distance from the edit to the end of the data.

use crate::data::{BinaryData, EditableBinaryData};
use crate::error::{Result, check_position, check_range};
use std::io::{Read, Write};

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Page-organized, fully owned in-memory byte buffer.
#[derive(Debug, Clone)]
pub struct PagedData {
    /// Pages; all full except the last one, which is never empty.
    pages: Vec<Vec<u8>>,
    /// Capacity of a single page
    page_size: usize,
    /// Total number of bytes
    size: u64,
}

impl PagedData {
    /// Create empty data with the default page size.
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create empty data with a custom page size (0 selects the default).
    pub fn with_page_size(page_size: usize) -> Self {
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        Self {
            pages: Vec::new(),
            page_size,
            size: 0,
        }
    }

    /// Create data holding a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = Self::new();
        data.append(bytes);
        data
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of allocated pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Copy the whole content into a vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size as usize);
        for page in &self.pages {
            out.extend_from_slice(page);
        }
        out
    }

    /// Page index and offset inside the page for `position`.
    fn locate(&self, position: u64) -> (usize, usize) {
        let page_size = self.page_size as u64;
        ((position / page_size) as usize, (position % page_size) as usize)
    }

    /// Append bytes at the end, filling the last page first.
    fn append(&mut self, data: &[u8]) {
        let mut rest = data;
        if let Some(last) = self.pages.last_mut() {
            let take = (self.page_size - last.len()).min(rest.len());
            last.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        for chunk in rest.chunks(self.page_size) {
            let mut page = Vec::with_capacity(self.page_size);
            page.extend_from_slice(chunk);
            self.pages.push(page);
        }
        self.size += data.len() as u64;
    }

    /// Cut everything from `position` on, returning the removed bytes.
    fn split_off(&mut self, position: u64) -> Vec<u8> {
        let (page, offset) = self.locate(position);
        if page >= self.pages.len() {
            return Vec::new();
        }

        let mut tail = Vec::with_capacity((self.size - position) as usize);
        tail.extend_from_slice(&self.pages[page][offset..]);
        for next in &self.pages[page + 1..] {
            tail.extend_from_slice(next);
        }
        self.truncate(position);
        tail
    }

    /// Drop everything from `position` on; emptied pages are deallocated.
    fn truncate(&mut self, position: u64) {
        let (page, offset) = self.locate(position);
        if offset == 0 {
            self.pages.truncate(page);
        } else if page < self.pages.len() {
            self.pages.truncate(page + 1);
            self.pages[page].truncate(offset);
        }
        self.size = position;
    }

    /// Visit the stored slices overlapping `position..position + length`.
    fn for_each_chunk_mut(
        &mut self,
        position: u64,
        length: usize,
        mut visit: impl FnMut(&mut [u8], usize),
    ) {
        let (mut page, mut offset) = self.locate(position);
        let mut done = 0;
        while done < length {
            let stored = &mut self.pages[page];
            let count = (stored.len() - offset).min(length - done);
            visit(&mut stored[offset..offset + count], done);
            done += count;
            page += 1;
            offset = 0;
        }
    }
}

impl Default for PagedData {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryData for PagedData {
    fn len(&self) -> u64 {
        self.size
    }

    fn copy_to_slice(&self, position: u64, target: &mut [u8]) -> Result<()> {
        check_range(position, target.len() as u64, self.size)?;
        let (mut page, mut offset) = self.locate(position);
        let mut done = 0;
        while done < target.len() {
            let stored = &self.pages[page];
            let count = (stored.len() - offset).min(target.len() - done);
            target[done..done + count].copy_from_slice(&stored[offset..offset + count]);
            done += count;
            page += 1;
            offset = 0;
        }
        Ok(())
    }

    fn save_to_stream(&self, writer: &mut dyn Write) -> Result<()> {
        for page in &self.pages {
            writer.write_all(page)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl EditableBinaryData for PagedData {
    fn insert(&mut self, position: u64, data: &[u8]) -> Result<()> {
        check_position(position, self.size)?;
        if data.is_empty() {
            return Ok(());
        }
        let tail = self.split_off(position);
        self.append(data);
        self.append(&tail);
        Ok(())
    }

    fn remove(&mut self, position: u64, length: u64) -> Result<u64> {
        check_position(position, self.size)?;
        let length = length.min(self.size - position);
        if length == 0 {
            return Ok(0);
        }
        let tail = self.split_off(position + length);
        self.truncate(position);
        self.append(&tail);
        Ok(length)
    }

    fn overwrite(&mut self, position: u64, data: &[u8]) -> Result<()> {
        check_range(position, data.len() as u64, self.size)?;
        self.for_each_chunk_mut(position, data.len(), |chunk, done| {
            chunk.copy_from_slice(&data[done..done + chunk.len()]);
        });
        Ok(())
    }

    fn clear(&mut self) {
        self.pages = Vec::new();
        self.size = 0;
    }

    fn load_from_stream(&mut self, reader: &mut dyn Read) -> Result<()> {
        self.clear();
        loop {
            let mut page = Vec::with_capacity(self.page_size);
            let read = Read::take(&mut *reader, self.page_size as u64).read_to_end(&mut page)?;
            if read == 0 {
                break;
            }
            self.pages.push(page);
            self.size += read as u64;
            if read < self.page_size {
                break;
            }
        }
        Ok(())
    }
}
