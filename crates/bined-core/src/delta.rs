//! Delta document: segment overlay over an on-disk file
//!
//! A [`DeltaDocument`] describes its content as an ordered list of
//! [`Segment`]s. A segment either refers to a byte range of the bound
//! [`FileDataSource`] or owns a buffer of newly written bytes. Edits only
//! split, splice and merge segments, so editing a multi-gigabyte file keeps
//! memory proportional to the bytes actually written.
//!
//! Invariants (checked by [`DeltaDocument::is_consistent`]):
//!
//! - segments cover `[0, len())` exactly, in order, without gaps or overlaps
//! - no segment is empty
//! - file-backed segments only exist while a file source is bound
//!
//! Documents are created by [`SegmentsRepository::create_document`](crate::SegmentsRepository::create_document)
//! and saved by [`SegmentsRepository::save_document`](crate::SegmentsRepository::save_document).

use crate::data::{BinaryData, DEFAULT_IO_BUFFER_SIZE, EditableBinaryData};
use crate::error::{BinaryDataError, Result, check_position, check_range};
use crate::file_source::FileDataSource;
use crate::repository::{SegmentsRepository, SourceId};
use std::io::{Read, Write};
use std::rc::Rc;
use tracing::warn;

/// Default upper bound for coalescing adjacent memory segments.
pub const DEFAULT_MAX_MERGED_SEGMENT: usize = 64 * 1024;

/// A contiguous run of a delta document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Bytes `source_offset..source_offset + length` of the bound file.
    File {
        /// Start position in the file
        source_offset: u64,
        /// Number of bytes
        length: u64,
    },
    /// Bytes written during the editing session.
    Memory(Vec<u8>),
}

impl Segment {
    /// Number of bytes covered by the segment.
    pub fn len(&self) -> u64 {
        match self {
            Segment::File { length, .. } => *length,
            Segment::Memory(buffer) => buffer.len() as u64,
        }
    }

    /// Returns `true` for a zero-length segment (never present in a consistent document).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the segment refers to the bound file.
    pub fn is_file_backed(&self) -> bool {
        matches!(self, Segment::File { .. })
    }

    /// Split at `at`, keeping `..at` in `self` and returning `at..`.
    fn split_off(&mut self, at: u64) -> Segment {
        match self {
            Segment::File {
                source_offset,
                length,
            } => {
                let right = Segment::File {
                    source_offset: *source_offset + at,
                    length: *length - at,
                };
                *length = at;
                right
            }
            Segment::Memory(buffer) => Segment::Memory(buffer.split_off(at as usize)),
        }
    }
}

/// Binding of a document to a repository-managed file source.
#[derive(Debug)]
pub(crate) struct SourceBinding {
    pub(crate) id: SourceId,
    pub(crate) file: Rc<FileDataSource>,
}

/// Editable segment overlay over an optional file source.
#[derive(Debug)]
pub struct DeltaDocument {
    /// Bound file source, if any
    binding: Option<SourceBinding>,
    /// Ordered segments
    segments: Vec<Segment>,
    /// Start position of each segment (prefix sums of segment lengths)
    starts: Vec<u64>,
    /// Total number of bytes
    size: u64,
    /// Memory segments are only merged while the result stays within this size
    max_merged_segment: usize,
}

impl DeltaDocument {
    pub(crate) fn new(binding: Option<SourceBinding>, max_merged_segment: usize) -> Self {
        let mut document = Self {
            binding,
            segments: Vec::new(),
            starts: Vec::new(),
            size: 0,
            max_merged_segment,
        };
        document.reset_to_file();
        document
    }

    /// Identifier of the bound file source.
    pub fn source_id(&self) -> Option<SourceId> {
        self.binding.as_ref().map(|binding| binding.id)
    }

    /// The bound file source.
    pub fn file_source(&self) -> Option<&FileDataSource> {
        self.binding.as_ref().map(|binding| binding.file.as_ref())
    }

    /// Whether a file source is bound.
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Current segment list.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Bytes held in memory segments.
    pub fn memory_usage(&self) -> u64 {
        self.segments
            .iter()
            .filter(|segment| !segment.is_file_backed())
            .map(Segment::len)
            .sum()
    }

    /// Check the coverage invariants of the segment list.
    pub fn is_consistent(&self) -> bool {
        if self.segments.len() != self.starts.len() {
            return false;
        }
        let source_len = self.file_source().map(FileDataSource::len);
        let mut position = 0;
        for (segment, &start) in self.segments.iter().zip(&self.starts) {
            if segment.is_empty() || start != position {
                return false;
            }
            if let Segment::File {
                source_offset,
                length,
            } = segment
            {
                match source_len {
                    Some(len) if source_offset + length <= len => {}
                    _ => return false,
                }
            }
            position += segment.len();
        }
        position == self.size
    }

    /// Save through `repository`; see [`SegmentsRepository::save_document`].
    pub fn save(&mut self, repository: &mut SegmentsRepository) -> Result<()> {
        repository.save_document(self)
    }

    /// Release the file binding through `repository`; see [`SegmentsRepository::detach_document`].
    pub fn detach(&mut self, repository: &mut SegmentsRepository) {
        repository.detach_document(self);
    }

    pub(crate) fn binding(&self) -> Option<&SourceBinding> {
        self.binding.as_ref()
    }

    pub(crate) fn take_binding(&mut self) -> Option<SourceBinding> {
        self.clear();
        self.binding.take()
    }

    /// Collapse to a single file-backed segment spanning the whole bound file.
    pub(crate) fn reset_to_file(&mut self) {
        self.segments.clear();
        self.starts.clear();
        self.size = 0;
        if let Some(length) = self.file_source().map(FileDataSource::len)
            && length > 0
        {
            self.segments.push(Segment::File {
                source_offset: 0,
                length,
            });
            self.starts.push(0);
            self.size = length;
        }
    }

    fn source(&self) -> Result<&FileDataSource> {
        self.file_source()
            .ok_or(BinaryDataError::IllegalState("document has no bound file source"))
    }

    /// Index of the segment containing `position` (`position < size`).
    fn segment_index(&self, position: u64) -> usize {
        self.starts.partition_point(|&start| start <= position) - 1
    }

    /// Make `position` a segment boundary and return the index of the segment starting there.
    ///
    /// Returns `segments.len()` for `position == size`.
    fn split_at(&mut self, position: u64) -> usize {
        if position >= self.size {
            return self.segments.len();
        }
        let idx = self.segment_index(position);
        let offset = position - self.starts[idx];
        if offset == 0 {
            return idx;
        }
        let right = self.segments[idx].split_off(offset);
        self.segments.insert(idx + 1, right);
        self.starts.insert(idx + 1, position);
        idx + 1
    }

    /// Merge segments `idx` and `idx + 1` when they are contiguous.
    fn try_merge(&mut self, idx: usize) -> bool {
        if idx + 1 >= self.segments.len() {
            return false;
        }
        let mergeable = match (&self.segments[idx], &self.segments[idx + 1]) {
            (
                Segment::File {
                    source_offset,
                    length,
                },
                Segment::File {
                    source_offset: next_offset,
                    ..
                },
            ) => source_offset + length == *next_offset,
            (Segment::Memory(left), Segment::Memory(right)) => {
                left.len() + right.len() <= self.max_merged_segment
            }
            _ => false,
        };
        if !mergeable {
            return false;
        }

        let next = self.segments.remove(idx + 1);
        self.starts.remove(idx + 1);
        match (&mut self.segments[idx], next) {
            (Segment::File { length, .. }, Segment::File { length: extra, .. }) => {
                *length += extra;
            }
            (Segment::Memory(left), Segment::Memory(right)) => left.extend_from_slice(&right),
            _ => unreachable!("only matching segment kinds are merged"),
        }
        true
    }

    /// Merge the segment at `idx` with its neighbours where possible.
    fn coalesce(&mut self, idx: usize) {
        self.try_merge(idx);
        if idx > 0 {
            self.try_merge(idx - 1);
        }
    }

    fn push_memory(&mut self, data: Vec<u8>) {
        let length = data.len() as u64;
        self.segments.push(Segment::Memory(data));
        self.starts.push(self.size);
        self.size += length;
    }
}

impl Drop for DeltaDocument {
    fn drop(&mut self) {
        if let Some(binding) = &self.binding {
            warn!(
                source = binding.id.0,
                "delta document dropped while still bound to a file source"
            );
        }
    }
}

impl BinaryData for DeltaDocument {
    fn len(&self) -> u64 {
        self.size
    }

    fn copy_to_slice(&self, position: u64, target: &mut [u8]) -> Result<()> {
        check_range(position, target.len() as u64, self.size)?;
        if target.is_empty() {
            return Ok(());
        }

        let mut idx = self.segment_index(position);
        let mut offset = position - self.starts[idx];
        let mut done = 0;
        while done < target.len() {
            let segment = &self.segments[idx];
            let count = (segment.len() - offset).min((target.len() - done) as u64) as usize;
            let chunk = &mut target[done..done + count];
            match segment {
                Segment::File { source_offset, .. } => {
                    self.source()?.read_into(source_offset + offset, chunk)?;
                }
                Segment::Memory(buffer) => {
                    let start = offset as usize;
                    chunk.copy_from_slice(&buffer[start..start + count]);
                }
            }
            done += count;
            idx += 1;
            offset = 0;
        }
        Ok(())
    }

    fn save_to_stream(&self, writer: &mut dyn Write) -> Result<()> {
        let mut buffer = Vec::new();
        for segment in &self.segments {
            match segment {
                Segment::File {
                    source_offset,
                    length,
                } => {
                    let source = self.source()?;
                    let mut copied = 0;
                    while copied < *length {
                        let count = (*length - copied).min(DEFAULT_IO_BUFFER_SIZE as u64) as usize;
                        buffer.resize(count, 0);
                        source.read_into(source_offset + copied, &mut buffer)?;
                        writer.write_all(&buffer)?;
                        copied += count as u64;
                    }
                }
                Segment::Memory(data) => writer.write_all(data)?,
            }
        }
        writer.flush()?;
        Ok(())
    }
}

impl EditableBinaryData for DeltaDocument {
    fn insert(&mut self, position: u64, data: &[u8]) -> Result<()> {
        check_position(position, self.size)?;
        if data.is_empty() {
            return Ok(());
        }

        let length = data.len() as u64;
        let idx = self.split_at(position);
        self.segments.insert(idx, Segment::Memory(data.to_vec()));
        self.starts.insert(idx, position);
        for start in &mut self.starts[idx + 1..] {
            *start += length;
        }
        self.size += length;
        self.coalesce(idx);
        Ok(())
    }

    fn remove(&mut self, position: u64, length: u64) -> Result<u64> {
        check_position(position, self.size)?;
        let length = length.min(self.size - position);
        if length == 0 {
            return Ok(0);
        }

        let first = self.split_at(position);
        let end = self.split_at(position + length);
        self.segments.drain(first..end);
        self.starts.drain(first..end);
        for start in &mut self.starts[first..] {
            *start -= length;
        }
        self.size -= length;
        if first > 0 {
            self.try_merge(first - 1);
        }
        Ok(length)
    }

    fn overwrite(&mut self, position: u64, data: &[u8]) -> Result<()> {
        check_range(position, data.len() as u64, self.size)?;
        if data.is_empty() {
            return Ok(());
        }

        // Range entirely inside one memory segment: patch the buffer directly.
        let idx = self.segment_index(position);
        let offset = (position - self.starts[idx]) as usize;
        if let Segment::Memory(buffer) = &mut self.segments[idx]
            && offset + data.len() <= buffer.len()
        {
            buffer[offset..offset + data.len()].copy_from_slice(data);
            return Ok(());
        }

        let first = self.split_at(position);
        let end = self.split_at(position + data.len() as u64);
        self.segments.drain(first..end);
        self.segments.insert(first, Segment::Memory(data.to_vec()));
        self.starts.drain(first..end);
        self.starts.insert(first, position);
        self.coalesce(first);
        Ok(())
    }

    fn clear(&mut self) {
        self.segments = Vec::new();
        self.starts = Vec::new();
        self.size = 0;
    }

    fn load_from_stream(&mut self, reader: &mut dyn Read) -> Result<()> {
        self.clear();
        let chunk_size = self.max_merged_segment.max(1) as u64;
        loop {
            let mut chunk = Vec::new();
            let read = Read::take(&mut *reader, chunk_size).read_to_end(&mut chunk)?;
            if read == 0 {
                break;
            }
            self.push_memory(chunk);
            if (read as u64) < chunk_size {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_document(content: &[u8]) -> DeltaDocument {
        let mut document = DeltaDocument::new(None, DEFAULT_MAX_MERGED_SEGMENT);
        document.insert(0, content).unwrap();
        document
    }

    fn content(document: &DeltaDocument) -> Vec<u8> {
        document.get(0, document.len()).unwrap()
    }

    #[test]
    fn test_insert_into_empty_document() {
        let mut document = DeltaDocument::new(None, DEFAULT_MAX_MERGED_SEGMENT);
        document.insert(0, b"").unwrap();
        assert_eq!(document.segment_count(), 0);
        document.insert(0, b"abc").unwrap();
        assert_eq!(content(&document), b"abc");
        assert!(document.is_consistent());
    }

    #[test]
    fn test_sequential_inserts_merge() {
        let mut document = memory_document(b"a");
        document.insert(1, b"b").unwrap();
        document.insert(2, b"c").unwrap();
        document.insert(0, b"_").unwrap();
        assert_eq!(content(&document), b"_abc");
        assert_eq!(document.segment_count(), 1);
    }

    #[test]
    fn test_merge_respects_bound() {
        let mut document = DeltaDocument::new(None, 4);
        document.insert(0, b"abc").unwrap();
        document.insert(3, b"de").unwrap();
        assert_eq!(document.segment_count(), 2);
        assert_eq!(content(&document), b"abcde");
        assert!(document.is_consistent());
    }

    #[test]
    fn test_remove_across_segments() {
        let mut document = DeltaDocument::new(None, 2);
        document.insert(0, b"ab").unwrap();
        document.insert(2, b"cd").unwrap();
        document.insert(4, b"ef").unwrap();
        assert_eq!(document.segment_count(), 3);
        assert_eq!(document.remove(1, 4).unwrap(), 4);
        assert_eq!(content(&document), b"af");
        assert!(document.is_consistent());
        assert_eq!(document.remove(1, 10).unwrap(), 1);
        assert_eq!(content(&document), b"a");
        assert!(document.remove(2, 1).is_err());
    }

    #[test]
    fn test_overwrite_inside_memory_segment() {
        let mut document = memory_document(b"HELLO");
        document.overwrite(1, b"I").unwrap();
        assert_eq!(content(&document), b"HILLO");
        assert_eq!(document.segment_count(), 1);
    }

    #[test]
    fn test_overwrite_spanning_segments() {
        let mut document = DeltaDocument::new(None, 2);
        document.insert(0, b"ab").unwrap();
        document.insert(2, b"cd").unwrap();
        document.overwrite(1, b"XY").unwrap();
        assert_eq!(content(&document), b"aXYd");
        assert_eq!(document.len(), 4);
        assert!(document.is_consistent());
        assert!(document.overwrite(3, b"zz").is_err());
    }

    #[test]
    fn test_get_out_of_range() {
        let document = memory_document(b"abc");
        assert!(matches!(
            document.get(2, 2),
            Err(BinaryDataError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_load_and_save_stream() {
        let data: Vec<u8> = (0..200u8).collect();
        let mut document = DeltaDocument::new(None, 64);
        document.load_from_stream(&mut data.as_slice()).unwrap();
        assert_eq!(document.segment_count(), 4);
        let mut out = Vec::new();
        document.save_to_stream(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_memory_usage() {
        let mut document = memory_document(b"abcdef");
        assert_eq!(document.memory_usage(), 6);
        document.remove(0, 3).unwrap();
        assert_eq!(document.memory_usage(), 3);
        document.dispose();
        assert_eq!(document.memory_usage(), 0);
        assert!(document.is_empty());
    }
}
