//! Segments repository
//!
//! The repository is the one place that opens, shares and closes
//! [`FileDataSource`]s. Documents never own a source: they hold a
//! [`SourceId`] plus a shared read handle, and every bind or detach goes
//! through the repository's reference-count table. One repository is created
//! per session and passed explicitly to whatever opens or saves documents.
//!
//! Saving a [`DeltaDocument`] is also a repository operation, because it is
//! the repository that knows whether other documents still read from the
//! same file.
//!
//! # Example
//!
//! ```no_run
//! use bined_core::{EditMode, EditableBinaryData, SegmentsRepository};
//!
//! let mut repository = SegmentsRepository::new();
//! let id = repository.open_file_source("data.bin", EditMode::ReadWrite)?;
//! let mut document = repository.create_document(Some(id))?;
//! document.insert(0, b"HEAD")?;
//! repository.save_document(&mut document)?;
//! repository.detach_document(&mut document);
//! repository.close_file_source(id);
//! # Ok::<(), bined_core::BinaryDataError>(())
//! ```

use crate::config::{SaveStrategy, SessionConfig};
use crate::data::{BinaryData, DEFAULT_IO_BUFFER_SIZE};
use crate::delta::{DEFAULT_MAX_MERGED_SEGMENT, DeltaDocument, Segment, SourceBinding};
use crate::error::{BinaryDataError, Result};
use crate::file_source::{EditMode, FileDataSource};
use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Identifier of a file source registered in a [`SegmentsRepository`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub(crate) u64);

#[derive(Debug)]
struct SourceEntry {
    source: Rc<FileDataSource>,
    /// Canonical path used for deduplication
    key: PathBuf,
    /// Number of documents currently bound to the source
    ref_count: usize,
}

/// How a save will reconcile the segment list with the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SavePlan {
    /// The segments are exactly the file; nothing to write.
    Unchanged,
    /// Only in-place overwrites and a trailing append.
    Patch,
    /// Anything else: write a temporary file and rename it over the original.
    Replace,
}

/// Registry of open file sources and factory of delta documents.
#[derive(Debug)]
pub struct SegmentsRepository {
    sources: HashMap<SourceId, SourceEntry>,
    next_id: u64,
    save_strategy: SaveStrategy,
    max_merged_segment: usize,
    io_buffer_size: usize,
}

impl SegmentsRepository {
    /// Create a repository with default settings.
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            next_id: 0,
            save_strategy: SaveStrategy::Auto,
            max_merged_segment: DEFAULT_MAX_MERGED_SEGMENT,
            io_buffer_size: DEFAULT_IO_BUFFER_SIZE,
        }
    }

    /// Create a repository using the storage settings of `config`.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            save_strategy: config.save_strategy,
            max_merged_segment: config.max_merged_segment(),
            io_buffer_size: config.io_buffer_size(),
            ..Self::new()
        }
    }

    /// Save strategy applied by [`save_document`](Self::save_document).
    pub fn save_strategy(&self) -> SaveStrategy {
        self.save_strategy
    }

    /// Change the save strategy.
    pub fn set_save_strategy(&mut self, strategy: SaveStrategy) {
        self.save_strategy = strategy;
    }

    /// Open `path`, or return the already open source for the same file.
    ///
    /// A file already open read-only cannot be shared by a read-write request.
    pub fn open_file_source(&mut self, path: impl AsRef<Path>, mode: EditMode) -> Result<SourceId> {
        let path = path.as_ref();
        let key = fs::canonicalize(path)?;

        if let Some((&id, entry)) = self.sources.iter().find(|(_, entry)| entry.key == key) {
            if mode == EditMode::ReadWrite && !entry.source.is_writable() {
                return Err(BinaryDataError::IllegalState(
                    "file is already open read-only",
                ));
            }
            debug!(path = %path.display(), source = id.0, "reusing open file source");
            return Ok(id);
        }

        let source = FileDataSource::open(path, mode)?;
        let id = SourceId(self.next_id);
        self.next_id += 1;
        self.sources.insert(
            id,
            SourceEntry {
                source: Rc::new(source),
                key,
                ref_count: 0,
            },
        );
        info!(path = %path.display(), source = id.0, ?mode, "opened file source");
        Ok(id)
    }

    /// The open source for the same file as `path`, if any.
    pub fn find_file_source(&self, path: impl AsRef<Path>) -> Result<Option<SourceId>> {
        let key = fs::canonicalize(path)?;
        Ok(self
            .sources
            .iter()
            .find(|(_, entry)| entry.key == key)
            .map(|(&id, _)| id))
    }

    /// Reopen the source `id` in `mode`.
    ///
    /// Only allowed while at most one document is bound to the source. If the
    /// file cannot be opened in the new mode the source keeps its old handle.
    pub fn reopen_file_source(&mut self, id: SourceId, mode: EditMode) -> Result<()> {
        let entry = self
            .sources
            .get(&id)
            .ok_or(BinaryDataError::IllegalState("unknown file source"))?;
        if entry.source.mode() == mode {
            return Ok(());
        }
        if entry.ref_count > 1 {
            return Err(BinaryDataError::IllegalState(
                "file source is shared by other documents",
            ));
        }
        entry.source.reopen_with_mode(mode)?;
        info!(
            path = %entry.source.path().display(),
            source = id.0,
            ?mode,
            "reopened file source"
        );
        Ok(())
    }

    /// The source registered under `id`.
    pub fn file_source(&self, id: SourceId) -> Option<&FileDataSource> {
        self.sources.get(&id).map(|entry| entry.source.as_ref())
    }

    /// Number of documents bound to the source `id`.
    pub fn ref_count(&self, id: SourceId) -> usize {
        self.sources.get(&id).map_or(0, |entry| entry.ref_count)
    }

    /// Number of sources currently open.
    pub fn open_source_count(&self) -> usize {
        self.sources.len()
    }

    /// Create a document, bound to `source` when given.
    ///
    /// A bound document starts as one file-backed segment spanning the whole file.
    pub fn create_document(&mut self, source: Option<SourceId>) -> Result<DeltaDocument> {
        let binding = match source {
            Some(id) => {
                let entry = self
                    .sources
                    .get_mut(&id)
                    .ok_or(BinaryDataError::IllegalState("unknown file source"))?;
                entry.ref_count += 1;
                debug!(source = id.0, ref_count = entry.ref_count, "bound document");
                Some(SourceBinding {
                    id,
                    file: Rc::clone(&entry.source),
                })
            }
            None => None,
        };
        Ok(DeltaDocument::new(binding, self.max_merged_segment))
    }

    /// Unbind `document` from its file source, dropping its content.
    ///
    /// The source stays open; use [`close_file_source`](Self::close_file_source) to release it.
    pub fn detach_document(&mut self, document: &mut DeltaDocument) {
        let Some(binding) = document.take_binding() else {
            return;
        };
        if let Some(entry) = self.sources.get_mut(&binding.id) {
            entry.ref_count = entry.ref_count.saturating_sub(1);
            debug!(source = binding.id.0, ref_count = entry.ref_count, "detached document");
        }
    }

    /// Close the source `id` if no document is bound to it any more.
    ///
    /// Returns `true` if the OS handle was released by this call.
    pub fn close_file_source(&mut self, id: SourceId) -> bool {
        match self.sources.get(&id) {
            Some(entry) if entry.ref_count == 0 => {}
            Some(entry) => {
                debug!(source = id.0, ref_count = entry.ref_count, "file source still in use");
                return false;
            }
            None => return false,
        }
        let Some(entry) = self.sources.remove(&id) else {
            return false;
        };
        info!(path = %entry.source.path().display(), source = id.0, "closing file source");
        entry.source.close()
    }

    /// Write `document` back to its file.
    ///
    /// Pure in-place overwrites and trailing appends are patched directly into
    /// the file (unless the strategy is [`SaveStrategy::AlwaysReplace`]); any
    /// other change is written to a temporary file in the same directory which
    /// then atomically replaces the original. A failed save leaves the original
    /// file content intact. On success the document collapses to a single
    /// file-backed segment spanning the new file.
    pub fn save_document(&mut self, document: &mut DeltaDocument) -> Result<()> {
        let (id, source) = match document.binding() {
            Some(binding) => (binding.id, Rc::clone(&binding.file)),
            None => {
                return Err(BinaryDataError::IllegalState(
                    "document has no bound file source",
                ));
            }
        };
        if !source.is_writable() {
            return Err(BinaryDataError::ReadOnly);
        }
        if self.ref_count(id) > 1 {
            return Err(BinaryDataError::IllegalState(
                "file source is shared by other documents",
            ));
        }

        let plan = match self.save_strategy {
            SaveStrategy::AlwaysReplace => SavePlan::Replace,
            SaveStrategy::Auto => plan_save(document.segments(), source.len()),
        };
        info!(
            path = %source.path().display(),
            size = document.len(),
            segments = document.segment_count(),
            ?plan,
            "saving delta document"
        );

        match plan {
            SavePlan::Unchanged => {}
            SavePlan::Patch => patch_in_place(document.segments(), source.as_ref())?,
            SavePlan::Replace => replace_file(document, &source, self.io_buffer_size)?,
        }
        document.reset_to_file();
        Ok(())
    }
}

impl Default for SegmentsRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn plan_save(segments: &[Segment], file_len: u64) -> SavePlan {
    let mut position = 0;
    let mut dirty = false;
    for segment in segments {
        match segment {
            Segment::File { source_offset, .. } if *source_offset != position => {
                return SavePlan::Replace;
            }
            Segment::File { .. } => {}
            Segment::Memory(_) => dirty = true,
        }
        position += segment.len();
    }

    if position < file_len {
        SavePlan::Replace
    } else if dirty {
        SavePlan::Patch
    } else {
        SavePlan::Unchanged
    }
}

/// Positional file access needed by an in-place save.
trait PatchTarget {
    fn path(&self) -> &Path;
    fn len(&self) -> u64;
    fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>>;
    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()>;
    fn set_len(&self, length: u64) -> Result<()>;
    fn sync(&self) -> Result<()>;
}

impl PatchTarget for FileDataSource {
    fn path(&self) -> &Path {
        FileDataSource::path(self)
    }

    fn len(&self) -> u64 {
        FileDataSource::len(self)
    }

    fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        FileDataSource::read(self, offset, length)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        FileDataSource::write_at(self, offset, data)
    }

    fn set_len(&self, length: u64) -> Result<()> {
        FileDataSource::set_len(self, length)
    }

    fn sync(&self) -> Result<()> {
        FileDataSource::sync(self)
    }
}

/// Write the memory segments at their own positions, restoring the original bytes on failure.
fn patch_in_place(segments: &[Segment], target: &impl PatchTarget) -> Result<()> {
    let original_len = target.len();
    let mut backups = Vec::new();
    let result = write_patches(segments, target, original_len, &mut backups);
    if let Err(err) = result {
        let path = target.path();
        warn!(path = %path.display(), error = %err, "in-place save failed, rolling back");
        for (position, bytes) in backups.iter().rev() {
            if let Err(restore_err) = target.write_at(*position, bytes) {
                warn!(
                    path = %path.display(),
                    position = *position,
                    error = %restore_err,
                    "failed to restore original bytes"
                );
            }
        }
        if let Err(restore_err) = target.set_len(original_len) {
            warn!(
                path = %path.display(),
                length = original_len,
                error = %restore_err,
                "failed to restore file length"
            );
        }
        if let Err(restore_err) = target.sync() {
            warn!(path = %path.display(), error = %restore_err, "failed to sync restored file");
        }
        return Err(err);
    }
    Ok(())
}

fn write_patches(
    segments: &[Segment],
    target: &impl PatchTarget,
    original_len: u64,
    backups: &mut Vec<(u64, Vec<u8>)>,
) -> Result<()> {
    let mut position = 0;
    for segment in segments {
        if let Segment::Memory(data) = segment {
            if position < original_len {
                let overlap = (data.len() as u64).min(original_len - position);
                backups.push((position, target.read(position, overlap)?));
            }
            target.write_at(position, data)?;
        }
        position += segment.len();
    }
    target.sync()
}

/// Write `data` to a synced temporary file next to `path`, carrying over the permissions of `path`.
///
/// The temporary file is deleted again if it is dropped without being persisted.
pub(crate) fn prepare_replacement(
    path: &Path,
    data: &dyn BinaryData,
    io_buffer_size: usize,
) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::Builder::new()
        .prefix(".bined-")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    {
        let mut writer = BufWriter::with_capacity(io_buffer_size, temp.as_file_mut());
        data.save_to_stream(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(temp.path(), metadata.permissions())?;
    }
    Ok(temp)
}

/// Replace `path` with the content of `data` using write-then-rename.
pub(crate) fn write_file_atomically(
    path: &Path,
    data: &dyn BinaryData,
    io_buffer_size: usize,
) -> Result<()> {
    let temp = prepare_replacement(path, data, io_buffer_size)?;
    temp.persist(path).map_err(|err| err.error)?;
    debug!(path = %path.display(), length = data.len(), "wrote file");
    Ok(())
}

/// Write the whole document to a temporary file and rename it over the original.
fn replace_file(
    document: &DeltaDocument,
    source: &FileDataSource,
    io_buffer_size: usize,
) -> Result<()> {
    let path = source.path();
    let temp = prepare_replacement(path, document, io_buffer_size)?;

    // Windows cannot rename over a file that is still open.
    #[cfg(windows)]
    source.close();
    let persisted = temp.persist(path).map_err(|err| err.error);
    source.reopen()?;
    persisted?;
    debug!(path = %path.display(), length = source.len(), "replaced file");
    Ok(())
}
