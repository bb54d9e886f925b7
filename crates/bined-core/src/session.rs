//! Editing session
//!
//! An [`EditorSession`] ties together the active content storage, the file it
//! was opened from, the edit history and the session configuration. It is the
//! surface a host application (or the command line front end) talks to.
//!
//! # Overview
//!
//! - **Documents**: open a file or a stream, start an empty document, save it
//!   back, close it
//! - **Storage modes**: hold the content in memory ([`PagedData`]) or as a
//!   segment overlay over the file ([`DeltaDocument`]), and switch between them
//! - **Editing**: insert, remove and overwrite bytes; every edit is recorded in
//!   the [`CommandStack`]
//! - **Change notifications**: subscribe to session changes, tracked through a
//!   version number
//!
//! File sources are owned by a [`SegmentsRepository`] passed in by the caller,
//! so several sessions can share one repository.
//!
//! # Example
//!
//! ```rust
//! use bined_core::{EditorSession, SegmentsRepository, SessionConfig};
//!
//! let mut repository = SegmentsRepository::new();
//! let mut session = EditorSession::new(SessionConfig::default());
//! session.new_document(&mut repository);
//!
//! session.subscribe(|change| {
//!     println!("{:?}: {} -> {}", change.kind, change.old_version, change.new_version);
//! });
//!
//! session.insert(0, b"HELLO").unwrap();
//! session.overwrite(1, b"I").unwrap();
//! assert_eq!(session.get(0, 5).unwrap(), b"HILLO");
//!
//! session.perform_undo().unwrap();
//! assert_eq!(session.get(0, 5).unwrap(), b"HELLO");
//! assert!(session.is_modified());
//!
//! session.close_data(&mut repository);
//! ```

use crate::config::SessionConfig;
use crate::data::{BinaryData, BinaryDataReader, EditableBinaryData, EditationMode, FileHandlingMode};
use crate::delta::DeltaDocument;
use crate::error::{BinaryDataError, Result, check_position};
use crate::file_source::EditMode;
use crate::paged::PagedData;
use crate::repository::{SegmentsRepository, SourceId, write_file_atomically};
use crate::undo::{CommandStack, EditCommand};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::mem;
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Content storage of a session.
#[derive(Debug)]
pub enum ContentData {
    /// Fully loaded content ([`FileHandlingMode::Memory`]).
    Paged(PagedData),
    /// Segment overlay over a file ([`FileHandlingMode::Delta`]).
    Delta(DeltaDocument),
}

impl ContentData {
    /// The storage mode this content belongs to.
    pub fn mode(&self) -> FileHandlingMode {
        match self {
            ContentData::Paged(_) => FileHandlingMode::Memory,
            ContentData::Delta(_) => FileHandlingMode::Delta,
        }
    }

    /// The delta document, if this is delta content.
    pub fn as_delta(&self) -> Option<&DeltaDocument> {
        match self {
            ContentData::Delta(document) => Some(document),
            ContentData::Paged(_) => None,
        }
    }

    /// The paged data, if this is memory content.
    pub fn as_paged(&self) -> Option<&PagedData> {
        match self {
            ContentData::Paged(data) => Some(data),
            ContentData::Delta(_) => None,
        }
    }

    /// Approximate heap bytes held for the content itself.
    ///
    /// File-backed segments of a delta document cost nothing here.
    pub fn memory_usage(&self) -> u64 {
        match self {
            ContentData::Paged(data) => data.len(),
            ContentData::Delta(document) => document.memory_usage(),
        }
    }
}

impl BinaryData for ContentData {
    fn len(&self) -> u64 {
        match self {
            ContentData::Paged(data) => data.len(),
            ContentData::Delta(document) => document.len(),
        }
    }

    fn copy_to_slice(&self, position: u64, target: &mut [u8]) -> Result<()> {
        match self {
            ContentData::Paged(data) => data.copy_to_slice(position, target),
            ContentData::Delta(document) => document.copy_to_slice(position, target),
        }
    }

    fn save_to_stream(&self, writer: &mut dyn Write) -> Result<()> {
        match self {
            ContentData::Paged(data) => data.save_to_stream(writer),
            ContentData::Delta(document) => document.save_to_stream(writer),
        }
    }
}

impl EditableBinaryData for ContentData {
    fn insert(&mut self, position: u64, data: &[u8]) -> Result<()> {
        match self {
            ContentData::Paged(paged) => paged.insert(position, data),
            ContentData::Delta(document) => document.insert(position, data),
        }
    }

    fn remove(&mut self, position: u64, length: u64) -> Result<u64> {
        match self {
            ContentData::Paged(data) => data.remove(position, length),
            ContentData::Delta(document) => document.remove(position, length),
        }
    }

    fn overwrite(&mut self, position: u64, data: &[u8]) -> Result<()> {
        match self {
            ContentData::Paged(paged) => paged.overwrite(position, data),
            ContentData::Delta(document) => document.overwrite(position, data),
        }
    }

    fn clear(&mut self) {
        match self {
            ContentData::Paged(data) => data.clear(),
            ContentData::Delta(document) => document.clear(),
        }
    }

    fn load_from_stream(&mut self, reader: &mut dyn Read) -> Result<()> {
        match self {
            ContentData::Paged(data) => data.load_from_stream(reader),
            ContentData::Delta(document) => document.load_from_stream(reader),
        }
    }
}

/// Session change kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChangeKind {
    /// A file or stream was opened, or a new empty document started
    DocumentOpened,
    /// The document was closed
    DocumentClosed,
    /// Content modified by an edit
    ContentModified,
    /// Content modified by undo or redo
    UndoRedo,
    /// The document was saved
    Saved,
    /// The file handling mode changed
    ModeSwitched,
    /// The undo history was cleared or its sync point moved
    HistoryChanged,
}

/// Session change record
#[derive(Debug, Clone)]
pub struct SessionChange {
    /// Change kind
    pub kind: SessionChangeKind,
    /// Old version number
    pub old_version: u64,
    /// New version number
    pub new_version: u64,
    /// Affected byte range, for edits
    pub affected_range: Option<Range<u64>>,
}

impl SessionChange {
    /// Create a change record without an affected range.
    pub fn new(kind: SessionChangeKind, old_version: u64, new_version: u64) -> Self {
        Self {
            kind,
            old_version,
            new_version,
            affected_range: None,
        }
    }

    /// Attach the affected byte range.
    pub fn with_range(mut self, range: Range<u64>) -> Self {
        self.affected_range = Some(range);
        self
    }
}

/// Document state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentState {
    /// Content size in bytes
    pub size: u64,
    /// Whether the content differs from the last saved state
    pub is_modified: bool,
    /// Active storage mode
    pub file_handling_mode: FileHandlingMode,
    /// Allowed kinds of mutation
    pub editation_mode: EditationMode,
    /// File the document is bound to
    pub file: Option<PathBuf>,
    /// Session version number (incremented on every change)
    pub version: u64,
    /// Number of segments (1 for memory content)
    pub segment_count: usize,
    /// Heap bytes held by the content
    pub memory_usage: u64,
}

/// Undo/redo stack state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoRedoState {
    /// Can undo
    pub can_undo: bool,
    /// Can redo
    pub can_redo: bool,
    /// Undo stack depth
    pub undo_depth: usize,
    /// Redo stack depth
    pub redo_depth: usize,
    /// Number of applied commands
    pub command_position: usize,
    /// Command position of the last save
    pub sync_point: Option<usize>,
    /// Bytes held by recorded commands
    pub captured_bytes: usize,
}

/// Session change callback function type
pub type SessionChangeCallback = Box<dyn FnMut(&SessionChange)>;

/// One open document with its storage, file binding and edit history.
///
/// A session owns its content, but file sources belong to the
/// [`SegmentsRepository`] passed to the file-related methods. Call
/// [`close_data`](Self::close_data) before dropping a session that holds a
/// delta document, so the file source is released.
pub struct EditorSession {
    config: SessionConfig,
    /// Active storage mode
    mode: FileHandlingMode,
    data: ContentData,
    editation_mode: EditationMode,
    /// Content overlays a file that was opened without write access
    read_only_source: bool,
    /// File the content was opened from or last saved to
    file: Option<PathBuf>,
    undo: CommandStack,
    /// State version number
    version: u64,
    callbacks: Vec<SessionChangeCallback>,
}

impl EditorSession {
    /// Create a session with empty content in the configured storage mode.
    pub fn new(config: SessionConfig) -> Self {
        let mode = config.file_handling_mode;
        let data = empty_content(&config, mode);
        let undo = CommandStack::with_max_depth(config.max_undo_depth);
        Self {
            config,
            mode,
            data,
            editation_mode: EditationMode::Expanding,
            read_only_source: false,
            file: None,
            undo,
            version: 0,
            callbacks: Vec::new(),
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Active storage mode.
    pub fn file_handling_mode(&self) -> FileHandlingMode {
        self.mode
    }

    /// Allowed kinds of mutation.
    pub fn editation_mode(&self) -> EditationMode {
        self.editation_mode
    }

    /// Change the allowed kinds of mutation.
    ///
    /// Content opened read-only from a delta file source cannot become editable.
    pub fn set_editation_mode(&mut self, editation_mode: EditationMode) -> Result<()> {
        if editation_mode.is_editable() && self.read_only_source {
            return Err(BinaryDataError::ReadOnly);
        }
        self.editation_mode = editation_mode;
        Ok(())
    }

    /// File the document is bound to.
    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    /// Current content.
    pub fn data(&self) -> &ContentData {
        &self.data
    }

    /// Edit history.
    pub fn undo_stack(&self) -> &CommandStack {
        &self.undo
    }

    /// Open `path` in the active storage mode, replacing the current document.
    ///
    /// On failure the current document is left unchanged.
    pub fn open_document(
        &mut self,
        repository: &mut SegmentsRepository,
        path: impl AsRef<Path>,
        editable: bool,
    ) -> Result<()> {
        let path = path.as_ref();
        let data = match self.mode {
            FileHandlingMode::Delta => {
                let edit_mode = if editable {
                    EditMode::ReadWrite
                } else {
                    EditMode::ReadOnly
                };
                let id = self.open_delta_source(repository, path, edit_mode)?;
                match repository.create_document(Some(id)) {
                    Ok(document) => ContentData::Delta(document),
                    Err(err) => {
                        repository.close_file_source(id);
                        return Err(err);
                    }
                }
            }
            FileHandlingMode::Memory => {
                let file = File::open(path)?;
                let mut reader = BufReader::with_capacity(self.config.io_buffer_size(), file);
                let mut paged = PagedData::with_page_size(self.config.page_size);
                paged.load_from_stream(&mut reader)?;
                ContentData::Paged(paged)
            }
        };

        self.replace_data(repository, data);
        self.read_only_source = self.mode == FileHandlingMode::Delta && !editable;
        self.file = Some(path.to_path_buf());
        self.editation_mode = editation_for(editable);
        self.undo.clear();
        info!(
            path = %path.display(),
            mode = ?self.mode,
            size = self.data.len(),
            editable,
            "opened document"
        );
        self.mark_changed(SessionChangeKind::DocumentOpened, None);
        Ok(())
    }

    /// Load the content of `reader` as a new document without a file.
    ///
    /// On failure the current document is left unchanged.
    pub fn open_stream(
        &mut self,
        repository: &mut SegmentsRepository,
        reader: &mut dyn Read,
        editable: bool,
    ) -> Result<()> {
        let mut data = empty_content(&self.config, self.mode);
        data.load_from_stream(reader)?;
        self.replace_data(repository, data);
        self.file = None;
        self.editation_mode = editation_for(editable);
        self.undo.clear();
        debug!(size = self.data.len(), "opened stream");
        self.mark_changed(SessionChangeKind::DocumentOpened, None);
        Ok(())
    }

    /// Start an empty, editable document without a file.
    pub fn new_document(&mut self, repository: &mut SegmentsRepository) {
        let data = empty_content(&self.config, self.mode);
        self.replace_data(repository, data);
        self.file = None;
        self.editation_mode = EditationMode::Expanding;
        self.undo.clear();
        self.mark_changed(SessionChangeKind::DocumentOpened, None);
    }

    /// Write the content back to the bound file and mark it as saved.
    pub fn save_file(&mut self, repository: &mut SegmentsRepository) -> Result<()> {
        let path = self
            .file
            .clone()
            .ok_or(BinaryDataError::IllegalState("document is not bound to a file"))?;
        if !self.editation_mode.is_editable() {
            return Err(BinaryDataError::ReadOnly);
        }

        match &mut self.data {
            ContentData::Paged(data) => {
                write_file_atomically(&path, &*data, self.config.io_buffer_size())?;
            }
            ContentData::Delta(document) => repository.save_document(document)?,
        }

        self.undo.set_sync_point();
        info!(path = %path.display(), size = self.data.len(), "saved document");
        self.mark_changed(SessionChangeKind::Saved, None);
        Ok(())
    }

    /// Write the content to `path` and bind the document to it.
    ///
    /// Only memory content can be saved under a new name; a delta document is
    /// tied to the file source it overlays.
    pub fn save_file_as(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let ContentData::Paged(data) = &self.data else {
            return Err(BinaryDataError::Unsupported(
                "save to another file is not supported in delta mode",
            ));
        };

        write_file_atomically(path, data, self.config.io_buffer_size())?;
        self.file = Some(path.to_path_buf());
        if !self.editation_mode.is_editable() {
            self.editation_mode = EditationMode::Expanding;
        }
        self.undo.set_sync_point();
        info!(path = %path.display(), size = self.data.len(), "saved document as");
        self.mark_changed(SessionChangeKind::Saved, None);
        Ok(())
    }

    /// Release the content and the file binding, leaving an empty document.
    pub fn close_data(&mut self, repository: &mut SegmentsRepository) {
        let data = empty_content(&self.config, self.mode);
        self.replace_data(repository, data);
        if let Some(path) = self.file.take() {
            info!(path = %path.display(), "closed document");
        }
        self.editation_mode = EditationMode::Expanding;
        self.undo.clear();
        self.mark_changed(SessionChangeKind::DocumentClosed, None);
    }

    /// Release all content, equivalent to [`close_data`](Self::close_data).
    pub fn dispose(&mut self, repository: &mut SegmentsRepository) {
        self.close_data(repository);
    }

    /// Move the document to another storage mode.
    ///
    /// A document bound to a file is reopened from that file in the new mode,
    /// which discards its history; this requires the document to be unmodified.
    /// An unbound document has its content copied into the new storage, and the
    /// history is kept or cleared according to
    /// [`SessionConfig::clear_undo_on_mode_switch`].
    pub fn switch_file_handling_mode(
        &mut self,
        repository: &mut SegmentsRepository,
        mode: FileHandlingMode,
    ) -> Result<()> {
        if mode == self.mode {
            return Ok(());
        }
        let previous = self.mode;

        if let Some(path) = self.file.clone() {
            if self.is_modified() {
                return Err(BinaryDataError::IllegalState(
                    "document has unsaved changes",
                ));
            }
            let editation_mode = self.editation_mode;
            self.mode = mode;
            if let Err(err) = self.open_document(repository, &path, editation_mode.is_editable()) {
                self.mode = previous;
                return Err(err);
            }
            self.editation_mode = editation_mode;
        } else {
            let data = match mode {
                FileHandlingMode::Memory => {
                    let mut paged = PagedData::with_page_size(self.config.page_size);
                    paged.load_from_stream(&mut BinaryDataReader::new(&self.data))?;
                    ContentData::Paged(paged)
                }
                FileHandlingMode::Delta => {
                    let mut document = repository.create_document(None)?;
                    document.insert_data(0, &self.data)?;
                    ContentData::Delta(document)
                }
            };
            self.replace_data(repository, data);
            self.mode = mode;
            if self.config.clear_undo_on_mode_switch {
                self.undo.clear();
            }
        }

        info!(from = ?previous, to = ?mode, size = self.data.len(), "switched file handling mode");
        self.mark_changed(SessionChangeKind::ModeSwitched, None);
        Ok(())
    }

    /// Insert `data` at `position` (`0..=len`).
    pub fn insert(&mut self, position: u64, data: &[u8]) -> Result<()> {
        self.ensure_resizable()?;
        check_position(position, self.data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        self.execute(EditCommand::insert(position, data.to_vec()))
    }

    /// Remove up to `length` bytes at `position`; the length is clamped to the end of the data.
    pub fn remove(&mut self, position: u64, length: u64) -> Result<()> {
        self.ensure_resizable()?;
        check_position(position, self.data.len())?;
        if length.min(self.data.len() - position) == 0 {
            return Ok(());
        }
        self.execute(EditCommand::remove(position, length))
    }

    /// Replace bytes at `position` with `data`; the range must lie inside the data.
    pub fn overwrite(&mut self, position: u64, data: &[u8]) -> Result<()> {
        if !self.editation_mode.is_editable() {
            return Err(BinaryDataError::ReadOnly);
        }
        if data.is_empty() {
            return check_position(position, self.data.len());
        }
        self.execute(EditCommand::overwrite(position, data.to_vec()))
    }

    /// Execute an arbitrary command (for example a compound one) as one undo step.
    pub fn execute(&mut self, command: EditCommand) -> Result<()> {
        if !self.editation_mode.is_editable() {
            return Err(BinaryDataError::ReadOnly);
        }
        if command.changes_length() && !self.editation_mode.allows_resize() {
            return Err(BinaryDataError::ReadOnly);
        }
        let range = command.affected_range();
        let kind = command.kind();
        self.undo.add_command(command, &mut self.data)?;
        debug!(?kind, start = range.start, end = range.end, size = self.data.len(), "edit");
        self.mark_changed(SessionChangeKind::ContentModified, Some(range));
        Ok(())
    }

    /// Read `length` bytes at `position`.
    pub fn get(&self, position: u64, length: u64) -> Result<Vec<u8>> {
        self.data.get(position, length)
    }

    /// Content size in bytes.
    pub fn len(&self) -> u64 {
        self.data.len()
    }

    /// Whether the content is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write the whole content to `writer`.
    pub fn save_to_stream(&self, writer: &mut dyn Write) -> Result<()> {
        self.data.save_to_stream(writer)
    }

    /// Replace the content with the bytes of `reader` as a new unbound document.
    pub fn load_from_stream(
        &mut self,
        repository: &mut SegmentsRepository,
        reader: &mut dyn Read,
    ) -> Result<()> {
        self.open_stream(repository, reader, true)
    }

    /// Undo the most recent applied command.
    pub fn perform_undo(&mut self) -> Result<()> {
        self.undo.perform_undo(&mut self.data)?;
        self.mark_changed(SessionChangeKind::UndoRedo, None);
        Ok(())
    }

    /// Redo the next undone command.
    pub fn perform_redo(&mut self) -> Result<()> {
        self.undo.perform_redo(&mut self.data)?;
        self.mark_changed(SessionChangeKind::UndoRedo, None);
        Ok(())
    }

    /// Whether a command can be undone.
    pub fn can_undo(&self) -> bool {
        self.undo.can_undo()
    }

    /// Whether a command can be redone.
    pub fn can_redo(&self) -> bool {
        self.undo.can_redo()
    }

    /// Mark the current history position as the saved state.
    pub fn set_sync_point(&mut self) {
        self.undo.set_sync_point();
        self.mark_changed(SessionChangeKind::HistoryChanged, None);
    }

    /// Discard the whole history; the current content becomes the saved state.
    pub fn clear_undo(&mut self) {
        self.undo.clear();
        self.mark_changed(SessionChangeKind::HistoryChanged, None);
    }

    /// Number of applied commands.
    pub fn command_position(&self) -> usize {
        self.undo.command_position()
    }

    /// Command position of the last save, if still reachable.
    pub fn sync_point(&self) -> Option<usize> {
        self.undo.sync_point()
    }

    /// Whether the content differs from the last saved state.
    pub fn is_modified(&self) -> bool {
        self.undo.is_modified()
    }

    /// Session version number.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Check if the session has changed since `version`.
    pub fn has_changed_since(&self, version: u64) -> bool {
        self.version > version
    }

    /// Subscribe to session change notifications.
    pub fn subscribe<F>(&mut self, callback: F)
    where
        F: FnMut(&SessionChange) + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Snapshot of the document state.
    pub fn get_document_state(&self) -> DocumentState {
        let segment_count = match &self.data {
            ContentData::Paged(_) => 1,
            ContentData::Delta(document) => document.segment_count(),
        };
        DocumentState {
            size: self.data.len(),
            is_modified: self.is_modified(),
            file_handling_mode: self.mode,
            editation_mode: self.editation_mode,
            file: self.file.clone(),
            version: self.version,
            segment_count,
            memory_usage: self.data.memory_usage(),
        }
    }

    /// Snapshot of the undo/redo state.
    pub fn get_undo_redo_state(&self) -> UndoRedoState {
        UndoRedoState {
            can_undo: self.undo.can_undo(),
            can_redo: self.undo.can_redo(),
            undo_depth: self.undo.undo_depth(),
            redo_depth: self.undo.redo_depth(),
            command_position: self.undo.command_position(),
            sync_point: self.undo.sync_point(),
            captured_bytes: self.undo.captured_bytes(),
        }
    }

    fn ensure_resizable(&self) -> Result<()> {
        if self.editation_mode.allows_resize() {
            Ok(())
        } else {
            Err(BinaryDataError::ReadOnly)
        }
    }

    /// Install `data` as the content and release the previous one.
    fn replace_data(&mut self, repository: &mut SegmentsRepository, data: ContentData) {
        let previous = mem::replace(&mut self.data, data);
        self.read_only_source = false;
        release_content(repository, previous);
    }

    /// Source for a delta open of `path` in `mode`.
    ///
    /// When the current document is the only one bound to the same file, its
    /// source is reopened in the requested mode instead of being shared as is.
    fn open_delta_source(
        &self,
        repository: &mut SegmentsRepository,
        path: &Path,
        mode: EditMode,
    ) -> Result<SourceId> {
        if let ContentData::Delta(document) = &self.data
            && let Some(id) = document.source_id()
            && repository.ref_count(id) == 1
            && repository.find_file_source(path)? == Some(id)
        {
            repository.reopen_file_source(id, mode)?;
            return Ok(id);
        }
        repository.open_file_source(path, mode)
    }

    fn mark_changed(&mut self, kind: SessionChangeKind, range: Option<Range<u64>>) {
        let old_version = self.version;
        self.version += 1;
        let mut change = SessionChange::new(kind, old_version, self.version);
        if let Some(range) = range {
            change = change.with_range(range);
        }
        for callback in &mut self.callbacks {
            callback(&change);
        }
    }
}

impl std::fmt::Debug for EditorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorSession")
            .field("mode", &self.mode)
            .field("editation_mode", &self.editation_mode)
            .field("file", &self.file)
            .field("size", &self.data.len())
            .field("version", &self.version)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

fn editation_for(editable: bool) -> EditationMode {
    if editable {
        EditationMode::Expanding
    } else {
        EditationMode::ReadOnly
    }
}

fn empty_content(config: &SessionConfig, mode: FileHandlingMode) -> ContentData {
    match mode {
        FileHandlingMode::Memory => ContentData::Paged(PagedData::with_page_size(config.page_size)),
        FileHandlingMode::Delta => {
            ContentData::Delta(DeltaDocument::new(None, config.max_merged_segment()))
        }
    }
}

/// Dispose `data`, detaching a delta document and closing its source when unused.
fn release_content(repository: &mut SegmentsRepository, data: ContentData) {
    match data {
        ContentData::Paged(mut paged) => paged.dispose(),
        ContentData::Delta(mut document) => {
            let source = document.source_id();
            repository.detach_document(&mut document);
            if let Some(id) = source {
                repository.close_file_source(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::NamedTempFile;

    fn temp_file(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    fn session(mode: FileHandlingMode) -> EditorSession {
        EditorSession::new(SessionConfig {
            file_handling_mode: mode,
            ..SessionConfig::default()
        })
    }

    #[test]
    fn test_new_session_is_empty() {
        let session = session(FileHandlingMode::Memory);
        assert!(session.is_empty());
        assert!(!session.is_modified());
        assert!(!session.can_undo());
        assert_eq!(session.file(), None);
        assert_eq!(session.data().mode(), FileHandlingMode::Memory);
    }

    #[test]
    fn test_edit_undo_redo() {
        let mut repository = SegmentsRepository::new();
        let mut session = session(FileHandlingMode::Memory);
        session.new_document(&mut repository);

        session.insert(0, b"HELLO").unwrap();
        session.overwrite(1, b"I").unwrap();
        session.remove(3, 10).unwrap();
        assert_eq!(session.get(0, 3).unwrap(), b"HIL");

        session.perform_undo().unwrap();
        assert_eq!(session.get(0, 5).unwrap(), b"HILLO");
        session.perform_undo().unwrap();
        assert_eq!(session.get(0, 5).unwrap(), b"HELLO");
        session.perform_redo().unwrap();
        assert_eq!(session.get(0, 5).unwrap(), b"HILLO");
        assert_eq!(session.command_position(), 2);
    }

    #[test]
    fn test_empty_edits_are_not_recorded() {
        let mut session = session(FileHandlingMode::Memory);
        session.insert(0, b"").unwrap();
        session.remove(0, 5).unwrap();
        session.overwrite(0, b"").unwrap();
        assert!(!session.can_undo());
        assert!(session.insert(1, b"").is_err());
    }

    #[test]
    fn test_read_only_rejects_edits() {
        let mut repository = SegmentsRepository::new();
        let mut session = session(FileHandlingMode::Memory);
        session
            .open_stream(&mut repository, &mut &b"abc"[..], false)
            .unwrap();
        assert!(matches!(session.insert(0, b"x"), Err(BinaryDataError::ReadOnly)));
        assert!(matches!(session.overwrite(0, b"x"), Err(BinaryDataError::ReadOnly)));
        assert!(matches!(session.remove(0, 1), Err(BinaryDataError::ReadOnly)));
        assert_eq!(session.get(0, 3).unwrap(), b"abc");
    }

    #[test]
    fn test_inplace_allows_only_overwrite() {
        let mut session = session(FileHandlingMode::Memory);
        session.insert(0, b"abcd").unwrap();
        session.set_editation_mode(EditationMode::Inplace).unwrap();
        session.overwrite(0, b"xy").unwrap();
        assert!(matches!(session.insert(0, b"x"), Err(BinaryDataError::ReadOnly)));
        assert!(matches!(
            session.execute(EditCommand::compound(vec![
                EditCommand::overwrite(0, b"z".to_vec()),
                EditCommand::remove(1, 1),
            ])),
            Err(BinaryDataError::ReadOnly)
        ));
        assert_eq!(session.get(0, 4).unwrap(), b"xycd");
    }

    #[test]
    fn test_open_memory_and_save() {
        let file = temp_file(b"HELLO");
        let mut repository = SegmentsRepository::new();
        let mut session = session(FileHandlingMode::Memory);
        session.open_document(&mut repository, file.path(), true).unwrap();
        assert_eq!(session.len(), 5);
        assert_eq!(repository.open_source_count(), 0);

        session.overwrite(1, b"I").unwrap();
        assert!(session.is_modified());
        session.save_file(&mut repository).unwrap();
        assert!(!session.is_modified());
        assert_eq!(std::fs::read(file.path()).unwrap(), b"HILLO");
    }

    #[test]
    fn test_open_delta_and_close_releases_source() {
        let file = temp_file(b"0123456789");
        let mut repository = SegmentsRepository::new();
        let mut session = session(FileHandlingMode::Delta);
        session.open_document(&mut repository, file.path(), true).unwrap();
        assert_eq!(repository.open_source_count(), 1);
        assert_eq!(session.get(2, 3).unwrap(), b"234");

        session.insert(5, b"--").unwrap();
        session.save_file(&mut repository).unwrap();
        assert_eq!(std::fs::read(file.path()).unwrap(), b"01234--56789");

        session.close_data(&mut repository);
        assert_eq!(repository.open_source_count(), 0);
        assert!(session.is_empty());
        assert_eq!(session.file(), None);
    }

    #[test]
    fn test_failed_open_keeps_document() {
        let mut repository = SegmentsRepository::new();
        let mut session = session(FileHandlingMode::Memory);
        session.insert(0, b"keep").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.bin");
        assert!(matches!(
            session.open_document(&mut repository, &missing, true),
            Err(BinaryDataError::Io(_))
        ));
        assert_eq!(session.get(0, 4).unwrap(), b"keep");
        assert!(session.can_undo());
    }

    #[test]
    fn test_save_without_file() {
        let mut repository = SegmentsRepository::new();
        let mut session = session(FileHandlingMode::Memory);
        assert!(matches!(
            session.save_file(&mut repository),
            Err(BinaryDataError::IllegalState(_))
        ));
    }

    #[test]
    fn test_save_as_delta_is_unsupported() {
        let file = temp_file(b"abc");
        let mut repository = SegmentsRepository::new();
        let mut session = session(FileHandlingMode::Delta);
        session.open_document(&mut repository, file.path(), true).unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            session.save_file_as(dir.path().join("copy.bin")),
            Err(BinaryDataError::Unsupported(_))
        ));
        session.close_data(&mut repository);
    }

    #[test]
    fn test_save_as_binds_file() {
        let mut session = session(FileHandlingMode::Memory);
        session.insert(0, b"payload").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.bin");
        session.save_file_as(&target).unwrap();
        assert_eq!(session.file(), Some(target.as_path()));
        assert!(!session.is_modified());
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
    }

    #[test]
    fn test_switch_unbound_keeps_content() {
        let mut repository = SegmentsRepository::new();
        let mut session = session(FileHandlingMode::Memory);
        session.insert(0, b"content").unwrap();
        session
            .switch_file_handling_mode(&mut repository, FileHandlingMode::Delta)
            .unwrap();
        assert_eq!(session.file_handling_mode(), FileHandlingMode::Delta);
        assert_eq!(session.data().mode(), FileHandlingMode::Delta);
        assert_eq!(session.get(0, 7).unwrap(), b"content");
        assert!(!session.can_undo());
    }

    #[test]
    fn test_switch_keeps_history_when_configured() {
        let mut repository = SegmentsRepository::new();
        let mut session = EditorSession::new(SessionConfig {
            clear_undo_on_mode_switch: false,
            ..SessionConfig::default()
        });
        session.insert(0, b"abc").unwrap();
        session.insert(3, b"def").unwrap();
        session
            .switch_file_handling_mode(&mut repository, FileHandlingMode::Delta)
            .unwrap();
        session.perform_undo().unwrap();
        assert_eq!(session.get(0, 3).unwrap(), b"abc");
        assert_eq!(session.len(), 3);
    }

    #[test]
    fn test_switch_bound_file() {
        let file = temp_file(b"bound data");
        let mut repository = SegmentsRepository::new();
        let mut session = session(FileHandlingMode::Memory);
        session.open_document(&mut repository, file.path(), true).unwrap();

        session
            .switch_file_handling_mode(&mut repository, FileHandlingMode::Delta)
            .unwrap();
        assert_eq!(repository.open_source_count(), 1);
        assert_eq!(session.get(0, 10).unwrap(), b"bound data");

        session.insert(0, b"!").unwrap();
        assert!(matches!(
            session.switch_file_handling_mode(&mut repository, FileHandlingMode::Memory),
            Err(BinaryDataError::IllegalState(_))
        ));
        assert_eq!(session.file_handling_mode(), FileHandlingMode::Delta);

        session.perform_undo().unwrap();
        session
            .switch_file_handling_mode(&mut repository, FileHandlingMode::Memory)
            .unwrap();
        assert_eq!(repository.open_source_count(), 0);
        assert_eq!(session.get(0, 10).unwrap(), b"bound data");
    }

    #[test]
    fn test_switch_to_same_mode_is_noop() {
        let mut repository = SegmentsRepository::new();
        let mut session = session(FileHandlingMode::Memory);
        session.insert(0, b"x").unwrap();
        let version = session.version();
        session
            .switch_file_handling_mode(&mut repository, FileHandlingMode::Memory)
            .unwrap();
        assert_eq!(session.version(), version);
        assert!(session.can_undo());
    }

    #[test]
    fn test_notifications() {
        let changes = Rc::new(RefCell::new(Vec::new()));
        let mut session = session(FileHandlingMode::Memory);
        let sink = Rc::clone(&changes);
        session.subscribe(move |change| sink.borrow_mut().push(change.clone()));

        session.insert(0, b"abc").unwrap();
        session.perform_undo().unwrap();

        let changes = changes.borrow();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].kind, SessionChangeKind::ContentModified);
        assert_eq!(changes[0].affected_range, Some(0..3));
        assert_eq!(changes[1].kind, SessionChangeKind::UndoRedo);
        assert_eq!(changes[1].old_version, 1);
        assert_eq!(changes[1].new_version, 2);
        assert!(session.has_changed_since(1));
        assert!(!session.has_changed_since(2));
    }

    #[test]
    fn test_state_snapshots() {
        let mut session = session(FileHandlingMode::Delta);
        session.insert(0, b"abcdef").unwrap();
        session.remove(2, 2).unwrap();

        let document = session.get_document_state();
        assert_eq!(document.size, 4);
        assert!(document.is_modified);
        assert_eq!(document.file_handling_mode, FileHandlingMode::Delta);
        assert_eq!(document.memory_usage, 4);

        let history = session.get_undo_redo_state();
        assert_eq!(history.undo_depth, 2);
        assert_eq!(history.redo_depth, 0);
        assert_eq!(history.sync_point, Some(0));
        assert_eq!(history.captured_bytes, 8);
    }
}
