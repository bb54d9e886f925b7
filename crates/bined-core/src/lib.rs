#![warn(missing_docs)]
//! BinEd Core - Headless Binary Editor Kernel
//!
//! # Overview
//!
//! `bined-core` holds the content of a binary document while it is being
//! edited, records every edit for undo/redo, and writes the result back to its
//! file. It has no user interface; a host drives it through [`EditorSession`].
//!
//! # Core Features
//!
//! - **Two Storage Modes**: fully loaded paged memory, or a delta overlay that
//!   only keeps the edited bytes in memory and reads the rest from the file
//! - **Large Files**: delta documents address content with 64-bit positions and
//!   open arbitrarily large files in constant memory
//! - **Undo/Redo**: linear command history with a sync point marking the saved state
//! - **Safe Saving**: in-place patches for pure overwrites, atomic
//!   write-then-rename for everything else
//! - **State Tracking**: version number mechanism and change notifications
//!
//! # Architecture Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  EditorSession (open/save/switch/edit)      │  ← Public API
//! ├─────────────────────────────────────────────┤
//! │  CommandStack (undo/redo, sync point)       │  ← Edit History
//! ├──────────────────────┬──────────────────────┤
//! │  PagedData           │  DeltaDocument       │  ← Content Storage
//! │  (memory mode)       │  (delta mode)        │
//! ├──────────────────────┴──────────────────────┤
//! │  SegmentsRepository / FileDataSource        │  ← File Access
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bined_core::{EditorSession, FileHandlingMode, SegmentsRepository, SessionConfig};
//!
//! let mut repository = SegmentsRepository::new();
//! let mut session = EditorSession::new(SessionConfig {
//!     file_handling_mode: FileHandlingMode::Delta,
//!     ..SessionConfig::default()
//! });
//!
//! session.open_document(&mut repository, "firmware.bin", true).unwrap();
//! session.overwrite(0x10, &[0xde, 0xad, 0xbe, 0xef]).unwrap();
//! session.save_file(&mut repository).unwrap();
//! session.close_data(&mut repository);
//! ```
//!
//! # Module Description
//!
//! - [`data`] - Binary data traits shared by both storage modes
//! - [`paged`] - Paged in-memory storage
//! - [`file_source`] - Random-access file handle
//! - [`delta`] - Segment overlay document
//! - [`repository`] - File source registry and delta saving
//! - [`undo`] - Edit commands and the undo/redo stack
//! - [`session`] - Session host surface
//! - [`config`] - Session configuration
//! - [`error`] - Error types

pub mod config;
pub mod data;
pub mod delta;
pub mod error;
pub mod file_source;
pub mod paged;
pub mod repository;
pub mod session;
pub mod undo;

pub use config::{ConfigError, SaveStrategy, SessionConfig};
pub use data::{
    BinaryData, BinaryDataReader, DEFAULT_IO_BUFFER_SIZE, EditableBinaryData, EditationMode,
    FileHandlingMode,
};
pub use delta::{DEFAULT_MAX_MERGED_SEGMENT, DeltaDocument, Segment};
pub use error::{BinaryDataError, Result};
pub use file_source::{EditMode, FileDataSource};
pub use paged::{DEFAULT_PAGE_SIZE, PagedData};
pub use repository::{SegmentsRepository, SourceId};
pub use session::{
    ContentData, DocumentState, EditorSession, SessionChange, SessionChangeCallback,
    SessionChangeKind, UndoRedoState,
};
pub use undo::{CommandKind, CommandStack, EditCommand};
