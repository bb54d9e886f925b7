//! Session configuration.
//!
//! All fields have defaults, so a configuration file only needs to name the
//! settings it changes:
//!
//! ```rust
//! use bined_core::{FileHandlingMode, SessionConfig};
//!
//! let config = SessionConfig::from_json_str(r#"{ "file_handling_mode": "delta" }"#).unwrap();
//! assert_eq!(config.file_handling_mode, FileHandlingMode::Delta);
//! assert!(config.clear_undo_on_mode_switch);
//! ```

use crate::data::{DEFAULT_IO_BUFFER_SIZE, FileHandlingMode};
use crate::delta::DEFAULT_MAX_MERGED_SEGMENT;
use crate::paged::DEFAULT_PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// How a delta document is written back to its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStrategy {
    /// Patch the file in place for pure overwrites and trailing appends,
    /// otherwise write a temporary file and rename it over the original.
    #[default]
    Auto,
    /// Always write a temporary file and rename it over the original.
    AlwaysReplace,
}

/// Errors produced while loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    /// Reading the configuration file failed.
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    /// The configuration is not valid JSON for [`SessionConfig`].
    Json(#[from] serde_json::Error),
}

/// Settings of an editing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Storage used for newly opened documents.
    pub file_handling_mode: FileHandlingMode,
    /// Page size of [`PagedData`](crate::PagedData); 0 selects the default.
    pub page_size: usize,
    /// Maximum number of undoable commands; `None` keeps the whole history.
    pub max_undo_depth: Option<usize>,
    /// Whether switching the file handling mode of an unbound document discards the undo history.
    pub clear_undo_on_mode_switch: bool,
    /// How delta documents are saved.
    pub save_strategy: SaveStrategy,
    /// Upper bound for coalescing adjacent memory segments of a delta document.
    pub max_merged_segment: usize,
    /// Chunk size for streaming copies.
    pub io_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            file_handling_mode: FileHandlingMode::Memory,
            page_size: DEFAULT_PAGE_SIZE,
            max_undo_depth: None,
            clear_undo_on_mode_switch: true,
            save_strategy: SaveStrategy::Auto,
            max_merged_segment: DEFAULT_MAX_MERGED_SEGMENT,
            io_buffer_size: DEFAULT_IO_BUFFER_SIZE,
        }
    }
}

impl SessionConfig {
    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub(crate) fn io_buffer_size(&self) -> usize {
        if self.io_buffer_size == 0 {
            DEFAULT_IO_BUFFER_SIZE
        } else {
            self.io_buffer_size
        }
    }

    pub(crate) fn max_merged_segment(&self) -> usize {
        if self.max_merged_segment == 0 {
            DEFAULT_MAX_MERGED_SEGMENT
        } else {
            self.max_merged_segment
        }
    }
}
