//! Error types shared by every storage and history component.

use thiserror::Error;

/// Errors produced by binary data storage, file sources and the edit history.
#[derive(Debug, Error)]
pub enum BinaryDataError {
    #[error("I/O error: {0}")]
    /// Opening, reading, writing or replacing a file failed.
    Io(#[from] std::io::Error),

    #[error("range {position}+{length} is outside of data of {size} bytes")]
    /// A position or range lies outside `[0, size]`.
    OutOfRange {
        /// Requested start position.
        position: u64,
        /// Requested length (0 for pure position checks).
        length: u64,
        /// Size of the data at the time of the call.
        size: u64,
    },

    #[error("illegal state: {0}")]
    /// The operation is not valid in the current state (nothing to undo, no bound file, ...).
    IllegalState(&'static str),

    #[error("unsupported operation: {0}")]
    /// The operation is not supported for the active storage mode.
    Unsupported(&'static str),

    #[error("data is read-only")]
    /// A mutation was attempted on read-only data or a read-only file source.
    ReadOnly,
}

impl BinaryDataError {
    pub(crate) fn out_of_range(position: u64, length: u64, size: u64) -> Self {
        BinaryDataError::OutOfRange {
            position,
            length,
            size,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BinaryDataError>;

/// Validate that `position..position + length` lies inside `0..size`.
pub(crate) fn check_range(position: u64, length: u64, size: u64) -> Result<()> {
    match position.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(BinaryDataError::out_of_range(position, length, size)),
    }
}

/// Validate that `position` is a valid insertion point (`0..=size`).
pub(crate) fn check_position(position: u64, size: u64) -> Result<()> {
    if position > size {
        return Err(BinaryDataError::out_of_range(position, 0, size));
    }
    Ok(())
}
