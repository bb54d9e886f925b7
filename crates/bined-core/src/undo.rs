//! Undo/redo history
//!
//! Every mutation is an [`EditCommand`] that captures just enough of the
//! original bytes to invert itself: an insert remembers nothing beyond its own
//! data, a remove keeps the removed bytes, an overwrite keeps the bytes it
//! replaced. Memory used by the history is therefore proportional to the bytes
//! edited, never to the document size.
//!
//! [`CommandStack`] keeps a linear history with a cursor and a sync point (the
//! cursor position of the last save).
//!
//! # Example
//!
//! ```rust
//! use bined_core::{CommandStack, EditCommand, PagedData};
//!
//! let mut data = PagedData::from_bytes(b"HELLO");
//! let mut stack = CommandStack::new();
//! stack.set_sync_point();
//!
//! stack.add_command(EditCommand::overwrite(1, b"I".to_vec()), &mut data).unwrap();
//! assert_eq!(data.to_vec(), b"HILLO");
//! assert!(stack.is_modified());
//!
//! stack.perform_undo(&mut data).unwrap();
//! assert_eq!(data.to_vec(), b"HELLO");
//! assert!(!stack.is_modified());
//! ```

use crate::data::EditableBinaryData;
use crate::error::{BinaryDataError, Result, check_position};
use std::ops::Range;
use tracing::debug;

/// Kind of an [`EditCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Bytes were inserted.
    Insert,
    /// Bytes were removed.
    Remove,
    /// Bytes were replaced in place.
    Overwrite,
    /// Several commands applied as one step.
    Compound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Insert {
        position: u64,
        data: Vec<u8>,
    },
    Remove {
        position: u64,
        length: u64,
        /// Bytes removed by the last execution
        removed: Vec<u8>,
    },
    Overwrite {
        position: u64,
        data: Vec<u8>,
        /// Bytes replaced by the last execution
        replaced: Vec<u8>,
    },
    Compound(Vec<EditCommand>),
}

/// A reversible edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditCommand {
    operation: Operation,
}

impl EditCommand {
    /// Insert `data` before `position`.
    pub fn insert(position: u64, data: Vec<u8>) -> Self {
        Self {
            operation: Operation::Insert { position, data },
        }
    }

    /// Remove up to `length` bytes at `position`.
    pub fn remove(position: u64, length: u64) -> Self {
        Self {
            operation: Operation::Remove {
                position,
                length,
                removed: Vec::new(),
            },
        }
    }

    /// Replace the bytes at `position` with `data`.
    pub fn overwrite(position: u64, data: Vec<u8>) -> Self {
        Self {
            operation: Operation::Overwrite {
                position,
                data,
                replaced: Vec::new(),
            },
        }
    }

    /// Apply `commands` in order as a single undo step.
    pub fn compound(commands: Vec<EditCommand>) -> Self {
        Self {
            operation: Operation::Compound(commands),
        }
    }

    /// Kind of the command.
    pub fn kind(&self) -> CommandKind {
        match self.operation {
            Operation::Insert { .. } => CommandKind::Insert,
            Operation::Remove { .. } => CommandKind::Remove,
            Operation::Overwrite { .. } => CommandKind::Overwrite,
            Operation::Compound(_) => CommandKind::Compound,
        }
    }

    /// Whether executing the command can change the data length.
    pub fn changes_length(&self) -> bool {
        match &self.operation {
            Operation::Insert { .. } | Operation::Remove { .. } => true,
            Operation::Overwrite { .. } => false,
            Operation::Compound(commands) => commands.iter().any(EditCommand::changes_length),
        }
    }

    /// Byte range touched by the command, in positions after its execution.
    ///
    /// For a remove this is the empty range at the removal point; for a compound
    /// command it spans the ranges of all parts.
    pub fn affected_range(&self) -> Range<u64> {
        match &self.operation {
            Operation::Insert { position, data } | Operation::Overwrite { position, data, .. } => {
                *position..*position + data.len() as u64
            }
            Operation::Remove { position, .. } => *position..*position,
            Operation::Compound(commands) => commands
                .iter()
                .map(EditCommand::affected_range)
                .reduce(|a, b| a.start.min(b.start)..a.end.max(b.end))
                .unwrap_or(0..0),
        }
    }

    /// Bytes held by the command (its own data plus captured inverse data).
    pub fn captured_bytes(&self) -> usize {
        match &self.operation {
            Operation::Insert { data, .. } => data.len(),
            Operation::Remove { removed, .. } => removed.len(),
            Operation::Overwrite { data, replaced, .. } => data.len() + replaced.len(),
            Operation::Compound(commands) => commands.iter().map(EditCommand::captured_bytes).sum(),
        }
    }

    /// Apply the command to `target`, capturing the data needed to undo it.
    pub fn execute(&mut self, target: &mut dyn EditableBinaryData) -> Result<()> {
        match &mut self.operation {
            Operation::Insert { position, data } => target.insert(*position, data),
            Operation::Remove {
                position,
                length,
                removed,
            } => {
                check_position(*position, target.len())?;
                let actual = (*length).min(target.len() - *position);
                *removed = target.get(*position, actual)?;
                target.remove(*position, actual)?;
                Ok(())
            }
            Operation::Overwrite {
                position,
                data,
                replaced,
            } => {
                *replaced = target.get(*position, data.len() as u64)?;
                target.overwrite(*position, data)
            }
            Operation::Compound(commands) => {
                for idx in 0..commands.len() {
                    if let Err(err) = commands[idx].execute(target) {
                        // Leave the target as it was before the compound command.
                        for done in commands[..idx].iter().rev() {
                            done.undo(target)?;
                        }
                        return Err(err);
                    }
                }
                Ok(())
            }
        }
    }

    /// Revert a previous [`execute`](Self::execute) on `target`.
    pub fn undo(&self, target: &mut dyn EditableBinaryData) -> Result<()> {
        match &self.operation {
            Operation::Insert { position, data } => {
                target.remove(*position, data.len() as u64)?;
                Ok(())
            }
            Operation::Remove {
                position, removed, ..
            } => target.insert(*position, removed),
            Operation::Overwrite {
                position, replaced, ..
            } => target.overwrite(*position, replaced),
            Operation::Compound(commands) => {
                for command in commands.iter().rev() {
                    command.undo(target)?;
                }
                Ok(())
            }
        }
    }
}

/// Linear undo/redo history with a sync point.
#[derive(Debug, Clone)]
pub struct CommandStack {
    commands: Vec<EditCommand>,
    /// Number of commands currently applied
    cursor: usize,
    /// Cursor position of the last save. `None` once that state became unreachable.
    sync_point: Option<usize>,
    /// Maximum number of commands kept; `None` for unlimited.
    max_depth: Option<usize>,
}

impl CommandStack {
    /// Create an empty, unmodified history without a depth limit.
    pub fn new() -> Self {
        Self::with_max_depth(None)
    }

    /// Create an empty history keeping at most `max_depth` commands.
    pub fn with_max_depth(max_depth: Option<usize>) -> Self {
        Self {
            commands: Vec::new(),
            cursor: 0,
            sync_point: Some(0),
            max_depth,
        }
    }

    /// Execute `command` against `target` and record it.
    ///
    /// Any redo tail is discarded. If the command fails, nothing is recorded.
    pub fn add_command(
        &mut self,
        mut command: EditCommand,
        target: &mut dyn EditableBinaryData,
    ) -> Result<()> {
        command.execute(target)?;
        self.push_executed(command);
        Ok(())
    }

    fn push_executed(&mut self, command: EditCommand) {
        if self.sync_point.is_some_and(|sync| sync > self.cursor) {
            // The saved state lived in the discarded redo tail.
            self.sync_point = None;
        }
        self.commands.truncate(self.cursor);
        self.commands.push(command);
        self.cursor += 1;

        if let Some(max_depth) = self.max_depth
            && self.commands.len() > max_depth
        {
            let excess = self.commands.len() - max_depth;
            self.commands.drain(..excess);
            self.cursor -= excess;
            self.sync_point = self.sync_point.and_then(|sync| sync.checked_sub(excess));
        }
    }

    /// Revert the command before the cursor.
    pub fn perform_undo(&mut self, target: &mut dyn EditableBinaryData) -> Result<()> {
        if !self.can_undo() {
            return Err(BinaryDataError::IllegalState("nothing to undo"));
        }
        self.commands[self.cursor - 1].undo(target)?;
        self.cursor -= 1;
        debug!(cursor = self.cursor, "undo");
        Ok(())
    }

    /// Re-apply the command at the cursor.
    pub fn perform_redo(&mut self, target: &mut dyn EditableBinaryData) -> Result<()> {
        if !self.can_redo() {
            return Err(BinaryDataError::IllegalState("nothing to redo"));
        }
        self.commands[self.cursor].execute(target)?;
        self.cursor += 1;
        debug!(cursor = self.cursor, "redo");
        Ok(())
    }

    /// Whether [`perform_undo`](Self::perform_undo) would succeed.
    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    /// Whether [`perform_redo`](Self::perform_redo) would succeed.
    pub fn can_redo(&self) -> bool {
        self.cursor < self.commands.len()
    }

    /// Mark the current position as saved.
    pub fn set_sync_point(&mut self) {
        self.sync_point = Some(self.cursor);
    }

    /// Whether the data differs from the last saved state.
    pub fn is_modified(&self) -> bool {
        self.sync_point != Some(self.cursor)
    }

    /// Drop the whole history; the current state becomes the saved one.
    pub fn clear(&mut self) {
        self.commands.clear();
        self.cursor = 0;
        self.sync_point = Some(0);
    }

    /// Current cursor position (number of applied commands).
    pub fn command_position(&self) -> usize {
        self.cursor
    }

    /// Cursor position of the last save, if still reachable.
    pub fn sync_point(&self) -> Option<usize> {
        self.sync_point
    }

    /// Number of recorded commands, applied or not.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if no command is recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of commands that can be undone.
    pub fn undo_depth(&self) -> usize {
        self.cursor
    }

    /// Number of commands that can be redone.
    pub fn redo_depth(&self) -> usize {
        self.commands.len() - self.cursor
    }

    /// Recorded commands, oldest first.
    pub fn commands(&self) -> &[EditCommand] {
        &self.commands
    }

    /// Bytes held by the whole history.
    pub fn captured_bytes(&self) -> usize {
        self.commands.iter().map(EditCommand::captured_bytes).sum()
    }

    /// Maximum number of commands kept.
    pub fn max_depth(&self) -> Option<usize> {
        self.max_depth
    }
}

impl Default for CommandStack {
    fn default() -> Self {
        Self::new()
    }
}
