//! Staging queues for identifiers that have been pulled but not yet submitted.
//!
//! Two backends share the [`IdentifierQueue`] contract:
//!
//! - [`RingQueue`]: fixed-capacity ring buffer held entirely in memory.
//! - [`SpilloverQueue`]: a ring buffer head that overflows into an
//!   append-only JSON-lines file once its memory budget is used up.
//!
//! Both preserve strict FIFO order.

pub mod ring;
pub mod spill;

use thiserror::Error;

pub use ring::{RingCursor, RingQueue};
pub use spill::{LineCodec, SpilloverQueue};

/// Errors raised by staging queues.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Empty entries are never accepted.
    #[error("empty entries cannot be queued")]
    EmptyEntry,
    /// The queue could not be constructed with the given parameters.
    #[error("invalid queue configuration: {0}")]
    Configuration(String),
    /// The operation is not available for this backend.
    #[error("unsupported queue operation: {0}")]
    Unsupported(&'static str),
    /// `remove` was called on a cursor with nothing to remove.
    #[error("cursor has no current element to remove")]
    IllegalCursorState,
    /// Backing file I/O failed.
    #[error("backing store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A spilled entry could not be encoded or decoded.
    #[error("backing store codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Something that can be staged in a queue.
///
/// The blank check backs the rule that empty entries are rejected on every tier.
pub trait QueueEntry: Send + 'static {
    /// Whether this value is the empty sentinel.
    fn is_blank(&self) -> bool;
}

impl QueueEntry for String {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

/// FIFO queue used by the job controller to stage identifiers.
pub trait IdentifierQueue<T>: Send {
    /// Append an entry. Returns `Ok(false)` when a bounded queue is full.
    ///
    /// # Errors
    ///
    /// `QueueError::EmptyEntry` for blank entries, or a backing store failure.
    fn offer(&mut self, entry: T) -> Result<bool, QueueError>;

    /// Remove and return the oldest entry.
    ///
    /// # Errors
    ///
    /// Backing store failures while refilling memory from disk.
    fn poll(&mut self) -> Result<Option<T>, QueueError>;

    /// Number of staged entries across every tier.
    fn len(&self) -> usize;

    /// Whether no entries are staged.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `offer` would currently refuse an entry.
    fn is_full(&self) -> bool;

    /// Release any backing resources. Returns whether something was open.
    ///
    /// # Errors
    ///
    /// Failure to remove a backing file.
    fn close(&mut self) -> Result<bool, QueueError> {
        Ok(false)
    }
}
