//! Memory-first queue that spills to a temporary JSON-lines file.
//!
//! Adapted from the JSONL file queue: entries beyond the in-memory budget are
//! appended one per line to a private temp file and read back in order as the
//! memory head drains. The file is removed as soon as its last entry has been
//! read, on [`SpilloverQueue::close`], or on drop.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{IdentifierQueue, QueueEntry, QueueError, RingQueue};

const BACKING_FILE_PREFIX: &str = "spillover-backingstore-";

/// Encoding used for spilled entries, fixed when the queue is created.
///
/// Entries are written as one UTF-8 JSON document per line.
#[derive(Debug)]
pub struct LineCodec<T> {
    _entry: PhantomData<fn() -> T>,
}

impl<T> Default for LineCodec<T> {
    fn default() -> Self {
        Self { _entry: PhantomData }
    }
}

impl<T: Serialize + DeserializeOwned> LineCodec<T> {
    /// Encode an entry as a single line, without the trailing newline.
    ///
    /// # Errors
    ///
    /// Serialization failure.
    pub fn encode(&self, entry: &T) -> Result<String, QueueError> {
        Ok(serde_json::to_string(entry)?)
    }

    /// Decode one line.
    ///
    /// # Errors
    ///
    /// The line is not a valid encoding of `T`.
    pub fn decode(&self, line: &str) -> Result<T, QueueError> {
        Ok(serde_json::from_str(line)?)
    }
}

struct BackingStore {
    file: NamedTempFile,
    writer: BufWriter<File>,
    reader: BufReader<File>,
    pending: usize,
    unflushed: bool,
}

impl BackingStore {
    fn create(directory: &Path) -> Result<Self, QueueError> {
        let file = tempfile::Builder::new()
            .prefix(BACKING_FILE_PREFIX)
            .suffix(".jsonl")
            .tempfile_in(directory)?;
        let writer = BufWriter::new(file.reopen()?);
        let reader = BufReader::new(file.reopen()?);
        debug!(path = %file.path().display(), "Created spillover backing file");
        Ok(Self {
            file,
            writer,
            reader,
            pending: 0,
            unflushed: false,
        })
    }

    fn append(&mut self, line: &str) -> Result<(), QueueError> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.pending += 1;
        self.unflushed = true;
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>, QueueError> {
        if self.unflushed {
            self.writer.flush()?;
            self.unflushed = false;
        }
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if !trimmed.trim().is_empty() {
                self.pending -= 1;
                return Ok(Some(trimmed.to_owned()));
            }
        }
    }

    fn discard(self) -> Result<(), QueueError> {
        let Self { file, writer, reader, .. } = self;
        drop(writer);
        drop(reader);
        file.close()?;
        Ok(())
    }
}

/// FIFO queue bounded in memory by `max_in_memory`, overflowing to disk.
///
/// `len()` always counts memory and disk entries together. Forward iteration
/// is not offered because it would have to drain the backing file.
pub struct SpilloverQueue<T> {
    memory: RingQueue<T>,
    refill_below: usize,
    directory: PathBuf,
    codec: LineCodec<T>,
    store: Option<BackingStore>,
}

impl<T> std::fmt::Debug for SpilloverQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpilloverQueue")
            .field("in_memory", &self.memory.len())
            .field("on_disk", &self.spilled_len())
            .field("directory", &self.directory)
            .finish_non_exhaustive()
    }
}

impl<T> SpilloverQueue<T>
where
    T: QueueEntry + Serialize + DeserializeOwned,
{
    /// Create a queue keeping at most `max_in_memory` entries in memory and
    /// spilling the rest into a temp file under `directory`.
    ///
    /// # Errors
    ///
    /// `QueueError::Configuration` if `max_in_memory` is zero or `directory`
    /// is missing, not a directory, or read-only.
    pub fn new(max_in_memory: usize, directory: impl AsRef<Path>) -> Result<Self, QueueError> {
        if max_in_memory == 0 {
            return Err(QueueError::Configuration(
                "max in-memory entries must be greater than 0".into(),
            ));
        }
        let directory = directory.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&directory).map_err(|e| {
            QueueError::Configuration(format!(
                "spill directory {} is not accessible: {e}",
                directory.display()
            ))
        })?;
        if !metadata.is_dir() {
            return Err(QueueError::Configuration(format!(
                "spill location {} is not a directory",
                directory.display()
            )));
        }
        if metadata.permissions().readonly() {
            return Err(QueueError::Configuration(format!(
                "spill directory {} is not writable",
                directory.display()
            )));
        }

        Ok(Self {
            memory: RingQueue::new(max_in_memory),
            refill_below: max_in_memory * 3 / 4,
            directory,
            codec: LineCodec::default(),
            store: None,
        })
    }

    /// Append an entry, spilling to disk once memory is full.
    ///
    /// # Errors
    ///
    /// `QueueError::EmptyEntry` for blank entries, or a backing file failure.
    pub fn offer(&mut self, entry: T) -> Result<(), QueueError> {
        if entry.is_blank() {
            return Err(QueueError::EmptyEntry);
        }
        // Anything already on disk is older than `entry`, so memory only takes
        // new entries while the file is empty.
        if self.spilled_len() == 0 && !self.memory.is_full() {
            self.memory.offer(entry)?;
            return Ok(());
        }
        let line = self.codec.encode(&entry)?;
        if self.store.is_none() {
            self.store = Some(BackingStore::create(&self.directory)?);
        }
        if let Some(store) = self.store.as_mut() {
            store.append(&line)?;
        }
        Ok(())
    }

    /// Remove and return the oldest entry.
    ///
    /// # Errors
    ///
    /// Backing file read or decode failure.
    pub fn poll(&mut self) -> Result<Option<T>, QueueError> {
        // Top up before taking the head so a failed read leaves it queued.
        if self.memory.is_empty() || self.memory.len() < self.refill_below {
            self.refill()?;
        }
        Ok(self.memory.poll())
    }

    /// Borrow the oldest entry.
    ///
    /// # Errors
    ///
    /// Backing file read or decode failure.
    pub fn peek(&mut self) -> Result<Option<&T>, QueueError> {
        if self.memory.is_empty() {
            self.refill()?;
        }
        Ok(self.memory.peek())
    }

    /// Iteration is not available once entries may live on disk.
    ///
    /// # Errors
    ///
    /// Always `QueueError::Unsupported`.
    pub fn cursor(&mut self) -> Result<super::RingCursor<'_, T>, QueueError> {
        Err(QueueError::Unsupported("iteration over a disk-backed queue"))
    }

    /// Close and delete the backing file, discarding any entries still on disk.
    ///
    /// Returns whether a file was open.
    ///
    /// # Errors
    ///
    /// The temp file could not be removed.
    pub fn close(&mut self) -> Result<bool, QueueError> {
        match self.store.take() {
            Some(store) => {
                let dropped = store.pending;
                store.discard()?;
                debug!(dropped, "Closed spillover backing file");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn refill(&mut self) -> Result<(), QueueError> {
        while !self.memory.is_full() {
            let Some(store) = self.store.as_mut() else {
                return Ok(());
            };
            let Some(line) = store.read_line()? else {
                // Counted entries but nothing left to read: the file is done.
                self.close()?;
                return Ok(());
            };
            let entry = self.codec.decode(&line)?;
            self.memory.offer(entry)?;
            if self.store.as_ref().is_some_and(|store| store.pending == 0) {
                self.close()?;
            }
        }
        Ok(())
    }
}

impl<T> SpilloverQueue<T> {
    /// Entries across memory and disk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.memory.len() + self.spilled_len()
    }

    /// Whether the queue holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries currently on disk.
    #[must_use]
    pub fn spilled_len(&self) -> usize {
        self.store.as_ref().map_or(0, |store| store.pending)
    }

    /// Path of the open backing file, if any.
    #[must_use]
    pub fn backing_path(&self) -> Option<&Path> {
        self.store.as_ref().map(|store| store.file.path())
    }
}

impl<T> IdentifierQueue<T> for SpilloverQueue<T>
where
    T: QueueEntry + Serialize + DeserializeOwned,
{
    fn offer(&mut self, entry: T) -> Result<bool, QueueError> {
        Self::offer(self, entry).map(|()| true)
    }

    fn poll(&mut self) -> Result<Option<T>, QueueError> {
        Self::poll(self)
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn is_full(&self) -> bool {
        false
    }

    fn close(&mut self) -> Result<bool, QueueError> {
        Self::close(self)
    }
}

impl<T> Drop for SpilloverQueue<T> {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            warn!(
                path = %store.file.path().display(),
                pending = store.pending,
                "Spillover queue dropped with its backing file still open; closing it"
            );
            if let Err(e) = store.discard() {
                warn!(error = %e, "Failed to remove spillover backing file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_refill_keeps_the_head_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = SpilloverQueue::new(4, dir.path()).unwrap();
        for i in 1..=5 {
            queue.offer(i.to_string()).unwrap();
        }
        queue.store.as_mut().unwrap().append("{broken").unwrap();

        assert_eq!(queue.poll().unwrap().as_deref(), Some("1"));
        assert_eq!(queue.poll().unwrap().as_deref(), Some("2"));
        assert!(matches!(queue.poll(), Err(QueueError::Codec(_))));

        assert_eq!(queue.poll().unwrap().as_deref(), Some("3"));
        assert_eq!(queue.poll().unwrap().as_deref(), Some("4"));
        assert_eq!(queue.poll().unwrap().as_deref(), Some("5"));
        assert_eq!(queue.poll().unwrap(), None);
        assert!(queue.backing_path().is_none());
    }

    #[test]
    fn spills_past_memory_budget_and_stays_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = SpilloverQueue::new(1, dir.path()).unwrap();

        queue.offer("first".to_string()).unwrap();
        assert!(queue.backing_path().is_none());
        queue.offer("second".to_string()).unwrap();
        queue.offer("third".to_string()).unwrap();

        let path = queue.backing_path().unwrap().to_path_buf();
        assert!(path.exists());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(BACKING_FILE_PREFIX));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.spilled_len(), 2);

        assert_eq!(queue.poll().unwrap().as_deref(), Some("first"));
        assert_eq!(queue.poll().unwrap().as_deref(), Some("second"));
        assert_eq!(queue.poll().unwrap().as_deref(), Some("third"));
        assert_eq!(queue.poll().unwrap(), None);
        assert_eq!(queue.len(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn interleaved_offers_keep_global_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = SpilloverQueue::new(4, dir.path()).unwrap();
        let mut expected = Vec::new();
        let mut drained = Vec::new();

        for round in 0..5 {
            for i in 0..7 {
                let item = format!("{round}-{i}");
                queue.offer(item.clone()).unwrap();
                expected.push(item);
            }
            for _ in 0..3 {
                drained.extend(queue.poll().unwrap());
            }
            assert_eq!(queue.len(), expected.len() - drained.len());
        }
        while let Some(item) = queue.poll().unwrap() {
            drained.push(item);
        }
        assert_eq!(drained, expected);
    }

    #[test]
    fn peek_reads_through_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = SpilloverQueue::new(2, dir.path()).unwrap();
        for item in ["a", "b", "c"] {
            queue.offer(item.to_string()).unwrap();
        }
        queue.poll().unwrap();
        queue.poll().unwrap();
        assert_eq!(queue.peek().unwrap().map(String::as_str), Some("c"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn rejects_invalid_construction() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SpilloverQueue::<String>::new(0, dir.path()),
            Err(QueueError::Configuration(_))
        ));
        assert!(matches!(
            SpilloverQueue::<String>::new(10, dir.path().join("missing")),
            Err(QueueError::Configuration(_))
        ));

        let file_path = dir.path().join("plain-file");
        std::fs::write(&file_path, b"x").unwrap();
        assert!(matches!(
            SpilloverQueue::<String>::new(10, &file_path),
            Err(QueueError::Configuration(_))
        ));
    }

    #[test]
    fn blank_entries_rejected_on_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = SpilloverQueue::new(1, dir.path()).unwrap();
        assert!(matches!(queue.offer(String::new()), Err(QueueError::EmptyEntry)));
        queue.offer("a".to_string()).unwrap();
        assert!(matches!(queue.offer(String::new()), Err(QueueError::EmptyEntry)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn cursor_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = SpilloverQueue::<String>::new(1, dir.path()).unwrap();
        assert!(matches!(queue.cursor(), Err(QueueError::Unsupported(_))));
    }

    #[test]
    fn close_reports_open_file_and_drop_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = SpilloverQueue::new(1, dir.path()).unwrap();
        assert!(!queue.close().unwrap());

        for item in ["a", "b"] {
            queue.offer(item.to_string()).unwrap();
        }
        let path = queue.backing_path().unwrap().to_path_buf();
        assert!(queue.close().unwrap());
        assert!(!path.exists());
        assert_eq!(queue.len(), 1);

        queue.offer("c".to_string()).unwrap();
        let path = queue.backing_path().unwrap().to_path_buf();
        drop(queue);
        assert!(!path.exists());
    }
}
