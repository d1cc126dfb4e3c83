//! Fixed-capacity in-memory ring buffer.

use super::{IdentifierQueue, QueueEntry, QueueError};

/// Bounded FIFO ring buffer with O(1) `offer`/`poll` and a removing cursor.
///
/// A capacity of zero is accepted and yields a queue that is always full.
#[derive(Debug)]
pub struct RingQueue<T> {
    slots: Box<[Option<T>]>,
    take_index: usize,
    put_index: usize,
    count: usize,
}

impl<T> RingQueue<T> {
    /// Create an empty ring holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let slots = std::iter::repeat_with(|| None).take(capacity).collect();
        Self {
            slots,
            take_index: 0,
            put_index: 0,
            count: 0,
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of entries currently held.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Whether the ring is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether the ring has no free slot.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }

    /// Free slots left.
    #[must_use]
    pub fn remaining_capacity(&self) -> usize {
        self.slots.len() - self.count
    }

    /// Append `item`, returning `Ok(false)` when the ring is full.
    ///
    /// # Errors
    ///
    /// `QueueError::EmptyEntry` if `item` is blank.
    pub fn offer(&mut self, item: T) -> Result<bool, QueueError>
    where
        T: QueueEntry,
    {
        if item.is_blank() {
            return Err(QueueError::EmptyEntry);
        }
        if self.is_full() {
            return Ok(false);
        }
        self.slots[self.put_index] = Some(item);
        self.put_index = self.inc(self.put_index);
        self.count += 1;
        Ok(true)
    }

    /// Remove and return the oldest entry.
    pub fn poll(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let item = self.slots[self.take_index].take();
        self.take_index = self.inc(self.take_index);
        self.count -= 1;
        item
    }

    /// Borrow the oldest entry.
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        if self.count == 0 {
            return None;
        }
        self.slots[self.take_index].as_ref()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        while self.poll().is_some() {}
        self.take_index = 0;
        self.put_index = 0;
    }

    /// Forward cursor from oldest to newest supporting in-place removal.
    pub fn cursor(&mut self) -> RingCursor<'_, T> {
        RingCursor {
            queue: self,
            next_offset: 0,
            last_returned: None,
        }
    }

    const fn inc(&self, index: usize) -> usize {
        if index + 1 == self.slots.len() {
            0
        } else {
            index + 1
        }
    }

    const fn physical(&self, offset: usize) -> usize {
        (self.take_index + offset) % self.slots.len()
    }

    // Slides every later element back one slot so the ring stays contiguous.
    fn remove_at(&mut self, offset: usize) -> Option<T> {
        let mut index = self.physical(offset);
        let removed = self.slots[index].take();
        for _ in offset + 1..self.count {
            let next = self.inc(index);
            self.slots[index] = self.slots[next].take();
            index = next;
        }
        self.put_index = index;
        self.count -= 1;
        removed
    }
}

impl<T: QueueEntry> IdentifierQueue<T> for RingQueue<T> {
    fn offer(&mut self, entry: T) -> Result<bool, QueueError> {
        Self::offer(self, entry)
    }

    fn poll(&mut self) -> Result<Option<T>, QueueError> {
        Ok(Self::poll(self))
    }

    fn len(&self) -> usize {
        self.count
    }

    fn is_full(&self) -> bool {
        Self::is_full(self)
    }
}

/// Cursor over a [`RingQueue`], oldest entry first.
///
/// `remove` deletes the element most recently returned by `next`; calling it
/// again before advancing fails with [`QueueError::IllegalCursorState`].
#[derive(Debug)]
pub struct RingCursor<'a, T> {
    queue: &'a mut RingQueue<T>,
    next_offset: usize,
    last_returned: Option<usize>,
}

impl<T> RingCursor<'_, T> {
    /// Advance and borrow the next element.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<&T> {
        if self.next_offset >= self.queue.count {
            self.last_returned = None;
            return None;
        }
        let offset = self.next_offset;
        self.next_offset += 1;
        self.last_returned = Some(offset);
        self.queue.slots[self.queue.physical(offset)].as_ref()
    }

    /// Remove the element last returned by [`next`](Self::next).
    ///
    /// # Errors
    ///
    /// `QueueError::IllegalCursorState` if nothing was returned since the
    /// last removal.
    pub fn remove(&mut self) -> Result<T, QueueError> {
        let offset = self.last_returned.take().ok_or(QueueError::IllegalCursorState)?;
        let removed = self
            .queue
            .remove_at(offset)
            .ok_or(QueueError::IllegalCursorState)?;
        self.next_offset = offset;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, items: &[&str]) -> RingQueue<String> {
        let mut queue = RingQueue::new(capacity);
        for item in items {
            assert!(queue.offer((*item).to_string()).unwrap());
        }
        queue
    }

    #[test]
    fn offer_and_poll_are_fifo_across_wraparound() {
        let mut queue = filled(3, &["a", "b", "c"]);
        assert!(!queue.offer("d".to_string()).unwrap());
        assert_eq!(queue.poll().as_deref(), Some("a"));
        assert!(queue.offer("d".to_string()).unwrap());

        let drained: Vec<_> = std::iter::from_fn(|| queue.poll()).collect();
        assert_eq!(drained, vec!["b", "c", "d"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn blank_entries_are_rejected() {
        let mut queue = RingQueue::new(2);
        assert!(matches!(queue.offer(String::new()), Err(QueueError::EmptyEntry)));
        assert!(queue.is_empty());
    }

    #[test]
    fn zero_capacity_is_always_full() {
        let mut queue: RingQueue<String> = RingQueue::new(0);
        assert!(queue.is_full());
        assert!(!queue.offer("x".to_string()).unwrap());
        assert!(queue.poll().is_none());
    }

    #[test]
    fn cursor_removes_in_place() {
        let mut queue = filled(4, &["a", "b", "c"]);
        queue.poll();
        queue.offer("d".to_string()).unwrap();
        queue.offer("e".to_string()).unwrap();

        let mut cursor = queue.cursor();
        let mut seen = Vec::new();
        while let Some(item) = cursor.next() {
            let item = item.clone();
            if item == "c" || item == "e" {
                cursor.remove().unwrap();
            }
            seen.push(item);
        }
        assert_eq!(seen, vec!["b", "c", "d", "e"]);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.poll().as_deref(), Some("b"));
        assert_eq!(queue.poll().as_deref(), Some("d"));
        assert!(queue.offer("f".to_string()).unwrap());
        assert_eq!(queue.poll().as_deref(), Some("f"));
    }

    #[test]
    fn removing_twice_without_advancing_fails() {
        let mut queue = filled(2, &["a", "b"]);
        let mut cursor = queue.cursor();
        assert!(matches!(cursor.remove(), Err(QueueError::IllegalCursorState)));

        cursor.next();
        assert_eq!(cursor.remove().unwrap(), "a");
        assert!(matches!(cursor.remove(), Err(QueueError::IllegalCursorState)));
        assert_eq!(cursor.next().map(String::as_str), Some("b"));
    }
}
