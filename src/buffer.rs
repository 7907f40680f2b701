use parking_lot::Mutex;

use crate::error::SinkError;
use crate::record::Record;

/// Ordered in-memory batch shared by every writer and the flush worker.
///
/// The lock is held only to append or to swap the batch out; delivery always
/// happens on a drained batch the buffer no longer references.
pub struct BatchBuffer {
    inner: Mutex<Inner>,
    batch_size: usize,
}

struct Inner {
    records: Vec<Record>,
    sealed: bool,
}

impl BatchBuffer {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            inner: Mutex::new(Inner {
                records: Vec::with_capacity(batch_size),
                sealed: false,
            }),
            batch_size,
        }
    }

    /// Append a record; `Ok(true)` once the batch has reached its size threshold.
    pub fn enqueue(&self, record: Record) -> Result<bool, SinkError> {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return Err(SinkError::Closed);
        }
        inner.records.push(record);
        Ok(inner.records.len() >= self.batch_size)
    }

    /// Take the current batch, leaving an empty one behind.
    pub fn drain(&self) -> Vec<Record> {
        let mut inner = self.inner.lock();
        self.take(&mut inner)
    }

    /// Final drain: later enqueues fail with [`SinkError::Closed`].
    pub fn drain_and_seal(&self) -> Vec<Record> {
        let mut inner = self.inner.lock();
        inner.sealed = true;
        self.take(&mut inner)
    }

    fn take(&self, inner: &mut Inner) -> Vec<Record> {
        if inner.records.is_empty() {
            return Vec::new();
        }
        let capacity = if inner.sealed { 0 } else { self.batch_size };
        std::mem::replace(&mut inner.records, Vec::with_capacity(capacity))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.lock().sealed
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}
