//! Batch staging for multi-entry appends.

/// One staged entry: its index and payload length.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchEntry {
    pub index: u64,
    pub size: usize,
}

/// A reusable staging area for appending multiple entries atomically.
///
/// Payloads are concatenated into one contiguous region; per-entry
/// metadata records each payload's index and length. A batch is cleared
/// after a successful [`Log::write_batch`](crate::Log::write_batch) and
/// can be reused, retaining its allocations.
///
/// Indices staged into a batch must continue the log's sequence:
/// `last_index + 1`, `last_index + 2`, and so on. The log rejects the
/// whole batch with `OutOfOrder` otherwise.
#[derive(Debug, Default)]
pub struct Batch {
    pub(crate) entries: Vec<BatchEntry>,
    pub(crate) data: Vec<u8>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an entry for the next [`Log::write_batch`](crate::Log::write_batch).
    pub fn write(&mut self, index: u64, data: &[u8]) {
        self.entries.push(BatchEntry {
            index,
            size: data.len(),
        });
        self.data.extend_from_slice(data);
    }

    /// Number of staged entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all staged entries, retaining allocations for reuse.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.data.clear();
    }
}
