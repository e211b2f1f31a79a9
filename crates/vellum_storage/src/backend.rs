//! Storage backend trait definition.

use crate::error::StorageResult;

/// A low-level append-only byte log.
///
/// Backends do not understand journal records, documents, or indexes;
/// `vellum_core` owns all format interpretation. All methods take `&self`;
/// implementations serialize internally so a backend can be shared behind
/// an `Arc` by concurrent readers while the core serializes writers.
///
/// # Invariants
///
/// - `append` returns the offset the data was written at
/// - `read_at` returns exactly the bytes previously appended at that offset
/// - after `sync` returns, all appended data survives process termination
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Fails with `ReadPastEnd` if the range extends beyond the current
    /// log size, or with `Io` on an underlying I/O failure.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the log and returns its offset.
    fn append(&self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    fn flush(&self) -> StorageResult<()>;

    /// Syncs data and metadata to durable storage.
    ///
    /// Stronger than [`StorageBackend::flush`]: on return, all previously
    /// appended data is durable.
    fn sync(&self) -> StorageResult<()>;

    /// Returns the current size of the log in bytes.
    ///
    /// This is the offset at which the next `append` will write.
    fn len(&self) -> StorageResult<u64>;

    /// Returns true if the log is empty.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Truncates the log to `new_size` bytes.
    ///
    /// Used to discard a torn tail record after crash recovery, and to
    /// reset the log on checkpoint.
    ///
    /// # Errors
    ///
    /// Fails with `TruncateBeyondEnd` if `new_size` exceeds the current size.
    fn truncate(&self, new_size: u64) -> StorageResult<()>;
}
