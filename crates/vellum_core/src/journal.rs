//! The commit journal.
//!
//! Every committed mutation (document writes, collection and index
//! lifecycle, metadata) is appended to a single journal before it is
//! applied in memory. On open the journal is replayed to rebuild the full
//! database state; a torn record at the tail (crash mid-append) is
//! detected by checksum and truncated away.
//!
//! Record framing: `[payload_len: u32 LE][crc32: u32 LE][payload]`, where
//! the payload is the JSON encoding of a [`JournalRecord`].

use crate::error::{Error, Result};
use crate::index::IndexSpec;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use vellum_storage::StorageBackend;

const HEADER_LEN: usize = 8;

/// Upper bound on a single record payload; guards against reading a
/// garbage length field as a huge allocation.
const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

/// A single journalled operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum JournalRecord {
    /// Database format version; first record of every journal.
    Format { version: u16 },
    /// A collection was created.
    CreateCollection {
        id: u32,
        scope: String,
        name: String,
    },
    /// A collection was deleted along with its contents.
    DeleteCollection { id: u32 },
    /// A document revision was committed.
    Put {
        collection: u32,
        id: String,
        sequence: u64,
        revision: u64,
        properties: Value,
        expiration: Option<i64>,
    },
    /// A document was deleted, leaving a tombstone.
    Tombstone {
        collection: u32,
        id: String,
        sequence: u64,
        revision: u64,
    },
    /// A document and its tombstone were purged without trace.
    Purge { collection: u32, id: String },
    /// A document's expiration was set or cleared.
    SetExpiration {
        collection: u32,
        id: String,
        expiration: Option<i64>,
    },
    /// An index definition was created or replaced.
    CreateIndex {
        collection: u32,
        name: String,
        spec: IndexSpec,
    },
    /// An index definition was removed.
    DeleteIndex { collection: u32, name: String },
    /// A database metadata entry was written (replication checkpoints).
    PutMeta { key: String, value: String },
    /// A database metadata entry was removed.
    DeleteMeta { key: String },
}

/// Append-only journal over a storage backend.
pub(crate) struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
}

impl Journal {
    pub(crate) fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
        }
    }

    /// Appends one record and makes it durable per the sync policy.
    pub(crate) fn append(&self, record: &JournalRecord) -> Result<()> {
        let frame = encode_frame(record)?;
        self.backend.append(&frame)?;
        self.backend.flush()?;
        if self.sync_on_commit {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Reads all records from the start of the journal.
    ///
    /// A torn or checksum-failing record at the tail is truncated away and
    /// replay stops there; corruption anywhere before the tail is fatal.
    pub(crate) fn replay(&self) -> Result<Vec<JournalRecord>> {
        let size = self.backend.len()?;
        let mut records = Vec::new();
        let mut offset = 0u64;

        while offset < size {
            let remaining = size - offset;
            if remaining < HEADER_LEN as u64 {
                return self.truncate_tail(offset, size, records);
            }

            let header = self.backend.read_at(offset, HEADER_LEN)?;
            let payload_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let stored_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if payload_len > MAX_RECORD_LEN
                || remaining - (HEADER_LEN as u64) < u64::from(payload_len)
            {
                return self.truncate_tail(offset, size, records);
            }

            let payload = self
                .backend
                .read_at(offset + HEADER_LEN as u64, payload_len as usize)?;

            if crc32(&payload) != stored_crc {
                return self.truncate_tail(offset, size, records);
            }

            let record: JournalRecord = serde_json::from_slice(&payload)
                .map_err(|e| Error::corrupt(format!("undecodable journal record: {e}")))?;
            records.push(record);
            offset += HEADER_LEN as u64 + u64::from(payload_len);
        }

        Ok(records)
    }

    /// Discards the journal and rewrites it from a snapshot of records.
    ///
    /// Used by compaction; callers must hold the database write path.
    pub(crate) fn rewrite(&self, records: &[JournalRecord]) -> Result<()> {
        self.backend.truncate(0)?;
        for record in records {
            let frame = encode_frame(record)?;
            self.backend.append(&frame)?;
        }
        self.backend.flush()?;
        self.backend.sync()?;
        Ok(())
    }

    /// Size of the journal in bytes.
    #[cfg(test)]
    pub(crate) fn size(&self) -> Result<u64> {
        Ok(self.backend.len()?)
    }

    fn truncate_tail(
        &self,
        offset: u64,
        size: u64,
        records: Vec<JournalRecord>,
    ) -> Result<Vec<JournalRecord>> {
        tracing::warn!(
            offset,
            size,
            "journal has a torn tail record, truncating"
        );
        self.backend.truncate(offset)?;
        self.backend.sync()?;
        Ok(records)
    }
}

fn encode_frame(record: &JournalRecord) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(record)
        .map_err(|e| Error::corrupt(format!("unencodable journal record: {e}")))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::invalid_argument("journal record too large"))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&crc32(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// CRC-32 (IEEE 802.3, reflected) over a byte slice.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}
