//! Replication checkpoints, persisted in the local database's metadata.

use crate::error::{ReplError, ReplResult};
use crate::message::CollectionKey;
use serde::{Deserialize, Serialize};
use vellum_core::Database;

/// Progress markers for one collection against one endpoint.
///
/// `local` is the last local sequence pushed; `remote` the last peer
/// sequence pulled. Both survive restarts, so a new session resumes where
/// the previous one stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last local sequence confirmed pushed.
    pub local: u64,
    /// Last peer sequence applied locally.
    pub remote: u64,
}

fn metadata_key(endpoint: &str, collection: &CollectionKey) -> String {
    format!("repl.checkpoint:{endpoint}:{collection}")
}

/// Loads the persisted checkpoint, or the zero checkpoint if none exists.
pub(crate) fn load(
    db: &Database,
    endpoint: &str,
    collection: &CollectionKey,
) -> ReplResult<Checkpoint> {
    match db.metadata(&metadata_key(endpoint, collection))? {
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| ReplError::Protocol(format!("corrupt checkpoint: {e}"))),
        None => Ok(Checkpoint::default()),
    }
}

/// Persists a checkpoint.
pub(crate) fn store(
    db: &Database,
    endpoint: &str,
    collection: &CollectionKey,
    checkpoint: Checkpoint,
) -> ReplResult<()> {
    let raw = serde_json::to_string(&checkpoint)
        .map_err(|e| ReplError::Protocol(format!("encode checkpoint: {e}")))?;
    db.set_metadata(&metadata_key(endpoint, collection), &raw)?;
    Ok(())
}

/// Discards any persisted checkpoint, forcing a rescan from sequence zero.
pub(crate) fn reset(
    db: &Database,
    endpoint: &str,
    collection: &CollectionKey,
) -> ReplResult<()> {
    db.remove_metadata(&metadata_key(endpoint, collection))?;
    Ok(())
}
