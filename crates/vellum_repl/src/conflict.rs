//! Conflict resolution between local and incoming revisions.

use crate::error::ReplResult;
use crate::message::RevisionDelta;
use vellum_core::{Collection, DocumentRevision, Object, Timestamp};

/// Outcome of resolving a conflicting write.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Keep the local revision; the incoming one is discarded.
    KeepLocal,
    /// Install the incoming revision.
    TakeRemote,
    /// Install a merged body instead of either side.
    Merge(Object),
}

/// Decides the winner when an incoming revision lands on changed local
/// state.
///
/// `local` is `None` when the document was never written locally or has
/// been purged.
pub trait ConflictResolver: Send + Sync {
    /// Resolves one conflict.
    fn resolve(&self, local: Option<&DocumentRevision>, remote: &RevisionDelta) -> Resolution;
}

/// Default rule: the remote revision wins, except that a local tombstone
/// newer than the incoming revision is preserved.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResolver;

impl ConflictResolver for DefaultResolver {
    fn resolve(&self, local: Option<&DocumentRevision>, remote: &RevisionDelta) -> Resolution {
        if let Some(local) = local {
            if local.is_deleted() && !remote.is_deleted() && local.sequence.as_u64() > remote.sequence
            {
                return Resolution::KeepLocal;
            }
        }
        Resolution::TakeRemote
    }
}

/// Applies one incoming delta to a collection, resolving conflicts.
///
/// Returns `true` if the collection changed. An incoming revision equal to
/// the local state is a no-op, which keeps two converged databases from
/// echoing each other's writes back and forth.
pub(crate) fn apply_delta(
    collection: &Collection,
    delta: &RevisionDelta,
    resolver: &dyn ConflictResolver,
) -> ReplResult<bool> {
    let local = collection.document_revision(&delta.id)?;

    if local
        .as_ref()
        .is_some_and(|l| l.body == delta.body)
    {
        return Ok(false);
    }

    match resolver.resolve(local.as_ref(), delta) {
        Resolution::KeepLocal => Ok(false),
        Resolution::TakeRemote => {
            collection.apply_revision(
                &delta.id,
                delta.body.clone(),
                delta.expiration.map(Timestamp::from_millis),
            )?;
            Ok(true)
        }
        Resolution::Merge(body) => {
            collection.apply_revision(
                &delta.id,
                Some(body),
                delta.expiration.map(Timestamp::from_millis),
            )?;
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CollectionKey;
    use vellum_core::{Revision, SequenceNumber};

    fn delta(id: &str, sequence: u64, body: Option<Object>) -> RevisionDelta {
        RevisionDelta {
            collection: CollectionKey::new("_default", "_default"),
            id: id.into(),
            sequence,
            revision: 1,
            body,
            expiration: None,
        }
    }

    fn tombstone_revision(sequence: u64) -> DocumentRevision {
        DocumentRevision {
            id: "d".into(),
            sequence: SequenceNumber::new(sequence),
            revision: Revision::new(2),
            body: None,
            expiration: None,
        }
    }

    #[test]
    fn remote_wins_by_default() {
        let mut body = Object::new();
        body.set("n", 1.0);
        let live = DocumentRevision {
            id: "d".into(),
            sequence: SequenceNumber::new(3),
            revision: Revision::new(1),
            body: Some(body),
            expiration: None,
        };
        let incoming = delta("d", 1, Some(Object::new()));
        assert_eq!(
            DefaultResolver.resolve(Some(&live), &incoming),
            Resolution::TakeRemote
        );
        assert_eq!(DefaultResolver.resolve(None, &incoming), Resolution::TakeRemote);
    }

    #[test]
    fn newer_local_tombstone_survives() {
        let incoming = delta("d", 4, Some(Object::new()));
        assert_eq!(
            DefaultResolver.resolve(Some(&tombstone_revision(9)), &incoming),
            Resolution::KeepLocal
        );
        // Older tombstone loses to the incoming revision.
        assert_eq!(
            DefaultResolver.resolve(Some(&tombstone_revision(2)), &incoming),
            Resolution::TakeRemote
        );
        // Incoming tombstones are always applied.
        let incoming_delete = delta("d", 1, None);
        assert_eq!(
            DefaultResolver.resolve(Some(&tombstone_revision(9)), &incoming_delete),
            Resolution::TakeRemote
        );
    }
}
