//! Live queries: re-run notifications on collection changes.

use crate::query::Query;
use vellum_core::{ListenerToken, Result};

impl Query {
    /// Registers a callback invoked after every commit to the queried
    /// collection.
    ///
    /// The callback signals that results may have changed; call
    /// [`Query::execute`] from it (or from another thread) to obtain the
    /// fresh rows. Callbacks run on the notifier thread, serialized with
    /// all other listeners, and never during the commit itself.
    ///
    /// The returned token deregisters the callback when dropped.
    pub fn add_listener<F>(&self, callback: F) -> Result<ListenerToken>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let collection = self.collection()?;
        collection.add_change_listener(move |_entry| callback())
    }

    /// Deregisters a live-query callback.
    ///
    /// Equivalent to dropping the token.
    pub fn remove_listener(token: ListenerToken) {
        drop(token);
    }
}
