//! Database configuration.

use std::time::Duration;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to sync the journal on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// How often the background sweep purges expired documents.
    /// `None` disables the timer; expired documents are still swept
    /// opportunistically on writes and by explicit `purge_expired`.
    pub expiry_purge_interval: Option<Duration>,

    /// Format version written to new databases.
    pub format_version: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            expiry_purge_interval: Some(Duration::from_secs(60)),
            format_version: 1,
        }
    }
}

impl Config {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the journal on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the background expiry purge interval.
    #[must_use]
    pub const fn expiry_purge_interval(mut self, value: Option<Duration>) -> Self {
        self.expiry_purge_interval = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
    }

    #[test]
    fn builder() {
        let config = Config::new().create_if_missing(false).sync_on_commit(false);
        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
    }
}
