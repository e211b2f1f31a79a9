//! Replicator configuration.

use crate::conflict::ConflictResolver;
use crate::message::RevisionDelta;
use std::sync::Arc;
use std::time::Duration;

/// Which way documents flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Send local changes to the endpoint.
    Push,
    /// Apply endpoint changes locally.
    Pull,
    /// Both, pull before push within each cycle.
    #[default]
    PushAndPull,
}

impl Direction {
    /// True if this direction sends local changes.
    #[must_use]
    pub fn pushes(self) -> bool {
        matches!(self, Direction::Push | Direction::PushAndPull)
    }

    /// True if this direction applies remote changes.
    #[must_use]
    pub fn pulls(self) -> bool {
        matches!(self, Direction::Pull | Direction::PushAndPull)
    }
}

/// How the replicator authenticates to the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Authenticator {
    /// No credentials.
    #[default]
    None,
    /// Basic username/password credentials.
    Basic {
        /// User name.
        username: String,
        /// Password.
        password: String,
    },
    /// Trust exactly this certificate instead of the platform trust chain.
    PinnedCertificate(Vec<u8>),
}

/// A filter over outgoing or incoming changes.
///
/// Returning `false` skips the change; a skipped change still advances the
/// checkpoint, so it is not re-offered next session.
pub type ReplicationFilter = Arc<dyn Fn(&RevisionDelta) -> bool + Send + Sync>;

/// Per-collection replication settings.
#[derive(Clone, Default)]
pub struct CollectionConfig {
    /// Scope of the collection.
    pub scope: String,
    /// Name of the collection.
    pub name: String,
    /// Decides whether a local change is sent.
    pub push_filter: Option<ReplicationFilter>,
    /// Decides whether an incoming change is applied.
    pub pull_filter: Option<ReplicationFilter>,
    /// Overrides the default conflict rule for this collection.
    pub conflict_resolver: Option<Arc<dyn ConflictResolver>>,
}

impl CollectionConfig {
    /// Settings for one collection with no filters.
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
            push_filter: None,
            pull_filter: None,
            conflict_resolver: None,
        }
    }

    /// Sets the push filter.
    #[must_use]
    pub fn with_push_filter(
        mut self,
        filter: impl Fn(&RevisionDelta) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.push_filter = Some(Arc::new(filter));
        self
    }

    /// Sets the pull filter.
    #[must_use]
    pub fn with_pull_filter(
        mut self,
        filter: impl Fn(&RevisionDelta) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.pull_filter = Some(Arc::new(filter));
        self
    }

    /// Sets the conflict resolver.
    #[must_use]
    pub fn with_conflict_resolver(mut self, resolver: impl ConflictResolver + 'static) -> Self {
        self.conflict_resolver = Some(Arc::new(resolver));
        self
    }
}

impl std::fmt::Debug for CollectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionConfig")
            .field("scope", &self.scope)
            .field("name", &self.name)
            .field("push_filter", &self.push_filter.is_some())
            .field("pull_filter", &self.pull_filter.is_some())
            .field("conflict_resolver", &self.conflict_resolver.is_some())
            .finish()
    }
}

/// Configuration for a replicator.
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    /// Endpoint URL the transport connects to.
    pub endpoint: String,
    /// Which way documents flow.
    pub direction: Direction,
    /// Keep the session alive and react to further changes.
    pub continuous: bool,
    /// Reconnect attempts after a recoverable failure; 0 is unlimited.
    pub max_attempts: u32,
    /// Backoff between reconnect attempts.
    pub retry: RetryConfig,
    /// Idle wake-up interval in continuous mode.
    pub heartbeat: Duration,
    /// Per-request timeout hint for transports.
    pub timeout: Duration,
    /// Credentials presented in the handshake.
    pub authenticator: Authenticator,
    /// Collections to replicate. Must not be empty.
    pub collections: Vec<CollectionConfig>,
    /// Maximum deltas per pull or push batch.
    pub batch_size: u32,
}

impl ReplicatorConfig {
    /// Configuration with defaults for one endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            direction: Direction::PushAndPull,
            continuous: false,
            max_attempts: 0,
            retry: RetryConfig::default(),
            heartbeat: Duration::from_secs(300),
            timeout: Duration::from_secs(30),
            authenticator: Authenticator::None,
            collections: Vec::new(),
            batch_size: 200,
        }
    }

    /// Sets the direction.
    #[must_use]
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Enables or disables continuous mode.
    #[must_use]
    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    /// Sets the reconnect attempt cap; 0 means unlimited.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the backoff configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the idle heartbeat interval.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Sets the request timeout hint.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the authenticator.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Authenticator) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Adds a collection to replicate.
    #[must_use]
    pub fn with_collection(mut self, collection: CollectionConfig) -> Self {
        self.collections.push(collection);
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Backoff between reconnect attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first reconnect.
    pub initial_delay: Duration,
    /// Ceiling for the backoff.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Calculates the delay before a reconnect attempt (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.min(32) as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        if self.add_jitter {
            // Up to 25% jitter, derived from the clock.
            Duration::from_secs_f64(capped + capped * 0.25 * clock_jitter())
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

fn clock_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_predicates() {
        assert!(Direction::Push.pushes());
        assert!(!Direction::Push.pulls());
        assert!(Direction::Pull.pulls());
        assert!(!Direction::Pull.pushes());
        assert!(Direction::PushAndPull.pushes());
        assert!(Direction::PushAndPull.pulls());
    }

    #[test]
    fn backoff_grows_and_respects_ceiling() {
        let retry = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            add_jitter: false,
        };
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_secs(1));
    }

    #[test]
    fn config_builder() {
        let config = ReplicatorConfig::new("ws://peer.local/db")
            .with_direction(Direction::Pull)
            .with_continuous(true)
            .with_max_attempts(5)
            .with_batch_size(50)
            .with_collection(CollectionConfig::new("_default", "_default"));

        assert_eq!(config.endpoint, "ws://peer.local/db");
        assert_eq!(config.direction, Direction::Pull);
        assert!(config.continuous);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.collections.len(), 1);
    }
}
