//! Collector configuration parameters.

use crate::error::GcError;

/// When a registry runs collection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CollectPolicy {
    /// Collect synchronously after every refcount decrement.
    #[default]
    Eager,
    /// Only decrement; reclamation waits for an explicit `collect()` or the
    /// shutdown flush.
    Manual,
}

/// Configuration shared by a [`Heap`](crate::Heap) and its registries.
///
/// Validated when a heap or registry is created; immutable afterwards.
#[derive(Clone, Debug)]
pub struct CollectorConfig {
    /// Collection trigger. Default: [`CollectPolicy::Eager`].
    pub policy: CollectPolicy,

    /// Whether dropping a [`Heap`](crate::Heap) runs the shutdown flush.
    ///
    /// Default: `true`. With `false` the caller is expected to call
    /// [`Heap::shutdown`](crate::Heap::shutdown) explicitly; any records
    /// still present are dropped with the registry once the last handle
    /// goes away.
    pub flush_on_drop: bool,

    /// Maximum number of records rendered by a registry dump.
    ///
    /// Default: 64. Must be non-zero.
    pub dump_limit: usize,
}

impl CollectorConfig {
    /// Default maximum dump rows.
    pub const DEFAULT_DUMP_LIMIT: usize = 64;

    /// Config with manual collection and all other defaults.
    pub fn manual() -> Self {
        Self {
            policy: CollectPolicy::Manual,
            ..Self::default()
        }
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), GcError> {
        if self.dump_limit == 0 {
            return Err(GcError::InvalidConfig {
                reason: "dump_limit must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Whether decrements trigger collection immediately.
    pub fn collects_eagerly(&self) -> bool {
        self.policy == CollectPolicy::Eager
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            policy: CollectPolicy::Eager,
            flush_on_drop: true,
            dump_limit: Self::DEFAULT_DUMP_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_eager_and_flushes() {
        let config = CollectorConfig::default();
        assert!(config.collects_eagerly());
        assert!(config.flush_on_drop);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn manual_keeps_other_defaults() {
        let config = CollectorConfig::manual();
        assert_eq!(config.policy, CollectPolicy::Manual);
        assert_eq!(config.dump_limit, CollectorConfig::DEFAULT_DUMP_LIMIT);
    }

    #[test]
    fn zero_dump_limit_rejected() {
        let config = CollectorConfig {
            dump_limit: 0,
            ..CollectorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(GcError::InvalidConfig { .. })
        ));
    }
}
