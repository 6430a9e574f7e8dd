use std::time::Duration;

pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_UPDATE_QUEUE_DEPTH: usize = 64;
pub const DEFAULT_OBSERVER_CAPACITY: usize = 256;

/// Tunables for the role synchronization service.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Deadline for `force_refresh_user_roles` to observe a snapshot.
    pub refresh_timeout: Duration,
    /// Bound of each subscription's outbound snapshot queue.
    pub update_queue_depth: usize,
    /// Capacity of the process-wide role update observer channel.
    pub observer_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
            update_queue_depth: DEFAULT_UPDATE_QUEUE_DEPTH,
            observer_capacity: DEFAULT_OBSERVER_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::SyncConfig;
    use std::time::Duration;

    #[test]
    fn defaults_match_documented_contract() {
        let config = SyncConfig::default();
        assert_eq!(config.refresh_timeout, Duration::from_secs(5));
        assert!(config.update_queue_depth > 0);
        assert!(config.observer_capacity > 0);
    }
}
