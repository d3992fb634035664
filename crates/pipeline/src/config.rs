//! Pipeline tunables, read from the environment.

use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Spawner workers; bounds concurrent initial listings, not open streams.
    pub workers: usize,
    /// Capacity of the shared change-event channel.
    pub event_capacity: usize,
    /// Poll interval while a resource kind is not served yet.
    pub retry_interval: Duration,
    /// How long to wait for watch tasks to release their streams on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            event_capacity: 100,
            retry_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse::<T>().ok())
}

impl PipelineConfig {
    /// Defaults overridden by `KWATCH_WORKERS`, `KWATCH_EVENT_CAP`, `KWATCH_RETRY_MS`
    /// and `KWATCH_SHUTDOWN_GRACE_MS`. Unparsable or zero sizes are ignored.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            workers: env_parse::<usize>("KWATCH_WORKERS").filter(|n| *n > 0).unwrap_or(d.workers),
            event_capacity: env_parse::<usize>("KWATCH_EVENT_CAP").filter(|n| *n > 0).unwrap_or(d.event_capacity),
            retry_interval: env_parse::<u64>("KWATCH_RETRY_MS").map(Duration::from_millis).unwrap_or(d.retry_interval),
            shutdown_grace: env_parse::<u64>("KWATCH_SHUTDOWN_GRACE_MS").map(Duration::from_millis).unwrap_or(d.shutdown_grace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_and_invalid_values_fall_back() {
        std::env::set_var("KWATCH_EVENT_CAP", "7");
        std::env::set_var("KWATCH_RETRY_MS", "not-a-number");
        std::env::set_var("KWATCH_WORKERS", "0");
        let cfg = PipelineConfig::from_env();
        std::env::remove_var("KWATCH_EVENT_CAP");
        std::env::remove_var("KWATCH_RETRY_MS");
        std::env::remove_var("KWATCH_WORKERS");
        assert_eq!(cfg.event_capacity, 7);
        assert_eq!(cfg.retry_interval, Duration::from_secs(1));
        assert_eq!(cfg.workers, 4);
    }
}
