//! Timing configuration for the persistence scheduler.

use std::time::Duration;

/// Edits this close to the previous persist count as part of a burst.
pub const DEFAULT_RAPID_WINDOW: Duration = Duration::from_millis(200);

/// Debounce delay for structural edits inside a burst.
pub const DEFAULT_URGENT_DELAY: Duration = Duration::from_millis(100);

/// Debounce delay for everything else.
pub const DEFAULT_NORMAL_DELAY: Duration = Duration::from_millis(500);

/// Period of the safety-net sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Timing knobs for write coalescing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTimingConfig {
    /// Maximum time since the last persist for an edit to count as rapid.
    pub rapid_window: Duration,
    /// Short debounce tier (urgent and rapid edits).
    pub urgent_delay: Duration,
    /// Normal debounce tier.
    pub normal_delay: Duration,
    /// Fixed sweep interval; upper bound on how long an edit can stay unsent.
    pub sweep_interval: Duration,
}

impl Default for SyncTimingConfig {
    fn default() -> Self {
        Self {
            rapid_window: DEFAULT_RAPID_WINDOW,
            urgent_delay: DEFAULT_URGENT_DELAY,
            normal_delay: DEFAULT_NORMAL_DELAY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl SyncTimingConfig {
    /// Set the rapid-edit window.
    pub fn with_rapid_window(mut self, window: Duration) -> Self {
        self.rapid_window = window;
        self
    }

    /// Set the short debounce tier.
    pub fn with_urgent_delay(mut self, delay: Duration) -> Self {
        self.urgent_delay = delay;
        self
    }

    /// Set the normal debounce tier.
    pub fn with_normal_delay(mut self, delay: Duration) -> Self {
        self.normal_delay = delay;
        self
    }

    /// Set the sweep interval. Zero disables the sweep.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncTimingConfig::default();
        assert_eq!(config.rapid_window, Duration::from_millis(200));
        assert_eq!(config.urgent_delay, Duration::from_millis(100));
        assert_eq!(config.normal_delay, Duration::from_millis(500));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_builders() {
        let config = SyncTimingConfig::default()
            .with_normal_delay(Duration::from_millis(750))
            .with_sweep_interval(Duration::from_secs(5));
        assert_eq!(config.normal_delay, Duration::from_millis(750));
        assert_eq!(config.sweep_interval, Duration::from_secs(5));
        assert_eq!(config.urgent_delay, DEFAULT_URGENT_DELAY);
    }
}
