use std::time::Duration;

use crate::{TimeResult, wheel::quantum_count_for};

pub const DEFAULT_MAX_TIME: Duration = Duration::from_secs(60);
pub const DEFAULT_RESOLUTION: Duration = Duration::from_millis(10);
pub const DEFAULT_THREAD_NAME: &str = "time-service";

/// Construction parameters of a [`TimeService`](crate::TimeService).
///
/// The wheel holds `ceil(max_time / resolution)` buckets, so memory and the
/// cost of a full pass grow with the ratio, not with the number of events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeServiceConfig {
    /// Longest timeout accepted by `activate`.
    pub max_time: Duration,
    /// Tick interval and shortest accepted timeout.
    pub resolution: Duration,
    /// Prefix of the producer and consumer thread names.
    pub thread_name: String,
}

impl Default for TimeServiceConfig {
    fn default() -> Self {
        Self {
            max_time: DEFAULT_MAX_TIME,
            resolution: DEFAULT_RESOLUTION,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
        }
    }
}

impl TimeServiceConfig {
    pub fn new(max_time: Duration, resolution: Duration) -> Self {
        Self {
            max_time,
            resolution,
            ..Self::default()
        }
    }

    // ============================================================
    // PRESETS
    // ============================================================

    /// 100ms resolution, 1 hour range. 36,000 buckets.
    /// Session expiry, idle connection reaping.
    pub fn coarse() -> Self {
        Self::new(Duration::from_secs(3600), Duration::from_millis(100))
    }

    /// 1ms resolution, 10 second range. 10,000 buckets.
    /// Request timeouts, retransmission.
    pub fn precise() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_millis(1))
    }

    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = max_time;
        self
    }

    pub fn with_resolution(mut self, resolution: Duration) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Reject a resolution that is zero, not below `max_time`, or so fine
    /// that the wheel would exceed [`MAX_QUANTUM_COUNT`](crate::MAX_QUANTUM_COUNT)
    /// buckets.
    pub fn validate(&self) -> TimeResult<()> {
        quantum_count_for(self.max_time, self.resolution).map(drop)
    }

    /// Bucket count of the wheel built from this config. Saturates at
    /// `usize::MAX` for an invalid config.
    pub fn quantum_count(&self) -> usize {
        let count = self
            .max_time
            .as_nanos()
            .div_ceil(self.resolution.as_nanos().max(1));
        usize::try_from(count).unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MAX_QUANTUM_COUNT, TimeError};

    #[test]
    fn test_default_is_valid() {
        let config = TimeServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quantum_count(), 6000);
        assert_eq!(config.thread_name, "time-service");
    }

    #[test]
    fn test_presets_are_valid() {
        for config in [TimeServiceConfig::coarse(), TimeServiceConfig::precise()] {
            assert!(config.validate().is_ok(), "{config:?}");
        }
        assert_eq!(TimeServiceConfig::coarse().quantum_count(), 36_000);
        assert_eq!(TimeServiceConfig::precise().quantum_count(), 10_000);
    }

    #[test]
    fn test_builder_setters() {
        let config = TimeServiceConfig::default()
            .with_max_time(Duration::from_secs(2))
            .with_resolution(Duration::from_millis(300))
            .with_thread_name("wheel");

        assert_eq!(config.quantum_count(), 7);
        assert_eq!(config.thread_name, "wheel");
    }

    #[test]
    fn test_validate_rejects_resolution_at_or_above_max_time() {
        let equal = TimeServiceConfig::new(Duration::from_millis(100), Duration::from_millis(100));
        let above = TimeServiceConfig::new(Duration::from_millis(100), Duration::from_millis(150));
        let zero = TimeServiceConfig::new(Duration::from_millis(100), Duration::ZERO);

        for config in [equal, above, zero] {
            assert!(matches!(
                config.validate(),
                Err(TimeError::InvalidConfig { .. })
            ));
        }
    }

    #[test]
    fn test_validate_rejects_oversized_wheel() {
        let config = TimeServiceConfig::new(Duration::from_secs(3600), Duration::from_nanos(1));

        assert!(matches!(
            config.validate(),
            Err(TimeError::WheelTooLarge { limit: MAX_QUANTUM_COUNT, .. })
        ));
        assert_eq!(config.quantum_count(), 3_600_000_000_000);
    }
}
