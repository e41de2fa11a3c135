//! Flush configuration.
//!
//! [`FlushConfig`] is fixed when an engine is built and never changes for the
//! lifetime of that engine. It can be assembled with the builder methods or
//! loaded from JSON:
//!
//! ```rust
//! use incrementi::config::FlushConfig;
//! use std::time::Duration;
//!
//! let config = FlushConfig::new(Duration::from_secs(2)).with_max_in_flight(8);
//! assert!(config.validate().is_ok());
//!
//! let loaded = FlushConfig::from_json(r#"{ "flush_interval_ms": 2000, "max_in_flight": 8 }"#).unwrap();
//! assert_eq!(loaded, config);
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Immutable settings of one engine instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Period between scheduled drain cycles. Must be positive.
    #[serde(rename = "flush_interval_ms", with = "duration_millis")]
    pub flush_interval: Duration,

    /// Maximum number of keys drained concurrently within one cycle.
    pub max_in_flight: usize,

    /// Whether shutdown runs one last drain after stopping the timer.
    pub final_drain_on_shutdown: bool,
}

impl FlushConfig {
    /// Creates a configuration with the given flush interval and defaults
    /// for everything else.
    pub fn new(flush_interval: Duration) -> Self {
        Self {
            flush_interval,
            ..Self::default()
        }
    }

    /// Sets the per-cycle key concurrency.
    pub fn with_max_in_flight(self, max_in_flight: usize) -> Self {
        Self {
            max_in_flight,
            ..self
        }
    }

    /// Sets whether shutdown performs a final drain.
    pub fn with_final_drain_on_shutdown(self, final_drain_on_shutdown: bool) -> Self {
        Self {
            final_drain_on_shutdown,
            ..self
        }
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the interval and concurrency are positive and that the
    /// interval fits both the clock and its millisecond encoding.
    pub fn validate(&self) -> Result<()> {
        if self.flush_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "flush interval must be positive".to_string(),
            ));
        }
        if u64::try_from(self.flush_interval.as_millis()).is_err() {
            return Err(Error::InvalidConfig(format!(
                "flush interval {:?} does not fit in u64 milliseconds",
                self.flush_interval
            )));
        }
        if Instant::now().checked_add(self.flush_interval).is_none() {
            return Err(Error::InvalidConfig(format!(
                "flush interval {:?} overflows the clock",
                self.flush_interval
            )));
        }
        if self.max_in_flight == 0 {
            return Err(Error::InvalidConfig(
                "max_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            final_drain_on_shutdown: true,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CENTURY: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

    #[test]
    fn test_default() {
        let config = FlushConfig::default();
        assert_eq!(config.flush_interval, Duration::from_secs(5));
        assert_eq!(config.max_in_flight, 16);
        assert!(config.final_drain_on_shutdown);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = FlushConfig::new(Duration::from_millis(250))
            .with_max_in_flight(2)
            .with_final_drain_on_shutdown(false);
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.max_in_flight, 2);
        assert!(!config.final_drain_on_shutdown);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = FlushConfig::new(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_unbounded_interval_rejected() {
        let config = FlushConfig::new(Duration::MAX);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = FlushConfig::new(Duration::from_secs(u64::MAX / 500));
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_century_interval_accepted() {
        let config = FlushConfig::new(CENTURY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = FlushConfig::default().with_max_in_flight(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_from_json_partial() {
        let config = FlushConfig::from_json(r#"{ "flush_interval_ms": 2000 }"#).unwrap();
        assert_eq!(config.flush_interval, Duration::from_secs(2));
        assert_eq!(config.max_in_flight, 16);
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(matches!(
            FlushConfig::from_json(r#"{ "flush_interval_ms": 0 }"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            FlushConfig::from_json(r#"{ "flush_interval_ms": "soon" }"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_serialize_uses_millis() {
        let config = FlushConfig::new(Duration::from_millis(1500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["flush_interval_ms"], 1500);
    }

    #[test]
    fn test_serialize_rejects_oversized_interval() {
        let config = FlushConfig::new(Duration::from_secs(u64::MAX / 500));
        assert!(serde_json::to_string(&config).is_err());
    }

    #[test]
    fn test_json_round_trip_keeps_interval() {
        let config = FlushConfig::new(CENTURY + Duration::from_millis(7)).with_max_in_flight(3);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(FlushConfig::from_json(&json).unwrap(), config);
    }
}
