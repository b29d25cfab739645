//! Manager configuration.
//!
//! The manager does not load configuration itself; the enclosing process
//! deserializes a [`ManagerConfig`] (all fields default) and passes it in.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What `submit` does when another operation with the same resource key is
/// still queued or running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Accept the submission; duplicates run independently.
    #[default]
    Allow,
    /// Fail the submission with `DuplicateInFlight`.
    Reject,
    /// Return the id of the operation already in flight.
    Coalesce,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Maximum number of operations in `running` state at once. Zero is
    /// treated as one.
    pub max_concurrent: usize,

    /// How long terminal records are kept before being pruned. Configured
    /// as `retention_secs`; fractional seconds are accepted.
    #[serde(rename = "retention_secs", with = "secs")]
    pub retention: Duration,

    /// Default maximum duration of a single operation. `None` or zero means
    /// unlimited. Configured as `default_timeout_secs`.
    #[serde(rename = "default_timeout_secs", with = "optional_secs")]
    pub default_timeout: Option<Duration>,

    /// Bound on queued (not yet running) operations. `None` = unbounded.
    pub max_queued: Option<usize>,

    /// Interval of the background prune sweep.
    pub prune_interval_secs: u64,

    pub duplicate_policy: DuplicatePolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            retention: Duration::from_secs(3600),
            default_timeout: Some(Duration::from_secs(600)),
            max_queued: None,
            prune_interval_secs: 60,
            duplicate_policy: DuplicatePolicy::Allow,
        }
    }
}

impl ManagerConfig {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_max_queued(mut self, max_queued: Option<usize>) -> Self {
        self.max_queued = max_queued;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent.max(1)
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout.filter(|timeout| !timeout.is_zero())
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs.max(1))
    }
}

/// Durations as (possibly fractional) seconds on the serde surface.
mod secs {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() == 0 {
            serializer.serialize_u64(value.as_secs())
        } else {
            serializer.serialize_f64(value.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        deserializer.deserialize_any(SecondsVisitor)
    }

    struct SecondsVisitor;

    impl<'de> Visitor<'de> for SecondsVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a non-negative number of seconds")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| E::custom(format!("negative duration: {}", value)))
        }

        fn visit_f64<E: de::Error>(self, value: f64) -> Result<Duration, E> {
            Duration::try_from_secs_f64(value)
                .map_err(|_| E::custom(format!("invalid duration: {}", value)))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            let seconds: f64 = value
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid duration: {:?}", value)))?;
            self.visit_f64(seconds)
        }
    }
}

mod optional_secs {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => super::secs::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        deserializer.deserialize_option(OptionalSecondsVisitor)
    }

    struct OptionalSecondsVisitor;

    impl<'de> Visitor<'de> for OptionalSecondsVisitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a non-negative number of seconds or nothing")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
            super::secs::deserialize(deserializer).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.concurrency_limit(), 2);
        assert_eq!(config.retention(), Duration::from_secs(3600));
        assert_eq!(config.default_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.max_queued, None);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Allow);
    }

    #[test]
    fn test_zero_values_are_clamped() {
        let config = ManagerConfig {
            max_concurrent: 0,
            default_timeout: Some(Duration::ZERO),
            prune_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.concurrency_limit(), 1);
        assert_eq!(config.default_timeout(), None);
        assert_eq!(config.prune_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_deserialization() {
        let config: ManagerConfig = serde_json::from_value(json!({
            "max_concurrent": 4,
            "duplicate_policy": "coalesce"
        }))
        .unwrap();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Coalesce);
        assert_eq!(config.retention(), Duration::from_secs(3600));
    }

    #[test]
    fn test_builders_keep_sub_second_durations() {
        let config = ManagerConfig::default()
            .with_retention(Duration::from_millis(900))
            .with_default_timeout(Some(Duration::from_millis(500)));
        assert_eq!(config.retention(), Duration::from_millis(900));
        assert_eq!(config.default_timeout(), Some(Duration::from_millis(500)));

        let unlimited = ManagerConfig::default().with_default_timeout(None);
        assert_eq!(unlimited.default_timeout(), None);
    }

    #[test]
    fn test_seconds_surface() {
        let config: ManagerConfig = serde_json::from_value(json!({
            "retention_secs": 1.5,
            "default_timeout_secs": 30
        }))
        .unwrap();
        assert_eq!(config.retention(), Duration::from_millis(1500));
        assert_eq!(config.default_timeout(), Some(Duration::from_secs(30)));

        let config: ManagerConfig =
            serde_json::from_value(json!({ "default_timeout_secs": null })).unwrap();
        assert_eq!(config.default_timeout(), None);

        let rendered = serde_json::to_value(
            ManagerConfig::default().with_retention(Duration::from_millis(250)),
        )
        .unwrap();
        assert_eq!(rendered["retention_secs"], json!(0.25));
        assert_eq!(rendered["default_timeout_secs"], json!(600));

        assert!(serde_json::from_value::<ManagerConfig>(json!({ "retention_secs": -1 })).is_err());
    }
}
