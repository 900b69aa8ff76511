//! Serde adapters for `chrono::Duration`.
//!
//! `chrono::Duration` does not implement serde; persisted durations travel
//! as whole seconds. Sub-second precision is not needed anywhere in the
//! persisted state (dose durations are multiples of the pulse interval).

use chrono::Duration;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Serializes a `Duration` as whole seconds (`i64`).
pub mod duration_secs {
    use super::{Deserialize, Deserializer, Duration, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        value.num_seconds().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(deserializer)?;
        Ok(Duration::seconds(secs))
    }
}

/// Serializes an `Option<Duration>` as optional whole seconds.
pub mod opt_duration_secs {
    use super::{Deserialize, Deserializer, Duration, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value.map(|d| d.num_seconds()).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<i64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::seconds))
    }
}
