//! Entity records and the input/patch shapes accepted by lifecycle operations.
//!
//! Records serialize with camelCase keys, the wire format clients consume.
//! Enum values serialize as their lowercase display strings (`"in progress"`,
//! `"on hold"`), matching the `CHECK` constraints in the store schema.

pub mod notification;
pub mod phase;
pub mod project;
pub mod request;
pub mod task;

use serde::{Deserialize, Deserializer};
use std::fmt;

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

/// Deserialize a nullable patch field so that an explicit `null` becomes
/// `Some(None)` while a missing key stays `None` (via `#[serde(default)]`).
pub(crate) fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Current wall-clock time in microseconds since the Unix epoch.
#[must_use]
pub fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}
