//! Deserializes human readable durations such as `90m`, `2h` or `7d`.

use serde::{
    de::Error as _,
    Deserialize,
    Deserializer,
};
use std::time::Duration;

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(|e| D::Error::custom(format!("invalid duration {raw:?}: {e}")))
}
