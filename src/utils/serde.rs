/*!
 * Serde utilities for durations.
 *
 * Persisted documents store durations as whole milliseconds so the JSON stays
 * readable and stable across serde versions.
 */

/// `std::time::Duration` as integer milliseconds.
///
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
///
/// #[derive(Serialize, Deserialize)]
/// struct Timing {
///     #[serde(with = "shipyard_core::utils::serde::duration_millis")]
///     elapsed: Duration,
/// }
/// ```
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// `BTreeMap<String, Duration>` with millisecond values.
pub mod duration_map_millis {
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::BTreeMap;
    use std::time::Duration;

    pub fn serialize<S>(map: &BTreeMap<String, Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut out = serializer.serialize_map(Some(map.len()))?;
        for (key, value) in map {
            out.serialize_entry(key, &(value.as_millis() as u64))?;
        }
        out.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, u64>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .map(|(key, millis)| (key, Duration::from_millis(millis)))
            .collect())
    }
}
