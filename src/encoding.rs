//! JSON representations for the two radio metadata fields whose wire type
//! depends on context: the data rate and the timestamps.
//!
//! The data rate is a JSON string for LoRa (`"SF7BW125"`) and a bare JSON
//! number for FSK (`50000`). Timestamps are accepted in three textual layouts
//! and emitted in one of two canonical layouts depending on the record that
//! carries them.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{Error, Result};

/// Modulation identifier used by gateways for LoRa frames.
pub const MODULATION_LORA: &str = "LORA";
/// Modulation identifier used by gateways for FSK frames.
pub const MODULATION_FSK: &str = "FSK";

/// Radio data rate, tagged by the JSON shape it travels in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRate {
    /// LoRa datarate identifier, e.g. `SF7BW125`. Serialized as a JSON string.
    Lora(String),
    /// FSK bit rate in bits per second. Serialized as a bare JSON number.
    Fsk(u32),
}

impl DataRate {
    /// Build a data rate from its textual form, tagged by the modulation it
    /// belongs to.
    pub fn for_modulation(modulation: Option<&str>, value: &str) -> Result<Self> {
        match modulation {
            Some(MODULATION_FSK) => value
                .parse::<u32>()
                .map(DataRate::Fsk)
                .map_err(|_| Error::structural(format!("invalid FSK datarate: {value}"))),
            _ => Ok(DataRate::Lora(value.to_string())),
        }
    }

    /// Re-tag the data rate so its JSON shape matches `modulation`.
    ///
    /// A value that cannot be represented in the other shape is kept as is.
    pub fn with_modulation(self, modulation: Option<&str>) -> Self {
        match (modulation, self) {
            (Some(MODULATION_FSK), DataRate::Lora(s)) => match s.parse::<u32>() {
                Ok(bps) => DataRate::Fsk(bps),
                Err(_) => DataRate::Lora(s),
            },
            (Some(MODULATION_LORA), DataRate::Fsk(bps)) => DataRate::Lora(bps.to_string()),
            (_, datr) => datr,
        }
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataRate::Lora(s) => write!(f, "{}", s),
            DataRate::Fsk(bps) => write!(f, "{}", bps),
        }
    }
}

impl Serialize for DataRate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            DataRate::Lora(s) => serializer.serialize_str(s),
            DataRate::Fsk(bps) => serializer.serialize_u32(*bps),
        }
    }
}

struct DataRateVisitor;

impl<'de> Visitor<'de> for DataRateVisitor {
    type Value = DataRate;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a datarate string or an FSK bit rate")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<DataRate, E> {
        Ok(DataRate::Lora(v.to_string()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<DataRate, E> {
        u32::try_from(v)
            .map(DataRate::Fsk)
            .map_err(|_| E::custom(format!("FSK datarate out of range: {v}")))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<DataRate, E> {
        u32::try_from(v)
            .map(DataRate::Fsk)
            .map_err(|_| E::custom(format!("FSK datarate out of range: {v}")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<DataRate, E> {
        if v.fract() == 0.0 && v >= 0.0 && v <= u32::MAX as f64 {
            Ok(DataRate::Fsk(v as u32))
        } else {
            Err(E::custom(format!("FSK datarate must be integral: {v}")))
        }
    }
}

impl<'de> Deserialize<'de> for DataRate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(DataRateVisitor)
    }
}

/// Layout used for the `time` field of gateway status records.
pub const STAT_TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S GMT";

/// Parse a timestamp in any accepted layout, in order: the space separated
/// status layout, RFC-3339, then RFC-3339 with nanoseconds and no offset.
pub fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();

    let spaced = trimmed
        .strip_suffix(" GMT")
        .or_else(|| trimmed.strip_suffix(" UTC"))
        .unwrap_or(trimmed);
    if let Ok(naive) = NaiveDateTime::parse_from_str(spaced, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(t) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(t.with_timezone(&Utc));
    }

    let bare = trimmed.strip_suffix('Z').unwrap_or(trimmed);
    NaiveDateTime::parse_from_str(bare, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| Error::structural(format!("unrecognized time layout: {raw}")))
}

/// Canonical layout for RXPK/TXPK and metadata timestamps.
pub fn format_rfc3339(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Canonical layout for gateway status timestamps.
pub fn format_stat_time(t: &DateTime<Utc>) -> String {
    t.format(STAT_TIME_LAYOUT).to_string()
}

fn deserialize_time<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) => parse_time(&raw).map(Some).map_err(de::Error::custom),
        None => Ok(None),
    }
}

/// `#[serde(with)]` adapter for optional RFC-3339 timestamps.
pub mod rfc3339 {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(t) => serializer.serialize_str(&format_rfc3339(t)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
        deserialize_time(deserializer)
    }
}

/// `#[serde(with)]` adapter for optional status-record timestamps.
pub mod stat_time {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(t) => serializer.serialize_str(&format_stat_time(t)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
        deserialize_time(deserializer)
    }
}
