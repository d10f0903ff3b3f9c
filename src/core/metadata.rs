//! Radio metadata attached to a packet as it crosses network components.
//!
//! Keys match the semtech JSON vocabulary so the same codec (including the
//! polymorphic `datr` and `time` fields) serves both worlds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::encoding::{self, DataRate};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// GPS altitude of the receiving gateway, in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alti: Option<i32>,
    /// Concentrator IF channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chan: Option<u32>,
    /// LoRa coding rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datr: Option<DataRate>,
    /// FSK frequency deviation in Hz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fdev: Option<u32>,
    /// Frequency in MHz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freq: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imme: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipol: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lati: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long: Option<f64>,
    /// LoRa signal-to-noise ratio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsnr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ncrc: Option<bool>,
    /// TX output power in dBm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub powe: Option<u32>,
    /// Preamble size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prea: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfch: Option<u32>,
    /// RSSI in dBm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    /// CRC status reported by the concentrator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat: Option<i32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "encoding::rfc3339"
    )]
    pub time: Option<DateTime<Utc>>,
    /// Concentrator timestamp (microseconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmst: Option<u32>,
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{?}"),
        }
    }
}
