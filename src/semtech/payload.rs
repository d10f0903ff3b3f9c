//! JSON payload of PUSH_DATA and PULL_RESP datagrams.
//!
//! Every scalar is optional: presence means the gateway measured or knows
//! the value, absence means unknown. Nothing is ever synthesized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encoding::{self, DataRate};

/// `{"rxpk":[...], "stat":{...}, "txpk":{...}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rxpk: Vec<Rxpk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat: Option<Stat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txpk: Option<Txpk>,
}

/// Rxpk (received packet) from gateway JSON payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rxpk {
    /// Concentrator IF channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chan: Option<u32>,
    /// LoRa coding rate (e.g., "4/5")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codr: Option<String>,
    /// Base64 encoded RF packet payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// "SF7BW125" for LoRa, bits per second for FSK
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datr: Option<DataRate>,
    /// Frequency in MHz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freq: Option<f64>,
    /// LoRa signal-to-noise ratio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsnr: Option<f64>,
    /// Modulation (LORA or FSK)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modu: Option<String>,
    /// RF chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfch: Option<u32>,
    /// RSSI in dBm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    /// RF packet payload size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    /// CRC status: 1 OK, -1 fail, 0 no CRC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat: Option<i32>,
    /// UTC time of packet reception
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

/// Txpk (packet to transmit) sent to the gateway in a PULL_RESP
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Txpk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datr: Option<DataRate>,
    /// FSK frequency deviation in Hz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fdev: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freq: Option<f64>,
    /// Send immediately, ignoring tmst and time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imme: Option<bool>,
    /// LoRa polarization inversion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipol: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modu: Option<String>,
    /// Disable the physical layer CRC
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "encoding::rfc3339"
    )]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmst: Option<u32>,
}

/// Gateway status report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    /// Percentage of upstream datagrams that were acknowledged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ackr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alti: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dwnb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lati: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rxfw: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rxnb: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rxok: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "encoding::stat_time"
    )]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txnb: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::parse_time;

    #[test]
    fn test_rxpk_fsk_datr_is_number() {
        let rxpk = Rxpk {
            modu: Some("FSK".into()),
            datr: Some(DataRate::Fsk(50000)),
            ..Default::default()
        };
        let json = serde_json::to_value(&rxpk).unwrap();
        assert_eq!(json["datr"], serde_json::json!(50000));
    }

    #[test]
    fn test_rxpk_lora_datr_is_string() {
        let rxpk = Rxpk {
            modu: Some("LORA".into()),
            datr: Some(DataRate::Lora("SF7BW125".into())),
            ..Default::default()
        };
        let json = serde_json::to_string(&rxpk).unwrap();
        assert_eq!(json, r#"{"datr":"SF7BW125","modu":"LORA"}"#);
    }

    #[test]
    fn test_absent_fields_stay_absent() {
        let json = serde_json::to_string(&Payload::default()).unwrap();
        assert_eq!(json, "{}");

        let rxpk: Rxpk = serde_json::from_str(r#"{"rssi":-35}"#).unwrap();
        assert_eq!(rxpk.rssi, Some(-35));
        assert_eq!(rxpk.freq, None);
        assert_eq!(rxpk.time, None);
    }

    #[test]
    fn test_stat_and_rxpk_time_layouts() {
        let t = parse_time("2016-02-03 10:11:12 GMT").unwrap();

        let stat = Stat {
            time: Some(t),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&stat).unwrap(),
            r#"{"time":"2016-02-03 10:11:12 GMT"}"#
        );

        let rxpk = Rxpk {
            time: Some(t),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&rxpk).unwrap(),
            r#"{"time":"2016-02-03T10:11:12Z"}"#
        );
    }

    #[test]
    fn test_decode_gateway_payload() {
        let raw = r#"{
            "rxpk":[{"time":"2013-03-31T16:21:17.528002Z","tmst":3512348611,"chan":2,
                     "rfch":0,"freq":866.349812,"stat":1,"modu":"LORA","datr":"SF7BW125",
                     "codr":"4/6","rssi":-35,"lsnr":5.1,"size":32,
                     "data":"-DS4CGaDCdG+48eJNM3Vai-zDpsR71Pn9CPA9uCON84"}],
            "stat":{"time":"2014-01-12 08:59:28 GMT","lati":46.24000,"long":3.25230,
                    "alti":145,"rxnb":2,"rxok":2,"rxfw":2,"ackr":100.0,"dwnb":2,"txnb":2}
        }"#;

        let payload: Payload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.rxpk.len(), 1);
        let rxpk = &payload.rxpk[0];
        assert_eq!(rxpk.tmst, Some(3512348611));
        assert_eq!(rxpk.datr, Some(DataRate::Lora("SF7BW125".into())));
        assert_eq!(rxpk.stat, Some(1));

        let stat = payload.stat.expect("stat present");
        assert_eq!(stat.alti, Some(145));
        assert_eq!(stat.time, Some(parse_time("2014-01-12T08:59:28Z").unwrap()));
    }

    #[test]
    fn test_bad_time_rejected() {
        assert!(serde_json::from_str::<Rxpk>(r#"{"time":"noon"}"#).is_err());
    }
}
