//! Field mapping between semtech records and core packets.
//!
//! Only fields that exist on both sides are copied. Everything else is
//! dropped on the floor: the mapping is a projection, not a transform.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use crate::core::{Metadata, RouterPacket};
use crate::error::{Error, Result};
use crate::lorawan::{self, Eui64};
use crate::semtech::{Rxpk, Txpk};

/// Standard alphabet; padding is emitted but optional when decoding, since
/// some forwarders strip it.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Metadata measured by the gateway for one received frame.
pub fn rxpk_to_metadata(rxpk: &Rxpk) -> Metadata {
    Metadata {
        chan: rxpk.chan,
        codr: rxpk.codr.clone(),
        datr: rxpk
            .datr
            .clone()
            .map(|d| d.with_modulation(rxpk.modu.as_deref())),
        freq: rxpk.freq,
        lsnr: rxpk.lsnr,
        modu: rxpk.modu.clone(),
        rfch: rxpk.rfch,
        rssi: rxpk.rssi,
        size: rxpk.size,
        stat: rxpk.stat,
        time: rxpk.time,
        tmst: rxpk.tmst,
        ..Default::default()
    }
}

/// Transmission parameters of a downlink, without its data.
pub fn metadata_to_txpk(metadata: &Metadata) -> Txpk {
    Txpk {
        codr: metadata.codr.clone(),
        datr: metadata
            .datr
            .clone()
            .map(|d| d.with_modulation(metadata.modu.as_deref())),
        fdev: metadata.fdev,
        freq: metadata.freq,
        imme: metadata.imme,
        ipol: metadata.ipol,
        modu: metadata.modu.clone(),
        ncrc: metadata.ncrc,
        powe: metadata.powe,
        prea: metadata.prea,
        rfch: metadata.rfch,
        size: metadata.size,
        time: metadata.time,
        tmst: metadata.tmst,
        data: None,
    }
}

/// Decode the base64 frame of `rxpk` into a router packet heard by `gateway_id`.
pub fn rxpk_to_router_packet(rxpk: &Rxpk, gateway_id: Eui64) -> Result<RouterPacket> {
    let data = rxpk
        .data
        .as_deref()
        .ok_or_else(|| Error::structural("rxpk without data"))?;
    let raw = BASE64
        .decode(data)
        .map_err(|e| Error::structural(format!("invalid rxpk data: {e}")))?;
    let phy = lorawan::decode_phy_payload(&raw)?;
    RouterPacket::new(gateway_id, phy, rxpk_to_metadata(rxpk))
}

/// Build the txpk that carries `packet` to its gateway.
pub fn router_packet_to_txpk(packet: &RouterPacket) -> Result<Txpk> {
    let raw = packet.payload().to_bytes()?;
    let mut txpk = metadata_to_txpk(packet.metadata());
    txpk.size = Some(raw.len() as u32);
    txpk.data = Some(BASE64.encode(&raw));
    Ok(txpk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{parse_time, DataRate};
    use crate::error::ErrorKind;
    use crate::lorawan::{MType, PhyPayload};

    const GW: Eui64 = Eui64([1, 2, 3, 4, 5, 6, 7, 8]);

    fn uplink_bytes() -> Vec<u8> {
        PhyPayload::new_data(MType::ConfirmedDataUp, 0x26011BDA, 1, 1, vec![0xAA, 0xBB, 0xCC])
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn test_rxpk_fields_copied() {
        let rxpk = Rxpk {
            chan: Some(2),
            codr: Some("4/5".into()),
            datr: Some(DataRate::Lora("SF9BW125".into())),
            freq: Some(868.3),
            lsnr: Some(7.5),
            modu: Some("LORA".into()),
            rfch: Some(1),
            rssi: Some(-57),
            size: Some(14),
            stat: Some(1),
            time: Some(parse_time("2016-01-01T10:00:00Z").unwrap()),
            tmst: Some(123456),
            data: Some("ignored".into()),
        };

        let m = rxpk_to_metadata(&rxpk);
        assert_eq!(m.chan, Some(2));
        assert_eq!(m.codr.as_deref(), Some("4/5"));
        assert_eq!(m.datr, Some(DataRate::Lora("SF9BW125".into())));
        assert_eq!(m.freq, Some(868.3));
        assert_eq!(m.lsnr, Some(7.5));
        assert_eq!(m.rfch, Some(1));
        assert_eq!(m.rssi, Some(-57));
        assert_eq!(m.size, Some(14));
        assert_eq!(m.stat, Some(1));
        assert_eq!(m.time, rxpk.time);
        assert_eq!(m.tmst, Some(123456));
        // Not measured by the gateway
        assert_eq!(m.alti, None);
        assert_eq!(m.powe, None);
    }

    #[test]
    fn test_fsk_datr_retagged() {
        let rxpk = Rxpk {
            modu: Some("FSK".into()),
            datr: Some(DataRate::Lora("50000".into())),
            ..Default::default()
        };
        assert_eq!(rxpk_to_metadata(&rxpk).datr, Some(DataRate::Fsk(50000)));

        let m = Metadata {
            modu: Some("FSK".into()),
            datr: Some(DataRate::Lora("50000".into())),
            fdev: Some(25000),
            ..Default::default()
        };
        let json = serde_json::to_value(metadata_to_txpk(&m)).unwrap();
        assert_eq!(json["datr"], serde_json::json!(50000));
        assert_eq!(json["fdev"], serde_json::json!(25000));
    }

    #[test]
    fn test_metadata_to_txpk_drops_receive_only_fields() {
        let m = Metadata {
            rssi: Some(-40),
            lsnr: Some(9.0),
            chan: Some(3),
            powe: Some(14),
            imme: Some(true),
            ..Default::default()
        };
        let txpk = metadata_to_txpk(&m);
        assert_eq!(txpk.powe, Some(14));
        assert_eq!(txpk.imme, Some(true));
        assert_eq!(
            serde_json::to_string(&txpk).unwrap(),
            r#"{"imme":true,"powe":14}"#
        );
    }

    #[test]
    fn test_rxpk_to_router_packet() {
        let raw = uplink_bytes();
        let rxpk = Rxpk {
            rssi: Some(-20),
            data: Some(BASE64.encode(&raw)),
            ..Default::default()
        };

        let packet = rxpk_to_router_packet(&rxpk, GW).unwrap();
        assert_eq!(packet.gateway_id(), GW);
        assert_eq!(packet.metadata().rssi, Some(-20));
        assert_eq!(packet.payload().to_bytes().unwrap(), raw);
    }

    #[test]
    fn test_unpadded_base64_accepted() {
        let raw = uplink_bytes();
        let unpadded = BASE64.encode(&raw).trim_end_matches('=').to_string();
        let rxpk = Rxpk {
            data: Some(unpadded),
            ..Default::default()
        };
        assert!(rxpk_to_router_packet(&rxpk, GW).is_ok());
    }

    #[test]
    fn test_bad_rxpk_data_is_structural() {
        let missing = Rxpk::default();
        let err = rxpk_to_router_packet(&missing, GW).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);

        let garbage = Rxpk {
            data: Some("!!not base64!!".into()),
            ..Default::default()
        };
        let err = rxpk_to_router_packet(&garbage, GW).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);
    }

    #[test]
    fn test_router_packet_to_txpk() {
        let phy = PhyPayload::new_data(MType::UnconfirmedDataDown, 0x26011BDA, 5, 2, vec![1, 2, 3]);
        let metadata = Metadata {
            freq: Some(869.525),
            powe: Some(27),
            modu: Some("LORA".into()),
            datr: Some(DataRate::Lora("SF9BW125".into())),
            tmst: Some(1_000_000),
            ..Default::default()
        };
        let packet = RouterPacket::new(GW, phy.clone(), metadata).unwrap();

        let txpk = router_packet_to_txpk(&packet).unwrap();
        let raw = phy.to_bytes().unwrap();
        assert_eq!(txpk.size, Some(raw.len() as u32));
        assert_eq!(txpk.data, Some(BASE64.encode(&raw)));
        assert!(txpk.data.as_deref().unwrap().ends_with('='));
        assert_eq!(txpk.freq, Some(869.525));
        assert_eq!(txpk.powe, Some(27));
        assert_eq!(txpk.tmst, Some(1_000_000));
    }
}
