//! The six packet variants exchanged by router, broker and handler tiers.
//!
//! Each variant owns the components it is made of and lists them in a fixed
//! order when marshaling:
//!
//! | variant      | components                                   |
//! |--------------|----------------------------------------------|
//! | router       | gateway id, metadata, frame                  |
//! | broker       | metadata, frame                              |
//! | handler      | identifiers, metadata, frame                 |
//! | application  | identifiers, payload, metadata list          |
//! | join request | identifiers, device nonce, metadata          |
//! | join accept  | identifiers, payload, network session key    |

use std::fmt;

use super::components::{Component, Identifiers, MacFrame, Reader, Writer};
use super::metadata::Metadata;
use super::{Kind, Packet};
use crate::error::{Error, Result};
use crate::lorawan::{keys, parse_mac_commands, AesKey, Eui64, MacCommand, PhyPayload};

/// Frame counters travel truncated to 16 bits.
const FCNT_UPPER: i64 = 1 << 16;

/// Reconstruct a full frame counter from its truncated on-air value.
///
/// The truncated value is expected at most a quarter of the 16-bit window
/// ahead of `whole`; anything further is treated as a desync or a replay.
pub fn compute_fcnt(whole: u32, truncated: u16) -> Result<u32> {
    let diff = truncated as i64 - (whole as i64 % FCNT_UPPER);
    let offset = if diff >= 0 { diff } else { FCNT_UPPER + diff };
    if offset > FCNT_UPPER / 4 {
        return Err(Error::behavioral(format!(
            "frame counter gap too large: {} after {}",
            truncated, whole
        )));
    }
    u32::try_from(whole as i64 + offset)
        .map_err(|_| Error::behavioral(format!("frame counter overflow after {}", whole)))
}

/// Uplink as seen by a router: which gateway heard it and how.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterPacket {
    gateway_id: Eui64,
    metadata: Metadata,
    frame: MacFrame,
}

impl RouterPacket {
    pub fn new(gateway_id: Eui64, payload: PhyPayload, metadata: Metadata) -> Result<Self> {
        Ok(Self {
            gateway_id,
            metadata,
            frame: MacFrame::new(payload)?,
        })
    }

    pub fn gateway_id(&self) -> Eui64 {
        self.gateway_id
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn payload(&self) -> PhyPayload {
        self.frame.to_phy()
    }
}

impl Packet for RouterPacket {
    fn kind(&self) -> Kind {
        Kind::Router
    }

    fn dev_eui(&self) -> Eui64 {
        self.frame.dev_eui()
    }

    fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new(Kind::Router as u8);
        self.gateway_id.marshal(&mut w)?;
        self.metadata.marshal(&mut w)?;
        self.frame.marshal(&mut w)?;
        Ok(w.finish())
    }

    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, Kind::Router as u8)?;
        let packet = Self {
            gateway_id: Eui64::unmarshal(&mut r)?,
            metadata: Metadata::unmarshal(&mut r)?,
            frame: MacFrame::unmarshal(&mut r)?,
        };
        r.finish()?;
        Ok(packet)
    }
}

impl fmt::Display for RouterPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RouterPacket<gateway={} metadata={} frame={}>",
            self.gateway_id, self.metadata, self.frame
        )
    }
}

/// Frame on its way through the broker, where integrity and counters are
/// checked against the device session.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerPacket {
    metadata: Metadata,
    frame: MacFrame,
}

impl BrokerPacket {
    pub fn new(payload: PhyPayload, metadata: Metadata) -> Result<Self> {
        Ok(Self {
            metadata,
            frame: MacFrame::new(payload)?,
        })
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn payload(&self) -> PhyPayload {
        self.frame.to_phy()
    }

    /// Check the frame MIC against `key`, using the frame counter currently
    /// held (see [`BrokerPacket::compute_fcnt`]).
    pub fn validate_mic(&self, key: &AesKey) -> Result<bool> {
        let phy = self.frame.to_phy();
        let mac = self.frame.mac();
        let expected = keys::data_mic(
            key,
            &phy.body_bytes()?,
            mac.fhdr.dev_addr,
            mac.fhdr.fcnt,
            self.frame.is_uplink(),
        )?;
        Ok(expected == self.frame.mic())
    }

    /// Reconcile the on-air counter with the last known full counter and
    /// keep the result for MIC validation.
    pub fn compute_fcnt(&mut self, whole: u32) -> Result<u32> {
        let truncated = self.frame.mac().fhdr.fcnt as u16;
        let fcnt = compute_fcnt(whole, truncated)?;
        self.frame.set_fcnt(fcnt);
        Ok(fcnt)
    }

    /// MAC commands piggybacked in FOpts.
    pub fn commands(&self) -> Result<Vec<MacCommand>> {
        parse_mac_commands(&self.frame.mac().fhdr.f_opts, self.frame.is_uplink())
    }
}

impl Packet for BrokerPacket {
    fn kind(&self) -> Kind {
        Kind::Broker
    }

    fn dev_eui(&self) -> Eui64 {
        self.frame.dev_eui()
    }

    fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new(Kind::Broker as u8);
        self.metadata.marshal(&mut w)?;
        self.frame.marshal(&mut w)?;
        Ok(w.finish())
    }

    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, Kind::Broker as u8)?;
        let packet = Self {
            metadata: Metadata::unmarshal(&mut r)?,
            frame: MacFrame::unmarshal(&mut r)?,
        };
        r.finish()?;
        Ok(packet)
    }
}

impl fmt::Display for BrokerPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BrokerPacket<metadata={} frame={}>",
            self.metadata, self.frame
        )
    }
}

/// Frame attributed to a device, ready for application decryption.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerPacket {
    ids: Identifiers,
    metadata: Metadata,
    frame: MacFrame,
}

impl HandlerPacket {
    pub fn new(
        app_eui: Eui64,
        dev_eui: Eui64,
        payload: PhyPayload,
        metadata: Metadata,
    ) -> Result<Self> {
        Ok(Self {
            ids: Identifiers { app_eui, dev_eui },
            metadata,
            frame: MacFrame::new(payload)?,
        })
    }

    pub fn app_eui(&self) -> Eui64 {
        self.ids.app_eui
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn phy_payload(&self) -> PhyPayload {
        self.frame.to_phy()
    }

    /// Decrypted FRMPayload. `key` is the AppSKey, or the NwkSKey for
    /// port 0 frames.
    pub fn payload(&self, key: &AesKey) -> Result<Vec<u8>> {
        let mac = self.frame.mac();
        if mac.f_port.is_none() {
            return Ok(vec![]);
        }
        Ok(keys::crypt_frm_payload(
            key,
            self.frame.is_uplink(),
            mac.fhdr.dev_addr,
            mac.fhdr.fcnt,
            &mac.frm_payload,
        ))
    }
}

impl Packet for HandlerPacket {
    fn kind(&self) -> Kind {
        Kind::Handler
    }

    fn dev_eui(&self) -> Eui64 {
        self.ids.dev_eui
    }

    fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new(Kind::Handler as u8);
        self.ids.marshal(&mut w)?;
        self.metadata.marshal(&mut w)?;
        self.frame.marshal(&mut w)?;
        Ok(w.finish())
    }

    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, Kind::Handler as u8)?;
        let packet = Self {
            ids: Identifiers::unmarshal(&mut r)?,
            metadata: Metadata::unmarshal(&mut r)?,
            frame: MacFrame::unmarshal(&mut r)?,
        };
        r.finish()?;
        Ok(packet)
    }
}

impl fmt::Display for HandlerPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HandlerPacket<app={} dev={} metadata={} frame={}>",
            self.ids.app_eui, self.ids.dev_eui, self.metadata, self.frame
        )
    }
}

/// Decrypted application data with the metadata of every gateway that
/// contributed a copy.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationPacket {
    ids: Identifiers,
    payload: Vec<u8>,
    metadata: Vec<Metadata>,
}

impl ApplicationPacket {
    pub fn new(app_eui: Eui64, dev_eui: Eui64, payload: Vec<u8>, metadata: Vec<Metadata>) -> Self {
        Self {
            ids: Identifiers { app_eui, dev_eui },
            payload,
            metadata,
        }
    }

    pub fn app_eui(&self) -> Eui64 {
        self.ids.app_eui
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn metadata(&self) -> &[Metadata] {
        &self.metadata
    }
}

impl Packet for ApplicationPacket {
    fn kind(&self) -> Kind {
        Kind::Application
    }

    fn dev_eui(&self) -> Eui64 {
        self.ids.dev_eui
    }

    fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new(Kind::Application as u8);
        self.ids.marshal(&mut w)?;
        self.payload.marshal(&mut w)?;
        self.metadata.marshal(&mut w)?;
        Ok(w.finish())
    }

    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, Kind::Application as u8)?;
        let packet = Self {
            ids: Identifiers::unmarshal(&mut r)?,
            payload: Vec::<u8>::unmarshal(&mut r)?,
            metadata: Vec::<Metadata>::unmarshal(&mut r)?,
        };
        r.finish()?;
        Ok(packet)
    }
}

impl fmt::Display for ApplicationPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ApplicationPacket<app={} dev={} payload={} gateways={}>",
            self.ids.app_eui,
            self.ids.dev_eui,
            hex::encode_upper(&self.payload),
            self.metadata.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequestPacket {
    ids: Identifiers,
    dev_nonce: [u8; 2],
    metadata: Metadata,
}

impl JoinRequestPacket {
    pub fn new(app_eui: Eui64, dev_eui: Eui64, dev_nonce: [u8; 2], metadata: Metadata) -> Self {
        Self {
            ids: Identifiers { app_eui, dev_eui },
            dev_nonce,
            metadata,
        }
    }

    pub fn app_eui(&self) -> Eui64 {
        self.ids.app_eui
    }

    pub fn dev_nonce(&self) -> [u8; 2] {
        self.dev_nonce
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl Packet for JoinRequestPacket {
    fn kind(&self) -> Kind {
        Kind::JoinRequest
    }

    fn dev_eui(&self) -> Eui64 {
        self.ids.dev_eui
    }

    fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new(Kind::JoinRequest as u8);
        self.ids.marshal(&mut w)?;
        self.dev_nonce.marshal(&mut w)?;
        self.metadata.marshal(&mut w)?;
        Ok(w.finish())
    }

    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, Kind::JoinRequest as u8)?;
        let packet = Self {
            ids: Identifiers::unmarshal(&mut r)?,
            dev_nonce: <[u8; 2]>::unmarshal(&mut r)?,
            metadata: Metadata::unmarshal(&mut r)?,
        };
        r.finish()?;
        Ok(packet)
    }
}

impl fmt::Display for JoinRequestPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JoinRequestPacket<app={} dev={} nonce={} metadata={}>",
            self.ids.app_eui,
            self.ids.dev_eui,
            hex::encode_upper(self.dev_nonce),
            self.metadata
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinAcceptPacket {
    ids: Identifiers,
    payload: Vec<u8>,
    nwk_s_key: AesKey,
}

impl JoinAcceptPacket {
    pub fn new(app_eui: Eui64, dev_eui: Eui64, payload: Vec<u8>, nwk_s_key: AesKey) -> Self {
        Self {
            ids: Identifiers { app_eui, dev_eui },
            payload,
            nwk_s_key,
        }
    }

    pub fn app_eui(&self) -> Eui64 {
        self.ids.app_eui
    }

    /// Encrypted join accept frame
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn nwk_s_key(&self) -> &AesKey {
        &self.nwk_s_key
    }
}

impl Packet for JoinAcceptPacket {
    fn kind(&self) -> Kind {
        Kind::JoinAccept
    }

    fn dev_eui(&self) -> Eui64 {
        self.ids.dev_eui
    }

    fn marshal_binary(&self) -> Result<Vec<u8>> {
        let mut w = Writer::new(Kind::JoinAccept as u8);
        self.ids.marshal(&mut w)?;
        self.payload.marshal(&mut w)?;
        self.nwk_s_key.marshal(&mut w)?;
        Ok(w.finish())
    }

    fn unmarshal_binary(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data, Kind::JoinAccept as u8)?;
        let packet = Self {
            ids: Identifiers::unmarshal(&mut r)?,
            payload: Vec::<u8>::unmarshal(&mut r)?,
            nwk_s_key: AesKey::unmarshal(&mut r)?,
        };
        r.finish()?;
        Ok(packet)
    }
}

impl fmt::Display for JoinAcceptPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "JoinAcceptPacket<app={} dev={} payload={} bytes>",
            self.ids.app_eui,
            self.ids.dev_eui,
            self.payload.len()
        )
    }
}
