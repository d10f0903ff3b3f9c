//! LoRaWAN PHY payload model
//!
//! Frame structure:
//!   MHDR(1) | MACPayload / JoinRequest / JoinAccept | MIC(4)
//!
//! All multi-byte LoRaWAN fields are little-endian on the wire. EUIs are held
//! in their human (big-endian) order and reversed when framed.

pub mod encoder;
pub mod keys;
pub mod maccommands;

use std::fmt;

use crate::error::{Error, Result};

pub use keys::AesKey;
pub use maccommands::{parse_mac_commands, MacCommand};

/// LoRaWAN MAC Header (MHDR) - Message Type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    RejoinRequest,
    Proprietary,
}

impl MType {
    fn from_mhdr(value: u8) -> Self {
        match (value >> 5) & 0x07 {
            0b000 => MType::JoinRequest,
            0b001 => MType::JoinAccept,
            0b010 => MType::UnconfirmedDataUp,
            0b011 => MType::UnconfirmedDataDown,
            0b100 => MType::ConfirmedDataUp,
            0b101 => MType::ConfirmedDataDown,
            0b110 => MType::RejoinRequest,
            _ => MType::Proprietary,
        }
    }

    fn bits(self) -> u8 {
        match self {
            MType::JoinRequest => 0b000,
            MType::JoinAccept => 0b001,
            MType::UnconfirmedDataUp => 0b010,
            MType::UnconfirmedDataDown => 0b011,
            MType::ConfirmedDataUp => 0b100,
            MType::ConfirmedDataDown => 0b101,
            MType::RejoinRequest => 0b110,
            MType::Proprietary => 0b111,
        }
    }

    /// Direction implied by the message type; `None` for proprietary frames.
    pub fn is_uplink(self) -> Option<bool> {
        match self {
            MType::JoinRequest
            | MType::UnconfirmedDataUp
            | MType::ConfirmedDataUp
            | MType::RejoinRequest => Some(true),
            MType::JoinAccept | MType::UnconfirmedDataDown | MType::ConfirmedDataDown => {
                Some(false)
            }
            MType::Proprietary => None,
        }
    }

    pub fn is_data(self) -> bool {
        matches!(
            self,
            MType::UnconfirmedDataUp
                | MType::UnconfirmedDataDown
                | MType::ConfirmedDataUp
                | MType::ConfirmedDataDown
        )
    }
}

impl fmt::Display for MType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MType::JoinRequest => write!(f, "JoinRequest"),
            MType::JoinAccept => write!(f, "JoinAccept"),
            MType::UnconfirmedDataUp => write!(f, "UnconfirmedDataUp"),
            MType::UnconfirmedDataDown => write!(f, "UnconfirmedDataDown"),
            MType::ConfirmedDataUp => write!(f, "ConfirmedDataUp"),
            MType::ConfirmedDataDown => write!(f, "ConfirmedDataDown"),
            MType::RejoinRequest => write!(f, "RejoinRequest"),
            MType::Proprietary => write!(f, "Proprietary"),
        }
    }
}

/// LoRaWAN Major version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Major {
    LoRaWANR1,
    Unknown(u8),
}

impl Major {
    fn bits(self) -> u8 {
        match self {
            Major::LoRaWANR1 => 0b00,
            Major::Unknown(b) => b & 0b11,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mhdr {
    pub mtype: MType,
    pub major: Major,
}

impl Mhdr {
    pub fn new(mtype: MType) -> Self {
        Self {
            mtype,
            major: Major::LoRaWANR1,
        }
    }

    fn from_byte(b: u8) -> Self {
        let major = match b & 0b11 {
            0b00 => Major::LoRaWANR1,
            other => Major::Unknown(other),
        };
        Self {
            mtype: MType::from_mhdr(b),
            major,
        }
    }

    fn to_byte(self) -> u8 {
        (self.mtype.bits() << 5) | self.major.bits()
    }
}

/// 64-bit extended unique identifier, stored most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Eui64(pub [u8; 8]);

impl Eui64 {
    fn from_wire(bytes: &[u8]) -> Result<Self> {
        let mut eui: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::structural(format!("EUI must be 8 bytes, got {}", bytes.len())))?;
        eui.reverse();
        Ok(Eui64(eui))
    }

    fn to_wire(self) -> [u8; 8] {
        let mut out = self.0;
        out.reverse();
        out
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

/// Frame Control byte (FCtrl)
///
/// Bit 4 is ClassB on uplinks and FPending on downlinks; bit 6 is only
/// meaningful on uplinks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FCtrl {
    pub adr: bool,
    pub adr_ack_req: bool,
    pub ack: bool,
    pub class_b: bool,
    pub f_pending: bool,
}

impl FCtrl {
    fn from_byte(b: u8, uplink: bool) -> Self {
        Self {
            adr: (b & 0x80) != 0,
            adr_ack_req: uplink && (b & 0x40) != 0,
            ack: (b & 0x20) != 0,
            class_b: uplink && (b & 0x10) != 0,
            f_pending: !uplink && (b & 0x10) != 0,
        }
    }

    fn to_byte(&self, uplink: bool, f_opts_len: u8) -> u8 {
        let mut b = f_opts_len & 0x0F;
        if self.adr {
            b |= 0x80;
        }
        if uplink && self.adr_ack_req {
            b |= 0x40;
        }
        if self.ack {
            b |= 0x20;
        }
        if (uplink && self.class_b) || (!uplink && self.f_pending) {
            b |= 0x10;
        }
        b
    }
}

/// Frame header. The frame counter is held at full width; only its low 16
/// bits travel on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fhdr {
    pub dev_addr: u32,
    pub fctrl: FCtrl,
    pub fcnt: u32,
    pub f_opts: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacPayload {
    pub fhdr: Fhdr,
    pub f_port: Option<u8>,
    pub frm_payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequestPayload {
    pub app_eui: Eui64,
    pub dev_eui: Eui64,
    pub dev_nonce: [u8; 2],
}

/// Frame body following the MHDR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramePayload {
    Mac(MacPayload),
    JoinRequest(JoinRequestPayload),
    /// Join accept body, still encrypted with the AppKey.
    JoinAccept(Vec<u8>),
    Proprietary(Vec<u8>),
}

/// Decoded LoRaWAN PHY payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhyPayload {
    pub mhdr: Mhdr,
    pub payload: FramePayload,
    pub mic: [u8; 4],
}

impl PhyPayload {
    pub fn mac_payload(&self) -> Option<&MacPayload> {
        match &self.payload {
            FramePayload::Mac(mac) => Some(mac),
            _ => None,
        }
    }

    pub fn mac_payload_mut(&mut self) -> Option<&mut MacPayload> {
        match &mut self.payload {
            FramePayload::Mac(mac) => Some(mac),
            _ => None,
        }
    }
}

impl fmt::Display for PhyPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            FramePayload::Mac(mac) => {
                write!(
                    f,
                    "{} DevAddr={:08X} FCnt={} FPort={} Payload={} bytes MIC={} ADR={}",
                    self.mhdr.mtype,
                    mac.fhdr.dev_addr,
                    mac.fhdr.fcnt,
                    mac.f_port.map(|p| p.to_string()).unwrap_or("-".to_string()),
                    mac.frm_payload.len(),
                    hex::encode_upper(self.mic),
                    mac.fhdr.fctrl.adr,
                )
            }
            FramePayload::JoinRequest(jr) => {
                write!(
                    f,
                    "JoinRequest AppEUI={} DevEUI={} DevNonce={} MIC={}",
                    jr.app_eui,
                    jr.dev_eui,
                    hex::encode_upper(jr.dev_nonce),
                    hex::encode_upper(self.mic)
                )
            }
            FramePayload::JoinAccept(body) => {
                write!(f, "JoinAccept (encrypted, {} bytes)", body.len() + 4)
            }
            FramePayload::Proprietary(body) => {
                write!(f, "Proprietary ({} bytes)", body.len() + 4)
            }
        }
    }
}

/// Decode a LoRaWAN PHY payload (raw bytes after base64 decode)
pub fn decode_phy_payload(data: &[u8]) -> Result<PhyPayload> {
    // MHDR(1) + MIC(4)
    if data.len() < 5 {
        return Err(Error::structural(format!(
            "PHY payload too short: {} bytes",
            data.len()
        )));
    }

    let mhdr = Mhdr::from_byte(data[0]);
    let mic_start = data.len() - 4;
    let mut mic = [0u8; 4];
    mic.copy_from_slice(&data[mic_start..]);
    let body = &data[1..mic_start];

    let payload = match mhdr.mtype {
        MType::JoinRequest => FramePayload::JoinRequest(decode_join_request(body)?),
        MType::JoinAccept => {
            // 16 or 32 bytes including the encrypted MIC
            if body.len() != 12 && body.len() != 28 {
                return Err(Error::structural(format!(
                    "JoinAccept must be 17 or 33 bytes, got {}",
                    data.len()
                )));
            }
            FramePayload::JoinAccept(body.to_vec())
        }
        MType::UnconfirmedDataUp
        | MType::UnconfirmedDataDown
        | MType::ConfirmedDataUp
        | MType::ConfirmedDataDown => {
            let uplink = mhdr.mtype.is_uplink().unwrap_or(true);
            FramePayload::Mac(decode_mac_payload(body, uplink)?)
        }
        MType::Proprietary => FramePayload::Proprietary(body.to_vec()),
        MType::RejoinRequest => {
            return Err(Error::not_supported("RejoinRequest frames"));
        }
    };

    Ok(PhyPayload { mhdr, payload, mic })
}

fn decode_join_request(body: &[u8]) -> Result<JoinRequestPayload> {
    // AppEUI(8) + DevEUI(8) + DevNonce(2)
    if body.len() != 18 {
        return Err(Error::structural(format!(
            "JoinRequest must be 23 bytes, got {}",
            body.len() + 5
        )));
    }

    Ok(JoinRequestPayload {
        app_eui: Eui64::from_wire(&body[0..8])?,
        dev_eui: Eui64::from_wire(&body[8..16])?,
        dev_nonce: [body[16], body[17]],
    })
}

fn decode_mac_payload(body: &[u8], uplink: bool) -> Result<MacPayload> {
    // DevAddr(4) + FCtrl(1) + FCnt(2)
    if body.len() < 7 {
        return Err(Error::structural(format!(
            "Data frame too short: {} bytes (minimum 12)",
            body.len() + 5
        )));
    }

    let dev_addr = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    let fctrl_byte = body[4];
    let fctrl = FCtrl::from_byte(fctrl_byte, uplink);
    let fcnt = u16::from_le_bytes([body[5], body[6]]) as u32;

    let f_opts_end = 7 + (fctrl_byte & 0x0F) as usize;
    if f_opts_end > body.len() {
        return Err(Error::structural(format!(
            "FOpts length {} exceeds available data",
            fctrl_byte & 0x0F
        )));
    }
    let f_opts = body[7..f_opts_end].to_vec();

    // FPort + FRMPayload are only present if there's data beyond FOpts
    let (f_port, frm_payload) = if f_opts_end < body.len() {
        (Some(body[f_opts_end]), body[f_opts_end + 1..].to_vec())
    } else {
        (None, vec![])
    };

    Ok(MacPayload {
        fhdr: Fhdr {
            dev_addr,
            fctrl,
            fcnt,
            f_opts,
        },
        f_port,
        frm_payload,
    })
}
