//! Semtech UDP Packet Forwarder Protocol
//!
//! Reference: https://github.com/Lora-net/packet_forwarder/blob/master/PROTOCOL.TXT
//!
//! The protocol uses a simple binary header followed by JSON payload:
//!
//! ```text
//! byte 0      : version
//! bytes 1-2   : token (zeroed for PULL_RESP)
//! byte 3      : identifier
//! bytes 4-11  : gateway id, PUSH_DATA and PULL_DATA only
//! remaining   : JSON payload, PUSH_DATA and PULL_RESP only
//! ```

pub mod payload;

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

use crate::error::{Error, Result};

pub use payload::{Payload, Rxpk, Stat, Txpk};

/// Protocol version
pub const VERSION: u8 = 0x01;

/// Packet types (identifier byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Identifier {
    PushData = 0x00,
    PushAck = 0x01,
    PullData = 0x02,
    PullResp = 0x03,
    PullAck = 0x04,
}

impl Identifier {
    /// Identifiers sent by a live gateway carry its 8-byte id.
    pub fn has_gateway_id(self) -> bool {
        matches!(self, Identifier::PushData | Identifier::PullData)
    }

    pub fn has_payload(self) -> bool {
        matches!(self, Identifier::PushData | Identifier::PullResp)
    }
}

impl TryFrom<u8> for Identifier {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Identifier::PushData),
            0x01 => Ok(Identifier::PushAck),
            0x02 => Ok(Identifier::PullData),
            0x03 => Ok(Identifier::PullResp),
            0x04 => Ok(Identifier::PullAck),
            _ => Err(Error::structural(format!(
                "unknown packet identifier: 0x{:02x}",
                value
            ))),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Identifier::PushData => "PUSH_DATA",
            Identifier::PushAck => "PUSH_ACK",
            Identifier::PullData => "PULL_DATA",
            Identifier::PullResp => "PULL_RESP",
            Identifier::PullAck => "PULL_ACK",
        };
        f.write_str(name)
    }
}

/// Semtech datagram
///
/// `identifier` decides which other fields are meaningful: the gateway id is
/// required for PUSH_DATA and PULL_DATA, the payload only exists for
/// PUSH_DATA and PULL_RESP.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub version: u8,
    pub token: Vec<u8>,
    pub identifier: Identifier,
    pub gateway_id: Vec<u8>,
    pub payload: Option<Payload>,
}

impl Packet {
    /// Build a PUSH_ACK echoing `token`
    pub fn push_ack(token: Vec<u8>) -> Self {
        Self::ack(Identifier::PushAck, token)
    }

    /// Build a PULL_ACK echoing `token`
    pub fn pull_ack(token: Vec<u8>) -> Self {
        Self::ack(Identifier::PullAck, token)
    }

    fn ack(identifier: Identifier, token: Vec<u8>) -> Self {
        Self {
            version: VERSION,
            token,
            identifier,
            gateway_id: vec![],
            payload: None,
        }
    }

    /// Build a PULL_RESP carrying one downlink record
    pub fn pull_resp(txpk: Txpk) -> Self {
        Self {
            version: VERSION,
            token: vec![],
            identifier: Identifier::PullResp,
            gateway_id: vec![],
            payload: Some(Payload {
                txpk: Some(txpk),
                ..Default::default()
            }),
        }
    }

    /// Parse a raw UDP datagram
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::structural(format!(
                "packet too short: {} bytes",
                data.len()
            )));
        }

        let mut buf = data;

        let version = buf.get_u8();
        if version != VERSION {
            return Err(Error::structural(format!(
                "unsupported protocol version: 0x{:02x}",
                version
            )));
        }

        let mut token = vec![0u8; 2];
        buf.copy_to_slice(&mut token);
        let identifier = Identifier::try_from(buf.get_u8())?;
        if identifier == Identifier::PullResp {
            token.clear();
        }

        let mut gateway_id = vec![];
        if identifier.has_gateway_id() {
            if buf.remaining() < 8 {
                return Err(Error::structural(format!(
                    "{} too short for gateway id",
                    identifier
                )));
            }
            gateway_id = vec![0u8; 8];
            buf.copy_to_slice(&mut gateway_id);
        }

        let payload = if !identifier.has_payload() {
            None
        } else if buf.has_remaining() {
            let payload: Payload = serde_json::from_slice(buf)
                .map_err(|e| Error::structural(format!("invalid {} JSON: {}", identifier, e)))?;
            Some(payload)
        } else {
            Some(Payload::default())
        };

        Ok(Packet {
            version,
            token,
            identifier,
            gateway_id,
            payload,
        })
    }

    /// Serialize the datagram
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.version != VERSION {
            return Err(Error::structural(format!(
                "unsupported protocol version: 0x{:02x}",
                self.version
            )));
        }

        let mut buf = BytesMut::with_capacity(12);
        buf.put_u8(self.version);

        if self.identifier == Identifier::PullResp {
            buf.put_u16(0);
        } else if self.token.len() == 2 {
            buf.put_slice(&self.token);
        } else {
            return Err(Error::structural(format!(
                "token must be 2 bytes, got {}",
                self.token.len()
            )));
        }

        buf.put_u8(self.identifier as u8);

        if self.identifier.has_gateway_id() {
            if self.gateway_id.len() != 8 {
                return Err(Error::structural(format!(
                    "gateway id must be 8 bytes, got {}",
                    self.gateway_id.len()
                )));
            }
            buf.put_slice(&self.gateway_id);
        }

        if self.identifier.has_payload() {
            let json = match &self.payload {
                Some(payload) => serde_json::to_vec(payload)?,
                None => b"{}".to_vec(),
            };
            buf.put_slice(&json);
        }

        Ok(buf.to_vec())
    }
}
