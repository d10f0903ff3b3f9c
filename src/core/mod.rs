//! Internal packet model shared by the network tiers.
//!
//! Binary layout: one discriminant byte naming the variant, then the
//! variant's components as length-prefixed chunks (see [`components`]).

pub mod components;
pub mod metadata;
pub mod packets;

use std::fmt;

use crate::error::{Error, Result};
use crate::lorawan::Eui64;

pub use components::{Identifiers, MacFrame};
pub use metadata::Metadata;
pub use packets::{
    compute_fcnt, ApplicationPacket, BrokerPacket, HandlerPacket, JoinAcceptPacket,
    JoinRequestPacket, RouterPacket,
};

/// Packet variant, also its wire discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Kind {
    Router = 0,
    Broker = 1,
    Handler = 2,
    Application = 3,
    JoinRequest = 4,
    JoinAccept = 5,
}

impl TryFrom<u8> for Kind {
    type Error = Error;

    fn try_from(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Kind::Router),
            1 => Ok(Kind::Broker),
            2 => Ok(Kind::Handler),
            3 => Ok(Kind::Application),
            4 => Ok(Kind::JoinRequest),
            5 => Ok(Kind::JoinAccept),
            other => Err(Error::structural(format!(
                "unknown packet discriminant: {}",
                other
            ))),
        }
    }
}

/// Common behavior of every packet variant.
pub trait Packet: fmt::Display {
    fn kind(&self) -> Kind;

    /// EUI of the device the packet is about. Router and broker packets only
    /// know the DevAddr, which fills the low four bytes.
    fn dev_eui(&self) -> Eui64;

    fn marshal_binary(&self) -> Result<Vec<u8>>;

    fn unmarshal_binary(data: &[u8]) -> Result<Self>
    where
        Self: Sized;
}

/// Any packet variant, as returned by [`unmarshal`].
#[derive(Debug, Clone, PartialEq)]
pub enum AnyPacket {
    Router(RouterPacket),
    Broker(BrokerPacket),
    Handler(HandlerPacket),
    Application(ApplicationPacket),
    JoinRequest(JoinRequestPacket),
    JoinAccept(JoinAcceptPacket),
}

impl AnyPacket {
    pub fn as_packet(&self) -> &dyn Packet {
        match self {
            AnyPacket::Router(p) => p,
            AnyPacket::Broker(p) => p,
            AnyPacket::Handler(p) => p,
            AnyPacket::Application(p) => p,
            AnyPacket::JoinRequest(p) => p,
            AnyPacket::JoinAccept(p) => p,
        }
    }
}

impl fmt::Display for AnyPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_packet())
    }
}

/// Decode a packet of any variant, dispatching on its discriminant.
pub fn unmarshal(data: &[u8]) -> Result<AnyPacket> {
    let first = *data
        .first()
        .ok_or_else(|| Error::structural("empty packet"))?;
    Ok(match Kind::try_from(first)? {
        Kind::Router => AnyPacket::Router(RouterPacket::unmarshal_binary(data)?),
        Kind::Broker => AnyPacket::Broker(BrokerPacket::unmarshal_binary(data)?),
        Kind::Handler => AnyPacket::Handler(HandlerPacket::unmarshal_binary(data)?),
        Kind::Application => AnyPacket::Application(ApplicationPacket::unmarshal_binary(data)?),
        Kind::JoinRequest => AnyPacket::JoinRequest(JoinRequestPacket::unmarshal_binary(data)?),
        Kind::JoinAccept => AnyPacket::JoinAccept(JoinAcceptPacket::unmarshal_binary(data)?),
    })
}
