//! MAC command parsing for FOpts (LoRaWAN 1.0.x)
//!
//! The payload length of a command depends on its CID and on the direction
//! of the frame carrying it.

use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacCommand {
    pub cid: u8,
    pub uplink: bool,
    pub payload: Vec<u8>,
}

impl MacCommand {
    pub fn name(&self) -> &'static str {
        match (self.cid, self.uplink) {
            (0x02, true) => "LinkCheckReq",
            (0x02, false) => "LinkCheckAns",
            (0x03, true) => "LinkADRAns",
            (0x03, false) => "LinkADRReq",
            (0x04, true) => "DutyCycleAns",
            (0x04, false) => "DutyCycleReq",
            (0x05, true) => "RXParamSetupAns",
            (0x05, false) => "RXParamSetupReq",
            (0x06, true) => "DevStatusAns",
            (0x06, false) => "DevStatusReq",
            (0x07, true) => "NewChannelAns",
            (0x07, false) => "NewChannelReq",
            (0x08, true) => "RXTimingSetupAns",
            (0x08, false) => "RXTimingSetupReq",
            (0x09, true) => "TxParamSetupAns",
            (0x09, false) => "TxParamSetupReq",
            (0x0A, true) => "DlChannelAns",
            (0x0A, false) => "DlChannelReq",
            (0x0D, true) => "DeviceTimeReq",
            (0x0D, false) => "DeviceTimeAns",
            _ => "Proprietary",
        }
    }
}

impl fmt::Display for MacCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), hex::encode_upper(&self.payload))
    }
}

/// Payload length for a known CID, `None` for proprietary commands.
fn payload_len(cid: u8, uplink: bool) -> Result<Option<usize>> {
    let len = match (cid, uplink) {
        (0x02, true) => 0,
        (0x02, false) => 2,
        (0x03, true) => 1,
        (0x03, false) => 4,
        (0x04, true) => 0,
        (0x04, false) => 1,
        (0x05, true) => 1,
        (0x05, false) => 4,
        (0x06, true) => 2,
        (0x06, false) => 0,
        (0x07, true) => 1,
        (0x07, false) => 5,
        (0x08, true) => 0,
        (0x08, false) => 1,
        (0x09, true) => 0,
        (0x09, false) => 1,
        (0x0A, true) => 1,
        (0x0A, false) => 4,
        (0x0D, true) => 0,
        (0x0D, false) => 5,
        (0x80..=0xFF, _) => return Ok(None),
        _ => {
            return Err(Error::structural(format!(
                "unknown MAC command CID 0x{:02x}",
                cid
            )))
        }
    };
    Ok(Some(len))
}

/// Parse a sequence of MAC commands. A proprietary command swallows the rest
/// of the buffer since its length is not defined.
pub fn parse_mac_commands(data: &[u8], uplink: bool) -> Result<Vec<MacCommand>> {
    let mut cmds = Vec::new();
    let mut rest = data;

    while let Some((&cid, tail)) = rest.split_first() {
        let len = payload_len(cid, uplink)?.unwrap_or(tail.len());
        if tail.len() < len {
            return Err(Error::structural(format!(
                "MAC command 0x{:02x} truncated: need {} bytes, have {}",
                cid,
                len,
                tail.len()
            )));
        }
        cmds.push(MacCommand {
            cid,
            uplink,
            payload: tail[..len].to_vec(),
        });
        rest = &tail[len..];
    }

    Ok(cmds)
}
