//! LoRaWAN frame encoder
//!
//! Serializes a [`PhyPayload`] back into the raw bytes carried in the
//! base64 `data` field of an rxpk/txpk.
//!
//! Frame structure (data frames):
//!   MHDR(1) | DevAddr(4,LE) | FCtrl(1) | FCnt(2,LE) | FOpts(0..15) | [FPort(1) | FRMPayload(N)] | MIC(4)

use super::keys::{self, AesKey};
use super::{Eui64, FCtrl, Fhdr, FramePayload, MType, MacPayload, Mhdr, PhyPayload};
use crate::error::{Error, Result};

impl PhyPayload {
    /// Build a data frame with a zeroed MIC; call [`PhyPayload::sign`] to
    /// fill it in.
    pub fn new_data(mtype: MType, dev_addr: u32, fcnt: u32, f_port: u8, payload: Vec<u8>) -> Self {
        let f_port = if payload.is_empty() { None } else { Some(f_port) };
        Self {
            mhdr: Mhdr::new(mtype),
            payload: FramePayload::Mac(MacPayload {
                fhdr: Fhdr {
                    dev_addr,
                    fctrl: FCtrl::default(),
                    fcnt,
                    f_opts: vec![],
                },
                f_port,
                frm_payload: payload,
            }),
            mic: [0; 4],
        }
    }

    /// Build a join request with a zeroed MIC.
    pub fn new_join_request(app_eui: Eui64, dev_eui: Eui64, dev_nonce: [u8; 2]) -> Self {
        Self {
            mhdr: Mhdr::new(MType::JoinRequest),
            payload: FramePayload::JoinRequest(super::JoinRequestPayload {
                app_eui,
                dev_eui,
                dev_nonce,
            }),
            mic: [0; 4],
        }
    }

    /// Serialize the frame without its MIC.
    pub(crate) fn body_bytes(&self) -> Result<Vec<u8>> {
        let mut frame = Vec::with_capacity(32);
        frame.push(self.mhdr.to_byte());

        match &self.payload {
            FramePayload::Mac(mac) => {
                if !self.mhdr.mtype.is_data() {
                    return Err(Error::structural(format!(
                        "{} cannot carry a MAC payload",
                        self.mhdr.mtype
                    )));
                }
                let uplink = self.mhdr.mtype.is_uplink().unwrap_or(true);
                let f_opts_len = mac.fhdr.f_opts.len();
                if f_opts_len > 15 {
                    return Err(Error::structural(format!(
                        "FOpts too long: {} bytes (maximum 15)",
                        f_opts_len
                    )));
                }

                frame.extend_from_slice(&mac.fhdr.dev_addr.to_le_bytes());
                frame.push(mac.fhdr.fctrl.to_byte(uplink, f_opts_len as u8));
                frame.extend_from_slice(&(mac.fhdr.fcnt as u16).to_le_bytes());
                frame.extend_from_slice(&mac.fhdr.f_opts);

                match mac.f_port {
                    Some(port) => {
                        frame.push(port);
                        frame.extend_from_slice(&mac.frm_payload);
                    }
                    None if !mac.frm_payload.is_empty() => {
                        return Err(Error::structural("FRMPayload present without FPort"));
                    }
                    None => {}
                }
            }
            FramePayload::JoinRequest(jr) => {
                frame.extend_from_slice(&jr.app_eui.to_wire());
                frame.extend_from_slice(&jr.dev_eui.to_wire());
                frame.extend_from_slice(&jr.dev_nonce);
            }
            FramePayload::JoinAccept(body) | FramePayload::Proprietary(body) => {
                frame.extend_from_slice(body);
            }
        }

        Ok(frame)
    }

    /// Build the raw LoRaWAN PHY payload bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut frame = self.body_bytes()?;
        frame.extend_from_slice(&self.mic);
        Ok(frame)
    }

    /// Compute and store the MIC for data and join request frames.
    pub fn sign(&mut self, key: &AesKey) -> Result<()> {
        let body = self.body_bytes()?;
        self.mic = match &self.payload {
            FramePayload::Mac(mac) => keys::data_mic(
                key,
                &body,
                mac.fhdr.dev_addr,
                mac.fhdr.fcnt,
                self.mhdr.mtype.is_uplink().unwrap_or(true),
            )?,
            FramePayload::JoinRequest(_) => keys::join_mic(key, &body)?,
            _ => {
                return Err(Error::not_supported(format!(
                    "signing {} frames",
                    self.mhdr.mtype
                )))
            }
        };
        Ok(())
    }
}
