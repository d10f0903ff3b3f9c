//! Reusable binary building blocks of the packet variants.
//!
//! Every component writes itself as one or more length-prefixed chunks
//! (2-byte big-endian length, then the bytes) and reads itself back from the
//! same chunks, so variants are assembled by listing the components they own.

use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

use super::metadata::Metadata;
use crate::error::{Error, Result};
use crate::lorawan::{self, AesKey, Eui64, FramePayload, MType, MacPayload, Mhdr, PhyPayload};

/// Accumulates length-prefixed chunks after a discriminant byte.
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    pub fn new(discriminant: u8) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(discriminant);
        Self { buf }
    }

    pub fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let len = u16::try_from(chunk.len()).map_err(|_| {
            Error::structural(format!("component too large: {} bytes", chunk.len()))
        })?;
        self.buf.put_u16(len);
        self.buf.put_slice(chunk);
        Ok(())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Walks the chunks written by a [`Writer`].
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    /// Check the discriminant byte and position the reader on the first
    /// component.
    pub fn new(data: &'a [u8], discriminant: u8) -> Result<Self> {
        match data.first() {
            Some(&d) if d == discriminant => Ok(Self { buf: &data[1..] }),
            Some(&d) => Err(Error::structural(format!(
                "discriminant mismatch: expected {}, got {}",
                discriminant, d
            ))),
            None => Err(Error::structural("empty packet")),
        }
    }

    pub fn read(&mut self) -> Result<&'a [u8]> {
        if self.buf.remaining() < 2 {
            return Err(Error::structural("truncated component length"));
        }
        let len = self.buf.get_u16() as usize;
        if self.buf.len() < len {
            return Err(Error::structural(format!(
                "truncated component: need {} bytes, have {}",
                len,
                self.buf.len()
            )));
        }
        let (chunk, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(chunk)
    }

    pub fn finish(self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(Error::structural(format!(
                "{} trailing bytes after last component",
                self.buf.len()
            )))
        }
    }
}

/// A self-delimiting piece of a packet.
pub trait Component: Sized {
    fn marshal(&self, w: &mut Writer) -> Result<()>;
    fn unmarshal(r: &mut Reader<'_>) -> Result<Self>;
}

fn fixed<const N: usize>(chunk: &[u8], what: &str) -> Result<[u8; N]> {
    chunk.try_into().map_err(|_| {
        Error::structural(format!("{} must be {} bytes, got {}", what, N, chunk.len()))
    })
}

impl Component for Eui64 {
    fn marshal(&self, w: &mut Writer) -> Result<()> {
        w.write(&self.0)
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Eui64(fixed(r.read()?, "EUI")?))
    }
}

impl Component for AesKey {
    fn marshal(&self, w: &mut Writer) -> Result<()> {
        w.write(&self.0)
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self> {
        Ok(AesKey(fixed(r.read()?, "session key")?))
    }
}

/// Opaque byte payload
impl Component for Vec<u8> {
    fn marshal(&self, w: &mut Writer) -> Result<()> {
        w.write(self)
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self> {
        Ok(r.read()?.to_vec())
    }
}

/// Device nonce of a join request
impl Component for [u8; 2] {
    fn marshal(&self, w: &mut Writer) -> Result<()> {
        w.write(self)
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self> {
        fixed(r.read()?, "device nonce")
    }
}

impl Component for Metadata {
    fn marshal(&self, w: &mut Writer) -> Result<()> {
        w.write(&serde_json::to_vec(self)?)
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self> {
        serde_json::from_slice(r.read()?)
            .map_err(|e| Error::structural(format!("invalid metadata: {e}")))
    }
}

impl Component for Vec<Metadata> {
    fn marshal(&self, w: &mut Writer) -> Result<()> {
        w.write(&serde_json::to_vec(self)?)
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self> {
        serde_json::from_slice(r.read()?)
            .map_err(|e| Error::structural(format!("invalid metadata list: {e}")))
    }
}

/// Application and device identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identifiers {
    pub app_eui: Eui64,
    pub dev_eui: Eui64,
}

impl Component for Identifiers {
    fn marshal(&self, w: &mut Writer) -> Result<()> {
        self.app_eui.marshal(w)?;
        self.dev_eui.marshal(w)
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            app_eui: Eui64::unmarshal(r)?,
            dev_eui: Eui64::unmarshal(r)?,
        })
    }
}

const DIRECTION_UPLINK: u8 = 1;
const DIRECTION_DOWNLINK: u8 = 2;

fn direction_tag(mtype: MType) -> Result<u8> {
    match mtype {
        MType::JoinRequest | MType::UnconfirmedDataUp | MType::ConfirmedDataUp => {
            Ok(DIRECTION_UPLINK)
        }
        MType::JoinAccept | MType::UnconfirmedDataDown | MType::ConfirmedDataDown => {
            Ok(DIRECTION_DOWNLINK)
        }
        other => Err(Error::structural(format!(
            "unsupported message type for framing: {}",
            other
        ))),
    }
}

/// LoRaWAN PHY payload that carries a MAC payload.
///
/// Framed as a direction tag chunk, the raw PHY payload chunk and the full
/// 32-bit frame counter. The PHY bytes only hold the low 16 bits, so a
/// reconciled counter survives a round trip through the last chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacFrame {
    mhdr: Mhdr,
    mac: MacPayload,
    mic: [u8; 4],
}

impl MacFrame {
    pub fn new(phy: PhyPayload) -> Result<Self> {
        match phy.payload {
            FramePayload::Mac(mac) => Ok(Self {
                mhdr: phy.mhdr,
                mac,
                mic: phy.mic,
            }),
            _ => Err(Error::structural(format!(
                "{} does not carry a MAC payload",
                phy.mhdr.mtype
            ))),
        }
    }

    pub fn to_phy(&self) -> PhyPayload {
        PhyPayload {
            mhdr: self.mhdr,
            payload: FramePayload::Mac(self.mac.clone()),
            mic: self.mic,
        }
    }

    pub fn mtype(&self) -> MType {
        self.mhdr.mtype
    }

    pub fn mac(&self) -> &MacPayload {
        &self.mac
    }

    pub fn mic(&self) -> [u8; 4] {
        self.mic
    }

    pub(crate) fn set_fcnt(&mut self, fcnt: u32) {
        self.mac.fhdr.fcnt = fcnt;
    }

    pub fn is_uplink(&self) -> bool {
        self.mhdr.mtype.is_uplink().unwrap_or(true)
    }

    /// DevAddr in the low four bytes of an EUI; the device EUI is not known
    /// before activation lookup.
    pub fn dev_eui(&self) -> Eui64 {
        let mut eui = [0u8; 8];
        eui[4..].copy_from_slice(&self.mac.fhdr.dev_addr.to_be_bytes());
        Eui64(eui)
    }
}

impl fmt::Display for MacFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_phy())
    }
}

impl Component for MacFrame {
    fn marshal(&self, w: &mut Writer) -> Result<()> {
        let tag = direction_tag(self.mhdr.mtype)?;
        let raw = self.to_phy().to_bytes()?;
        w.write(&[tag])?;
        w.write(&raw)?;
        w.write(&self.mac.fhdr.fcnt.to_be_bytes())
    }

    fn unmarshal(r: &mut Reader<'_>) -> Result<Self> {
        let tag = match r.read()? {
            [t] => *t,
            other => {
                return Err(Error::structural(format!(
                    "direction tag must be 1 byte, got {}",
                    other.len()
                )))
            }
        };
        let phy = lorawan::decode_phy_payload(r.read()?)?;
        if direction_tag(phy.mhdr.mtype)? != tag {
            return Err(Error::structural(format!(
                "direction tag {} does not match {}",
                tag, phy.mhdr.mtype
            )));
        }
        let fcnt = u32::from_be_bytes(fixed(r.read()?, "frame counter")?);
        let mut frame = Self::new(phy)?;
        if fcnt & 0xFFFF != frame.mac.fhdr.fcnt & 0xFFFF {
            return Err(Error::structural(format!(
                "frame counter {} does not extend on-air counter {}",
                fcnt, frame.mac.fhdr.fcnt
            )));
        }
        frame.mac.fhdr.fcnt = fcnt;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_up() -> PhyPayload {
        PhyPayload::new_data(MType::UnconfirmedDataUp, 0x26011BDA, 3, 1, vec![1, 2, 3])
    }

    #[test]
    fn test_chunks_read_back_in_order() {
        let mut w = Writer::new(9);
        w.write(b"ab").unwrap();
        w.write(b"").unwrap();
        w.write(b"xyz").unwrap();
        let data = w.finish();
        assert_eq!(&data[..5], &[9, 0, 2, b'a', b'b']);

        let mut r = Reader::new(&data, 9).unwrap();
        assert_eq!(r.read().unwrap(), b"ab");
        assert_eq!(r.read().unwrap(), b"");
        assert_eq!(r.read().unwrap(), b"xyz");
        assert!(r.read().is_err());
        r.finish().unwrap();
    }

    #[test]
    fn test_reader_rejects_wrong_discriminant() {
        assert!(Reader::new(&[1, 0, 0], 2).is_err());
        assert!(Reader::new(&[], 2).is_err());
    }

    #[test]
    fn test_truncated_chunk_fails() {
        let mut r = Reader::new(&[0, 0, 5, 1, 2], 0).unwrap();
        assert!(r.read().is_err());
    }

    #[test]
    fn test_trailing_bytes_fail() {
        let mut w = Writer::new(0);
        w.write(b"a").unwrap();
        let mut data = w.finish();
        data.push(0xFF);

        let mut r = Reader::new(&data, 0).unwrap();
        r.read().unwrap();
        assert!(r.finish().is_err());
    }

    #[test]
    fn test_mac_frame_rejects_join_payload() {
        let join = PhyPayload::new_join_request(Eui64::default(), Eui64::default(), [0, 0]);
        assert!(MacFrame::new(join).is_err());
    }

    #[test]
    fn test_mac_frame_direction_tag() {
        let frame = MacFrame::new(data_up()).unwrap();
        let mut w = Writer::new(0);
        frame.marshal(&mut w).unwrap();
        let data = w.finish();
        // discriminant, then the 1-byte direction chunk
        assert_eq!(&data[..4], &[0, 0, 1, DIRECTION_UPLINK]);

        let mut r = Reader::new(&data, 0).unwrap();
        assert_eq!(MacFrame::unmarshal(&mut r).unwrap(), frame);
    }

    #[test]
    fn test_mac_frame_tag_mismatch_fails() {
        let frame = MacFrame::new(data_up()).unwrap();
        let mut w = Writer::new(0);
        w.write(&[DIRECTION_DOWNLINK]).unwrap();
        w.write(&frame.to_phy().to_bytes().unwrap()).unwrap();
        let data = w.finish();

        let mut r = Reader::new(&data, 0).unwrap();
        assert!(MacFrame::unmarshal(&mut r).is_err());
    }

    #[test]
    fn test_mac_frame_keeps_full_fcnt() {
        let mut frame = MacFrame::new(data_up()).unwrap();
        frame.set_fcnt(0x0003_0003);
        let mut w = Writer::new(0);
        frame.marshal(&mut w).unwrap();
        let data = w.finish();
        assert_eq!(&data[data.len() - 6..], &[0, 4, 0x00, 0x03, 0x00, 0x03]);

        let mut r = Reader::new(&data, 0).unwrap();
        let back = MacFrame::unmarshal(&mut r).unwrap();
        r.finish().unwrap();
        assert_eq!(back.mac().fhdr.fcnt, 0x0003_0003);
        assert_eq!(back, frame);
    }

    #[test]
    fn test_mac_frame_counter_must_extend_phy() {
        let frame = MacFrame::new(data_up()).unwrap();
        let mut w = Writer::new(0);
        w.write(&[DIRECTION_UPLINK]).unwrap();
        w.write(&frame.to_phy().to_bytes().unwrap()).unwrap();
        w.write(&0x0001_0004u32.to_be_bytes()).unwrap();
        let data = w.finish();

        let mut r = Reader::new(&data, 0).unwrap();
        let err = MacFrame::unmarshal(&mut r).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Structural);
    }

    #[test]
    fn test_mac_frame_dev_eui_from_addr() {
        let frame = MacFrame::new(data_up()).unwrap();
        assert_eq!(frame.dev_eui(), Eui64([0, 0, 0, 0, 0x26, 0x01, 0x1B, 0xDA]));
    }

    #[test]
    fn test_proprietary_not_framed() {
        assert!(direction_tag(MType::Proprietary).is_err());
        assert!(direction_tag(MType::RejoinRequest).is_err());
    }

    #[test]
    fn test_bad_metadata_is_structural() {
        let mut w = Writer::new(0);
        w.write(b"not json").unwrap();
        let data = w.finish();
        let mut r = Reader::new(&data, 0).unwrap();
        let err = Metadata::unmarshal(&mut r).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Structural);
    }
}
