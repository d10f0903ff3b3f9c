//! LoRaWAN session keys, MIC computation and FRMPayload encryption
//!
//! - NwkSKey for MIC verification and MAC command encryption
//! - AppSKey for application payload decryption
//!
//! Both the MIC and the payload keystream are derived from AES-128 over a
//! 16-byte block that binds the frame direction, DevAddr and the full 32-bit
//! frame counter.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// 128-bit AES session key (NwkSKey or AppSKey)
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct AesKey(pub [u8; 16]);

impl fmt::Debug for AesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys stay out of logs
        write!(f, "AesKey(..)")
    }
}

impl FromStr for AesKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::structural(format!("invalid key: {e}")))?;
        let key: [u8; 16] = bytes
            .try_into()
            .map_err(|_| Error::structural("AES key must be 16 bytes"))?;
        Ok(AesKey(key))
    }
}

fn cmac(key: &AesKey, parts: &[&[u8]]) -> Result<[u8; 4]> {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(&key.0)
        .map_err(|e| Error::structural(format!("invalid CMAC key: {e}")))?;
    for part in parts {
        mac.update(part);
    }
    let tag = mac.finalize().into_bytes();
    Ok([tag[0], tag[1], tag[2], tag[3]])
}

fn block(prefix: u8, uplink: bool, dev_addr: u32, fcnt: u32, last: u8) -> [u8; 16] {
    let mut b = [0u8; 16];
    b[0] = prefix;
    b[5] = if uplink { 0 } else { 1 };
    b[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    b[10..14].copy_from_slice(&fcnt.to_le_bytes());
    b[15] = last;
    b
}

/// MIC of a data frame: `aes128_cmac(NwkSKey, B0 | msg)[0..4]`, where `msg`
/// is the frame from MHDR up to (not including) the MIC.
pub fn data_mic(key: &AesKey, msg: &[u8], dev_addr: u32, fcnt: u32, uplink: bool) -> Result<[u8; 4]> {
    if msg.len() > u8::MAX as usize {
        return Err(Error::structural(format!(
            "frame too long for MIC: {} bytes",
            msg.len()
        )));
    }
    let b0 = block(0x49, uplink, dev_addr, fcnt, msg.len() as u8);
    cmac(key, &[&b0, msg])
}

/// MIC of a join request: `aes128_cmac(AppKey, msg)[0..4]`.
pub fn join_mic(key: &AesKey, msg: &[u8]) -> Result<[u8; 4]> {
    cmac(key, &[msg])
}

/// Encrypt or decrypt an FRMPayload. The operation is its own inverse.
pub fn crypt_frm_payload(
    key: &AesKey,
    uplink: bool,
    dev_addr: u32,
    fcnt: u32,
    data: &[u8],
) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(&key.0));
    let mut out = Vec::with_capacity(data.len());

    for (i, chunk) in data.chunks(16).enumerate() {
        let a = block(0x01, uplink, dev_addr, fcnt, (i + 1) as u8);
        let mut s = GenericArray::clone_from_slice(&a);
        cipher.encrypt_block(&mut s);
        out.extend(chunk.iter().zip(s.iter()).map(|(d, k)| d ^ k));
    }

    out
}
