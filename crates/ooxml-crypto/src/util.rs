use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use subtle::ConstantTimeEq;

use crate::error::{OfficeCryptoError, Result};

/// Little-endian cursor over a metadata buffer. Every read names what it was reading so that
/// truncation errors point at the field.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    pub(crate) fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8]> {
        let end = self.pos.saturating_add(n);
        if end > self.bytes.len() {
            return Err(OfficeCryptoError::MalformedMetadata(format!(
                "truncated {context}"
            )));
        }
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn read_u16_le(&mut self, context: &'static str) -> Result<u16> {
        let b = self.take(2, context)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn read_u32_le(&mut self, context: &'static str) -> Result<u32> {
        let b = self.take(4, context)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

pub(crate) fn utf16le_nul_terminated(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity((value.len() + 1) * 2);
    for unit in value.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out.extend_from_slice(&[0, 0]);
    out
}

/// Decode the CSP name at the tail of a legacy `EncryptionHeader`.
///
/// Producers disagree on whether the terminator is present, so a missing NUL is tolerated and
/// trailing NULs are trimmed.
pub(crate) fn decode_utf16le_nul_terminated(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(OfficeCryptoError::malformed(
            "CSP name is not valid UTF-16LE (odd length)",
        ));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let end = units.iter().position(|u| *u == 0).unwrap_or(units.len());
    String::from_utf16(&units[..end])
        .map_err(|_| OfficeCryptoError::malformed("CSP name is not valid UTF-16LE"))
}

/// Decode a base64 XML attribute value.
///
/// Pretty-printed descriptors may wrap long values and some writers omit `=` padding.
pub(crate) fn decode_base64_attr(value: &str, attr: &str) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = value
        .bytes()
        .filter(|b| !matches!(b, b'\r' | b'\n' | b'\t' | b' '))
        .collect();
    STANDARD
        .decode(&cleaned)
        .or_else(|_| STANDARD_NO_PAD.decode(&cleaned))
        .map_err(|_| OfficeCryptoError::malformed(format!("attribute {attr} is not valid base64")))
}

pub(crate) fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    bool::from(a.ct_eq(b))
}

pub(crate) fn round_up(len: u64, multiple: u64) -> Option<u64> {
    if multiple <= 1 {
        return Some(len);
    }
    let rem = len % multiple;
    if rem == 0 {
        Some(len)
    } else {
        len.checked_add(multiple - rem)
    }
}

/// Copy `bytes` into a new buffer zero-extended to a multiple of `block_size`.
pub(crate) fn zero_pad(bytes: &[u8], block_size: usize) -> Vec<u8> {
    let padded = round_up(bytes.len() as u64, block_size as u64).unwrap_or(bytes.len() as u64);
    let mut out = bytes.to_vec();
    out.resize(padded as usize, 0);
    out
}

/// Truncate or zero-extend `bytes` to exactly `len`.
pub(crate) fn fit_len(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut out = bytes[..bytes.len().min(len)].to_vec();
    out.resize(len, 0);
    out
}
