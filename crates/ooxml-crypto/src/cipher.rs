//! Symmetric cipher contexts.
//!
//! A [`CipherContext`] is one keyed instance of a cipher in one direction. Block modes keep their
//! chaining state across [`CipherContext::apply`] calls, so a chunk can be fed in pieces as long
//! as each piece is block aligned.

use std::fmt;

use aes::{Aes128, Aes192, Aes256};
use cipher::generic_array::GenericArray;
use cipher::{
    BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
    StreamCipher,
};
use cipher::consts::{U10, U11, U12, U13, U14, U15, U16, U5, U6, U7, U8, U9};

use crate::algorithm::{ChainingMode, CipherAlgorithm};
use crate::error::{OfficeCryptoError, Result};

const AES_BLOCK: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

pub struct CipherContext {
    state: State,
}

enum State {
    Ecb { cipher: AesBlock, direction: Direction },
    Cbc(CbcState),
    Cfb8 { cipher: AesBlock, register: [u8; AES_BLOCK], direction: Direction },
    Rc4(Rc4Keystream),
}

impl CipherContext {
    /// Key a cipher. All validation happens here so that [`apply`](Self::apply) only fails on
    /// misaligned input.
    pub fn new(
        cipher: CipherAlgorithm,
        chaining: ChainingMode,
        key: &[u8],
        iv: &[u8],
        direction: Direction,
    ) -> Result<Self> {
        if !cipher.is_implemented() {
            return Err(OfficeCryptoError::config(format!(
                "cipher {cipher} is recognised but not supported"
            )));
        }

        if cipher == CipherAlgorithm::Rc4 {
            return Ok(Self {
                state: State::Rc4(Rc4Keystream::new(key)?),
            });
        }

        let expected = cipher.block_size();
        if !cipher.supports_key_bits((key.len() * 8) as u32) {
            return Err(OfficeCryptoError::config(format!(
                "{}-bit key does not fit {cipher}",
                key.len() * 8
            )));
        }
        if chaining != ChainingMode::Ecb && iv.len() != expected {
            return Err(OfficeCryptoError::config(format!(
                "{chaining} needs a {expected}-byte IV, got {} bytes",
                iv.len()
            )));
        }

        let state = match chaining {
            ChainingMode::Ecb => State::Ecb {
                cipher: AesBlock::new(key)?,
                direction,
            },
            ChainingMode::Cbc => State::Cbc(CbcState::new(key, iv, direction)?),
            ChainingMode::Cfb8 => {
                let mut register = [0u8; AES_BLOCK];
                register.copy_from_slice(iv);
                State::Cfb8 {
                    cipher: AesBlock::new(key)?,
                    register,
                    direction,
                }
            }
        };
        Ok(Self { state })
    }

    /// Alignment `apply` needs: the block size for ECB/CBC, 1 otherwise.
    pub fn alignment(&self) -> usize {
        match self.state {
            State::Ecb { .. } | State::Cbc(_) => AES_BLOCK,
            State::Cfb8 { .. } | State::Rc4(_) => 1,
        }
    }

    /// Encrypt or decrypt `buf` in place.
    pub fn apply(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.len() % self.alignment() != 0 {
            return Err(OfficeCryptoError::malformed(format!(
                "ciphertext length {} is not a multiple of the {}-byte block size",
                buf.len(),
                self.alignment()
            )));
        }

        match &mut self.state {
            State::Ecb { cipher, direction } => {
                for block in buf.chunks_exact_mut(AES_BLOCK) {
                    match direction {
                        Direction::Encrypt => cipher.encrypt(block),
                        Direction::Decrypt => cipher.decrypt(block),
                    }
                }
            }
            State::Cbc(state) => state.apply(buf),
            State::Cfb8 {
                cipher,
                register,
                direction,
            } => {
                for byte in buf.iter_mut() {
                    let mut keystream = *register;
                    cipher.encrypt(&mut keystream);
                    let input = *byte;
                    *byte ^= keystream[0];
                    let feedback = match direction {
                        Direction::Encrypt => *byte,
                        Direction::Decrypt => input,
                    };
                    register.copy_within(1.., 0);
                    register[AES_BLOCK - 1] = feedback;
                }
            }
            State::Rc4(rc4) => rc4.apply(buf),
        }
        Ok(())
    }
}

impl fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.state {
            State::Ecb { .. } => "AES-ECB",
            State::Cbc(_) => "AES-CBC",
            State::Cfb8 { .. } => "AES-CFB8",
            State::Rc4(_) => "RC4",
        };
        f.debug_struct("CipherContext")
            .field("mode", &mode)
            .finish_non_exhaustive()
    }
}

enum AesBlock {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesBlock {
    fn new(key: &[u8]) -> Result<Self> {
        let invalid = |_| OfficeCryptoError::config(format!("invalid AES key length {}", key.len()));
        match key.len() {
            16 => Aes128::new_from_slice(key).map(Self::Aes128).map_err(invalid),
            24 => Aes192::new_from_slice(key).map(Self::Aes192).map_err(invalid),
            32 => Aes256::new_from_slice(key).map(Self::Aes256).map_err(invalid),
            other => Err(OfficeCryptoError::config(format!(
                "invalid AES key length {other}"
            ))),
        }
    }

    fn encrypt(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes192(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.decrypt_block(block),
            Self::Aes192(c) => c.decrypt_block(block),
            Self::Aes256(c) => c.decrypt_block(block),
        }
    }
}

enum CbcState {
    Enc128(cbc::Encryptor<Aes128>),
    Enc192(cbc::Encryptor<Aes192>),
    Enc256(cbc::Encryptor<Aes256>),
    Dec128(cbc::Decryptor<Aes128>),
    Dec192(cbc::Decryptor<Aes192>),
    Dec256(cbc::Decryptor<Aes256>),
}

impl CbcState {
    fn new(key: &[u8], iv: &[u8], direction: Direction) -> Result<Self> {
        let invalid = |_| OfficeCryptoError::config("invalid AES-CBC key or IV length");
        match (key.len(), direction) {
            (16, Direction::Encrypt) => cbc::Encryptor::new_from_slices(key, iv)
                .map(Self::Enc128)
                .map_err(invalid),
            (24, Direction::Encrypt) => cbc::Encryptor::new_from_slices(key, iv)
                .map(Self::Enc192)
                .map_err(invalid),
            (32, Direction::Encrypt) => cbc::Encryptor::new_from_slices(key, iv)
                .map(Self::Enc256)
                .map_err(invalid),
            (16, Direction::Decrypt) => cbc::Decryptor::new_from_slices(key, iv)
                .map(Self::Dec128)
                .map_err(invalid),
            (24, Direction::Decrypt) => cbc::Decryptor::new_from_slices(key, iv)
                .map(Self::Dec192)
                .map_err(invalid),
            (32, Direction::Decrypt) => cbc::Decryptor::new_from_slices(key, iv)
                .map(Self::Dec256)
                .map_err(invalid),
            (other, _) => Err(OfficeCryptoError::config(format!(
                "invalid AES key length {other}"
            ))),
        }
    }

    fn apply(&mut self, buf: &mut [u8]) {
        for block in buf.chunks_exact_mut(AES_BLOCK) {
            let block = GenericArray::from_mut_slice(block);
            match self {
                Self::Enc128(c) => c.encrypt_block_mut(block),
                Self::Enc192(c) => c.encrypt_block_mut(block),
                Self::Enc256(c) => c.encrypt_block_mut(block),
                Self::Dec128(c) => c.decrypt_block_mut(block),
                Self::Dec192(c) => c.decrypt_block_mut(block),
                Self::Dec256(c) => c.decrypt_block_mut(block),
            }
        }
    }
}

// `rc4::Rc4` fixes the key size in the type, so keep one variant per byte length CryptoAPI can
// produce (40..=128 bits).
macro_rules! rc4_keystream {
    ($($len:literal => $variant:ident($size:ty)),* $(,)?) => {
        enum Rc4Keystream {
            $($variant(rc4::Rc4<$size>),)*
        }

        impl Rc4Keystream {
            fn new(key: &[u8]) -> Result<Self> {
                let invalid = |_| OfficeCryptoError::config("invalid RC4 key");
                match key.len() {
                    $($len => rc4::Rc4::<$size>::new_from_slice(key)
                        .map(Self::$variant)
                        .map_err(invalid),)*
                    other => Err(OfficeCryptoError::config(format!(
                        "RC4 key must be 5..=16 bytes, got {other}"
                    ))),
                }
            }

            fn apply(&mut self, buf: &mut [u8]) {
                match self {
                    $(Self::$variant(c) => c.apply_keystream(buf),)*
                }
            }
        }
    };
}

rc4_keystream! {
    5 => K5(U5),
    6 => K6(U6),
    7 => K7(U7),
    8 => K8(U8),
    9 => K9(U9),
    10 => K10(U10),
    11 => K11(U11),
    12 => K12(U12),
    13 => K13(U13),
    14 => K14(U14),
    15 => K15(U15),
    16 => K16(U16),
}

/// One-shot helper for metadata fields: key a fresh context and transform `data`.
pub(crate) fn transform(
    cipher: CipherAlgorithm,
    chaining: ChainingMode,
    key: &[u8],
    iv: &[u8],
    direction: Direction,
    data: &[u8],
) -> Result<Vec<u8>> {
    let mut ctx = CipherContext::new(cipher, chaining, key, iv, direction)?;
    let mut out = data.to_vec();
    ctx.apply(&mut out)?;
    Ok(out)
}
