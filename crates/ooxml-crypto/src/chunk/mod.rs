//! Chunked payload codec.
//!
//! The payload record is an 8-byte little-endian plaintext length followed by ciphertext laid
//! out in fixed-size chunks. Each chunk is encrypted with a cipher context that depends only on
//! the content key and the chunk index, so chunk `k` can be decrypted without touching chunks
//! `0..k`. What "a context for chunk `k`" means differs per dialect and is supplied by a
//! [`ChunkCipher`] strategy.
//!
//! [`PayloadReader`] and [`PayloadWriter`] drive fixed-chunk mode. [`StreamingCodec`] keeps one
//! context alive and re-keys only when told to, for record-oriented legacy streams.

mod reader;
mod streaming;
mod writer;

pub use reader::PayloadReader;
pub use streaming::{RekeyPolicy, StreamingCodec};
pub use writer::PayloadWriter;

use std::fmt;

use zeroize::Zeroizing;

use crate::algorithm::{ChainingMode, CipherAlgorithm, HashAlgorithm};
use crate::cipher::{CipherContext, Direction};
use crate::error::{OfficeCryptoError, Result};
use crate::kdf;
use crate::verifier::ContentKey;

/// Plaintext bytes per chunk for the block-cipher dialects.
pub const CHUNK_SIZE: usize = 4096;
/// RC4 payloads are re-keyed every 512 bytes.
pub const RC4_CHUNK_SIZE: usize = 512;
/// Length of the plaintext-size prefix at the start of the payload record.
pub const SIZE_PREFIX_LEN: u64 = 8;

/// Per-dialect cipher strategy for the chunk codec.
pub trait ChunkCipher {
    /// Plaintext bytes per chunk.
    fn chunk_size(&self) -> usize;

    /// The final chunk is zero-padded to a multiple of this. 1 for stream ciphers.
    fn padding_block(&self) -> usize;

    /// Fresh cipher context for `chunk_index`.
    fn init_for_chunk(&self, chunk_index: u32, direction: Direction) -> Result<CipherContext>;
}

impl<T: ChunkCipher + ?Sized> ChunkCipher for &T {
    fn chunk_size(&self) -> usize {
        (**self).chunk_size()
    }

    fn padding_block(&self) -> usize {
        (**self).padding_block()
    }

    fn init_for_chunk(&self, chunk_index: u32, direction: Direction) -> Result<CipherContext> {
        (**self).init_for_chunk(chunk_index, direction)
    }
}

/// Agile chunks: block cipher keyed with the content key, IV derived from the key-data salt and
/// the chunk index.
pub struct AgileChunks {
    key: Zeroizing<Vec<u8>>,
    salt: Vec<u8>,
    cipher: CipherAlgorithm,
    chaining: ChainingMode,
    hash: HashAlgorithm,
    block_size: usize,
}

impl AgileChunks {
    pub fn new(
        key: &ContentKey,
        salt: &[u8],
        cipher: CipherAlgorithm,
        chaining: ChainingMode,
        hash: HashAlgorithm,
        block_size: usize,
    ) -> Result<Self> {
        if block_size == 0 || block_size != cipher.block_size() {
            return Err(OfficeCryptoError::config(format!(
                "block size {block_size} does not match {cipher}"
            )));
        }
        let chunks = Self {
            key: Zeroizing::new(key.as_bytes().to_vec()),
            salt: salt.to_vec(),
            cipher,
            chaining,
            hash,
            block_size,
        };
        chunks.init_for_chunk(0, Direction::Decrypt)?;
        Ok(chunks)
    }
}

impl ChunkCipher for AgileChunks {
    fn chunk_size(&self) -> usize {
        CHUNK_SIZE
    }

    fn padding_block(&self) -> usize {
        self.block_size
    }

    fn init_for_chunk(&self, chunk_index: u32, direction: Direction) -> Result<CipherContext> {
        let iv = kdf::derive_chunk_iv(&self.salt, chunk_index, self.block_size, self.hash);
        CipherContext::new(self.cipher, self.chaining, &self.key, &iv, direction)
    }
}

/// Legacy AES chunks. ECB carries no state between blocks, so every chunk gets the same key.
pub struct EcbChunks {
    key: Zeroizing<Vec<u8>>,
    cipher: CipherAlgorithm,
}

impl EcbChunks {
    pub fn new(key: &ContentKey, cipher: CipherAlgorithm) -> Result<Self> {
        let chunks = Self {
            key: Zeroizing::new(key.as_bytes().to_vec()),
            cipher,
        };
        chunks.init_for_chunk(0, Direction::Decrypt)?;
        Ok(chunks)
    }
}

impl ChunkCipher for EcbChunks {
    fn chunk_size(&self) -> usize {
        CHUNK_SIZE
    }

    fn padding_block(&self) -> usize {
        self.cipher.block_size()
    }

    fn init_for_chunk(&self, _chunk_index: u32, direction: Direction) -> Result<CipherContext> {
        CipherContext::new(self.cipher, ChainingMode::Ecb, &self.key, &[], direction)
    }
}

/// How an RC4 block key is derived from the base key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rc4Schedule {
    CryptoApi { key_bits: u32, hash: HashAlgorithm },
    Office97,
}

/// RC4 re-keyed per block. Also the strategy behind [`StreamingCodec`] for record streams.
pub struct Rc4Chunks {
    base: Zeroizing<Vec<u8>>,
    schedule: Rc4Schedule,
    block_len: usize,
}

impl Rc4Chunks {
    pub fn new(key: &ContentKey, schedule: Rc4Schedule) -> Result<Self> {
        Self::with_block_len(key, schedule, RC4_CHUNK_SIZE)
    }

    /// RC4 with a non-default re-key interval (BIFF8 record streams use 1024).
    pub fn with_block_len(key: &ContentKey, schedule: Rc4Schedule, block_len: usize) -> Result<Self> {
        if block_len == 0 {
            return Err(OfficeCryptoError::config("RC4 block length must be non-zero"));
        }
        if let Rc4Schedule::CryptoApi { key_bits, .. } = schedule {
            if !CipherAlgorithm::Rc4.supports_key_bits(key_bits) {
                return Err(OfficeCryptoError::config(format!(
                    "{key_bits}-bit key does not fit RC4"
                )));
            }
        }
        let chunks = Self {
            base: Zeroizing::new(key.as_bytes().to_vec()),
            schedule,
            block_len,
        };
        chunks.init_for_chunk(0, Direction::Decrypt)?;
        Ok(chunks)
    }

    fn block_key(&self, block: u32) -> Zeroizing<Vec<u8>> {
        match self.schedule {
            Rc4Schedule::CryptoApi { key_bits, hash } => {
                kdf::cryptoapi_rc4_block_key(&self.base, block, (key_bits / 8) as usize, hash)
            }
            Rc4Schedule::Office97 => kdf::office97_rc4_block_key(&self.base, block),
        }
    }
}

impl ChunkCipher for Rc4Chunks {
    fn chunk_size(&self) -> usize {
        self.block_len
    }

    fn padding_block(&self) -> usize {
        1
    }

    fn init_for_chunk(&self, chunk_index: u32, direction: Direction) -> Result<CipherContext> {
        let key = self.block_key(chunk_index);
        CipherContext::new(CipherAlgorithm::Rc4, ChainingMode::Ecb, &key, &[], direction)
    }
}

/// Closed set of payload strategies, one per dialect.
pub enum PayloadCipher {
    Agile(AgileChunks),
    Ecb(EcbChunks),
    Rc4(Rc4Chunks),
}

impl ChunkCipher for PayloadCipher {
    fn chunk_size(&self) -> usize {
        match self {
            PayloadCipher::Agile(s) => s.chunk_size(),
            PayloadCipher::Ecb(s) => s.chunk_size(),
            PayloadCipher::Rc4(s) => s.chunk_size(),
        }
    }

    fn padding_block(&self) -> usize {
        match self {
            PayloadCipher::Agile(s) => s.padding_block(),
            PayloadCipher::Ecb(s) => s.padding_block(),
            PayloadCipher::Rc4(s) => s.padding_block(),
        }
    }

    fn init_for_chunk(&self, chunk_index: u32, direction: Direction) -> Result<CipherContext> {
        match self {
            PayloadCipher::Agile(s) => s.init_for_chunk(chunk_index, direction),
            PayloadCipher::Ecb(s) => s.init_for_chunk(chunk_index, direction),
            PayloadCipher::Rc4(s) => s.init_for_chunk(chunk_index, direction),
        }
    }
}

impl fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadCipher::Agile(s) => f
                .debug_struct("Agile")
                .field("key_len", &s.key.len())
                .field("cipher", &s.cipher)
                .field("chaining", &s.chaining)
                .field("hash", &s.hash)
                .finish(),
            PayloadCipher::Ecb(s) => f
                .debug_struct("Ecb")
                .field("key_len", &s.key.len())
                .field("cipher", &s.cipher)
                .finish(),
            PayloadCipher::Rc4(s) => f
                .debug_struct("Rc4")
                .field("schedule", &s.schedule)
                .field("block_len", &s.block_len)
                .finish(),
        }
    }
}

/// Zero a buffer including its spare capacity before it is reused.
pub(crate) fn zeroize_full(buf: &mut Vec<u8>) {
    use zeroize::Zeroize as _;
    buf.zeroize();
    for slot in buf.spare_capacity_mut() {
        slot.write(0);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn patterned_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8).collect()
    }

    pub(crate) fn agile_strategy() -> AgileChunks {
        AgileChunks::new(
            &ContentKey::new(&[0x42; 32]),
            &[0x11; 16],
            CipherAlgorithm::Aes256,
            ChainingMode::Cbc,
            HashAlgorithm::Sha512,
            16,
        )
        .unwrap()
    }

    #[test]
    fn agile_strategy_rejects_mismatched_key_at_construction() {
        let err = AgileChunks::new(
            &ContentKey::new(&[0x42; 20]),
            &[0x11; 16],
            CipherAlgorithm::Aes256,
            ChainingMode::Cbc,
            HashAlgorithm::Sha512,
            16,
        )
        .err()
        .expect("20-byte key must be rejected");
        assert!(matches!(err, OfficeCryptoError::Configuration(_)), "{err:?}");

        let err = AgileChunks::new(
            &ContentKey::new(&[0x42; 32]),
            &[0x11; 16],
            CipherAlgorithm::Aes256,
            ChainingMode::Cbc,
            HashAlgorithm::Sha512,
            8,
        )
        .err()
        .expect("block size 8 must be rejected");
        assert!(matches!(err, OfficeCryptoError::Configuration(_)), "{err:?}");
    }

    #[test]
    fn chunk_contexts_differ_per_index() {
        let s = agile_strategy();
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        s.init_for_chunk(0, Direction::Encrypt).unwrap().apply(&mut a).unwrap();
        s.init_for_chunk(1, Direction::Encrypt).unwrap().apply(&mut b).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rc4_strategy_validates_key_bits() {
        let key = ContentKey::new(&[1; 20]);
        assert!(Rc4Chunks::new(
            &key,
            Rc4Schedule::CryptoApi {
                key_bits: 44,
                hash: HashAlgorithm::Sha1
            }
        )
        .is_err());
        let s = Rc4Chunks::new(
            &key,
            Rc4Schedule::CryptoApi {
                key_bits: 40,
                hash: HashAlgorithm::Sha1,
            },
        )
        .unwrap();
        assert_eq!(s.padding_block(), 1);
        assert_eq!(s.chunk_size(), RC4_CHUNK_SIZE);
    }

    #[test]
    fn payload_cipher_debug_hides_keys() {
        let rendered = format!("{:?}", PayloadCipher::Agile(agile_strategy()));
        assert!(rendered.contains("key_len: 32"), "{rendered}");
        assert!(!rendered.contains("66"), "{rendered}");
    }
}
