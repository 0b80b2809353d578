//! Agile `dataIntegrity`: an HMAC over the whole payload record.
//!
//! The HMAC key is random per document. Both the key and the HMAC value are stored encrypted
//! under the content key, each with its own IV derived from the key-data salt and a block
//! constant.

use std::fmt;
use std::io::Read;

use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::algorithm::{ChainingMode, CipherAlgorithm, HashAlgorithm};
use crate::cipher::{transform, Direction};
use crate::error::{OfficeCryptoError, Result};
use crate::kdf::{self, BLOCK_KEY_INTEGRITY_KEY, BLOCK_KEY_INTEGRITY_VALUE};
use crate::util::{ct_eq, zero_pad};
use crate::verifier::ContentKey;

/// Encrypted HMAC key and value as stored in `dataIntegrity`.
#[derive(Clone, PartialEq, Eq)]
pub struct IntegrityData {
    pub encrypted_hmac_key: Vec<u8>,
    pub encrypted_hmac_value: Vec<u8>,
}

impl fmt::Debug for IntegrityData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrityData")
            .field("encrypted_hmac_key_len", &self.encrypted_hmac_key.len())
            .field("encrypted_hmac_value_len", &self.encrypted_hmac_value.len())
            .finish()
    }
}

/// Computes and checks [`IntegrityData`] with the `keyData` parameters of one document.
pub struct IntegrityProtector {
    key: Zeroizing<Vec<u8>>,
    salt: Vec<u8>,
    cipher: CipherAlgorithm,
    chaining: ChainingMode,
    hash: HashAlgorithm,
    block_size: usize,
}

impl IntegrityProtector {
    pub fn new(
        content_key: &ContentKey,
        key_data_salt: &[u8],
        cipher: CipherAlgorithm,
        chaining: ChainingMode,
        hash: HashAlgorithm,
        block_size: usize,
    ) -> Self {
        Self {
            key: Zeroizing::new(content_key.as_bytes().to_vec()),
            salt: key_data_salt.to_vec(),
            cipher,
            chaining,
            hash,
            block_size,
        }
    }

    /// HMAC the payload record read from `payload` under a fresh random key.
    pub fn protect<P: Read, R: RngCore + CryptoRng>(
        &self,
        payload: P,
        rng: &mut R,
    ) -> Result<IntegrityData> {
        let mut hmac_key = Zeroizing::new(vec![0u8; self.hash.digest_len()]);
        rng.fill_bytes(&mut hmac_key);
        let hmac_value = hmac_stream(self.hash, &hmac_key, payload)?;

        Ok(IntegrityData {
            encrypted_hmac_key: self.seal(&hmac_key, &BLOCK_KEY_INTEGRITY_KEY)?,
            encrypted_hmac_value: self.seal(&hmac_value, &BLOCK_KEY_INTEGRITY_VALUE)?,
        })
    }

    /// Recompute the HMAC over `payload` and compare it with the stored value.
    pub fn verify<P: Read>(&self, data: &IntegrityData, payload: P) -> Result<()> {
        let digest_len = self.hash.digest_len();
        let hmac_key = self.open(&data.encrypted_hmac_key, &BLOCK_KEY_INTEGRITY_KEY)?;
        let expected = self.open(&data.encrypted_hmac_value, &BLOCK_KEY_INTEGRITY_VALUE)?;
        if hmac_key.len() < digest_len || expected.len() < digest_len {
            return Err(OfficeCryptoError::IntegrityCheckFailed);
        }

        let actual = hmac_stream(self.hash, &hmac_key[..digest_len], payload)?;
        if ct_eq(&actual, &expected[..digest_len]) {
            Ok(())
        } else {
            Err(OfficeCryptoError::IntegrityCheckFailed)
        }
    }

    fn iv(&self, block_constant: &[u8]) -> Vec<u8> {
        kdf::derive_iv(&self.salt, Some(block_constant), self.block_size, self.hash)
    }

    fn seal(&self, plain: &[u8], block_constant: &[u8]) -> Result<Vec<u8>> {
        let padded = Zeroizing::new(zero_pad(plain, self.block_size));
        transform(
            self.cipher,
            self.chaining,
            &self.key,
            &self.iv(block_constant),
            Direction::Encrypt,
            &padded,
        )
    }

    fn open(&self, sealed: &[u8], block_constant: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if sealed.len() % self.block_size != 0 {
            return Err(OfficeCryptoError::IntegrityCheckFailed);
        }
        transform(
            self.cipher,
            self.chaining,
            &self.key,
            &self.iv(block_constant),
            Direction::Decrypt,
            sealed,
        )
        .map(Zeroizing::new)
    }
}

fn hmac_stream<P: Read>(hash: HashAlgorithm, key: &[u8], mut payload: P) -> Result<Vec<u8>> {
    let mut mac = hash.hmac(key);
    let mut buf = vec![0u8; 8192];
    loop {
        let n = payload.read(&mut buf)?;
        if n == 0 {
            break;
        }
        mac.update(&buf[..n]);
    }
    Ok(mac.finalize().to_vec())
}
