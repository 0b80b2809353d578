//! Password verifier: an encrypted random value plus its encrypted hash, and (agile only) the
//! encrypted content key.
//!
//! Checking a password never touches the payload. A mismatch is reported as
//! [`OfficeCryptoError::WrongPassword`] no matter which step failed.

use std::fmt;

use rand::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::algorithm::{ChainingMode, CipherAlgorithm, HashAlgorithm};
use crate::cipher::{transform, CipherContext, Direction};
use crate::error::{OfficeCryptoError, Result};
use crate::kdf;
use crate::util::{ct_eq, zero_pad};

/// Every salt in both dialects is 16 bytes.
pub const SALT_LEN: usize = 16;
/// The random verifier value is one salt long.
pub const VERIFIER_LEN: usize = 16;

/// On-disk verifier fields.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifierData {
    pub salt: Vec<u8>,
    pub encrypted_verifier_input: Vec<u8>,
    pub encrypted_verifier_hash: Vec<u8>,
    /// Only the agile dialect wraps a separate content key.
    pub encrypted_content_key: Option<Vec<u8>>,
    pub verifier_hash_size: usize,
}

impl fmt::Debug for VerifierData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifierData")
            .field("salt_len", &self.salt.len())
            .field("encrypted_verifier_input_len", &self.encrypted_verifier_input.len())
            .field("encrypted_verifier_hash_len", &self.encrypted_verifier_hash.len())
            .field(
                "encrypted_content_key_len",
                &self.encrypted_content_key.as_ref().map(Vec::len),
            )
            .field("verifier_hash_size", &self.verifier_hash_size)
            .finish()
    }
}

/// Key bytes recovered from a verified password.
///
/// For the RC4 variants this is the base material every per-block RC4 key is derived from.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ContentKey {
    bytes: Vec<u8>,
}

impl ContentKey {
    pub(crate) fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey(<{} bytes redacted>)", self.bytes.len())
    }
}

/// Parameters of the agile password key encryptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordKeyParams {
    pub cipher: CipherAlgorithm,
    pub chaining: ChainingMode,
    pub hash: HashAlgorithm,
    pub key_bits: u32,
    pub block_size: usize,
    pub spin_count: u32,
}

/// How a dialect turns a password into the keys protecting the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierKeying {
    /// Agile: one key per purpose, derived with block constants; IV is the salt.
    PerPurpose(PasswordKeyParams),
    /// Legacy AES: a single `CryptDeriveKey` key, ECB.
    CryptDerived {
        cipher: CipherAlgorithm,
        key_bits: u32,
        hash: HashAlgorithm,
    },
    /// Legacy CryptoAPI RC4: block-0 key, verifier and hash share one keystream.
    CryptoApiRc4 { key_bits: u32, hash: HashAlgorithm },
    /// Office 97 RC4 (MD5).
    Office97Rc4,
}

impl VerifierKeying {
    fn verifier_hash(&self) -> HashAlgorithm {
        match self {
            VerifierKeying::PerPurpose(params) => params.hash,
            VerifierKeying::CryptDerived { hash, .. } => *hash,
            VerifierKeying::CryptoApiRc4 { hash, .. } => *hash,
            VerifierKeying::Office97Rc4 => HashAlgorithm::Md5,
        }
    }
}

/// Generate a fresh verifier for `password` and the key that will encrypt the payload.
pub fn build_verifier<R: RngCore + CryptoRng>(
    keying: &VerifierKeying,
    password: &str,
    rng: &mut R,
) -> Result<(VerifierData, ContentKey)> {
    let password = kdf::password_utf16le(password);
    let mut salt = vec![0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);
    let mut verifier = Zeroizing::new(vec![0u8; VERIFIER_LEN]);
    rng.fill_bytes(&mut verifier);
    let hash = keying.verifier_hash();
    let verifier_hash = hash.digest(&[&verifier[..]]);

    match keying {
        VerifierKeying::PerPurpose(params) => {
            let h = kdf::derive_password_hash(&password, &salt, params.spin_count, params.hash);
            let key_len = (params.key_bits / 8) as usize;
            let mut content_key = Zeroizing::new(vec![0u8; key_len]);
            rng.fill_bytes(&mut content_key);

            let wrap = |constant: &[u8], value: &[u8]| -> Result<Vec<u8>> {
                let key = kdf::derive_block_key(&h, constant, key_len, params.hash);
                let iv = kdf::derive_iv(&salt, None, params.block_size, params.hash);
                transform(
                    params.cipher,
                    params.chaining,
                    &key,
                    &iv,
                    Direction::Encrypt,
                    &Zeroizing::new(zero_pad(value, params.block_size)),
                )
            };

            let data = VerifierData {
                encrypted_verifier_input: wrap(&kdf::BLOCK_KEY_VERIFIER_INPUT, &verifier)?,
                encrypted_verifier_hash: wrap(&kdf::BLOCK_KEY_VERIFIER_HASH, &verifier_hash)?,
                encrypted_content_key: Some(wrap(&kdf::BLOCK_KEY_CONTENT_KEY, &content_key)?),
                verifier_hash_size: params.hash.digest_len(),
                salt,
            };
            Ok((data, ContentKey::new(&content_key)))
        }
        VerifierKeying::CryptDerived {
            cipher,
            key_bits,
            hash,
        } => {
            let h = kdf::derive_password_hash(&password, &salt, kdf::LEGACY_SPIN_COUNT, *hash);
            let key_len = (*key_bits / 8) as usize;
            let key = kdf::legacy_block_cipher_key(&h, key_len, *hash)?;
            let block = cipher.block_size();
            let encrypt = |value: &[u8]| {
                transform(
                    *cipher,
                    ChainingMode::Ecb,
                    &key,
                    &[],
                    Direction::Encrypt,
                    &Zeroizing::new(zero_pad(value, block)),
                )
            };
            let data = VerifierData {
                encrypted_verifier_input: encrypt(&verifier)?,
                encrypted_verifier_hash: encrypt(&verifier_hash)?,
                encrypted_content_key: None,
                verifier_hash_size: hash.digest_len(),
                salt,
            };
            Ok((data, ContentKey::new(&key)))
        }
        VerifierKeying::CryptoApiRc4 { key_bits, hash } => {
            let h = kdf::derive_password_hash(&password, &salt, kdf::LEGACY_SPIN_COUNT, *hash);
            let key0 = kdf::cryptoapi_rc4_block_key(&h, 0, (*key_bits / 8) as usize, *hash);
            let (input, hash_ct) = rc4_verifier_pass(&key0, &verifier, &verifier_hash)?;
            let data = VerifierData {
                encrypted_verifier_input: input,
                encrypted_verifier_hash: hash_ct,
                encrypted_content_key: None,
                verifier_hash_size: hash.digest_len(),
                salt,
            };
            Ok((data, ContentKey::new(&h)))
        }
        VerifierKeying::Office97Rc4 => {
            let base = kdf::office97_rc4_base_key(&password, &salt);
            let key0 = kdf::office97_rc4_block_key(&base, 0);
            let (input, hash_ct) = rc4_verifier_pass(&key0, &verifier, &verifier_hash)?;
            let data = VerifierData {
                encrypted_verifier_input: input,
                encrypted_verifier_hash: hash_ct,
                encrypted_content_key: None,
                verifier_hash_size: HashAlgorithm::Md5.digest_len(),
                salt,
            };
            Ok((data, ContentKey::new(&base)))
        }
    }
}

/// Check `password` against `data` and return the content key on success.
pub fn verify_and_recover_key(
    keying: &VerifierKeying,
    password: &str,
    data: &VerifierData,
) -> Result<ContentKey> {
    let password = kdf::password_utf16le(password);
    let hash = keying.verifier_hash();
    if data.verifier_hash_size > hash.digest_len() {
        return Err(OfficeCryptoError::malformed(format!(
            "verifier hash size {} exceeds the {hash} digest length",
            data.verifier_hash_size
        )));
    }

    match keying {
        VerifierKeying::PerPurpose(params) => {
            let h = kdf::derive_password_hash(&password, &data.salt, params.spin_count, params.hash);
            let key_len = (params.key_bits / 8) as usize;
            let open = |constant: &[u8], value: &[u8]| -> Result<Zeroizing<Vec<u8>>> {
                let key = kdf::derive_block_key(&h, constant, key_len, params.hash);
                let iv = kdf::derive_iv(&data.salt, None, params.block_size, params.hash);
                transform(
                    params.cipher,
                    params.chaining,
                    &key,
                    &iv,
                    Direction::Decrypt,
                    value,
                )
                .map(Zeroizing::new)
            };

            let input = open(&kdf::BLOCK_KEY_VERIFIER_INPUT, &data.encrypted_verifier_input)?;
            let expected =
                open(&kdf::BLOCK_KEY_VERIFIER_HASH, &data.encrypted_verifier_hash)?;
            if !verifier_matches(hash, &input, data.salt.len(), &expected, data.verifier_hash_size)
            {
                return Err(OfficeCryptoError::WrongPassword);
            }

            let wrapped = data.encrypted_content_key.as_deref().ok_or_else(|| {
                OfficeCryptoError::malformed("agile verifier is missing encryptedKeyValue")
            })?;
            let key = open(&kdf::BLOCK_KEY_CONTENT_KEY, wrapped)?;
            if key.len() < key_len {
                return Err(OfficeCryptoError::malformed(
                    "encryptedKeyValue is shorter than keyBits",
                ));
            }
            Ok(ContentKey::new(&key[..key_len]))
        }
        VerifierKeying::CryptDerived {
            cipher,
            key_bits,
            hash,
        } => {
            let h = kdf::derive_password_hash(&password, &data.salt, kdf::LEGACY_SPIN_COUNT, *hash);
            let key_len = (*key_bits / 8) as usize;
            let key = kdf::legacy_block_cipher_key(&h, key_len, *hash)?;
            let mut ctx =
                CipherContext::new(*cipher, ChainingMode::Ecb, &key, &[], Direction::Decrypt)?;
            let mut input = Zeroizing::new(data.encrypted_verifier_input.clone());
            ctx.apply(&mut input)?;
            let mut expected = Zeroizing::new(data.encrypted_verifier_hash.clone());
            ctx.apply(&mut expected)?;
            if !verifier_matches(*hash, &input, VERIFIER_LEN, &expected, data.verifier_hash_size) {
                return Err(OfficeCryptoError::WrongPassword);
            }
            Ok(ContentKey::new(&key))
        }
        VerifierKeying::CryptoApiRc4 { key_bits, hash } => {
            let h = kdf::derive_password_hash(&password, &data.salt, kdf::LEGACY_SPIN_COUNT, *hash);
            let key0 = kdf::cryptoapi_rc4_block_key(&h, 0, (*key_bits / 8) as usize, *hash);
            let (input, expected) =
                rc4_verifier_pass(&key0, &data.encrypted_verifier_input, &data.encrypted_verifier_hash)?;
            let (input, expected) = (Zeroizing::new(input), Zeroizing::new(expected));
            if !verifier_matches(*hash, &input, VERIFIER_LEN, &expected, data.verifier_hash_size) {
                return Err(OfficeCryptoError::WrongPassword);
            }
            Ok(ContentKey::new(&h))
        }
        VerifierKeying::Office97Rc4 => {
            let base = kdf::office97_rc4_base_key(&password, &data.salt);
            let key0 = kdf::office97_rc4_block_key(&base, 0);
            let (input, expected) =
                rc4_verifier_pass(&key0, &data.encrypted_verifier_input, &data.encrypted_verifier_hash)?;
            let (input, expected) = (Zeroizing::new(input), Zeroizing::new(expected));
            if !verifier_matches(
                HashAlgorithm::Md5,
                &input,
                VERIFIER_LEN,
                &expected,
                data.verifier_hash_size,
            ) {
                return Err(OfficeCryptoError::WrongPassword);
            }
            Ok(ContentKey::new(&base))
        }
    }
}

/// Hash the decrypted verifier and compare its prefix with the decrypted hash in constant time.
///
/// Short buffers count as a mismatch so a corrupted verifier looks like any other wrong
/// password.
fn verifier_matches(
    hash: HashAlgorithm,
    input: &[u8],
    input_len: usize,
    expected: &[u8],
    hash_len: usize,
) -> bool {
    if input.len() < input_len || expected.len() < hash_len || hash_len == 0 {
        return false;
    }
    let actual = hash.digest(&[&input[..input_len]]);
    ct_eq(&actual[..hash_len], &expected[..hash_len])
}

/// RC4 verifier fields are one keystream: verifier first, hash second.
fn rc4_verifier_pass(key: &[u8], first: &[u8], second: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let mut ctx = CipherContext::new(
        CipherAlgorithm::Rc4,
        ChainingMode::Ecb,
        key,
        &[],
        Direction::Encrypt,
    )?;
    let mut a = first.to_vec();
    let mut b = second.to_vec();
    ctx.apply(&mut a)?;
    ctx.apply(&mut b)?;
    Ok((a, b))
}
