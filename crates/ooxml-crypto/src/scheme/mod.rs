//! `EncryptionInfo` record: version header plus one of the metadata dialects.
//!
//! ```text
//! u16 major | u16 minor | u32 flags | dialect body
//! ```
//!
//! Office 97 RC4 (1.1) is the exception: it has no flags word and the body follows the version
//! directly.

mod agile;
mod legacy;

use std::fmt;

use rand::{CryptoRng, RngCore};

use crate::algorithm::{ChainingMode, CipherAlgorithm, HashAlgorithm};
use crate::chunk::{AgileChunks, EcbChunks, PayloadCipher, Rc4Chunks, Rc4Schedule};
use crate::error::{OfficeCryptoError, Result};
use crate::integrity::{IntegrityData, IntegrityProtector};
use crate::kdf::LEGACY_SPIN_COUNT;
use crate::util::ByteReader;
use crate::verifier::{
    build_verifier, ContentKey, PasswordKeyParams, VerifierData, VerifierKeying, SALT_LEN,
};
use crate::EncryptOptions;

pub use legacy::{AES_PROVIDER_NAME, RC4_PROVIDER_NAME};

/// `EncryptionVersionInfo.flags` bit: CryptoAPI encryption.
pub const FLAG_CRYPTOAPI: u32 = 0x04;
/// Document properties are left unencrypted.
pub const FLAG_DOC_PROPS: u32 = 0x08;
/// Extensible encryption with an external provider.
pub const FLAG_EXTERNAL: u32 = 0x10;
/// The cipher is AES.
pub const FLAG_AES: u32 = 0x20;
/// Reserved flags value every agile record carries.
pub const AGILE_FLAGS: u32 = 0x40;

/// The four ways a payload can be protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionScheme {
    /// XML descriptor, per-purpose keys, CBC/CFB chunks, HMAC integrity.
    Agile,
    /// Binary header, AES-ECB payload.
    Standard,
    /// Binary header, RC4 re-keyed every 512 bytes.
    CryptoApiRc4,
    /// Record-level RC4 with MD5 key derivation.
    Office97Rc4,
}

impl fmt::Display for EncryptionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EncryptionScheme::Agile => "agile",
            EncryptionScheme::Standard => "standard",
            EncryptionScheme::CryptoApiRc4 => "cryptoapi-rc4",
            EncryptionScheme::Office97Rc4 => "office97-rc4",
        })
    }
}

/// Algorithm parameters shared by every dialect.
///
/// For agile records the cipher fields describe `keyData` (the payload) and `spin_count` comes
/// from the password key encryptor. Legacy records have one set of parameters for everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionDescriptor {
    pub version_major: u16,
    pub version_minor: u16,
    pub flags: u32,
    pub cipher: CipherAlgorithm,
    pub chaining: ChainingMode,
    pub hash: HashAlgorithm,
    pub key_bits: u32,
    pub block_size: usize,
    pub salt_size: usize,
    pub key_salt: Vec<u8>,
    pub spin_count: u32,
}

/// CryptoAPI provider fields of the legacy binary header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardProvider {
    pub header_flags: u32,
    pub size_extra: u32,
    pub provider_type: u32,
    pub csp_name: String,
}

/// Agile-only parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgileParams {
    pub password: PasswordKeyParams,
    pub integrity: IntegrityData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dialect {
    Standard(StandardProvider),
    Office97Rc4,
    Agile(AgileParams),
}

/// Parsed `EncryptionInfo` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionInfo {
    pub descriptor: EncryptionDescriptor,
    pub verifier: VerifierData,
    pub dialect: Dialect,
}

impl EncryptionInfo {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let major = r.read_u16_le("EncryptionVersionInfo.major")?;
        let minor = r.read_u16_le("EncryptionVersionInfo.minor")?;

        let info = match (major, minor) {
            (1, 1) => legacy::parse_office97(&mut r)?,
            (4, 4) => {
                let flags = r.read_u32_le("EncryptionVersionInfo.flags")?;
                if flags != AGILE_FLAGS {
                    return Err(OfficeCryptoError::UnsupportedFormat(format!(
                        "agile EncryptionInfo flags {flags:#x}"
                    )));
                }
                agile::parse(r.remaining())?
            }
            (2..=4, 2) => {
                let flags = r.read_u32_le("EncryptionVersionInfo.flags")?;
                legacy::parse_standard(&mut r, major, minor, flags)?
            }
            _ => return Err(OfficeCryptoError::UnsupportedVersion { major, minor }),
        };

        log::debug!(
            "parsed {} EncryptionInfo {major}.{minor}: {} {}-bit, {}, spin count {}",
            info.scheme(),
            info.descriptor.cipher,
            info.descriptor.key_bits,
            info.descriptor.hash,
            info.descriptor.spin_count
        );
        Ok(info)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let d = &self.descriptor;
        let mut out = Vec::new();
        out.extend_from_slice(&d.version_major.to_le_bytes());
        out.extend_from_slice(&d.version_minor.to_le_bytes());
        match &self.dialect {
            Dialect::Office97Rc4 => legacy::write_office97(&self.verifier, &mut out)?,
            Dialect::Standard(provider) => {
                out.extend_from_slice(&d.flags.to_le_bytes());
                legacy::write_standard(d, provider, &self.verifier, &mut out)?;
            }
            Dialect::Agile(params) => {
                out.extend_from_slice(&d.flags.to_le_bytes());
                agile::write(d, params, &self.verifier, &mut out)?;
            }
        }
        Ok(out)
    }

    pub fn scheme(&self) -> EncryptionScheme {
        match &self.dialect {
            Dialect::Agile(_) => EncryptionScheme::Agile,
            Dialect::Office97Rc4 => EncryptionScheme::Office97Rc4,
            Dialect::Standard(_) if self.descriptor.cipher == CipherAlgorithm::Rc4 => {
                EncryptionScheme::CryptoApiRc4
            }
            Dialect::Standard(_) => EncryptionScheme::Standard,
        }
    }

    /// How the password is turned into verifier keys for this record.
    pub fn keying(&self) -> VerifierKeying {
        let d = &self.descriptor;
        match &self.dialect {
            Dialect::Agile(params) => VerifierKeying::PerPurpose(params.password),
            Dialect::Office97Rc4 => VerifierKeying::Office97Rc4,
            Dialect::Standard(_) if d.cipher == CipherAlgorithm::Rc4 => VerifierKeying::CryptoApiRc4 {
                key_bits: d.key_bits,
                hash: d.hash,
            },
            Dialect::Standard(_) => VerifierKeying::CryptDerived {
                cipher: d.cipher,
                key_bits: d.key_bits,
                hash: d.hash,
            },
        }
    }

    /// Spin count the password hash will be stretched with.
    pub fn password_spin_count(&self) -> u32 {
        match &self.dialect {
            Dialect::Agile(params) => params.password.spin_count,
            _ => self.descriptor.spin_count,
        }
    }

    pub fn integrity(&self) -> Option<&IntegrityData> {
        match &self.dialect {
            Dialect::Agile(params) => Some(&params.integrity),
            _ => None,
        }
    }

    /// HMAC protector for agile records, keyed with a verified content key.
    pub fn integrity_protector(&self, key: &ContentKey) -> Option<IntegrityProtector> {
        let d = &self.descriptor;
        match &self.dialect {
            Dialect::Agile(_) => Some(IntegrityProtector::new(
                key,
                &d.key_salt,
                d.cipher,
                d.chaining,
                d.hash,
                d.block_size,
            )),
            _ => None,
        }
    }

    /// Payload chunk strategy keyed with a verified content key.
    pub fn payload_cipher(&self, key: &ContentKey) -> Result<PayloadCipher> {
        let d = &self.descriptor;
        Ok(match self.scheme() {
            EncryptionScheme::Agile => PayloadCipher::Agile(AgileChunks::new(
                key,
                &d.key_salt,
                d.cipher,
                d.chaining,
                d.hash,
                d.block_size,
            )?),
            EncryptionScheme::Standard => PayloadCipher::Ecb(EcbChunks::new(key, d.cipher)?),
            EncryptionScheme::CryptoApiRc4 => PayloadCipher::Rc4(Rc4Chunks::new(
                key,
                Rc4Schedule::CryptoApi {
                    key_bits: d.key_bits,
                    hash: d.hash,
                },
            )?),
            EncryptionScheme::Office97Rc4 => {
                PayloadCipher::Rc4(Rc4Chunks::new(key, Rc4Schedule::Office97)?)
            }
        })
    }

    /// Fresh record for `options`, with a new verifier and content key for `password`.
    ///
    /// Agile records come back with empty integrity data; it is filled in with
    /// [`EncryptionInfo::set_integrity`] once the payload has been written.
    pub fn generate<R: RngCore + CryptoRng>(
        options: &EncryptOptions,
        password: &str,
        rng: &mut R,
    ) -> Result<(Self, ContentKey)> {
        options.validate()?;
        let cipher = options.cipher;
        let key_bits = cipher.default_key_bits();

        let (info, key) = match options.scheme {
            EncryptionScheme::Agile => {
                let password_params = PasswordKeyParams {
                    cipher,
                    chaining: options.chaining,
                    hash: options.hash,
                    key_bits,
                    block_size: cipher.block_size(),
                    spin_count: options.spin_count,
                };
                let (verifier, key) =
                    build_verifier(&VerifierKeying::PerPurpose(password_params), password, rng)?;
                let mut key_salt = vec![0u8; SALT_LEN];
                rng.fill_bytes(&mut key_salt);
                let descriptor = EncryptionDescriptor {
                    version_major: 4,
                    version_minor: 4,
                    flags: AGILE_FLAGS,
                    cipher,
                    chaining: options.chaining,
                    hash: options.hash,
                    key_bits,
                    block_size: cipher.block_size(),
                    salt_size: SALT_LEN,
                    key_salt,
                    spin_count: options.spin_count,
                };
                let dialect = Dialect::Agile(AgileParams {
                    password: password_params,
                    integrity: IntegrityData {
                        encrypted_hmac_key: Vec::new(),
                        encrypted_hmac_value: Vec::new(),
                    },
                });
                (Self { descriptor, verifier, dialect }, key)
            }
            EncryptionScheme::Standard | EncryptionScheme::CryptoApiRc4 => {
                let aes = options.scheme == EncryptionScheme::Standard;
                let keying = if aes {
                    VerifierKeying::CryptDerived {
                        cipher,
                        key_bits,
                        hash: options.hash,
                    }
                } else {
                    VerifierKeying::CryptoApiRc4 {
                        key_bits,
                        hash: options.hash,
                    }
                };
                let (verifier, key) = build_verifier(&keying, password, rng)?;
                let flags = if aes { FLAG_CRYPTOAPI | FLAG_AES } else { FLAG_CRYPTOAPI };
                let descriptor = EncryptionDescriptor {
                    version_major: 4,
                    version_minor: 2,
                    flags,
                    cipher,
                    chaining: ChainingMode::Ecb,
                    hash: options.hash,
                    key_bits,
                    block_size: cipher.block_size(),
                    salt_size: SALT_LEN,
                    key_salt: verifier.salt.clone(),
                    spin_count: LEGACY_SPIN_COUNT,
                };
                let provider = StandardProvider {
                    header_flags: flags,
                    size_extra: 0,
                    provider_type: if aes {
                        legacy::PROV_RSA_AES
                    } else {
                        legacy::PROV_RSA_FULL
                    },
                    csp_name: if aes { AES_PROVIDER_NAME } else { RC4_PROVIDER_NAME }.to_string(),
                };
                let dialect = Dialect::Standard(provider);
                (Self { descriptor, verifier, dialect }, key)
            }
            EncryptionScheme::Office97Rc4 => {
                let (verifier, key) = build_verifier(&VerifierKeying::Office97Rc4, password, rng)?;
                let descriptor = legacy::office97_descriptor(verifier.salt.clone());
                (
                    Self {
                        descriptor,
                        verifier,
                        dialect: Dialect::Office97Rc4,
                    },
                    key,
                )
            }
        };

        log::debug!(
            "generated {} EncryptionInfo: {} {}-bit, {}, spin count {}",
            info.scheme(),
            info.descriptor.cipher,
            info.descriptor.key_bits,
            info.descriptor.hash,
            info.password_spin_count()
        );
        Ok((info, key))
    }

    /// Attach the computed `dataIntegrity` to an agile record.
    pub fn set_integrity(&mut self, data: IntegrityData) -> Result<()> {
        match &mut self.dialect {
            Dialect::Agile(params) => {
                params.integrity = data;
                Ok(())
            }
            _ => Err(OfficeCryptoError::config(
                "only agile records carry integrity data",
            )),
        }
    }
}
