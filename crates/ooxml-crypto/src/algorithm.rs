//! Closed registries for the algorithms that can appear in encryption metadata.
//!
//! Each algorithm is a row in an immutable table keyed by the enum variant. Both dialects look
//! algorithms up here: the legacy binary header by CryptoAPI `ALG_ID`, the agile XML descriptor
//! by name (plus `keyBits` to pick the AES variant).

use std::fmt;

use hmac::{Hmac, Mac};
use zeroize::Zeroizing;

/// Symmetric ciphers known to MS-OFFCRYPTO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgorithm {
    Rc4,
    Aes128,
    Aes192,
    Aes256,
    Rc2,
    Des,
    Des3,
    Des3_112,
}

struct CipherInfo {
    alg_id: u32,
    xml_name: &'static str,
    block_size: usize,
    /// Inclusive range of key sizes (bits) and the step between them.
    key_bits: (u32, u32, u32),
    implemented: bool,
}

const fn cipher_info(alg: CipherAlgorithm) -> CipherInfo {
    match alg {
        CipherAlgorithm::Rc4 => CipherInfo {
            alg_id: 0x6801,
            xml_name: "RC4",
            block_size: 1,
            key_bits: (40, 128, 8),
            implemented: true,
        },
        CipherAlgorithm::Aes128 => CipherInfo {
            alg_id: 0x660E,
            xml_name: "AES",
            block_size: 16,
            key_bits: (128, 128, 1),
            implemented: true,
        },
        CipherAlgorithm::Aes192 => CipherInfo {
            alg_id: 0x660F,
            xml_name: "AES",
            block_size: 16,
            key_bits: (192, 192, 1),
            implemented: true,
        },
        CipherAlgorithm::Aes256 => CipherInfo {
            alg_id: 0x6610,
            xml_name: "AES",
            block_size: 16,
            key_bits: (256, 256, 1),
            implemented: true,
        },
        CipherAlgorithm::Rc2 => CipherInfo {
            alg_id: 0x6602,
            xml_name: "RC2",
            block_size: 8,
            key_bits: (40, 128, 8),
            implemented: false,
        },
        CipherAlgorithm::Des => CipherInfo {
            alg_id: 0x6601,
            xml_name: "DES",
            block_size: 8,
            key_bits: (64, 64, 1),
            implemented: false,
        },
        CipherAlgorithm::Des3 => CipherInfo {
            alg_id: 0x6603,
            xml_name: "3DES",
            block_size: 8,
            key_bits: (192, 192, 1),
            implemented: false,
        },
        CipherAlgorithm::Des3_112 => CipherInfo {
            alg_id: 0x6609,
            xml_name: "3DES_112",
            block_size: 8,
            key_bits: (128, 128, 1),
            implemented: false,
        },
    }
}

impl CipherAlgorithm {
    pub const ALL: [CipherAlgorithm; 8] = [
        CipherAlgorithm::Rc4,
        CipherAlgorithm::Aes128,
        CipherAlgorithm::Aes192,
        CipherAlgorithm::Aes256,
        CipherAlgorithm::Rc2,
        CipherAlgorithm::Des,
        CipherAlgorithm::Des3,
        CipherAlgorithm::Des3_112,
    ];

    /// CryptoAPI `ALG_ID` as stored in the legacy binary header.
    pub fn alg_id(self) -> u32 {
        cipher_info(self).alg_id
    }

    pub fn from_alg_id(alg_id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.alg_id() == alg_id)
    }

    /// Name used by the `cipherAlgorithm` attribute of the agile XML descriptor.
    pub fn xml_name(self) -> &'static str {
        cipher_info(self).xml_name
    }

    /// Resolve an agile `cipherAlgorithm` attribute. AES needs `keyBits` to pick a variant.
    pub fn from_xml_name(name: &str, key_bits: u32) -> Option<Self> {
        let name = name.trim();
        if name.eq_ignore_ascii_case("AES") {
            return match key_bits {
                128 => Some(Self::Aes128),
                192 => Some(Self::Aes192),
                256 => Some(Self::Aes256),
                _ => None,
            };
        }
        Self::ALL
            .into_iter()
            .find(|alg| alg.xml_name().eq_ignore_ascii_case(name))
    }

    /// Cipher block size in bytes; 1 for the RC4 stream cipher.
    pub fn block_size(self) -> usize {
        cipher_info(self).block_size
    }

    pub fn is_stream_cipher(self) -> bool {
        self.block_size() == 1
    }

    pub fn supports_key_bits(self, key_bits: u32) -> bool {
        let (min, max, step) = cipher_info(self).key_bits;
        (min..=max).contains(&key_bits) && (key_bits - min) % step == 0
    }

    /// Key size used when the caller does not pick one.
    pub fn default_key_bits(self) -> u32 {
        let (min, max, _) = cipher_info(self).key_bits;
        match self {
            // CryptoAPI RC4 has defaulted to 128-bit keys since the export restrictions ended.
            CipherAlgorithm::Rc4 => max,
            _ => min,
        }
    }

    /// Whether this crate can actually run the cipher (the rest are parse-only).
    pub fn is_implemented(self) -> bool {
        cipher_info(self).implemented
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CipherAlgorithm::Rc4 => "RC4",
            CipherAlgorithm::Aes128 => "AES-128",
            CipherAlgorithm::Aes192 => "AES-192",
            CipherAlgorithm::Aes256 => "AES-256",
            CipherAlgorithm::Rc2 => "RC2",
            CipherAlgorithm::Des => "DES",
            CipherAlgorithm::Des3 => "3DES",
            CipherAlgorithm::Des3_112 => "3DES-112",
        };
        f.write_str(name)
    }
}

/// Block cipher mode of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainingMode {
    Ecb,
    Cbc,
    /// 8-bit cipher feedback.
    Cfb8,
}

impl ChainingMode {
    /// `cipherChaining` attribute value. ECB never appears in agile metadata.
    pub fn xml_name(self) -> Option<&'static str> {
        match self {
            ChainingMode::Ecb => None,
            ChainingMode::Cbc => Some("ChainingModeCBC"),
            ChainingMode::Cfb8 => Some("ChainingModeCFB"),
        }
    }

    pub fn from_xml_name(name: &str) -> Option<Self> {
        match name.trim() {
            "ChainingModeCBC" => Some(ChainingMode::Cbc),
            "ChainingModeCFB" => Some(ChainingMode::Cfb8),
            _ => None,
        }
    }
}

impl fmt::Display for ChainingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChainingMode::Ecb => "ECB",
            ChainingMode::Cbc => "CBC",
            ChainingMode::Cfb8 => "CFB-8",
        })
    }
}

/// Hash algorithms usable for password hashing and the integrity HMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Md5,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 5] = [
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
        HashAlgorithm::Md5,
    ];

    pub fn xml_name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha384 => "SHA384",
            HashAlgorithm::Sha512 => "SHA512",
            HashAlgorithm::Md5 => "MD5",
        }
    }

    /// Parse a `hashAlgorithm` attribute.
    ///
    /// Names are case-insensitive; `SHA-256` / `sha_256` spellings seen in other tooling are
    /// accepted too.
    pub fn from_xml_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace(['-', '_'], "");
        Self::ALL
            .into_iter()
            .find(|alg| alg.xml_name().eq_ignore_ascii_case(&normalized))
    }

    /// CryptoAPI `ALG_ID` (`algIdHash` in the legacy header).
    pub fn alg_id(self) -> u32 {
        match self {
            HashAlgorithm::Sha1 => 0x8004,
            HashAlgorithm::Sha256 => 0x800C,
            HashAlgorithm::Sha384 => 0x800D,
            HashAlgorithm::Sha512 => 0x800E,
            HashAlgorithm::Md5 => 0x8003,
        }
    }

    pub fn from_alg_id(alg_id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.alg_id() == alg_id)
    }

    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
            HashAlgorithm::Md5 => 16,
        }
    }

    /// Hash the concatenation of `parts`.
    pub fn digest(self, parts: &[&[u8]]) -> Zeroizing<Vec<u8>> {
        fn run<D: sha2::Digest>(parts: &[&[u8]]) -> Zeroizing<Vec<u8>> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            Zeroizing::new(hasher.finalize().to_vec())
        }

        match self {
            HashAlgorithm::Sha1 => run::<sha1::Sha1>(parts),
            HashAlgorithm::Sha256 => run::<sha2::Sha256>(parts),
            HashAlgorithm::Sha384 => run::<sha2::Sha384>(parts),
            HashAlgorithm::Sha512 => run::<sha2::Sha512>(parts),
            HashAlgorithm::Md5 => run::<md5::Md5>(parts),
        }
    }

    /// Start an incremental HMAC keyed with `key`.
    pub fn hmac(self, key: &[u8]) -> HmacState {
        // HMAC accepts keys of any length, so `new_from_slice` cannot fail here.
        fn keyed<M: Mac + hmac::digest::KeyInit>(key: &[u8]) -> M {
            match <M as hmac::digest::KeyInit>::new_from_slice(key) {
                Ok(mac) => mac,
                Err(_) => unreachable!("HMAC keys may have any length"),
            }
        }

        match self {
            HashAlgorithm::Sha1 => HmacState::Sha1(keyed(key)),
            HashAlgorithm::Sha256 => HmacState::Sha256(keyed(key)),
            HashAlgorithm::Sha384 => HmacState::Sha384(keyed(key)),
            HashAlgorithm::Sha512 => HmacState::Sha512(keyed(key)),
            HashAlgorithm::Md5 => HmacState::Md5(keyed(key)),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
            HashAlgorithm::Md5 => "MD5",
        })
    }
}

/// Running HMAC over one of the supported hash algorithms.
#[derive(Clone)]
pub enum HmacState {
    Sha1(Hmac<sha1::Sha1>),
    Sha256(Hmac<sha2::Sha256>),
    Sha384(Hmac<sha2::Sha384>),
    Sha512(Hmac<sha2::Sha512>),
    Md5(Hmac<md5::Md5>),
}

impl HmacState {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            HmacState::Sha1(mac) => mac.update(data),
            HmacState::Sha256(mac) => mac.update(data),
            HmacState::Sha384(mac) => mac.update(data),
            HmacState::Sha512(mac) => mac.update(data),
            HmacState::Md5(mac) => mac.update(data),
        }
    }

    pub fn finalize(self) -> Zeroizing<Vec<u8>> {
        let bytes = match self {
            HmacState::Sha1(mac) => mac.finalize().into_bytes().to_vec(),
            HmacState::Sha256(mac) => mac.finalize().into_bytes().to_vec(),
            HmacState::Sha384(mac) => mac.finalize().into_bytes().to_vec(),
            HmacState::Sha512(mac) => mac.finalize().into_bytes().to_vec(),
            HmacState::Md5(mac) => mac.finalize().into_bytes().to_vec(),
        };
        Zeroizing::new(bytes)
    }
}

impl fmt::Debug for HmacState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HmacState(..)")
    }
}
