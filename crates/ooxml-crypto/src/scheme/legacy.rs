//! Binary legacy records: CryptoAPI `EncryptionHeader` + `EncryptionVerifier`, and the older
//! Office 97 RC4 layout.

use crate::algorithm::{ChainingMode, CipherAlgorithm, HashAlgorithm};
use crate::error::{OfficeCryptoError, Result};
use crate::kdf::LEGACY_SPIN_COUNT;
use crate::util::{decode_utf16le_nul_terminated, round_up, utf16le_nul_terminated, ByteReader};
use crate::verifier::{VerifierData, SALT_LEN, VERIFIER_LEN};

use super::{
    Dialect, EncryptionDescriptor, EncryptionInfo, StandardProvider, FLAG_AES, FLAG_CRYPTOAPI,
    FLAG_EXTERNAL,
};

pub const AES_PROVIDER_NAME: &str = "Microsoft Enhanced RSA and AES Cryptographic Provider";
pub const RC4_PROVIDER_NAME: &str = "Microsoft Enhanced Cryptographic Provider v1.0";

pub(super) const PROV_RSA_FULL: u32 = 0x01;
pub(super) const PROV_RSA_AES: u32 = 0x18;

/// Fixed part of `EncryptionHeader` before the CSP name.
const HEADER_FIXED_LEN: usize = 8 * 4;
const OFFICE97_HASH_LEN: usize = 16;

pub(super) fn parse_standard(
    r: &mut ByteReader<'_>,
    major: u16,
    minor: u16,
    flags: u32,
) -> Result<EncryptionInfo> {
    if flags & FLAG_EXTERNAL != 0 {
        return Err(OfficeCryptoError::UnsupportedFormat(
            "extensible encryption with an external provider".to_string(),
        ));
    }
    if flags & FLAG_CRYPTOAPI == 0 {
        return Err(OfficeCryptoError::UnsupportedFormat(format!(
            "EncryptionInfo {major}.{minor} without the CryptoAPI flag ({flags:#x})"
        )));
    }

    let header_size = r.read_u32_le("EncryptionInfo.headerSize")? as usize;
    let header_bytes = r.take(header_size, "EncryptionHeader")?;
    if header_bytes.len() < HEADER_FIXED_LEN {
        return Err(OfficeCryptoError::malformed(
            "EncryptionHeader is missing fixed fields",
        ));
    }

    let mut hr = ByteReader::new(header_bytes);
    let header_flags = hr.read_u32_le("EncryptionHeader.flags")?;
    let size_extra = hr.read_u32_le("EncryptionHeader.sizeExtra")?;
    let alg_id = hr.read_u32_le("EncryptionHeader.algId")?;
    let alg_id_hash = hr.read_u32_le("EncryptionHeader.algIdHash")?;
    let key_size = hr.read_u32_le("EncryptionHeader.keySize")?;
    let provider_type = hr.read_u32_le("EncryptionHeader.providerType")?;
    let _reserved1 = hr.read_u32_le("EncryptionHeader.reserved1")?;
    let _reserved2 = hr.read_u32_le("EncryptionHeader.reserved2")?;
    let csp_name = decode_utf16le_nul_terminated(hr.remaining())?;

    // algId 0 means "pick from the flags".
    let cipher = match alg_id {
        0 if header_flags & FLAG_AES != 0 => CipherAlgorithm::Aes128,
        0 => CipherAlgorithm::Rc4,
        id => CipherAlgorithm::from_alg_id(id).ok_or_else(|| {
            OfficeCryptoError::UnsupportedFormat(format!("cipher algId {id:#06x}"))
        })?,
    };
    if matches!(
        cipher,
        CipherAlgorithm::Aes128 | CipherAlgorithm::Aes192 | CipherAlgorithm::Aes256
    ) && header_flags & FLAG_AES == 0
    {
        log::warn!("EncryptionHeader names AES but does not set fAES");
    }

    let hash = match alg_id_hash {
        0 => HashAlgorithm::Sha1,
        id => HashAlgorithm::from_alg_id(id).ok_or_else(|| {
            OfficeCryptoError::UnsupportedFormat(format!("hash algIdHash {id:#06x}"))
        })?,
    };

    let key_bits = match key_size {
        0 if cipher == CipherAlgorithm::Rc4 => 40,
        0 => cipher.default_key_bits(),
        bits => bits,
    };
    if !cipher.supports_key_bits(key_bits) {
        return Err(OfficeCryptoError::malformed(format!(
            "keySize {key_bits} is not valid for {cipher}"
        )));
    }

    let salt_size = r.read_u32_le("EncryptionVerifier.saltSize")? as usize;
    if salt_size != SALT_LEN {
        return Err(OfficeCryptoError::malformed(format!(
            "EncryptionVerifier.saltSize must be {SALT_LEN}, got {salt_size}"
        )));
    }
    let salt = r.take(SALT_LEN, "EncryptionVerifier.salt")?.to_vec();
    let encrypted_verifier_input = r
        .take(VERIFIER_LEN, "EncryptionVerifier.encryptedVerifier")?
        .to_vec();
    let verifier_hash_size = r.read_u32_le("EncryptionVerifier.verifierHashSize")? as usize;
    if verifier_hash_size == 0 || verifier_hash_size > hash.digest_len() {
        return Err(OfficeCryptoError::malformed(format!(
            "verifierHashSize {verifier_hash_size} does not fit {hash}"
        )));
    }
    // Block ciphers pad the encrypted hash to a whole block (20 -> 32 for AES).
    let hash_ct_len = round_up(verifier_hash_size as u64, cipher.block_size() as u64)
        .unwrap_or(verifier_hash_size as u64) as usize;
    let encrypted_verifier_hash = r
        .take(hash_ct_len, "EncryptionVerifier.encryptedVerifierHash")?
        .to_vec();

    let descriptor = EncryptionDescriptor {
        version_major: major,
        version_minor: minor,
        flags,
        cipher,
        chaining: ChainingMode::Ecb,
        hash,
        key_bits,
        block_size: cipher.block_size(),
        salt_size,
        key_salt: salt.clone(),
        spin_count: LEGACY_SPIN_COUNT,
    };
    let verifier = VerifierData {
        salt,
        encrypted_verifier_input,
        encrypted_verifier_hash,
        encrypted_content_key: None,
        verifier_hash_size,
    };
    let provider = StandardProvider {
        header_flags,
        size_extra,
        provider_type,
        csp_name,
    };
    Ok(EncryptionInfo {
        descriptor,
        verifier,
        dialect: Dialect::Standard(provider),
    })
}

pub(super) fn write_standard(
    d: &EncryptionDescriptor,
    provider: &StandardProvider,
    verifier: &VerifierData,
    out: &mut Vec<u8>,
) -> Result<()> {
    check_verifier_lengths(verifier)?;

    let mut header = Vec::with_capacity(HEADER_FIXED_LEN + provider.csp_name.len() * 2 + 2);
    for field in [
        provider.header_flags,
        provider.size_extra,
        d.cipher.alg_id(),
        d.hash.alg_id(),
        d.key_bits,
        provider.provider_type,
        0,
        0,
    ] {
        header.extend_from_slice(&field.to_le_bytes());
    }
    header.extend_from_slice(&utf16le_nul_terminated(&provider.csp_name));

    out.extend_from_slice(&(header.len() as u32).to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(&(verifier.salt.len() as u32).to_le_bytes());
    out.extend_from_slice(&verifier.salt);
    out.extend_from_slice(&verifier.encrypted_verifier_input);
    out.extend_from_slice(&(verifier.verifier_hash_size as u32).to_le_bytes());
    out.extend_from_slice(&verifier.encrypted_verifier_hash);
    Ok(())
}

pub(super) fn office97_descriptor(salt: Vec<u8>) -> EncryptionDescriptor {
    EncryptionDescriptor {
        version_major: 1,
        version_minor: 1,
        flags: 0,
        cipher: CipherAlgorithm::Rc4,
        chaining: ChainingMode::Ecb,
        hash: HashAlgorithm::Md5,
        key_bits: 40,
        block_size: 1,
        salt_size: salt.len(),
        key_salt: salt,
        spin_count: 0,
    }
}

pub(super) fn parse_office97(r: &mut ByteReader<'_>) -> Result<EncryptionInfo> {
    let salt = r.take(SALT_LEN, "RC4 salt")?.to_vec();
    let encrypted_verifier_input = r.take(VERIFIER_LEN, "RC4 encryptedVerifier")?.to_vec();
    let encrypted_verifier_hash = r
        .take(OFFICE97_HASH_LEN, "RC4 encryptedVerifierHash")?
        .to_vec();

    Ok(EncryptionInfo {
        descriptor: office97_descriptor(salt.clone()),
        verifier: VerifierData {
            salt,
            encrypted_verifier_input,
            encrypted_verifier_hash,
            encrypted_content_key: None,
            verifier_hash_size: OFFICE97_HASH_LEN,
        },
        dialect: Dialect::Office97Rc4,
    })
}

pub(super) fn write_office97(verifier: &VerifierData, out: &mut Vec<u8>) -> Result<()> {
    check_verifier_lengths(verifier)?;
    if verifier.encrypted_verifier_hash.len() != OFFICE97_HASH_LEN {
        return Err(OfficeCryptoError::config(
            "Office 97 RC4 verifier hash must be 16 bytes",
        ));
    }
    out.extend_from_slice(&verifier.salt);
    out.extend_from_slice(&verifier.encrypted_verifier_input);
    out.extend_from_slice(&verifier.encrypted_verifier_hash);
    Ok(())
}

fn check_verifier_lengths(verifier: &VerifierData) -> Result<()> {
    if verifier.salt.len() != SALT_LEN || verifier.encrypted_verifier_input.len() != VERIFIER_LEN {
        return Err(OfficeCryptoError::config(format!(
            "legacy verifiers need a {SALT_LEN}-byte salt and a {VERIFIER_LEN}-byte verifier"
        )));
    }
    Ok(())
}
