//! Password-to-key derivation.
//!
//! Two constructions live here:
//! - the agile one, where independent keys and IVs come from hashing the stretched password
//!   hash (or the salt) with fixed 8-byte block constants;
//! - the legacy CryptoAPI one, where the stretched hash is turned into a single cipher key with
//!   the `CryptDeriveKey` 0x36/0x5C construction, or used directly as RC4 key material.
//!
//! Everything here is pure. Derived secrets come back in [`Zeroizing`] buffers.

use sha2::Digest;
use zeroize::Zeroizing;

use crate::algorithm::HashAlgorithm;
use crate::error::{OfficeCryptoError, Result};
use crate::util::fit_len;

/// Block constant for the key that encrypts the random verifier input.
pub const BLOCK_KEY_VERIFIER_INPUT: [u8; 8] = [0xFE, 0xA7, 0xD2, 0x76, 0x3B, 0x4B, 0x9E, 0x79];
/// Block constant for the key that encrypts the verifier hash.
pub const BLOCK_KEY_VERIFIER_HASH: [u8; 8] = [0xD7, 0xAA, 0x0F, 0x6D, 0x30, 0x61, 0x34, 0x4E];
/// Block constant for the key that encrypts the content key.
pub const BLOCK_KEY_CONTENT_KEY: [u8; 8] = [0x14, 0x6E, 0x0B, 0xE7, 0xAB, 0xAC, 0xD0, 0xD6];
/// Block constant for the IV of the encrypted integrity (HMAC) key.
pub const BLOCK_KEY_INTEGRITY_KEY: [u8; 8] = [0x5F, 0xB2, 0xAD, 0x01, 0x0C, 0xB9, 0xE1, 0xF6];
/// Block constant for the IV of the encrypted integrity (HMAC) value.
pub const BLOCK_KEY_INTEGRITY_VALUE: [u8; 8] = [0xA0, 0x67, 0x7F, 0x02, 0xB2, 0x2C, 0x84, 0x33];

/// Spin count the legacy dialect always uses; it is not stored on disk.
pub const LEGACY_SPIN_COUNT: u32 = 50_000;

/// UTF-16LE encoding of `password` (no BOM, no terminator).
pub fn password_utf16le(password: &str) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(password.len().saturating_mul(2)));
    for unit in password.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Stretch a password: `H0 = Hash(salt || password)`, `Hi+1 = Hash(LE32(i) || Hi)`.
///
/// `spin_count == 0` returns `H0`.
pub fn derive_password_hash(
    password_utf16le: &[u8],
    salt: &[u8],
    spin_count: u32,
    hash: HashAlgorithm,
) -> Zeroizing<Vec<u8>> {
    match hash {
        HashAlgorithm::Sha1 => iterate::<sha1::Sha1>(password_utf16le, salt, spin_count),
        HashAlgorithm::Sha256 => iterate::<sha2::Sha256>(password_utf16le, salt, spin_count),
        HashAlgorithm::Sha384 => iterate::<sha2::Sha384>(password_utf16le, salt, spin_count),
        HashAlgorithm::Sha512 => iterate::<sha2::Sha512>(password_utf16le, salt, spin_count),
        HashAlgorithm::Md5 => iterate::<md5::Md5>(password_utf16le, salt, spin_count),
    }
}

fn iterate<D: Digest>(password: &[u8], salt: &[u8], spin_count: u32) -> Zeroizing<Vec<u8>> {
    let mut hasher = D::new();
    hasher.update(salt);
    hasher.update(password);
    let mut h = Zeroizing::new(hasher.finalize().to_vec());

    // One fixed round buffer: LE32(i) || H.
    let mut round = Zeroizing::new(vec![0u8; 4 + h.len()]);
    for i in 0..spin_count {
        round[..4].copy_from_slice(&i.to_le_bytes());
        round[4..].copy_from_slice(&h);
        h.copy_from_slice(&D::digest(&round[..]));
    }
    h
}

/// `Hash(password_hash || block_constant)` truncated or zero-extended to `key_len`.
pub fn derive_block_key(
    password_hash: &[u8],
    block_constant: &[u8],
    key_len: usize,
    hash: HashAlgorithm,
) -> Zeroizing<Vec<u8>> {
    let digest = hash.digest(&[password_hash, block_constant]);
    Zeroizing::new(fit_len(&digest, key_len))
}

/// IV for a purpose.
///
/// Without a block constant the salt itself is fitted to the block size, otherwise
/// `Hash(salt || block_constant)` is.
pub fn derive_iv(
    salt: &[u8],
    block_constant: Option<&[u8]>,
    block_size: usize,
    hash: HashAlgorithm,
) -> Vec<u8> {
    match block_constant {
        None => fit_len(salt, block_size),
        Some(constant) => fit_len(&hash.digest(&[salt, constant]), block_size),
    }
}

/// Per-chunk IV: `Hash(salt || LE32(chunk_index))` fitted to the block size.
///
/// Depends only on the salt and the index, so any chunk can be processed on its own.
pub fn derive_chunk_iv(
    salt: &[u8],
    chunk_index: u32,
    block_size: usize,
    hash: HashAlgorithm,
) -> Vec<u8> {
    derive_iv(salt, Some(&chunk_index.to_le_bytes()), block_size, hash)
}

/// Legacy `Hfinal = Hash(password_hash || LE32(block))`.
pub fn legacy_block_hash(password_hash: &[u8], block: u32, hash: HashAlgorithm) -> Zeroizing<Vec<u8>> {
    hash.digest(&[password_hash, &block.to_le_bytes()[..]])
}

/// CryptoAPI `CryptDeriveKey` for block ciphers.
///
/// `X1 = Hash(0x36*64 XOR hfinal)`, `X2 = Hash(0x5C*64 XOR hfinal)`, key = `(X1 || X2)[..key_len]`.
pub fn crypt_derive_key(
    hfinal: &[u8],
    key_len: usize,
    hash: HashAlgorithm,
) -> Result<Zeroizing<Vec<u8>>> {
    let digest_len = hash.digest_len();
    if key_len > 2 * digest_len {
        return Err(OfficeCryptoError::config(format!(
            "{key_len}-byte key cannot be derived from {hash} (max {})",
            2 * digest_len
        )));
    }
    if hfinal.len() > 64 {
        return Err(OfficeCryptoError::config("hash too long for CryptDeriveKey"));
    }

    let mut inner = Zeroizing::new([0x36u8; 64]);
    let mut outer = Zeroizing::new([0x5Cu8; 64]);
    for (i, b) in hfinal.iter().enumerate() {
        inner[i] ^= b;
        outer[i] ^= b;
    }
    let x1 = hash.digest(&[&inner[..]]);
    let x2 = hash.digest(&[&outer[..]]);

    let mut key = Zeroizing::new(Vec::with_capacity(2 * digest_len));
    key.extend_from_slice(&x1);
    key.extend_from_slice(&x2);
    key.truncate(key_len);
    Ok(key)
}

/// The legacy AES key: `CryptDeriveKey(Hash(H || LE32(0)))`.
pub fn legacy_block_cipher_key(
    password_hash: &[u8],
    key_len: usize,
    hash: HashAlgorithm,
) -> Result<Zeroizing<Vec<u8>>> {
    let hfinal = legacy_block_hash(password_hash, 0, hash);
    crypt_derive_key(&hfinal, key_len, hash)
}

/// CryptoAPI RC4 key for `block`: `Hash(H || LE32(block))[..key_len]`.
///
/// 40-bit keys are zero-extended to 128 bits, which is how CryptoAPI builds "export" RC4 keys.
pub fn cryptoapi_rc4_block_key(
    password_hash: &[u8],
    block: u32,
    key_len: usize,
    hash: HashAlgorithm,
) -> Zeroizing<Vec<u8>> {
    let hfinal = legacy_block_hash(password_hash, block, hash);
    let mut key = Zeroizing::new(hfinal[..key_len.min(hfinal.len())].to_vec());
    if key_len == 5 {
        key.resize(16, 0);
    }
    key
}

/// Base key material for the Office 97 RC4 variant: `MD5(16 * (MD5(password)[..5] || salt))[..5]`.
pub fn office97_rc4_base_key(password_utf16le: &[u8], salt: &[u8]) -> Zeroizing<Vec<u8>> {
    let h0 = HashAlgorithm::Md5.digest(&[password_utf16le]);
    let mut intermediate = Zeroizing::new(Vec::with_capacity(16 * (5 + salt.len())));
    for _ in 0..16 {
        intermediate.extend_from_slice(&h0[..5]);
        intermediate.extend_from_slice(salt);
    }
    let h1 = HashAlgorithm::Md5.digest(&[&intermediate[..]]);
    Zeroizing::new(h1[..5].to_vec())
}

/// Office 97 RC4 key for `block`: `MD5(base || LE32(block))`, all 128 bits.
pub fn office97_rc4_block_key(base_key: &[u8], block: u32) -> Zeroizing<Vec<u8>> {
    HashAlgorithm::Md5.digest(&[base_key, &block.to_le_bytes()[..]])
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: [u8; 16] = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E,
        0x0F,
    ];

    #[test]
    fn utf16le_encodes_surrogate_pairs() {
        // U+1F600 GRINNING FACE -> D83D DE00
        assert_eq!(
            password_utf16le("a\u{1F600}").as_slice(),
            &[0x61, 0x00, 0x3D, 0xD8, 0x00, 0xDE]
        );
        assert!(password_utf16le("").is_empty());
    }

    #[test]
    fn spin_count_zero_is_a_single_hash() {
        let pw = password_utf16le("Password");
        let h = derive_password_hash(&pw, &SALT, 0, HashAlgorithm::Sha1);
        assert_eq!(h.as_slice(), HashAlgorithm::Sha1.digest(&[&SALT[..], &pw[..]]).as_slice());
        assert_eq!(
            hex::encode(h.as_slice()),
            "a7ae184890a4ec9d6f70a73cad023a6f3853e80d"
        );
    }

    #[test]
    fn password_hash_is_deterministic_and_matches_vector() {
        let pw = password_utf16le("Password");
        let a = derive_password_hash(&pw, &SALT, 1000, HashAlgorithm::Sha512);
        let b = derive_password_hash(&pw, &SALT, 1000, HashAlgorithm::Sha512);
        assert_eq!(a.as_slice(), b.as_slice());
        assert_eq!(
            hex::encode(a.as_slice()),
            "55b77bf40813f3eae15b2de712bfaf079886bee1ab3092ff7baff046e566c5cf\
             99eaf030cc8210715e7400e0ca803a4b8cb5bd830f36386d47ad3f663523ae33"
        );
        let other = derive_password_hash(&pw, &SALT, 1001, HashAlgorithm::Sha512);
        assert_ne!(a.as_slice(), other.as_slice());
    }

    #[test]
    fn block_key_matches_vector_and_fits_length() {
        let pw = password_utf16le("Password");
        let h = derive_password_hash(&pw, &SALT, 1000, HashAlgorithm::Sha512);
        let key = derive_block_key(&h, &BLOCK_KEY_VERIFIER_INPUT, 32, HashAlgorithm::Sha512);
        assert_eq!(
            hex::encode(key.as_slice()),
            "a9d8c194fcac51e6fcc428146dfdcd6e6a8e61845c49542ffcda8aad4fc21ad5"
        );

        // SHA-1 digests are shorter than an AES-256 key: zero-extended.
        let short = derive_block_key(&h, &BLOCK_KEY_CONTENT_KEY, 32, HashAlgorithm::Sha1);
        assert_eq!(short.len(), 32);
        assert!(short[20..].iter().all(|b| *b == 0));
    }

    #[test]
    fn iv_derivations_match_vectors() {
        assert_eq!(
            derive_iv(&SALT, None, 16, HashAlgorithm::Sha512),
            SALT.to_vec()
        );
        assert_eq!(derive_iv(&SALT[..8], None, 16, HashAlgorithm::Sha1)[8..], [0u8; 8]);
        assert_eq!(
            hex::encode(derive_iv(
                &SALT,
                Some(&BLOCK_KEY_INTEGRITY_KEY),
                16,
                HashAlgorithm::Sha1
            )),
            "875044737a14c33983dcfa6ab9826d11"
        );
        assert_eq!(
            hex::encode(derive_chunk_iv(&SALT, 1, 16, HashAlgorithm::Sha512)),
            "973b6d38872770a510139d8eeab971aa"
        );
        assert_ne!(
            derive_chunk_iv(&SALT, 0, 16, HashAlgorithm::Sha512),
            derive_chunk_iv(&SALT, 1, 16, HashAlgorithm::Sha512)
        );
    }

    #[test]
    fn legacy_aes_key_matches_vector() {
        let pw = password_utf16le("Password");
        let h = derive_password_hash(&pw, &SALT, LEGACY_SPIN_COUNT, HashAlgorithm::Sha1);
        let key128 = legacy_block_cipher_key(&h, 16, HashAlgorithm::Sha1).unwrap();
        assert_eq!(hex::encode(key128.as_slice()), "1ba005261aaee4686a9939437075e6c4");
        let key256 = legacy_block_cipher_key(&h, 32, HashAlgorithm::Sha1).unwrap();
        assert_eq!(
            hex::encode(key256.as_slice()),
            "1ba005261aaee4686a9939437075e6c4e185de35f4a53fbe98f83699264eb215"
        );
        assert!(legacy_block_cipher_key(&h, 41, HashAlgorithm::Sha1).is_err());
    }

    #[test]
    fn cryptoapi_rc4_keys_match_vectors() {
        let pw = password_utf16le("password");
        let h = derive_password_hash(&pw, &SALT, LEGACY_SPIN_COUNT, HashAlgorithm::Sha1);
        let key = cryptoapi_rc4_block_key(&h, 0, 16, HashAlgorithm::Sha1);
        assert_eq!(hex::encode(key.as_slice()), "6ad7dedf2da3514b1d85eabee069d47d");

        let export = cryptoapi_rc4_block_key(&h, 2, 5, HashAlgorithm::Sha1);
        assert_eq!(export.len(), 16);
        assert_eq!(hex::encode(&export[..5]), "9ce57d0699");
        assert!(export[5..].iter().all(|b| *b == 0));
    }

    #[test]
    fn office97_rc4_keys_match_vectors() {
        let pw = password_utf16le("password");
        let base = office97_rc4_base_key(&pw, &SALT);
        assert_eq!(base.len(), 5);
        assert_eq!(
            hex::encode(office97_rc4_block_key(&base, 0).as_slice()),
            "d17084ef80dfaade760e9be2fe9b8d19"
        );
        assert_eq!(
            hex::encode(office97_rc4_block_key(&base, 1).as_slice()),
            "0d3ec553cde81b8881f25b9ef8b1bb61"
        );
    }
}
