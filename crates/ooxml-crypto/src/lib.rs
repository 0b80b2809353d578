//! Password encryption for Office documents stored in an OLE/CFB container
//! (`EncryptionInfo` + `EncryptedPackage`).
//!
//! This crate supports:
//! - MS-OFFCRYPTO "Agile Encryption" (XML descriptor, Office 2010+)
//! - MS-OFFCRYPTO / ECMA-376 "Standard Encryption" (binary descriptor, AES, Office 2007-era)
//! - CryptoAPI RC4 and Office 97 RC4 for older producers
//!
//! The payload is treated as opaque bytes; for OOXML it is the ZIP/OPC package.
//!
//! ```no_run
//! use ooxml_crypto::{decrypt, encrypt, EncryptOptions};
//!
//! let encrypted = encrypt(b"PK\x03\x04...", "secret", &EncryptOptions::default())?;
//! let plaintext = decrypt(&encrypted, "secret")?;
//! # Ok::<(), ooxml_crypto::OfficeCryptoError>(())
//! ```

pub mod algorithm;
pub mod chunk;
pub mod cipher;
pub mod container;
mod error;
pub mod integrity;
pub mod kdf;
pub mod scheme;
mod util;
pub mod verifier;


use std::fmt;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use tempfile::SpooledTempFile;

pub use crate::algorithm::{ChainingMode, CipherAlgorithm, HashAlgorithm};
pub use crate::chunk::{
    ChunkCipher, PayloadCipher, PayloadReader, PayloadWriter, RekeyPolicy, StreamingCodec,
};
pub use crate::container::{
    MemoryContainer, NamedStreams, NamedStreamsMut, ENCRYPTED_PACKAGE_STREAM,
    ENCRYPTION_INFO_STREAM,
};
pub use crate::error::{OfficeCryptoError, Result};
pub use crate::integrity::{IntegrityData, IntegrityProtector};
pub use crate::scheme::{Dialect, EncryptionDescriptor, EncryptionInfo, EncryptionScheme};
pub use crate::verifier::ContentKey;

use crate::container::{has_encryption_streams, open_ole, read_stream};

/// Password Excel uses for workbooks that are "protected" without a user-supplied secret.
pub const DEFAULT_PASSWORD: &str = "VelvetSweatshop";

/// Payload records larger than this are spooled to a temporary file while being assembled.
const SPOOL_THRESHOLD: usize = 16 * 1024 * 1024;

/// Random-access plaintext view over an encrypted payload record.
pub type DecryptedPackage<R> = PayloadReader<R, PayloadCipher>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptOptions {
    pub scheme: EncryptionScheme,
    pub cipher: CipherAlgorithm,
    pub chaining: ChainingMode,
    pub hash: HashAlgorithm,
    /// Agile only. The legacy dialects use a fixed count (or none at all for Office 97 RC4).
    pub spin_count: u32,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            scheme: EncryptionScheme::Agile,
            cipher: CipherAlgorithm::Aes256,
            chaining: ChainingMode::Cbc,
            hash: HashAlgorithm::Sha512,
            spin_count: 100_000,
        }
    }
}

impl EncryptOptions {
    /// The usual parameters for `scheme`.
    pub fn for_scheme(scheme: EncryptionScheme) -> Self {
        match scheme {
            EncryptionScheme::Agile => Self::default(),
            EncryptionScheme::Standard => Self {
                scheme,
                cipher: CipherAlgorithm::Aes128,
                chaining: ChainingMode::Ecb,
                hash: HashAlgorithm::Sha1,
                spin_count: kdf::LEGACY_SPIN_COUNT,
            },
            EncryptionScheme::CryptoApiRc4 => Self {
                scheme,
                cipher: CipherAlgorithm::Rc4,
                chaining: ChainingMode::Ecb,
                hash: HashAlgorithm::Sha1,
                spin_count: kdf::LEGACY_SPIN_COUNT,
            },
            EncryptionScheme::Office97Rc4 => Self {
                scheme,
                cipher: CipherAlgorithm::Rc4,
                chaining: ChainingMode::Ecb,
                hash: HashAlgorithm::Md5,
                spin_count: 0,
            },
        }
    }

    pub fn with_cipher(mut self, cipher: CipherAlgorithm) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_chaining(mut self, chaining: ChainingMode) -> Self {
        self.chaining = chaining;
        self
    }

    pub fn with_hash(mut self, hash: HashAlgorithm) -> Self {
        self.hash = hash;
        self
    }

    pub fn with_spin_count(mut self, spin_count: u32) -> Self {
        self.spin_count = spin_count;
        self
    }

    /// Check the combination against what each scheme can express.
    pub fn validate(&self) -> Result<()> {
        let cipher = self.cipher;
        match self.scheme {
            EncryptionScheme::Agile => {
                if cipher.is_stream_cipher() {
                    return Err(OfficeCryptoError::config(format!(
                        "agile encryption needs a block cipher, not {cipher}"
                    )));
                }
                if !matches!(self.chaining, ChainingMode::Cbc | ChainingMode::Cfb8) {
                    return Err(OfficeCryptoError::config(format!(
                        "agile encryption supports CBC or CFB-8 chaining, not {}",
                        self.chaining
                    )));
                }
            }
            EncryptionScheme::Standard => {
                if !matches!(
                    cipher,
                    CipherAlgorithm::Aes128 | CipherAlgorithm::Aes192 | CipherAlgorithm::Aes256
                ) {
                    return Err(OfficeCryptoError::config(format!(
                        "standard encryption requires AES, not {cipher}"
                    )));
                }
                if self.chaining != ChainingMode::Ecb {
                    return Err(OfficeCryptoError::config(format!(
                        "standard encryption requires ECB, not {}",
                        self.chaining
                    )));
                }
                if self.hash != HashAlgorithm::Sha1 {
                    return Err(OfficeCryptoError::config(format!(
                        "standard encryption requires SHA-1, not {}",
                        self.hash
                    )));
                }
            }
            EncryptionScheme::CryptoApiRc4 => {
                if cipher != CipherAlgorithm::Rc4 {
                    return Err(OfficeCryptoError::config(format!(
                        "CryptoAPI RC4 encryption cannot use {cipher}"
                    )));
                }
                if !matches!(self.hash, HashAlgorithm::Sha1 | HashAlgorithm::Md5) {
                    return Err(OfficeCryptoError::config(format!(
                        "CryptoAPI RC4 requires SHA-1 or MD5, not {}",
                        self.hash
                    )));
                }
            }
            // Fixed to RC4 and MD5.
            EncryptionScheme::Office97Rc4 => return Ok(()),
        }

        if !cipher.is_implemented() {
            return Err(OfficeCryptoError::config(format!(
                "{cipher} is recognised but not supported for encryption"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptOptions {
    /// Descriptors asking for more password-hash iterations than this are rejected before any
    /// hashing happens.
    pub max_spin_count: u32,
    /// Check the agile `dataIntegrity` HMAC before handing out plaintext.
    pub verify_integrity: bool,
}

impl Default for DecryptOptions {
    fn default() -> Self {
        Self {
            max_spin_count: 1_000_000,
            verify_integrity: true,
        }
    }
}

/// A parsed `EncryptionInfo` record together with the content key unlocked by a password.
pub struct Decryptor {
    info: EncryptionInfo,
    key: ContentKey,
    verify_integrity: bool,
}

impl Decryptor {
    /// Verify `password` against `info` and recover the content key.
    pub fn new(info: EncryptionInfo, password: &str, options: &DecryptOptions) -> Result<Self> {
        let spin_count = info.password_spin_count();
        if spin_count > options.max_spin_count {
            return Err(OfficeCryptoError::malformed(format!(
                "spin count {spin_count} exceeds the limit of {}",
                options.max_spin_count
            )));
        }

        let key = verifier::verify_and_recover_key(&info.keying(), password, &info.verifier)?;
        log::debug!("password verified for {} EncryptionInfo", info.scheme());
        Ok(Self {
            info,
            key,
            verify_integrity: options.verify_integrity,
        })
    }

    /// Parse the `EncryptionInfo` stream bytes, then [`Decryptor::new`].
    pub fn from_bytes(encryption_info: &[u8], password: &str, options: &DecryptOptions) -> Result<Self> {
        Self::new(EncryptionInfo::parse(encryption_info)?, password, options)
    }

    pub fn info(&self) -> &EncryptionInfo {
        &self.info
    }

    /// Recompute the agile HMAC over the whole payload record. Other dialects have nothing to
    /// check.
    pub fn check_integrity<R: Read + Seek>(&self, record: &mut R) -> Result<()> {
        let (Some(protector), Some(data)) = (
            self.info.integrity_protector(&self.key),
            self.info.integrity(),
        ) else {
            return Ok(());
        };
        record.seek(SeekFrom::Start(0))?;
        protector.verify(data, &mut *record)
    }

    /// Plaintext view over `package`, the `EncryptedPackage` stream.
    ///
    /// The integrity HMAC (when enabled) covers the raw record, size prefix included, so it is
    /// checked before the prefix is trusted for anything.
    pub fn open<R: Read + Seek>(&self, mut package: R) -> Result<DecryptedPackage<R>> {
        if self.verify_integrity {
            self.check_integrity(&mut package)?;
        } else if self.info.integrity().is_some() {
            log::warn!("skipping EncryptedPackage integrity check");
        }
        let reader = PayloadReader::new(package, self.info.payload_cipher(&self.key)?)?;
        log::debug!(
            "EncryptedPackage holds {} bytes in {} chunks",
            reader.plaintext_len(),
            reader.chunk_count()
        );
        Ok(reader)
    }

    /// Decrypt `package` into memory.
    pub fn decrypt<R: Read + Seek>(&self, package: R) -> Result<Vec<u8>> {
        self.open(package)?.read_all()
    }
}

impl fmt::Debug for Decryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decryptor")
            .field("scheme", &self.info.scheme())
            .field("key", &self.key)
            .field("verify_integrity", &self.verify_integrity)
            .finish()
    }
}

/// Fresh key material for one document, plus the record describing it.
pub struct Encryptor<R = OsRng> {
    info: EncryptionInfo,
    key: ContentKey,
    rng: R,
}

impl Encryptor<OsRng> {
    pub fn new(password: &str, options: &EncryptOptions) -> Result<Self> {
        Self::with_rng(password, options, OsRng)
    }
}

impl<R: RngCore + CryptoRng> Encryptor<R> {
    pub fn with_rng(password: &str, options: &EncryptOptions, mut rng: R) -> Result<Self> {
        let (info, key) = EncryptionInfo::generate(options, password, &mut rng)?;
        Ok(Self { info, key, rng })
    }

    /// The `EncryptionInfo` record. For agile documents it is complete only after
    /// [`Encryptor::write_package`] has filled in the integrity data.
    pub fn info(&self) -> &EncryptionInfo {
        &self.info
    }

    /// Encrypt everything read from `plaintext` into a payload record written at the current
    /// position of `sink`, and return the sink positioned after it.
    pub fn write_package<P: Read, W: Read + Write + Seek>(
        &mut self,
        mut plaintext: P,
        mut sink: W,
    ) -> Result<W> {
        let start = sink.stream_position()?;

        let mut writer = PayloadWriter::new(sink, self.info.payload_cipher(&self.key)?)?;
        io::copy(&mut plaintext, &mut writer)?;
        let plaintext_len = writer.plaintext_len();
        sink = writer.finish()?;

        if let Some(protector) = self.info.integrity_protector(&self.key) {
            let end = sink.stream_position()?;
            sink.seek(SeekFrom::Start(start))?;
            let data = protector.protect((&mut sink).take(end - start), &mut self.rng)?;
            self.info.set_integrity(data)?;
            sink.seek(SeekFrom::Start(end))?;
        }

        log::debug!(
            "encrypted {plaintext_len} byte payload with {}",
            self.info.scheme()
        );
        Ok(sink)
    }
}

impl<R> fmt::Debug for Encryptor<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor")
            .field("scheme", &self.info.scheme())
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Encrypt `plaintext` into a new OLE/CFB container holding `EncryptionInfo` and
/// `EncryptedPackage`.
pub fn encrypt(plaintext: &[u8], password: &str, options: &EncryptOptions) -> Result<Vec<u8>> {
    let mut ole = cfb::CompoundFile::create(Cursor::new(Vec::new()))?;
    encrypt_to_container(plaintext, &mut ole, password, options)?;
    ole.flush()?;
    Ok(ole.into_inner().into_inner())
}

/// Stream `plaintext` into the two encryption streams of `container`, replacing any existing
/// ones.
pub fn encrypt_to_container<P: Read, C: NamedStreamsMut>(
    plaintext: P,
    container: &mut C,
    password: &str,
    options: &EncryptOptions,
) -> Result<()> {
    let mut encryptor = Encryptor::new(password, options)?;

    let mut record = SpooledTempFile::new(SPOOL_THRESHOLD);
    encryptor.write_package(plaintext, &mut record)?;
    let info = encryptor.info().to_bytes()?;

    let mut stream = container.create_stream(ENCRYPTION_INFO_STREAM)?;
    stream.write_all(&info)?;
    stream.flush()?;
    drop(stream);

    record.seek(SeekFrom::Start(0))?;
    let mut stream = container.create_stream(ENCRYPTED_PACKAGE_STREAM)?;
    io::copy(&mut record, &mut stream)?;
    stream.flush()?;
    Ok(())
}

/// Decrypt an encrypted OLE/CFB container and return the payload bytes.
pub fn decrypt(container_bytes: &[u8], password: &str) -> Result<Vec<u8>> {
    decrypt_with_options(container_bytes, password, &DecryptOptions::default())
}

pub fn decrypt_with_options(
    container_bytes: &[u8],
    password: &str,
    options: &DecryptOptions,
) -> Result<Vec<u8>> {
    let mut ole = open_ole(container_bytes)?;
    decrypt_container(&mut ole, password, options)
}

/// Decrypt the payload held by any named-stream container.
pub fn decrypt_container<C: NamedStreams>(
    container: &mut C,
    password: &str,
    options: &DecryptOptions,
) -> Result<Vec<u8>> {
    open_decrypted_container(container, password, options)?.read_all()
}

/// Random-access plaintext view over the payload of an encrypted OLE/CFB container.
///
/// The ciphertext is held in memory; plaintext is decrypted one chunk at a time.
pub fn open_decrypted(
    container_bytes: &[u8],
    password: &str,
    options: &DecryptOptions,
) -> Result<DecryptedPackage<Cursor<Vec<u8>>>> {
    let mut ole = open_ole(container_bytes)?;
    let info = read_stream(&mut ole, ENCRYPTION_INFO_STREAM)?;
    let decryptor = Decryptor::from_bytes(&info, password, options)?;
    let package = read_stream(&mut ole, ENCRYPTED_PACKAGE_STREAM)?;
    decryptor.open(Cursor::new(package))
}

/// Like [`open_decrypted`], reading straight from the container's payload stream.
pub fn open_decrypted_container<'c, C: NamedStreams>(
    container: &'c mut C,
    password: &str,
    options: &DecryptOptions,
) -> Result<DecryptedPackage<C::Reader<'c>>> {
    let info = read_stream(container, ENCRYPTION_INFO_STREAM)?;
    let decryptor = Decryptor::from_bytes(&info, password, options)?;
    let package = container.open_stream(ENCRYPTED_PACKAGE_STREAM)?;
    decryptor.open(package)
}

/// Parse the `EncryptionInfo` stream of an encrypted OLE/CFB container.
pub fn read_encryption_info(container_bytes: &[u8]) -> Result<EncryptionInfo> {
    let mut ole = open_ole(container_bytes)?;
    EncryptionInfo::parse(&read_stream(&mut ole, ENCRYPTION_INFO_STREAM)?)
}

/// Whether `password` unlocks the container. Only the verifier is checked; any failure,
/// including unreadable input, reads as `false`.
pub fn verify_password(container_bytes: &[u8], password: &str) -> bool {
    let check = || -> Result<Decryptor> {
        let mut ole = open_ole(container_bytes)?;
        let info = read_stream(&mut ole, ENCRYPTION_INFO_STREAM)?;
        Decryptor::from_bytes(&info, password, &DecryptOptions::default())
    };
    check().is_ok()
}

/// Returns true if the provided bytes look like an OLE/CFB container holding an encrypted
/// package (streams `EncryptionInfo` and `EncryptedPackage`).
pub fn is_encrypted_container(bytes: &[u8]) -> bool {
    open_ole(bytes)
        .map(|ole| has_encryption_streams(&ole))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_alloc::MAX_ALLOC;
    use std::sync::atomic::Ordering;

    fn fast(scheme: EncryptionScheme) -> EncryptOptions {
        EncryptOptions::for_scheme(scheme).with_spin_count(10)
    }

    #[test]
    fn detects_encrypted_container() {
        let bytes = encrypt(b"PK\x03\x04", "pw", &fast(EncryptionScheme::Agile)).unwrap();
        assert!(is_encrypted_container(&bytes));

        let mut ole = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        ole.create_stream("EncryptionInfo").unwrap();
        let bytes = ole.into_inner().into_inner();
        assert!(!is_encrypted_container(&bytes));
        assert!(!is_encrypted_container(b"PK\x03\x04"));
    }

    #[test]
    fn validate_rejects_impossible_combinations() {
        let bad = [
            EncryptOptions::default().with_cipher(CipherAlgorithm::Rc4),
            EncryptOptions::default().with_chaining(ChainingMode::Ecb),
            EncryptOptions::default().with_cipher(CipherAlgorithm::Des3),
            EncryptOptions::for_scheme(EncryptionScheme::Standard).with_hash(HashAlgorithm::Sha256),
            EncryptOptions::for_scheme(EncryptionScheme::Standard).with_chaining(ChainingMode::Cbc),
            EncryptOptions::for_scheme(EncryptionScheme::Standard).with_cipher(CipherAlgorithm::Rc4),
            EncryptOptions::for_scheme(EncryptionScheme::CryptoApiRc4)
                .with_cipher(CipherAlgorithm::Aes128),
            EncryptOptions::for_scheme(EncryptionScheme::CryptoApiRc4)
                .with_hash(HashAlgorithm::Sha512),
        ];
        for options in bad {
            let err = options.validate().unwrap_err();
            assert!(matches!(err, OfficeCryptoError::Configuration(_)), "{options:?}: {err:?}");
        }

        for scheme in [
            EncryptionScheme::Agile,
            EncryptionScheme::Standard,
            EncryptionScheme::CryptoApiRc4,
            EncryptionScheme::Office97Rc4,
        ] {
            EncryptOptions::for_scheme(scheme).validate().unwrap();
        }
        EncryptOptions::for_scheme(EncryptionScheme::Office97Rc4)
            .with_cipher(CipherAlgorithm::Aes256)
            .validate()
            .unwrap();
        EncryptOptions::default()
            .with_chaining(ChainingMode::Cfb8)
            .with_hash(HashAlgorithm::Sha1)
            .validate()
            .unwrap();
    }

    #[test]
    fn spin_count_above_limit_is_rejected_before_hashing() {
        let bytes = encrypt(b"data", "pw", &fast(EncryptionScheme::Agile)).unwrap();
        let options = DecryptOptions {
            max_spin_count: 5,
            ..DecryptOptions::default()
        };
        let err = decrypt_with_options(&bytes, "wrong", &options).unwrap_err();
        assert!(matches!(err, OfficeCryptoError::MalformedMetadata(_)), "{err:?}");
    }

    #[test]
    fn verify_password_never_errors() {
        let bytes = encrypt(b"data", "pw", &fast(EncryptionScheme::Standard)).unwrap();
        assert!(verify_password(&bytes, "pw"));
        assert!(!verify_password(&bytes, "pW"));
        assert!(!verify_password(b"not a container", "pw"));
        assert!(!verify_password(&[], ""));
    }

    #[test]
    fn open_decrypted_seeks_into_the_middle() {
        let plaintext: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let bytes = encrypt(&plaintext, "pw", &fast(EncryptionScheme::Agile)).unwrap();

        let mut view = open_decrypted(&bytes, "pw", &DecryptOptions::default()).unwrap();
        assert_eq!(view.plaintext_len(), plaintext.len() as u64);
        view.seek(SeekFrom::Start(5000)).unwrap();
        let mut buf = [0u8; 100];
        view.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &plaintext[5000..5100]);
    }

    #[test]
    fn encryptor_appends_record_after_existing_bytes() {
        let mut encryptor = Encryptor::new("pw", &fast(EncryptionScheme::Agile)).unwrap();
        let mut sink = Cursor::new(b"header".to_vec());
        sink.seek(SeekFrom::End(0)).unwrap();
        let sink = encryptor.write_package(&b"payload"[..], sink).unwrap();
        let record = sink.into_inner()[6..].to_vec();

        let info = encryptor.info().clone();
        let decryptor = Decryptor::new(info, "pw", &DecryptOptions::default()).unwrap();
        assert_eq!(decryptor.decrypt(Cursor::new(record)).unwrap(), b"payload");
    }

    #[test]
    fn memory_container_round_trip() {
        let mut container = MemoryContainer::new();
        container.insert("Workbook", b"untouched".to_vec());
        encrypt_to_container(
            &b"hello"[..],
            &mut container,
            "pw",
            &fast(EncryptionScheme::CryptoApiRc4),
        )
        .unwrap();
        let out = decrypt_container(&mut container, "pw", &DecryptOptions::default()).unwrap();
        assert_eq!(out, b"hello");
        assert_eq!(container.get("Workbook"), Some(&b"untouched"[..]));
    }

    #[test]
    fn oversized_encrypted_package_size_errors_without_large_allocation() {
        let total_size = u64::MAX;

        let mut fixtures = Vec::new();
        for scheme in [EncryptionScheme::Agile, EncryptionScheme::Standard] {
            let mut container = MemoryContainer::new();
            encrypt_to_container(&b"PK\x03\x04"[..], &mut container, "", &fast(scheme)).unwrap();
            let package = container.get_mut(ENCRYPTED_PACKAGE_STREAM).unwrap();
            package[..8].copy_from_slice(&total_size.to_le_bytes());
            fixtures.push(container);
        }

        // With the HMAC enabled the agile prefix never gets parsed.
        let options = DecryptOptions {
            verify_integrity: false,
            ..DecryptOptions::default()
        };

        MAX_ALLOC.store(0, Ordering::Relaxed);

        for mut container in fixtures {
            let err = decrypt_container(&mut container, "", &options)
                .expect_err("expected size overflow");
            assert!(
                matches!(err, OfficeCryptoError::PackageSizeOverflow { total_size: got } if got == total_size),
                "expected PackageSizeOverflow({total_size}), got {err:?}"
            );
        }

        let max_alloc = MAX_ALLOC.load(Ordering::Relaxed);
        assert!(
            max_alloc < 16 * 1024 * 1024,
            "expected no large allocation attempts, observed max allocation request: {max_alloc} bytes"
        );
    }
}
