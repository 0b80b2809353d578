use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use ooxml_crypto::{
    decrypt, decrypt_container, encrypt, encrypt_to_container, is_encrypted_container,
    open_decrypted, read_encryption_info, verify_password, ChainingMode, CipherAlgorithm,
    DecryptOptions, EncryptOptions, EncryptionScheme, HashAlgorithm, MemoryContainer,
    OfficeCryptoError, DEFAULT_PASSWORD, ENCRYPTED_PACKAGE_STREAM,
};

const SCHEMES: [EncryptionScheme; 4] = [
    EncryptionScheme::Agile,
    EncryptionScheme::Standard,
    EncryptionScheme::CryptoApiRc4,
    EncryptionScheme::Office97Rc4,
];

const SUMMARY_INFORMATION: &str = "\u{0005}SummaryInformation";

fn fast(scheme: EncryptionScheme) -> EncryptOptions {
    // Keep tests reasonably fast while still exercising the full encrypt/decrypt pipeline.
    EncryptOptions::for_scheme(scheme).with_spin_count(1_000)
}

fn payload(len: usize) -> Vec<u8> {
    let mut out = b"PK\x03\x04".to_vec();
    out.extend((0..len as u32).map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8));
    out.truncate(len);
    out
}

#[test]
fn every_scheme_round_trips() {
    let plaintext = payload(10_000);
    for scheme in SCHEMES {
        let bytes = encrypt(&plaintext, "correct horse battery staple", &fast(scheme))
            .unwrap_or_else(|err| panic!("encrypt {scheme}: {err}"));
        assert!(is_encrypted_container(&bytes));
        assert_eq!(read_encryption_info(&bytes).unwrap().scheme(), scheme);

        let decrypted = decrypt(&bytes, "correct horse battery staple")
            .unwrap_or_else(|err| panic!("decrypt {scheme}: {err}"));
        assert_eq!(decrypted, plaintext, "{scheme}");
    }
}

#[test]
fn boundary_lengths_round_trip() {
    for scheme in SCHEMES {
        let mut lens = vec![0usize, 1, 4095, 4096, 4097, 40960];
        if matches!(scheme, EncryptionScheme::CryptoApiRc4 | EncryptionScheme::Office97Rc4) {
            lens.extend([511, 512, 513]);
        }
        for len in lens {
            let plaintext = payload(len);
            let mut container = MemoryContainer::new();
            encrypt_to_container(&plaintext[..], &mut container, "pw", &fast(scheme)).unwrap();

            let record = container.get(ENCRYPTED_PACKAGE_STREAM).unwrap();
            assert_eq!(&record[..8], &(len as u64).to_le_bytes(), "{scheme} {len}");
            let block = match scheme {
                EncryptionScheme::Agile | EncryptionScheme::Standard => 16,
                _ => 1,
            };
            assert_eq!(record.len() - 8, len.div_ceil(block) * block, "{scheme} {len}");

            let out = decrypt_container(&mut container, "pw", &DecryptOptions::default()).unwrap();
            assert_eq!(out, plaintext, "{scheme} {len}");
        }
    }
}

#[test]
fn agile_variants_round_trip() {
    let plaintext = payload(9_000);
    let variants = [
        EncryptOptions::default().with_cipher(CipherAlgorithm::Aes128).with_hash(HashAlgorithm::Sha1),
        EncryptOptions::default().with_cipher(CipherAlgorithm::Aes192).with_hash(HashAlgorithm::Sha384),
        EncryptOptions::default().with_hash(HashAlgorithm::Sha256).with_chaining(ChainingMode::Cfb8),
        EncryptOptions::default().with_hash(HashAlgorithm::Md5),
    ];
    for options in variants {
        let options = options.with_spin_count(100);
        let bytes = encrypt(&plaintext, "pw", &options).unwrap();
        let info = read_encryption_info(&bytes).unwrap();
        assert_eq!(info.descriptor.cipher, options.cipher);
        assert_eq!(info.descriptor.chaining, options.chaining);
        assert_eq!(info.descriptor.hash, options.hash);
        assert_eq!(info.password_spin_count(), 100);
        assert_eq!(decrypt(&bytes, "pw").unwrap(), plaintext, "{options:?}");
    }
}

#[test]
fn standard_aes_key_sizes_round_trip() {
    let plaintext = payload(5_000);
    for cipher in [CipherAlgorithm::Aes128, CipherAlgorithm::Aes192, CipherAlgorithm::Aes256] {
        let options = EncryptOptions::for_scheme(EncryptionScheme::Standard).with_cipher(cipher);
        let bytes = encrypt(&plaintext, "pw", &options).unwrap();
        let info = read_encryption_info(&bytes).unwrap();
        assert_eq!((info.descriptor.version_major, info.descriptor.version_minor), (4, 2));
        assert_eq!(info.descriptor.flags, 0x24);
        assert_eq!(info.descriptor.key_bits, cipher.default_key_bits());
        assert_eq!(decrypt(&bytes, "pw").unwrap(), plaintext);
    }
}

#[test]
fn cryptoapi_rc4_with_md5_round_trips() {
    let plaintext = payload(2_000);
    let options = EncryptOptions::for_scheme(EncryptionScheme::CryptoApiRc4).with_hash(HashAlgorithm::Md5);
    let bytes = encrypt(&plaintext, "pw", &options).unwrap();
    let info = read_encryption_info(&bytes).unwrap();
    assert_eq!(info.descriptor.flags, 0x04);
    assert_eq!(info.descriptor.hash, HashAlgorithm::Md5);
    assert_eq!(decrypt(&bytes, "pw").unwrap(), plaintext);
}

#[test]
fn default_password_round_trips() {
    let plaintext = payload(300);
    for scheme in SCHEMES {
        let bytes = encrypt(&plaintext, DEFAULT_PASSWORD, &fast(scheme)).unwrap();
        assert!(verify_password(&bytes, DEFAULT_PASSWORD));
        assert!(!verify_password(&bytes, ""));
        assert_eq!(decrypt(&bytes, DEFAULT_PASSWORD).unwrap(), plaintext);
    }
}

#[test]
fn empty_and_unicode_passwords() {
    let plaintext = payload(100);
    for password in ["", "pässwörd", "密码", "🔒 lock"] {
        let bytes = encrypt(&plaintext, password, &fast(EncryptionScheme::Agile)).unwrap();
        assert_eq!(decrypt(&bytes, password).unwrap(), plaintext, "{password:?}");
    }

    // Passwords are hashed as UTF-16 code units with no normalization.
    let nfc = "caf\u{e9}";
    let nfd = "cafe\u{301}";
    for scheme in [EncryptionScheme::Agile, EncryptionScheme::Standard] {
        let bytes = encrypt(&plaintext, nfc, &fast(scheme)).unwrap();
        let err = decrypt(&bytes, nfd).unwrap_err();
        assert!(matches!(err, OfficeCryptoError::WrongPassword), "{err:?}");
    }
}

#[test]
fn encrypting_into_an_existing_container_keeps_other_streams() {
    let mut ole = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
    ole.create_stream(SUMMARY_INFORMATION)
        .unwrap()
        .write_all(b"dummy summary information bytes")
        .unwrap();
    ole.create_storage("/_VBA_PROJECT_CUR").unwrap();

    let plaintext = payload(6_000);
    encrypt_to_container(&plaintext[..], &mut ole, "pw", &fast(EncryptionScheme::Agile)).unwrap();
    // A second pass replaces both encryption streams in place.
    encrypt_to_container(&plaintext[..100], &mut ole, "other", &fast(EncryptionScheme::Standard))
        .unwrap();
    ole.flush().unwrap();
    let bytes = ole.into_inner().into_inner();

    assert_eq!(decrypt(&bytes, "other").unwrap(), &plaintext[..100]);

    let mut ole = cfb::CompoundFile::open(Cursor::new(&bytes[..])).unwrap();
    assert!(ole.is_storage("/_VBA_PROJECT_CUR"));
    let mut summary = Vec::new();
    ole.open_stream(format!("/{SUMMARY_INFORMATION}"))
        .unwrap()
        .read_to_end(&mut summary)
        .unwrap();
    assert_eq!(summary, b"dummy summary information bytes");
}

#[test]
fn trailing_bytes_after_the_ciphertext_are_ignored() {
    let plaintext = payload(5_000);
    for scheme in [EncryptionScheme::Standard, EncryptionScheme::CryptoApiRc4] {
        let mut container = MemoryContainer::new();
        encrypt_to_container(&plaintext[..], &mut container, "pw", &fast(scheme)).unwrap();
        container
            .get_mut(ENCRYPTED_PACKAGE_STREAM)
            .unwrap()
            .extend_from_slice(&[0xAB; 100]);

        let out = decrypt_container(&mut container, "pw", &DecryptOptions::default()).unwrap();
        assert_eq!(out, plaintext, "{scheme}");
    }
}

#[test]
fn decrypted_view_supports_random_access() {
    let plaintext = payload(3 * 4096 + 123);
    let bytes = encrypt(&plaintext, "pw", &fast(EncryptionScheme::Agile)).unwrap();
    let mut view = open_decrypted(&bytes, "pw", &DecryptOptions::default()).unwrap();

    assert_eq!(view.chunk_count(), 4);
    let end = view.seek(SeekFrom::End(-10)).unwrap();
    assert_eq!(end, plaintext.len() as u64 - 10);
    let mut tail = Vec::new();
    view.read_to_end(&mut tail).unwrap();
    assert_eq!(tail, &plaintext[plaintext.len() - 10..]);

    view.seek(SeekFrom::Start(4090)).unwrap();
    let mut straddle = [0u8; 12];
    view.read_exact(&mut straddle).unwrap();
    assert_eq!(&straddle[..], &plaintext[4090..4102]);

    view.rewind().unwrap();
    let mut all = Vec::new();
    view.read_to_end(&mut all).unwrap();
    assert_eq!(all, plaintext);
}
