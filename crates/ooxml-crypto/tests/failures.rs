use std::io::{Cursor, Read, Seek, SeekFrom};

use ooxml_crypto::{
    decrypt, decrypt_container, encrypt, encrypt_to_container, open_decrypted_container,
    verify_password, DecryptOptions, EncryptOptions, EncryptionScheme, MemoryContainer,
    OfficeCryptoError, ENCRYPTED_PACKAGE_STREAM, ENCRYPTION_INFO_STREAM,
};

const SCHEMES: [EncryptionScheme; 4] = [
    EncryptionScheme::Agile,
    EncryptionScheme::Standard,
    EncryptionScheme::CryptoApiRc4,
    EncryptionScheme::Office97Rc4,
];

fn fast(scheme: EncryptionScheme) -> EncryptOptions {
    EncryptOptions::for_scheme(scheme).with_spin_count(1_000)
}

fn payload(len: usize) -> Vec<u8> {
    (0..len as u32).map(|i| (i % 253) as u8).collect()
}

fn encrypted_container(scheme: EncryptionScheme, plaintext: &[u8]) -> MemoryContainer {
    let mut container = MemoryContainer::new();
    encrypt_to_container(plaintext, &mut container, "password", &fast(scheme)).unwrap();
    container
}

fn decrypt_memory(container: &mut MemoryContainer, password: &str) -> Result<Vec<u8>, OfficeCryptoError> {
    decrypt_container(container, password, &DecryptOptions::default())
}

#[test]
fn wrong_password_is_reported_without_detail() {
    for scheme in SCHEMES {
        let bytes = encrypt(&payload(1_000), "password", &fast(scheme)).unwrap();
        for wrong in ["", "Password", "password ", "not-the-password"] {
            let err = decrypt(&bytes, wrong).expect_err("expected failure");
            assert!(
                matches!(err, OfficeCryptoError::WrongPassword),
                "{scheme}: expected WrongPassword, got {err:?}"
            );
            assert_eq!(err.to_string(), "wrong password");
            assert!(!verify_password(&bytes, wrong));
        }
        assert!(verify_password(&bytes, "password"));
    }
}

#[test]
fn any_modified_payload_byte_fails_the_agile_integrity_check() {
    let plaintext = payload(10_000);
    let pristine = encrypted_container(EncryptionScheme::Agile, &plaintext);
    let record_len = pristine.get(ENCRYPTED_PACKAGE_STREAM).unwrap().len();

    for offset in [0, 1, 3, 7, 8, 100, 4096 + 8, record_len - 1] {
        for bit in [0x01, 0x80] {
            let mut container = pristine.clone();
            container.get_mut(ENCRYPTED_PACKAGE_STREAM).unwrap()[offset] ^= bit;
            let err = decrypt_memory(&mut container, "password").unwrap_err();
            assert!(
                matches!(err, OfficeCryptoError::IntegrityCheckFailed),
                "offset {offset} bit {bit:#04x}: {err:?}"
            );
        }
    }
}

#[test]
fn modified_size_prefix_fails_the_agile_integrity_check() {
    let pristine = encrypted_container(EncryptionScheme::Agile, &payload(10_000));
    let declared = |container: &MemoryContainer| {
        let record = container.get(ENCRYPTED_PACKAGE_STREAM).unwrap();
        u64::from_le_bytes(record[..8].try_into().unwrap())
    };
    assert_eq!(declared(&pristine), 10_000);

    // 10_000 = 0x2710: setting bit 0x80 of byte 1 grows the size, clearing bit 0x10 of byte 0
    // shrinks it.
    for (byte, bit, grows) in [(1usize, 0x80u8, true), (7, 0x01, true), (0, 0x10, false)] {
        let mut container = pristine.clone();
        container.get_mut(ENCRYPTED_PACKAGE_STREAM).unwrap()[byte] ^= bit;
        assert_eq!(declared(&container) > 10_000, grows, "byte {byte} bit {bit:#04x}");

        let err = decrypt_memory(&mut container, "password").unwrap_err();
        assert!(
            matches!(err, OfficeCryptoError::IntegrityCheckFailed),
            "byte {byte} bit {bit:#04x}: {err:?}"
        );
    }
}

#[test]
fn appended_bytes_fail_the_agile_integrity_check() {
    let mut container = encrypted_container(EncryptionScheme::Agile, &payload(500));
    container.get_mut(ENCRYPTED_PACKAGE_STREAM).unwrap().push(0);
    let err = decrypt_memory(&mut container, "password").unwrap_err();
    assert!(matches!(err, OfficeCryptoError::IntegrityCheckFailed), "{err:?}");
}

#[test]
fn wrong_password_is_reported_before_integrity() {
    let mut container = encrypted_container(EncryptionScheme::Agile, &payload(500));
    container.get_mut(ENCRYPTED_PACKAGE_STREAM).unwrap()[20] ^= 0xFF;
    let err = decrypt_memory(&mut container, "nope").unwrap_err();
    assert!(matches!(err, OfficeCryptoError::WrongPassword), "{err:?}");
}

#[test]
fn integrity_check_can_be_disabled() {
    let plaintext = payload(3 * 4096);
    let mut container = encrypted_container(EncryptionScheme::Agile, &plaintext);
    // Damage the first chunk only.
    container.get_mut(ENCRYPTED_PACKAGE_STREAM).unwrap()[8 + 10] ^= 0x80;

    let options = DecryptOptions {
        verify_integrity: false,
        ..DecryptOptions::default()
    };
    let out = decrypt_container(&mut container, "password", &options).unwrap();
    assert_eq!(out.len(), plaintext.len());
    assert_ne!(&out[..4096], &plaintext[..4096]);
    assert_eq!(&out[4096..], &plaintext[4096..]);
}

#[test]
fn chunks_decrypt_independently() {
    let plaintext = payload(3 * 4096 + 7);
    for scheme in [EncryptionScheme::Standard, EncryptionScheme::CryptoApiRc4] {
        let mut container = encrypted_container(scheme, &plaintext);
        // Corrupt ciphertext inside chunk 0.
        container.get_mut(ENCRYPTED_PACKAGE_STREAM).unwrap()[8 + 5] ^= 0x55;

        let mut view =
            open_decrypted_container(&mut container, "password", &DecryptOptions::default())
                .unwrap();
        view.seek(SeekFrom::Start(2 * 4096)).unwrap();
        let mut tail = Vec::new();
        view.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, &plaintext[2 * 4096..], "{scheme}");

        view.seek(SeekFrom::Start(0)).unwrap();
        let mut head = vec![0u8; 16];
        view.read_exact(&mut head).unwrap();
        assert_ne!(head, &plaintext[..16], "{scheme}");
    }
}

#[test]
fn agile_final_segment_decrypts_without_earlier_segments() {
    let plaintext = payload(3 * 4096 + 7);
    let mut container = encrypted_container(EncryptionScheme::Agile, &plaintext);
    // Earlier segments are unreadable; the final one must not depend on them.
    {
        let record = container.get_mut(ENCRYPTED_PACKAGE_STREAM).unwrap();
        for byte in &mut record[8..8 + 3 * 4096] {
            *byte ^= 0xA5;
        }
    }

    let options = DecryptOptions {
        verify_integrity: false,
        ..DecryptOptions::default()
    };
    let mut view = open_decrypted_container(&mut container, "password", &options).unwrap();
    view.seek(SeekFrom::Start(3 * 4096 + 2)).unwrap();
    let mut tail = Vec::new();
    view.read_to_end(&mut tail).unwrap();
    assert_eq!(tail, &plaintext[3 * 4096 + 2..]);

    view.seek(SeekFrom::Start(2 * 4096)).unwrap();
    let mut earlier = vec![0u8; 16];
    view.read_exact(&mut earlier).unwrap();
    assert_ne!(earlier, &plaintext[2 * 4096..2 * 4096 + 16]);
}

#[test]
fn truncated_ciphertext_is_an_unexpected_end_of_stream() {
    // The agile HMAC would catch the truncation first.
    let options = DecryptOptions {
        verify_integrity: false,
        ..DecryptOptions::default()
    };
    for scheme in SCHEMES {
        let mut container = encrypted_container(scheme, &payload(5_000));
        let record = container.get_mut(ENCRYPTED_PACKAGE_STREAM).unwrap();
        let new_len = record.len() - 16;
        record.truncate(new_len);

        let err = decrypt_container(&mut container, "password", &options).unwrap_err();
        assert!(
            matches!(err, OfficeCryptoError::UnexpectedEndOfStream { .. }),
            "{scheme}: {err:?}"
        );
    }

    let mut container = encrypted_container(EncryptionScheme::Agile, &payload(5_000));
    container.get_mut(ENCRYPTED_PACKAGE_STREAM).unwrap().truncate(100);
    let err = decrypt_memory(&mut container, "password").unwrap_err();
    assert!(matches!(err, OfficeCryptoError::IntegrityCheckFailed), "{err:?}");

    let mut container = encrypted_container(EncryptionScheme::Standard, &payload(10));
    container.insert(ENCRYPTED_PACKAGE_STREAM, vec![1, 2, 3]);
    let err = decrypt_memory(&mut container, "password").unwrap_err();
    assert!(matches!(err, OfficeCryptoError::UnexpectedEndOfStream { .. }), "{err:?}");
}

#[test]
fn unsupported_versions_are_rejected() {
    for (major, minor) in [(3u16, 3u16), (4, 3), (5, 2), (1, 2), (0, 0)] {
        let mut container = encrypted_container(EncryptionScheme::Standard, &payload(10));
        let info = container.get_mut(ENCRYPTION_INFO_STREAM).unwrap();
        info[..2].copy_from_slice(&major.to_le_bytes());
        info[2..4].copy_from_slice(&minor.to_le_bytes());

        let err = decrypt_memory(&mut container, "password").unwrap_err();
        assert!(
            matches!(err, OfficeCryptoError::UnsupportedVersion { major: m, minor: n } if m == major && n == minor),
            "{major}.{minor}: {err:?}"
        );
    }
}

#[test]
fn standard_versions_2_2_and_3_2_are_accepted() {
    let plaintext = payload(700);
    for major in [2u16, 3] {
        let mut container = encrypted_container(EncryptionScheme::Standard, &plaintext);
        container.get_mut(ENCRYPTION_INFO_STREAM).unwrap()[..2]
            .copy_from_slice(&major.to_le_bytes());
        assert_eq!(decrypt_memory(&mut container, "password").unwrap(), plaintext);
    }
}

#[test]
fn external_provider_flag_is_unsupported() {
    let mut container = encrypted_container(EncryptionScheme::Standard, &payload(10));
    let info = container.get_mut(ENCRYPTION_INFO_STREAM).unwrap();
    info[4..8].copy_from_slice(&(0x24u32 | 0x10).to_le_bytes());
    let err = decrypt_memory(&mut container, "password").unwrap_err();
    assert!(matches!(err, OfficeCryptoError::UnsupportedFormat(_)), "{err:?}");
}

#[test]
fn malformed_metadata_is_rejected() {
    let pristine = encrypted_container(EncryptionScheme::Agile, &payload(10));
    let info = pristine.get(ENCRYPTION_INFO_STREAM).unwrap().to_vec();
    let xml = String::from_utf8(info[8..].to_vec()).unwrap();

    let broken = [
        xml.replace("<keyData ", "<keyDatum "),
        xml.replace("dataIntegrity", "dataIntegrityX"),
        xml.replace("spinCount=\"1000\"", "spinCount=\"lots\""),
        xml.replace("saltSize=\"16\"", "saltSize=\"8\""),
        xml.replace("http://schemas.microsoft.com/office/2006/keyEncryptor/password", "urn:other"),
        xml[..xml.find("<keyEncryptors").unwrap()].to_string(),
    ];
    for (i, xml) in broken.iter().enumerate() {
        let mut bytes = info[..8].to_vec();
        bytes.extend_from_slice(xml.as_bytes());
        let mut container = pristine.clone();
        container.insert(ENCRYPTION_INFO_STREAM, bytes);
        let err = decrypt_memory(&mut container, "password").unwrap_err();
        assert!(matches!(err, OfficeCryptoError::MalformedMetadata(_)), "case {i}: {err:?}");
    }

    let mut container = pristine.clone();
    container.insert(ENCRYPTION_INFO_STREAM, vec![4, 0, 4]);
    let err = decrypt_memory(&mut container, "password").unwrap_err();
    assert!(matches!(err, OfficeCryptoError::MalformedMetadata(_)), "{err:?}");
}

#[test]
fn missing_streams_and_non_containers_are_unsupported() {
    let err = decrypt(b"PK\x03\x04 plain zip", "password").unwrap_err();
    assert!(matches!(err, OfficeCryptoError::UnsupportedFormat(_)), "{err:?}");

    let mut ole = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
    ole.create_stream("EncryptionInfo").unwrap();
    let bytes = ole.into_inner().into_inner();
    let err = decrypt(&bytes, "password").unwrap_err();
    assert!(matches!(err, OfficeCryptoError::MalformedMetadata(_)), "{err:?}");

    let mut container = encrypted_container(EncryptionScheme::Agile, &payload(10));
    let mut only_info = MemoryContainer::new();
    only_info.insert(
        ENCRYPTION_INFO_STREAM,
        container.get(ENCRYPTION_INFO_STREAM).unwrap().to_vec(),
    );
    let err = decrypt_memory(&mut only_info, "password").unwrap_err();
    assert!(matches!(err, OfficeCryptoError::UnsupportedFormat(_)), "{err:?}");
    assert!(decrypt_memory(&mut container, "password").is_ok());
}
