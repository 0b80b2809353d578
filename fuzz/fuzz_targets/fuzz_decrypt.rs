#![no_main]

use libfuzzer_sys::fuzz_target;
use ooxml_crypto::{
    decrypt_container, DecryptOptions, EncryptionInfo, MemoryContainer, ENCRYPTED_PACKAGE_STREAM,
    ENCRYPTION_INFO_STREAM,
};

// Cap spin counts so a descriptor asking for millions of iterations does not stall the fuzzer.
const MAX_SPIN_COUNT: u32 = 1_000;

fuzz_target!(|data: &[u8]| {
    let _ = EncryptionInfo::parse(data);

    // First two bytes pick where the EncryptionInfo stream ends; the rest is the payload record.
    if data.len() < 2 {
        return;
    }
    let split = (u16::from_le_bytes([data[0], data[1]]) as usize).min(data.len() - 2);
    let (info, package) = data[2..].split_at(split);

    let mut container = MemoryContainer::new();
    container.insert(ENCRYPTION_INFO_STREAM, info.to_vec());
    container.insert(ENCRYPTED_PACKAGE_STREAM, package.to_vec());

    let options = DecryptOptions {
        max_spin_count: MAX_SPIN_COUNT,
        ..DecryptOptions::default()
    };
    let _ = decrypt_container(&mut container, "", &options);
    let _ = decrypt_container(&mut container, ooxml_crypto::DEFAULT_PASSWORD, &options);
});
