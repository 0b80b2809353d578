//! Agile XML descriptor.
//!
//! ```xml
//! <encryption xmlns="http://schemas.microsoft.com/office/2006/encryption" ...>
//!   <keyData .../>
//!   <dataIntegrity encryptedHmacKey="..." encryptedHmacValue="..."/>
//!   <keyEncryptors>
//!     <keyEncryptor uri="http://schemas.microsoft.com/office/2006/keyEncryptor/password">
//!       <p:encryptedKey spinCount="100000" .../>
//!     </keyEncryptor>
//!   </keyEncryptors>
//! </encryption>
//! ```

use std::str::FromStr;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::algorithm::{ChainingMode, CipherAlgorithm, HashAlgorithm};
use crate::error::{OfficeCryptoError, Result};
use crate::integrity::IntegrityData;
use crate::util::{decode_base64_attr, encode_base64};
use crate::verifier::{PasswordKeyParams, VerifierData, SALT_LEN};

use super::{AgileParams, Dialect, EncryptionDescriptor, EncryptionInfo, AGILE_FLAGS};

pub const ENCRYPTION_NS: &str = "http://schemas.microsoft.com/office/2006/encryption";
pub const PASSWORD_KEY_ENCRYPTOR_NS: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/password";
pub const CERTIFICATE_KEY_ENCRYPTOR_NS: &str =
    "http://schemas.microsoft.com/office/2006/keyEncryptor/certificate";

#[derive(Debug)]
struct NamespaceFrame {
    decls: Vec<(Vec<u8>, Vec<u8>)>,
}

fn push_namespace_frame(stack: &mut Vec<NamespaceFrame>, elem: &BytesStart<'_>) -> Result<()> {
    let mut frame = NamespaceFrame { decls: Vec::new() };
    for attr in elem.attributes().with_checks(false) {
        let attr = attr.map_err(|_| OfficeCryptoError::malformed("invalid XML attribute"))?;
        let key = attr.key.as_ref();
        if key == b"xmlns" {
            frame.decls.push((Vec::new(), attr.value.to_vec()));
        } else if let Some(prefix) = key.strip_prefix(b"xmlns:") {
            frame.decls.push((prefix.to_vec(), attr.value.to_vec()));
        }
    }
    stack.push(frame);
    Ok(())
}

fn resolve_namespace<'a>(stack: &'a [NamespaceFrame], prefix: &[u8]) -> Option<&'a [u8]> {
    stack.iter().rev().find_map(|frame| {
        frame
            .decls
            .iter()
            .find(|(p, _)| p.as_slice() == prefix)
            .map(|(_, uri)| uri.as_slice())
    })
}

fn element_prefix(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|b| *b == b':')
        .map(|idx| &name[..idx])
        .unwrap_or(&[])
}

/// Attributes of one element, keyed by local name.
struct Attrs {
    element: &'static str,
    values: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Attrs {
    fn collect(element: &'static str, e: &BytesStart<'_>) -> Result<Self> {
        let mut values = Vec::new();
        for attr in e.attributes().with_checks(false) {
            let attr = attr.map_err(|_| OfficeCryptoError::malformed("invalid XML attribute"))?;
            values.push((attr.key.local_name().as_ref().to_vec(), attr.value.to_vec()));
        }
        Ok(Self { element, values })
    }

    fn get(&self, name: &str) -> Option<&[u8]> {
        self.values
            .iter()
            .find(|(k, _)| k.as_slice() == name.as_bytes())
            .map(|(_, v)| v.as_slice())
    }

    fn str(&self, name: &str) -> Result<&str> {
        let raw = self.get(name).ok_or_else(|| {
            OfficeCryptoError::malformed(format!("missing {}.{name}", self.element))
        })?;
        std::str::from_utf8(raw).map_err(|_| {
            OfficeCryptoError::malformed(format!("{}.{name} is not valid UTF-8", self.element))
        })
    }

    fn number<T: FromStr>(&self, name: &str) -> Result<T> {
        self.str(name)?.trim().parse().map_err(|_| {
            OfficeCryptoError::malformed(format!("{}.{name} is not a decimal number", self.element))
        })
    }

    fn base64(&self, name: &str) -> Result<Vec<u8>> {
        decode_base64_attr(self.str(name)?, name)
    }
}

/// Parameters shared by `keyData` and `encryptedKey`.
struct CipherParams {
    cipher: CipherAlgorithm,
    chaining: ChainingMode,
    hash: HashAlgorithm,
    key_bits: u32,
    block_size: usize,
    salt: Vec<u8>,
}

fn cipher_params(attrs: &Attrs) -> Result<CipherParams> {
    let element = attrs.element;
    let key_bits: u32 = attrs.number("keyBits")?;
    let cipher_name = attrs.str("cipherAlgorithm")?;
    let cipher = CipherAlgorithm::from_xml_name(cipher_name, key_bits).ok_or_else(|| {
        OfficeCryptoError::UnsupportedFormat(format!(
            "{element}.cipherAlgorithm {cipher_name} with {key_bits}-bit key"
        ))
    })?;
    if !cipher.supports_key_bits(key_bits) {
        return Err(OfficeCryptoError::malformed(format!(
            "{element}.keyBits {key_bits} is not valid for {cipher}"
        )));
    }

    let chaining_name = attrs.str("cipherChaining")?;
    let chaining = ChainingMode::from_xml_name(chaining_name).ok_or_else(|| {
        OfficeCryptoError::UnsupportedFormat(format!("{element}.cipherChaining {chaining_name}"))
    })?;

    let hash_name = attrs.str("hashAlgorithm")?;
    let hash = HashAlgorithm::from_xml_name(hash_name).ok_or_else(|| {
        OfficeCryptoError::UnsupportedFormat(format!("{element}.hashAlgorithm {hash_name}"))
    })?;
    let hash_size: usize = attrs.number("hashSize")?;
    if hash_size != hash.digest_len() {
        return Err(OfficeCryptoError::malformed(format!(
            "{element}.hashSize {hash_size} does not match {hash}"
        )));
    }

    let block_size: usize = attrs.number("blockSize")?;
    if block_size != cipher.block_size() {
        return Err(OfficeCryptoError::malformed(format!(
            "{element}.blockSize {block_size} does not match {cipher}"
        )));
    }

    let salt_size: usize = attrs.number("saltSize")?;
    let salt = attrs.base64("saltValue")?;
    if salt_size != SALT_LEN || salt.len() != salt_size {
        return Err(OfficeCryptoError::malformed(format!(
            "{element} salt must be {SALT_LEN} bytes (saltSize {salt_size}, saltValue {} bytes)",
            salt.len()
        )));
    }

    Ok(CipherParams {
        cipher,
        chaining,
        hash,
        key_bits,
        block_size,
        salt,
    })
}

#[derive(Default)]
struct Collected {
    key_data: Option<Attrs>,
    data_integrity: Option<Attrs>,
    password_key: Option<Attrs>,
}

fn visit_element(
    ns_stack: &[NamespaceFrame],
    e: &BytesStart<'_>,
    collected: &mut Collected,
) -> Result<()> {
    match e.local_name().as_ref() {
        b"keyData" => collected.key_data = Some(Attrs::collect("keyData", e)?),
        b"dataIntegrity" => collected.data_integrity = Some(Attrs::collect("dataIntegrity", e)?),
        b"keyEncryptor" => {
            let attrs = Attrs::collect("keyEncryptor", e)?;
            let uri = attrs.get("uri").unwrap_or_default();
            if uri == CERTIFICATE_KEY_ENCRYPTOR_NS.as_bytes() {
                log::warn!("skipping certificate key encryptor");
            } else if uri != PASSWORD_KEY_ENCRYPTOR_NS.as_bytes() {
                log::warn!(
                    "skipping key encryptor with unknown uri {}",
                    String::from_utf8_lossy(uri)
                );
            }
        }
        b"encryptedKey" => {
            let name = e.name();
            let ns = resolve_namespace(ns_stack, element_prefix(name.as_ref()));
            if ns == Some(PASSWORD_KEY_ENCRYPTOR_NS.as_bytes()) && collected.password_key.is_none()
            {
                collected.password_key = Some(Attrs::collect("encryptedKey", e)?);
            }
        }
        _ => {}
    }
    Ok(())
}

pub(super) fn parse(xml_bytes: &[u8]) -> Result<EncryptionInfo> {
    // Some writers put a UTF-8 BOM in front of the declaration.
    let xml_bytes = xml_bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(xml_bytes);
    let xml = std::str::from_utf8(xml_bytes)
        .map_err(|_| OfficeCryptoError::malformed("agile EncryptionInfo XML is not valid UTF-8"))?;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut ns_stack: Vec<NamespaceFrame> = Vec::new();
    let mut collected = Collected::default();

    loop {
        let event = reader.read_event_into(&mut buf).map_err(|err| {
            OfficeCryptoError::malformed(format!("agile EncryptionInfo XML parse error: {err}"))
        })?;
        match event {
            Event::Start(e) => {
                push_namespace_frame(&mut ns_stack, &e)?;
                visit_element(&ns_stack, &e, &mut collected)?;
            }
            Event::Empty(e) => {
                push_namespace_frame(&mut ns_stack, &e)?;
                visit_element(&ns_stack, &e, &mut collected)?;
                ns_stack.pop();
            }
            Event::End(_) => {
                ns_stack.pop();
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let key_data = collected
        .key_data
        .ok_or_else(|| OfficeCryptoError::malformed("missing <keyData> element"))?;
    let data_integrity = collected
        .data_integrity
        .ok_or_else(|| OfficeCryptoError::malformed("missing <dataIntegrity> element"))?;
    let password_key = collected
        .password_key
        .ok_or_else(|| OfficeCryptoError::malformed("missing password <encryptedKey> element"))?;

    let payload = cipher_params(&key_data)?;
    let password = cipher_params(&password_key)?;
    if payload.key_bits != password.key_bits {
        return Err(OfficeCryptoError::malformed(format!(
            "keyData.keyBits {} does not match encryptedKey.keyBits {}",
            payload.key_bits, password.key_bits
        )));
    }
    let spin_count: u32 = password_key.number("spinCount")?;

    let integrity = IntegrityData {
        encrypted_hmac_key: data_integrity.base64("encryptedHmacKey")?,
        encrypted_hmac_value: data_integrity.base64("encryptedHmacValue")?,
    };
    let verifier = VerifierData {
        encrypted_verifier_input: password_key.base64("encryptedVerifierHashInput")?,
        encrypted_verifier_hash: password_key.base64("encryptedVerifierHashValue")?,
        encrypted_content_key: Some(password_key.base64("encryptedKeyValue")?),
        verifier_hash_size: password.hash.digest_len(),
        salt: password.salt,
    };
    let descriptor = EncryptionDescriptor {
        version_major: 4,
        version_minor: 4,
        flags: AGILE_FLAGS,
        cipher: payload.cipher,
        chaining: payload.chaining,
        hash: payload.hash,
        key_bits: payload.key_bits,
        block_size: payload.block_size,
        salt_size: payload.salt.len(),
        key_salt: payload.salt,
        spin_count,
    };
    let params = AgileParams {
        password: PasswordKeyParams {
            cipher: password.cipher,
            chaining: password.chaining,
            hash: password.hash,
            key_bits: password.key_bits,
            block_size: password.block_size,
            spin_count,
        },
        integrity,
    };

    Ok(EncryptionInfo {
        descriptor,
        verifier,
        dialect: Dialect::Agile(params),
    })
}

fn chaining_name(chaining: ChainingMode) -> Result<&'static str> {
    chaining
        .xml_name()
        .ok_or_else(|| OfficeCryptoError::config(format!("{chaining} cannot be used in agile records")))
}

fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|err| OfficeCryptoError::config(format!("failed to write agile XML: {err}")))
}

pub(super) fn write(
    d: &EncryptionDescriptor,
    params: &AgileParams,
    verifier: &VerifierData,
    out: &mut Vec<u8>,
) -> Result<()> {
    let p = &params.password;
    let encrypted_key_value = verifier
        .encrypted_content_key
        .as_deref()
        .ok_or_else(|| OfficeCryptoError::config("agile verifier has no encrypted key value"))?;

    let mut writer = Writer::new(Vec::new());
    write_event(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))),
    )?;
    writer.get_mut().extend_from_slice(b"\r\n");

    let mut root = BytesStart::new("encryption");
    root.push_attribute(("xmlns", ENCRYPTION_NS));
    root.push_attribute(("xmlns:p", PASSWORD_KEY_ENCRYPTOR_NS));
    write_event(&mut writer, Event::Start(root))?;

    let mut key_data = BytesStart::new("keyData");
    key_data.push_attribute(("saltSize", d.key_salt.len().to_string().as_str()));
    key_data.push_attribute(("blockSize", d.block_size.to_string().as_str()));
    key_data.push_attribute(("keyBits", d.key_bits.to_string().as_str()));
    key_data.push_attribute(("hashSize", d.hash.digest_len().to_string().as_str()));
    key_data.push_attribute(("cipherAlgorithm", d.cipher.xml_name()));
    key_data.push_attribute(("cipherChaining", chaining_name(d.chaining)?));
    key_data.push_attribute(("hashAlgorithm", d.hash.xml_name()));
    key_data.push_attribute(("saltValue", encode_base64(&d.key_salt).as_str()));
    write_event(&mut writer, Event::Empty(key_data))?;

    let mut integrity = BytesStart::new("dataIntegrity");
    integrity.push_attribute((
        "encryptedHmacKey",
        encode_base64(&params.integrity.encrypted_hmac_key).as_str(),
    ));
    integrity.push_attribute((
        "encryptedHmacValue",
        encode_base64(&params.integrity.encrypted_hmac_value).as_str(),
    ));
    write_event(&mut writer, Event::Empty(integrity))?;

    write_event(&mut writer, Event::Start(BytesStart::new("keyEncryptors")))?;
    let mut key_encryptor = BytesStart::new("keyEncryptor");
    key_encryptor.push_attribute(("uri", PASSWORD_KEY_ENCRYPTOR_NS));
    write_event(&mut writer, Event::Start(key_encryptor))?;

    let mut encrypted_key = BytesStart::new("p:encryptedKey");
    encrypted_key.push_attribute(("spinCount", p.spin_count.to_string().as_str()));
    encrypted_key.push_attribute(("saltSize", verifier.salt.len().to_string().as_str()));
    encrypted_key.push_attribute(("blockSize", p.block_size.to_string().as_str()));
    encrypted_key.push_attribute(("keyBits", p.key_bits.to_string().as_str()));
    encrypted_key.push_attribute(("hashSize", p.hash.digest_len().to_string().as_str()));
    encrypted_key.push_attribute(("cipherAlgorithm", p.cipher.xml_name()));
    encrypted_key.push_attribute(("cipherChaining", chaining_name(p.chaining)?));
    encrypted_key.push_attribute(("hashAlgorithm", p.hash.xml_name()));
    encrypted_key.push_attribute(("saltValue", encode_base64(&verifier.salt).as_str()));
    encrypted_key.push_attribute((
        "encryptedVerifierHashInput",
        encode_base64(&verifier.encrypted_verifier_input).as_str(),
    ));
    encrypted_key.push_attribute((
        "encryptedVerifierHashValue",
        encode_base64(&verifier.encrypted_verifier_hash).as_str(),
    ));
    encrypted_key.push_attribute(("encryptedKeyValue", encode_base64(encrypted_key_value).as_str()));
    write_event(&mut writer, Event::Empty(encrypted_key))?;

    write_event(&mut writer, Event::End(BytesEnd::new("keyEncryptor")))?;
    write_event(&mut writer, Event::End(BytesEnd::new("keyEncryptors")))?;
    write_event(&mut writer, Event::End(BytesEnd::new("encryption")))?;

    out.extend_from_slice(&writer.into_inner());
    Ok(())
}
