//! Named-stream storage for the two records of an encrypted document.
//!
//! The codec only needs to open and create streams by name. [`cfb::CompoundFile`] is the real
//! container; [`MemoryContainer`] is a map of names to buffers.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, Write};
use std::path::PathBuf;

use crate::error::{OfficeCryptoError, Result};

pub const ENCRYPTION_INFO_STREAM: &str = "EncryptionInfo";
pub const ENCRYPTED_PACKAGE_STREAM: &str = "EncryptedPackage";

pub(crate) const OLE_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Read access to named streams.
pub trait NamedStreams {
    type Reader<'a>: Read + Seek
    where
        Self: 'a;

    fn has_stream(&self, name: &str) -> bool;

    fn open_stream(&mut self, name: &str) -> Result<Self::Reader<'_>>;
}

/// Write access to named streams. Creating an existing stream truncates it.
pub trait NamedStreamsMut: NamedStreams {
    type Writer<'a>: Write + Seek
    where
        Self: 'a;

    fn create_stream(&mut self, name: &str) -> Result<Self::Writer<'_>>;
}

fn missing_stream(name: &str) -> OfficeCryptoError {
    OfficeCryptoError::UnsupportedFormat(format!("container has no {name} stream"))
}

/// Root-level stream path in `ole` matching `name`, ignoring ASCII case and a leading `/`.
fn resolve_cfb_stream<F>(ole: &cfb::CompoundFile<F>, name: &str) -> Option<PathBuf> {
    let wanted = name.trim_start_matches('/');
    ole.read_root_storage()
        .find(|entry| entry.is_stream() && entry.name().eq_ignore_ascii_case(wanted))
        .map(|entry| entry.path().to_path_buf())
}

impl<F: Read + Seek> NamedStreams for cfb::CompoundFile<F> {
    type Reader<'a> = cfb::Stream<F> where Self: 'a;

    fn has_stream(&self, name: &str) -> bool {
        resolve_cfb_stream(self, name).is_some()
    }

    fn open_stream(&mut self, name: &str) -> Result<Self::Reader<'_>> {
        let path = resolve_cfb_stream(self, name).ok_or_else(|| missing_stream(name))?;
        Ok(cfb::CompoundFile::open_stream(self, path)?)
    }
}

impl<F: Read + Write + Seek> NamedStreamsMut for cfb::CompoundFile<F> {
    type Writer<'a> = cfb::Stream<F> where Self: 'a;

    fn create_stream(&mut self, name: &str) -> Result<Self::Writer<'_>> {
        let path = resolve_cfb_stream(self, name)
            .unwrap_or_else(|| PathBuf::from(format!("/{}", name.trim_start_matches('/'))));
        Ok(cfb::CompoundFile::create_stream(self, path)?)
    }
}

/// In-memory container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryContainer {
    streams: BTreeMap<String, Vec<u8>>,
}

impl MemoryContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.streams.insert(name.into(), bytes);
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.key_for(name)
            .and_then(|key| self.streams.get(key))
            .map(Vec::as_slice)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Vec<u8>> {
        let key = self.key_for(name)?.to_string();
        self.streams.get_mut(&key)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    fn key_for(&self, name: &str) -> Option<&str> {
        self.streams
            .keys()
            .find(|key| key.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }
}

impl NamedStreams for MemoryContainer {
    type Reader<'a> = Cursor<&'a [u8]>;

    fn has_stream(&self, name: &str) -> bool {
        self.key_for(name).is_some()
    }

    fn open_stream(&mut self, name: &str) -> Result<Self::Reader<'_>> {
        self.get(name)
            .map(Cursor::new)
            .ok_or_else(|| missing_stream(name))
    }
}

impl NamedStreamsMut for MemoryContainer {
    type Writer<'a> = Cursor<&'a mut Vec<u8>>;

    fn create_stream(&mut self, name: &str) -> Result<Self::Writer<'_>> {
        let key = self
            .key_for(name)
            .map(str::to_string)
            .unwrap_or_else(|| name.to_string());
        let buf = self.streams.entry(key).or_default();
        buf.clear();
        Ok(Cursor::new(buf))
    }
}

/// Read a whole stream into memory.
pub fn read_stream<C: NamedStreams>(container: &mut C, name: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    container.open_stream(name)?.read_to_end(&mut out)?;
    Ok(out)
}

/// Open `bytes` as an OLE compound file.
pub fn open_ole(bytes: &[u8]) -> Result<cfb::CompoundFile<Cursor<&[u8]>>> {
    if !bytes.starts_with(&OLE_MAGIC) {
        return Err(OfficeCryptoError::UnsupportedFormat(
            "input is not an OLE compound file".to_string(),
        ));
    }
    Ok(cfb::CompoundFile::open(Cursor::new(bytes))?)
}

/// Whether `container` holds both encryption streams.
pub fn has_encryption_streams<C: NamedStreams>(container: &C) -> bool {
    container.has_stream(ENCRYPTION_INFO_STREAM) && container.has_stream(ENCRYPTED_PACKAGE_STREAM)
}
