use thiserror::Error;

pub type Result<T, E = OfficeCryptoError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum OfficeCryptoError {
    /// The caller asked for an algorithm, key size or mode combination we cannot build.
    #[error("invalid encryption configuration: {0}")]
    Configuration(String),
    #[error("unsupported encryption format: {0}")]
    UnsupportedFormat(String),
    #[error("unsupported EncryptionInfo version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },
    #[error("malformed encryption metadata: {0}")]
    MalformedMetadata(String),
    /// Deliberately carries no detail about which verifier comparison failed.
    #[error("wrong password")]
    WrongPassword,
    #[error("integrity check failed: the encrypted package is corrupted or has been tampered with")]
    IntegrityCheckFailed,
    #[error("unexpected end of stream while reading {context}")]
    UnexpectedEndOfStream { context: &'static str },
    #[error("EncryptedPackage declares an unrepresentable size ({total_size} bytes)")]
    PackageSizeOverflow { total_size: u64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OfficeCryptoError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMetadata(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

impl From<OfficeCryptoError> for std::io::Error {
    fn from(err: OfficeCryptoError) -> Self {
        use std::io::ErrorKind;
        match err {
            OfficeCryptoError::Io(err) => err,
            OfficeCryptoError::UnexpectedEndOfStream { .. } => {
                std::io::Error::new(ErrorKind::UnexpectedEof, err)
            }
            other => std::io::Error::new(ErrorKind::InvalidData, other),
        }
    }
}
