use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

use crate::cipher::Direction;
use crate::error::{OfficeCryptoError, Result};
use crate::util::round_up;

use super::{zeroize_full, ChunkCipher, SIZE_PREFIX_LEN};

/// A `Read + Seek` view over a payload record that decrypts one chunk at a time.
///
/// `inner` is the whole record: offset 0 holds the 8-byte size prefix and the ciphertext follows.
/// Only the chunk under the cursor is held in plaintext; it is wiped when replaced and on drop.
pub struct PayloadReader<R, S> {
    inner: R,
    strategy: S,
    plaintext_len: u64,
    pos: u64,

    // Reused between chunks.
    scratch: Vec<u8>,

    cached_chunk_index: Option<u64>,
    cached_chunk_plain: Vec<u8>,
    cached_chunk_plain_len: usize,
}

impl<R: Read + Seek, S: ChunkCipher> PayloadReader<R, S> {
    /// Read the size prefix and check that the ciphertext can hold the declared plaintext.
    ///
    /// Nothing is allocated based on the declared size, so a hostile prefix cannot force a large
    /// allocation.
    pub fn new(mut inner: R, strategy: S) -> Result<Self> {
        inner.seek(SeekFrom::Start(0))?;
        let mut prefix = [0u8; SIZE_PREFIX_LEN as usize];
        read_exact_or_eof(&mut inner, &mut prefix, "EncryptedPackage size prefix")?;
        let plaintext_len = u64::from_le_bytes(prefix);

        let stream_len = inner.seek(SeekFrom::End(0))?;
        let ciphertext_len = stream_len.saturating_sub(SIZE_PREFIX_LEN);

        let padding = strategy.padding_block() as u64;
        let required = round_up(plaintext_len, padding).ok_or(
            OfficeCryptoError::PackageSizeOverflow {
                total_size: plaintext_len,
            },
        )?;
        if required > ciphertext_len {
            log::debug!(
                "EncryptedPackage declares {plaintext_len} bytes but carries {ciphertext_len} bytes of ciphertext"
            );
            return Err(OfficeCryptoError::UnexpectedEndOfStream {
                context: "EncryptedPackage ciphertext",
            });
        }
        if ciphertext_len > required {
            log::warn!(
                "ignoring {} trailing bytes after EncryptedPackage ciphertext",
                ciphertext_len - required
            );
        }

        Ok(Self {
            inner,
            strategy,
            plaintext_len,
            pos: 0,
            scratch: Vec::new(),
            cached_chunk_index: None,
            cached_chunk_plain: Vec::new(),
            cached_chunk_plain_len: 0,
        })
    }

    /// Plaintext length declared by the size prefix.
    pub fn plaintext_len(&self) -> u64 {
        self.plaintext_len
    }

    /// Number of chunks the payload is split into.
    pub fn chunk_count(&self) -> u64 {
        let chunk = self.strategy.chunk_size() as u64;
        self.plaintext_len / chunk + u64::from(self.plaintext_len % chunk != 0)
    }

    /// Decrypt chunk `index` on its own and borrow its plaintext.
    pub fn decrypt_chunk(&mut self, index: u64) -> Result<&[u8]> {
        self.ensure_chunk_cached(index)?;
        Ok(&self.cached_chunk_plain[..self.cached_chunk_plain_len])
    }

    /// Decrypt the whole payload into memory.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.plaintext_len).map_err(|_| {
            OfficeCryptoError::PackageSizeOverflow {
                total_size: self.plaintext_len,
            }
        })?;
        let mut out = Vec::new();
        out.try_reserve_exact(len)
            .map_err(|_| OfficeCryptoError::PackageSizeOverflow {
                total_size: self.plaintext_len,
            })?;
        for index in 0..self.chunk_count() {
            out.extend_from_slice(self.decrypt_chunk(index)?);
        }
        Ok(out)
    }

    fn read_chunked(&mut self, out: &mut [u8]) -> Result<usize> {
        let chunk_size = self.strategy.chunk_size() as u64;
        let mut written = 0usize;

        while written < out.len() {
            let chunk_index = self.pos / chunk_size;
            let chunk_offset = (self.pos % chunk_size) as usize;

            self.ensure_chunk_cached(chunk_index)?;

            let available = self.cached_chunk_plain_len.saturating_sub(chunk_offset);
            if available == 0 {
                return Err(OfficeCryptoError::UnexpectedEndOfStream {
                    context: "EncryptedPackage chunk",
                });
            }

            let take = (out.len() - written).min(available);
            out[written..written + take]
                .copy_from_slice(&self.cached_chunk_plain[chunk_offset..chunk_offset + take]);

            self.pos += take as u64;
            written += take;
        }

        Ok(written)
    }

    fn ensure_chunk_cached(&mut self, chunk_index: u64) -> Result<()> {
        if self.cached_chunk_index == Some(chunk_index) {
            return Ok(());
        }

        let chunk_size = self.strategy.chunk_size() as u64;
        let plain_start = chunk_index
            .checked_mul(chunk_size)
            .filter(|start| *start < self.plaintext_len)
            .ok_or(OfficeCryptoError::UnexpectedEndOfStream {
                context: "EncryptedPackage chunk",
            })?;
        let index = u32::try_from(chunk_index).map_err(|_| OfficeCryptoError::PackageSizeOverflow {
            total_size: self.plaintext_len,
        })?;

        let plain_len = (self.plaintext_len - plain_start).min(chunk_size) as usize;
        let cipher_len = round_up(plain_len as u64, self.strategy.padding_block() as u64)
            .unwrap_or(plain_len as u64) as usize;

        // Chunk `i` starts at ciphertext offset `i * chunk_size`; the chunk size is a multiple of
        // the padding block so only the final chunk is ever padded.
        let cipher_start = SIZE_PREFIX_LEN + plain_start;

        // Reuse the old plaintext buffer as scratch, wiping it first.
        self.cached_chunk_index = None;
        self.scratch.clear();
        std::mem::swap(&mut self.scratch, &mut self.cached_chunk_plain);
        zeroize_full(&mut self.scratch);

        self.scratch.resize(cipher_len, 0);
        self.inner.seek(SeekFrom::Start(cipher_start))?;
        read_exact_or_eof(&mut self.inner, &mut self.scratch, "EncryptedPackage ciphertext")?;

        let mut ctx = self.strategy.init_for_chunk(index, Direction::Decrypt)?;
        ctx.apply(&mut self.scratch)?;

        self.cached_chunk_plain_len = plain_len;
        self.cached_chunk_index = Some(chunk_index);
        std::mem::swap(&mut self.scratch, &mut self.cached_chunk_plain);
        Ok(())
    }
}

fn read_exact_or_eof<R: Read>(inner: &mut R, buf: &mut [u8], context: &'static str) -> Result<()> {
    inner.read_exact(buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            OfficeCryptoError::UnexpectedEndOfStream { context }
        } else {
            OfficeCryptoError::Io(err)
        }
    })
}

impl<R, S> Drop for PayloadReader<R, S> {
    fn drop(&mut self) {
        zeroize_full(&mut self.cached_chunk_plain);
        zeroize_full(&mut self.scratch);
    }
}

impl<R, S> fmt::Debug for PayloadReader<R, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadReader")
            .field("plaintext_len", &self.plaintext_len)
            .field("pos", &self.pos)
            .field("cached_chunk_index", &self.cached_chunk_index)
            .finish_non_exhaustive()
    }
}

impl<R: Read + Seek, S: ChunkCipher> Read for PayloadReader<R, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.plaintext_len {
            return Ok(0);
        }

        let remaining = self.plaintext_len - self.pos;
        let to_read = usize::try_from(remaining).unwrap_or(usize::MAX).min(buf.len());
        Ok(self.read_chunked(&mut buf[..to_read])?)
    }
}

impl<R: Read + Seek, S: ChunkCipher> Seek for PayloadReader<R, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos: i128 = match pos {
            SeekFrom::Start(n) => n as i128,
            SeekFrom::End(off) => self.plaintext_len as i128 + off as i128,
            SeekFrom::Current(off) => self.pos as i128 + off as i128,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative position",
            ));
        }
        self.pos = u64::try_from(new_pos).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek position overflows u64")
        })?;
        Ok(self.pos)
    }
}
