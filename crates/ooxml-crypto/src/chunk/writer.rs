use std::io::{self, Seek, SeekFrom, Write};

use zeroize::Zeroizing;

use crate::cipher::Direction;
use crate::error::Result;
use crate::util::round_up;

use super::{zeroize_full, ChunkCipher, SIZE_PREFIX_LEN};

/// Encrypts a payload record chunk by chunk as plaintext is written.
///
/// A placeholder size prefix is written up front and patched by [`PayloadWriter::finish`], so the
/// plaintext length does not need to be known in advance. At most one chunk of plaintext is
/// buffered.
pub struct PayloadWriter<W: Write + Seek, S: ChunkCipher> {
    inner: W,
    strategy: S,
    start: u64,
    buffer: Zeroizing<Vec<u8>>,
    chunk_index: u32,
    plaintext_len: u64,
    ciphertext_len: u64,
}

impl<W: Write + Seek, S: ChunkCipher> PayloadWriter<W, S> {
    pub fn new(mut inner: W, strategy: S) -> Result<Self> {
        let start = inner.stream_position()?;
        inner.write_all(&[0u8; SIZE_PREFIX_LEN as usize])?;
        let buffer = Zeroizing::new(Vec::with_capacity(strategy.chunk_size()));
        Ok(Self {
            inner,
            strategy,
            start,
            buffer,
            chunk_index: 0,
            plaintext_len: 0,
            ciphertext_len: 0,
        })
    }

    /// Plaintext bytes accepted so far.
    pub fn plaintext_len(&self) -> u64 {
        self.plaintext_len
    }

    /// Flush the final partial chunk, patch the size prefix and return the sink positioned just
    /// past the ciphertext.
    pub fn finish(mut self) -> Result<W> {
        if !self.buffer.is_empty() {
            self.flush_chunk()?;
        }
        self.inner.seek(SeekFrom::Start(self.start))?;
        self.inner.write_all(&self.plaintext_len.to_le_bytes())?;
        self.inner
            .seek(SeekFrom::Start(self.start + SIZE_PREFIX_LEN + self.ciphertext_len))?;
        self.inner.flush()?;
        log::debug!(
            "wrote EncryptedPackage: {} plaintext bytes in {} chunks",
            self.plaintext_len,
            self.chunk_index
        );
        Ok(self.inner)
    }

    fn flush_chunk(&mut self) -> Result<()> {
        let padded = round_up(self.buffer.len() as u64, self.strategy.padding_block() as u64)
            .unwrap_or(self.buffer.len() as u64) as usize;
        self.buffer.resize(padded, 0);

        let mut ctx = self.strategy.init_for_chunk(self.chunk_index, Direction::Encrypt)?;
        ctx.apply(&mut self.buffer)?;
        self.inner.write_all(&self.buffer)?;

        self.ciphertext_len += padded as u64;
        self.chunk_index = self.chunk_index.checked_add(1).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "payload exceeds u32 chunk indices")
        })?;
        zeroize_full(&mut self.buffer);
        self.buffer.clear();
        Ok(())
    }
}

impl<W: Write + Seek, S: ChunkCipher> Write for PayloadWriter<W, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let chunk_size = self.strategy.chunk_size();
        let take = (chunk_size - self.buffer.len()).min(buf.len());
        self.buffer.extend_from_slice(&buf[..take]);
        self.plaintext_len += take as u64;
        if self.buffer.len() == chunk_size {
            self.flush_chunk()?;
        }
        Ok(take)
    }

    /// Only flushes the sink; a partial chunk stays buffered until [`PayloadWriter::finish`].
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
