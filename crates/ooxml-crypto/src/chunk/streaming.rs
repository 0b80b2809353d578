use std::ops::Range;

use crate::cipher::{CipherContext, Direction};
use crate::error::{OfficeCryptoError, Result};

use super::ChunkCipher;

/// When a [`StreamingCodec`] moves to the next block key on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyPolicy {
    /// Only on explicit [`StreamingCodec::rekey`] calls.
    Manual,
    /// Every `n` bytes of keystream consumed, counting pass-through bytes.
    EveryBytes(u64),
}

/// One long-lived stream-cipher context for record-oriented legacy streams.
///
/// The caller decides which bytes are transformed and which are left in the clear, but every
/// byte advances the keystream. That is how BIFF8 record headers stay readable while the
/// RC4 position keeps counting them.
pub struct StreamingCodec<S> {
    strategy: S,
    direction: Direction,
    policy: RekeyPolicy,
    ctx: CipherContext,
    block: u32,
    position: u64,
}

impl<S: ChunkCipher> StreamingCodec<S> {
    pub fn new(strategy: S, direction: Direction, policy: RekeyPolicy) -> Result<Self> {
        if strategy.padding_block() != 1 {
            return Err(OfficeCryptoError::config(
                "streaming mode requires a stream cipher",
            ));
        }
        if policy == RekeyPolicy::EveryBytes(0) {
            return Err(OfficeCryptoError::config("re-key interval must be non-zero"));
        }
        let ctx = strategy.init_for_chunk(0, direction)?;
        Ok(Self {
            strategy,
            direction,
            policy,
            ctx,
            block: 0,
            position: 0,
        })
    }

    /// Current block number.
    pub fn block(&self) -> u32 {
        self.block
    }

    /// Keystream bytes consumed since construction or the last [`StreamingCodec::seek`].
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Replace the context with a fresh one for `block`.
    pub fn rekey(&mut self, block: u32) -> Result<()> {
        self.ctx = self.strategy.init_for_chunk(block, self.direction)?;
        self.block = block;
        Ok(())
    }

    /// Encrypt or decrypt `buf` in place.
    pub fn transform(&mut self, buf: &mut [u8]) -> Result<()> {
        self.process(buf)
    }

    /// Advance the keystream over `len` bytes that stay in the clear.
    pub fn pass_through(&mut self, len: usize) -> Result<()> {
        let mut scratch = [0u8; 256];
        let mut left = len;
        while left > 0 {
            let take = left.min(scratch.len());
            self.process(&mut scratch[..take])?;
            left -= take;
        }
        Ok(())
    }

    /// Transform `buf` except for the `clear` ranges, which only advance the keystream.
    ///
    /// Ranges must be sorted, non-overlapping and inside `buf`.
    pub fn transform_masked(&mut self, buf: &mut [u8], clear: &[Range<usize>]) -> Result<()> {
        let mut cursor = 0usize;
        for range in clear {
            if range.start < cursor || range.end < range.start || range.end > buf.len() {
                return Err(OfficeCryptoError::config(format!(
                    "clear range {range:?} is out of order or outside a {}-byte buffer",
                    buf.len()
                )));
            }
            self.process(&mut buf[cursor..range.start])?;
            self.pass_through(range.len())?;
            cursor = range.end;
        }
        self.process(&mut buf[cursor..])
    }

    /// Jump to an absolute keystream position. Needs [`RekeyPolicy::EveryBytes`].
    pub fn seek(&mut self, position: u64) -> Result<()> {
        let RekeyPolicy::EveryBytes(interval) = self.policy else {
            return Err(OfficeCryptoError::config(
                "seeking requires a fixed re-key interval",
            ));
        };
        let block = u32::try_from(position / interval)
            .map_err(|_| OfficeCryptoError::config("seek position exceeds u32 block indices"))?;
        self.rekey(block)?;
        self.position = u64::from(block) * interval;
        self.pass_through((position % interval) as usize)
    }

    fn process(&mut self, buf: &mut [u8]) -> Result<()> {
        let interval = match self.policy {
            RekeyPolicy::Manual => {
                self.ctx.apply(buf)?;
                self.position += buf.len() as u64;
                return Ok(());
            }
            RekeyPolicy::EveryBytes(n) => n,
        };

        let mut offset = 0usize;
        while offset < buf.len() {
            let left_in_block = interval - self.position % interval;
            let take = usize::try_from(left_in_block)
                .unwrap_or(usize::MAX)
                .min(buf.len() - offset);
            self.ctx.apply(&mut buf[offset..offset + take])?;
            self.position += take as u64;
            offset += take;
            if self.position % interval == 0 {
                let next = self.block.checked_add(1).ok_or_else(|| {
                    OfficeCryptoError::config("stream exceeds u32 block indices")
                })?;
                self.rekey(next)?;
            }
        }
        Ok(())
    }
}
