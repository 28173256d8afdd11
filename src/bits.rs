//! Word-addressed bit cursor over a DXIL bitcode stream.
//!
//! Bitcode is stored as little-endian 32-bit words. Fields are packed starting
//! from the least significant bit of each word and may straddle a word boundary.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("buffer overflow")]
    BufferOverflow,
    #[error("vbr overflow")]
    VbrOverflow,
    #[error("invalid field width {0}")]
    InvalidWidth(u32),
}

/// Convert a byte buffer into words, zero-padding a trailing partial word.
pub fn words_from_le_bytes(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    words: &'a [u32],
    word: usize,
    bitpos: u32,
}

impl<'a> Cursor<'a> {
    pub fn new(words: &'a [u32]) -> Self {
        Self {
            words,
            word: 0,
            bitpos: 0,
        }
    }

    /// Position the cursor at `word`, `bitpos` bits into it.
    pub fn at(words: &'a [u32], word: usize, bitpos: u32) -> Result<Self, Error> {
        if bitpos >= 32 || word > words.len() || (word == words.len() && bitpos != 0) {
            return Err(Error::BufferOverflow);
        }
        Ok(Self {
            words,
            word,
            bitpos,
        })
    }

    /// Index of the word holding the next unread bit.
    pub fn word_position(&self) -> usize {
        self.word
    }

    pub fn bit_position(&self) -> u32 {
        self.bitpos
    }

    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    pub fn is_at_end(&self) -> bool {
        self.word >= self.words.len()
    }

    pub fn remaining_bits(&self) -> u64 {
        let words = self.words.len().saturating_sub(self.word) as u64;
        (words * 32).saturating_sub(u64::from(self.bitpos))
    }

    /// Read a field of up to 32 bits.
    pub fn read(&mut self, count: u32) -> Result<u32, Error> {
        if count > 32 {
            return Err(Error::InvalidWidth(count));
        }
        if count == 0 {
            return Ok(0);
        }
        if self.remaining_bits() < u64::from(count) {
            return Err(Error::BufferOverflow);
        }

        let mut bits = u64::from(self.words[self.word]) >> self.bitpos;
        let available = 32 - self.bitpos;
        if count > available {
            bits |= u64::from(self.words[self.word + 1]) << available;
        }

        let end = self.bitpos + count;
        self.word += (end / 32) as usize;
        self.bitpos = end % 32;

        Ok((bits & ((1u64 << count) - 1)) as u32)
    }

    /// Read a fixed-width field of up to 64 bits.
    pub fn read_fixed(&mut self, count: u32) -> Result<u64, Error> {
        if count > 64 {
            return Err(Error::InvalidWidth(count));
        }
        if count <= 32 {
            return Ok(u64::from(self.read(count)?));
        }
        let low = u64::from(self.read(32)?);
        let high = u64::from(self.read(count - 32)?);
        Ok(low | (high << 32))
    }

    /// Read a whole 32-bit word.
    pub fn read_word(&mut self) -> Result<u32, Error> {
        self.read(32)
    }

    /// Read a variable bit rate value made of `width`-bit chunks.
    ///
    /// The top bit of each chunk signals that another chunk follows. A value
    /// which does not fit in 64 bits is an error rather than being truncated.
    pub fn read_vbr(&mut self, width: u32) -> Result<u64, Error> {
        if !(2..=32).contains(&width) {
            return Err(Error::InvalidWidth(width));
        }
        let flag = 1u64 << (width - 1);
        let mask = flag - 1;
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let chunk = u64::from(self.read(width)?);
            let payload = chunk & mask;
            if shift < 64 {
                if (payload << shift) >> shift != payload {
                    return Err(Error::VbrOverflow);
                }
                result |= payload << shift;
            } else if payload != 0 {
                return Err(Error::VbrOverflow);
            }
            shift += width - 1;
            if chunk & flag == 0 {
                return Ok(result);
            }
            if shift >= 64 {
                return Err(Error::VbrOverflow);
            }
        }
    }

    /// Skip to the next word boundary. A no-op when already aligned.
    pub fn align_32(&mut self) {
        if self.bitpos != 0 {
            self.bitpos = 0;
            self.word += 1;
        }
    }

    pub fn skip_words(&mut self, count: usize) -> Result<(), Error> {
        let target = self
            .word
            .checked_add(count)
            .filter(|&target| target <= self.words.len())
            .ok_or(Error::BufferOverflow)?;
        self.word = target;
        self.bitpos = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_straddles_word_boundary() {
        let words = [0xf000_0000, 0x0000_000f];
        let mut cursor = Cursor::new(&words);
        assert_eq!(cursor.read(28).unwrap(), 0);
        assert_eq!(cursor.read(8).unwrap(), 0xff);
        assert_eq!(cursor.word_position(), 1);
        assert_eq!(cursor.bit_position(), 4);
    }

    #[test]
    fn read_past_end_fails() {
        let words = [0u32];
        let mut cursor = Cursor::new(&words);
        assert_eq!(cursor.read(20).unwrap(), 0);
        assert_eq!(cursor.read(13), Err(Error::BufferOverflow));
    }

    #[test]
    fn align_is_idempotent() {
        let words = [0u32; 3];
        let mut cursor = Cursor::new(&words);
        cursor.read(3).unwrap();
        cursor.align_32();
        assert_eq!(cursor.word_position(), 1);
        cursor.align_32();
        assert_eq!(cursor.word_position(), 1);
        assert_eq!(cursor.bit_position(), 0);
    }

    #[test]
    fn vbr_rejects_bad_widths() {
        let words = [0u32];
        let mut cursor = Cursor::new(&words);
        assert_eq!(cursor.read_vbr(1), Err(Error::InvalidWidth(1)));
        assert_eq!(cursor.read_vbr(33), Err(Error::InvalidWidth(33)));
    }

    #[test]
    fn partial_words_are_zero_padded() {
        assert_eq!(words_from_le_bytes(&[1, 2, 3, 4, 5]), vec![0x0403_0201, 5]);
    }
}
