use log::{trace, warn};
use thiserror::Error;

use crate::bits::{Cursor, words_from_le_bytes};
use crate::bitstream::BuiltinAbbreviationId;
use crate::read::{BitStreamReader, BlockHeader, Error};
use crate::visitor::{BitStreamVisitor, CollectingVisitor};

/// `'B' 'C' 0xC0 0xDE` read as a little-endian word.
pub const BITCODE_MAGIC: u32 = u32::from_le_bytes([b'B', b'C', 0xc0, 0xde]);
/// `"DXIL"` read as a little-endian word.
pub const DXIL_MAGIC: u32 = u32::from_le_bytes(*b"DXIL");
/// Highest DXIL container version known to this parser.
pub const MAX_DXIL_VERSION: u32 = 0x102;

const HEADER_WORDS: usize = 6;

/// Blocks in a bitstream denote nested regions of the stream and are
/// identified by a content-specific id number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block ID
    pub id: u32,
    pub abbrev_width: u32,
    /// Word index of the first content word.
    pub start: usize,
    /// Declared content length in words.
    pub length: u32,
    pub level: u32,
    /// Records in stream order.
    pub records: Vec<Record>,
    /// Child blocks in stream order.
    pub blocks: Vec<Block>,
}

impl Block {
    pub fn new(header: &BlockHeader) -> Self {
        Self {
            id: header.id,
            abbrev_width: header.abbrev_width,
            start: header.start,
            length: header.length,
            level: header.level,
            records: Vec::new(),
            blocks: Vec::new(),
        }
    }

    /// Child blocks with the given id.
    pub fn children(&self, id: u32) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(move |block| block.id == id)
    }
}

/// Data records consist of a record code and a number of (up to) 64-bit
/// integer values.
///
/// The interpretation of the code and values is application specific and
/// varies between block types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub code: u32,
    pub operands: Vec<u64>,
}

impl Record {
    pub fn new(code: u32, operands: Vec<u64>) -> Self {
        Self { code, operands }
    }

    /// Interpret operands from `start_at` onwards as bytes of a string.
    pub fn string(&self, start_at: usize) -> String {
        let bytes: Vec<u8> = self
            .operands
            .iter()
            .skip(start_at)
            .map(|&x| x as u8)
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Errors in the fixed header which precedes DXIL bitcode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("DXIL chunk size {0} is smaller than the DXIL header size.")]
    TooSmall(usize),
    #[error("DXIL chunk token count {token_count:#x} is invalid (word count {word_count}).")]
    InvalidTokenCount { token_count: u32, word_count: usize },
    #[error("DXIL bitcode chunk has invalid offset {offset:#x} (data size {size:#x}).")]
    InvalidChunkOffset { offset: u32, size: usize },
    #[error(
        "DXIL bitcode chunk has invalid size {chunk_size:#x} (data size {size:#x}, chunk offset {offset:#x})."
    )]
    InvalidChunkSize {
        chunk_size: u32,
        size: usize,
        offset: u32,
    },
}

/// The DXIL program header:
/// `{version_token, token_count, magic, dxil_version, bitcode_offset, bitcode_size}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    pub version_token: u32,
    pub token_count: u32,
    pub magic: u32,
    pub dxil_version: u32,
    /// Byte offset of the bitcode, relative to the magic word.
    pub bitcode_offset: u32,
    pub bitcode_size: u32,
}

impl ProgramHeader {
    /// Validate the header and return it with the bitcode bytes it locates.
    pub fn parse(data: &[u8]) -> Result<(Self, &[u8]), HeaderError> {
        let word_count = data.len() / 4;
        if word_count < HEADER_WORDS {
            return Err(HeaderError::TooSmall(data.len()));
        }
        let word = |i: usize| {
            let bytes = &data[i * 4..i * 4 + 4];
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        };

        let header = Self {
            version_token: word(0),
            token_count: word(1),
            magic: word(2),
            dxil_version: word(3),
            bitcode_offset: word(4),
            bitcode_size: word(5),
        };
        trace!("Compiler version: {:#010x}.", header.version_token);
        trace!("Token count: {}.", header.token_count);

        if (header.token_count as usize) < HEADER_WORDS || word_count < header.token_count as usize {
            return Err(HeaderError::InvalidTokenCount {
                token_count: header.token_count,
                word_count,
            });
        }
        if header.magic != DXIL_MAGIC {
            warn!("Unknown magic number {:#010x}.", header.magic);
        }
        if header.dxil_version > MAX_DXIL_VERSION {
            warn!("Unknown DXIL version: {:#010x}.", header.dxil_version);
        }

        let offset = header.bitcode_offset;
        if offset < 16 || offset as usize >= data.len() {
            return Err(HeaderError::InvalidChunkOffset {
                offset,
                size: data.len(),
            });
        }
        let chunk_size = header.bitcode_size;
        if chunk_size as usize > data.len() - offset as usize {
            return Err(HeaderError::InvalidChunkSize {
                chunk_size,
                size: data.len(),
                offset,
            });
        }

        let start = 8 + offset as usize;
        let end = start.saturating_add(chunk_size as usize).min(data.len());
        let bitcode = data.get(start..end).unwrap_or_default();
        if bitcode.len() < 8 {
            return Err(HeaderError::InvalidChunkSize {
                chunk_size,
                size: data.len(),
                offset,
            });
        }
        Ok((header, bitcode))
    }

    pub fn shader_type(&self) -> u32 {
        self.version_token >> 16
    }

    pub fn major(&self) -> u32 {
        (self.version_token >> 4) & 0xf
    }

    pub fn minor(&self) -> u32 {
        self.version_token & 0xf
    }
}

/// The block tree of a DXIL bitcode stream.
#[derive(Debug, Clone)]
pub struct Bitcode {
    /// First word of the stream; normally [`BITCODE_MAGIC`].
    pub magic: u32,
    pub root: Block,
    /// Word position just after the root block's END_BLOCK.
    pub end_position: usize,
    /// Total words in the stream.
    pub word_count: usize,
}

impl Bitcode {
    /// Parse the block tree of a bitcode stream.
    pub fn new(bitcode: &[u8]) -> Result<Self, Error> {
        let words = words_from_le_bytes(bitcode);
        let mut visitor = CollectingVisitor::new();
        let end_position = Self::read_words(&words, &mut visitor)?;
        let root = visitor.finalize().ok_or(Error::MissingRootBlock)?;
        Ok(Self {
            magic: words.first().copied().unwrap_or_default(),
            root,
            end_position,
            word_count: words.len(),
        })
    }

    /// Read bitcode from bytes with a visitor
    pub fn read<V: BitStreamVisitor>(bitcode: &[u8], visitor: &mut V) -> Result<(), Error> {
        let words = words_from_le_bytes(bitcode);
        Self::read_words(&words, visitor).map(|_| ())
    }

    /// The stream is a magic word followed by the root block. Its
    /// ENTER_SUBBLOCK id sits in the low 2 bits of the second word.
    fn read_words<V: BitStreamVisitor>(words: &[u32], visitor: &mut V) -> Result<usize, Error> {
        let first = words.get(1).copied().ok_or(crate::bits::Error::BufferOverflow)?;
        let abbrev = first & 3;
        if abbrev != BuiltinAbbreviationId::EnterSubBlock as u32 {
            return Err(Error::InvalidInitialAbbrev(abbrev));
        }
        let mut reader = BitStreamReader::new(Cursor::at(words, 1, 2)?);
        reader.read_sub_block(0, visitor)?;
        Ok(reader.cursor().word_position())
    }
}
