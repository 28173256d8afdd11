//! DXBC container reader.
//!
//! Shader model 6 shaders are usually delivered inside a DXBC container next
//! to signature and feature chunks. Only the `DXIL` chunk is needed here.

use log::{debug, trace};
use thiserror::Error;

use crate::diagnostics::DiagnosticCode;

const HEADER_SIZE: usize = 32;
const CHUNK_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub u32);

impl FourCC {
    pub const DXBC: FourCC = FourCC(u32::from_le_bytes(*b"DXBC"));
    pub const DXIL: FourCC = FourCC(u32::from_le_bytes(*b"DXIL"));

    pub fn as_str(self) -> String {
        String::from_utf8_lossy(&self.0.to_le_bytes()).into_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DxbcError {
    #[error("DXBC size {0} is smaller than the DXBC header size.")]
    BufferTooSmall(usize),
    #[error("Invalid DXBC magic {0:#010x}.")]
    BadMagic(u32),
    #[error("Invalid DXBC version {0:#x}.")]
    BadVersion(u32),
    #[error("DXBC chunk table of {count} entries does not fit in {size} bytes.")]
    ChunkTableOutOfBounds { count: u32, size: usize },
    #[error("Invalid DXBC chunk offset {offset:#x} (data size {size:#x}).")]
    ChunkOutOfBounds { offset: u32, size: usize },
    #[error("Invalid DXBC chunk size {chunk_size:#x} at offset {offset:#x} (data size {size:#x}).")]
    ChunkSizeOutOfBounds {
        chunk_size: u32,
        offset: u32,
        size: usize,
    },
    #[error("DXBC container has no DXIL chunk.")]
    MissingDxilChunk,
}

impl DxbcError {
    pub fn code(&self) -> DiagnosticCode {
        match self {
            Self::BufferTooSmall(_) | Self::ChunkTableOutOfBounds { .. } => DiagnosticCode::DxbcInvalidSize,
            Self::BadMagic(_) => DiagnosticCode::DxbcInvalidMagic,
            Self::BadVersion(_) => DiagnosticCode::DxbcInvalidVersion,
            Self::ChunkOutOfBounds { .. } => DiagnosticCode::DxbcInvalidChunkOffset,
            Self::ChunkSizeOutOfBounds { .. } => DiagnosticCode::DxbcInvalidChunkSize,
            Self::MissingDxilChunk => DiagnosticCode::DxbcMissingChunk,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chunk<'a> {
    pub fourcc: FourCC,
    pub data: &'a [u8],
}

/// A parsed container. The checksum is kept but not verified.
#[derive(Debug, Clone)]
pub struct Container<'a> {
    pub checksum: [u8; 16],
    pub total_size: u32,
    pub chunks: Vec<Chunk<'a>>,
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let word = bytes.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
}

impl<'a> Container<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, DxbcError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DxbcError::BufferTooSmall(bytes.len()));
        }
        let word = |offset| read_u32(bytes, offset).ok_or(DxbcError::BufferTooSmall(bytes.len()));

        let magic = word(0)?;
        if magic != FourCC::DXBC.0 {
            return Err(DxbcError::BadMagic(magic));
        }
        let mut checksum = [0u8; 16];
        checksum.copy_from_slice(&bytes[4..20]);

        let version = word(20)?;
        if version != 1 {
            return Err(DxbcError::BadVersion(version));
        }
        let total_size = word(24)?;
        if total_size as usize != bytes.len() {
            debug!("Container size {total_size:#x} does not match data size {:#x}.", bytes.len());
        }
        let chunk_count = word(28)?;

        let table_end = (chunk_count as usize)
            .checked_mul(4)
            .and_then(|size| size.checked_add(HEADER_SIZE))
            .filter(|&end| end <= bytes.len())
            .ok_or(DxbcError::ChunkTableOutOfBounds {
                count: chunk_count,
                size: bytes.len(),
            })?;

        let mut chunks = Vec::new();
        chunks
            .try_reserve_exact(chunk_count as usize)
            .map_err(|_| DxbcError::BufferTooSmall(bytes.len()))?;
        for entry in (HEADER_SIZE..table_end).step_by(4) {
            let offset = word(entry)?;
            let out_of_bounds = DxbcError::ChunkOutOfBounds {
                offset,
                size: bytes.len(),
            };
            let start = (offset as usize)
                .checked_add(CHUNK_HEADER_SIZE)
                .filter(|&start| start <= bytes.len())
                .ok_or(out_of_bounds)?;
            let fourcc = FourCC(word(offset as usize)?);
            let chunk_size = word(offset as usize + 4)?;
            let Some(data) = start
                .checked_add(chunk_size as usize)
                .and_then(|end| bytes.get(start..end))
            else {
                return Err(DxbcError::ChunkSizeOutOfBounds {
                    chunk_size,
                    offset,
                    size: bytes.len(),
                });
            };
            trace!("Chunk {} at {offset:#x}, size {chunk_size:#x}.", fourcc.as_str());
            chunks.push(Chunk { fourcc, data });
        }

        Ok(Self {
            checksum,
            total_size,
            chunks,
        })
    }

    pub fn find(&self, fourcc: FourCC) -> impl Iterator<Item = &Chunk<'a>> {
        self.chunks.iter().filter(move |chunk| chunk.fourcc == fourcc)
    }
}

/// The contents of the first `DXIL` chunk of a DXBC container.
pub fn extract_dxil(bytes: &[u8]) -> Result<&[u8], DxbcError> {
    let container = Container::parse(bytes)?;
    let mut dxil = container.find(FourCC::DXIL);
    let chunk = dxil.next().ok_or(DxbcError::MissingDxilChunk)?;
    let ignored = dxil.count();
    if ignored > 0 {
        debug!("Ignoring {ignored} extra DXIL chunk(s).");
    }
    Ok(chunk.data)
}
