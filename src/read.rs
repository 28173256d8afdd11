use std::collections::HashMap;

use log::{debug, trace, warn};
use thiserror::Error;

use crate::bitcode::Record;
use crate::bits::{self, Cursor};
use crate::bitstream::{
    Abbreviation, BlockInfoCode, BuiltinAbbreviationId, FIRST_APPLICATION_ABBREV_ID, Operand,
    PayloadOperand, ScalarOperand, decode_char6,
};
use crate::schema::blocks::BlockId;
use crate::visitor::BitStreamVisitor;

/// Bitstream reader errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid abbreviation")]
    InvalidAbbrev,
    #[error("invalid abbreviation operand encoding `{0}`")]
    InvalidAbbrevEncoding(u32),
    #[error("block info block at level {0}")]
    MisplacedBlockInfo(u32),
    #[error("missing SETBID")]
    MissingSetBid,
    #[error("invalid block info record `{0}`")]
    InvalidBlockInfoRecord(u32),
    #[error("global abbreviations for the module block are not supported")]
    ModuleBlockAbbrev,
    #[error("abbreviation width `{0}` is invalid")]
    InvalidAbbrevWidth(u64),
    #[error("invalid block id `{0}`")]
    InvalidBlockId(u64),
    #[error("sub-block inside block `{0}`")]
    InvalidSubBlockParent(u32),
    #[error("no such abbreviation `{abbrev_id}` in block `{block_id}`")]
    NoSuchAbbrev { block_id: u32, abbrev_id: u32 },
    #[error("abbreviated record has no record code")]
    MissingRecordCode,
    #[error("initial block abbreviation `{0}` is not ENTER_SUBBLOCK")]
    InvalidInitialAbbrev(u32),
    #[error("bitcode has no root block")]
    MissingRootBlock,
    #[error("out of memory")]
    OutOfMemory,
    #[error(transparent)]
    ReadBits(#[from] bits::Error),
}

/// Header of a block, read after its ENTER_SUBBLOCK abbreviation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub id: u32,
    pub abbrev_width: u32,
    /// Word index of the first word of block content.
    pub start: usize,
    /// Declared content length in words.
    pub length: u32,
    /// Nesting depth; the outermost block is level 0.
    pub level: u32,
}

/// Bitstream reader
#[derive(Debug, Clone)]
pub struct BitStreamReader<'a> {
    cursor: Cursor<'a>,
    /// Abbreviations defined in BLOCKINFO, keyed by the block id they apply to.
    global_abbrevs: HashMap<u32, Vec<Abbreviation>>,
}

impl<'a> BitStreamReader<'a> {
    pub fn new(cursor: Cursor<'a>) -> Self {
        Self {
            cursor,
            global_abbrevs: HashMap::new(),
        }
    }

    pub fn cursor(&self) -> &Cursor<'a> {
        &self.cursor
    }

    /// Global abbreviations registered so far for `block_id`.
    pub fn global_abbrevs(&self, block_id: u32) -> &[Abbreviation] {
        self.global_abbrevs
            .get(&block_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Read abbreviated operand
    pub fn read_abbrev_op(&mut self) -> Result<Operand, Error> {
        if self.cursor.read(1)? == 1 {
            return Ok(Operand::Scalar(ScalarOperand::Literal(
                self.cursor.read_vbr(8)?,
            )));
        }
        let op_type = self.cursor.read(3)?;
        let op = match op_type {
            1 | 2 => {
                let width = self.cursor.read_vbr(5)?;
                if width > 64 {
                    return Err(Error::InvalidAbbrevWidth(width));
                }
                // A zero-width field always reads as zero.
                match (op_type, width as u8) {
                    (_, 0) => Operand::Scalar(ScalarOperand::Literal(0)),
                    (1, width) => Operand::Scalar(ScalarOperand::Fixed(width)),
                    (_, 1) => return Err(Error::InvalidAbbrevWidth(1)),
                    (_, width) if width > 32 => {
                        return Err(Error::InvalidAbbrevWidth(u64::from(width)));
                    }
                    (_, width) => Operand::Scalar(ScalarOperand::Vbr(width)),
                }
            }
            3 => Operand::ArrayMarker,
            4 => Operand::Scalar(ScalarOperand::Char6),
            5 => Operand::Blob,
            _ => return Err(Error::InvalidAbbrevEncoding(op_type)),
        };
        Ok(op)
    }

    /// Read the operand list of a DEFINE_ABBREV record.
    ///
    /// An array marker must be the second-to-last operand and is folded into
    /// the element encoding that follows it. A blob must be the last operand.
    pub fn read_abbrev(&mut self, num_ops: usize) -> Result<Abbreviation, Error> {
        let mut abbrev = Abbreviation::default();
        let mut after_array = false;
        for i in 0..num_ops {
            let op = self.read_abbrev_op()?;
            if after_array {
                let Operand::Scalar(element) = op else {
                    return Err(Error::InvalidAbbrev);
                };
                if op.is_literal() {
                    return Err(Error::InvalidAbbrev);
                }
                abbrev.payload = Some(PayloadOperand::Array(element));
                continue;
            }
            match op {
                Operand::Scalar(scalar) => abbrev.fields.push(scalar),
                Operand::ArrayMarker => {
                    if i + 2 != num_ops {
                        return Err(Error::InvalidAbbrev);
                    }
                    after_array = true;
                }
                Operand::Blob => {
                    if i + 1 != num_ops {
                        return Err(Error::InvalidAbbrev);
                    }
                    abbrev.payload = Some(PayloadOperand::Blob);
                }
            }
        }
        Ok(abbrev)
    }

    fn read_scalar_operand(&mut self, operand: ScalarOperand) -> Result<u64, Error> {
        Ok(match operand {
            ScalarOperand::Literal(value) => value,
            ScalarOperand::Fixed(width) => self.cursor.read_fixed(u32::from(width))?,
            ScalarOperand::Vbr(width) => self.cursor.read_vbr(u32::from(width))?,
            ScalarOperand::Char6 => u64::from(decode_char6(self.cursor.read(6)?)),
        })
    }

    /// Read a length prefix and make sure that many elements of at least
    /// `min_bits` each could still be present.
    fn read_length(&mut self, min_bits: u64) -> Result<usize, Error> {
        let length = self.cursor.read_vbr(6)?;
        if length.saturating_mul(min_bits) > self.cursor.remaining_bits() {
            return Err(bits::Error::BufferOverflow.into());
        }
        usize::try_from(length).map_err(|_| Error::OutOfMemory)
    }

    fn allocate(capacity: usize) -> Result<Vec<u64>, Error> {
        let mut operands = Vec::new();
        operands
            .try_reserve_exact(capacity)
            .map_err(|_| Error::OutOfMemory)?;
        Ok(operands)
    }

    fn truncate_code(code: u64) -> u32 {
        u32::try_from(code).unwrap_or_else(|_| {
            debug!("Truncating 64-bit record code {code:#x}.");
            code as u32
        })
    }

    /// Read a record encoded by `abbrev`. Returns `None` for an abbreviation
    /// with no operands, which encodes nothing.
    pub fn read_abbreviated_record(
        &mut self,
        abbrev: &Abbreviation,
    ) -> Result<Option<Record>, Error> {
        let Some((&code_op, fields)) = abbrev.fields.split_first() else {
            return match abbrev.payload {
                None => Ok(None),
                Some(_) => Err(Error::MissingRecordCode),
            };
        };
        let code = Self::truncate_code(self.read_scalar_operand(code_op)?);

        let mut operands = Self::allocate(fields.len())?;
        for &op in fields {
            operands.push(self.read_scalar_operand(op)?);
        }

        match abbrev.payload {
            Some(PayloadOperand::Array(element)) => {
                let min_bits = match element {
                    ScalarOperand::Literal(_) | ScalarOperand::Fixed(0) => 0,
                    ScalarOperand::Fixed(width) | ScalarOperand::Vbr(width) => u64::from(width),
                    ScalarOperand::Char6 => 6,
                };
                let length = self.read_length(min_bits)?;
                operands
                    .try_reserve_exact(length)
                    .map_err(|_| Error::OutOfMemory)?;
                for _ in 0..length {
                    operands.push(self.read_scalar_operand(element)?);
                }
            }
            Some(PayloadOperand::Blob) => {
                let length = self.read_length(8)?;
                self.cursor.align_32();
                self.cursor.skip_words(length.div_ceil(4))?;
                debug!("Skipped blob operand of {length} bytes in record code {code}.");
            }
            None => {}
        }

        Ok(Some(Record::new(code, operands)))
    }

    /// Read an UNABBREV_RECORD: a vbr6 code, a vbr6 count and that many vbr6
    /// operands.
    pub fn read_unabbreviated_record(&mut self) -> Result<Record, Error> {
        let code = Self::truncate_code(self.cursor.read_vbr(6)?);
        let num_ops = self.read_length(6)?;
        let mut operands = Self::allocate(num_ops)?;
        for _ in 0..num_ops {
            operands.push(self.cursor.read_vbr(6)?);
        }
        Ok(Record::new(code, operands))
    }

    /// Read the header that follows an ENTER_SUBBLOCK id.
    pub fn read_block_header(&mut self, level: u32) -> Result<BlockHeader, Error> {
        let id = self.cursor.read_vbr(8)?;
        let id = u32::try_from(id).map_err(|_| Error::InvalidBlockId(id))?;
        let abbrev_width = self.cursor.read_vbr(4)?;
        if !(1..=32).contains(&abbrev_width) {
            return Err(Error::InvalidAbbrevWidth(abbrev_width));
        }
        self.cursor.align_32();
        let length = self.cursor.read_word()?;
        Ok(BlockHeader {
            id,
            abbrev_width: abbrev_width as u32,
            start: self.cursor.word_position(),
            length,
            level,
        })
    }

    /// Read a block whose ENTER_SUBBLOCK id has just been consumed, including
    /// everything nested in it.
    pub fn read_sub_block<V: BitStreamVisitor>(
        &mut self,
        level: u32,
        visitor: &mut V,
    ) -> Result<(), Error> {
        let header = self.read_block_header(level)?;
        trace!(
            "Block {} at word {}, length {}, level {}.",
            header.id, header.start, header.length, header.level
        );

        if header.id == BlockId::BlockInfo as u32 {
            return self.read_block_info_block(&header);
        }
        if !visitor.should_enter_block(&header) {
            debug!("Skipping block {}.", header.id);
            return Ok(self.cursor.skip_words(header.length as usize)?);
        }
        self.read_block(&header, visitor)
    }

    /// Read block info block
    ///
    /// Abbreviations defined here are registered for the block id named by
    /// the most recent SETBID record.
    pub fn read_block_info_block(&mut self, header: &BlockHeader) -> Result<(), Error> {
        use BuiltinAbbreviationId::*;

        // BLOCKINFO must sit directly below the module root.
        if header.level > 1 {
            warn!("Invalid blockinfo block level {}.", header.level);
            return Err(Error::MisplacedBlockInfo(header.level));
        }

        let mut current_block_id = None;
        loop {
            let abbrev_id = self.cursor.read(header.abbrev_width)?;
            match BuiltinAbbreviationId::try_from(abbrev_id) {
                Ok(EndBlock) => {
                    self.cursor.align_32();
                    return Ok(());
                }
                Ok(EnterSubBlock) => return Err(Error::InvalidSubBlockParent(header.id)),
                Ok(DefineAbbreviation) => {
                    let num_ops = self.cursor.read_vbr(5)? as usize;
                    let abbrev = self.read_abbrev(num_ops)?;
                    let block_id = current_block_id.ok_or(Error::MissingSetBid)?;
                    if block_id == BlockId::Module as u32 {
                        return Err(Error::ModuleBlockAbbrev);
                    }
                    self.global_abbrevs.entry(block_id).or_default().push(abbrev);
                }
                Ok(UnabbreviatedRecord) => {
                    let record = self.read_unabbreviated_record()?;
                    self.handle_block_info_record(&record, &mut current_block_id)?;
                }
                Err(_) => {
                    let abbrev = self
                        .global_abbrevs(header.id)
                        .get((abbrev_id - FIRST_APPLICATION_ABBREV_ID) as usize)
                        .cloned()
                        .ok_or(Error::NoSuchAbbrev {
                            block_id: header.id,
                            abbrev_id,
                        })?;
                    if let Some(record) = self.read_abbreviated_record(&abbrev)? {
                        self.handle_block_info_record(&record, &mut current_block_id)?;
                    }
                }
            }
        }
    }

    fn handle_block_info_record(
        &mut self,
        record: &Record,
        current_block_id: &mut Option<u32>,
    ) -> Result<(), Error> {
        match BlockInfoCode::try_from(record.code) {
            Ok(BlockInfoCode::SetBid) => {
                let &id = record
                    .operands
                    .first()
                    .ok_or(Error::InvalidBlockInfoRecord(record.code))?;
                if id > u64::from(u32::MAX) {
                    debug!("Truncating block id {id}.");
                }
                *current_block_id = Some(id as u32);
            }
            Ok(BlockInfoCode::BlockName | BlockInfoCode::SetRecordName) => {}
            Err(_) => debug!("Unhandled BLOCKINFO record type {}.", record.code),
        }
        Ok(())
    }

    /// Read block with visitor
    ///
    /// The block starts with the global abbreviations registered for its id;
    /// abbreviations it defines itself follow them and go out of scope at its end.
    pub fn read_block<V: BitStreamVisitor>(
        &mut self,
        header: &BlockHeader,
        visitor: &mut V,
    ) -> Result<(), Error> {
        use BuiltinAbbreviationId::*;

        let mut abbrevs = self.global_abbrevs(header.id).to_vec();
        loop {
            let abbrev_id = self.cursor.read(header.abbrev_width)?;
            match BuiltinAbbreviationId::try_from(abbrev_id) {
                Ok(EndBlock) => {
                    self.cursor.align_32();
                    visitor.did_exit_block(header.id);
                    return Ok(());
                }
                Ok(EnterSubBlock) => {
                    if header.id != BlockId::Module as u32 && header.id != BlockId::Function as u32
                    {
                        warn!("Invalid subblock parent id {}.", header.id);
                        return Err(Error::InvalidSubBlockParent(header.id));
                    }
                    self.read_sub_block(header.level + 1, visitor)?;
                }
                Ok(DefineAbbreviation) => {
                    let num_ops = self.cursor.read_vbr(5)? as usize;
                    abbrevs.try_reserve(1).map_err(|_| Error::OutOfMemory)?;
                    abbrevs.push(self.read_abbrev(num_ops)?);
                }
                Ok(UnabbreviatedRecord) => {
                    let record = self.read_unabbreviated_record()?;
                    visitor.visit(header.id, record);
                }
                Err(_) => {
                    let abbrev = abbrevs
                        .get((abbrev_id - FIRST_APPLICATION_ABBREV_ID) as usize)
                        .ok_or(Error::NoSuchAbbrev {
                            block_id: header.id,
                            abbrev_id,
                        })?;
                    if let Some(record) = self.read_abbreviated_record(abbrev)? {
                        visitor.visit(header.id, record);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn array_marker_must_be_second_to_last() {
        // DEFINE_ABBREV body: [array, fixed(8), fixed(8)] is malformed.
        // Operands: 0 011 (array), 0 001 + vbr5(8), 0 001 + vbr5(8)
        let mut bits: u64 = 0;
        let mut pos = 0;
        let mut put = |value: u64, width: u32| {
            bits |= value << pos;
            pos += width;
        };
        put(0, 1);
        put(3, 3);
        put(0, 1);
        put(1, 3);
        put(8, 5);
        put(0, 1);
        put(1, 3);
        put(8, 5);
        let words = [bits as u32, (bits >> 32) as u32];
        let mut reader = BitStreamReader::new(Cursor::new(&words));
        assert_eq!(reader.read_abbrev(3), Err(Error::InvalidAbbrev));
    }

    #[test]
    fn empty_abbreviation_yields_no_record() {
        let words = [0u32];
        let mut reader = BitStreamReader::new(Cursor::new(&words));
        let record = reader
            .read_abbreviated_record(&Abbreviation::default())
            .unwrap();
        assert!(record.is_none());
    }
}
