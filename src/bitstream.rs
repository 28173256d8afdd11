use num_enum::TryFromPrimitive;

/// An `Abbreviation` represents the encoding definition for a user-defined
/// record. Abbreviations are the primary form of compression available in
/// a bitstream file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Abbreviation {
    /// All operands except a trailing array or blob. The first one encodes
    /// the record code.
    pub fields: Vec<ScalarOperand>,
    pub payload: Option<PayloadOperand>,
}

impl Abbreviation {
    /// Number of operands as written in the DEFINE_ABBREV record, with an
    /// array and its element counted as one.
    pub fn operand_count(&self) -> usize {
        self.fields.len() + usize::from(self.payload.is_some())
    }
}

/// Abbreviation operand
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ScalarOperand {
    /// A literal value (emitted as a VBR8 field)
    Literal(u64),
    /// A fixed-width field
    Fixed(u8),
    /// A VBR-encoded value with the provided chunk width
    Vbr(u8),
    /// A char6-encoded ASCII character
    Char6,
}

/// Trailing abbreviation operand
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PayloadOperand {
    /// Emitted as a vbr6 length, padded to a 32-bit boundary and then
    /// an array of 8-bit objects
    Blob,
    /// An array of values, preceded by a vbr6 length. The element encoding
    /// is the operand defined directly after the array marker.
    Array(ScalarOperand),
}

/// Operand as it appears in a DEFINE_ABBREV record, before an array marker
/// has been folded into its element encoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operand {
    Scalar(ScalarOperand),
    ArrayMarker,
    Blob,
}

impl Operand {
    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Scalar(ScalarOperand::Literal(_)))
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::ArrayMarker)
    }

    #[must_use]
    pub fn is_blob(&self) -> bool {
        matches!(self, Self::Blob)
    }

    /// The `llvm::BitCodeAbbrevOp::Encoding` value this operand is written with.
    /// Literals are flagged by a separate bit and report 0.
    #[must_use]
    pub fn encoded_kind(&self) -> u8 {
        match self {
            Self::Scalar(ScalarOperand::Literal(_)) => 0,
            Self::Scalar(ScalarOperand::Fixed(_)) => 1,
            Self::Scalar(ScalarOperand::Vbr(_)) => 2,
            Self::ArrayMarker => 3,
            Self::Scalar(ScalarOperand::Char6) => 4,
            Self::Blob => 5,
        }
    }
}

/// Records found inside a BLOCKINFO block. Only `SetBid` carries meaning for
/// DXIL; names are debugging aids and are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum BlockInfoCode {
    /// Indicates which block ID is being described.
    SetBid = 1,
    BlockName = 2,
    SetRecordName = 3,
}

/// Bitstream reserves 4 special abbreviation IDs for its own bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum BuiltinAbbreviationId {
    /// Marks the end of the current block.
    EndBlock = 0,
    /// Marks the beginning of a new block.
    EnterSubBlock = 1,
    /// Marks the definition of a new abbreviation.
    DefineAbbreviation = 2,
    /// Marks the definition of a new unabbreviated record.
    UnabbreviatedRecord = 3,
}

/// First abbreviation id available for defined abbreviations.
pub const FIRST_APPLICATION_ABBREV_ID: u32 = 4;

/// Map a 6-bit character code to its ASCII value.
pub fn decode_char6(value: u32) -> u8 {
    const TABLE: &[u8; 64] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789._";
    TABLE[(value & 0x3f) as usize]
}
