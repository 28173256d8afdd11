use bitflags::bitflags;
use num_enum::TryFromPrimitive;

/// Address spaces used by DXIL pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u64)]
pub enum AddressSpace {
    Default = 0,
    DeviceMem = 1,
    CBuffer = 2,
    GroupShared = 3,
}

/// CastOpcodes - These are values used in the bitcode files to encode which
/// cast a CAST record refers to. The values of these enums have no fixed
/// relation to the LLVM IR enum values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u64)]
pub enum CastOpcode {
    Trunc = 0,
    ZExt = 1,
    SExt = 2,
    FpToUi = 3,
    FpToSi = 4,
    UiToFp = 5,
    SiToFp = 6,
    FpTrunc = 7,
    FpExt = 8,
    PtrToInt = 9,
    IntToPtr = 10,
    Bitcast = 11,
    AddrSpaceCast = 12,
}

/// BinaryOpcodes - These are values used in the bitcode files to encode which
/// binop a BINOP record refers to. Division and remainder codes are shared
/// between integer and floating point operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u64)]
pub enum BinOpcode {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Udiv = 3,
    Sdiv = 4, // overloaded for FP
    Urem = 5,
    Srem = 6, // overloaded for FP
    Shl = 7,
    Lshr = 8,
    Ashr = 9,
    And = 10,
    Or = 11,
    Xor = 12,
}

/// Comparison predicates of CMP2 records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u64)]
pub enum Predicate {
    FcmpFalse = 0,
    FcmpOeq = 1,
    FcmpOgt = 2,
    FcmpOge = 3,
    FcmpOlt = 4,
    FcmpOle = 5,
    FcmpOne = 6,
    FcmpOrd = 7,
    FcmpUno = 8,
    FcmpUeq = 9,
    FcmpUgt = 10,
    FcmpUge = 11,
    FcmpUlt = 12,
    FcmpUle = 13,
    FcmpUne = 14,
    FcmpTrue = 15,
    IcmpEq = 32,
    IcmpNe = 33,
    IcmpUgt = 34,
    IcmpUge = 35,
    IcmpUlt = 36,
    IcmpUle = 37,
    IcmpSgt = 38,
    IcmpSge = 39,
    IcmpSlt = 40,
    IcmpSle = 41,
}

impl Predicate {
    pub fn is_float(self) -> bool {
        (self as u64) < 32
    }
}

bitflags! {
    /// Floating point fast-math flags carried by BINOP records.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FastMathFlags: u64 {
        const ALLOW_UNSAFE_ALGEBRA = 1 << 0;
        const NO_NANS = 1 << 1;
        const NO_INFS = 1 << 2;
        const NO_SIGNED_ZEROS = 1 << 3;
        const ALLOW_RECIPROCAL = 1 << 4;
    }

    /// Wrap flags of integer add, sub, mul and shl.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OverflowingBinopFlags: u64 {
        const NO_UNSIGNED_WRAP = 1 << 0;
        const NO_SIGNED_WRAP = 1 << 1;
    }

    /// Flags of integer division and right shifts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PossiblyExactFlags: u64 {
        const EXACT = 1 << 0;
    }
}

/// Calling convention bit marking an explicit function type operand in CALL records.
pub const CALL_CONV_FLAG_EXPLICIT_TYPE: u64 = 1 << 15;
