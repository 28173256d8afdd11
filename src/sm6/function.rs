//! Function bodies.
//!
//! Each record of the single supported FUNCTION block lowers to at most one
//! instruction. Records which only produce a value, such as GEP, pointer casts
//! or `dx.op.createHandle`, emit nothing and keep their result in the value
//! list for later records to consume.

use std::fmt;

use log::{trace, warn};

use super::types::TypeId;
use super::values::{Value, ValueKind, decode_alignment, register_index_address_init};
use super::{Result, Sm6Parser};
use crate::bitcode::{Block, Record};
use crate::diagnostics::{DiagnosticCode, Error};
use crate::schema::blocks::FunctionCode;
use crate::schema::enums::{
    BinOpcode, CALL_CONV_FLAG_EXPLICIT_TYPE, CastOpcode, FastMathFlags, OverflowingBinopFlags,
    PossiblyExactFlags, Predicate,
};
use crate::vsir::{
    DataType, DstParam, Instruction, InstructionFlags, Opcode, Register, RegisterType, SrcModifier,
    Swizzle, WriteMask,
};

/// A function body: the value budget computed before decoding and the
/// instructions of its single block.
#[derive(Debug, Clone, Default)]
pub struct Function {
    /// Value index of the function's declaration.
    pub declaration: Option<usize>,
    /// Highest value count reachable while the function is decoded.
    pub value_count: usize,
    pub block_count: u32,
    pub instructions: Vec<Instruction>,
}

impl Function {
    pub fn new(value_count: usize) -> Self {
        Self {
            value_count,
            ..Self::default()
        }
    }
}

/// Operand category of a binary operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandClass {
    Bool,
    Int,
    Float,
    Double,
}

/// IR opcode of an LLVM binary operation on operands of `class`.
pub fn binary_opcode(code: BinOpcode, class: OperandClass) -> Option<Opcode> {
    use OperandClass::*;
    Some(match (code, class) {
        (BinOpcode::And, Bool | Int) => Opcode::And,
        (BinOpcode::Or, Bool | Int) => Opcode::Or,
        (BinOpcode::Xor, Bool | Int) => Opcode::Xor,
        (_, Bool) => return None,
        (BinOpcode::Add | BinOpcode::Sub, Int) => Opcode::IAdd,
        (BinOpcode::Add | BinOpcode::Sub, Float) => Opcode::Add,
        (BinOpcode::Add | BinOpcode::Sub, Double) => Opcode::DAdd,
        (BinOpcode::Mul, Int) => Opcode::IMul,
        (BinOpcode::Mul, Float) => Opcode::Mul,
        (BinOpcode::Mul, Double) => Opcode::DMul,
        (BinOpcode::Sdiv, Int) => Opcode::IDiv,
        (BinOpcode::Sdiv, Float) => Opcode::Div,
        (BinOpcode::Sdiv, Double) => Opcode::DDiv,
        (BinOpcode::Srem, Int) => Opcode::IDiv,
        (BinOpcode::Srem, Float) => Opcode::Frem,
        (BinOpcode::Udiv | BinOpcode::Urem, Int) => Opcode::UDiv,
        (BinOpcode::Shl, Int) => Opcode::IShl,
        (BinOpcode::Lshr, Int) => Opcode::UShr,
        (BinOpcode::Ashr, Int) => Opcode::IShr,
        _ => return None,
    })
}

/// IR opcode of a comparison, and whether its operands must be swapped. The
/// IR has no greater-than comparisons.
pub fn compare_opcode(predicate: Predicate, is_double: bool) -> Option<(Opcode, bool)> {
    use Predicate::*;
    let (opcode, swap) = match predicate {
        FcmpFalse | FcmpTrue | FcmpOrd | FcmpUno => return None,
        FcmpOeq | FcmpUeq => (Opcode::Eq, false),
        FcmpOgt | FcmpUgt => (Opcode::Lt, true),
        FcmpOge | FcmpUge => (Opcode::Ge, false),
        FcmpOlt | FcmpUlt => (Opcode::Lt, false),
        FcmpOle | FcmpUle => (Opcode::Ge, true),
        FcmpOne | FcmpUne => (Opcode::Ne, false),
        IcmpEq => (Opcode::IEq, false),
        IcmpNe => (Opcode::INe, false),
        IcmpUgt => (Opcode::ULt, true),
        IcmpUge => (Opcode::UGe, false),
        IcmpUlt => (Opcode::ULt, false),
        IcmpUle => (Opcode::UGe, true),
        IcmpSgt => (Opcode::ILt, true),
        IcmpSge => (Opcode::IGe, false),
        IcmpSlt => (Opcode::ILt, false),
        IcmpSle => (Opcode::IGe, true),
    };
    let opcode = match (opcode, is_double) {
        (Opcode::Eq, true) => Opcode::DEq,
        (Opcode::Ge, true) => Opcode::DGe,
        (Opcode::Lt, true) => Opcode::DLt,
        (Opcode::Ne, true) => Opcode::DNe,
        (opcode, _) => opcode,
    };
    Some((opcode, swap))
}

/// Shape of a scalar cast operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarShape {
    pub is_int: bool,
    pub is_fp: bool,
    pub width: u32,
}

impl fmt::Display for ScalarShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_int, self.is_fp) {
            (true, _) => write!(f, "i{}", self.width),
            (_, true) => write!(f, "f{}", self.width),
            _ => f.write_str("a non-scalar type"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastLowering {
    /// The result aliases the source register.
    Nop,
    Op(Opcode),
    Invalid,
    NotImplemented,
}

/// Lower a cast. 16-bit integers are minimum precision values held in 32-bit
/// registers, so conversions between the two widths are no-ops.
pub fn cast_lowering(code: CastOpcode, from: ScalarShape, to: ScalarShape) -> CastLowering {
    let int_to_int = from.is_int && to.is_int;
    let (is_valid, opcode) = match code {
        CastOpcode::Trunc => (int_to_int && from.width >= to.width, Opcode::UToU),
        CastOpcode::ZExt => (int_to_int && from.width <= to.width, Opcode::UToU),
        CastOpcode::SExt => (int_to_int && from.width <= to.width, Opcode::IToI),
        CastOpcode::FpToUi => (
            from.is_fp && to.is_int,
            if from.width == 64 { Opcode::DToU } else { Opcode::FToU },
        ),
        CastOpcode::FpToSi => (
            from.is_fp && to.is_int,
            if from.width == 64 { Opcode::DToI } else { Opcode::FToI },
        ),
        CastOpcode::UiToFp => (
            from.is_int && to.is_fp,
            if to.width == 64 { Opcode::UToD } else { Opcode::UToF },
        ),
        CastOpcode::SiToFp => (
            from.is_int && to.is_fp,
            if to.width == 64 { Opcode::IToD } else { Opcode::IToF },
        ),
        CastOpcode::FpTrunc => (from.is_fp && to.is_fp && from.width >= to.width, Opcode::DToF),
        CastOpcode::FpExt => (from.is_fp && to.is_fp && from.width <= to.width, Opcode::FToD),
        CastOpcode::Bitcast => (
            (from.is_int || from.is_fp) && (to.is_int || to.is_fp) && from.width == to.width,
            Opcode::Mov,
        ),
        CastOpcode::PtrToInt | CastOpcode::IntToPtr | CastOpcode::AddrSpaceCast => {
            return CastLowering::Invalid;
        }
    };
    if !is_valid {
        return CastLowering::Invalid;
    }
    if from.width == 8 || to.width == 8 {
        return CastLowering::NotImplemented;
    }
    match code {
        CastOpcode::Trunc | CastOpcode::ZExt | CastOpcode::SExt => {
            let is_min_precision = (from.width == 32 && to.width == 16 && code == CastOpcode::Trunc)
                || (from.width == 16 && to.width == 32 && code != CastOpcode::Trunc);
            if from.width == to.width || is_min_precision {
                return CastLowering::Nop;
            }
        }
        CastOpcode::FpTrunc | CastOpcode::FpExt => {
            if from.width == to.width {
                return CastLowering::Nop;
            }
            if from.width == 16 || to.width == 16 {
                return CastLowering::NotImplemented;
            }
        }
        CastOpcode::FpToUi | CastOpcode::FpToSi => {
            if from.width == 16 {
                return CastLowering::NotImplemented;
            }
        }
        CastOpcode::UiToFp | CastOpcode::SiToFp => {
            if to.width == 16 {
                return CastLowering::NotImplemented;
            }
        }
        _ => {}
    }
    CastLowering::Op(opcode)
}

fn null_dst() -> DstParam {
    DstParam::new(Register::new(RegisterType::Null, DataType::Unused, 0), WriteMask::X)
}

impl Sm6Parser<'_> {
    /// Value index of the next function definition, skipping prototypes.
    fn next_function_definition(&mut self) -> Option<usize> {
        let index = self
            .values
            .iter()
            .enumerate()
            .filter(|(_, value)| {
                value.ty.is_some_and(|ty| self.types.is_function_pointer(ty))
                    && value.function().is_some_and(|f| !f.is_prototype)
            })
            .nth(self.function_count)
            .map(|(index, _)| index)?;
        self.function_count += 1;
        Some(index)
    }

    fn function_structure_error(&mut self, code: DiagnosticCode, message: &str) -> Error {
        warn!("{message}");
        self.error(code, message.to_string());
        Error::InvalidShader
    }

    /// Decode a FUNCTION block into its function's instruction list.
    pub(crate) fn function_init(&mut self, block: &Block) -> Result<()> {
        let function_index = self.function_count;
        if function_index > 0 {
            return Err(self.function_structure_error(
                DiagnosticCode::DxilNotImplemented,
                "Multiple functions are not supported yet.",
            ));
        }
        let Some(declaration) = self.next_function_definition() else {
            return Err(self.function_structure_error(
                DiagnosticCode::DxilInvalidModule,
                "Failed to find a definition to match the function body.",
            ));
        };
        let has_params = self.values[declaration]
            .ty
            .and_then(|ty| self.types.pointee(ty))
            .and_then(|ty| self.types.function_signature(ty))
            .is_some_and(|(_, params)| !params.is_empty());
        if has_params {
            return Err(self.function_structure_error(
                DiagnosticCode::DxilNotImplemented,
                "Functions with parameters are not supported.",
            ));
        }

        if block.records.len() < 2 {
            return Err(self.function_structure_error(
                DiagnosticCode::DxilInvalidModule,
                "A function block must contain a block count and a return instruction.",
            ));
        }
        let declare_blocks = &block.records[0];
        let block_count = match (FunctionCode::try_from(declare_blocks.code), declare_blocks.operands.first()) {
            (Ok(FunctionCode::DeclareBlocks), Some(&count)) => u32::try_from(count).ok(),
            _ => None,
        };
        let block_count = match block_count {
            Some(0) => {
                return Err(self.function_structure_error(
                    DiagnosticCode::DxilInvalidModule,
                    "Function contains no blocks.",
                ));
            }
            Some(count) => count,
            None => {
                return Err(self.function_structure_error(
                    DiagnosticCode::DxilInvalidModule,
                    "Block count declaration not found or invalid.",
                ));
            }
        };
        if block_count > 1 {
            return Err(self.function_structure_error(
                DiagnosticCode::DxilNotImplemented,
                "Branched shaders are not supported yet.",
            ));
        }

        let value_budget = self
            .functions
            .get(function_index)
            .map_or(self.values.len(), |function| function.value_count);
        self.cur_max_value = value_budget;

        let mut instructions = Vec::new();
        instructions
            .try_reserve(block.records.len())
            .map_err(|_| Error::OutOfMemory)?;
        let mut ret_found = false;

        for (i, record) in block.records.iter().enumerate().skip(1) {
            self.location.column = i as u32;

            if ret_found {
                self.error(
                    DiagnosticCode::DxilInvalidOperand,
                    format!("Invalid block count {block_count}."),
                );
                return Err(Error::InvalidShader);
            }

            let mut ins = Instruction::new(Opcode::Nop, self.location.clone());
            let mut dst = Value::default();

            let code = FunctionCode::try_from(record.code);
            let lowered = match code {
                Ok(FunctionCode::Binop) => self.emit_binop(record, &mut ins, &mut dst),
                Ok(FunctionCode::Call) => self.emit_call(record, &mut ins, &mut dst),
                Ok(FunctionCode::Cast) => self.emit_cast(record, &mut ins, &mut dst),
                Ok(FunctionCode::Cmp2) => self.emit_cmp2(record, &mut ins, &mut dst),
                Ok(FunctionCode::ExtractVal) => self.emit_extractval(record, &mut ins, &mut dst),
                Ok(FunctionCode::Gep) => self.emit_gep(record, &mut dst),
                Ok(FunctionCode::Load) => self.emit_load(record, &mut ins, &mut dst),
                Ok(FunctionCode::Ret) => {
                    ret_found = true;
                    self.emit_ret(record)
                }
                Ok(FunctionCode::Vselect) => self.emit_vselect(record, &mut ins, &mut dst),
                _ => {
                    warn!("Unhandled dxil instruction {}.", record.code);
                    self.error(
                        DiagnosticCode::DxilNotImplemented,
                        format!("Instruction code {} is not supported.", record.code),
                    );
                    return Err(Error::InvalidShader);
                }
            };
            // Failed records still take their slot so later relative
            // references resolve to the right values.
            let defines_value = match code {
                Ok(FunctionCode::Ret) => false,
                Ok(FunctionCode::Call) => dst.ty.is_some(),
                _ => true,
            };
            if !lowered {
                self.emit_unhandled(&mut ins, &mut dst);
            }

            trace!("Record {i}: {}.", ins.opcode.name());
            if !ins.is_nop() {
                instructions.push(ins);
            }
            if defines_value {
                self.push_value(dst)?;
            }
        }

        if !ret_found {
            return Err(self.function_structure_error(
                DiagnosticCode::DxilInvalidModule,
                "Function contains no RET instruction.",
            ));
        }

        if let Some(function) = self.functions.get_mut(function_index) {
            function.declaration = Some(declaration);
            function.block_count = block_count;
            function.instructions = instructions;
        }
        Ok(())
    }

    /// Drop the instruction and leave the destination, if any, undefined.
    pub(crate) fn emit_unhandled(&mut self, ins: &mut Instruction, dst: &mut Value) {
        ins.opcode = Opcode::Nop;
        ins.flags = InstructionFlags::empty();
        ins.src.clear();
        ins.dst.clear();

        let data_type = dst
            .ty
            .and_then(|ty| self.types.scalar_type(ty, 0))
            .map_or(DataType::Unused, |scalar| self.types.data_type(scalar));
        // Only explicit undef constants set `is_undefined`.
        dst.kind = ValueKind::Register(Register::new(RegisterType::Undef, data_type, 0));
    }

    fn operand_class(&mut self, ty: Option<TypeId>) -> Option<OperandClass> {
        let class = ty.and_then(|ty| {
            if self.types.is_bool(ty) {
                Some(OperandClass::Bool)
            } else if self.types.is_bool_i16_i32_i64(ty) {
                Some(OperandClass::Int)
            } else if self.types.is_floating_point(ty) {
                Some(if self.types.width(ty) == Some(64) {
                    OperandClass::Double
                } else {
                    OperandClass::Float
                })
            } else {
                None
            }
        });
        if class.is_none() {
            warn!("Argument type {ty:?} is not bool, int16/32/64 or floating point.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "An argument to a binary operation is not bool, int16, int32, int64 or floating point.",
            );
        }
        class
    }

    /// Apply the flags of a float operation, returning the bits which were
    /// not recognised.
    fn apply_fast_math_flags(ins: &mut Instruction, flags: u64) -> u64 {
        if flags & FastMathFlags::ALLOW_UNSAFE_ALGEBRA.bits() == 0 {
            ins.flags |= InstructionFlags::PRECISE_X;
        }
        flags & !FastMathFlags::all().bits()
    }

    fn emit_binop(&mut self, record: &Record, ins: &mut Instruction, dst: &mut Value) -> bool {
        let mut i = 0;
        let Some(a) = self.value_by_ref(record, None, &mut i) else {
            return false;
        };
        dst.ty = a.ty;
        let Some(b) = self.value_by_ref(record, a.ty, &mut i) else {
            return false;
        };
        if !self.validate_operand_count(record, i + 1, i + 2) {
            return false;
        }
        let code = record.operands[i];
        let flags = record.operands.get(i + 1).copied().unwrap_or(0);

        let Some(class) = self.operand_class(a.ty) else {
            return false;
        };
        if a.ty != b.ty {
            warn!("Type mismatch in binary operation arguments.");
            self.warning(
                DiagnosticCode::DxilTypeMismatch,
                "Type mismatch in binary operation arguments.",
            );
        }

        let Some(opcode) = BinOpcode::try_from(code)
            .ok()
            .and_then(|code| binary_opcode(code, class))
        else {
            warn!("Unhandled binary op {code:#x} for {class:?}.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                format!("Binary operation {code:#x} is invalid for {class:?} operands."),
            );
            return false;
        };
        ins.opcode = opcode;

        if flags != 0 {
            let residual = match opcode {
                Opcode::Add | Opcode::Mul | Opcode::Div | Opcode::Frem | Opcode::DAdd | Opcode::DMul | Opcode::DDiv => {
                    Self::apply_fast_math_flags(ins, flags)
                }
                Opcode::IAdd | Opcode::IMul | Opcode::IShl => flags & !OverflowingBinopFlags::all().bits(),
                Opcode::IShr | Opcode::UShr | Opcode::IDiv | Opcode::UDiv => {
                    flags & !PossiblyExactFlags::all().bits()
                }
                _ => flags,
            };
            if residual != 0 {
                warn!("Ignoring flags {residual:#x}.");
                self.warning(
                    DiagnosticCode::DxilIgnoringOperands,
                    format!("Ignoring flags {residual:#x} for a binary operation."),
                );
            }
        }

        let mut src_b = b.src_param();
        if code == BinOpcode::Sub as u64 {
            src_b.modifiers = SrcModifier::Neg;
        }
        ins.src = vec![a.src_param(), src_b];

        let result = self.init_ssa_dst(dst, 1);
        let is_remainder = code == BinOpcode::Urem as u64 || code == BinOpcode::Srem as u64;
        ins.dst = match opcode {
            // The low 32 bits of the product are the second destination.
            Opcode::IMul => vec![null_dst(), result],
            Opcode::UDiv | Opcode::IDiv if is_remainder => vec![null_dst(), result],
            Opcode::UDiv | Opcode::IDiv => vec![result, null_dst()],
            _ => vec![result],
        };
        true
    }

    fn emit_cast(&mut self, record: &Record, ins: &mut Instruction, dst: &mut Value) -> bool {
        let mut i = 0;
        let Some(value) = self.value_by_ref(record, None, &mut i) else {
            return false;
        };
        if !self.validate_operand_count(record, i + 2, i + 2) {
            return false;
        }
        let Some(to) = self.get_type(record.operands[i]) else {
            return false;
        };
        let code = record.operands[i + 1];
        dst.ty = Some(to);

        if !self.validate_is_register(&value) {
            return false;
        }
        let Some(from) = value.ty else {
            return false;
        };

        let from_is_pointer = self.types.is_pointer(from);
        if from_is_pointer && self.types.is_pointer(to) {
            if code != CastOpcode::Bitcast as u64 {
                warn!("Unexpected cast opcode {code} for pointer types.");
            }
            dst.kind = value.kind;
            return true;
        }
        if from_is_pointer != self.types.is_pointer(to) {
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                format!("Cannot cast between pointer and non-pointer types, code {code}."),
            );
            return false;
        }

        let shape = |parser: &Self, ty: TypeId| ScalarShape {
            is_int: parser.types.is_integer(ty),
            is_fp: parser.types.is_floating_point(ty),
            width: parser.types.width(ty).unwrap_or(0),
        };
        let (from_shape, to_shape) = (shape(self, from), shape(self, to));

        let lowering = CastOpcode::try_from(code)
            .map_or(CastLowering::Invalid, |op| cast_lowering(op, from_shape, to_shape));
        match lowering {
            CastLowering::Nop => {
                dst.kind = value.kind;
                if to_shape.width != 16 {
                    let data_type = self.types.data_type(to);
                    if let ValueKind::Register(reg) = &mut dst.kind {
                        reg.data_type = data_type;
                    }
                }
                true
            }
            CastLowering::Op(opcode) => {
                ins.opcode = opcode;
                let mut src = value.src_param();
                if opcode == Opcode::Mov {
                    src.reg.data_type = self.types.data_type(from);
                }
                ins.src = vec![src];
                ins.dst = vec![self.init_ssa_dst(dst, 1)];
                true
            }
            CastLowering::Invalid => {
                warn!("Invalid cast {code} from {from_shape:?} to {to_shape:?}.");
                self.error(
                    DiagnosticCode::DxilInvalidOperand,
                    format!("Cast {code} from {from_shape} to {to_shape} is invalid."),
                );
                false
            }
            CastLowering::NotImplemented => {
                self.error(
                    DiagnosticCode::DxilNotImplemented,
                    format!("Cast {code} from {from_shape} to {to_shape} is not implemented."),
                );
                false
            }
        }
    }

    fn emit_cmp2(&mut self, record: &Record, ins: &mut Instruction, dst: &mut Value) -> bool {
        dst.ty = self.types.bool_type();
        let mut i = 0;
        let Some(a) = self.value_by_ref(record, None, &mut i) else {
            return false;
        };
        let Some(b) = self.value_by_ref(record, a.ty, &mut i) else {
            return false;
        };
        if !self.validate_operand_count(record, i + 1, i + 2) {
            return false;
        }
        let code = record.operands[i];
        let flags = record.operands.get(i + 1).copied().unwrap_or(0);

        let Ok(predicate) = Predicate::try_from(code) else {
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                format!("Unhandled comparison predicate {code}."),
            );
            return false;
        };
        let Some(ty) = a.ty else {
            return false;
        };
        let is_int = self.types.is_bool_i16_i32_i64(ty);
        let is_fp = self.types.is_floating_point(ty);
        if !is_int && !is_fp {
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "Comparison arguments are not integer or floating point.",
            );
            return false;
        }
        if is_int == predicate.is_float() {
            warn!("Predicate {predicate:?} does not match the operand type.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                format!("Comparison predicate {code} does not match the operand type."),
            );
            return false;
        }
        if a.ty != b.ty {
            warn!("Type mismatch in comparison arguments.");
            self.warning(
                DiagnosticCode::DxilTypeMismatch,
                "Type mismatch in comparison operation arguments.",
            );
        }

        let is_double = is_fp && self.types.width(ty) == Some(64);
        let Some((opcode, swap)) = compare_opcode(predicate, is_double) else {
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                format!("Comparison predicate {code} is not supported."),
            );
            return false;
        };
        ins.opcode = opcode;

        if flags != 0 {
            let residual = if is_fp {
                Self::apply_fast_math_flags(ins, flags)
            } else {
                flags
            };
            if residual != 0 {
                warn!("Ignoring flags {residual:#x}.");
                self.warning(
                    DiagnosticCode::DxilIgnoringOperands,
                    format!("Ignoring flags {residual:#x} for a comparison operation."),
                );
            }
        }

        if dst.ty.is_none() {
            self.error(
                DiagnosticCode::DxilInvalidModule,
                "Module does not define a boolean type for comparison results.",
            );
            return false;
        }

        let (first, second) = if swap { (&b, &a) } else { (&a, &b) };
        ins.src = vec![first.src_param(), second.src_param()];
        ins.dst = vec![self.init_ssa_dst(dst, 1)];
        true
    }

    fn emit_extractval(&mut self, record: &Record, ins: &mut Instruction, dst: &mut Value) -> bool {
        let mut i = 0;
        let Some(src) = self.value_by_ref(record, None, &mut i) else {
            return false;
        };
        if !self.validate_operand_min_count(record, i + 1) || !self.validate_is_register(&src) {
            return false;
        }
        if record.operands.len() > i + 1 {
            warn!("Unhandled multiple indices.");
            self.error(
                DiagnosticCode::DxilNotImplemented,
                "Multiple extractval indices are not supported.",
            );
            return false;
        }

        let Some(ty) = src.ty.filter(|&ty| self.types.is_aggregate(ty)) else {
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "Source type of an extractval instruction is not an aggregate.",
            );
            return false;
        };
        let index = record.operands[i];
        let Some(element) = self.types.element_type_at_index(ty, index) else {
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                format!("Element index {index} for an extractval instruction is out of bounds."),
            );
            return false;
        };
        if self.types.is_aggregate(element) {
            warn!("Unhandled extraction from nested aggregate.");
            self.error(
                DiagnosticCode::DxilNotImplemented,
                "Extraction from nested aggregates is not supported.",
            );
            return false;
        }
        dst.ty = Some(element);

        ins.opcode = Opcode::Mov;
        let mut src_param = src.src_param();
        src_param.swizzle = Swizzle::broadcast(index as u32);
        ins.src = vec![src_param];
        ins.dst = vec![self.init_ssa_dst(dst, 1)];
        true
    }

    /// GEP into a global array. No instruction is emitted; the result aliases
    /// the array register with the element index applied.
    fn emit_gep(&mut self, record: &Record, dst: &mut Value) -> bool {
        if !self.validate_operand_min_count(record, 5) {
            return false;
        }
        let is_in_bounds = record.operands[0] != 0;
        let Some(ty) = self.get_type(record.operands[1]) else {
            return false;
        };

        let mut i = 2;
        let Some(src) = self.value_by_ref(record, None, &mut i) else {
            return false;
        };
        if !self.validate_is_register(&src) || !self.validate_is_pointer(&src) {
            return false;
        }
        let ValueKind::Register(mut reg) = src.kind else {
            return false;
        };
        if reg.idx_count() > 1 {
            warn!("Unsupported stacked GEP.");
            self.error(
                DiagnosticCode::DxilNotImplemented,
                "A GEP instruction on the result of a previous GEP is unsupported.",
            );
            return false;
        }

        let Some(pointer_type) = src.ty else {
            return false;
        };
        let Some(pointee) = self.types.pointee(pointer_type) else {
            return false;
        };
        if pointee != ty {
            warn!("Type mismatch in GEP.");
            self.warning(
                DiagnosticCode::DxilTypeMismatch,
                "Type mismatch in GEP operation arguments.",
            );
        }

        let Some(dereference) = self.value_by_ref(record, None, &mut i) else {
            return false;
        };
        if dereference.constant_uint() != Some(0) {
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "The pointer dereference index for a GEP instruction is not constant zero.",
            );
            return false;
        }
        if !self.types.is_array(pointee) {
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "Source type for index 1 of a GEP instruction is not an array.",
            );
            return false;
        }

        if i >= record.operands.len() {
            self.error(
                DiagnosticCode::DxilInvalidOperandCount,
                "A GEP instruction has no element index.",
            );
            return false;
        }
        let Some(element_index) = self.value_by_ref(record, None, &mut i) else {
            return false;
        };
        let element = match element_index.constant_uint() {
            Some(index) => match self.types.element_type_at_index(pointee, u64::from(index)) {
                Some(element) => element,
                None => {
                    warn!("Array index {index} out of bounds.");
                    self.error(
                        DiagnosticCode::DxilInvalidOperand,
                        format!("Array index {index} for a GEP instruction is out of bounds."),
                    );
                    return false;
                }
            },
            None => self.types.element_type(pointee),
        };

        if i < record.operands.len() {
            warn!("Unsupported multi-dimensional GEP.");
            self.error(
                DiagnosticCode::DxilNotImplemented,
                "Multi-dimensional addressing in GEP instructions is not supported.",
            );
            return false;
        }

        let addr_space = self.types.address_space(pointer_type).unwrap_or_default();
        let Some(result_type) = self.types.pointer_to(element, addr_space) else {
            self.error(
                DiagnosticCode::DxilInvalidModule,
                "Module does not define a pointer type for a GEP instruction.",
            );
            return false;
        };

        reg.set_idx_count(2);
        register_index_address_init(&mut reg.idx[1], &element_index);
        reg.idx[1].is_in_bounds = is_in_bounds;
        dst.ty = Some(result_type);
        dst.kind = ValueKind::Register(reg);
        true
    }

    fn emit_load(&mut self, record: &Record, ins: &mut Instruction, dst: &mut Value) -> bool {
        let mut i = 0;
        let Some(ptr) = self.value_by_ref(record, None, &mut i) else {
            return false;
        };
        if !self.validate_is_register(&ptr) || !self.validate_is_pointer(&ptr) {
            return false;
        }
        if !self.validate_operand_count(record, i + 2, i + 3) {
            return false;
        }
        let Some(pointee) = ptr.ty.and_then(|ty| self.types.pointee(ty)) else {
            return false;
        };
        dst.ty = Some(pointee);

        if record.operands.len() == i + 3 {
            let Some(element) = self.get_type(record.operands[i]) else {
                return false;
            };
            i += 1;
            if element != pointee {
                warn!("Type mismatch in load.");
                self.warning(
                    DiagnosticCode::DxilTypeMismatch,
                    "Type mismatch in pointer load arguments.",
                );
            }
        }

        if !self.types.is_numeric(pointee) {
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "Pointer load of a non-numeric type is not supported.",
            );
            return false;
        }

        let alignment = decode_alignment(record.operands[i]).unwrap_or_else(|| {
            warn!("Invalid alignment {}.", record.operands[i]);
            0
        });
        if record.operands[i + 1] != 0 {
            warn!("Ignoring volatile modifier.");
        }

        ins.opcode = Opcode::Mov;
        let mut src = ptr.src_param();
        src.reg.alignment = alignment;
        ins.src = vec![src];
        ins.dst = vec![self.init_ssa_dst(dst, 1)];
        true
    }

    fn emit_vselect(&mut self, record: &Record, ins: &mut Instruction, dst: &mut Value) -> bool {
        let mut i = 0;
        let Some(if_true) = self.value_by_ref(record, None, &mut i) else {
            return false;
        };
        dst.ty = if_true.ty;
        let Some(if_false) = self.value_by_ref(record, if_true.ty, &mut i) else {
            return false;
        };
        let bool_type = self.types.bool_type();
        let Some(condition) = self.value_by_ref(record, bool_type, &mut i) else {
            return false;
        };
        self.validate_operand_max_count(record, i);

        for value in [&if_true, &if_false, &condition] {
            if !self.validate_is_register(value) {
                return false;
            }
        }
        if !self.validate_is_bool(&condition) {
            return false;
        }
        if if_true.ty != if_false.ty {
            warn!("Type mismatch in select.");
            self.warning(
                DiagnosticCode::DxilTypeMismatch,
                "Type mismatch in VSELECT operation arguments.",
            );
        }

        ins.opcode = Opcode::Movc;
        ins.src = vec![condition.src_param(), if_true.src_param(), if_false.src_param()];
        ins.dst = vec![self.init_ssa_dst(dst, 1)];
        true
    }

    fn emit_ret(&mut self, record: &Record) -> bool {
        if !self.validate_operand_count(record, 0, 1) {
            return false;
        }
        if !record.operands.is_empty() {
            warn!("Non-void return is not implemented.");
            self.warning(
                DiagnosticCode::DxilIgnoringOperands,
                "Non-void return is not implemented.",
            );
        }
        true
    }

    fn emit_call(&mut self, record: &Record, ins: &mut Instruction, dst: &mut Value) -> bool {
        if !self.validate_operand_min_count(record, 2) {
            return false;
        }
        // Operand 0 is the attribute list id.
        let mut i = 1;
        let calling_convention = record.operands[i];
        i += 1;
        let mut explicit_type = None;
        if calling_convention & CALL_CONV_FLAG_EXPLICIT_TYPE != 0 {
            if !self.validate_operand_min_count(record, i + 1) {
                return false;
            }
            explicit_type = self.get_type(record.operands[i]);
            i += 1;
        }
        if calling_convention & !CALL_CONV_FLAG_EXPLICIT_TYPE != 0 {
            warn!(
                "Ignoring calling convention {:#x}.",
                calling_convention & !CALL_CONV_FLAG_EXPLICIT_TYPE
            );
        }

        let Some(callee) = self.value_by_ref(record, None, &mut i) else {
            return false;
        };
        let Some(function) = callee.function().cloned() else {
            warn!("Function target value is not a function declaration.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "Function call target value is not a function declaration.",
            );
            return false;
        };
        let Some(function_type) = callee.ty.and_then(|ty| self.types.pointee(ty)) else {
            return false;
        };
        if explicit_type.is_some_and(|ty| ty != function_type) {
            warn!("Explicit call type does not match function type.");
        }
        let Some((ret_type, params)) = self
            .types
            .function_signature(function_type)
            .map(|(ret, params)| (ret, params.to_vec()))
        else {
            return false;
        };
        if !self.types.is_void(ret_type) {
            dst.ty = Some(ret_type);
        }

        let mut operands = Vec::with_capacity(params.len());
        for param in params {
            let Some(operand) = self.value_by_ref(record, Some(param), &mut i) else {
                return false;
            };
            operands.push(operand);
        }
        let extra = record.operands.len().saturating_sub(i);
        if extra > 0 {
            warn!("Ignoring {extra} operands beyond the function parameter list.");
            self.warning(
                DiagnosticCode::DxilIgnoringOperands,
                format!("Ignoring {extra} function call operands beyond the parameter list."),
            );
        }

        if !function.is_prototype {
            warn!("Unhandled call to local function.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "Call to a local function is unsupported.",
            );
            return false;
        }
        if !callee.is_dx_intrinsic_dcl() {
            warn!("External function {} is not a dx intrinsic.", function.name);
        }

        let Some((op_value, arguments)) = operands.split_first() else {
            warn!("Missing dx intrinsic function id.");
            self.error(
                DiagnosticCode::DxilInvalidOperandCount,
                "The id for a dx intrinsic function is missing.",
            );
            return false;
        };
        let op = op_value
            .constant_uint()
            .filter(|_| op_value.ty.is_some_and(|ty| self.types.is_integer(ty)));
        let Some(op) = op else {
            warn!("dx intrinsic function id is not a constant int.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "Expected a constant integer dx intrinsic function id.",
            );
            return false;
        };
        self.decode_dx_op(op, &function.name, arguments, ins, dst)
    }
}
