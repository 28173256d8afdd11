use log::warn;

use super::types::TypeId;
use super::{Result, Sm6Parser};
use crate::bitcode::{Block, Record};
use crate::diagnostics::{DiagnosticCode, Error};
use crate::schema::blocks::{BlockId, ConstantsCode, ModuleCode};
use crate::vsir::{
    DataType, Dimension, DstParam, Register, RegisterIndex, RegisterType, SrcParam, WriteMask,
};

/// Highest alignment exponent LLVM can encode.
const MAX_ALIGNMENT_EXPONENT: u64 = 29;

/// Prefix of the external functions implementing DXIL intrinsics.
pub const DX_INTRINSIC_PREFIX: &str = "dx.op.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDecl {
    pub name: String,
    pub is_prototype: bool,
    pub attribs_id: u64,
}

/// A resource handle created by `dx.op.createHandle`.
#[derive(Debug, Clone, PartialEq)]
pub struct Handle {
    /// Index into the parser's descriptor list.
    pub descriptor: usize,
    pub reg: Register,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Function(FunctionDecl),
    Register(Register),
    /// Index of an immediate constant buffer.
    Icb(usize),
    Handle(Handle),
}

/// One entry of the module's value list.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    /// `None` until the defining record assigns a type. A record which failed
    /// before its result type was known leaves an untyped undefined value.
    pub ty: Option<TypeId>,
    pub kind: ValueKind,
    /// Set only for explicit `undef` constants.
    pub is_undefined: bool,
}

impl Default for Value {
    fn default() -> Self {
        Self {
            ty: None,
            kind: ValueKind::Register(Register::new(RegisterType::Invalid, DataType::Unused, 0)),
            is_undefined: false,
        }
    }
}

impl Value {
    pub fn function(&self) -> Option<&FunctionDecl> {
        match &self.kind {
            ValueKind::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn is_function_dcl(&self) -> bool {
        self.function().is_some()
    }

    pub fn is_dx_intrinsic_dcl(&self) -> bool {
        self.function()
            .is_some_and(|f| f.is_prototype && f.name.starts_with(DX_INTRINSIC_PREFIX))
    }

    pub fn register(&self) -> Option<&Register> {
        match &self.kind {
            ValueKind::Register(reg) => Some(reg),
            _ => None,
        }
    }

    pub fn is_register(&self) -> bool {
        self.register().is_some()
    }

    pub fn is_constant(&self) -> bool {
        self.register().is_some_and(Register::is_constant)
    }

    pub fn is_undef(&self) -> bool {
        self.register()
            .is_some_and(|reg| reg.reg_type == RegisterType::Undef)
    }

    pub fn is_handle(&self) -> bool {
        matches!(self.kind, ValueKind::Handle(_))
    }

    pub fn icb(&self) -> Option<usize> {
        match self.kind {
            ValueKind::Icb(index) => Some(index),
            _ => None,
        }
    }

    /// Value of an integer constant.
    pub fn constant_uint(&self) -> Option<u32> {
        self.register().and_then(Register::uint_value)
    }

    /// Source operand reading this value.
    pub fn src_param(&self) -> SrcParam {
        match &self.kind {
            ValueKind::Register(reg) => SrcParam::new(reg.clone()),
            ValueKind::Handle(handle) => SrcParam::new(handle.reg.clone()),
            ValueKind::Function(_) | ValueKind::Icb(_) => SrcParam::new(Register::new(
                RegisterType::Invalid,
                DataType::Unused,
                0,
            )),
        }
    }
}

/// Decode an integer constant stored with LLVM's sign rotation: the sign is in
/// bit 0 and the magnitude in the remaining bits. The lone value `1` is
/// negative zero, which LLVM uses for the minimum value of the type.
pub fn decode_rotated_signed_value(value: u64, width: u32) -> u64 {
    let decoded = if value == 1 {
        1u64 << (width.clamp(1, 64) - 1)
    } else {
        let magnitude = value >> 1;
        if value & 1 != 0 {
            magnitude.wrapping_neg()
        } else {
            magnitude
        }
    };
    truncate_to_width(decoded, width)
}

fn truncate_to_width(value: u64, width: u32) -> u64 {
    if width >= 64 {
        value
    } else {
        value & ((1u64 << width) - 1)
    }
}

/// Alignment in bytes from its encoded exponent, which is stored plus one so
/// that zero means "unspecified".
pub fn decode_alignment(encoded: u64) -> Option<u32> {
    (encoded <= MAX_ALIGNMENT_EXPONENT + 1).then(|| (1u32 << encoded) >> 1)
}

/// Point `index` at `address`: a constant gives a fixed offset, undef gives
/// offset 0, and any other register becomes a relative address.
pub fn register_index_address_init(index: &mut RegisterIndex, address: &Value) {
    index.rel_addr = None;
    index.offset = 0;
    if let Some(offset) = address.constant_uint() {
        index.offset = offset;
    } else if address.is_register() && !address.is_undef() {
        index.rel_addr = Some(Box::new(address.src_param()));
    }
}

impl Sm6Parser<'_> {
    /// Absolute value index for a relative reference from the current
    /// definition point.
    pub(crate) fn value_index(&mut self, relative: u64) -> Option<usize> {
        if relative > u64::from(u32::MAX) {
            warn!("Ignoring upper 32 bits of relative index.");
        }
        // Forward references wrap around past the current count.
        let index = (self.values.len() as u32).wrapping_sub(relative as u32) as usize;
        if index >= self.cur_max_value {
            warn!("Invalid value index {index} at {}.", self.values.len());
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                format!("Invalid value relative index {}.", relative as u32),
            );
            return None;
        }
        if index == self.values.len() {
            warn!("Invalid value self-reference at {index}.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "Invalid value self-reference.",
            );
            return None;
        }
        Some(index)
    }

    /// Resolve the relative value reference at `*operand` and advance past it.
    ///
    /// A forward reference carries its type in the next operand unless the
    /// caller already knows it from `fwd_type`. Forward references are
    /// rejected.
    pub(crate) fn value_index_by_ref(
        &mut self,
        record: &Record,
        fwd_type: Option<TypeId>,
        operand: &mut usize,
    ) -> Option<usize> {
        let mut i = *operand;
        if !self.validate_operand_min_count(record, i + 1) {
            return None;
        }
        let index = self.value_index(record.operands[i])?;
        if index >= self.values.len() {
            if fwd_type.is_none() {
                if !self.validate_operand_min_count(record, i + 2) {
                    return None;
                }
                i += 1;
                self.get_type(record.operands[i])?;
            }
            warn!("Forward value references are not supported yet.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "Unsupported value forward reference.",
            );
            return None;
        }
        *operand = i + 1;
        Some(index)
    }

    pub(crate) fn value_by_ref(
        &mut self,
        record: &Record,
        fwd_type: Option<TypeId>,
        operand: &mut usize,
    ) -> Option<Value> {
        let index = self.value_index_by_ref(record, fwd_type, operand)?;
        Some(self.values[index].clone())
    }

    /// Value at an absolute index, as used by constant expressions,
    /// initialisers and metadata.
    pub(crate) fn value_at(&self, index: u64) -> Option<&Value> {
        usize::try_from(index).ok().and_then(|i| self.values.get(i))
    }

    pub(crate) fn push_value(&mut self, value: Value) -> Result<usize> {
        self.values.try_reserve(1).map_err(|_| Error::OutOfMemory)?;
        self.values.push(value);
        Ok(self.values.len() - 1)
    }

    pub(crate) fn validate_is_register(&mut self, value: &Value) -> bool {
        if !value.is_register() {
            warn!("Operand of kind {:?} is not a register.", value.kind);
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "An operand is not a register.",
            );
            return false;
        }
        true
    }

    pub(crate) fn validate_is_pointer(&mut self, value: &Value) -> bool {
        if !value.ty.is_some_and(|ty| self.types.is_pointer(ty)) {
            warn!("Operand result type is not a pointer.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "A pointer operand of an instruction is not a pointer.",
            );
            return false;
        }
        true
    }

    pub(crate) fn validate_is_bool(&mut self, value: &Value) -> bool {
        if !value.ty.is_some_and(|ty| self.types.is_bool(ty)) {
            warn!("Operand of type {:?} is not bool.", value.ty);
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "An int1 was expected for a condition operand.",
            );
            return false;
        }
        true
    }

    /// Give `dst` a fresh SSA register of its scalar type with
    /// `component_count` components, and return the destination operand
    /// writing it.
    pub(crate) fn init_ssa_dst(&mut self, dst: &mut Value, component_count: u32) -> DstParam {
        let data_type = dst
            .ty
            .and_then(|ty| self.types.scalar_type(ty, 0))
            .map_or(DataType::Unused, |ty| self.types.data_type(ty));
        let mut reg = Register::new(RegisterType::Ssa, data_type, 1);
        reg.idx[0].offset = self.ssa_next_id;
        self.ssa_next_id += 1;
        reg.dimension = if component_count > 1 {
            Dimension::Vec4
        } else {
            Dimension::Scalar
        };
        dst.kind = ValueKind::Register(reg.clone());
        DstParam::new(reg, WriteMask::from_range(0, component_count))
    }

    /// Total value count of the module, recording each function's value
    /// budget on the way.
    ///
    /// A function's budget is the value count at its start plus its local
    /// constants and one value per record after DECLAREBLOCKS. The count
    /// returns to its previous value after each function.
    pub(crate) fn compute_max_value_count(
        &mut self,
        block: &Block,
        mut value_count: usize,
    ) -> Option<usize> {
        let old_value_count = value_count;

        if block.id == BlockId::Module as u32 {
            let declarations = block
                .records
                .iter()
                .filter(|record| {
                    record.code == ModuleCode::GlobalVar as u32
                        || record.code == ModuleCode::Function as u32
                })
                .count();
            value_count = value_count.checked_add(declarations)?;
        }

        for child in &block.blocks {
            value_count = self.compute_max_value_count(child, value_count)?;
        }

        match BlockId::try_from(block.id) {
            Ok(BlockId::Constants) => {
                let constants = block
                    .records
                    .iter()
                    .filter(|record| record.code != ConstantsCode::SetType as u32)
                    .count();
                value_count = value_count.checked_add(constants)?;
            }
            Ok(BlockId::Function) => {
                value_count = value_count.checked_add(block.records.len().max(1) - 1)?;
                self.value_capacity = self.value_capacity.max(value_count);
                self.functions.push(super::function::Function::new(value_count));
                value_count = old_value_count;
            }
            _ => {}
        }
        u32::try_from(value_count).ok()?;
        Some(value_count)
    }
}
