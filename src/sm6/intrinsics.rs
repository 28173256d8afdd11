//! `dx.op` intrinsic calls.
//!
//! The first call argument selects the operation. Each supported operation
//! declares its return and operand types with one character per type:
//!
//! * `8`: i8
//! * `i`: i32
//! * `b`: constant i1
//! * `c`: constant integer
//! * `H`: resource handle
//! * `v`: void
//! * `o`: overloaded

use log::warn;
use num_enum::TryFromPrimitive;

use super::types::TypeId;
use super::values::{Handle, Value, ValueKind, register_index_address_init};
use super::Sm6Parser;
use crate::diagnostics::DiagnosticCode;
use crate::vsir::{
    DataType, DescriptorType, Dimension, DstParam, Instruction, Opcode, Register, RegisterType,
    SrcParam, Swizzle, VEC4_SIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum DxIntrinsicOpcode {
    LoadInput = 4,
    StoreOutput = 5,
    CreateHandle = 57,
    CBufferLoadLegacy = 59,
}

impl DxIntrinsicOpcode {
    /// Return type and operand types, excluding the opcode operand.
    pub fn signature(self) -> (char, &'static str) {
        match self {
            Self::LoadInput => ('o', "ii8i"),
            Self::StoreOutput => ('v', "ii8o"),
            Self::CreateHandle => ('H', "ccib"),
            Self::CBufferLoadLegacy => ('o', "Hi"),
        }
    }
}

impl Sm6Parser<'_> {
    fn validate_operand_type(&self, ty: Option<TypeId>, value: Option<&Value>, info: char) -> bool {
        let types = &self.types;
        let is_constant = value.is_some_and(Value::is_constant);
        match info {
            '8' => ty.is_some_and(|ty| types.is_i8(ty)),
            'i' => ty.is_some_and(|ty| types.is_i32(ty)),
            'b' => is_constant && ty.is_some_and(|ty| types.is_bool(ty)),
            'c' => is_constant && ty.is_some_and(|ty| types.is_integer(ty)),
            'H' => ty.is_some_and(|ty| types.is_handle(ty)),
            'v' => ty.is_none(),
            'o' => true,
            _ => {
                warn!("Unhandled operand code '{info}'.");
                false
            }
        }
    }

    fn validate_dx_op(&mut self, op: DxIntrinsicOpcode, name: &str, operands: &[Value], dst: &Value) -> bool {
        let (ret_type, operand_info) = op.signature();

        if !self.validate_operand_type(dst.ty, None, ret_type) {
            // Only the SSA result's data type depends on it.
            warn!("Failed to validate return type for dx intrinsic {op:?}, '{name}'.");
        }

        let mut expected = operand_info.chars();
        for (i, value) in operands.iter().enumerate() {
            let is_valid = expected.next().is_some_and(|info| {
                (value.is_register() || value.is_handle())
                    && self.validate_operand_type(value.ty, Some(value), info)
            });
            if !is_valid {
                warn!("Failed to validate operand {} for dx intrinsic {op:?}, '{name}'.", i + 1);
                self.error(
                    DiagnosticCode::DxilInvalidOperand,
                    format!(
                        "Operand {} for call to dx intrinsic function '{name}' is invalid.",
                        i + 1
                    ),
                );
                return false;
            }
        }
        if expected.next().is_some() {
            warn!("Missing operands for dx intrinsic {op:?}, '{name}'.");
            self.error(
                DiagnosticCode::DxilInvalidOperandCount,
                format!("Call to dx intrinsic function '{name}' has missing operands."),
            );
            return false;
        }
        true
    }

    /// Lower a call to the intrinsic with id `op`. Unknown intrinsics are a
    /// warning; their result becomes undefined.
    pub(crate) fn decode_dx_op(
        &mut self,
        op: u32,
        name: &str,
        operands: &[Value],
        ins: &mut Instruction,
        dst: &mut Value,
    ) -> bool {
        let Ok(op) = DxIntrinsicOpcode::try_from(op) else {
            warn!("Unhandled dx intrinsic function id {op}, '{name}'.");
            self.warning(
                DiagnosticCode::DxilUnhandledIntrinsic,
                format!("Call to intrinsic function {name} is unhandled."),
            );
            return false;
        };

        if !self.validate_dx_op(op, name, operands, dst) {
            return false;
        }
        match op {
            DxIntrinsicOpcode::LoadInput => self.emit_dx_load_input(operands, ins, dst),
            DxIntrinsicOpcode::StoreOutput => self.emit_dx_store_output(operands, ins),
            DxIntrinsicOpcode::CreateHandle => self.emit_dx_create_handle(operands, dst),
            DxIntrinsicOpcode::CBufferLoadLegacy => self.emit_dx_cbuffer_load(operands, ins, dst),
        }
    }

    /// Resolve a resource binding. No instruction is emitted; the handle
    /// value carries the constant buffer register for later loads.
    fn emit_dx_create_handle(&mut self, operands: &[Value], dst: &mut Value) -> bool {
        let class = operands[0].constant_uint().unwrap_or(u32::MAX);
        let Ok(descriptor_type) = DescriptorType::try_from(class) else {
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                format!("Invalid resource class {class}."),
            );
            return false;
        };
        let id = operands[1].constant_uint().unwrap_or(u32::MAX);
        let index = &operands[2];

        let found = self.descriptors.iter().position(|d| {
            d.descriptor_type == descriptor_type
                && d.register_id == id
                && index
                    .constant_uint()
                    .is_none_or(|i| (d.range.first..=d.range.last).contains(&i))
        });
        let Some(descriptor) = found else {
            warn!("Failed to find resource type {descriptor_type:?}, id {id}.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                format!(
                    "Descriptor for resource type {:#x}, id {id:#x} was not found.",
                    descriptor_type as u32
                ),
            );
            return false;
        };

        let mut reg = Register::new(RegisterType::ConstBuffer, DataType::Float, 3);
        reg.idx[0].offset = id;
        register_index_address_init(&mut reg.idx[1], index);
        reg.non_uniform = operands[3].constant_uint().is_some_and(|value| value != 0);
        reg.dimension = Dimension::Vec4;

        dst.kind = ValueKind::Handle(Handle { descriptor, reg });
        true
    }

    fn emit_dx_cbuffer_load(&mut self, operands: &[Value], ins: &mut Instruction, dst: &mut Value) -> bool {
        let ValueKind::Handle(handle) = &operands[0].kind else {
            warn!("Handle parameter is not a handle.");
            self.error(
                DiagnosticCode::DxilInvalidResourceHandle,
                "A handle parameter is not a handle.",
            );
            return false;
        };

        let mut src = SrcParam::new(handle.reg.clone());
        register_index_address_init(&mut src.reg.idx[2], &operands[1]);

        let scalar = dst.ty.and_then(|ty| self.types.scalar_type(ty, 0));
        if let Some(scalar) = scalar {
            src.reg.data_type = self.types.data_type(scalar);
        }
        if src.reg.data_type.is_64_bit() {
            let swizzle = src.swizzle;
            src.swizzle = Swizzle::new(swizzle.component(0) / 2, swizzle.component(2) / 2, 0, 0);
        }
        let component_count = scalar.map_or(VEC4_SIZE, |scalar| self.types.max_vector_size(scalar));

        ins.opcode = Opcode::Mov;
        ins.src = vec![src];
        ins.dst = vec![self.init_ssa_dst(dst, component_count)];
        true
    }

    fn emit_dx_load_input(&mut self, operands: &[Value], ins: &mut Instruction, dst: &mut Value) -> bool {
        let row = operands[0].constant_uint().unwrap_or(u32::MAX);
        let column = operands[2].constant_uint().unwrap_or(u32::MAX);

        let Some(element) = self.input_signature.elements.get(row as usize) else {
            warn!("Invalid row index {row}.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                format!("Invalid input row index {row}."),
            );
            return false;
        };
        let register_count = element.register_count;
        if column >= VEC4_SIZE {
            warn!("Invalid column index {column}.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                format!("Invalid input column index {column}."),
            );
            return false;
        }

        let mut src = SrcParam::new(self.input_params[row as usize].reg.clone());
        src.swizzle = Swizzle::broadcast(column);
        if register_count > 1 {
            register_index_address_init(&mut src.reg.idx[0], &operands[1]);
        }

        ins.opcode = Opcode::Mov;
        ins.src = vec![src];
        ins.dst = vec![self.init_ssa_dst(dst, 1)];
        true
    }

    fn emit_dx_store_output(&mut self, operands: &[Value], ins: &mut Instruction) -> bool {
        let row = operands[0].constant_uint().unwrap_or(u32::MAX);
        let column = operands[2].constant_uint().unwrap_or(u32::MAX);

        let Some(element) = self.output_signature.elements.get(row as usize) else {
            warn!("Invalid row index {row}.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                format!("Invalid output row index {row}."),
            );
            return false;
        };
        let register_count = element.register_count;
        if column >= VEC4_SIZE {
            warn!("Invalid column index {column}.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                format!("Invalid output column index {column}."),
            );
            return false;
        }

        let value = &operands[3];
        if !value.is_register() {
            warn!("Source value is not a register.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "Expected store operation source to be a register.",
            );
            return false;
        }

        let mut dst = DstParam::scalar(self.output_params[row as usize].reg.clone(), column);
        if register_count > 1 {
            register_index_address_init(&mut dst.reg.idx[0], &operands[1]);
        }

        ins.opcode = Opcode::Mov;
        ins.dst = vec![dst];
        ins.src = vec![value.src_param()];
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_intrinsics() {
        assert_eq!(DxIntrinsicOpcode::try_from(4).ok(), Some(DxIntrinsicOpcode::LoadInput));
        assert_eq!(
            DxIntrinsicOpcode::try_from(59).ok(),
            Some(DxIntrinsicOpcode::CBufferLoadLegacy)
        );
        assert!(DxIntrinsicOpcode::try_from(6).is_err());
        assert_eq!(DxIntrinsicOpcode::CreateHandle.signature(), ('H', "ccib"));
    }
}
