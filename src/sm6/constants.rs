use std::collections::HashSet;

use log::{debug, trace, warn};

use super::types::{TypeId, TypeKind};
use super::values::{Value, ValueKind, decode_rotated_signed_value};
use super::{Result, Sm6Parser};
use crate::bitcode::{Block, Record};
use crate::diagnostics::{DiagnosticCode, Error};
use crate::schema::blocks::ConstantsCode;
use crate::vsir::{DataType, IcbData, Immediate, ImmediateConstantBuffer, Register, RegisterType};

impl Sm6Parser<'_> {
    /// Decode a CONSTANTS block, adding one value per non-SETTYPE record.
    pub(crate) fn constants_init(&mut self, block: &Block) -> Result<()> {
        self.location.line = block.id;
        let mut ty: Option<TypeId> = None;
        let mut reg_type = RegisterType::Invalid;
        let mut data_type = DataType::Unused;
        let mut unhandled = HashSet::new();

        for (i, record) in block.records.iter().enumerate() {
            self.location.column = i as u32;
            let code = ConstantsCode::try_from(record.code).ok();

            if code == Some(ConstantsCode::SetType) {
                if !self.validate_operand_count(record, 1, 1) {
                    return Err(Error::InvalidShader);
                }
                let set = self.get_type(record.operands[0]).ok_or(Error::InvalidShader)?;
                let element = self.types.element_type(set);
                if self.types.is_numeric(element) {
                    data_type = self.types.data_type(element);
                    reg_type = if self.types.width(element).is_some_and(|w| w > 32) {
                        RegisterType::ImmConst64
                    } else {
                        RegisterType::ImmConst
                    };
                } else {
                    data_type = DataType::Unused;
                    reg_type = RegisterType::Invalid;
                }
                ty = Some(set);
                continue;
            }

            let Some(ty) = ty else {
                warn!("Invalid constant type.");
                self.error(
                    DiagnosticCode::DxilInvalidOperand,
                    format!("Constant record {i} has no type."),
                );
                return Err(Error::InvalidShader);
            };

            let mut reg = Register::new(reg_type, data_type, 0);
            if reg_type == RegisterType::ImmConst64 {
                reg.immconst = Immediate::U64([0; 2]);
            }
            let mut dst = Value {
                ty: Some(ty),
                ..Value::default()
            };

            match code {
                Some(ConstantsCode::Null) => {
                    if self.types.is_array(ty) {
                        warn!("Constant null arrays are not supported.");
                        self.error(
                            DiagnosticCode::DxilNotImplemented,
                            "Constant null arrays are not supported.",
                        );
                        return Err(Error::InvalidShader);
                    }
                    // Immediates start zeroed.
                }
                Some(ConstantsCode::Integer) => {
                    if !self.validate_operand_count(record, 1, 1) {
                        return Err(Error::InvalidShader);
                    }
                    let Some(width) = self.types.width(ty).filter(|_| self.types.is_integer(ty)) else {
                        warn!("Invalid integer of non-integer type at constant {i}.");
                        self.error(
                            DiagnosticCode::DxilInvalidOperand,
                            format!("Constant {i} is an integer of a non-integer type."),
                        );
                        return Err(Error::InvalidShader);
                    };
                    let value = decode_rotated_signed_value(record.operands[0], width);
                    reg.immconst = if width > 32 {
                        Immediate::U64([value, 0])
                    } else {
                        Immediate::U32([value as u32, 0, 0, 0])
                    };
                }
                Some(ConstantsCode::Float) => {
                    if !self.validate_operand_count(record, 1, 1) {
                        return Err(Error::InvalidShader);
                    }
                    let bits = record.operands[0];
                    match self.types.width(ty).filter(|_| self.types.is_floating_point(ty)) {
                        Some(16) => warn!("Half float constants are not supported yet."),
                        Some(32) => reg.immconst = Immediate::U32([bits as u32, 0, 0, 0]),
                        Some(64) => reg.immconst = Immediate::U64([bits, 0]),
                        _ => {
                            warn!("Invalid float of non-float type at constant {i}.");
                            self.error(
                                DiagnosticCode::DxilInvalidOperand,
                                format!("Constant {i} is a float of a non-float type."),
                            );
                            return Err(Error::InvalidShader);
                        }
                    }
                }
                Some(ConstantsCode::Data) => {
                    let icb = self.constant_array(ty, &record.operands)?;
                    dst.kind = ValueKind::Icb(icb);
                    self.push_value(dst)?;
                    continue;
                }
                Some(ConstantsCode::CeGep | ConstantsCode::CeInboundsGep) => {
                    let is_in_bounds = code == Some(ConstantsCode::CeInboundsGep);
                    self.constexpr_gep(record, is_in_bounds, &mut dst)?;
                    self.push_value(dst)?;
                    continue;
                }
                Some(ConstantsCode::Undef) => {
                    self.validate_operand_max_count(record, 0);
                    reg.reg_type = RegisterType::Undef;
                    dst.is_undefined = true;
                }
                _ => {
                    if unhandled.insert(record.code) {
                        debug!("Unhandled constant code {}.", record.code);
                    }
                    reg.reg_type = RegisterType::Undef;
                }
            }

            dst.kind = ValueKind::Register(reg);
            self.push_value(dst)?;
        }
        Ok(())
    }

    /// Build an immediate constant buffer from a DATA record. Nested arrays
    /// are flattened.
    fn constant_array(&mut self, ty: TypeId, operands: &[u64]) -> Result<usize> {
        let mut element = ty;
        let mut count: u64 = 1;
        for _ in 0..self.types.len() {
            let TypeKind::Array {
                element: inner,
                count: inner_count,
            } = *self.types.get(element)
            else {
                break;
            };
            count = count.saturating_mul(u64::from(inner_count));
            element = inner;
        }

        if element == ty || !self.types.is_numeric(element) {
            warn!("Unsupported constant data type {:?}.", self.types.get(ty));
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "Constant data must be an array of scalars.",
            );
            return Err(Error::InvalidShader);
        }
        if self.types.is_bool(element) {
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                "Constant arrays of bool are not supported.",
            );
            return Err(Error::InvalidShader);
        }
        if count != operands.len() as u64 {
            warn!("Array of size {count} initialised with {} elements.", operands.len());
            self.error(
                DiagnosticCode::DxilInvalidOperandCount,
                format!(
                    "Invalid array of size {count} initialised with {} elements.",
                    operands.len()
                ),
            );
            return Err(Error::InvalidShader);
        }

        let data = if self.types.width(element) == Some(64) {
            let mut quads = Vec::new();
            quads.try_reserve_exact(operands.len()).map_err(|_| Error::OutOfMemory)?;
            quads.extend_from_slice(operands);
            IcbData::Quads(quads)
        } else {
            let mut words = Vec::new();
            words.try_reserve_exact(operands.len()).map_err(|_| Error::OutOfMemory)?;
            words.extend(operands.iter().map(|&value| value as u32));
            IcbData::Words(words)
        };

        let index = self.icbs.len();
        trace!("Immediate constant buffer {index} with {count} elements.");
        self.icbs.push(ImmediateConstantBuffer {
            register_idx: index as u32,
            data_type: self.types.data_type(element),
            component_count: 1,
            element_count: count as u32,
            data,
        });
        Ok(index)
    }

    /// A constant GEP indexing into a global array variable. Operands are an
    /// optional source element type followed by `(type, absolute value)`
    /// pairs for the base pointer and two indices.
    fn constexpr_gep(&mut self, record: &Record, is_in_bounds: bool, dst: &mut Value) -> Result<()> {
        let operands = &record.operands;
        let pairs = &operands[operands.len() % 2..];
        if pairs.len() != 6 {
            warn!("Unsupported constant GEP operand count {}.", operands.len());
            self.error(
                DiagnosticCode::DxilNotImplemented,
                format!(
                    "Constant GEP expressions with {} indices are not supported.",
                    (pairs.len() / 2).saturating_sub(1)
                ),
            );
            return Err(Error::InvalidShader);
        }

        let invalid = |parser: &mut Self, message: &str| -> Result<()> {
            parser.error(DiagnosticCode::DxilInvalidOperand, message.to_string());
            Err(Error::InvalidShader)
        };

        let Some(base) = self.value_at(pairs[1]).cloned() else {
            return invalid(self, "Constant GEP base value is invalid.");
        };
        let base_is_global = base
            .register()
            .is_some_and(|reg| reg.reg_type == RegisterType::IdxTemp);
        let Some(pointer_type) = base.ty.filter(|&ty| self.types.is_pointer(ty) && base_is_global) else {
            return invalid(self, "Constant GEP base is not a global variable.");
        };
        let ValueKind::Register(mut reg) = base.kind else {
            return invalid(self, "Constant GEP base is not a global variable.");
        };

        if self.value_at(pairs[3]).and_then(Value::constant_uint) != Some(0) {
            return invalid(self, "The pointer dereference index for a constant GEP is not constant zero.");
        }
        let Some(element_index) = self.value_at(pairs[5]).and_then(Value::constant_uint) else {
            return invalid(self, "Constant GEP element index is not a constant integer.");
        };

        let pointee = self.types.pointee(pointer_type).ok_or(Error::InvalidShader)?;
        let addr_space = self.types.address_space(pointer_type).unwrap_or_default();
        let Some(element) = self
            .types
            .element_type_at_index(pointee, u64::from(element_index))
            .filter(|_| self.types.is_array(pointee))
        else {
            return invalid(self, "Constant GEP element index is out of bounds.");
        };
        let Some(result_type) = self.types.pointer_to(element, addr_space) else {
            self.error(
                DiagnosticCode::DxilInvalidModule,
                "Module does not define a pointer type for a constant GEP.",
            );
            return Err(Error::InvalidShader);
        };

        reg.set_idx_count(2);
        reg.idx[1].offset = element_index;
        reg.idx[1].rel_addr = None;
        reg.idx[1].is_in_bounds = is_in_bounds;
        dst.ty = Some(result_type);
        dst.kind = ValueKind::Register(reg);
        Ok(())
    }
}
