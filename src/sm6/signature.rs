use log::{debug, warn};

use super::metadata::MetadataRef;
use super::{Result, Sm6Parser};
use crate::diagnostics::{DiagnosticCode, Error};
use crate::vsir::{
    ComponentType, DataType, Declaration, Dimension, DstParam, Instruction, InterpolationMode,
    MinPrecision, Opcode, Register, RegisterType, ShaderType, Signature, SignatureElement, SysVal,
    VEC4_SIZE, WriteMask,
};

/// Number of output registers addressable by signature elements.
pub const MAX_REG_OUTPUT: u32 = 32;

const SIGNATURE_ELEMENT_OUTPUT_STREAM: u32 = 0;
const SIGNATURE_ELEMENT_DYN_IDX_COMPONENT_MASK: u32 = 1;
const SIGNATURE_ELEMENT_USAGE_COMPONENT_MASK: u32 = 3;

/// Element operands: id, name, component type, semantic kind, semantic
/// indices, interpolation mode, rows, columns, start row, start column and
/// an optional tag/value list.
const ELEMENT_OPERAND_COUNT: usize = 10;

fn component_type_from_dxil(value: u32) -> (ComponentType, MinPrecision) {
    match value {
        1 => (ComponentType::Bool, MinPrecision::None),
        2 => (ComponentType::Int, MinPrecision::Int16),
        3 => (ComponentType::Uint, MinPrecision::Uint16),
        4 => (ComponentType::Int, MinPrecision::None),
        5 => (ComponentType::Uint, MinPrecision::None),
        6 | 7 => (ComponentType::Uint64, MinPrecision::None),
        8 | 11 | 12 => (ComponentType::Float, MinPrecision::Float16),
        9 | 13 | 14 => (ComponentType::Float, MinPrecision::None),
        10 | 15 | 16 => (ComponentType::Double, MinPrecision::None),
        _ => {
            debug!("Unhandled component type {value}.");
            (ComponentType::Void, MinPrecision::None)
        }
    }
}

/// System value of a DXIL semantic kind. Kinds without a system value map to
/// [`SysVal::None`]; `None` is returned for kinds this parser cannot express.
pub fn sysval_from_semantic_kind(kind: u32) -> Option<SysVal> {
    Some(match kind {
        0 => SysVal::None,
        1 => SysVal::VertexId,
        2 => SysVal::InstanceId,
        3 => SysVal::Position,
        4 => SysVal::RenderTargetArrayIndex,
        5 => SysVal::ViewportArrayIndex,
        6 => SysVal::ClipDistance,
        7 => SysVal::CullDistance,
        10 => SysVal::PrimitiveId,
        12 => SysVal::SampleIndex,
        13 => SysVal::IsFrontFace,
        14 => SysVal::Coverage,
        16 => SysVal::Target,
        17 => SysVal::Depth,
        18 => SysVal::DepthLessEqual,
        19 => SysVal::DepthGreaterEqual,
        20 => SysVal::StencilRef,
        _ => return None,
    })
}

/// Check a row/column placement of `rows` x `columns` at `(row, column)`.
pub fn element_placement_is_valid(row: u32, rows: u32, column: u32, columns: u32) -> bool {
    rows <= MAX_REG_OUTPUT
        && row <= MAX_REG_OUTPUT - rows
        && columns <= VEC4_SIZE
        && column <= VEC4_SIZE - columns
}

impl Sm6Parser<'_> {
    fn signature_error(&mut self, message: impl Into<String>) -> Error {
        self.error(DiagnosticCode::DxilInvalidSignature, message);
        Error::InvalidShader
    }

    /// Read the input and output signatures from the entry point's signature
    /// node and build the register operands used to access them.
    pub(crate) fn signatures_init(&mut self, m: MetadataRef) -> Result<()> {
        let Some(node) = self.metadata_node(Some(m)) else {
            return Err(self.signature_error("Signature table is not a metadata node."));
        };

        if let Some(inputs) = node.first().copied().flatten() {
            self.input_signature = self.read_signature(inputs)?;
        }
        if let Some(outputs) = node.get(1).copied().flatten() {
            self.output_signature = self.read_signature(outputs)?;
        }
        if node.get(2).copied().flatten().is_some() {
            warn!("Ignoring patch constant signature.");
        }

        let output_type = if self.shader_version.shader_type == ShaderType::Pixel {
            RegisterType::ColorOut
        } else {
            RegisterType::Output
        };
        self.input_params = signature_params(&self.input_signature, RegisterType::Input);
        self.output_params = signature_params(&self.output_signature, output_type);
        Ok(())
    }

    fn read_signature(&mut self, m: MetadataRef) -> Result<Signature> {
        let Some(node) = self.metadata_node(Some(m)) else {
            return Err(self.signature_error("Signature element list is not a metadata node."));
        };

        let mut elements = Vec::new();
        elements
            .try_reserve_exact(node.len())
            .map_err(|_| Error::OutOfMemory)?;
        for (i, element) in node.iter().enumerate() {
            let element = self.read_signature_element(i, *element)?;
            elements.push(element);
        }
        Ok(Signature { elements })
    }

    fn read_signature_element(&mut self, i: usize, m: Option<MetadataRef>) -> Result<SignatureElement> {
        let Some(ops) = self.metadata_node(m) else {
            return Err(self.signature_error("Signature element is not a metadata node."));
        };
        if ops.len() < ELEMENT_OPERAND_COUNT {
            return Err(self.signature_error(format!(
                "Invalid signature element operand count {}.",
                ops.len()
            )));
        }
        if ops.len() > ELEMENT_OPERAND_COUNT + 1 {
            warn!("Ignoring {} extra operands.", ops.len() - ELEMENT_OPERAND_COUNT - 1);
            self.warning(
                DiagnosticCode::DxilIgnoringOperands,
                format!(
                    "Ignoring {} extra operands for a signature element.",
                    ops.len() - ELEMENT_OPERAND_COUNT - 1
                ),
            );
        }

        let mut values = [0u32; ELEMENT_OPERAND_COUNT];
        for (j, value) in values.iter_mut().enumerate() {
            if j == 1 || j == 4 {
                continue;
            }
            *value = match self.metadata_uint(ops[j]) {
                Some(value) => value,
                None => {
                    return Err(self.signature_error(format!(
                        "Signature element value at index {j} is not an integer."
                    )));
                }
            };
        }

        if values[0] as usize != i {
            return Err(self.signature_error(format!("Signature element id {} is invalid.", values[0])));
        }

        let Some(semantic_name) = self.metadata_string(ops[1]).map(str::to_string) else {
            return Err(self.signature_error("Signature element name is not a metadata string."));
        };

        let (component_type, min_precision) = component_type_from_dxil(values[2]);

        let Some(sysval) = sysval_from_semantic_kind(values[3]) else {
            return Err(self.signature_error(format!("Unhandled semantic kind {}.", values[3])));
        };

        let semantic_index = self.read_semantic_indices(ops[4])?;

        let Ok(interpolation_mode) = InterpolationMode::try_from(values[5]) else {
            return Err(self.signature_error(format!("Unhandled interpolation mode {}.", values[5])));
        };

        let (rows, columns, start_row, start_column) = (values[6], values[7], values[8], values[9]);
        if !element_placement_is_valid(start_row, rows, 0, 0) {
            return Err(self.signature_error(format!(
                "A signature element starting row {start_row} with count {rows} is invalid."
            )));
        }
        if !element_placement_is_valid(0, 0, start_column, columns) {
            return Err(self.signature_error(format!(
                "A signature element starting column {start_column} with count {columns} is invalid."
            )));
        }

        let mask = WriteMask::from_range(start_column, columns);
        let mut element = SignatureElement {
            semantic_name,
            semantic_index,
            stream_index: 0,
            sysval,
            component_type,
            min_precision,
            interpolation_mode,
            register_index: start_row,
            register_count: rows,
            mask,
            used_mask: mask,
        };

        if let Some(tags) = ops.get(ELEMENT_OPERAND_COUNT).copied().flatten() {
            self.read_element_tags(&mut element, tags, start_column)?;
        }
        Ok(element)
    }

    /// The first semantic index of an element. Later rows must continue the
    /// sequence; a gap is an error, but reading continues.
    fn read_semantic_indices(&mut self, m: Option<MetadataRef>) -> Result<u32> {
        if m.is_none() {
            return Ok(0);
        }
        let Some(ops) = self.metadata_node(m) else {
            return Err(self.signature_error("Semantic index list is not a metadata node."));
        };
        let mut first = None;
        for (row, op) in ops.iter().enumerate() {
            let Some(index) = self.metadata_uint(*op) else {
                return Err(self.signature_error(format!(
                    "Semantic index at row {row} is not an integer."
                )));
            };
            let first = *first.get_or_insert(index);
            if u64::from(index) != u64::from(first) + row as u64 {
                warn!("Semantic index {index} at row {row} breaks the sequence from {first}.");
                self.error(
                    DiagnosticCode::DxilInvalidSignature,
                    format!("Semantic index list does not form a sequence at row {row}."),
                );
            }
        }
        Ok(first.unwrap_or(0))
    }

    fn read_element_tags(
        &mut self,
        element: &mut SignatureElement,
        m: MetadataRef,
        start_column: u32,
    ) -> Result<()> {
        let Some(ops) = self.metadata_node(Some(m)) else {
            return Err(self.signature_error("Signature element tag list is not a metadata node."));
        };
        if ops.len() % 2 != 0 {
            warn!("Ignoring odd tag/value operand count {}.", ops.len());
            self.warning(
                DiagnosticCode::DxilIgnoringOperands,
                "Ignoring the last operand of an odd-sized signature element tag list.",
            );
        }
        for pair in ops.chunks_exact(2) {
            let (Some(tag), Some(value)) = (self.metadata_uint(pair[0]), self.metadata_uint(pair[1])) else {
                return Err(self.signature_error("Signature element tag or value is not an integer."));
            };
            match tag {
                SIGNATURE_ELEMENT_OUTPUT_STREAM => {
                    if value > 3 {
                        return Err(self.signature_error(format!("Output stream index {value} is invalid.")));
                    }
                    element.stream_index = value;
                }
                SIGNATURE_ELEMENT_DYN_IDX_COMPONENT_MASK => {
                    debug!("Ignoring dynamic index component mask {value:#x}.");
                }
                SIGNATURE_ELEMENT_USAGE_COMPONENT_MASK => {
                    if value > WriteMask::ALL.bits() {
                        warn!("Invalid usage mask {value:#x}.");
                        self.warning(
                            DiagnosticCode::DxilInvalidMask,
                            format!("Usage mask {value:#x} is invalid."),
                        );
                    }
                    element.used_mask = WriteMask::from_bits_truncate(value << start_column);
                }
                _ => {
                    warn!("Unhandled signature element tag {tag}.");
                    self.warning(
                        DiagnosticCode::DxilIgnoringOperands,
                        format!("Ignoring signature element tag {tag}."),
                    );
                }
            }
        }
        Ok(())
    }

    /// Emit one declaration per signature element.
    pub(crate) fn emit_signature(&mut self, is_input: bool) {
        let is_pixel = self.shader_version.shader_type == ShaderType::Pixel;
        let (signature, params) = if is_input {
            (&self.input_signature, &self.input_params)
        } else {
            (&self.output_signature, &self.output_params)
        };

        let mut declarations = Vec::with_capacity(signature.elements.len());
        for (element, param) in signature.elements.iter().zip(params) {
            let mut dst = param.clone();
            if element.register_count > 1 {
                dst.reg.idx[0].rel_addr = None;
                dst.reg.idx[0].offset = element.register_count;
            }
            let is_siv = !matches!(element.sysval, SysVal::None | SysVal::Target);
            let interpolation_mode = (is_input && is_pixel).then_some(element.interpolation_mode);
            let opcode = match (is_input, is_pixel, is_siv) {
                (true, true, false) => Opcode::DclInputPs,
                (true, true, true) => Opcode::DclInputPsSiv,
                (true, false, false) => Opcode::DclInput,
                (true, false, true) => Opcode::DclInputSiv,
                (false, _, false) => Opcode::DclOutput,
                (false, _, true) => Opcode::DclOutputSiv,
            };
            let declaration = if is_siv {
                Declaration::RegisterSemantic {
                    dst,
                    sysval: element.sysval,
                    interpolation_mode,
                }
            } else {
                Declaration::Register {
                    dst,
                    interpolation_mode,
                }
            };
            declarations.push(Instruction::declaration(opcode, self.location.clone(), declaration));
        }
        self.instructions.extend(declarations);
    }
}

/// Register operands for each element. Elements spanning several rows get a
/// row index in front of the element index.
fn signature_params(signature: &Signature, reg_type: RegisterType) -> Vec<DstParam> {
    signature
        .elements
        .iter()
        .enumerate()
        .map(|(i, element)| {
            let data_type = match element.component_type.data_type() {
                DataType::Int => DataType::Uint,
                data_type => data_type,
            };
            let is_array = element.register_count > 1;
            let mut reg = Register::new(reg_type, data_type, if is_array { 2 } else { 1 });
            reg.idx[usize::from(is_array)].offset = i as u32;
            reg.dimension = Dimension::Vec4;
            DstParam::new(reg, element.mask)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placement_bounds() {
        assert!(element_placement_is_valid(0, 1, 0, 4));
        assert!(element_placement_is_valid(31, 1, 3, 1));
        assert!(element_placement_is_valid(0, 32, 2, 2));
        assert!(!element_placement_is_valid(32, 1, 0, 1));
        assert!(!element_placement_is_valid(0, 33, 0, 1));
        assert!(!element_placement_is_valid(u32::MAX, 2, 0, 1));
        assert!(!element_placement_is_valid(0, 1, 3, 2));
        assert!(!element_placement_is_valid(0, 1, 0, 5));
    }

    #[test]
    fn semantic_kinds() {
        assert_eq!(sysval_from_semantic_kind(0), Some(SysVal::None));
        assert_eq!(sysval_from_semantic_kind(3), Some(SysVal::Position));
        assert_eq!(sysval_from_semantic_kind(16), Some(SysVal::Target));
        assert_eq!(sysval_from_semantic_kind(8), None);
        assert_eq!(sysval_from_semantic_kind(21), None);
    }

    #[test]
    fn multi_row_elements_take_two_indices() {
        let signature = Signature {
            elements: vec![
                SignatureElement {
                    register_count: 1,
                    mask: WriteMask::ALL,
                    component_type: ComponentType::Float,
                    ..SignatureElement::default()
                },
                SignatureElement {
                    register_count: 3,
                    mask: WriteMask::X,
                    component_type: ComponentType::Int,
                    ..SignatureElement::default()
                },
            ],
        };
        let params = signature_params(&signature, RegisterType::Input);
        assert_eq!(params[0].reg.idx_count(), 1);
        assert_eq!(params[0].reg.data_type, DataType::Float);
        assert_eq!(params[1].reg.idx_count(), 2);
        assert_eq!(params[1].reg.idx[1].offset, 1);
        assert_eq!(params[1].reg.data_type, DataType::Uint);
        assert_eq!(params[1].write_mask, WriteMask::X);
    }
}
