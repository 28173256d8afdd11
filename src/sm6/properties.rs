use log::{debug, warn};

use super::metadata::MetadataRef;
use super::{Result, Sm6Parser};
use crate::diagnostics::{DiagnosticCode, Error};
use crate::vsir::{Declaration, GlobalFlags, Instruction, Opcode, ShaderType};

const ENTRY_POINT_NAMED_METADATA: &str = "dx.entryPoints";

/// Operands of an entry point node: function, name, signatures, resources
/// and properties.
const ENTRY_POINT_OPERAND_COUNT: usize = 5;

const SHADER_PROPERTIES_FLAGS: u32 = 0;
const SHADER_PROPERTIES_COMPUTE: u32 = 4;

/// Inclusive upper bounds of the thread group dimensions.
pub const MAX_THREAD_GROUP_SIZE: [u32; 3] = [1024, 1024, 64];

/// DXIL keeps the low five global flags in a different order: the first one
/// moves to the top of that range.
pub fn global_flags_from_dxil(flags: u64) -> GlobalFlags {
    const MASK: u64 = 0x1f;
    let rotated = flags & MASK;
    let rotated = (rotated >> 1) | ((rotated & 1) << 4);
    GlobalFlags::from_bits_retain((flags & !MASK) | rotated)
}

impl Sm6Parser<'_> {
    fn entry_point_error(&mut self, message: &str) -> Error {
        self.error(DiagnosticCode::DxilInvalidEntryPoint, message.to_string());
        Error::InvalidShader
    }

    /// Read the entry point's function, name, signatures and properties.
    pub(crate) fn entry_point_init(&mut self) -> Result<()> {
        let Some(entry_point) = self
            .find_named_metadata(ENTRY_POINT_NAMED_METADATA)
            .and_then(|operands| operands.first().copied())
        else {
            return Err(self.entry_point_error("No entry point definition found in the metadata."));
        };
        let Some(ops) = self.metadata_node(Some(entry_point)) else {
            return Err(self.entry_point_error("No entry point definition found in the metadata."));
        };
        if ops.len() < ENTRY_POINT_OPERAND_COUNT {
            warn!("Invalid entry point operand count {}.", ops.len());
            return Err(self.entry_point_error("Entry point metadata node has too few operands."));
        }

        let Some(function_index) = self.metadata_module_value(ops[0]) else {
            return Err(self.entry_point_error("Entry point definition is not a metadata value."));
        };
        let Some(function_name) = self
            .values
            .get(function_index)
            .and_then(|value| value.function())
            .map(|function| function.name.clone())
        else {
            return Err(self.entry_point_error(
                "Entry point definition does not contain a function definition.",
            ));
        };

        if let Some(name) = self.metadata_string(ops[1]).map(str::to_string) {
            if name != function_name {
                warn!("Entry point {name} does not match function {function_name}.");
                self.warning(
                    DiagnosticCode::DxilEntryPointMismatch,
                    format!(
                        "Entry point function name {function_name} does not match the name in metadata, {name}."
                    ),
                );
            }
        }
        self.entry_point = function_name;

        if let Some(signatures) = ops[2] {
            self.signatures_init(signatures)?;
        }
        if let Some(properties) = ops[4] {
            self.shader_properties_init(properties)?;
        }
        Ok(())
    }

    fn shader_properties_init(&mut self, m: MetadataRef) -> Result<()> {
        let Some(ops) = self.metadata_node(Some(m)) else {
            self.error(
                DiagnosticCode::DxilInvalidProperties,
                "Shader properties are not a metadata node.",
            );
            return Err(Error::InvalidShader);
        };
        if ops.len() % 2 != 0 {
            warn!("Ignoring the last of {} tag/value operands.", ops.len());
            self.warning(
                DiagnosticCode::DxilIgnoringOperands,
                "Ignoring shader property tag/value operands of odd count.",
            );
        }

        for pair in ops.chunks_exact(2) {
            let Some(tag) = self.metadata_uint(pair[0]) else {
                self.error(
                    DiagnosticCode::DxilInvalidProperties,
                    "Shader property tag is not an integer.",
                );
                return Err(Error::InvalidShader);
            };
            match tag {
                SHADER_PROPERTIES_FLAGS => {
                    let Some(flags) = self.metadata_uint64(pair[1]) else {
                        self.error(
                            DiagnosticCode::DxilInvalidProperties,
                            "Global flags property value is not an integer.",
                        );
                        return Err(Error::InvalidShader);
                    };
                    self.emit_global_flags(flags);
                }
                SHADER_PROPERTIES_COMPUTE => {
                    let size = self.thread_group_size(pair[1])?;
                    self.emit_thread_group(size);
                }
                _ => {
                    debug!("Unhandled shader property tag {tag:#x}.");
                    self.warning(
                        DiagnosticCode::DxilIgnoringOperands,
                        format!("Shader property tag {tag:#x} is unhandled."),
                    );
                }
            }
        }
        Ok(())
    }

    fn thread_group_size(&mut self, m: Option<MetadataRef>) -> Result<[u32; 3]> {
        if self.shader_version.shader_type != ShaderType::Compute {
            self.error(
                DiagnosticCode::DxilInvalidProperties,
                format!(
                    "Shader of type {:?} has thread group dimensions.",
                    self.shader_version.shader_type
                ),
            );
            return Err(Error::InvalidShader);
        }
        let Some(ops) = self.metadata_node(m) else {
            self.error(
                DiagnosticCode::DxilInvalidProperties,
                "Thread group dimension value is not a metadata node.",
            );
            return Err(Error::InvalidShader);
        };
        if ops.len() != 3 {
            self.error(
                DiagnosticCode::DxilInvalidProperties,
                format!("Thread group dimension count {} is invalid.", ops.len()),
            );
            return Err(Error::InvalidShader);
        }

        let mut size = [0u32; 3];
        for (i, (dimension, op)) in size.iter_mut().zip(&ops).enumerate() {
            let Some(value) = self.metadata_uint(*op) else {
                self.error(
                    DiagnosticCode::DxilInvalidProperties,
                    format!("Thread group dimension {i} is not an integer."),
                );
                return Err(Error::InvalidShader);
            };
            if value == 0 || value > MAX_THREAD_GROUP_SIZE[i] {
                self.error(
                    DiagnosticCode::DxilInvalidProperties,
                    format!("Thread group dimension {i} value {value} is invalid."),
                );
                return Err(Error::InvalidShader);
            }
            *dimension = value;
        }
        Ok(size)
    }

    fn emit_global_flags(&mut self, flags: u64) {
        let declaration = Declaration::GlobalFlags(global_flags_from_dxil(flags));
        self.instructions.push(Instruction::declaration(
            Opcode::DclGlobalFlags,
            self.location.clone(),
            declaration,
        ));
    }

    fn emit_thread_group(&mut self, [x, y, z]: [u32; 3]) {
        self.instructions.push(Instruction::declaration(
            Opcode::DclThreadGroup,
            self.location.clone(),
            Declaration::ThreadGroupSize { x, y, z },
        ));
    }
}
