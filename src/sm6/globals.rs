use log::{debug, warn};

use super::types::{TypeId, TypeKind};
use super::values::{DX_INTRINSIC_PREFIX, FunctionDecl, Value, ValueKind, decode_alignment};
use super::{Result, Sm6Parser};
use crate::bitcode::{Block, Record};
use crate::diagnostics::{DiagnosticCode, Error};
use crate::schema::blocks::{BlockId, ModuleCode};
use crate::schema::enums::AddressSpace;
use crate::vsir::{Declaration, IndexableTemp, Instruction, Opcode, Register, RegisterType};

const GLOBALVAR_FLAG_IS_CONSTANT: u64 = 1;
const GLOBALVAR_FLAG_EXPLICIT_TYPE: u64 = 2;
const GLOBALVAR_ADDRESS_SPACE_SHIFT: u64 = 2;

/// Names of the optional GLOBALVAR operands from index 6 on.
const GLOBALVAR_IGNORED_OPERANDS: [&str; 7] = [
    "visibility",
    "thread local storage mode",
    "unnamed address",
    "external initialisation",
    "dll storage class",
    "comdat",
    "attributes",
];

impl Sm6Parser<'_> {
    /// Process the module records in order, then the module-level constants,
    /// then resolve global variable initialisers.
    pub(crate) fn globals_init(&mut self, root: &Block) -> Result<()> {
        self.location.line = root.id;
        for (i, record) in root.records.iter().enumerate() {
            self.location.column = i as u32;
            match ModuleCode::try_from(record.code) {
                Ok(ModuleCode::Function) => {
                    if !self.declare_function(record)? {
                        self.error(
                            DiagnosticCode::DxilInvalidFunctionDcl,
                            "A DXIL function declaration is invalid.",
                        );
                        return Err(Error::InvalidShader);
                    }
                }
                Ok(ModuleCode::GlobalVar) => {
                    if !self.declare_global(record)? {
                        return Err(Error::InvalidShader);
                    }
                }
                Ok(ModuleCode::Version) => {
                    if !self.validate_operand_count(record, 1, 1) {
                        return Err(Error::InvalidShader);
                    }
                    let version = record.operands[0];
                    if version != 1 {
                        warn!("Unsupported format version {version:#x}.");
                        self.error(
                            DiagnosticCode::DxilUnsupportedBitcodeFormat,
                            format!("DXIL format version {version:#x} is unsupported."),
                        );
                        return Err(Error::InvalidShader);
                    }
                }
                Err(_) => debug!("Ignoring module record code {}.", record.code),
            }
        }

        for block in root.children(BlockId::Constants as u32) {
            self.constants_init(block)?;
        }

        self.resolve_global_initialisers();
        Ok(())
    }

    /// Declare a function from a MODULE FUNCTION record. `Ok(false)` means
    /// the declaration is invalid.
    fn declare_function(&mut self, record: &Record) -> Result<bool> {
        if !self.validate_operand_count(record, 8, 15) {
            return Ok(false);
        }
        let ops = &record.operands;
        let index = self.values.len();

        let name = match self.symbols.name(index as u64) {
            Some(name) => name.to_string(),
            None => {
                warn!("Missing symbol name for function {index}.");
                String::new()
            }
        };

        let Some(ty) = self.get_type(ops[0]) else {
            return Ok(false);
        };
        let Some((ret_type, _)) = self.types.function_signature(ty) else {
            warn!("Type {:?} is not a function.", self.types.get(ty));
            return Ok(false);
        };
        let Some(pointer_type) = self.types.pointer_to(ty, AddressSpace::Default as u64) else {
            warn!("Failed to get pointer type for function {name}.");
            return Ok(false);
        };

        if ops[1] != 0 {
            warn!("Ignoring calling convention {:#x}.", ops[1]);
        }
        let is_prototype = ops[2] != 0;
        if ops[3] != 0 {
            warn!("Ignoring linkage {:#x}.", ops[3]);
        }
        let attribs_id = ops[4];
        if attribs_id > u64::from(u32::MAX) {
            warn!("Invalid attributes id {attribs_id:#x}.");
        }
        for (j, &operand) in ops.iter().enumerate().skip(5) {
            if operand != 0 {
                warn!("Ignoring operand {j} of value {operand:#x} for function {name}.");
            }
        }

        if is_prototype && name.starts_with(DX_INTRINSIC_PREFIX) {
            let types = &self.types;
            if !(types.is_void(ret_type) || types.is_numeric(ret_type) || types.is_struct(ret_type)) {
                warn!("Unexpected return type {:?} for dx intrinsic function {name}.", types.get(ret_type));
            }
        }

        self.push_value(Value {
            ty: Some(pointer_type),
            kind: ValueKind::Function(FunctionDecl {
                name,
                is_prototype,
                attribs_id,
            }),
            is_undefined: false,
        })?;
        Ok(true)
    }

    /// Declare a global variable. Only scalars and arrays of scalars in the
    /// default address space are supported; they become indexable temps.
    fn declare_global(&mut self, record: &Record) -> Result<bool> {
        if !self.validate_operand_count(record, 6, 13) {
            return Ok(false);
        }
        let ops = &record.operands;
        let index = self.values.len();

        let Some(declared) = self.get_type(ops[0]) else {
            return Ok(false);
        };
        let flags = ops[1];
        let is_constant = flags & GLOBALVAR_FLAG_IS_CONSTANT != 0;

        let (value_type, pointer_type, addr_space) = if flags & GLOBALVAR_FLAG_EXPLICIT_TYPE != 0 {
            let addr_space = flags >> GLOBALVAR_ADDRESS_SPACE_SHIFT;
            let Some(pointer_type) = self.types.pointer_to(declared, addr_space) else {
                warn!("Failed to get pointer type for global {index}.");
                self.error(
                    DiagnosticCode::DxilInvalidOperand,
                    format!(
                        "Failed to get a pointer type for global variable {index} in address space {addr_space}."
                    ),
                );
                return Ok(false);
            };
            (declared, pointer_type, addr_space)
        } else {
            let Some(pointee) = self.types.pointee(declared) else {
                warn!("Global variable type {:?} is not a pointer.", self.types.get(declared));
                self.error(
                    DiagnosticCode::DxilInvalidOperand,
                    format!("Non-pointer type for global variable {index} is invalid."),
                );
                return Ok(false);
            };
            let addr_space = self.types.address_space(declared).unwrap_or_default();
            (pointee, declared, addr_space)
        };

        let (scalar_type, count) = if self.types.is_array(value_type) {
            let element = self.types.element_type(value_type);
            if !self.types.is_scalar(element) {
                warn!("Unsupported nested type for global {index}.");
                self.error(
                    DiagnosticCode::DxilInvalidOperand,
                    format!("Global array variable {index} of non-scalar elements is not supported."),
                );
                return Ok(false);
            }
            let count = match self.types.get(value_type) {
                TypeKind::Array { count, .. } => *count,
                _ => 1,
            };
            (element, count)
        } else if self.types.is_scalar(value_type) {
            (value_type, 1)
        } else {
            warn!("Unsupported type {:?} for global {index}.", self.types.get(value_type));
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                format!("Global variable {index} of a non-scalar, non-array type is not supported."),
            );
            return Ok(false);
        };

        let init = ops[2];
        if init > u64::from(u32::MAX) {
            warn!("Invalid initialiser index {init}.");
        }
        if ops[3] != 0 {
            warn!("Ignoring linkage {:#x}.", ops[3]);
        }
        let alignment = decode_alignment(ops[4]).unwrap_or_else(|| {
            warn!("Invalid alignment {}.", ops[4]);
            0
        });
        if ops[5] != 0 {
            warn!("Ignoring section code {}.", ops[5]);
        }
        if self.symbols.name(index as u64).is_none() {
            warn!("Missing symbol name for global variable {index}.");
        }
        for (name, &operand) in GLOBALVAR_IGNORED_OPERANDS.iter().zip(ops.iter().skip(6)) {
            if operand != 0 {
                warn!("Ignoring {name} {operand:#x}.");
            }
        }

        if is_constant && init == 0 {
            warn!("Constant global {index} has no initialiser.");
            self.error(
                DiagnosticCode::DxilInvalidOperand,
                format!("Constant global variable {index} has no initialiser."),
            );
            return Ok(false);
        }

        match AddressSpace::try_from(addr_space) {
            Ok(AddressSpace::Default) => {}
            Ok(AddressSpace::GroupShared) => {
                warn!("Unsupported TGSM global {index}.");
                self.error(
                    DiagnosticCode::DxilNotImplemented,
                    "Thread group shared memory global variables are not supported.",
                );
                return Ok(false);
            }
            _ => {
                warn!("Unhandled address space {addr_space}.");
                self.error(
                    DiagnosticCode::DxilInvalidOperand,
                    format!("Global variable address space {addr_space} is not supported."),
                );
                return Ok(false);
            }
        }

        let reg = self.declare_indexable_temp(scalar_type, count, alignment, is_constant, init);
        self.push_value(Value {
            ty: Some(pointer_type),
            kind: ValueKind::Register(reg),
            is_undefined: false,
        })?;
        Ok(true)
    }

    /// Emit a `dcl_indexableTemp` and return the register naming it. The
    /// initialiser is resolved once the module constants are loaded.
    fn declare_indexable_temp(
        &mut self,
        element: TypeId,
        count: u32,
        alignment: u32,
        has_function_scope: bool,
        init: u64,
    ) -> Register {
        let data_type = self.types.data_type(element);
        let register_idx = self.indexable_temp_count;
        self.indexable_temp_count += 1;

        let declaration = Declaration::IndexableTemp(IndexableTemp {
            register_idx,
            register_size: count,
            alignment,
            data_type,
            component_count: 1,
            has_function_scope,
            initialiser: None,
        });
        if init != 0 {
            self.global_initialisers.push((self.instructions.len(), init - 1));
        }
        self.instructions.push(Instruction::declaration(
            Opcode::DclIndexableTemp,
            self.location.clone(),
            declaration,
        ));

        let mut reg = Register::new(RegisterType::IdxTemp, data_type, 1);
        reg.idx[0].offset = register_idx;
        reg
    }

    /// Point each pending indexable temp declaration at its immediate
    /// constant buffer. Undef initialisers are dropped.
    fn resolve_global_initialisers(&mut self) {
        for (instruction, value_index) in std::mem::take(&mut self.global_initialisers) {
            let initialiser = match self.value_at(value_index) {
                Some(value) if value.icb().is_some() => value.icb(),
                Some(value) if value.is_undef() => None,
                _ => {
                    warn!("Invalid initialiser index {value_index}.");
                    self.error(
                        DiagnosticCode::DxilInvalidOperand,
                        format!("Global variable initialiser value index {value_index} is invalid."),
                    );
                    continue;
                }
            };
            if let Some(Declaration::IndexableTemp(temp)) =
                self.instructions[instruction].declaration.as_mut()
            {
                temp.initialiser = initialiser;
            }
        }
    }
}
