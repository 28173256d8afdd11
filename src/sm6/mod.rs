//! Shader model 6 parser: DXIL bitcode to a [`Program`].
//!
//! The block tree is decoded in passes over one parser state: the type
//! table, the value symbol table, module records and constants, metadata,
//! entry point and resources, and finally the function body.

use std::sync::Arc;

use log::{debug, trace, warn};

use crate::bitcode::{BITCODE_MAGIC, Bitcode, Block, HeaderError, ProgramHeader, Record};
use crate::config::{CompileInfo, SourceType};
use crate::diagnostics::{DiagnosticCode, Error, Location, MessageContext};
use crate::dxbc;
use crate::read;
use crate::schema::blocks::BlockId;
use crate::vsir::{
    DescriptorInfo, DstParam, ImmediateConstantBuffer, Instruction, NormalisationLevel, Opcode,
    Program, ShaderType, ShaderVersion, Signature,
};

mod constants;
mod function;
mod globals;
mod intrinsics;
mod metadata;
mod properties;
mod resources;
mod signature;
mod symtab;
mod types;
mod values;

pub use self::intrinsics::DxIntrinsicOpcode;
pub use self::properties::{MAX_THREAD_GROUP_SIZE, global_flags_from_dxil};
pub use self::values::decode_rotated_signed_value;

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

/// First child of `root` with block id `id`, and whether it is the only one.
pub(crate) fn first_child(root: &Block, id: BlockId) -> Option<(&Block, bool)> {
    let mut blocks = root.children(id as u32);
    let first = blocks.next()?;
    Some((first, blocks.next().is_none()))
}

pub(crate) struct Sm6Parser<'a> {
    context: &'a mut MessageContext,
    /// Block id and record index of the record being decoded.
    pub(crate) location: Location,
    /// Set by every error diagnostic; the parse fails at the end.
    failed: bool,
    shader_version: ShaderVersion,

    types: types::TypeTable,
    symbols: symtab::SymbolTable,
    values: Vec<values::Value>,
    /// Upper bound of valid value indices in the current scope.
    cur_max_value: usize,
    value_capacity: usize,
    metadata: Vec<metadata::MetadataTable>,
    functions: Vec<function::Function>,
    function_count: usize,

    descriptors: Vec<DescriptorInfo>,
    icbs: Vec<ImmediateConstantBuffer>,
    /// Module-level declarations in emission order.
    instructions: Vec<Instruction>,
    input_params: Vec<DstParam>,
    output_params: Vec<DstParam>,
    input_signature: Signature,
    output_signature: Signature,
    ssa_next_id: u32,
    indexable_temp_count: u32,
    /// Indexable temp declarations waiting for their initialiser, as
    /// (instruction index, value index) pairs.
    global_initialisers: Vec<(usize, u64)>,
    entry_point: String,
}

impl<'a> Sm6Parser<'a> {
    fn new(context: &'a mut MessageContext, location: Location, shader_version: ShaderVersion) -> Self {
        Self {
            context,
            location,
            failed: false,
            shader_version,
            types: types::TypeTable::default(),
            symbols: symtab::SymbolTable::default(),
            values: Vec::new(),
            cur_max_value: 0,
            value_capacity: 0,
            metadata: Vec::new(),
            functions: Vec::new(),
            function_count: 0,
            descriptors: Vec::new(),
            icbs: Vec::new(),
            instructions: Vec::new(),
            input_params: Vec::new(),
            output_params: Vec::new(),
            input_signature: Signature::default(),
            output_signature: Signature::default(),
            ssa_next_id: 0,
            indexable_temp_count: 0,
            global_initialisers: Vec::new(),
            entry_point: String::new(),
        }
    }

    pub(crate) fn error(&mut self, code: DiagnosticCode, message: impl Into<String>) {
        self.context.error(&self.location, code, message);
        self.failed = true;
    }

    pub(crate) fn warning(&mut self, code: DiagnosticCode, message: impl Into<String>) {
        self.context.warning(&self.location, code, message);
    }

    pub(crate) fn validate_operand_min_count(&mut self, record: &Record, min_count: usize) -> bool {
        if record.operands.len() < min_count {
            warn!(
                "Invalid operand count {} for code {}; expected at least {min_count}.",
                record.operands.len(),
                record.code
            );
            self.error(
                DiagnosticCode::DxilInvalidOperandCount,
                format!(
                    "Invalid operand count {} (expected at least {min_count}).",
                    record.operands.len()
                ),
            );
            return false;
        }
        true
    }

    pub(crate) fn validate_operand_max_count(&mut self, record: &Record, max_count: usize) {
        if record.operands.len() > max_count {
            warn!(
                "Ignoring {} operands for code {}.",
                record.operands.len() - max_count,
                record.code
            );
            self.warning(
                DiagnosticCode::DxilIgnoringOperands,
                format!("Ignoring {} operands.", record.operands.len() - max_count),
            );
        }
    }

    /// Fewer than `min_count` operands is an error, more than `max_count` a
    /// warning.
    pub(crate) fn validate_operand_count(&mut self, record: &Record, min_count: usize, max_count: usize) -> bool {
        if !self.validate_operand_min_count(record, min_count) {
            return false;
        }
        self.validate_operand_max_count(record, max_count);
        true
    }

    /// Report a failed top-level pass at the start of the module.
    fn pass_error(&mut self, error: Error, out_of_memory: &str, code: DiagnosticCode, message: &str) -> Error {
        let location = Location::new(self.location.source_name.clone());
        match error {
            Error::OutOfMemory => self
                .context
                .error(&location, DiagnosticCode::DxilOutOfMemory, out_of_memory),
            Error::InvalidShader => self.context.error(&location, code, message),
            _ => {}
        }
        self.failed = true;
        error
    }

    /// Decode function bodies and their local constants. Module-level
    /// constants were loaded with the globals.
    fn module_init(&mut self, block: &Block, level: u32) -> Result<()> {
        let old_value_count = self.values.len();

        for child in &block.blocks {
            self.module_init(child, level + 1)?;
        }

        self.location.line = block.id;
        self.location.column = 0;

        match BlockId::try_from(block.id) {
            Ok(BlockId::Constants) if level >= 2 => {
                self.cur_max_value = self
                    .functions
                    .get(self.function_count)
                    .map_or(self.values.len(), |function| function.value_count);
                self.constants_init(block)?;
            }
            Ok(BlockId::Function) => {
                self.function_init(block)?;
                // Function-local values go out of scope.
                self.values.truncate(old_value_count);
            }
            Ok(_) => {}
            Err(_) => debug!("Unhandled block id {}.", block.id),
        }
        Ok(())
    }

    fn parse_module(&mut self, bitcode: &Bitcode) -> Result<()> {
        let root = &bitcode.root;

        let length = bitcode.end_position.saturating_sub(root.start);
        if length != root.length as usize {
            warn!("Invalid block length {length}; expected {}.", root.length);
            self.warning(
                DiagnosticCode::DxilInvalidBlockLength,
                format!(
                    "Root block ends with length {length} but indicated length is {}.",
                    root.length
                ),
            );
        }
        if bitcode.end_position != bitcode.word_count {
            warn!(
                "Invalid module length {}; expected {}.",
                bitcode.end_position, bitcode.word_count
            );
            self.warning(
                DiagnosticCode::DxilInvalidModuleLength,
                format!(
                    "Module ends with length {} but indicated length is {}.",
                    bitcode.end_position, bitcode.word_count
                ),
            );
        }

        self.type_table_init(root).map_err(|e| {
            self.pass_error(
                e,
                "Out of memory parsing DXIL type table.",
                DiagnosticCode::DxilInvalidTypeTable,
                "DXIL type table is invalid.",
            )
        })?;
        self.symtab_init(root).map_err(|e| {
            self.pass_error(
                e,
                "Out of memory parsing DXIL value symbol table.",
                DiagnosticCode::DxilInvalidValueSymtab,
                "DXIL value symbol table is invalid.",
            )
        })?;

        let Some(value_count) = self.compute_max_value_count(root, 0) else {
            warn!("Value array count overflowed.");
            let location = Location::new(self.location.source_name.clone());
            self.context.error(
                &location,
                DiagnosticCode::DxilInvalidModule,
                "Overflow occurred in the DXIL module value count.",
            );
            return Err(Error::InvalidShader);
        };
        self.value_capacity = self.value_capacity.max(value_count);
        if self.values.try_reserve_exact(self.value_capacity).is_err() {
            let location = Location::new(self.location.source_name.clone());
            self.context.error(
                &location,
                DiagnosticCode::DxilOutOfMemory,
                "Out of memory allocating DXIL value array.",
            );
            return Err(Error::OutOfMemory);
        }
        // Module-scope references may reach any declared value.
        self.cur_max_value = self.value_capacity;

        if let Err(e) = self.globals_init(root) {
            warn!("Failed to load global declarations.");
            return Err(e);
        }
        self.metadata_tables_init(root)?;
        self.entry_point_init()?;
        self.resources_init()?;

        self.module_init(root, 0).map_err(|e| {
            self.pass_error(
                e,
                "Out of memory parsing DXIL module.",
                DiagnosticCode::DxilInvalidModule,
                "DXIL module is invalid.",
            )
        })?;

        self.emit_signature(false);
        self.emit_signature(true);
        Ok(())
    }

    fn into_program(self) -> Program {
        let mut instructions = self.instructions;
        for function in self.functions {
            instructions.extend(function.instructions);
        }
        instructions.push(Instruction::new(Opcode::Ret, self.location));

        Program {
            shader_version: self.shader_version,
            instructions,
            input_signature: self.input_signature,
            output_signature: self.output_signature,
            descriptors: self.descriptors,
            icbs: self.icbs,
            ssa_count: self.ssa_next_id,
            indexable_temp_count: self.indexable_temp_count,
            entry_point: self.entry_point,
            normalisation_level: NormalisationLevel::Sm6,
            has_descriptor_info: true,
        }
    }
}

fn header_error_code(error: &HeaderError) -> DiagnosticCode {
    match error {
        HeaderError::TooSmall(_) => DiagnosticCode::DxilInvalidSize,
        HeaderError::InvalidTokenCount { .. } | HeaderError::InvalidChunkSize { .. } => {
            DiagnosticCode::DxilInvalidChunkSize
        }
        HeaderError::InvalidChunkOffset { .. } => DiagnosticCode::DxilInvalidChunkOffset,
    }
}

/// Parse a DXIL program into a [`Program`].
///
/// Diagnostics go to `context`, located at the current block id and record
/// index. Decoding continues past most errors so that one call reports as
/// many of them as possible; any error makes the result
/// [`Error::InvalidShader`].
pub fn parse_dxil(info: &CompileInfo<'_>, context: &mut MessageContext) -> std::result::Result<Program, Error> {
    let location = Location::new(Arc::from(info.source_name()));

    let source = match info.source_type {
        SourceType::DxilChunk => info.source,
        SourceType::Dxbc => match dxbc::extract_dxil(info.source) {
            Ok(chunk) => chunk,
            Err(e) => {
                context.error(&location, e.code(), e.to_string());
                return Err(Error::InvalidArgument);
            }
        },
    };

    let (header, bitcode) = match ProgramHeader::parse(source) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("{e}");
            context.error(&location, header_error_code(&e), e.to_string());
            return Err(Error::InvalidShader);
        }
    };

    let shader_type = ShaderType::from(header.shader_type());
    let shader_version = ShaderVersion {
        shader_type,
        major: header.major(),
        minor: header.minor(),
    };
    trace!("Shader version {shader_version:?}.");

    let mut parser = Sm6Parser::new(context, location.clone(), shader_version);

    let magic = u32::from_le_bytes([bitcode[0], bitcode[1], bitcode[2], bitcode[3]]);
    if magic != BITCODE_MAGIC {
        warn!("Unknown magic number {magic:#010x}.");
        parser.warning(
            DiagnosticCode::DxilUnknownMagicNumber,
            format!(
                "DXIL bitcode chunk magic number {magic:#010x} is not the expected {BITCODE_MAGIC:#010x}."
            ),
        );
    }
    if let ShaderType::Unknown(ty) = shader_type {
        warn!("Unknown shader type {ty:#x}.");
        parser.warning(
            DiagnosticCode::DxilUnknownShaderType,
            format!("Unknown shader type {ty:#x}."),
        );
    }

    let bitcode = match Bitcode::new(bitcode) {
        Ok(bitcode) => bitcode,
        Err(e) => {
            warn!("Failed to read bitcode: {e}.");
            let (code, message, error) = match e {
                read::Error::OutOfMemory => (
                    DiagnosticCode::DxilOutOfMemory,
                    "Out of memory parsing DXIL bitcode chunk.".to_string(),
                    Error::OutOfMemory,
                ),
                read::Error::InvalidInitialAbbrev(abbrev) => (
                    DiagnosticCode::DxilInvalidBitcode,
                    format!("DXIL bitcode chunk has invalid initial block abbreviation {abbrev}."),
                    Error::InvalidShader,
                ),
                _ => (
                    DiagnosticCode::DxilInvalidBitcode,
                    "DXIL bitcode chunk has invalid bitcode.".to_string(),
                    Error::InvalidShader,
                ),
            };
            parser.context.error(&location, code, message);
            return Err(error);
        }
    };

    parser.parse_module(&bitcode)?;
    if parser.failed {
        debug!("Parse failed after {} diagnostics.", parser.context.diagnostics().len());
        return Err(Error::InvalidShader);
    }
    Ok(parser.into_program())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(id: u32, blocks: Vec<Block>) -> Block {
        Block {
            id,
            abbrev_width: 2,
            start: 0,
            length: 0,
            level: 0,
            records: Vec::new(),
            blocks,
        }
    }

    #[test]
    fn first_child_reports_uniqueness() {
        let root = block(
            BlockId::Module as u32,
            vec![
                block(BlockId::Type as u32, vec![]),
                block(BlockId::Constants as u32, vec![]),
                block(BlockId::Constants as u32, vec![]),
            ],
        );
        assert!(matches!(first_child(&root, BlockId::Type), Some((_, true))));
        assert!(matches!(first_child(&root, BlockId::Constants), Some((_, false))));
        assert!(first_child(&root, BlockId::Metadata).is_none());
    }

    #[test]
    fn errors_mark_the_parse_failed() {
        let mut context = MessageContext::new();
        let version = ShaderVersion {
            shader_type: ShaderType::Compute,
            major: 6,
            minor: 0,
        };
        let mut parser = Sm6Parser::new(&mut context, Location::new(Arc::from("test")), version);
        let record = Record::new(1, vec![1, 2, 3]);

        assert!(parser.validate_operand_count(&record, 1, 2));
        assert!(!parser.failed);
        assert!(!parser.validate_operand_min_count(&record, 4));
        assert!(parser.failed);

        assert!(context.contains(DiagnosticCode::DxilIgnoringOperands));
        assert!(context.contains(DiagnosticCode::DxilInvalidOperandCount));
    }
}
