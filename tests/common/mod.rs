#![allow(dead_code)]

//! Bitstream writer and DXIL module builder for the integration tests.

use dxil_sm6::bitcode::{BITCODE_MAGIC, DXIL_MAGIC};
use dxil_sm6::schema::blocks::{
    BlockId, ConstantsCode, FunctionCode, MetadataCode, ModuleCode, TypeCode, ValueSymtabCode,
};

/// Abbreviation operand encodings, as written in DEFINE_ABBREV.
#[derive(Debug, Clone, Copy)]
pub enum AbbrevOp {
    Literal(u64),
    Fixed(u32),
    Vbr(u32),
    Array,
    Char6,
    Blob,
}

/// Writes an LLVM bitstream into little-endian words.
#[derive(Debug, Default)]
pub struct BitWriter {
    words: Vec<u32>,
    bit: usize,
    /// Abbreviation width and length word index of each open block.
    blocks: Vec<(u32, usize)>,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, value: u64, width: u32) {
        for i in 0..width {
            let word = self.bit / 32;
            if word == self.words.len() {
                self.words.push(0);
            }
            if (value >> i) & 1 != 0 {
                self.words[word] |= 1 << (self.bit % 32);
            }
            self.bit += 1;
        }
    }

    pub fn write_vbr(&mut self, mut value: u64, width: u32) {
        let flag = 1u64 << (width - 1);
        while value >= flag {
            self.write((value & (flag - 1)) | flag, width);
            value >>= width - 1;
        }
        self.write(value, width);
    }

    pub fn write_char6(&mut self, c: u8) {
        let value = match c {
            b'a'..=b'z' => c - b'a',
            b'A'..=b'Z' => c - b'A' + 26,
            b'0'..=b'9' => c - b'0' + 52,
            b'.' => 62,
            b'_' => 63,
            _ => panic!("{c} is not a char6 character"),
        };
        self.write(u64::from(value), 6);
    }

    pub fn align_32(&mut self) {
        self.bit = self.bit.div_ceil(32) * 32;
        while self.words.len() < self.bit / 32 {
            self.words.push(0);
        }
    }

    pub fn word(&mut self, value: u32) {
        self.align_32();
        self.words.push(value);
        self.bit += 32;
    }

    fn abbrev_width(&self) -> u32 {
        self.blocks.last().map_or(2, |&(width, _)| width)
    }

    /// Write an abbreviation id at the current block's width.
    pub fn abbrev_id(&mut self, id: u64) {
        let width = self.abbrev_width();
        self.write(id, width);
    }

    pub fn enter_block(&mut self, id: u32, abbrev_width: u32) {
        self.abbrev_id(1);
        self.write_vbr(u64::from(id), 8);
        self.write_vbr(u64::from(abbrev_width), 4);
        self.word(0);
        self.blocks.push((abbrev_width, self.words.len() - 1));
    }

    pub fn end_block(&mut self) {
        self.abbrev_id(0);
        self.align_32();
        let (_, length_index) = self.blocks.pop().expect("no open block");
        self.words[length_index] = (self.words.len() - length_index - 1) as u32;
    }

    /// An UNABBREV_RECORD.
    pub fn record(&mut self, code: u32, operands: &[u64]) {
        self.abbrev_id(3);
        self.write_vbr(u64::from(code), 6);
        self.write_vbr(operands.len() as u64, 6);
        for &operand in operands {
            self.write_vbr(operand, 6);
        }
    }

    pub fn define_abbrev(&mut self, ops: &[AbbrevOp]) {
        self.abbrev_id(2);
        self.write_vbr(ops.len() as u64, 5);
        for op in ops {
            match *op {
                AbbrevOp::Literal(value) => {
                    self.write(1, 1);
                    self.write_vbr(value, 8);
                }
                AbbrevOp::Fixed(width) => {
                    self.write(0, 1);
                    self.write(1, 3);
                    self.write_vbr(u64::from(width), 5);
                }
                AbbrevOp::Vbr(width) => {
                    self.write(0, 1);
                    self.write(2, 3);
                    self.write_vbr(u64::from(width), 5);
                }
                AbbrevOp::Array => {
                    self.write(0, 1);
                    self.write(3, 3);
                }
                AbbrevOp::Char6 => {
                    self.write(0, 1);
                    self.write(4, 3);
                }
                AbbrevOp::Blob => {
                    self.write(0, 1);
                    self.write(5, 3);
                }
            }
        }
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.words.iter().flat_map(|word| word.to_le_bytes()).collect()
    }
}

/// A bitstream of one MODULE block holding `body`, preceded by the magic.
pub fn bitcode(body: impl FnOnce(&mut BitWriter)) -> Vec<u8> {
    let mut writer = BitWriter::new();
    writer.word(BITCODE_MAGIC);
    writer.enter_block(BlockId::Module as u32, 3);
    body(&mut writer);
    writer.end_block();
    writer.into_bytes()
}

/// Wrap bitcode in a DXIL program header.
pub fn dxil_chunk(shader_type: u32, major: u32, minor: u32, bitcode: &[u8]) -> Vec<u8> {
    const HEADER_SIZE: usize = 24;
    let token_count = (HEADER_SIZE + bitcode.len()).div_ceil(4) as u32;
    let version_token = (shader_type << 16) | (major << 4) | minor;

    let mut chunk = Vec::new();
    for word in [version_token, token_count, DXIL_MAGIC, 0x100, 16, bitcode.len() as u32] {
        chunk.extend_from_slice(&word.to_le_bytes());
    }
    chunk.extend_from_slice(bitcode);
    chunk
}

/// Wrap a DXIL chunk in a DXBC container next to an unrelated chunk.
pub fn dxbc_container(dxil: &[u8]) -> Vec<u8> {
    let chunks: [(&[u8; 4], &[u8]); 2] = [(b"SFI0", &[0; 8]), (b"DXIL", dxil)];
    let mut out = Vec::new();
    out.extend_from_slice(b"DXBC");
    out.extend_from_slice(&[0; 16]);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(chunks.len() as u32).to_le_bytes());
    let table = out.len();
    out.resize(table + 4 * chunks.len(), 0);
    for (i, (fourcc, data)) in chunks.iter().enumerate() {
        let offset = out.len() as u32;
        out[table + 4 * i..table + 4 * i + 4].copy_from_slice(&offset.to_le_bytes());
        out.extend_from_slice(*fourcc);
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
    }
    let size = out.len() as u32;
    out[24..28].copy_from_slice(&size.to_le_bytes());
    out
}

pub const SHADER_PIXEL: u32 = 0;
pub const SHADER_VERTEX: u32 = 1;
pub const SHADER_COMPUTE: u32 = 5;

/// Rotated signed encoding of a non-negative integer constant.
pub fn rotated(value: u64) -> u64 {
    value << 1
}

fn string_operands(s: &str) -> impl Iterator<Item = u64> + '_ {
    s.bytes().map(u64::from)
}

type Records = Vec<(u32, Vec<u64>)>;

/// Assembles a DXIL module with one function body.
///
/// Value ids are absolute: declarations first, then module constants, then
/// function constants, then instruction results.
#[derive(Debug)]
pub struct ModuleBuilder {
    shader_type: u32,
    types: Records,
    type_count: u64,
    symbols: Vec<(u64, String)>,
    module: Records,
    declaration_count: u64,
    constants: Records,
    constant_count: u64,
    metadata: Records,
    slot_count: u64,
    function_constants: Records,
    function_constant_count: u64,
    body: Records,
    result_count: u64,
}

impl ModuleBuilder {
    pub fn new(shader_type: u32) -> Self {
        Self {
            shader_type,
            types: Vec::new(),
            type_count: 0,
            symbols: Vec::new(),
            module: vec![(ModuleCode::Version as u32, vec![1])],
            declaration_count: 0,
            constants: Vec::new(),
            constant_count: 0,
            metadata: Vec::new(),
            slot_count: 0,
            function_constants: Vec::new(),
            function_constant_count: 0,
            body: vec![(FunctionCode::DeclareBlocks as u32, vec![1])],
            result_count: 0,
        }
    }

    fn push_type(&mut self, code: TypeCode, operands: Vec<u64>) -> u64 {
        self.types.push((code as u32, operands));
        self.type_count += 1;
        self.type_count - 1
    }

    pub fn void(&mut self) -> u64 {
        self.push_type(TypeCode::Void, vec![])
    }

    pub fn int(&mut self, width: u64) -> u64 {
        self.push_type(TypeCode::Integer, vec![width])
    }

    pub fn float(&mut self) -> u64 {
        self.push_type(TypeCode::Float, vec![])
    }

    pub fn pointer(&mut self, pointee: u64) -> u64 {
        self.push_type(TypeCode::Pointer, vec![pointee, 0])
    }

    pub fn array(&mut self, count: u64, element: u64) -> u64 {
        self.push_type(TypeCode::Array, vec![count, element])
    }

    pub fn function_type(&mut self, ret: u64, params: &[u64]) -> u64 {
        let mut operands = vec![0, ret];
        operands.extend_from_slice(params);
        self.push_type(TypeCode::Function, operands)
    }

    pub fn named_struct(&mut self, name: &str, elements: &[u64]) -> u64 {
        self.types.push((TypeCode::StructName as u32, string_operands(name).collect()));
        let mut operands = vec![0];
        operands.extend_from_slice(elements);
        self.push_type(TypeCode::StructNamed, operands)
    }

    fn declare(&mut self, code: ModuleCode, operands: Vec<u64>, name: &str) -> u64 {
        assert_eq!(self.constant_count, 0, "declarations must precede constants");
        let id = self.declaration_count;
        self.module.push((code as u32, operands));
        self.symbols.push((id, name.to_string()));
        self.declaration_count += 1;
        id
    }

    /// Declare a function of type `ty`; a prototype has no body.
    pub fn function(&mut self, name: &str, ty: u64, is_prototype: bool) -> u64 {
        self.declare(
            ModuleCode::Function,
            vec![ty, 0, u64::from(is_prototype), 0, 0, 0, 0, 0],
            name,
        )
    }

    /// Declare a global variable of value type `ty` in the default address
    /// space.
    pub fn global(&mut self, name: &str, ty: u64, is_constant: bool, init: Option<u64>) -> u64 {
        let flags = 2 | u64::from(is_constant);
        let init = init.map_or(0, |value| value + 1);
        self.declare(ModuleCode::GlobalVar, vec![ty, flags, init, 0, 0, 0], name)
    }

    /// Add a value symbol table entry without declaring anything.
    pub fn symbol(&mut self, id: u64, name: &str) {
        self.symbols.push((id, name.to_string()));
    }

    /// Add module constants of type `ty`; returns their value ids.
    pub fn constants(&mut self, ty: u64, values: &[(ConstantsCode, Vec<u64>)]) -> Vec<u64> {
        assert!(self.function_constants.is_empty());
        self.constants.push((ConstantsCode::SetType as u32, vec![ty]));
        values
            .iter()
            .map(|(code, operands)| {
                self.constants.push((*code as u32, operands.clone()));
                self.constant_count += 1;
                self.declaration_count + self.constant_count - 1
            })
            .collect()
    }

    pub fn int_constants(&mut self, ty: u64, values: &[u64]) -> Vec<u64> {
        let values: Vec<_> = values
            .iter()
            .map(|&value| (ConstantsCode::Integer, vec![rotated(value)]))
            .collect();
        self.constants(ty, &values)
    }

    /// Add a function-local constant of type `ty`.
    pub fn function_constant(&mut self, ty: u64, code: ConstantsCode, operands: Vec<u64>) -> u64 {
        self.function_constants.push((ConstantsCode::SetType as u32, vec![ty]));
        self.function_constants.push((code as u32, operands));
        self.function_constant_count += 1;
        self.declaration_count + self.constant_count + self.function_constant_count - 1
    }

    /// The id the next function value will get.
    pub fn next_value(&self) -> u64 {
        self.declaration_count + self.constant_count + self.function_constant_count + self.result_count
    }

    /// Relative reference from the next instruction to `value`.
    pub fn rel(&self, value: u64) -> u64 {
        self.next_value() - value
    }

    /// Append a function body record. Records with a result get a value id,
    /// which is returned.
    pub fn instruction(&mut self, code: FunctionCode, operands: Vec<u64>, has_result: bool) -> Option<u64> {
        self.body.push((code as u32, operands));
        has_result.then(|| {
            self.result_count += 1;
            self.next_value() - 1
        })
    }

    pub fn set_block_count(&mut self, count: u64) {
        self.body[0].1 = vec![count];
    }

    fn push_slot(&mut self, code: MetadataCode, operands: Vec<u64>) -> u64 {
        self.metadata.push((code as u32, operands));
        self.slot_count += 1;
        self.slot_count - 1
    }

    pub fn md_string(&mut self, s: &str) -> u64 {
        self.push_slot(MetadataCode::String, string_operands(s).collect())
    }

    pub fn md_value(&mut self, ty: u64, value: u64) -> u64 {
        self.push_slot(MetadataCode::Value, vec![ty, value])
    }

    pub fn md_node(&mut self, operands: &[Option<u64>]) -> u64 {
        let operands = operands.iter().map(|slot| slot.map_or(0, |slot| slot + 1)).collect();
        self.push_slot(MetadataCode::Node, operands)
    }

    pub fn md_named(&mut self, name: &str, nodes: &[u64]) {
        self.metadata.push((MetadataCode::Name as u32, string_operands(name).collect()));
        self.metadata.push((MetadataCode::NamedNode as u32, nodes.to_vec()));
    }

    pub fn build_bitcode(&self) -> Vec<u8> {
        bitcode(|w| {
            w.enter_block(BlockId::Type as u32, 4);
            w.record(TypeCode::NumEntry as u32, &[self.type_count]);
            for (code, operands) in &self.types {
                w.record(*code, operands);
            }
            w.end_block();

            for (code, operands) in &self.module {
                w.record(*code, operands);
            }

            if !self.constants.is_empty() {
                w.enter_block(BlockId::Constants as u32, 4);
                for (code, operands) in &self.constants {
                    w.record(*code, operands);
                }
                w.end_block();
            }

            w.enter_block(BlockId::Metadata as u32, 4);
            for (code, operands) in &self.metadata {
                w.record(*code, operands);
            }
            w.end_block();

            w.enter_block(BlockId::Function as u32, 4);
            if !self.function_constants.is_empty() {
                w.enter_block(BlockId::Constants as u32, 4);
                for (code, operands) in &self.function_constants {
                    w.record(*code, operands);
                }
                w.end_block();
            }
            for (code, operands) in &self.body {
                w.record(*code, operands);
            }
            w.end_block();

            w.enter_block(BlockId::ValueSymtab as u32, 4);
            for (id, name) in &self.symbols {
                let mut operands = vec![*id];
                operands.extend(string_operands(name));
                w.record(ValueSymtabCode::Entry as u32, &operands);
            }
            w.end_block();
        })
    }

    pub fn build(&self) -> Vec<u8> {
        dxil_chunk(self.shader_type, 6, 0, &self.build_bitcode())
    }
}

/// Types and declarations shared by most test modules.
#[derive(Debug, Clone, Copy)]
pub struct Basics {
    pub void: u64,
    pub i1: u64,
    pub i8: u64,
    pub i32: u64,
    pub float: u64,
    pub main_type: u64,
    pub main_pointer: u64,
}

impl Basics {
    pub fn declare(builder: &mut ModuleBuilder) -> Self {
        let void = builder.void();
        let i1 = builder.int(1);
        let i8 = builder.int(8);
        let i32 = builder.int(32);
        let float = builder.float();
        let main_type = builder.function_type(void, &[]);
        let main_pointer = builder.pointer(main_type);
        Self {
            void,
            i1,
            i8,
            i32,
            float,
            main_type,
            main_pointer,
        }
    }
}

/// Emit `dx.entryPoints` for function value `main` with optional signature
/// and property nodes.
pub fn entry_point(
    builder: &mut ModuleBuilder,
    basics: &Basics,
    main: u64,
    signatures: Option<u64>,
    properties: Option<u64>,
) {
    entry_point_named(builder, basics, main, "main", signatures, properties);
}

/// Like [`entry_point`], with `name` as the entry point name in metadata.
pub fn entry_point_named(
    builder: &mut ModuleBuilder,
    basics: &Basics,
    main: u64,
    name: &str,
    signatures: Option<u64>,
    properties: Option<u64>,
) {
    let function = builder.md_value(basics.main_pointer, main);
    let name = builder.md_string(name);
    let entry = builder.md_node(&[Some(function), Some(name), signatures, None, properties]);
    builder.md_named("dx.entryPoints", &[entry]);
}

/// Module with an empty `main` and optional extra setup before the entry
/// point metadata is written.
pub fn minimal_module(shader_type: u32) -> (ModuleBuilder, Basics, u64) {
    let mut builder = ModuleBuilder::new(shader_type);
    let basics = Basics::declare(&mut builder);
    let main = builder.function("main", basics.main_type, false);
    (builder, basics, main)
}

pub fn ret(builder: &mut ModuleBuilder) {
    builder.instruction(FunctionCode::Ret, vec![], false);
}
