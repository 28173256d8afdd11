//! Vector shader IR: the instruction and register model produced by the
//! DXIL parser.

use bitflags::bitflags;
use num_enum::{FromPrimitive, TryFromPrimitive};

use crate::diagnostics::Location;

/// Number of components in a vector register.
pub const VEC4_SIZE: u32 = 4;
/// Maximum number of register indices.
pub const MAX_REG_INDICES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum ShaderType {
    Pixel = 0,
    Vertex = 1,
    Geometry = 2,
    Hull = 3,
    Domain = 4,
    Compute = 5,
    Library = 6,
    RayGeneration = 7,
    Intersection = 8,
    AnyHit = 9,
    ClosestHit = 10,
    Miss = 11,
    Callable = 12,
    Mesh = 13,
    Amplification = 14,
    #[num_enum(catch_all)]
    Unknown(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderVersion {
    pub shader_type: ShaderType,
    pub major: u32,
    pub minor: u32,
}

/// How far a program has been normalised. Programs from the DXIL parser are
/// always [`NormalisationLevel::Sm6`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NormalisationLevel {
    Sm4,
    Sm6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Add,
    And,
    DAdd,
    DclConstantBuffer,
    DclGlobalFlags,
    DclIndexableTemp,
    DclInput,
    DclInputPs,
    DclInputPsSiv,
    DclInputSiv,
    DclOutput,
    DclOutputSiv,
    DclThreadGroup,
    DDiv,
    DEq,
    DGe,
    Div,
    DLt,
    DMul,
    DNe,
    DToF,
    DToI,
    DToU,
    Eq,
    Frem,
    FToD,
    FToI,
    FToU,
    Ge,
    IAdd,
    IDiv,
    IEq,
    IGe,
    ILt,
    IMul,
    INe,
    IShl,
    IShr,
    IToD,
    IToF,
    IToI,
    Lt,
    Mov,
    Movc,
    Mul,
    Ne,
    Nop,
    Or,
    Ret,
    UDiv,
    UGe,
    ULt,
    UShr,
    UToD,
    UToF,
    UToU,
    Xor,
}

impl Opcode {
    /// Assembly mnemonic.
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Add => "add",
            And => "and",
            DAdd => "dadd",
            DclConstantBuffer => "dcl_constantBuffer",
            DclGlobalFlags => "dcl_globalFlags",
            DclIndexableTemp => "dcl_indexableTemp",
            DclInput => "dcl_input",
            DclInputPs => "dcl_input_ps",
            DclInputPsSiv => "dcl_input_ps_siv",
            DclInputSiv => "dcl_input_siv",
            DclOutput => "dcl_output",
            DclOutputSiv => "dcl_output_siv",
            DclThreadGroup => "dcl_thread_group",
            DDiv => "ddiv",
            DEq => "deq",
            DGe => "dge",
            Div => "div",
            DLt => "dlt",
            DMul => "dmul",
            DNe => "dne",
            DToF => "dtof",
            DToI => "dtoi",
            DToU => "dtou",
            Eq => "eq",
            Frem => "frem",
            FToD => "ftod",
            FToI => "ftoi",
            FToU => "ftou",
            Ge => "ge",
            IAdd => "iadd",
            IDiv => "idiv",
            IEq => "ieq",
            IGe => "ige",
            ILt => "ilt",
            IMul => "imul",
            INe => "ine",
            IShl => "ishl",
            IShr => "ishr",
            IToD => "itod",
            IToF => "itof",
            IToI => "itoi",
            Lt => "lt",
            Mov => "mov",
            Movc => "movc",
            Mul => "mul",
            Ne => "ne",
            Nop => "nop",
            Or => "or",
            Ret => "ret",
            UDiv => "udiv",
            UGe => "uge",
            ULt => "ult",
            UShr => "ushr",
            UToD => "utod",
            UToF => "utof",
            UToU => "utou",
            Xor => "xor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterType {
    Temp,
    Input,
    Output,
    ColorOut,
    ConstBuffer,
    ImmConst,
    ImmConst64,
    IdxTemp,
    Undef,
    Ssa,
    Null,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Float,
    Int,
    Uint,
    Bool,
    Double,
    Uint8,
    Uint16,
    Uint64,
    Half,
    Unused,
}

impl DataType {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int | Self::Uint | Self::Bool | Self::Uint8 | Self::Uint16 | Self::Uint64
        )
    }

    pub fn is_64_bit(self) -> bool {
        matches!(self, Self::Double | Self::Uint64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dimension {
    #[default]
    None,
    Scalar,
    Vec4,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegisterIndex {
    pub offset: u32,
    pub rel_addr: Option<Box<SrcParam>>,
    pub is_in_bounds: bool,
}

/// Immediate constant payload of an `ImmConst`/`ImmConst64` register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Immediate {
    U32([u32; 4]),
    U64([u64; 2]),
}

impl Default for Immediate {
    fn default() -> Self {
        Self::U32([0; 4])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Register {
    pub reg_type: RegisterType,
    pub data_type: DataType,
    pub idx: Vec<RegisterIndex>,
    pub dimension: Dimension,
    pub immconst: Immediate,
    /// Alignment hint in bytes; 0 when unknown.
    pub alignment: u32,
    pub non_uniform: bool,
}

impl Register {
    pub fn new(reg_type: RegisterType, data_type: DataType, idx_count: usize) -> Self {
        Self {
            reg_type,
            data_type,
            idx: vec![RegisterIndex::default(); idx_count.min(MAX_REG_INDICES)],
            dimension: Dimension::Scalar,
            immconst: Immediate::default(),
            alignment: 0,
            non_uniform: false,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.reg_type, RegisterType::ImmConst | RegisterType::ImmConst64)
    }

    /// First component of an integer immediate, or `None` if the register is
    /// not an integer constant.
    pub fn uint_value(&self) -> Option<u32> {
        if !self.is_constant() || !self.data_type.is_integer() {
            return None;
        }
        Some(match self.immconst {
            Immediate::U32(values) => values[0],
            Immediate::U64(values) => {
                if values[0] > u64::from(u32::MAX) {
                    log::debug!("Truncating 64-bit value {:#x}.", values[0]);
                }
                values[0] as u32
            }
        })
    }

    pub fn uint64_value(&self) -> Option<u64> {
        if !self.is_constant() || !self.data_type.is_integer() {
            return None;
        }
        Some(match self.immconst {
            Immediate::U32(values) => u64::from(values[0]),
            Immediate::U64(values) => values[0],
        })
    }

    pub fn idx_count(&self) -> usize {
        self.idx.len()
    }

    /// Set the index count, keeping existing offsets.
    pub fn set_idx_count(&mut self, count: usize) {
        self.idx.resize(count.min(MAX_REG_INDICES), RegisterIndex::default());
    }
}

/// A 4-component swizzle, one byte per component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Swizzle(pub u32);

impl Swizzle {
    pub const NONE: Swizzle = Swizzle::new(0, 1, 2, 3);
    pub const XXXX: Swizzle = Swizzle::broadcast(0);

    pub const fn new(x: u32, y: u32, z: u32, w: u32) -> Self {
        Self(x | (y << 8) | (z << 16) | (w << 24))
    }

    pub const fn broadcast(component: u32) -> Self {
        Self::new(component, component, component, component)
    }

    pub fn component(self, index: u32) -> u32 {
        (self.0 >> (index * 8)) & 0xff
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SrcModifier {
    #[default]
    None,
    Neg,
    Abs,
    AbsNeg,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SrcParam {
    pub reg: Register,
    pub swizzle: Swizzle,
    pub modifiers: SrcModifier,
}

impl SrcParam {
    /// Source reading `reg`, with a full swizzle for vector registers and a
    /// broadcast of `x` otherwise.
    pub fn new(reg: Register) -> Self {
        let swizzle = match reg.dimension {
            Dimension::Vec4 => Swizzle::NONE,
            Dimension::None | Dimension::Scalar => Swizzle::XXXX,
        };
        Self {
            reg,
            swizzle,
            modifiers: SrcModifier::None,
        }
    }
}

bitflags! {
    /// Components written by a destination operand.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WriteMask: u32 {
        const X = 1 << 0;
        const Y = 1 << 1;
        const Z = 1 << 2;
        const W = 1 << 3;
        const ALL = Self::X.bits() | Self::Y.bits() | Self::Z.bits() | Self::W.bits();
    }
}

impl WriteMask {
    /// Mask with only `component` set.
    pub fn from_component(component: u32) -> Self {
        Self::from_bits_truncate(1 << component.min(VEC4_SIZE - 1))
    }

    /// Mask of `count` components starting at `first`.
    pub fn from_range(first: u32, count: u32) -> Self {
        let end = first.saturating_add(count).min(VEC4_SIZE);
        let bits = (first.min(VEC4_SIZE)..end).fold(0, |bits, i| bits | (1 << i));
        Self::from_bits_truncate(bits)
    }

    pub fn component_count(self) -> u32 {
        self.bits().count_ones()
    }

    /// Index of the lowest set component.
    pub fn first_component(self) -> Option<u32> {
        (!self.is_empty()).then(|| self.bits().trailing_zeros())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DstParam {
    pub reg: Register,
    pub write_mask: WriteMask,
}

impl DstParam {
    pub fn new(reg: Register, write_mask: WriteMask) -> Self {
        Self { reg, write_mask }
    }

    pub fn scalar(reg: Register, component: u32) -> Self {
        Self::new(reg, WriteMask::from_component(component))
    }
}

bitflags! {
    /// Instruction modifier flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstructionFlags: u32 {
        const PRECISE_X = 0x100;
        const PRECISE_Y = 0x200;
        const PRECISE_Z = 0x400;
        const PRECISE_W = 0x800;
        const PRECISE_XYZW = 0xf00;
    }
}

bitflags! {
    /// Operand of `dcl_globalFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GlobalFlags: u64 {
        const REFACTORING_ALLOWED = 0x1;
        const ENABLE_DOUBLE_PRECISION_FLOAT_OPS = 0x2;
        const FORCE_EARLY_DEPTH_STENCIL = 0x4;
        const ENABLE_RAW_AND_STRUCTURED_BUFFERS = 0x8;
        const SKIP_OPTIMIZATION = 0x10;
        const ENABLE_MINIMUM_PRECISION = 0x20;
        const ENABLE_11_1_DOUBLE_EXTENSIONS = 0x40;
        const ENABLE_11_1_SHADER_EXTENSIONS = 0x80;
        const _ = !0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u32)]
pub enum InterpolationMode {
    #[default]
    None = 0,
    Constant = 1,
    Linear = 2,
    LinearCentroid = 3,
    LinearNoPerspective = 4,
    LinearNoPerspectiveCentroid = 5,
    LinearSample = 6,
    LinearNoPerspectiveSample = 7,
}

/// System value semantics of signature elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SysVal {
    #[default]
    None,
    Position,
    ClipDistance,
    CullDistance,
    RenderTargetArrayIndex,
    ViewportArrayIndex,
    VertexId,
    PrimitiveId,
    InstanceId,
    IsFrontFace,
    SampleIndex,
    Target,
    Depth,
    Coverage,
    DepthGreaterEqual,
    DepthLessEqual,
    StencilRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComponentType {
    #[default]
    Void,
    Uint,
    Int,
    Float,
    Bool,
    Double,
    Uint64,
}

impl ComponentType {
    pub fn data_type(self) -> DataType {
        match self {
            Self::Void => DataType::Unused,
            Self::Uint => DataType::Uint,
            Self::Int => DataType::Int,
            Self::Float => DataType::Float,
            Self::Bool => DataType::Bool,
            Self::Double => DataType::Double,
            Self::Uint64 => DataType::Uint64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MinPrecision {
    #[default]
    None,
    Float16,
    Float10,
    Int16,
    Uint16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignatureElement {
    pub semantic_name: String,
    pub semantic_index: u32,
    pub stream_index: u32,
    pub sysval: SysVal,
    pub component_type: ComponentType,
    pub min_precision: MinPrecision,
    pub interpolation_mode: InterpolationMode,
    pub register_index: u32,
    pub register_count: u32,
    pub mask: WriteMask,
    pub used_mask: WriteMask,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub elements: Vec<SignatureElement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
pub enum DescriptorType {
    Srv = 0,
    Uav = 1,
    Cbv = 2,
    Sampler = 3,
}

/// Registers `first..=last` in `space`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRange {
    pub space: u32,
    pub first: u32,
    pub last: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorInfo {
    pub descriptor_type: DescriptorType,
    pub register_id: u32,
    pub range: RegisterRange,
    pub buffer_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcbData {
    Words(Vec<u32>),
    Quads(Vec<u64>),
}

/// Constant array data referenced by an indexable temp initialiser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmediateConstantBuffer {
    pub register_idx: u32,
    pub data_type: DataType,
    pub component_count: u32,
    pub element_count: u32,
    pub data: IcbData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexableTemp {
    pub register_idx: u32,
    pub register_size: u32,
    pub alignment: u32,
    pub data_type: DataType,
    pub component_count: u32,
    pub has_function_scope: bool,
    /// Index into [`Program::icbs`].
    pub initialiser: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    GlobalFlags(GlobalFlags),
    ThreadGroupSize {
        x: u32,
        y: u32,
        z: u32,
    },
    ConstantBuffer {
        src: SrcParam,
        size: u32,
        range: RegisterRange,
    },
    IndexableTemp(IndexableTemp),
    Register {
        dst: DstParam,
        interpolation_mode: Option<InterpolationMode>,
    },
    RegisterSemantic {
        dst: DstParam,
        sysval: SysVal,
        interpolation_mode: Option<InterpolationMode>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub location: Location,
    pub flags: InstructionFlags,
    pub dst: Vec<DstParam>,
    pub src: Vec<SrcParam>,
    pub declaration: Option<Declaration>,
}

impl Instruction {
    pub fn new(opcode: Opcode, location: Location) -> Self {
        Self {
            opcode,
            location,
            flags: InstructionFlags::empty(),
            dst: Vec::new(),
            src: Vec::new(),
            declaration: None,
        }
    }

    pub fn declaration(opcode: Opcode, location: Location, declaration: Declaration) -> Self {
        Self {
            declaration: Some(declaration),
            ..Self::new(opcode, location)
        }
    }

    pub fn is_nop(&self) -> bool {
        self.opcode == Opcode::Nop
    }
}

/// A parsed shader.
#[derive(Debug, Clone)]
pub struct Program {
    pub shader_version: ShaderVersion,
    pub instructions: Vec<Instruction>,
    pub input_signature: Signature,
    pub output_signature: Signature,
    pub descriptors: Vec<DescriptorInfo>,
    pub icbs: Vec<ImmediateConstantBuffer>,
    pub ssa_count: u32,
    pub indexable_temp_count: u32,
    pub entry_point: String,
    pub normalisation_level: NormalisationLevel,
    pub has_descriptor_info: bool,
}

impl Program {
    /// Instructions with the given opcode.
    pub fn instructions_with(&self, opcode: Opcode) -> impl Iterator<Item = &Instruction> {
        self.instructions
            .iter()
            .filter(move |instruction| instruction.opcode == opcode)
    }
}
