use num_enum::TryFromPrimitive;

/// Block identifiers used by DXIL bitcode.
#[derive(Hash, Eq, PartialEq, Debug, Clone, Copy, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum BlockId {
    /// Standard block holding abbreviations for other block ids.
    BlockInfo = 0,

    /// `MODULE` block identifier
    Module = 8,

    /// `PARAMATTR` block identifier
    ParamAttr = 9,

    /// `PARAMATTR_GROUP` block identifier
    ParamAttrGroup = 10,

    /// `CONSTANTS_BLOCK_ID = 11`
    Constants = 11,

    /// `FUNCTION_BLOCK_ID = 12`
    Function = 12,

    /// `VALUE_SYMTAB_BLOCK_ID`
    ValueSymtab = 14,

    /// `METADATA_BLOCK_ID`
    Metadata = 15,

    /// `METADATA_ATTACHMENT_ID`
    MetadataAttachment = 16,

    /// `TYPE_BLOCK_ID_NEW = 17`
    Type = 17,

    /// `USELIST_BLOCK_ID`
    Uselist = 18,
}

/// `MODULE` block codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum ModuleCode {
    /// `VERSION`
    ///
    /// [version#]
    Version = 1,

    /// `GLOBALVAR`
    ///
    /// [pointer type, isconst, initid, linkage, alignment, section,
    /// visibility, threadlocal, unnamed_addr, externally_initialized,
    /// dllstorageclass, comdat]
    GlobalVar = 7,

    /// `FUNCTION`
    ///
    /// [type, callingconv, isproto, linkage, paramattrs, alignment,
    /// section, visibility, gc, unnamed_addr, prologuedata,
    /// dllstorageclass, comdat, prefixdata]
    Function = 8,
}

/// The constants block (`CONSTANTS_BLOCK_ID`) describes emission for each
/// constant and maintains an implicit current type value.
#[derive(PartialEq, Eq, Debug, Clone, Copy, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum ConstantsCode {
    /// `SETTYPE`
    ///
    /// [typeid]
    SetType = 1,

    /// `NULL`
    Null = 2,

    /// `UNDEF`
    Undef = 3,

    /// `INTEGER`
    ///
    /// [intval]
    Integer = 4,

    /// `FLOAT`
    ///
    /// [fpval]
    Float = 6,

    /// `STRING`
    ///
    /// [values]
    String = 8,

    /// `CE_GEP`
    ///
    /// [n x operands]
    CeGep = 12,

    /// `CE_INBOUNDS_GEP`
    ///
    /// [n x operands]
    CeInboundsGep = 20,

    /// `DATA`
    ///
    /// [n x elements]
    Data = 22,
}

/// Function body record codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum FunctionCode {
    /// `DECLAREBLOCKS`
    ///
    /// [n]
    DeclareBlocks = 1,

    /// `BINOP`
    ///
    /// [opcode, ty, opval, opval]
    Binop = 2,

    /// `CAST`
    ///
    /// [opcode, ty, opty, opval]
    Cast = 3,

    /// `RET`
    ///
    /// [opty,opval<optional>]
    Ret = 10,

    /// `BR`
    ///
    /// [bb#, bb#, cond] or [bb#]
    Br = 11,

    /// `SWITCH`
    ///
    /// [opty, op0, op1, ...]
    Switch = 12,

    /// `PHI`
    ///
    /// [ty, val0,bb0, ...]
    Phi = 16,

    /// `ALLOCA`
    ///
    /// [instty, opty, op, align]
    Alloca = 19,

    /// `LOAD`
    ///
    /// [op, ty, align, vol]
    Load = 20,

    /// `EXTRACTVAL`
    ///
    /// [n x operands]
    ExtractVal = 26,

    /// `CMP2`
    ///
    /// [opty, opval, opval, pred]
    Cmp2 = 28,

    /// `VSELECT`
    ///
    /// [ty,opval,opval,predty,pred]
    Vselect = 29,

    /// `CALL`
    ///
    /// [attr, cc, fnty, fnid, args...]
    Call = 34,

    /// `ATOMICRMW`
    ///
    /// [ptrty,ptr,val, operation, align, vol, ordering, synchscope]
    AtomicRmw = 38,

    /// `LOADATOMIC`
    ///
    /// [op, align, vol, ordering, synchscope]
    LoadAtomic = 41,

    /// `GEP`
    ///
    /// [inbounds, n x operands]
    Gep = 43,

    /// `STORE`
    ///
    /// [ptrty,ptr,valty,val, align, vol]
    Store = 44,

    /// `STOREATOMIC`
    ///
    /// [ptrty,ptr,val, align, vol, ordering, synchscope]
    StoreAtomic = 45,

    /// `CMPXCHG`
    ///
    /// [ptrty, ptr, cmp, val, vol, success_ordering, synchscope,
    /// failure_ordering, weak]
    CmpXchg = 46,
}

/// `TYPE` blocks have codes for each type primitive they use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum TypeCode {
    /// `NUMENTRY`
    ///
    /// [numentries]
    NumEntry = 1,

    /// `VOID`
    Void = 2,

    /// `FLOAT`
    Float = 3,

    /// `DOUBLE`
    Double = 4,

    /// `LABEL`
    Label = 5,

    /// `INTEGER`
    ///
    /// [width]
    Integer = 7,

    /// `POINTER`
    ///
    /// [pointee type, address space]
    Pointer = 8,

    /// `HALF`
    Half = 10,

    /// `ARRAY`
    ///
    /// [num_elements, elements_type]
    Array = 11,

    /// `VECTOR`
    ///
    /// [num_elements, elements_type]
    Vector = 12,

    /// `METADATA`
    Metadata = 16,

    /// `STRUCT_ANON`
    ///
    /// [ispacked, elements_type x N]
    StructAnon = 18,

    /// `STRUCT_NAME`
    ///
    /// [strchr x N]
    StructName = 19,

    /// `STRUCT_NAMED`
    ///
    /// [ispacked, elements_type x N]
    StructNamed = 20,

    /// `FUNCTION`
    ///
    /// [vararg, retty, paramty x N]
    Function = 21,
}

/// Value symbol table codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum ValueSymtabCode {
    /// `VST_ENTRY`
    ///
    /// [valueid, namechar x N]
    Entry = 1,

    /// `VST_BBENTRY`
    ///
    /// [bbid, namechar x N]
    BbEntry = 2,
}

/// `METADATA` block codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum MetadataCode {
    /// `MDSTRING`
    ///
    /// [values]
    String = 1,

    /// `VALUE`
    ///
    /// [type num, value num]
    Value = 2,

    /// `NODE`
    ///
    /// [n x md num]
    Node = 3,

    /// `NAME`
    ///
    /// [values]
    Name = 4,

    /// `DISTINCT_NODE`
    ///
    /// [n x md num]
    DistinctNode = 5,

    /// `KIND`
    ///
    /// [n x [id, name]]
    Kind = 6,

    /// `NAMED_NODE`
    ///
    /// [n x mdnodes]
    NamedNode = 10,
}
