use log::{debug, trace, warn};

use super::{Result, Sm6Parser, first_child};
use crate::bitcode::Block;
use crate::diagnostics::{DiagnosticCode, Error};
use crate::schema::blocks::{BlockId, TypeCode};
use crate::schema::enums::AddressSpace;
use crate::vsir::DataType;

/// Name of the struct DXIL uses for resource handles.
pub const HANDLE_TYPE_NAME: &str = "dx.types.Handle";

/// Index of a type in the [`TypeTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Integer(u32),
    Float(u32),
    Pointer {
        pointee: TypeId,
        addr_space: u64,
    },
    Struct {
        name: Option<String>,
        elements: Vec<TypeId>,
    },
    Function {
        ret: TypeId,
        params: Vec<TypeId>,
    },
    Vector {
        element: TypeId,
        count: u32,
    },
    Array {
        element: TypeId,
        count: u32,
    },
    Label,
    Metadata,
}

/// All types of a module, in declaration order.
///
/// References between types are indices which were checked against the
/// total type count when the table was built, so lookups by [`TypeId`] never
/// fail for ids handed out by the table.
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    types: Vec<TypeKind>,
    bool_type: Option<TypeId>,
    handle_type: Option<TypeId>,
}

impl TypeTable {
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Validate a type id read from a record.
    pub fn lookup(&self, type_id: u64) -> Option<TypeId> {
        let index = usize::try_from(type_id).ok()?;
        (index < self.types.len()).then_some(TypeId(index))
    }

    pub fn get(&self, id: TypeId) -> &TypeKind {
        &self.types[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TypeKind)> {
        self.types.iter().enumerate().map(|(i, kind)| (TypeId(i), kind))
    }

    /// The `i1` type, if the module declares one.
    pub fn bool_type(&self) -> Option<TypeId> {
        self.bool_type
    }

    pub fn handle_type(&self) -> Option<TypeId> {
        self.handle_type
    }

    pub fn is_void(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Void)
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Integer(_))
    }

    pub fn is_bool(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Integer(1))
    }

    pub fn is_i8(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Integer(8))
    }

    pub fn is_i32(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Integer(32))
    }

    pub fn is_bool_i16_i32_i64(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Integer(1 | 16 | 32 | 64))
    }

    pub fn is_floating_point(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Float(_))
    }

    pub fn is_numeric(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Integer(_) | TypeKind::Float(_))
    }

    pub fn is_scalar(&self, id: TypeId) -> bool {
        self.is_numeric(id)
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Pointer { .. })
    }

    pub fn is_array(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Array { .. })
    }

    pub fn is_struct(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Struct { .. })
    }

    pub fn is_aggregate(&self, id: TypeId) -> bool {
        matches!(
            self.get(id),
            TypeKind::Struct { .. } | TypeKind::Vector { .. } | TypeKind::Array { .. }
        )
    }

    /// Arrays and vectors of numeric elements, and structs whose members are
    /// all numeric. Nested structs are not considered.
    pub fn is_numeric_aggregate(&self, id: TypeId) -> bool {
        match self.get(id) {
            TypeKind::Array { element, .. } | TypeKind::Vector { element, .. } => {
                self.is_numeric(*element)
            }
            TypeKind::Struct { elements, .. } => elements.iter().all(|&e| self.is_numeric(e)),
            _ => false,
        }
    }

    pub fn is_function(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Function { .. })
    }

    pub fn is_function_pointer(&self, id: TypeId) -> bool {
        self.pointee(id).is_some_and(|pointee| self.is_function(pointee))
    }

    pub fn is_handle(&self, id: TypeId) -> bool {
        matches!(self.get(id), TypeKind::Struct { name: Some(name), .. } if name == HANDLE_TYPE_NAME)
    }

    /// Bit width of an integer or floating point type.
    pub fn width(&self, id: TypeId) -> Option<u32> {
        match *self.get(id) {
            TypeKind::Integer(width) | TypeKind::Float(width) => Some(width),
            _ => None,
        }
    }

    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match *self.get(id) {
            TypeKind::Pointer { pointee, .. } => Some(pointee),
            _ => None,
        }
    }

    pub fn address_space(&self, id: TypeId) -> Option<u64> {
        match *self.get(id) {
            TypeKind::Pointer { addr_space, .. } => Some(addr_space),
            _ => None,
        }
    }

    /// Return type and parameter types of a function type.
    pub fn function_signature(&self, id: TypeId) -> Option<(TypeId, &[TypeId])> {
        match self.get(id) {
            TypeKind::Function { ret, params } => Some((*ret, params.as_slice())),
            _ => None,
        }
    }

    /// Element type of an array or vector; any other type is its own element.
    pub fn element_type(&self, id: TypeId) -> TypeId {
        match *self.get(id) {
            TypeKind::Array { element, .. } | TypeKind::Vector { element, .. } => element,
            _ => id,
        }
    }

    /// Type of member `index` of an aggregate.
    pub fn element_type_at_index(&self, id: TypeId, index: u64) -> Option<TypeId> {
        match self.get(id) {
            TypeKind::Array { element, count } | TypeKind::Vector { element, count } => {
                (index < u64::from(*count)).then_some(*element)
            }
            TypeKind::Struct { elements, .. } => {
                usize::try_from(index).ok().and_then(|i| elements.get(i)).copied()
            }
            _ => None,
        }
    }

    /// The pointer type to `id` in `addr_space`.
    ///
    /// Producers usually place a pointer type right after its pointee, so the
    /// search starts there and wraps around.
    pub fn pointer_to(&self, id: TypeId, addr_space: u64) -> Option<TypeId> {
        let count = self.types.len();
        (1..count)
            .map(|offset| TypeId((id.0 + offset) % count))
            .find(|&candidate| {
                matches!(*self.get(candidate),
                    TypeKind::Pointer { pointee, addr_space: space }
                        if pointee == id && space == addr_space)
            })
    }

    /// Scalar type at member `index`, looking through pointers and nested
    /// aggregates. Never `None` for index 0 of an acyclic type.
    pub fn scalar_type(&self, id: TypeId, index: u64) -> Option<TypeId> {
        let mut id = self.element_type_at_index(id, index).or_else(|| {
            (!self.is_aggregate(id)).then_some(id)
        })?;
        // Pointers and structs may refer to each other; bound the walk.
        for _ in 0..=self.types.len() {
            id = match *self.get(id) {
                TypeKind::Pointer { pointee, .. } => pointee,
                TypeKind::Array { element, .. } | TypeKind::Vector { element, .. } => element,
                TypeKind::Struct { ref elements, .. } => *elements.first()?,
                _ => return Some(id),
            };
        }
        None
    }

    /// Number of components a vector register holds of this scalar type.
    pub fn max_vector_size(&self, id: TypeId) -> u32 {
        match self.width(id) {
            Some(width) if width > 32 => 2,
            _ => 4,
        }
    }

    /// IR data type of a scalar type.
    pub fn data_type(&self, id: TypeId) -> DataType {
        match *self.get(id) {
            TypeKind::Integer(width) => match width {
                1 => DataType::Bool,
                8 => DataType::Uint8,
                16 => DataType::Uint16,
                32 => DataType::Uint,
                64 => DataType::Uint64,
                _ => {
                    debug!("Unhandled integer width {width}.");
                    DataType::Uint
                }
            },
            TypeKind::Float(width) => match width {
                16 => DataType::Half,
                32 => DataType::Float,
                64 => DataType::Double,
                _ => {
                    debug!("Unhandled float width {width}.");
                    DataType::Float
                }
            },
            ref kind => {
                debug!("Unhandled type {kind:?}.");
                DataType::Uint
            }
        }
    }
}

impl Sm6Parser<'_> {
    /// Resolve a type id operand, reporting invalid ids.
    pub(crate) fn get_type(&mut self, type_id: u64) -> Option<TypeId> {
        let id = self.types.lookup(type_id);
        if id.is_none() {
            warn!("Invalid type index {type_id} at {}.", self.values.len());
            self.error(
                DiagnosticCode::DxilInvalidTypeId,
                format!("DXIL type id {type_id} is invalid."),
            );
        }
        id
    }

    /// Build the type table from the module's TYPE block.
    pub(crate) fn type_table_init(&mut self, root: &Block) -> Result<()> {
        self.location.line = 0;
        self.location.column = 0;

        let Some((block, is_unique)) = first_child(root, BlockId::Type) else {
            warn!("No type definitions found.");
            return Ok(());
        };
        if !is_unique {
            warn!("Ignoring invalid extra type table(s).");
        }
        self.location.line = block.id;

        let is_slot = |code: u32| code != TypeCode::NumEntry as u32 && code != TypeCode::StructName as u32;
        let type_count = block.records.iter().filter(|record| is_slot(record.code)).count();

        let mut types = Vec::new();
        types
            .try_reserve_exact(type_count)
            .map_err(|_| Error::OutOfMemory)?;

        let check = |type_id: u64, what: &str, index: usize| -> Result<TypeId> {
            match usize::try_from(type_id) {
                Ok(id) if id < type_count => Ok(TypeId(id)),
                _ => {
                    warn!("Invalid {what} type id {type_id} for type {index}.");
                    Err(Error::InvalidShader)
                }
            }
        };

        let mut struct_name: Option<String> = None;
        for (i, record) in block.records.iter().enumerate() {
            self.location.column = i as u32;
            let index = types.len();
            let ops = &record.operands;

            let Ok(code) = TypeCode::try_from(record.code) else {
                warn!("Unhandled type {} at index {index}.", record.code);
                return Err(Error::InvalidShader);
            };
            let kind = match code {
                TypeCode::NumEntry => continue,
                TypeCode::StructName => {
                    let name = record.string(0);
                    if name.is_empty() {
                        warn!("Struct name is empty for type {index}.");
                    }
                    struct_name = Some(name);
                    continue;
                }
                TypeCode::Array | TypeCode::Vector => {
                    if !self.validate_operand_count(record, 2, 2) {
                        return Err(Error::InvalidShader);
                    }
                    let count = match ops[0] {
                        0 => {
                            trace!("Setting unbounded for type {index}.");
                            u32::MAX
                        }
                        count => u32::try_from(count).unwrap_or(u32::MAX),
                    };
                    let element = check(ops[1], "contained", index)?;
                    if code == TypeCode::Array {
                        TypeKind::Array { element, count }
                    } else {
                        TypeKind::Vector { element, count }
                    }
                }
                TypeCode::Double => {
                    self.validate_operand_max_count(record, 0);
                    TypeKind::Float(64)
                }
                TypeCode::Float => {
                    self.validate_operand_max_count(record, 0);
                    TypeKind::Float(32)
                }
                TypeCode::Half => {
                    self.validate_operand_max_count(record, 0);
                    TypeKind::Float(16)
                }
                TypeCode::Function => {
                    if !self.validate_operand_min_count(record, 2) {
                        return Err(Error::InvalidShader);
                    }
                    if ops[0] != 0 {
                        warn!("Unhandled vararg function type {index}.");
                    }
                    let ret = check(ops[1], "return", index)?;
                    let params = ops[2..]
                        .iter()
                        .map(|&param| check(param, "parameter", index))
                        .collect::<Result<Vec<_>>>()?;
                    TypeKind::Function { ret, params }
                }
                TypeCode::Integer => {
                    if !self.validate_operand_count(record, 1, 1) {
                        return Err(Error::InvalidShader);
                    }
                    match ops[0] {
                        width @ (1 | 8 | 16 | 32 | 64) => {
                            if width == 1 && self.types.bool_type.is_none() {
                                self.types.bool_type = Some(TypeId(index));
                            }
                            TypeKind::Integer(width as u32)
                        }
                        width => {
                            warn!("Invalid integer width {width} for type {index}.");
                            return Err(Error::InvalidShader);
                        }
                    }
                }
                TypeCode::Label => TypeKind::Label,
                TypeCode::Metadata => TypeKind::Metadata,
                TypeCode::Pointer => {
                    if !self.validate_operand_count(record, 1, 2) {
                        return Err(Error::InvalidShader);
                    }
                    let pointee = check(ops[0], "pointee", index)?;
                    let addr_space = ops.get(1).copied().unwrap_or(AddressSpace::Default as u64);
                    TypeKind::Pointer {
                        pointee,
                        addr_space,
                    }
                }
                TypeCode::StructAnon | TypeCode::StructNamed => {
                    if !self.validate_operand_min_count(record, 2) {
                        return Err(Error::InvalidShader);
                    }
                    let name = if code == TypeCode::StructNamed {
                        let Some(name) = struct_name.take() else {
                            warn!("Missing struct name before struct type {index}.");
                            return Err(Error::InvalidShader);
                        };
                        Some(name)
                    } else {
                        None
                    };
                    if ops[0] != 0 {
                        debug!("Ignoring struct packed attribute.");
                    }
                    let elements = ops[1..]
                        .iter()
                        .map(|&element| check(element, "contained", index))
                        .collect::<Result<Vec<_>>>()?;
                    if name.as_deref() == Some(HANDLE_TYPE_NAME) {
                        self.types.handle_type = Some(TypeId(index));
                    }
                    TypeKind::Struct { name, elements }
                }
                TypeCode::Void => {
                    self.validate_operand_max_count(record, 0);
                    TypeKind::Void
                }
            };
            types.push(kind);
        }

        debug_assert_eq!(types.len(), type_count);
        if let Some(name) = struct_name {
            warn!("Unused struct name {name}.");
        }
        self.types.types = types;
        Ok(())
    }
}
