//! Metadata tables.
//!
//! DXIL keeps the entry point, resources, signatures and shader properties in
//! metadata rather than in instructions. Each module-level METADATA block
//! becomes one [`MetadataTable`]; references between metadata values are
//! indices into the table of the referring value.

use std::collections::HashSet;

use log::{debug, trace, warn};

use super::types::TypeId;
use super::{Result, Sm6Parser};
use crate::bitcode::Block;
use crate::diagnostics::{DiagnosticCode, Error};
use crate::schema::blocks::{BlockId, MetadataCode};

/// Maximum number of module-level metadata blocks.
pub const MAX_METADATA_TABLES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataNode {
    pub is_distinct: bool,
    /// Slot indices in the same table; `None` is a null operand.
    pub operands: Vec<Option<usize>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    /// Slot of a record this parser does not interpret, e.g. debug info.
    Unhandled,
    Node(MetadataNode),
    String(String),
    /// A module value and its declared type.
    Value { ty: TypeId, value: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataKind {
    pub id: u64,
    pub name: String,
}

/// A named root such as `dx.entryPoints`. Its operands are node slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedMetadata {
    pub name: String,
    pub operands: Vec<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataTable {
    pub values: Vec<MetadataValue>,
    pub named: Vec<NamedMetadata>,
    pub kinds: Vec<MetadataKind>,
}

/// A slot in one of the parser's metadata tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataRef {
    pub table: usize,
    pub index: usize,
}

/// Whether a record occupies a slot. Names, named nodes and kinds do not.
fn takes_slot(code: u32) -> bool {
    !matches!(
        MetadataCode::try_from(code),
        Ok(MetadataCode::Name | MetadataCode::NamedNode | MetadataCode::Kind)
    )
}

impl Sm6Parser<'_> {
    /// Decode all module-level METADATA blocks.
    pub(crate) fn metadata_tables_init(&mut self, root: &Block) -> Result<()> {
        for (i, block) in root.children(BlockId::Metadata as u32).enumerate() {
            if i >= MAX_METADATA_TABLES {
                warn!("Ignoring metadata block {i}.");
                continue;
            }
            let table = self.metadata_init(block)?;
            self.metadata.push(table);
        }
        Ok(())
    }

    fn metadata_init(&mut self, block: &Block) -> Result<MetadataTable> {
        self.location.line = block.id;
        let slot_count = block.records.iter().filter(|r| takes_slot(r.code)).count();

        let mut table = MetadataTable::default();
        table
            .values
            .try_reserve_exact(slot_count)
            .map_err(|_| Error::OutOfMemory)?;

        let mut pending_name: Option<String> = None;
        let mut unhandled = HashSet::new();

        for (i, record) in block.records.iter().enumerate() {
            self.location.column = i as u32;
            let slot = table.values.len();

            let Ok(code) = MetadataCode::try_from(record.code) else {
                if unhandled.insert(record.code) {
                    debug!("Unhandled metadata code {}.", record.code);
                }
                table.values.push(MetadataValue::Unhandled);
                continue;
            };

            let value = match code {
                MetadataCode::Name => {
                    if let Some(previous) = pending_name.replace(record.string(0)) {
                        warn!("Ignoring unused metadata name {previous}.");
                    }
                    continue;
                }
                MetadataCode::NamedNode => {
                    let Some(name) = pending_name.take() else {
                        warn!("Named node has no name.");
                        self.error(
                            DiagnosticCode::DxilInvalidMetadata,
                            "A named metadata node has no name.",
                        );
                        return Err(Error::InvalidShader);
                    };
                    let mut operands = Vec::new();
                    operands
                        .try_reserve_exact(record.operands.len())
                        .map_err(|_| Error::OutOfMemory)?;
                    for &operand in &record.operands {
                        match usize::try_from(operand) {
                            Ok(index) if index < slot_count => operands.push(index),
                            _ => {
                                self.error(
                                    DiagnosticCode::DxilInvalidMetadata,
                                    format!(
                                        "Operand {operand} of named metadata node '{name}' exceeds the count {slot_count}."
                                    ),
                                );
                                return Err(Error::InvalidShader);
                            }
                        }
                    }
                    trace!("Named metadata '{name}' with {} operands.", operands.len());
                    table.named.push(NamedMetadata { name, operands });
                    continue;
                }
                MetadataCode::Kind => {
                    if !self.validate_operand_min_count(record, 1) {
                        return Err(Error::InvalidShader);
                    }
                    table.kinds.push(MetadataKind {
                        id: record.operands[0],
                        name: record.string(1),
                    });
                    continue;
                }
                MetadataCode::String => MetadataValue::String(record.string(0)),
                MetadataCode::Value => {
                    if !self.validate_operand_count(record, 2, 2) {
                        return Err(Error::InvalidShader);
                    }
                    let ty = self.get_type(record.operands[0]).ok_or(Error::InvalidShader)?;
                    let value_index = record.operands[1];
                    let Some(value) = self.value_at(value_index) else {
                        warn!("Invalid value index {value_index}.");
                        self.error(
                            DiagnosticCode::DxilInvalidMetadata,
                            format!("Invalid value index {value_index} in a metadata value."),
                        );
                        return Err(Error::InvalidShader);
                    };
                    if !self.types.is_function_pointer(ty) && value.ty != Some(ty) {
                        warn!("Type mismatch in metadata value {slot}.");
                        self.warning(
                            DiagnosticCode::DxilTypeMismatch,
                            "Type mismatch in metadata value.",
                        );
                    }
                    MetadataValue::Value {
                        ty,
                        value: value_index as usize,
                    }
                }
                MetadataCode::Node | MetadataCode::DistinctNode => {
                    let is_distinct = code == MetadataCode::DistinctNode;
                    let mut operands = Vec::new();
                    operands
                        .try_reserve_exact(record.operands.len())
                        .map_err(|_| Error::OutOfMemory)?;
                    for &operand in &record.operands {
                        if operand == 0 {
                            operands.push(None);
                            continue;
                        }
                        let index = usize::try_from(operand - 1).unwrap_or(usize::MAX);
                        if index >= slot_count {
                            self.error(
                                DiagnosticCode::DxilInvalidMetadata,
                                format!("Metadata index {operand} exceeds the count {slot_count}."),
                            );
                            return Err(Error::InvalidShader);
                        }
                        if index == slot && !is_distinct {
                            warn!("Metadata node {slot} references itself.");
                            self.error(
                                DiagnosticCode::DxilInvalidMetadata,
                                format!("Metadata node {slot} contains a self-reference."),
                            );
                            return Err(Error::InvalidShader);
                        }
                        operands.push(Some(index));
                    }
                    MetadataValue::Node(MetadataNode {
                        is_distinct,
                        operands,
                    })
                }
            };
            table.values.push(value);
        }

        if let Some(name) = pending_name {
            warn!("Ignoring unused metadata name {name}.");
        }

        for named in &table.named {
            let all_nodes = named
                .operands
                .iter()
                .all(|&index| matches!(table.values[index], MetadataValue::Node(_)));
            if !all_nodes {
                self.error(
                    DiagnosticCode::DxilInvalidMetadata,
                    format!("Named metadata '{}' has an operand which is not a node.", named.name),
                );
                return Err(Error::InvalidShader);
            }
        }

        Ok(table)
    }

    /// Node operands of the named metadata `name`.
    pub(crate) fn find_named_metadata(&self, name: &str) -> Option<Vec<MetadataRef>> {
        self.metadata.iter().enumerate().find_map(|(table, t)| {
            t.named.iter().find(|named| named.name == name).map(|named| {
                named
                    .operands
                    .iter()
                    .map(|&index| MetadataRef { table, index })
                    .collect()
            })
        })
    }

    pub(crate) fn metadata_value(&self, m: MetadataRef) -> Option<&MetadataValue> {
        self.metadata.get(m.table)?.values.get(m.index)
    }

    /// Operands of a node, or `None` if `m` is not a node.
    pub(crate) fn metadata_node(&self, m: Option<MetadataRef>) -> Option<Vec<Option<MetadataRef>>> {
        let m = m?;
        match self.metadata_value(m)? {
            MetadataValue::Node(node) => Some(
                node.operands
                    .iter()
                    .map(|operand| operand.map(|index| MetadataRef { table: m.table, index }))
                    .collect(),
            ),
            _ => None,
        }
    }

    pub(crate) fn metadata_string(&self, m: Option<MetadataRef>) -> Option<&str> {
        match self.metadata_value(m?)? {
            MetadataValue::String(string) => Some(string),
            _ => None,
        }
    }

    /// Module value index wrapped by a metadata value.
    pub(crate) fn metadata_module_value(&self, m: Option<MetadataRef>) -> Option<usize> {
        match self.metadata_value(m?)? {
            MetadataValue::Value { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Integer constant wrapped by a metadata value.
    pub(crate) fn metadata_uint64(&self, m: Option<MetadataRef>) -> Option<u64> {
        let MetadataValue::Value { ty, value } = *self.metadata_value(m?)? else {
            return None;
        };
        if !self.types.is_integer(ty) {
            return None;
        }
        self.values.get(value)?.register()?.uint64_value()
    }

    pub(crate) fn metadata_uint(&self, m: Option<MetadataRef>) -> Option<u32> {
        let MetadataValue::Value { ty, value } = *self.metadata_value(m?)? else {
            return None;
        };
        if !self.types.is_integer(ty) {
            return None;
        }
        self.values.get(value)?.constant_uint()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bitcode::Record;
    use crate::diagnostics::{Location, MessageContext};
    use crate::vsir::{ShaderType, ShaderVersion};

    fn metadata_block(records: Vec<(MetadataCode, Vec<u64>)>) -> Block {
        Block {
            id: BlockId::Metadata as u32,
            abbrev_width: 3,
            start: 0,
            length: 0,
            level: 1,
            records: records
                .into_iter()
                .map(|(code, operands)| Record::new(code as u32, operands))
                .collect(),
            blocks: Vec::new(),
        }
    }

    fn chars(s: &str) -> Vec<u64> {
        s.bytes().map(u64::from).collect()
    }

    fn with_parser<T>(f: impl FnOnce(&mut Sm6Parser<'_>) -> T) -> (T, MessageContext) {
        let mut context = MessageContext::new();
        let version = ShaderVersion {
            shader_type: ShaderType::Pixel,
            major: 6,
            minor: 0,
        };
        let result = {
            let mut parser = Sm6Parser::new(&mut context, Location::new(Arc::from("test")), version);
            f(&mut parser)
        };
        (result, context)
    }

    #[test]
    fn node_operands_are_offset_by_one() {
        let block = metadata_block(vec![
            (MetadataCode::String, chars("cb0")),
            (MetadataCode::Node, vec![0, 1]),
            (MetadataCode::Name, chars("dx.resources")),
            (MetadataCode::NamedNode, vec![1]),
            (MetadataCode::Node, vec![2, 0, 1]),
        ]);
        let (table, context) = with_parser(|parser| parser.metadata_init(&block));
        let table = table.unwrap();
        assert!(!context.has_errors());

        assert_eq!(table.values.len(), 3);
        assert_eq!(table.values[0], MetadataValue::String("cb0".to_string()));
        assert_eq!(
            table.values[1],
            MetadataValue::Node(MetadataNode {
                is_distinct: false,
                operands: vec![None, Some(0)],
            })
        );
        assert_eq!(
            table.values[2],
            MetadataValue::Node(MetadataNode {
                is_distinct: false,
                operands: vec![Some(1), None, Some(0)],
            })
        );
        assert_eq!(
            table.named,
            vec![NamedMetadata {
                name: "dx.resources".to_string(),
                operands: vec![1],
            }]
        );
    }

    #[test]
    fn node_self_reference_is_rejected() {
        let block = metadata_block(vec![
            (MetadataCode::String, chars("a")),
            (MetadataCode::Node, vec![1, 2]),
        ]);
        let (table, context) = with_parser(|parser| parser.metadata_init(&block));
        assert_eq!(table.unwrap_err(), Error::InvalidShader);
        assert!(context.contains(DiagnosticCode::DxilInvalidMetadata));

        let block = metadata_block(vec![(MetadataCode::DistinctNode, vec![1])]);
        let (table, context) = with_parser(|parser| parser.metadata_init(&block));
        assert!(table.is_ok());
        assert!(!context.has_errors());
    }

    #[test]
    fn operands_beyond_the_slot_count_are_rejected() {
        let block = metadata_block(vec![(MetadataCode::Node, vec![0]), (MetadataCode::Node, vec![3])]);
        let (table, context) = with_parser(|parser| parser.metadata_init(&block));
        assert_eq!(table.unwrap_err(), Error::InvalidShader);
        assert!(context.contains(DiagnosticCode::DxilInvalidMetadata));

        let block = metadata_block(vec![
            (MetadataCode::Node, vec![]),
            (MetadataCode::Name, chars("n")),
            (MetadataCode::NamedNode, vec![1]),
        ]);
        let (table, _) = with_parser(|parser| parser.metadata_init(&block));
        assert_eq!(table.unwrap_err(), Error::InvalidShader);
    }
}
