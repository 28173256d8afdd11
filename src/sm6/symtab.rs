use std::collections::HashMap;
use std::collections::hash_map::Entry;

use log::{debug, warn};

use super::{Result, Sm6Parser, first_child};
use crate::bitcode::Block;
use crate::diagnostics::Error;
use crate::schema::blocks::{BlockId, ValueSymtabCode};

/// Names of module-level values, keyed by absolute value index.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    names: HashMap<u64, String>,
}

impl SymbolTable {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, id: u64) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Add a name; a second name for the same id is rejected.
    fn insert(&mut self, id: u64, name: String) -> std::result::Result<(), String> {
        match self.names.entry(id) {
            Entry::Occupied(entry) => Err(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(name);
                Ok(())
            }
        }
    }
}

impl Sm6Parser<'_> {
    pub(crate) fn symtab_init(&mut self, root: &Block) -> Result<()> {
        let Some((block, is_unique)) = first_child(root, BlockId::ValueSymtab) else {
            warn!("No value symtab block found.");
            return Err(Error::InvalidShader);
        };
        if !is_unique {
            warn!("Ignoring invalid extra value symbol table(s).");
        }
        self.location.line = block.id;

        let mut symbols = SymbolTable::default();
        symbols
            .names
            .try_reserve(block.records.len())
            .map_err(|_| Error::OutOfMemory)?;

        for (i, record) in block.records.iter().enumerate() {
            self.location.column = i as u32;
            match ValueSymtabCode::try_from(record.code) {
                Ok(ValueSymtabCode::Entry) => {}
                Ok(ValueSymtabCode::BbEntry) | Err(_) => {
                    debug!("Ignoring value symtab record code {}.", record.code);
                    continue;
                }
            }
            if !self.validate_operand_min_count(record, 1) {
                return Err(Error::InvalidShader);
            }
            let id = record.operands[0];
            if let Err(previous) = symbols.insert(id, record.string(1)) {
                warn!("Invalid duplicate value symbol id {id}, previously named {previous}.");
                return Err(Error::InvalidShader);
            }
        }

        self.symbols = symbols;
        Ok(())
    }
}
