//! Load-time symbol table and per-script variable storage.

use super::{Endian, Variable, VariableSpec};
use crate::error::MeterLinkError;
use std::collections::HashMap;
use std::sync::Arc;

/// Index of a variable inside a [`Session`], resolved once at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub(crate) usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Name to [`VarId`] mapping plus the spec of every declared variable.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    names: HashMap<String, VarId>,
    specs: Vec<VariableSpec>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a variable; names must be unique.
    pub fn declare(&mut self, spec: VariableSpec) -> Result<VarId, MeterLinkError> {
        spec.validate()?;
        if self.names.contains_key(&spec.name) {
            return Err(MeterLinkError::ScriptError(format!(
                "variable '{}' declared twice",
                spec.name
            )));
        }
        let id = VarId(self.specs.len());
        self.names.insert(spec.name.clone(), id);
        self.specs.push(spec);
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<VarId> {
        self.names.get(name).copied()
    }

    pub fn resolve(&self, name: &str) -> Result<VarId, MeterLinkError> {
        self.lookup(name)
            .ok_or_else(|| MeterLinkError::UnknownVariable(name.to_string()))
    }

    pub fn spec(&self, id: VarId) -> Option<&VariableSpec> {
        self.specs.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// Current values of every variable of one loaded script.
///
/// Values persist across steps and across conversations until the script is
/// reloaded, at which point a fresh session replaces this one.
#[derive(Debug, Clone)]
pub struct Session {
    symbols: Arc<SymbolTable>,
    vars: Vec<Variable>,
    device_order: Endian,
}

impl Session {
    pub fn new(symbols: Arc<SymbolTable>, device_order: Endian) -> Self {
        let vars = symbols
            .specs
            .iter()
            .cloned()
            .map(|spec| Variable::new(spec, device_order))
            .collect();
        Session {
            symbols,
            vars,
            device_order,
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Variable for an id issued by this session's [`SymbolTable`].
    ///
    /// Ids are only valid for the script that issued them; after a script
    /// reload they must be resolved again.
    ///
    /// # Panics
    ///
    /// Panics if `id` came from a different symbol table with more variables.
    pub fn get(&self, id: VarId) -> &Variable {
        &self.vars[id.0]
    }

    /// Mutable counterpart of [`Self::get`], with the same panic condition.
    pub fn get_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.0]
    }

    /// Checked lookup for ids that may predate a script reload.
    pub fn try_get(&self, id: VarId) -> Option<&Variable> {
        self.vars.get(id.0)
    }

    pub fn try_get_mut(&mut self, id: VarId) -> Option<&mut Variable> {
        self.vars.get_mut(id.0)
    }

    /// Look a variable up by name; for drivers outside the hot path.
    pub fn variable(&self, name: &str) -> Result<&Variable, MeterLinkError> {
        let id = self.symbols.resolve(name)?;
        Ok(self.get(id))
    }

    pub fn variable_mut(&mut self, name: &str) -> Result<&mut Variable, MeterLinkError> {
        let id = self.symbols.resolve(name)?;
        Ok(self.get_mut(id))
    }

    /// Zero every variable back to its declared width.
    pub fn reset(&mut self) {
        *self = Session::new(Arc::clone(&self.symbols), self.device_order);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }
}
