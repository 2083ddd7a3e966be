//! Module-level IR container with interned symbol table.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::function::Function;
use super::instruction::{Constant, Operand};
use super::types::{DataLayout, Type};
use super::value::{GlobalId, SymbolId};

/// Interned symbol table mapping names to `SymbolId`s.
///
/// Serialized as the plain list of names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct SymbolTable {
    names: Vec<String>,
    lookup: HashMap<String, SymbolId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a symbol name. Existing names return their existing id.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        if let Some(&id) = self.lookup.get(name) {
            return id;
        }
        let id = SymbolId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.lookup.insert(name.to_string(), id);
        id
    }

    /// Look a name up without interning it.
    pub fn get(&self, name: &str) -> Option<SymbolId> {
        self.lookup.get(name).copied()
    }

    pub fn resolve(&self, id: SymbolId) -> &str {
        &self.names[id.index()]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl From<Vec<String>> for SymbolTable {
    fn from(names: Vec<String>) -> Self {
        let mut table = SymbolTable::new();
        for name in &names {
            table.intern(name);
        }
        table
    }
}

impl From<SymbolTable> for Vec<String> {
    fn from(table: SymbolTable) -> Self {
        table.names
    }
}

/// A module-level variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Global {
    pub name: SymbolId,
    pub value_ty: Type,
    /// Never written after initialization.
    pub constant: bool,
    pub section: Option<String>,
    pub addr_space: u32,
}

/// Function signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Type>,
    pub ret: Type,
}

impl Signature {
    pub fn new(params: Vec<Type>, ret: Type) -> Self {
        Self { params, ret }
    }
}

/// An external function the module calls but does not define.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: SymbolId,
    pub sig: Signature,
    /// The callee never unwinds.
    pub nounwind: bool,
}

/// Top-level IR container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub symbols: SymbolTable,
    pub globals: Vec<Global>,
    pub declarations: Vec<Declaration>,
    pub functions: Vec<Function>,
    pub data_layout: DataLayout,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_data_layout(mut self, data_layout: DataLayout) -> Self {
        self.data_layout = data_layout;
        self
    }

    pub fn intern(&mut self, name: &str) -> SymbolId {
        self.symbols.intern(name)
    }

    pub fn resolve(&self, id: SymbolId) -> &str {
        self.symbols.resolve(id)
    }

    /// Add a global in the default address space.
    pub fn add_global(&mut self, name: &str, value_ty: Type, constant: bool) -> GlobalId {
        let name = self.intern(name);
        self.push_global(Global {
            name,
            value_ty,
            constant,
            section: None,
            addr_space: 0,
        })
    }

    pub fn push_global(&mut self, global: Global) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(global);
        id
    }

    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id.index()]
    }

    pub fn global_by_name(&self, name: &str) -> Option<GlobalId> {
        let sym = self.symbols.get(name)?;
        self.globals
            .iter()
            .position(|g| g.name == sym)
            .map(|idx| GlobalId(idx as u32))
    }

    /// Declare an external function, reusing an existing declaration of the
    /// same name.
    pub fn declare(&mut self, name: &str, sig: Signature, nounwind: bool) -> SymbolId {
        let sym = self.intern(name);
        if !self.declarations.iter().any(|d| d.name == sym) {
            self.declarations.push(Declaration {
                name: sym,
                sig,
                nounwind,
            });
        }
        sym
    }

    pub fn declaration(&self, sym: SymbolId) -> Option<&Declaration> {
        self.declarations.iter().find(|d| d.name == sym)
    }

    pub fn add_function(&mut self, func: Function) -> usize {
        self.functions.push(func);
        self.functions.len() - 1
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        let sym = self.symbols.get(name)?;
        self.functions.iter().position(|f| f.name == sym)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.function_index(name).map(|idx| &self.functions[idx])
    }

    /// Whether a call to `sym` is known never to unwind.
    pub fn callee_is_nounwind(&self, sym: SymbolId) -> bool {
        self.declaration(sym).is_some_and(|d| d.nounwind)
    }

    /// Type of an operand inside `func`. `Undef` has no intrinsic type.
    pub fn operand_type(&self, func: &Function, op: Operand) -> Option<Type> {
        match op {
            Operand::Global(id) => self
                .globals
                .get(id.index())
                .map(|g| Type::Ptr(g.addr_space)),
            Operand::Const(Constant::Undef) => None,
            _ => func.local_operand_type(op),
        }
    }
}
