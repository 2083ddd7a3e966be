//! Opaque handles for IR entities.
//!
//! Everything inside a function is referenced by `u32` index into an arena, so
//! inserting or replacing instructions never invalidates existing handles.

use serde::{Deserialize, Serialize};

/// Reference to an instruction in a function's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstId(pub(crate) u32);

impl InstId {
    /// Raw index into the instruction arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Reference to a basic block of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// Raw index into the block arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Reference to a module global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalId(pub(crate) u32);

impl GlobalId {
    /// Raw index into the module's global list.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interned symbol identifier, indexing the module-level symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub(crate) u32);

impl SymbolId {
    /// Raw index into the symbol table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
