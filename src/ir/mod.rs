//! Intermediate representation consumed and rewritten by the instrumenter.
//!
//! The IR is a conventional SSA-less, arena-indexed form: a [`Module`] owns
//! globals, external declarations and [`Function`]s; a function owns an
//! instruction arena and a list of basic blocks referencing it by
//! [`InstId`]. Handles stay valid across insertion, block splitting and
//! in-place replacement, which is what instrumentation does.

pub mod builder;
pub mod display;
pub mod function;
pub mod instruction;
pub mod module;
pub mod types;
pub mod value;
pub mod verify;

pub use builder::Builder;
pub use display::FunctionDisplay;
pub use function::{Block, Function, FunctionAttrs};
pub use instruction::{
    truncate, BinOp, Callee, CastKind, Constant, DebugLoc, ICmpPred, InstKind, Instruction, Op,
    Operand,
};
pub use module::{Declaration, Global, Module, Signature, SymbolTable};
pub use types::{AtomicRmwOp, DataLayout, FloatKind, MemoryOrdering, SyncScope, Type};
pub use value::{BlockId, GlobalId, InstId, SymbolId};
pub use verify::{Location, VerifyError, VerifyResult};
