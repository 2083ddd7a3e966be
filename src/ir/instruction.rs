//! IR instruction definitions.

use serde::{Deserialize, Serialize};

use super::types::{AtomicRmwOp, MemoryOrdering, SyncScope, Type};
use super::value::{BlockId, GlobalId, InstId, SymbolId};

/// Constant operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Constant {
    /// Integer constant; `value` holds the low `bits` bits.
    Int { bits: u32, value: u64 },
    /// Null pointer.
    Null,
    /// Undefined value of the consuming instruction's type.
    Undef,
    /// Pointer to an interned, NUL-terminated string literal.
    Str(SymbolId),
}

/// Value operand of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// Result of another instruction.
    Inst(InstId),
    /// Function parameter by position.
    Param(u32),
    /// Address of a module global.
    Global(GlobalId),
    Const(Constant),
}

impl Operand {
    /// Integer constant operand.
    pub fn int(bits: u32, value: u64) -> Self {
        Operand::Const(Constant::Int {
            bits,
            value: truncate(value, bits),
        })
    }

    pub fn i32(value: u64) -> Self {
        Operand::int(32, value)
    }

    pub fn as_inst(self) -> Option<InstId> {
        match self {
            Operand::Inst(id) => Some(id),
            _ => None,
        }
    }
}

impl From<InstId> for Operand {
    fn from(id: InstId) -> Self {
        Operand::Inst(id)
    }
}

impl From<GlobalId> for Operand {
    fn from(id: GlobalId) -> Self {
        Operand::Global(id)
    }
}

/// Keep the low `bits` bits of `value`.
pub fn truncate(value: u64, bits: u32) -> u64 {
    if bits >= 64 {
        value
    } else {
        value & ((1u64 << bits) - 1)
    }
}

/// Source position attached to an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DebugLoc {
    pub line: u32,
    pub column: u32,
    /// File name as written in the compile unit.
    pub file: SymbolId,
    /// Compilation directory; `None` when unknown.
    pub directory: Option<SymbolId>,
}

/// Conversion kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CastKind {
    Bitcast,
    PtrToInt,
    IntToPtr,
    ZExt,
    SExt,
    Trunc,
}

/// Integer binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    LShr,
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ICmpPred {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Slt,
    Sgt,
}

/// Call target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Callee {
    /// Named function, defined or declared in the module.
    Direct(SymbolId),
    /// Function pointer.
    Indirect(Operand),
}

/// Instruction opcodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    // Values and addressing
    /// Stack allocation of `count` elements of `ty`; yields a pointer.
    StackSlot { ty: Type, count: u32 },
    /// Byte offset from a pointer.
    PtrOffset { base: Operand, offset: Operand },
    Cast { kind: CastKind, value: Operand },
    Binary { op: BinOp, lhs: Operand, rhs: Operand },
    ICmp { pred: ICmpPred, lhs: Operand, rhs: Operand },
    Select { cond: Operand, if_true: Operand, if_false: Operand },
    ExtractElement { vector: Operand, index: u32 },
    InsertValue { aggregate: Operand, value: Operand, index: u32 },
    ExtractValue { aggregate: Operand, index: u32 },

    // Memory
    /// Plain load; the instruction's type is the loaded type.
    Load { addr: Operand, align: u32 },
    Store { value: Operand, addr: Operand, align: u32 },
    AtomicLoad { addr: Operand, align: u32, ordering: MemoryOrdering, scope: SyncScope },
    AtomicStore {
        value: Operand,
        addr: Operand,
        align: u32,
        ordering: MemoryOrdering,
        scope: SyncScope,
    },
    AtomicRmw {
        op: AtomicRmwOp,
        addr: Operand,
        value: Operand,
        ordering: MemoryOrdering,
        scope: SyncScope,
    },
    /// Compare-and-swap; yields `{old, success}`.
    CmpXchg {
        addr: Operand,
        expected: Operand,
        new: Operand,
        success: MemoryOrdering,
        failure: MemoryOrdering,
        scope: SyncScope,
    },
    Fence { ordering: MemoryOrdering, scope: SyncScope },

    // Bulk memory
    MemSet { dst: Operand, value: Operand, len: Operand },
    MemCopy { dst: Operand, src: Operand, len: Operand },
    MemMove { dst: Operand, src: Operand, len: Operand },

    // Calls and exceptions
    Call { callee: Callee, args: Vec<Operand>, nounwind: bool },
    /// Exception landing pad; yields a token.
    LandingPad { cleanup: bool },

    // Terminators
    Ret(Option<Operand>),
    Br(BlockId),
    CondBr { cond: Operand, then_dest: BlockId, else_dest: BlockId },
    /// Call with an explicit unwind edge.
    Invoke { callee: Callee, args: Vec<Operand>, normal: BlockId, unwind: BlockId },
    /// Continue unwinding with the given token.
    Resume(Operand),
    Unreachable,
}

/// Coarse instruction classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstKind {
    Load,
    Store,
    AtomicLoad,
    AtomicStore,
    AtomicRmw(AtomicRmwOp),
    AtomicCas,
    Fence,
    /// Call or invoke.
    Call,
    MemSet,
    MemCopy,
    MemMove,
    Terminator,
    Other,
}

impl Op {
    pub fn kind(&self) -> InstKind {
        match self {
            Op::Load { .. } => InstKind::Load,
            Op::Store { .. } => InstKind::Store,
            Op::AtomicLoad { .. } => InstKind::AtomicLoad,
            Op::AtomicStore { .. } => InstKind::AtomicStore,
            Op::AtomicRmw { op, .. } => InstKind::AtomicRmw(*op),
            Op::CmpXchg { .. } => InstKind::AtomicCas,
            Op::Fence { .. } => InstKind::Fence,
            Op::Call { .. } | Op::Invoke { .. } => InstKind::Call,
            Op::MemSet { .. } => InstKind::MemSet,
            Op::MemCopy { .. } => InstKind::MemCopy,
            Op::MemMove { .. } => InstKind::MemMove,
            Op::Ret(_) | Op::Br(_) | Op::CondBr { .. } | Op::Resume(_) | Op::Unreachable => {
                InstKind::Terminator
            }
            Op::StackSlot { .. }
            | Op::PtrOffset { .. }
            | Op::Cast { .. }
            | Op::Binary { .. }
            | Op::ICmp { .. }
            | Op::Select { .. }
            | Op::ExtractElement { .. }
            | Op::InsertValue { .. }
            | Op::ExtractValue { .. }
            | Op::LandingPad { .. } => InstKind::Other,
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Op::Ret(_)
                | Op::Br(_)
                | Op::CondBr { .. }
                | Op::Invoke { .. }
                | Op::Resume(_)
                | Op::Unreachable
        )
    }

    /// Anything that transfers control to other code, including bulk memory.
    pub fn is_call_like(&self) -> bool {
        matches!(
            self,
            Op::Call { .. } | Op::Invoke { .. } | Op::MemSet { .. } | Op::MemCopy { .. } | Op::MemMove { .. }
        )
    }

    /// Direct callee of a call or invoke.
    pub fn direct_callee(&self) -> Option<SymbolId> {
        match self {
            Op::Call { callee: Callee::Direct(sym), .. }
            | Op::Invoke { callee: Callee::Direct(sym), .. } => Some(*sym),
            _ => None,
        }
    }

    /// Every operand the instruction reads, in a fixed order.
    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Op::StackSlot { .. }
            | Op::LandingPad { .. }
            | Op::Fence { .. }
            | Op::Br(_)
            | Op::Unreachable
            | Op::Ret(None) => Vec::new(),
            Op::PtrOffset { base, offset } => vec![*base, *offset],
            Op::Cast { value, .. } => vec![*value],
            Op::Binary { lhs, rhs, .. } | Op::ICmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            Op::Select { cond, if_true, if_false } => vec![*cond, *if_true, *if_false],
            Op::ExtractElement { vector, .. } => vec![*vector],
            Op::InsertValue { aggregate, value, .. } => vec![*aggregate, *value],
            Op::ExtractValue { aggregate, .. } => vec![*aggregate],
            Op::Load { addr, .. } | Op::AtomicLoad { addr, .. } => vec![*addr],
            Op::Store { value, addr, .. } | Op::AtomicStore { value, addr, .. } => {
                vec![*value, *addr]
            }
            Op::AtomicRmw { addr, value, .. } => vec![*addr, *value],
            Op::CmpXchg { addr, expected, new, .. } => vec![*addr, *expected, *new],
            Op::MemSet { dst, value, len } => vec![*dst, *value, *len],
            Op::MemCopy { dst, src, len } | Op::MemMove { dst, src, len } => {
                vec![*dst, *src, *len]
            }
            Op::Call { callee, args, .. } | Op::Invoke { callee, args, .. } => {
                let mut ops = Vec::with_capacity(args.len() + 1);
                if let Callee::Indirect(target) = callee {
                    ops.push(*target);
                }
                ops.extend(args.iter().copied());
                ops
            }
            Op::Ret(Some(value)) | Op::Resume(value) => vec![*value],
            Op::CondBr { cond, .. } => vec![*cond],
        }
    }

    /// Rewrite every operand in place.
    pub fn map_operands(&mut self, mut f: impl FnMut(Operand) -> Operand) {
        let mut apply = |op: &mut Operand| *op = f(*op);
        match self {
            Op::StackSlot { .. }
            | Op::LandingPad { .. }
            | Op::Fence { .. }
            | Op::Br(_)
            | Op::Unreachable
            | Op::Ret(None) => {}
            Op::PtrOffset { base, offset } => {
                apply(base);
                apply(offset);
            }
            Op::Cast { value, .. } => apply(value),
            Op::Binary { lhs, rhs, .. } | Op::ICmp { lhs, rhs, .. } => {
                apply(lhs);
                apply(rhs);
            }
            Op::Select { cond, if_true, if_false } => {
                apply(cond);
                apply(if_true);
                apply(if_false);
            }
            Op::ExtractElement { vector, .. } => apply(vector),
            Op::InsertValue { aggregate, value, .. } => {
                apply(aggregate);
                apply(value);
            }
            Op::ExtractValue { aggregate, .. } => apply(aggregate),
            Op::Load { addr, .. } | Op::AtomicLoad { addr, .. } => apply(addr),
            Op::Store { value, addr, .. } | Op::AtomicStore { value, addr, .. } => {
                apply(value);
                apply(addr);
            }
            Op::AtomicRmw { addr, value, .. } => {
                apply(addr);
                apply(value);
            }
            Op::CmpXchg { addr, expected, new, .. } => {
                apply(addr);
                apply(expected);
                apply(new);
            }
            Op::MemSet { dst, value, len } => {
                apply(dst);
                apply(value);
                apply(len);
            }
            Op::MemCopy { dst, src, len } | Op::MemMove { dst, src, len } => {
                apply(dst);
                apply(src);
                apply(len);
            }
            Op::Call { callee, args, .. } | Op::Invoke { callee, args, .. } => {
                if let Callee::Indirect(target) = callee {
                    apply(target);
                }
                for arg in args.iter_mut() {
                    apply(arg);
                }
            }
            Op::Ret(Some(value)) | Op::Resume(value) => apply(value),
            Op::CondBr { cond, .. } => apply(cond),
        }
    }

    /// Successor blocks of a terminator.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Op::Br(dest) => vec![*dest],
            Op::CondBr { then_dest, else_dest, .. } => vec![*then_dest, *else_dest],
            Op::Invoke { normal, unwind, .. } => vec![*normal, *unwind],
            _ => Vec::new(),
        }
    }
}

/// An instruction stored in a function's arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Op,
    /// Result type; `Void` when the instruction produces nothing.
    pub ty: Type,
    pub loc: Option<DebugLoc>,
    /// Source-level name of the produced value.
    pub name: Option<SymbolId>,
    /// Type-based alias metadata marks this load or store as touching a
    /// virtual-dispatch-table pointer.
    pub vtable_access: bool,
}

impl Instruction {
    pub fn new(op: Op, ty: Type) -> Self {
        Self {
            op,
            ty,
            loc: None,
            name: None,
            vtable_access: false,
        }
    }

    pub fn with_loc(mut self, loc: Option<DebugLoc>) -> Self {
        self.loc = loc;
        self
    }

    pub fn kind(&self) -> InstKind {
        self.op.kind()
    }

    pub fn is_terminator(&self) -> bool {
        self.op.is_terminator()
    }
}
