//! Text format for the IR.
//!
//! ```text
//! func @bump(ptr) -> i32 [race_checked] {
//! bb0:
//!   v0 = atomicrmw add seq_cst p0, i32 1 : i32
//!   ret v0
//! }
//! ```
//!
//! Values are printed by arena index, so numbering is stable across
//! instrumentation.

use std::fmt;

use super::function::Function;
use super::instruction::{Callee, Constant, Op, Operand};
use super::module::Module;

/// Displays one function with symbol names resolved through its module.
pub struct FunctionDisplay<'a> {
    pub module: &'a Module,
    pub func: &'a Function,
}

impl Module {
    pub fn display_function<'a>(&'a self, func: &'a Function) -> FunctionDisplay<'a> {
        FunctionDisplay { module: self, func }
    }
}

impl FunctionDisplay<'_> {
    fn operand(&self, op: Operand) -> String {
        match op {
            Operand::Inst(id) => format!("v{}", id.index()),
            Operand::Param(idx) => format!("p{}", idx),
            Operand::Global(id) => {
                format!("@{}", self.module.resolve(self.module.global(id).name))
            }
            Operand::Const(Constant::Int { bits, value }) => format!("i{} {}", bits, value),
            Operand::Const(Constant::Null) => "null".to_string(),
            Operand::Const(Constant::Undef) => "undef".to_string(),
            Operand::Const(Constant::Str(sym)) => format!("{:?}", self.module.resolve(sym)),
        }
    }

    fn operands(&self, ops: &[Operand]) -> String {
        ops.iter()
            .map(|o| self.operand(*o))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn callee(&self, callee: &Callee) -> String {
        match callee {
            Callee::Direct(sym) => format!("@{}", self.module.resolve(*sym)),
            Callee::Indirect(target) => self.operand(*target),
        }
    }

    fn op(&self, op: &Op) -> String {
        match op {
            Op::StackSlot { ty, count } => format!("stack_slot {}, {}", ty, count),
            Op::PtrOffset { base, offset } => {
                format!("ptr_offset {}, {}", self.operand(*base), self.operand(*offset))
            }
            Op::Cast { kind, value } => format!("{:?} {}", kind, self.operand(*value)).to_lowercase(),
            Op::Binary { op, lhs, rhs } => format!(
                "{} {}, {}",
                format!("{:?}", op).to_lowercase(),
                self.operand(*lhs),
                self.operand(*rhs)
            ),
            Op::ICmp { pred, lhs, rhs } => format!(
                "icmp {} {}, {}",
                format!("{:?}", pred).to_lowercase(),
                self.operand(*lhs),
                self.operand(*rhs)
            ),
            Op::Select {
                cond,
                if_true,
                if_false,
            } => format!("select {}", self.operands(&[*cond, *if_true, *if_false])),
            Op::ExtractElement { vector, index } => {
                format!("extractelement {}, {}", self.operand(*vector), index)
            }
            Op::InsertValue {
                aggregate,
                value,
                index,
            } => format!(
                "insertvalue {}, {}, {}",
                self.operand(*aggregate),
                self.operand(*value),
                index
            ),
            Op::ExtractValue { aggregate, index } => {
                format!("extractvalue {}, {}", self.operand(*aggregate), index)
            }
            Op::Load { addr, align } => format!("load {}, align {}", self.operand(*addr), align),
            Op::Store { value, addr, align } => format!(
                "store {}, {}, align {}",
                self.operand(*value),
                self.operand(*addr),
                align
            ),
            Op::AtomicLoad { addr, ordering, .. } => {
                format!("load atomic {} {}", ordering, self.operand(*addr))
            }
            Op::AtomicStore {
                value,
                addr,
                ordering,
                ..
            } => format!(
                "store atomic {} {}, {}",
                ordering,
                self.operand(*value),
                self.operand(*addr)
            ),
            Op::AtomicRmw {
                op,
                addr,
                value,
                ordering,
                ..
            } => format!(
                "atomicrmw {} {} {}, {}",
                op,
                ordering,
                self.operand(*addr),
                self.operand(*value)
            ),
            Op::CmpXchg {
                addr,
                expected,
                new,
                success,
                failure,
                ..
            } => format!(
                "cmpxchg {} {} {}",
                self.operands(&[*addr, *expected, *new]),
                success,
                failure
            ),
            Op::Fence { ordering, scope } => format!("fence {:?} {}", scope, ordering),
            Op::MemSet { dst, value, len } => {
                format!("memset {}", self.operands(&[*dst, *value, *len]))
            }
            Op::MemCopy { dst, src, len } => {
                format!("memcpy {}", self.operands(&[*dst, *src, *len]))
            }
            Op::MemMove { dst, src, len } => {
                format!("memmove {}", self.operands(&[*dst, *src, *len]))
            }
            Op::Call {
                callee,
                args,
                nounwind,
            } => format!(
                "call {}({}){}",
                self.callee(callee),
                self.operands(args),
                if *nounwind { " nounwind" } else { "" }
            ),
            Op::LandingPad { cleanup } => {
                format!("landingpad{}", if *cleanup { " cleanup" } else { "" })
            }
            Op::Ret(None) => "ret".to_string(),
            Op::Ret(Some(value)) => format!("ret {}", self.operand(*value)),
            Op::Br(dest) => format!("br bb{}", dest.index()),
            Op::CondBr {
                cond,
                then_dest,
                else_dest,
            } => format!(
                "br {}, bb{}, bb{}",
                self.operand(*cond),
                then_dest.index(),
                else_dest.index()
            ),
            Op::Invoke {
                callee,
                args,
                normal,
                unwind,
            } => format!(
                "invoke {}({}) to bb{} unwind bb{}",
                self.callee(callee),
                self.operands(args),
                normal.index(),
                unwind.index()
            ),
            Op::Resume(token) => format!("resume {}", self.operand(*token)),
            Op::Unreachable => "unreachable".to_string(),
        }
    }
}

impl fmt::Display for FunctionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let func = self.func;
        let params = func
            .params
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "func @{}({}) -> {}",
            self.module.resolve(func.name),
            params,
            func.ret_ty
        )?;
        let attrs = func.attrs();
        if attrs.race_checked {
            write!(f, " [race_checked]")?;
        }
        if attrs.suppressed {
            write!(f, " [suppressed]")?;
        }
        writeln!(f, " {{")?;
        for block in func.block_ids() {
            writeln!(f, "bb{}:", block.index())?;
            for &id in &func.block(block).insts {
                let inst = func.inst(id);
                let text = self.op(&inst.op);
                if inst.ty.is_void() {
                    writeln!(f, "  {}", text)?;
                } else {
                    writeln!(f, "  v{} = {} : {}", id.index(), text, inst.ty)?;
                }
            }
        }
        write!(f, "}}")
    }
}
