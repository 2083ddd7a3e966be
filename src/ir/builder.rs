//! Builder API for constructing function bodies.

use super::function::Function;
use super::instruction::{
    BinOp, Callee, CastKind, DebugLoc, ICmpPred, Instruction, Op, Operand,
};
use super::types::{AtomicRmwOp, MemoryOrdering, SyncScope, Type};
use super::value::{BlockId, InstId, SymbolId};

/// Appends instructions to the current block of a function.
///
/// Every instruction created while a debug location is set carries it.
pub struct Builder<'a> {
    func: &'a mut Function,
    current_block: Option<BlockId>,
    current_loc: Option<DebugLoc>,
}

impl<'a> Builder<'a> {
    pub fn new(func: &'a mut Function) -> Self {
        Self {
            func,
            current_block: None,
            current_loc: None,
        }
    }

    pub fn create_block(&mut self) -> BlockId {
        self.func.create_block()
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current_block = Some(block);
    }

    pub fn set_loc(&mut self, loc: Option<DebugLoc>) {
        self.current_loc = loc;
    }

    fn push(&mut self, op: Op, ty: Type) -> InstId {
        let inst = Instruction::new(op, ty).with_loc(self.current_loc);
        match self.current_block {
            Some(block) => self.func.append(block, inst),
            None => self.func.create_inst(inst),
        }
    }

    /// Attach a source-level name to a value.
    pub fn set_name(&mut self, inst: InstId, name: SymbolId) {
        self.func.inst_mut(inst).name = Some(name);
    }

    /// Tag a load or store as a vtable pointer access.
    pub fn mark_vtable(&mut self, inst: InstId) {
        self.func.inst_mut(inst).vtable_access = true;
    }

    pub fn stack_slot(&mut self, ty: Type) -> InstId {
        self.push(Op::StackSlot { ty, count: 1 }, Type::ptr())
    }

    pub fn stack_array(&mut self, ty: Type, count: u32) -> InstId {
        self.push(Op::StackSlot { ty, count }, Type::ptr())
    }

    pub fn ptr_offset(&mut self, base: impl Into<Operand>, offset: Operand, ty: Type) -> InstId {
        self.push(
            Op::PtrOffset {
                base: base.into(),
                offset,
            },
            ty,
        )
    }

    pub fn cast(&mut self, kind: CastKind, value: impl Into<Operand>, ty: Type) -> InstId {
        self.push(
            Op::Cast {
                kind,
                value: value.into(),
            },
            ty,
        )
    }

    pub fn binary(&mut self, op: BinOp, lhs: Operand, rhs: Operand, ty: Type) -> InstId {
        self.push(Op::Binary { op, lhs, rhs }, ty)
    }

    pub fn icmp(&mut self, pred: ICmpPred, lhs: Operand, rhs: Operand) -> InstId {
        self.push(Op::ICmp { pred, lhs, rhs }, Type::i1())
    }

    pub fn select(&mut self, cond: Operand, if_true: Operand, if_false: Operand, ty: Type) -> InstId {
        self.push(
            Op::Select {
                cond,
                if_true,
                if_false,
            },
            ty,
        )
    }

    pub fn extract_value(&mut self, aggregate: impl Into<Operand>, index: u32, ty: Type) -> InstId {
        self.push(
            Op::ExtractValue {
                aggregate: aggregate.into(),
                index,
            },
            ty,
        )
    }

    pub fn load(&mut self, ty: Type, addr: impl Into<Operand>, align: u32) -> InstId {
        self.push(
            Op::Load {
                addr: addr.into(),
                align,
            },
            ty,
        )
    }

    pub fn store(&mut self, value: Operand, addr: impl Into<Operand>, align: u32) -> InstId {
        self.push(
            Op::Store {
                value,
                addr: addr.into(),
                align,
            },
            Type::Void,
        )
    }

    pub fn atomic_load(
        &mut self,
        ty: Type,
        addr: impl Into<Operand>,
        ordering: MemoryOrdering,
        scope: SyncScope,
    ) -> InstId {
        self.push(
            Op::AtomicLoad {
                addr: addr.into(),
                align: 0,
                ordering,
                scope,
            },
            ty,
        )
    }

    pub fn atomic_store(
        &mut self,
        value: Operand,
        addr: impl Into<Operand>,
        ordering: MemoryOrdering,
        scope: SyncScope,
    ) -> InstId {
        self.push(
            Op::AtomicStore {
                value,
                addr: addr.into(),
                align: 0,
                ordering,
                scope,
            },
            Type::Void,
        )
    }

    /// Read-modify-write; yields the previous value of type `ty`.
    pub fn atomic_rmw(
        &mut self,
        op: AtomicRmwOp,
        ty: Type,
        addr: impl Into<Operand>,
        value: Operand,
        ordering: MemoryOrdering,
    ) -> InstId {
        self.push(
            Op::AtomicRmw {
                op,
                addr: addr.into(),
                value,
                ordering,
                scope: SyncScope::CrossThread,
            },
            ty,
        )
    }

    /// Compare-and-swap on values of type `ty`; yields `{ty, i1}`.
    pub fn cmpxchg(
        &mut self,
        ty: Type,
        addr: impl Into<Operand>,
        expected: Operand,
        new: Operand,
        success: MemoryOrdering,
        failure: MemoryOrdering,
    ) -> InstId {
        self.push(
            Op::CmpXchg {
                addr: addr.into(),
                expected,
                new,
                success,
                failure,
                scope: SyncScope::CrossThread,
            },
            Type::Struct(vec![ty, Type::i1()]),
        )
    }

    pub fn fence(&mut self, ordering: MemoryOrdering, scope: SyncScope) -> InstId {
        self.push(Op::Fence { ordering, scope }, Type::Void)
    }

    pub fn memset(&mut self, dst: impl Into<Operand>, value: Operand, len: Operand) -> InstId {
        self.push(
            Op::MemSet {
                dst: dst.into(),
                value,
                len,
            },
            Type::Void,
        )
    }

    pub fn memcpy(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>, len: Operand) -> InstId {
        self.push(
            Op::MemCopy {
                dst: dst.into(),
                src: src.into(),
                len,
            },
            Type::Void,
        )
    }

    pub fn memmove(&mut self, dst: impl Into<Operand>, src: impl Into<Operand>, len: Operand) -> InstId {
        self.push(
            Op::MemMove {
                dst: dst.into(),
                src: src.into(),
                len,
            },
            Type::Void,
        )
    }

    /// Call that may unwind.
    pub fn call(&mut self, callee: Callee, args: Vec<Operand>, ret: Type) -> InstId {
        self.push(
            Op::Call {
                callee,
                args,
                nounwind: false,
            },
            ret,
        )
    }

    pub fn call_nounwind(&mut self, callee: Callee, args: Vec<Operand>, ret: Type) -> InstId {
        self.push(
            Op::Call {
                callee,
                args,
                nounwind: true,
            },
            ret,
        )
    }

    pub fn invoke(
        &mut self,
        callee: Callee,
        args: Vec<Operand>,
        ret: Type,
        normal: BlockId,
        unwind: BlockId,
    ) -> InstId {
        self.push(
            Op::Invoke {
                callee,
                args,
                normal,
                unwind,
            },
            ret,
        )
    }

    pub fn landing_pad(&mut self, cleanup: bool) -> InstId {
        self.push(Op::LandingPad { cleanup }, Type::Token)
    }

    pub fn ret(&mut self, value: Option<Operand>) -> InstId {
        self.push(Op::Ret(value), Type::Void)
    }

    pub fn br(&mut self, dest: BlockId) -> InstId {
        self.push(Op::Br(dest), Type::Void)
    }

    pub fn cond_br(&mut self, cond: Operand, then_dest: BlockId, else_dest: BlockId) -> InstId {
        self.push(
            Op::CondBr {
                cond,
                then_dest,
                else_dest,
            },
            Type::Void,
        )
    }

    pub fn resume(&mut self, token: Operand) -> InstId {
        self.push(Op::Resume(token), Type::Void)
    }

    pub fn unreachable(&mut self) -> InstId {
        self.push(Op::Unreachable, Type::Void)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionAttrs, InstKind, SymbolId};

    #[test]
    fn test_builder_appends_in_order() {
        let mut func = Function::new(SymbolId(0), vec![Type::ptr()], Type::i32(), FunctionAttrs::default());
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let old = b.atomic_rmw(
            AtomicRmwOp::Add,
            Type::i32(),
            Operand::Param(0),
            Operand::i32(1),
            MemoryOrdering::SeqCst,
        );
        let ret = b.ret(Some(old.into()));

        assert_eq!(func.block(entry).insts, vec![old, ret]);
        assert_eq!(func.inst(old).kind(), InstKind::AtomicRmw(AtomicRmwOp::Add));
        assert_eq!(func.inst(old).ty, Type::i32());
    }

    #[test]
    fn test_cmpxchg_result_is_pair() {
        let mut func = Function::new(SymbolId(0), vec![Type::ptr()], Type::Void, FunctionAttrs::default());
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let cas = b.cmpxchg(
            Type::i64(),
            Operand::Param(0),
            Operand::int(64, 0),
            Operand::int(64, 1),
            MemoryOrdering::AcqRel,
            MemoryOrdering::Acquire,
        );
        assert_eq!(func.inst(cas).ty, Type::Struct(vec![Type::i64(), Type::i1()]));
    }
}
