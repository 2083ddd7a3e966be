//! Atomic operation lowering.
//!
//! Every cross-thread atomic load/store, read-modify-write, compare-and-swap
//! and fence becomes a call into the runtime, which performs the operation
//! itself. Values travel as integers of the access width and are converted
//! back so users of the original result see the same type.

use crate::error::{Error, Result};
use crate::ir::{
    CastKind, Constant, Function, ICmpPred, InstId, Instruction, MemoryOrdering, Op, Operand,
    SyncScope, Type,
};

use super::probes::{encode_ordering, AccessSize, Probe};
use super::PassContext;

/// Whether an instruction is lowered here rather than treated as a plain access.
pub fn is_lowered_atomic(op: &Op) -> bool {
    match op {
        Op::AtomicLoad { scope, .. } | Op::AtomicStore { scope, .. } => {
            *scope == SyncScope::CrossThread
        }
        Op::AtomicRmw { .. } | Op::CmpXchg { .. } | Op::Fence { .. } => true,
        _ => false,
    }
}

/// Orderings an atomic instruction carries.
pub fn orderings_of(op: &Op) -> Vec<MemoryOrdering> {
    match op {
        Op::AtomicLoad { ordering, .. }
        | Op::AtomicStore { ordering, .. }
        | Op::AtomicRmw { ordering, .. }
        | Op::Fence { ordering, .. } => vec![*ordering],
        Op::CmpXchg {
            success, failure, ..
        } => vec![*success, *failure],
        _ => Vec::new(),
    }
}

/// Lower one atomic instruction. Returns false when it was left untouched.
pub fn lower_atomic(cx: &mut PassContext<'_>, func: &mut Function, id: InstId) -> Result<bool> {
    let inst = func.inst(id).clone();
    let lowered = match inst.op {
        Op::AtomicLoad { addr, ordering, .. } => lower_load(cx, func, id, &inst.ty, addr, ordering)?,
        Op::AtomicStore {
            value,
            addr,
            ordering,
            ..
        } => lower_store(cx, func, id, value, addr, ordering)?,
        Op::AtomicRmw {
            op,
            addr,
            value,
            ordering,
            ..
        } => {
            let Some(size) = access_size(cx, &inst.ty) else {
                return Ok(false);
            };
            let Some(probe) = Probe::rmw(op, size) else {
                cx.stats.unsupported_rmw += 1;
                tracing::trace!(inst = id.index(), %op, "no runtime probe for rmw kind");
                return Ok(false);
            };
            let int_ty = size.int_type();
            let value_ty = cx.module.operand_type(func, value);
            let value = cast_value(cx, func, id, value, value_ty, &int_ty)?;
            let ord = ordering_operand(cx, ordering)?;
            let call = cx.probe_call(probe, vec![addr, value, ord], inst.loc)?;
            replace_with_call(cx, func, id, call, &inst.ty)?;
            true
        }
        Op::CmpXchg {
            addr,
            expected,
            new,
            success,
            failure,
            ..
        } => lower_cmpxchg(cx, func, id, &inst, addr, expected, new, success, failure)?,
        Op::Fence { ordering, scope } => {
            let probe = match scope {
                SyncScope::SingleThread => Probe::SignalFence,
                SyncScope::CrossThread => Probe::ThreadFence,
            };
            let ord = ordering_operand(cx, ordering)?;
            let call = cx.probe_call(probe, vec![ord], inst.loc)?;
            func.inst_mut(id).op = call.op;
            true
        }
        _ => false,
    };
    if lowered {
        cx.stats.instrumented_atomics += 1;
    }
    Ok(lowered)
}

fn access_size(cx: &mut PassContext<'_>, ty: &Type) -> Option<AccessSize> {
    let size = cx
        .module
        .data_layout
        .store_size(ty)
        .and_then(AccessSize::from_bytes);
    if size.is_none() {
        cx.stats.accesses_with_bad_size += 1;
        tracing::trace!(%ty, "atomic access size has no probe");
    }
    size
}

fn ordering_operand(cx: &PassContext<'_>, ordering: MemoryOrdering) -> Result<Operand> {
    encode_ordering(ordering)
        .map(|code| Operand::i32(u64::from(code)))
        .ok_or_else(|| Error::UnsupportedOrdering {
            function: cx.function.clone(),
            ordering,
        })
}

fn lower_load(
    cx: &mut PassContext<'_>,
    func: &mut Function,
    id: InstId,
    ty: &Type,
    addr: Operand,
    ordering: MemoryOrdering,
) -> Result<bool> {
    let Some(size) = access_size(cx, ty) else {
        return Ok(false);
    };
    let ord = ordering_operand(cx, ordering)?;
    let loc = func.inst(id).loc;
    let call = cx.probe_call(Probe::AtomicLoad(size), vec![addr, ord], loc)?;
    replace_with_call(cx, func, id, call, ty)?;
    Ok(true)
}

fn lower_store(
    cx: &mut PassContext<'_>,
    func: &mut Function,
    id: InstId,
    value: Operand,
    addr: Operand,
    ordering: MemoryOrdering,
) -> Result<bool> {
    let value_ty = cx.module.operand_type(func, value);
    let Some(size) = value_ty.as_ref().and_then(|ty| access_size(cx, ty)) else {
        if value_ty.is_none() {
            cx.stats.accesses_with_bad_size += 1;
        }
        return Ok(false);
    };
    let value = cast_value(cx, func, id, value, value_ty, &size.int_type())?;
    let ord = ordering_operand(cx, ordering)?;
    let loc = func.inst(id).loc;
    let call = cx.probe_call(Probe::AtomicStore(size), vec![addr, value, ord], loc)?;
    func.inst_mut(id).op = call.op;
    Ok(true)
}

#[allow(clippy::too_many_arguments)]
fn lower_cmpxchg(
    cx: &mut PassContext<'_>,
    func: &mut Function,
    id: InstId,
    inst: &Instruction,
    addr: Operand,
    expected: Operand,
    new: Operand,
    success: MemoryOrdering,
    failure: MemoryOrdering,
) -> Result<bool> {
    let Some(value_ty) = cx.module.operand_type(func, new) else {
        cx.stats.accesses_with_bad_size += 1;
        return Ok(false);
    };
    let Some(size) = access_size(cx, &value_ty) else {
        return Ok(false);
    };
    let int_ty = size.int_type();
    let expected_ty = cx.module.operand_type(func, expected);
    let cmp = cast_value(cx, func, id, expected, expected_ty, &int_ty)?;
    let new = cast_value(cx, func, id, new, Some(value_ty.clone()), &int_ty)?;
    let success = ordering_operand(cx, success)?;
    let failure = ordering_operand(cx, failure)?;

    let call = cx.probe_call(
        Probe::AtomicCas(size),
        vec![addr, cmp, new, success, failure],
        inst.loc,
    )?;
    let old = cx.insert_before(func, id, call)?;
    let ok = cx.insert_before(
        func,
        id,
        Instruction::new(
            Op::ICmp {
                pred: ICmpPred::Eq,
                lhs: old.into(),
                rhs: cmp,
            },
            Type::i1(),
        )
        .with_loc(inst.loc),
    )?;
    let old = cast_value(cx, func, id, old.into(), Some(int_ty), &value_ty)?;
    let pair = cx.insert_before(
        func,
        id,
        Instruction::new(
            Op::InsertValue {
                aggregate: Operand::Const(Constant::Undef),
                value: old,
                index: 0,
            },
            inst.ty.clone(),
        )
        .with_loc(inst.loc),
    )?;
    func.inst_mut(id).op = Op::InsertValue {
        aggregate: pair.into(),
        value: ok.into(),
        index: 1,
    };
    Ok(true)
}

/// Make `id` produce the result of `call`, converting back to `ty` if the
/// probe returns a different type. The id keeps its uses either way.
fn replace_with_call(
    cx: &mut PassContext<'_>,
    func: &mut Function,
    id: InstId,
    call: Instruction,
    ty: &Type,
) -> Result<()> {
    if call.ty == *ty {
        func.inst_mut(id).op = call.op;
        return Ok(());
    }
    let call_ty = call.ty.clone();
    let result = cx.insert_before(func, id, call)?;
    func.inst_mut(id).op = Op::Cast {
        kind: cast_kind(&call_ty, ty),
        value: result.into(),
    };
    Ok(())
}

fn cast_kind(from: &Type, to: &Type) -> CastKind {
    match (from, to) {
        (Type::Ptr(_), Type::Int(_)) => CastKind::PtrToInt,
        (Type::Int(_), Type::Ptr(_)) => CastKind::IntToPtr,
        _ => CastKind::Bitcast,
    }
}

/// Bit- or pointer-cast `value` to `to`, inserting the cast before `anchor`.
fn cast_value(
    cx: &mut PassContext<'_>,
    func: &mut Function,
    anchor: InstId,
    value: Operand,
    from: Option<Type>,
    to: &Type,
) -> Result<Operand> {
    let Some(from) = from else {
        return Ok(value);
    };
    if from == *to {
        return Ok(value);
    }
    if let (Operand::Const(Constant::Null), Type::Int(bits)) = (value, to) {
        return Ok(Operand::int(*bits, 0));
    }
    let loc = func.inst(anchor).loc;
    let cast = Instruction::new(
        Op::Cast {
            kind: cast_kind(&from, to),
            value,
        },
        to.clone(),
    )
    .with_loc(loc);
    Ok(cx.insert_before(func, anchor, cast)?.into())
}
