//! Bulk-memory lowering.
//!
//! `memset`/`memcpy`/`memmove` operations become calls to the C library
//! functions of the same name. The runtime intercepts those, so the bulk
//! access is observed without a dedicated probe.

use crate::error::Result;
use crate::ir::{CastKind, Constant, Function, InstId, Instruction, Op, Operand, Type};

use super::probes::LibCall;
use super::PassContext;

/// Replace one bulk-memory operation in place. Returns false for anything else.
pub fn lower_mem_intrinsic(cx: &mut PassContext<'_>, func: &mut Function, id: InstId) -> Result<bool> {
    let intptr = cx.module.data_layout.int_ptr_type();
    let op = func.inst(id).op.clone();
    let (lib, args) = match op {
        Op::MemSet { dst, value, len } => {
            let value = int_cast(cx, func, id, value, &Type::i32())?;
            let len = int_cast(cx, func, id, len, &intptr)?;
            (LibCall::Memset, vec![dst, value, len])
        }
        Op::MemCopy { dst, src, len } => {
            let len = int_cast(cx, func, id, len, &intptr)?;
            (LibCall::Memcpy, vec![dst, src, len])
        }
        Op::MemMove { dst, src, len } => {
            let len = int_cast(cx, func, id, len, &intptr)?;
            (LibCall::Memmove, vec![dst, src, len])
        }
        _ => return Ok(false),
    };

    let loc = func.inst(id).loc;
    let call = cx.libcall(lib, args, loc)?;
    let inst = func.inst_mut(id);
    inst.op = call.op;
    inst.ty = call.ty;
    cx.stats.lowered_mem_intrinsics += 1;
    tracing::trace!(inst = id.index(), lib = lib.name(), "bulk memory lowered");
    Ok(true)
}

/// Zero-extend or truncate an integer operand to `to`. Constants are folded.
fn int_cast(
    cx: &mut PassContext<'_>,
    func: &mut Function,
    anchor: InstId,
    value: Operand,
    to: &Type,
) -> Result<Operand> {
    let Some(to_bits) = to.int_bits() else {
        return Ok(value);
    };
    if let Operand::Const(Constant::Int { value: v, .. }) = value {
        return Ok(Operand::int(to_bits, v));
    }
    let Some(from_bits) = cx.module.operand_type(func, value).and_then(|t| t.int_bits()) else {
        return Ok(value);
    };
    let kind = match from_bits.cmp(&to_bits) {
        std::cmp::Ordering::Equal => return Ok(value),
        std::cmp::Ordering::Less => CastKind::ZExt,
        std::cmp::Ordering::Greater => CastKind::Trunc,
    };
    let loc = func.inst(anchor).loc;
    let cast = Instruction::new(Op::Cast { kind, value }, to.clone()).with_loc(loc);
    Ok(cx.insert_before(func, anchor, cast)?.into())
}
