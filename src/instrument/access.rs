//! Plain load/store lowering.
//!
//! Selected accesses are first turned into a plan (probe, address, site) and
//! the plan is then applied, inserting each probe call immediately before the
//! access it covers.

use crate::error::Result;
use crate::ir::{CastKind, Function, InstId, Instruction, Op, Operand, Type};
use crate::runtime::AccessSite;

use super::probes::{is_aligned, AccessKind, AccessSize, Probe};
use super::redundancy::ScheduledAccess;
use super::PassContext;

/// One probe call to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAccess {
    pub inst: InstId,
    pub probe: Probe,
    pub addr: Operand,
    /// New vtable pointer of a vtable store.
    pub stored: Option<Operand>,
    pub site: AccessSite,
}

/// Decide the probe of every scheduled access. Accesses without a size
/// class are dropped and counted.
pub fn plan_accesses(
    cx: &mut PassContext<'_>,
    func: &Function,
    scheduled: &[ScheduledAccess],
) -> Vec<PlannedAccess> {
    let mut plan = Vec::with_capacity(scheduled.len());
    for access in scheduled {
        let inst = func.inst(access.inst);
        let (accessed_ty, align, stored) = match &inst.op {
            Op::Load { align, .. } | Op::AtomicLoad { align, .. } => {
                (Some(inst.ty.clone()), *align, None)
            }
            Op::Store { value, align, .. } | Op::AtomicStore { value, align, .. } => {
                (cx.module.operand_type(func, *value), *align, Some(*value))
            }
            _ => continue,
        };

        let size = accessed_ty
            .as_ref()
            .and_then(|ty| cx.module.data_layout.store_size(ty))
            .and_then(AccessSize::from_bytes);
        let Some(size) = size else {
            cx.stats.accesses_with_bad_size += 1;
            tracing::trace!(inst = access.inst.index(), ty = ?accessed_ty, "access size has no probe");
            continue;
        };

        let probe = match (access.kind, inst.vtable_access) {
            (AccessKind::Write, true) => Probe::VptrUpdate,
            (AccessKind::Read, true) => Probe::VptrRead,
            (kind, false) => Probe::plain(kind, size, is_aligned(align, size)),
        };

        let site = AccessSite {
            line: cx.debug.line(func, access.inst),
            object: cx.debug.object_name(cx.module, func, access.addr),
            file: cx.debug.file_name(cx.module, func, access.inst),
        };

        plan.push(PlannedAccess {
            inst: access.inst,
            probe,
            addr: access.addr,
            stored: if probe == Probe::VptrUpdate { stored } else { None },
            site,
        });
    }
    plan
}

/// Insert the planned probe calls. Returns true if anything was inserted.
pub fn apply_plan(
    cx: &mut PassContext<'_>,
    func: &mut Function,
    plan: Vec<PlannedAccess>,
) -> Result<bool> {
    let changed = !plan.is_empty();
    for access in plan {
        let loc = func.inst(access.inst).loc;
        let line = Operand::i32(u64::from(access.site.line));
        let object = cx.string(&access.site.object);
        let file = cx.string(&access.site.file);

        let args = match access.probe {
            Probe::VptrUpdate => {
                let new_value = match access.stored {
                    Some(value) => vptr_operand(cx, func, access.inst, value)?,
                    None => Operand::Const(crate::ir::Constant::Null),
                };
                cx.stats.instrumented_vtable_writes += 1;
                vec![access.addr, new_value, line, object, file]
            }
            Probe::VptrRead => {
                cx.stats.instrumented_vtable_reads += 1;
                vec![access.addr, line, object, file]
            }
            Probe::Write { .. } => {
                cx.stats.instrumented_writes += 1;
                vec![access.addr, line, object, file]
            }
            _ => {
                cx.stats.instrumented_reads += 1;
                vec![access.addr, line, object, file]
            }
        };

        let call = cx.probe_call(access.probe, args, loc)?;
        cx.insert_before(func, access.inst, call)?;
        tracing::trace!(inst = access.inst.index(), probe = %access.probe, "access instrumented");
    }
    Ok(changed)
}

/// The stored vtable pointer as a pointer: first lane of a vector, integers
/// converted.
fn vptr_operand(
    cx: &mut PassContext<'_>,
    func: &mut Function,
    store: InstId,
    value: Operand,
) -> Result<Operand> {
    let loc = func.inst(store).loc;
    let mut value = value;
    let mut ty = cx.module.operand_type(func, value);

    if let Some(Type::Vector(elem, _)) = ty.clone() {
        let extract = Instruction::new(Op::ExtractElement { vector: value, index: 0 }, *elem.clone())
            .with_loc(loc);
        value = cx.insert_before(func, store, extract)?.into();
        ty = Some(*elem);
    }
    if let Some(Type::Int(_)) = ty {
        let cast = Instruction::new(
            Op::Cast {
                kind: CastKind::IntToPtr,
                value,
            },
            Type::ptr(),
        )
        .with_loc(loc);
        value = cx.insert_before(func, store, cast)?.into();
    }
    Ok(value)
}
