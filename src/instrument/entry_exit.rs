//! Function entry/exit probes and runtime-ignore brackets.
//!
//! Exit probes must run on every way out of a function, including
//! exceptional unwinding. [`enumerate_exits`] finds the normal returns and
//! resumes, and when exception handling is enabled turns every call that may
//! unwind into an invoke whose unwind edge lands in one synthesized cleanup
//! block, which then counts as an exit of its own.

use crate::error::Result;
use crate::ir::{BlockId, Callee, Function, Instruction, Module, Op, Type};

use super::probes::Probe;
use super::PassContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Return,
    Unwind,
}

/// A block whose terminator leaves the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitPoint {
    pub block: BlockId,
    pub kind: ExitKind,
}

/// Whether a call instruction may propagate an exception.
pub fn may_unwind(module: &Module, op: &Op) -> bool {
    match op {
        Op::Call {
            nounwind: true, ..
        } => false,
        Op::Call {
            callee: Callee::Direct(sym),
            ..
        } => !module.callee_is_nounwind(*sym),
        Op::Call { .. } => true,
        _ => false,
    }
}

/// Enumerate every exit of `func`, creating the unwind cleanup block when
/// `handle_exceptions` is set and some call may unwind.
///
/// Calls are turned into invokes before exits are collected, so every exit
/// names the block that holds its terminator after splitting.
pub fn enumerate_exits(module: &Module, func: &mut Function, handle_exceptions: bool) -> Vec<ExitPoint> {
    if handle_exceptions {
        convert_throwing_calls(module, func);
    }

    func.block_ids()
        .filter_map(|block| {
            let term = func.terminator(block)?;
            let kind = match func.inst(term).op {
                Op::Ret(_) => ExitKind::Return,
                Op::Resume(_) => ExitKind::Unwind,
                _ => return None,
            };
            Some(ExitPoint { block, kind })
        })
        .collect()
}

/// Rewrite every call that may unwind into an invoke whose unwind edge lands
/// in one fresh cleanup block.
fn convert_throwing_calls(module: &Module, func: &mut Function) {
    let throwing: Vec<_> = func
        .insts_in_order()
        .map(|(_, id)| id)
        .filter(|&id| may_unwind(module, &func.inst(id).op))
        .collect();
    if throwing.is_empty() {
        return;
    }

    let cleanup = func.create_block();
    let pad = func.append(cleanup, Instruction::new(Op::LandingPad { cleanup: true }, Type::Token));
    func.append(cleanup, Instruction::new(Op::Resume(pad.into()), Type::Void));

    for call in throwing {
        let Some(normal) = func.split_after(call) else {
            continue;
        };
        let inst = func.inst_mut(call);
        if let Op::Call { callee, args, .. } = &inst.op {
            inst.op = Op::Invoke {
                callee: *callee,
                args: args.clone(),
                normal,
                unwind: cleanup,
            };
        }
    }
}

/// Insert a probe call right before the terminator of every exit.
fn insert_at_exits(cx: &mut PassContext<'_>, func: &mut Function, probe: Probe, args: &[crate::ir::Operand]) -> Result<usize> {
    let exits = enumerate_exits(cx.module, func, cx.options.handle_cxx_exceptions);
    for exit in &exits {
        let term = func
            .terminator(exit.block)
            .ok_or_else(|| cx.malformed(format!("exit block bb{} has no terminator", exit.block.index())))?;
        let call = cx.probe_call(probe, args.to_vec(), func.inst(term).loc)?;
        cx.insert_before(func, term, call)?;
    }
    Ok(exits.len())
}

fn insert_at_entry(cx: &mut PassContext<'_>, func: &mut Function, probe: Probe, args: Vec<crate::ir::Operand>) -> Result<()> {
    let entry = func
        .entry_block()
        .ok_or_else(|| cx.malformed("function has no entry block"))?;
    let loc = func
        .block(entry)
        .insts
        .first()
        .and_then(|&first| func.inst(first).loc);
    let call = cx.probe_call(probe, args, loc)?;
    func.insert_at(entry, 0, call);
    Ok(())
}

/// Suppress race reports while a suppressed function runs.
pub(crate) fn insert_runtime_ignores(cx: &mut PassContext<'_>, func: &mut Function) -> Result<()> {
    insert_at_entry(cx, func, Probe::IgnoreBegin, Vec::new())?;
    insert_at_exits(cx, func, Probe::IgnoreEnd, &[])?;
    cx.stats.ignore_brackets += 1;
    Ok(())
}

/// Report entry and every exit to the runtime; the program entry point also
/// reports its end so the runtime can flush results.
pub(crate) fn insert_entry_exit(cx: &mut PassContext<'_>, func: &mut Function) -> Result<()> {
    let name = cx.debug.function_name(cx.module, func);
    let name_op = cx.string(&name);

    insert_at_entry(cx, func, Probe::FuncEntry, vec![name_op])?;
    let exits = insert_at_exits(cx, func, Probe::FuncExit, &[name_op])?;
    cx.stats.exit_probes += exits as u64;

    if name == cx.options.entry_point {
        insert_at_exits(cx, func, Probe::MainFuncExit, &[name_op])?;
    }
    cx.stats.functions_with_entry_exit += 1;
    tracing::trace!(function = %name, exits, "entry/exit probes inserted");
    Ok(())
}
