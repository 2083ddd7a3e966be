//! Thread and mutex synchronization hooks.
//!
//! Direct calls to the POSIX thread primitives are bracketed with probes so
//! the runtime can build happens-before edges: creation, join and lock are
//! reported once the call has returned, unlock just before the call.

use crate::error::Result;
use crate::ir::{Callee, Function, InstId, Op};

use super::probes::Probe;
use super::PassContext;

/// Where a synchronization probe goes relative to the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPlacement {
    Before,
    After,
}

/// Probe for a callee name, matched by prefix.
pub fn sync_probe_for(callee: &str) -> Option<(Probe, SyncPlacement)> {
    if callee.starts_with("pthread_create") {
        Some((Probe::ThreadCreate, SyncPlacement::After))
    } else if callee.starts_with("pthread_join") {
        Some((Probe::ThreadJoin, SyncPlacement::After))
    } else if callee.starts_with("pthread_mutex_lock") {
        Some((Probe::ThreadLock, SyncPlacement::After))
    } else if callee.starts_with("pthread_mutex_unlock") {
        Some((Probe::ThreadUnlock, SyncPlacement::Before))
    } else {
        None
    }
}

/// Add the synchronization probe for one call, if it is a recognized
/// primitive. Invokes are not considered.
pub fn instrument_sync_call(cx: &mut PassContext<'_>, func: &mut Function, id: InstId) -> Result<bool> {
    let (sym, first_arg) = match &func.inst(id).op {
        Op::Call {
            callee: Callee::Direct(sym),
            args,
            ..
        } => (*sym, args.first().copied()),
        _ => return Ok(false),
    };
    let Some((probe, placement)) = sync_probe_for(cx.module.resolve(sym)) else {
        return Ok(false);
    };
    let Some(handle) = first_arg else {
        return Ok(false);
    };

    let loc = func.inst(id).loc;
    let call = cx.probe_call(probe, vec![handle], loc)?;
    match placement {
        SyncPlacement::Before => cx.insert_before(func, id, call)?,
        SyncPlacement::After => cx.insert_after(func, id, call)?,
    };
    cx.stats.sync_probes += 1;
    tracing::trace!(inst = id.index(), %probe, "sync probe inserted");
    Ok(true)
}
