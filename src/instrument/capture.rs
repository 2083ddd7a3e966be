//! Stack-slot escape analysis.
//!
//! A stack slot is captured once any pointer derived from it (through offsets
//! and bitcasts) may become visible outside the current activation. Accesses
//! to uncaptured slots cannot race and are never instrumented.

use std::collections::{HashMap, HashSet};

use crate::ir::{CastKind, Function, InstId, Op, Operand};

/// Escape state of a stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeState {
    /// The address stays inside the function.
    NoEscape,
    /// The address may reach another thread.
    Captured,
}

/// Per-function capture cache.
///
/// The function must not change while the analysis is in use.
#[derive(Debug, Default)]
pub struct CaptureAnalysis {
    cache: HashMap<InstId, EscapeState>,
    /// Built on the first query.
    users: Option<HashMap<InstId, Vec<InstId>>>,
}

impl CaptureAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn may_be_captured(&mut self, func: &Function, slot: InstId) -> bool {
        self.escape_state(func, slot) == EscapeState::Captured
    }

    pub fn escape_state(&mut self, func: &Function, slot: InstId) -> EscapeState {
        if let Some(&state) = self.cache.get(&slot) {
            return state;
        }
        let users = self.users.get_or_insert_with(|| func.user_index());
        let state = compute_escape(func, users, slot);
        self.cache.insert(slot, state);
        state
    }
}

fn compute_escape(func: &Function, users: &HashMap<InstId, Vec<InstId>>, slot: InstId) -> EscapeState {
    let mut worklist = vec![slot];
    let mut visited = HashSet::new();

    while let Some(ptr) = worklist.pop() {
        if !visited.insert(ptr) {
            continue;
        }
        let value = Operand::Inst(ptr);
        for &user in users.get(&ptr).into_iter().flatten() {
            match use_effect(&func.inst(user).op, value) {
                UseEffect::Harmless => {}
                UseEffect::Derives => worklist.push(user),
                UseEffect::Captures => return EscapeState::Captured,
            }
        }
    }
    EscapeState::NoEscape
}

enum UseEffect {
    Harmless,
    /// The user yields another pointer to the same object.
    Derives,
    Captures,
}

fn use_effect(op: &Op, value: Operand) -> UseEffect {
    match op {
        Op::Load { addr, .. } | Op::AtomicLoad { addr, .. } => {
            if *addr == value {
                UseEffect::Harmless
            } else {
                UseEffect::Captures
            }
        }
        // Storing the pointer itself publishes it.
        Op::Store { value: stored, .. } | Op::AtomicStore { value: stored, .. } => {
            if *stored == value {
                UseEffect::Captures
            } else {
                UseEffect::Harmless
            }
        }
        Op::AtomicRmw { value: operand, .. } => {
            if *operand == value {
                UseEffect::Captures
            } else {
                UseEffect::Harmless
            }
        }
        Op::CmpXchg { expected, new, .. } => {
            if *new == value || *expected == value {
                UseEffect::Captures
            } else {
                UseEffect::Harmless
            }
        }
        Op::PtrOffset { base, .. } => {
            if *base == value {
                UseEffect::Derives
            } else {
                UseEffect::Captures
            }
        }
        Op::Cast {
            kind: CastKind::Bitcast,
            ..
        } => UseEffect::Derives,
        Op::ICmp { .. } => UseEffect::Harmless,
        Op::MemSet { value: fill, len, .. } => {
            if *fill == value || *len == value {
                UseEffect::Captures
            } else {
                UseEffect::Harmless
            }
        }
        Op::MemCopy { len, .. } | Op::MemMove { len, .. } => {
            if *len == value {
                UseEffect::Captures
            } else {
                UseEffect::Harmless
            }
        }
        _ => UseEffect::Captures,
    }
}
