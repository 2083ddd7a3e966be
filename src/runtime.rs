//! Runtime probe interface.
//!
//! The race-detection runtime itself lives outside this crate. What is defined
//! here is the vocabulary of events instrumented code produces, and the trait
//! a runtime implements to receive them. [`RecordingRuntime`] is a reference
//! implementation that logs events and checks call-stack discipline.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use crate::instrument::{AccessSize, RmwProbeOp};
use crate::ir::MemoryOrdering;

/// Source context of an instrumented access.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessSite {
    pub line: u32,
    pub object: String,
    pub file: String,
}

/// One call into the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeEvent {
    Init,
    FuncEntry { function: String },
    FuncExit { function: String },
    MainFuncExit { function: String },
    IgnoreBegin,
    IgnoreEnd,
    Read { addr: u64, size: AccessSize, aligned: bool, site: AccessSite },
    Write { addr: u64, size: AccessSize, aligned: bool, site: AccessSite },
    VptrUpdate { addr: u64, new_value: u64, site: AccessSite },
    VptrRead { addr: u64, site: AccessSite },
    AtomicLoad { addr: u64, size: AccessSize, ordering: MemoryOrdering },
    AtomicStore { addr: u64, size: AccessSize, value: u64, ordering: MemoryOrdering },
    AtomicRmw {
        addr: u64,
        size: AccessSize,
        op: RmwProbeOp,
        value: u64,
        ordering: MemoryOrdering,
    },
    AtomicCas {
        addr: u64,
        size: AccessSize,
        expected: u64,
        new: u64,
        success: MemoryOrdering,
        failure: MemoryOrdering,
    },
    ThreadFence { ordering: MemoryOrdering },
    SignalFence { ordering: MemoryOrdering },
    ThreadCreate { handle: u64 },
    ThreadJoin { handle: u64 },
    ThreadLock { lock: u64 },
    ThreadUnlock { lock: u64 },
}

impl ProbeEvent {
    /// True for plain and vtable access events.
    pub fn is_access(&self) -> bool {
        matches!(
            self,
            ProbeEvent::Read { .. }
                | ProbeEvent::Write { .. }
                | ProbeEvent::VptrUpdate { .. }
                | ProbeEvent::VptrRead { .. }
        )
    }

    pub fn is_atomic(&self) -> bool {
        matches!(
            self,
            ProbeEvent::AtomicLoad { .. }
                | ProbeEvent::AtomicStore { .. }
                | ProbeEvent::AtomicRmw { .. }
                | ProbeEvent::AtomicCas { .. }
                | ProbeEvent::ThreadFence { .. }
                | ProbeEvent::SignalFence { .. }
        )
    }
}

/// Receiver of probe calls.
///
/// Probes fire from every instrumented thread at once, so implementations
/// must tolerate arbitrary concurrent calls and must not call back into
/// instrumented code.
pub trait ProbeRuntime: Send + Sync {
    fn on_probe(&self, event: &ProbeEvent);
}

/// Activation state of the innermost function of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    NotEntered,
    Entered,
    Exited,
}

/// Records every event and tracks per-thread call stacks.
///
/// Unbalanced `func_exit` calls are logged and counted; they never stop the
/// program.
#[derive(Debug, Default)]
pub struct RecordingRuntime {
    events: Mutex<Vec<(ThreadId, ProbeEvent)>>,
    stacks: DashMap<ThreadId, Vec<String>>,
    ignore_depth: DashMap<ThreadId, u32>,
    stack_mismatches: AtomicU64,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events, in arrival order.
    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Events produced by one thread.
    pub fn events_of(&self, thread: ThreadId) -> Vec<ProbeEvent> {
        self.events
            .lock()
            .iter()
            .filter(|(t, _)| *t == thread)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
        self.stacks.clear();
        self.ignore_depth.clear();
        self.stack_mismatches.store(0, Ordering::Relaxed);
    }

    /// Current call-stack depth of the calling thread.
    pub fn stack_depth(&self) -> usize {
        self.stacks
            .get(&thread::current().id())
            .map_or(0, |stack| stack.len())
    }

    /// State of the calling thread's innermost frame.
    pub fn frame_state(&self) -> FrameState {
        let tid = thread::current().id();
        match self.stacks.get(&tid) {
            None => FrameState::NotEntered,
            Some(stack) if stack.is_empty() => FrameState::Exited,
            Some(_) => FrameState::Entered,
        }
    }

    /// Nesting depth of ignore regions on the calling thread.
    pub fn ignore_depth(&self) -> u32 {
        self.ignore_depth
            .get(&thread::current().id())
            .map_or(0, |depth| *depth)
    }

    pub fn stack_mismatches(&self) -> u64 {
        self.stack_mismatches.load(Ordering::Relaxed)
    }

    fn track(&self, tid: ThreadId, event: &ProbeEvent) {
        match event {
            ProbeEvent::FuncEntry { function } => {
                self.stacks.entry(tid).or_default().push(function.clone());
            }
            ProbeEvent::FuncExit { function } => {
                let mut stack = self.stacks.entry(tid).or_default();
                match stack.pop() {
                    Some(top) if top == *function => {}
                    Some(top) => {
                        tracing::warn!(expected = %top, got = %function, "func_exit does not match func_entry");
                        self.stack_mismatches.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {
                        tracing::warn!(got = %function, "func_exit on empty call stack");
                        self.stack_mismatches.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            ProbeEvent::IgnoreBegin => {
                *self.ignore_depth.entry(tid).or_insert(0) += 1;
            }
            ProbeEvent::IgnoreEnd => {
                let mut depth = self.ignore_depth.entry(tid).or_insert(0);
                if *depth == 0 {
                    tracing::warn!("ignore_thread_end without matching begin");
                    self.stack_mismatches.fetch_add(1, Ordering::Relaxed);
                } else {
                    *depth -= 1;
                }
            }
            _ => {}
        }
    }
}

impl ProbeRuntime for RecordingRuntime {
    fn on_probe(&self, event: &ProbeEvent) {
        let tid = thread::current().id();
        self.track(tid, event);
        self.events.lock().push((tid, event.clone()));
    }
}
