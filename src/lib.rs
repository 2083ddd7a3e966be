//! # EmbSan - Data-Race Instrumentation for Embedded Targets
//!
//! A static instrumentation engine that rewrites programs in a small
//! arena-based IR so that a ThreadSanitizer-compatible runtime can detect data
//! races at execution time. Every memory access that could race is reported
//! through a `__tsan_*` probe call; atomics are replaced by runtime calls that
//! perform the operation themselves; functions report entry and every exit,
//! including exceptional ones.
//!
//! ## Features
//!
//! - **Precise access selection** - constant data, private stack slots,
//!   profiling counters and foreign address spaces are never reported
//! - **Redundant read elimination** - a read followed by a write to the same
//!   address within a call-free segment is covered by the write
//! - **Atomic lowering** - loads, stores, read-modify-writes, compare-exchange
//!   and fences become ordering-annotated runtime calls
//! - **Unwind-safe exit probes** - may-throw calls are turned into invokes
//!   with a shared cleanup block so exit probes run on every path
//! - **Reference executor** - interprets original and instrumented IR and
//!   records the probe stream
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use embsan::exec::{Machine, Val};
//! use embsan::ir::{BinOp, Builder, Function, FunctionAttrs, Module, Operand, Type};
//! use embsan::runtime::{ProbeEvent, RecordingRuntime};
//! use embsan::{InstrumentOptions, Instrumenter};
//!
//! # fn main() -> embsan::Result<()> {
//! // hits = hits + 1
//! let mut module = Module::new("counter");
//! let hits = module.add_global("hits", Type::i32(), false);
//! let name = module.intern("bump");
//! let mut func = Function::new(name, vec![], Type::Void, FunctionAttrs::race_checked());
//! let mut b = Builder::new(&mut func);
//! let entry = b.create_block();
//! b.switch_to_block(entry);
//! let old = b.load(Type::i32(), hits, 4);
//! let new = b.binary(BinOp::Add, old.into(), Operand::i32(1), Type::i32());
//! b.store(new.into(), hits, 4);
//! b.ret(None);
//! module.add_function(func);
//!
//! // Instrument: the read is covered by the write that follows it
//! let report = Instrumenter::new(InstrumentOptions::default()).run(&mut module)?;
//! assert_eq!(report.totals.instrumented_writes, 1);
//! assert_eq!(report.totals.omitted_reads_before_write, 1);
//!
//! // Execute and observe the probes
//! let runtime = Arc::new(RecordingRuntime::new());
//! let mut machine = Machine::new(&module, runtime.clone());
//! machine.call("bump", vec![])?;
//! assert_eq!(machine.read_global("hits")?, Val::int(32, 1));
//!
//! let events = runtime.events();
//! assert_eq!(events.len(), 3);
//! assert!(matches!(events[0], ProbeEvent::FuncEntry { .. }));
//! assert!(matches!(events[1], ProbeEvent::Write { .. }));
//! assert!(matches!(events[2], ProbeEvent::FuncExit { .. }));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ### Main Components
//!
//! - [`ir`] - Module, function and instruction arenas, builder, verifier
//! - [`Instrumenter`] - Per-function instrumentation pipeline
//! - [`InstrumentOptions`] - Pass configuration, loadable from JSON
//! - [`InstrumentStats`] - Counters of what was instrumented or skipped
//! - [`runtime`] - Probe event vocabulary and the [`ProbeRuntime`] trait
//! - [`exec`] - Reference executor
//!
//! ### Probe ABI
//!
//! | Operation | Probe |
//! |-----------|-------|
//! | Plain read/write of N bytes | `read{N}`, `write{N}`, `unaligned_read{N}`, `unaligned_write{N}` |
//! | Vtable pointer store/load | `vptr_update`, `vptr_read` |
//! | Atomic load/store | `atomic{bits}_load`, `atomic{bits}_store` |
//! | Read-modify-write | `atomic{bits}_fetch_add`, ..., `atomic{bits}_exchange` |
//! | Compare-exchange | `atomic{bits}_compare_exchange_val` |
//! | Fences | `atomic_thread_fence`, `atomic_signal_fence` |
//! | Function boundaries | `func_entry`, `func_exit`, `main_func_exit` |
//! | Suppression | `ignore_thread_begin`, `ignore_thread_end` |
//!
//! Memory orderings are passed as `relaxed=0, acquire=2, release=3,
//! acq_rel=4, seq_cst=5`.
//!
//! ## Error Handling
//!
//! Inputs that would make instrumentation wrong (a `consume` ordering, a
//! function both race-checked and suppressed, malformed IR) are reported as
//! [`Error`]s and the offending function is left untouched. Accesses the
//! runtime cannot describe (odd sizes, unsupported read-modify-write kinds)
//! are skipped and counted in [`InstrumentStats`].

/// Version of the EmbSan engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;
pub mod exec;
pub mod instrument;
pub mod ir;
pub mod runtime;

// Re-export main types
pub use error::{Error, ErrorSeverity, Result};
pub use exec::{Machine, Val};
pub use instrument::{
    DebugInfo, FunctionReport, InstrumentOptions, InstrumentReport, InstrumentStats, Instrumenter,
    IrDebugInfo, Probe, ProbeTable,
};
pub use ir::{Function, FunctionAttrs, Module};
pub use runtime::{ProbeEvent, ProbeRuntime, RecordingRuntime};
