//! # Race instrumentation pass
//!
//! Rewrites a [`Module`] so that every memory access a race detector cares
//! about is reported to a runtime through `__tsan_*` probe calls.
//!
//! ## Pipeline
//!
//! ```text
//! validate → collect segments → filter → plain accesses → atomics
//!          → bulk memory → sync hooks → ignore bracket → entry/exit
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use embsan::ir::{Builder, Function, FunctionAttrs, Module, Type};
//! use embsan::{InstrumentOptions, Instrumenter};
//!
//! # fn main() -> embsan::Result<()> {
//! let mut module = Module::new("demo");
//! let counter = module.add_global("counter", Type::i32(), false);
//! let name = module.intern("bump");
//! let mut func = Function::new(name, vec![], Type::Void, FunctionAttrs::race_checked());
//! let mut b = Builder::new(&mut func);
//! let entry = b.create_block();
//! b.switch_to_block(entry);
//! b.store(embsan::ir::Operand::i32(1), counter, 4);
//! b.ret(None);
//! module.add_function(func);
//!
//! let mut instrumenter = Instrumenter::new(InstrumentOptions::default());
//! let report = instrumenter.run(&mut module)?;
//! assert_eq!(report.totals.instrumented_writes, 1);
//! # Ok(())
//! # }
//! ```

mod access;
mod atomic;
pub mod capture;
pub mod classify;
pub mod debug_info;
pub mod entry_exit;
mod mem_intrinsic;
pub mod options;
pub mod probes;
pub mod redundancy;
pub mod stats;
mod sync;

pub use capture::{CaptureAnalysis, EscapeState};
pub use classify::{AddressClass, AddressClassifier, BaseObject, ConstantReason, ExclusionReason};
pub use debug_info::{DebugInfo, IrDebugInfo};
pub use entry_exit::{enumerate_exits, ExitKind, ExitPoint};
pub use options::InstrumentOptions;
pub use probes::{
    decode_ordering, encode_ordering, is_aligned, AccessKind, AccessSize, LibCall, Probe,
    ProbeTable, ProbeTarget, RmwProbeOp,
};
pub use redundancy::{filter_segment, ScheduledAccess};
pub use stats::InstrumentStats;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::ir::{
    Constant, DebugLoc, Function, InstId, Instruction, MemoryOrdering, Module, Op, Operand,
};

use self::atomic::{is_lowered_atomic, orderings_of};

/// Shared state of one function's rewrite.
pub(crate) struct PassContext<'a> {
    pub module: &'a mut Module,
    pub probes: &'a ProbeTable,
    pub options: &'a InstrumentOptions,
    pub debug: &'a dyn DebugInfo,
    pub stats: InstrumentStats,
    /// Display name of the function being rewritten.
    pub function: String,
}

impl<'a> PassContext<'a> {
    /// Intern `s` and return it as a string operand.
    pub fn string(&mut self, s: &str) -> Operand {
        Operand::Const(Constant::Str(self.module.intern(s)))
    }

    /// Build a call to `probe`. Probe calls never unwind.
    pub fn probe_call(&self, probe: Probe, args: Vec<Operand>, loc: Option<DebugLoc>) -> Result<Instruction> {
        let callee = self.probes.callee(probe)?;
        let call = Instruction::new(
            Op::Call {
                callee,
                args,
                nounwind: true,
            },
            probe.signature().ret,
        );
        Ok(call.with_loc(loc))
    }

    /// Build a call to a C library primitive.
    pub fn libcall(&self, lib: LibCall, args: Vec<Operand>, loc: Option<DebugLoc>) -> Result<Instruction> {
        let callee = self.probes.libcall(lib)?;
        let call = Instruction::new(
            Op::Call {
                callee,
                args,
                nounwind: true,
            },
            lib.signature(&self.module.data_layout).ret,
        );
        Ok(call.with_loc(loc))
    }

    pub fn insert_before(&self, func: &mut Function, anchor: InstId, inst: Instruction) -> Result<InstId> {
        func.insert_before(anchor, inst)
            .ok_or_else(|| self.malformed(format!("v{} is not placed in a block", anchor.index())))
    }

    pub fn insert_after(&self, func: &mut Function, anchor: InstId, inst: Instruction) -> Result<InstId> {
        func.insert_after(anchor, inst)
            .ok_or_else(|| self.malformed(format!("v{} is not placed in a block", anchor.index())))
    }

    pub fn malformed(&self, message: impl Into<String>) -> Error {
        Error::malformed(self.function.clone(), message)
    }
}

/// Outcome of instrumenting one function
#[derive(Debug, Clone, Default, Serialize)]
pub struct FunctionReport {
    /// Display name of the function
    pub name: String,
    /// Whether any instruction was added or rewritten
    pub modified: bool,
    /// Counters for this function alone
    pub stats: InstrumentStats,
}

/// Outcome of one [`Instrumenter::run`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstrumentReport {
    /// Per-function results, in module order
    pub functions: Vec<FunctionReport>,
    /// Sum over all functions
    pub totals: InstrumentStats,
}

impl InstrumentReport {
    /// Whether any function changed
    pub fn modified(&self) -> bool {
        self.functions.iter().any(|f| f.modified)
    }

    fn push(&mut self, report: FunctionReport) {
        self.totals += report.stats;
        self.functions.push(report);
    }
}

/// Work lists gathered by one walk over a function.
#[derive(Debug, Default)]
struct Collected {
    accesses: Vec<ScheduledAccess>,
    atomics: Vec<InstId>,
    bulk: Vec<InstId>,
    calls: Vec<InstId>,
    has_calls: bool,
}

/// Race instrumentation driver
pub struct Instrumenter<D: DebugInfo = IrDebugInfo> {
    options: InstrumentOptions,
    debug: D,
    stats: InstrumentStats,
}

impl Instrumenter<IrDebugInfo> {
    /// Create an instrumenter reading debug context straight from the IR
    pub fn new(options: InstrumentOptions) -> Self {
        Self::with_debug_info(options, IrDebugInfo)
    }
}

impl<D: DebugInfo> Instrumenter<D> {
    /// Create an instrumenter with a custom debug-info provider
    pub fn with_debug_info(options: InstrumentOptions, debug: D) -> Self {
        Self {
            options,
            debug,
            stats: InstrumentStats::default(),
        }
    }

    pub fn options(&self) -> &InstrumentOptions {
        &self.options
    }

    /// Counters accumulated over every run of this instrumenter
    pub fn stats(&self) -> &InstrumentStats {
        &self.stats
    }

    /// Instrument every function of `module`.
    ///
    /// Stops at the first defect. Functions before it stay instrumented; the
    /// failing function is left exactly as it was.
    pub fn run(&mut self, module: &mut Module) -> Result<InstrumentReport> {
        self.options.validate()?;
        let probes = ProbeTable::declare(module, &self.options.probe_prefix);

        let mut functions = std::mem::take(&mut module.functions);
        let mut report = InstrumentReport::default();
        let mut outcome = Ok(());
        for func in functions.iter_mut() {
            match self.run_on_function(module, &probes, func) {
                Ok(function_report) => report.push(function_report),
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }
        module.functions = functions;
        outcome?;

        self.stats += report.totals;
        tracing::info!(
            module = %module.name,
            functions = report.functions.len(),
            probes = report.totals.access_probes(),
            atomics = report.totals.instrumented_atomics,
            omitted = report.totals.omitted(),
            "module instrumented"
        );
        Ok(report)
    }

    /// Instrument the function at `index` of `module` only.
    pub fn instrument_function(&mut self, module: &mut Module, index: usize) -> Result<FunctionReport> {
        self.options.validate()?;
        if index >= module.functions.len() {
            return Err(Error::config(format!(
                "function index {} out of range ({} functions)",
                index,
                module.functions.len()
            )));
        }
        let probes = ProbeTable::declare(module, &self.options.probe_prefix);

        let mut func = module.functions.swap_remove(index);
        let result = self.run_on_function(module, &probes, &mut func);
        module.functions.push(func);
        let last = module.functions.len() - 1;
        module.functions.swap(index, last);

        let report = result?;
        self.stats += report.stats;
        Ok(report)
    }

    fn run_on_function(
        &self,
        module: &mut Module,
        probes: &ProbeTable,
        func: &mut Function,
    ) -> Result<FunctionReport> {
        let name = self.debug.function_name(module, func);
        if func.num_blocks() == 0 {
            return Ok(FunctionReport {
                name,
                ..Default::default()
            });
        }

        // Phase 1: Reject functions that cannot be instrumented correctly
        if let Err(err) = self.validate(func, &name) {
            tracing::error!(function = %name, error = %err, "refusing to instrument");
            return Err(err);
        }

        // Phase 2: Collect work lists and pick the accesses to report
        let mut stats = InstrumentStats::default();
        let collected = self.collect(module, func, &mut stats);

        let attrs = func.attrs();
        let mut cx = PassContext {
            module,
            probes,
            options: &self.options,
            debug: &self.debug,
            stats,
            function: name.clone(),
        };
        let mut instrumented = false;

        // Phase 3: Plain and vtable accesses
        if self.options.instrument_memory_accesses && attrs.race_checked {
            let plan = access::plan_accesses(&mut cx, func, &collected.accesses);
            instrumented |= access::apply_plan(&mut cx, func, plan)?;
        }

        // Phase 4: Atomics are lowered everywhere, checked or not
        if self.options.instrument_atomics {
            for &id in &collected.atomics {
                instrumented |= atomic::lower_atomic(&mut cx, func, id)?;
            }
        }

        // Phase 5: Bulk memory operations become library calls
        if self.options.instrument_mem_intrinsics && attrs.race_checked {
            for &id in &collected.bulk {
                instrumented |= mem_intrinsic::lower_mem_intrinsic(&mut cx, func, id)?;
            }
        }

        // Phase 6: Thread and lock hooks
        if self.options.instrument_sync {
            for &id in &collected.calls {
                instrumented |= sync::instrument_sync_call(&mut cx, func, id)?;
            }
        }

        let mut modified = instrumented;

        // Phase 7: Suppressed functions silence the runtime for their duration
        if attrs.suppressed && collected.has_calls {
            entry_exit::insert_runtime_ignores(&mut cx, func)?;
            modified = true;
        }

        // Phase 8: Shadow call stack maintenance
        if (instrumented || collected.has_calls) && self.options.instrument_func_entry_exit {
            entry_exit::insert_entry_exit(&mut cx, func)?;
            modified = true;
        }

        tracing::debug!(
            function = %name,
            reads = cx.stats.instrumented_reads,
            writes = cx.stats.instrumented_writes,
            atomics = cx.stats.instrumented_atomics,
            omitted = cx.stats.omitted(),
            modified,
            "function instrumented"
        );

        Ok(FunctionReport {
            name,
            modified,
            stats: cx.stats,
        })
    }

    fn validate(&self, func: &Function, name: &str) -> Result<()> {
        let attrs = func.attrs();
        if attrs.race_checked && attrs.suppressed {
            return Err(Error::ConflictingAttributes {
                function: name.to_string(),
            });
        }

        for block in func.block_ids() {
            let insts = &func.block(block).insts;
            let terminated = insts
                .last()
                .is_some_and(|&last| func.inst(last).is_terminator());
            if !terminated {
                return Err(Error::malformed(
                    name,
                    format!("bb{} does not end in a terminator", block.index()),
                ));
            }
        }

        if self.options.instrument_atomics {
            for (_, id) in func.insts_in_order() {
                let op = &func.inst(id).op;
                if !is_lowered_atomic(op) {
                    continue;
                }
                if let Some(&ordering) = orderings_of(op)
                    .iter()
                    .find(|&&o| o == MemoryOrdering::Consume)
                {
                    return Err(Error::UnsupportedOrdering {
                        function: name.to_string(),
                        ordering,
                    });
                }
            }
        }
        Ok(())
    }

    /// Walk the function once, splitting plain accesses into segments at
    /// calls and block ends and filtering each segment.
    fn collect(&self, module: &Module, func: &Function, stats: &mut InstrumentStats) -> Collected {
        let check_accesses = self.options.instrument_memory_accesses && func.attrs().race_checked;
        let mut classifier = AddressClassifier::new(module, func, &self.options);
        let mut collected = Collected::default();
        let mut segment: Vec<InstId> = Vec::new();

        let mut flush = |segment: &mut Vec<InstId>, collected: &mut Collected| {
            if check_accesses && !segment.is_empty() {
                let selected = filter_segment(func, segment.as_slice(), &mut classifier, stats);
                collected.accesses.extend(selected);
            }
            segment.clear();
        };

        for block in func.block_ids() {
            for &id in &func.block(block).insts {
                let op = &func.inst(id).op;
                if is_lowered_atomic(op) {
                    collected.atomics.push(id);
                    if self.options.atomics_split_segments {
                        flush(&mut segment, &mut collected);
                    }
                } else if redundancy::access_of(op).is_some() {
                    segment.push(id);
                } else if op.is_call_like() {
                    match op {
                        Op::Call { .. } => collected.calls.push(id),
                        Op::MemSet { .. } | Op::MemCopy { .. } | Op::MemMove { .. } => {
                            collected.bulk.push(id)
                        }
                        _ => {}
                    }
                    collected.has_calls = true;
                    flush(&mut segment, &mut collected);
                }
            }
            flush(&mut segment, &mut collected);
        }
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{
        AtomicRmwOp, Builder, Callee, FunctionAttrs, Signature, SyncScope, Type,
    };

    fn race_checked(module: &mut Module, name: &str) -> Function {
        let sym = module.intern(name);
        Function::new(sym, vec![Type::ptr()], Type::Void, FunctionAttrs::race_checked())
    }

    fn call_names(module: &Module, func: &Function) -> Vec<String> {
        func.insts_in_order()
            .filter_map(|(_, id)| match &func.inst(id).op {
                Op::Call {
                    callee: Callee::Direct(sym),
                    ..
                } => Some(module.resolve(*sym).to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_store_to_global_gets_write_probe() {
        let mut module = Module::new("m");
        let g = module.add_global("g", Type::i32(), false);
        let mut func = race_checked(&mut module, "f");
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        b.store(Operand::i32(7), g, 4);
        b.ret(None);
        module.add_function(func);

        let mut inst = Instrumenter::new(InstrumentOptions::default());
        let report = inst.run(&mut module).unwrap();
        assert!(report.modified());
        assert_eq!(report.totals.instrumented_writes, 1);

        let func = &module.functions[0];
        assert_eq!(
            call_names(&module, func),
            vec!["__tsan_func_entry", "__tsan_write4", "__tsan_func_exit"]
        );
        assert!(module.verify().is_ok());
    }

    #[test]
    fn test_untouched_function_gets_no_entry_probe() {
        let mut module = Module::new("m");
        let mut func = race_checked(&mut module, "f");
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let slot = b.stack_slot(Type::i32());
        b.store(Operand::i32(1), slot, 4);
        b.load(Type::i32(), slot, 4);
        b.ret(None);
        module.add_function(func);

        let report = Instrumenter::new(InstrumentOptions::default())
            .run(&mut module)
            .unwrap();
        assert!(!report.modified());
        assert_eq!(report.totals.omitted_non_captured, 2);
        assert!(call_names(&module, &module.functions[0]).is_empty());
    }

    #[test]
    fn test_consume_ordering_leaves_function_untouched() {
        let mut module = Module::new("m");
        let mut func = race_checked(&mut module, "f");
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        b.atomic_load(Type::i32(), Operand::Param(0), MemoryOrdering::Consume, SyncScope::CrossThread);
        b.ret(None);
        module.add_function(func);
        let before = module.functions[0].arena_len();

        let err = Instrumenter::new(InstrumentOptions::default())
            .run(&mut module)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOrdering { .. }));
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.functions[0].arena_len(), before);
    }

    #[test]
    fn test_conflicting_attributes_rejected() {
        let mut module = Module::new("m");
        let name = module.intern("f");
        let attrs = FunctionAttrs {
            race_checked: true,
            suppressed: true,
        };
        let mut func = Function::new(name, vec![], Type::Void, attrs);
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        b.ret(None);
        module.add_function(func);

        let err = Instrumenter::new(InstrumentOptions::default())
            .run(&mut module)
            .unwrap_err();
        assert!(matches!(err, Error::ConflictingAttributes { .. }));
    }

    #[test]
    fn test_atomics_lowered_in_unchecked_function() {
        let mut module = Module::new("m");
        let name = module.intern("f");
        let mut func = Function::new(name, vec![Type::ptr()], Type::i32(), FunctionAttrs::default());
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
        b.ret(Some(old.into()));
        module.add_function(func);

        let report = Instrumenter::new(InstrumentOptions::default())
            .run(&mut module)
            .unwrap();
        assert_eq!(report.totals.instrumented_atomics, 1);
        assert_eq!(report.totals.access_probes(), 0);
        let names = call_names(&module, &module.functions[0]);
        assert!(names.contains(&"__tsan_atomic32_fetch_add".to_string()));
        assert!(module.verify().is_ok());
    }

    #[test]
    fn test_instrument_single_function_keeps_order() {
        let mut module = Module::new("m");
        let ext = module.declare("ext", Signature::new(vec![], Type::Void), false);
        for name in ["a", "b", "c"] {
            let sym = module.intern(name);
            let mut func = Function::new(sym, vec![], Type::Void, FunctionAttrs::default());
            let mut b = Builder::new(&mut func);
            let entry = b.create_block();
            b.switch_to_block(entry);
            b.call(Callee::Direct(ext), vec![], Type::Void);
            b.ret(None);
            module.add_function(func);
        }

        let mut inst = Instrumenter::new(InstrumentOptions::default());
        let report = inst.instrument_function(&mut module, 1).unwrap();
        assert_eq!(report.name, "b");
        assert!(report.modified);
        assert_eq!(module.function_index("b"), Some(1));
        assert!(call_names(&module, &module.functions[0]).len() == 1);
        assert_eq!(inst.stats().functions_with_entry_exit, 1);

        assert!(inst.instrument_function(&mut module, 3).is_err());
    }
}
