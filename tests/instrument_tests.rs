//! End-to-end instrumentation tests
//!
//! Each test builds a small module, instruments it, and checks the rewritten
//! IR, the statistics and, where ordering matters, the probe stream observed
//! by the reference executor.

use std::sync::Arc;

use embsan::exec::{Machine, Val};
use embsan::instrument::{AccessSize, RmwProbeOp};
use embsan::ir::{
    AtomicRmwOp, BinOp, Builder, Callee, CastKind, Function, FunctionAttrs, Global, MemoryOrdering,
    Module, Op, Operand, Signature, SyncScope, Type,
};
use embsan::runtime::{ProbeEvent, RecordingRuntime};
use embsan::{Error, InstrumentOptions, Instrumenter};

// =============================================================================
// HELPERS
// =============================================================================

fn instrument(module: &mut Module) -> embsan::InstrumentReport {
    Instrumenter::new(InstrumentOptions::default())
        .run(module)
        .expect("instrumentation failed")
}

/// Every call of `func` to the symbol `name`.
fn calls_to<'a>(module: &Module, func: &'a Function, name: &str) -> Vec<&'a Op> {
    func.insts_in_order()
        .map(|(_, id)| &func.inst(id).op)
        .filter(|op| matches!(op, Op::Call { .. }))
        .filter(|op| {
            op.direct_callee()
                .is_some_and(|sym| module.resolve(sym) == name)
        })
        .collect()
}

fn function<'m>(module: &'m Module, name: &str) -> &'m Function {
    module.function(name).expect("function exists")
}

fn new_function(module: &mut Module, name: &str, params: Vec<Type>, attrs: FunctionAttrs) -> Function {
    let sym = module.intern(name);
    Function::new(sym, params, Type::Void, attrs)
}

// =============================================================================
// ACCESS SELECTION
// =============================================================================

#[test]
fn test_private_stack_slot_needs_no_probes() {
    let mut module = Module::new("m");
    let mut func = new_function(&mut module, "local", vec![], FunctionAttrs::race_checked());
    let mut b = Builder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let slot = b.stack_slot(Type::i32());
    b.store(Operand::i32(3), slot, 4);
    b.load(Type::i32(), slot, 4);
    b.ret(None);
    module.add_function(func);
    let before = module.display_function(&module.functions[0]).to_string();

    let report = instrument(&mut module);

    assert!(!report.modified());
    assert_eq!(report.totals.access_probes(), 0);
    assert_eq!(report.totals.omitted_non_captured, 2);
    assert_eq!(
        module.display_function(&module.functions[0]).to_string(),
        before
    );
}

#[test]
fn test_global_array_write_and_fetch_add() {
    let mut module = Module::new("m");
    let table = module.add_global("table", Type::Array(Box::new(Type::i32()), 4), false);
    let counter = module.add_global("counter", Type::i32(), false);
    let mut func = new_function(&mut module, "update", vec![], FunctionAttrs::race_checked());
    let mut b = Builder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let slot = b.ptr_offset(table, Operand::i32(8), Type::ptr());
    b.store(Operand::i32(42), slot, 4);
    b.atomic_rmw(
        AtomicRmwOp::Add,
        Type::i32(),
        counter,
        Operand::i32(1),
        MemoryOrdering::AcqRel,
    );
    b.ret(None);
    module.add_function(func);

    let report = instrument(&mut module);
    assert_eq!(report.totals.instrumented_writes, 1);
    assert_eq!(report.totals.instrumented_reads, 0);
    assert_eq!(report.totals.instrumented_atomics, 1);

    let func = function(&module, "update");
    assert_eq!(calls_to(&module, func, "__tsan_write4").len(), 1);
    let rmw = calls_to(&module, func, "__tsan_atomic32_fetch_add");
    assert_eq!(rmw.len(), 1);
    match rmw[0] {
        Op::Call { args, .. } => {
            assert_eq!(args.len(), 3);
            assert_eq!(args[2], Operand::i32(4));
        }
        other => panic!("unexpected op {:?}", other),
    }
    assert!(module.verify().is_ok());

    let runtime = Arc::new(RecordingRuntime::new());
    let mut machine = Machine::new(&module, runtime.clone());
    machine.call("update", vec![]).unwrap();
    let table_addr = machine.global_addr("table").unwrap();
    let counter_addr = machine.global_addr("counter").unwrap();

    let events = runtime.events();
    assert_eq!(events.len(), 4);
    match &events[1] {
        ProbeEvent::Write {
            addr,
            size,
            aligned,
            site,
        } => {
            assert_eq!(*addr, table_addr + 8);
            assert_eq!(*size, AccessSize::B4);
            assert!(*aligned);
            assert_eq!(site.object, "table");
            assert_eq!(site.file, "Unknown");
            assert_eq!(site.line, 0);
        }
        other => panic!("expected write, got {:?}", other),
    }
    assert_eq!(
        events[2],
        ProbeEvent::AtomicRmw {
            addr: counter_addr,
            size: AccessSize::B4,
            op: RmwProbeOp::FetchAdd,
            value: 1,
            ordering: MemoryOrdering::AcqRel,
        }
    );
    assert_eq!(machine.read_global("counter").unwrap(), Val::int(32, 1));
}

#[test]
fn test_excluded_and_constant_globals() {
    let mut module = Module::new("m");
    let gcov = module.add_global("__llvm_gcov_ctr", Type::i64(), false);
    let rodata = module.add_global("table", Type::i32(), true);
    let name = module.intern("counters");
    let prf = module.push_global(Global {
        name,
        value_ty: Type::i64(),
        constant: false,
        section: Some("__DATA,__llvm_prf_cnts".to_string()),
        addr_space: 0,
    });
    let name = module.intern("shared_mem");
    let foreign = module.push_global(Global {
        name,
        value_ty: Type::i32(),
        constant: false,
        section: None,
        addr_space: 3,
    });

    let mut func = new_function(&mut module, "f", vec![], FunctionAttrs::race_checked());
    let mut b = Builder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    b.store(Operand::int(64, 1), gcov, 8);
    b.store(Operand::int(64, 1), prf, 8);
    b.store(Operand::i32(1), foreign, 4);
    b.load(Type::i32(), rodata, 4);
    b.ret(None);
    module.add_function(func);

    let report = instrument(&mut module);
    assert_eq!(report.totals.omitted_excluded, 3);
    assert_eq!(report.totals.omitted_reads_from_constant_globals, 1);
    assert_eq!(report.totals.access_probes(), 0);
    assert!(!report.modified());
}

#[test]
fn test_read_before_write_is_covered() {
    let mut module = Module::new("m");
    let g = module.add_global("g", Type::i32(), false);
    let h = module.add_global("h", Type::i32(), false);
    let ext = module.declare("opaque", Signature::new(vec![], Type::Void), true);
    let mut func = new_function(&mut module, "f", vec![], FunctionAttrs::race_checked());
    let mut b = Builder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    // Segment one: read g, read h, write g. Only the read of g is covered.
    let v = b.load(Type::i32(), g, 4);
    b.load(Type::i32(), h, 4);
    let inc = b.binary(BinOp::Add, v.into(), Operand::i32(1), Type::i32());
    b.store(inc.into(), g, 4);
    // A call ends the segment; this read has no later write.
    b.call(Callee::Direct(ext), vec![], Type::Void);
    b.load(Type::i32(), g, 4);
    b.ret(None);
    module.add_function(func);

    let report = instrument(&mut module);
    assert_eq!(report.totals.omitted_reads_before_write, 1);
    assert_eq!(report.totals.instrumented_reads, 2);
    assert_eq!(report.totals.instrumented_writes, 1);
}

#[test]
fn test_alignment_and_size_classes() {
    let mut module = Module::new("m");
    let g = module.add_global("g", Type::i64(), false);
    let mut func = new_function(&mut module, "f", vec![], FunctionAttrs::race_checked());
    let mut b = Builder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    b.store(Operand::i32(1), g, 2);
    b.store(Operand::int(16, 1), g, 0);
    b.store(Operand::int(24, 1), g, 4);
    b.ret(None);
    module.add_function(func);

    let report = instrument(&mut module);
    assert_eq!(report.totals.instrumented_writes, 2);
    assert_eq!(report.totals.accesses_with_bad_size, 1);

    let func = function(&module, "f");
    assert_eq!(calls_to(&module, func, "__tsan_unaligned_write4").len(), 1);
    assert_eq!(calls_to(&module, func, "__tsan_write2").len(), 1);
}

#[test]
fn test_vtable_accesses() {
    let mut module = Module::new("m");
    let vtable = module.add_global("vtable_for_Widget", Type::Array(Box::new(Type::ptr()), 2), true);

    let mut ctor = new_function(&mut module, "Widget::Widget()", vec![Type::ptr()], FunctionAttrs::race_checked());
    let mut b = Builder::new(&mut ctor);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let store = b.store(vtable.into(), Operand::Param(0), 4);
    b.mark_vtable(store);
    b.ret(None);
    module.add_function(ctor);

    let mut call = new_function(&mut module, "dispatch", vec![Type::ptr()], FunctionAttrs::race_checked());
    let mut b = Builder::new(&mut call);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let vptr = b.load(Type::ptr(), Operand::Param(0), 4);
    b.mark_vtable(vptr);
    let slot = b.ptr_offset(vptr, Operand::i32(4), Type::ptr());
    b.load(Type::ptr(), slot, 4);
    b.ret(None);
    module.add_function(call);

    let report = instrument(&mut module);
    assert_eq!(report.totals.instrumented_vtable_writes, 1);
    assert_eq!(report.totals.instrumented_vtable_reads, 1);
    assert_eq!(report.totals.omitted_reads_from_vtable, 1);
    assert!(module.verify().is_ok());

    // The constructor is reported under its name up to the parameter list.
    let ctor = &module.functions[0];
    assert_eq!(calls_to(&module, ctor, "__tsan_vptr_update").len(), 1);
    let runtime = Arc::new(RecordingRuntime::new());
    let mut machine = Machine::new(&module, runtime.clone());
    let object = machine.global_addr("vtable_for_Widget").unwrap();
    machine
        .call("Widget::Widget()", vec![Val::Ptr(object)])
        .unwrap();
    assert_eq!(
        runtime.events()[0],
        ProbeEvent::FuncEntry {
            function: "Widget::Widget".to_string()
        }
    );
    match &runtime.events()[1] {
        ProbeEvent::VptrUpdate { addr, new_value, .. } => {
            assert_eq!(*addr, object);
            assert_eq!(*new_value, object);
        }
        other => panic!("expected vptr_update, got {:?}", other),
    }
}

/// A constructor storing its second parameter as the vtable pointer of its
/// first.
fn vtable_store_module(stored_ty: Type) -> Module {
    let mut module = Module::new("m");
    module.add_global("object", Type::Array(Box::new(Type::ptr()), 2), false);
    let sym = module.intern("init");
    let mut func = Function::new(sym, vec![Type::ptr(), stored_ty], Type::Void, FunctionAttrs::race_checked());
    let mut b = Builder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let store = b.store(Operand::Param(1), Operand::Param(0), 4);
    b.mark_vtable(store);
    b.ret(None);
    module.add_function(func);
    module
}

fn vptr_update_value(runtime: &RecordingRuntime) -> u64 {
    runtime
        .events()
        .into_iter()
        .find_map(|e| match e {
            ProbeEvent::VptrUpdate { new_value, .. } => Some(new_value),
            _ => None,
        })
        .expect("vptr_update reported")
}

#[test]
fn test_vtable_store_of_vector_reports_first_lane() {
    let mut module = vtable_store_module(Type::Vector(Box::new(Type::ptr()), 2));
    let report = instrument(&mut module);
    assert_eq!(report.totals.instrumented_vtable_writes, 1);
    assert!(module.verify().is_ok());

    let func = function(&module, "init");
    let extract = func
        .insts_in_order()
        .map(|(_, id)| id)
        .find(|&id| matches!(func.inst(id).op, Op::ExtractElement { .. }))
        .expect("lane extracted");
    assert_eq!(
        func.inst(extract).op,
        Op::ExtractElement {
            vector: Operand::Param(1),
            index: 0
        }
    );
    assert_eq!(func.inst(extract).ty, Type::ptr());
    match calls_to(&module, func, "__tsan_vptr_update")[..] {
        [Op::Call { args, .. }] => assert_eq!(args[1], Operand::Inst(extract)),
        ref other => panic!("expected one vptr_update, got {:?}", other),
    }

    let runtime = Arc::new(RecordingRuntime::new());
    let mut machine = Machine::new(&module, runtime.clone());
    let object = machine.global_addr("object").unwrap();
    machine
        .call(
            "init",
            vec![Val::Ptr(object), Val::Agg(vec![Val::Ptr(0x40), Val::Ptr(0x80)])],
        )
        .unwrap();
    assert_eq!(vptr_update_value(&runtime), 0x40);
    assert_eq!(
        machine.read_global("object").unwrap(),
        Val::Agg(vec![Val::Ptr(0x40), Val::Ptr(0x80)])
    );
}

#[test]
fn test_vtable_store_of_integer_is_converted() {
    let mut module = vtable_store_module(Type::i32());
    let report = instrument(&mut module);
    assert_eq!(report.totals.instrumented_vtable_writes, 1);

    let func = function(&module, "init");
    let cast = func
        .insts_in_order()
        .map(|(_, id)| id)
        .find(|&id| matches!(func.inst(id).op, Op::Cast { .. }))
        .expect("value converted");
    assert_eq!(
        func.inst(cast).op,
        Op::Cast {
            kind: CastKind::IntToPtr,
            value: Operand::Param(1)
        }
    );
    match calls_to(&module, func, "__tsan_vptr_update")[..] {
        [Op::Call { args, .. }] => assert_eq!(args[1], Operand::Inst(cast)),
        ref other => panic!("expected one vptr_update, got {:?}", other),
    }

    let runtime = Arc::new(RecordingRuntime::new());
    let mut machine = Machine::new(&module, runtime.clone());
    let object = machine.global_addr("object").unwrap();
    machine
        .call("init", vec![Val::Ptr(object), Val::int(32, 0x1234)])
        .unwrap();
    assert_eq!(vptr_update_value(&runtime), 0x1234);
}

/// Read `g`, bump `counter` atomically, then write `g`.
fn read_atomic_write_module() -> Module {
    let mut module = Module::new("m");
    let g = module.add_global("g", Type::i32(), false);
    let counter = module.add_global("counter", Type::i32(), false);
    let mut func = new_function(&mut module, "f", vec![], FunctionAttrs::race_checked());
    let mut b = Builder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let v = b.load(Type::i32(), g, 4);
    b.atomic_rmw(
        AtomicRmwOp::Add,
        Type::i32(),
        counter,
        Operand::i32(1),
        MemoryOrdering::SeqCst,
    );
    b.store(v.into(), g, 4);
    b.ret(None);
    module.add_function(func);
    module
}

#[test]
fn test_atomics_inside_segment_by_default() {
    let mut module = read_atomic_write_module();
    let report = instrument(&mut module);
    assert_eq!(report.totals.instrumented_reads, 0);
    assert_eq!(report.totals.instrumented_writes, 1);
    assert_eq!(report.totals.omitted_reads_before_write, 1);
    assert_eq!(report.totals.instrumented_atomics, 1);
}

#[test]
fn test_atomics_split_segments_keeps_read() {
    let mut module = read_atomic_write_module();
    let options = InstrumentOptions {
        atomics_split_segments: true,
        ..Default::default()
    };
    let report = Instrumenter::new(options).run(&mut module).unwrap();
    assert_eq!(report.totals.instrumented_reads, 1);
    assert_eq!(report.totals.instrumented_writes, 1);
    assert_eq!(report.totals.omitted_reads_before_write, 0);

    let func = function(&module, "f");
    assert_eq!(calls_to(&module, func, "__tsan_read4").len(), 1);
    assert_eq!(calls_to(&module, func, "__tsan_write4").len(), 1);
}

// =============================================================================
// ATOMICS AND BULK MEMORY
// =============================================================================

#[test]
fn test_atomic_lowering_preserves_results() {
    let mut module = Module::new("m");
    let g = module.add_global("g", Type::i32(), false);
    let flag = module.add_global("flag", Type::i8(), false);
    let name = module.intern("worker");
    let mut func = Function::new(name, vec![], Type::i32(), FunctionAttrs::default());
    let mut b = Builder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    b.atomic_store(Operand::i32(10), g, MemoryOrdering::Release, SyncScope::CrossThread);
    b.atomic_rmw(AtomicRmwOp::Sub, Type::i32(), g, Operand::i32(3), MemoryOrdering::Relaxed);
    b.atomic_rmw(AtomicRmwOp::Xchg, Type::i8(), flag, Operand::int(8, 1), MemoryOrdering::SeqCst);
    b.fence(MemoryOrdering::SeqCst, SyncScope::SingleThread);
    let v = b.atomic_load(Type::i32(), g, MemoryOrdering::Acquire, SyncScope::CrossThread);
    b.ret(Some(v.into()));
    module.add_function(func);

    let original = module.clone();
    let report = instrument(&mut module);
    assert_eq!(report.totals.instrumented_atomics, 5);
    assert!(module.verify().is_ok());

    let mut plain = Machine::new(&original, Arc::new(RecordingRuntime::new()));
    let expected = plain.call("worker", vec![]).unwrap();
    assert_eq!(expected, Some(Val::int(32, 7)));

    let runtime = Arc::new(RecordingRuntime::new());
    let mut machine = Machine::new(&module, runtime.clone());
    assert_eq!(machine.call("worker", vec![]).unwrap(), expected);
    assert_eq!(machine.read_global("flag").unwrap(), Val::int(8, 1));

    let atomics: Vec<_> = runtime.events().into_iter().filter(|e| e.is_atomic()).collect();
    assert_eq!(atomics.len(), 5);
    assert!(matches!(
        atomics[3],
        ProbeEvent::SignalFence {
            ordering: MemoryOrdering::SeqCst
        }
    ));
    assert!(matches!(
        atomics[4],
        ProbeEvent::AtomicLoad {
            size: AccessSize::B4,
            ordering: MemoryOrdering::Acquire,
            ..
        }
    ));
}

#[test]
fn test_unsupported_rmw_left_alone() {
    let mut module = Module::new("m");
    let g = module.add_global("g", Type::i32(), false);
    let name = module.intern("f");
    let mut func = Function::new(name, vec![], Type::Void, FunctionAttrs::default());
    let mut b = Builder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let max = b.atomic_rmw(AtomicRmwOp::Max, Type::i32(), g, Operand::i32(9), MemoryOrdering::SeqCst);
    b.ret(None);
    module.add_function(func);

    let report = instrument(&mut module);
    assert_eq!(report.totals.unsupported_rmw, 1);
    assert_eq!(report.totals.instrumented_atomics, 0);
    assert!(!report.modified());
    assert!(matches!(
        module.functions[0].inst(max).op,
        Op::AtomicRmw {
            op: AtomicRmwOp::Max,
            ..
        }
    ));
}

#[test]
fn test_bulk_lowering_is_idempotent() {
    let mut module = Module::new("m");
    let buf = module.add_global("buf", Type::Array(Box::new(Type::i8()), 16), false);
    let copy = module.add_global("copy", Type::Array(Box::new(Type::i8()), 16), false);
    let mut func = new_function(&mut module, "fill", vec![], FunctionAttrs::race_checked());
    let mut b = Builder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    b.memset(buf, Operand::int(8, 0xab), Operand::int(64, 16));
    b.memcpy(copy, buf, Operand::i32(8));
    b.ret(None);
    module.add_function(func);

    let first = instrument(&mut module);
    assert_eq!(first.totals.lowered_mem_intrinsics, 2);
    assert!(module.verify().is_ok());

    let second = instrument(&mut module);
    assert_eq!(second.totals.lowered_mem_intrinsics, 0);
    let func = function(&module, "fill");
    assert_eq!(calls_to(&module, func, "memset").len(), 1);
    assert_eq!(calls_to(&module, func, "memcpy").len(), 1);

    let mut machine = Machine::new(&module, Arc::new(RecordingRuntime::new()));
    machine.call("fill", vec![]).unwrap();
    let copy = machine.global_addr("copy").unwrap();
    assert_eq!(machine.memory().read_bytes(copy, 9).unwrap(), &[0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0]);
}

#[test]
fn test_mem_intrinsics_untouched_without_race_checking() {
    let mut module = Module::new("m");
    let buf = module.add_global("buf", Type::Array(Box::new(Type::i8()), 4), false);
    let mut func = new_function(&mut module, "f", vec![], FunctionAttrs::default());
    let mut b = Builder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let set = b.memset(buf, Operand::int(8, 0), Operand::i32(4));
    b.ret(None);
    module.add_function(func);

    let report = instrument(&mut module);
    assert_eq!(report.totals.lowered_mem_intrinsics, 0);
    assert!(matches!(module.functions[0].inst(set).op, Op::MemSet { .. }));
    // Still a call-like operation, so the shadow stack is maintained.
    assert_eq!(report.totals.functions_with_entry_exit, 1);
}

// =============================================================================
// SYNCHRONIZATION
// =============================================================================

#[test]
fn test_mutex_hooks_bracket_critical_section() {
    let mut module = Module::new("m");
    let lock_sig = Signature::new(vec![Type::ptr()], Type::i32());
    let lock = module.declare("pthread_mutex_lock", lock_sig.clone(), true);
    let unlock = module.declare("pthread_mutex_unlock", lock_sig, true);
    let mutex = module.add_global("mutex", Type::Array(Box::new(Type::i8()), 24), false);
    let shared = module.add_global("shared", Type::i32(), false);

    let mut func = new_function(&mut module, "critical", vec![], FunctionAttrs::race_checked());
    let mut b = Builder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    b.call(Callee::Direct(lock), vec![mutex.into()], Type::i32());
    b.store(Operand::i32(1), shared, 4);
    b.call(Callee::Direct(unlock), vec![mutex.into()], Type::i32());
    b.ret(None);
    module.add_function(func);

    let report = instrument(&mut module);
    assert_eq!(report.totals.sync_probes, 2);

    let runtime = Arc::new(RecordingRuntime::new());
    let mut machine = Machine::new(&module, runtime.clone());
    machine.call("critical", vec![]).unwrap();
    let mutex = machine.global_addr("mutex").unwrap();
    let events = runtime.events();
    assert_eq!(events.len(), 5);
    assert_eq!(events[1], ProbeEvent::ThreadLock { lock: mutex });
    assert!(matches!(events[2], ProbeEvent::Write { .. }));
    assert_eq!(events[3], ProbeEvent::ThreadUnlock { lock: mutex });
}

// =============================================================================
// DEFECTS
// =============================================================================

#[test]
fn test_consume_ordering_is_a_defect() {
    let mut module = Module::new("m");
    let g = module.add_global("g", Type::i32(), false);

    let mut ok = new_function(&mut module, "first", vec![], FunctionAttrs::race_checked());
    let mut b = Builder::new(&mut ok);
    let entry = b.create_block();
    b.switch_to_block(entry);
    b.store(Operand::i32(1), g, 4);
    b.ret(None);
    module.add_function(ok);

    let mut bad = new_function(&mut module, "second", vec![], FunctionAttrs::race_checked());
    let mut b = Builder::new(&mut bad);
    let entry = b.create_block();
    b.switch_to_block(entry);
    b.store(Operand::i32(1), g, 4);
    b.atomic_load(Type::i32(), g, MemoryOrdering::Consume, SyncScope::CrossThread);
    b.ret(None);
    module.add_function(bad);
    let untouched = module.functions[1].clone();

    let err = Instrumenter::new(InstrumentOptions::default())
        .run(&mut module)
        .unwrap_err();
    assert!(err.is_defect());
    match err {
        Error::UnsupportedOrdering { function, ordering } => {
            assert_eq!(function, "second");
            assert_eq!(ordering, MemoryOrdering::Consume);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(module.functions.len(), 2);
    assert_eq!(module.functions[1], untouched);
    assert_eq!(calls_to(&module, &module.functions[0], "__tsan_write4").len(), 1);
}

#[test]
fn test_consume_allowed_when_atomics_disabled() {
    let mut module = Module::new("m");
    let g = module.add_global("g", Type::i32(), false);
    let name = module.intern("f");
    let mut func = Function::new(name, vec![], Type::Void, FunctionAttrs::default());
    let mut b = Builder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    b.atomic_load(Type::i32(), g, MemoryOrdering::Consume, SyncScope::CrossThread);
    b.ret(None);
    module.add_function(func);

    let options = InstrumentOptions {
        instrument_atomics: false,
        ..Default::default()
    };
    let report = Instrumenter::new(options).run(&mut module).unwrap();
    assert!(!report.modified());
}

#[test]
fn test_options_from_json_drive_the_pass() {
    let options = InstrumentOptions::from_json(
        r#"{ "instrument_func_entry_exit": false, "probe_prefix": "__esan_" }"#,
    )
    .unwrap();
    let mut module = Module::new("m");
    let g = module.add_global("g", Type::i32(), false);
    let mut func = new_function(&mut module, "f", vec![], FunctionAttrs::race_checked());
    let mut b = Builder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    b.store(Operand::i32(1), g, 4);
    b.ret(None);
    module.add_function(func);

    let report = Instrumenter::new(options).run(&mut module).unwrap();
    assert_eq!(report.totals.functions_with_entry_exit, 0);
    let func = function(&module, "f");
    assert_eq!(calls_to(&module, func, "__esan_write4").len(), 1);
    assert!(calls_to(&module, func, "__esan_func_entry").is_empty());

    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"instrumented_writes\":1"));
}
