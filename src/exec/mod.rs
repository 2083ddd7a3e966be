//! # Reference executor
//!
//! A small interpreter for the IR, used to check that instrumented code
//! computes exactly what the original did and to observe the probe stream it
//! produces.
//!
//! ## Machine model
//!
//! - One flat little-endian [`Memory`]; address 0 and the [`NULL_GUARD`]
//!   bytes after it fault.
//! - Globals are allocated once, zero-initialized, when the machine starts.
//! - Stack slots are bump-allocated and never reclaimed.
//! - Calls to probe symbols are decoded into [`ProbeEvent`]s and delivered to
//!   the configured [`ProbeRuntime`]; atomic probes and `memset`/`memcpy`/
//!   `memmove` also perform their memory effect.
//! - Other external declarations return zero of their return type, unless
//!   registered with [`Machine::set_throwing`], in which case they unwind.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use embsan::exec::{Machine, Val};
//! use embsan::ir::{BinOp, Builder, Function, FunctionAttrs, Module, Operand, Type};
//! use embsan::runtime::RecordingRuntime;
//!
//! # fn main() -> embsan::Result<()> {
//! let mut module = Module::new("demo");
//! let name = module.intern("double");
//! let mut func = Function::new(name, vec![Type::i32()], Type::i32(), FunctionAttrs::default());
//! let mut b = Builder::new(&mut func);
//! let entry = b.create_block();
//! b.switch_to_block(entry);
//! let sum = b.binary(BinOp::Add, Operand::Param(0), Operand::Param(0), Type::i32());
//! b.ret(Some(sum.into()));
//! module.add_function(func);
//!
//! let mut machine = Machine::new(&module, Arc::new(RecordingRuntime::new()));
//! let result = machine.call("double", vec![Val::int(32, 21)])?;
//! assert_eq!(result, Some(Val::int(32, 42)));
//! # Ok(())
//! # }
//! ```

mod memory;
mod value;

pub use memory::{Memory, NULL_GUARD};
pub use value::{sign_extend, Val};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::instrument::{
    decode_ordering, InstrumentOptions, LibCall, Probe, ProbeTable, ProbeTarget, RmwProbeOp,
};
use crate::ir::{
    truncate, AtomicRmwOp, BinOp, Callee, CastKind, Constant, FloatKind, Function, ICmpPred,
    InstId, Instruction, MemoryOrdering, Module, Op, Operand, SymbolId, Type,
};
use crate::runtime::{AccessSite, ProbeEvent, ProbeRuntime};

/// Maximum nesting of executed calls.
pub const MAX_CALL_DEPTH: usize = 256;

/// How a call finished.
enum Flow {
    Return(Option<Val>),
    Unwind,
}

/// One function activation.
struct Frame<'m> {
    func: &'m Function,
    name: String,
    args: Vec<Val>,
    values: HashMap<InstId, Val>,
}

/// IR interpreter bound to one module.
pub struct Machine<'m> {
    module: &'m Module,
    probes: ProbeTable,
    runtime: Arc<dyn ProbeRuntime>,
    memory: Memory,
    globals: Vec<u64>,
    strings: HashMap<SymbolId, u64>,
    throwing: HashSet<String>,
    depth: usize,
}

impl<'m> Machine<'m> {
    /// Machine recognizing probes under the default `__tsan_` prefix.
    pub fn new(module: &'m Module, runtime: Arc<dyn ProbeRuntime>) -> Self {
        Self::with_prefix(module, &InstrumentOptions::default().probe_prefix, runtime)
    }

    pub fn with_prefix(module: &'m Module, prefix: &str, runtime: Arc<dyn ProbeRuntime>) -> Self {
        let dl = module.data_layout;
        let mut memory = Memory::new();
        let globals = module
            .globals
            .iter()
            .map(|g| {
                let size = dl.alloc_size(&g.value_ty).unwrap_or(1);
                memory.allocate(size, dl.abi_align(&g.value_ty))
            })
            .collect();

        Self {
            module,
            probes: ProbeTable::resolve(module, prefix),
            runtime,
            memory,
            globals,
            strings: HashMap::new(),
            throwing: HashSet::new(),
            depth: 0,
        }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn runtime(&self) -> &Arc<dyn ProbeRuntime> {
        &self.runtime
    }

    /// Address of a global by name.
    pub fn global_addr(&self, name: &str) -> Option<u64> {
        let id = self.module.global_by_name(name)?;
        self.globals.get(id.index()).copied()
    }

    /// Load a global as a value of its declared type.
    pub fn read_global(&self, name: &str) -> Result<Val> {
        let id = self
            .module
            .global_by_name(name)
            .ok_or_else(|| Error::execution(format!("unknown global @{}", name)))?;
        let addr = self.globals[id.index()];
        self.load(addr, &self.module.global(id).value_ty)
    }

    /// Store `value` into a global of the matching type.
    pub fn write_global(&mut self, name: &str, value: &Val) -> Result<()> {
        let id = self
            .module
            .global_by_name(name)
            .ok_or_else(|| Error::execution(format!("unknown global @{}", name)))?;
        let addr = self.globals[id.index()];
        let module = self.module;
        self.store(addr, &module.global(id).value_ty, value)
    }

    /// Make calls to the external `name` unwind instead of returning.
    pub fn set_throwing(&mut self, name: &str) {
        self.throwing.insert(name.to_string());
    }

    /// Call a defined function.
    pub fn call(&mut self, name: &str, args: Vec<Val>) -> Result<Option<Val>> {
        let module = self.module;
        let func = module.function(name).ok_or_else(|| Error::UndefinedFunction {
            name: name.to_string(),
        })?;
        match self.run_function(func, args)? {
            Flow::Return(value) => Ok(value),
            Flow::Unwind => Err(Error::UnhandledUnwind {
                function: name.to_string(),
            }),
        }
    }

    fn run_function(&mut self, func: &'m Function, args: Vec<Val>) -> Result<Flow> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Error::execution(format!(
                "call depth limit of {} exceeded",
                MAX_CALL_DEPTH
            )));
        }
        self.depth += 1;
        let result = self.run_body(func, args);
        self.depth -= 1;
        result
    }

    fn run_body(&mut self, func: &'m Function, args: Vec<Val>) -> Result<Flow> {
        let mut frame = Frame {
            func,
            name: self.module.resolve(func.name).to_string(),
            args,
            values: HashMap::new(),
        };
        let mut block = func
            .entry_block()
            .ok_or_else(|| Error::execution(format!("@{} has no body", frame.name)))?;

        loop {
            let mut next = None;
            for &id in &func.block(block).insts {
                let inst = func.inst(id);
                match &inst.op {
                    Op::Ret(value) => {
                        let value = match value {
                            Some(v) => Some(self.operand(&frame, *v)?),
                            None => None,
                        };
                        return Ok(Flow::Return(value));
                    }
                    Op::Br(dest) => {
                        next = Some(*dest);
                        break;
                    }
                    Op::CondBr {
                        cond,
                        then_dest,
                        else_dest,
                    } => {
                        let taken = self.operand(&frame, *cond)?.as_bool()?;
                        next = Some(if taken { *then_dest } else { *else_dest });
                        break;
                    }
                    Op::Invoke {
                        callee,
                        args,
                        normal,
                        unwind,
                    } => {
                        match self.call_operands(&frame, callee, args, &inst.ty)? {
                            Flow::Return(value) => {
                                if let Some(value) = value {
                                    frame.values.insert(id, value);
                                }
                                next = Some(*normal);
                            }
                            Flow::Unwind => next = Some(*unwind),
                        }
                        break;
                    }
                    Op::Resume(_) => return Ok(Flow::Unwind),
                    Op::Unreachable => {
                        return Err(Error::Unreachable {
                            function: frame.name.clone(),
                        })
                    }
                    Op::Call { callee, args, .. } => {
                        match self.call_operands(&frame, callee, args, &inst.ty)? {
                            Flow::Return(Some(value)) => {
                                frame.values.insert(id, value);
                            }
                            Flow::Return(None) => {}
                            Flow::Unwind => return Ok(Flow::Unwind),
                        }
                    }
                    _ => {
                        if let Some(value) = self.eval(&frame, inst)? {
                            frame.values.insert(id, value);
                        }
                    }
                }
            }
            block = next.ok_or_else(|| {
                Error::execution(format!(
                    "bb{} of @{} has no terminator",
                    block.index(),
                    frame.name
                ))
            })?;
        }
    }

    fn operand(&mut self, frame: &Frame<'m>, op: Operand) -> Result<Val> {
        match op {
            Operand::Inst(id) => frame.values.get(&id).cloned().ok_or_else(|| {
                Error::execution(format!("v{} used before definition in @{}", id.index(), frame.name))
            }),
            Operand::Param(i) => frame.args.get(i as usize).cloned().ok_or_else(|| {
                Error::execution(format!("@{} has no argument {}", frame.name, i))
            }),
            Operand::Global(g) => self
                .globals
                .get(g.index())
                .map(|&addr| Val::Ptr(addr))
                .ok_or_else(|| Error::execution(format!("unknown global g{}", g.index()))),
            Operand::Const(Constant::Int { bits, value }) => Ok(Val::int(bits, value)),
            Operand::Const(Constant::Null) => Ok(Val::Ptr(0)),
            Operand::Const(Constant::Undef) => Ok(Val::Undef),
            Operand::Const(Constant::Str(sym)) => self.string_addr(sym).map(Val::Ptr),
        }
    }

    fn string_addr(&mut self, sym: SymbolId) -> Result<u64> {
        if let Some(&addr) = self.strings.get(&sym) {
            return Ok(addr);
        }
        let module = self.module;
        let addr = self.memory.allocate_c_string(module.resolve(sym))?;
        self.strings.insert(sym, addr);
        Ok(addr)
    }

    fn operand_type(&self, frame: &Frame<'m>, op: Operand) -> Result<Type> {
        self.module.operand_type(frame.func, op).ok_or_else(|| {
            Error::execution(format!("cannot infer type of {:?} in @{}", op, frame.name))
        })
    }

    fn eval(&mut self, frame: &Frame<'m>, inst: &Instruction) -> Result<Option<Val>> {
        let dl = self.module.data_layout;
        let value = match &inst.op {
            Op::StackSlot { ty, count } => {
                let size = dl.alloc_size(ty).unwrap_or(1) * u64::from((*count).max(1));
                Val::Ptr(self.memory.allocate(size, dl.abi_align(ty)))
            }
            Op::PtrOffset { base, offset } => {
                let base = self.operand(frame, *base)?.as_u64()?;
                let offset = self.operand(frame, *offset)?.as_i64()?;
                Val::Ptr(base.wrapping_add(offset as u64))
            }
            Op::Cast { kind, value } => {
                let value = self.operand(frame, *value)?;
                cast(*kind, &value, &inst.ty)?
            }
            Op::Binary { op, lhs, rhs } => {
                let lhs = self.operand(frame, *lhs)?.as_u64()?;
                let rhs = self.operand(frame, *rhs)?.as_u64()?;
                let bits = inst.ty.int_bits().unwrap_or(64);
                Val::int(bits, binary(*op, lhs, rhs, bits))
            }
            Op::ICmp { pred, lhs, rhs } => {
                let lhs = self.operand(frame, *lhs)?;
                let rhs = self.operand(frame, *rhs)?;
                Val::bool(compare(*pred, &lhs, &rhs)?)
            }
            Op::Select {
                cond,
                if_true,
                if_false,
            } => {
                if self.operand(frame, *cond)?.as_bool()? {
                    self.operand(frame, *if_true)?
                } else {
                    self.operand(frame, *if_false)?
                }
            }
            Op::ExtractElement { vector: agg, index } | Op::ExtractValue { aggregate: agg, index } => {
                let agg = self.operand(frame, *agg)?;
                element(&agg, *index)?.clone()
            }
            Op::InsertValue {
                aggregate,
                value,
                index,
            } => {
                let agg = match self.operand(frame, *aggregate)? {
                    Val::Undef => Val::zero(&inst.ty)
                        .ok_or_else(|| Error::execution("insertvalue into void"))?,
                    other => other,
                };
                let value = self.operand(frame, *value)?;
                let Val::Agg(mut items) = agg else {
                    return Err(Error::execution("insertvalue into a scalar"));
                };
                let slot = items
                    .get_mut(*index as usize)
                    .ok_or_else(|| Error::execution(format!("aggregate index {} out of range", index)))?;
                *slot = value;
                Val::Agg(items)
            }

            Op::Load { addr, .. } | Op::AtomicLoad { addr, .. } => {
                let addr = self.operand(frame, *addr)?.as_u64()?;
                self.load(addr, &inst.ty)?
            }
            Op::Store { value, addr, .. } | Op::AtomicStore { value, addr, .. } => {
                let ty = self.operand_type(frame, *value)?;
                let value = self.operand(frame, *value)?;
                let addr = self.operand(frame, *addr)?.as_u64()?;
                self.store(addr, &ty, &value)?;
                return Ok(None);
            }
            Op::AtomicRmw {
                op, addr, value, ..
            } => {
                let addr = self.operand(frame, *addr)?.as_u64()?;
                let value = self.operand(frame, *value)?;
                let old = self.load(addr, &inst.ty)?;
                let new = apply_rmw(*op, &old, &value, &inst.ty)?;
                self.store(addr, &inst.ty, &new)?;
                old
            }
            Op::CmpXchg {
                addr, expected, new, ..
            } => {
                let ty = self.operand_type(frame, *new)?;
                let addr = self.operand(frame, *addr)?.as_u64()?;
                let expected = self.operand(frame, *expected)?;
                let new = self.operand(frame, *new)?;
                let old = self.load(addr, &ty)?;
                let swapped = old.as_u64()? == expected.as_u64()?;
                if swapped {
                    self.store(addr, &ty, &new)?;
                }
                Val::Agg(vec![old, Val::bool(swapped)])
            }
            Op::Fence { .. } => return Ok(None),

            Op::MemSet { dst, value, len } => {
                let dst = self.operand(frame, *dst)?.as_u64()?;
                let byte = self.operand(frame, *value)?.as_u64()? as u8;
                let len = self.operand(frame, *len)?.as_u64()?;
                self.memory.fill(dst, byte, len)?;
                return Ok(None);
            }
            Op::MemCopy { dst, src, len } | Op::MemMove { dst, src, len } => {
                let dst = self.operand(frame, *dst)?.as_u64()?;
                let src = self.operand(frame, *src)?.as_u64()?;
                let len = self.operand(frame, *len)?.as_u64()?;
                self.memory.copy(dst, src, len)?;
                return Ok(None);
            }

            Op::LandingPad { .. } => Val::Token,

            Op::Call { .. }
            | Op::Invoke { .. }
            | Op::Ret(_)
            | Op::Br(_)
            | Op::CondBr { .. }
            | Op::Resume(_)
            | Op::Unreachable => {
                return Err(Error::execution(format!(
                    "control flow evaluated as a value in @{}",
                    frame.name
                )))
            }
        };
        Ok(Some(value))
    }

    fn load(&self, addr: u64, ty: &Type) -> Result<Val> {
        let dl = self.module.data_layout;
        match ty {
            Type::Int(bits) => {
                let size = u64::from(*bits).div_ceil(8);
                Ok(Val::int(*bits, self.memory.read_uint(addr, size)?))
            }
            Type::Ptr(_) => Ok(Val::Ptr(
                self.memory.read_uint(addr, u64::from(dl.pointer_bytes))?,
            )),
            Type::Float(kind) => {
                let size = if *kind == FloatKind::F32 { 4 } else { 8 };
                Ok(Val::Float(*kind, self.memory.read_uint(addr, size)?))
            }
            Type::Vector(elem, lanes) => {
                let stride = dl.store_size(elem).unwrap_or(1);
                (0..u64::from(*lanes))
                    .map(|i| self.load(addr + i * stride, elem))
                    .collect::<Result<Vec<_>>>()
                    .map(Val::Agg)
            }
            Type::Array(elem, len) => {
                let stride = dl.alloc_size(elem).unwrap_or(1);
                (0..*len)
                    .map(|i| self.load(addr + i * stride, elem))
                    .collect::<Result<Vec<_>>>()
                    .map(Val::Agg)
            }
            Type::Struct(fields) => fields
                .iter()
                .enumerate()
                .map(|(i, field)| {
                    let offset = dl.field_offset(fields, i).unwrap_or(0);
                    self.load(addr + offset, field)
                })
                .collect::<Result<Vec<_>>>()
                .map(Val::Agg),
            Type::Void | Type::Token => Err(Error::execution(format!("cannot load {}", ty))),
        }
    }

    fn store(&mut self, addr: u64, ty: &Type, value: &Val) -> Result<()> {
        let dl = self.module.data_layout;
        let size = dl
            .store_size(ty)
            .ok_or_else(|| Error::execution(format!("cannot store {}", ty)))?;
        let items = match (ty, value) {
            (Type::Int(_) | Type::Ptr(_) | Type::Float(_), _) => {
                return self.memory.write_uint(addr, size, value.as_u64()?);
            }
            (_, Val::Undef) => return self.memory.fill(addr, 0, size),
            (_, Val::Agg(items)) => items,
            _ => {
                return Err(Error::execution(format!(
                    "cannot store {} as {}",
                    value.type_name(),
                    ty
                )))
            }
        };
        match ty {
            Type::Vector(elem, _) | Type::Array(elem, _) => {
                let stride = if matches!(ty, Type::Vector(..)) {
                    dl.store_size(elem).unwrap_or(1)
                } else {
                    dl.alloc_size(elem).unwrap_or(1)
                };
                for (i, item) in items.iter().enumerate() {
                    self.store(addr + i as u64 * stride, elem, item)?;
                }
            }
            Type::Struct(fields) => {
                for (i, (field, item)) in fields.iter().zip(items).enumerate() {
                    let offset = dl.field_offset(fields, i).unwrap_or(0);
                    self.store(addr + offset, field, item)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn call_operands(
        &mut self,
        frame: &Frame<'m>,
        callee: &Callee,
        args: &[Operand],
        ret: &Type,
    ) -> Result<Flow> {
        let Callee::Direct(sym) = callee else {
            return Err(Error::execution(format!(
                "indirect call in @{} is not supported",
                frame.name
            )));
        };
        let args = args
            .iter()
            .map(|&arg| self.operand(frame, arg))
            .collect::<Result<Vec<_>>>()?;
        self.call_symbol(*sym, args, ret)
    }

    fn call_symbol(&mut self, sym: SymbolId, args: Vec<Val>, ret: &Type) -> Result<Flow> {
        if let Some(target) = self.probes.target(sym) {
            let result = match target {
                ProbeTarget::Probe(probe) => self.probe(probe, &args)?,
                ProbeTarget::LibCall(lib) => Some(self.libcall(lib, &args)?),
            };
            return Ok(Flow::Return(result));
        }

        let module = self.module;
        let name = module.resolve(sym);
        if self.throwing.contains(name) {
            tracing::trace!(callee = name, "external call unwinds");
            return Ok(Flow::Unwind);
        }
        if let Some(func) = module.function(name) {
            return self.run_function(func, args);
        }
        if module.declaration(sym).is_some() {
            tracing::trace!(callee = name, "external call returns zero");
            return Ok(Flow::Return(Val::zero(ret)));
        }
        Err(Error::UndefinedFunction {
            name: name.to_string(),
        })
    }

    /// Deliver a probe call to the runtime and perform its memory effect.
    fn probe(&mut self, probe: Probe, args: &[Val]) -> Result<Option<Val>> {
        let (event, result) = match probe {
            Probe::Init => (ProbeEvent::Init, None),
            Probe::FuncEntry => (
                ProbeEvent::FuncEntry {
                    function: self.c_string_arg(args, 0)?,
                },
                None,
            ),
            Probe::FuncExit => (
                ProbeEvent::FuncExit {
                    function: self.c_string_arg(args, 0)?,
                },
                None,
            ),
            Probe::MainFuncExit => (
                ProbeEvent::MainFuncExit {
                    function: self.c_string_arg(args, 0)?,
                },
                None,
            ),
            Probe::IgnoreBegin => (ProbeEvent::IgnoreBegin, None),
            Probe::IgnoreEnd => (ProbeEvent::IgnoreEnd, None),
            Probe::Read { size, aligned } => (
                ProbeEvent::Read {
                    addr: arg(args, 0)?,
                    size,
                    aligned,
                    site: self.site(args, 1)?,
                },
                None,
            ),
            Probe::Write { size, aligned } => (
                ProbeEvent::Write {
                    addr: arg(args, 0)?,
                    size,
                    aligned,
                    site: self.site(args, 1)?,
                },
                None,
            ),
            Probe::VptrUpdate => (
                ProbeEvent::VptrUpdate {
                    addr: arg(args, 0)?,
                    new_value: arg(args, 1)?,
                    site: self.site(args, 2)?,
                },
                None,
            ),
            Probe::VptrRead => (
                ProbeEvent::VptrRead {
                    addr: arg(args, 0)?,
                    site: self.site(args, 1)?,
                },
                None,
            ),
            Probe::AtomicLoad(size) => {
                let addr = arg(args, 0)?;
                let ordering = ordering_arg(args, 1)?;
                let value = self.memory.read_uint(addr, u64::from(size.bytes()))?;
                (
                    ProbeEvent::AtomicLoad {
                        addr,
                        size,
                        ordering,
                    },
                    Some(Val::int(size.bits(), value)),
                )
            }
            Probe::AtomicStore(size) => {
                let addr = arg(args, 0)?;
                let value = truncate(arg(args, 1)?, size.bits());
                let ordering = ordering_arg(args, 2)?;
                self.memory.write_uint(addr, u64::from(size.bytes()), value)?;
                (
                    ProbeEvent::AtomicStore {
                        addr,
                        size,
                        value,
                        ordering,
                    },
                    None,
                )
            }
            Probe::AtomicRmw(op, size) => {
                let addr = arg(args, 0)?;
                let value = arg(args, 1)?;
                let ordering = ordering_arg(args, 2)?;
                let old = self.memory.read_uint(addr, u64::from(size.bytes()))?;
                let new = int_rmw(rmw_kind(op), old, value, size.bits())?;
                self.memory.write_uint(addr, u64::from(size.bytes()), new)?;
                (
                    ProbeEvent::AtomicRmw {
                        addr,
                        size,
                        op,
                        value: truncate(value, size.bits()),
                        ordering,
                    },
                    Some(Val::int(size.bits(), old)),
                )
            }
            Probe::AtomicCas(size) => {
                let addr = arg(args, 0)?;
                let expected = truncate(arg(args, 1)?, size.bits());
                let new = truncate(arg(args, 2)?, size.bits());
                let success = ordering_arg(args, 3)?;
                let failure = ordering_arg(args, 4)?;
                let old = self.memory.read_uint(addr, u64::from(size.bytes()))?;
                if old == expected {
                    self.memory.write_uint(addr, u64::from(size.bytes()), new)?;
                }
                (
                    ProbeEvent::AtomicCas {
                        addr,
                        size,
                        expected,
                        new,
                        success,
                        failure,
                    },
                    Some(Val::int(size.bits(), old)),
                )
            }
            Probe::ThreadFence => (
                ProbeEvent::ThreadFence {
                    ordering: ordering_arg(args, 0)?,
                },
                None,
            ),
            Probe::SignalFence => (
                ProbeEvent::SignalFence {
                    ordering: ordering_arg(args, 0)?,
                },
                None,
            ),
            Probe::ThreadCreate => (ProbeEvent::ThreadCreate { handle: arg(args, 0)? }, None),
            Probe::ThreadJoin => (ProbeEvent::ThreadJoin { handle: arg(args, 0)? }, None),
            Probe::ThreadLock => (ProbeEvent::ThreadLock { lock: arg(args, 0)? }, None),
            Probe::ThreadUnlock => (ProbeEvent::ThreadUnlock { lock: arg(args, 0)? }, None),
        };
        self.runtime.on_probe(&event);
        Ok(result)
    }

    fn libcall(&mut self, lib: LibCall, args: &[Val]) -> Result<Val> {
        let dst = arg(args, 0)?;
        let len = arg(args, 2)?;
        match lib {
            LibCall::Memset => self.memory.fill(dst, arg(args, 1)? as u8, len)?,
            LibCall::Memcpy | LibCall::Memmove => self.memory.copy(dst, arg(args, 1)?, len)?,
        }
        Ok(Val::Ptr(dst))
    }

    fn c_string_arg(&self, args: &[Val], index: usize) -> Result<String> {
        self.memory.read_c_string(arg(args, index)?)
    }

    fn site(&self, args: &[Val], first: usize) -> Result<AccessSite> {
        Ok(AccessSite {
            line: arg(args, first)? as u32,
            object: self.c_string_arg(args, first + 1)?,
            file: self.c_string_arg(args, first + 2)?,
        })
    }
}

fn arg(args: &[Val], index: usize) -> Result<u64> {
    args.get(index)
        .ok_or_else(|| Error::execution(format!("probe argument {} missing", index)))?
        .as_u64()
}

fn ordering_arg(args: &[Val], index: usize) -> Result<MemoryOrdering> {
    let code = arg(args, index)?;
    u32::try_from(code)
        .ok()
        .and_then(decode_ordering)
        .ok_or_else(|| Error::execution(format!("invalid memory ordering code {}", code)))
}

fn rmw_kind(op: RmwProbeOp) -> AtomicRmwOp {
    match op {
        RmwProbeOp::Exchange => AtomicRmwOp::Xchg,
        RmwProbeOp::FetchAdd => AtomicRmwOp::Add,
        RmwProbeOp::FetchSub => AtomicRmwOp::Sub,
        RmwProbeOp::FetchAnd => AtomicRmwOp::And,
        RmwProbeOp::FetchOr => AtomicRmwOp::Or,
        RmwProbeOp::FetchXor => AtomicRmwOp::Xor,
        RmwProbeOp::FetchNand => AtomicRmwOp::Nand,
    }
}

fn int_rmw(op: AtomicRmwOp, old: u64, value: u64, bits: u32) -> Result<u64> {
    let old = truncate(old, bits);
    let value = truncate(value, bits);
    let new = match op {
        AtomicRmwOp::Xchg => value,
        AtomicRmwOp::Add => old.wrapping_add(value),
        AtomicRmwOp::Sub => old.wrapping_sub(value),
        AtomicRmwOp::And => old & value,
        AtomicRmwOp::Nand => !(old & value),
        AtomicRmwOp::Or => old | value,
        AtomicRmwOp::Xor => old ^ value,
        AtomicRmwOp::Max => {
            if sign_extend(old, bits) >= sign_extend(value, bits) {
                old
            } else {
                value
            }
        }
        AtomicRmwOp::Min => {
            if sign_extend(old, bits) <= sign_extend(value, bits) {
                old
            } else {
                value
            }
        }
        AtomicRmwOp::UMax => old.max(value),
        AtomicRmwOp::UMin => old.min(value),
        AtomicRmwOp::FAdd | AtomicRmwOp::FSub => {
            return Err(Error::execution(format!("{} on integers", op)))
        }
    };
    Ok(truncate(new, bits))
}

fn apply_rmw(op: AtomicRmwOp, old: &Val, value: &Val, ty: &Type) -> Result<Val> {
    match (ty, op) {
        (Type::Float(kind), AtomicRmwOp::FAdd | AtomicRmwOp::FSub) => {
            let sign = if op == AtomicRmwOp::FAdd { 1.0 } else { -1.0 };
            let (a, b) = (old.as_u64()?, value.as_u64()?);
            let bits = match kind {
                FloatKind::F32 => {
                    let r = f32::from_bits(a as u32) + sign as f32 * f32::from_bits(b as u32);
                    u64::from(r.to_bits())
                }
                FloatKind::F64 => (f64::from_bits(a) + sign * f64::from_bits(b)).to_bits(),
            };
            Ok(Val::Float(*kind, bits))
        }
        (Type::Float(kind), AtomicRmwOp::Xchg) => Ok(Val::Float(*kind, value.as_u64()?)),
        (Type::Ptr(_), AtomicRmwOp::Xchg) => Ok(Val::Ptr(value.as_u64()?)),
        (Type::Int(bits), _) => Ok(Val::int(
            *bits,
            int_rmw(op, old.as_u64()?, value.as_u64()?, *bits)?,
        )),
        _ => Err(Error::execution(format!("atomicrmw {} on {}", op, ty))),
    }
}

fn element(agg: &Val, index: u32) -> Result<&Val> {
    agg.elements()?
        .get(index as usize)
        .ok_or_else(|| Error::execution(format!("aggregate index {} out of range", index)))
}

fn cast(kind: CastKind, value: &Val, ty: &Type) -> Result<Val> {
    let raw = value.as_u64()?;
    Ok(match (kind, ty) {
        (CastKind::IntToPtr, _) | (CastKind::Bitcast, Type::Ptr(_)) => Val::Ptr(raw),
        (CastKind::SExt, Type::Int(bits)) => Val::int(*bits, value.as_i64()? as u64),
        (CastKind::PtrToInt | CastKind::ZExt | CastKind::Trunc | CastKind::Bitcast, Type::Int(bits)) => {
            Val::int(*bits, raw)
        }
        (CastKind::Bitcast, Type::Float(kind)) => Val::Float(*kind, raw),
        (CastKind::Bitcast, _) => value.clone(),
        _ => {
            return Err(Error::execution(format!(
                "cannot cast {} to {}",
                value.type_name(),
                ty
            )))
        }
    })
}

fn binary(op: BinOp, lhs: u64, rhs: u64, bits: u32) -> u64 {
    match op {
        BinOp::Add => lhs.wrapping_add(rhs),
        BinOp::Sub => lhs.wrapping_sub(rhs),
        BinOp::Mul => lhs.wrapping_mul(rhs),
        BinOp::And => lhs & rhs,
        BinOp::Or => lhs | rhs,
        BinOp::Xor => lhs ^ rhs,
        BinOp::Shl if rhs < u64::from(bits) => lhs << rhs,
        BinOp::LShr if rhs < u64::from(bits) => truncate(lhs, bits) >> rhs,
        BinOp::Shl | BinOp::LShr => 0,
    }
}

fn compare(pred: ICmpPred, lhs: &Val, rhs: &Val) -> Result<bool> {
    let (a, b) = (lhs.as_u64()?, rhs.as_u64()?);
    Ok(match pred {
        ICmpPred::Eq => a == b,
        ICmpPred::Ne => a != b,
        ICmpPred::Ult => a < b,
        ICmpPred::Ule => a <= b,
        ICmpPred::Ugt => a > b,
        ICmpPred::Slt => lhs.as_i64()? < rhs.as_i64()?,
        ICmpPred::Sgt => lhs.as_i64()? > rhs.as_i64()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, FunctionAttrs, Signature, SyncScope};
    use crate::runtime::RecordingRuntime;

    fn runtime() -> Arc<RecordingRuntime> {
        Arc::new(RecordingRuntime::new())
    }

    #[test]
    fn test_globals_and_stack() {
        let mut module = Module::new("m");
        let g = module.add_global("g", Type::i32(), false);
        let name = module.intern("f");
        let mut func = Function::new(name, vec![], Type::i32(), FunctionAttrs::default());
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let slot = b.stack_slot(Type::i32());
        b.store(Operand::i32(5), slot, 4);
        let v = b.load(Type::i32(), slot, 4);
        b.store(Operand::Inst(v), g, 4);
        let old = b.atomic_rmw(AtomicRmwOp::Add, Type::i32(), g, Operand::i32(3), MemoryOrdering::SeqCst);
        b.ret(Some(old.into()));
        module.add_function(func);

        let rt = runtime();
        let mut machine = Machine::new(&module, rt.clone());
        assert_eq!(machine.call("f", vec![]).unwrap(), Some(Val::int(32, 5)));
        assert_eq!(machine.read_global("g").unwrap(), Val::int(32, 8));
        assert!(rt.events().is_empty());
    }

    #[test]
    fn test_cmpxchg_result_pair() {
        let mut module = Module::new("m");
        let g = module.add_global("g", Type::i32(), false);
        let name = module.intern("cas");
        let mut func = Function::new(name, vec![Type::i32(), Type::i32()], Type::Struct(vec![Type::i32(), Type::i1()]), FunctionAttrs::default());
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let pair = b.cmpxchg(
            Type::i32(),
            g,
            Operand::Param(0),
            Operand::Param(1),
            MemoryOrdering::SeqCst,
            MemoryOrdering::Relaxed,
        );
        b.ret(Some(pair.into()));
        module.add_function(func);

        let mut machine = Machine::new(&module, runtime());
        machine.write_global("g", &Val::int(32, 1)).unwrap();
        let failed = machine.call("cas", vec![Val::int(32, 2), Val::int(32, 9)]).unwrap();
        assert_eq!(failed, Some(Val::Agg(vec![Val::int(32, 1), Val::bool(false)])));
        let swapped = machine.call("cas", vec![Val::int(32, 1), Val::int(32, 9)]).unwrap();
        assert_eq!(swapped, Some(Val::Agg(vec![Val::int(32, 1), Val::bool(true)])));
        assert_eq!(machine.read_global("g").unwrap(), Val::int(32, 9));
    }

    #[test]
    fn test_probe_calls_reach_runtime() {
        let mut module = Module::new("m");
        let table = ProbeTable::declare(&mut module, "__tsan_");
        let g = module.add_global("g", Type::i32(), false);
        let name = module.intern("f");
        let obj = module.intern("g");
        let file = module.intern("/src/a.c");
        let mut func = Function::new(name, vec![], Type::Void, FunctionAttrs::default());
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let write4 = table
            .callee(Probe::Write {
                size: crate::instrument::AccessSize::B4,
                aligned: true,
            })
            .unwrap();
        b.call_nounwind(
            write4,
            vec![
                g.into(),
                Operand::i32(12),
                Operand::Const(Constant::Str(obj)),
                Operand::Const(Constant::Str(file)),
            ],
            Type::Void,
        );
        let fence = table.callee(Probe::ThreadFence).unwrap();
        b.call_nounwind(fence, vec![Operand::i32(5)], Type::Void);
        b.ret(None);
        module.add_function(func);

        let rt = runtime();
        let mut machine = Machine::new(&module, rt.clone());
        machine.call("f", vec![]).unwrap();
        let addr = machine.global_addr("g").unwrap();
        assert_eq!(
            rt.events(),
            vec![
                ProbeEvent::Write {
                    addr,
                    size: crate::instrument::AccessSize::B4,
                    aligned: true,
                    site: AccessSite {
                        line: 12,
                        object: "g".into(),
                        file: "/src/a.c".into(),
                    },
                },
                ProbeEvent::ThreadFence {
                    ordering: MemoryOrdering::SeqCst
                },
            ]
        );
    }

    #[test]
    fn test_invoke_takes_unwind_edge() {
        let mut module = Module::new("m");
        let boom = module.declare("boom", Signature::new(vec![], Type::Void), false);
        let name = module.intern("f");
        let mut func = Function::new(name, vec![], Type::i32(), FunctionAttrs::default());
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        let normal = b.create_block();
        let cleanup = b.create_block();
        b.switch_to_block(entry);
        b.invoke(Callee::Direct(boom), vec![], Type::Void, normal, cleanup);
        b.switch_to_block(normal);
        b.ret(Some(Operand::i32(0)));
        b.switch_to_block(cleanup);
        let lp = b.landing_pad(true);
        b.resume(lp.into());
        module.add_function(func);

        let mut machine = Machine::new(&module, runtime());
        assert_eq!(machine.call("f", vec![]).unwrap(), Some(Val::int(32, 0)));

        machine.set_throwing("boom");
        let err = machine.call("f", vec![]).unwrap_err();
        assert!(matches!(err, Error::UnhandledUnwind { .. }));
    }

    #[test]
    fn test_unreachable_and_recursion_limit() {
        let mut module = Module::new("m");
        let name = module.intern("loop_forever");
        let mut func = Function::new(name, vec![], Type::Void, FunctionAttrs::default());
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        b.call(Callee::Direct(name), vec![], Type::Void);
        b.ret(None);
        module.add_function(func);

        let trap = module.intern("trap");
        let mut func = Function::new(trap, vec![], Type::Void, FunctionAttrs::default());
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        b.unreachable();
        module.add_function(func);

        let mut machine = Machine::new(&module, runtime());
        assert!(matches!(machine.call("loop_forever", vec![]), Err(Error::Execution(_))));
        assert!(matches!(machine.call("trap", vec![]), Err(Error::Unreachable { .. })));
    }

    #[test]
    fn test_rmw_kinds() {
        assert_eq!(int_rmw(AtomicRmwOp::Nand, 0xff, 0x0f, 8).unwrap(), 0xf0);
        assert_eq!(int_rmw(AtomicRmwOp::Max, 0xff, 1, 8).unwrap(), 1);
        assert_eq!(int_rmw(AtomicRmwOp::UMax, 0xff, 1, 8).unwrap(), 0xff);
        assert_eq!(int_rmw(AtomicRmwOp::Sub, 0, 1, 16).unwrap(), 0xffff);
        assert!(int_rmw(AtomicRmwOp::FAdd, 0, 1, 32).is_err());

        let sum = apply_rmw(
            AtomicRmwOp::FAdd,
            &Val::Float(FloatKind::F64, 1.5f64.to_bits()),
            &Val::Float(FloatKind::F64, 2.0f64.to_bits()),
            &Type::Float(FloatKind::F64),
        )
        .unwrap();
        assert_eq!(sum, Val::Float(FloatKind::F64, 3.5f64.to_bits()));
    }

    #[test]
    fn test_fence_is_noop_when_uninstrumented() {
        let mut module = Module::new("m");
        let name = module.intern("f");
        let mut func = Function::new(name, vec![], Type::Void, FunctionAttrs::default());
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        b.fence(MemoryOrdering::SeqCst, SyncScope::CrossThread);
        b.ret(None);
        module.add_function(func);

        let rt = runtime();
        Machine::new(&module, rt.clone()).call("f", vec![]).unwrap();
        assert!(rt.events().is_empty());
    }
}
