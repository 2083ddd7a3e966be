//! Runtime probe registry.
//!
//! Every probe the instrumenter can emit is enumerated here together with its
//! symbol name and signature. [`ProbeTable::declare`] inserts declarations for
//! all of them up front, so emitting a call never has to create a symbol.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::ir::{AtomicRmwOp, Callee, DataLayout, MemoryOrdering, Module, Signature, SymbolId, Type};

/// Access size classes with dedicated probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessSize {
    B1,
    B2,
    B4,
    B8,
    B16,
}

impl AccessSize {
    pub const ALL: [AccessSize; 5] = [
        AccessSize::B1,
        AccessSize::B2,
        AccessSize::B4,
        AccessSize::B8,
        AccessSize::B16,
    ];

    /// Size class for a byte count; `None` for any size without probes.
    pub fn from_bytes(bytes: u64) -> Option<Self> {
        match bytes {
            1 => Some(AccessSize::B1),
            2 => Some(AccessSize::B2),
            4 => Some(AccessSize::B4),
            8 => Some(AccessSize::B8),
            16 => Some(AccessSize::B16),
            _ => None,
        }
    }

    pub fn bytes(self) -> u32 {
        match self {
            AccessSize::B1 => 1,
            AccessSize::B2 => 2,
            AccessSize::B4 => 4,
            AccessSize::B8 => 8,
            AccessSize::B16 => 16,
        }
    }

    pub fn bits(self) -> u32 {
        self.bytes() * 8
    }

    /// Integer type of this width.
    pub fn int_type(self) -> Type {
        Type::Int(self.bits())
    }
}

/// Direction of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessKind {
    Read,
    Write,
}

/// Read-modify-write kinds the runtime has probes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RmwProbeOp {
    Exchange,
    FetchAdd,
    FetchSub,
    FetchAnd,
    FetchOr,
    FetchXor,
    FetchNand,
}

impl RmwProbeOp {
    pub const ALL: [RmwProbeOp; 7] = [
        RmwProbeOp::Exchange,
        RmwProbeOp::FetchAdd,
        RmwProbeOp::FetchSub,
        RmwProbeOp::FetchAnd,
        RmwProbeOp::FetchOr,
        RmwProbeOp::FetchXor,
        RmwProbeOp::FetchNand,
    ];

    /// `None` for min/max and floating-point kinds.
    pub fn from_rmw(op: AtomicRmwOp) -> Option<Self> {
        match op {
            AtomicRmwOp::Xchg => Some(RmwProbeOp::Exchange),
            AtomicRmwOp::Add => Some(RmwProbeOp::FetchAdd),
            AtomicRmwOp::Sub => Some(RmwProbeOp::FetchSub),
            AtomicRmwOp::And => Some(RmwProbeOp::FetchAnd),
            AtomicRmwOp::Or => Some(RmwProbeOp::FetchOr),
            AtomicRmwOp::Xor => Some(RmwProbeOp::FetchXor),
            AtomicRmwOp::Nand => Some(RmwProbeOp::FetchNand),
            AtomicRmwOp::Max
            | AtomicRmwOp::Min
            | AtomicRmwOp::UMax
            | AtomicRmwOp::UMin
            | AtomicRmwOp::FAdd
            | AtomicRmwOp::FSub => None,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            RmwProbeOp::Exchange => "exchange",
            RmwProbeOp::FetchAdd => "fetch_add",
            RmwProbeOp::FetchSub => "fetch_sub",
            RmwProbeOp::FetchAnd => "fetch_and",
            RmwProbeOp::FetchOr => "fetch_or",
            RmwProbeOp::FetchXor => "fetch_xor",
            RmwProbeOp::FetchNand => "fetch_nand",
        }
    }
}

/// A runtime entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Probe {
    Init,
    FuncEntry,
    FuncExit,
    MainFuncExit,
    IgnoreBegin,
    IgnoreEnd,
    Read { size: AccessSize, aligned: bool },
    Write { size: AccessSize, aligned: bool },
    VptrUpdate,
    VptrRead,
    AtomicLoad(AccessSize),
    AtomicStore(AccessSize),
    AtomicRmw(RmwProbeOp, AccessSize),
    AtomicCas(AccessSize),
    ThreadFence,
    SignalFence,
    ThreadCreate,
    ThreadJoin,
    ThreadLock,
    ThreadUnlock,
}

impl Probe {
    /// Every probe, in declaration order.
    pub fn all() -> Vec<Probe> {
        let mut probes = vec![
            Probe::Init,
            Probe::FuncEntry,
            Probe::FuncExit,
            Probe::MainFuncExit,
            Probe::IgnoreBegin,
            Probe::IgnoreEnd,
        ];
        for size in AccessSize::ALL {
            for aligned in [true, false] {
                probes.push(Probe::Read { size, aligned });
                probes.push(Probe::Write { size, aligned });
            }
        }
        probes.extend([Probe::VptrUpdate, Probe::VptrRead]);
        for size in AccessSize::ALL {
            probes.push(Probe::AtomicLoad(size));
            probes.push(Probe::AtomicStore(size));
            for op in RmwProbeOp::ALL {
                probes.push(Probe::AtomicRmw(op, size));
            }
            probes.push(Probe::AtomicCas(size));
        }
        probes.extend([
            Probe::ThreadFence,
            Probe::SignalFence,
            Probe::ThreadCreate,
            Probe::ThreadJoin,
            Probe::ThreadLock,
            Probe::ThreadUnlock,
        ]);
        probes
    }

    /// Plain read/write probe for an access.
    pub fn plain(kind: AccessKind, size: AccessSize, aligned: bool) -> Self {
        match kind {
            AccessKind::Read => Probe::Read { size, aligned },
            AccessKind::Write => Probe::Write { size, aligned },
        }
    }

    /// RMW probe, or `None` when the runtime has no entry for `op`.
    pub fn rmw(op: AtomicRmwOp, size: AccessSize) -> Option<Self> {
        RmwProbeOp::from_rmw(op).map(|op| Probe::AtomicRmw(op, size))
    }

    /// Symbol name without the configured prefix.
    pub fn name(&self) -> String {
        match self {
            Probe::Init => "init".to_string(),
            Probe::FuncEntry => "func_entry".to_string(),
            Probe::FuncExit => "func_exit".to_string(),
            Probe::MainFuncExit => "main_func_exit".to_string(),
            Probe::IgnoreBegin => "ignore_thread_begin".to_string(),
            Probe::IgnoreEnd => "ignore_thread_end".to_string(),
            Probe::Read { size, aligned: true } => format!("read{}", size.bytes()),
            Probe::Read { size, aligned: false } => format!("unaligned_read{}", size.bytes()),
            Probe::Write { size, aligned: true } => format!("write{}", size.bytes()),
            Probe::Write { size, aligned: false } => format!("unaligned_write{}", size.bytes()),
            Probe::VptrUpdate => "vptr_update".to_string(),
            Probe::VptrRead => "vptr_read".to_string(),
            Probe::AtomicLoad(size) => format!("atomic{}_load", size.bits()),
            Probe::AtomicStore(size) => format!("atomic{}_store", size.bits()),
            Probe::AtomicRmw(op, size) => format!("atomic{}_{}", size.bits(), op.suffix()),
            Probe::AtomicCas(size) => format!("atomic{}_compare_exchange_val", size.bits()),
            Probe::ThreadFence => "atomic_thread_fence".to_string(),
            Probe::SignalFence => "atomic_signal_fence".to_string(),
            Probe::ThreadCreate => "thread_create".to_string(),
            Probe::ThreadJoin => "thread_join".to_string(),
            Probe::ThreadLock => "thread_lock".to_string(),
            Probe::ThreadUnlock => "thread_unlock".to_string(),
        }
    }

    pub fn signature(&self) -> Signature {
        let ptr = Type::ptr;
        let i32 = Type::i32;
        match self {
            Probe::Init | Probe::IgnoreBegin | Probe::IgnoreEnd => Signature::new(vec![], Type::Void),
            Probe::FuncEntry
            | Probe::FuncExit
            | Probe::MainFuncExit
            | Probe::ThreadCreate
            | Probe::ThreadJoin
            | Probe::ThreadLock
            | Probe::ThreadUnlock => Signature::new(vec![ptr()], Type::Void),
            Probe::Read { .. } | Probe::Write { .. } | Probe::VptrRead => {
                Signature::new(vec![ptr(), i32(), ptr(), ptr()], Type::Void)
            }
            Probe::VptrUpdate => Signature::new(vec![ptr(), ptr(), i32(), ptr(), ptr()], Type::Void),
            Probe::AtomicLoad(size) => Signature::new(vec![ptr(), i32()], size.int_type()),
            Probe::AtomicStore(size) => {
                Signature::new(vec![ptr(), size.int_type(), i32()], Type::Void)
            }
            Probe::AtomicRmw(_, size) => {
                Signature::new(vec![ptr(), size.int_type(), i32()], size.int_type())
            }
            Probe::AtomicCas(size) => Signature::new(
                vec![ptr(), size.int_type(), size.int_type(), i32(), i32()],
                size.int_type(),
            ),
            Probe::ThreadFence | Probe::SignalFence => Signature::new(vec![i32()], Type::Void),
        }
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Unprefixed C library primitives bulk-memory operations are lowered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LibCall {
    Memset,
    Memcpy,
    Memmove,
}

impl LibCall {
    pub const ALL: [LibCall; 3] = [LibCall::Memset, LibCall::Memcpy, LibCall::Memmove];

    pub fn name(self) -> &'static str {
        match self {
            LibCall::Memset => "memset",
            LibCall::Memcpy => "memcpy",
            LibCall::Memmove => "memmove",
        }
    }

    pub fn signature(self, dl: &DataLayout) -> Signature {
        let second = match self {
            LibCall::Memset => Type::i32(),
            LibCall::Memcpy | LibCall::Memmove => Type::ptr(),
        };
        Signature::new(vec![Type::ptr(), second, dl.int_ptr_type()], Type::ptr())
    }
}

/// What a call target resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeTarget {
    Probe(Probe),
    LibCall(LibCall),
}

/// Encoded value of the ordering argument.
///
/// `consume` has no encoding: `1` is reserved for it and never emitted.
pub fn encode_ordering(ordering: MemoryOrdering) -> Option<u32> {
    match ordering {
        MemoryOrdering::Relaxed => Some(0),
        MemoryOrdering::Consume => None,
        MemoryOrdering::Acquire => Some(2),
        MemoryOrdering::Release => Some(3),
        MemoryOrdering::AcqRel => Some(4),
        MemoryOrdering::SeqCst => Some(5),
    }
}

/// Inverse of [`encode_ordering`].
pub fn decode_ordering(code: u32) -> Option<MemoryOrdering> {
    match code {
        0 => Some(MemoryOrdering::Relaxed),
        2 => Some(MemoryOrdering::Acquire),
        3 => Some(MemoryOrdering::Release),
        4 => Some(MemoryOrdering::AcqRel),
        5 => Some(MemoryOrdering::SeqCst),
        _ => None,
    }
}

/// Alignment class of a plain access: natural or unspecified alignment, or
/// anything 8 or above, counts as aligned.
pub fn is_aligned(align: u32, size: AccessSize) -> bool {
    align == 0 || align >= 8 || align % size.bytes() == 0
}

/// Resolved probe and library symbols of one module.
#[derive(Debug, Clone, Default)]
pub struct ProbeTable {
    probes: HashMap<Probe, SymbolId>,
    libcalls: HashMap<LibCall, SymbolId>,
    targets: HashMap<SymbolId, ProbeTarget>,
    prefix: String,
}

impl ProbeTable {
    /// Declare every probe and library primitive in `module`.
    pub fn declare(module: &mut Module, prefix: &str) -> Self {
        let mut table = ProbeTable {
            prefix: prefix.to_string(),
            ..Default::default()
        };
        for probe in Probe::all() {
            let name = format!("{}{}", prefix, probe.name());
            let sym = module.declare(&name, probe.signature(), true);
            table.insert_probe(probe, sym);
        }
        let dl = module.data_layout;
        for lib in LibCall::ALL {
            let sym = module.declare(lib.name(), lib.signature(&dl), true);
            table.insert_libcall(lib, sym);
        }
        table
    }

    /// Resolve whatever probe symbols `module` already knows, without
    /// declaring anything.
    pub fn resolve(module: &Module, prefix: &str) -> Self {
        let mut table = ProbeTable {
            prefix: prefix.to_string(),
            ..Default::default()
        };
        for probe in Probe::all() {
            if let Some(sym) = module.symbols.get(&format!("{}{}", prefix, probe.name())) {
                table.insert_probe(probe, sym);
            }
        }
        for lib in LibCall::ALL {
            if let Some(sym) = module.symbols.get(lib.name()) {
                table.insert_libcall(lib, sym);
            }
        }
        table
    }

    fn insert_probe(&mut self, probe: Probe, sym: SymbolId) {
        self.probes.insert(probe, sym);
        self.targets.insert(sym, ProbeTarget::Probe(probe));
    }

    fn insert_libcall(&mut self, lib: LibCall, sym: SymbolId) {
        self.libcalls.insert(lib, sym);
        self.targets.insert(sym, ProbeTarget::LibCall(lib));
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn callee(&self, probe: Probe) -> Result<Callee> {
        self.probes
            .get(&probe)
            .map(|&sym| Callee::Direct(sym))
            .ok_or_else(|| Error::MissingProbe {
                name: format!("{}{}", self.prefix, probe.name()),
            })
    }

    pub fn libcall(&self, lib: LibCall) -> Result<Callee> {
        self.libcalls
            .get(&lib)
            .map(|&sym| Callee::Direct(sym))
            .ok_or_else(|| Error::MissingProbe {
                name: lib.name().to_string(),
            })
    }

    /// What a direct callee symbol refers to, if it is a probe or primitive.
    pub fn target(&self, sym: SymbolId) -> Option<ProbeTarget> {
        self.targets.get(&sym).copied()
    }

    pub fn is_probe_symbol(&self, sym: SymbolId) -> bool {
        matches!(self.targets.get(&sym), Some(ProbeTarget::Probe(_)))
    }
}
