//! Address classification.
//!
//! Decides, per memory access, whether its address can ever be shared with
//! another thread in a way the runtime must observe.

use crate::ir::{CastKind, Function, GlobalId, InstId, Module, Op, Operand};

use super::capture::CaptureAnalysis;
use super::options::InstrumentOptions;
use super::probes::AccessKind;

/// Why an access is never instrumented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExclusionReason {
    /// Pointer in a non-default address space.
    AddressSpace,
    /// Toolchain-internal global (coverage, profile counters).
    ReservedGlobal,
    /// Stack slot whose address never escapes.
    NonEscapingStack,
}

/// Why an eligible address is known to be read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstantReason {
    ConstantGlobal,
    /// Read through a just-loaded vtable pointer.
    VtableRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressClass {
    Excluded(ExclusionReason),
    EligibleConstant(ConstantReason),
    EligibleMutable,
}

/// Object an address points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseObject {
    Global(GlobalId),
    StackSlot(InstId),
    Param(u32),
    /// Pointer returned by a call.
    Heap(InstId),
    Unknown,
}

/// Strip constant offsets and pointer bitcasts.
pub fn strip_offsets_and_casts(func: &Function, addr: Operand) -> Operand {
    let mut current = addr;
    // Bounded so malformed, self-referential IR cannot loop forever.
    for _ in 0..=func.arena_len() {
        let Operand::Inst(id) = current else {
            break;
        };
        let Some(inst) = func.get_inst(id) else {
            break;
        };
        current = match inst.op {
            Op::PtrOffset { base, .. } => base,
            Op::Cast {
                kind: CastKind::Bitcast,
                value,
            } => value,
            _ => break,
        };
    }
    current
}

/// Underlying object of an address.
pub fn base_object(func: &Function, addr: Operand) -> BaseObject {
    match strip_offsets_and_casts(func, addr) {
        Operand::Global(g) => BaseObject::Global(g),
        Operand::Param(idx) => BaseObject::Param(idx),
        Operand::Inst(id) => match func.get_inst(id).map(|i| &i.op) {
            Some(Op::StackSlot { .. }) => BaseObject::StackSlot(id),
            Some(Op::Call { .. }) | Some(Op::Invoke { .. }) => BaseObject::Heap(id),
            _ => BaseObject::Unknown,
        },
        Operand::Const(_) => BaseObject::Unknown,
    }
}

/// Classifies addresses of one function.
pub struct AddressClassifier<'a> {
    module: &'a Module,
    func: &'a Function,
    options: &'a InstrumentOptions,
    captures: CaptureAnalysis,
}

impl<'a> AddressClassifier<'a> {
    pub fn new(module: &'a Module, func: &'a Function, options: &'a InstrumentOptions) -> Self {
        Self {
            module,
            func,
            options,
            captures: CaptureAnalysis::new(),
        }
    }

    pub fn classify(&mut self, addr: Operand, kind: AccessKind) -> AddressClass {
        let stripped = strip_offsets_and_casts(self.func, addr);
        let space = self
            .module
            .operand_type(self.func, stripped)
            .and_then(|ty| ty.address_space())
            .unwrap_or(0);
        if space != 0 {
            return AddressClass::Excluded(ExclusionReason::AddressSpace);
        }

        let base = base_object(self.func, addr);
        if let BaseObject::Global(g) = base {
            if self.is_reserved_global(g) {
                return AddressClass::Excluded(ExclusionReason::ReservedGlobal);
            }
            if self.module.global(g).constant {
                return AddressClass::EligibleConstant(ConstantReason::ConstantGlobal);
            }
        }

        if kind == AccessKind::Read && self.is_vtable_slot(addr) {
            return AddressClass::EligibleConstant(ConstantReason::VtableRead);
        }

        if let BaseObject::StackSlot(slot) = base {
            if !self.captures.may_be_captured(self.func, slot) {
                return AddressClass::Excluded(ExclusionReason::NonEscapingStack);
            }
        }

        AddressClass::EligibleMutable
    }

    fn is_reserved_global(&self, g: GlobalId) -> bool {
        let global = self.module.global(g);
        let name = self.module.resolve(global.name);
        if self
            .options
            .reserved_name_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
        {
            return true;
        }
        global.section.as_deref().is_some_and(|section| {
            self.options
                .reserved_sections
                .iter()
                .any(|suffix| section.ends_with(suffix.as_str()))
        })
    }

    /// Address is (one offset away from) a pointer loaded from a vtable slot.
    fn is_vtable_slot(&self, addr: Operand) -> bool {
        let mut current = addr;
        if let Operand::Inst(id) = current {
            if let Some(Op::PtrOffset { base, .. }) = self.func.get_inst(id).map(|i| &i.op) {
                current = *base;
            }
        }
        let Operand::Inst(id) = current else {
            return false;
        };
        self.func.get_inst(id).is_some_and(|inst| {
            inst.vtable_access && matches!(inst.op, Op::Load { .. } | Op::AtomicLoad { .. })
        })
    }
}
