//! Local redundancy filter.
//!
//! Within a call-free segment, a read followed by a write to the identical
//! address operand needs no probe of its own: the write's probe covers any
//! race the read could take part in. The segment is scanned backwards so the
//! set of "written later" addresses is complete when a read is reached.

use std::collections::HashSet;

use crate::ir::{Function, InstId, Op, Operand};

use super::classify::{AddressClass, AddressClassifier, ConstantReason, ExclusionReason};
use super::probes::AccessKind;
use super::stats::InstrumentStats;

/// A load or store that survived filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledAccess {
    pub inst: InstId,
    pub kind: AccessKind,
    pub addr: Operand,
}

/// Direction and address of a plain (or single-thread atomic) access.
pub fn access_of(op: &Op) -> Option<(AccessKind, Operand)> {
    match op {
        Op::Load { addr, .. } | Op::AtomicLoad { addr, .. } => Some((AccessKind::Read, *addr)),
        Op::Store { addr, .. } | Op::AtomicStore { addr, .. } => Some((AccessKind::Write, *addr)),
        _ => None,
    }
}

/// Choose which accesses of one segment get probes, in program order.
pub fn filter_segment(
    func: &Function,
    segment: &[InstId],
    classifier: &mut AddressClassifier<'_>,
    stats: &mut InstrumentStats,
) -> Vec<ScheduledAccess> {
    let mut written_later: HashSet<Operand> = HashSet::new();
    let mut scheduled = Vec::new();

    for &inst in segment.iter().rev() {
        let Some((kind, addr)) = access_of(&func.inst(inst).op) else {
            continue;
        };
        let class = classifier.classify(addr, kind);
        if let AddressClass::Excluded(reason) = class {
            match reason {
                ExclusionReason::NonEscapingStack => stats.omitted_non_captured += 1,
                ExclusionReason::AddressSpace | ExclusionReason::ReservedGlobal => {
                    stats.omitted_excluded += 1
                }
            }
            tracing::trace!(inst = inst.index(), ?reason, "access excluded");
            continue;
        }

        match kind {
            AccessKind::Write => {
                written_later.insert(addr);
            }
            AccessKind::Read => {
                if written_later.contains(&addr) {
                    stats.omitted_reads_before_write += 1;
                    continue;
                }
                if let AddressClass::EligibleConstant(reason) = class {
                    match reason {
                        ConstantReason::ConstantGlobal => {
                            stats.omitted_reads_from_constant_globals += 1
                        }
                        ConstantReason::VtableRead => stats.omitted_reads_from_vtable += 1,
                    }
                    continue;
                }
            }
        }
        scheduled.push(ScheduledAccess { inst, kind, addr });
    }

    scheduled.reverse();
    scheduled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::InstrumentOptions;
    use crate::ir::{Builder, FunctionAttrs, Module, Type};

    #[test]
    fn test_read_before_write_is_dropped() {
        let mut module = Module::new("m");
        let name = module.intern("f");
        let mut func = Function::new(name, vec![Type::ptr(), Type::ptr()], Type::Void, FunctionAttrs::race_checked());
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let r0 = b.load(Type::i32(), Operand::Param(0), 4);
        let r1 = b.load(Type::i32(), Operand::Param(1), 4);
        let w0 = b.store(Operand::i32(1), Operand::Param(0), 4);
        let r2 = b.load(Type::i32(), Operand::Param(0), 4);
        b.ret(None);
        module.add_function(func.clone());

        let opts = InstrumentOptions::default();
        let mut classifier = AddressClassifier::new(&module, &func, &opts);
        let mut stats = InstrumentStats::default();
        let chosen = filter_segment(&func, &[r0, r1, w0, r2], &mut classifier, &mut stats);

        let insts: Vec<InstId> = chosen.iter().map(|a| a.inst).collect();
        assert_eq!(insts, vec![r1, w0, r2]);
        assert_eq!(stats.omitted_reads_before_write, 1);
    }

    #[test]
    fn test_distinct_operands_are_not_merged() {
        let module = Module::new("m");
        let mut func = Function::new(
            crate::ir::SymbolId(0),
            vec![Type::ptr()],
            Type::Void,
            FunctionAttrs::race_checked(),
        );
        let mut b = Builder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let alias = b.ptr_offset(Operand::Param(0), Operand::i32(0), Type::ptr());
        let read = b.load(Type::i32(), Operand::Param(0), 4);
        let write = b.store(Operand::i32(1), alias, 4);
        b.ret(None);

        let opts = InstrumentOptions::default();
        let mut classifier = AddressClassifier::new(&module, &func, &opts);
        let mut stats = InstrumentStats::default();
        let chosen = filter_segment(&func, &[alias, read, write], &mut classifier, &mut stats);
        assert_eq!(chosen.len(), 2);
        assert_eq!(stats.omitted(), 0);
    }
}
