//! Instrumentation statistics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::AddAssign;

/// Counters accumulated over an instrumentation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentStats {
    pub instrumented_reads: u64,
    pub instrumented_writes: u64,
    pub instrumented_vtable_writes: u64,
    pub instrumented_vtable_reads: u64,
    /// Reads dropped because a later write in the same segment covers them
    pub omitted_reads_before_write: u64,
    pub omitted_reads_from_constant_globals: u64,
    pub omitted_reads_from_vtable: u64,
    /// Accesses to stack slots whose address never escapes
    pub omitted_non_captured: u64,
    /// Accesses in other address spaces or to toolchain-reserved globals
    pub omitted_excluded: u64,
    pub accesses_with_bad_size: u64,
    pub instrumented_atomics: u64,
    pub unsupported_rmw: u64,
    pub lowered_mem_intrinsics: u64,
    pub sync_probes: u64,
    pub functions_with_entry_exit: u64,
    pub exit_probes: u64,
    pub ignore_brackets: u64,
}

impl InstrumentStats {
    /// Total plain read/write probes emitted.
    pub fn access_probes(&self) -> u64 {
        self.instrumented_reads
            + self.instrumented_writes
            + self.instrumented_vtable_reads
            + self.instrumented_vtable_writes
    }

    pub fn omitted(&self) -> u64 {
        self.omitted_reads_before_write
            + self.omitted_reads_from_constant_globals
            + self.omitted_reads_from_vtable
            + self.omitted_non_captured
            + self.omitted_excluded
    }
}

impl AddAssign for InstrumentStats {
    fn add_assign(&mut self, rhs: Self) {
        self.instrumented_reads += rhs.instrumented_reads;
        self.instrumented_writes += rhs.instrumented_writes;
        self.instrumented_vtable_writes += rhs.instrumented_vtable_writes;
        self.instrumented_vtable_reads += rhs.instrumented_vtable_reads;
        self.omitted_reads_before_write += rhs.omitted_reads_before_write;
        self.omitted_reads_from_constant_globals += rhs.omitted_reads_from_constant_globals;
        self.omitted_reads_from_vtable += rhs.omitted_reads_from_vtable;
        self.omitted_non_captured += rhs.omitted_non_captured;
        self.omitted_excluded += rhs.omitted_excluded;
        self.accesses_with_bad_size += rhs.accesses_with_bad_size;
        self.instrumented_atomics += rhs.instrumented_atomics;
        self.unsupported_rmw += rhs.unsupported_rmw;
        self.lowered_mem_intrinsics += rhs.lowered_mem_intrinsics;
        self.sync_probes += rhs.sync_probes;
        self.functions_with_entry_exit += rhs.functions_with_entry_exit;
        self.exit_probes += rhs.exit_probes;
        self.ignore_brackets += rhs.ignore_brackets;
    }
}

impl fmt::Display for InstrumentStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Instrumentation Statistics:")?;
        writeln!(f, "  Reads instrumented:        {}", self.instrumented_reads)?;
        writeln!(f, "  Writes instrumented:       {}", self.instrumented_writes)?;
        writeln!(
            f,
            "  Vtable reads/writes:       {}/{}",
            self.instrumented_vtable_reads, self.instrumented_vtable_writes
        )?;
        writeln!(f, "  Accesses omitted:          {}", self.omitted())?;
        writeln!(f, "  Accesses with bad size:    {}", self.accesses_with_bad_size)?;
        writeln!(f, "  Atomics instrumented:      {}", self.instrumented_atomics)?;
        writeln!(f, "  Unsupported RMW:           {}", self.unsupported_rmw)?;
        writeln!(f, "  Mem intrinsics lowered:    {}", self.lowered_mem_intrinsics)?;
        writeln!(f, "  Sync probes:               {}", self.sync_probes)?;
        write!(
            f,
            "  Entry/exit functions:      {} ({} exit probes)",
            self.functions_with_entry_exit, self.exit_probes
        )
    }
}
