//! Instrumentation options.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Options controlling what the instrumenter rewrites.
///
/// Loadable from JSON; missing fields take their default.
///
/// ```
/// use embsan::InstrumentOptions;
///
/// let opts = InstrumentOptions::from_json(r#"{ "handle_cxx_exceptions": false }"#).unwrap();
/// assert!(!opts.handle_cxx_exceptions);
/// assert_eq!(opts.probe_prefix, "__tsan_");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentOptions {
    /// Instrument plain loads and stores
    pub instrument_memory_accesses: bool,
    /// Emit function entry/exit probes
    pub instrument_func_entry_exit: bool,
    /// Route may-throw calls through a cleanup landing pad so exit probes run
    /// on unwind paths
    pub handle_cxx_exceptions: bool,
    /// Lower atomic operations to ordering-parameterized probes
    pub instrument_atomics: bool,
    /// Replace memset/memcpy/memmove intrinsics with library calls
    pub instrument_mem_intrinsics: bool,
    /// Emit probes around thread creation/join and mutex lock/unlock
    pub instrument_sync: bool,
    /// Prefix of every runtime probe symbol
    pub probe_prefix: String,
    /// Name of the program entry point, which also gets `main_func_exit`
    pub entry_point: String,
    /// Globals whose name starts with one of these are never instrumented
    pub reserved_name_prefixes: Vec<String>,
    /// Globals placed in a section ending with one of these are never instrumented
    pub reserved_sections: Vec<String>,
    /// End the current redundancy segment at every atomic operation
    pub atomics_split_segments: bool,
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        Self {
            instrument_memory_accesses: true,
            instrument_func_entry_exit: true,
            handle_cxx_exceptions: true,
            instrument_atomics: true,
            instrument_mem_intrinsics: true,
            instrument_sync: true,
            probe_prefix: "__tsan_".to_string(),
            entry_point: "main".to_string(),
            reserved_name_prefixes: vec!["__llvm_gcov".to_string(), "__llvm_gcda".to_string()],
            reserved_sections: vec!["__llvm_prf_cnts".to_string()],
            atomics_split_segments: false,
        }
    }
}

impl InstrumentOptions {
    /// Parse options from JSON and validate them.
    pub fn from_json(json: &str) -> Result<Self> {
        let opts: Self = serde_json::from_str(json)?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.probe_prefix.is_empty() {
            return Err(Error::config("probe_prefix must not be empty"));
        }
        if self.entry_point.is_empty() {
            return Err(Error::config("entry_point must not be empty"));
        }
        Ok(())
    }

    /// Full symbol name of a probe.
    pub fn probe_symbol(&self, name: &str) -> String {
        format!("{}{}", self.probe_prefix, name)
    }
}
