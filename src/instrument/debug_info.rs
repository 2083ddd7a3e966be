//! Source-level context passed to the runtime with every access probe.
//!
//! The instrumenter only needs four opaque lookups; [`DebugInfo`] abstracts
//! them so front ends with richer metadata can plug in their own.

use crate::ir::{Function, InstId, Module, Operand};

use super::classify::strip_offsets_and_casts;

/// File name used when an instruction carries no location.
pub const UNKNOWN_FILE: &str = "Unknown";
/// Object name used when an address has no named underlying object.
pub const UNKNOWN_OBJECT: &str = "unknown";

/// Debug-metadata lookups used to build probe arguments.
pub trait DebugInfo {
    /// Source line of `inst`, 0 when unknown.
    fn line(&self, func: &Function, inst: InstId) -> u32;

    /// Absolute source file of `inst`.
    fn file_name(&self, module: &Module, func: &Function, inst: InstId) -> String;

    /// Human-readable name of the object `addr` points into.
    fn object_name(&self, module: &Module, func: &Function, addr: Operand) -> String;

    /// Name the runtime reports for `func`.
    fn function_name(&self, module: &Module, func: &Function) -> String;
}

/// Reads locations and names straight from the IR.
#[derive(Debug, Clone, Copy, Default)]
pub struct IrDebugInfo;

impl DebugInfo for IrDebugInfo {
    fn line(&self, func: &Function, inst: InstId) -> u32 {
        func.get_inst(inst).and_then(|i| i.loc).map_or(0, |loc| loc.line)
    }

    fn file_name(&self, module: &Module, func: &Function, inst: InstId) -> String {
        let Some(loc) = func.get_inst(inst).and_then(|i| i.loc) else {
            return UNKNOWN_FILE.to_string();
        };
        let file = module.resolve(loc.file);
        let dir = loc.directory.map_or("", |d| module.resolve(d));
        absolute_file_name(dir, file)
    }

    fn object_name(&self, module: &Module, func: &Function, addr: Operand) -> String {
        let name = match strip_offsets_and_casts(func, addr) {
            Operand::Global(g) => module.globals.get(g.index()).map(|g| g.name),
            Operand::Inst(id) => func.get_inst(id).and_then(|i| i.name),
            Operand::Param(_) | Operand::Const(_) => None,
        };
        name.map_or_else(
            || UNKNOWN_OBJECT.to_string(),
            |sym| module.resolve(sym).to_string(),
        )
    }

    fn function_name(&self, module: &Module, func: &Function) -> String {
        display_function_name(module.resolve(func.name))
    }
}

/// Demangled symbol name up to the first `(`, dropping any parameter list.
///
/// Names that are not Itanium-mangled are used as they are.
pub fn display_function_name(raw: &str) -> String {
    let demangled = cpp_demangle::Symbol::new(raw.as_bytes())
        .map(|sym| sym.to_string())
        .unwrap_or_else(|_| raw.to_string());
    match demangled.find('(') {
        Some(idx) => demangled[..idx].to_string(),
        None => demangled,
    }
}

/// Join a compilation directory and a file name the way the runtime expects.
///
/// Absolute files and files that already contain the directory are kept;
/// a leading `./` is resolved against the directory.
pub fn absolute_file_name(dir: &str, file: &str) -> String {
    if dir.is_empty() || file.is_empty() || file.starts_with('/') {
        return file.to_string();
    }
    if let Some(rest) = file.strip_prefix("./") {
        return if dir.ends_with('/') {
            format!("{}{}", dir, rest)
        } else {
            format!("{}/{}", dir, rest)
        };
    }
    if file.contains(dir) {
        return file.to_string();
    }
    if dir.ends_with('/') {
        format!("{}{}", dir, file)
    } else {
        format!("{}/{}", dir, file)
    }
}
