//! IR verifier: structural integrity checks.
//!
//! Collects all errors rather than stopping at the first one. Run after
//! instrumentation to make sure block splitting and in-place replacement
//! left the function well formed.

use std::collections::HashSet;
use std::fmt;

use super::function::Function;
use super::instruction::{Callee, Constant, Op, Operand};
use super::module::Module;
use super::types::Type;
use super::value::{BlockId, InstId};

/// Location context for a verification error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Function(String),
    Block(String, usize),
    Instruction(String, usize, usize),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Function(name) => write!(f, "func @{name}"),
            Location::Block(name, bi) => write!(f, "func @{name}, bb{bi}"),
            Location::Instruction(name, bi, id) => write!(f, "func @{name}, bb{bi}, v{id}"),
        }
    }
}

/// A single verification error.
#[derive(Debug, Clone)]
pub struct VerifyError {
    pub location: Location,
    pub message: String,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.location, self.message)
    }
}

/// Collected verification results.
#[derive(Debug, Default)]
pub struct VerifyResult {
    pub errors: Vec<VerifyError>,
}

impl VerifyResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, location: Location, message: impl Into<String>) {
        self.errors.push(VerifyError {
            location,
            message: message.into(),
        });
    }
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "verification passed");
        }
        writeln!(f, "verification failed with {} error(s):", self.errors.len())?;
        for e in &self.errors {
            writeln!(f, "  {e}")?;
        }
        Ok(())
    }
}

impl Module {
    /// Verify every function of the module.
    pub fn verify(&self) -> VerifyResult {
        let mut result = VerifyResult::default();
        for func in &self.functions {
            FuncVerifier::new(self, func, &mut result).run();
        }
        result
    }
}

struct FuncVerifier<'a> {
    module: &'a Module,
    func: &'a Function,
    func_name: String,
    attached: HashSet<InstId>,
    result: &'a mut VerifyResult,
}

impl<'a> FuncVerifier<'a> {
    fn new(module: &'a Module, func: &'a Function, result: &'a mut VerifyResult) -> Self {
        Self {
            module,
            func,
            func_name: module.resolve(func.name).to_string(),
            attached: HashSet::new(),
            result,
        }
    }

    fn run(&mut self) {
        if self.func.num_blocks() == 0 {
            self.result.error(
                Location::Function(self.func_name.clone()),
                "function has no blocks",
            );
            return;
        }

        let func = self.func;
        for (_, id) in func.insts_in_order() {
            if !self.attached.insert(id) {
                self.result.error(
                    Location::Function(self.func_name.clone()),
                    format!("v{} is placed in more than one position", id.index()),
                );
            }
        }

        for block in self.func.block_ids() {
            self.check_block(block);
        }
    }

    fn check_block(&mut self, block: BlockId) {
        let func = self.func;
        let insts = &func.block(block).insts;
        if insts.is_empty() {
            self.result.error(
                Location::Block(self.func_name.clone(), block.index()),
                "empty block",
            );
            return;
        }
        let last = insts.len() - 1;
        for (pos, &id) in insts.iter().enumerate() {
            let loc = Location::Instruction(self.func_name.clone(), block.index(), id.index());
            let is_term = func.inst(id).is_terminator();
            if pos == last && !is_term {
                self.result.error(loc.clone(), "block does not end with a terminator");
            } else if pos != last && is_term {
                self.result.error(loc.clone(), "terminator in the middle of a block");
            }
            self.check_inst(id, &loc);
        }
    }

    fn check_inst(&mut self, id: InstId, loc: &Location) {
        let func = self.func;
        let inst = func.inst(id);
        for operand in inst.op.operands() {
            self.check_operand(operand, loc);
        }
        for succ in inst.op.successors() {
            if succ.index() >= func.num_blocks() {
                self.result.error(loc.clone(), format!("branch to missing bb{}", succ.index()));
            }
        }
        match &inst.op {
            Op::Call { callee, args, .. } | Op::Invoke { callee, args, .. } => {
                self.check_callee(callee, args.len(), loc);
            }
            Op::Resume(token) => {
                if let Some(ty) = self.module.operand_type(func, *token) {
                    if ty != Type::Token {
                        self.result.error(loc.clone(), format!("resume of non-token {ty}"));
                    }
                }
            }
            _ => {}
        }
    }

    fn check_operand(&mut self, operand: Operand, loc: &Location) {
        match operand {
            Operand::Inst(def) => {
                if !self.attached.contains(&def) {
                    self.result.error(
                        loc.clone(),
                        format!("use of detached or dangling v{}", def.index()),
                    );
                } else if self.func.inst(def).ty.is_void() {
                    self.result.error(loc.clone(), format!("use of void value v{}", def.index()));
                }
            }
            Operand::Param(idx) => {
                if idx as usize >= self.func.params.len() {
                    self.result.error(loc.clone(), format!("parameter p{idx} out of range"));
                }
            }
            Operand::Global(g) => {
                if g.index() >= self.module.globals.len() {
                    self.result.error(loc.clone(), format!("unknown global #{}", g.index()));
                }
            }
            Operand::Const(Constant::Str(sym)) => {
                if sym.index() >= self.module.symbols.len() {
                    self.result.error(loc.clone(), format!("unknown string #{}", sym.index()));
                }
            }
            Operand::Const(_) => {}
        }
    }

    fn check_callee(&mut self, callee: &Callee, nargs: usize, loc: &Location) {
        let Callee::Direct(sym) = callee else {
            return;
        };
        let expected = if let Some(decl) = self.module.declaration(*sym) {
            decl.sig.params.len()
        } else if let Some(func) = self.module.functions.iter().find(|f| f.name == *sym) {
            func.params.len()
        } else {
            self.result.error(
                loc.clone(),
                format!("call to unknown function @{}", self.module.resolve(*sym)),
            );
            return;
        };
        if expected != nargs {
            self.result.error(
                loc.clone(),
                format!(
                    "call to @{} with {} argument(s), expected {}",
                    self.module.resolve(*sym),
                    nargs,
                    expected
                ),
            );
        }
    }
}
