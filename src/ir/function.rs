//! Function container with arena-based instruction storage.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::instruction::{Instruction, Operand};
use super::types::Type;
use super::value::{BlockId, InstId, SymbolId};

/// Instrumentation-relevant function attributes.
///
/// Fixed when the function is created; the instrumenter only reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionAttrs {
    /// Memory accesses of this function are race-checked.
    pub race_checked: bool,
    /// Race reports are suppressed while this function runs.
    pub suppressed: bool,
}

impl FunctionAttrs {
    pub fn race_checked() -> Self {
        Self {
            race_checked: true,
            suppressed: false,
        }
    }

    pub fn suppressed() -> Self {
        Self {
            race_checked: false,
            suppressed: true,
        }
    }
}

/// A basic block: ordered instruction ids, terminator last.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub insts: Vec<InstId>,
}

/// A function definition.
///
/// Instructions live in an arena that only grows; removing an instruction
/// detaches it from its block but keeps its id valid. Block layout order is
/// block id order, with the entry block first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub name: SymbolId,
    pub params: Vec<Type>,
    pub ret_ty: Type,
    attrs: FunctionAttrs,
    insts: Vec<Instruction>,
    blocks: Vec<Block>,
    /// Block of each arena slot. A hint only: a stale or missing entry falls
    /// back to a scan.
    #[serde(skip)]
    home: Vec<Option<BlockId>>,
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.params == other.params
            && self.ret_ty == other.ret_ty
            && self.attrs == other.attrs
            && self.insts == other.insts
            && self.blocks == other.blocks
    }
}

impl Function {
    pub fn new(name: SymbolId, params: Vec<Type>, ret_ty: Type, attrs: FunctionAttrs) -> Self {
        Self {
            name,
            params,
            ret_ty,
            attrs,
            insts: Vec::new(),
            blocks: Vec::new(),
            home: Vec::new(),
        }
    }

    pub fn attrs(&self) -> FunctionAttrs {
        self.attrs
    }

    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.index()]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.insts[id.index()]
    }

    /// Checked arena access.
    pub fn get_inst(&self, id: InstId) -> Option<&Instruction> {
        self.insts.get(id.index())
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Number of arena slots, including detached instructions.
    pub fn arena_len(&self) -> usize {
        self.insts.len()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        if self.blocks.is_empty() {
            None
        } else {
            Some(BlockId(0))
        }
    }

    /// Attached instructions in layout order.
    pub fn insts_in_order(&self) -> impl Iterator<Item = (BlockId, InstId)> + '_ {
        self.block_ids()
            .flat_map(move |b| self.blocks[b.index()].insts.iter().map(move |&i| (b, i)))
    }

    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        id
    }

    /// Add an instruction to the arena without placing it in a block.
    pub fn create_inst(&mut self, inst: Instruction) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(inst);
        id
    }

    pub fn append(&mut self, block: BlockId, inst: Instruction) -> InstId {
        let id = self.create_inst(inst);
        self.blocks[block.index()].insts.push(id);
        self.set_home(id, Some(block));
        id
    }

    pub fn insert_at(&mut self, block: BlockId, pos: usize, inst: Instruction) -> InstId {
        let id = self.create_inst(inst);
        self.blocks[block.index()].insts.insert(pos, id);
        self.set_home(id, Some(block));
        id
    }

    fn set_home(&mut self, id: InstId, block: Option<BlockId>) {
        if self.home.len() <= id.index() {
            self.home.resize(id.index() + 1, None);
        }
        self.home[id.index()] = block;
    }

    /// Block and index of an attached instruction.
    ///
    /// Only the cached block is searched when it still holds `id`.
    pub fn position(&self, id: InstId) -> Option<(BlockId, usize)> {
        let find_in = |b: BlockId| {
            self.blocks
                .get(b.index())?
                .insts
                .iter()
                .position(|&i| i == id)
                .map(|pos| (b, pos))
        };
        if let Some(&Some(block)) = self.home.get(id.index()) {
            if let Some(found) = find_in(block) {
                return Some(found);
            }
        }
        self.block_ids().find_map(find_in)
    }

    pub fn insert_before(&mut self, anchor: InstId, inst: Instruction) -> Option<InstId> {
        let (block, pos) = self.position(anchor)?;
        Some(self.insert_at(block, pos, inst))
    }

    pub fn insert_after(&mut self, anchor: InstId, inst: Instruction) -> Option<InstId> {
        let (block, pos) = self.position(anchor)?;
        Some(self.insert_at(block, pos + 1, inst))
    }

    /// Detach an instruction from its block. Returns false if it was not attached.
    pub fn remove(&mut self, id: InstId) -> bool {
        match self.position(id) {
            Some((block, pos)) => {
                self.blocks[block.index()].insts.remove(pos);
                self.set_home(id, None);
                true
            }
            None => false,
        }
    }

    /// Point every use of `old` at `new`.
    pub fn replace_all_uses(&mut self, old: InstId, new: Operand) {
        let target = Operand::Inst(old);
        for inst in &mut self.insts {
            inst.op.map_operands(|o| if o == target { new } else { o });
        }
    }

    /// Attached instructions reading the result of `id`.
    ///
    /// Scans the whole function; use [`Function::user_index`] for repeated
    /// queries.
    pub fn users(&self, id: InstId) -> Vec<InstId> {
        let target = Operand::Inst(id);
        self.insts_in_order()
            .filter(|&(_, user)| self.inst(user).op.operands().contains(&target))
            .map(|(_, user)| user)
            .collect()
    }

    /// Users of every instruction result, in layout order, built in one pass.
    pub fn user_index(&self) -> HashMap<InstId, Vec<InstId>> {
        let mut index: HashMap<InstId, Vec<InstId>> = HashMap::new();
        for (_, user) in self.insts_in_order() {
            for operand in self.inst(user).op.operands() {
                if let Operand::Inst(def) = operand {
                    let users = index.entry(def).or_default();
                    if users.last() != Some(&user) {
                        users.push(user);
                    }
                }
            }
        }
        index
    }

    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let last = *self.blocks[block.index()].insts.last()?;
        self.inst(last).is_terminator().then_some(last)
    }

    /// Move everything after `inst` into a fresh block.
    ///
    /// The original block is left without a terminator; the caller is
    /// expected to terminate it.
    pub fn split_after(&mut self, inst: InstId) -> Option<BlockId> {
        let (block, pos) = self.position(inst)?;
        let tail = self.blocks[block.index()].insts.split_off(pos + 1);
        let new_block = self.create_block();
        for &moved in &tail {
            self.set_home(moved, Some(new_block));
        }
        self.blocks[new_block.index()].insts = tail;
        Some(new_block)
    }

    /// Type of an operand, where it can be derived without the module.
    ///
    /// Globals always live behind pointers, whose address space the module
    /// knows; see [`Module::operand_type`](super::Module::operand_type).
    pub fn local_operand_type(&self, op: Operand) -> Option<Type> {
        use super::instruction::Constant;
        match op {
            Operand::Inst(id) => self.get_inst(id).map(|i| i.ty.clone()),
            Operand::Param(idx) => self.params.get(idx as usize).cloned(),
            Operand::Global(_) => None,
            Operand::Const(Constant::Int { bits, .. }) => Some(Type::Int(bits)),
            Operand::Const(Constant::Null) | Operand::Const(Constant::Str(_)) => Some(Type::ptr()),
            Operand::Const(Constant::Undef) => None,
        }
    }

    /// Whether any attached instruction is a call, invoke or bulk-memory op.
    pub fn has_calls(&self) -> bool {
        self.insts_in_order()
            .any(|(_, id)| self.inst(id).op.is_call_like())
    }
}
