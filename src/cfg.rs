// This module turns a linear instruction stream into a control flow graph and owns the
// graph representation used by every later stage. Blocks live in a Vec keyed by block id,
// and edges are stored as id lists on each block, so the mutual references between blocks
// never form ownership cycles. Construction follows the classical leader algorithm: the
// first instruction leads, every branch makes both its target and its successor lead, and
// maximal runs of non-leaders form the blocks. Edge linking walks the blocks back to
// front; at a join this orders the fall-through predecessor ahead of the branch
// predecessor, which fixes the argument order of phi instructions placed there later.

use crate::error::{Error, Result};
use crate::ir::{is_branch, Instruction, Opcode, Operand};
use log::debug;
use std::fmt;

/// Basic block identifier; ids are minted from 1 in leader order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether the graph has been through SSA construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfgForm {
    Normal,
    Ssa,
}

/// A straight-line run of instructions; only the last one may transfer
/// control.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    id: BlockId,
    base: usize,
    insts: Vec<Instruction>,
    prev: Vec<BlockId>,
    next: Vec<BlockId>,
}

impl BasicBlock {
    fn new(id: BlockId, base: usize) -> Self {
        Self {
            id,
            base,
            insts: Vec::new(),
            prev: Vec::new(),
            next: Vec::new(),
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Index of this block's first instruction in the originating stream.
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.insts
    }

    pub fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.insts
    }

    pub fn push_instruction(&mut self, inst: Instruction) {
        self.insts.push(inst);
    }

    /// Predecessor blocks, in edge insertion order.
    pub fn predecessors(&self) -> &[BlockId] {
        &self.prev
    }

    /// Successor blocks; for a conditional branch the target comes before
    /// the fall-through block.
    pub fn successors(&self) -> &[BlockId] {
        &self.next
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.insts.last()
    }
}

/// Control flow graph: a root block plus an id-keyed arena of blocks.
#[derive(Debug, Clone)]
pub struct Cfg {
    form: CfgForm,
    root: BlockId,
    blocks: Vec<BasicBlock>,
}

impl Cfg {
    pub fn form(&self) -> CfgForm {
        self.form
    }

    pub(crate) fn set_form(&mut self, form: CfgForm) {
        self.form = form;
    }

    pub fn root(&self) -> BlockId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Looks a block up by id.
    pub fn find_block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0.checked_sub(1)? as usize)
    }

    /// Panics if the id is stale; use [`Cfg::find_block`] for fallible
    /// lookups.
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        self.find_block(id)
            .unwrap_or_else(|| panic!("no block {id} in this graph"))
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        self.blocks
            .get_mut((id.0 - 1) as usize)
            .unwrap_or_else(|| panic!("no block {id} in this graph"))
    }

    /// Blocks in ascending id order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.iter().map(|b| b.id)
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.block_mut(from).next.push(to);
        self.block_mut(to).prev.push(from);
    }
}

/// Signed branch delta, or an error naming the offending instruction.
fn branch_delta(inst: &Instruction, index: usize) -> Result<i32> {
    match inst.oprs[0] {
        Some(Operand::Offset(delta)) => Ok(delta),
        Some(Operand::Label(label)) => Err(Error::UnresolvedLabel { index, label }),
        _ => Err(Error::BadBranchOperand { index }),
    }
}

/// Builds a `Normal`-form control flow graph from a linear stream.
///
/// Fails if the stream is empty, if a branch operand is not an offset
/// (unresolved labels included), or if a branch targets an instruction
/// outside the stream.
pub fn build_cfg(insts: &[Instruction]) -> Result<Cfg> {
    if insts.is_empty() {
        return Err(Error::EmptyStream);
    }

    // Leader selection. Branches make both their successor and their target
    // lead; ret makes only its successor lead.
    let mut leaders = vec![false; insts.len()];
    leaders[0] = true;
    for (i, inst) in insts.iter().enumerate() {
        if is_branch(inst.op) {
            if i + 1 < insts.len() {
                leaders[i + 1] = true;
            }
            let delta = branch_delta(inst, i)?;
            let target = i as isize + 1 + delta as isize;
            if target < 0 || target as usize >= insts.len() {
                return Err(Error::BranchTargetOutOfRange { index: i, target });
            }
            leaders[target as usize] = true;
        } else if inst.op == Opcode::Ret && i + 1 < insts.len() {
            leaders[i + 1] = true;
        }
    }

    // Block formation: each leader starts a block that runs to the next
    // leader.
    let mut blocks = Vec::new();
    let mut start_of = vec![None; insts.len()];
    let mut i = 0;
    while i < insts.len() {
        let base = i;
        let id = BlockId(blocks.len() as u32 + 1);
        let mut blk = BasicBlock::new(id, base);
        blk.push_instruction(insts[i].clone());
        i += 1;
        while i < insts.len() && !leaders[i] {
            blk.push_instruction(insts[i].clone());
            i += 1;
        }
        start_of[base] = Some(id);
        blocks.push(blk);
    }

    let mut cfg = Cfg {
        form: CfgForm::Normal,
        root: BlockId(1),
        blocks,
    };

    // Edge linking, back to front. For each block: the branch-target edge,
    // then the fall-through edge unless the terminator is jmp or ret.
    for idx in (0..cfg.blocks.len()).rev() {
        let blk = &cfg.blocks[idx];
        let id = blk.id;
        let end = blk.base + blk.insts.len();
        let last = blk.insts.last().expect("blocks are never empty");
        let last_op = last.op;

        let mut branch_target = None;
        if is_branch(last_op) {
            let delta = branch_delta(last, end - 1)?;
            let target = (end as isize - 1 + 1 + delta as isize) as usize;
            branch_target = start_of[target];
            if let Some(target_id) = branch_target {
                cfg.add_edge(id, target_id);
            }
        }

        if last_op != Opcode::Jmp && last_op != Opcode::Ret {
            if let Some(next_id) = insts.get(end).and_then(|_| start_of[end]) {
                // A conditional branch onto the next instruction would
                // duplicate the edge; keep one.
                if branch_target != Some(next_id) {
                    cfg.add_edge(id, next_id);
                }
            }
        }
    }

    debug!(
        "built cfg: {} instructions, {} blocks",
        insts.len(),
        cfg.len()
    );
    Ok(cfg)
}
