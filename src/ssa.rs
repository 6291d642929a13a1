// SSA construction, in place. Globals discovery finds the variables that are live across
// block boundaries; phi functions for those variables go in at the dominance frontiers of
// their definition blocks via the usual worklist; renaming then walks the dominator tree
// keeping a counter and a name stack per variable base. A global that is defined somewhere
// but not in the entry block gets a synthetic first name before renaming, so a use on a
// path that bypasses every definition still resolves. A variable with no definition at all
// gets no such name, and renaming reports it as a use before any definition.
//
// Renaming visits a block's dominator-tree children highest id first. Together with the
// back-to-front edge linking in the CFG builder this pins down the subscript numbering and
// the phi argument order completely.

use crate::analysis::dominance::{dominance, DomInfo};
use crate::cfg::{BlockId, Cfg, CfgForm};
use crate::error::{Error, Result};
use crate::ir::{is_assign, Instruction, Opcode, Operand, VarId};
use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Transforms a `Normal`-form graph into SSA form.
///
/// Fails if the graph is already in SSA form, if dominance cannot be
/// computed, or if renaming finds a use of a variable that is never
/// defined.
pub fn to_ssa(cfg: &mut Cfg) -> Result<()> {
    if cfg.form() != CfgForm::Normal {
        return Err(Error::WrongCfgForm {
            expected: CfgForm::Normal,
            found: cfg.form(),
        });
    }
    let dom = dominance(cfg)?;
    let mut builder = SsaBuilder::new(dom);
    builder.transform(cfg)?;
    cfg.set_form(CfgForm::Ssa);
    Ok(())
}

struct SsaBuilder {
    dom: DomInfo,
    globals: BTreeSet<u32>,
    def_blocks: BTreeMap<u32, BTreeSet<BlockId>>,
    counters: HashMap<u32, u32>,
    stacks: HashMap<u32, Vec<u32>>,
    children: BTreeMap<BlockId, Vec<BlockId>>,
}

impl SsaBuilder {
    fn new(dom: DomInfo) -> Self {
        Self {
            dom,
            globals: BTreeSet::new(),
            def_blocks: BTreeMap::new(),
            counters: HashMap::new(),
            stacks: HashMap::new(),
            children: BTreeMap::new(),
        }
    }

    fn transform(&mut self, cfg: &mut Cfg) -> Result<()> {
        self.find_globals(cfg);
        debug!(
            "ssa: {} globals across {} blocks",
            self.globals.len(),
            cfg.len()
        );
        self.insert_phi_functions(cfg);
        self.seed_initial_names(cfg);
        self.build_children(cfg);
        let root = cfg.root();
        self.rename_block(cfg, root)
    }

    /// A variable is global if some block uses it before defining it.
    fn find_globals(&mut self, cfg: &Cfg) {
        for block in cfg.blocks() {
            let mut killed: BTreeSet<u32> = BTreeSet::new();
            for inst in block.instructions() {
                for used in inst.used_vars() {
                    if !killed.contains(&used.base()) {
                        self.globals.insert(used.base());
                    }
                }
                if let Some(def) = inst.def_var() {
                    killed.insert(def.base());
                    self.def_blocks
                        .entry(def.base())
                        .or_default()
                        .insert(block.id());
                }
            }
        }
    }

    /// Places `v = phi(v, ..., v)` at the top of every dominance-frontier
    /// block reachable from v's definition blocks, one argument per
    /// predecessor.
    fn insert_phi_functions(&mut self, cfg: &mut Cfg) {
        let mut placed: BTreeMap<BlockId, BTreeSet<u32>> = BTreeMap::new();
        for &base in &self.globals {
            let Some(def_blocks) = self.def_blocks.get(&base) else {
                continue;
            };
            let mut worklist: Vec<BlockId> = def_blocks.iter().copied().collect();
            let mut enqueued: BTreeSet<BlockId> = def_blocks.clone();
            while let Some(work) = worklist.pop() {
                for &frontier in self.dom.frontier(work) {
                    if !placed.entry(frontier).or_default().insert(base) {
                        continue;
                    }
                    let block = cfg.block_mut(frontier);
                    let arity = block.predecessors().len();
                    let mut phi = Instruction::new(Opcode::Phi);
                    phi.oprs[0] = Some(Operand::Var(VarId::new(base)));
                    phi.extra = vec![Operand::Var(VarId::new(base)); arity];
                    block.instructions_mut().insert(0, phi);
                    if enqueued.insert(frontier) {
                        worklist.push(frontier);
                    }
                }
            }
        }
    }

    /// Globals defined somewhere, but not in the entry block, get a first
    /// name up front; uses on paths that bypass the entry stay resolvable.
    fn seed_initial_names(&mut self, cfg: &Cfg) {
        let root = cfg.root();
        let seeded: Vec<u32> = self
            .globals
            .iter()
            .copied()
            .filter(|base| {
                self.def_blocks
                    .get(base)
                    .is_some_and(|defs| !defs.is_empty() && !defs.contains(&root))
            })
            .collect();
        for base in seeded {
            self.new_name(base);
        }
    }

    fn build_children(&mut self, cfg: &Cfg) {
        for id in cfg.block_ids() {
            if let Some(idom) = self.dom.idom(id) {
                self.children.entry(idom).or_default().push(id);
            }
        }
    }

    fn new_name(&mut self, base: u32) -> VarId {
        let counter = self.counters.entry(base).or_insert(0);
        *counter += 1;
        let subscript = *counter;
        self.stacks.entry(base).or_default().push(subscript);
        VarId::ssa(base, subscript)
    }

    fn top_name(&self, base: u32) -> Result<VarId> {
        self.stacks
            .get(&base)
            .and_then(|stack| stack.last())
            .map(|&subscript| VarId::ssa(base, subscript))
            .ok_or(Error::UseBeforeDef { base })
    }

    fn rename_block(&mut self, cfg: &mut Cfg, id: BlockId) -> Result<()> {
        let mut pushed: Vec<u32> = Vec::new();

        // Rewrite this block: uses from the name stacks, definitions to
        // fresh names. Phi arguments are filled in from the predecessors.
        {
            let block = cfg.block_mut(id);
            for inst in block.instructions_mut() {
                if inst.op == Opcode::Phi {
                    let lhs = inst.oprs[0]
                        .and_then(|o| o.as_var())
                        .expect("phi defines a variable");
                    let name = self.new_name(lhs.base());
                    inst.oprs[0] = Some(Operand::Var(name));
                    pushed.push(lhs.base());
                    continue;
                }
                for slot in inst.use_slots() {
                    if let Some(Operand::Var(used)) = inst.oprs[slot] {
                        inst.oprs[slot] = Some(Operand::Var(self.top_name(used.base())?));
                    }
                }
                if inst.extra_is_uses() {
                    for opr in inst.extra.iter_mut() {
                        if let Operand::Var(used) = *opr {
                            *opr = Operand::Var(self.top_name(used.base())?);
                        }
                    }
                }
                if is_assign(inst.op) {
                    let lhs = inst.oprs[0]
                        .and_then(|o| o.as_var())
                        .expect("assignment defines a variable");
                    let name = self.new_name(lhs.base());
                    inst.oprs[0] = Some(Operand::Var(name));
                    pushed.push(lhs.base());
                }
            }
        }

        // Fill the matching phi slot in every successor.
        let succs: Vec<BlockId> = cfg.block(id).successors().to_vec();
        for succ in succs {
            let preds = cfg.block(succ).predecessors();
            let arity = preds.len();
            let slot = preds
                .iter()
                .position(|&p| p == id)
                .expect("edge lists are symmetric");
            let block = cfg.block_mut(succ);
            for inst in block.instructions_mut() {
                if inst.op != Opcode::Phi {
                    break;
                }
                if inst.extra.len() != arity {
                    return Err(Error::PhiArityMismatch {
                        block: succ,
                        args: inst.extra.len(),
                        preds: arity,
                    });
                }
                if let Operand::Var(used) = inst.extra[slot] {
                    inst.extra[slot] = Operand::Var(self.top_name(used.base())?);
                }
            }
        }

        // Recurse into dominated blocks, highest id first, then unwind the
        // names this block pushed.
        let children = self.children.get(&id).cloned().unwrap_or_default();
        for &child in children.iter().rev() {
            self.rename_block(cfg, child)?;
        }
        for base in pushed {
            self.stacks
                .get_mut(&base)
                .expect("pushed names have stacks")
                .pop();
        }
        Ok(())
    }
}
