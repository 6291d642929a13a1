//! Live-variable analysis.
//!
//! Backward data-flow over the graph: a variable is live out of a block if
//! some successor exposes it upward (uses it before redefining it) or
//! carries it onward without killing it. The register allocator seeds its
//! interference scan with these sets.

use crate::analysis::{solve, Fragments, IterativeAnalysis};
use crate::cfg::{BasicBlock, BlockId, Cfg};
use crate::ir::VarId;
use std::collections::{BTreeMap, BTreeSet};

/// Per-block live-out sets.
#[derive(Debug)]
pub struct Liveness {
    live_out: BTreeMap<BlockId, BTreeSet<VarId>>,
}

impl Liveness {
    /// Variables live on exit from the given block.
    pub fn live_out(&self, id: BlockId) -> &BTreeSet<VarId> {
        self.live_out
            .get(&id)
            .unwrap_or_else(|| panic!("no liveness entry for block {id}"))
    }
}

struct LiveAnalyzer {
    ue_var: BTreeMap<BlockId, BTreeSet<VarId>>,
    var_kill: BTreeMap<BlockId, BTreeSet<VarId>>,
}

impl LiveAnalyzer {
    fn new(cfg: &Cfg) -> Self {
        let mut ue_var = BTreeMap::new();
        let mut var_kill = BTreeMap::new();
        for block in cfg.blocks() {
            let mut exposed = BTreeSet::new();
            let mut killed = BTreeSet::new();
            for inst in block.instructions() {
                for used in inst.used_vars() {
                    if !killed.contains(&used) {
                        exposed.insert(used);
                    }
                }
                if let Some(def) = inst.def_var() {
                    killed.insert(def);
                }
            }
            ue_var.insert(block.id(), exposed);
            var_kill.insert(block.id(), killed);
        }
        Self { ue_var, var_kill }
    }
}

impl IterativeAnalysis for LiveAnalyzer {
    type Fragment = BTreeSet<VarId>;

    fn init_fragment(&mut self, _cfg: &Cfg, _block: &BasicBlock) -> Self::Fragment {
        BTreeSet::new()
    }

    fn compute_fragment(
        &mut self,
        _cfg: &Cfg,
        block: &BasicBlock,
        fragments: &Fragments<Self::Fragment>,
    ) -> Self::Fragment {
        let mut live = BTreeSet::new();
        for &succ in block.successors() {
            live.extend(self.ue_var[&succ].iter().copied());
            let kill = &self.var_kill[&succ];
            live.extend(
                fragments
                    .get(succ)
                    .iter()
                    .filter(|var| !kill.contains(var))
                    .copied(),
            );
        }
        live
    }
}

/// Computes live-out sets for every block of the graph.
pub fn liveness(cfg: &Cfg) -> Liveness {
    let mut analyzer = LiveAnalyzer::new(cfg);
    let fragments = solve(&mut analyzer, cfg);
    Liveness {
        live_out: fragments.into_map(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::Assembler;
    use crate::cfg::build_cfg;
    use crate::ir::{NameId, Operand};

    fn var(base: u32) -> Operand {
        Operand::Var(VarId::new(base))
    }

    #[test]
    fn value_used_across_a_branch_is_live_out_of_the_definer() {
        // t1=1; jle skip; t2=t1+1; skip: ret t1
        let mut asm = Assembler::new();
        asm.emit_assign(var(1), Operand::Const(1));
        let skip = asm.make_label();
        asm.emit_jle(Operand::Label(skip));
        asm.emit_assign_add(var(2), var(1), Operand::Const(1));
        asm.mark_label(skip);
        asm.emit_ret(var(1));
        asm.fix_labels();
        let cfg = build_cfg(asm.instructions()).unwrap();

        let live = liveness(&cfg);
        assert!(live.live_out(BlockId(1)).contains(&VarId::new(1)));
        assert!(live.live_out(BlockId(2)).contains(&VarId::new(1)));
        assert!(!live.live_out(BlockId(2)).contains(&VarId::new(2)));
        assert!(live.live_out(BlockId(3)).is_empty());
    }

    #[test]
    fn call_arguments_are_upward_exposed_uses() {
        // t1=3; jle skip; call n2(t1); skip: t2=call n7(t1,5); ret t2
        let mut asm = Assembler::new();
        asm.emit_assign(var(1), Operand::Const(3));
        let skip = asm.make_label();
        asm.emit_jle(Operand::Label(skip));
        asm.emit_call(NameId(2)).push_extra(var(1));
        asm.mark_label(skip);
        asm.emit_assign_call(VarId::new(2), NameId(7))
            .push_extra(var(1))
            .push_extra(Operand::Const(5));
        asm.emit_ret(var(2));
        asm.fix_labels();
        let cfg = build_cfg(asm.instructions()).unwrap();

        let live = liveness(&cfg);
        // Both call forms read t1 through their argument lists.
        assert!(live.live_out(BlockId(1)).contains(&VarId::new(1)));
        assert!(live.live_out(BlockId(2)).contains(&VarId::new(1)));
        assert!(!live.live_out(BlockId(2)).contains(&VarId::new(2)));
        assert!(live.live_out(BlockId(3)).is_empty());
    }

    #[test]
    fn loop_carried_value_stays_live_around_the_back_edge() {
        let mut asm = Assembler::new();
        asm.emit_assign(var(1), Operand::Const(0));
        let top = asm.make_and_mark_label();
        asm.emit_assign_add(var(1), var(1), Operand::Const(1));
        asm.emit_cmp(var(1), Operand::Const(10));
        asm.emit_jl(Operand::Label(top));
        asm.emit_ret(var(1));
        asm.fix_labels();
        let cfg = build_cfg(asm.instructions()).unwrap();

        let live = liveness(&cfg);
        assert!(live.live_out(BlockId(1)).contains(&VarId::new(1)));
        assert!(live.live_out(BlockId(2)).contains(&VarId::new(1)));
    }
}
