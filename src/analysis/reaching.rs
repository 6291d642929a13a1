//! Reaching-definitions analysis.
//!
//! A definition site is a (block, instruction index) pair for an
//! assignment. `RD(b)` collects the sites that reach the entry of `b`:
//! for every predecessor, its downward-exposed definitions plus whatever
//! reached it and was not killed inside it.

use crate::analysis::{solve, Fragments, IterativeAnalysis};
use crate::cfg::{BasicBlock, BlockId, Cfg};
use crate::ir::VarId;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// A definition: the block it lives in and its index within that block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DefSite {
    pub block: BlockId,
    pub index: usize,
}

impl fmt::Display for DefSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block, self.index)
    }
}

/// Result of the analysis: the definitions reaching each block's entry.
#[derive(Debug)]
pub struct ReachingDefs {
    blocks: BTreeMap<BlockId, BTreeSet<DefSite>>,
}

impl ReachingDefs {
    /// Definition sites reaching the entry of the given block.
    pub fn get_block(&self, id: BlockId) -> &BTreeSet<DefSite> {
        self.blocks
            .get(&id)
            .unwrap_or_else(|| panic!("no reaching-definitions entry for block {id}"))
    }
}

struct ReachDefAnalyzer {
    de_def: BTreeMap<BlockId, BTreeSet<DefSite>>,
    de_kill: BTreeMap<BlockId, BTreeSet<DefSite>>,
}

impl ReachDefAnalyzer {
    fn new(cfg: &Cfg) -> Self {
        // Every definition in the graph, with the variable it writes.
        let mut all_defs: Vec<(DefSite, VarId)> = Vec::new();
        for block in cfg.blocks() {
            for (i, inst) in block.instructions().iter().enumerate() {
                if let Some(var) = inst.def_var() {
                    all_defs.push((
                        DefSite {
                            block: block.id(),
                            index: i,
                        },
                        var,
                    ));
                }
            }
        }

        let mut de_def = BTreeMap::new();
        let mut de_kill = BTreeMap::new();
        for block in cfg.blocks() {
            // Downward exposed: the last definition of each variable in the
            // block, found by scanning backwards.
            let mut seen: HashSet<VarId> = HashSet::new();
            let mut defs = BTreeSet::new();
            for (i, inst) in block.instructions().iter().enumerate().rev() {
                if let Some(var) = inst.def_var() {
                    if seen.insert(var) {
                        defs.insert(DefSite {
                            block: block.id(),
                            index: i,
                        });
                    }
                }
            }

            // Killed: every definition anywhere of a variable this block
            // also defines, minus the downward-exposed ones.
            let mut kills: BTreeSet<DefSite> = all_defs
                .iter()
                .filter(|(_, var)| seen.contains(var))
                .map(|(site, _)| *site)
                .collect();
            for site in &defs {
                kills.remove(site);
            }

            de_def.insert(block.id(), defs);
            de_kill.insert(block.id(), kills);
        }

        Self { de_def, de_kill }
    }
}

impl IterativeAnalysis for ReachDefAnalyzer {
    type Fragment = BTreeSet<DefSite>;

    fn init_fragment(&mut self, _cfg: &Cfg, _block: &BasicBlock) -> Self::Fragment {
        BTreeSet::new()
    }

    fn compute_fragment(
        &mut self,
        _cfg: &Cfg,
        block: &BasicBlock,
        fragments: &Fragments<Self::Fragment>,
    ) -> Self::Fragment {
        let mut reaching = BTreeSet::new();
        for &pred in block.predecessors() {
            reaching.extend(self.de_def[&pred].iter().copied());
            let kill = &self.de_kill[&pred];
            reaching.extend(
                fragments
                    .get(pred)
                    .iter()
                    .filter(|site| !kill.contains(site))
                    .copied(),
            );
        }
        reaching
    }
}

/// Computes reaching definitions for every block of the graph.
pub fn reaching_definitions(cfg: &Cfg) -> ReachingDefs {
    let mut analyzer = ReachDefAnalyzer::new(cfg);
    let fragments = solve(&mut analyzer, cfg);
    ReachingDefs {
        blocks: fragments.into_map(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::Assembler;
    use crate::cfg::build_cfg;
    use crate::ir::{Operand, VarId};

    fn var(base: u32) -> Operand {
        Operand::Var(VarId::new(base))
    }

    // t1=1; t2=2; jle else; t1=3; jmp end; else: t2=4; end: t3=t1+t2
    fn diamond() -> crate::cfg::Cfg {
        let mut asm = Assembler::new();
        asm.emit_assign(var(1), Operand::Const(1));
        asm.emit_assign(var(2), Operand::Const(2));
        let lbl_else = asm.make_label();
        asm.emit_jle(Operand::Label(lbl_else));
        asm.emit_assign(var(1), Operand::Const(3));
        let lbl_end = asm.make_label();
        asm.emit_jmp(Operand::Label(lbl_end));
        asm.mark_label(lbl_else);
        asm.emit_assign(var(2), Operand::Const(4));
        asm.mark_label(lbl_end);
        asm.emit_assign_add(var(3), var(1), var(2));
        asm.fix_labels();
        build_cfg(asm.instructions()).unwrap()
    }

    #[test]
    fn join_receives_surviving_definitions_from_both_arms() {
        let cfg = diamond();
        let rd = reaching_definitions(&cfg);

        // Nothing reaches the entry block.
        assert!(rd.get_block(BlockId(1)).is_empty());

        let join = rd.get_block(BlockId(4));
        // t1=3 (block 2) and t2=4 (block 3) reach the join, as do the entry
        // definitions they did not kill on the opposite arm.
        assert!(join.contains(&DefSite {
            block: BlockId(2),
            index: 0
        }));
        assert!(join.contains(&DefSite {
            block: BlockId(3),
            index: 0
        }));
        assert!(join.contains(&DefSite {
            block: BlockId(1),
            index: 0
        }));
        assert!(join.contains(&DefSite {
            block: BlockId(1),
            index: 1
        }));
    }

    #[test]
    fn redefinition_kills_upstream_definition_in_straight_line() {
        let mut asm = Assembler::new();
        asm.emit_assign(var(1), Operand::Const(1));
        asm.emit_jmp(Operand::Offset(0));
        asm.emit_assign(var(1), Operand::Const(2));
        asm.emit_jmp(Operand::Offset(0));
        asm.emit_ret(var(1));
        let cfg = build_cfg(asm.instructions()).unwrap();

        let rd = reaching_definitions(&cfg);
        let last = rd.get_block(BlockId(3));
        assert!(last.contains(&DefSite {
            block: BlockId(2),
            index: 0
        }));
        assert!(!last.contains(&DefSite {
            block: BlockId(1),
            index: 0
        }));
    }
}
