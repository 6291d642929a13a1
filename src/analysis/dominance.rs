//! Dominance analysis: dominator sets, immediate dominators and dominance
//! frontiers.
//!
//! Dominator sets come from the classic iterative intersection; the
//! immediate dominator of a block is the unique strict dominator not
//! dominated by any other strict dominator, and the frontier of a block
//! collects the joins just outside its dominion. Frontier computation only
//! looks at blocks with two or more predecessors and walks each
//! predecessor's dominator chain up to the join's immediate dominator.

use crate::analysis::{solve, Fragments, IterativeAnalysis};
use crate::cfg::{BasicBlock, BlockId, Cfg};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Dominance facts for every block of a graph.
#[derive(Debug)]
pub struct DomInfo {
    dom: BTreeMap<BlockId, BTreeSet<BlockId>>,
    idom: BTreeMap<BlockId, BlockId>,
    df: BTreeMap<BlockId, BTreeSet<BlockId>>,
}

impl DomInfo {
    /// Set of blocks dominating the given block, itself included.
    pub fn dominators(&self, id: BlockId) -> &BTreeSet<BlockId> {
        self.dom
            .get(&id)
            .unwrap_or_else(|| panic!("no dominator set for block {id}"))
    }

    /// Immediate dominator; `None` for the root.
    pub fn idom(&self, id: BlockId) -> Option<BlockId> {
        self.idom.get(&id).copied()
    }

    /// Dominance frontier of the given block.
    pub fn frontier(&self, id: BlockId) -> &BTreeSet<BlockId> {
        self.df
            .get(&id)
            .unwrap_or_else(|| panic!("no dominance frontier for block {id}"))
    }
}

struct DomAnalyzer;

impl IterativeAnalysis for DomAnalyzer {
    type Fragment = BTreeSet<BlockId>;

    fn init_fragment(&mut self, cfg: &Cfg, block: &BasicBlock) -> Self::Fragment {
        if block.id() == cfg.root() {
            std::iter::once(block.id()).collect()
        } else {
            cfg.block_ids().collect()
        }
    }

    fn compute_fragment(
        &mut self,
        _cfg: &Cfg,
        block: &BasicBlock,
        fragments: &Fragments<Self::Fragment>,
    ) -> Self::Fragment {
        let mut doms: BTreeSet<BlockId> = match block.predecessors().split_first() {
            None => BTreeSet::new(),
            Some((&first, rest)) => {
                let mut doms = fragments.get(first).clone();
                for &pred in rest {
                    let pred_doms = fragments.get(pred);
                    doms.retain(|d| pred_doms.contains(d));
                }
                doms
            }
        };
        doms.insert(block.id());
        doms
    }
}

/// Computes dominators, immediate dominators and dominance frontiers.
///
/// Fails if a non-root block has no unique immediate dominator, which in
/// practice means the graph contains unreachable blocks.
pub fn dominance(cfg: &Cfg) -> Result<DomInfo> {
    let fragments = solve(&mut DomAnalyzer, cfg);
    let dom: BTreeMap<BlockId, BTreeSet<BlockId>> = fragments.into_map();

    // Immediate dominators: the strict dominator that no other strict
    // dominator is dominated by.
    let mut idom = BTreeMap::new();
    for block in cfg.blocks() {
        let id = block.id();
        if id == cfg.root() {
            continue;
        }
        let doms = &dom[&id];
        let mut candidates = doms.iter().copied().filter(|&d| d != id).filter(|&d| {
            !doms
                .iter()
                .any(|&other| other != id && other != d && dom[&other].contains(&d))
        });
        match (candidates.next(), candidates.next()) {
            (Some(found), None) => {
                idom.insert(id, found);
            }
            (None, _) => return Err(Error::NoImmediateDominator { block: id }),
            (Some(_), Some(_)) => return Err(Error::MultipleImmediateDominators { block: id }),
        }
    }

    // Dominance frontiers.
    let mut df: BTreeMap<BlockId, BTreeSet<BlockId>> =
        cfg.block_ids().map(|id| (id, BTreeSet::new())).collect();
    for block in cfg.blocks() {
        if block.predecessors().len() < 2 {
            continue;
        }
        let join = block.id();
        let join_idom = idom[&join];
        for &pred in block.predecessors() {
            let mut cur = pred;
            while cur != join_idom {
                df.get_mut(&cur).expect("walked off the graph").insert(join);
                cur = *idom
                    .get(&cur)
                    .ok_or(Error::NoImmediateDominator { block: cur })?;
            }
        }
    }

    Ok(DomInfo { dom, idom, df })
}
