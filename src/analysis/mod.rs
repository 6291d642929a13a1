//! Global data-flow analyses over the control flow graph.
//!
//! The submodules share one tiny framework: an analysis stores a fragment
//! of state per block and recomputes fragments from neighboring blocks
//! until nothing changes. Termination is the client's responsibility; both
//! directions (forward over predecessors, backward over successors) work,
//! provided the transfer function is monotone over a finite lattice.

pub mod dominance;
pub mod liveness;
pub mod reaching;

pub use dominance::{dominance, DomInfo};
pub use liveness::{liveness, Liveness};
pub use reaching::{reaching_definitions, DefSite, ReachingDefs};

use crate::cfg::{BasicBlock, BlockId, Cfg};
use std::collections::BTreeMap;

/// Per-block analysis state, keyed by block id.
#[derive(Debug, Clone)]
pub struct Fragments<F> {
    map: BTreeMap<BlockId, F>,
}

impl<F> Fragments<F> {
    /// Fragment of the given block. The solver seeds every block, so a miss
    /// means the caller handed in a foreign block id.
    pub fn get(&self, id: BlockId) -> &F {
        self.map
            .get(&id)
            .unwrap_or_else(|| panic!("no fragment for block {id}"))
    }

    /// Consumes the fragments into the underlying id-keyed map.
    pub fn into_map(self) -> BTreeMap<BlockId, F> {
        self.map
    }
}

/// An iterative fixed-point data-flow problem.
pub trait IterativeAnalysis {
    type Fragment: PartialEq;

    /// Initial fragment for a block, before any iteration.
    fn init_fragment(&mut self, cfg: &Cfg, block: &BasicBlock) -> Self::Fragment;

    /// Recomputes the fragment for a block from its neighbors' fragments.
    fn compute_fragment(
        &mut self,
        cfg: &Cfg,
        block: &BasicBlock,
        fragments: &Fragments<Self::Fragment>,
    ) -> Self::Fragment;
}

/// Runs the analysis to a fixed point, visiting blocks in id order.
pub fn solve<A: IterativeAnalysis>(analysis: &mut A, cfg: &Cfg) -> Fragments<A::Fragment> {
    let mut fragments = Fragments {
        map: BTreeMap::new(),
    };
    for block in cfg.blocks() {
        let frag = analysis.init_fragment(cfg, block);
        fragments.map.insert(block.id(), frag);
    }

    let mut changed = true;
    while changed {
        changed = false;
        for block in cfg.blocks() {
            let next = analysis.compute_fragment(cfg, block, &fragments);
            if next != *fragments.get(block.id()) {
                fragments.map.insert(block.id(), next);
                changed = true;
            }
        }
    }
    fragments
}
