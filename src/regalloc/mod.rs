// Graph-coloring register allocation over an SSA-form CFG. Live ranges are sets of SSA
// names merged through phi fan-in: a phi's destination and arguments must end up in the
// same location, so they form one range. Canonicalization gives every distinct range a
// dense id, the interference graph gets a node per range and an edge per pair of ranges
// live at the same point, and coloring runs the usual simplify/select stack discipline.
// When select leaves a node uncolored, that range's accesses are rewritten through spill
// temporaries (load before each use, store after each def, phis deleted outright) and the
// whole discover/color cycle reruns on the rewritten graph.
//
// Spill temporaries are minted from a base range above every name in the graph and are
// the emitter's property: discovery skips them, so each spill strictly shrinks the set of
// allocatable ranges and the outer loop terminates. The load instruction keeps the members
// of the spilled range in its extra list, which is how the emitter finds the spill slot.

pub mod graph;

pub use graph::{NodeId, UndirectedGraph};

use crate::analysis::liveness::liveness;
use crate::cfg::{BlockId, Cfg, CfgForm};
use crate::error::{Error, Result};
use crate::ir::{is_assign, Instruction, Opcode, Operand, VarId};
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A set of SSA names that must share one location.
pub type LiveRange = BTreeSet<VarId>;

/// Result of allocation: a color in `0..k` for every SSA name that stayed
/// in a register.
#[derive(Debug)]
pub struct Coloring {
    colors: HashMap<VarId, usize>,
    num_colors: usize,
}

impl Coloring {
    /// Color assigned to the given name; `None` for names that were
    /// spilled away or never allocated.
    pub fn color_of(&self, var: VarId) -> Option<usize> {
        self.colors.get(&var).copied()
    }

    pub fn num_colors(&self) -> usize {
        self.num_colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, usize)> + '_ {
        self.colors.iter().map(|(&v, &c)| (v, c))
    }
}

enum ColorOutcome {
    Colored(BTreeMap<NodeId, usize>),
    Spill(NodeId),
}

/// Allocates `num_colors` registers for an SSA-form graph, rewriting it
/// with spill code as needed.
///
/// Fails if the graph is not in SSA form, if `num_colors` is zero, or if
/// coloring gets stuck with every candidate already spilled.
pub fn allocate(cfg: &mut Cfg, num_colors: usize) -> Result<Coloring> {
    if cfg.form() != CfgForm::Ssa {
        return Err(Error::WrongCfgForm {
            expected: CfgForm::Ssa,
            found: cfg.form(),
        });
    }
    if num_colors == 0 {
        return Err(Error::NoColors);
    }

    let mut allocator = RegisterAllocator::new(cfg, num_colors);
    loop {
        allocator.discover_live_ranges(cfg);
        allocator.nub_live_ranges(cfg);
        allocator.build_interference_graph(cfg)?;
        match allocator.color_graph()? {
            ColorOutcome::Colored(colors) => {
                debug!(
                    "allocation done: {} live ranges, {} colors",
                    allocator.live_ranges.len(),
                    num_colors
                );
                return Ok(allocator.into_coloring(colors));
            }
            ColorOutcome::Spill(node) => {
                let range = allocator.live_ranges[node].clone();
                debug!("spilling live range {node} ({} names)", range.len());
                allocator.spilled.insert(range.clone());
                allocator.insert_spill_code(cfg, &range);
            }
        }
    }
}

struct RegisterAllocator {
    num_colors: usize,
    /// Canonical live ranges, dense ids in discovery order.
    live_ranges: Vec<LiveRange>,
    live_range_map: HashMap<VarId, NodeId>,
    graph: UndirectedGraph,
    spilled: BTreeSet<LiveRange>,
    /// Bases at or above this belong to spill temporaries.
    spill_base: u32,
    next_temp: u32,
    groups: Vec<Option<LiveRange>>,
    group_of: HashMap<VarId, usize>,
}

impl RegisterAllocator {
    fn new(cfg: &Cfg, num_colors: usize) -> Self {
        let mut max_base = 0;
        for block in cfg.blocks() {
            for inst in block.instructions() {
                let fixed = inst.oprs.iter().flatten();
                for opr in fixed.chain(inst.extra.iter()) {
                    if let Operand::Var(v) = opr {
                        max_base = max_base.max(v.base());
                    }
                }
            }
        }
        let spill_base = max_base + 1;
        Self {
            num_colors,
            live_ranges: Vec::new(),
            live_range_map: HashMap::new(),
            graph: UndirectedGraph::new(),
            spilled: BTreeSet::new(),
            spill_base,
            next_temp: spill_base,
            groups: Vec::new(),
            group_of: HashMap::new(),
        }
    }

    fn is_temp(&self, var: VarId) -> bool {
        var.base() >= self.spill_base
    }

    fn fresh_temp(&mut self) -> VarId {
        let base = self.next_temp;
        self.next_temp += 1;
        VarId::ssa(base, 1)
    }

    fn lr_of(&self, var: VarId) -> Option<NodeId> {
        self.live_range_map.get(&var).copied()
    }

    /// Variables of an instruction in canonical visit order: the
    /// definition, then the uses.
    fn visit_vars(inst: &Instruction) -> impl Iterator<Item = VarId> + '_ {
        inst.def_var().into_iter().chain(inst.used_vars())
    }

    /// Groups every phi's destination and arguments into one range,
    /// merging with any range its names already belong to; everything else
    /// gets a singleton range.
    fn discover_live_ranges(&mut self, cfg: &Cfg) {
        self.groups.clear();
        self.group_of.clear();

        for block in cfg.blocks() {
            for inst in block.instructions() {
                if inst.op != Opcode::Phi {
                    continue;
                }
                let mut merged: LiveRange = Self::visit_vars(inst).collect();
                for var in merged.clone() {
                    if let Some(&group) = self.group_of.get(&var) {
                        if let Some(range) = self.groups[group].take() {
                            merged.extend(range);
                        }
                    }
                }
                let group = self.groups.len();
                for &var in &merged {
                    self.group_of.insert(var, group);
                }
                self.groups.push(Some(merged));
            }
        }

        for block in cfg.blocks() {
            for inst in block.instructions() {
                if inst.op == Opcode::Phi {
                    continue;
                }
                for var in Self::visit_vars(inst) {
                    if self.is_temp(var) || self.group_of.contains_key(&var) {
                        continue;
                    }
                    let group = self.groups.len();
                    self.group_of.insert(var, group);
                    self.groups.push(Some(std::iter::once(var).collect()));
                }
            }
        }
    }

    /// Assigns dense ids to the discovered ranges, in first-encounter
    /// order over the graph, and points every member at its canonical
    /// range.
    fn nub_live_ranges(&mut self, cfg: &Cfg) {
        self.live_ranges.clear();
        self.live_range_map.clear();

        for block in cfg.blocks() {
            for inst in block.instructions() {
                for var in Self::visit_vars(inst) {
                    if self.is_temp(var) || self.live_range_map.contains_key(&var) {
                        continue;
                    }
                    let group = self.group_of[&var];
                    let dense = self.live_ranges.len();
                    let range = self.groups[group]
                        .clone()
                        .expect("canonical group is populated");
                    for &member in &range {
                        self.live_range_map.insert(member, dense);
                    }
                    self.live_ranges.push(range);
                }
            }
        }
        trace!("nub: {} canonical live ranges", self.live_ranges.len());
    }

    /// One node per range; an edge wherever a definition happens while
    /// another range is live. Uses go live before their instruction's
    /// definition draws edges, so a definition always interferes with its
    /// own operands.
    fn build_interference_graph(&mut self, cfg: &Cfg) -> Result<()> {
        self.graph.clear();
        for id in 0..self.live_ranges.len() {
            self.graph.add_node(id)?;
        }

        let live = liveness(cfg);
        for block in cfg.blocks() {
            let mut live_now: BTreeSet<NodeId> = live
                .live_out(block.id())
                .iter()
                .filter_map(|&v| self.lr_of(v))
                .collect();

            for inst in block.instructions().iter().rev() {
                match inst.op {
                    Opcode::Store | Opcode::Unload => {
                        let var = inst.oprs[0].and_then(|o| o.as_var());
                        if let Some(range) = var.and_then(|v| self.lr_of(v)) {
                            live_now.insert(range);
                        }
                    }
                    _ if is_assign(inst.op) => {
                        for used in inst.used_vars() {
                            if let Some(range) = self.lr_of(used) {
                                live_now.insert(range);
                            }
                        }
                        if let Some(def) = inst.def_var().and_then(|v| self.lr_of(v)) {
                            for &range in &live_now {
                                if range != def {
                                    self.graph.add_edge(def, range)?;
                                }
                            }
                            live_now.remove(&def);
                        }
                    }
                    _ => {
                        for used in inst.used_vars() {
                            if let Some(range) = self.lr_of(used) {
                                live_now.insert(range);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Simplify/select. Nodes leave for the stack cheapest-first; on the
    /// way back each takes the lowest color its present neighbors do not
    /// hold. An uncolored survivor becomes the spill candidate: the first
    /// one in id order whose range has not been spilled yet.
    fn color_graph(&mut self) -> Result<ColorOutcome> {
        let k = self.num_colors;
        let mut work = self.graph.clone();
        let mut stack: Vec<(NodeId, BTreeSet<NodeId>)> = Vec::new();

        while !work.is_empty() {
            let node = work
                .find_node_with_degree_less_than(k)
                .unwrap_or_else(|| Self::pick_constrained_node(&work));
            let adjacent = work.neighbors(node).expect("node is present").clone();
            stack.push((node, adjacent));
            work.remove_node(node)?;
        }

        let mut colors: BTreeMap<NodeId, usize> = BTreeMap::new();
        let mut present = UndirectedGraph::new();
        let mut uncolored: Vec<NodeId> = Vec::new();
        while let Some((node, adjacent)) = stack.pop() {
            present.add_node(node)?;
            for &neighbor in &adjacent {
                if present.contains(neighbor) {
                    present.add_edge(node, neighbor)?;
                }
            }
            let used: BTreeSet<usize> = present
                .neighbors(node)
                .expect("just inserted")
                .iter()
                .filter_map(|n| colors.get(n))
                .copied()
                .collect();
            match (0..k).find(|c| !used.contains(c)) {
                Some(color) => {
                    colors.insert(node, color);
                }
                None => uncolored.push(node),
            }
        }

        if uncolored.is_empty() {
            return Ok(ColorOutcome::Colored(colors));
        }
        uncolored.sort_unstable();
        for &node in &uncolored {
            if !self.spilled.contains(&self.live_ranges[node]) {
                return Ok(ColorOutcome::Spill(node));
            }
        }
        Err(Error::OutOfRegisters {
            live_range: uncolored[0],
            colors: k,
        })
    }

    /// Highest degree wins; ties go to the smallest id.
    fn pick_constrained_node(graph: &UndirectedGraph) -> NodeId {
        let mut best: Option<(NodeId, usize)> = None;
        for node in graph.nodes() {
            let degree = graph.degree(node).expect("iterating live nodes");
            match best {
                Some((_, top)) if degree <= top => {}
                _ => best = Some((node, degree)),
            }
        }
        best.expect("graph is not empty").0
    }

    /// Rewrites every access to the spilled range through fresh
    /// temporaries: a load before each use, a store after each def, an
    /// unload after a pure use. Phis over the range disappear; the
    /// boundary loads and stores subsume them.
    fn insert_spill_code(&mut self, cfg: &mut Cfg, range: &LiveRange) {
        let ids: Vec<BlockId> = cfg.block_ids().collect();
        for id in ids {
            let old = std::mem::take(cfg.block_mut(id).instructions_mut());
            let mut rebuilt = Vec::with_capacity(old.len());
            for mut inst in old {
                if inst.op == Opcode::Phi {
                    let touches = Self::visit_vars(&inst).any(|v| range.contains(&v));
                    if touches {
                        trace!("spill: dropping phi in block {id}");
                        continue;
                    }
                    rebuilt.push(inst);
                    continue;
                }

                let def_in = inst.def_var().map_or(false, |d| range.contains(&d));
                let use_slots: Vec<usize> = inst
                    .use_slots()
                    .filter(|&s| {
                        matches!(inst.oprs[s], Some(Operand::Var(v)) if range.contains(&v))
                    })
                    .collect();
                let extra_slots: Vec<usize> = if inst.extra_is_uses() {
                    inst.extra
                        .iter()
                        .enumerate()
                        .filter(|(_, o)| matches!(o, Operand::Var(v) if range.contains(v)))
                        .map(|(i, _)| i)
                        .collect()
                } else {
                    Vec::new()
                };
                let uses_in = !use_slots.is_empty() || !extra_slots.is_empty();
                if !def_in && !uses_in {
                    rebuilt.push(inst);
                    continue;
                }

                let temp = self.fresh_temp();
                if uses_in {
                    let mut load = Instruction::new(Opcode::Load);
                    load.oprs[0] = Some(Operand::Var(temp));
                    load.extra = range.iter().map(|&v| Operand::Var(v)).collect();
                    rebuilt.push(load);
                }
                for slot in use_slots {
                    inst.oprs[slot] = Some(Operand::Var(temp));
                }
                for slot in extra_slots {
                    inst.extra[slot] = Operand::Var(temp);
                }
                if def_in {
                    inst.oprs[0] = Some(Operand::Var(temp));
                }
                rebuilt.push(inst);

                let mut aux = Instruction::new(if def_in {
                    Opcode::Store
                } else {
                    Opcode::Unload
                });
                aux.oprs[0] = Some(Operand::Var(temp));
                rebuilt.push(aux);
            }
            *cfg.block_mut(id).instructions_mut() = rebuilt;
        }
    }

    fn into_coloring(self, colors: BTreeMap<NodeId, usize>) -> Coloring {
        let mut map = HashMap::new();
        for (&var, &node) in &self.live_range_map {
            map.insert(var, colors[&node]);
        }
        Coloring {
            colors: map,
            num_colors: self.num_colors,
        }
    }
}
