//! Memory dependence graph.
//!
//! A DAG over the block's memory operations plus two sentinels (root, tail)
//! encoding must-precede ordering from possible aliasing within a memory
//! slice. Adjacency is index-based: one contiguous edge table with per-node
//! in/out chain heads, so edge insertion is O(1) and there is no pointer
//! threading to maintain. Edges are only ever added during a pass.
//!
//! Reachability callers never special-case memory against ordinary data
//! dependencies: [`DepGraph::preds`] and [`DepGraph::succs`] iterate a
//! tagged union of dependence edges and operand/use edges through one
//! interface. [`SuperWord::independent`] runs over that combined view,
//! bounded by the depth difference of its arguments.

use crate::ir::arena::{BitSet, SecondaryMap};
use crate::ir::graph::Graph;
use crate::ir::node::{Node, NodeId};
use crate::ir::operators::MemRef;

use super::{OrderedPair, SuperWord};

// =============================================================================
// Graph Storage
// =============================================================================

const NO_EDGE: u32 = u32::MAX;

/// Index of the root sentinel.
pub const ROOT: u32 = 0;
/// Index of the tail sentinel.
pub const TAIL: u32 = 1;

#[derive(Debug, Clone)]
struct DepNode {
    /// Backing operation; `None` for the sentinels.
    node: Option<NodeId>,
    first_in: u32,
    first_out: u32,
}

#[derive(Debug, Clone)]
struct DepEdge {
    pred: u32,
    succ: u32,
    next_in: u32,
    next_out: u32,
}

/// The dependence graph for one block.
#[derive(Debug, Clone)]
pub struct DepGraph {
    nodes: Vec<DepNode>,
    edges: Vec<DepEdge>,
    /// Operation -> dependence node index + 1; zero means "no node".
    map: SecondaryMap<Node, u32>,
}

impl DepGraph {
    /// Create a graph containing only the sentinels.
    pub fn new() -> Self {
        let sentinel = |_| DepNode {
            node: None,
            first_in: NO_EDGE,
            first_out: NO_EDGE,
        };
        DepGraph {
            nodes: vec![sentinel(ROOT), sentinel(TAIL)],
            edges: Vec::new(),
            map: SecondaryMap::new(),
        }
    }

    /// Add a dependence node for an operation.
    pub fn make_node(&mut self, n: NodeId) -> u32 {
        let idx = self.nodes.len() as u32;
        self.nodes.push(DepNode {
            node: Some(n),
            first_in: NO_EDGE,
            first_out: NO_EDGE,
        });
        self.map.set(n, idx + 1);
        idx
    }

    /// Dependence node of an operation, if it has one.
    #[inline]
    pub fn dep_of(&self, n: NodeId) -> Option<u32> {
        match self.map.get(n).copied().unwrap_or(0) {
            0 => None,
            d => Some(d - 1),
        }
    }

    /// Add the edge pred -> succ.
    pub fn make_edge(&mut self, pred: u32, succ: u32) {
        let idx = self.edges.len() as u32;
        self.edges.push(DepEdge {
            pred,
            succ,
            next_in: self.nodes[succ as usize].first_in,
            next_out: self.nodes[pred as usize].first_out,
        });
        self.nodes[succ as usize].first_in = idx;
        self.nodes[pred as usize].first_out = idx;
    }

    /// Add the edge pred -> succ between two operations.
    pub fn make_edge_nodes(&mut self, pred: NodeId, succ: NodeId) {
        let (p, s) = (self.dep_of(pred), self.dep_of(succ));
        if let (Some(p), Some(s)) = (p, s) {
            self.make_edge(p, s);
        }
    }

    /// Number of edges.
    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of incoming dependence edges of a dependence node.
    pub fn in_count(&self, dep: u32) -> usize {
        let mut count = 0;
        let mut e = self.nodes[dep as usize].first_in;
        while e != NO_EDGE {
            count += 1;
            e = self.edges[e as usize].next_in;
        }
        count
    }

    /// Number of outgoing dependence edges of a dependence node.
    pub fn out_count(&self, dep: u32) -> usize {
        let mut count = 0;
        let mut e = self.nodes[dep as usize].first_out;
        while e != NO_EDGE {
            count += 1;
            e = self.edges[e as usize].next_out;
        }
        count
    }

    /// Check whether the dependence edge pred -> succ exists.
    pub fn has_edge(&self, pred: NodeId, succ: NodeId) -> bool {
        let Some(s) = self.dep_of(succ) else {
            return false;
        };
        let mut e = self.nodes[s as usize].first_in;
        while e != NO_EDGE {
            let edge = &self.edges[e as usize];
            if self.nodes[edge.pred as usize].node == Some(pred) {
                return true;
            }
            e = edge.next_in;
        }
        false
    }

    /// Dependence-graph-only predecessors of an operation (sentinels
    /// excluded).
    pub fn dep_preds<'a>(&'a self, n: NodeId) -> impl Iterator<Item = NodeId> + 'a {
        let first = self
            .dep_of(n)
            .map(|d| self.nodes[d as usize].first_in)
            .unwrap_or(NO_EDGE);
        DepChainIter {
            dg: self,
            edge: first,
            incoming: true,
        }
    }

    /// Dependence-graph-only successors of an operation (sentinels
    /// excluded).
    pub fn dep_succs<'a>(&'a self, n: NodeId) -> impl Iterator<Item = NodeId> + 'a {
        let first = self
            .dep_of(n)
            .map(|d| self.nodes[d as usize].first_out)
            .unwrap_or(NO_EDGE);
        DepChainIter {
            dg: self,
            edge: first,
            incoming: false,
        }
    }

    /// Combined predecessors: dependence edges plus operand edges.
    pub fn preds<'a>(&'a self, graph: &'a Graph, n: NodeId) -> CombinedPreds<'a> {
        let first = self
            .dep_of(n)
            .map(|d| self.nodes[d as usize].first_in)
            .unwrap_or(NO_EDGE);
        CombinedPreds {
            dg: self,
            graph,
            n,
            edge: first,
            input_idx: 0,
        }
    }

    /// Combined successors: dependence edges plus use edges.
    pub fn succs<'a>(&'a self, graph: &'a Graph, n: NodeId) -> CombinedSuccs<'a> {
        let first = self
            .dep_of(n)
            .map(|d| self.nodes[d as usize].first_out)
            .unwrap_or(NO_EDGE);
        CombinedSuccs {
            dg: self,
            uses: graph.uses(n),
            edge: first,
            use_idx: 0,
        }
    }
}

impl Default for DepGraph {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Iterators
// =============================================================================

/// One neighbor reached during combined iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepRef {
    /// Reached through a dependence-graph edge.
    Dependence(NodeId),
    /// Reached through an ordinary operand/use edge.
    Operand(NodeId),
}

impl DepRef {
    /// The neighbor operation.
    #[inline]
    pub fn node(&self) -> NodeId {
        match *self {
            DepRef::Dependence(n) | DepRef::Operand(n) => n,
        }
    }
}

struct DepChainIter<'a> {
    dg: &'a DepGraph,
    edge: u32,
    incoming: bool,
}

impl Iterator for DepChainIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        while self.edge != NO_EDGE {
            let e = &self.dg.edges[self.edge as usize];
            let (neighbor, next) = if self.incoming {
                (e.pred, e.next_in)
            } else {
                (e.succ, e.next_out)
            };
            self.edge = next;
            if let Some(n) = self.dg.nodes[neighbor as usize].node {
                return Some(n);
            }
        }
        None
    }
}

/// Iterator over combined predecessors.
pub struct CombinedPreds<'a> {
    dg: &'a DepGraph,
    graph: &'a Graph,
    n: NodeId,
    edge: u32,
    input_idx: usize,
}

impl Iterator for CombinedPreds<'_> {
    type Item = DepRef;

    fn next(&mut self) -> Option<DepRef> {
        while self.edge != NO_EDGE {
            let e = &self.dg.edges[self.edge as usize];
            self.edge = e.next_in;
            if let Some(n) = self.dg.nodes[e.pred as usize].node {
                return Some(DepRef::Dependence(n));
            }
        }
        let node = self.graph.node(self.n);
        if self.input_idx < node.inputs.len() {
            let input = node.inputs.get(self.input_idx).expect("index in range");
            self.input_idx += 1;
            return Some(DepRef::Operand(input));
        }
        None
    }
}

/// Iterator over combined successors.
pub struct CombinedSuccs<'a> {
    dg: &'a DepGraph,
    uses: &'a [NodeId],
    edge: u32,
    use_idx: usize,
}

impl Iterator for CombinedSuccs<'_> {
    type Item = DepRef;

    fn next(&mut self) -> Option<DepRef> {
        while self.edge != NO_EDGE {
            let e = &self.dg.edges[self.edge as usize];
            self.edge = e.next_out;
            if let Some(n) = self.dg.nodes[e.succ as usize].node {
                return Some(DepRef::Dependence(n));
            }
        }
        if self.use_idx < self.uses.len() {
            let u = self.uses[self.use_idx];
            self.use_idx += 1;
            return Some(DepRef::Operand(u));
        }
        None
    }
}

// =============================================================================
// Aliasing Classification
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AliasClass {
    /// The accesses may overlap; order must be preserved.
    May,
    /// The accesses provably never overlap.
    DisjointStatic,
    /// Disjoint only if a runtime guard on the bases holds.
    DisjointWithGuard,
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    a = a.abs();
    b = b.abs();
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Classify whether two same-slice references can overlap at any pair of
/// iterations. `step` is the byte distance each reference advances per body
/// execution (common induction variable).
fn classify_aliasing(a: &MemRef, b: &MemRef, stride: i32, runtime_checks: bool) -> AliasClass {
    if !a.affine || !b.affine {
        return AliasClass::May;
    }
    if a.base != b.base {
        return if runtime_checks {
            AliasClass::DisjointWithGuard
        } else {
            AliasClass::May
        };
    }

    let step_a = i64::from(a.iv_scale) * i64::from(stride);
    let step_b = i64::from(b.iv_scale) * i64::from(stride);
    let delta = i64::from(b.offset) - i64::from(a.offset);
    let (size_a, size_b) = (i64::from(a.size), i64::from(b.size));

    if step_a == 0 && step_b == 0 {
        // Both invariant: plain interval test.
        let disjoint = delta >= size_a || -delta >= size_b;
        return if disjoint {
            AliasClass::DisjointStatic
        } else {
            AliasClass::May
        };
    }

    // Address differences across all iteration pairs fall in the coset
    // delta + g*Z; the accesses overlap only if some member of the coset
    // lands in (-size_b, size_a).
    let g = gcd(step_a, step_b);
    if g == 0 {
        return AliasClass::May;
    }
    let r = delta.rem_euclid(g);
    if r >= size_a && g - r >= size_b {
        AliasClass::DisjointStatic
    } else {
        AliasClass::May
    }
}

// =============================================================================
// Construction and Queries
// =============================================================================

impl SuperWord<'_> {
    /// Build the dependence graph over the block's memory operations.
    ///
    /// Within each slice, an edge pred -> succ is added for every pair that
    /// may alias (load-load pairs excepted). Pairs proven disjoint get no
    /// edge; cross-base pairs disambiguated only by a runtime guard are
    /// additionally recorded as [`OrderedPair`]s for the caller.
    pub(crate) fn build_dependence_graph(&mut self) {
        let mut dg = DepGraph::new();

        // Memory operations per slice, in block order. Slices are visited
        // in ascending id order for deterministic edge numbering.
        let mut slices: Vec<(crate::ir::operators::SliceId, Vec<NodeId>)> = Vec::new();
        for &n in self.block.nodes() {
            if let Some(mem) = self.graph.node(n).op.mem_ref() {
                dg.make_node(n);
                match slices.binary_search_by_key(&mem.slice, |&(s, _)| s) {
                    Ok(i) => slices[i].1.push(n),
                    Err(i) => slices.insert(i, (mem.slice, vec![n])),
                }
            }
        }

        for (slice, ops) in &slices {
            if self.config.trace.mem_slice {
                log::trace!("slp: slice {:?} has {} memory ops", slice, ops.len());
            }
            for (j, &s1) in ops.iter().enumerate() {
                let r1 = *self.graph.node(s1).op.mem_ref().expect("memory op");
                let s1_is_load = self.graph.node(s1).op.is_load();
                for &s2 in &ops[..j] {
                    let r2 = *self.graph.node(s2).op.mem_ref().expect("memory op");
                    if s1_is_load && self.graph.node(s2).op.is_load() {
                        continue;
                    }
                    match classify_aliasing(
                        &r2,
                        &r1,
                        self.vloop.iv_stride,
                        self.config.runtime_alias_checks,
                    ) {
                        AliasClass::May => {
                            if self.config.trace.mem_slice {
                                log::trace!("slp: dep edge {:?} -> {:?}", s2, s1);
                            }
                            dg.make_edge_nodes(s2, s1);
                        }
                        AliasClass::DisjointStatic => {}
                        AliasClass::DisjointWithGuard => {
                            let pair = OrderedPair::new(s2, s1);
                            if !self.disjoint_ptrs.contains(&pair) {
                                self.disjoint_ptrs.push(pair);
                            }
                        }
                    }
                }
            }
            // Tie slice boundaries to the sentinels.
            for &s in ops.iter() {
                let d = dg.dep_of(s).expect("registered above");
                if dg.in_count(d) == 0 {
                    dg.make_edge(ROOT, d);
                }
            }
            for &s in ops.iter() {
                let d = dg.dep_of(s).expect("registered above");
                if dg.out_count(d) == 0 {
                    dg.make_edge(d, TAIL);
                }
            }
        }

        self.dg = dg;
    }

    /// Is there no path between `a` and `b`, in either direction, over the
    /// combined dependence/operand edges?
    ///
    /// The search walks predecessors of the deeper node and prunes any
    /// branch whose depth does not exceed the shallower node's depth, which
    /// bounds the walk by the depth difference.
    pub(crate) fn independent(&self, a: NodeId, b: NodeId) -> bool {
        let da = self.depth_of(a);
        let db = self.depth_of(b);
        if da == db {
            // Depth strictly increases along every edge, so equal-depth
            // nodes can never reach one another.
            return a != b;
        }
        let (shallow, deep, shallow_depth) = if da < db { (a, b, da) } else { (b, a, db) };

        let mut visited = BitSet::with_capacity(self.block.len());
        let mut stack = vec![deep];
        while let Some(n) = stack.pop() {
            for pred in self.dg.preds(self.graph, n) {
                let p = pred.node();
                if p == shallow {
                    return false;
                }
                if let Some(i) = self.pos(p) {
                    if self.info[i].depth > shallow_depth && !visited.test_and_set(i) {
                        stack.push(p);
                    }
                }
            }
        }
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
