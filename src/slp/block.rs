//! Block construction and depth computation.
//!
//! The block is the loop body in a deterministic reverse-postorder: a
//! topological order over in-body operand edges that is stable with respect
//! to the framework's program order. Loop-invariant values (constants,
//! parameters, phis) are not block members; they are recorded as data
//! entries. Construction fails, aborting the whole pass, when the body
//! contains shapes the pass does not understand.
//!
//! Depth is the longest dependency chain from the block start, counted over
//! the combined dependence-graph and operand edges. Depths order the cost
//! heuristics and bound the independence search.

use rustc_hash::FxHashSet;

use crate::ir::arena::SecondaryMap;
use crate::ir::node::{Node, NodeId};

use super::{NodeInfo, SuperWord, VectorizeError};

// =============================================================================
// Block
// =============================================================================

/// The ordered loop body plus its position index.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Block members in reverse postorder.
    body: Vec<NodeId>,
    /// Node -> position + 1; zero means "not in block".
    pos: SecondaryMap<Node, u32>,
    /// Loop-entry values consumed by block members.
    entries: Vec<NodeId>,
}

impl Block {
    /// Number of block members.
    #[inline]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Check if the block is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Block members in order.
    #[inline]
    pub fn nodes(&self) -> &[NodeId] {
        &self.body
    }

    /// Member at a position.
    #[inline]
    pub fn at(&self, index: usize) -> NodeId {
        self.body[index]
    }

    /// Check if a node is a block member.
    #[inline]
    pub fn contains(&self, n: NodeId) -> bool {
        self.pos.get(n).copied().unwrap_or(0) != 0
    }

    /// Position of a block member.
    #[inline]
    pub fn index_of(&self, n: NodeId) -> Option<usize> {
        match self.pos.get(n).copied().unwrap_or(0) {
            0 => None,
            p => Some((p - 1) as usize),
        }
    }

    /// Loop-entry values feeding the block.
    #[inline]
    pub fn entries(&self) -> &[NodeId] {
        &self.entries
    }

    fn push(&mut self, n: NodeId) {
        self.body.push(n);
        self.pos.set(n, self.body.len() as u32);
    }
}

// =============================================================================
// Construction
// =============================================================================

impl SuperWord<'_> {
    /// Build the block in reverse postorder and allocate the side table.
    ///
    /// Fails when the body is empty, lists an operation twice, or contains
    /// an operation whose operand is neither a body member nor a loop-entry
    /// value.
    pub(crate) fn construct_block(&mut self) -> Result<(), VectorizeError> {
        let body = &self.vloop.body;
        if body.is_empty() {
            return Err(VectorizeError::UnsupportedBlock("empty loop body"));
        }

        let mut in_body: FxHashSet<NodeId> = FxHashSet::default();
        for &n in body {
            if !in_body.insert(n) {
                return Err(VectorizeError::UnsupportedBlock(
                    "operation listed twice in loop body",
                ));
            }
        }

        // Validate members and their operand sources.
        for &n in body {
            let node = self
                .graph
                .get(n)
                .ok_or(VectorizeError::UnsupportedBlock("unknown operation"))?;
            if node.is_dead() {
                return Err(VectorizeError::UnsupportedBlock("retired operation in body"));
            }
            if node.op.is_entry() {
                return Err(VectorizeError::UnsupportedBlock(
                    "loop-entry value listed in body",
                ));
            }
            for input in node.inputs.iter() {
                let source = self
                    .graph
                    .get(input)
                    .ok_or(VectorizeError::UnsupportedBlock("unknown operand"))?;
                if !in_body.contains(&input) && !source.op.is_entry() {
                    return Err(VectorizeError::UnsupportedBlock(
                        "operand defined outside the loop body",
                    ));
                }
            }
        }

        // Stable DFS postorder over in-body operand edges: definitions come
        // before their uses, independent operations keep program order.
        let mut block = Block::default();
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        for &seed in body {
            if visited.contains(&seed) {
                continue;
            }
            visited.insert(seed);
            let mut stack: Vec<(NodeId, usize)> = vec![(seed, 0)];
            while let Some((n, idx)) = stack.pop() {
                let node = self.graph.node(n);
                if idx < node.inputs.len() {
                    stack.push((n, idx + 1));
                    let input = node.inputs.get(idx).expect("index in range");
                    if in_body.contains(&input) && !visited.contains(&input) {
                        visited.insert(input);
                        stack.push((input, 0));
                    }
                } else {
                    block.push(n);
                }
            }
        }
        debug_assert_eq!(block.len(), body.len());

        // Record loop-entry values in first-use order.
        let mut seen_entries: FxHashSet<NodeId> = FxHashSet::default();
        for i in 0..block.len() {
            let n = block.at(i);
            for input in self.graph.node(n).inputs.iter() {
                if !in_body.contains(&input) && seen_entries.insert(input) {
                    block.entries.push(input);
                }
            }
        }

        self.info = vec![NodeInfo::default(); block.len()];
        self.block = block;
        Ok(())
    }

    /// Compute the longest-chain depth of every block member.
    ///
    /// Depth 0 for operations with no in-block predecessors; otherwise one
    /// more than the deepest predecessor over the combined dependence-graph
    /// and operand edges.
    pub(crate) fn compute_max_depth(&mut self) {
        for i in 0..self.block.len() {
            let n = self.block.at(i);
            let mut depth = 0u32;
            for pred in self.dg.preds(self.graph, n) {
                let p = pred.node();
                if let Some(j) = self.block.index_of(p) {
                    debug_assert!(j < i, "predecessor must precede its successor");
                    depth = depth.max(self.info[j].depth + 1);
                }
            }
            self.info[i].depth = depth;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::graph::Graph;
    use crate::ir::operators::{ArithOp, MemRef, SliceId};
    use crate::ir::types::ValueType;
    use crate::slp::{SlpConfig, VLoop};

    fn setup(g: &mut Graph) -> (NodeId, NodeId) {
        let base = g.parameter(0, ValueType::Ptr);
        let iv = g.parameter(1, ValueType::I64);
        (base, iv)
    }

    #[test]
    fn test_block_order_defs_first() {
        let mut g = Graph::new();
        let (base, iv) = setup(&mut g);
        let mem = |off| MemRef::new(base, SliceId(0), off, 4, 4);
        let ld = g.load(mem(0), ValueType::I32);
        let add = g.int_op(ArithOp::Add, ld, ld, ValueType::I32);
        let st = g.store(mem(0), add);

        // Body deliberately lists the store first; the block must still put
        // definitions before uses.
        let vloop = VLoop::new(vec![st, ld, add], iv, 1);
        let config = SlpConfig::default();
        let mut sw = SuperWord::new(&mut g, &vloop, &config);
        sw.construct_block().unwrap();

        let p_ld = sw.block.index_of(ld).unwrap();
        let p_add = sw.block.index_of(add).unwrap();
        let p_st = sw.block.index_of(st).unwrap();
        assert!(p_ld < p_add);
        assert!(p_add < p_st);
        assert_eq!(sw.block.len(), 3);
    }

    #[test]
    fn test_block_entries_recorded() {
        let mut g = Graph::new();
        let (base, iv) = setup(&mut g);
        let c = g.const_int(1);
        let ld = g.load(MemRef::new(base, SliceId(0), 0, 8, 8), ValueType::I64);
        let add = g.int_op(ArithOp::Add, ld, c, ValueType::I64);

        let vloop = VLoop::new(vec![ld, add], iv, 1);
        let config = SlpConfig::default();
        let mut sw = SuperWord::new(&mut g, &vloop, &config);
        sw.construct_block().unwrap();

        assert!(sw.block.entries().contains(&base));
        assert!(sw.block.entries().contains(&c));
        assert!(!sw.block.contains(c));
    }

    #[test]
    fn test_block_rejects_outside_operand() {
        let mut g = Graph::new();
        let (base, iv) = setup(&mut g);
        // A load that is not part of the body feeds a body operation.
        let outside = g.load(MemRef::new(base, SliceId(0), 0, 4, 4), ValueType::I32);
        let add = g.int_op(ArithOp::Add, outside, outside, ValueType::I32);

        let vloop = VLoop::new(vec![add], iv, 1);
        let config = SlpConfig::default();
        let mut sw = SuperWord::new(&mut g, &vloop, &config);
        assert_eq!(
            sw.construct_block(),
            Err(VectorizeError::UnsupportedBlock(
                "operand defined outside the loop body"
            ))
        );
    }

    #[test]
    fn test_block_rejects_duplicates_and_empty() {
        let mut g = Graph::new();
        let (_, iv) = setup(&mut g);
        let a = g.parameter(2, ValueType::I64);
        let add = g.int_op(ArithOp::Add, a, a, ValueType::I64);

        let config = SlpConfig::default();
        let dup = VLoop::new(vec![add, add], iv, 1);
        let mut sw = SuperWord::new(&mut g, &dup, &config);
        assert!(matches!(
            sw.construct_block(),
            Err(VectorizeError::UnsupportedBlock(_))
        ));

        let mut g2 = Graph::new();
        let iv2 = g2.parameter(0, ValueType::I64);
        let empty = VLoop::new(vec![], iv2, 1);
        let mut sw2 = SuperWord::new(&mut g2, &empty, &config);
        assert!(matches!(
            sw2.construct_block(),
            Err(VectorizeError::UnsupportedBlock(_))
        ));
    }

    #[test]
    fn test_depths() {
        let mut g = Graph::new();
        let (base, iv) = setup(&mut g);
        let mem = |off| MemRef::new(base, SliceId(0), off, 4, 4);
        let a = g.load(mem(0), ValueType::I32);
        let b = g.load(mem(4), ValueType::I32);
        let add = g.int_op(ArithOp::Add, a, b, ValueType::I32);
        let st = g.store(mem(8), add);

        let vloop = VLoop::new(vec![a, b, add, st], iv, 1);
        let config = SlpConfig::default();
        let mut sw = SuperWord::new(&mut g, &vloop, &config);
        sw.construct_block().unwrap();
        sw.build_dependence_graph();
        sw.compute_max_depth();

        assert_eq!(sw.depth_of(a), 0);
        assert_eq!(sw.depth_of(b), 0);
        assert_eq!(sw.depth_of(add), 1);
        assert_eq!(sw.depth_of(st), 2);
    }
}
