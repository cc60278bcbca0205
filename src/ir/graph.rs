//! Program graph with use-def chains.
//!
//! The graph owns all nodes in an arena and maintains, for every node, the
//! list of nodes that consume its result. The vectorizer reads the graph
//! through the whole pipeline and mutates it only during emission: appending
//! vector nodes, rewiring consumers, and retiring the replaced scalars.

use super::arena::{Arena, SecondaryMap};
use super::node::{InputList, Node, NodeFlags, NodeId};
use super::operators::{ArithOp, CmpOp, MemRef, Operator};
use super::types::ValueType;

// =============================================================================
// Graph
// =============================================================================

/// An operation graph for one compilation unit.
#[derive(Clone, Default)]
pub struct Graph {
    /// Node storage.
    nodes: Arena<Node>,
    /// Use chains: for each node, the nodes consuming its result.
    uses: SecondaryMap<Node, Vec<NodeId>>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Graph {
            nodes: Arena::with_capacity(64),
            uses: SecondaryMap::new(),
        }
    }

    // =========================================================================
    // Node Access
    // =========================================================================

    /// Node by id.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    /// Mutable node by id.
    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Node by id, if in range.
    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Number of nodes (dead included).
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the graph has no nodes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate over all nodes with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes.iter()
    }

    // =========================================================================
    // Node Creation
    // =========================================================================

    /// Append a node.
    pub fn add_node(&mut self, op: Operator, inputs: InputList, ty: ValueType) -> NodeId {
        let id = self.nodes.alloc(Node::new(op, inputs, ty));
        let inputs: Vec<NodeId> = self.nodes[id].inputs.iter().collect();
        for input in inputs {
            self.add_use(input, id);
        }
        id
    }

    /// Integer constant.
    pub fn const_int(&mut self, value: i64) -> NodeId {
        self.add_node(Operator::ConstInt(value), InputList::Empty, ValueType::I64)
    }

    /// Float constant.
    pub fn const_float(&mut self, value: f64) -> NodeId {
        self.add_node(
            Operator::ConstFloat(value.to_bits()),
            InputList::Empty,
            ValueType::F64,
        )
    }

    /// Loop-invariant entry value.
    pub fn parameter(&mut self, index: u16, ty: ValueType) -> NodeId {
        self.add_node(Operator::Parameter(index), InputList::Empty, ty)
    }

    /// Loop-carried phi.
    pub fn phi(&mut self, entry: NodeId, backedge: NodeId, ty: ValueType) -> NodeId {
        self.add_node(Operator::Phi, InputList::Pair(entry, backedge), ty)
    }

    /// Binary integer arithmetic.
    pub fn int_op(&mut self, op: ArithOp, lhs: NodeId, rhs: NodeId, ty: ValueType) -> NodeId {
        self.add_node(Operator::IntOp(op), InputList::Pair(lhs, rhs), ty)
    }

    /// Binary float arithmetic.
    pub fn float_op(&mut self, op: ArithOp, lhs: NodeId, rhs: NodeId, ty: ValueType) -> NodeId {
        self.add_node(Operator::FloatOp(op), InputList::Pair(lhs, rhs), ty)
    }

    /// Integer comparison.
    pub fn int_cmp(&mut self, op: CmpOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(Operator::IntCmp(op), InputList::Pair(lhs, rhs), ValueType::Bool)
    }

    /// Scalar load through an address descriptor.
    pub fn load(&mut self, mem: MemRef, ty: ValueType) -> NodeId {
        let base = mem.base;
        self.add_node(Operator::Load(mem), InputList::Single(base), ty)
    }

    /// Scalar store through an address descriptor.
    pub fn store(&mut self, mem: MemRef, value: NodeId) -> NodeId {
        let base = mem.base;
        self.add_node(Operator::Store(mem), InputList::Pair(base, value), ValueType::Void)
    }

    // =========================================================================
    // Use-Def Chains
    // =========================================================================

    /// All uses of a node.
    pub fn uses(&self, id: NodeId) -> &[NodeId] {
        self.uses.get(id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Number of uses of a node.
    pub fn use_count(&self, id: NodeId) -> usize {
        self.uses.get(id).map(|v| v.len()).unwrap_or(0)
    }

    fn add_use(&mut self, def: NodeId, user: NodeId) {
        self.uses.get_or_grow(def).push(user);
    }

    fn remove_use(&mut self, def: NodeId, user: NodeId) {
        if let Some(uses) = self.uses.get_mut(def) {
            if let Some(pos) = uses.iter().position(|&u| u == user) {
                uses.swap_remove(pos);
            }
        }
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Replace one input of a node, maintaining use chains.
    pub fn replace_input(&mut self, node: NodeId, index: usize, new_input: NodeId) {
        if let Some(old) = self.nodes[node].inputs.get(index) {
            self.remove_use(old, node);
        }
        self.nodes[node].inputs.set(index, new_input);
        self.add_use(new_input, node);
    }

    /// Replace every use of `old` with `new`.
    pub fn replace_all_uses(&mut self, old: NodeId, new: NodeId) {
        let users: Vec<NodeId> = self.uses(old).to_vec();
        for user in users {
            let positions: Vec<usize> = self.nodes[user]
                .inputs
                .iter()
                .enumerate()
                .filter(|&(_, input)| input == old)
                .map(|(i, _)| i)
                .collect();
            for i in positions {
                self.nodes[user].inputs.set(i, new);
                self.add_use(new, user);
            }
        }
        if let Some(uses) = self.uses.get_mut(old) {
            uses.clear();
        }
    }

    /// Retire a node: mark it dead and unlink it from its inputs' use chains.
    pub fn kill(&mut self, id: NodeId) {
        self.nodes[id].mark_dead();
        let inputs: Vec<NodeId> = self.nodes[id].inputs.iter().collect();
        for input in inputs {
            self.remove_use(input, id);
        }
    }

    /// Set a flag on a node.
    pub fn set_flag(&mut self, id: NodeId, flag: NodeFlags) {
        self.nodes[id].flags.insert(flag);
    }

    // =========================================================================
    // Consistency
    // =========================================================================

    /// Verify graph consistency (debug builds only).
    #[cfg(debug_assertions)]
    pub fn verify(&self) -> Result<(), String> {
        for (id, node) in self.iter() {
            for input in node.inputs.iter() {
                if input.as_usize() >= self.nodes.len() {
                    return Err(format!("node {:?} has out-of-range input {:?}", id, input));
                }
                if !node.is_dead() && !self.uses(input).contains(&id) {
                    return Err(format!("use chain of {:?} is missing user {:?}", input, id));
                }
            }
        }
        Ok(())
    }

    #[cfg(not(debug_assertions))]
    pub fn verify(&self) -> Result<(), String> {
        Ok(())
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Graph ({} nodes):", self.nodes.len())?;
        for (id, node) in self.iter() {
            writeln!(f, "  {:?}: {:?}", id, node)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operators::SliceId;

    #[test]
    fn test_add_and_access() {
        let mut g = Graph::new();
        let a = g.const_int(5);
        let b = g.const_int(3);
        let sum = g.int_op(ArithOp::Add, a, b, ValueType::I64);

        assert_eq!(g.node(sum).inputs.len(), 2);
        assert_eq!(g.node(sum).input(0), Some(a));
        assert_eq!(g.node(a).as_int(), Some(5));
    }

    #[test]
    fn test_use_chains() {
        let mut g = Graph::new();
        let c = g.const_int(1);
        let _x = g.int_op(ArithOp::Add, c, c, ValueType::I64);
        let _y = g.int_op(ArithOp::Mul, c, c, ValueType::I64);

        assert_eq!(g.use_count(c), 4);
    }

    #[test]
    fn test_replace_input() {
        let mut g = Graph::new();
        let a = g.const_int(1);
        let b = g.const_int(2);
        let sum = g.int_op(ArithOp::Add, a, a, ValueType::I64);

        g.replace_input(sum, 1, b);
        assert_eq!(g.node(sum).input(1), Some(b));
        assert_eq!(g.use_count(a), 1);
        assert!(g.uses(b).contains(&sum));
    }

    #[test]
    fn test_replace_all_uses() {
        let mut g = Graph::new();
        let a = g.const_int(1);
        let b = g.const_int(2);
        let sum = g.int_op(ArithOp::Add, a, a, ValueType::I64);

        g.replace_all_uses(a, b);
        assert_eq!(g.node(sum).input(0), Some(b));
        assert_eq!(g.node(sum).input(1), Some(b));
        assert_eq!(g.use_count(a), 0);
    }

    #[test]
    fn test_kill() {
        let mut g = Graph::new();
        let a = g.const_int(1);
        let sum = g.int_op(ArithOp::Add, a, a, ValueType::I64);

        g.kill(sum);
        assert!(g.node(sum).is_dead());
        assert_eq!(g.use_count(a), 0);
    }

    #[test]
    fn test_memory_nodes() {
        let mut g = Graph::new();
        let base = g.parameter(0, ValueType::Ptr);
        let mem = MemRef::new(base, SliceId(0), 0, 4, 4);
        let ld = g.load(mem, ValueType::I32);
        let st = g.store(MemRef::new(base, SliceId(0), 4, 4, 4), ld);

        assert!(g.node(ld).op.is_load());
        assert!(g.node(st).op.is_store());
        assert_eq!(g.node(st).input(1), Some(ld));
        assert!(g.uses(ld).contains(&st));
    }

    #[test]
    fn test_verify() {
        let mut g = Graph::new();
        let a = g.const_int(1);
        let _ = g.int_op(ArithOp::Add, a, a, ValueType::I64);
        assert!(g.verify().is_ok());
    }
}
