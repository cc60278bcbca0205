//! Vector code emission.
//!
//! The final pack set is turned into graph rewrites, packs in increasing
//! block order so that operand packs are always materialized before their
//! consumers. For every pack one vector operation is created; operands are
//! taken from an operand pack's vector when the lanes line up, broadcast
//! when all lanes share one scalar, and otherwise assembled with a
//! broadcast-plus-insert chain. Consumers that stay scalar read their lane
//! through an extract. A packed memory operation carries the union of its
//! members' control dependencies.
//!
//! Emission is the only stage that mutates the graph; every check that can
//! reject a pack has already run, so the rewrite commits in full.

use rustc_hash::FxHashMap;

use crate::ir::node::{InputList, NodeFlags, NodeId};
use crate::ir::operators::{ConvertKind, Operator, ReduceKind, VectorShape};
use crate::ir::types::ValueType;

use super::align::Alignment;
use super::packset::Pack;
use super::{RewriteSummary, SliceSchedules, SuperWord};

/// Extracts already created for retired scalars, keyed by the scalar.
type ExtractCache = FxHashMap<NodeId, NodeId>;

impl SuperWord<'_> {
    /// Replace every pack with one vector operation and retire the packed
    /// scalars.
    pub(crate) fn emit(&mut self, schedules: SliceSchedules) -> RewriteSummary {
        let packs: Vec<Pack> = self.packset.iter().cloned().collect();
        let mut order: Vec<usize> = (0..packs.len()).collect();
        order.sort_by_key(|&i| self.pos(packs[i].first()).unwrap_or(usize::MAX));

        let mut vec_of_pack: FxHashMap<u32, NodeId> = FxHashMap::default();
        let mut cache: ExtractCache = ExtractCache::default();
        let mut vector_nodes: Vec<NodeId> = Vec::new();

        for &pi in &order {
            let p = &packs[pi];
            let vnode = self.emit_pack(pi as u32, p, &packs, &vec_of_pack, &mut cache);
            vec_of_pack.insert(pi as u32, vnode);
            vector_nodes.push(vnode);
        }

        // Rewire remaining scalar consumers through extracts, then retire
        // the packed scalars.
        for &pi in &order {
            let p = &packs[pi];
            let v = vec_of_pack[&(pi as u32)];
            if p.reduction {
                // Only the chain's final value is observable; it now comes
                // out of the horizontal combine.
                self.graph.replace_all_uses(p.last(), v);
                for &m in &p.members {
                    self.graph.kill(m);
                    self.stats.scalar_ops_eliminated += 1;
                }
                continue;
            }
            let shape = self.pack_shape(p);
            for (lane, &m) in p.members.iter().enumerate() {
                let users: Vec<NodeId> = self.graph.uses(m).to_vec();
                for u in users {
                    if self.my_pack(u).is_some() {
                        // Vector consumers were wired during emission.
                        continue;
                    }
                    let e = self.extract_for(m, shape, lane as u8, v, &mut cache);
                    let positions: Vec<usize> = self
                        .graph
                        .node(u)
                        .inputs
                        .iter()
                        .enumerate()
                        .filter(|&(_, x)| x == m)
                        .map(|(i, _)| i)
                        .collect();
                    for i in positions {
                        self.graph.replace_input(u, i, e);
                    }
                }
                self.graph.kill(m);
                self.stats.scalar_ops_eliminated += 1;
            }
        }

        self.stats.packs_emitted = packs.len();
        RewriteSummary {
            vector_nodes,
            schedules,
            align_to_ref: self.align_to_ref,
            iv_adjustment: self.iv_adjustment,
            disjoint_pairs: std::mem::take(&mut self.disjoint_ptrs),
            stats: self.stats.clone(),
        }
    }

    fn pack_shape(&self, p: &Pack) -> VectorShape {
        VectorShape::new(self.velt(p.first()), p.len() as u8)
    }

    /// Create the vector operation for one pack.
    fn emit_pack(
        &mut self,
        _pi: u32,
        p: &Pack,
        packs: &[Pack],
        vec_of_pack: &FxHashMap<u32, NodeId>,
        cache: &mut ExtractCache,
    ) -> NodeId {
        let first = p.first();
        let op = self.graph.node(first).op;
        let velt = self.velt(first);
        let shape = VectorShape::new(velt, p.len() as u8);

        if p.reduction {
            return self.emit_reduction(p, shape, packs, vec_of_pack, cache);
        }

        let vnode = match op {
            Operator::Load(mem) => {
                let aligned = self.alignment_of(first) == Alignment::Offset(0);
                self.new_vector_node(
                    Operator::VectorLoad(shape, mem, aligned),
                    InputList::Single(mem.base),
                    velt,
                )
            }
            Operator::Store(mem) => {
                let value = self.vector_operand(p, 1, shape, packs, vec_of_pack, cache);
                let aligned = self.alignment_of(first) == Alignment::Offset(0);
                self.new_vector_node(
                    Operator::VectorStore(shape, mem, aligned),
                    InputList::Pair(mem.base, value),
                    ValueType::Void,
                )
            }
            Operator::IntOp(a) | Operator::FloatOp(a) => {
                let inputs = self.gather_inputs(p, op.arity(), shape, packs, vec_of_pack, cache);
                self.new_vector_node(Operator::VectorArith(shape, a), inputs, velt)
            }
            Operator::Bitwise(b) => {
                let inputs = self.gather_inputs(p, 2, shape, packs, vec_of_pack, cache);
                self.new_vector_node(Operator::VectorBitwise(shape, b), inputs, velt)
            }
            Operator::IntCmp(c) | Operator::FloatCmp(c) => {
                let inputs = self.gather_inputs(p, 2, shape, packs, vec_of_pack, cache);
                self.new_vector_node(Operator::VectorCmp(shape, c), inputs, ValueType::Bool)
            }
            Operator::Select => {
                let inputs = self.gather_inputs(p, 3, shape, packs, vec_of_pack, cache);
                self.new_vector_node(Operator::VectorBlend(shape), inputs, velt)
            }
            Operator::Convert(k) => {
                let inputs = self.gather_inputs(p, 1, shape, packs, vec_of_pack, cache);
                self.new_vector_node(Operator::VectorConvert(shape, k), inputs, velt)
            }
            _ => unreachable!("unimplementable packs are filtered before emission"),
        };

        // A packed memory access executes under the union of its members'
        // control dependencies.
        if op.is_memory()
            && p.members
                .iter()
                .any(|&m| self.graph.node(m).is_control_dependent())
        {
            self.graph.set_flag(vnode, NodeFlags::CONTROL_DEP);
        }
        vnode
    }

    /// Marked accumulation chain: lane partials gathered into one vector,
    /// folded into the incoming accumulator by a horizontal combine. The
    /// result equals the sequential chain's final value for any
    /// associative/commutative reassociation.
    fn emit_reduction(
        &mut self,
        p: &Pack,
        shape: VectorShape,
        packs: &[Pack],
        vec_of_pack: &FxHashMap<u32, NodeId>,
        cache: &mut ExtractCache,
    ) -> NodeId {
        let kind = match self.graph.node(p.first()).op {
            Operator::IntOp(a) | Operator::FloatOp(a) => {
                ReduceKind::of_arith(a).expect("filtered to associative kinds")
            }
            _ => unreachable!("reduction packs are arithmetic"),
        };
        let (acc, xs) = self.reduction_lanes(p);
        let vxs = self.materialize_vector(&xs, shape, packs, vec_of_pack, cache);
        let acc = self.lane_value(acc, packs, vec_of_pack, cache);
        self.new_vector_node(
            Operator::VectorReduce(shape, kind),
            InputList::Pair(acc, vxs),
            shape.element,
        )
    }

    // =========================================================================
    // Operand Materialization
    // =========================================================================

    /// Gather all operand positions of a pack into vector inputs.
    fn gather_inputs(
        &mut self,
        p: &Pack,
        arity: usize,
        shape: VectorShape,
        packs: &[Pack],
        vec_of_pack: &FxHashMap<u32, NodeId>,
        cache: &mut ExtractCache,
    ) -> InputList {
        let mut inputs: Vec<NodeId> = Vec::with_capacity(arity);
        for j in 0..arity {
            inputs.push(self.vector_operand(p, j, shape, packs, vec_of_pack, cache));
        }
        InputList::from_slice(&inputs)
    }

    /// The vector value for operand position `j` of a pack.
    fn vector_operand(
        &mut self,
        p: &Pack,
        j: usize,
        shape: VectorShape,
        packs: &[Pack],
        vec_of_pack: &FxHashMap<u32, NodeId>,
        cache: &mut ExtractCache,
    ) -> NodeId {
        let xs = self.operand_lanes(p, j);
        self.materialize_vector(&xs, shape, packs, vec_of_pack, cache)
    }

    /// Produce a vector holding exactly these lane values.
    fn materialize_vector(
        &mut self,
        xs: &[NodeId],
        shape: VectorShape,
        packs: &[Pack],
        vec_of_pack: &FxHashMap<u32, NodeId>,
        cache: &mut ExtractCache,
    ) -> NodeId {
        debug_assert!(!xs.is_empty());

        // All lanes share one scalar: broadcast it.
        if xs.iter().all(|&x| x == xs[0]) {
            let x = self.lane_value(xs[0], packs, vec_of_pack, cache);
            return self.new_vector_node(
                Operator::VectorBroadcast(shape),
                InputList::Single(x),
                shape.element,
            );
        }

        // The lanes are exactly another pack: reuse its vector, converting
        // lane width if the chains resolved to different element types.
        if let Some(pi) = self.my_pack(xs[0]) {
            let q = &packs[pi as usize];
            if q.members.as_slice() == xs {
                let v = vec_of_pack[&pi];
                let qvelt = self.velt(xs[0]);
                if qvelt == shape.element {
                    return v;
                }
                if qvelt.same_class(shape.element) {
                    let kind = convert_kind(qvelt, shape.element);
                    return self.new_vector_node(
                        Operator::VectorConvert(shape, kind),
                        InputList::Single(v),
                        shape.element,
                    );
                }
            }
        }

        // Mixed lanes: broadcast the first, insert the rest.
        let x0 = self.lane_value(xs[0], packs, vec_of_pack, cache);
        let mut v = self.new_vector_node(
            Operator::VectorBroadcast(shape),
            InputList::Single(x0),
            shape.element,
        );
        for (lane, &x) in xs.iter().enumerate().skip(1) {
            let x = self.lane_value(x, packs, vec_of_pack, cache);
            v = self.new_vector_node(
                Operator::VectorInsert(shape, lane as u8),
                InputList::Pair(v, x),
                shape.element,
            );
        }
        v
    }

    /// A scalar value usable after emission: packed scalars are read out of
    /// their pack's vector through a (shared) extract.
    fn lane_value(
        &mut self,
        x: NodeId,
        packs: &[Pack],
        vec_of_pack: &FxHashMap<u32, NodeId>,
        cache: &mut ExtractCache,
    ) -> NodeId {
        let Some(pi) = self.my_pack(x) else { return x };
        let q = &packs[pi as usize];
        let lane = q.lane_of(x).expect("member of its own pack");
        let v = *vec_of_pack
            .get(&pi)
            .expect("operand pack emitted before its consumer");
        let shape = self.pack_shape(q);
        self.extract_for(x, shape, lane as u8, v, cache)
    }

    /// Shared lane extract for a retired scalar.
    fn extract_for(
        &mut self,
        m: NodeId,
        shape: VectorShape,
        lane: u8,
        vector: NodeId,
        cache: &mut ExtractCache,
    ) -> NodeId {
        if let Some(&e) = cache.get(&m) {
            return e;
        }
        let ty = self.graph.node(m).ty;
        let e = self.new_vector_node(
            Operator::VectorExtract(shape, lane),
            InputList::Single(vector),
            ty,
        );
        self.stats.extracts_inserted += 1;
        cache.insert(m, e);
        e
    }

    fn new_vector_node(&mut self, op: Operator, inputs: InputList, ty: ValueType) -> NodeId {
        self.stats.vector_ops_created += 1;
        self.graph.add_node(op, inputs, ty)
    }
}

/// The width conversion between two resolved element types of one class.
fn convert_kind(from: ValueType, to: ValueType) -> ConvertKind {
    if from.is_float() {
        if to.byte_size() < from.byte_size() {
            ConvertKind::FpTrunc
        } else {
            ConvertKind::FpExtend
        }
    } else if to.byte_size() < from.byte_size() {
        ConvertKind::Trunc
    } else {
        ConvertKind::SignExtend
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
    use crate::slp::{SlpConfig, SuperWord, VLoop};

    #[test]
    fn test_convert_kind() {
        assert_eq!(convert_kind(ValueType::I32, ValueType::I16), ConvertKind::Trunc);
        assert_eq!(
            convert_kind(ValueType::I16, ValueType::I64),
            ConvertKind::SignExtend
        );
        assert_eq!(convert_kind(ValueType::F64, ValueType::F32), ConvertKind::FpTrunc);
        assert_eq!(convert_kind(ValueType::F32, ValueType::F64), ConvertKind::FpExtend);
    }

    #[test]
    fn test_emit_copy_loop() {
        let mut g = Graph::new();
        let base_a = g.parameter(0, ValueType::Ptr);
        let base_b = g.parameter(1, ValueType::Ptr);
        let iv = g.parameter(2, ValueType::I64);
        let mut body = Vec::new();
        let (mut lds, mut sts) = (vec![], vec![]);
        for k in 0..4 {
            let off = 4 * k;
            let ld = g.load(MemRef::new(base_b, SliceId(1), off, 4, 4), ValueType::I32);
            let st = g.store(MemRef::new(base_a, SliceId(0), off, 4, 4), ld);
            body.extend([ld, st]);
            lds.push(ld);
            sts.push(st);
        }
        let vloop = VLoop::new(body, iv, 4);
        let config = SlpConfig::avx2();
        let sw = SuperWord::new(&mut g, &vloop, &config);
        let summary = sw.run().unwrap();

        // One vector load and one vector store.
        assert_eq!(summary.vector_nodes.len(), 2);
        let vload = summary.vector_nodes[0];
        let vstore = summary.vector_nodes[1];
        assert!(matches!(g.node(vload).op, Operator::VectorLoad(s, _, true) if s.lanes == 4));
        assert!(matches!(g.node(vstore).op, Operator::VectorStore(s, _, true) if s.lanes == 4));
        // The store consumes the load's vector directly.
        assert_eq!(g.node(vstore).input(1), Some(vload));
        // All scalar memory operations are retired.
        for &n in lds.iter().chain(sts.iter()) {
            assert!(g.node(n).is_dead());
        }
        assert_eq!(summary.stats.scalar_ops_eliminated, 8);
        assert_eq!(summary.stats.extracts_inserted, 0);
    }

    #[test]
    fn test_emit_extract_for_scalar_consumer() {
        let mut g = Graph::new();
        let base_a = g.parameter(0, ValueType::Ptr);
        let base_b = g.parameter(1, ValueType::Ptr);
        let iv = g.parameter(2, ValueType::I64);
        let mut body = Vec::new();
        let mut lds = vec![];
        for k in 0..4 {
            let off = 4 * k;
            let ld = g.load(MemRef::new(base_b, SliceId(1), off, 4, 4), ValueType::I32);
            let st = g.store(MemRef::new(base_a, SliceId(0), off, 4, 4), ld);
            body.extend([ld, st]);
            lds.push(ld);
        }
        // An extra consumer outside any pack forces a lane extract.
        let extra = g.int_op(ArithOp::Add, lds[2], lds[2], ValueType::I32);

        let vloop = VLoop::new(body, iv, 4);
        let config = SlpConfig::avx2();
        let sw = SuperWord::new(&mut g, &vloop, &config);
        let summary = sw.run().unwrap();

        assert_eq!(summary.stats.extracts_inserted, 1);
        let e = g.node(extra).input(0).unwrap();
        assert!(matches!(g.node(e).op, Operator::VectorExtract(_, 2)));
        assert_eq!(g.node(extra).input(1), Some(e));
    }
}
