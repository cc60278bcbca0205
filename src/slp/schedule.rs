//! Per-slice memory scheduling.
//!
//! Before emission, every memory slice touched by a pack gets a new linear
//! order in which pack members are contiguous and appear in lane order,
//! while every dependence-graph edge inside the slice still points forward.
//! Packs are contracted to atomic super-nodes and the contracted graph is
//! topologically sorted; a cycle means no such order exists, in which case
//! the slice's packs are dropped. If a dropped pack was feeding or fed by a
//! surviving pack, the rewrite the pipeline committed to is broken and the
//! whole pass aborts instead.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::ir::node::NodeId;
use crate::ir::operators::SliceId;

use super::{SliceSchedules, SuperWord, VectorizeError};

impl SuperWord<'_> {
    /// Compute the per-slice memory order for every slice with at least one
    /// packed operation.
    pub(crate) fn schedule(&mut self) -> Result<SliceSchedules, VectorizeError> {
        let slices = self.packed_slices();

        let mut failed: Vec<usize> = Vec::new();
        let mut schedules = Vec::new();
        for (idx, (slice, ops)) in slices.iter().enumerate() {
            match self.schedule_slice(ops) {
                Some(order) => {
                    if self.config.trace.schedule {
                        log::trace!("slp: slice {:?} scheduled, {} ops", slice, order.len());
                    }
                    schedules.push((*slice, order));
                }
                None => failed.push(idx),
            }
        }
        if failed.is_empty() {
            return Ok(schedules);
        }

        // Drop every pack touching a failed slice.
        let mut dropped: FxHashSet<usize> = FxHashSet::default();
        for &fi in &failed {
            for &op in &slices[fi].1 {
                if let Some(pi) = self.my_pack(op) {
                    dropped.insert(pi as usize);
                }
            }
        }
        if dropped.is_empty() {
            return Err(VectorizeError::ScheduleFailed);
        }
        if self.config.trace.schedule {
            log::trace!("slp: dropping {} packs in unschedulable slices", dropped.len());
        }

        // A survivor wired to a dropped pack was counting on vector
        // operands or vector consumers that no longer exist; the committed
        // pack set cannot be honored, so nothing is applied.
        for pi in 0..self.packset.len() {
            if dropped.contains(&pi) {
                continue;
            }
            let p = self.packset.get(pi);
            for &m in &p.members {
                for input in self.graph.node(m).inputs.iter() {
                    if let Some(qi) = self.my_pack(input) {
                        if dropped.contains(&(qi as usize)) {
                            return Err(VectorizeError::ScheduleFailed);
                        }
                    }
                }
                for &u in self.graph.uses(m) {
                    if let Some(qi) = self.my_pack(u) {
                        if dropped.contains(&(qi as usize)) {
                            return Err(VectorizeError::ScheduleFailed);
                        }
                    }
                }
            }
        }

        // Remove the dropped packs and schedule what remains.
        let packs = self.packset.take_packs();
        let kept: Vec<_> = packs
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !dropped.contains(i))
            .map(|(_, p)| p)
            .collect();
        self.packset.set_packs(kept);
        self.construct_my_pack_map();
        if self.packset.is_empty() {
            return Err(VectorizeError::ScheduleFailed);
        }

        let mut schedules = Vec::new();
        for (slice, ops) in self.packed_slices() {
            match self.schedule_slice(&ops) {
                Some(order) => schedules.push((slice, order)),
                None => return Err(VectorizeError::ScheduleFailed),
            }
        }
        Ok(schedules)
    }

    /// Memory slices containing at least one packed operation, each with
    /// its operations in block order.
    fn packed_slices(&self) -> Vec<(SliceId, Vec<NodeId>)> {
        let mut slices: Vec<(SliceId, Vec<NodeId>)> = Vec::new();
        for &n in self.block.nodes() {
            if let Some(mem) = self.graph.node(n).op.mem_ref() {
                match slices.binary_search_by_key(&mem.slice, |&(s, _)| s) {
                    Ok(i) => slices[i].1.push(n),
                    Err(i) => slices.insert(i, (mem.slice, vec![n])),
                }
            }
        }
        slices.retain(|(_, ops)| ops.iter().any(|&n| self.my_pack(n).is_some()));
        slices
    }

    /// One slice: contract packs to super-nodes, topologically sort over
    /// the slice's dependence edges, and expand back to operations.
    /// Returns `None` when the contracted graph has a cycle.
    pub(crate) fn schedule_slice(&self, ops: &[NodeId]) -> Option<Vec<NodeId>> {
        let mut supers: Vec<SmallVec<[NodeId; 8]>> = Vec::new();
        let mut super_of: FxHashMap<NodeId, usize> = FxHashMap::default();
        let mut pack_super: FxHashMap<u32, usize> = FxHashMap::default();
        for &op in ops {
            if let Some(pi) = self.my_pack(op) {
                let s = *pack_super.entry(pi).or_insert_with(|| {
                    supers.push(
                        self.packset
                            .get(pi as usize)
                            .members
                            .iter()
                            .copied()
                            .collect(),
                    );
                    supers.len() - 1
                });
                super_of.insert(op, s);
            } else {
                supers.push(SmallVec::from_slice(&[op]));
                super_of.insert(op, supers.len() - 1);
            }
        }

        let n = supers.len();
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut indeg = vec![0usize; n];
        for &op in ops {
            let a = super_of[&op];
            for succ in self.dg.dep_succs(op) {
                if let Some(&b) = super_of.get(&succ) {
                    if a != b {
                        adj[a].push(b);
                        indeg[b] += 1;
                    }
                }
            }
        }

        // Kahn's algorithm; always taking the lowest-numbered ready
        // super-node keeps the result stable and close to block order.
        let mut done = vec![false; n];
        let mut out = Vec::with_capacity(ops.len());
        let mut emitted = 0;
        while let Some(s) = (0..n).find(|&s| !done[s] && indeg[s] == 0) {
            done[s] = true;
            emitted += 1;
            out.extend(supers[s].iter().copied());
            for &b in &adj[s] {
                indeg[b] -= 1;
            }
        }
        if emitted < n {
            return None;
        }
        Some(out)
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

    /// Unrolled copy loop `a[i] = b[i]` with the arrays in one slice.
    fn copy_loop(g: &mut Graph) -> (VLoop, Vec<NodeId>, Vec<NodeId>) {
        let base_a = g.parameter(0, ValueType::Ptr);
        let base_b = g.parameter(1, ValueType::Ptr);
        let iv = g.parameter(2, ValueType::I64);
        let mut body = Vec::new();
        let (mut lds, mut sts) = (vec![], vec![]);
        for k in 0..4 {
            let off = 4 * k;
            let ld = g.load(MemRef::new(base_b, SliceId(0), off, 4, 4), ValueType::I32);
            let st = g.store(MemRef::new(base_a, SliceId(0), off, 4, 4), ld);
            body.extend([ld, st]);
            lds.push(ld);
            sts.push(st);
        }
        (VLoop::new(body, iv, 4), lds, sts)
    }

    #[test]
    fn test_schedule_groups_pack_members() {
        let mut g = Graph::new();
        // Runtime alias checks keep the cross-base load/store pairs out of
        // the dependence graph, so both packs can schedule.
        let (vloop, lds, sts) = copy_loop(&mut g);
        let config = SlpConfig {
            runtime_alias_checks: true,
            ..SlpConfig::avx2()
        };
        let mut sw = SuperWord::new(&mut g, &vloop, &config);
        sw.construct_block().unwrap();
        sw.build_dependence_graph();
        sw.compute_max_depth();
        sw.find_adjacent_refs().unwrap();
        sw.extend_packlist();
        sw.combine_packs();
        sw.construct_my_pack_map();
        sw.filter_packs().unwrap();
        sw.compute_vector_element_type().unwrap();

        let schedules = sw.schedule().unwrap();
        assert_eq!(schedules.len(), 1);
        let (_, order) = &schedules[0];
        assert_eq!(order.len(), 8);

        // Pack members are contiguous and in lane order.
        let pos = |n: NodeId| order.iter().position(|&x| x == n).unwrap();
        for w in lds.windows(2) {
            assert_eq!(pos(w[1]), pos(w[0]) + 1);
        }
        for w in sts.windows(2) {
            assert_eq!(pos(w[1]), pos(w[0]) + 1);
        }

        // The order respects every dependence edge inside the slice.
        for &op in order.iter() {
            for succ in sw.dg.dep_succs(op) {
                if let Some(p) = order.iter().position(|&x| x == succ) {
                    assert!(pos(op) < p, "dependence violated in schedule");
                }
            }
        }
    }

    #[test]
    fn test_schedule_slice_detects_cycle() {
        let mut g = Graph::new();
        let base = g.parameter(0, ValueType::Ptr);
        let iv = g.parameter(1, ValueType::I64);
        // Two loads with an aliasing store wedged between them.
        let ld0 = g.load(MemRef::new(base, SliceId(0), 0, 4, 4), ValueType::I32);
        let add = g.int_op(ArithOp::Add, ld0, ld0, ValueType::I32);
        let st = g.store(MemRef::opaque(base, SliceId(0), 4), add);
        let ld1 = g.load(MemRef::new(base, SliceId(0), 4, 4, 4), ValueType::I32);

        let vloop = VLoop::new(vec![ld0, add, st, ld1], iv, 4);
        let config = SlpConfig::avx2();
        let mut sw = SuperWord::new(&mut g, &vloop, &config);
        sw.construct_block().unwrap();
        sw.build_dependence_graph();
        sw.compute_max_depth();

        // Force-pack the two loads around the store. This pair would never
        // pass `stmts_can_pack` (the store sits on a path between them);
        // it exists only to drive the scheduler's cycle detection.
        sw.packset.push_pair(ld0, ld1, false, false);
        sw.construct_my_pack_map();

        assert!(sw.schedule_slice(&[ld0, st, ld1]).is_none());
    }
}
