//! Pack discovery, extension, combination and filtering.
//!
//! A pack is an ordered group of isomorphic, pairwise independent operations
//! slated for fusion into one vector operation. The pack set is grown in
//! four phases:
//!
//! 1. **Seed**: pairs of adjacent, alignment-compatible memory references,
//!    anchored by the alignment analyzer's chosen reference
//! 2. **Extend**: follow use-def edges (operands of packed operations) and
//!    def-use edges (consumers of packed operations) to a fixed point
//! 3. **Combine**: merge packs sharing a boundary element into longer packs,
//!    then cap them at the target vector width
//! 4. **Filter**: drop packs with no vector form or negative modeled savings
//!
//! Accumulation chains the framework marked as reductions are packed through
//! the same pipeline; they are exempt from pairwise independence (the chain
//! is a data path by definition) and carry a flag the emitter uses to
//! produce a horizontal combine instead of independent lanes.

use smallvec::SmallVec;

use rustc_hash::FxHashSet;

use crate::ir::node::NodeId;
use crate::ir::operators::{Operator, ReduceKind};
use crate::ir::types::ValueType;

use super::align::Alignment;
use super::{SuperWord, VectorizeError};

// =============================================================================
// Pack
// =============================================================================

/// An ordered group of 2..W operations fused into one vector operation.
///
/// Element *i* always precedes element *i+1* in block order. `swapped[i]`
/// records that lane *i* of a commutative operation consumes its packed
/// operand at the mirrored position.
#[derive(Debug, Clone, PartialEq)]
pub struct Pack {
    /// Members in lane order (equal to block order).
    pub members: SmallVec<[NodeId; 8]>,
    /// Operand orientation per lane.
    pub swapped: SmallVec<[bool; 8]>,
    /// Whether this pack is a marked accumulation chain.
    pub reduction: bool,
}

impl Pack {
    /// Create a two-element pack.
    pub fn pair(s1: NodeId, s2: NodeId, swapped: bool, reduction: bool) -> Self {
        Pack {
            members: SmallVec::from_slice(&[s1, s2]),
            swapped: SmallVec::from_slice(&[false, swapped]),
            reduction,
        }
    }

    /// Number of lanes.
    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the pack is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// First member.
    #[inline]
    pub fn first(&self) -> NodeId {
        self.members[0]
    }

    /// Last member.
    #[inline]
    pub fn last(&self) -> NodeId {
        *self.members.last().expect("pack is never empty")
    }

    /// Check if a node is a member.
    pub fn contains(&self, n: NodeId) -> bool {
        self.members.contains(&n)
    }

    /// Lane of a member.
    pub fn lane_of(&self, n: NodeId) -> Option<usize> {
        self.members.iter().position(|&m| m == n)
    }
}

// =============================================================================
// PackSet
// =============================================================================

/// The working collection of packs for one pass.
#[derive(Debug, Clone, Default)]
pub struct PackSet {
    packs: Vec<Pack>,
    /// Nodes currently the left element of a pair.
    left: FxHashSet<NodeId>,
    /// Nodes currently the right element of a pair.
    right: FxHashSet<NodeId>,
    /// All pairs, for `in_packset` queries during extension.
    pairs: FxHashSet<(NodeId, NodeId)>,
}

impl PackSet {
    /// Number of packs.
    #[inline]
    pub fn len(&self) -> usize {
        self.packs.len()
    }

    /// Check if there are no packs.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }

    /// Pack by index.
    #[inline]
    pub fn get(&self, i: usize) -> &Pack {
        &self.packs[i]
    }

    /// Iterate over packs.
    pub fn iter(&self) -> impl Iterator<Item = &Pack> {
        self.packs.iter()
    }

    /// Append a pair pack.
    pub fn push_pair(&mut self, s1: NodeId, s2: NodeId, swapped: bool, reduction: bool) {
        self.left.insert(s1);
        self.right.insert(s2);
        self.pairs.insert((s1, s2));
        self.packs.push(Pack::pair(s1, s2, swapped, reduction));
    }

    /// Does `s` already sit at the left position of some pair?
    #[inline]
    pub fn is_left(&self, s: NodeId) -> bool {
        self.left.contains(&s)
    }

    /// Does `s` already sit at the right position of some pair?
    #[inline]
    pub fn is_right(&self, s: NodeId) -> bool {
        self.right.contains(&s)
    }

    /// Is the ordered pair (s1, s2) in the pack set?
    #[inline]
    pub fn in_packset(&self, s1: NodeId, s2: NodeId) -> bool {
        self.pairs.contains(&(s1, s2))
    }

    /// Take the pack list, leaving the set empty.
    pub fn take_packs(&mut self) -> Vec<Pack> {
        std::mem::take(&mut self.packs)
    }

    /// Replace the pack list.
    pub fn set_packs(&mut self, packs: Vec<Pack>) {
        self.packs = packs;
    }

    /// Remove the pack at an index, preserving the order of the rest.
    pub fn remove(&mut self, i: usize) {
        self.packs.remove(i);
    }
}

// =============================================================================
// Pairwise Predicates
// =============================================================================

fn align_ok(existing: Alignment, expected: Alignment) -> bool {
    match (existing, expected) {
        (Alignment::Conflicting, _) | (_, Alignment::Conflicting) => false,
        (Alignment::Unconstrained, _) | (_, Alignment::Unconstrained) => true,
        (Alignment::Offset(a), Alignment::Offset(b)) => a == b,
    }
}

pub(crate) fn prev_pow2(n: usize) -> usize {
    debug_assert!(n >= 1);
    1 << (usize::BITS - 1 - n.leading_zeros())
}

impl SuperWord<'_> {
    /// Are s1 and s2 structurally identical: same operation kind, same
    /// arity, same result type?
    ///
    /// Conversions additionally agree on their source width, and
    /// conditional moves on the shape of their condition.
    pub(crate) fn isomorphic(&self, s1: NodeId, s2: NodeId) -> bool {
        let n1 = self.graph.node(s1);
        let n2 = self.graph.node(s2);
        if !n1.op.same_kind(&n2.op) {
            return false;
        }
        if n1.inputs.len() != n2.inputs.len() {
            return false;
        }
        if n1.ty != n2.ty {
            return false;
        }
        match n1.op {
            Operator::Convert(_) => {
                let (Some(a), Some(b)) = (n1.input(0), n2.input(0)) else {
                    return false;
                };
                self.graph.node(a).ty == self.graph.node(b).ty
            }
            Operator::Select => {
                let (Some(c1), Some(c2)) = (n1.input(0), n2.input(0)) else {
                    return false;
                };
                self.graph.node(c1).op.same_kind(&self.graph.node(c2).op)
            }
            _ => true,
        }
    }

    /// Is there a data path s1 -> s2 representing a marked accumulation
    /// step? Such pairs may pack despite not being independent.
    pub(crate) fn reduction(&self, s1: NodeId, s2: NodeId) -> bool {
        self.is_marked_reduction(s1)
            && self.is_marked_reduction(s2)
            && self.depth_of(s1) + 1 == self.depth_of(s2)
            && self.graph.uses(s1).contains(&s2)
    }

    /// Can s1 and s2 form a pack with s1 immediately preceding s2 and s1
    /// aligned at `align`?
    pub(crate) fn stmts_can_pack(&self, s1: NodeId, s2: NodeId, align: Alignment) -> bool {
        let (Some(p1), Some(p2)) = (self.pos(s1), self.pos(s2)) else {
            return false;
        };
        if p1 >= p2 {
            return false;
        }
        if !self.isomorphic(s1, s2) {
            return false;
        }
        if !(self.independent(s1, s2) || self.reduction(s1, s2)) {
            return false;
        }
        if self.packset.is_left(s1) || self.packset.is_right(s2) {
            return false;
        }
        if let Some(mem) = self.graph.node(s1).op.mem_ref().copied() {
            if !self.are_adjacent_refs(s1, s2) {
                return false;
            }
            let vw = self.vw_bytes(&mem);
            let expected2 = match align {
                Alignment::Offset(o) => {
                    Alignment::Offset((o + i32::from(mem.size)).rem_euclid(vw))
                }
                other => other,
            };
            align_ok(self.alignment_of(s1), align) && align_ok(self.alignment_of(s2), expected2)
        } else {
            true
        }
    }

    /// Record the alignment a pair inherits from the pack it extends.
    fn set_alignment_pair(&mut self, s1: NodeId, s2: NodeId, align: Alignment) {
        if let Alignment::Offset(o) = align {
            let size = self.graph.node(s1).ty.byte_size() as i32;
            self.set_alignment(s1, Alignment::Offset(o));
            self.set_alignment(s2, Alignment::Offset(o + size));
        }
    }

    /// Provisional lane element type of a node, before full type
    /// resolution: the stored element type for stores, the access type for
    /// loads, the compared operand type for comparisons, the result type
    /// otherwise.
    pub(crate) fn provisional_velt(&self, n: NodeId) -> ValueType {
        let node = self.graph.node(n);
        match node.op {
            Operator::Store(mem) => {
                let vty = node
                    .input(1)
                    .map(|v| self.graph.node(v).ty)
                    .unwrap_or(ValueType::Top);
                vty.with_size(mem.size as usize).unwrap_or(vty)
            }
            Operator::IntCmp(_) | Operator::FloatCmp(_) => node
                .input(0)
                .map(|v| self.graph.node(v).ty)
                .unwrap_or(node.ty),
            _ => node.ty,
        }
    }

    // =========================================================================
    // Savings Estimation
    // =========================================================================

    /// Estimate the saving from executing s1 and s2 as a pack: one
    /// instruction saved, adjusted for operands that would need packing and
    /// results that would need unpacking.
    pub(crate) fn est_savings(&self, s1: NodeId, s2: NodeId) -> i32 {
        let policy = &self.config.policy;

        // One vector instruction replaces two scalars.
        let mut save_in = 1;
        let in_count = self.graph.node(s1).inputs.len();
        for j in 0..in_count {
            let (Some(x1), Some(x2)) = (self.graph.node(s1).input(j), self.graph.node(s2).input(j))
            else {
                continue;
            };
            if x1 == x2 {
                continue;
            }
            if self.packset.in_packset(x1, x2) {
                save_in += policy.adjacent_profit;
            } else if self.in_block(x1) && self.in_block(x2) {
                save_in -= policy.pack_cost(2);
            }
        }

        // Uses covered by existing packs keep their results in registers;
        // everything else will need an extract.
        let mut ct = 0usize;
        let mut save_use = 0;
        for &u1 in self.graph.uses(s1) {
            for pack in self.packset.iter() {
                if pack.first() != u1 {
                    continue;
                }
                for &u2 in self.graph.uses(s2) {
                    if pack.last() == u2 {
                        ct += 1;
                        if self.are_adjacent_refs(u1, u2) {
                            save_use += policy.adjacent_profit;
                        }
                    }
                }
            }
        }
        if ct < self.graph.use_count(s1) {
            save_use -= policy.unpack_cost(1);
        }
        if ct < self.graph.use_count(s2) {
            save_use -= policy.unpack_cost(1);
        }

        save_in.max(save_use)
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    /// Seed the pack set with pairs of adjacent, alignment-compatible
    /// memory references.
    ///
    /// Anchors are tried in rounds: the best alignable reference among the
    /// remaining memory operations anchors a round, every reference
    /// comparable with it gets an alignment, and adjacent compatible pairs
    /// become seed packs. Under a strict-alignment target, rounds whose
    /// anchor cannot be proven mutually aligned with the primary anchor
    /// mark their references conflicting instead.
    pub(crate) fn find_adjacent_refs(&mut self) -> Result<(), VectorizeError> {
        let mut memops: Vec<NodeId> = self
            .block
            .nodes()
            .iter()
            .copied()
            .filter(|&n| self.graph.node(n).op.is_memory())
            .collect();
        if memops.is_empty() {
            return Err(VectorizeError::NotProfitable);
        }

        let mut primary: Option<crate::ir::operators::MemRef> = None;
        while !memops.is_empty() {
            let Some(anchor) = self.find_align_to_ref(&memops) else {
                break;
            };
            let anchor_mem = *self.graph.node(anchor).op.mem_ref().expect("memory op");
            let iv_adjustment = self.get_iv_adjustment(anchor);
            if self.config.trace.alignment {
                log::trace!(
                    "slp: anchor {:?}, iv adjustment {}",
                    anchor,
                    iv_adjustment
                );
            }

            let strict_violation = self.vectors_must_be_aligned()
                && primary.is_some_and(|p| !p.comparable(&anchor_mem));
            if primary.is_none() {
                primary = Some(anchor_mem);
                self.align_to_ref = Some(anchor);
                self.iv_adjustment = iv_adjustment;
            }

            let comparable: Vec<NodeId> = memops
                .iter()
                .copied()
                .filter(|&s| {
                    self.graph
                        .node(s)
                        .op
                        .mem_ref()
                        .expect("memory op")
                        .comparable(&anchor_mem)
                })
                .collect();

            for &s in &comparable {
                let a = if strict_violation {
                    Alignment::Conflicting
                } else {
                    self.memory_alignment(s, iv_adjustment)
                };
                self.set_alignment(s, a);
            }

            for &s1 in &comparable {
                let Alignment::Offset(a1) = self.alignment_of(s1) else {
                    continue;
                };
                for &s2 in &comparable {
                    if s1 == s2 || self.alignment_of(s2).offset().is_none() {
                        continue;
                    }
                    if self.are_adjacent_refs(s1, s2)
                        && self.stmts_can_pack(s1, s2, Alignment::Offset(a1))
                    {
                        if self.config.trace.adjacency {
                            log::trace!("slp: seed pair ({:?}, {:?})", s1, s2);
                        }
                        self.packset.push_pair(s1, s2, false, false);
                        self.stats.packs_seeded += 1;
                    }
                }
            }

            memops.retain(|s| !comparable.contains(s));
        }

        if self.packset.is_empty() {
            return Err(if self.align_to_ref.is_none() {
                VectorizeError::NoAlignableAnchor
            } else {
                VectorizeError::NotProfitable
            });
        }
        Ok(())
    }

    // =========================================================================
    // Extension
    // =========================================================================

    /// Extend the pack set along use-def and def-use chains until neither
    /// direction produces growth.
    pub(crate) fn extend_packlist(&mut self) {
        let mut changed = true;
        while changed {
            changed = false;
            let count = self.packset.len();
            for i in 0..count {
                let p = self.packset.get(i).clone();
                if p.len() != 2 {
                    continue;
                }
                if self.follow_use_defs(&p) {
                    changed = true;
                }
                if self.follow_def_uses(&p) {
                    changed = true;
                }
            }
        }
    }

    /// Pull a pack's operand definitions into a new pair when they pack.
    fn follow_use_defs(&mut self, p: &Pack) -> bool {
        let s1 = p.members[0];
        let s2 = p.members[1];
        let (is_load, is_store, in_count) = {
            let node = self.graph.node(s1);
            (node.op.is_load(), node.op.is_store(), node.inputs.len())
        };
        if is_load {
            return false;
        }
        let align = self.alignment_of(s1);
        // For stores only the stored value is followed; the address is part
        // of the descriptor.
        let (start, end) = if is_store { (1, 2) } else { (0, in_count) };

        let mut changed = false;
        for j in start..end {
            let (Some(t1), Some(t2)) = (self.graph.node(s1).input(j), self.graph.node(s2).input(j))
            else {
                continue;
            };
            if t1 == t2 || !self.in_block(t1) || !self.in_block(t2) {
                continue;
            }
            if self.stmts_can_pack(t1, t2, align) && self.est_savings(t1, t2) >= 0 {
                if self.config.trace.packs {
                    log::trace!("slp: use-def pair ({:?}, {:?})", t1, t2);
                }
                let reduction = self.reduction(t1, t2);
                self.packset.push_pair(t1, t2, false, reduction);
                self.set_alignment_pair(t1, t2, align);
                self.stats.packs_extended += 1;
                changed = true;
            }
        }
        changed
    }

    /// Extend a pack to one shared consumer pair, chosen by
    /// [`order_def_uses`] over all candidate use pairs.
    fn follow_def_uses(&mut self, p: &Pack) -> bool {
        let s1 = p.members[0];
        let s2 = p.members[1];
        if self.graph.node(s1).op.is_store() {
            return false;
        }
        let align = self.alignment_of(s1);

        let mut candidates: Vec<UseCandidate> = Vec::new();
        for &t1 in self.graph.uses(s1) {
            if !self.in_block(t1) {
                continue;
            }
            for &t2 in self.graph.uses(s2) {
                if t1 == t2 || !self.in_block(t2) {
                    continue;
                }
                let Some(swapped) = self.opnd_positions_match(s1, t1, s2, t2) else {
                    continue;
                };
                if self.stmts_can_pack(t1, t2, align) {
                    let savings = self.est_savings(t1, t2);
                    if savings >= 0 {
                        candidates.push(UseCandidate {
                            u1: t1,
                            u2: t2,
                            swapped,
                            savings,
                        });
                    }
                }
            }
        }

        let Some(best) = order_def_uses(&candidates) else {
            return false;
        };
        if self.config.trace.packs {
            log::trace!(
                "slp: def-use pair ({:?}, {:?}), swapped {}",
                best.u1,
                best.u2,
                best.swapped
            );
        }
        let reduction = self.reduction(best.u1, best.u2);
        self.packset.push_pair(best.u1, best.u2, best.swapped, reduction);
        self.set_alignment_pair(best.u1, best.u2, align);
        self.stats.packs_extended += 1;
        true
    }

    /// Do u1 and u2 consume d1 and d2 at reconcilable operand positions?
    ///
    /// Returns `Some(false)` for matching positions, `Some(true)` when a
    /// commutative operation can mirror its operands to match, `None`
    /// otherwise.
    fn opnd_positions_match(
        &self,
        d1: NodeId,
        u1: NodeId,
        d2: NodeId,
        u2: NodeId,
    ) -> Option<bool> {
        let pos1 = self.graph.node(u1).inputs.iter().position(|i| i == d1)?;
        let pos2 = self.graph.node(u2).inputs.iter().position(|i| i == d2)?;
        if pos1 == pos2 {
            return Some(false);
        }
        let commutative = match self.graph.node(u1).op {
            Operator::IntOp(a) | Operator::FloatOp(a) => a.is_commutative(),
            Operator::Bitwise(b) => matches!(
                b,
                crate::ir::operators::BitwiseOp::And
                    | crate::ir::operators::BitwiseOp::Or
                    | crate::ir::operators::BitwiseOp::Xor
            ),
            _ => false,
        };
        if commutative && pos1 < 2 && pos2 < 2 {
            Some(true)
        } else {
            None
        }
    }

    // =========================================================================
    // Combination
    // =========================================================================

    /// Merge packs where one's last element is another's first, repeating
    /// to a fixed point, then cap pack length at the vector width.
    pub(crate) fn combine_packs(&mut self) {
        let mut packs: Vec<Option<Pack>> =
            self.packset.take_packs().into_iter().map(Some).collect();

        let mut changed = true;
        while changed {
            changed = false;
            for i in 0..packs.len() {
                if packs[i].is_none() {
                    continue;
                }
                for j in 0..packs.len() {
                    if i == j || packs[j].is_none() {
                        continue;
                    }
                    let last_i = packs[i].as_ref().expect("checked above").last();
                    if last_i == packs[j].as_ref().expect("checked above").first() {
                        let tail = packs[j].take().expect("checked above");
                        let head = packs[i].as_mut().expect("checked above");
                        head.members.extend_from_slice(&tail.members[1..]);
                        head.swapped.extend_from_slice(&tail.swapped[1..]);
                        head.reduction |= tail.reduction;
                        changed = true;
                    }
                }
            }
        }

        // Cap at the widest vector the target offers for the element type;
        // lane counts must be powers of two, and a lone pair minimum holds.
        for slot in packs.iter_mut() {
            let Some(p) = slot else { continue };
            let elem = self.provisional_velt(p.first()).byte_size();
            if elem == 0 {
                *slot = None;
                continue;
            }
            let max_lanes = self.config.simd.max_vector_bytes() / elem;
            let target = p.len().min(max_lanes);
            if target < 2 {
                *slot = None;
                continue;
            }
            let target = prev_pow2(target);
            if target < p.len() {
                if self.config.trace.packs {
                    log::trace!(
                        "slp: truncating pack of {} to {} lanes",
                        p.len(),
                        target
                    );
                }
                p.members.truncate(target);
                p.swapped.truncate(target);
            }
        }

        self.packset.set_packs(packs.into_iter().flatten().collect());
    }

    // =========================================================================
    // Pack Map
    // =========================================================================

    /// Rebuild the operation -> pack mapping from the current pack set.
    pub(crate) fn construct_my_pack_map(&mut self) {
        for info in &mut self.info {
            info.my_pack = None;
        }
        for idx in 0..self.packset.len() {
            for lane in 0..self.packset.get(idx).len() {
                let m = self.packset.get(idx).members[lane];
                let Some(i) = self.pos(m) else { continue };
                debug_assert!(
                    self.info[i].my_pack.is_none(),
                    "operation {:?} appears in two packs",
                    m
                );
                self.info[i].my_pack = Some(idx as u32);
            }
        }
    }

    // =========================================================================
    // Filtering
    // =========================================================================

    /// Remove packs with no vector form, then repeatedly remove packs with
    /// non-positive modeled savings until stable. Survivors keep their
    /// relative order.
    pub(crate) fn filter_packs(&mut self) -> Result<(), VectorizeError> {
        // Implementability sweep.
        let packs = self.packset.take_packs();
        let mut kept = Vec::with_capacity(packs.len());
        for p in packs {
            if self.pack_implemented(&p) {
                kept.push(p);
            } else {
                if self.config.trace.packs {
                    log::trace!("slp: pack at {:?} not implementable", p.first());
                }
                self.stats.packs_filtered += 1;
            }
        }
        self.packset.set_packs(kept);
        self.construct_my_pack_map();

        // Profitability to a fixed point: removing one pack can strip the
        // vector operands or uses another pack was counting on.
        loop {
            let mut remove_at = None;
            for i in 0..self.packset.len() {
                if !self.pack_profitable(self.packset.get(i)) {
                    remove_at = Some(i);
                    break;
                }
            }
            match remove_at {
                Some(i) => {
                    if self.config.trace.packs {
                        log::trace!(
                            "slp: pack at {:?} not profitable",
                            self.packset.get(i).first()
                        );
                    }
                    self.packset.remove(i);
                    self.stats.packs_filtered += 1;
                    self.construct_my_pack_map();
                }
                None => break,
            }
        }

        if self.packset.is_empty() {
            return Err(VectorizeError::NotProfitable);
        }
        Ok(())
    }

    /// Does the target have a vector operation for this pack?
    fn pack_implemented(&self, p: &Pack) -> bool {
        let first = p.first();
        let op = self.graph.node(first).op;
        let elem = self.provisional_velt(first);
        let lanes = p.len();

        if p.reduction {
            let kind = match op {
                Operator::IntOp(a) | Operator::FloatOp(a) => ReduceKind::of_arith(a),
                _ => None,
            };
            let Some(kind) = kind else { return false };
            if !self.model.reduce_implemented(kind, elem) {
                return false;
            }
            if lanes < 2
                || !lanes.is_power_of_two()
                || elem.byte_size() * lanes > self.config.simd.max_vector_bytes()
            {
                return false;
            }
            // Intermediate chain values must have no consumer besides the
            // next chain step; only the final value survives emission.
            for k in 0..lanes - 1 {
                let next = p.members[k + 1];
                if self
                    .graph
                    .uses(p.members[k])
                    .iter()
                    .any(|&u| u != next)
                {
                    return false;
                }
            }
            true
        } else {
            self.model.implemented(&op, elem, lanes)
        }
    }

    /// Is the modeled vector cost lower than the scalar cost it replaces?
    fn pack_profitable(&self, p: &Pack) -> bool {
        let first = p.first();
        let op = self.graph.node(first).op;
        let elem = self.provisional_velt(first);
        let lanes = p.len();
        let shape = crate::ir::operators::VectorShape::new(elem, lanes as u8);

        let scalar = lanes as f32 * self.model.scalar_cost(&op).total_cost();
        let aligned = !op.is_memory() || self.alignment_of(first) == Alignment::Offset(0);
        let mut vector = self.model.vector_cost(&op, shape, aligned).total_cost();

        if p.reduction {
            vector += self.model.reduce_cost(shape).total_cost();
            let lanes_vec = self.reduction_lanes(p).1;
            vector += self.operand_overhead(&lanes_vec);
        } else {
            let (start, end) = match op {
                Operator::Store(_) => (1, 2),
                Operator::Load(_) => (0, 0),
                _ => (0, op.arity()),
            };
            for j in start..end {
                let xs = self.operand_lanes(p, j);
                vector += self.operand_overhead(&xs);
            }
            // Results consumed outside any pack force lane extraction.
            for (lane, &m) in p.members.iter().enumerate() {
                for &u in self.graph.uses(m) {
                    if self.my_pack(u).is_none() {
                        vector += self.model.extract_cost(shape, lane as u8).total_cost();
                    }
                }
            }
        }

        scalar - vector > self.config.policy.min_savings
    }

    /// The operand of every member at position `j`, honoring per-lane
    /// operand orientation.
    pub(crate) fn operand_lanes(&self, p: &Pack, j: usize) -> SmallVec<[NodeId; 8]> {
        let mut xs = SmallVec::new();
        for (lane, &m) in p.members.iter().enumerate() {
            let node = self.graph.node(m);
            let jj = if p.swapped.get(lane).copied().unwrap_or(false) && j < 2 {
                1 - j
            } else {
                j
            };
            if let Some(x) = node.input(jj) {
                xs.push(x);
            }
        }
        xs
    }

    /// Split a reduction chain pack into its incoming accumulator and the
    /// per-lane contribution operands.
    pub(crate) fn reduction_lanes(&self, p: &Pack) -> (NodeId, SmallVec<[NodeId; 8]>) {
        let first = p.first();
        let n0 = self.graph.node(first);
        let (a, b) = (
            n0.input(0).expect("binary accumulation"),
            n0.input(1).expect("binary accumulation"),
        );
        // The chain input of the head is the value carried in from outside
        // the pack (typically the loop phi).
        let acc = if !self.in_block(a) || self.is_marked_reduction(a) {
            a
        } else {
            b
        };
        let mut xs: SmallVec<[NodeId; 8]> = SmallVec::new();
        xs.push(if acc == a { b } else { a });
        for k in 1..p.len() {
            let prev = p.members[k - 1];
            let node = self.graph.node(p.members[k]);
            let (a, b) = (
                node.input(0).expect("binary accumulation"),
                node.input(1).expect("binary accumulation"),
            );
            xs.push(if a == prev { b } else { a });
        }
        (acc, xs)
    }

    /// Modeled cost of materializing one vector operand from these lanes.
    fn operand_overhead(&self, xs: &[NodeId]) -> f32 {
        if xs.is_empty() {
            return 0.0;
        }
        if xs.iter().all(|&x| x == xs[0]) {
            return self.model.broadcast_cost().total_cost();
        }
        if let Some(pi) = self.my_pack(xs[0]) {
            if self.packset.get(pi as usize).members.as_slice() == xs {
                return 0.0;
            }
        }
        xs.len() as f32 * self.model.insert_cost().total_cost()
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Internal-consistency check: every non-reduction pack is pairwise
    /// independent, and the pack map agrees with pack membership both ways.
    #[cfg(debug_assertions)]
    pub(crate) fn verify_packs(&self) {
        for (idx, p) in self.packset.iter().enumerate() {
            if !p.reduction {
                for a in 0..p.len() {
                    for b in (a + 1)..p.len() {
                        assert!(
                            self.independent(p.members[a], p.members[b]),
                            "pack members {:?} and {:?} are not independent",
                            p.members[a],
                            p.members[b]
                        );
                    }
                }
            }
            for &m in &p.members {
                assert_eq!(
                    self.my_pack(m),
                    Some(idx as u32),
                    "pack map out of sync for {:?}",
                    m
                );
            }
        }
        for i in 0..self.block.len() {
            if let Some(pi) = self.info[i].my_pack {
                assert!(
                    self.packset.get(pi as usize).contains(self.block.at(i)),
                    "pack map points to a pack not containing {:?}",
                    self.block.at(i)
                );
            }
        }
    }
}

// =============================================================================
// Def-Use Ordering
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct UseCandidate {
    u1: NodeId,
    u2: NodeId,
    swapped: bool,
    savings: i32,
}

/// Pick the consumer pair to extend with: the orientation agreeing with the
/// majority of candidate operand positions wins, then the highest savings,
/// then discovery order.
fn order_def_uses(candidates: &[UseCandidate]) -> Option<UseCandidate> {
    if candidates.is_empty() {
        return None;
    }
    let swapped_count = candidates.iter().filter(|c| c.swapped).count();
    let unswapped_count = candidates.len() - swapped_count;
    let majority_swapped = swapped_count > unswapped_count;

    let mut best: Option<UseCandidate> = None;
    for c in candidates {
        if swapped_count != unswapped_count && c.swapped != majority_swapped {
            continue;
        }
        if best.map_or(true, |b| c.savings > b.savings) {
            best = Some(*c);
        }
    }
    best.or_else(|| candidates.first().copied())
}

// =============================================================================
// Tests
// =============================================================================
