//! Memory alignment analysis.
//!
//! One memory reference is chosen as the alignment anchor; the loop
//! framework can then run scalar pre-iterations (the iv adjustment) so that
//! the anchor lands on vector-lane offset 0 in the main loop. Every other
//! reference gets an alignment relative to that anchor: a concrete byte
//! offset, "unconstrained" when alignment cannot matter for it, or
//! "conflicting" when constraints disagree. Conflicting references are shut
//! out of any pack that must be strictly aligned.

use crate::ir::node::NodeId;
use crate::ir::operators::MemRef;

use super::SuperWord;

// =============================================================================
// Alignment
// =============================================================================

/// Three-valued per-operation alignment relative to the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    /// No constraint recorded; alignment does not matter for this
    /// operation.
    Unconstrained,
    /// Concrete byte offset inside the vector width.
    Offset(i32),
    /// Constraints disagree; the operation cannot join strictly aligned
    /// vector memory accesses.
    Conflicting,
}

impl Alignment {
    /// Combine a new constraint with an existing one. Disagreeing concrete
    /// offsets degrade to [`Alignment::Conflicting`], which is sticky.
    pub fn merge(self, other: Alignment) -> Alignment {
        match (self, other) {
            (Alignment::Unconstrained, a) | (a, Alignment::Unconstrained) => a,
            (Alignment::Offset(a), Alignment::Offset(b)) if a == b => Alignment::Offset(a),
            _ => Alignment::Conflicting,
        }
    }

    /// The concrete offset, if there is one.
    #[inline]
    pub fn offset(self) -> Option<i32> {
        match self {
            Alignment::Offset(o) => Some(o),
            _ => None,
        }
    }
}

// =============================================================================
// Analysis
// =============================================================================

impl SuperWord<'_> {
    /// Can the pre-loop align this reference to lane offset 0 by running
    /// scalar iterations?
    ///
    /// Only affine references qualify; a non-affine address cannot be moved
    /// onto an alignment boundary by adjusting the iteration count. An
    /// affine reference qualifies when each body execution advances it by
    /// exactly one element or by a whole number of vectors.
    pub(crate) fn ref_is_alignable(&self, mem: &MemRef) -> bool {
        if !mem.affine {
            return false;
        }
        if mem.iv_scale == 0 {
            // Loop-invariant address: nothing to adjust.
            return true;
        }
        let span = mem.iv_scale * self.vloop.iv_stride;
        if span == 0 {
            return false;
        }
        let size = i32::from(mem.size);
        if span.abs() == size {
            return true;
        }
        let vw = self.vw_bytes(mem);
        vw >= 2 * size && span.abs() % vw == 0
    }

    /// Scalar pre-loop iterations needed before the main loop's first
    /// iteration touches this reference at vector-lane offset 0.
    pub(crate) fn get_iv_adjustment(&self, n: NodeId) -> i32 {
        let Some(mem) = self.graph.node(n).op.mem_ref().copied() else {
            return 0;
        };
        if mem.iv_scale == 0 {
            return 0;
        }
        let vw = self.vw_bytes(&mem);
        let size = i32::from(mem.size);
        if vw < 2 * size || size == 0 {
            return 0;
        }
        let stride_sign = if mem.iv_scale * self.vloop.iv_stride > 0 {
            1
        } else {
            -1
        };
        let adjustment_bytes = (stride_sign * vw - (mem.offset % vw)) % vw;
        adjustment_bytes / size
    }

    /// Alignment of a memory operation relative to the anchor, after the
    /// anchor's iv adjustment has been applied.
    pub(crate) fn memory_alignment(&self, n: NodeId, iv_adjust: i32) -> Alignment {
        let Some(mem) = self.graph.node(n).op.mem_ref().copied() else {
            return Alignment::Unconstrained;
        };
        if !mem.affine {
            return Alignment::Conflicting;
        }
        let vw = self.vw_bytes(&mem);
        let size = i32::from(mem.size);
        if vw < 2 * size {
            // Not even two lanes available: alignment is meaningless here.
            return Alignment::Conflicting;
        }
        let offset = mem.offset + iv_adjust * size;
        Alignment::Offset(offset.rem_euclid(vw))
    }

    /// Pick the memory reference to align the loop to.
    ///
    /// Scores each alignable candidate by the lane count achievable for its
    /// element size times the number of block references sharing a
    /// compatible slice, stride and size. Candidates are scanned in block
    /// order and ties keep the earlier reference, so the choice is stable
    /// across runs.
    pub(crate) fn find_align_to_ref(&self, memops: &[NodeId]) -> Option<NodeId> {
        let mut best: Option<(NodeId, i64)> = None;
        for &n in memops {
            let mem = *self.graph.node(n).op.mem_ref().expect("memory op");
            if !self.ref_is_alignable(&mem) {
                continue;
            }
            let size = i32::from(mem.size);
            let lanes = i64::from(self.vw_bytes(&mem) / size);
            if lanes < 2 {
                continue;
            }
            let siblings = memops
                .iter()
                .filter(|&&other| {
                    let o = self.graph.node(other).op.mem_ref().expect("memory op");
                    o.affine
                        && o.slice == mem.slice
                        && o.iv_scale == mem.iv_scale
                        && o.size == mem.size
                })
                .count() as i64;
            let score = lanes * siblings;
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((n, score));
            }
        }
        if self.config.trace.alignment {
            if let Some((n, score)) = best {
                log::trace!("slp: alignment anchor {:?} (score {})", n, score);
            }
        }
        best.map(|(n, _)| n)
    }

    /// Is s2 exactly one element after s1 in the same base and slice?
    pub(crate) fn are_adjacent_refs(&self, s1: NodeId, s2: NodeId) -> bool {
        let (Some(r1), Some(r2)) = (
            self.graph.node(s1).op.mem_ref(),
            self.graph.node(s2).op.mem_ref(),
        ) else {
            return false;
        };
        r1.comparable(r2) && r2.offset - r1.offset == i32::from(r1.size)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::graph::Graph;
    use crate::ir::operators::SliceId;
    use crate::ir::types::ValueType;
    use crate::slp::{SlpConfig, VLoop};

    #[test]
    fn test_alignment_merge() {
        use Alignment::*;
        assert_eq!(Unconstrained.merge(Offset(4)), Offset(4));
        assert_eq!(Offset(4).merge(Unconstrained), Offset(4));
        assert_eq!(Offset(4).merge(Offset(4)), Offset(4));
        assert_eq!(Offset(4).merge(Offset(8)), Conflicting);
        assert_eq!(Conflicting.merge(Offset(0)), Conflicting);
        assert_eq!(Conflicting.merge(Unconstrained), Conflicting);
    }

    /// Four-times-unrolled i32 loop over one array.
    fn unrolled_loop(g: &mut Graph, offsets: &[i32]) -> (VLoop, Vec<NodeId>) {
        let base = g.parameter(0, ValueType::Ptr);
        let iv = g.parameter(1, ValueType::I64);
        let mut body = Vec::new();
        for &off in offsets {
            let ld = g.load(MemRef::new(base, SliceId(0), off, 4, 4), ValueType::I32);
            body.push(ld);
        }
        let loads = body.clone();
        (VLoop::new(body, iv, 4), loads)
    }

    #[test]
    fn test_memory_alignment_offsets() {
        let mut g = Graph::new();
        let (vloop, loads) = unrolled_loop(&mut g, &[0, 4, 8, 12]);
        let config = SlpConfig::avx2();
        let mut sw = SuperWord::new(&mut g, &vloop, &config);
        sw.construct_block().unwrap();

        // Span is 16 bytes, so the vector width caps at 16.
        for (i, &ld) in loads.iter().enumerate() {
            assert_eq!(
                sw.memory_alignment(ld, 0),
                Alignment::Offset(4 * i as i32),
                "load {}",
                i
            );
        }
        // Offsets wrap at the vector width.
        let mut g2 = Graph::new();
        let (vloop2, loads2) = unrolled_loop(&mut g2, &[16]);
        let mut sw2 = SuperWord::new(&mut g2, &vloop2, &config);
        sw2.construct_block().unwrap();
        assert_eq!(sw2.memory_alignment(loads2[0], 0), Alignment::Offset(0));
    }

    #[test]
    fn test_iv_adjustment() {
        let mut g = Graph::new();
        let (vloop, loads) = unrolled_loop(&mut g, &[0, 8]);
        let config = SlpConfig::avx2();
        let mut sw = SuperWord::new(&mut g, &vloop, &config);
        sw.construct_block().unwrap();

        // Already at offset 0: no scalar pre-iterations needed.
        assert_eq!(sw.get_iv_adjustment(loads[0]), 0);
        // Offset 8 in a 16-byte vector: two 4-byte pre-iterations.
        assert_eq!(sw.get_iv_adjustment(loads[1]), 2);
    }

    #[test]
    fn test_ref_is_alignable() {
        let mut g = Graph::new();
        let (vloop, _) = unrolled_loop(&mut g, &[0]);
        let config = SlpConfig::avx2();
        let mut sw = SuperWord::new(&mut g, &vloop, &config);
        sw.construct_block().unwrap();

        let base = NodeId::new(0);
        // One element per iteration.
        assert!(sw.ref_is_alignable(&MemRef::new(base, SliceId(0), 0, 1, 4)));
        // Whole vectors per body execution (4 bytes * stride 4 = 16 = vw).
        assert!(sw.ref_is_alignable(&MemRef::new(base, SliceId(0), 0, 4, 4)));
        // Loop-invariant address.
        assert!(sw.ref_is_alignable(&MemRef::new(base, SliceId(0), 0, 0, 4)));
        // Non-affine address can never be aligned by iteration count.
        assert!(!sw.ref_is_alignable(&MemRef::opaque(base, SliceId(0), 4)));
        // Irregular stride (3 elements per body execution).
        assert!(!sw.ref_is_alignable(&MemRef::new(base, SliceId(0), 0, 3, 4)));
    }

    #[test]
    fn test_find_align_to_ref_prefers_popular_slice() {
        let mut g = Graph::new();
        let base_a = g.parameter(0, ValueType::Ptr);
        let base_b = g.parameter(1, ValueType::Ptr);
        let iv = g.parameter(2, ValueType::I64);
        // Three references in slice 0, one in slice 1.
        let a0 = g.load(MemRef::new(base_a, SliceId(0), 0, 4, 4), ValueType::I32);
        let a1 = g.load(MemRef::new(base_a, SliceId(0), 4, 4, 4), ValueType::I32);
        let a2 = g.load(MemRef::new(base_a, SliceId(0), 8, 4, 4), ValueType::I32);
        let b0 = g.load(MemRef::new(base_b, SliceId(1), 0, 4, 4), ValueType::I32);
        let vloop = VLoop::new(vec![a0, a1, a2, b0], iv, 4);
        let config = SlpConfig::avx2();
        let mut sw = SuperWord::new(&mut g, &vloop, &config);
        sw.construct_block().unwrap();

        let anchor = sw.find_align_to_ref(&[a0, a1, a2, b0]);
        assert_eq!(anchor, Some(a0)); // biggest sibling count, earliest wins
    }

    #[test]
    fn test_are_adjacent_refs() {
        let mut g = Graph::new();
        let (vloop, loads) = unrolled_loop(&mut g, &[0, 4, 12]);
        let config = SlpConfig::avx2();
        let mut sw = SuperWord::new(&mut g, &vloop, &config);
        sw.construct_block().unwrap();

        assert!(sw.are_adjacent_refs(loads[0], loads[1]));
        assert!(!sw.are_adjacent_refs(loads[1], loads[0])); // wrong direction
        assert!(!sw.are_adjacent_refs(loads[1], loads[2])); // gap of 8
    }
}
