//! End-to-end pipeline tests over constructed loop bodies.

use superword::ir::graph::Graph;
use superword::ir::node::NodeId;
use superword::ir::operators::{ArithOp, MemRef, Operator, ReduceKind, SliceId};
use superword::ir::types::ValueType;
use superword::{SlpConfig, SuperWord, VLoop, VectorizeError};

/// `a[i] = b[i] + c[i]`, unrolled `n` times over i32 arrays in distinct
/// slices. Returns the loop plus the scalar nodes per role.
#[allow(clippy::type_complexity)]
fn build_add_loop(
    g: &mut Graph,
    n: i32,
) -> (VLoop, Vec<NodeId>, Vec<NodeId>, Vec<NodeId>, Vec<NodeId>) {
    let base_a = g.parameter(0, ValueType::Ptr);
    let base_b = g.parameter(1, ValueType::Ptr);
    let base_c = g.parameter(2, ValueType::Ptr);
    let iv = g.parameter(3, ValueType::I64);

    let mut body = Vec::new();
    let (mut lbs, mut lcs, mut adds, mut sts) = (vec![], vec![], vec![], vec![]);
    for k in 0..n {
        let off = 4 * k;
        let lb = g.load(MemRef::new(base_b, SliceId(1), off, 4, 4), ValueType::I32);
        let lc = g.load(MemRef::new(base_c, SliceId(2), off, 4, 4), ValueType::I32);
        let add = g.int_op(ArithOp::Add, lb, lc, ValueType::I32);
        let st = g.store(MemRef::new(base_a, SliceId(0), off, 4, 4), add);
        body.extend([lb, lc, add, st]);
        lbs.push(lb);
        lcs.push(lc);
        adds.push(add);
        sts.push(st);
    }
    (VLoop::new(body, iv, n), lbs, lcs, adds, sts)
}

// =============================================================================
// Scenario A: full vectorization of an element-wise loop
// =============================================================================

#[test]
fn scenario_a_vectorizes_whole_loop() {
    let mut g = Graph::new();
    let (vloop, lbs, lcs, adds, sts) = build_add_loop(&mut g, 4);
    let config = SlpConfig::avx2();

    let summary = SuperWord::new(&mut g, &vloop, &config).run().unwrap();

    // Two vector loads, one vector add, one vector store; four lanes each.
    assert_eq!(summary.vector_nodes.len(), 4);
    let ops: Vec<_> = summary
        .vector_nodes
        .iter()
        .map(|&v| g.node(v).op)
        .collect();
    assert!(
        matches!(ops[0], Operator::VectorLoad(s, _, true) if s.lanes == 4 && s.element == ValueType::I32)
    );
    assert!(matches!(ops[1], Operator::VectorLoad(s, _, true) if s.lanes == 4));
    assert!(
        matches!(ops[2], Operator::VectorArith(s, ArithOp::Add) if s.lanes == 4 && s.element == ValueType::I32)
    );
    assert!(matches!(ops[3], Operator::VectorStore(s, _, true) if s.lanes == 4));

    // The vector add consumes both vector loads; the store consumes the add.
    let (vb, vc, vadd, vst) = (
        summary.vector_nodes[0],
        summary.vector_nodes[1],
        summary.vector_nodes[2],
        summary.vector_nodes[3],
    );
    assert_eq!(g.node(vadd).input(0), Some(vb));
    assert_eq!(g.node(vadd).input(1), Some(vc));
    assert_eq!(g.node(vst).input(1), Some(vadd));

    // Every scalar of the four unrolled iterations is retired, and no lane
    // extraction was needed.
    for &n in lbs.iter().chain(&lcs).chain(&adds).chain(&sts) {
        assert!(g.node(n).is_dead());
    }
    assert_eq!(summary.stats.scalar_ops_eliminated, 16);
    assert_eq!(summary.stats.extracts_inserted, 0);
    assert_eq!(summary.stats.packs_emitted, 4);

    // The anchor starts at offset 0: no scalar pre-iterations required.
    assert!(summary.align_to_ref.is_some());
    assert_eq!(summary.iv_adjustment, 0);

    // The store slice schedule keeps the packed stores contiguous.
    let store_schedule = summary
        .schedules
        .iter()
        .find(|(s, _)| *s == SliceId(0))
        .map(|(_, order)| order.clone())
        .unwrap();
    assert_eq!(store_schedule, sts);

    assert!(g.verify().is_ok());
}

// =============================================================================
// Scenario B: strict alignment across unrelated arrays aborts
// =============================================================================

#[test]
fn scenario_b_strict_alignment_aborts_without_rewrite() {
    let mut g = Graph::new();
    let (vloop, _, _, _, _) = build_add_loop(&mut g, 4);
    // SSE4.2 preset requires strictly aligned vector memory access; the
    // three arrays have unrelated bases, so only the anchor's own array can
    // prove its alignment and nothing profitable survives.
    let config = SlpConfig::sse42();

    let nodes_before = g.len();
    let result = SuperWord::new(&mut g, &vloop, &config).run();
    assert_eq!(result.unwrap_err(), VectorizeError::NotProfitable);

    // The abort is a true no-op: nothing added, nothing retired.
    assert_eq!(g.len(), nodes_before);
    for (_, node) in g.iter() {
        assert!(!node.is_dead());
    }
}

#[test]
fn scenario_b_same_loop_succeeds_without_strict_alignment() {
    let mut g = Graph::new();
    let (vloop, _, _, _, _) = build_add_loop(&mut g, 4);
    let config = SlpConfig {
        unaligned_ok: true,
        ..SlpConfig::sse42()
    };
    let summary = SuperWord::new(&mut g, &vloop, &config).run().unwrap();
    assert_eq!(summary.vector_nodes.len(), 4);
}

// =============================================================================
// Scenario C: marked reduction chain
// =============================================================================

#[test]
fn scenario_c_reduction_chain_emits_horizontal_combine() {
    let mut g = Graph::new();
    let base = g.parameter(0, ValueType::Ptr);
    let iv = g.parameter(1, ValueType::I64);
    let init = g.parameter(2, ValueType::I32);

    // sum = sum + a[i], unrolled eight times. The phi's backedge is wired
    // up once the chain exists.
    let phi = g.phi(init, init, ValueType::I32);
    let mut body = Vec::new();
    let mut loads = Vec::new();
    let mut adds = Vec::new();
    let mut acc = phi;
    for k in 0..8 {
        let ld = g.load(MemRef::new(base, SliceId(0), 4 * k, 4, 4), ValueType::I32);
        let add = g.int_op(ArithOp::Add, acc, ld, ValueType::I32);
        body.extend([ld, add]);
        loads.push(ld);
        adds.push(add);
        acc = add;
    }
    g.replace_input(phi, 1, acc);

    let mut vloop = VLoop::new(body, iv, 8);
    for &add in &adds {
        vloop.mark_reduction(add);
    }

    let config = SlpConfig::avx2();
    let summary = SuperWord::new(&mut g, &vloop, &config).run().unwrap();

    // One vector load and one horizontal combine.
    assert_eq!(summary.vector_nodes.len(), 2);
    let vload = summary.vector_nodes[0];
    let vreduce = summary.vector_nodes[1];
    assert!(matches!(g.node(vload).op, Operator::VectorLoad(s, _, _) if s.lanes == 8));
    assert!(
        matches!(g.node(vreduce).op, Operator::VectorReduce(s, ReduceKind::Add) if s.lanes == 8)
    );

    // The combine folds the lane partials into the carried accumulator, so
    // the final scalar equals the sequential chain's value under any
    // associative/commutative reassociation.
    assert_eq!(g.node(vreduce).input(0), Some(phi));
    assert_eq!(g.node(vreduce).input(1), Some(vload));
    // The loop phi now carries the combined value.
    assert_eq!(g.node(phi).input(1), Some(vreduce));

    for &n in loads.iter().chain(&adds) {
        assert!(g.node(n).is_dead());
    }
    assert!(g.verify().is_ok());
}

// =============================================================================
// Idempotence: a vectorized body has nothing left to pack
// =============================================================================

#[test]
fn second_run_on_vectorized_body_is_a_noop() {
    let mut g = Graph::new();
    let (vloop, _, _, _, _) = build_add_loop(&mut g, 4);
    let config = SlpConfig::avx2();
    let summary = SuperWord::new(&mut g, &vloop, &config).run().unwrap();

    // Re-run over the rewritten body: the four vector operations.
    let iv = vloop.iv;
    let vloop2 = VLoop::new(summary.vector_nodes.clone(), iv, 4);
    let nodes_before = g.len();
    let result = SuperWord::new(&mut g, &vloop2, &config).run();

    assert_eq!(result.unwrap_err(), VectorizeError::NotProfitable);
    assert_eq!(g.len(), nodes_before);
}

// =============================================================================
// Failure behavior
// =============================================================================

#[test]
fn no_alignable_anchor_aborts() {
    let mut g = Graph::new();
    let base = g.parameter(0, ValueType::Ptr);
    let iv = g.parameter(1, ValueType::I64);
    // All references are non-affine: nothing can anchor the alignment.
    let ld0 = g.load(MemRef::opaque(base, SliceId(0), 4), ValueType::I32);
    let ld1 = g.load(MemRef::opaque(base, SliceId(0), 4), ValueType::I32);
    let add = g.int_op(ArithOp::Add, ld0, ld1, ValueType::I32);
    let st = g.store(MemRef::opaque(base, SliceId(0), 4), add);

    let vloop = VLoop::new(vec![ld0, ld1, add, st], iv, 1);
    let config = SlpConfig::avx2();
    let result = SuperWord::new(&mut g, &vloop, &config).run();
    assert_eq!(result.unwrap_err(), VectorizeError::NoAlignableAnchor);
}

#[test]
fn unsupported_body_aborts_before_any_analysis() {
    let mut g = Graph::new();
    let iv = g.parameter(0, ValueType::I64);
    let a = g.parameter(1, ValueType::I64);
    // A body operation consuming a non-entry value defined outside the
    // body is a control shape the pass does not understand.
    let outside = g.int_op(ArithOp::Add, a, a, ValueType::I64);
    let inside = g.int_op(ArithOp::Mul, outside, a, ValueType::I64);

    let vloop = VLoop::new(vec![inside], iv, 1);
    let config = SlpConfig::avx2();
    let nodes_before = g.len();
    let result = SuperWord::new(&mut g, &vloop, &config).run();
    assert!(matches!(
        result.unwrap_err(),
        VectorizeError::UnsupportedBlock(_)
    ));
    assert_eq!(g.len(), nodes_before);
}

// =============================================================================
// Runtime-disambiguated pointers
// =============================================================================

#[test]
fn runtime_alias_checks_surface_ordered_pairs() {
    let mut g = Graph::new();
    let base_a = g.parameter(0, ValueType::Ptr);
    let base_b = g.parameter(1, ValueType::Ptr);
    let iv = g.parameter(2, ValueType::I64);
    // Copy loop with both arrays in one slice: without runtime checks the
    // loads and stores order against each other; with them, the pass
    // records the pairs it wants guarded.
    let mut body = Vec::new();
    for k in 0..4 {
        let off = 4 * k;
        let ld = g.load(MemRef::new(base_b, SliceId(0), off, 4, 4), ValueType::I32);
        let st = g.store(MemRef::new(base_a, SliceId(0), off, 4, 4), ld);
        body.extend([ld, st]);
    }
    let vloop = VLoop::new(body, iv, 4);
    let config = SlpConfig {
        runtime_alias_checks: true,
        ..SlpConfig::avx2()
    };
    let summary = SuperWord::new(&mut g, &vloop, &config).run().unwrap();

    assert_eq!(summary.vector_nodes.len(), 2);
    assert!(!summary.disjoint_pairs.is_empty());
    for pair in &summary.disjoint_pairs {
        assert!(pair.first.index() <= pair.second.index());
    }
}
