//! The superword transform.
//!
//! Packs independent, isomorphic scalar operations of one loop body into
//! fixed-width vector operations. The pipeline for a single pass:
//!
//! 1. **Block**: order the loop body (reverse postorder), compute depths
//! 2. **Dependence graph**: must-precede edges over memory operations
//! 3. **Alignment**: pick an anchor reference, compute per-op alignment
//! 4. **Packs**: seed pairs from adjacent refs, extend along def-use and
//!    use-def chains, combine at shared boundaries, filter by cost
//! 5. **Types**: resolve one lane element type per def-use chain
//! 6. **Schedule**: make packed memory operations contiguous per slice
//! 7. **Emit**: one vector operation per pack, extracts for scalar uses
//!
//! The pass is transactional: the graph is only mutated by the final stage,
//! and every earlier stage can abort with a [`VectorizeError`], leaving the
//! program untouched.
//!
//! # References
//!
//! - "Exploiting Superword Level Parallelism with Multimedia Instruction
//!   Sets" (Larsen & Amarasinghe, PLDI 2000)

pub mod align;
pub mod block;
pub mod cost;
pub mod depgraph;
pub mod emit;
pub mod packset;
pub mod schedule;
pub mod typing;

use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::ir::graph::Graph;
use crate::ir::node::NodeId;
use crate::ir::operators::{MemRef, SliceId};
use crate::ir::types::ValueType;

use self::align::Alignment;
use self::block::Block;
use self::cost::{CostPolicy, SimdLevel, VectorCostModel};
use self::depgraph::DepGraph;
use self::packset::PackSet;

// =============================================================================
// Framework Input
// =============================================================================

/// Trip-count shape reported by the loop framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripCount {
    /// Exact iteration count known at compile time.
    Constant(u64),
    /// Unknown at compile time.
    Unknown,
}

impl Default for TripCount {
    fn default() -> Self {
        TripCount::Unknown
    }
}

/// One candidate loop, as handed over by the loop-optimization framework.
///
/// The body is the sequential program order of the loop's operations.
/// `iv_stride` is the induction-variable increment per body execution, so an
/// already-unrolled loop presents a stride covering all unrolled copies.
#[derive(Debug, Clone)]
pub struct VLoop {
    /// Loop-body operations in program order.
    pub body: Vec<NodeId>,
    /// The induction variable (a phi).
    pub iv: NodeId,
    /// Induction-variable increment per body execution.
    pub iv_stride: i32,
    /// Trip-count shape.
    pub trip_count: TripCount,
    /// Nodes the framework marked as members of accumulation chains.
    pub reductions: FxHashSet<NodeId>,
}

impl VLoop {
    /// Create a loop description with no marked reductions.
    pub fn new(body: Vec<NodeId>, iv: NodeId, iv_stride: i32) -> Self {
        VLoop {
            body,
            iv,
            iv_stride,
            trip_count: TripCount::Unknown,
            reductions: FxHashSet::default(),
        }
    }

    /// Mark a node as part of an accumulation chain.
    pub fn mark_reduction(&mut self, n: NodeId) {
        self.reductions.insert(n);
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Named trace switches, one per concern.
///
/// Passed in with the configuration rather than read from ambient state;
/// each stage logs through [`log`] only when its switch is on.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceConfig {
    /// Trace anchor selection and per-op alignment.
    pub alignment: bool,
    /// Trace adjacent-reference pairing.
    pub adjacency: bool,
    /// Trace memory-slice collection and dependence edges.
    pub mem_slice: bool,
    /// Trace pack extension/combination/filtering.
    pub packs: bool,
    /// Trace memory scheduling.
    pub schedule: bool,
}

impl TraceConfig {
    /// Enable every switch.
    pub fn all() -> Self {
        TraceConfig {
            alignment: true,
            adjacency: true,
            mem_slice: true,
            packs: true,
            schedule: true,
        }
    }
}

/// Configuration for one vectorization pass.
#[derive(Debug, Clone)]
pub struct SlpConfig {
    /// Target SIMD tier.
    pub simd: SimdLevel,
    /// Whether the target permits unaligned vector memory access. When
    /// false, packs are held to strict alignment against the anchor.
    pub unaligned_ok: bool,
    /// Whether cross-base references may be disambiguated by a runtime
    /// aliasing guard (emitted by the surrounding framework from the
    /// returned [`OrderedPair`]s).
    pub runtime_alias_checks: bool,
    /// Packing heuristic weights.
    pub policy: CostPolicy,
    /// Trace switches.
    pub trace: TraceConfig,
}

impl SlpConfig {
    /// Configuration for SSE4.2 targets (strict alignment preferred).
    pub fn sse42() -> Self {
        SlpConfig {
            simd: SimdLevel::Sse42,
            unaligned_ok: false,
            ..Default::default()
        }
    }

    /// Configuration for AVX2 targets.
    pub fn avx2() -> Self {
        SlpConfig {
            simd: SimdLevel::Avx2,
            ..Default::default()
        }
    }

    /// Configuration for AVX-512 targets.
    pub fn avx512() -> Self {
        SlpConfig {
            simd: SimdLevel::Avx512,
            ..Default::default()
        }
    }
}

impl Default for SlpConfig {
    fn default() -> Self {
        SlpConfig {
            simd: SimdLevel::default(),
            unaligned_ok: true,
            runtime_alias_checks: false,
            policy: CostPolicy::default(),
            trace: TraceConfig::default(),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Why a pass produced no rewrite.
///
/// Every variant has the same terminal behavior: the workspace is discarded
/// and the program graph is left exactly as it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VectorizeError {
    /// The loop body contains an operation or control shape the pass does
    /// not understand.
    #[error("unsupported loop body: {0}")]
    UnsupportedBlock(&'static str),
    /// No memory reference can anchor the loop's alignment.
    #[error("no alignable memory reference")]
    NoAlignableAnchor,
    /// No valid per-slice memory order exists for the surviving packs.
    #[error("no valid memory schedule")]
    ScheduleFailed,
    /// No pack survived filtering.
    #[error("no profitable packs")]
    NotProfitable,
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters accumulated over one pass (mergeable across passes).
#[derive(Debug, Clone, Default)]
pub struct SlpStats {
    /// Pair packs created by seeding.
    pub packs_seeded: usize,
    /// Pair packs added by def-use / use-def extension.
    pub packs_extended: usize,
    /// Packs removed by filtering.
    pub packs_filtered: usize,
    /// Packs that reached emission.
    pub packs_emitted: usize,
    /// Vector operations created.
    pub vector_ops_created: usize,
    /// Scalar operations retired.
    pub scalar_ops_eliminated: usize,
    /// Lane-extract operations inserted for scalar consumers.
    pub extracts_inserted: usize,
}

impl SlpStats {
    /// Merge counters from another pass.
    pub fn merge(&mut self, other: &SlpStats) {
        self.packs_seeded += other.packs_seeded;
        self.packs_extended += other.packs_extended;
        self.packs_filtered += other.packs_filtered;
        self.packs_emitted += other.packs_emitted;
        self.vector_ops_created += other.vector_ops_created;
        self.scalar_ops_eliminated += other.scalar_ops_eliminated;
        self.extracts_inserted += other.extracts_inserted;
    }
}

// =============================================================================
// Ordered Pair
// =============================================================================

/// Canonicalized pair of memory operations proven non-aliasing only under a
/// runtime check. The surrounding framework turns these into guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderedPair {
    /// Lower-indexed operation.
    pub first: NodeId,
    /// Higher-indexed operation.
    pub second: NodeId,
}

impl OrderedPair {
    /// Create a canonical pair (lower node index first).
    pub fn new(a: NodeId, b: NodeId) -> Self {
        if a.index() <= b.index() {
            OrderedPair {
                first: a,
                second: b,
            }
        } else {
            OrderedPair {
                first: b,
                second: a,
            }
        }
    }
}

// =============================================================================
// Result
// =============================================================================

/// Per-slice memory orders produced by the scheduler. The operations are
/// the original scalar ids; emission replaces packed runs with one vector
/// operation each.
pub type SliceSchedules = Vec<(SliceId, Vec<NodeId>)>;

/// What a successful pass did to the graph.
#[derive(Debug, Clone)]
pub struct RewriteSummary {
    /// Vector operations created, in emission order.
    pub vector_nodes: Vec<NodeId>,
    /// New per-slice memory order (packed operations contiguous).
    pub schedules: SliceSchedules,
    /// The memory reference the pre-loop should align to.
    pub align_to_ref: Option<NodeId>,
    /// Scalar pre-loop iterations that put the anchor at lane offset 0.
    pub iv_adjustment: i32,
    /// Pointer pairs requiring a runtime aliasing guard.
    pub disjoint_pairs: Vec<OrderedPair>,
    /// Pass counters.
    pub stats: SlpStats,
}

// =============================================================================
// Per-Operation Side Table
// =============================================================================

/// Analysis state for one block operation, stored in a dense array parallel
/// to block order and rebuilt per pass.
#[derive(Debug, Clone)]
pub(crate) struct NodeInfo {
    /// Byte alignment relative to the anchor.
    pub alignment: Alignment,
    /// Longest dependency chain from block start.
    pub depth: u32,
    /// Resolved vector element type.
    pub velt: ValueType,
    /// Index of the pack owning this operation, if any.
    pub my_pack: Option<u32>,
}

impl Default for NodeInfo {
    fn default() -> Self {
        NodeInfo {
            alignment: Alignment::Unconstrained,
            depth: 0,
            velt: ValueType::Top,
            my_pack: None,
        }
    }
}

// =============================================================================
// SuperWord
// =============================================================================

/// One vectorization pass over one candidate loop body.
///
/// Owns the per-pass workspace (block order, dependence graph, side tables,
/// pack set); everything is discarded when the pass ends, whether it commits
/// a rewrite or aborts.
pub struct SuperWord<'a> {
    pub(crate) graph: &'a mut Graph,
    pub(crate) vloop: &'a VLoop,
    pub(crate) config: &'a SlpConfig,
    pub(crate) model: VectorCostModel,
    pub(crate) block: Block,
    pub(crate) dg: DepGraph,
    pub(crate) info: Vec<NodeInfo>,
    pub(crate) packset: PackSet,
    pub(crate) align_to_ref: Option<NodeId>,
    pub(crate) iv_adjustment: i32,
    pub(crate) disjoint_ptrs: Vec<OrderedPair>,
    pub(crate) stats: SlpStats,
}

impl<'a> SuperWord<'a> {
    /// Create a pass over one loop.
    pub fn new(graph: &'a mut Graph, vloop: &'a VLoop, config: &'a SlpConfig) -> Self {
        let model = VectorCostModel::new(config.simd);
        SuperWord {
            graph,
            vloop,
            config,
            model,
            block: Block::default(),
            dg: DepGraph::default(),
            info: Vec::new(),
            packset: PackSet::default(),
            align_to_ref: None,
            iv_adjustment: 0,
            disjoint_ptrs: Vec::new(),
            stats: SlpStats::default(),
        }
    }

    /// Run the whole pipeline.
    ///
    /// On success the graph holds the committed rewrite; on error it is
    /// byte-for-byte unchanged.
    pub fn run(mut self) -> Result<RewriteSummary, VectorizeError> {
        self.construct_block()?;
        log::debug!("slp: block built ({} ops)", self.block.len());

        self.build_dependence_graph();
        self.compute_max_depth();
        log::debug!("slp: dependence graph built, depths computed");

        self.find_adjacent_refs()?;
        log::debug!("slp: {} seed packs", self.packset.len());

        self.extend_packlist();
        self.combine_packs();
        self.construct_my_pack_map();
        self.filter_packs()?;
        self.compute_vector_element_type()?;
        #[cfg(debug_assertions)]
        self.verify_packs();
        log::debug!("slp: {} packs after filtering", self.packset.len());

        let schedules = self.schedule()?;
        let summary = self.emit(schedules);
        log::debug!(
            "slp: emitted {} vector ops, retired {} scalar ops",
            summary.stats.vector_ops_created,
            summary.stats.scalar_ops_eliminated
        );
        Ok(summary)
    }

    // =========================================================================
    // Side-table accessors
    // =========================================================================

    /// Block position of a node, if it is in the block.
    #[inline]
    pub(crate) fn pos(&self, n: NodeId) -> Option<usize> {
        self.block.index_of(n)
    }

    /// Check if a node is part of the block.
    #[inline]
    pub(crate) fn in_block(&self, n: NodeId) -> bool {
        self.block.contains(n)
    }

    /// Dependency-chain depth of a block node.
    #[inline]
    pub(crate) fn depth_of(&self, n: NodeId) -> u32 {
        self.pos(n).map(|i| self.info[i].depth).unwrap_or(0)
    }

    /// Alignment of a block node.
    #[inline]
    pub(crate) fn alignment_of(&self, n: NodeId) -> Alignment {
        self.pos(n)
            .map(|i| self.info[i].alignment)
            .unwrap_or(Alignment::Unconstrained)
    }

    /// Record an alignment constraint; disagreeing constraints degrade to
    /// [`Alignment::Conflicting`].
    pub(crate) fn set_alignment(&mut self, n: NodeId, a: Alignment) {
        if let Some(i) = self.pos(n) {
            self.info[i].alignment = self.info[i].alignment.merge(a);
        }
    }

    /// Resolved element type of a block node.
    #[inline]
    pub(crate) fn velt(&self, n: NodeId) -> ValueType {
        self.pos(n).map(|i| self.info[i].velt).unwrap_or(ValueType::Top)
    }

    /// Pack owning a node, if any.
    #[inline]
    pub(crate) fn my_pack(&self, n: NodeId) -> Option<u32> {
        self.pos(n).and_then(|i| self.info[i].my_pack)
    }

    /// Check if the framework marked this node as part of an accumulation
    /// chain.
    #[inline]
    pub(crate) fn is_marked_reduction(&self, n: NodeId) -> bool {
        self.vloop.reductions.contains(&n)
    }

    /// Whether vector memory accesses must be strictly aligned on this
    /// target.
    #[inline]
    pub(crate) fn vectors_must_be_aligned(&self) -> bool {
        !self.config.unaligned_ok
    }

    /// Usable vector width in bytes for a memory reference: bounded by the
    /// target's maximum and by the bytes one body execution spans, rounded
    /// down to a power of two (vector widths are powers of two).
    pub(crate) fn vw_bytes(&self, mem: &MemRef) -> i32 {
        let max = self.config.simd.max_vector_bytes() as i32;
        let span = (self.vloop.iv_stride * mem.iv_scale).abs();
        if span == 0 {
            return max;
        }
        let bound = max.min(span);
        debug_assert!(bound >= 1);
        1 << (31 - bound.leading_zeros())
    }
}

// =============================================================================
// Unrolling Analysis
// =============================================================================

/// Pre-pass sizing query: how many times should the scalar loop be unrolled
/// so that at least one full vector width of independent iterations is
/// available to pack?
///
/// The widest factor is dictated by the smallest memory access in the body:
/// a byte array on a 32-byte target wants 32 copies of the iteration.
pub fn unrolling_analysis(graph: &Graph, vloop: &VLoop, simd: SimdLevel) -> u32 {
    let mut smallest: Option<u32> = None;
    for &n in &vloop.body {
        let Some(node) = graph.get(n) else { continue };
        if let Some(mem) = node.op.mem_ref() {
            let size = mem.size as u32;
            smallest = Some(smallest.map_or(size, |s| s.min(size)));
        }
    }
    let Some(smallest) = smallest else { return 1 };
    if smallest == 0 {
        return 1;
    }
    let factor = (simd.max_vector_bytes() as u32 / smallest).max(1);
    factor.next_power_of_two()
}

// =============================================================================
// Tests
// =============================================================================
