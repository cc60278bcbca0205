//! Superword-level (SLP) auto-vectorization.
//!
//! This crate transforms groups of independent, structurally identical scalar
//! operations inside a loop body into single fixed-width vector operations:
//!
//! - **Block construction**: deterministic ordering of the loop body
//! - **Dependence analysis**: must-precede graph over memory operations
//! - **Alignment analysis**: anchor selection and iv-adjustment arithmetic
//! - **Pack discovery**: seed / extend / combine / filter of operation packs
//! - **Scheduling + emission**: contiguous memory order, vector rewrite
//!
//! # Architecture
//!
//! The pipeline runs once per candidate loop body:
//!
//! 1. Build the block (reverse postorder) and the dependence graph
//! 2. Pick an alignment anchor and compute per-operation alignments
//! 3. Seed packs from adjacent memory references, extend along def-use and
//!    use-def chains, combine at shared boundaries, filter by cost
//! 4. Resolve vector element types, schedule memory slices, emit
//!
//! Any stage may abort, in which case the program graph is left untouched.
//!
//! # Example
//!
//! ```text
//! Before (4 unrolled iterations):        After (4-lane vectors):
//!   a[i+0] = b[i+0] + c[i+0]              va = vload b[i..i+4]
//!   a[i+1] = b[i+1] + c[i+1]              vb = vload c[i..i+4]
//!   a[i+2] = b[i+2] + c[i+2]              vs = vadd va, vb
//!   a[i+3] = b[i+3] + c[i+3]              vstore a[i..i+4], vs
//! ```
//!
//! # References
//!
//! - "Exploiting Superword Level Parallelism with Multimedia Instruction Sets"
//!   (Larsen & Amarasinghe, PLDI 2000)

pub mod ir;
pub mod slp;

pub use ir::graph::Graph;
pub use ir::node::{Node, NodeFlags, NodeId};
pub use ir::operators::{ArithOp, BitwiseOp, CmpOp, MemRef, Operator, SliceId, VectorShape};
pub use ir::types::ValueType;

pub use slp::align::Alignment;
pub use slp::cost::{CostPolicy, OpCost, SimdLevel, VectorCostModel};
pub use slp::packset::{Pack, PackSet};
pub use slp::{
    unrolling_analysis, OrderedPair, RewriteSummary, SliceSchedules, SlpConfig, SlpStats,
    SuperWord, TraceConfig, TripCount, VLoop, VectorizeError,
};
