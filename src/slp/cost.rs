//! Target capabilities and cost model.
//!
//! Profitability decisions compare the execution cost of N scalar operations
//! against one vector operation plus whatever lane plumbing (broadcast,
//! insert, extract) the surrounding scalar code forces. Costs model both
//! latency and reciprocal throughput, weighted for loop-dominated code.
//!
//! The pairwise packing heuristics additionally use a small integer policy
//! ([`CostPolicy`]): the classic adjacent-profit / pack-cost / unpack-cost
//! weights. These are empirically tuned values, exposed as configuration so
//! targets can adjust them rather than treating them as law.

use crate::ir::operators::{ArithOp, BitwiseOp, Operator, ReduceKind, VectorShape};
use crate::ir::types::ValueType;

// =============================================================================
// SIMD Level
// =============================================================================

/// Target SIMD capability tier.
///
/// Answers the two capability queries the pass needs: the maximum vector
/// width per element type, and which operation/element combinations have a
/// vector form at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SimdLevel {
    /// 128-bit vectors.
    Sse42,
    /// 256-bit vectors, full integer support, gathers.
    Avx2,
    /// 512-bit vectors, masking, 64-bit integer min/max/mul.
    Avx512,
}

impl SimdLevel {
    /// Maximum vector width in bytes.
    #[inline]
    pub const fn max_vector_bytes(self) -> usize {
        match self {
            SimdLevel::Sse42 => 16,
            SimdLevel::Avx2 => 32,
            SimdLevel::Avx512 => 64,
        }
    }

    /// Maximum lane count for an element type; 0 if the type cannot be a
    /// lane element.
    #[inline]
    pub const fn max_lanes(self, element: ValueType) -> usize {
        let size = element.byte_size();
        if size == 0 || !element.is_vectorizable() {
            return 0;
        }
        self.max_vector_bytes() / size
    }
}

impl Default for SimdLevel {
    fn default() -> Self {
        SimdLevel::Avx2
    }
}

// =============================================================================
// Operation Cost
// =============================================================================

/// Cost of a single operation: latency plus reciprocal throughput.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpCost {
    /// Latency in cycles from inputs to output.
    pub latency: u8,
    /// Reciprocal throughput (cycles per operation).
    pub throughput: f32,
}

impl OpCost {
    /// Create a cost.
    pub const fn new(latency: u8, throughput: f32) -> Self {
        Self {
            latency,
            throughput,
        }
    }

    /// An operation that compiles away.
    pub const fn free() -> Self {
        Self::new(0, 0.0)
    }

    /// Very cheap operation (register move, low-lane extract).
    pub const fn trivial() -> Self {
        Self::new(1, 0.33)
    }

    /// Simple ALU operation.
    pub const fn alu() -> Self {
        Self::new(1, 0.5)
    }

    /// Multiplication.
    pub const fn mul() -> Self {
        Self::new(3, 1.0)
    }

    /// Division.
    pub const fn div() -> Self {
        Self::new(14, 6.0)
    }

    /// Memory load.
    pub const fn load() -> Self {
        Self::new(5, 0.5)
    }

    /// Memory store.
    pub const fn store() -> Self {
        Self::new(4, 1.0)
    }

    /// Lane shuffle/insert.
    pub const fn shuffle() -> Self {
        Self::new(1, 1.0)
    }

    /// Cross-lane movement.
    pub const fn cross_lane() -> Self {
        Self::new(3, 1.0)
    }

    /// Add a throughput penalty.
    pub fn with_penalty(self, throughput_penalty: f32) -> Self {
        Self {
            latency: self.latency,
            throughput: self.throughput + throughput_penalty,
        }
    }

    /// Collapse to a single comparable number; throughput dominates for
    /// loop-resident code.
    pub fn total_cost(&self) -> f32 {
        self.throughput + self.latency as f32 * 0.2
    }
}

impl Default for OpCost {
    fn default() -> Self {
        Self::alu()
    }
}

// =============================================================================
// Cost Policy
// =============================================================================

/// Tunable integer weights for the pairwise packing heuristic.
#[derive(Debug, Clone, Copy)]
pub struct CostPolicy {
    /// Bonus when a packed pair's neighbor pair is adjacent in memory.
    pub adjacent_profit: i32,
    /// Cost of materializing one lane of a vector operand from scalars.
    pub pack_cost_per_elem: i32,
    /// Cost of extracting one lane for a scalar consumer.
    pub unpack_cost_per_elem: i32,
    /// Minimum modeled saving for a pack to survive filtering.
    pub min_savings: f32,
}

impl CostPolicy {
    /// Estimated cost of assembling `ct` lanes from scalars.
    #[inline]
    pub const fn pack_cost(&self, ct: i32) -> i32 {
        self.pack_cost_per_elem * ct
    }

    /// Estimated cost of extracting `ct` lanes back to scalars.
    #[inline]
    pub const fn unpack_cost(&self, ct: i32) -> i32 {
        self.unpack_cost_per_elem * ct
    }
}

impl Default for CostPolicy {
    fn default() -> Self {
        CostPolicy {
            adjacent_profit: 2,
            pack_cost_per_elem: 1,
            unpack_cost_per_elem: 1,
            min_savings: 0.0,
        }
    }
}

// =============================================================================
// Vector Cost Model
// =============================================================================

/// Cost model and implementability oracle for one SIMD level.
pub struct VectorCostModel {
    level: SimdLevel,
    /// Extra throughput for unaligned vector memory access.
    alignment_penalty: f32,
}

impl VectorCostModel {
    /// Create a cost model for a SIMD level.
    pub fn new(level: SimdLevel) -> Self {
        Self {
            level,
            alignment_penalty: match level {
                SimdLevel::Sse42 => 0.5,
                SimdLevel::Avx2 => 0.3,
                SimdLevel::Avx512 => 0.1,
            },
        }
    }

    /// Target SIMD level.
    #[inline]
    pub fn level(&self) -> SimdLevel {
        self.level
    }

    // =========================================================================
    // Implementability
    // =========================================================================

    /// Does a vector operation exist for this scalar operator, element type
    /// and lane count?
    pub fn implemented(&self, op: &Operator, element: ValueType, lanes: usize) -> bool {
        if lanes < 2 || !lanes.is_power_of_two() {
            return false;
        }
        if !element.is_vectorizable() {
            return false;
        }
        if element.byte_size() * lanes > self.level.max_vector_bytes() {
            return false;
        }
        match op {
            Operator::Load(_) | Operator::Store(_) => true,
            Operator::IntOp(a) => match a {
                ArithOp::Add | ArithOp::Sub | ArithOp::Neg | ArithOp::Abs => true,
                ArithOp::Min | ArithOp::Max => {
                    element != ValueType::I64 || self.level >= SimdLevel::Avx512
                }
                ArithOp::Mul => match element {
                    ValueType::I16 | ValueType::I32 => true,
                    ValueType::I64 => self.level >= SimdLevel::Avx512,
                    _ => false,
                },
                // No packed integer division on any tier.
                ArithOp::Div => false,
            },
            Operator::FloatOp(_) => element.is_float(),
            Operator::Bitwise(b) => {
                element.is_int()
                    && match b {
                        BitwiseOp::And | BitwiseOp::Or | BitwiseOp::Xor => true,
                        // Per-lane variable shifts need AVX2.
                        BitwiseOp::Shl | BitwiseOp::Shr => self.level >= SimdLevel::Avx2,
                    }
            }
            Operator::IntCmp(_) | Operator::FloatCmp(_) => true,
            Operator::Select => true,
            Operator::Convert(_) => true,
            _ => false,
        }
    }

    /// Does a horizontal reduction exist for this kind and element type?
    pub fn reduce_implemented(&self, kind: ReduceKind, element: ValueType) -> bool {
        match kind {
            ReduceKind::Add | ReduceKind::Min | ReduceKind::Max => element.is_vectorizable(),
            // Integer lane products have no reasonable horizontal form.
            ReduceKind::Mul => element.is_float(),
        }
    }

    // =========================================================================
    // Costs
    // =========================================================================

    /// Cost of one scalar operation.
    pub fn scalar_cost(&self, op: &Operator) -> OpCost {
        match op {
            Operator::IntOp(a) | Operator::FloatOp(a) => match a {
                ArithOp::Mul => OpCost::mul(),
                ArithOp::Div => OpCost::div(),
                ArithOp::Neg | ArithOp::Abs => OpCost::trivial(),
                _ => OpCost::alu(),
            },
            Operator::Load(_) => OpCost::load(),
            Operator::Store(_) => OpCost::store(),
            Operator::Bitwise(_) | Operator::IntCmp(_) | Operator::FloatCmp(_) => OpCost::alu(),
            Operator::Select | Operator::Convert(_) => OpCost::trivial(),
            _ => OpCost::alu(),
        }
    }

    /// Cost of one vector operation replacing a pack of the given scalar
    /// operator.
    pub fn vector_cost(&self, op: &Operator, shape: VectorShape, aligned: bool) -> OpCost {
        match op {
            Operator::IntOp(a) | Operator::FloatOp(a) => match a {
                ArithOp::Mul => OpCost::mul(),
                ArithOp::Div => {
                    if shape.lanes > 4 {
                        OpCost::new(14, 9.0)
                    } else {
                        OpCost::div()
                    }
                }
                ArithOp::Neg | ArithOp::Abs => OpCost::trivial(),
                _ => OpCost::alu(),
            },
            Operator::Load(_) => {
                if aligned {
                    OpCost::load()
                } else {
                    OpCost::load().with_penalty(self.alignment_penalty)
                }
            }
            Operator::Store(_) => {
                if aligned {
                    OpCost::store()
                } else {
                    OpCost::store().with_penalty(self.alignment_penalty)
                }
            }
            Operator::Bitwise(_) | Operator::IntCmp(_) | Operator::FloatCmp(_) => OpCost::alu(),
            Operator::Select | Operator::Convert(_) => OpCost::shuffle(),
            _ => OpCost::alu(),
        }
    }

    /// Cost of broadcasting a scalar into all lanes.
    pub fn broadcast_cost(&self) -> OpCost {
        OpCost::trivial()
    }

    /// Cost of inserting a scalar into one lane.
    pub fn insert_cost(&self) -> OpCost {
        OpCost::shuffle()
    }

    /// Cost of extracting one lane.
    pub fn extract_cost(&self, shape: VectorShape, lane: u8) -> OpCost {
        if lane == 0 {
            OpCost::trivial()
        } else if lane < shape.lanes / 2 {
            OpCost::shuffle()
        } else {
            OpCost::cross_lane()
        }
    }

    /// Cost of a horizontal combine: log2(lanes) shuffle+op steps.
    pub fn reduce_cost(&self, shape: VectorShape) -> OpCost {
        let steps = (shape.lanes as f32).log2().ceil() as u8;
        OpCost::new(steps * 2, steps as f32)
    }
}

impl Default for VectorCostModel {
    fn default() -> Self {
        Self::new(SimdLevel::default())
    }
}

impl std::fmt::Debug for VectorCostModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorCostModel")
            .field("level", &self.level)
            .field("alignment_penalty", &self.alignment_penalty)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
