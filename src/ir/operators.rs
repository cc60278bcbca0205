//! Operators for the loop IR.
//!
//! One unified `Copy` operator enum covers the scalar operations a loop body
//! may contain and the vector operations the emitter produces. Memory
//! operations carry their resolved address descriptor ([`MemRef`]) inline:
//! the surrounding framework resolves base/offset/stride addressing before
//! the pass runs, and the pass only does arithmetic on the descriptor.

use super::node::NodeId;
use super::types::ValueType;

// =============================================================================
// Scalar Operator Kinds
// =============================================================================

/// Arithmetic operation kind (integer or float, per the operator wrapper).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArithOp {
    /// Addition: a + b
    Add = 0,
    /// Subtraction: a - b
    Sub = 1,
    /// Multiplication: a * b
    Mul = 2,
    /// Division: a / b
    Div = 3,
    /// Minimum: min(a, b)
    Min = 4,
    /// Maximum: max(a, b)
    Max = 5,
    /// Negation: -a
    Neg = 6,
    /// Absolute value: |a|
    Abs = 7,
}

impl ArithOp {
    /// Check if this operation is commutative.
    #[inline]
    pub const fn is_commutative(self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::Min | Self::Max)
    }

    /// Check if this operation is associative (reassociation-tolerant).
    #[inline]
    pub const fn is_associative(self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::Min | Self::Max)
    }

    /// Check if this is a unary operation.
    #[inline]
    pub const fn is_unary(self) -> bool {
        matches!(self, Self::Neg | Self::Abs)
    }
}

/// Comparison operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CmpOp {
    /// Equal.
    Eq = 0,
    /// Not equal.
    Ne = 1,
    /// Less than.
    Lt = 2,
    /// Less or equal.
    Le = 3,
    /// Greater than.
    Gt = 4,
    /// Greater or equal.
    Ge = 5,
}

/// Bitwise operation kind (integers only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BitwiseOp {
    /// Bitwise AND.
    And = 0,
    /// Bitwise OR.
    Or = 1,
    /// Bitwise XOR.
    Xor = 2,
    /// Shift left.
    Shl = 3,
    /// Arithmetic shift right.
    Shr = 4,
}

/// Width/class conversion kind.
///
/// Same-width truncation/extension pairs are the cases the pack isomorphism
/// rules must accept along mixed-width integer chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConvertKind {
    /// Integer truncation to a narrower width.
    Trunc = 0,
    /// Sign-extending integer widening.
    SignExtend = 1,
    /// Zero-extending integer widening.
    ZeroExtend = 2,
    /// Float narrowing (f64 -> f32).
    FpTrunc = 3,
    /// Float widening (f32 -> f64).
    FpExtend = 4,
}

// =============================================================================
// Memory Address Descriptor
// =============================================================================

/// Memory-location class ("slice").
///
/// Two memory operations may alias only if they share a slice; the slice
/// partitioning itself comes from the surrounding framework's alias analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SliceId(pub u32);

/// Resolved address of a memory operation, in bytes:
///
/// ```text
/// address = base + iv * iv_scale + offset
/// ```
///
/// `iv_scale` is the byte distance the address advances per unit of the
/// induction variable. A descriptor with `affine == false` could not be
/// expressed in this form; such references are never alignment anchors and
/// are treated conservatively by the dependence analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemRef {
    /// Base pointer node (loop-invariant).
    pub base: NodeId,
    /// Memory-location class.
    pub slice: SliceId,
    /// Constant byte offset from the base.
    pub offset: i32,
    /// Bytes advanced per induction-variable increment.
    pub iv_scale: i32,
    /// Access size in bytes (1, 2, 4, or 8).
    pub size: u8,
    /// Whether the address is affine in the induction variable.
    pub affine: bool,
}

impl MemRef {
    /// Create an affine reference.
    pub const fn new(base: NodeId, slice: SliceId, offset: i32, iv_scale: i32, size: u8) -> Self {
        MemRef {
            base,
            slice,
            offset,
            iv_scale,
            size,
            affine: true,
        }
    }

    /// Create a non-affine (opaque address) reference.
    pub const fn opaque(base: NodeId, slice: SliceId, size: u8) -> Self {
        MemRef {
            base,
            slice,
            offset: 0,
            iv_scale: 0,
            size,
            affine: false,
        }
    }

    /// Check if two references have the same base, slice, stride and size,
    /// so that their offsets are directly comparable.
    #[inline]
    pub fn comparable(&self, other: &MemRef) -> bool {
        self.affine
            && other.affine
            && self.base == other.base
            && self.slice == other.slice
            && self.iv_scale == other.iv_scale
            && self.size == other.size
    }
}

// =============================================================================
// Vector Shape
// =============================================================================

/// Element type and lane count of a vector operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VectorShape {
    /// Lane element type.
    pub element: ValueType,
    /// Number of lanes (2..=16, power of two).
    pub lanes: u8,
}

impl VectorShape {
    /// Create a shape.
    #[inline]
    pub const fn new(element: ValueType, lanes: u8) -> Self {
        VectorShape { element, lanes }
    }

    /// Total width in bytes.
    #[inline]
    pub const fn byte_width(&self) -> usize {
        self.element.byte_size() * self.lanes as usize
    }
}

/// Horizontal reduction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReduceKind {
    /// Sum of all lanes.
    Add = 0,
    /// Product of all lanes.
    Mul = 1,
    /// Minimum over all lanes.
    Min = 2,
    /// Maximum over all lanes.
    Max = 3,
}

impl ReduceKind {
    /// The reduction kind of an associative arithmetic operation, if any.
    pub const fn of_arith(op: ArithOp) -> Option<ReduceKind> {
        match op {
            ArithOp::Add => Some(ReduceKind::Add),
            ArithOp::Mul => Some(ReduceKind::Mul),
            ArithOp::Min => Some(ReduceKind::Min),
            ArithOp::Max => Some(ReduceKind::Max),
            _ => None,
        }
    }
}

// =============================================================================
// Operator
// =============================================================================

/// Unified operator: what a node computes.
///
/// Input conventions:
///
/// - binary arithmetic/bitwise/compare: `[lhs, rhs]`
/// - unary arithmetic / conversion: `[x]`
/// - `Select`: `[cond, if_true, if_false]`
/// - `Phi`: `[entry_value, backedge_value]`
/// - `Load`: `[base]`; `Store`: `[base, value]`
/// - `VectorLoad`: `[base]`; `VectorStore`: `[base, vector]`
/// - `VectorBroadcast`: `[scalar]`; `VectorExtract`: `[vector]`;
///   `VectorInsert`: `[vector, scalar]`; `VectorReduce`: `[acc, vector]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // Constants and entries
    /// Integer constant.
    ConstInt(i64),
    /// Float constant (stored as bits for Hash/Eq).
    ConstFloat(u64),
    /// Loop-invariant entry value (parameter, hoisted computation).
    Parameter(u16),
    /// Loop-carried value merge.
    Phi,

    // Scalar computation
    /// Integer arithmetic.
    IntOp(ArithOp),
    /// Float arithmetic.
    FloatOp(ArithOp),
    /// Bitwise operation.
    Bitwise(BitwiseOp),
    /// Integer comparison.
    IntCmp(CmpOp),
    /// Float comparison.
    FloatCmp(CmpOp),
    /// Conditional move: cond ? a : b.
    Select,
    /// Width/class conversion.
    Convert(ConvertKind),

    // Scalar memory
    /// Scalar load.
    Load(MemRef),
    /// Scalar store.
    Store(MemRef),

    // Vector computation (emitted by the vectorizer)
    /// Element-wise vector arithmetic.
    VectorArith(VectorShape, ArithOp),
    /// Element-wise vector bitwise operation.
    VectorBitwise(VectorShape, BitwiseOp),
    /// Element-wise vector comparison (produces a lane mask).
    VectorCmp(VectorShape, CmpOp),
    /// Lane select between two vectors by a mask.
    VectorBlend(VectorShape),
    /// Element-wise width/class conversion.
    VectorConvert(VectorShape, ConvertKind),

    // Vector memory
    /// Vector load; the flag records whether the access is aligned.
    VectorLoad(VectorShape, MemRef, bool),
    /// Vector store; the flag records whether the access is aligned.
    VectorStore(VectorShape, MemRef, bool),

    // Lane plumbing
    /// Broadcast a scalar into every lane.
    VectorBroadcast(VectorShape),
    /// Extract the scalar at a lane.
    VectorExtract(VectorShape, u8),
    /// Insert a scalar at a lane.
    VectorInsert(VectorShape, u8),
    /// Horizontal combine of all lanes folded into a scalar accumulator.
    VectorReduce(VectorShape, ReduceKind),
}

impl Operator {
    /// Check if this is a scalar memory operation.
    #[inline]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Operator::Load(_) | Operator::Store(_))
    }

    /// Check if this is a scalar load.
    #[inline]
    pub const fn is_load(&self) -> bool {
        matches!(self, Operator::Load(_))
    }

    /// Check if this is a scalar store.
    #[inline]
    pub const fn is_store(&self) -> bool {
        matches!(self, Operator::Store(_))
    }

    /// Address descriptor of a scalar memory operation.
    #[inline]
    pub const fn mem_ref(&self) -> Option<&MemRef> {
        match self {
            Operator::Load(r) | Operator::Store(r) => Some(r),
            _ => None,
        }
    }

    /// Check if this is a vector operation.
    #[inline]
    pub const fn is_vector(&self) -> bool {
        matches!(
            self,
            Operator::VectorArith(..)
                | Operator::VectorBitwise(..)
                | Operator::VectorCmp(..)
                | Operator::VectorBlend(..)
                | Operator::VectorConvert(..)
                | Operator::VectorLoad(..)
                | Operator::VectorStore(..)
                | Operator::VectorBroadcast(..)
                | Operator::VectorExtract(..)
                | Operator::VectorInsert(..)
                | Operator::VectorReduce(..)
        )
    }

    /// Check if this operator produces a loop-entry value (not packable, but
    /// a legal operand source from outside the block).
    #[inline]
    pub const fn is_entry(&self) -> bool {
        matches!(
            self,
            Operator::ConstInt(_) | Operator::ConstFloat(_) | Operator::Parameter(_) | Operator::Phi
        )
    }

    /// Check if two operators perform the same operation, ignoring
    /// per-instance payload that varies lane to lane (memory offsets).
    ///
    /// This is the opcode half of the isomorphism test: memory operations
    /// match when they access the same element size, everything else matches
    /// on exact operation kind.
    pub fn same_kind(&self, other: &Operator) -> bool {
        use Operator::*;
        match (self, other) {
            (IntOp(a), IntOp(b)) | (FloatOp(a), FloatOp(b)) => a == b,
            (Bitwise(a), Bitwise(b)) => a == b,
            (IntCmp(a), IntCmp(b)) | (FloatCmp(a), FloatCmp(b)) => a == b,
            (Select, Select) => true,
            (Convert(a), Convert(b)) => a == b,
            (Load(ra), Load(rb)) => ra.size == rb.size,
            (Store(ra), Store(rb)) => ra.size == rb.size,
            _ => false,
        }
    }

    /// Expected input count, if fixed for this operator.
    pub const fn arity(&self) -> usize {
        use Operator::*;
        match self {
            ConstInt(_) | ConstFloat(_) | Parameter(_) => 0,
            Phi => 2,
            IntOp(op) | FloatOp(op) => {
                if op.is_unary() {
                    1
                } else {
                    2
                }
            }
            Bitwise(_) | IntCmp(_) | FloatCmp(_) => 2,
            Select => 3,
            Convert(_) => 1,
            Load(_) => 1,
            Store(_) => 2,
            VectorArith(_, op) => {
                if op.is_unary() {
                    1
                } else {
                    2
                }
            }
            VectorBitwise(..) | VectorCmp(..) => 2,
            VectorBlend(_) => 3,
            VectorConvert(..) => 1,
            VectorLoad(..) => 1,
            VectorStore(..) => 2,
            VectorBroadcast(_) => 1,
            VectorExtract(..) => 1,
            VectorInsert(..) => 2,
            VectorReduce(..) => 2,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
