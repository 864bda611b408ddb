use std::fmt;

use collopt_util::typed_id_map::new_id_type;

use crate::{collective::CollectiveAttrs, literal::Literal, shape::Shape};

new_id_type! {
    pub struct InstId = "%";
    pub struct CompId = "C";
}

/// The closed set of operation tags known to the IR.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Opcode {
    Parameter,
    Constant,
    ReplicaId,
    PartitionId,
    Convert,
    Broadcast,
    Tuple,
    GetTupleElement,
    Negate,
    Not,
    Abs,
    Add,
    Subtract,
    Multiply,
    Divide,
    Minimum,
    Maximum,
    And,
    Or,
    Xor,
    AllReduce,
    AllGather,
    ReduceScatter,
}

impl Opcode {
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Parameter => "parameter",
            Opcode::Constant => "constant",
            Opcode::ReplicaId => "replica-id",
            Opcode::PartitionId => "partition-id",
            Opcode::Convert => "convert",
            Opcode::Broadcast => "broadcast",
            Opcode::Tuple => "tuple",
            Opcode::GetTupleElement => "get-tuple-element",
            Opcode::Negate => "negate",
            Opcode::Not => "not",
            Opcode::Abs => "abs",
            Opcode::Add => "add",
            Opcode::Subtract => "subtract",
            Opcode::Multiply => "multiply",
            Opcode::Divide => "divide",
            Opcode::Minimum => "minimum",
            Opcode::Maximum => "maximum",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::AllReduce => "all-reduce",
            Opcode::AllGather => "all-gather",
            Opcode::ReduceScatter => "reduce-scatter",
        }
    }

    #[must_use]
    pub fn is_collective(self) -> bool {
        matches!(
            self,
            Opcode::AllReduce | Opcode::AllGather | Opcode::ReduceScatter
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum UnOp {
    Negate,
    Not,
    Abs,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BinOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Minimum,
    Maximum,
    And,
    Or,
    Xor,
}

/// The operation an instruction performs, along with any operation-specific attributes.
///
/// Data operands are not stored here, they live in `Instruction::operands` so that the graph
/// edges of every instruction can be rewritten uniformly.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// A computation parameter. `replicated` is an annotation promising that the argument is
    /// identical across all replicas.
    Parameter {
        number: usize,
        replicated: bool,
    },
    Constant(Literal),
    ReplicaId,
    PartitionId,
    Convert,
    /// Broadcast the single operand to the result shape. `dimensions` maps each operand dimension
    /// to a result dimension, and is empty for scalar operands.
    Broadcast {
        dimensions: Vec<usize>,
    },
    Tuple,
    GetTupleElement(usize),
    Unary(UnOp),
    Binary(BinOp),
    /// Reduce operands across the participants of each replica group using the binary reducer
    /// computation `to_apply`.
    AllReduce {
        to_apply: CompId,
        attrs: CollectiveAttrs,
    },
    /// Concatenate operands from every participant of each replica group along `dimension`.
    AllGather {
        dimension: usize,
        attrs: CollectiveAttrs,
    },
    /// Reduce across each replica group, then hand every participant one slice along
    /// `dimension`.
    ReduceScatter {
        dimension: usize,
        to_apply: CompId,
        attrs: CollectiveAttrs,
    },
}

impl InstructionKind {
    pub fn opcode(&self) -> Opcode {
        match self {
            InstructionKind::Parameter { .. } => Opcode::Parameter,
            InstructionKind::Constant(_) => Opcode::Constant,
            InstructionKind::ReplicaId => Opcode::ReplicaId,
            InstructionKind::PartitionId => Opcode::PartitionId,
            InstructionKind::Convert => Opcode::Convert,
            InstructionKind::Broadcast { .. } => Opcode::Broadcast,
            InstructionKind::Tuple => Opcode::Tuple,
            InstructionKind::GetTupleElement(_) => Opcode::GetTupleElement,
            InstructionKind::Unary(op) => match op {
                UnOp::Negate => Opcode::Negate,
                UnOp::Not => Opcode::Not,
                UnOp::Abs => Opcode::Abs,
            },
            InstructionKind::Binary(op) => match op {
                BinOp::Add => Opcode::Add,
                BinOp::Subtract => Opcode::Subtract,
                BinOp::Multiply => Opcode::Multiply,
                BinOp::Divide => Opcode::Divide,
                BinOp::Minimum => Opcode::Minimum,
                BinOp::Maximum => Opcode::Maximum,
                BinOp::And => Opcode::And,
                BinOp::Or => Opcode::Or,
                BinOp::Xor => Opcode::Xor,
            },
            InstructionKind::AllReduce { .. } => Opcode::AllReduce,
            InstructionKind::AllGather { .. } => Opcode::AllGather,
            InstructionKind::ReduceScatter { .. } => Opcode::ReduceScatter,
        }
    }

    pub fn collective_attrs(&self) -> Option<&CollectiveAttrs> {
        match self {
            InstructionKind::AllReduce { attrs, .. }
            | InstructionKind::AllGather { attrs, .. }
            | InstructionKind::ReduceScatter { attrs, .. } => Some(attrs),
            _ => None,
        }
    }

    /// The reducer computation of a reduction-style collective.
    pub fn to_apply(&self) -> Option<CompId> {
        match *self {
            InstructionKind::AllReduce { to_apply, .. }
            | InstructionKind::ReduceScatter { to_apply, .. } => Some(to_apply),
            _ => None,
        }
    }
}

/// A single node in the IR graph.
///
/// `operands` are the ordered data inputs of this instruction. `users` is the set of instructions
/// that name this one as an operand; an instruction appears in `users` once even if it uses this
/// instruction in several operand slots. The two lists are kept mutually consistent by every
/// `Module` mutation.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub shape: Shape,
    pub operands: Vec<InstId>,
    pub users: Vec<InstId>,
    pub parent: CompId,
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        self.kind.opcode()
    }

    pub fn operand(&self, i: usize) -> Option<InstId> {
        self.operands.get(i).copied()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// An all-reduce that only communicates across replicas and carries no cross-partition
    /// channel.
    #[must_use]
    pub fn is_cross_replica_all_reduce(&self) -> bool {
        match &self.kind {
            InstructionKind::AllReduce { attrs, .. } => attrs.is_cross_replica(),
            _ => false,
        }
    }

    /// Channel-qualified collectives synchronize with other partitions, so they are kept even when
    /// their result is unused.
    #[must_use]
    pub fn has_side_effect(&self) -> bool {
        self.kind
            .collective_attrs()
            .is_some_and(|attrs| attrs.channel_id.is_some())
    }
}

/// A description of an instruction that has not yet been added to a computation.
#[derive(Debug, Clone)]
pub struct NewInstruction {
    pub kind: InstructionKind,
    pub shape: Shape,
    pub operands: Vec<InstId>,
}

impl NewInstruction {
    pub fn new(kind: InstructionKind, shape: Shape, operands: impl Into<Vec<InstId>>) -> Self {
        Self {
            kind,
            shape,
            operands: operands.into(),
        }
    }

    pub fn parameter(number: usize, shape: Shape) -> Self {
        Self::new(
            InstructionKind::Parameter {
                number,
                replicated: false,
            },
            shape,
            Vec::new(),
        )
    }

    pub fn replicated_parameter(number: usize, shape: Shape) -> Self {
        Self::new(
            InstructionKind::Parameter {
                number,
                replicated: true,
            },
            shape,
            Vec::new(),
        )
    }

    pub fn constant(literal: Literal) -> Self {
        Self::new(InstructionKind::Constant(literal), literal.shape(), Vec::new())
    }

    pub fn replica_id() -> Self {
        Self::new(
            InstructionKind::ReplicaId,
            Shape::scalar(crate::shape::PrimitiveType::U32),
            Vec::new(),
        )
    }

    pub fn partition_id() -> Self {
        Self::new(
            InstructionKind::PartitionId,
            Shape::scalar(crate::shape::PrimitiveType::U32),
            Vec::new(),
        )
    }

    pub fn convert(shape: Shape, operand: InstId) -> Self {
        Self::new(InstructionKind::Convert, shape, [operand])
    }

    pub fn broadcast(shape: Shape, operand: InstId, dimensions: impl Into<Vec<usize>>) -> Self {
        Self::new(
            InstructionKind::Broadcast {
                dimensions: dimensions.into(),
            },
            shape,
            [operand],
        )
    }

    pub fn tuple(shape: Shape, elements: impl Into<Vec<InstId>>) -> Self {
        Self::new(InstructionKind::Tuple, shape, elements)
    }

    pub fn get_tuple_element(shape: Shape, operand: InstId, index: usize) -> Self {
        Self::new(InstructionKind::GetTupleElement(index), shape, [operand])
    }

    pub fn unary(op: UnOp, shape: Shape, operand: InstId) -> Self {
        Self::new(InstructionKind::Unary(op), shape, [operand])
    }

    pub fn binary(op: BinOp, shape: Shape, left: InstId, right: InstId) -> Self {
        Self::new(InstructionKind::Binary(op), shape, [left, right])
    }

    pub fn all_reduce(
        shape: Shape,
        operands: impl Into<Vec<InstId>>,
        to_apply: CompId,
        attrs: CollectiveAttrs,
    ) -> Self {
        Self::new(InstructionKind::AllReduce { to_apply, attrs }, shape, operands)
    }

    pub fn all_gather(
        shape: Shape,
        operands: impl Into<Vec<InstId>>,
        dimension: usize,
        attrs: CollectiveAttrs,
    ) -> Self {
        Self::new(InstructionKind::AllGather { dimension, attrs }, shape, operands)
    }

    pub fn reduce_scatter(
        shape: Shape,
        operands: impl Into<Vec<InstId>>,
        dimension: usize,
        to_apply: CompId,
        attrs: CollectiveAttrs,
    ) -> Self {
        Self::new(
            InstructionKind::ReduceScatter {
                dimension,
                to_apply,
                attrs,
            },
            shape,
            operands,
        )
    }
}
