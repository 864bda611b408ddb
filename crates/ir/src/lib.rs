pub mod collective;
pub mod graph;
pub mod instruction;
pub mod literal;
pub mod module;
pub mod print;
pub mod shape;
pub mod verify;

pub use collective::{CollectiveAttrs, ReplicaGroup};
pub use instruction::{
    BinOp, CompId, InstId, Instruction, InstructionKind, NewInstruction, Opcode, UnOp,
};
pub use literal::Literal;
pub use module::{Computation, ExecutionThreads, IrError, MAIN_THREAD, Module, ModuleConfig};
pub use shape::{ArrayShape, PrimitiveType, Shape};
pub use verify::{VerificationError, verify_module};
