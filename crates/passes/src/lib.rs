pub mod analysis;
pub mod pass;
pub mod passes;
pub mod pipeline;
pub mod settings;

pub use self::{
    analysis::replication::{ReplicationAnalysis, ReplicationError, ReplicationOracle},
    pass::{ModulePass, PassError},
    passes::{
        all_reduce_simplifier::{AllReduceSimplifier, ReducerKind},
        dead_code_elim::DeadCodeElimination,
    },
    pipeline::PassPipeline,
    settings::PipelineSettings,
};
