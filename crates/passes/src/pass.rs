use collopt_ir::{ExecutionThreads, IrError, Module, VerificationError};
use thiserror::Error;

use crate::analysis::replication::ReplicationError;

#[derive(Debug, Error)]
pub enum PassError {
    #[error("replication analysis failed: {0}")]
    Replication(#[from] ReplicationError),
    #[error("IR mutation failed: {0}")]
    Ir(#[from] IrError),
    #[error("module verification failed: {0}")]
    Verification(#[from] VerificationError),
}

/// A transformation over a whole module.
///
/// A pass has exclusive access to the module for the duration of `run`, and may only touch
/// computations on the given execution threads. Returns whether the module was changed.
pub trait ModulePass {
    fn name(&self) -> &'static str;

    fn run(&mut self, module: &mut Module, threads: &ExecutionThreads) -> Result<bool, PassError>;
}
