use collopt_ir::{
    BinOp, CollectiveAttrs, CompId, ExecutionThreads, InstId, InstructionKind, IrError, Literal,
    Module, NewInstruction, Opcode, PrimitiveType, Shape,
};

use crate::{
    analysis::replication::{ReplicationAnalysis, ReplicationOracle},
    pass::{ModulePass, PassError},
};

/// The algebraic meaning of a recognized binary reducer computation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReducerKind {
    Add,
    Min,
    Max,
    Or,
    And,
    Unrecognized,
}

impl ReducerKind {
    /// Classify a reducer computation.
    ///
    /// Only computations of exactly two parameters and a single combining root are recognized.
    pub fn classify(module: &Module, comp: CompId) -> Self {
        let Some(computation) = module.get_computation(comp) else {
            return ReducerKind::Unrecognized;
        };

        if computation.instruction_count() != 3 || computation.num_parameters() != 2 {
            return ReducerKind::Unrecognized;
        }

        let Some(root) = computation.root.and_then(|root| module.get_instruction(root)) else {
            return ReducerKind::Unrecognized;
        };

        match root.opcode() {
            Opcode::Add => ReducerKind::Add,
            Opcode::Minimum => ReducerKind::Min,
            Opcode::Maximum => ReducerKind::Max,
            Opcode::Or => ReducerKind::Or,
            Opcode::And => ReducerKind::And,
            _ => ReducerKind::Unrecognized,
        }
    }

    /// Reducers for which combining any number of equal values yields that value.
    #[must_use]
    pub fn is_idempotent(self) -> bool {
        matches!(
            self,
            ReducerKind::Min | ReducerKind::Max | ReducerKind::Or | ReducerKind::And
        )
    }
}

/// Removes collectives that are provably redundant.
///
/// * An all-gather or reduce-scatter whose result has the same shape as its operand moves no data
///   and is replaced by its operand.
/// * A cross-replica all-reduce over groups of size one is replaced by its operand.
/// * A cross-replica all-reduce of a replicated value is replaced by its operand when the reducer
///   is idempotent (min, max, and, or), or by the operand multiplied by the group size when the
///   reducer is an add.
///
/// Tuple-shaped all-reduces and all-reduces with a channel id are never touched.
#[derive(Debug, Copy, Clone)]
pub struct AllReduceSimplifier {
    replica_count: usize,
}

impl AllReduceSimplifier {
    pub fn new(replica_count: usize) -> Self {
        Self { replica_count }
    }

    pub fn for_module(module: &Module) -> Self {
        Self::new(module.config.replica_count)
    }

    pub fn replica_count(&self) -> usize {
        self.replica_count
    }

    /// The number of participants in every replica group, or `None` if the groups differ in size.
    ///
    /// A collective without explicit groups has one group of every replica.
    pub fn replica_group_size(&self, attrs: &CollectiveAttrs) -> Option<usize> {
        match attrs.replica_groups.split_first() {
            None => Some(self.replica_count),
            Some((first, rest)) => rest
                .iter()
                .all(|group| group.len() == first.len())
                .then_some(first.len()),
        }
    }

    pub fn run(&self, module: &mut Module, threads: &ExecutionThreads) -> Result<bool, PassError> {
        let replication = ReplicationAnalysis::run(module, false)?;
        self.run_with_oracle(module, threads, &replication)
    }

    /// Run the simplifier, answering replication queries from `oracle`.
    ///
    /// Answers from `oracle` must describe the module as it is when this is called. The oracle is
    /// not consulted after the first rewrite.
    pub fn run_with_oracle(
        &self,
        module: &mut Module,
        threads: &ExecutionThreads,
        oracle: &impl ReplicationOracle,
    ) -> Result<bool, PassError> {
        let computations = module.computations_in(threads).collect::<Vec<_>>();
        let mut changed = false;

        for &comp in &computations {
            changed |= remove_degenerate_gathers(module, comp)?;
        }

        let mut candidates = Vec::new();
        for &comp in &computations {
            self.collect_candidates(module, comp, oracle, &mut candidates);
        }

        for (inst_id, group_size) in candidates {
            changed |= self.rewrite(module, inst_id, group_size)?;
        }

        Ok(changed)
    }

    fn collect_candidates(
        &self,
        module: &Module,
        comp: CompId,
        oracle: &impl ReplicationOracle,
        candidates: &mut Vec<(InstId, usize)>,
    ) {
        for inst_id in module.instructions_post_order(comp) {
            let inst = module.instruction(inst_id);
            let InstructionKind::AllReduce { attrs, .. } = &inst.kind else {
                continue;
            };

            // Tuple-shaped all-reduces may be used purely for synchronization, keep them.
            if !inst.shape.is_array() {
                log::trace!("skipping {inst_id}, result shape {} is not an array", inst.shape);
                continue;
            }

            if !attrs.is_cross_replica() {
                log::trace!("skipping {inst_id}, not a cross-replica all-reduce");
                continue;
            }

            let Some(group_size) = self.replica_group_size(attrs) else {
                log::trace!("skipping {inst_id}, replica groups are not uniform in size");
                continue;
            };

            let Some(operand) = inst.operand(0) else {
                continue;
            };

            if group_size == 1 || oracle.is_replicated_at(operand, &[]) {
                candidates.push((inst_id, group_size));
            } else {
                log::trace!("skipping {inst_id}, operand {operand} is not replicated");
            }
        }
    }

    fn rewrite(
        &self,
        module: &mut Module,
        inst_id: InstId,
        group_size: usize,
    ) -> Result<bool, PassError> {
        let Some(inst) = module.get_instruction(inst_id) else {
            return Ok(false);
        };
        let Some(operand) = inst.operand(0) else {
            return Ok(false);
        };

        let replacement = if group_size == 1 {
            operand
        } else {
            let Some(to_apply) = inst.kind.to_apply() else {
                return Ok(false);
            };

            match ReducerKind::classify(module, to_apply) {
                ReducerKind::Add => {
                    let Ok(multiplier) = i32::try_from(group_size) else {
                        log::trace!("skipping {inst_id}, group size {group_size} overflows s32");
                        return Ok(false);
                    };
                    multiply_by_constant(module, inst_id, operand, multiplier)?
                }
                kind if kind.is_idempotent() => operand,
                _ => {
                    log::trace!("skipping {inst_id}, reducer {to_apply} is not recognized");
                    return Ok(false);
                }
            }
        };

        log::debug!("replacing {inst_id} with {replacement}");
        module.replace_instruction(inst_id, replacement)?;
        Ok(true)
    }
}

impl ModulePass for AllReduceSimplifier {
    fn name(&self) -> &'static str {
        "all-reduce-simplifier"
    }

    fn run(&mut self, module: &mut Module, threads: &ExecutionThreads) -> Result<bool, PassError> {
        AllReduceSimplifier::run(self, module, threads)
    }
}

/// Replace every all-gather and reduce-scatter in `comp` whose result shape matches its operand
/// shape with that operand.
fn remove_degenerate_gathers(module: &mut Module, comp: CompId) -> Result<bool, IrError> {
    let mut changed = false;

    for inst_id in module.instructions_post_order(comp) {
        let Some(inst) = module.get_instruction(inst_id) else {
            continue;
        };
        if !matches!(inst.opcode(), Opcode::AllGather | Opcode::ReduceScatter) {
            continue;
        }
        let Some(operand) = inst.operand(0) else {
            continue;
        };

        if inst.shape.compatible(&module.instruction(operand).shape) {
            log::debug!("replacing {inst_id} with {operand}");
            module.replace_instruction(inst_id, operand)?;
            changed = true;
        }
    }

    Ok(changed)
}

/// Build `operand * multiplier` next to `inst_id`, with the scalar `multiplier` converted to the
/// element type of `inst_id` and broadcast to its shape.
fn multiply_by_constant(
    module: &mut Module,
    inst_id: InstId,
    operand: InstId,
    multiplier: i32,
) -> Result<InstId, IrError> {
    let inst = module.instruction(inst_id);
    let comp = inst.parent;
    let shape = inst.shape.clone();
    let element_type = shape.element_type().unwrap_or(PrimitiveType::S32);

    let mut factor =
        module.add_instruction(comp, NewInstruction::constant(Literal::S32(multiplier)))?;

    if element_type != PrimitiveType::S32 {
        factor = module.add_instruction(
            comp,
            NewInstruction::convert(Shape::scalar(element_type), factor),
        )?;
    }

    if shape.rank().is_some_and(|rank| rank > 0) {
        factor = module.add_instruction(
            comp,
            NewInstruction::broadcast(shape.clone(), factor, Vec::new()),
        )?;
    }

    module.add_instruction(
        comp,
        NewInstruction::binary(BinOp::Multiply, shape, operand, factor),
    )
}
