use collopt_ir::{CollectiveAttrs, CompId, InstId, InstructionKind, Module, Shape};
use collopt_util::id_map::SecondaryMap;
use thiserror::Error;

/// Answers whether a value is known to be identical on every participant of the analysed
/// execution domain.
pub trait ReplicationOracle {
    /// Whether the value of `inst` at the tuple index path `index` is replicated.
    ///
    /// An index that names a tuple answers whether every leaf below it is replicated. Unknown
    /// instructions and invalid indexes are never replicated.
    fn is_replicated_at(&self, inst: InstId, index: &[usize]) -> bool;

    fn is_replicated(&self, inst: InstId) -> bool {
        self.is_replicated_at(inst, &[])
    }
}

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("instruction {inst} uses operand {operand} which has not been analysed")]
    MissingOperand { inst: InstId, operand: InstId },
    #[error("instruction {inst} selects tuple element {index} which does not exist")]
    BadTupleIndex { inst: InstId, index: usize },
    #[error("instruction {inst} applies missing computation {comp}")]
    MissingComputation { inst: InstId, comp: CompId },
}

/// Replication facts for every leaf of an instruction's shape.
#[derive(Debug, Clone, Eq, PartialEq)]
enum ReplicationTree {
    Leaf(bool),
    Tuple(Vec<ReplicationTree>),
}

impl ReplicationTree {
    fn uniform(shape: &Shape, replicated: bool) -> Self {
        match shape {
            Shape::Tuple(elements) => ReplicationTree::Tuple(
                elements
                    .iter()
                    .map(|element| ReplicationTree::uniform(element, replicated))
                    .collect(),
            ),
            Shape::Array(_) | Shape::Token => ReplicationTree::Leaf(replicated),
        }
    }

    fn subtree(&self, index: &[usize]) -> Option<&ReplicationTree> {
        let mut tree = self;
        for &i in index {
            match tree {
                ReplicationTree::Tuple(elements) => tree = elements.get(i)?,
                ReplicationTree::Leaf(_) => return None,
            }
        }
        Some(tree)
    }

    fn all(&self) -> bool {
        match self {
            ReplicationTree::Leaf(replicated) => *replicated,
            ReplicationTree::Tuple(elements) => elements.iter().all(ReplicationTree::all),
        }
    }
}

/// Forward dataflow analysis of value replication.
///
/// In cross-replica mode a value is replicated if every replica observes the same value. In
/// cross-partition mode a value is replicated if every partition of a replica observes the same
/// value. Facts are a snapshot of the module at the time `run` is called and are not updated when
/// the module changes afterwards.
#[derive(Debug)]
pub struct ReplicationAnalysis {
    cross_partition_spmd: bool,
    facts: SecondaryMap<InstId, ReplicationTree>,
}

impl ReplicationAnalysis {
    pub fn run(module: &Module, cross_partition_spmd: bool) -> Result<Self, ReplicationError> {
        let mut analysis = Self {
            cross_partition_spmd,
            facts: SecondaryMap::new(),
        };

        // There are no call instructions, so a single sweep in post-order per computation reaches
        // the fixed point.
        for (comp_id, _) in module.computations() {
            for inst_id in module.instructions_post_order(comp_id) {
                let tree = analysis.compute(module, inst_id)?;
                analysis.facts.insert(inst_id, tree);
            }
        }

        log::trace!(
            "replication analysis of {} computed facts for {} instructions",
            module.name,
            analysis.facts.len()
        );

        Ok(analysis)
    }

    pub fn cross_partition_spmd(&self) -> bool {
        self.cross_partition_spmd
    }

    fn operand_tree(
        &self,
        inst: InstId,
        operand: InstId,
    ) -> Result<&ReplicationTree, ReplicationError> {
        self.facts
            .get(operand)
            .ok_or(ReplicationError::MissingOperand { inst, operand })
    }

    fn operands_replicated(
        &self,
        module: &Module,
        inst_id: InstId,
    ) -> Result<bool, ReplicationError> {
        for &operand in &module.instruction(inst_id).operands {
            if !self.operand_tree(inst_id, operand)?.all() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether a collective combines values from every participant of the analysed domain, so that
    /// every participant receives the same result.
    fn spans_domain(&self, module: &Module, attrs: &CollectiveAttrs) -> bool {
        let config = &module.config;
        if self.cross_partition_spmd {
            attrs.channel_id.is_some()
                && (attrs.replica_groups.is_empty()
                    || (attrs.use_global_device_ids
                        && attrs.spans_all(config.replica_count * config.num_partitions)))
        } else {
            attrs.is_cross_replica() && attrs.spans_all(config.replica_count)
        }
    }

    fn compute(
        &self,
        module: &Module,
        inst_id: InstId,
    ) -> Result<ReplicationTree, ReplicationError> {
        let inst = module.instruction(inst_id);

        let replicated = match &inst.kind {
            &InstructionKind::Parameter { replicated, .. } => replicated,
            InstructionKind::Constant(_) => true,
            InstructionKind::ReplicaId => self.cross_partition_spmd,
            InstructionKind::PartitionId => !self.cross_partition_spmd,
            InstructionKind::Tuple => {
                let elements = inst
                    .operands
                    .iter()
                    .map(|&operand| self.operand_tree(inst_id, operand).cloned())
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(ReplicationTree::Tuple(elements));
            }
            &InstructionKind::GetTupleElement(index) => {
                let Some(operand) = inst.operand(0) else {
                    return Err(ReplicationError::BadTupleIndex { inst: inst_id, index });
                };
                return self
                    .operand_tree(inst_id, operand)?
                    .subtree(&[index])
                    .cloned()
                    .ok_or(ReplicationError::BadTupleIndex { inst: inst_id, index });
            }
            InstructionKind::AllReduce { to_apply, attrs } => {
                if module.get_computation(*to_apply).is_none() {
                    return Err(ReplicationError::MissingComputation {
                        inst: inst_id,
                        comp: *to_apply,
                    });
                }
                self.spans_domain(module, attrs) || self.operands_replicated(module, inst_id)?
            }
            InstructionKind::AllGather { attrs, .. } => {
                self.spans_domain(module, attrs) || self.operands_replicated(module, inst_id)?
            }
            // Every participant of a reduce-scatter receives a different slice of the result, even
            // when every operand is replicated.
            InstructionKind::ReduceScatter { to_apply, .. } => {
                if module.get_computation(*to_apply).is_none() {
                    return Err(ReplicationError::MissingComputation {
                        inst: inst_id,
                        comp: *to_apply,
                    });
                }
                false
            }
            InstructionKind::Convert
            | InstructionKind::Broadcast { .. }
            | InstructionKind::Unary(_)
            | InstructionKind::Binary(_) => self.operands_replicated(module, inst_id)?,
        };

        Ok(ReplicationTree::uniform(&inst.shape, replicated))
    }
}

impl ReplicationOracle for ReplicationAnalysis {
    fn is_replicated_at(&self, inst: InstId, index: &[usize]) -> bool {
        self.facts
            .get(inst)
            .and_then(|tree| tree.subtree(index))
            .is_some_and(ReplicationTree::all)
    }
}
