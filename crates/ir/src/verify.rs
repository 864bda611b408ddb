use std::collections::HashSet;

use thiserror::Error;

use crate::{
    instruction::{CompId, InstId, InstructionKind},
    module::Module,
};

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("entry computation {0} does not exist")]
    BadEntry(CompId),
    #[error("computation {comp} lists missing instruction {inst}")]
    BadInstruction { inst: InstId, comp: CompId },
    #[error("instruction {inst} is listed in {comp} but its parent is {parent}")]
    BadParent {
        inst: InstId,
        comp: CompId,
        parent: CompId,
    },
    #[error("computation {0} has no root instruction")]
    MissingRoot(CompId),
    #[error("root {inst} of computation {comp} is not one of its instructions")]
    BadRoot { inst: InstId, comp: CompId },
    #[error("parameters of computation {comp} are not numbered consecutively, found {number} at position {position}")]
    BadParameterNumber {
        comp: CompId,
        number: usize,
        position: usize,
    },
    #[error("instruction {inst} references invalid operand {operand}")]
    BadOperand { inst: InstId, operand: InstId },
    #[error("instruction {inst} is missing from the users of its operand {operand}")]
    MissingUser { inst: InstId, operand: InstId },
    #[error("instruction {inst} lists {user} as a user, but {user} does not use it")]
    StaleUser { inst: InstId, user: InstId },
    #[error("instruction {inst} applies missing computation {comp}")]
    BadReducer { inst: InstId, comp: CompId },
    #[error("collective {inst} has an empty replica group")]
    EmptyReplicaGroup { inst: InstId },
    #[error("collective {inst} names replica {replica} more than once")]
    DuplicateReplica { inst: InstId, replica: u32 },
    #[error("collective {inst} names replica {replica}, but there are only {replica_count} replicas")]
    ReplicaOutOfRange {
        inst: InstId,
        replica: u32,
        replica_count: usize,
    },
}

/// Verify the structural invariants of every computation in a module.
///
/// Checks that the operand and user lists of every instruction agree, that every reference names
/// a live instruction or computation, and that replica groups are well formed. Replica groups are
/// not required to cover every replica.
pub fn verify_module(module: &Module) -> Result<(), VerificationError> {
    if let Some(entry) = module.entry() {
        if module.get_computation(entry).is_none() {
            return Err(VerificationError::BadEntry(entry));
        }
    }

    for (comp_id, comp) in module.computations() {
        let members: HashSet<InstId> = comp.instructions.iter().copied().collect();

        for &inst_id in &comp.instructions {
            let inst = module
                .get_instruction(inst_id)
                .ok_or(VerificationError::BadInstruction {
                    inst: inst_id,
                    comp: comp_id,
                })?;
            if inst.parent != comp_id {
                return Err(VerificationError::BadParent {
                    inst: inst_id,
                    comp: comp_id,
                    parent: inst.parent,
                });
            }
        }

        let root = comp.root.ok_or(VerificationError::MissingRoot(comp_id))?;
        if !members.contains(&root) {
            return Err(VerificationError::BadRoot {
                inst: root,
                comp: comp_id,
            });
        }

        for (position, &param) in comp.parameters.iter().enumerate() {
            match module.get_instruction(param).map(|inst| &inst.kind) {
                Some(&InstructionKind::Parameter { number, .. }) if number == position => {}
                Some(&InstructionKind::Parameter { number, .. }) => {
                    return Err(VerificationError::BadParameterNumber {
                        comp: comp_id,
                        number,
                        position,
                    });
                }
                _ => {
                    return Err(VerificationError::BadInstruction {
                        inst: param,
                        comp: comp_id,
                    });
                }
            }
        }

        for &inst_id in &comp.instructions {
            let inst = module.instruction(inst_id);

            for &operand in &inst.operands {
                if !members.contains(&operand) {
                    return Err(VerificationError::BadOperand {
                        inst: inst_id,
                        operand,
                    });
                }
                if !module.instruction(operand).users.contains(&inst_id) {
                    return Err(VerificationError::MissingUser {
                        inst: inst_id,
                        operand,
                    });
                }
            }

            for &user in &inst.users {
                let uses = module
                    .get_instruction(user)
                    .is_some_and(|u| u.operands.contains(&inst_id));
                if !uses {
                    return Err(VerificationError::StaleUser {
                        inst: inst_id,
                        user,
                    });
                }
            }

            if let Some(to_apply) = inst.kind.to_apply() {
                if module.get_computation(to_apply).is_none() {
                    return Err(VerificationError::BadReducer {
                        inst: inst_id,
                        comp: to_apply,
                    });
                }
            }

            if let Some(attrs) = inst.kind.collective_attrs() {
                let mut seen = HashSet::new();
                for group in &attrs.replica_groups {
                    if group.is_empty() {
                        return Err(VerificationError::EmptyReplicaGroup { inst: inst_id });
                    }
                    for &replica in &group.replica_ids {
                        if !seen.insert(replica) {
                            return Err(VerificationError::DuplicateReplica {
                                inst: inst_id,
                                replica,
                            });
                        }
                        let replica_count = module.config.replica_count;
                        if !attrs.use_global_device_ids && replica as usize >= replica_count {
                            return Err(VerificationError::ReplicaOutOfRange {
                                inst: inst_id,
                                replica,
                                replica_count,
                            });
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
