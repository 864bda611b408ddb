use collopt_ir::{CompId, ExecutionThreads, InstId, InstructionKind, IrError, Module};

use crate::pass::{ModulePass, PassError};

/// Removes instructions whose results are never used.
#[derive(Debug, Copy, Clone, Default)]
pub struct DeadCodeElimination;

impl ModulePass for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn run(&mut self, module: &mut Module, threads: &ExecutionThreads) -> Result<bool, PassError> {
        let computations = module.computations_in(threads).collect::<Vec<_>>();
        let mut changed = false;
        for comp in computations {
            changed |= eliminate_dead_code(module, comp)?;
        }
        Ok(changed)
    }
}

/// Remove every unused, side-effect free instruction of `comp`, along with any operands that
/// become unused as a result.
///
/// Roots and parameters are always kept.
pub fn eliminate_dead_code(module: &mut Module, comp: CompId) -> Result<bool, IrError> {
    let is_dead = |module: &Module, inst_id: InstId| {
        let Some(inst) = module.get_instruction(inst_id) else {
            return false;
        };
        inst.users.is_empty()
            && !inst.has_side_effect()
            && !matches!(inst.kind, InstructionKind::Parameter { .. })
            && module.computation(inst.parent).root != Some(inst_id)
    };

    let mut worklist = module
        .computation(comp)
        .instructions
        .iter()
        .copied()
        .filter(|&inst_id| is_dead(module, inst_id))
        .collect::<Vec<_>>();

    let mut removed = 0;
    while let Some(inst_id) = worklist.pop() {
        if !is_dead(module, inst_id) {
            continue;
        }

        let operands = module.instruction(inst_id).operands.clone();
        module.remove_instruction(inst_id)?;
        removed += 1;

        for operand in operands {
            if is_dead(module, operand) {
                worklist.push(operand);
            }
        }
    }

    if removed > 0 {
        log::debug!(
            "removed {removed} dead instruction(s) from {}",
            module.computation(comp).name
        );
    }

    Ok(removed > 0)
}
