use std::{collections::HashSet, mem};

use collopt_util::id_map::IdMap;
use either::Either;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    graph,
    instruction::{BinOp, CompId, InstId, Instruction, InstructionKind, NewInstruction},
    shape::{PrimitiveType, Shape},
};

/// The execution thread computations are placed on unless stated otherwise.
pub const MAIN_THREAD: &str = "main";

#[derive(Debug, Error)]
pub enum IrError {
    #[error("no such instruction {0}")]
    NoSuchInstruction(InstId),
    #[error("no such computation {0}")]
    NoSuchComputation(CompId),
    #[error("computation {0} has no root instruction")]
    MissingRoot(CompId),
    #[error("cannot replace {old} of shape {old_shape} with {new} of incompatible shape {new_shape}")]
    ShapeMismatch {
        old: InstId,
        new: InstId,
        old_shape: Shape,
        new_shape: Shape,
    },
    #[error("instruction {inst} belongs to computation {found}, expected {expected}")]
    ParentMismatch {
        inst: InstId,
        expected: CompId,
        found: CompId,
    },
    #[error("cannot remove {inst}, it still has {users} user(s)")]
    HasUsers { inst: InstId, users: usize },
    #[error("cannot remove {0}, it is the root of its computation")]
    RemoveRoot(InstId),
    #[error("cannot remove parameter {0}")]
    RemoveParameter(InstId),
}

/// Compilation-wide settings that every pass may consult.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// The number of data-parallel replicas the module is compiled for.
    pub replica_count: usize,
    /// The number of model-parallel partitions within each replica.
    pub num_partitions: usize,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            replica_count: 1,
            num_partitions: 1,
        }
    }
}

impl ModuleConfig {
    pub fn with_replicas(replica_count: usize) -> Self {
        Self {
            replica_count,
            ..Self::default()
        }
    }
}

/// The set of execution threads a pass is allowed to touch. An empty set means every thread.
#[derive(Debug, Clone, Default)]
pub struct ExecutionThreads {
    names: HashSet<String>,
}

impl ExecutionThreads {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn includes(&self, thread: &str) -> bool {
        self.names.is_empty() || self.names.contains(thread)
    }

    #[must_use]
    pub fn is_all(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Computation {
    pub name: String,
    pub execution_thread: String,
    /// Every instruction of this computation, in the order they were added.
    pub instructions: Vec<InstId>,
    /// Parameter instructions, in the order they were added.
    pub parameters: Vec<InstId>,
    pub root: Option<InstId>,
}

impl Computation {
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn num_parameters(&self) -> usize {
        self.parameters.len()
    }
}

/// A compilation unit: every computation and every instruction of a program.
///
/// All instructions live in one module-wide arena and are referred to by `InstId`. Computations
/// only hold the ids of the instructions they own. Removing an instruction never invalidates the
/// id of any other instruction, so a `Vec<InstId>` snapshot taken before a mutation can be iterated
/// safely while the module is being rewritten, as long as removed ids are skipped.
///
/// Passes take `&mut Module` for the duration of a run, which grants them exclusive access to the
/// whole unit.
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub config: ModuleConfig,
    instructions: IdMap<InstId, Instruction>,
    computations: IdMap<CompId, Computation>,
    entry: Option<CompId>,
}

impl Module {
    pub fn new(name: impl Into<String>, config: ModuleConfig) -> Self {
        Self {
            name: name.into(),
            config,
            instructions: IdMap::new(),
            computations: IdMap::new(),
            entry: None,
        }
    }

    pub fn entry(&self) -> Option<CompId> {
        self.entry
    }

    pub fn set_entry(&mut self, comp: CompId) -> Result<(), IrError> {
        if !self.computations.contains(comp) {
            return Err(IrError::NoSuchComputation(comp));
        }
        self.entry = Some(comp);
        Ok(())
    }

    pub fn add_computation(
        &mut self,
        name: impl Into<String>,
        execution_thread: impl Into<String>,
    ) -> CompId {
        self.computations.insert(Computation {
            name: name.into(),
            execution_thread: execution_thread.into(),
            instructions: Vec::new(),
            parameters: Vec::new(),
            root: None,
        })
    }

    #[inline]
    pub fn get_computation(&self, comp: CompId) -> Option<&Computation> {
        self.computations.get(comp)
    }

    /// # Panics
    ///
    /// Panics if `comp` does not name a computation of this module.
    #[inline]
    pub fn computation(&self, comp: CompId) -> &Computation {
        &self.computations[comp]
    }

    pub fn computations(&self) -> impl Iterator<Item = (CompId, &Computation)> + '_ {
        self.computations.iter()
    }

    pub fn computation_count(&self) -> usize {
        self.computations.len()
    }

    /// Computations placed on one of the given execution threads, in the order they were added.
    pub fn computations_in<'a>(
        &'a self,
        threads: &'a ExecutionThreads,
    ) -> impl Iterator<Item = CompId> + 'a {
        if threads.is_all() {
            Either::Left(self.computations.ids())
        } else {
            Either::Right(
                self.computations
                    .iter()
                    .filter(|(_, comp)| threads.includes(&comp.execution_thread))
                    .map(|(id, _)| id),
            )
        }
    }

    /// Find a computation by name.
    pub fn find_computation(&self, name: &str) -> Option<CompId> {
        self.computations
            .iter()
            .find(|(_, comp)| comp.name == name)
            .map(|(id, _)| id)
    }

    pub fn root(&self, comp: CompId) -> Result<InstId, IrError> {
        self.computations
            .get(comp)
            .ok_or(IrError::NoSuchComputation(comp))?
            .root
            .ok_or(IrError::MissingRoot(comp))
    }

    pub fn set_root(&mut self, comp: CompId, inst: InstId) -> Result<(), IrError> {
        let parent = self.get_instruction(inst).ok_or(IrError::NoSuchInstruction(inst))?.parent;
        if parent != comp {
            return Err(IrError::ParentMismatch {
                inst,
                expected: comp,
                found: parent,
            });
        }
        self.computations
            .get_mut(comp)
            .ok_or(IrError::NoSuchComputation(comp))?
            .root = Some(inst);
        Ok(())
    }

    #[inline]
    pub fn contains(&self, inst: InstId) -> bool {
        self.instructions.contains(inst)
    }

    #[inline]
    pub fn get_instruction(&self, inst: InstId) -> Option<&Instruction> {
        self.instructions.get(inst)
    }

    /// # Panics
    ///
    /// Panics if `inst` has been removed or never belonged to this module.
    #[inline]
    pub fn instruction(&self, inst: InstId) -> &Instruction {
        &self.instructions[inst]
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// The `i`th operand of `inst`, if both exist.
    pub fn operand(&self, inst: InstId, i: usize) -> Option<InstId> {
        self.instructions.get(inst)?.operand(i)
    }

    /// Add a new instruction to the end of `comp`.
    ///
    /// Every operand must be a live instruction of the same computation. Parameters are also
    /// recorded in the computation's parameter list. The new instruction is not made the root.
    pub fn add_instruction(
        &mut self,
        comp: CompId,
        new: NewInstruction,
    ) -> Result<InstId, IrError> {
        if !self.computations.contains(comp) {
            return Err(IrError::NoSuchComputation(comp));
        }

        for &operand in &new.operands {
            let parent = self
                .get_instruction(operand)
                .ok_or(IrError::NoSuchInstruction(operand))?
                .parent;
            if parent != comp {
                return Err(IrError::ParentMismatch {
                    inst: operand,
                    expected: comp,
                    found: parent,
                });
            }
        }

        let is_parameter = matches!(new.kind, InstructionKind::Parameter { .. });
        let id = self.instructions.insert(Instruction {
            kind: new.kind,
            shape: new.shape,
            operands: new.operands,
            users: Vec::new(),
            parent: comp,
        });

        for i in 0..self.instructions[id].operands.len() {
            let operand = self.instructions[id].operands[i];
            let users = &mut self.instructions[operand].users;
            if !users.contains(&id) {
                users.push(id);
            }
        }

        let computation = &mut self.computations[comp];
        computation.instructions.push(id);
        if is_parameter {
            computation.parameters.push(id);
        }

        Ok(id)
    }

    /// Build the canonical binary reducer computation `op(p0, p1)` over scalars of
    /// `element_type`: two parameters and a root, three instructions in total.
    pub fn add_binary_reducer(
        &mut self,
        name: impl Into<String>,
        op: BinOp,
        element_type: PrimitiveType,
    ) -> Result<CompId, IrError> {
        let comp = self.add_computation(name, MAIN_THREAD);
        let scalar = Shape::scalar(element_type);
        let lhs = self.add_instruction(comp, NewInstruction::parameter(0, scalar.clone()))?;
        let rhs = self.add_instruction(comp, NewInstruction::parameter(1, scalar.clone()))?;
        let root = self.add_instruction(comp, NewInstruction::binary(op, scalar, lhs, rhs))?;
        self.set_root(comp, root)?;
        Ok(comp)
    }

    /// A snapshot of every instruction of `comp` in post-order, operands before their users.
    ///
    /// Traversal starts from each instruction without users, in the order they were added. The
    /// returned list is not affected by later mutation of the module.
    pub fn instructions_post_order(&self, comp: CompId) -> Vec<InstId> {
        let Some(computation) = self.computations.get(comp) else {
            return Vec::new();
        };

        let starts = computation
            .instructions
            .iter()
            .copied()
            .filter(|&inst| self.instructions[inst].users.is_empty());

        graph::post_order(starts, |inst| {
            self.instructions[inst].operands.iter().copied()
        })
    }

    /// Redirect every use of `old` to `new`, leaving `old` in place with no users.
    ///
    /// If `old` is its computation's root, `new` becomes the root. Uses of `old` by `new` itself
    /// are left alone so that no cycle is created. Both instructions must belong to the same
    /// computation and have compatible shapes.
    pub fn replace_all_uses_with(&mut self, old: InstId, new: InstId) -> Result<(), IrError> {
        if old == new {
            return Ok(());
        }

        let old_inst = self
            .get_instruction(old)
            .ok_or(IrError::NoSuchInstruction(old))?;
        let new_inst = self
            .get_instruction(new)
            .ok_or(IrError::NoSuchInstruction(new))?;

        if new_inst.parent != old_inst.parent {
            return Err(IrError::ParentMismatch {
                inst: new,
                expected: old_inst.parent,
                found: new_inst.parent,
            });
        }

        if !old_inst.shape.compatible(&new_inst.shape) {
            return Err(IrError::ShapeMismatch {
                old,
                new,
                old_shape: old_inst.shape.clone(),
                new_shape: new_inst.shape.clone(),
            });
        }

        let parent = old_inst.parent;
        let users = mem::take(&mut self.instructions[old].users);
        let mut remaining = Vec::new();

        for user in users {
            if user == new {
                remaining.push(user);
                continue;
            }

            for operand in &mut self.instructions[user].operands {
                if *operand == old {
                    *operand = new;
                }
            }

            let new_users = &mut self.instructions[new].users;
            if !new_users.contains(&user) {
                new_users.push(user);
            }
        }

        self.instructions[old].users = remaining;

        let computation = &mut self.computations[parent];
        if computation.root == Some(old) {
            computation.root = Some(new);
        }

        Ok(())
    }

    /// Redirect every use of `old` to `new` and then remove `old` from its computation.
    pub fn replace_instruction(&mut self, old: InstId, new: InstId) -> Result<(), IrError> {
        if old == new {
            return Ok(());
        }
        self.replace_all_uses_with(old, new)?;
        self.remove_instruction(old)
    }

    /// Remove an instruction that has no remaining users.
    ///
    /// Roots and parameters can not be removed.
    pub fn remove_instruction(&mut self, inst: InstId) -> Result<(), IrError> {
        let instruction = self
            .get_instruction(inst)
            .ok_or(IrError::NoSuchInstruction(inst))?;

        if !instruction.users.is_empty() {
            return Err(IrError::HasUsers {
                inst,
                users: instruction.users.len(),
            });
        }

        if matches!(instruction.kind, InstructionKind::Parameter { .. }) {
            return Err(IrError::RemoveParameter(inst));
        }

        let parent = instruction.parent;
        if self.computations[parent].root == Some(inst) {
            return Err(IrError::RemoveRoot(inst));
        }

        let instruction = self
            .instructions
            .remove(inst)
            .ok_or(IrError::NoSuchInstruction(inst))?;

        for operand in instruction.operands {
            if let Some(operand) = self.instructions.get_mut(operand) {
                operand.users.retain(|&user| user != inst);
            }
        }

        self.computations[parent]
            .instructions
            .retain(|&i| i != inst);

        Ok(())
    }
}
