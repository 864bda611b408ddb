use std::fmt;

use crate::{
    instruction::{CompId, InstructionKind},
    module::Module,
};

impl Module {
    /// Write a human readable listing of every computation, one instruction per line.
    ///
    /// Each line reads `%3 = f32[4] all-reduce(%1), replica_groups={}, to_apply=add`, prefixed
    /// with `ROOT` for the root of its computation.
    pub fn pretty_print(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(
            f,
            "module {} (replica_count={}, num_partitions={}):",
            self.name, self.config.replica_count, self.config.num_partitions
        )?;

        for (comp_id, _) in self.computations() {
            self.pretty_print_computation(f, comp_id)?;
        }

        Ok(())
    }

    fn pretty_print_computation(&self, f: &mut dyn fmt::Write, comp_id: CompId) -> fmt::Result {
        let computation = self.computation(comp_id);
        let is_entry = self.entry() == Some(comp_id);

        write!(f, "{}", if is_entry { "ENTRY " } else { "" })?;
        writeln!(
            f,
            "{} {comp_id} [{}]:",
            computation.name, computation.execution_thread
        )?;

        for &inst_id in &computation.instructions {
            let inst = self.instruction(inst_id);

            write!(f, "    ")?;
            if computation.root == Some(inst_id) {
                write!(f, "ROOT ")?;
            }
            write!(f, "{inst_id} = {} {}(", inst.shape, inst.opcode())?;

            for (i, operand) in inst.operands.iter().enumerate() {
                if i != 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{operand}")?;
            }

            match &inst.kind {
                InstructionKind::Parameter { number, replicated } => {
                    write!(f, "{number})")?;
                    if *replicated {
                        write!(f, ", replicated")?;
                    }
                }
                InstructionKind::Constant(literal) => write!(f, "{literal})")?,
                InstructionKind::Broadcast { dimensions } => {
                    write!(f, "), dimensions={{")?;
                    for (i, dim) in dimensions.iter().enumerate() {
                        if i != 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{dim}")?;
                    }
                    write!(f, "}}")?;
                }
                InstructionKind::GetTupleElement(index) => write!(f, "), index={index}")?,
                InstructionKind::AllReduce { to_apply, attrs } => {
                    write!(f, "), {attrs}, to_apply={}", self.reducer_name(*to_apply))?;
                }
                InstructionKind::AllGather { dimension, attrs } => {
                    write!(f, "), {attrs}, dimensions={{{dimension}}}")?;
                }
                InstructionKind::ReduceScatter {
                    dimension,
                    to_apply,
                    attrs,
                } => {
                    write!(
                        f,
                        "), {attrs}, dimensions={{{dimension}}}, to_apply={}",
                        self.reducer_name(*to_apply)
                    )?;
                }
                InstructionKind::ReplicaId
                | InstructionKind::PartitionId
                | InstructionKind::Convert
                | InstructionKind::Tuple
                | InstructionKind::Unary(_)
                | InstructionKind::Binary(_) => write!(f, ")")?,
            }

            writeln!(f)?;
        }

        Ok(())
    }

    fn reducer_name(&self, comp_id: CompId) -> String {
        match self.get_computation(comp_id) {
            Some(comp) => comp.name.clone(),
            None => comp_id.to_string(),
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.pretty_print(f)
    }
}
