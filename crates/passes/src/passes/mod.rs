pub mod all_reduce_simplifier;
pub mod dead_code_elim;
