pub mod id_map;
pub mod index_set;
pub mod typed_id_map;

pub use index_set::IndexSet;
