pub mod id;
pub mod metric;
pub mod types;
