pub mod config;
pub mod constants;
pub mod error;
pub mod outcome;
pub mod resources;
pub mod storage_graph;
