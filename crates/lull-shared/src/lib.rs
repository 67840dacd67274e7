//! Configuration and observability shared by the lull crates

pub mod config;
pub mod observability;

pub use config::*;
pub use observability::*;
