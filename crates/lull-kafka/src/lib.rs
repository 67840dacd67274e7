//! Kafka change source for lull

pub mod config;
pub mod consumer;

pub use config::*;
pub use consumer::*;
