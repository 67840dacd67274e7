//! `lull`: application wiring plus a façade over `lull-core`, `lull-kafka` and `lull-shared`.

#![deny(missing_docs)]

pub mod app;

/// Re-export **everything** from lull-core at the crate root, so users can `use lull::*;`.
#[doc(inline)]
pub use lull_core::*;

/// Also expose the member crates as nested modules.
pub use lull_core as core;
pub use lull_kafka as kafka;
pub use lull_shared as shared;

pub use app::{build, build_with_executor, run, Components};
