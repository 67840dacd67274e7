//! Debounced dispatch of downstream jobs from a change-data-capture stream
//!
//! Data flows source → [`Orchestrator`] → [`ActivityLedger`] → [`Dispatcher`]
//! → [`JobExecutor`], while a [`Sweeper`] expires stale ledger entries on its
//! own timer.

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod executor;
pub mod ledger;
pub mod mapping;
pub mod orchestrator;
pub mod stream;
pub mod sweeper;

pub use dispatcher::*;
pub use error::*;
pub use event::*;
pub use executor::*;
pub use ledger::*;
pub use mapping::*;
pub use orchestrator::*;
pub use stream::*;
pub use sweeper::*;
