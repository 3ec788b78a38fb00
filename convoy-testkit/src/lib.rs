//! Test support for convoy: scripted mock workers that record every call,
//! and a container factory that builds them from definitions.

mod factory;
mod worker;

pub use factory::{MockDefinition, MockFactory};
pub use worker::{CallJournal, JournalEntry, MockWorker, Script};
