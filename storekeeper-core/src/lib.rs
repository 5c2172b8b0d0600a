// storekeeper-core/src/lib.rs
// Library API for the maintenance tasks - the CLI crate is a thin shell

pub mod config;
pub mod document;
pub mod error;
pub mod interrupt;
pub mod logging;
pub mod query;
pub mod store;
pub mod tasks;

#[cfg(test)]
mod migration_tests;

// Public exports
pub use config::{CloneConfig, PaymentsConfig, StoreConfig, DEFAULT_BATCH_SIZE};
pub use document::{value_id_string, Document, DocumentId};
pub use error::{Result, StoreError};
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use store::{Collection, FindCursor, Store};
pub use tasks::UpdateSummary;
