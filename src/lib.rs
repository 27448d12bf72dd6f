pub mod app;
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;

#[cfg(test)]
mod test_support;

pub use app::{init_tracing, SyncEngine};
pub use application::{ExportRequest, ImportRequest};
pub use domain::error::{Result, SyncError};
pub use domain::sync_config::SyncConfig;
