pub mod encoding_metadata;
pub mod error;
pub mod field_rules;
pub mod job;
pub mod report;
pub mod schema;
pub mod sync_config;
pub mod value;
