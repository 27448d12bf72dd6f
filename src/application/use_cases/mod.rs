pub mod batch;
pub mod content_hasher;
pub mod exporter;
pub mod field_filter;
pub mod importer;
pub mod metadata_maintenance;
pub mod round_trip_validator;
pub mod schema_inferencer;
