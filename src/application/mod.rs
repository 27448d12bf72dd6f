pub mod use_cases;

pub use use_cases::batch::BatchRunner;
pub use use_cases::content_hasher::ContentHasher;
pub use use_cases::exporter::{ExportMode, ExportRequest, Exporter};
pub use use_cases::field_filter::FieldFilter;
pub use use_cases::importer::{ColumnRewriter, ImportOptions, ImportRequest, Importer};
pub use use_cases::metadata_maintenance::MetadataMaintenance;
pub use use_cases::round_trip_validator::RoundTripValidator;
pub use use_cases::schema_inferencer::{InferenceOptions, InferredTable, SchemaInferencer};
