mod connection;
pub mod encoding_metadata;
pub mod schema_catalog;
pub mod table_rows;

pub use connection::Database;
pub use encoding_metadata::{EncodingMetadataStore, KeyGuard};
