mod document;
mod reader;
mod writer;

pub use document::{XmlDocument, XmlField, XmlRow};
pub use reader::parse_document;
pub use writer::write_document;
