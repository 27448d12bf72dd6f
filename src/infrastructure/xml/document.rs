use crate::domain::schema::FieldPath;

/// One value found inside a row element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlField {
    pub path: FieldPath,
    pub value: String,
}

/// Flattened row element, fields in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlRow {
    pub fields: Vec<XmlField>,
}

impl XmlRow {
    pub fn get(&self, path: &FieldPath) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| &f.path == path)
            .map(|f| f.value.as_str())
    }
}

/// A parsed table document: root element holding repeated row elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub root_tag: String,
    /// Tag of the repeating child element, `None` when the root has no children.
    pub row_tag: Option<String>,
    pub rows: Vec<XmlRow>,
    /// Direct children of the root that did not match the row tag.
    pub skipped_elements: usize,
}
