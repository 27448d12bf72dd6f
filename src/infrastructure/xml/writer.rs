// ============================================================
// XML TABLE WRITER
// ============================================================
// Rebuild row elements from flattened field paths

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::document::XmlRow;
use crate::domain::error::{Result, SyncError};
use crate::domain::schema::{FieldKind, FieldPath};

#[derive(Debug, Default)]
struct Node {
    /// Path segment including any occurrence suffix.
    key: String,
    attrs: Vec<(String, String)>,
    text: Option<String>,
    children: Vec<Node>,
}

impl Node {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Default::default()
        }
    }

    fn descend(&mut self, segments: &[String]) -> &mut Node {
        match segments.split_first() {
            None => self,
            Some((head, rest)) => {
                let idx = match self.children.iter().position(|c| &c.key == head) {
                    Some(idx) => idx,
                    None => {
                        self.children.push(Node::new(head));
                        self.children.len() - 1
                    }
                };
                self.children[idx].descend(rest)
            }
        }
    }

    fn insert(&mut self, path: &FieldPath, value: &str) {
        if path.is_row_text() {
            self.text = Some(value.to_string());
            return;
        }
        match path.kind {
            FieldKind::Element => {
                self.descend(&path.segments).text = Some(value.to_string());
            }
            FieldKind::Attribute => {
                if let Some((attr, owners)) = path.segments.split_last() {
                    self.descend(owners).attrs.push((attr.clone(), value.to_string()));
                }
            }
        }
    }

    /// Add empty elements for lower occurrences that have no stored value.
    ///
    /// Repeated siblings are addressed by position, so `item[3]` must stay the
    /// third `item` even when `item[2]` was empty and stored as NULL.
    fn fill_missing_siblings(&mut self) {
        let mut idx = 0;
        while idx < self.children.len() {
            let (tag, occurrence) = split_occurrence(&self.children[idx].key);
            let tag = tag.to_string();
            for missing in 1..occurrence {
                let key = occurrence_key(&tag, missing);
                if !self.children.iter().any(|c| c.key == key) {
                    self.children.insert(idx, Node::new(&key));
                    idx += 1;
                }
            }
            idx += 1;
        }
        for child in &mut self.children {
            child.fill_missing_siblings();
        }
    }
}

fn split_occurrence(segment: &str) -> (&str, usize) {
    let tag = FieldPath::segment_tag(segment);
    let occurrence = segment[tag.len()..]
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .unwrap_or(1);
    (tag, occurrence)
}

fn occurrence_key(tag: &str, occurrence: usize) -> String {
    if occurrence == 1 {
        tag.to_string()
    } else {
        format!("{}[{}]", tag, occurrence)
    }
}

/// Serialize rows under a root element, tab indented, with an XML declaration.
///
/// `declared_encoding` is the label written into the declaration; the caller
/// encodes the returned text in that charset.
pub fn write_document(
    root_tag: &str,
    row_tag: &str,
    rows: &[XmlRow],
    declared_encoding: &str,
) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b'\t', 1);

    emit(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some(declared_encoding), None)),
    )?;
    emit(&mut writer, Event::Start(BytesStart::new(root_tag)))?;

    for row in rows {
        let mut node = Node::new(row_tag);
        for field in &row.fields {
            node.insert(&field.path, &field.value);
        }
        node.fill_missing_siblings();
        write_node(&mut writer, &node, row_tag)?;
    }

    emit(&mut writer, Event::End(BytesEnd::new(root_tag)))?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| SyncError::Io(format!("writer produced invalid UTF-8: {}", e)))
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &Node, tag: &str) -> Result<()> {
    let mut start = BytesStart::new(tag);
    for (name, value) in &node.attrs {
        start.push_attribute((name.as_str(), value.as_str()));
    }

    let text = node.text.as_deref().filter(|t| !t.is_empty());
    if node.children.is_empty() && text.is_none() {
        return emit(writer, Event::Empty(start));
    }

    emit(writer, Event::Start(start))?;
    if let Some(text) = text {
        emit(writer, Event::Text(BytesText::new(text)))?;
    }
    for child in &node.children {
        write_node(writer, child, FieldPath::segment_tag(&child.key))?;
    }
    emit(writer, Event::End(BytesEnd::new(tag)))
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| SyncError::Io(format!("Failed to write XML: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::xml::{parse_document, XmlField};

    fn field(path: FieldPath, value: &str) -> XmlField {
        XmlField {
            path,
            value: value.to_string(),
        }
    }

    #[test]
    fn test_rebuilds_nested_structure() {
        let rows = vec![XmlRow {
            fields: vec![
                field(FieldPath::attribute(vec!["id".into()]), "7"),
                field(FieldPath::element(vec!["name".into()]), "A < B"),
                field(
                    FieldPath::attribute(vec!["effects".into(), "effect".into(), "type".into()]),
                    "damage",
                ),
                field(FieldPath::element(vec!["effects".into(), "effect".into()]), "10"),
                field(FieldPath::element(vec!["effects".into(), "effect[2]".into()]), "2"),
            ],
        }];

        let text = write_document("skills", "skill", &rows, "UTF-8").unwrap();
        assert!(text.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(text.contains("<skill id=\"7\">"));
        assert!(text.contains("<name>A &lt; B</name>"));
        assert!(text.contains("<effect type=\"damage\">10</effect>"));

        let doc = parse_document(&text, Some("skill")).unwrap();
        assert_eq!(doc.rows.len(), 1);
        assert_eq!(doc.rows[0].fields.len(), rows[0].fields.len());
        for f in &rows[0].fields {
            assert_eq!(doc.rows[0].get(&f.path), Some(f.value.as_str()));
        }
    }

    #[test]
    fn test_row_text_is_written_inside_the_row() {
        let rows = vec![XmlRow {
            fields: vec![
                field(FieldPath::attribute(vec!["id".into()]), "1"),
                field(FieldPath::row_text(), "Hello"),
            ],
        }];
        let text = write_document("strings", "string", &rows, "UTF-8").unwrap();
        assert!(text.contains("<string id=\"1\">Hello</string>"), "{}", text);

        let doc = parse_document(&text, Some("string")).unwrap();
        assert_eq!(doc.rows[0].get(&FieldPath::row_text()), Some("Hello"));
    }

    #[test]
    fn test_missing_occurrences_keep_their_position() {
        let item = |segment: &str| FieldPath::element(vec!["items".into(), segment.into()]);
        let rows = vec![XmlRow {
            fields: vec![
                field(FieldPath::attribute(vec!["id".into()]), "1"),
                field(item("item"), "100"),
                field(item("item[3]"), "300"),
            ],
        }];
        let text = write_document("drops", "drop", &rows, "UTF-8").unwrap();
        let first = text.find("<item>100</item>").unwrap();
        let placeholder = text.find("<item/>").unwrap();
        let third = text.find("<item>300</item>").unwrap();
        assert!(first < placeholder && placeholder < third, "{}", text);

        let doc = parse_document(&text, Some("drop")).unwrap();
        assert_eq!(doc.rows[0].get(&item("item[2]")), Some(""));
        assert_eq!(doc.rows[0].get(&item("item[3]")), Some("300"));
    }

    #[test]
    fn test_empty_rows_keep_root() {
        let text = write_document("skills", "skill", &[], "GBK").unwrap();
        assert!(text.contains("encoding=\"GBK\""));
        let doc = parse_document(&text, None).unwrap();
        assert_eq!(doc.root_tag, "skills");
        assert!(doc.rows.is_empty());
    }
}
