// ============================================================
// XML TABLE READER
// ============================================================
// Flatten <root><row .../>...</root> documents into field lists

use std::collections::HashMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::document::{XmlDocument, XmlField, XmlRow};
use crate::domain::error::{Result, SyncError};
use crate::domain::schema::FieldPath;

/// Open child element inside a row.
struct Frame {
    segment: String,
    text: String,
    has_children: bool,
    child_counts: HashMap<String, usize>,
}

struct RowBuilder {
    tag: String,
    fields: Vec<XmlField>,
    frames: Vec<Frame>,
    child_counts: HashMap<String, usize>,
    /// Text directly inside the row element.
    text: String,
}

impl RowBuilder {
    fn new(tag: String, start: &BytesStart<'_>) -> Result<Self> {
        let mut row = Self {
            tag,
            fields: Vec::new(),
            frames: Vec::new(),
            child_counts: HashMap::new(),
            text: String::new(),
        };
        for (name, value) in read_attributes(start)? {
            row.fields.push(XmlField {
                path: FieldPath::attribute(vec![name]),
                value,
            });
        }
        Ok(row)
    }

    fn open_child(&mut self, tag: &str, start: &BytesStart<'_>) -> Result<()> {
        let counts = match self.frames.last_mut() {
            Some(parent) => {
                parent.has_children = true;
                &mut parent.child_counts
            }
            None => &mut self.child_counts,
        };
        let seen = counts.entry(tag.to_string()).or_insert(0);
        *seen += 1;
        let segment = if *seen == 1 {
            tag.to_string()
        } else {
            format!("{}[{}]", tag, seen)
        };

        self.frames.push(Frame {
            segment,
            text: String::new(),
            has_children: false,
            child_counts: HashMap::new(),
        });

        let owner = self.current_segments();
        for (name, value) in read_attributes(start)? {
            let mut segments = owner.clone();
            segments.push(name);
            self.fields.push(XmlField {
                path: FieldPath::attribute(segments),
                value,
            });
        }
        Ok(())
    }

    fn push_text(&mut self, text: &str) {
        match self.frames.last_mut() {
            Some(frame) => frame.text.push_str(text),
            None => self.text.push_str(text),
        }
    }

    fn close_child(&mut self) {
        let segments = self.current_segments();
        if let Some(frame) = self.frames.pop() {
            // Only leaf elements carry values; whitespace between children is layout.
            if !frame.has_children {
                self.fields.push(XmlField {
                    path: FieldPath::element(segments),
                    value: frame.text,
                });
            }
        }
    }

    fn current_segments(&self) -> Vec<String> {
        self.frames.iter().map(|f| f.segment.clone()).collect()
    }

    fn finish(mut self) -> (String, XmlRow) {
        // Row text only counts for rows without child elements.
        if self.child_counts.is_empty() && !self.text.trim().is_empty() {
            self.fields.push(XmlField {
                path: FieldPath::row_text(),
                value: self.text,
            });
        }
        (self.tag, XmlRow { fields: self.fields })
    }
}

/// Parse a decoded table document.
///
/// With `expected_row_tag` only children with that tag are rows; otherwise
/// the most frequent direct child tag of the root is taken as the row shape.
pub fn parse_document(text: &str, expected_row_tag: Option<&str>) -> Result<XmlDocument> {
    let mut reader = Reader::from_str(text);

    let mut root_tag: Option<String> = None;
    let mut root_closed = false;
    let mut depth = 0usize;
    let mut current: Option<RowBuilder> = None;
    let mut children: Vec<(String, XmlRow)> = Vec::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            SyncError::Parse(format!(
                "malformed XML at byte {}: {}",
                reader.buffer_position(),
                e
            ))
        })?;

        match event {
            Event::Start(start) => {
                let tag = tag_name(start.name().as_ref())?;
                match depth {
                    0 => {
                        if root_closed {
                            return Err(SyncError::Parse(format!(
                                "second root element <{}>",
                                tag
                            )));
                        }
                        root_tag = Some(tag);
                    }
                    1 => current = Some(RowBuilder::new(tag, &start)?),
                    _ => {
                        if let Some(row) = current.as_mut() {
                            row.open_child(&tag, &start)?;
                        }
                    }
                }
                depth += 1;
            }
            Event::Empty(start) => {
                let tag = tag_name(start.name().as_ref())?;
                match depth {
                    0 => {
                        if root_closed {
                            return Err(SyncError::Parse(format!(
                                "second root element <{}>",
                                tag
                            )));
                        }
                        root_tag = Some(tag);
                        root_closed = true;
                    }
                    1 => children.push(RowBuilder::new(tag, &start)?.finish()),
                    _ => {
                        if let Some(row) = current.as_mut() {
                            row.open_child(&tag, &start)?;
                            row.close_child();
                        }
                    }
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                match depth {
                    0 => root_closed = true,
                    1 => {
                        if let Some(row) = current.take() {
                            children.push(row.finish());
                        }
                    }
                    _ => {
                        if let Some(row) = current.as_mut() {
                            row.close_child();
                        }
                    }
                }
            }
            Event::Text(text) if depth >= 2 => {
                let value = text
                    .unescape()
                    .map_err(|e| SyncError::Parse(format!("bad text content: {}", e)))?;
                if let Some(row) = current.as_mut() {
                    row.push_text(&value);
                }
            }
            Event::CData(data) if depth >= 2 => {
                let value = String::from_utf8_lossy(&data).into_owned();
                if let Some(row) = current.as_mut() {
                    row.push_text(&value);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let root_tag = root_tag.ok_or_else(|| SyncError::Parse("document has no root element".to_string()))?;
    if depth != 0 {
        return Err(SyncError::Parse(format!("unclosed element in <{}>", root_tag)));
    }

    let row_tag = match expected_row_tag {
        Some(tag) => Some(tag.to_string()),
        None => most_frequent_tag(&children),
    };

    let total_children = children.len();
    let rows: Vec<XmlRow> = match &row_tag {
        Some(tag) => children
            .into_iter()
            .filter(|(child_tag, _)| child_tag == tag)
            .map(|(_, row)| row)
            .collect(),
        None => Vec::new(),
    };
    let skipped_elements = total_children - rows.len();
    if skipped_elements > 0 {
        tracing::debug!(
            root = %root_tag,
            skipped = skipped_elements,
            "Ignoring root children that are not rows"
        );
    }

    Ok(XmlDocument {
        root_tag,
        row_tag,
        rows,
        skipped_elements,
    })
}

fn most_frequent_tag(children: &[(String, XmlRow)]) -> Option<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for (tag, _) in children {
        match counts.iter_mut().find(|(seen, _)| seen == tag) {
            Some((_, count)) => *count += 1,
            None => counts.push((tag.clone(), 1)),
        }
    }
    // max_by_key keeps the last maximum; iterate reversed so the first seen wins ties.
    counts
        .into_iter()
        .rev()
        .max_by_key(|(_, count)| *count)
        .map(|(tag, _)| tag)
}

fn tag_name(raw: &[u8]) -> Result<String> {
    std::str::from_utf8(raw)
        .map(|s| s.to_string())
        .map_err(|e| SyncError::Parse(format!("invalid element name: {}", e)))
}

fn read_attributes(start: &BytesStart<'_>) -> Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| SyncError::Parse(format!("bad attribute: {}", e)))?;
        let name = tag_name(attr.key.as_ref())?;
        let value = attr
            .unescape_value()
            .map_err(|e| SyncError::Parse(format!("bad attribute value for {}: {}", name, e)))?
            .into_owned();
        attrs.push((name, value));
    }
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKILLS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<skill_base_clients>
	<skill_base_client>
		<id>1</id>
		<name>Fire &amp; Ice</name>
		<effects>
			<effect type="damage">10</effect>
			<effect type="slow">2</effect>
		</effects>
	</skill_base_client>
	<skill_base_client id="2">
		<name><![CDATA[<raw>]]></name>
		<desc/>
	</skill_base_client>
	<comment>not a row</comment>
</skill_base_clients>"#;

    #[test]
    fn test_flattens_rows() {
        let doc = parse_document(SKILLS, None).unwrap();
        assert_eq!(doc.root_tag, "skill_base_clients");
        assert_eq!(doc.row_tag.as_deref(), Some("skill_base_client"));
        assert_eq!(doc.rows.len(), 2);
        assert_eq!(doc.skipped_elements, 1);

        let first = &doc.rows[0];
        assert_eq!(first.get(&FieldPath::element(vec!["id".into()])), Some("1"));
        assert_eq!(first.get(&FieldPath::element(vec!["name".into()])), Some("Fire & Ice"));
        assert_eq!(
            first.get(&FieldPath::element(vec!["effects".into(), "effect[2]".into()])),
            Some("2")
        );
        assert_eq!(
            first.get(&FieldPath::attribute(vec![
                "effects".into(),
                "effect".into(),
                "type".into()
            ])),
            Some("damage")
        );
    }

    #[test]
    fn test_attributes_cdata_and_empty_leaf() {
        let doc = parse_document(SKILLS, None).unwrap();
        let second = &doc.rows[1];
        assert_eq!(second.get(&FieldPath::attribute(vec!["id".into()])), Some("2"));
        assert_eq!(second.get(&FieldPath::element(vec!["name".into()])), Some("<raw>"));
        assert_eq!(second.get(&FieldPath::element(vec!["desc".into()])), Some(""));
    }

    #[test]
    fn test_row_text_becomes_a_field() {
        let text = "<strings>\n\t<string id=\"1\">Hello &amp; bye</string>\n\t<string id=\"2\"><![CDATA[<b>]]></string>\n\t<string id=\"3\">\n\t\t<alt>x</alt>\n\t</string>\n</strings>";
        let doc = parse_document(text, None).unwrap();
        assert_eq!(doc.rows.len(), 3);
        assert_eq!(doc.rows[0].get(&FieldPath::row_text()), Some("Hello & bye"));
        assert_eq!(doc.rows[1].get(&FieldPath::row_text()), Some("<b>"));
        // layout whitespace around child elements is not row text
        assert_eq!(doc.rows[2].get(&FieldPath::row_text()), None);
        assert_eq!(doc.rows[2].fields.len(), 2);
    }

    #[test]
    fn test_root_without_rows() {
        let doc = parse_document("<items/>", None).unwrap();
        assert_eq!(doc.root_tag, "items");
        assert!(doc.row_tag.is_none());
        assert!(doc.rows.is_empty());
    }

    #[test]
    fn test_expected_row_tag_filters_children() {
        let doc = parse_document(SKILLS, Some("comment")).unwrap();
        assert_eq!(doc.rows.len(), 1);
        assert_eq!(doc.skipped_elements, 2);
    }

    #[test]
    fn test_malformed_documents() {
        assert!(parse_document("<a><b></a>", None).is_err());
        assert!(parse_document("", None).is_err());
        assert!(parse_document("<a><b>", None).is_err());
    }
}
