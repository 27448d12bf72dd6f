// ============================================================
// CONTENT HASHER
// ============================================================
// Encoding-independent fingerprint of a table's server-visible content

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::field_filter::{FieldFilter, FilterStats};
use crate::domain::error::Result;
use crate::infrastructure::encoding::read_and_decode;
use crate::infrastructure::xml::{parse_document, XmlDocument};

/// A named fragment of one logical table.
pub struct HashInput<'a> {
    pub fragment: &'a str,
    pub document: &'a XmlDocument,
}

/// Hashes documents after normalization.
///
/// Fragments are ordered by name and rows keep document order. Within a row,
/// fields are filtered, trimmed, stripped of empty values and sorted by key,
/// so charset, BOM, indentation and attribute order never change the result.
#[derive(Debug, Clone)]
pub struct ContentHasher {
    filter: FieldFilter,
}

impl ContentHasher {
    pub fn new(filter: FieldFilter) -> Self {
        Self { filter }
    }

    pub fn hash_documents(&self, inputs: &[HashInput<'_>]) -> String {
        let mut ordered: Vec<&HashInput<'_>> = inputs
            .iter()
            .filter(|input| !input.document.rows.is_empty())
            .collect();
        ordered.sort_by(|a, b| a.fragment.cmp(b.fragment));

        let mut hasher = Sha256::new();
        let mut stats = FilterStats::default();
        for input in ordered {
            hasher.update(format!("F:{}\n", input.fragment));
            let row_tag = input.document.row_tag.as_deref().unwrap_or_default();

            for row in &input.document.rows {
                hasher.update(format!("R:{}\n", row_tag));
                let filtered = self.filter.filter_row(row_tag, row.clone(), &mut stats);
                let mut pairs: Vec<(String, &str)> = filtered
                    .fields
                    .iter()
                    .map(|f| (f.path.canonical_key(), f.value.trim()))
                    .filter(|(_, value)| !value.is_empty())
                    .collect();
                pairs.sort();
                for (key, value) in pairs {
                    hasher.update(format!("{}:{}={}:{}\n", key.len(), key, value.len(), value));
                }
            }
        }
        hex::encode(hasher.finalize())
    }

    /// Detect, decode and parse each file, then hash them as one table.
    ///
    /// Without `row_tag` each file's most frequent root child is the row.
    pub fn hash_files(
        &self,
        paths: &[PathBuf],
        legacy: &'static encoding_rs::Encoding,
        row_tag: Option<&str>,
    ) -> Result<String> {
        let mut parsed = Vec::with_capacity(paths.len());
        for path in paths {
            let decoded = read_and_decode(path, legacy)?;
            let document = parse_document(&decoded.text, row_tag)?;
            parsed.push((fragment_name(path), document));
        }
        let inputs: Vec<HashInput<'_>> = parsed
            .iter()
            .map(|(fragment, document)| HashInput { fragment, document })
            .collect();
        Ok(self.hash_documents(&inputs))
    }
}

/// Fragment identity of a source file: its file name.
pub fn fragment_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::field_rules::FieldRuleSet;
    use crate::infrastructure::encoding::encode;
    use crate::infrastructure::rules::default_rules;
    use std::sync::Arc;

    fn hasher() -> ContentHasher {
        ContentHasher::new(FieldFilter::new(Arc::new(default_rules().unwrap())))
    }

    fn hash_text(hasher: &ContentHasher, text: &str) -> String {
        let document = parse_document(text, None).unwrap();
        hasher.hash_documents(&[HashInput {
            fragment: "skill.xml",
            document: &document,
        }])
    }

    #[test]
    fn test_layout_and_order_do_not_matter() {
        let h = hasher();
        let a = hash_text(&h, r#"<r><s id="1" lv="2"><name>x</name></s></r>"#);
        let b = hash_text(
            &h,
            "<?xml version=\"1.0\"?>\n<r>\n\t<s lv=\"2\" id=\"1\">\n\t\t<name> x </name>\n\t\t<empty/>\n\t</s>\n</r>",
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_values_and_row_order_matter() {
        let h = hasher();
        let a = hash_text(&h, r#"<r><s id="1"/><s id="2"/></r>"#);
        assert_ne!(a, hash_text(&h, r#"<r><s id="2"/><s id="1"/></r>"#));
        assert_ne!(a, hash_text(&h, r#"<r><s id="1"/><s id="3"/></r>"#));
    }

    #[test]
    fn test_hash_sees_filtered_content() {
        let h = hasher();
        let raw = hash_text(
            &h,
            "<r><skill_base_client><target_flying_restriction>0</target_flying_restriction><__order_index>4</__order_index></skill_base_client></r>",
        );
        let filtered = hash_text(
            &h,
            "<r><skill_base_client><target_flying_restriction>1</target_flying_restriction></skill_base_client></r>",
        );
        assert_eq!(raw, filtered);

        let unfiltered = ContentHasher::new(FieldFilter::new(Arc::new(FieldRuleSet::empty())));
        assert_ne!(
            hash_text(&unfiltered, "<r><s><a>0</a></s></r>"),
            hash_text(&unfiltered, "<r><s><a>1</a></s></r>")
        );
    }

    #[test]
    fn test_encoding_does_not_matter() {
        let dir = tempfile::TempDir::new().unwrap();
        let text = "<r><s><name>火焰</name></s></r>";
        let utf16 = dir.path().join("utf16").join("skill.xml");
        let gbk = dir.path().join("gbk").join("skill.xml");
        std::fs::create_dir_all(utf16.parent().unwrap()).unwrap();
        std::fs::create_dir_all(gbk.parent().unwrap()).unwrap();
        std::fs::write(&utf16, encode(text, encoding_rs::UTF_16LE, true).unwrap()).unwrap();
        std::fs::write(&gbk, encode(text, encoding_rs::GBK, false).unwrap()).unwrap();

        let h = hasher();
        assert_eq!(
            h.hash_files(&[utf16], encoding_rs::GBK, None).unwrap(),
            h.hash_files(&[gbk], encoding_rs::GBK, Some("s")).unwrap()
        );
    }
}
