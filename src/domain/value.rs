use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::schema::{ColumnDef, ColumnType, DateTimeFormat};

/// Storage layout for DATETIME values inside the database.
pub const STORED_DATETIME_PATTERN: &str = "%Y-%m-%d %H:%M:%S";

/// One typed cell of a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Text written back to XML, `None` when the field is absent.
    pub fn render(&self, column: &ColumnDef) -> Option<String> {
        match self {
            FieldValue::Integer(v) => Some(v.to_string()),
            FieldValue::Float(v) => Some(v.to_string()),
            FieldValue::Text(v) => Some(v.clone()),
            FieldValue::DateTime(v) => {
                let format = column
                    .datetime_format
                    .unwrap_or(DateTimeFormat::DashedDateTime);
                Some(v.format(format.pattern()).to_string())
            }
            FieldValue::Null => None,
        }
    }
}

/// Values of one row in schema column order.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRecord {
    pub values: Vec<FieldValue>,
}

impl TypedRecord {
    pub fn nulls(len: usize) -> Self {
        Self {
            values: vec![FieldValue::Null; len],
        }
    }
}

/// Canonical signed integer within 32-bit range.
///
/// Leading zeros, `+` signs and surrounding whitespace are rejected so that
/// rendering the parsed number gives back the original text.
pub fn parse_integer(text: &str) -> Option<i64> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    let value = text.parse::<i32>().ok()?;
    if value.to_string() != text {
        return None;
    }
    Some(value as i64)
}

/// Decimal literal whose shortest rendering equals the text.
pub fn parse_float(text: &str) -> Option<f64> {
    let unsigned = text.strip_prefix('-').unwrap_or(text);
    let mut parts = unsigned.splitn(2, '.');
    let whole = parts.next().unwrap_or("");
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if let Some(frac) = parts.next() {
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    let value = text.parse::<f64>().ok()?;
    if !value.is_finite() || value.to_string() != text {
        return None;
    }
    Some(value)
}

/// Date or date-time in the given layout, re-rendering to the same text.
pub fn parse_datetime(text: &str, format: DateTimeFormat) -> Option<NaiveDateTime> {
    let parsed = if format.has_time() {
        NaiveDateTime::parse_from_str(text, format.pattern()).ok()?
    } else {
        NaiveDate::parse_from_str(text, format.pattern())
            .ok()?
            .and_hms_opt(0, 0, 0)?
    };
    if parsed.format(format.pattern()).to_string() != text {
        return None;
    }
    Some(parsed)
}

/// First known layout that round-trips the text.
pub fn detect_datetime_format(text: &str) -> Option<DateTimeFormat> {
    DateTimeFormat::ALL
        .into_iter()
        .find(|format| parse_datetime(text, *format).is_some())
}

/// Converts a raw XML value into the column's type.
///
/// Blank values become NULL for typed columns; VARCHAR keeps the text verbatim.
pub fn convert_value(column: &ColumnDef, raw: &str) -> Result<FieldValue, String> {
    let trimmed = raw.trim();
    if column.inferred_type == ColumnType::Varchar {
        return Ok(FieldValue::Text(raw.to_string()));
    }
    if trimmed.is_empty() {
        return Ok(FieldValue::Null);
    }

    let converted = match column.inferred_type {
        ColumnType::Integer => parse_integer(trimmed).map(FieldValue::Integer),
        ColumnType::Float => parse_float(trimmed).map(FieldValue::Float),
        ColumnType::DateTime => column
            .datetime_format
            .and_then(|format| parse_datetime(trimmed, format))
            .map(FieldValue::DateTime),
        ColumnType::Varchar => None,
    };

    converted.ok_or_else(|| {
        format!(
            "value '{}' is not a valid {} for column {}",
            trimmed, column.inferred_type, column.name
        )
    })
}
