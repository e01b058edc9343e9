//! Document value model.
//!
//! Upstream documents arrive as loosely typed JSON objects. A [`Record`] wraps
//! the insertion-ordered JSON map and exposes typed, fallible accessors; a
//! [`Document`] is a record whose envelope fields have been validated.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Envelope field holding the document type.
pub const FIELD_TYPE: &str = "$TYPE";
/// Envelope field holding the document id.
pub const FIELD_DOCUMENT_ID: &str = "DOCUMENT_ID";
/// Envelope field holding the document version.
pub const FIELD_VERSION: &str = "$VERSION";
/// Envelope field holding the author id.
pub const FIELD_AUTHOR_ID: &str = "$AUTHOR_ID";
/// Envelope field holding the document date.
pub const FIELD_DATE: &str = "$DATE";
/// Envelope field holding the deleted flag.
pub const FIELD_DELETED: &str = "$DELETED";

/// Envelope fields every document must carry, non-null.
pub const REQUIRED_FIELDS: [&str; 6] = [
    FIELD_TYPE,
    FIELD_DOCUMENT_ID,
    FIELD_VERSION,
    FIELD_AUTHOR_ID,
    FIELD_DATE,
    FIELD_DELETED,
];

/// An ordered name -> value mapping, the payload of a document or chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Parse one NDJSON line into a record. Anything but a JSON object fails.
    pub fn from_json_line(line: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(other) => Err(Error::validation(format!(
                "expected a JSON object, got {}",
                kind_name(&other)
            ))),
            Err(e) => Err(Error::serialization("Malformed document JSON", e)),
        }
    }

    /// Raw value of a field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    /// Remove a field, keeping the order of the remaining ones.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.shift_remove(field)
    }

    /// Whether the field is present (null counts as present).
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Number of top-level fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Required, non-null string field.
    pub fn require_str(&self, field: &str) -> Result<&str> {
        match self.require(field)? {
            Value::String(s) => Ok(s),
            other => Err(wrong_kind(field, "string", other)),
        }
    }

    /// Required, non-null boolean field.
    pub fn require_bool(&self, field: &str) -> Result<bool> {
        match self.require(field)? {
            Value::Bool(b) => Ok(*b),
            other => Err(wrong_kind(field, "boolean", other)),
        }
    }

    /// Required, non-null integral number. Floats with no fractional part are
    /// accepted since the upstream serializes every number as a double.
    pub fn require_i64(&self, field: &str) -> Result<i64> {
        let value = self.require(field)?;
        let Value::Number(n) = value else {
            return Err(wrong_kind(field, "number", value));
        };
        if let Some(i) = n.as_i64() {
            return Ok(i);
        }
        match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
            _ => Err(Error::validation(format!(
                "required field '{field}' is not an integer: {n}"
            ))),
        }
    }

    /// Optional list field; `None` when absent or not a list.
    pub fn get_list(&self, field: &str) -> Option<&Vec<Value>> {
        self.0.get(field).and_then(Value::as_array)
    }

    /// Serialize to compact JSON bytes.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.0).map_err(|e| Error::serialization("Failed to encode record", e))
    }

    /// Consume into the underlying map.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    fn require(&self, field: &str) -> Result<&Value> {
        match self.0.get(field) {
            None => Err(Error::validation(format!(
                "required field '{field}' is missing from document"
            ))),
            Some(Value::Null) => Err(Error::validation(format!(
                "required field '{field}' is null in document"
            ))),
            Some(value) => Ok(value),
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Identity and metadata of a document, extracted from its envelope fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Document type name
    pub doc_type: String,
    /// Document id
    pub id: String,
    /// Document version
    pub version: i64,
    /// Author id
    pub author: String,
    /// Document date as sent by the upstream
    pub date: String,
    /// Deleted flag
    pub deleted: bool,
}

impl Envelope {
    /// Extract and validate the envelope from a record.
    pub fn from_record(record: &Record) -> Result<Self> {
        // Report missing/null fields in a stable order before kind mismatches.
        for field in REQUIRED_FIELDS {
            record.require(field)?;
        }

        Ok(Self {
            doc_type: record.require_str(FIELD_TYPE)?.to_string(),
            id: record.require_str(FIELD_DOCUMENT_ID)?.to_string(),
            version: record.require_i64(FIELD_VERSION)?,
            author: record.require_str(FIELD_AUTHOR_ID)?.to_string(),
            date: record.require_str(FIELD_DATE)?.to_string(),
            deleted: record.require_bool(FIELD_DELETED)?,
        })
    }
}

/// A validated upstream document: envelope plus the full payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    envelope: Envelope,
    data: Record,
}

impl Document {
    /// Validate a record and wrap it as a document.
    pub fn from_record(data: Record) -> Result<Self> {
        let envelope = Envelope::from_record(&data)?;
        Ok(Self { envelope, data })
    }

    /// The validated envelope.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// The full payload, envelope fields included.
    pub fn data(&self) -> &Record {
        &self.data
    }

    /// Split into envelope and payload.
    pub fn into_parts(self) -> (Envelope, Record) {
        (self.envelope, self.data)
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

fn wrong_kind(field: &str, expected: &str, got: &Value) -> Error {
    Error::validation(format!(
        "required field '{field}' should be a {expected}, got {}",
        kind_name(got)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn well() -> Record {
        Record::from_json_line(
            r#"{"$TYPE":"Well","DOCUMENT_ID":"W1","$VERSION":3.0,"$AUTHOR_ID":"A1",
                "$DATE":"2024-01-01T00:00:00Z","$DELETED":false,"NAME":"Alpha 1"}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_envelope_extraction() {
        let doc = Document::from_record(well()).unwrap();
        let env = doc.envelope();

        assert_eq!(env.doc_type, "Well");
        assert_eq!(env.id, "W1");
        assert_eq!(env.version, 3);
        assert_eq!(env.author, "A1");
        assert!(!env.deleted);
        assert_eq!(doc.data().get("NAME"), Some(&json!("Alpha 1")));
    }

    #[test]
    fn test_missing_deleted_is_rejected() {
        let mut record = well();
        record.remove(FIELD_DELETED);

        let err = Document::from_record(record).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("$DELETED"));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_null_envelope_field_is_rejected() {
        let mut record = well();
        record.insert(FIELD_AUTHOR_ID, Value::Null);

        let err = Document::from_record(record).unwrap_err();
        assert!(err.to_string().contains("is null"));
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let mut record = well();
        record.insert(FIELD_DELETED, "no");
        assert!(Document::from_record(record).is_err());

        let mut record = well();
        record.insert(FIELD_VERSION, 1.5);
        assert!(Document::from_record(record).is_err());
    }

    #[test]
    fn test_non_object_line_is_malformed() {
        assert!(Record::from_json_line("[1,2,3]").is_err());
        assert!(Record::from_json_line("{not json").is_err());
    }

    #[test]
    fn test_remove_keeps_field_order() {
        let mut record = well();
        record.remove("$VERSION");
        let keys: Vec<&str> = record.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            ["$TYPE", "DOCUMENT_ID", "$AUTHOR_ID", "$DATE", "$DELETED", "NAME"]
        );
    }
}
