//! Self-describing document schema as published by the upstream.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Declared type of a document field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Free text
    Text,
    /// GUID, stored as text
    Guid,
    /// Unique well identifier, stored as text
    Uwi,
    /// Integer
    Integer,
    /// Decimal
    Decimal,
    /// Boolean
    Boolean,
    /// Date/time
    DateTime,
    /// Reference to another document
    Document,
    /// Nested record
    Record,
    /// List of nested records
    RecordList,
    /// Anything this crate does not know how to project
    Unknown(String),
}

impl FieldType {
    /// Parse the upstream type name.
    pub fn parse(name: &str) -> Self {
        match name {
            "TEXT" => FieldType::Text,
            "GUID" => FieldType::Guid,
            "UWI" => FieldType::Uwi,
            "INTEGER" => FieldType::Integer,
            "DECIMAL" => FieldType::Decimal,
            "BOOLEAN" => FieldType::Boolean,
            "DATETIME" => FieldType::DateTime,
            "DOCUMENT" => FieldType::Document,
            "RECORD" => FieldType::Record,
            "RECORD LIST" => FieldType::RecordList,
            other => FieldType::Unknown(other.to_string()),
        }
    }

    /// Upstream type name.
    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Text => "TEXT",
            FieldType::Guid => "GUID",
            FieldType::Uwi => "UWI",
            FieldType::Integer => "INTEGER",
            FieldType::Decimal => "DECIMAL",
            FieldType::Boolean => "BOOLEAN",
            FieldType::DateTime => "DATETIME",
            FieldType::Document => "DOCUMENT",
            FieldType::Record => "RECORD",
            FieldType::RecordList => "RECORD LIST",
            FieldType::Unknown(name) => name,
        }
    }

    /// Whether fields of this type carry a nested schema.
    pub fn is_nested(&self) -> bool {
        matches!(self, FieldType::Record | FieldType::RecordList)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(FieldType::parse(&name))
    }
}

/// Metadata for one field of a document type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    /// Field name
    #[serde(rename = "NAME", default)]
    pub name: String,
    /// Inactive fields are dropped from views
    #[serde(rename = "ACTIVE", default)]
    pub active: bool,
    /// Declared type
    #[serde(rename = "TYPE")]
    pub field_type: FieldType,
    /// Whether the field may be null
    #[serde(rename = "NULLABLE", default)]
    pub nullable: bool,
    /// Declared size, informational
    #[serde(rename = "SIZE", default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    /// Nested schema for RECORD / RECORD LIST
    #[serde(rename = "RECORD_TYPE", default, skip_serializing_if = "Option::is_none")]
    pub record_type: Option<DocumentSchema>,
    /// Formula of a calculated field, informational
    #[serde(rename = "FORMULA", default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    /// Referenced document type for DOCUMENT
    #[serde(rename = "DOCUMENT_TYPE", default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    /// Whether a DATETIME is stored without zone, informational
    #[serde(rename = "DATE_UNZONED", default, skip_serializing_if = "Option::is_none")]
    pub date_unzoned: Option<bool>,
}

impl FieldMetadata {
    /// Create active, nullable metadata of the given type.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            active: true,
            field_type,
            nullable: true,
            size: None,
            record_type: None,
            formula: None,
            document_type: None,
            date_unzoned: None,
        }
    }

    /// Attach a nested schema.
    pub fn with_record_type(mut self, schema: DocumentSchema) -> Self {
        self.record_type = Some(schema);
        self
    }

    /// Attach a referenced document type.
    pub fn with_document_type(mut self, doc_type: impl Into<String>) -> Self {
        self.document_type = Some(doc_type.into());
        self
    }

    /// Set the active flag.
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Field name -> metadata for one document type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentSchema(BTreeMap<String, FieldMetadata>);

impl DocumentSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, keyed by its name.
    pub fn with_field(mut self, field: FieldMetadata) -> Self {
        self.0.insert(field.name.clone(), field);
        self
    }

    /// Insert a field under an explicit key.
    pub fn insert(&mut self, key: impl Into<String>, field: FieldMetadata) {
        self.0.insert(key.into(), field);
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&FieldMetadata> {
        self.0.get(key)
    }

    /// Fields ordered by key.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldMetadata)> {
        self.0.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy with inactive fields removed at every nesting level.
    pub fn without_inactive(&self) -> Self {
        let fields = self
            .0
            .iter()
            .filter(|(_, meta)| meta.active)
            .map(|(key, meta)| {
                let mut meta = meta.clone();
                meta.record_type = meta.record_type.as_ref().map(DocumentSchema::without_inactive);
                (key.clone(), meta)
            })
            .collect();
        Self(fields)
    }
}

impl FromIterator<(String, FieldMetadata)> for DocumentSchema {
    fn from_iter<I: IntoIterator<Item = (String, FieldMetadata)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Document type name -> schema, the full upstream schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootSchema(BTreeMap<String, DocumentSchema>);

impl RootSchema {
    /// Create an empty root schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the upstream schema JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::schema(format!("Error parsing schema: {e}")))
    }

    /// Add a document type.
    pub fn with_type(mut self, name: impl Into<String>, schema: DocumentSchema) -> Self {
        self.0.insert(name.into(), schema);
        self
    }

    /// Look up a document type.
    pub fn get(&self, name: &str) -> Option<&DocumentSchema> {
        self.0.get(name)
    }

    /// Document types ordered by name.
    pub fn types(&self) -> impl Iterator<Item = (&String, &DocumentSchema)> {
        self.0.iter()
    }

    /// Number of document types.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no document types.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy with inactive fields removed from every type.
    pub fn without_inactive(&self) -> Self {
        Self(
            self.0
                .iter()
                .map(|(name, schema)| (name.clone(), schema.without_inactive()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r#"{
        "Well": {
            "NAME": {"NAME": "NAME", "ACTIVE": true, "TYPE": "TEXT", "NULLABLE": true, "SIZE": 80},
            "OPERATOR": {"NAME": "OPERATOR", "ACTIVE": true, "TYPE": "DOCUMENT", "NULLABLE": true,
                         "DOCUMENT_TYPE": "Company"},
            "LEGACY": {"NAME": "LEGACY", "ACTIVE": false, "TYPE": "TEXT", "NULLABLE": true},
            "CASINGS": {"NAME": "CASINGS", "ACTIVE": true, "TYPE": "RECORD LIST", "NULLABLE": false,
                        "RECORD_TYPE": {
                            "DEPTH": {"NAME": "DEPTH", "ACTIVE": true, "TYPE": "DECIMAL", "NULLABLE": true},
                            "OLD": {"NAME": "OLD", "ACTIVE": false, "TYPE": "DECIMAL", "NULLABLE": true}
                        }},
            "SHAPE": {"NAME": "SHAPE", "ACTIVE": true, "TYPE": "GEOMETRY", "NULLABLE": true}
        }
    }"#;

    #[test]
    fn test_parse_root_schema() {
        let root = RootSchema::from_json(SCHEMA).unwrap();
        let well = root.get("Well").unwrap();

        assert_eq!(well.len(), 5);
        assert_eq!(well.get("NAME").unwrap().field_type, FieldType::Text);
        assert_eq!(well.get("NAME").unwrap().size, Some(80));
        assert_eq!(
            well.get("OPERATOR").unwrap().document_type.as_deref(),
            Some("Company")
        );
        assert_eq!(well.get("CASINGS").unwrap().field_type, FieldType::RecordList);
        assert_eq!(
            well.get("SHAPE").unwrap().field_type,
            FieldType::Unknown("GEOMETRY".into())
        );
    }

    #[test]
    fn test_without_inactive_is_recursive() {
        let root = RootSchema::from_json(SCHEMA).unwrap().without_inactive();
        let well = root.get("Well").unwrap();

        assert!(well.get("LEGACY").is_none());
        let casings = well.get("CASINGS").unwrap().record_type.as_ref().unwrap();
        assert!(casings.get("DEPTH").is_some());
        assert!(casings.get("OLD").is_none());
    }

    #[test]
    fn test_field_type_names_round_trip() {
        for name in ["TEXT", "RECORD LIST", "DATETIME", "POLYGON"] {
            assert_eq!(FieldType::parse(name).as_str(), name);
        }
        assert!(FieldType::Record.is_nested());
        assert!(!FieldType::Document.is_nested());
    }

    #[test]
    fn test_malformed_schema_is_schema_error() {
        let err = RootSchema::from_json("{\"Well\": []}").unwrap_err();
        assert_eq!(err.code(), "SCHEMA_ERROR");
    }
}
