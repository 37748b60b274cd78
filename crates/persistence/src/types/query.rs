//! Filters, projections, and patches.
//!
//! These are the backend-neutral query shapes accepted by
//! [`DocumentStorage`](crate::core::DocumentStorage). Each backend compiles
//! them into its own query language.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Document;
use crate::error::{StorageResult, ValidationError};

/// A conjunction of top-level field equality conditions.
///
/// Values compare as whole JSON values, so a nested object condition only
/// matches an identical nested object. A missing field compares equal to
/// `null` in the in-memory backend; other backends follow their native
/// semantics for `null` conditions. An empty filter matches every document.
///
/// ```
/// use neutrino_persistence::types::Filter;
/// use serde_json::json;
///
/// let filter = Filter::eq("name", "widget").and_eq("qty", 5);
/// assert_eq!(filter.len(), 2);
/// assert!(filter.matches(json!({"name": "widget", "qty": 5, "x": 1}).as_object().unwrap()));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Document);

impl Filter {
    /// A filter that matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    /// A filter with a single equality condition.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(field, value)
    }

    /// Adds an equality condition.
    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Returns `true` if the filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of conditions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over `(field, value)` conditions.
    pub fn conditions(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Returns the conditions as a document.
    pub fn as_document(&self) -> &Document {
        &self.0
    }

    /// Rejects filters no backend can evaluate uniformly.
    ///
    /// Field names must be non-empty, must not be query operators and must
    /// not be dotted paths. Condition values may not contain `$` keys at any
    /// depth, since some backends would read them as operators.
    pub fn validate(&self) -> StorageResult<()> {
        for (field, value) in &self.0 {
            if field.is_empty() {
                return Err(malformed("empty field name".to_string()));
            }
            if field.starts_with('$') {
                return Err(malformed(format!(
                    "operator '{field}' is not supported in filters"
                )));
            }
            if field.contains('.') {
                return Err(malformed(format!(
                    "nested path '{field}' is not supported in filters"
                )));
            }
            if let Some(key) = find_operator(value) {
                return Err(malformed(format!(
                    "operator '{key}' in the value of '{field}' is not supported"
                )));
            }
        }
        Ok(())
    }

    /// Evaluates the filter against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        self.0
            .iter()
            .all(|(field, expected)| doc.get(field).unwrap_or(&Value::Null) == expected)
    }
}

fn malformed(message: String) -> crate::error::StorageError {
    ValidationError::MalformedFilter { message }.into()
}

/// First `$`-prefixed key nested anywhere inside `value`.
fn find_operator(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) => map.iter().find_map(|(key, inner)| {
            if key.starts_with('$') {
                Some(key.as_str())
            } else {
                find_operator(inner)
            }
        }),
        Value::Array(items) => items.iter().find_map(find_operator),
        _ => None,
    }
}

impl From<Document> for Filter {
    fn from(doc: Document) -> Self {
        Self(doc)
    }
}

/// Restricts which fields a read returns.
///
/// The identifier field is always returned. An empty projection returns the
/// whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Projection(BTreeSet<String>);

impl Projection {
    /// A projection that returns every field.
    pub fn all() -> Self {
        Self::default()
    }

    /// A projection that returns only the given fields (plus the identifier).
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    /// Returns `true` if every field is returned.
    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }

    /// The selected field names, in sorted order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Applies the projection to a document in place.
    pub fn apply(&self, doc: &mut Document, id_field: &str) {
        if self.is_all() {
            return;
        }
        doc.retain(|field, _| field == id_field || self.0.contains(field));
    }
}

/// A field-level merge applied by update operations.
///
/// Every top-level field of the patch replaces the stored field of the same
/// name; other stored fields are left untouched. A patch written as
/// `{"$set": {...}}` is accepted and unwrapped. Any other `$` key is rejected.
///
/// ```
/// use neutrino_persistence::types::Patch;
/// use serde_json::json;
///
/// let patch = Patch::try_from(json!({"$set": {"name": "widget-v2"}})).unwrap();
/// assert_eq!(patch.as_document()["name"], json!("widget-v2"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Patch(Document);

impl Patch {
    /// An empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field assignment.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Parses a patch document.
    pub fn from_document(mut doc: Document) -> StorageResult<Self> {
        if doc.len() == 1 {
            if let Some(inner) = doc.remove("$set") {
                return match inner {
                    Value::Object(fields) => Self::from_document(fields),
                    other => Err(ValidationError::InvalidPatch {
                        message: format!("$set expects an object, got {other}"),
                    }
                    .into()),
                };
            }
        }

        for field in doc.keys() {
            if field.is_empty() {
                return Err(ValidationError::InvalidPatch {
                    message: "empty field name".to_string(),
                }
                .into());
            }
            if field.starts_with('$') {
                return Err(ValidationError::InvalidPatch {
                    message: format!("update operator '{field}' is not supported"),
                }
                .into());
            }
        }
        Ok(Self(doc))
    }

    /// Rejects patches that would rewrite the document identifier.
    pub fn check_identifier(&self, id_field: &str) -> StorageResult<()> {
        if self.0.contains_key(id_field) {
            return Err(ValidationError::InvalidPatch {
                message: format!("identifier field '{id_field}' cannot be updated"),
            }
            .into());
        }
        Ok(())
    }

    /// Returns `true` if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The field assignments.
    pub fn as_document(&self) -> &Document {
        &self.0
    }

    /// Consumes the patch, returning its field assignments.
    pub fn into_document(self) -> Document {
        self.0
    }

    /// Merges the patch into `doc`.
    pub fn apply_to(&self, doc: &mut Document) {
        for (field, value) in &self.0 {
            doc.insert(field.clone(), value.clone());
        }
    }
}

impl TryFrom<Document> for Patch {
    type Error = crate::error::StorageError;

    fn try_from(doc: Document) -> Result<Self, Self::Error> {
        Self::from_document(doc)
    }
}

impl TryFrom<Value> for Patch {
    type Error = crate::error::StorageError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_document(super::into_document(value)?)
    }
}
