//! Documents and document identifiers.
//!
//! A [`Document`] is a JSON object. The name of its identifier field depends
//! on the backend (`_id` for MongoDB, `id` for RethinkDB and the in-memory
//! backend), so every helper here takes the field name explicitly.

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{StorageResult, ValidationError};

/// A mapping from field name to JSON value.
pub type Document = Map<String, Value>;

/// Generates a globally unique document identifier.
///
/// Identifiers are UUID v4 values rendered as 32 lowercase hex digits with no
/// dashes.
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Returns the identifier of `doc`, if it has a string one.
pub fn document_id<'a>(doc: &'a Document, id_field: &str) -> Option<&'a str> {
    doc.get(id_field).and_then(Value::as_str)
}

/// Makes sure `doc` carries an identifier and returns it.
///
/// A missing or `null` identifier is replaced by [`generate_id`]. Any other
/// non-string identifier is rejected.
pub fn ensure_id(doc: &mut Document, id_field: &str) -> StorageResult<String> {
    match doc.get(id_field) {
        None | Some(Value::Null) => {
            let id = generate_id();
            doc.insert(id_field.to_string(), Value::String(id.clone()));
            Ok(id)
        }
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(other) => Err(ValidationError::InvalidDocument {
            message: format!("identifier field '{id_field}' must be a non-empty string, got {other}"),
        }
        .into()),
    }
}

/// Converts a JSON value into a [`Document`].
///
/// # Errors
///
/// Returns `ValidationError::InvalidDocument` if `value` is not an object.
pub fn into_document(value: Value) -> StorageResult<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ValidationError::InvalidDocument {
            message: format!("expected a JSON object, got {other}"),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_generated_ids_are_unique_hex() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 1000);
        for id in &ids {
            assert_eq!(id.len(), 32);
            assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_ensure_id_generates_when_missing() {
        let mut doc = into_document(json!({"name": "widget"})).unwrap();
        let id = ensure_id(&mut doc, "_id").unwrap();
        assert_eq!(document_id(&doc, "_id"), Some(id.as_str()));
    }

    #[test]
    fn test_ensure_id_generates_when_null() {
        let mut doc = into_document(json!({"id": null})).unwrap();
        let id = ensure_id(&mut doc, "id").unwrap();
        assert_eq!(doc["id"], json!(id));
    }

    #[test]
    fn test_ensure_id_keeps_existing() {
        let mut doc = into_document(json!({"id": "fixed", "n": 1})).unwrap();
        assert_eq!(ensure_id(&mut doc, "id").unwrap(), "fixed");
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn test_ensure_id_rejects_non_string() {
        let mut doc = into_document(json!({"id": 7})).unwrap();
        assert!(ensure_id(&mut doc, "id").is_err());

        let mut doc = into_document(json!({"id": ""})).unwrap();
        assert!(ensure_id(&mut doc, "id").is_err());
    }

    #[test]
    fn test_into_document_rejects_scalars() {
        assert!(into_document(json!([1, 2])).is_err());
        assert!(into_document(json!("x")).is_err());
    }
}
