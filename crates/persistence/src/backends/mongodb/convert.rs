//! Conversions between JSON documents and BSON.

use mongodb::bson::oid::ObjectId;
use mongodb::bson::{self, Bson, doc};

use super::backend::ID_FIELD;
use crate::error::{BackendError, StorageResult};
use crate::types::{Document, Filter, Patch, Projection};

/// Converts a JSON document to BSON.
pub(crate) fn to_bson(doc: &Document) -> StorageResult<bson::Document> {
    bson::to_document(doc).map_err(|err| {
        BackendError::SerializationError {
            message: format!("document is not representable as BSON: {err}"),
        }
        .into()
    })
}

/// Converts a stored BSON document back to JSON.
///
/// Values use relaxed extended JSON, so plain numbers stay plain. An
/// `ObjectId` identifier written by another client is returned as its hex
/// string so identifiers are strings on every backend.
pub(crate) fn from_bson(mut doc: bson::Document) -> StorageResult<Document> {
    if let Some(Bson::ObjectId(oid)) = doc.get(ID_FIELD) {
        let hex = oid.to_hex();
        doc.insert(ID_FIELD, hex);
    }
    match Bson::Document(doc).into_relaxed_extjson() {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(BackendError::SerializationError {
            message: format!("expected a document, got {other}"),
        }
        .into()),
    }
}

pub(crate) fn filter_to_bson(filter: &Filter) -> StorageResult<bson::Document> {
    to_bson(filter.as_document())
}

/// Selects a document by identifier.
///
/// A 24-digit hex id may belong to a document whose `_id` is an `ObjectId`
/// (returned as hex by [`from_bson`]), so both forms are matched.
pub(crate) fn id_filter(id: &str) -> bson::Document {
    match ObjectId::parse_str(id) {
        Ok(oid) => doc! { ID_FIELD: { "$in": [id, oid] } },
        Err(_) => doc! { ID_FIELD: id },
    }
}

/// Renders a patch as a `$set` update.
pub(crate) fn patch_to_update(patch: &Patch) -> StorageResult<bson::Document> {
    Ok(doc! { "$set": to_bson(patch.as_document())? })
}

/// Renders a projection as an inclusion document, `None` for every field.
pub(crate) fn projection_to_bson(projection: &Projection) -> Option<bson::Document> {
    if projection.is_all() {
        return None;
    }
    let mut fields = bson::Document::new();
    for field in projection.field_names() {
        fields.insert(field, 1);
    }
    Some(fields)
}
