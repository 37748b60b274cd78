//! Change events produced by change feed subscriptions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Document;

/// The kind of mutation a [`ChangeEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A document started matching the feed (usually an insert).
    Create,
    /// A matching document was modified and still matches.
    Update,
    /// A document stopped matching the feed (usually a delete).
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Create => write!(f, "create"),
            ChangeKind::Update => write!(f, "update"),
            ChangeKind::Delete => write!(f, "delete"),
        }
    }
}

/// A single mutation observed on a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: ChangeKind,
    /// Physical name of the collection the change happened in.
    pub collection: String,
    /// The resulting document, or the last known state for deletes.
    pub document: Document,
    /// The state before the change, when the backend reports it.
    pub previous: Option<Document>,
    /// When this layer observed the change.
    pub observed_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Classifies an `(old, new)` pair as reported by a change cursor.
    ///
    /// Returns `None` when both sides are absent, which carries no change.
    pub fn from_states(
        collection: impl Into<String>,
        old: Option<Document>,
        new: Option<Document>,
    ) -> Option<Self> {
        let (kind, document, previous) = match (old, new) {
            (None, None) => return None,
            (None, Some(new)) => (ChangeKind::Create, new, None),
            (Some(old), None) => (ChangeKind::Delete, old.clone(), Some(old)),
            (Some(old), Some(new)) => (ChangeKind::Update, new, Some(old)),
        };

        Some(Self {
            kind,
            collection: collection.into(),
            document,
            previous,
            observed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_classification() {
        let a = doc(json!({"id": "1", "v": 1}));
        let b = doc(json!({"id": "1", "v": 2}));

        let created = ChangeEvent::from_states("c", None, Some(a.clone())).unwrap();
        assert_eq!(created.kind, ChangeKind::Create);
        assert_eq!(created.document, a);
        assert!(created.previous.is_none());

        let updated = ChangeEvent::from_states("c", Some(a.clone()), Some(b.clone())).unwrap();
        assert_eq!(updated.kind, ChangeKind::Update);
        assert_eq!(updated.document, b);
        assert_eq!(updated.previous, Some(a.clone()));

        let deleted = ChangeEvent::from_states("c", Some(b.clone()), None).unwrap();
        assert_eq!(deleted.kind, ChangeKind::Delete);
        assert_eq!(deleted.document, b);

        assert!(ChangeEvent::from_states("c", None, None).is_none());
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(serde_json::to_string(&ChangeKind::Create).unwrap(), "\"create\"");
        assert_eq!(ChangeKind::Delete.to_string(), "delete");
    }
}
