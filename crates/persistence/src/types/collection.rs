//! Physical collection references and index specifications.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tenant::TenantId;

/// The physical target of a storage operation.
///
/// Built by [`StoreRegistry`](crate::store::StoreRegistry) from a logical
/// (tenant, type) pair; backends only look at the database, the physical
/// name, and the index specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionRef {
    database: String,
    name: String,
    tenant: TenantId,
    type_name: String,
    index: Option<IndexSpec>,
}

impl CollectionRef {
    /// Creates a reference to `database.name` owned by the system tenant.
    pub fn new(database: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            database: database.into(),
            type_name: name.clone(),
            name,
            tenant: TenantId::system(),
            index: None,
        }
    }

    /// Records the logical collection this reference was derived from.
    pub fn with_logical(mut self, tenant: TenantId, type_name: impl Into<String>) -> Self {
        self.tenant = tenant;
        self.type_name = type_name.into();
        self
    }

    /// Attaches an index that provisioning must create.
    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.index = Some(index);
        self
    }

    /// The database (MongoDB database or RethinkDB db) name.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// The physical collection or table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning tenant scope.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// The logical type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The index to provision, if any.
    pub fn index(&self) -> Option<&IndexSpec> {
        self.index.as_ref().filter(|index| !index.is_empty())
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database, self.name)
    }
}

/// The ordering or kind of a single index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Ascending order.
    Ascending,
    /// Descending order.
    Descending,
    /// Full-text index on string content.
    Text,
}

/// One key of an [`IndexSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexKey {
    /// Indexed field name.
    pub field: String,
    /// How the field is indexed.
    pub kind: IndexKind,
}

/// A secondary index a collection must carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Explicit index name; backends derive one from the keys when absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Indexed keys, in order.
    #[serde(default)]
    pub keys: Vec<IndexKey>,
    /// Rejects two documents with the same key values.
    #[serde(default)]
    pub unique: bool,
    /// Leaves documents without the key out of the index.
    #[serde(default)]
    pub sparse: bool,
}

impl IndexSpec {
    /// An empty specification.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key.
    pub fn key(mut self, field: impl Into<String>, kind: IndexKind) -> Self {
        self.keys.push(IndexKey {
            field: field.into(),
            kind,
        });
        self
    }

    /// Sets the uniqueness constraint.
    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    /// Sets whether documents missing the key are left out of the index.
    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    /// Sets an explicit name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns `true` if the specification has no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The explicit name, or `field_kind` segments joined by `_`.
    pub fn index_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.keys
            .iter()
            .map(|key| {
                let suffix = match key.kind {
                    IndexKind::Ascending => "1",
                    IndexKind::Descending => "-1",
                    IndexKind::Text => "text",
                };
                format!("{}_{}", key.field, suffix)
            })
            .collect::<Vec<_>>()
            .join("_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_ref_defaults_to_system() {
        let coll = CollectionRef::new("neutrino", "users");
        assert!(coll.tenant().is_system());
        assert_eq!(coll.type_name(), "users");
        assert_eq!(coll.to_string(), "neutrino/users");
        assert!(coll.index().is_none());
    }

    #[test]
    fn test_empty_index_is_ignored() {
        let coll = CollectionRef::new("db", "c").with_index(IndexSpec::new());
        assert!(coll.index().is_none());
    }

    #[test]
    fn test_index_name() {
        let spec = IndexSpec::new()
            .key("name", IndexKind::Text)
            .key("created", IndexKind::Descending);
        assert_eq!(spec.index_name(), "name_text_created_-1");
        assert_eq!(spec.clone().named("by_name").index_name(), "by_name");
    }
}
