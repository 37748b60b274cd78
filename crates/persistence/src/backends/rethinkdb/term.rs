//! ReQL term builder.
//!
//! Terms serialize as `[type, [args...], {optargs}]`. Datum arrays must be
//! wrapped in `MAKE_ARRAY` so the server does not read them as terms;
//! objects are sent as they are.

use serde_json::{Map, Value, json};

use crate::types::{Document, Filter, Patch, Projection};

mod term_type {
    pub const MAKE_ARRAY: u64 = 2;
    pub const VAR: u64 = 10;
    pub const DB: u64 = 14;
    pub const TABLE: u64 = 15;
    pub const GET: u64 = 16;
    pub const EQ: u64 = 17;
    pub const PLUCK: u64 = 33;
    pub const FILTER: u64 = 39;
    pub const UPDATE: u64 = 53;
    pub const DELETE: u64 = 54;
    pub const REPLACE: u64 = 55;
    pub const INSERT: u64 = 56;
    pub const DB_CREATE: u64 = 57;
    pub const DB_LIST: u64 = 59;
    pub const TABLE_CREATE: u64 = 60;
    pub const TABLE_LIST: u64 = 62;
    pub const FUNCALL: u64 = 64;
    pub const BRANCH: u64 = 65;
    pub const AND: u64 = 67;
    pub const FUNC: u64 = 69;
    pub const LIMIT: u64 = 71;
    pub const DEFAULT: u64 = 92;
    pub const CONTAINS: u64 = 93;
    pub const LITERAL: u64 = 137;
    pub const CHANGES: u64 = 152;
    pub const BRACKET: u64 = 170;
    pub const WAIT: u64 = 177;
}

use term_type::*;

/// A ReQL term in its JSON wire form.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Term(Value);

impl Term {
    fn call(kind: u64, args: Vec<Value>) -> Self {
        Term(json!([kind, args]))
    }

    fn on(self, kind: u64, mut args: Vec<Value>) -> Self {
        args.insert(0, self.0);
        Self::call(kind, args)
    }

    /// `r.db(name)`
    pub(crate) fn db(name: &str) -> Self {
        Self::call(DB, vec![json!(name)])
    }

    /// `r.dbList()`
    pub(crate) fn db_list() -> Self {
        Self::call(DB_LIST, vec![])
    }

    /// `r.dbCreate(name)`
    pub(crate) fn db_create(name: &str) -> Self {
        Self::call(DB_CREATE, vec![json!(name)])
    }

    /// `db.table(name)`
    pub(crate) fn table(self, name: &str) -> Self {
        self.on(TABLE, vec![json!(name)])
    }

    /// `db.tableList()`
    pub(crate) fn table_list(self) -> Self {
        self.on(TABLE_LIST, vec![])
    }

    /// `db.tableCreate(name)`
    pub(crate) fn table_create(self, name: &str) -> Self {
        self.on(TABLE_CREATE, vec![json!(name)])
    }

    /// `seq.contains(value)`
    pub(crate) fn contains(self, value: &str) -> Self {
        self.on(CONTAINS, vec![json!(value)])
    }

    /// `table.get(id)`
    pub(crate) fn get(self, id: &str) -> Self {
        self.on(GET, vec![json!(id)])
    }

    /// `seq.filter(row => row(f1).default(null).eq(v1) && ...)`.
    ///
    /// An empty filter adds no term. Reading a missing field yields `null`,
    /// so `{"f": null}` matches documents without `f`.
    pub(crate) fn filter(self, filter: &Filter) -> Self {
        let mut conditions: Vec<Value> = filter
            .conditions()
            .map(|(field, value)| {
                let field = Term::var(1)
                    .on(BRACKET, vec![json!(field)])
                    .on(DEFAULT, vec![Value::Null]);
                field.on(EQ, vec![encode_datum(value)]).0
            })
            .collect();

        let body = match conditions.len() {
            0 => return self,
            1 => conditions.remove(0),
            _ => Self::call(AND, conditions).0,
        };
        self.on(FILTER, vec![Self::func(1, body).0])
    }

    /// `sel.pluck(id_field, fields...)`; no term for an all-fields projection.
    pub(crate) fn pluck(self, projection: &Projection, id_field: &str) -> Self {
        if projection.is_all() {
            return self;
        }
        let mut fields = vec![json!(id_field)];
        fields.extend(
            projection
                .field_names()
                .filter(|field| *field != id_field)
                .map(|field| json!(field)),
        );
        self.on(PLUCK, fields)
    }

    /// `seq.limit(n)`
    pub(crate) fn limit(self, n: u64) -> Self {
        self.on(LIMIT, vec![json!(n)])
    }

    /// `table.insert(doc)`
    pub(crate) fn insert(self, doc: &Document) -> Self {
        self.on(INSERT, vec![encode_object(doc)])
    }

    /// `sel.update(patch)`, replacing top-level fields instead of merging
    /// nested objects.
    pub(crate) fn update(self, patch: &Patch) -> Self {
        let fields: Map<String, Value> = patch
            .as_document()
            .iter()
            .map(|(field, value)| {
                let value = match value {
                    Value::Object(_) => Self::call(LITERAL, vec![encode_datum(value)]).0,
                    other => encode_datum(other),
                };
                (field.clone(), value)
            })
            .collect();
        self.on(UPDATE, vec![Value::Object(fields)])
    }

    /// `row.replace(old => branch(old.eq(null), null, doc))`, which leaves a
    /// missing row missing.
    pub(crate) fn replace_existing(self, doc: &Document) -> Self {
        let old = Term::var(1);
        let is_missing = old.on(EQ, vec![Value::Null]);
        let body = Self::call(BRANCH, vec![is_missing.0, Value::Null, encode_object(doc)]);
        self.on(REPLACE, vec![Self::func(1, body.0).0])
    }

    /// `sel.delete()`
    pub(crate) fn delete(self) -> Self {
        self.on(DELETE, vec![])
    }

    /// `seq.changes()`
    pub(crate) fn changes(self) -> Self {
        self.on(CHANGES, vec![])
    }

    /// `table.wait()`, resolves once the table accepts reads and writes.
    pub(crate) fn wait(self) -> Self {
        self.on(WAIT, vec![])
    }

    /// `self.do(exists => branch(exists, {"created": 0}, create))`, the
    /// conditional create used for databases and tables.
    pub(crate) fn unless_exists(self, create: Term) -> Self {
        let body = Self::call(BRANCH, vec![Term::var(1).0, json!({ "created": 0 }), create.0]);
        Self::call(FUNCALL, vec![Self::func(1, body.0).0, self.0])
    }

    fn var(n: u64) -> Self {
        Self::call(VAR, vec![json!(n)])
    }

    fn func(param: u64, body: Value) -> Self {
        Self::call(FUNC, vec![Self::call(MAKE_ARRAY, vec![json!(param)]).0, body])
    }

    /// The wire form.
    pub(crate) fn into_value(self) -> Value {
        self.0
    }
}

fn encode_datum(value: &Value) -> Value {
    match value {
        Value::Array(items) => json!([MAKE_ARRAY, items.iter().map(encode_datum).collect::<Vec<_>>()]),
        Value::Object(map) => encode_object(map),
        other => other.clone(),
    }
}

fn encode_object(map: &Map<String, Value>) -> Value {
    Value::Object(
        map.iter()
            .map(|(key, value)| (key.clone(), encode_datum(value)))
            .collect(),
    )
}
