/// Find builder for filtered, sorted and paginated reads
///
/// Conditions on the same field combine into one operator object, so
/// `.gt("age", 20).lt("age", 40)` becomes `{"age": {"$gt": 20, "$lt": 40}}`.

use flux_core::{Document, FindOptions};
use serde_json::{Map, Value};

/// Find builder
#[derive(Debug, Clone, Default)]
pub struct Find {
    opts: FindOptions,
}

impl Find {
    /// Match every record
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a raw JSON query
    pub fn query(query: Document) -> Self {
        Self {
            opts: FindOptions::new().with_query(query),
        }
    }

    /// Require an exact match on a field's text value
    pub fn equals(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.opts.query.insert(field.into(), value.into());
        self
    }

    /// Require a numeric field greater than `value`
    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.operator(field, "$gt", value.into())
    }

    /// Require a numeric field less than `value`
    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.operator(field, "$lt", value.into())
    }

    /// Require a field equal to one of `values`
    pub fn is_in<I, V>(self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.operator(field, "$in", Value::Array(values))
    }

    fn operator(mut self, field: impl Into<String>, op: &str, operand: Value) -> Self {
        let entry = self
            .opts
            .query
            .entry(field.into())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(ops) = entry {
            ops.insert(op.to_string(), operand);
        }
        self
    }

    /// Sort ascending on a field
    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.opts = self.opts.with_sort(field, 1);
        self
    }

    /// Sort descending on a field. Any descending key reverses the whole
    /// ordering.
    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.opts = self.opts.with_sort(field, -1);
        self
    }

    /// Set the maximum number of records to return
    pub fn limit(mut self, limit: usize) -> Self {
        self.opts = self.opts.with_limit(limit);
        self
    }

    /// Set the number of records to skip
    pub fn skip(mut self, skip: usize) -> Self {
        self.opts = self.opts.with_skip(skip);
        self
    }

    pub(crate) fn into_options(self) -> FindOptions {
        self.opts
    }
}
