use crate::{Error, Result};
use serde_json::{Map, Value};
use std::borrow::Cow;
use uuid::Uuid;

/// Reserved field name carrying the record identifier
pub const ID_FIELD: &str = "_id";

/// JSON object used for record data, patches and queries
pub type Document = Map<String, Value>;

/// Record - an identified, ordered mapping of field name to text value
///
/// Values are always held as text. Typed input is coerced once, at
/// persistence time, and numeric interpretation happens again at query time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: Uuid,
    pub fields: Vec<(String, String)>,
}

impl Record {
    /// Create an empty record with the given identifier
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            fields: Vec::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Build a record from a JSON object.
    ///
    /// A string `_id` holding a UUID becomes the identifier, otherwise a
    /// fresh v4 identifier is generated.
    pub fn from_document(data: &Document) -> Result<Self> {
        let id = match data.get(ID_FIELD) {
            Some(value) => parse_id(value)?,
            None => Uuid::new_v4(),
        };

        let mut record = Record::new(id);
        for (name, value) in data {
            if name != ID_FIELD {
                record.set(name.clone(), to_text(value));
            }
        }
        Ok(record)
    }

    /// Get a user field's text value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    /// Get a field's text value, resolving `_id` to the identifier
    pub fn field_text(&self, name: &str) -> Option<Cow<'_, str>> {
        if name == ID_FIELD {
            return Some(Cow::Owned(self.id.to_string()));
        }
        self.get(name).map(Cow::Borrowed)
    }

    /// Set a field, replacing its value in place or appending it
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Merge a patch into this record. The identifier never changes.
    pub fn apply_patch(&mut self, patch: &Document) {
        for (name, value) in patch {
            if name != ID_FIELD {
                self.set(name.clone(), to_text(value));
            }
        }
    }

    /// Number of user fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Render as a JSON object with `_id` first and every value as a string
    pub fn to_document(&self) -> Document {
        let mut doc = Map::with_capacity(self.fields.len() + 1);
        doc.insert(ID_FIELD.to_string(), Value::String(self.id.to_string()));
        for (name, value) in &self.fields {
            doc.insert(name.clone(), Value::String(value.clone()));
        }
        doc
    }
}

/// Coerce a JSON value to its stored text form
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Parse text as a number the way queries, sorts and sums do
pub fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok()
}

/// Parse a caller-supplied identifier value
pub fn parse_id(value: &Value) -> Result<Uuid> {
    match value {
        Value::String(s) => Uuid::parse_str(s)
            .map_err(|e| Error::InvalidArgument(format!("invalid {}: {}", ID_FIELD, e))),
        other => Err(Error::InvalidArgument(format!(
            "{} must be a UUID string, got {}",
            ID_FIELD, other
        ))),
    }
}
