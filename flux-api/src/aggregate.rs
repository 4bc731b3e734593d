/// Aggregation pipeline builder

use serde_json::{json, Map, Value};

/// Ordered list of pipeline stages
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Value>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a `$group` stage
    pub fn group(mut self, group: Group) -> Self {
        self.stages.push(json!({ "$group": Value::Object(group.body) }));
        self
    }

    /// Append a raw stage
    pub fn stage(mut self, stage: Value) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[Value] {
        &self.stages
    }
}

/// `$group` stage: one output row per distinct value of the key field
#[derive(Debug, Clone)]
pub struct Group {
    body: Map<String, Value>,
}

impl Group {
    /// Group by the text value of `field`
    pub fn by(field: impl Into<String>) -> Self {
        let mut body = Map::new();
        body.insert("_id".to_string(), Value::String(field.into()));
        Self { body }
    }

    /// Sum the numeric values of `field` into `output`
    pub fn sum(mut self, output: impl Into<String>, field: impl Into<String>) -> Self {
        self.body
            .insert(output.into(), json!({ "$sum": field.into() }));
        self
    }

    /// Count the group's records into `output`
    pub fn count(mut self, output: impl Into<String>) -> Self {
        self.body.insert(output.into(), json!({ "$count": 1 }));
        self
    }
}
