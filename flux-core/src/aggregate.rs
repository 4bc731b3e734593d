/// Aggregation engine - grouping pipeline over query results
///
/// A pipeline is an ordered list of stages. The only stage kind is
/// `$group`:
///
/// ```text
/// {"$group": {"_id": "city", "total": {"$sum": "age"}, "n": {"$count": 1}}}
/// ```
///
/// Each stage consumes the rows produced by the previous one, so a second
/// `$group` runs over group rows.

use crate::types::{parse_number, Document, ID_FIELD};
use crate::{Error, Result};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use tracing::warn;

enum Accumulator {
    Sum(String),
    Count,
}

struct GroupStage {
    key_field: String,
    accumulators: Vec<(String, Accumulator)>,
}

/// Run a pipeline over rows, returning the rows of the final stage
pub fn run(mut rows: Vec<Document>, pipeline: &[Value]) -> Result<Vec<Document>> {
    for (position, stage) in pipeline.iter().enumerate() {
        let stage = stage.as_object().ok_or_else(|| {
            Error::InvalidArgument(format!("pipeline stage {} is not an object", position))
        })?;

        match stage.get("$group") {
            Some(body) if truthy(body) => {
                let group = GroupStage::parse(body)?;
                rows = group.apply(&rows);
            }
            _ => {
                let kinds: Vec<&str> = stage.keys().map(String::as_str).collect();
                warn!("Ignoring unsupported pipeline stage {}: {:?}", position, kinds);
            }
        }
    }
    Ok(rows)
}

impl GroupStage {
    fn parse(body: &Value) -> Result<Self> {
        let body = body
            .as_object()
            .ok_or_else(|| Error::InvalidArgument("$group stage must be an object".into()))?;

        let key_field = match body.get(ID_FIELD) {
            Some(Value::String(field)) => field_ref(field).to_string(),
            Some(other) => {
                return Err(Error::InvalidArgument(format!(
                    "$group _id must be a field name, got {}",
                    other
                )))
            }
            None => return Err(Error::InvalidArgument("$group stage requires an _id".into())),
        };

        let mut accumulators = Vec::new();
        for (output, acc) in body.iter().filter(|(name, _)| name.as_str() != ID_FIELD) {
            let Some(acc) = acc.as_object() else {
                continue;
            };
            if let Some(field) = acc.get("$sum").filter(|v| truthy(v)) {
                let field = match field {
                    Value::String(s) => field_ref(s).to_string(),
                    other => other.to_string(),
                };
                accumulators.push((output.clone(), Accumulator::Sum(field)));
            } else if acc.get("$count").map_or(false, truthy) {
                accumulators.push((output.clone(), Accumulator::Count));
            }
        }

        Ok(Self {
            key_field,
            accumulators,
        })
    }

    fn apply(&self, rows: &[Document]) -> Vec<Document> {
        let mut groups: Vec<Document> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for row in rows {
            let key = row.get(&self.key_field).cloned().unwrap_or(Value::Null);
            let slot = *positions.entry(key.to_string()).or_insert_with(|| {
                let mut group = Map::new();
                group.insert(ID_FIELD.to_string(), key.clone());
                for (output, acc) in &self.accumulators {
                    let initial = match acc {
                        Accumulator::Sum(_) => Value::from(0.0),
                        Accumulator::Count => Value::from(0u64),
                    };
                    group.insert(output.clone(), initial);
                }
                groups.push(group);
                groups.len() - 1
            });

            let group = &mut groups[slot];
            for (output, acc) in &self.accumulators {
                let Some(current) = group.get_mut(output) else {
                    continue;
                };
                match acc {
                    Accumulator::Sum(field) => {
                        // A missing field contributes zero, an unparsable one nothing
                        let addend = match row.get(field) {
                            None => Some(0.0),
                            Some(value) => numeric(value),
                        };
                        if let (Some(addend), Some(total)) = (addend, current.as_f64()) {
                            if let Some(n) = Number::from_f64(total + addend) {
                                *current = Value::Number(n);
                            }
                        }
                    }
                    Accumulator::Count => {
                        let count = current.as_u64().unwrap_or(0);
                        *current = Value::from(count + 1);
                    }
                }
            }
        }

        groups
    }
}

/// `"$field"` and `"field"` both name the field
fn field_ref(name: &str) -> &str {
    name.strip_prefix('$').unwrap_or(name)
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
