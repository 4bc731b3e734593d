/// Query engine - filter, sort, paginate and buffer merge
///
/// A query is a JSON object of field conditions, all of which must hold:
/// - bare value: the record's text equals the value's text form
/// - `{"$gt": n}` / `{"$lt": n}`: numeric comparison, non-numeric text fails
/// - `{"$in": [..]}`: the record's text equals one candidate's text form
///
/// Unknown operators are ignored.

use crate::types::{parse_number, to_text, Document, Record};
use serde_json::Value;
use std::cmp::Ordering;

/// One sort key. A direction of -1 on any key reverses the whole ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: i64,
}

impl SortKey {
    pub fn new(field: impl Into<String>, direction: i64) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

/// Parameters of a find/count call
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub query: Document,
    pub limit: Option<usize>,
    pub skip: usize,
    pub sort: Vec<SortKey>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: Document) -> Self {
        self.query = query;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, direction: i64) -> Self {
        self.sort.push(SortKey::new(field, direction));
        self
    }
}

/// Whether a record satisfies every condition of a query
pub fn matches(record: &Record, query: &Document) -> bool {
    query
        .iter()
        .all(|(field, condition)| condition_holds(record, field, condition))
}

fn condition_holds(record: &Record, field: &str, condition: &Value) -> bool {
    // Missing fields read as empty text
    let text = record.field_text(field);
    let text = text.as_deref().unwrap_or("");
    match condition {
        Value::Object(ops) => ops.iter().all(|(op, operand)| operator_holds(text, op, operand)),
        other => text == to_text(other),
    }
}

fn operator_holds(text: &str, op: &str, operand: &Value) -> bool {
    match op {
        "$gt" | "$lt" => {
            // Empty or missing fields compare as zero
            let lhs = if text.is_empty() {
                Some(0.0)
            } else {
                parse_number(text)
            };
            let rhs = match operand {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => parse_number(s),
                _ => None,
            };
            match (lhs, rhs) {
                (Some(l), Some(r)) if op == "$gt" => l > r,
                (Some(l), Some(r)) => l < r,
                _ => false,
            }
        }
        "$in" => match operand {
            Value::Array(candidates) => candidates.iter().any(|c| to_text(c) == text),
            _ => false,
        },
        _ => true,
    }
}

/// Keep the records matching a query, preserving order
pub fn filter(records: Vec<Record>, query: &Document) -> Vec<Record> {
    if query.is_empty() {
        return records;
    }
    records.into_iter().filter(|r| matches(r, query)).collect()
}

/// Compare two text values: numbers numerically, numbers before text,
/// otherwise lexically
pub fn compare_text(a: &str, b: &str) -> Ordering {
    match (parse_number(a), parse_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn compare_records(a: &Record, b: &Record, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let left = a.field_text(&key.field);
        let right = b.field_text(&key.field);
        let ord = compare_text(left.as_deref().unwrap_or(""), right.as_deref().unwrap_or(""));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Stable multi-key sort. Any -1 direction reverses the entire ordering,
/// not just its own key.
pub fn sort(records: &mut [Record], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    let reverse = keys.iter().any(|k| k.direction == -1);
    if reverse {
        records.sort_by(|a, b| compare_records(b, a, keys));
    } else {
        records.sort_by(|a, b| compare_records(a, b, keys));
    }
}

/// Drop `skip` records, then keep at most `limit`
pub fn paginate(records: Vec<Record>, skip: usize, limit: Option<usize>) -> Vec<Record> {
    let iter = records.into_iter().skip(skip);
    match limit {
        Some(limit) => iter.take(limit).collect(),
        None => iter.collect(),
    }
}

/// Filter, sort and window a record set
pub fn window(records: Vec<Record>, opts: &FindOptions) -> Vec<Record> {
    let mut records = filter(records, &opts.query);
    sort(&mut records, &opts.sort);
    paginate(records, opts.skip, opts.limit)
}

/// Produce the final result of a find.
///
/// Persisted records are windowed first. When the write buffer holds
/// records, the matching buffered ones are appended and the combined set is
/// sorted and windowed again with the same skip/limit, so a buffered record
/// can push a persisted one out of the window.
pub fn merge(persisted: Vec<Record>, buffered: Vec<Record>, opts: &FindOptions) -> Vec<Record> {
    let mut records = window(persisted, opts);
    if buffered.is_empty() {
        return records;
    }
    records.extend(filter(buffered, &opts.query));
    sort(&mut records, &opts.sort);
    paginate(records, opts.skip, opts.limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn person(name: &str, age: &str) -> Record {
        Record::new(Uuid::new_v4())
            .with_field("name", name)
            .with_field("age", age)
    }

    fn q(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn names(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.get("name").unwrap_or("")).collect()
    }

    #[test]
    fn test_exact_match_uses_text_form() {
        let alice = person("Alice", "30");
        assert!(matches(&alice, &q(json!({"age": 30}))));
        assert!(matches(&alice, &q(json!({"age": "30"}))));
        assert!(!matches(&alice, &q(json!({"age": 31}))));
        assert!(!matches(&alice, &q(json!({"city": "Oslo"}))));
        assert!(matches(&alice, &q(json!({}))));
    }

    #[test]
    fn test_missing_field_equals_empty_text() {
        let alice = person("Alice", "30");
        assert!(matches(&alice, &q(json!({"city": ""}))));
        assert!(!matches(&alice, &q(json!({"name": ""}))));
    }

    #[test]
    fn test_match_on_id() {
        let alice = person("Alice", "30");
        assert!(matches(&alice, &q(json!({"_id": alice.id.to_string()}))));
    }

    #[test]
    fn test_gt_lt() {
        let alice = person("Alice", "30");
        assert!(matches(&alice, &q(json!({"age": {"$gt": 25}}))));
        assert!(!matches(&alice, &q(json!({"age": {"$gt": 30}}))));
        assert!(matches(&alice, &q(json!({"age": {"$lt": 31.5}}))));
        assert!(matches(&alice, &q(json!({"age": {"$gt": 20, "$lt": 40}}))));
        assert!(!matches(&alice, &q(json!({"age": {"$gt": 20, "$lt": 25}}))));
    }

    #[test]
    fn test_non_numeric_fails_comparison() {
        let alice = person("Alice", "thirty");
        assert!(!matches(&alice, &q(json!({"age": {"$gt": 0}}))));
        assert!(!matches(&alice, &q(json!({"age": {"$lt": 100}}))));
    }

    #[test]
    fn test_missing_field_compares_as_zero() {
        let alice = person("Alice", "30");
        assert!(matches(&alice, &q(json!({"score": {"$lt": 1}}))));
        assert!(!matches(&alice, &q(json!({"score": {"$gt": 0}}))));
    }

    #[test]
    fn test_in() {
        let alice = person("Alice", "30");
        assert!(matches(&alice, &q(json!({"name": {"$in": ["Bob", "Alice"]}}))));
        assert!(matches(&alice, &q(json!({"age": {"$in": [30, 40]}}))));
        assert!(!matches(&alice, &q(json!({"name": {"$in": ["Bob"]}}))));
        assert!(!matches(&alice, &q(json!({"name": {"$in": "Alice"}}))));
    }

    #[test]
    fn test_unknown_operator_is_ignored() {
        let alice = person("Alice", "30");
        assert!(matches(&alice, &q(json!({"age": {"$regex": "^3"}}))));
    }

    #[test]
    fn test_sort_numeric_and_lexical() {
        let mut records = vec![person("c", "10"), person("a", "9"), person("b", "100")];
        sort(&mut records, &[SortKey::new("age", 1)]);
        assert_eq!(names(&records), vec!["a", "c", "b"]);

        sort(&mut records, &[SortKey::new("name", 1)]);
        assert_eq!(names(&records), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sort_numbers_before_text() {
        let mut records = vec![person("x", "abc"), person("y", "5")];
        sort(&mut records, &[SortKey::new("age", 1)]);
        assert_eq!(names(&records), vec!["y", "x"]);
    }

    #[test]
    fn test_any_descending_key_reverses_everything() {
        let mut records = vec![
            person("a", "1"),
            person("b", "2"),
            person("a", "2"),
        ];
        // name ascending is requested, but age -1 flips the whole order
        sort(&mut records, &[SortKey::new("name", 1), SortKey::new("age", -1)]);
        let pairs: Vec<_> = records
            .iter()
            .map(|r| (r.get("name").unwrap(), r.get("age").unwrap()))
            .collect();
        assert_eq!(pairs, vec![("b", "2"), ("a", "2"), ("a", "1")]);
    }

    #[test]
    fn test_sort_is_stable() {
        let mut records = vec![person("first", "1"), person("second", "1")];
        sort(&mut records, &[SortKey::new("age", 1)]);
        assert_eq!(names(&records), vec!["first", "second"]);
        sort(&mut records, &[SortKey::new("age", -1)]);
        assert_eq!(names(&records), vec!["first", "second"]);
    }

    #[test]
    fn test_paginate() {
        let records: Vec<_> = (0..5).map(|i| person(&i.to_string(), "0")).collect();
        assert_eq!(names(&paginate(records.clone(), 1, Some(2))), vec!["1", "2"]);
        assert_eq!(names(&paginate(records.clone(), 4, None)), vec!["4"]);
        assert!(paginate(records, 9, Some(2)).is_empty());
    }

    #[test]
    fn test_merge_without_buffer_windows_once() {
        let persisted: Vec<_> = (0..5).map(|i| person(&i.to_string(), &i.to_string())).collect();
        let opts = FindOptions::new().with_skip(1).with_limit(2).with_sort("age", 1);
        assert_eq!(names(&merge(persisted, Vec::new(), &opts)), vec!["1", "2"]);
    }

    #[test]
    fn test_merge_rewindows_with_buffered_records() {
        let persisted = vec![person("p1", "1"), person("p2", "2"), person("p3", "3")];
        let buffered = vec![person("b0", "0"), person("b9", "9")];
        let opts = FindOptions::new().with_limit(2).with_sort("age", 1);

        // persisted window is [p1, p2]; the buffered b0 then displaces p2
        assert_eq!(names(&merge(persisted, buffered, &opts)), vec!["b0", "p1"]);
    }

    #[test]
    fn test_merge_filters_buffered_records() {
        let persisted = vec![person("Alice", "30")];
        let buffered = vec![person("Bob", "20"), person("Carol", "40")];
        let opts = FindOptions::new().with_query(q(json!({"age": {"$gt": 25}})));
        assert_eq!(names(&merge(persisted, buffered, &opts)), vec!["Alice", "Carol"]);
    }
}
