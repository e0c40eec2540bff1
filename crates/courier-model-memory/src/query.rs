//! Condition matching, update operators and projections for the
//! in-memory model.
//!
//! The operator set is the closure of what the protocol layer emits: the
//! tombstone default filter (`$or`, `$eq`, `$exists`, dotted paths), the
//! tombstone updates (`$currentDate`), and the usual `$set`/`$unset`
//! replacements.

use serde_json::{Map, Value};

/// Resolves a (possibly dotted) field path against a document.
pub fn lookup<'a>(doc: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Sets a (possibly dotted) field path on a document, creating
/// intermediate objects as needed.
pub fn set_path(doc: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = doc;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_owned(), value);
            return;
        }
        let entry = current
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else { return };
        current = next;
    }
}

/// Removes a (possibly dotted) field path from a document.
pub fn unset_path(doc: &mut Map<String, Value>, path: &str) {
    let mut segments = path.split('.').peekable();
    let mut current = doc;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.remove(segment);
            return;
        }
        match current.get_mut(segment).and_then(Value::as_object_mut) {
            Some(next) => current = next,
            None => return,
        }
    }
}

fn is_operator_object(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|object| object.keys().any(|key| key.starts_with('$')))
}

fn matches_operators(doc: &Map<String, Value>, path: &str, operators: &Map<String, Value>) -> bool {
    let actual = lookup(doc, path);
    operators.iter().all(|(operator, expected)| {
        match operator.as_str() {
            // Equality with null matches a missing field as well.
            "$eq" => match expected {
                Value::Null => actual.is_none() || actual == Some(&Value::Null),
                other => actual == Some(other),
            },
            "$ne" => match expected {
                Value::Null => actual.is_some() && actual != Some(&Value::Null),
                other => actual != Some(other),
            },
            "$exists" => expected.as_bool().is_some_and(|want| actual.is_some() == want),
            "$in" => expected
                .as_array()
                .is_some_and(|candidates| actual.is_some_and(|a| candidates.contains(a))),
            _ => false,
        }
    })
}

/// Whether `doc` satisfies `conditions`.
pub fn matches(conditions: &Map<String, Value>, doc: &Map<String, Value>) -> bool {
    conditions.iter().all(|(key, expected)| match key.as_str() {
        "$or" => expected.as_array().is_some_and(|branches| {
            branches
                .iter()
                .filter_map(Value::as_object)
                .any(|branch| matches(branch, doc))
        }),
        "$and" => expected.as_array().is_some_and(|branches| {
            branches
                .iter()
                .filter_map(Value::as_object)
                .all(|branch| matches(branch, doc))
        }),
        path if is_operator_object(expected) => {
            expected
                .as_object()
                .is_some_and(|operators| matches_operators(doc, path, operators))
        }
        path => lookup(doc, path) == Some(expected),
    })
}

/// Applies an update document to `doc`: `$set`, `$unset`, `$currentDate`
/// and bare replacement fields. Unknown operators are ignored.
pub fn apply_update(doc: &mut Map<String, Value>, update: &Map<String, Value>, now_millis: u64) {
    for (key, argument) in update {
        match key.as_str() {
            "$set" => {
                if let Some(fields) = argument.as_object() {
                    for (path, value) in fields {
                        set_path(doc, path, value.clone());
                    }
                }
            }
            "$unset" => {
                if let Some(fields) = argument.as_object() {
                    for path in fields.keys() {
                        unset_path(doc, path);
                    }
                }
            }
            "$currentDate" => {
                if let Some(fields) = argument.as_object() {
                    for path in fields.keys() {
                        set_path(doc, path, Value::from(now_millis));
                    }
                }
            }
            path if !path.starts_with('$') => {
                set_path(doc, path, argument.clone());
            }
            _ => {}
        }
    }
}

/// Applies an inclusion projection (`{field: 1}`) to a document. `_id` is
/// kept unless explicitly excluded. An empty projection keeps everything.
pub fn project(doc: &Map<String, Value>, projection: Option<&Value>) -> Map<String, Value> {
    let Some(fields) = projection.and_then(Value::as_object).filter(|f| !f.is_empty()) else {
        return doc.clone();
    };

    let mut projected = Map::new();
    for (path, include) in fields {
        if include == &Value::from(0) {
            continue;
        }
        if let Some(value) = lookup(doc, path) {
            set_path(&mut projected, path, value.clone());
        }
    }

    let id_excluded = fields.get("_id") == Some(&Value::from(0));
    if !id_excluded {
        if let Some(id) = doc.get("_id") {
            projected.insert("_id".to_owned(), id.clone());
        }
    }

    projected
}
