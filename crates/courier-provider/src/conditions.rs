//! The tombstone-aware default filter and condition merging.

use serde_json::{json, Map, Value};

/// Filter matching only documents that are not soft-deleted: metadata
/// absent, `metadata.deleted` null, or `metadata.deleted` never set.
pub(crate) fn default_conditions() -> Value {
    json!({
        "$or": [
            { "metadata": { "$eq": null } },
            { "metadata.deleted": { "$eq": null } },
            { "metadata.deleted": { "$exists": false } },
        ]
    })
}

/// Field-level union of `default` and `user`; user keys win.
pub(crate) fn merge(default: &Value, user: &Value) -> Value {
    let mut merged = default.as_object().cloned().unwrap_or_default();
    if let Value::Object(user) = user {
        for (key, value) in user {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

/// Merges `$currentDate` stamps for `paths` into an update document,
/// preserving any stamps the caller already requested.
pub(crate) fn stamp_current_date(object: &Value, paths: &[&str]) -> Value {
    let mut stamped = object.as_object().cloned().unwrap_or_default();
    let mut current = stamped
        .get("$currentDate")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(Map::new);
    for path in paths {
        current.insert((*path).to_owned(), Value::Bool(true));
    }
    stamped.insert("$currentDate".to_owned(), Value::Object(current));
    Value::Object(stamped)
}
