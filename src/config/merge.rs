//! Layer merging
//!
//! Tables merge key by key, arrays and scalars are replaced by the later
//! layer.

use serde_json::{Map, Value};

/// Overlay `overlay` onto `base`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => Value::Object(merge_tables(base, overlay)),
        (_, overlay) => overlay,
    }
}

fn merge_tables(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        let merged = match base.remove(&key) {
            Some(existing) => deep_merge(existing, value),
            None => value,
        };
        base.insert(key, merged);
    }
    base
}

/// Fold layers lowest precedence first
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}
