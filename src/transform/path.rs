//! Dotted-path navigation over JSON payloads
//!
//! Payloads are opaque to the core except for the fields rules declare;
//! all declared fields address nested objects with `a.b.c` paths.

use serde_json::Value;

/// Read the value at a dotted path
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Remove and return the value at a dotted path
pub fn take_path(value: &mut Value, path: &str) -> Option<Value> {
    let mut segments = path.split('.').peekable();
    let mut current = value;
    while let Some(segment) = segments.next() {
        let map = current.as_object_mut()?;
        if segments.peek().is_none() {
            return map.remove(segment);
        }
        current = map.get_mut(segment)?;
    }
    None
}

/// Write a value at a dotted path, creating intermediate objects
///
/// Does nothing when an intermediate segment exists but is not an object;
/// callers treat that as a missing-field skip.
pub fn insert_path(value: &mut Value, path: &str, new: Value) -> bool {
    let mut segments = path.split('.').peekable();
    let mut current = value;
    while let Some(segment) = segments.next() {
        let Some(map) = current.as_object_mut() else {
            return false;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), new);
            return true;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    false
}
