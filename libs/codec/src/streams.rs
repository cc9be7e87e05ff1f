//! Stream census
//!
//! Lets callers decide between the synchronous and asynchronous paths before
//! anything is consumed.

use hearth_types::{StreamHandle, Value};

/// Number of live streams reachable from `value`
pub fn scan_streams(value: &Value) -> usize {
    collect_streams(value).len()
}

/// Live streams reachable from `value`, in encoding order
pub fn collect_streams(value: &Value) -> Vec<StreamHandle> {
    let mut found = Vec::new();
    visit(value, &mut found);
    found
}

fn visit(value: &Value, found: &mut Vec<StreamHandle>) {
    match value {
        Value::Stream(handle) if handle.is_live() => {
            if !found.iter().any(|h| h.ptr_eq(handle)) {
                found.push(handle.clone());
            }
        }
        Value::Array(items) | Value::Set(items) => items.iter().for_each(|v| visit(v, found)),
        Value::Object(entries) => entries.iter().for_each(|(_, v)| visit(v, found)),
        Value::Map(pairs) => pairs.iter().for_each(|(k, v)| {
            visit(k, found);
            visit(v, found);
        }),
        Value::Error(error) => {
            if let Some(cause) = &error.cause {
                visit(cause, found);
            }
        }
        _ => {}
    }
}
