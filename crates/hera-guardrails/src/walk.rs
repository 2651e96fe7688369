//! JSON traversal helpers shared by the rules.

use serde_json::Value;

/// Visits every object member at any depth, calling `visit(path, key, value)`.
///
/// Paths use `a.b[2].c` notation.
pub(crate) fn for_each_field<'a, F>(value: &'a Value, visit: &mut F)
where
    F: FnMut(&str, &str, &'a Value),
{
    walk(value, String::new(), visit);
}

fn walk<'a, F>(value: &'a Value, path: String, visit: &mut F)
where
    F: FnMut(&str, &str, &'a Value),
{
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                visit(&child_path, key, child);
                walk(child, child_path, visit);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                walk(child, format!("{path}[{i}]"), visit);
            }
        }
        _ => {}
    }
}

/// Maximum nesting depth of containers.
pub(crate) fn depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Reads a number that may be encoded as a JSON number or numeric string.
pub(crate) fn as_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Returns the first present, non-null member among `keys`, in order.
pub(crate) fn first_of<'a>(
    value: &'a Value,
    keys: &[&'static str],
) -> Option<(&'static str, &'a Value)> {
    let map = value.as_object()?;
    keys.iter()
        .find_map(|k| map.get(*k).filter(|v| !v.is_null()).map(|v| (*k, v)))
}
