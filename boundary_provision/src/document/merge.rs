//! Deep merge of configuration layers.

use serde_json::{Map, Value};

use super::ConfigDocument;

/// Merge `overrides` over `base`, returning a new document.
///
/// Neither input is modified. Mappings merge key by key; everything else in
/// `overrides` replaces the corresponding `base` node outright, including
/// sequences and nodes of a different type. `null` in `overrides` means
/// "inherit": it never removes or adds a key.
///
/// # Examples
///
/// ```rust
/// use boundary_provision::merge;
/// use serde_json::json;
///
/// let base = json!({"data_dir": "/opt/boundary", "ports": {"http": 1, "rpc": 8300}});
/// let overrides = json!({"ports": {"http": -1, "https": 8500}, "server": true});
/// let merged = merge(&base, &overrides);
/// assert_eq!(
///     merged,
///     json!({
///         "data_dir": "/opt/boundary",
///         "ports": {"http": -1, "rpc": 8300, "https": 8500},
///         "server": true
///     })
/// );
/// ```
#[must_use]
pub fn merge(base: &ConfigDocument, overrides: &ConfigDocument) -> ConfigDocument {
    let mut merged = base.clone();
    merge_value(&mut merged, overrides);
    merged
}

/// Overlay `layer` onto `target`, updating `target` in place.
///
/// Behaviour:
/// - `null` layers leave `target` untouched.
/// - When merging a mapping into a non-mapping target, the target is reset to
///   `{}` first, so the layer wins outright.
/// - Mappings merge recursively. Keys already in `target` keep their
///   position; new keys are appended in layer order.
/// - Sequences and scalars replace `target` wholesale.
///
/// # Examples
///
/// ```rust
/// use boundary_provision::merge_value;
/// use serde_json::json;
///
/// let mut acc = json!({"start_join": ["10.0.0.1", "10.0.0.2"]});
/// merge_value(&mut acc, &json!({"start_join": ["10.0.0.9"]}));
/// assert_eq!(acc, json!({"start_join": ["10.0.0.9"]}));
/// ```
pub fn merge_value(target: &mut Value, layer: &Value) {
    match layer {
        Value::Null => {}
        Value::Object(map) => merge_object(target, map),
        _ => *target = layer.clone(),
    }
}

fn merge_object(target: &mut Value, map: &Map<String, Value>) {
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }

    let Some(target_map) = target.as_object_mut() else {
        return;
    };

    for (key, value) in map {
        if let Some(existing) = target_map.get_mut(key) {
            merge_value(existing, value);
            continue;
        }
        let mut fresh = Value::Null;
        merge_value(&mut fresh, value);
        if !fresh.is_null() {
            target_map.insert(key.clone(), fresh);
        }
    }
}
