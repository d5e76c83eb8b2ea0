//! Canonical JSON rendering of merged configuration.

use serde_json::Value;

use super::ConfigDocument;
use crate::ProvisionError;

/// Render `doc` as JSON text.
///
/// Keys are emitted in insertion order, integers stay unquoted and booleans
/// render as `true`/`false`. Compact output has no interior whitespace;
/// pretty output indents two spaces per level and separates keys from
/// values with `": "`.
///
/// # Errors
///
/// Returns [`ProvisionError::SerializationInvariantViolation`] when the tree
/// holds a `null` node, which has no place in a configuration artifact.
///
/// # Examples
///
/// ```rust
/// use boundary_provision::serialize;
/// use serde_json::json;
///
/// let doc = json!({"bootstrap_expect": 5, "server": true});
/// assert_eq!(serialize(&doc, false)?, r#"{"bootstrap_expect":5,"server":true}"#);
/// assert!(serialize(&doc, true)?.contains(r#""bootstrap_expect": 5,"#));
/// # Ok::<_, boundary_provision::ProvisionError>(())
/// ```
pub fn serialize(doc: &ConfigDocument, pretty: bool) -> Result<String, ProvisionError> {
    let mut path = vec![String::from("$")];
    check_representable(doc, &mut path)?;
    let rendered = if pretty {
        serde_json::to_string_pretty(doc)
    } else {
        serde_json::to_string(doc)
    };
    rendered.map_err(|err| ProvisionError::SerializationInvariantViolation {
        path: String::from("$"),
        message: err.to_string(),
    })
}

fn check_representable(node: &Value, path: &mut Vec<String>) -> Result<(), ProvisionError> {
    match node {
        Value::Null => Err(ProvisionError::SerializationInvariantViolation {
            path: path.concat(),
            message: String::from("null is not a configuration value"),
        }),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                path.push(format!("[{index}]"));
                check_representable(item, path)?;
                path.pop();
            }
            Ok(())
        }
        Value::Object(map) => {
            for (key, value) in map {
                path.push(format!(".{key}"));
                check_representable(value, path)?;
                path.pop();
            }
            Ok(())
        }
        Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::serialize;
    use crate::{ProvisionError, merge};

    #[rstest]
    #[case(false, r#""bootstrap_expect":5"#)]
    #[case(true, r#""bootstrap_expect": 5,"#)]
    fn integers_stay_unquoted(#[case] pretty: bool, #[case] needle: &str) {
        let doc = json!({"bootstrap_expect": 5, "server": true});
        let rendered = serialize(&doc, pretty).unwrap_or_default();
        assert!(rendered.contains(needle), "missing {needle} in {rendered}");
        assert!(!rendered.contains(r#""5""#));
    }

    #[test]
    fn compact_output_has_no_whitespace() {
        let doc = json!({"ports": {"http": -1, "https": 8500}, "server": true});
        assert_eq!(
            serialize(&doc, false).ok().as_deref(),
            Some(r#"{"ports":{"http":-1,"https":8500},"server":true}"#)
        );
    }

    #[test]
    fn pretty_output_indents_and_omits_trailing_commas() {
        let doc = json!({"server": true, "ports": {"http": -1, "https": 8500}});
        let expected = "{\n  \"server\": true,\n  \"ports\": {\n    \"http\": -1,\n    \"https\": 8500\n  }\n}";
        assert_eq!(serialize(&doc, true).ok().as_deref(), Some(expected));
    }

    #[test]
    fn merged_keys_render_in_insertion_order() {
        let merged = merge(&json!({"a": 1, "b": 2}), &json!({"c": 3}));
        assert_eq!(
            serialize(&merged, false).ok().as_deref(),
            Some(r#"{"a":1,"b":2,"c":3}"#)
        );
        let reversed = merge(&json!({"b": 2, "a": 1}), &json!({"c": 3}));
        assert_eq!(
            serialize(&reversed, false).ok().as_deref(),
            Some(r#"{"b":2,"a":1,"c":3}"#)
        );
    }

    #[test]
    fn repeated_rendering_is_byte_identical() {
        let doc = json!({"acl": {"enabled": true, "tokens": {"master": "x"}}, "start_join": ["127.0.0.1"]});
        assert_eq!(serialize(&doc, true).ok(), serialize(&doc, true).ok());
        assert_eq!(serialize(&doc, false).ok(), serialize(&doc, false).ok());
    }

    #[test]
    fn null_nodes_are_rejected_with_their_path() {
        let doc = json!({"client": {"host_volume": [{"path": null}]}});
        match serialize(&doc, false) {
            Err(ProvisionError::SerializationInvariantViolation { path, .. }) => {
                assert_eq!(path, "$.client.host_volume[0].path");
            }
            other => panic!("expected serialization violation, got {other:?}"),
        }
    }
}
