//! Rendering of the service's `KEY=value` environment file.

use std::collections::BTreeMap;

use crate::ProvisionError;

/// Render `vars` as one `KEY=value` line per entry, sorted by key.
///
/// An empty map renders as a single newline so the file always exists with
/// stable content.
///
/// # Errors
///
/// Returns [`ProvisionError::SerializationInvariantViolation`] when a key is
/// empty or contains `=` or whitespace, or when a value spans lines.
///
/// # Examples
///
/// ```rust
/// use std::collections::BTreeMap;
/// use boundary_provision::render_env_file;
///
/// let vars = BTreeMap::from([("TEST".to_owned(), "foobar".to_owned())]);
/// assert_eq!(render_env_file(&vars)?, "TEST=foobar\n");
/// assert_eq!(render_env_file(&BTreeMap::new())?, "\n");
/// # Ok::<_, boundary_provision::ProvisionError>(())
/// ```
pub fn render_env_file(vars: &BTreeMap<String, String>) -> Result<String, ProvisionError> {
    if vars.is_empty() {
        return Ok(String::from("\n"));
    }
    let mut rendered = String::new();
    for (key, value) in vars {
        if key.is_empty() || key.contains('=') || key.chars().any(char::is_whitespace) {
            return Err(invalid(key, "variable names must be non-empty without '=' or whitespace"));
        }
        if value.contains(['\n', '\r']) {
            return Err(invalid(key, "values must fit on a single line"));
        }
        rendered.push_str(key);
        rendered.push('=');
        rendered.push_str(value);
        rendered.push('\n');
    }
    Ok(rendered)
}

fn invalid(key: &str, message: &str) -> ProvisionError {
    ProvisionError::SerializationInvariantViolation {
        path: format!("env_vars.{key}"),
        message: message.to_owned(),
    }
}
