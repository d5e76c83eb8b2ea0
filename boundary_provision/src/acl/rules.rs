//! Rendering of policy rules into the control plane's HCL rule syntax.

use super::model::Rule;

/// Render `rules` in declaration order, separated by blank lines.
///
/// Segmented resources render as a block; global resources render as a
/// single assignment.
///
/// # Examples
///
/// ```rust
/// use boundary_provision::{Disposition, Resource, Rule, render_rules};
///
/// let rules = [
///     Rule::new(Resource::Key, "test_key", Disposition::Write),
///     Rule::global(Resource::Operator, Disposition::Read),
/// ];
/// assert_eq!(
///     render_rules(&rules),
///     "key \"test_key\" {\n  policy = \"write\"\n}\n\noperator = \"read\""
/// );
/// ```
#[must_use]
pub fn render_rules(rules: &[Rule]) -> String {
    rules
        .iter()
        .map(render_rule)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_rule(rule: &Rule) -> String {
    let resource = rule.resource.as_str();
    let disposition = rule.disposition.as_str();
    if rule.resource.takes_segment() {
        let segment = escape(rule.segment.as_deref().unwrap_or_default());
        format!("{resource} \"{segment}\" {{\n  policy = \"{disposition}\"\n}}")
    } else {
        format!("{resource} = \"{disposition}\"")
    }
}

fn escape(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for ch in segment.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}
