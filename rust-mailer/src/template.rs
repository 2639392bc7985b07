//! Flat `{placeholder}` substitution from a recipient row.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::table::Row;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("placeholder pattern is valid"));

/// Result of rendering one template against one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    /// Rendered text; unresolved placeholders are left verbatim
    pub text: String,
    /// Placeholder names that were absent or empty, in first-occurrence order
    pub missing: Vec<String>,
}

impl RenderResult {
    pub fn is_success(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Placeholder names in first-occurrence order, without duplicates.
pub fn extract_placeholders(template: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let name = &caps[1];
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Render `template` with values from `row`, skipping the `excluded` column.
///
/// Every occurrence of a resolvable placeholder is replaced. A placeholder
/// whose column is absent, excluded, or holds an empty value is reported in
/// [`RenderResult::missing`] and left in place.
pub fn render(template: &str, row: &Row, excluded: Option<&str>) -> RenderResult {
    let mut text = template.to_string();
    let mut missing = Vec::new();

    for name in extract_placeholders(template) {
        let value = if excluded == Some(name.as_str()) {
            None
        } else {
            row.text(&name)
        };

        match value {
            Some(value) => text = text.replace(&format!("{{{}}}", name), &value),
            None => missing.push(name),
        }
    }

    RenderResult { text, missing }
}
