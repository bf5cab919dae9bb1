//! Template engine for database manifests
//!
//! Uses minijinja with its default `{{ ... }}` delimiters. Existing templates
//! reference variables with a leading dot (`{{ .CLUSTERNAME }}`); those
//! references are normalised to plain identifiers before rendering.
//!
//! Only variable substitution carries over from dot-style templates.
//! Conditionals and loops use minijinja block syntax (`{% if SANAME %}`), and
//! a reference to an unknown variable fails the render instead of producing
//! placeholder text.

use minijinja::{Environment, UndefinedBehavior};

use super::context::RenderContext;
use super::error::TemplateError;

/// Renders manifest templates against a [`RenderContext`]
///
/// Undefined variables are an error rather than rendering as empty strings.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create a new template engine with strict undefined handling
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Render a template string with the given context
    ///
    /// # Errors
    ///
    /// Returns `TemplateError::Render` if the template syntax is invalid or
    /// references a variable the context does not define.
    pub fn render(&self, template: &str, ctx: &RenderContext) -> Result<String, TemplateError> {
        let normalized = normalize_dot_references(template);
        self.env
            .render_str(&normalized, ctx.to_value())
            .map_err(TemplateError::from)
    }
}

/// Strip the leading dot from variable references inside `{{ ... }}`.
///
/// `{{ .NAMESPACE }}` becomes `{{ NAMESPACE }}` and `{{- .SANAME -}}` becomes
/// `{{- SANAME -}}`. Anything outside an expression is left untouched, and so
/// are dots that follow an identifier (attribute access).
fn normalize_dot_references(template: &str) -> String {
    let mut result = String::with_capacity(template.len());
    let mut remaining = template;

    while let Some(start) = remaining.find("{{") {
        result.push_str(&remaining[..start + 2]);
        remaining = &remaining[start + 2..];

        match remaining.find("}}") {
            Some(end) => {
                result.push_str(&strip_expression_dots(&remaining[..end]));
                result.push_str("}}");
                remaining = &remaining[end + 2..];
            }
            None => {
                result.push_str(remaining);
                remaining = "";
            }
        }
    }

    result.push_str(remaining);
    result
}

fn strip_expression_dots(expr: &str) -> String {
    let mut result = String::with_capacity(expr.len());
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut chars = expr.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' if !in_double_quote => in_single_quote = !in_single_quote,
            '"' if !in_single_quote => in_double_quote = !in_double_quote,
            '.' if !in_single_quote && !in_double_quote => {
                let prev_is_ident = result
                    .chars()
                    .last()
                    .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == ')' || c == ']');
                let next_is_ident = chars
                    .peek()
                    .is_some_and(|c| c.is_alphabetic() || *c == '_');
                if !prev_is_ident && next_is_ident {
                    continue;
                }
            }
            _ => {}
        }
        result.push(ch);
    }

    result
}
