//! Recipe Templating
//!
//! Recipes are templated before they are parsed, which is how values such as
//! the package version are pulled in from outside the file:
//!
//! ```yaml
//! {% set name = "conda" %}
//! package:
//!   name: {{ name }}
//!   version: "{{ version }}"
//!   # {# comments are removed #}
//! ```
//!
//! Supported expressions are string literals, variable names,
//! `environ.get('NAME'[, 'default'])`, `environ['NAME']` and the filters
//! `lower`, `upper`, `trim` and `replace('a', 'b')`. Anything else is an
//! error rather than an empty string.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use log::debug;
use thiserror::Error;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("line {line}: unterminated '{open}' tag")]
    Unterminated { line: usize, open: &'static str },

    #[error("line {line}: '{name}' is undefined")]
    Undefined { line: usize, name: String },

    #[error("line {line}: environment variable '{name}' is not set")]
    MissingEnv { line: usize, name: String },

    #[error("line {line}: unsupported statement '{statement}'")]
    UnsupportedStatement { line: usize, statement: String },

    #[error("line {line}: cannot evaluate '{expr}': {reason}")]
    BadExpression {
        line: usize,
        expr: String,
        reason: String,
    },

    #[error("line {line}: unknown filter '{name}'")]
    UnknownFilter { line: usize, name: String },
}

/// Variables and environment visible to a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    variables: BTreeMap<String, String>,
    environ: HashMap<String, String>,
}

impl TemplateContext {
    /// Creates a context with no variables and an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context whose `environ` is the current process environment.
    pub fn from_env() -> Self {
        Self {
            variables: BTreeMap::new(),
            environ: std::env::vars().collect(),
        }
    }

    /// Defines (or overrides) a variable.
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Builder form of [`define`](Self::define).
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.define(name, value);
        self
    }

    pub fn set_environ(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.environ.insert(name.into(), value.into());
    }

    /// Parses a `key=value` definition as given on the command line.
    pub fn define_pair(&mut self, pair: &str) -> std::result::Result<(), String> {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", pair))?;
        let name = name.trim();
        if !is_identifier(name) {
            return Err(format!("'{}' is not a valid variable name", name));
        }
        self.define(name, value.trim());
        Ok(())
    }

    /// Defines `version` from the first non-empty line of a file, the way a
    /// package's version file is consumed at build time.
    pub fn load_version_file(&mut self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let version = content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default();

        debug!("Version '{}' loaded from {}", version, path.display());
        self.define("version", version);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Looks up a variable of the template environment.
    pub fn environ(&self, name: &str) -> Option<&str> {
        self.environ.get(name).map(String::as_str)
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }
}

/// Renders all template tags in `text`.
///
/// `{% set %}` statements that sit alone on a line are removed together with
/// the line.
pub fn render(text: &str, ctx: &TemplateContext) -> std::result::Result<String, TemplateError> {
    let mut scope = ctx.variables.clone();
    let mut output = String::with_capacity(text.len());

    for (index, line) in text.split_inclusive('\n').enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();

        if is_standalone_statement(trimmed) {
            let statement = &trimmed[2..trimmed.len() - 2];
            execute_statement(statement.trim(), line_no, ctx, &mut scope)?;
            continue;
        }

        output.push_str(&render_line(line, line_no, ctx, &mut scope)?);
    }

    Ok(output)
}

fn is_standalone_statement(trimmed: &str) -> bool {
    trimmed.starts_with("{%")
        && trimmed.ends_with("%}")
        && trimmed.len() >= 4
        && trimmed[2..].find("{%").is_none()
}

fn render_line(
    line: &str,
    line_no: usize,
    ctx: &TemplateContext,
    scope: &mut BTreeMap<String, String>,
) -> std::result::Result<String, TemplateError> {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(start) = rest.find('{') {
        let (before, tail) = rest.split_at(start);
        out.push_str(before);

        let (open, close) = if tail.starts_with("{{") {
            ("{{", "}}")
        } else if tail.starts_with("{%") {
            ("{%", "%}")
        } else if tail.starts_with("{#") {
            ("{#", "#}")
        } else {
            out.push('{');
            rest = &tail[1..];
            continue;
        };

        let end = tail[2..]
            .find(close)
            .ok_or(TemplateError::Unterminated { line: line_no, open })?;
        let inner = tail[2..2 + end].trim();

        match open {
            "{{" => out.push_str(&evaluate(inner, line_no, ctx, scope)?),
            "{%" => execute_statement(inner, line_no, ctx, scope)?,
            _ => {}
        }

        rest = &tail[2 + end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

fn execute_statement(
    statement: &str,
    line: usize,
    ctx: &TemplateContext,
    scope: &mut BTreeMap<String, String>,
) -> std::result::Result<(), TemplateError> {
    let unsupported = || TemplateError::UnsupportedStatement {
        line,
        statement: statement.to_string(),
    };

    let assignment = statement.strip_prefix("set ").ok_or_else(unsupported)?;
    let (name, expr) = assignment.split_once('=').ok_or_else(unsupported)?;
    let name = name.trim();
    if !is_identifier(name) {
        return Err(unsupported());
    }

    let value = evaluate(expr.trim(), line, ctx, scope)?;
    debug!("Template variable '{}' = '{}'", name, value);
    scope.insert(name.to_string(), value);
    Ok(())
}

fn evaluate(
    expr: &str,
    line: usize,
    ctx: &TemplateContext,
    scope: &BTreeMap<String, String>,
) -> std::result::Result<String, TemplateError> {
    let bad = |reason: &str| TemplateError::BadExpression {
        line,
        expr: expr.to_string(),
        reason: reason.to_string(),
    };

    let mut parts = split_outside_quotes(expr, '|').into_iter();
    let base = parts.next().map(str::trim).unwrap_or_default();
    if base.is_empty() {
        return Err(bad("empty expression"));
    }

    let mut value = evaluate_base(base, line, ctx, scope).map_err(|e| match e {
        EvalError::Template(e) => e,
        EvalError::Syntax(reason) => bad(&reason),
    })?;

    for filter in parts {
        value = apply_filter(filter.trim(), value, line).map_err(|e| match e {
            EvalError::Template(e) => e,
            EvalError::Syntax(reason) => bad(&reason),
        })?;
    }

    Ok(value)
}

enum EvalError {
    Template(TemplateError),
    Syntax(String),
}

fn evaluate_base(
    base: &str,
    line: usize,
    ctx: &TemplateContext,
    scope: &BTreeMap<String, String>,
) -> std::result::Result<String, EvalError> {
    if base.starts_with('\'') || base.starts_with('"') {
        let args = parse_string_args(base).map_err(EvalError::Syntax)?;
        return match args.as_slice() {
            [single] => Ok(single.clone()),
            _ => Err(EvalError::Syntax("expected a single string literal".to_string())),
        };
    }

    if let Some(args) = base
        .strip_prefix("environ.get(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let args = parse_string_args(args).map_err(EvalError::Syntax)?;
        return match args.as_slice() {
            [name] => ctx.environ.get(name).cloned().ok_or_else(|| {
                EvalError::Template(TemplateError::MissingEnv {
                    line,
                    name: name.clone(),
                })
            }),
            [name, default] => Ok(ctx.environ.get(name).cloned().unwrap_or_else(|| default.clone())),
            _ => Err(EvalError::Syntax("environ.get takes one or two arguments".to_string())),
        };
    }

    if let Some(key) = base
        .strip_prefix("environ[")
        .and_then(|rest| rest.strip_suffix(']'))
    {
        let args = parse_string_args(key).map_err(EvalError::Syntax)?;
        return match args.as_slice() {
            [name] => ctx.environ.get(name).cloned().ok_or_else(|| {
                EvalError::Template(TemplateError::MissingEnv {
                    line,
                    name: name.clone(),
                })
            }),
            _ => Err(EvalError::Syntax("environ[...] takes one key".to_string())),
        };
    }

    if is_identifier(base) {
        return scope.get(base).cloned().ok_or_else(|| {
            EvalError::Template(TemplateError::Undefined {
                line,
                name: base.to_string(),
            })
        });
    }

    Err(EvalError::Syntax("unsupported expression".to_string()))
}

fn apply_filter(filter: &str, value: String, line: usize) -> std::result::Result<String, EvalError> {
    let (name, args) = match filter.split_once('(') {
        Some((name, rest)) => {
            let args = rest
                .strip_suffix(')')
                .ok_or_else(|| EvalError::Syntax(format!("unclosed arguments in '{}'", filter)))?;
            (name.trim(), parse_string_args(args).map_err(EvalError::Syntax)?)
        }
        None => (filter, Vec::new()),
    };

    match (name, args.as_slice()) {
        ("lower", []) => Ok(value.to_lowercase()),
        ("upper", []) => Ok(value.to_uppercase()),
        ("trim", []) => Ok(value.trim().to_string()),
        ("replace", [from, to]) => Ok(value.replace(from.as_str(), to)),
        ("lower" | "upper" | "trim" | "replace", _) => Err(EvalError::Syntax(format!(
            "wrong number of arguments for filter '{}'",
            name
        ))),
        _ => Err(EvalError::Template(TemplateError::UnknownFilter {
            line,
            name: name.to_string(),
        })),
    }
}

/// Parses a comma-separated list of quoted string literals.
fn parse_string_args(input: &str) -> std::result::Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut chars = input.trim().chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        let Some(quote) = chars.next() else {
            break;
        };
        if quote != '\'' && quote != '"' {
            return Err(format!("expected a quoted string, found '{}'", quote));
        }

        let mut value = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == quote {
                closed = true;
                break;
            }
            value.push(c);
        }
        if !closed {
            return Err("unterminated string literal".to_string());
        }
        args.push(value);

        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(other) => return Err(format!("unexpected '{}' after string literal", other)),
        }
    }

    Ok(args)
}

fn split_outside_quotes(input: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == separator => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            None => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_variable() {
        let ctx = TemplateContext::new().with_var("version", "4.3.21");
        let out = render("version: \"{{ version }}\"\n", &ctx).unwrap();
        assert_eq!(out, "version: \"4.3.21\"\n");
    }

    #[test]
    fn test_set_statement_line_is_removed() {
        let ctx = TemplateContext::new();
        let text = "{% set name = \"conda\" %}\npackage:\n  name: {{ name }}\n";
        let out = render(text, &ctx).unwrap();
        assert_eq!(out, "package:\n  name: conda\n");
    }

    #[test]
    fn test_set_can_reference_other_variables() {
        let ctx = TemplateContext::new().with_var("version", "1.0");
        let text = "{% set v = version | replace('.', '_') %}\nx: {{ v }}\n";
        assert_eq!(render(text, &ctx).unwrap(), "x: 1_0\n");
    }

    #[test]
    fn test_comments_are_removed() {
        let ctx = TemplateContext::new();
        assert_eq!(render("a: 1 {# note #}\n", &ctx).unwrap(), "a: 1 \n");
    }

    #[test]
    fn test_environ_lookups() {
        let mut ctx = TemplateContext::new();
        ctx.set_environ("GIT_DESCRIBE_TAG", "4.3.0");

        assert_eq!(
            render("{{ environ.get('GIT_DESCRIBE_TAG') }}", &ctx).unwrap(),
            "4.3.0"
        );
        assert_eq!(
            render("{{ environ['GIT_DESCRIBE_TAG'] }}", &ctx).unwrap(),
            "4.3.0"
        );
        assert_eq!(
            render("{{ environ.get('MISSING', '0') }}", &ctx).unwrap(),
            "0"
        );
        assert_eq!(
            render("{{ environ.get('MISSING') }}", &ctx),
            Err(TemplateError::MissingEnv {
                line: 1,
                name: "MISSING".to_string()
            })
        );
    }

    #[test]
    fn test_filters() {
        let ctx = TemplateContext::new().with_var("name", " Conda ");
        assert_eq!(render("{{ name | trim | lower }}", &ctx).unwrap(), "conda");
        assert_eq!(render("{{ name|trim|upper }}", &ctx).unwrap(), "CONDA");
        assert!(matches!(
            render("{{ name | title }}", &ctx),
            Err(TemplateError::UnknownFilter { .. })
        ));
        assert!(matches!(
            render("{{ name | replace('a') }}", &ctx),
            Err(TemplateError::BadExpression { .. })
        ));
    }

    #[test]
    fn test_undefined_variable_is_an_error() {
        let ctx = TemplateContext::new();
        assert_eq!(
            render("a: 1\nversion: {{ version }}\n", &ctx),
            Err(TemplateError::Undefined {
                line: 2,
                name: "version".to_string()
            })
        );
    }

    #[test]
    fn test_unterminated_tags() {
        let ctx = TemplateContext::new().with_var("x", "1");
        assert_eq!(
            render("{{ x ", &ctx),
            Err(TemplateError::Unterminated { line: 1, open: "{{" })
        );
        assert!(matches!(
            render("a {% set y = 'b'", &ctx),
            Err(TemplateError::Unterminated { open: "{%", .. })
        ));
    }

    #[test]
    fn test_unsupported_statement() {
        let ctx = TemplateContext::new();
        assert!(matches!(
            render("{% for x in y %}\n", &ctx),
            Err(TemplateError::UnsupportedStatement { .. })
        ));
    }

    #[test]
    fn test_plain_braces_pass_through() {
        let ctx = TemplateContext::new();
        assert_eq!(render("a: {b: c}\n", &ctx).unwrap(), "a: {b: c}\n");
    }

    #[test]
    fn test_define_pair() {
        let mut ctx = TemplateContext::new();
        ctx.define_pair("version=1.2.3").unwrap();
        assert_eq!(ctx.get("version"), Some("1.2.3"));
        assert!(ctx.define_pair("novalue").is_err());
        assert!(ctx.define_pair("1bad=x").is_err());
    }

    #[test]
    fn test_load_version_file() {
        use tempfile::tempdir;

        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join(".version");
        std::fs::write(&path, "\n  4.3.21  \n").unwrap();

        let mut ctx = TemplateContext::new();
        ctx.load_version_file(&path).unwrap();
        assert_eq!(ctx.get("version"), Some("4.3.21"));

        assert!(ctx.load_version_file(&temp_dir.path().join("missing")).is_err());
    }
}
