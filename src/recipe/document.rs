//! Recipe Documents
//!
//! Parses the recipe format (a line-oriented YAML subset) into a tree that
//! keeps every line selector attached to the entry or list item it guards.
//! Nothing is filtered at this stage; [`Document::select`] produces the view
//! for one render target and [`Document::to_yaml`] hands that view to serde.
//!
//! Supported YAML: block mappings and sequences (including `- key: value`
//! items), plain and quoted scalars, single-line flow collections, and
//! literal/folded block scalars with chomping indicators.

use std::fmt;

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use thiserror::Error;

use super::selector::{Selector, SelectorError};
use crate::environment::platform::RenderContext;

/// A trailing comment of the form `[expr]`.
static SELECTOR_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[([^\[\]]*)\]$").expect("selector regex is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: invalid selector '[{text}]': {source}")]
    Selector {
        line: usize,
        text: String,
        #[source]
        source: SelectorError,
    },

    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("duplicate key '{key}' in {path}")]
    DuplicateKey { path: String, key: String },

    #[error("recipe is empty")]
    Empty,
}

/// How a scalar was written in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarStyle {
    /// Unquoted; may become a number, bool or null when rendered.
    Plain,
    /// Single or double quoted; always a string.
    Quoted,
    /// `|` or `>` block; always a string.
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scalar {
    pub value: String,
    pub style: ScalarStyle,
}

impl Scalar {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            style: ScalarStyle::Plain,
        }
    }

    pub fn quoted(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            style: ScalarStyle::Quoted,
        }
    }

    /// Picks plain style when the text reads back as the same string.
    fn from_string(value: String) -> Self {
        if is_plain_safe(&value) && typed_plain(&value).is_none() {
            Self::plain(value)
        } else {
            Self::quoted(value)
        }
    }

    /// The value serde sees for this scalar.
    fn to_yaml(&self) -> Value {
        match self.style {
            ScalarStyle::Plain => {
                typed_plain(&self.value).unwrap_or_else(|| Value::String(self.value.clone()))
            }
            ScalarStyle::Quoted | ScalarStyle::Block => Value::String(self.value.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Null,
    Scalar(Scalar),
    List(Vec<Item>),
    Map(Vec<Entry>),
}

impl Node {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Node::Scalar(scalar) => Some(&scalar.value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Item]> {
        match self {
            Node::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[Entry]> {
        match self {
            Node::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Node::Null)
    }

    /// Short name of the node kind, for messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Null => "empty value",
            Node::Scalar(_) => "scalar",
            Node::List(_) => "list",
            Node::Map(_) => "mapping",
        }
    }

    fn select(&self, ctx: &RenderContext) -> Node {
        match self {
            Node::List(items) => Node::List(
                items
                    .iter()
                    .filter(|item| item.is_active(ctx))
                    .map(|item| Item::new(item.value.select(ctx)))
                    .collect(),
            ),
            Node::Map(entries) => Node::Map(select_entries(entries, ctx)),
            other => other.clone(),
        }
    }

    fn to_yaml(&self, path: &str) -> Result<Value, ParseError> {
        match self {
            Node::Null => Ok(Value::Null),
            Node::Scalar(scalar) => Ok(scalar.to_yaml()),
            Node::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| item.value.to_yaml(&format!("{}[{}]", path, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Sequence),
            Node::Map(entries) => entries_to_yaml(entries, path).map(Value::Mapping),
        }
    }

    fn collect_selectors<'a>(&'a self, path: &str, out: &mut Vec<(String, &'a Selector)>) {
        match self {
            Node::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, i);
                    if let Some(selector) = &item.selector {
                        out.push((item_path.clone(), selector));
                    }
                    item.value.collect_selectors(&item_path, out);
                }
            }
            Node::Map(entries) => collect_entry_selectors(entries, path, out),
            _ => {}
        }
    }
}

/// A `key: value` pair, optionally guarded by a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Node,
    pub selector: Option<Selector>,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: Node) -> Self {
        Self {
            key: key.into(),
            value,
            selector: None,
        }
    }

    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = Some(selector);
        self
    }

    fn is_active(&self, ctx: &RenderContext) -> bool {
        self.selector.as_ref().map_or(true, |s| s.evaluate(ctx))
    }
}

/// A list element, optionally guarded by a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub value: Node,
    pub selector: Option<Selector>,
}

impl Item {
    pub fn new(value: Node) -> Self {
        Self {
            value,
            selector: None,
        }
    }

    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = Some(selector);
        self
    }

    fn is_active(&self, ctx: &RenderContext) -> bool {
        self.selector.as_ref().map_or(true, |s| s.evaluate(ctx))
    }
}

/// A parsed recipe: an ordered mapping of top-level sections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Document {
    pub entries: Vec<Entry>,
}

impl Document {
    /// Parses templated recipe text.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let lines = scan_lines(text)?;
        let mut parser = Parser { lines, pos: 0 };

        let first = parser.peek().ok_or(ParseError::Empty)?;
        let root_indent = first.indent;
        if is_list_item(&first.text) {
            return Err(syntax(first.number, "top level must be a mapping of sections"));
        }

        let entries = parser.parse_map(root_indent)?;

        if let Some(extra) = parser.peek() {
            return Err(syntax(extra.number, "unexpected content after the top-level mapping"));
        }

        debug!("Parsed recipe document with {} sections", entries.len());
        Ok(Self { entries })
    }

    /// Names of the top-level sections in source order.
    pub fn section_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    /// Returns the first top-level section with this name.
    pub fn section(&self, name: &str) -> Option<&Node> {
        self.entries.iter().find(|e| e.key == name).map(|e| &e.value)
    }

    /// Looks up a dotted path such as `package.version`, following the
    /// first entry at each level.
    pub fn get(&self, path: &str) -> Option<&Node> {
        let mut parts = path.split('.');
        let mut node = self.section(parts.next()?)?;
        for part in parts {
            node = node
                .as_map()?
                .iter()
                .find(|e| e.key == part)
                .map(|e| &e.value)?;
        }
        Some(node)
    }

    /// Keeps only the entries and items whose selectors hold for `ctx`.
    /// The result carries no selectors.
    pub fn select(&self, ctx: &RenderContext) -> Document {
        Document {
            entries: select_entries(&self.entries, ctx),
        }
    }

    /// Converts the document into a YAML value for typed deserialization.
    ///
    /// Intended for a [`select`](Self::select)ed document: selectors are
    /// ignored, so two guarded entries with the same key collide.
    pub fn to_yaml(&self) -> Result<Value, ParseError> {
        entries_to_yaml(&self.entries, "recipe").map(Value::Mapping)
    }

    /// Every selector in the document with the path it guards, e.g.
    /// `requirements.run[2]`.
    pub fn selectors(&self) -> Vec<(String, &Selector)> {
        let mut out = Vec::new();
        collect_entry_selectors(&self.entries, "", &mut out);
        out
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&super::writer::write_document(self))
    }
}

fn select_entries(entries: &[Entry], ctx: &RenderContext) -> Vec<Entry> {
    entries
        .iter()
        .filter(|entry| entry.is_active(ctx))
        .map(|entry| Entry::new(entry.key.clone(), entry.value.select(ctx)))
        .collect()
}

fn entries_to_yaml(entries: &[Entry], path: &str) -> Result<Mapping, ParseError> {
    let mut mapping = Mapping::new();
    for entry in entries {
        let key = Value::String(entry.key.clone());
        if mapping.contains_key(&key) {
            return Err(ParseError::DuplicateKey {
                path: path.to_string(),
                key: entry.key.clone(),
            });
        }
        let child_path = join_path(path, &entry.key);
        mapping.insert(key, entry.value.to_yaml(&child_path)?);
    }
    Ok(mapping)
}

fn collect_entry_selectors<'a>(
    entries: &'a [Entry],
    path: &str,
    out: &mut Vec<(String, &'a Selector)>,
) {
    for entry in entries {
        let entry_path = join_path(path, &entry.key);
        if let Some(selector) = &entry.selector {
            out.push((entry_path.clone(), selector));
        }
        entry.value.collect_selectors(&entry_path, out);
    }
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

/// Plain scalars that serde should see as something other than a string.
/// Floats are deliberately left alone so `1.10` stays `1.10`.
fn typed_plain(text: &str) -> Option<Value> {
    match text {
        "null" | "Null" | "NULL" | "~" => Some(Value::Null),
        "true" | "True" | "TRUE" => Some(Value::Bool(true)),
        "false" | "False" | "FALSE" => Some(Value::Bool(false)),
        _ => text.parse::<i64>().ok().map(|n| Value::Number(n.into())),
    }
}

/// True if `text` can be written unquoted and read back unchanged.
pub(crate) fn is_plain_safe(text: &str) -> bool {
    let Some(first) = text.chars().next() else {
        return false;
    };
    if text.trim() != text || text.contains('\n') {
        return false;
    }
    if "-?:,[]{}#&*!|>'\"%@`".contains(first) {
        return false;
    }
    !text.contains(": ") && !text.contains(" #") && !text.ends_with(':')
}

fn syntax(line: usize, message: impl Into<String>) -> ParseError {
    ParseError::Syntax {
        line,
        message: message.into(),
    }
}

/// One source line, split into structure and trailing comment.
#[derive(Debug, Clone)]
struct Line {
    number: usize,
    indent: usize,
    /// The line without its newline; used verbatim inside block scalars.
    raw: String,
    /// Content after the indentation with any comment removed.
    text: String,
    comment: Option<String>,
}

impl Line {
    fn selector(&self) -> Result<Option<Selector>, ParseError> {
        let Some(comment) = &self.comment else {
            return Ok(None);
        };
        let Some(captures) = SELECTOR_COMMENT.captures(comment) else {
            return Ok(None);
        };
        let text = captures[1].trim().to_string();
        Selector::parse(&text)
            .map(Some)
            .map_err(|source| ParseError::Selector {
                line: self.number,
                text,
                source,
            })
    }
}

fn scan_lines(text: &str) -> Result<Vec<Line>, ParseError> {
    let mut lines = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let number = index + 1;
        let raw = raw.trim_end_matches('\r');
        let indent = raw.len() - raw.trim_start_matches(' ').len();
        let content = &raw[indent..];

        if content.starts_with('\t') {
            return Err(syntax(number, "tabs are not allowed in indentation"));
        }

        let (text, comment) = match find_comment(content) {
            Some(pos) => (
                content[..pos].trim_end(),
                Some(content[pos + 1..].trim().to_string()),
            ),
            None => (content.trim_end(), None),
        };

        let text = if indent == 0 && (text == "---" || text == "...") {
            ""
        } else {
            text
        };

        lines.push(Line {
            number,
            indent,
            raw: raw.to_string(),
            text: text.to_string(),
            comment,
        });
    }

    Ok(lines)
}

/// Finds the `#` that starts a comment, ignoring quoted scalars.
fn find_comment(content: &str) -> Option<usize> {
    let chars: Vec<(usize, char)> = content.char_indices().collect();
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    let mut last_significant: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        match quote {
            Some('"') => {
                if c == '\\' {
                    i += 1;
                } else if c == '"' {
                    quote = None;
                }
            }
            Some(q) => {
                if c == q {
                    if chars.get(i + 1).map(|&(_, n)| n) == Some(q) {
                        i += 1;
                    } else {
                        quote = None;
                    }
                }
            }
            None => {
                let opens_scalar = matches!(
                    last_significant,
                    None | Some('-') | Some(':') | Some('[') | Some('{') | Some(',') | Some('?')
                ) && prev.map_or(true, |p| p.is_whitespace() || "[{,".contains(p));

                if (c == '"' || c == '\'') && opens_scalar {
                    quote = Some(c);
                } else if c == '#' && prev.map_or(true, char::is_whitespace) {
                    return Some(pos);
                }
            }
        }
        prev = Some(c);
        if !c.is_whitespace() {
            last_significant = Some(c);
        }
        i += 1;
    }

    None
}

fn is_list_item(text: &str) -> bool {
    text == "-" || text.starts_with("- ")
}

/// Splits `key: rest`. Returns `None` when the text is not a mapping entry.
fn split_key(text: &str) -> Result<Option<(String, &str)>, String> {
    if text.starts_with('[') || text.starts_with('{') {
        return Ok(None);
    }

    if text.starts_with('"') || text.starts_with('\'') {
        let end = quoted_end(text).ok_or("unterminated quoted key")?;
        let after = text[end..].trim_start();
        let Some(rest) = after.strip_prefix(':') else {
            return Ok(None);
        };
        if !(rest.is_empty() || rest.starts_with(' ')) {
            return Ok(None);
        }
        let key: String = serde_yaml::from_str(&text[..end])
            .map_err(|e| format!("invalid quoted key: {}", e))?;
        return Ok(Some((key, rest)));
    }

    for (i, c) in text.char_indices() {
        if c != ':' {
            continue;
        }
        let rest = &text[i + 1..];
        if rest.is_empty() || rest.starts_with(' ') {
            let key = text[..i].trim_end();
            if key.is_empty() {
                return Err("mapping key is empty".to_string());
            }
            return Ok(Some((key.to_string(), rest)));
        }
    }

    Ok(None)
}

/// Byte offset just past the closing quote of a quoted scalar at the start
/// of `text`.
fn quoted_end(text: &str) -> Option<usize> {
    let quote = text.chars().next()?;
    let mut chars = text.char_indices().skip(1).peekable();

    while let Some((i, c)) = chars.next() {
        if quote == '"' && c == '\\' {
            chars.next();
        } else if c == quote {
            if quote == '\'' && matches!(chars.peek(), Some((_, '\''))) {
                chars.next();
                continue;
            }
            return Some(i + 1);
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chomp {
    Strip,
    Clip,
    Keep,
}

struct Parser {
    lines: Vec<Line>,
    pos: usize,
}

impl Parser {
    /// Next line with structural content, skipping blanks and comments.
    fn peek(&mut self) -> Option<&Line> {
        while self.pos < self.lines.len() && self.lines[self.pos].text.is_empty() {
            self.pos += 1;
        }
        self.lines.get(self.pos)
    }

    fn take(&mut self) -> Option<Line> {
        self.peek()?;
        let line = self.lines[self.pos].clone();
        self.pos += 1;
        Some(line)
    }

    fn parse_map(&mut self, indent: usize) -> Result<Vec<Entry>, ParseError> {
        let mut entries = Vec::new();

        loop {
            let Some(line) = self.peek() else {
                break;
            };
            if line.indent < indent {
                break;
            }
            if line.indent > indent {
                return Err(syntax(line.number, "unexpected indentation"));
            }
            if is_list_item(&line.text) {
                return Err(syntax(line.number, "expected a mapping key, found a list item"));
            }

            let Some(line) = self.take() else {
                break;
            };
            let (key, rest) = split_key(&line.text)
                .map_err(|message| syntax(line.number, message))?
                .ok_or_else(|| syntax(line.number, "expected 'key: value'"))?;

            let selector = line.selector()?;
            let value = self.parse_value(rest, indent, line.number, true)?;

            entries.push(Entry {
                key,
                value,
                selector,
            });
        }

        Ok(entries)
    }

    fn parse_list(&mut self, indent: usize) -> Result<Vec<Item>, ParseError> {
        let mut items = Vec::new();

        loop {
            let Some(line) = self.peek() else {
                break;
            };
            if line.indent < indent || !is_list_item(&line.text) {
                break;
            }
            if line.indent > indent {
                return Err(syntax(line.number, "unexpected indentation"));
            }

            let Some(line) = self.take() else {
                break;
            };
            let selector = line.selector()?;

            let content = line.text[1..].trim_start();
            let content_indent = line.indent + (line.text.len() - content.len());

            let value = if content.is_empty() {
                self.parse_value("", indent, line.number, false)?
            } else if is_list_item(content) {
                return Err(syntax(line.number, "nested inline lists are not supported"));
            } else if split_key(content)
                .map_err(|message| syntax(line.number, message))?
                .is_some()
            {
                // Re-read the item body as a mapping indented at its first key.
                self.pos -= 1;
                self.lines[self.pos] = Line {
                    number: line.number,
                    indent: content_indent,
                    raw: line.raw.clone(),
                    text: content.to_string(),
                    comment: None,
                };
                Node::Map(self.parse_map(content_indent)?)
            } else {
                self.parse_value(content, indent, line.number, false)?
            };

            items.push(Item { value, selector });
        }

        Ok(items)
    }

    /// Parses the value that follows `key:` or `- ` on a line owned by a
    /// node at `indent`.
    fn parse_value(
        &mut self,
        rest: &str,
        indent: usize,
        line: usize,
        allow_sibling_list: bool,
    ) -> Result<Node, ParseError> {
        let rest = rest.trim();

        if rest.is_empty() {
            let Some(next) = self.peek() else {
                return Ok(Node::Null);
            };
            let (next_indent, next_is_item) = (next.indent, is_list_item(&next.text));

            return if next_indent > indent {
                if next_is_item {
                    Ok(Node::List(self.parse_list(next_indent)?))
                } else {
                    Ok(Node::Map(self.parse_map(next_indent)?))
                }
            } else if next_indent == indent && next_is_item && allow_sibling_list {
                Ok(Node::List(self.parse_list(indent)?))
            } else {
                Ok(Node::Null)
            };
        }

        if rest.starts_with('|') || rest.starts_with('>') {
            return self.parse_block_scalar(rest, indent, line);
        }

        if rest.starts_with('[') || rest.starts_with('{') {
            let value: Value = serde_yaml::from_str(rest)
                .map_err(|e| syntax(line, format!("invalid flow collection: {}", e)))?;
            return node_from_yaml(value).map_err(|message| syntax(line, message));
        }

        parse_scalar(rest, line)
    }

    fn parse_block_scalar(
        &mut self,
        header: &str,
        indent: usize,
        line: usize,
    ) -> Result<Node, ParseError> {
        let folded = header.starts_with('>');
        let mut chomp = Chomp::Clip;
        let mut explicit_indent = None;

        for c in header[1..].chars() {
            match c {
                '-' => chomp = Chomp::Strip,
                '+' => chomp = Chomp::Keep,
                d if d.is_ascii_digit() && d != '0' => {
                    explicit_indent = d.to_digit(10).map(|n| indent + n as usize);
                }
                _ => return Err(syntax(line, format!("invalid block scalar header '{}'", header))),
            }
        }

        let block_indent = explicit_indent.or_else(|| {
            self.lines[self.pos..]
                .iter()
                .find(|l| !l.raw.trim().is_empty())
                .map(|l| l.indent)
                .filter(|&n| n > indent)
        });

        // The block ends at the first non-blank line indented less than its
        // content; that line is left for the enclosing node.
        let mut body: Vec<&Line> = Vec::new();
        let mut end = self.pos;
        while end < self.lines.len() {
            let candidate = &self.lines[end];
            let blank = candidate.raw.trim().is_empty();
            if !blank && candidate.indent < block_indent.unwrap_or(indent + 1) {
                break;
            }
            body.push(candidate);
            end += 1;
        }

        let mut content: Vec<String> = body
            .iter()
            .map(|l| match block_indent {
                Some(n) => l.raw.get(n..).unwrap_or_default().to_string(),
                None => String::new(),
            })
            .collect();
        self.pos = end;

        let mut trailing_blank = 0;
        while content.last().is_some_and(|l| l.is_empty()) {
            content.pop();
            trailing_blank += 1;
        }

        let mut value = if folded {
            fold_lines(&content)
        } else {
            content.join("\n")
        };

        if !content.is_empty() {
            match chomp {
                Chomp::Strip => {}
                Chomp::Clip => value.push('\n'),
                Chomp::Keep => {
                    value.push('\n');
                    value.push_str(&"\n".repeat(trailing_blank));
                }
            }
        }

        Ok(Node::Scalar(Scalar {
            value,
            style: ScalarStyle::Block,
        }))
    }
}

fn fold_lines(lines: &[String]) -> String {
    let mut out = String::new();
    let mut previous_blank = true;
    for line in lines {
        if line.is_empty() {
            out.push('\n');
            previous_blank = true;
        } else {
            if !previous_blank {
                out.push(' ');
            }
            out.push_str(line);
            previous_blank = false;
        }
    }
    out
}

fn parse_scalar(text: &str, line: usize) -> Result<Node, ParseError> {
    if text.starts_with('"') || text.starts_with('\'') {
        let value: String = serde_yaml::from_str(text)
            .map_err(|e| syntax(line, format!("invalid quoted scalar: {}", e)))?;
        return Ok(Node::Scalar(Scalar::quoted(value)));
    }
    Ok(Node::Scalar(Scalar::plain(text)))
}

fn node_from_yaml(value: Value) -> Result<Node, String> {
    match value {
        Value::Null => Ok(Node::Null),
        Value::Bool(b) => Ok(Node::Scalar(Scalar::plain(b.to_string()))),
        Value::Number(n) => Ok(Node::Scalar(Scalar::plain(n.to_string()))),
        Value::String(s) => Ok(Node::Scalar(Scalar::from_string(s))),
        Value::Sequence(seq) => seq
            .into_iter()
            .map(|v| node_from_yaml(v).map(Item::new))
            .collect::<Result<Vec<_>, _>>()
            .map(Node::List),
        Value::Mapping(map) => map
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    Value::String(s) => s,
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => return Err(format!("unsupported mapping key {:?}", other)),
                };
                node_from_yaml(v).map(|node| Entry::new(key, node))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Node::Map),
        Value::Tagged(tagged) => Err(format!("YAML tags are not supported ({})", tagged.tag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::platform::{Platform, PythonVersion};

    fn scalar_list(node: &Node) -> Vec<&str> {
        node.as_list()
            .unwrap()
            .iter()
            .map(|item| item.value.as_str().unwrap())
            .collect()
    }

    #[test]
    fn test_parse_sections_and_scalars() {
        let doc = Document::parse(
            "package:\n  name: conda\n  version: \"4.3.21\"\n\nbuild:\n  number: 0\n",
        )
        .unwrap();

        assert_eq!(doc.section_names(), vec!["package", "build"]);
        assert_eq!(doc.get("package.name").unwrap().as_str(), Some("conda"));
        assert_eq!(doc.get("package.version").unwrap().as_str(), Some("4.3.21"));
        assert_eq!(doc.get("build.number").unwrap().as_str(), Some("0"));
        assert!(doc.get("build.missing").is_none());
    }

    #[test]
    fn test_parse_list_selectors() {
        let doc = Document::parse(
            "requirements:\n  run:\n    - python\n    - enum34  # [py<34]\n    - menuinst  # [win]\n",
        )
        .unwrap();

        let run = doc.get("requirements.run").unwrap().as_list().unwrap();
        assert_eq!(run.len(), 3);
        assert!(run[0].selector.is_none());
        assert_eq!(run[1].selector.as_ref().unwrap().to_string(), "py<34");
        assert_eq!(run[2].selector.as_ref().unwrap().to_string(), "win");
        assert_eq!(run[2].value.as_str(), Some("menuinst"));
    }

    #[test]
    fn test_unknown_selector_tag_reports_line() {
        let err = Document::parse("build:\n  number: 1  # [osx]\n").unwrap_err();
        match err {
            ParseError::Selector { line, text, .. } => {
                assert_eq!(line, 2);
                assert_eq!(text, "osx");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_plain_comments_are_not_selectors() {
        let doc = Document::parse("about:\n  home: https://conda.io  # project page\n").unwrap();
        assert_eq!(doc.get("about.home").unwrap().as_str(), Some("https://conda.io"));
        assert!(doc.selectors().is_empty());
    }

    #[test]
    fn test_hash_inside_quotes_is_kept() {
        let doc = Document::parse("test:\n  commands:\n    - \"echo '# [win]'\"  # [unix]\n").unwrap();
        let commands = doc.get("test.commands").unwrap().as_list().unwrap();
        assert_eq!(commands[0].value.as_str(), Some("echo '# [win]'"));
        assert_eq!(commands[0].selector.as_ref().unwrap().to_string(), "unix");
    }

    #[test]
    fn test_colons_in_plain_scalars() {
        let doc = Document::parse(
            "build:\n  entry_points:\n    - conda = conda.cli.main:main\nabout:\n  home: https://conda.io\n",
        )
        .unwrap();
        assert_eq!(
            scalar_list(doc.get("build.entry_points").unwrap()),
            vec!["conda = conda.cli.main:main"]
        );
    }

    #[test]
    fn test_list_at_key_indentation() {
        let doc = Document::parse("test:\n  imports:\n  - conda\n  - conda_env\n  commands:\n  - conda info\n").unwrap();
        assert_eq!(scalar_list(doc.get("test.imports").unwrap()), vec!["conda", "conda_env"]);
        assert_eq!(scalar_list(doc.get("test.commands").unwrap()), vec!["conda info"]);
    }

    #[test]
    fn test_list_of_mappings() {
        let doc = Document::parse(
            "source:\n  - url: https://example.com/a.tar.gz  # [unix]\n    sha256: abc\n  - path: ../\n",
        )
        .unwrap();

        let sources = doc.section("source").unwrap().as_list().unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].selector.as_ref().unwrap().to_string(), "unix");

        let first = sources[0].value.as_map().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].key, "sha256");
        assert!(first[0].selector.is_none());
    }

    #[test]
    fn test_selector_on_section_applies_to_block() {
        let doc = Document::parse("app:  # [win]\n  entry: conda\nabout:\n  license: BSD\n").unwrap();
        let linux = doc.select(&RenderContext::new(Platform::Linux64));
        assert_eq!(linux.section_names(), vec!["about"]);
        let win = doc.select(&RenderContext::new(Platform::Win64));
        assert_eq!(win.section_names(), vec!["app", "about"]);
    }

    #[test]
    fn test_block_scalars() {
        let doc = Document::parse(
            "about:\n  description: |\n    line one\n    line two\n\n  summary: >-\n    folded\n    text\n",
        )
        .unwrap();
        assert_eq!(
            doc.get("about.description").unwrap().as_str(),
            Some("line one\nline two\n")
        );
        assert_eq!(doc.get("about.summary").unwrap().as_str(), Some("folded text"));
    }

    #[test]
    fn test_block_scalar_keeps_hash_text() {
        let doc = Document::parse("about:\n  description: |\n    see # [notes]\n").unwrap();
        assert_eq!(doc.get("about.description").unwrap().as_str(), Some("see # [notes]\n"));
    }

    #[test]
    fn test_block_scalar_keep_chomping() {
        let doc = Document::parse("a: |+\n  text\n\n\nb: 1\n").unwrap();
        assert_eq!(doc.get("a").unwrap().as_str(), Some("text\n\n\n"));
    }

    #[test]
    fn test_block_scalar_ends_at_shallower_line() {
        assert!(matches!(
            Document::parse("a: |\n    line1\n  zzline2\n"),
            Err(ParseError::Syntax { line: 3, .. })
        ));
        assert!(matches!(
            Document::parse("a: |\n    x\n  xé\n"),
            Err(ParseError::Syntax { line: 3, .. })
        ));

        let doc = Document::parse("about:\n  description: |\n      deep\n  summary: short\n").unwrap();
        assert_eq!(doc.get("about.description").unwrap().as_str(), Some("deep\n"));
        assert_eq!(doc.get("about.summary").unwrap().as_str(), Some("short"));
    }

    #[test]
    fn test_flow_sequence() {
        let doc = Document::parse("test:\n  imports: [conda, conda_env]\n  files: []\n").unwrap();
        assert_eq!(scalar_list(doc.get("test.imports").unwrap()), vec!["conda", "conda_env"]);
        assert!(doc.get("test.files").unwrap().as_list().unwrap().is_empty());
    }

    #[test]
    fn test_select_filters_items() {
        let doc = Document::parse(
            "requirements:\n  run:\n    - python\n    - enum34  # [py<34]\n    - menuinst  # [win]\n",
        )
        .unwrap();

        let ctx = RenderContext::new(Platform::Win64).with_python(PythonVersion::new(2, 7));
        let selected = doc.select(&ctx);
        assert_eq!(
            scalar_list(selected.get("requirements.run").unwrap()),
            vec!["python", "enum34", "menuinst"]
        );
        assert!(selected.selectors().is_empty());

        let ctx = RenderContext::new(Platform::Linux64).with_python(PythonVersion::new(3, 6));
        let selected = doc.select(&ctx);
        assert_eq!(scalar_list(selected.get("requirements.run").unwrap()), vec!["python"]);
    }

    #[test]
    fn test_to_yaml_types() {
        let doc = Document::parse(
            "build:\n  number: 3\n  skip: true\n  string: \"7\"\npackage:\n  version: 1.10\n",
        )
        .unwrap();
        let value = doc.to_yaml().unwrap();

        assert_eq!(value["build"]["number"], Value::Number(3.into()));
        assert_eq!(value["build"]["skip"], Value::Bool(true));
        assert_eq!(value["build"]["string"], Value::String("7".to_string()));
        assert_eq!(value["package"]["version"], Value::String("1.10".to_string()));
    }

    #[test]
    fn test_duplicate_active_keys() {
        let doc = Document::parse("build:\n  number: 0  # [unix]\n  number: 1  # [win]\n").unwrap();

        let selected = doc.select(&RenderContext::new(Platform::Linux64));
        let value = selected.to_yaml().unwrap();
        assert_eq!(value["build"]["number"], Value::Number(0.into()));

        let err = doc.to_yaml().unwrap_err();
        assert_eq!(
            err,
            ParseError::DuplicateKey {
                path: "recipe.build".to_string(),
                key: "number".to_string()
            }
        );
    }

    #[test]
    fn test_selectors_paths() {
        let doc = Document::parse(
            "build:\n  always_include_files:\n    - bin/conda  # [unix]\n    - Scripts/conda.exe  # [win]\n",
        )
        .unwrap();
        let paths: Vec<String> = doc.selectors().into_iter().map(|(p, _)| p).collect();
        assert_eq!(
            paths,
            vec!["build.always_include_files[0]", "build.always_include_files[1]"]
        );
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(Document::parse(""), Err(ParseError::Empty));
        assert_eq!(Document::parse("# only a comment\n"), Err(ParseError::Empty));
        assert!(matches!(
            Document::parse("- a\n- b\n"),
            Err(ParseError::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            Document::parse("package:\n  name: a\n    version: b\n"),
            Err(ParseError::Syntax { line: 3, .. })
        ));
        assert!(matches!(
            Document::parse("package\n"),
            Err(ParseError::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            Document::parse("a:\n\t- b\n"),
            Err(ParseError::Syntax { line: 2, .. })
        ));
        assert!(matches!(
            Document::parse("a: \"unterminated\n"),
            Err(ParseError::Syntax { line: 1, .. })
        ));
    }

    #[test]
    fn test_document_markers_are_ignored() {
        let doc = Document::parse("---\npackage:\n  name: x\n...\n").unwrap();
        assert_eq!(doc.section_names(), vec!["package"]);
    }

    #[test]
    fn test_is_plain_safe() {
        assert!(is_plain_safe("conda-env >=2.6"));
        assert!(is_plain_safe("conda = conda.cli.main:main"));
        assert!(!is_plain_safe(""));
        assert!(!is_plain_safe("- a"));
        assert!(!is_plain_safe("a: b"));
        assert!(!is_plain_safe(" padded"));
        assert!(!is_plain_safe("{{ version }}"));
    }
}
