//! Recipe Writer
//!
//! Serializes a [`Document`] back to recipe text. Selectors are written as
//! trailing `# [expr]` comments on the line they guard, so parsing the output
//! yields an equal document.

use super::document::{is_plain_safe, Document, Entry, Item, Node, Scalar, ScalarStyle};

const INDENT: usize = 2;

/// Renders `doc` as recipe text with two-space indentation.
pub fn write_document(doc: &Document) -> String {
    let mut out = String::new();
    for (i, entry) in doc.entries.iter().enumerate() {
        // Blank line after each nested section, unless it would extend a `|+` block.
        if i > 0 {
            let previous = &doc.entries[i - 1].value;
            if matches!(previous, Node::Map(_) | Node::List(_)) && !ends_with_kept_block(previous) {
                out.push('\n');
            }
        }
        write_entry(&mut out, entry, 0);
    }
    out
}

fn ends_with_kept_block(node: &Node) -> bool {
    match node {
        Node::Scalar(scalar) => scalar.style == ScalarStyle::Block && scalar.value.ends_with("\n\n"),
        Node::List(items) => items.last().is_some_and(|item| ends_with_kept_block(&item.value)),
        Node::Map(entries) => entries.last().is_some_and(|entry| ends_with_kept_block(&entry.value)),
        Node::Null => false,
    }
}

fn write_entry(out: &mut String, entry: &Entry, indent: usize) {
    let key = format_key(&entry.key);
    let pad = " ".repeat(indent);
    let selector = selector_comment(entry.selector.as_ref());

    match &entry.value {
        Node::Null => push_line(out, &format!("{}{}:", pad, key), &selector),
        Node::Scalar(scalar) => write_scalar(out, &format!("{}{}: ", pad, key), scalar, indent, &selector),
        Node::List(items) if items.is_empty() => {
            push_line(out, &format!("{}{}: []", pad, key), &selector)
        }
        Node::Map(entries) if entries.is_empty() => {
            push_line(out, &format!("{}{}: {{}}", pad, key), &selector)
        }
        Node::List(items) => {
            push_line(out, &format!("{}{}:", pad, key), &selector);
            for item in items {
                write_item(out, item, indent + INDENT);
            }
        }
        Node::Map(entries) => {
            push_line(out, &format!("{}{}:", pad, key), &selector);
            for child in entries {
                write_entry(out, child, indent + INDENT);
            }
        }
    }
}

fn write_item(out: &mut String, item: &Item, indent: usize) {
    let pad = " ".repeat(indent);
    let selector = selector_comment(item.selector.as_ref());

    match &item.value {
        Node::Null => push_line(out, &format!("{}-", pad), &selector),
        Node::Scalar(scalar) => write_scalar(out, &format!("{}- ", pad), scalar, indent, &selector),
        Node::List(items) if items.is_empty() => push_line(out, &format!("{}- []", pad), &selector),
        Node::Map(entries) if entries.is_empty() => push_line(out, &format!("{}- {{}}", pad), &selector),
        Node::List(items) => {
            push_line(out, &format!("{}-", pad), &selector);
            for child in items {
                write_item(out, child, indent + INDENT);
            }
        }
        Node::Map(entries) if entries[0].selector.is_some() => {
            // A guarded first key needs its own line to keep its selector.
            push_line(out, &format!("{}-", pad), &selector);
            for child in entries {
                write_entry(out, child, indent + INDENT);
            }
        }
        Node::Map(entries) => {
            // First entry shares the dash line; the item selector goes there.
            let mut first = String::new();
            write_entry(&mut first, &Entry::new(entries[0].key.clone(), entries[0].value.clone()), indent + INDENT);
            let first = first.replacen(&" ".repeat(indent + INDENT), &format!("{}- ", pad), 1);
            out.push_str(&attach_selector(&first, &selector));
            for child in &entries[1..] {
                write_entry(out, child, indent + INDENT);
            }
        }
    }
}

fn write_scalar(out: &mut String, prefix: &str, scalar: &Scalar, indent: usize, selector: &str) {
    match scalar.style {
        ScalarStyle::Plain => push_line(out, &format!("{}{}", prefix, scalar.value), selector),
        ScalarStyle::Quoted => push_line(out, &format!("{}{}", prefix, quote(&scalar.value)), selector),
        ScalarStyle::Block => write_block(out, prefix, &scalar.value, indent, selector),
    }
}

fn write_block(out: &mut String, prefix: &str, value: &str, indent: usize, selector: &str) {
    let trailing = value.len() - value.trim_end_matches('\n').len();
    let body = value.trim_end_matches('\n');
    let chomp = match trailing {
        0 => "-",
        1 => "",
        _ => "+",
    };
    let leading_space = body
        .split('\n')
        .find(|line| !line.is_empty())
        .is_some_and(|line| line.starts_with(' '));
    let indicator = if leading_space { "2" } else { "" };

    push_line(out, &format!("{}|{}{}", prefix, indicator, chomp), selector);

    let pad = " ".repeat(indent + INDENT);
    if !body.is_empty() {
        for line in body.split('\n') {
            if line.is_empty() {
                out.push('\n');
            } else {
                out.push_str(&pad);
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    for _ in 1..trailing {
        out.push('\n');
    }
}

/// Appends a selector comment to the first line of `text`.
fn attach_selector(text: &str, selector: &str) -> String {
    if selector.is_empty() {
        return text.to_string();
    }
    match text.split_once('\n') {
        Some((first, rest)) => format!("{}{}\n{}", first, selector, rest),
        None => format!("{}{}", text, selector),
    }
}

fn push_line(out: &mut String, line: &str, selector: &str) {
    out.push_str(line);
    out.push_str(selector);
    out.push('\n');
}

fn selector_comment(selector: Option<&super::selector::Selector>) -> String {
    selector
        .map(|s| format!("  # [{}]", s))
        .unwrap_or_default()
}

fn format_key(key: &str) -> String {
    if is_plain_safe(key) && !key.contains(':') && !key.contains('#') {
        key.to_string()
    } else {
        quote(key)
    }
}

/// Double-quoted scalar; JSON string escapes are valid YAML escapes.
fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::selector::Selector;

    const RECIPE: &str = r#"package:
  name: conda
  version: "4.3.21"

source:
  - url: https://example.com/conda.tar.gz  # [unix]
    sha256: 0123abcd
  - path: ../

build:
  number: 0
  always_include_files:
    - bin/conda  # [unix]
    - Scripts/conda.exe  # [win]
  entry_points:
    - conda = conda.cli.main:main

requirements:
  run:
    - python
    - enum34  # [py<34]
    - "requests >=2.12.4,<=2.14.2"

test:
  files: []
  commands:
    - conda --version

about:
  description: |
    First line.

    Second paragraph.
  summary: >-
    folded
    summary
"#;

    #[test]
    fn test_round_trip_preserves_document() {
        let doc = Document::parse(RECIPE).unwrap();
        let written = write_document(&doc);
        let reparsed = Document::parse(&written).unwrap();
        assert_eq!(doc, reparsed);
    }

    #[test]
    fn test_written_text_is_stable() {
        let doc = Document::parse(RECIPE).unwrap();
        let once = write_document(&doc);
        let twice = write_document(&Document::parse(&once).unwrap());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_selectors_written_as_comments() {
        let doc = Document {
            entries: vec![Entry::new(
                "requirements",
                Node::Map(vec![Entry::new(
                    "run",
                    Node::List(vec![
                        Item::new(Node::Scalar(Scalar::plain("python"))),
                        Item::new(Node::Scalar(Scalar::plain("menuinst")))
                            .with_selector(Selector::parse("win").unwrap()),
                    ]),
                )]),
            )],
        };

        assert_eq!(
            write_document(&doc),
            "requirements:\n  run:\n    - python\n    - menuinst  # [win]\n"
        );
    }

    #[test]
    fn test_quoted_and_block_scalars() {
        let doc = Document {
            entries: vec![
                Entry::new("a", Node::Scalar(Scalar::quoted("x: \"y\""))),
                Entry::new(
                    "b",
                    Node::Scalar(Scalar {
                        value: "one\ntwo".to_string(),
                        style: ScalarStyle::Block,
                    }),
                ),
            ],
        };
        let written = write_document(&doc);
        assert_eq!(written, "a: \"x: \\\"y\\\"\"\nb: |-\n  one\n  two\n");
        assert_eq!(Document::parse(&written).unwrap(), doc);
    }

    #[test]
    fn test_block_scalar_edge_cases() {
        for value in ["", "keep\n\n", "  leading space\n", "a\n\nb\n", "\n  x\n"] {
            let doc = Document {
                entries: vec![Entry::new(
                    "text",
                    Node::Scalar(Scalar {
                        value: value.to_string(),
                        style: ScalarStyle::Block,
                    }),
                )],
            };
            let reparsed = Document::parse(&write_document(&doc)).unwrap();
            assert_eq!(reparsed, doc, "value {:?}", value);
        }
    }

    #[test]
    fn test_selector_on_first_key_of_mapping_item() {
        let doc = Document {
            entries: vec![Entry::new(
                "source",
                Node::List(vec![Item::new(Node::Map(vec![
                    Entry::new("url", Node::Scalar(Scalar::plain("a")))
                        .with_selector(Selector::parse("win").unwrap()),
                    Entry::new("md5", Node::Scalar(Scalar::plain("b"))),
                ]))
                .with_selector(Selector::parse("py3k").unwrap())]),
            )],
        };

        let written = write_document(&doc);
        assert_eq!(
            written,
            "source:\n  -  # [py3k]\n    url: a  # [win]\n    md5: b\n"
        );
        assert_eq!(Document::parse(&written).unwrap(), doc);
    }

    #[test]
    fn test_explicit_indent_after_blank_line() {
        let doc = Document::parse("a: |2\n\n    x\n").unwrap();
        assert_eq!(doc.get("a").unwrap().as_str(), Some("\n  x\n"));

        let written = write_document(&doc);
        assert_eq!(written, "a: |2\n\n    x\n");
        assert_eq!(Document::parse(&written).unwrap(), doc);
    }

    #[test]
    fn test_item_selector_on_mapping_item() {
        let doc = Document::parse("source:\n  - url: a  # [win]\n    md5: b\n").unwrap();
        assert_eq!(
            write_document(&doc),
            "source:\n  - url: a  # [win]\n    md5: b\n"
        );
    }
}
