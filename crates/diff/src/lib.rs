//! kwatch diff: structural comparison of JSON documents and a line-oriented
//! ASCII rendering of the difference.
//!
//! The rendering shows the whole document, one JSON line per output line, with a
//! marker column: `' '` unchanged, `'+'` added, `'-'` deleted. A changed leaf is
//! shown as its old value (`-`) followed by its new value (`+`).

#![forbid(unsafe_code)]

use crossterm::style::{style, Stylize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Same(Value),
    Added(Value),
    Deleted(Value),
    Changed { old: Value, new: Value },
    /// Object with at least one differing key; entries sorted by key.
    Object(Vec<(String, Node)>),
    /// Array with at least one differing position.
    Array(Vec<Node>),
}

/// Result of [`compare`].
#[derive(Debug, Clone, PartialEq)]
pub struct Diff {
    root: Node,
}

impl Diff {
    /// Whether the compared documents differ structurally.
    pub fn modified(&self) -> bool {
        !matches!(self.root, Node::Same(_))
    }

    /// Render the whole document with change markers; `styled` adds ANSI colours.
    pub fn render(&self, styled: bool) -> String {
        let mut r = Renderer { out: String::new(), styled };
        r.node(0, "", &self.root, false);
        r.out
    }
}

/// Compare two documents. Object key order is irrelevant; array order is not.
pub fn compare(old: &Value, new: &Value) -> Diff {
    Diff { root: diff_node(old, new) }
}

fn sorted_keys<'a>(a: &'a serde_json::Map<String, Value>, b: Option<&'a serde_json::Map<String, Value>>) -> Vec<&'a String> {
    let mut keys: Vec<&String> = a.keys().collect();
    if let Some(b) = b {
        keys.extend(b.keys().filter(|k| !a.contains_key(*k)));
    }
    keys.sort();
    keys
}

fn diff_node(old: &Value, new: &Value) -> Node {
    if old == new {
        return Node::Same(old.clone());
    }
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            let entries = sorted_keys(a, Some(b))
                .into_iter()
                .map(|k| {
                    let node = match (a.get(k), b.get(k)) {
                        (Some(av), Some(bv)) => diff_node(av, bv),
                        (Some(av), None) => Node::Deleted(av.clone()),
                        (None, Some(bv)) => Node::Added(bv.clone()),
                        (None, None) => Node::Same(Value::Null),
                    };
                    (k.clone(), node)
                })
                .collect();
            Node::Object(entries)
        }
        (Value::Array(a), Value::Array(b)) => {
            let len = a.len().max(b.len());
            let items = (0..len)
                .map(|i| match (a.get(i), b.get(i)) {
                    (Some(av), Some(bv)) => diff_node(av, bv),
                    (Some(av), None) => Node::Deleted(av.clone()),
                    (None, Some(bv)) => Node::Added(bv.clone()),
                    (None, None) => Node::Same(Value::Null),
                })
                .collect();
            Node::Array(items)
        }
        _ => Node::Changed { old: old.clone(), new: new.clone() },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Same,
    Add,
    Del,
}

impl Mark {
    fn symbol(self) -> char {
        match self {
            Mark::Same => ' ',
            Mark::Add => '+',
            Mark::Del => '-',
        }
    }
}

struct Renderer {
    out: String,
    styled: bool,
}

fn key_prefix(key: &str) -> String {
    format!("{}: ", Value::from(key))
}

fn comma(yes: bool) -> &'static str {
    if yes { "," } else { "" }
}

impl Renderer {
    fn line(&mut self, mark: Mark, depth: usize, text: &str) {
        if !self.out.is_empty() {
            self.out.push('\n');
        }
        let raw = format!("{}{}{}", mark.symbol(), "  ".repeat(depth), text);
        match (self.styled, mark) {
            (true, Mark::Add) => self.out.push_str(&style(raw).green().to_string()),
            (true, Mark::Del) => self.out.push_str(&style(raw).red().to_string()),
            _ => self.out.push_str(&raw),
        }
    }

    /// Render a plain value, every line carrying the same marker.
    fn value(&mut self, mark: Mark, depth: usize, prefix: &str, v: &Value, trailing: bool) {
        match v {
            Value::Object(map) if !map.is_empty() => {
                self.line(mark, depth, &format!("{prefix}{{"));
                let keys = sorted_keys(map, None);
                let n = keys.len();
                for (i, k) in keys.into_iter().enumerate() {
                    self.value(mark, depth + 1, &key_prefix(k), &map[k.as_str()], i + 1 < n);
                }
                self.line(mark, depth, &format!("}}{}", comma(trailing)));
            }
            Value::Array(items) if !items.is_empty() => {
                self.line(mark, depth, &format!("{prefix}["));
                let n = items.len();
                for (i, item) in items.iter().enumerate() {
                    self.value(mark, depth + 1, "", item, i + 1 < n);
                }
                self.line(mark, depth, &format!("]{}", comma(trailing)));
            }
            _ => self.line(mark, depth, &format!("{prefix}{v}{}", comma(trailing))),
        }
    }

    fn node(&mut self, depth: usize, prefix: &str, node: &Node, trailing: bool) {
        match node {
            Node::Same(v) => self.value(Mark::Same, depth, prefix, v, trailing),
            Node::Added(v) => self.value(Mark::Add, depth, prefix, v, trailing),
            Node::Deleted(v) => self.value(Mark::Del, depth, prefix, v, trailing),
            Node::Changed { old, new } => {
                self.value(Mark::Del, depth, prefix, old, trailing);
                self.value(Mark::Add, depth, prefix, new, trailing);
            }
            Node::Object(entries) => {
                self.line(Mark::Same, depth, &format!("{prefix}{{"));
                let n = entries.len();
                for (i, (k, child)) in entries.iter().enumerate() {
                    self.node(depth + 1, &key_prefix(k), child, i + 1 < n);
                }
                self.line(Mark::Same, depth, &format!("}}{}", comma(trailing)));
            }
            Node::Array(items) => {
                self.line(Mark::Same, depth, &format!("{prefix}["));
                let n = items.len();
                for (i, child) in items.iter().enumerate() {
                    self.node(depth + 1, "", child, i + 1 < n);
                }
                self.line(Mark::Same, depth, &format!("]{}", comma(trailing)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_documents_are_not_modified() {
        let a = json!({ "spec": { "replicas": 1 }, "metadata": { "name": "x" } });
        let b = json!({ "metadata": { "name": "x" }, "spec": { "replicas": 1 } });
        assert!(!compare(&a, &b).modified());
        assert!(!compare(&json!({}), &json!({})).modified());
    }

    #[test]
    fn scalar_change_renders_old_then_new() {
        let a = json!({ "kind": "Widget", "spec": { "replicas": 1 } });
        let b = json!({ "kind": "Widget", "spec": { "replicas": 2 } });
        let d = compare(&a, &b);
        assert!(d.modified());
        let expected = [
            " {",
            "   \"kind\": \"Widget\",",
            "   \"spec\": {",
            "-    \"replicas\": 1",
            "+    \"replicas\": 2",
            "   }",
            " }",
        ]
        .join("\n");
        assert_eq!(d.render(false), expected);
    }

    #[test]
    fn creation_from_empty_marks_every_key_added() {
        let d = compare(&json!({}), &json!({ "a": 1, "b": { "c": [true] } }));
        let expected = [
            " {",
            "+  \"a\": 1,",
            "+  \"b\": {",
            "+    \"c\": [",
            "+      true",
            "+    ]",
            "+  }",
            " }",
        ]
        .join("\n");
        assert_eq!(d.render(false), expected);
    }

    #[test]
    fn deletion_to_empty_marks_every_key_deleted() {
        let d = compare(&json!({ "a": "x" }), &json!({}));
        assert_eq!(d.render(false), " {\n-  \"a\": \"x\"\n }");
    }

    #[test]
    fn arrays_are_compared_by_position() {
        let d = compare(&json!({ "l": [1, 2, 3] }), &json!({ "l": [1, 9] }));
        let expected = [
            " {",
            "   \"l\": [",
            "     1,",
            "-    2,",
            "+    9,",
            "-    3",
            "   ]",
            " }",
        ]
        .join("\n");
        assert_eq!(d.render(false), expected);
    }

    #[test]
    fn styled_output_colours_changed_lines_only() {
        let d = compare(&json!({ "a": 1, "b": 1 }), &json!({ "a": 1, "b": 2 }));
        let out = d.render(true);
        assert!(out.contains('\u{1b}'));
        let first_line = out.lines().next().unwrap_or_default();
        assert_eq!(first_line, " {");
        let added = out.lines().find(|l| l.contains("\"b\": 2")).expect("added line");
        assert!(added.starts_with('\u{1b}') && added.contains('+'));
        assert_eq!(out.lines().count(), d.render(false).lines().count());
    }
}
