//! Structured response decoder.
//!
//! Models answer in loose XML:
//!
//! ```text
//! <response>
//!   <thought>user wants the order gone</thought>
//!   <actions>LOOKUP_ORDER,CANCEL_ORDER</actions>
//!   <text>On it.</text>
//! </response>
//! ```
//!
//! [`decode`] turns that into a [`Mapping`] in two linear passes. The first
//! tokenizes tags; the second pairs each close tag with the nearest open of
//! the same name on a stack, so a nested `<item>` inside an `<item>` does
//! not end its parent early. There is no backtracking and no recursion
//! beyond [`MAX_DEPTH`]; malformed or unclosed tags are skipped.
//!
//! Grammar (informal):
//! ```text
//! element  = "<" NAME attrs ">" content "</" NAME ">"
//! NAME     = [A-Za-z_] [A-Za-z0-9_.:-]*
//! content  = element* | text
//! ```

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

const ENVELOPE: &str = "response";

/// A decoded value: a text leaf, a nested mapping, or repeated siblings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Node {
    Text(String),
    Map(Mapping),
    List(Vec<Node>),
}

impl Node {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Node::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Mapping> {
        match self {
            Node::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::Text(s.to_string())
    }
}

/// Tag name → decoded value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Mapping {
    entries: BTreeMap<String, Node>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries.get(key)
    }

    /// The text under `key`; for repeated tags, the first text item.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            Node::Text(s) => Some(s),
            Node::List(items) => items.iter().find_map(Node::as_text),
            Node::Map(_) => None,
        }
    }

    /// The values under `key` as a flat list.
    ///
    /// A scalar is split on commas; repeated tags yield one item each.
    /// Blank items are dropped.
    pub fn list(&self, key: &str) -> Vec<String> {
        let Some(node) = self.entries.get(key) else {
            return Vec::new();
        };
        let texts: Vec<&str> = match node {
            Node::Text(s) => vec![s.as_str()],
            Node::List(items) => items.iter().filter_map(Node::as_text).collect(),
            Node::Map(_) => Vec::new(),
        };
        texts
            .into_iter()
            .flat_map(|s| s.split(','))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// Insert a value, collapsing repeated keys into a list in order.
    pub fn insert(&mut self, key: impl Into<String>, node: Node) {
        use std::collections::btree_map::Entry;
        match self.entries.entry(key.into()) {
            Entry::Vacant(slot) => {
                slot.insert(node);
            }
            Entry::Occupied(mut slot) => match slot.get_mut() {
                Node::List(items) => items.push(node),
                existing => {
                    let first = std::mem::replace(existing, Node::List(Vec::new()));
                    *existing = Node::List(vec![first, node]);
                }
            },
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.entries.iter()
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────

/// Elements nested deeper than this are kept as text.
pub const MAX_DEPTH: usize = 64;

/// Decode a model reply. Returns `None` when no well-formed tag is found.
///
/// Runs in time linear in the input and never recurses deeper than
/// [`MAX_DEPTH`], whatever the model sends.
pub fn decode(text: &str) -> Option<Mapping> {
    let tree = Tree::scan(text);
    // The first complete `<response>` is the envelope; otherwise the whole text.
    let root = tree
        .elements
        .iter()
        .position(|e| e.name == ENVELOPE)
        .map_or(&tree.root, |i| &tree.elements[i].children);
    let mapping = tree.mapping(root, 0);
    if mapping.is_empty() {
        None
    } else {
        Some(mapping)
    }
}

/// A token found by the scanner.
enum Mark<'a> {
    /// `end` is just past the `>`.
    Open { name: &'a str, end: usize },
    /// `start` is the offset of the `<`.
    Close { name: &'a str, start: usize },
    /// Non-whitespace text, a stray `<`, or an invalid tag.
    Text,
}

/// A matched element: `<name ...>` ... `</name>`.
struct Element<'a> {
    name: &'a str,
    /// Byte range of the content between the tags.
    inner: (usize, usize),
    children: Vec<usize>,
    /// Holds text, stray closes or unclosed opens besides its children.
    mixed: bool,
}

/// Matched elements in document order, linked parent to child.
struct Tree<'a> {
    text: &'a str,
    elements: Vec<Element<'a>>,
    root: Vec<usize>,
}

impl<'a> Tree<'a> {
    fn scan(text: &'a str) -> Self {
        let marks = scan_marks(text);
        let matched = match_marks(&marks);

        // Second pass: nest matched elements. Unclosed opens dissolve into
        // their parent, which then counts as mixed content.
        let mut tree = Tree {
            text,
            elements: Vec::new(),
            root: Vec::new(),
        };
        let mut open: Vec<usize> = Vec::new();
        for (i, mark) in marks.iter().enumerate() {
            match (mark, matched[i]) {
                (Mark::Open { name, end }, Some(close)) => {
                    let Mark::Close { start: close_start, .. } = marks[close] else {
                        continue;
                    };
                    let id = tree.elements.len();
                    tree.elements.push(Element {
                        name: *name,
                        inner: (*end, close_start),
                        children: Vec::new(),
                        mixed: false,
                    });
                    match open.last() {
                        Some(&parent) => tree.elements[parent].children.push(id),
                        None => tree.root.push(id),
                    }
                    open.push(id);
                }
                (Mark::Close { .. }, Some(_)) => {
                    open.pop();
                }
                _ => {
                    if let Some(&parent) = open.last() {
                        tree.elements[parent].mixed = true;
                    }
                }
            }
        }
        tree
    }

    fn mapping(&self, ids: &[usize], depth: usize) -> Mapping {
        let mut mapping = Mapping::new();
        for &id in ids {
            let element = &self.elements[id];
            mapping.insert(element.name, self.node(element, depth + 1));
        }
        mapping
    }

    fn node(&self, element: &Element<'_>, depth: usize) -> Node {
        if !element.mixed && !element.children.is_empty() && depth < MAX_DEPTH {
            Node::Map(self.mapping(&element.children, depth))
        } else {
            let (start, end) = element.inner;
            Node::Text(unescape(self.text[start..end].trim()))
        }
    }
}

/// Tokenize in one forward pass. Comments and self-closing tags leave no
/// mark; an unterminated comment ends the scan.
fn scan_marks(s: &str) -> Vec<Mark<'_>> {
    let mut marks = Vec::new();
    let mut pos = 0;
    loop {
        let Some(offset) = s[pos..].find('<') else {
            if !s[pos..].trim().is_empty() {
                marks.push(Mark::Text);
            }
            break;
        };
        let lt = pos + offset;
        if !s[pos..lt].trim().is_empty() {
            marks.push(Mark::Text);
        }
        if s[lt..].starts_with("<!--") {
            match s[lt + 4..].find("-->") {
                Some(j) => pos = lt + 4 + j + 3,
                None => break,
            }
            continue;
        }
        if let Some((name, end)) = close_tag_at(s, lt) {
            marks.push(Mark::Close { name, start: lt });
            pos = end;
        } else if let Some(open) = open_tag_at(s, lt) {
            if !open.self_closing {
                marks.push(Mark::Open {
                    name: open.name,
                    end: open.end,
                });
            }
            pos = open.end;
        } else {
            marks.push(Mark::Text);
            pos = lt + 1;
        }
    }
    marks
}

/// Pair each close with the nearest open of the same name. Opens skipped
/// over by a close stay unmatched, as do closes with no open to match.
fn match_marks(marks: &[Mark<'_>]) -> Vec<Option<usize>> {
    let mut matched = vec![None; marks.len()];
    let mut stack: Vec<usize> = Vec::new();
    let mut open_names: HashMap<&str, usize> = HashMap::new();

    for (i, mark) in marks.iter().enumerate() {
        match mark {
            Mark::Open { name, .. } => {
                stack.push(i);
                *open_names.entry(*name).or_default() += 1;
            }
            Mark::Close { name, .. } => {
                if open_names.get(name).copied().unwrap_or(0) == 0 {
                    continue;
                }
                while let Some(j) = stack.pop() {
                    let Mark::Open { name: open_name, .. } = marks[j] else {
                        continue;
                    };
                    if let Some(count) = open_names.get_mut(open_name) {
                        *count -= 1;
                    }
                    if open_name == *name {
                        matched[j] = Some(i);
                        matched[i] = Some(j);
                        break;
                    }
                }
            }
            Mark::Text => {}
        }
    }
    matched
}

struct OpenTag<'a> {
    name: &'a str,
    /// Byte offset just past the closing `>`.
    end: usize,
    self_closing: bool,
}

/// Parse `<name ...>` or `<name .../>` starting at `lt`.
fn open_tag_at(s: &str, lt: usize) -> Option<OpenTag<'_>> {
    let name_start = lt + 1;
    let name_len = tag_name_len(&s[name_start..]);
    if name_len == 0 {
        return None;
    }
    let name_end = name_start + name_len;
    // The name must be followed by whitespace, `/` or `>`.
    match s[name_end..].chars().next()? {
        c if c.is_whitespace() || c == '/' || c == '>' => {}
        _ => return None,
    }
    // A stray `<` before the `>` means this was never a tag.
    let stop = name_end + s[name_end..].find(['<', '>'])?;
    if s.as_bytes()[stop] != b'>' {
        return None;
    }
    Some(OpenTag {
        name: &s[name_start..name_end],
        end: stop + 1,
        self_closing: s[..stop].ends_with('/'),
    })
}

/// Parse `</name>` (whitespace allowed before the `>`) starting at `lt`.
/// Returns the name and the offset just past the `>`.
fn close_tag_at(s: &str, lt: usize) -> Option<(&str, usize)> {
    let name_start = lt + 2;
    if !s[lt..].starts_with("</") {
        return None;
    }
    let name_len = tag_name_len(&s[name_start..]);
    if name_len == 0 {
        return None;
    }
    let name_end = name_start + name_len;
    let tail = &s[name_end..];
    let trimmed = tail.trim_start();
    if !trimmed.starts_with('>') {
        return None;
    }
    let end = name_end + (tail.len() - trimmed.len()) + 1;
    Some((&s[name_start..name_end], end))
}

fn tag_name_len(s: &str) -> usize {
    let mut len = 0;
    for (i, c) in s.char_indices() {
        let ok = if i == 0 {
            c.is_ascii_alphabetic() || c == '_'
        } else {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-')
        };
        if !ok {
            break;
        }
        len = i + c.len_utf8();
    }
    len
}

fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let entity = [
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&amp;", '&'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ]
        .into_iter()
        .find(|(name, _)| rest.starts_with(name));
        match entity {
            Some((name, ch)) => {
                out.push(ch);
                rest = &rest[name.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

// ── Encoding ──────────────────────────────────────────────────────────────

/// Write a mapping as a `<response>` envelope of nested tags.
pub fn encode(mapping: &Mapping) -> String {
    let mut out = String::new();
    out.push_str("<response>");
    write_mapping(&mut out, mapping);
    out.push_str("</response>");
    out
}

fn write_mapping(out: &mut String, mapping: &Mapping) {
    for (key, node) in mapping.iter() {
        write_node(out, key, node);
    }
}

fn write_node(out: &mut String, key: &str, node: &Node) {
    match node {
        Node::List(items) => {
            for item in items {
                write_node(out, key, item);
            }
        }
        Node::Text(text) => {
            out.push('<');
            out.push_str(key);
            out.push('>');
            out.push_str(&escape(text));
            out.push_str("</");
            out.push_str(key);
            out.push('>');
        }
        Node::Map(children) => {
            out.push('<');
            out.push_str(key);
            out.push('>');
            write_mapping(out, children);
            out.push_str("</");
            out.push_str(key);
            out.push('>');
        }
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
