//! Allow-list HTML sanitizer for entry bodies.
//!
//! The raw body is parsed with html5ever (via `scraper`) into a DOM, walked
//! into a tree containing only allow-listed elements and attributes, normalized,
//! and re-serialized. Output markup only ever comes from the emitter.
//!
//! Normalization mirrors how feed bodies are usually written: whitespace runs
//! collapse to a single space, a pair of `<br>`s becomes a paragraph break,
//! and a body without any `<p>` gets its inline content wrapped in one.

use scraper::{ElementRef, Html, Node};
use url::Url;

/// Re-sanitize until the output stops changing, at most this many times.
const MAX_PASSES: usize = 8;

/// Elements deeper than this are flattened to their text.
const MAX_NESTING: usize = 128;

/// Elements dropped together with everything inside them.
const DROP_WITH_CONTENT: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "noscript", "template", "textarea", "select",
    "option", "svg", "math", "head", "title", "frame", "frameset", "applet", "noembed", "noframes",
    "xmp", "plaintext", "canvas",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    P,
    Br,
    Strong,
    Em,
    U,
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
    Ul,
    Ol,
    Li,
    Blockquote,
    Pre,
    Code,
    A,
    Img,
}

impl Tag {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "p" => Tag::P,
            "br" => Tag::Br,
            "strong" | "b" => Tag::Strong,
            "em" | "i" => Tag::Em,
            "u" => Tag::U,
            "h1" => Tag::H1,
            "h2" => Tag::H2,
            "h3" => Tag::H3,
            "h4" => Tag::H4,
            "h5" => Tag::H5,
            "h6" => Tag::H6,
            "ul" => Tag::Ul,
            "ol" => Tag::Ol,
            "li" => Tag::Li,
            "blockquote" => Tag::Blockquote,
            "pre" => Tag::Pre,
            "code" => Tag::Code,
            "a" => Tag::A,
            "img" => Tag::Img,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Tag::P => "p",
            Tag::Br => "br",
            Tag::Strong => "strong",
            Tag::Em => "em",
            Tag::U => "u",
            Tag::H1 => "h1",
            Tag::H2 => "h2",
            Tag::H3 => "h3",
            Tag::H4 => "h4",
            Tag::H5 => "h5",
            Tag::H6 => "h6",
            Tag::Ul => "ul",
            Tag::Ol => "ol",
            Tag::Li => "li",
            Tag::Blockquote => "blockquote",
            Tag::Pre => "pre",
            Tag::Code => "code",
            Tag::A => "a",
            Tag::Img => "img",
        }
    }

    fn is_void(self) -> bool {
        matches!(self, Tag::Br | Tag::Img)
    }

    fn is_block(self) -> bool {
        matches!(
            self,
            Tag::P
                | Tag::H1
                | Tag::H2
                | Tag::H3
                | Tag::H4
                | Tag::H5
                | Tag::H6
                | Tag::Ul
                | Tag::Ol
                | Tag::Li
                | Tag::Blockquote
                | Tag::Pre
        )
    }

    /// Containers whose direct `<br><br>` pairs turn into paragraphs.
    fn is_flow_container(self) -> bool {
        matches!(self, Tag::Blockquote | Tag::Li)
    }
}

#[derive(Debug, Clone)]
enum SafeNode {
    Text(String),
    Element {
        tag: Tag,
        attrs: Vec<(&'static str, String)>,
        children: Vec<SafeNode>,
    },
}

impl SafeNode {
    fn element(tag: Tag, children: Vec<SafeNode>) -> Self {
        SafeNode::Element {
            tag,
            attrs: Vec::new(),
            children,
        }
    }

    fn is_tag(&self, wanted: Tag) -> bool {
        matches!(self, SafeNode::Element { tag, .. } if *tag == wanted)
    }

    fn is_blank_text(&self) -> bool {
        matches!(self, SafeNode::Text(t) if t.bytes().all(|b| b.is_ascii_whitespace()))
    }

    /// Phrasing content all the way down.
    fn is_inline(&self) -> bool {
        match self {
            SafeNode::Text(_) => true,
            SafeNode::Element { tag, children, .. } => {
                !tag.is_block() && children.iter().all(SafeNode::is_inline)
            }
        }
    }

    fn contains_paragraph(&self) -> bool {
        match self {
            SafeNode::Text(_) => false,
            SafeNode::Element { tag, children, .. } => {
                *tag == Tag::P || children.iter().any(SafeNode::contains_paragraph)
            }
        }
    }
}

/// Sanitize an untrusted HTML fragment into the safe subset.
///
/// Never fails: malformed markup degrades to whatever html5ever recovers.
/// `sanitize(&sanitize(x)) == sanitize(x)`.
pub fn sanitize(raw: &str) -> String {
    let mut current = sanitize_once(raw);
    for _ in 1..MAX_PASSES {
        let next = sanitize_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn sanitize_once(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let fragment = Html::parse_fragment(raw);
    let mut nodes = Vec::new();
    convert_children(fragment.root_element(), 0, &mut nodes);

    let mut nodes = normalize_children(nodes, None);
    if !nodes.iter().any(SafeNode::contains_paragraph) {
        nodes = regroup(nodes);
    }
    trim_edges(&mut nodes);

    let mut out = String::with_capacity(raw.len());
    emit(&nodes, &mut out);
    out
}

// ============================================================================
// DOM -> safe tree
// ============================================================================

fn convert_children(el: ElementRef<'_>, depth: usize, out: &mut Vec<SafeNode>) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => push_text(out, text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    convert_element(child_el, depth + 1, out);
                }
            }
            _ => {}
        }
    }
}

fn convert_element(el: ElementRef<'_>, depth: usize, out: &mut Vec<SafeNode>) {
    let element = el.value();
    let name = element.name();
    if DROP_WITH_CONTENT.contains(&name) {
        return;
    }
    if depth > MAX_NESTING {
        for text in el.text() {
            push_text(out, text);
        }
        return;
    }

    let Some(tag) = Tag::from_name(name) else {
        // Unknown or disallowed wrapper: keep its content
        convert_children(el, depth, out);
        return;
    };

    let mut attrs = Vec::new();
    match tag {
        Tag::A => {
            let Some(href) = element.attr("href").filter(|h| is_safe_url(h, true)) else {
                convert_children(el, depth, out);
                return;
            };
            attrs.push(("href", href.to_string()));
            if let Some(title) = element.attr("title") {
                attrs.push(("title", title.to_string()));
            }
        }
        Tag::Img => {
            let Some(src) = element.attr("src").filter(|s| is_safe_url(s, false)) else {
                return;
            };
            attrs.push(("src", src.to_string()));
            for key in ["alt", "title"] {
                if let Some(value) = element.attr(key) {
                    attrs.push((key, value.to_string()));
                }
            }
            for key in ["width", "height"] {
                if let Some(value) = element.attr(key).filter(|v| is_dimension(v)) {
                    attrs.push((key, value.to_string()));
                }
            }
        }
        _ => {}
    }

    let mut children = Vec::new();
    if !tag.is_void() {
        convert_children(el, depth, &mut children);
    }
    out.push(SafeNode::Element {
        tag,
        attrs,
        children,
    });
}

fn push_text(out: &mut Vec<SafeNode>, text: &str) {
    if text.is_empty() {
        return;
    }
    match out.last_mut() {
        Some(SafeNode::Text(existing)) => existing.push_str(text),
        _ => out.push(SafeNode::Text(text.to_string())),
    }
}

/// `http`, `https`, relative references, and (for links) `mailto`.
fn is_safe_url(value: &str, allow_mailto: bool) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return false;
    }
    match Url::parse(value) {
        Ok(url) => match url.scheme() {
            "http" | "https" => true,
            "mailto" => allow_mailto,
            _ => false,
        },
        Err(url::ParseError::RelativeUrlWithoutBase) => true,
        Err(_) => false,
    }
}

fn is_dimension(value: &str) -> bool {
    let value = value.trim();
    let digits = value.strip_suffix('%').unwrap_or(value);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

// ============================================================================
// Normalization
// ============================================================================

/// Normalize a child list. `parent` is `None` for the fragment root.
fn normalize_children(nodes: Vec<SafeNode>, parent: Option<Tag>) -> Vec<SafeNode> {
    let mut out: Vec<SafeNode> = Vec::with_capacity(nodes.len());

    for node in nodes {
        match node {
            SafeNode::Text(text) => {
                let collapsed = collapse_whitespace(&text);
                push_text(&mut out, &collapsed);
            }
            SafeNode::Element {
                tag,
                attrs,
                children,
            } => {
                let children = normalize_children(children, Some(tag));
                if tag == Tag::P && needs_split(&children) {
                    for piece in regroup(children) {
                        out.push(piece);
                    }
                } else {
                    out.push(SafeNode::Element {
                        tag,
                        attrs,
                        children,
                    });
                }
            }
        }
    }

    let flow = parent.map_or(true, Tag::is_flow_container);
    if flow && mark_br_pairs(&out).iter().any(|m| *m) {
        out = regroup(out);
    }
    out
}

/// A paragraph must be split when it holds a `<br>` pair or block content.
fn needs_split(children: &[SafeNode]) -> bool {
    children.iter().any(|c| !c.is_inline()) || mark_br_pairs(children).iter().any(|m| *m)
}

/// Marks every node that is part of a `<br>` pair, including blank text
/// between the two breaks.
fn mark_br_pairs(nodes: &[SafeNode]) -> Vec<bool> {
    let mut marks = vec![false; nodes.len()];
    let mut i = 0;
    while i < nodes.len() {
        if nodes[i].is_tag(Tag::Br) {
            let mut j = i + 1;
            while j < nodes.len() && nodes[j].is_blank_text() {
                j += 1;
            }
            if j < nodes.len() && nodes[j].is_tag(Tag::Br) {
                marks[i..=j].iter_mut().for_each(|m| *m = true);
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }
    marks
}

/// Wrap runs of inline content in paragraphs. `<br>` pairs end a run and
/// block content is kept between runs. Runs that trim to nothing are dropped.
fn regroup(nodes: Vec<SafeNode>) -> Vec<SafeNode> {
    let marks = mark_br_pairs(&nodes);
    let mut out = Vec::new();
    let mut run = Vec::new();

    for (node, in_pair) in nodes.into_iter().zip(marks) {
        if in_pair {
            flush_run(&mut run, &mut out);
        } else if node.is_inline() {
            run.push(node);
        } else {
            flush_run(&mut run, &mut out);
            out.push(node);
        }
    }
    flush_run(&mut run, &mut out);
    out
}

fn flush_run(run: &mut Vec<SafeNode>, out: &mut Vec<SafeNode>) {
    let mut children = std::mem::take(run);
    trim_edges(&mut children);
    if !children.is_empty() {
        out.push(SafeNode::element(Tag::P, children));
    }
}

/// Trim leading/trailing whitespace of a node list's edge text nodes.
fn trim_edges(nodes: &mut Vec<SafeNode>) {
    while let Some(SafeNode::Text(text)) = nodes.first_mut() {
        let trimmed = text.trim_start_matches(|c: char| c.is_ascii_whitespace());
        if trimmed.is_empty() {
            nodes.remove(0);
        } else {
            *text = trimmed.to_string();
            break;
        }
    }
    while let Some(SafeNode::Text(text)) = nodes.last_mut() {
        let trimmed = text.trim_end_matches(|c: char| c.is_ascii_whitespace());
        if trimmed.is_empty() {
            nodes.pop();
        } else {
            *text = trimmed.to_string();
            break;
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
                in_space = true;
            }
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

// ============================================================================
// Serialization
// ============================================================================

fn emit(nodes: &[SafeNode], out: &mut String) {
    for node in nodes {
        match node {
            SafeNode::Text(text) => escape_into(text, false, out),
            SafeNode::Element {
                tag,
                attrs,
                children,
            } => {
                out.push('<');
                out.push_str(tag.name());
                for (key, value) in attrs {
                    out.push(' ');
                    out.push_str(key);
                    out.push_str("=\"");
                    escape_into(value, true, out);
                    out.push('"');
                }
                out.push('>');
                if !tag.is_void() {
                    emit(children, out);
                    out.push_str("</");
                    out.push_str(tag.name());
                    out.push('>');
                }
            }
        }
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\'' if attribute => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}
