//! Flat markup token stream for structured (HTML) files.
//!
//! This is not a conforming HTML parser. It splits the input into tags, text,
//! comments and declarations, keeping enough structure for tasks to inspect
//! and rewrite elements and attributes, and serializes back to markup.

use std::fmt::Write;

/// Elements whose content is never parsed as markup.
const RAW_TEXT: &[&str] = &["script", "style", "textarea", "title"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    /// Raw attribute value, `None` for boolean attributes.
    pub value: Option<String>,
}

/// An opening (or self-closing) tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<Attribute>,
    pub self_closing: bool,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            self_closing: false,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|attr| attr.name.eq_ignore_ascii_case(name))
            .and_then(|attr| attr.value.as_deref())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.iter().any(|attr| attr.name.eq_ignore_ascii_case(name))
    }

    /// Sets an attribute, replacing the existing value if there is one.
    pub fn set_attr(&mut self, name: &str, value: Option<String>) {
        match self.attrs.iter_mut().find(|attr| attr.name.eq_ignore_ascii_case(name)) {
            Some(attr) => attr.value = value,
            None => self.attrs.push(Attribute {
                name: name.to_string(),
                value,
            }),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<Attribute> {
        let index = self
            .attrs
            .iter()
            .position(|attr| attr.name.eq_ignore_ascii_case(name))?;
        Some(self.attrs.remove(index))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// `<!...>` declaration, holding everything between `<!` and `>`.
    Doctype(String),
    Comment(String),
    Text(String),
    Element(Element),
    EndTag(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }

    fn write_to(&self, out: &mut String) {
        match self {
            Node::Doctype(decl) => {
                let _ = write!(out, "<!{decl}>");
            }
            Node::Comment(text) => {
                let _ = write!(out, "<!--{text}-->");
            }
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                out.push('<');
                out.push_str(&element.name);
                for attr in &element.attrs {
                    out.push(' ');
                    out.push_str(&attr.name);
                    if let Some(value) = &attr.value {
                        let _ = write!(out, "=\"{}\"", value.replace('"', "&quot;"));
                    }
                }
                out.push_str(if element.self_closing { "/>" } else { ">" });
            }
            Node::EndTag(name) => {
                let _ = write!(out, "</{name}>");
            }
        }
    }
}

/// A tokenized markup document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    pub fn parse(html: &str) -> Self {
        Tokenizer::new(html).run()
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            node.write_to(&mut out);
        }
        out
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut Vec<Node> {
        &mut self.nodes
    }

    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }

    /// Opening tags with the given name.
    pub fn elements<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.nodes
            .iter()
            .filter_map(Node::as_element)
            .filter(move |element| element.name == name)
    }
}

struct Tokenizer<'a> {
    html: &'a str,
    pos: usize,
    text_start: usize,
    nodes: Vec<Node>,
}

impl<'a> Tokenizer<'a> {
    fn new(html: &'a str) -> Self {
        Self {
            html,
            pos: 0,
            text_start: 0,
            nodes: Vec::new(),
        }
    }

    fn run(mut self) -> Document {
        let html = self.html;
        let bytes = html.as_bytes();
        while self.pos < bytes.len() {
            if bytes[self.pos] != b'<' {
                self.pos += 1;
                continue;
            }

            let rest = &html[self.pos..];
            let next = bytes.get(self.pos + 1).copied().unwrap_or_default();
            if rest.starts_with("<!--") {
                self.flush_text();
                let body = &rest[4..];
                let (text, len) = match body.find("-->") {
                    Some(end) => (&body[..end], 4 + end + 3),
                    None => (body, rest.len()),
                };
                self.push(Node::Comment(text.to_string()), len);
            } else if next == b'!' {
                self.flush_text();
                let (decl, len) = match rest.find('>') {
                    Some(end) => (&rest[2..end], end + 1),
                    None => (&rest[2..], rest.len()),
                };
                self.push(Node::Doctype(decl.to_string()), len);
            } else if next == b'/' && bytes.get(self.pos + 2).is_some_and(u8::is_ascii_alphabetic) {
                let Some(end) = rest.find('>') else { break };
                self.flush_text();
                let name = rest[2..end].trim().to_ascii_lowercase();
                self.push(Node::EndTag(name), end + 1);
            } else if next.is_ascii_alphabetic() {
                let Some((element, len)) = parse_tag(rest) else { break };
                self.flush_text();
                let raw = !element.self_closing && RAW_TEXT.contains(&element.name.as_str());
                let name = element.name.clone();
                self.push(Node::Element(element), len);
                if raw {
                    self.skip_raw_text(&name);
                }
            } else {
                self.pos += 1;
            }
        }

        self.pos = html.len();
        self.flush_text();
        Document { nodes: self.nodes }
    }

    fn push(&mut self, node: Node, len: usize) {
        self.nodes.push(node);
        self.pos += len;
        self.text_start = self.pos;
    }

    fn flush_text(&mut self) {
        if self.text_start < self.pos {
            let text = &self.html[self.text_start..self.pos];
            self.nodes.push(Node::Text(text.to_string()));
        }
        self.text_start = self.pos;
    }

    /// Moves past the content of a raw text element, up to its end tag.
    fn skip_raw_text(&mut self, name: &str) {
        let rest = self.html[self.pos..].to_ascii_lowercase();
        let end = rest
            .find(&format!("</{name}"))
            .unwrap_or(rest.len());
        self.pos += end;
        self.flush_text();
    }
}

/// Parses an opening tag at the start of `s`, returning the element and the
/// number of bytes consumed. `None` when the tag is never closed.
fn parse_tag(s: &str) -> Option<(Element, usize)> {
    let b = s.as_bytes();
    let is_space = |i: usize| b[i].is_ascii_whitespace();

    let mut i = 1;
    while i < b.len() && !is_space(i) && b[i] != b'>' && b[i] != b'/' {
        i += 1;
    }
    let mut element = Element::new(s[1..i].to_ascii_lowercase());

    loop {
        while i < b.len() && is_space(i) {
            i += 1;
        }
        match b.get(i)? {
            b'>' => return Some((element, i + 1)),
            b'/' if b.get(i + 1) == Some(&b'>') => {
                element.self_closing = true;
                return Some((element, i + 2));
            }
            b'/' => {
                i += 1;
                continue;
            }
            _ => {}
        }

        let start = i;
        while i < b.len() && !is_space(i) && b[i] != b'=' && b[i] != b'>' && !(b[i] == b'/' && b.get(i + 1) == Some(&b'>')) {
            i += 1;
        }
        if start == i {
            // stray `=`
            i += 1;
            continue;
        }
        let name = s[start..i].to_ascii_lowercase();

        while i < b.len() && is_space(i) {
            i += 1;
        }
        let mut value = None;
        if b.get(i) == Some(&b'=') {
            i += 1;
            while i < b.len() && is_space(i) {
                i += 1;
            }
            match b.get(i)? {
                quote @ (b'"' | b'\'') => {
                    let end = i + 1 + s[i + 1..].find(*quote as char)?;
                    value = Some(s[i + 1..end].to_string());
                    i = end + 1;
                }
                _ => {
                    let start = i;
                    while i < b.len() && !is_space(i) && b[i] != b'>' {
                        i += 1;
                    }
                    value = Some(s[start..i].to_string());
                }
            }
        }

        element.attrs.push(Attribute { name, value });
    }
}
