//! A small namespace-aware element tree on top of `quick-xml`.
//!
//! Mission descriptors are rewritten by editing a few text nodes and cloning
//! whole subtrees, so the tree keeps everything it reads: qualified names
//! with their original prefixes, attribute order, comments, CDATA sections
//! and processing instructions. Namespaces are resolved once after parsing
//! and stored on each element, so lookups work on `(namespace, local name)`
//! regardless of the prefix a template author picked.

use std::borrow::Cow;

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed XML at byte {position}: {reason}")]
    Syntax { position: u64, reason: String },
    #[error("document has no root element")]
    NoRoot,
    #[error("unexpected closing tag </{0}>")]
    Unbalanced(String),
    #[error("unsupported text encoding: {0}")]
    Encoding(String),
    #[error("cannot serialize document: {0}")]
    Write(String),
}

/// Turns raw document bytes into text, honouring UTF-8 and UTF-16 byte
/// order marks. Without a BOM the bytes must be UTF-8.
pub fn decode_document(bytes: &[u8]) -> Result<Cow<'_, str>, XmlError> {
    match bytes {
        [0xEF, 0xBB, 0xBF, rest @ ..] => utf8(rest),
        [0xFF, 0xFE, rest @ ..] => utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => utf16(rest, u16::from_be_bytes),
        _ => utf8(bytes),
    }
}

fn utf8(bytes: &[u8]) -> Result<Cow<'_, str>, XmlError> {
    std::str::from_utf8(bytes)
        .map(Cow::Borrowed)
        .map_err(|e| XmlError::Encoding(e.to_string()))
}

fn utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<Cow<'static, str>, XmlError> {
    if bytes.len() % 2 != 0 {
        return Err(XmlError::Encoding("odd length UTF-16 document".to_string()));
    }
    let units = bytes.chunks_exact(2).map(|c| unit([c[0], c[1]]));
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map(Cow::Owned)
        .map_err(|e| XmlError::Encoding(e.to_string()))
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
}

impl Node {
    fn is_blank_text(&self) -> bool {
        matches!(self, Node::Text(t) if t.trim().is_empty())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    name: String,
    namespace: Option<String>,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    /// Creates an element with a qualified `name` already bound to `namespace`.
    pub fn new(name: impl Into<String>, namespace: Option<&str>) -> Self {
        Element {
            name: name.into(),
            namespace: namespace.map(str::to_string),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Creates a sibling-style element: same prefix and namespace as `self`.
    pub fn new_like(&self, local_name: &str) -> Element {
        let name = match self.prefix() {
            Some(prefix) => format!("{}:{}", prefix, local_name),
            None => local_name.to_string(),
        };
        Element::new(name, self.namespace())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    pub fn prefix(&self) -> Option<&str> {
        self.name.split_once(':').map(|(prefix, _)| prefix)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn is(&self, namespace: &str, local_name: &str) -> bool {
        self.namespace() == Some(namespace) && self.local_name() == local_name
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Vec<(String, String)> {
        &mut self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }

    pub fn push(&mut self, node: Node) {
        self.children.push(node);
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    pub fn find_child_mut(&mut self, namespace: &str, local_name: &str) -> Option<&mut Element> {
        self.child_elements_mut()
            .find(|e| e.is(namespace, local_name))
    }

    /// First matching descendant in document order, `self` excluded.
    pub fn find(&self, namespace: &str, local_name: &str) -> Option<&Element> {
        self.find_where(&|e| e.is(namespace, local_name))
    }

    pub fn find_mut(&mut self, namespace: &str, local_name: &str) -> Option<&mut Element> {
        self.find_where_mut(&|e| e.is(namespace, local_name))
    }

    pub fn find_where(&self, pred: &dyn Fn(&Element) -> bool) -> Option<&Element> {
        for child in self.child_elements() {
            if pred(child) {
                return Some(child);
            }
            if let Some(found) = child.find_where(pred) {
                return Some(found);
            }
        }
        None
    }

    pub fn find_where_mut(&mut self, pred: &dyn Fn(&Element) -> bool) -> Option<&mut Element> {
        for child in self.child_elements_mut() {
            if pred(child) {
                return Some(child);
            }
            if let Some(found) = child.find_where_mut(pred) {
                return Some(found);
            }
        }
        None
    }

    /// Concatenated text of all descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) | Node::CData(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
                _ => {}
            }
        }
    }

    /// Replaces all children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children = vec![Node::Text(text.into())];
    }

    /// Visits `self` and every descendant element, parents first.
    pub fn walk_mut(&mut self, f: &mut dyn FnMut(&mut Element)) {
        f(self);
        for child in self.child_elements_mut() {
            child.walk_mut(f);
        }
    }

    /// Blank text in front of the first element child, if any.
    pub fn child_indent(&self) -> Option<String> {
        self.children.windows(2).find_map(|w| match w {
            [Node::Text(t), Node::Element(_)] if t.trim().is_empty() => Some(t.clone()),
            _ => None,
        })
    }

    /// Appends `element` after the last element child, keeping the
    /// container's trailing whitespace last.
    pub fn append_indented(&mut self, element: Element, indent: Option<&str>) {
        let at = match self.children.last() {
            Some(last) if last.is_blank_text() => self.children.len() - 1,
            _ => self.children.len(),
        };
        let mut nodes = Vec::with_capacity(2);
        if let Some(indent) = indent {
            nodes.push(Node::Text(indent.to_string()));
        }
        nodes.push(Node::Element(element));
        self.children.splice(at..at, nodes);
    }

    /// Removes the child elements matching `keep == false`, together with
    /// the blank text directly in front of each.
    pub fn retain_elements(&mut self, mut keep: impl FnMut(&Element) -> bool) {
        let mut out: Vec<Node> = Vec::with_capacity(self.children.len());
        for node in self.children.drain(..) {
            let remove = matches!(&node, Node::Element(e) if !keep(e));
            if !remove {
                out.push(node);
            } else if out.last().is_some_and(Node::is_blank_text) {
                out.pop();
            }
        }
        self.children = out;
    }

    fn resolve_namespaces(&mut self, parent: &[(String, String)]) {
        let mut scope: Vec<(String, String)> = parent.to_vec();
        for (key, value) in &self.attributes {
            if key == "xmlns" {
                scope.push((String::new(), value.clone()));
            } else if let Some(prefix) = key.strip_prefix("xmlns:") {
                scope.push((prefix.to_string(), value.clone()));
            }
        }
        let prefix = self.prefix().unwrap_or("");
        self.namespace = scope
            .iter()
            .rev()
            .find(|(p, _)| p == prefix)
            .map(|(_, uri)| uri.clone())
            .filter(|uri| !uri.is_empty());
        for child in self.child_elements_mut() {
            child.resolve_namespaces(&scope);
        }
    }

    fn from_start(start: &BytesStart<'_>, position: u64) -> Result<Element, XmlError> {
        let syntax = |reason: String| XmlError::Syntax { position, reason };
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| syntax(e.to_string()))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|e| syntax(e.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Element {
            name,
            namespace: None,
            attributes,
            children: Vec::new(),
        })
    }

    fn write(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), XmlError> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }
        if self.children.is_empty() {
            return emit(writer, Event::Empty(start));
        }
        emit(writer, Event::Start(start))?;
        for child in &self.children {
            match child {
                Node::Element(e) => e.write(writer)?,
                other => write_leaf(writer, other)?,
            }
        }
        emit(writer, Event::End(BytesEnd::new(self.name.as_str())))
    }
}

/// Local part of a qualified name.
pub fn local_part(name: &str) -> &str {
    name.split_once(':').map_or(name, |(_, local)| local)
}

#[derive(Clone, Debug, PartialEq)]
struct Declaration {
    version: String,
    standalone: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    declaration: Option<Declaration>,
    doctype: Option<String>,
    prolog: Vec<Node>,
    root: Element,
    epilog: Vec<Node>,
}

impl Document {
    pub fn parse(text: &str) -> Result<Document, XmlError> {
        let mut reader = Reader::from_str(text);
        let mut declaration = None;
        let mut doctype = None;
        let mut prolog = Vec::new();
        let mut epilog = Vec::new();
        let mut root: Option<Element> = None;
        let mut stack: Vec<Element> = Vec::new();

        loop {
            let position = reader.buffer_position() as u64;
            let event = reader.read_event().map_err(|e| XmlError::Syntax {
                position,
                reason: e.to_string(),
            })?;
            let syntax = |reason: String| XmlError::Syntax { position, reason };
            let node = match event {
                Event::Start(start) => {
                    stack.push(Element::from_start(&start, position)?);
                    continue;
                }
                Event::Empty(start) => Node::Element(Element::from_start(&start, position)?),
                Event::End(end) => match stack.pop() {
                    Some(element) => Node::Element(element),
                    None => {
                        return Err(XmlError::Unbalanced(
                            String::from_utf8_lossy(end.name().as_ref()).into_owned(),
                        ));
                    }
                },
                Event::Text(t) => Node::Text(t.unescape().map_err(|e| syntax(e.to_string()))?.into_owned()),
                Event::CData(t) => Node::CData(String::from_utf8_lossy(&t).into_owned()),
                Event::Comment(t) => Node::Comment(String::from_utf8_lossy(&t).into_owned()),
                Event::PI(t) => Node::ProcessingInstruction(String::from_utf8_lossy(&t).into_owned()),
                Event::Decl(decl) => {
                    let version = decl
                        .version()
                        .map(|v| String::from_utf8_lossy(&v).into_owned())
                        .unwrap_or_else(|_| "1.0".to_string());
                    let standalone = decl
                        .standalone()
                        .and_then(|s| s.ok())
                        .map(|s| String::from_utf8_lossy(&s).into_owned());
                    declaration = Some(Declaration {
                        version,
                        standalone,
                    });
                    continue;
                }
                Event::DocType(t) => {
                    doctype = Some(String::from_utf8_lossy(&t).into_owned());
                    continue;
                }
                Event::Eof => break,
            };

            if let Some(parent) = stack.last_mut() {
                parent.push(node);
            } else if node.is_blank_text() {
                // whitespace between top-level nodes is regenerated on write
            } else if let Node::Element(element) = node {
                if root.is_some() {
                    return Err(syntax("more than one root element".to_string()));
                }
                root = Some(element);
            } else if root.is_some() {
                epilog.push(node);
            } else {
                prolog.push(node);
            }
        }

        if let Some(open) = stack.last() {
            return Err(XmlError::Syntax {
                position: reader.buffer_position() as u64,
                reason: format!("unclosed element <{}>", open.name()),
            });
        }
        let mut root = root.ok_or(XmlError::NoRoot)?;
        root.resolve_namespaces(&[("xml".to_string(), XML_NAMESPACE.to_string())]);
        Ok(Document {
            declaration,
            doctype,
            prolog,
            root,
            epilog,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Document, XmlError> {
        Document::parse(&decode_document(bytes)?)
    }

    /// A document with an XML declaration and the given root.
    pub fn with_root(root: Element) -> Document {
        Document {
            declaration: Some(Declaration {
                version: "1.0".to_string(),
                standalone: None,
            }),
            doctype: None,
            prolog: Vec::new(),
            root,
            epilog: Vec::new(),
        }
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    /// First element matching in document order, root included.
    pub fn find(&self, namespace: &str, local_name: &str) -> Option<&Element> {
        if self.root.is(namespace, local_name) {
            return Some(&self.root);
        }
        self.root.find(namespace, local_name)
    }

    pub fn find_mut(&mut self, namespace: &str, local_name: &str) -> Option<&mut Element> {
        if self.root.is(namespace, local_name) {
            return Some(&mut self.root);
        }
        self.root.find_mut(namespace, local_name)
    }

    /// Serializes as UTF-8, whatever the source encoding was.
    pub fn to_bytes(&self) -> Result<Vec<u8>, XmlError> {
        self.serialize(Writer::new(Vec::new()), false)
    }

    /// Serializes with two-space indentation. Meant for generated documents
    /// that carry no whitespace text of their own.
    pub fn to_pretty_bytes(&self) -> Result<Vec<u8>, XmlError> {
        self.serialize(Writer::new_with_indent(Vec::new(), b' ', 2), true)
    }

    /// The indenting writer breaks lines between top-level nodes itself.
    fn serialize(&self, mut writer: Writer<Vec<u8>>, indented: bool) -> Result<Vec<u8>, XmlError> {
        let separate = |writer: &mut Writer<Vec<u8>>| {
            if !indented {
                writer.get_mut().push(b'\n');
            }
        };
        if let Some(decl) = &self.declaration {
            emit(
                &mut writer,
                Event::Decl(BytesDecl::new(
                    &decl.version,
                    Some("UTF-8"),
                    decl.standalone.as_deref(),
                )),
            )?;
            separate(&mut writer);
        }
        if let Some(doctype) = &self.doctype {
            emit(&mut writer, Event::DocType(BytesText::from_escaped(doctype.as_str())))?;
            separate(&mut writer);
        }
        for node in &self.prolog {
            write_leaf(&mut writer, node)?;
            separate(&mut writer);
        }
        self.root.write(&mut writer)?;
        for node in &self.epilog {
            separate(&mut writer);
            write_leaf(&mut writer, node)?;
        }
        writer.get_mut().push(b'\n');
        Ok(writer.into_inner())
    }
}

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), XmlError> {
    writer
        .write_event(event)
        .map_err(|e| XmlError::Write(e.to_string()))
}

fn write_leaf(writer: &mut Writer<Vec<u8>>, node: &Node) -> Result<(), XmlError> {
    match node {
        Node::Element(e) => e.write(writer),
        Node::Text(t) => emit(writer, Event::Text(BytesText::new(t))),
        Node::CData(t) => emit(writer, Event::CData(BytesCData::new(t.as_str()))),
        Node::Comment(t) => emit(writer, Event::Comment(BytesText::from_escaped(t.as_str()))),
        Node::ProcessingInstruction(t) => emit(writer, Event::PI(BytesPI::new(t.as_str()))),
    }
}
