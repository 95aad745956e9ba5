use quick_xml::events::{BytesDecl, Event};
use quick_xml::Reader;

use crate::error::RedlineError;

pub type NodeId = usize;

#[derive(Clone, Debug)]
pub struct XmlDecl {
    pub version: String,
    pub encoding: Option<String>,
    pub standalone: Option<String>,
}

#[derive(Clone, Debug)]
pub enum XmlNode {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    Pi(String),
    DocType(String),
}

#[derive(Clone, Debug)]
pub struct Element {
    pub name: String,
    /// Attribute values are raw, already-escaped XML bytes. They are written
    /// back verbatim so entity references such as `&#xD;&#xA;` in VML blobs
    /// survive the round-trip; escaping them again would corrupt the value.
    pub attrs: Vec<(String, String)>,
    pub children: Vec<NodeId>,
    pub self_closing: bool,
}

/// An XML part held as an arena: nodes live in a flat vector, children are
/// index lists. Node ids stay valid across every mutation, which is what
/// lets flat-index entries keep pointing at runs while the tree is edited.
#[derive(Clone, Debug)]
pub struct XmlTree {
    pub decl: Option<XmlDecl>,
    nodes: Vec<XmlNode>,
    /// Top-level nodes in order; exactly one of them is the root element.
    top: Vec<NodeId>,
}

impl XmlTree {
    pub fn parse(part: &str, bytes: &[u8]) -> Result<Self, RedlineError> {
        let err = |detail: String| RedlineError::MalformedXml {
            part: part.to_string(),
            detail,
        };

        let mut reader = Reader::from_reader(bytes);
        reader.config_mut().trim_text(false);

        let mut tree = XmlTree {
            decl: None,
            nodes: Vec::new(),
            top: Vec::new(),
        };
        let mut open: Vec<NodeId> = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let ev = reader
                .read_event_into(&mut buf)
                .map_err(|e| err(e.to_string()))?;
            match ev {
                Event::Eof => break,
                Event::Decl(d) => {
                    let version = bytes_to_string(d.version().map_err(|e| err(e.to_string()))?);
                    let encoding = d
                        .encoding()
                        .map(|r| r.map(bytes_to_string))
                        .transpose()
                        .unwrap_or(None);
                    let standalone = d
                        .standalone()
                        .map(|r| r.map(bytes_to_string))
                        .transpose()
                        .unwrap_or(None);
                    tree.decl = Some(XmlDecl {
                        version,
                        encoding,
                        standalone,
                    });
                }
                Event::Start(s) => {
                    let attrs = collect_attrs(&s).map_err(err)?;
                    let id = tree.add_node(XmlNode::Element(Element {
                        name: bytes_to_string(s.name().as_ref()),
                        attrs,
                        children: Vec::new(),
                        self_closing: false,
                    }));
                    tree.attach(&open, id);
                    open.push(id);
                }
                Event::End(_) => {
                    if open.pop().is_none() {
                        return Err(err("unbalanced end tag".to_string()));
                    }
                }
                Event::Empty(s) => {
                    let attrs = collect_attrs(&s).map_err(err)?;
                    let id = tree.add_node(XmlNode::Element(Element {
                        name: bytes_to_string(s.name().as_ref()),
                        attrs,
                        children: Vec::new(),
                        self_closing: true,
                    }));
                    tree.attach(&open, id);
                }
                Event::Text(t) => {
                    let txt = t.unescape().map_err(|e| err(e.to_string()))?.into_owned();
                    let id = tree.add_node(XmlNode::Text(txt));
                    tree.attach(&open, id);
                }
                Event::CData(t) => {
                    let id = tree.add_node(XmlNode::CData(bytes_to_string(t.into_inner())));
                    tree.attach(&open, id);
                }
                Event::Comment(t) => {
                    let id = tree.add_node(XmlNode::Comment(bytes_to_string(t.into_inner())));
                    tree.attach(&open, id);
                }
                Event::PI(t) => {
                    let target = bytes_to_string(t.target());
                    let content = bytes_to_string(t.content());
                    let id = tree.add_node(XmlNode::Pi(format!("{target}{content}")));
                    tree.attach(&open, id);
                }
                Event::DocType(t) => {
                    let id = tree.add_node(XmlNode::DocType(bytes_to_string(t.into_inner())));
                    tree.attach(&open, id);
                }
            }
        }
        if !open.is_empty() {
            return Err(err("unclosed element".to_string()));
        }
        tree.root_element()
            .ok_or_else(|| err("no root element".to_string()))?;
        Ok(tree)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, RedlineError> {
        let mut out: Vec<u8> = Vec::new();
        if let Some(decl) = &self.decl {
            let d = BytesDecl::new(
                decl.version.as_str(),
                decl.encoding.as_deref(),
                decl.standalone.as_deref(),
            );
            let mut writer = quick_xml::Writer::new(Vec::new());
            writer
                .write_event(Event::Decl(d))
                .map_err(|e| RedlineError::SerializationFailure(e.to_string()))?;
            out.extend_from_slice(&writer.into_inner());
        }
        for &id in &self.top {
            self.write_node(id, &mut out);
        }
        Ok(out)
    }

    fn write_node(&self, id: NodeId, out: &mut Vec<u8>) {
        match &self.nodes[id] {
            XmlNode::Element(el) => {
                out.push(b'<');
                out.extend_from_slice(el.name.as_bytes());
                for (k, v) in &el.attrs {
                    out.push(b' ');
                    out.extend_from_slice(k.as_bytes());
                    out.extend_from_slice(b"=\"");
                    // Raw attribute bytes: already escaped, never re-escape.
                    out.extend_from_slice(v.as_bytes());
                    out.push(b'"');
                }
                if el.children.is_empty() && el.self_closing {
                    out.extend_from_slice(b"/>");
                    return;
                }
                out.push(b'>');
                for &child in &el.children {
                    self.write_node(child, out);
                }
                out.extend_from_slice(b"</");
                out.extend_from_slice(el.name.as_bytes());
                out.push(b'>');
            }
            XmlNode::Text(text) => escape_text_into(out, text),
            XmlNode::CData(text) => {
                out.extend_from_slice(b"<![CDATA[");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"]]>");
            }
            XmlNode::Comment(text) => {
                out.extend_from_slice(b"<!--");
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"-->");
            }
            XmlNode::Pi(content) => {
                out.extend_from_slice(b"<?");
                out.extend_from_slice(content.as_bytes());
                out.extend_from_slice(b"?>");
            }
            XmlNode::DocType(text) => {
                out.extend_from_slice(b"<!DOCTYPE");
                out.extend_from_slice(text.as_bytes());
                out.push(b'>');
            }
        }
    }

    fn add_node(&mut self, node: XmlNode) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        id
    }

    fn attach(&mut self, open: &[NodeId], id: NodeId) {
        match open.last() {
            Some(&parent) => self.elem_unchecked_mut(parent).children.push(id),
            None => self.top.push(id),
        }
    }

    pub fn node(&self, id: NodeId) -> &XmlNode {
        &self.nodes[id]
    }

    pub fn elem(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id] {
            XmlNode::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn elem_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id] {
            XmlNode::Element(el) => Some(el),
            _ => None,
        }
    }

    fn elem_unchecked_mut(&mut self, id: NodeId) -> &mut Element {
        match &mut self.nodes[id] {
            XmlNode::Element(el) => el,
            _ => unreachable!("node {id} is not an element"),
        }
    }

    pub fn elem_name(&self, id: NodeId) -> Option<&str> {
        self.elem(id).map(|el| el.name.as_str())
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id] {
            XmlNode::Text(t) => Some(t.as_str()),
            _ => None,
        }
    }

    pub fn root_element(&self) -> Option<NodeId> {
        self.top
            .iter()
            .copied()
            .find(|&id| matches!(self.nodes[id], XmlNode::Element(_)))
    }

    pub fn new_element(&mut self, name: &str) -> NodeId {
        self.add_node(XmlNode::Element(Element {
            name: name.to_string(),
            attrs: Vec::new(),
            children: Vec::new(),
            self_closing: false,
        }))
    }

    /// A self-closing element, for markers like `w:commentRangeStart`.
    pub fn new_marker(&mut self, name: &str) -> NodeId {
        let id = self.new_element(name);
        self.elem_unchecked_mut(id).self_closing = true;
        id
    }

    pub fn new_text(&mut self, text: &str) -> NodeId {
        self.add_node(XmlNode::Text(text.to_string()))
    }

    pub fn push_child(&mut self, parent: NodeId, child: NodeId) {
        self.elem_unchecked_mut(parent).children.push(child);
    }

    pub fn child_pos(&self, parent: NodeId, child: NodeId) -> Option<usize> {
        self.elem(parent)?.children.iter().position(|&c| c == child)
    }

    pub fn insert_child_at(&mut self, parent: NodeId, pos: usize, child: NodeId) {
        self.elem_unchecked_mut(parent).children.insert(pos, child);
    }

    /// Inserts `node` as the immediate next sibling of `anchor`.
    pub fn insert_after(&mut self, parent: NodeId, anchor: NodeId, node: NodeId) -> bool {
        match self.child_pos(parent, anchor) {
            Some(pos) => {
                self.insert_child_at(parent, pos + 1, node);
                true
            }
            None => false,
        }
    }

    /// Inserts `node` as the immediate previous sibling of `anchor`.
    pub fn insert_before(&mut self, parent: NodeId, anchor: NodeId, node: NodeId) -> bool {
        match self.child_pos(parent, anchor) {
            Some(pos) => {
                self.insert_child_at(parent, pos, node);
                true
            }
            None => false,
        }
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        match self.child_pos(parent, child) {
            Some(pos) => {
                self.elem_unchecked_mut(parent).children.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Swaps `old` for `new` at the same position under `parent`.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) -> bool {
        match self.child_pos(parent, old) {
            Some(pos) => {
                self.elem_unchecked_mut(parent).children[pos] = new;
                true
            }
            None => false,
        }
    }

    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let node = self.nodes[id].clone();
        match node {
            XmlNode::Element(mut el) => {
                let children = std::mem::take(&mut el.children);
                let clone = self.add_node(XmlNode::Element(el));
                for child in children {
                    let child_clone = self.deep_clone(child);
                    self.elem_unchecked_mut(clone).children.push(child_clone);
                }
                clone
            }
            other => self.add_node(other),
        }
    }

    pub fn first_child_named(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.elem(id)?
            .children
            .iter()
            .copied()
            .find(|&c| self.elem_name(c) == Some(name))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.elem(id).map(|el| el.children.as_slice()).unwrap_or(&[])
    }

    pub fn get_attr(&self, id: NodeId, key: &str) -> Option<&str> {
        self.elem(id)?
            .attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Sets or adds an attribute. `value` is escaped on the way in because
    /// the attribute store holds raw XML bytes.
    pub fn set_attr(&mut self, id: NodeId, key: &str, value: &str) {
        let escaped = escape_attr(value);
        let el = self.elem_unchecked_mut(id);
        for (k, v) in el.attrs.iter_mut() {
            if k == key {
                *v = escaped;
                return;
            }
        }
        el.attrs.push((key.to_string(), escaped));
    }

    /// Concatenated content of the direct Text children of `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(id) {
            if let Some(t) = self.text(child) {
                out.push_str(t);
            }
        }
        out
    }

    /// Replaces the children of `id` with a single text node.
    pub fn set_text_content(&mut self, id: NodeId, text: &str) {
        let text_node = self.new_text(text);
        let el = self.elem_unchecked_mut(id);
        el.children.clear();
        el.children.push(text_node);
    }
}

fn collect_attrs(s: &quick_xml::events::BytesStart<'_>) -> Result<Vec<(String, String)>, String> {
    let mut attrs: Vec<(String, String)> = Vec::new();
    for a in s.attributes().with_checks(false) {
        let a = a.map_err(|e| e.to_string())?;
        // Raw attribute bytes, not unescaped; see `Element::attrs`.
        attrs.push((
            bytes_to_string(a.key.as_ref()),
            bytes_to_string(a.value.as_ref()),
        ));
    }
    Ok(attrs)
}

fn bytes_to_string(bytes: impl AsRef<[u8]>) -> String {
    String::from_utf8_lossy(bytes.as_ref()).into_owned()
}

fn escape_text_into(out: &mut Vec<u8>, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.extend_from_slice(b"&amp;"),
            '<' => out.extend_from_slice(b"&lt;"),
            '>' => out.extend_from_slice(b"&gt;"),
            _ => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
}

pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
