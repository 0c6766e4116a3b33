//! Namespace-aware XML document tree
//!
//! Built once from a descriptor file with quick-xml's `NsReader`, then
//! queried read-only through [`super::xpath::XPathContext`]. Every element and
//! attribute carries its resolved namespace URI so path expressions can match
//! on URI rather than on whatever prefix the producer happened to use.

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Index of the synthetic document node that owns the root element
pub const DOCUMENT_NODE: usize = 0;

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("cannot open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("XML error at byte {position}: {source}")]
    Xml {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("malformed attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("unknown namespace prefix '{0}'")]
    UnknownPrefix(String),

    #[error("document has no root element")]
    NoRoot,

    #[error("second top-level element <{0}>")]
    MultipleRoots(String),

    #[error("unexpected end of document inside <{0}>")]
    Truncated(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub namespace: Option<String>,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Child {
    Element(usize),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub namespace: Option<String>,
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Child>,
}

/// A node reachable by a path expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Element(usize),
    Text { element: usize, child: usize },
    Attribute { element: usize, index: usize },
}

/// Parsed XML document. Element 0 is the document node.
#[derive(Debug)]
pub struct Document {
    elements: Vec<Element>,
}

impl Document {
    /// Parse an XML file from disk
    pub fn parse_file(path: &Path) -> Result<Self, DocumentError> {
        let file = File::open(path).map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_reader(BufReader::new(file))
    }

    /// Parse XML from any buffered reader
    pub fn parse_reader<R: BufRead>(input: R) -> Result<Self, DocumentError> {
        let mut reader = NsReader::from_reader(input);
        let mut elements = vec![Element {
            namespace: None,
            name: String::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }];
        let mut stack: Vec<usize> = vec![DOCUMENT_NODE];
        let mut buf = Vec::new();

        loop {
            let (ns, event) = match reader.read_resolved_event_into(&mut buf) {
                Ok(resolved) => resolved,
                Err(source) => {
                    return Err(DocumentError::Xml {
                        position: reader.buffer_position() as u64,
                        source,
                    })
                }
            };
            let namespace = owned_namespace(ns)?;

            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let is_empty = matches!(event, Event::Empty(_));
                    let element = Element {
                        namespace,
                        name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                        attributes: read_attributes(&reader, e)?,
                        children: Vec::new(),
                    };

                    let parent = *stack.last().unwrap_or(&DOCUMENT_NODE);
                    if parent == DOCUMENT_NODE && has_root(&elements) {
                        return Err(DocumentError::MultipleRoots(element.name));
                    }

                    let id = elements.len();
                    elements.push(element);
                    elements[parent].children.push(Child::Element(id));
                    if !is_empty {
                        stack.push(id);
                    }
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(ref t) => {
                    let text = t.unescape().map_err(|source| DocumentError::Xml {
                        position: reader.buffer_position() as u64,
                        source,
                    })?;
                    push_text(&mut elements, &stack, &text);
                }
                Event::CData(ref c) => {
                    let text = String::from_utf8_lossy(c).into_owned();
                    push_text(&mut elements, &stack, &text);
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if stack.len() > 1 {
            let open = stack.last().copied().unwrap_or(DOCUMENT_NODE);
            return Err(DocumentError::Truncated(elements[open].name.clone()));
        }
        if !has_root(&elements) {
            return Err(DocumentError::NoRoot);
        }

        Ok(Self { elements })
    }

    pub fn element(&self, id: usize) -> &Element {
        &self.elements[id]
    }

    /// The document node, parent of the root element
    pub fn document_node(&self) -> Node {
        Node::Element(DOCUMENT_NODE)
    }

    /// XPath string-value of a node: concatenated descendant text for
    /// elements, the literal value for text and attribute nodes
    pub fn string_value(&self, node: Node) -> String {
        match node {
            Node::Element(id) => {
                let mut out = String::new();
                self.collect_text(id, &mut out);
                out
            }
            Node::Text { element, child } => match &self.elements[element].children[child] {
                Child::Text(text) => text.clone(),
                Child::Element(_) => String::new(),
            },
            Node::Attribute { element, index } => {
                self.elements[element].attributes[index].value.clone()
            }
        }
    }

    fn collect_text(&self, id: usize, out: &mut String) {
        for child in &self.elements[id].children {
            match child {
                Child::Text(text) => out.push_str(text),
                Child::Element(child_id) => self.collect_text(*child_id, out),
            }
        }
    }
}

fn has_root(elements: &[Element]) -> bool {
    elements[DOCUMENT_NODE]
        .children
        .iter()
        .any(|c| matches!(c, Child::Element(_)))
}

fn push_text(elements: &mut [Element], stack: &[usize], text: &str) {
    let Some(&parent) = stack.last() else {
        return;
    };
    // Whitespace outside the root and between elements carries nothing
    if parent == DOCUMENT_NODE || text.trim().is_empty() {
        return;
    }
    elements[parent].children.push(Child::Text(text.to_string()));
}

fn owned_namespace(ns: ResolveResult) -> Result<Option<String>, DocumentError> {
    match ns {
        ResolveResult::Bound(ns) => Ok(Some(String::from_utf8_lossy(ns.as_ref()).into_owned())),
        ResolveResult::Unbound => Ok(None),
        ResolveResult::Unknown(prefix) => Err(DocumentError::UnknownPrefix(
            String::from_utf8_lossy(&prefix).into_owned(),
        )),
    }
}

fn read_attributes<R>(reader: &NsReader<R>, start: &BytesStart) -> Result<Vec<Attribute>, DocumentError> {
    let mut attributes = Vec::new();

    for attr in start.attributes() {
        let attr = attr?;
        let key = attr.key.as_ref();
        // Namespace declarations are consumed by the reader itself
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }

        let (ns, local) = reader.resolve_attribute(attr.key);
        let namespace = owned_namespace(ns)?;
        let value = attr.unescape_value().map_err(|source| DocumentError::Xml {
            position: reader.buffer_position() as u64,
            source,
        })?;

        attributes.push(Attribute {
            namespace,
            name: String::from_utf8_lossy(local.as_ref()).into_owned(),
            value: value.into_owned(),
        });
    }

    Ok(attributes)
}
