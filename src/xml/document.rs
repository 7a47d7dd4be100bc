//! Owned XML tree built from quick-xml events
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Element and
//! attribute names are namespace-resolved at parse time so every lookup can be
//! qualified by namespace URI rather than by whatever prefix the sender chose.

use std::collections::BTreeMap;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{escape_attr, escape_text};
use crate::error::{Result, SamlError};
use crate::NS_XML;

const DOCUMENT: NodeId = NodeId(0);

/// Deepest element nesting [`ParsedDocument::parse`] accepts, the root being depth 1
///
/// Protocol messages stay far below this. Serialization and canonicalization
/// recurse once per level, so the cap also bounds their stack use.
pub const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

/// Namespace-resolved name of an element or attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
	pub prefix: Option<String>,
	pub local: String,
	pub namespace: Option<String>,
}

impl QName {
	pub fn new(prefix: Option<&str>, local: &str, namespace: Option<&str>) -> Self {
		Self {
			prefix: prefix.map(str::to_string),
			local: local.to_string(),
			namespace: namespace.map(str::to_string),
		}
	}

	/// The name as written in the document, `prefix:local` or `local`
	pub fn qualified(&self) -> String {
		match &self.prefix {
			Some(prefix) => format!("{}:{}", prefix, self.local),
			None => self.local.clone(),
		}
	}

	pub fn is(&self, namespace: &str, local: &str) -> bool {
		self.local == local && self.namespace.as_deref() == Some(namespace)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
	pub name: QName,
	pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
	pub name: QName,
	pub attributes: Vec<Attribute>,
	/// Declarations made on this element, `""` is the default namespace
	pub namespaces: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
	Document,
	Element(Element),
	Text(String),
	Comment(String),
	ProcessingInstruction { target: String, data: String },
}

#[derive(Debug, Clone)]
struct Node {
	kind: NodeKind,
	parent: Option<NodeId>,
	children: Vec<NodeId>,
}

/// A parsed XML document
///
/// Owned exclusively by whoever parsed it and freed when dropped. Only the
/// signing step mutates it after parsing.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
	nodes: Vec<Node>,
}

impl ParsedDocument {
	fn empty() -> Self {
		Self {
			nodes: vec![Node {
				kind: NodeKind::Document,
				parent: None,
				children: Vec::new(),
			}],
		}
	}

	pub fn parse(data: &[u8]) -> Result<Self> {
		let mut reader = Reader::from_reader(data);
		let mut doc = Self::empty();
		let mut open: Vec<NodeId> = vec![DOCUMENT];
		let mut buf = Vec::new();

		loop {
			let parent = *open.last().unwrap_or(&DOCUMENT);

			match reader.read_event_into(&mut buf)? {
				Event::Start(e) => {
					check_depth(open.len())?;
					let id = doc.open_element(parent, &e)?;
					open.push(id);
				}
				Event::Empty(e) => {
					check_depth(open.len())?;
					doc.open_element(parent, &e)?;
				}
				Event::End(_) => {
					if open.len() < 2 {
						return Err(SamlError::MalformedDocument("Unbalanced end tag".to_string()));
					}
					open.pop();
				}
				Event::Text(e) => {
					let raw = std::str::from_utf8(&e).map_err(utf8_error)?;
					let text = unescape(&normalize_newlines(raw))?;
					if parent == DOCUMENT {
						if !text.trim().is_empty() {
							return Err(SamlError::MalformedDocument("Text outside of the root element".to_string()));
						}
					} else {
						doc.append_text(parent, &text);
					}
				}
				Event::CData(e) => {
					let text = std::str::from_utf8(&e).map_err(utf8_error)?;
					if parent == DOCUMENT {
						return Err(SamlError::MalformedDocument("CDATA outside of the root element".to_string()));
					}
					doc.append_text(parent, &normalize_newlines(text));
				}
				Event::Comment(e) => {
					let text = std::str::from_utf8(&e).map_err(utf8_error)?;
					let id = doc.push(NodeKind::Comment(normalize_newlines(text)));
					doc.append_child(parent, id);
				}
				Event::PI(e) => {
					let raw = std::str::from_utf8(&e).map_err(utf8_error)?;
					let (target, data) = raw.split_once(char::is_whitespace).unwrap_or((raw, ""));
					let id = doc.push(NodeKind::ProcessingInstruction {
						target: target.to_string(),
						data: data.trim_start().to_string(),
					});
					doc.append_child(parent, id);
				}
				Event::DocType(_) => {
					return Err(SamlError::MalformedDocument("DOCTYPE declarations are not allowed".to_string()));
				}
				Event::Eof => break,
				_ => {}
			}
			buf.clear();
		}

		if open.len() != 1 {
			return Err(SamlError::MalformedDocument("Unclosed element at end of document".to_string()));
		}

		let roots = doc.child_elements(DOCUMENT).count();
		if roots != 1 {
			return Err(SamlError::MalformedDocument(format!("Expected exactly one root element, found {}", roots)));
		}

		Ok(doc)
	}

	pub fn parse_str(xml: &str) -> Result<Self> {
		Self::parse(xml.as_bytes())
	}

	pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		let data = std::fs::read(path)
			.map_err(|e| SamlError::MalformedDocument(format!("Could not read {}: {}", path.display(), e)))?;
		Self::parse(&data)
	}

	fn open_element(&mut self, parent: NodeId, start: &BytesStart<'_>) -> Result<NodeId> {
		let qname = std::str::from_utf8(start.name().as_ref()).map_err(utf8_error)?.to_string();

		let mut namespaces = Vec::new();
		let mut raw_attributes = Vec::new();
		for attr in start.attributes() {
			let attr = attr?;
			let key = std::str::from_utf8(attr.key.as_ref()).map_err(utf8_error)?.to_string();
			let raw = std::str::from_utf8(&attr.value).map_err(utf8_error)?;
			let value = unescape(&normalize_attribute(raw))?;

			if key == "xmlns" {
				namespaces.push((String::new(), value));
			} else if let Some(prefix) = key.strip_prefix("xmlns:") {
				namespaces.push((prefix.to_string(), value));
			} else {
				raw_attributes.push((key, value));
			}
		}

		let resolve = |prefix: &str| -> Option<String> {
			namespaces
				.iter()
				.rev()
				.find(|(p, _)| p == prefix)
				.map(|(_, uri)| uri.clone())
				.or_else(|| self.lookup_namespace(parent, prefix))
				.filter(|uri| !uri.is_empty())
		};

		let name = match qname.split_once(':') {
			Some((prefix, local)) => {
				let namespace = resolve(prefix)
					.ok_or_else(|| SamlError::MalformedDocument(format!("Undeclared namespace prefix in <{}>", qname)))?;
				QName::new(Some(prefix), local, Some(&namespace))
			}
			None => QName::new(None, &qname, resolve("").as_deref()),
		};

		let mut attributes = Vec::with_capacity(raw_attributes.len());
		for (key, value) in raw_attributes {
			let name = match key.split_once(':') {
				Some(("xml", local)) => QName::new(Some("xml"), local, Some(NS_XML)),
				Some((prefix, local)) => {
					let namespace = resolve(prefix)
						.ok_or_else(|| SamlError::MalformedDocument(format!("Undeclared namespace prefix in attribute {}", key)))?;
					QName::new(Some(prefix), local, Some(&namespace))
				}
				// Unprefixed attributes are in no namespace
				None => QName::new(None, &key, None),
			};
			attributes.push(Attribute { name, value });
		}

		let id = self.push(NodeKind::Element(Element { name, attributes, namespaces }));
		self.append_child(parent, id);
		Ok(id)
	}

	fn push(&mut self, kind: NodeKind) -> NodeId {
		self.nodes.push(Node {
			kind,
			parent: None,
			children: Vec::new(),
		});
		NodeId(self.nodes.len() - 1)
	}

	fn append_text(&mut self, parent: NodeId, text: &str) {
		if let Some(&last) = self.nodes[parent.0].children.last() {
			if let NodeKind::Text(existing) = &mut self.nodes[last.0].kind {
				existing.push_str(text);
				return;
			}
		}
		let id = self.push(NodeKind::Text(text.to_string()));
		self.append_child(parent, id);
	}

	/// Serialize the whole document, XML declaration included
	pub fn serialize(&self) -> Vec<u8> {
		self.to_xml_string().into_bytes()
	}

	pub fn to_xml_string(&self) -> String {
		let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
		for &child in self.children(DOCUMENT) {
			self.write_node(child, &mut out);
			if matches!(self.kind(child), NodeKind::Element(_)) {
				out.push('\n');
			}
		}
		out
	}

	/// Serialize a single node and its subtree, without an XML declaration
	pub fn node_to_string(&self, id: NodeId) -> String {
		let mut out = String::new();
		self.write_node(id, &mut out);
		out
	}

	fn write_node(&self, id: NodeId, out: &mut String) {
		match self.kind(id) {
			NodeKind::Document => {
				for &child in self.children(id) {
					self.write_node(child, out);
				}
			}
			NodeKind::Element(element) => {
				let name = element.name.qualified();
				out.push('<');
				out.push_str(&name);
				for (prefix, uri) in &element.namespaces {
					if prefix.is_empty() {
						out.push_str(" xmlns=\"");
					} else {
						out.push_str(" xmlns:");
						out.push_str(prefix);
						out.push_str("=\"");
					}
					out.push_str(&escape_attr(uri));
					out.push('"');
				}
				for attr in &element.attributes {
					out.push(' ');
					out.push_str(&attr.name.qualified());
					out.push_str("=\"");
					out.push_str(&escape_attr(&attr.value));
					out.push('"');
				}

				let children = self.children(id);
				if children.is_empty() {
					out.push_str("/>");
				} else {
					out.push('>');
					for &child in children {
						self.write_node(child, out);
					}
					out.push_str("</");
					out.push_str(&name);
					out.push('>');
				}
			}
			NodeKind::Text(text) => out.push_str(&escape_text(text)),
			NodeKind::Comment(text) => {
				out.push_str("<!--");
				out.push_str(text);
				out.push_str("-->");
			}
			NodeKind::ProcessingInstruction { target, data } => {
				out.push_str("<?");
				out.push_str(target);
				if !data.is_empty() {
					out.push(' ');
					out.push_str(data);
				}
				out.push_str("?>");
			}
		}
	}

	// Navigation

	pub fn document_node(&self) -> NodeId {
		DOCUMENT
	}

	/// The single top-level element
	pub fn root_element(&self) -> NodeId {
		// parse() guarantees exactly one root element
		self.child_elements(DOCUMENT).next().unwrap_or(DOCUMENT)
	}

	pub fn kind(&self, id: NodeId) -> &NodeKind {
		&self.nodes[id.0].kind
	}

	pub fn element(&self, id: NodeId) -> Option<&Element> {
		match &self.nodes[id.0].kind {
			NodeKind::Element(element) => Some(element),
			_ => None,
		}
	}

	fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
		match &mut self.nodes[id.0].kind {
			NodeKind::Element(element) => Some(element),
			_ => None,
		}
	}

	pub fn name(&self, id: NodeId) -> Option<&QName> {
		self.element(id).map(|element| &element.name)
	}

	pub fn is_element(&self, id: NodeId, namespace: &str, local: &str) -> bool {
		self.name(id).is_some_and(|name| name.is(namespace, local))
	}

	pub fn parent(&self, id: NodeId) -> Option<NodeId> {
		self.nodes[id.0].parent
	}

	pub fn children(&self, id: NodeId) -> &[NodeId] {
		&self.nodes[id.0].children
	}

	pub fn child_elements(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
		self.nodes[id.0]
			.children
			.iter()
			.copied()
			.filter(|&child| self.element(child).is_some())
	}

	pub fn first_child_element(&self, id: NodeId) -> Option<NodeId> {
		self.child_elements(id).next()
	}

	pub fn find_child(&self, id: NodeId, namespace: &str, local: &str) -> Option<NodeId> {
		self.child_elements(id).find(|&child| self.is_element(child, namespace, local))
	}

	pub fn find_children(&self, id: NodeId, namespace: &str, local: &str) -> Vec<NodeId> {
		self.child_elements(id)
			.filter(|&child| self.is_element(child, namespace, local))
			.collect()
	}

	/// Walk a fixed path of child elements starting at `from`
	pub fn select(&self, from: NodeId, path: &[(&str, &str)]) -> Option<NodeId> {
		path.iter()
			.try_fold(from, |node, (namespace, local)| self.find_child(node, namespace, local))
	}

	/// Every node of the subtree in document order, `id` itself first
	pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
		let mut result = Vec::new();
		let mut stack = vec![id];
		while let Some(node) = stack.pop() {
			result.push(node);
			stack.extend(self.nodes[node.0].children.iter().rev());
		}
		result
	}

	pub fn find_descendant(&self, id: NodeId, namespace: &str, local: &str) -> Option<NodeId> {
		self.descendants(id)
			.into_iter()
			.find(|&node| self.is_element(node, namespace, local))
	}

	pub fn is_ancestor_or_self(&self, ancestor: NodeId, id: NodeId) -> bool {
		let mut current = Some(id);
		while let Some(node) = current {
			if node == ancestor {
				return true;
			}
			current = self.parent(node);
		}
		false
	}

	/// Unqualified (no namespace) attribute value
	pub fn attribute(&self, id: NodeId, local: &str) -> Option<&str> {
		self.element(id)?
			.attributes
			.iter()
			.find(|attr| attr.name.namespace.is_none() && attr.name.local == local)
			.map(|attr| attr.value.as_str())
	}

	pub fn attribute_ns(&self, id: NodeId, namespace: &str, local: &str) -> Option<&str> {
		self.element(id)?
			.attributes
			.iter()
			.find(|attr| attr.name.is(namespace, local))
			.map(|attr| attr.value.as_str())
	}

	/// Concatenated text of all descendant text nodes
	pub fn text(&self, id: NodeId) -> String {
		let mut text = String::new();
		for node in self.descendants(id) {
			if let NodeKind::Text(content) = self.kind(node) {
				text.push_str(content);
			}
		}
		text
	}

	/// Resolve a prefix (`""` for the default namespace) as seen from `id`
	pub fn lookup_namespace(&self, id: NodeId, prefix: &str) -> Option<String> {
		if prefix == "xml" {
			return Some(NS_XML.to_string());
		}

		let mut current = Some(id);
		while let Some(node) = current {
			if let Some(element) = self.element(node) {
				if let Some((_, uri)) = element.namespaces.iter().rev().find(|(p, _)| p == prefix) {
					return Some(uri.clone());
				}
			}
			current = self.parent(node);
		}
		None
	}

	/// All namespace bindings in scope at `id`, undeclared defaults removed
	pub fn in_scope_namespaces(&self, id: NodeId) -> BTreeMap<String, String> {
		let mut chain = Vec::new();
		let mut current = Some(id);
		while let Some(node) = current {
			if let Some(element) = self.element(node) {
				chain.push(&element.namespaces);
			}
			current = self.parent(node);
		}

		let mut scope = BTreeMap::new();
		for declarations in chain.into_iter().rev() {
			for (prefix, uri) in declarations {
				if uri.is_empty() {
					scope.remove(prefix);
				} else {
					scope.insert(prefix.clone(), uri.clone());
				}
			}
		}
		scope
	}

	/// Find the element whose ID attribute (any of `id_attrs`) equals `value`
	///
	/// More than one match is an error: an ambiguous reference is how signature
	/// wrapping attacks smuggle unsigned content past a verifier.
	pub fn find_by_id(&self, id_attrs: &[&str], value: &str) -> Result<Option<NodeId>> {
		let mut found = None;
		for node in self.descendants(DOCUMENT) {
			let matches = id_attrs
				.iter()
				.any(|name| self.attribute(node, name) == Some(value));
			if matches {
				if found.is_some() {
					return Err(SamlError::MalformedDocument(format!("Duplicate ID {}", value)));
				}
				found = Some(node);
			}
		}
		Ok(found)
	}

	// Mutation, used by the signer

	/// Create a detached element; attach it with [`Self::append_child`] or [`Self::insert_after`]
	pub fn create_element(&mut self, name: QName) -> NodeId {
		self.push(NodeKind::Element(Element {
			name,
			attributes: Vec::new(),
			namespaces: Vec::new(),
		}))
	}

	pub fn create_text(&mut self, text: &str) -> NodeId {
		self.push(NodeKind::Text(text.to_string()))
	}

	pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
		self.detach(child);
		self.nodes[child.0].parent = Some(parent);
		self.nodes[parent.0].children.push(child);
	}

	pub fn insert_after(&mut self, sibling: NodeId, node: NodeId) -> Result<()> {
		let parent = self
			.parent(sibling)
			.ok_or_else(|| SamlError::MalformedDocument("Cannot insert next to a node without a parent".to_string()))?;
		self.detach(node);
		let children = &mut self.nodes[parent.0].children;
		let position = children.iter().position(|&child| child == sibling).map_or(children.len(), |p| p + 1);
		children.insert(position, node);
		self.nodes[node.0].parent = Some(parent);
		Ok(())
	}

	/// Unlink a node from its parent; the node itself stays in the arena
	pub fn detach(&mut self, id: NodeId) {
		if let Some(parent) = self.nodes[id.0].parent.take() {
			self.nodes[parent.0].children.retain(|&child| child != id);
		}
	}

	pub fn set_attribute(&mut self, id: NodeId, local: &str, value: &str) {
		if let Some(element) = self.element_mut(id) {
			match element
				.attributes
				.iter_mut()
				.find(|attr| attr.name.namespace.is_none() && attr.name.local == local)
			{
				Some(attr) => attr.value = value.to_string(),
				None => element.attributes.push(Attribute {
					name: QName::new(None, local, None),
					value: value.to_string(),
				}),
			}
		}
	}

	pub fn declare_namespace(&mut self, id: NodeId, prefix: &str, uri: &str) {
		if let Some(element) = self.element_mut(id) {
			element.namespaces.retain(|(p, _)| p != prefix);
			element.namespaces.push((prefix.to_string(), uri.to_string()));
		}
	}

	/// Replace all children of `id` with a single text node
	pub fn set_text(&mut self, id: NodeId, text: &str) {
		for child in std::mem::take(&mut self.nodes[id.0].children) {
			self.nodes[child.0].parent = None;
		}
		let text_node = self.create_text(text);
		self.append_child(id, text_node);
	}
}

/// `open` holds the document node plus every open element, so it equals the depth of a new child
fn check_depth(open: usize) -> Result<()> {
	if open > MAX_DEPTH {
		return Err(SamlError::MalformedDocument(format!("Elements nested deeper than {} levels", MAX_DEPTH)));
	}
	Ok(())
}

fn utf8_error(error: std::str::Utf8Error) -> SamlError {
	SamlError::MalformedDocument(format!("Invalid UTF-8: {}", error))
}

fn unescape(raw: &str) -> Result<String> {
	quick_xml::escape::unescape(raw)
		.map(|text| text.into_owned())
		.map_err(|e| SamlError::MalformedDocument(format!("Invalid character reference: {}", e)))
}

/// XML end-of-line handling: `\r\n` and lone `\r` become `\n`
fn normalize_newlines(raw: &str) -> String {
	raw.replace("\r\n", "\n").replace('\r', "\n")
}

/// Attribute-value normalization of literal whitespace (character references survive)
fn normalize_attribute(raw: &str) -> String {
	normalize_newlines(raw).replace(['\n', '\t'], " ")
}
