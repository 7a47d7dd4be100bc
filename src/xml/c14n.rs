//! Exclusive XML Canonicalization 1.0, without comments
//!
//! Algorithm URI: `http://www.w3.org/2001/10/xml-exc-c14n#`
//!
//! Only "visibly utilized" namespace declarations are rendered: the prefix of
//! the element itself, the prefixes of its attributes and whatever the
//! InclusiveNamespaces PrefixList names. Declarations already rendered by an
//! output ancestor with the same value are not repeated.

use std::collections::{BTreeMap, BTreeSet};

use super::document::{NodeId, NodeKind, ParsedDocument};
use super::{escape_attr, escape_text};

/// Canonicalize the subtree rooted at `apex`
///
/// `exclude` removes one subtree from the output, which is how the enveloped
/// signature transform drops the `Signature` element. The apex may be the
/// document node itself. Recursion follows the element nesting, which
/// [`ParsedDocument::parse`] caps at [`MAX_DEPTH`](super::document::MAX_DEPTH).
pub fn canonicalize(
	doc: &ParsedDocument,
	apex: NodeId,
	exclude: Option<NodeId>,
	inclusive_prefixes: &[String],
) -> Vec<u8> {
	let mut prefixes = BTreeSet::new();
	for prefix in inclusive_prefixes {
		if prefix == "#default" {
			prefixes.insert(String::new());
		} else {
			prefixes.insert(prefix.clone());
		}
	}

	let context = Context {
		doc,
		exclude,
		inclusive_prefixes: prefixes,
	};
	let mut output = String::new();
	context.process_node(apex, &mut output, &BTreeMap::new());
	output.into_bytes()
}

struct Context<'a> {
	doc: &'a ParsedDocument,
	exclude: Option<NodeId>,
	inclusive_prefixes: BTreeSet<String>,
}

impl Context<'_> {
	fn process_node(&self, id: NodeId, output: &mut String, rendered: &BTreeMap<String, String>) {
		if Some(id) == self.exclude {
			return;
		}

		match self.doc.kind(id) {
			NodeKind::Document => {
				for &child in self.doc.children(id) {
					self.process_node(child, output, rendered);
				}
			}
			NodeKind::Element(_) => self.process_element(id, output, rendered),
			NodeKind::Text(text) => output.push_str(&escape_text(text)),
			NodeKind::Comment(_) => {}
			NodeKind::ProcessingInstruction { target, data } => {
				let top_level = self.doc.parent(id) == Some(self.doc.document_node());
				if top_level && self.has_element_sibling(id, true) {
					output.push('\n');
				}
				output.push_str("<?");
				output.push_str(target);
				if !data.is_empty() {
					output.push(' ');
					output.push_str(&data.replace('\r', "&#xD;"));
				}
				output.push_str("?>");
				if top_level && self.has_element_sibling(id, false) {
					output.push('\n');
				}
			}
		}
	}

	fn process_element(&self, id: NodeId, output: &mut String, rendered: &BTreeMap<String, String>) {
		let Some(element) = self.doc.element(id) else {
			return;
		};

		let mut utilized = self.inclusive_prefixes.clone();
		utilized.insert(element.name.prefix.clone().unwrap_or_default());
		for attr in &element.attributes {
			if let Some(prefix) = &attr.name.prefix {
				utilized.insert(prefix.clone());
			}
		}

		let in_scope = self.doc.in_scope_namespaces(id);
		let mut declarations = Vec::new();
		for prefix in &utilized {
			if prefix == "xml" {
				continue;
			}
			match in_scope.get(prefix) {
				Some(uri) => {
					if rendered.get(prefix) != Some(uri) {
						declarations.push((prefix.clone(), uri.clone()));
					}
				}
				None if prefix.is_empty() => {
					// Element left a default namespace that an ancestor rendered
					if rendered.get("").is_some_and(|uri| !uri.is_empty()) {
						declarations.push((String::new(), String::new()));
					}
				}
				None => {}
			}
		}
		// `utilized` iterates in prefix order, the default namespace first

		let mut attributes: Vec<_> = element
			.attributes
			.iter()
			.map(|attr| {
				let namespace = attr.name.namespace.as_deref().unwrap_or("");
				(namespace, attr.name.local.as_str(), attr.name.qualified(), attr.value.as_str())
			})
			.collect();
		attributes.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

		let name = element.name.qualified();
		output.push('<');
		output.push_str(&name);
		for (prefix, uri) in &declarations {
			if prefix.is_empty() {
				output.push_str(" xmlns=\"");
			} else {
				output.push_str(" xmlns:");
				output.push_str(prefix);
				output.push_str("=\"");
			}
			output.push_str(&escape_attr(uri));
			output.push('"');
		}
		for (_, _, qualified, value) in &attributes {
			output.push(' ');
			output.push_str(qualified);
			output.push_str("=\"");
			output.push_str(&escape_attr(value));
			output.push('"');
		}
		output.push('>');

		let mut child_rendered = rendered.clone();
		for (prefix, uri) in declarations {
			child_rendered.insert(prefix, uri);
		}
		for &child in self.doc.children(id) {
			self.process_node(child, output, &child_rendered);
		}

		output.push_str("</");
		output.push_str(&name);
		output.push('>');
	}

	fn has_element_sibling(&self, id: NodeId, preceding: bool) -> bool {
		let siblings = self.doc.children(self.doc.document_node());
		let Some(position) = siblings.iter().position(|&sibling| sibling == id) else {
			return false;
		};
		let range = if preceding {
			&siblings[..position]
		} else {
			&siblings[position + 1..]
		};
		range
			.iter()
			.any(|&sibling| matches!(self.doc.kind(sibling), NodeKind::Element(_)))
	}
}
