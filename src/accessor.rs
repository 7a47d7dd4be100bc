//! Read protocol fields out of a parsed message
//!
//! Every lookup walks a fixed, namespace-qualified path from the root element.
//! Prefixes in the document are irrelevant; an element with the right local
//! name in the wrong namespace is not a match.

use std::collections::BTreeMap;

use crate::error::{Result, SamlError};
use crate::xml::{NodeId, ParsedDocument};
use crate::{NS_ASSERTION, NS_PROTOCOL};

/// Value of a named SAML attribute, by the number of `AttributeValue` children
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
	Absent,
	Single(String),
	/// Two or more values, in document order
	Multi(Vec<String>),
}

impl AttributeValue {
	fn from_values(mut values: Vec<String>) -> Self {
		match values.len() {
			0 => Self::Absent,
			1 => Self::Single(values.remove(0)),
			_ => Self::Multi(values),
		}
	}

	pub fn values(&self) -> Vec<&str> {
		match self {
			Self::Absent => Vec::new(),
			Self::Single(value) => vec![value.as_str()],
			Self::Multi(values) => values.iter().map(String::as_str).collect(),
		}
	}

	pub fn first(&self) -> Option<&str> {
		self.values().into_iter().next()
	}
}

/// Everything the inbound flow hands to the caller once a message is accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFields {
	/// Root element local name, e.g. `AuthnRequest`
	pub kind: String,
	pub issuer: Option<String>,
	pub message_id: String,
	pub in_response_to: Option<String>,
	pub destination: Option<String>,
	pub session_index: Option<String>,
	pub status_code: Option<String>,
	pub name_id: Option<String>,
	pub attributes: BTreeMap<String, AttributeValue>,
}

impl ExtractedFields {
	pub fn extract(doc: &ParsedDocument) -> Result<Self> {
		Ok(Self {
			kind: message_kind(doc).unwrap_or_default(),
			issuer: issuer(doc),
			message_id: message_id(doc)?,
			in_response_to: in_response_to(doc),
			destination: destination(doc),
			session_index: session_index(doc),
			status_code: status_code(doc),
			name_id: name_id(doc),
			attributes: attributes(doc),
		})
	}
}

fn trimmed_text(doc: &ParsedDocument, node: NodeId) -> Option<String> {
	let text = doc.text(node);
	let text = text.trim();
	if text.is_empty() {
		None
	} else {
		Some(text.to_string())
	}
}

/// Text content as sent, for values that are compared byte for byte
fn exact_text(doc: &ParsedDocument, node: NodeId) -> Option<String> {
	Some(doc.text(node)).filter(|text| !text.is_empty())
}

/// The assertions of a response, or the root itself when it is an assertion
fn assertions(doc: &ParsedDocument) -> Vec<NodeId> {
	let root = doc.root_element();
	if doc.is_element(root, NS_ASSERTION, "Assertion") {
		vec![root]
	} else {
		doc.find_children(root, NS_ASSERTION, "Assertion")
	}
}

fn is_root(doc: &ParsedDocument, local: &str) -> bool {
	doc.is_element(doc.root_element(), NS_PROTOCOL, local)
}

/// Local name of the root element
pub fn message_kind(doc: &ParsedDocument) -> Option<String> {
	doc.name(doc.root_element()).map(|name| name.local.clone())
}

/// The declared issuer of the message
///
/// The message-level `Issuer` wins. A response that only names its issuer
/// inside the assertion falls back to that one. The value is returned
/// untrimmed, since trust lookups match it exactly.
pub fn issuer(doc: &ParsedDocument) -> Option<String> {
	let root = doc.root_element();
	if let Some(node) = doc.find_child(root, NS_ASSERTION, "Issuer") {
		return exact_text(doc, node);
	}

	assertions(doc)
		.into_iter()
		.filter(|&assertion| assertion != root)
		.find_map(|assertion| doc.find_child(assertion, NS_ASSERTION, "Issuer"))
		.and_then(|node| exact_text(doc, node))
}

pub fn message_id(doc: &ParsedDocument) -> Result<String> {
	doc.attribute(doc.root_element(), "ID")
		.filter(|id| !id.is_empty())
		.map(str::to_string)
		.ok_or_else(|| SamlError::MalformedDocument("Message has no ID attribute".to_string()))
}

pub fn in_response_to(doc: &ParsedDocument) -> Option<String> {
	doc.attribute(doc.root_element(), "InResponseTo").map(str::to_string)
}

pub fn version(doc: &ParsedDocument) -> Option<String> {
	doc.attribute(doc.root_element(), "Version").map(str::to_string)
}

pub fn destination(doc: &ParsedDocument) -> Option<String> {
	doc.attribute(doc.root_element(), "Destination").map(str::to_string)
}

/// Session index of a login assertion or of a logout request
pub fn session_index(doc: &ParsedDocument) -> Option<String> {
	let root = doc.root_element();
	if is_root(doc, "LogoutRequest") {
		return doc
			.find_child(root, NS_PROTOCOL, "SessionIndex")
			.and_then(|node| trimmed_text(doc, node));
	}

	assertions(doc).into_iter().find_map(|assertion| {
		doc.find_children(assertion, NS_ASSERTION, "AuthnStatement")
			.into_iter()
			.find_map(|statement| doc.attribute(statement, "SessionIndex"))
			.map(str::to_string)
	})
}

/// Top-level status code URI of a response
pub fn status_code(doc: &ParsedDocument) -> Option<String> {
	doc.select(doc.root_element(), &[(NS_PROTOCOL, "Status"), (NS_PROTOCOL, "StatusCode")])
		.and_then(|code| doc.attribute(code, "Value"))
		.map(str::to_string)
}

/// Subject `NameID` of the first assertion, or of a logout request
pub fn name_id(doc: &ParsedDocument) -> Option<String> {
	let root = doc.root_element();
	if is_root(doc, "LogoutRequest") {
		return doc
			.find_child(root, NS_ASSERTION, "NameID")
			.and_then(|node| trimmed_text(doc, node));
	}

	assertions(doc)
		.into_iter()
		.find_map(|assertion| doc.select(assertion, &[(NS_ASSERTION, "Subject"), (NS_ASSERTION, "NameID")]))
		.and_then(|node| trimmed_text(doc, node))
}

/// Named attributes of every `AttributeStatement`
///
/// When a name repeats, the later attribute replaces the earlier one.
pub fn attributes(doc: &ParsedDocument) -> BTreeMap<String, AttributeValue> {
	let mut result = BTreeMap::new();

	for assertion in assertions(doc) {
		for statement in doc.find_children(assertion, NS_ASSERTION, "AttributeStatement") {
			for attribute in doc.find_children(statement, NS_ASSERTION, "Attribute") {
				let Some(name) = doc.attribute(attribute, "Name") else {
					log::debug!("Skipping SAML attribute without a Name");
					continue;
				};

				let values = doc
					.find_children(attribute, NS_ASSERTION, "AttributeValue")
					.into_iter()
					.map(|value| doc.text(value))
					.collect();

				if result.insert(name.to_string(), AttributeValue::from_values(values)).is_some() {
					log::warn!("Duplicate SAML attribute {}, keeping the last occurrence", name);
				}
			}
		}
	}

	result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	const RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_resp" InResponseTo="_req" Version="2.0" IssueInstant="2024-01-01T00:00:00Z" Destination="https://sp.example.com/acs">
	<saml:Issuer>https://idp.example.com</saml:Issuer>
	<samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>
	<saml:Assertion ID="_assert" Version="2.0" IssueInstant="2024-01-01T00:00:00Z">
		<saml:Issuer>https://idp.example.com</saml:Issuer>
		<saml:Subject><saml:NameID>alice@example.com</saml:NameID></saml:Subject>
		<saml:AuthnStatement AuthnInstant="2024-01-01T00:00:00Z" SessionIndex="_session42"/>
		<saml:AttributeStatement>
			<saml:Attribute Name="none"/>
			<saml:Attribute Name="mail"><saml:AttributeValue>alice@example.com</saml:AttributeValue></saml:Attribute>
			<saml:Attribute Name="groups">
				<saml:AttributeValue>admins</saml:AttributeValue>
				<saml:AttributeValue>users</saml:AttributeValue>
			</saml:Attribute>
		</saml:AttributeStatement>
	</saml:Assertion>
</samlp:Response>"#;

	#[test]
	fn test_response_fields() {
		let doc = ParsedDocument::parse_str(RESPONSE).unwrap();
		let fields = ExtractedFields::extract(&doc).unwrap();

		assert_eq!(fields.kind, "Response");
		assert_eq!(fields.issuer.as_deref(), Some("https://idp.example.com"));
		assert_eq!(fields.message_id, "_resp");
		assert_eq!(fields.in_response_to.as_deref(), Some("_req"));
		assert_eq!(fields.destination.as_deref(), Some("https://sp.example.com/acs"));
		assert_eq!(fields.session_index.as_deref(), Some("_session42"));
		assert_eq!(fields.status_code.as_deref(), Some("urn:oasis:names:tc:SAML:2.0:status:Success"));
		assert_eq!(fields.name_id.as_deref(), Some("alice@example.com"));
		assert_eq!(version(&doc).as_deref(), Some("2.0"));
	}

	#[test]
	fn test_attribute_arity() {
		let doc = ParsedDocument::parse_str(RESPONSE).unwrap();
		let attributes = attributes(&doc);

		assert_eq!(attributes["none"], AttributeValue::Absent);
		assert_eq!(attributes["mail"], AttributeValue::Single("alice@example.com".to_string()));
		assert_eq!(attributes["groups"], AttributeValue::Multi(vec!["admins".to_string(), "users".to_string()]));
		assert_eq!(attributes["groups"].first(), Some("admins"));
		assert!(attributes["none"].values().is_empty());
	}

	#[test]
	fn test_duplicate_attribute_last_wins() {
		let xml = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="a">
			<saml:AttributeStatement>
				<saml:Attribute Name="role"><saml:AttributeValue>first</saml:AttributeValue></saml:Attribute>
				<saml:Attribute Name="role"><saml:AttributeValue>second</saml:AttributeValue></saml:Attribute>
			</saml:AttributeStatement>
		</saml:Assertion>"#;
		let doc = ParsedDocument::parse_str(xml).unwrap();
		assert_eq!(attributes(&doc)["role"], AttributeValue::Single("second".to_string()));
	}

	#[test]
	fn test_issuer_from_assertion_fallback() {
		let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="r">
			<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="a"><saml:Issuer> idp </saml:Issuer></saml:Assertion>
		</samlp:Response>"#;
		let doc = ParsedDocument::parse_str(xml).unwrap();
		assert_eq!(issuer(&doc).as_deref(), Some(" idp "));
	}

	#[test]
	fn test_wrong_namespace_is_ignored() {
		let xml = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="r">
			<samlp:Issuer>looks-right</samlp:Issuer>
		</samlp:AuthnRequest>"#;
		let doc = ParsedDocument::parse_str(xml).unwrap();
		assert_eq!(issuer(&doc), None);
		assert_eq!(status_code(&doc), None);
	}

	#[test]
	fn test_logout_request_fields() {
		let xml = r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_lr" Version="2.0">
			<saml:Issuer>sp</saml:Issuer>
			<saml:NameID>bob</saml:NameID>
			<samlp:SessionIndex>_s1</samlp:SessionIndex>
		</samlp:LogoutRequest>"#;
		let doc = ParsedDocument::parse_str(xml).unwrap();
		assert_eq!(session_index(&doc).as_deref(), Some("_s1"));
		assert_eq!(name_id(&doc).as_deref(), Some("bob"));
		assert_eq!(message_kind(&doc).as_deref(), Some("LogoutRequest"));
	}

	#[test]
	fn test_missing_id() {
		let doc = ParsedDocument::parse_str(r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"/>"#).unwrap();
		assert!(matches!(message_id(&doc), Err(SamlError::MalformedDocument(_))));
	}
}
