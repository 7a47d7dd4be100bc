//! Structural validation of SAML protocol messages
//!
//! Not a full XSD validator. It checks the parts of the protocol schema that
//! the rest of the crate relies on, so that a message passing here can be read
//! by the accessor without surprises.

use crate::error::{Result, SamlError};
use crate::xml::ParsedDocument;
use crate::{NS_ASSERTION, NS_DSIG, NS_PROTOCOL};

const REQUESTS: &[&str] = &["AuthnRequest", "LogoutRequest", "AttributeQuery", "ArtifactResolve"];
const RESPONSES: &[&str] = &["Response", "LogoutResponse", "ArtifactResponse"];

/// Pass/fail structural check of a protocol message
pub fn validate(doc: &ParsedDocument) -> Result<()> {
	let root = doc.root_element();
	let name = doc
		.name(root)
		.ok_or_else(|| invalid("document has no root element"))?;

	if name.namespace.as_deref() != Some(NS_PROTOCOL) {
		return Err(invalid(format!("root element {} is not in the protocol namespace", name.qualified())));
	}

	let is_response = RESPONSES.contains(&name.local.as_str());
	if !is_response && !REQUESTS.contains(&name.local.as_str()) {
		return Err(invalid(format!("unknown protocol message {}", name.local)));
	}

	for required in ["ID", "Version", "IssueInstant"] {
		if doc.attribute(root, required).map_or(true, str::is_empty) {
			return Err(invalid(format!("{} is missing the {} attribute", name.local, required)));
		}
	}

	let children: Vec<_> = doc.child_elements(root).collect();
	let issuer = children
		.iter()
		.position(|&child| doc.is_element(child, NS_ASSERTION, "Issuer"));
	let signature = children
		.iter()
		.position(|&child| doc.is_element(child, NS_DSIG, "Signature"));

	if let Some(position) = issuer {
		if position != 0 {
			return Err(invalid("Issuer must be the first child element"));
		}
	}
	if let Some(position) = signature {
		if issuer.is_some_and(|issuer| position < issuer) {
			return Err(invalid("Signature must follow Issuer"));
		}
		if children
			.iter()
			.filter(|&&child| doc.is_element(child, NS_DSIG, "Signature"))
			.count() > 1
		{
			return Err(invalid("more than one Signature element"));
		}
	}

	if is_response {
		let status = doc
			.find_child(root, NS_PROTOCOL, "Status")
			.ok_or_else(|| invalid(format!("{} has no Status", name.local)))?;
		let code = doc
			.find_child(status, NS_PROTOCOL, "StatusCode")
			.ok_or_else(|| invalid("Status has no StatusCode"))?;
		if doc.attribute(code, "Value").is_none() {
			return Err(invalid("StatusCode has no Value"));
		}
	}

	if name.local == "LogoutRequest" && doc.find_child(root, NS_ASSERTION, "NameID").is_none() {
		return Err(invalid("LogoutRequest has no NameID"));
	}

	for assertion in doc.find_children(root, NS_ASSERTION, "Assertion") {
		for required in ["ID", "Version", "IssueInstant"] {
			if doc.attribute(assertion, required).is_none() {
				return Err(invalid(format!("Assertion is missing the {} attribute", required)));
			}
		}
		let starts_with_issuer = doc
			.first_child_element(assertion)
			.is_some_and(|first| doc.is_element(first, NS_ASSERTION, "Issuer"));
		if !starts_with_issuer {
			return Err(invalid("Assertion must start with an Issuer"));
		}
	}

	Ok(())
}

fn invalid<S: Into<String>>(reason: S) -> SamlError {
	SamlError::MalformedDocument(format!("Schema validation failed: {}", reason.into()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	fn check(xml: &str) -> Result<()> {
		validate(&ParsedDocument::parse_str(xml).unwrap())
	}

	const HEADER: &str = r#"xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_1" Version="2.0" IssueInstant="2024-01-01T00:00:00Z""#;

	#[test]
	fn test_valid_messages() {
		check(&format!(r#"<samlp:AuthnRequest {}><saml:Issuer>sp</saml:Issuer></samlp:AuthnRequest>"#, HEADER)).unwrap();
		check(&format!(
			r#"<samlp:Response {}><saml:Issuer>idp</saml:Issuer><samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status></samlp:Response>"#,
			HEADER
		))
		.unwrap();
	}

	#[test]
	fn test_wrong_root() {
		assert!(check(r#"<html/>"#).is_err());
		assert!(check(r#"<samlp:Bogus xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="a" Version="2.0" IssueInstant="x"/>"#).is_err());
	}

	#[test]
	fn test_missing_attributes() {
		let xml = r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_1" Version="2.0"/>"#;
		let err = check(xml).unwrap_err();
		assert!(err.to_string().contains("IssueInstant"));
	}

	#[test]
	fn test_issuer_position() {
		let xml = format!(
			r#"<samlp:AuthnRequest {}><samlp:NameIDPolicy/><saml:Issuer>sp</saml:Issuer></samlp:AuthnRequest>"#,
			HEADER
		);
		assert!(check(&xml).is_err());
	}

	#[test]
	fn test_response_requires_status() {
		let xml = format!(r#"<samlp:Response {}><saml:Issuer>idp</saml:Issuer></samlp:Response>"#, HEADER);
		assert!(matches!(check(&xml), Err(SamlError::MalformedDocument(_))));
	}
}
