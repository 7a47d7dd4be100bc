use std::collections::BTreeMap;

use scraper::{Html, Selector};

use super::fixtures;
use super::init_logger;
use crate::binding::{CodecLimits, PostBinding, PostMessage};
use crate::dsig::{sign_doc, sign_xml, SignOptions};
use crate::flow::{Inbound, InboundPolicy, Outbound, Stage};
use crate::template::{Assertion, AssertionSubject, AuthnRequest, Response, Template};
use crate::*;

fn idp() -> Outbound {
	Outbound::new(fixtures::IDP_ENTITY, fixtures::idp_key(), SignatureAlgorithm::RsaSha256)
}

fn login_response(in_response_to: &str) -> Response {
	let mut attributes = BTreeMap::new();
	attributes.insert("mail".to_string(), vec!["alice@example.com".to_string()]);

	let subject = AssertionSubject {
		issuer: fixtures::IDP_ENTITY,
		audience: fixtures::SP_ENTITY,
		name_id: "alice",
		recipient: Some("https://sp.example.com/acs"),
		in_response_to: Some(in_response_to),
		session_index: Some("_session"),
	};
	Response::success(
		fixtures::IDP_ENTITY,
		Some("https://sp.example.com/acs"),
		Some(in_response_to),
		Assertion::new(&subject, &attributes),
	)
}

/// Read the hidden fields back out of an auto-submit page, as a browser would post them
fn submit(html: &str) -> PostMessage {
	let document = Html::parse_document(html);
	let selector = Selector::parse("form input[type=hidden]").unwrap();
	let fields: Vec<(String, String)> = document
		.select(&selector)
		.map(|input| {
			(
				input.value().attr("name").unwrap().to_string(),
				input.value().attr("value").unwrap().to_string(),
			)
		})
		.collect();

	let body = url::form_urlencoded::Serializer::new(String::new())
		.extend_pairs(&fields)
		.finish();
	PostMessage::from_form_body(&body).unwrap()
}

#[test]
fn test_signed_login_response() {
	init_logger();
	let table = fixtures::trust_table();
	let sp = Inbound::new(&table, InboundPolicy::default(), CodecLimits::default());

	let message = idp().post(&login_response("_req1"), Some("/dashboard")).unwrap();
	let html = message.to_html("https://sp.example.com/acs").unwrap();
	let accepted = sp.post(&submit(&html)).unwrap();

	assert_eq!(accepted.binding, Binding::HttpPost);
	assert_eq!(accepted.kind, MessageKind::Response);
	assert_eq!(accepted.relay_state.as_deref(), Some("/dashboard"));

	let fields = &accepted.fields;
	assert_eq!(fields.kind, "Response");
	assert_eq!(fields.issuer.as_deref(), Some(fixtures::IDP_ENTITY));
	assert_eq!(fields.in_response_to.as_deref(), Some("_req1"));
	assert_eq!(fields.status_code.as_deref(), Some(StatusCode::Success.uri()));
	assert_eq!(fields.name_id.as_deref(), Some("alice"));
	assert_eq!(fields.session_index.as_deref(), Some("_session"));
	assert_eq!(fields.attributes["mail"].first(), Some("alice@example.com"));
}

#[test]
fn test_tampered_response() {
	init_logger();
	let table = fixtures::trust_table();
	let sp = Inbound::new(&table, InboundPolicy::default(), CodecLimits::default());

	let message = idp().post(&login_response("_req1"), None).unwrap();
	let xml = String::from_utf8(codec::decode_base64(&message.message).unwrap()).unwrap();
	let forged = xml.replace(">alice<", ">mallory<");
	assert_ne!(xml, forged);

	let rejection = sp
		.post(&PostMessage {
			message: codec::encode_base64(forged),
			..message
		})
		.unwrap_err();
	assert!(matches!(rejection.error, SamlError::SignatureInvalid(_)));
	assert_eq!(rejection.stage, Stage::TrustResolved);
	assert_eq!(rejection.issuer.as_deref(), Some(fixtures::IDP_ENTITY));
}

#[test]
fn test_response_from_wrong_key() {
	init_logger();
	// Claims to be the IdP but is signed with the rogue key
	let table = fixtures::trust_table();
	let sp = Inbound::new(&table, InboundPolicy::default(), CodecLimits::default());
	let impostor = Outbound::new(fixtures::IDP_ENTITY, fixtures::rogue_key(), SignatureAlgorithm::RsaSha256);

	let rejection = sp.post(&impostor.post(&login_response("_req1"), None).unwrap()).unwrap_err();
	assert!(matches!(rejection.error, SamlError::SignatureInvalid(_)));
	assert_eq!(rejection.status, StatusCode::Requester);
}

#[test]
fn test_missing_issuer_is_not_trusted() {
	init_logger();
	let table = fixtures::trust_table();
	let idp_side = Inbound::new(&table, InboundPolicy::default(), CodecLimits::default());

	let request = AuthnRequest::new(fixtures::SP_ENTITY, None, None);
	let xml = request
		.to_xml()
		.unwrap()
		.replace(&format!("<saml:Issuer>{}</saml:Issuer>", fixtures::SP_ENTITY), "");
	let mut doc = ParsedDocument::parse_str(&xml).unwrap();
	assert!(accessor::issuer(&doc).is_none());

	sign_doc(&fixtures::sp_key(), SignatureAlgorithm::RsaSha256, &mut doc, &SignOptions::default().id_attr("ID")).unwrap();
	let message = PostBinding::default().encode(MessageKind::Request, &doc, None).unwrap();

	let rejection = idp_side.post(&message).unwrap_err();
	assert!(matches!(rejection.error, SamlError::NotTrusted(_)));
	assert_eq!(rejection.stage, Stage::IssuerExtracted);
	assert_eq!(rejection.message_id.as_deref(), Some(request.id.as_str()));
}

#[test]
fn test_form_arity() {
	let both = PostMessage::from_form_body("SAMLRequest=YQ%3D%3D&SAMLResponse=YQ%3D%3D");
	assert!(matches!(both, Err(SamlError::MalformedDocument(_))));

	let none = PostMessage::from_form_body("RelayState=abc");
	assert!(matches!(none, Err(SamlError::Codec(_))));
}

#[test]
fn test_relay_state_limit_on_both_sides() {
	let long = "r".repeat(81);
	let result = idp().post(&login_response("_req1"), Some(&long));
	assert!(matches!(result, Err(SamlError::Codec(_))));

	let table = fixtures::trust_table();
	let sp = Inbound::new(&table, InboundPolicy::default(), CodecLimits::default());
	let message = PostMessage {
		relay_state: Some(long),
		..idp().post(&login_response("_req1"), None).unwrap()
	};
	let rejection = sp.post(&message).unwrap_err();
	assert_eq!(rejection.stage, Stage::Received);
}

fn assertion_xml(id: &str, name_id: &str, role: &str) -> String {
	format!(
		r#"<saml:Assertion xmlns:saml="{}" ID="{}" Version="2.0" IssueInstant="2024-01-01T00:00:00Z"><saml:Issuer>{}</saml:Issuer><saml:Subject><saml:NameID>{}</saml:NameID></saml:Subject><saml:AttributeStatement><saml:Attribute Name="role"><saml:AttributeValue>{}</saml:AttributeValue></saml:Attribute></saml:AttributeStatement></saml:Assertion>"#,
		NS_ASSERTION,
		id,
		fixtures::IDP_ENTITY,
		name_id,
		role
	)
}

/// An assertion the IdP really signed, ready to be embedded in a response
fn signed_assertion(id: &str, name_id: &str, role: &str) -> String {
	let options = SignOptions::default().id_attr("ID").insert_after(NS_ASSERTION, "Issuer");
	let xml = sign_xml(&fixtures::idp_key(), SignatureAlgorithm::RsaSha256, &assertion_xml(id, name_id, role), &options).unwrap();
	xml[xml.find("<saml:Assertion").unwrap()..].trim_end().to_string()
}

/// Unsigned response envelope around the given assertions
fn response_around(assertions: &[String]) -> PostMessage {
	let xml = format!(
		r#"<samlp:Response xmlns:samlp="{}" xmlns:saml="{}" ID="_resp" Version="2.0" IssueInstant="2024-01-01T00:00:00Z"><saml:Issuer>{}</saml:Issuer><samlp:Status><samlp:StatusCode Value="{}"/></samlp:Status>{}</samlp:Response>"#,
		NS_PROTOCOL,
		NS_ASSERTION,
		fixtures::IDP_ENTITY,
		StatusCode::Success.uri(),
		assertions.concat()
	);
	let doc = ParsedDocument::parse_str(&xml).unwrap();
	PostBinding::default().encode(MessageKind::Response, &doc, None).unwrap()
}

#[test]
fn test_signed_assertion_in_unsigned_response() {
	init_logger();
	let table = fixtures::trust_table();
	let sp = Inbound::new(&table, InboundPolicy::default(), CodecLimits::default());

	let accepted = sp
		.post(&response_around(&[signed_assertion("_genuine", "alice", "user")]))
		.unwrap();
	assert_eq!(accepted.fields.name_id.as_deref(), Some("alice"));
	assert_eq!(accepted.fields.attributes["role"].first(), Some("user"));
}

#[test]
fn test_unsigned_assertion_beside_signed_one() {
	init_logger();
	let table = fixtures::trust_table();
	let sp = Inbound::new(&table, InboundPolicy::default(), CodecLimits::default());

	let forged = assertion_xml("_forged", "admin", "superuser");
	let genuine = signed_assertion("_genuine", "mallory", "user");

	for assertions in [[forged.clone(), genuine.clone()], [genuine, forged]] {
		let rejection = sp.post(&response_around(&assertions)).unwrap_err();
		assert!(matches!(rejection.error, SamlError::SignatureInvalid(_)), "{}", rejection);
		assert_eq!(rejection.stage, Stage::TrustResolved);
	}
}

#[test]
fn test_deeply_nested_request() {
	let table = fixtures::trust_table();
	let idp_side = Inbound::new(&table, InboundPolicy::default(), CodecLimits::default());

	let depth = 5_000;
	let xml = AuthnRequest::new(fixtures::SP_ENTITY, None, None).to_xml().unwrap().replace(
		"</samlp:AuthnRequest>",
		&format!("{}{}</samlp:AuthnRequest>", "<a xmlns=\"u\">".repeat(depth), "</a>".repeat(depth)),
	);
	let encoded = codec::encode_base64(xml);
	let message = PostMessage::from_fields([("SAMLRequest", encoded.as_str())]).unwrap();

	let rejection = idp_side.post(&message).unwrap_err();
	assert!(matches!(rejection.error, SamlError::MalformedDocument(_)));
	assert_eq!(rejection.stage, Stage::Decoded);
}

#[test]
fn test_padded_issuer_is_not_trusted() {
	init_logger();
	let table = fixtures::trust_table();
	let idp_side = Inbound::new(&table, InboundPolicy::default(), CodecLimits::default());

	let xml = AuthnRequest::new(fixtures::SP_ENTITY, None, None).to_xml().unwrap().replace(
		&format!("<saml:Issuer>{}</saml:Issuer>", fixtures::SP_ENTITY),
		&format!("<saml:Issuer>  {}\n</saml:Issuer>", fixtures::SP_ENTITY),
	);
	let mut doc = ParsedDocument::parse_str(&xml).unwrap();
	assert_eq!(accessor::issuer(&doc), Some(format!("  {}\n", fixtures::SP_ENTITY)));

	sp_sign(&mut doc);
	let message = PostBinding::default().encode(MessageKind::Request, &doc, None).unwrap();

	let rejection = idp_side.post(&message).unwrap_err();
	assert!(matches!(rejection.error, SamlError::NotTrusted(_)));
	assert_eq!(rejection.stage, Stage::IssuerExtracted);
}

fn sp_sign(doc: &mut ParsedDocument) {
	let options = SignOptions::default().id_attr("ID").insert_after(NS_ASSERTION, "Issuer");
	sign_doc(&fixtures::sp_key(), SignatureAlgorithm::RsaSha256, doc, &options).unwrap();
}
