//! Outbound protocol message templates
//!
//! Plain serde structs rendered with quick-xml's serializer, then parsed back
//! into a [`ParsedDocument`] so they can be signed.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use quick_xml::se::to_string_with_root;
use serde::Serialize;
use uuid::Uuid;

use crate::binding::MessageKind;
use crate::error::Result;
use crate::status::StatusCode;
use crate::xml::ParsedDocument;
use crate::{BINDING_HTTP_POST, NS_ASSERTION, NS_PROTOCOL, SAML_VERSION};

pub const NAMEID_UNSPECIFIED: &str = "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";
pub const ATTRNAME_BASIC: &str = "urn:oasis:names:tc:SAML:2.0:attrname-format:basic";
pub const CM_BEARER: &str = "urn:oasis:names:tc:SAML:2.0:cm:bearer";
pub const AC_PASSWORD: &str = "urn:oasis:names:tc:SAML:2.0:ac:classes:Password";

/// How long an issued assertion stays valid
pub const ASSERTION_LIFETIME_MINUTES: i64 = 5;

/// A fresh message ID; IDs have to be NCNames, hence the underscore
pub fn new_id() -> String {
	format!("_{}", Uuid::new_v4())
}

fn instant(time: DateTime<Utc>) -> String {
	time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// A serializable protocol message
pub trait Template: Serialize {
	/// Qualified root element name
	const ROOT: &'static str;

	const KIND: MessageKind;

	fn to_xml(&self) -> Result<String> {
		Ok(to_string_with_root(Self::ROOT, self)?)
	}

	fn to_document(&self) -> Result<ParsedDocument> {
		ParsedDocument::parse_str(&self.to_xml()?)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthnRequest {
	#[serde(rename = "@xmlns:samlp")]
	pub xmlns_samlp: &'static str,

	#[serde(rename = "@xmlns:saml")]
	pub xmlns_saml: &'static str,

	#[serde(rename = "@ID")]
	pub id: String,

	#[serde(rename = "@Version")]
	pub version: &'static str,

	#[serde(rename = "@IssueInstant")]
	pub issue_instant: String,

	#[serde(rename = "@Destination", skip_serializing_if = "Option::is_none")]
	pub destination: Option<String>,

	#[serde(rename = "@ProtocolBinding")]
	pub protocol_binding: &'static str,

	#[serde(rename = "@AssertionConsumerServiceURL", skip_serializing_if = "Option::is_none")]
	pub acs_url: Option<String>,

	#[serde(rename = "saml:Issuer")]
	pub issuer: String,

	#[serde(rename = "samlp:NameIDPolicy")]
	pub name_id_policy: NameIDPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameIDPolicy {
	#[serde(rename = "@Format")]
	pub format: String,

	#[serde(rename = "@AllowCreate")]
	pub allow_create: bool,
}

impl AuthnRequest {
	pub fn new(issuer: &str, destination: Option<&str>, acs_url: Option<&str>) -> Self {
		Self {
			xmlns_samlp: NS_PROTOCOL,
			xmlns_saml: NS_ASSERTION,
			id: new_id(),
			version: SAML_VERSION,
			issue_instant: instant(Utc::now()),
			destination: destination.map(str::to_string),
			protocol_binding: BINDING_HTTP_POST,
			acs_url: acs_url.map(str::to_string),
			issuer: issuer.to_string(),
			name_id_policy: NameIDPolicy {
				format: NAMEID_UNSPECIFIED.to_string(),
				allow_create: true,
			},
		}
	}
}

impl Template for AuthnRequest {
	const ROOT: &'static str = "samlp:AuthnRequest";
	const KIND: MessageKind = MessageKind::Request;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
	#[serde(rename = "samlp:StatusCode")]
	pub status_code: StatusCodeElement,

	#[serde(rename = "samlp:StatusMessage", skip_serializing_if = "Option::is_none")]
	pub status_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCodeElement {
	#[serde(rename = "@Value")]
	pub value: String,
}

impl Status {
	pub fn new(code: StatusCode, message: Option<&str>) -> Self {
		Self {
			status_code: StatusCodeElement {
				value: code.uri().to_string(),
			},
			status_message: message.map(str::to_string),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
	#[serde(rename = "@xmlns:samlp")]
	pub xmlns_samlp: &'static str,

	#[serde(rename = "@xmlns:saml")]
	pub xmlns_saml: &'static str,

	#[serde(rename = "@ID")]
	pub id: String,

	#[serde(rename = "@Version")]
	pub version: &'static str,

	#[serde(rename = "@IssueInstant")]
	pub issue_instant: String,

	#[serde(rename = "@Destination", skip_serializing_if = "Option::is_none")]
	pub destination: Option<String>,

	#[serde(rename = "@InResponseTo", skip_serializing_if = "Option::is_none")]
	pub in_response_to: Option<String>,

	#[serde(rename = "saml:Issuer")]
	pub issuer: String,

	#[serde(rename = "samlp:Status")]
	pub status: Status,

	#[serde(rename = "saml:Assertion", skip_serializing_if = "Option::is_none")]
	pub assertion: Option<Assertion>,
}

impl Response {
	/// A status-only response, used to answer rejected requests
	pub fn status(issuer: &str, destination: Option<&str>, in_response_to: Option<&str>, code: StatusCode, message: Option<&str>) -> Self {
		Self {
			xmlns_samlp: NS_PROTOCOL,
			xmlns_saml: NS_ASSERTION,
			id: new_id(),
			version: SAML_VERSION,
			issue_instant: instant(Utc::now()),
			destination: destination.map(str::to_string),
			in_response_to: in_response_to.map(str::to_string),
			issuer: issuer.to_string(),
			status: Status::new(code, message),
			assertion: None,
		}
	}

	pub fn success(issuer: &str, destination: Option<&str>, in_response_to: Option<&str>, assertion: Assertion) -> Self {
		Self {
			assertion: Some(assertion),
			..Self::status(issuer, destination, in_response_to, StatusCode::Success, None)
		}
	}
}

impl Template for Response {
	const ROOT: &'static str = "samlp:Response";
	const KIND: MessageKind = MessageKind::Response;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assertion {
	#[serde(rename = "@ID")]
	pub id: String,

	#[serde(rename = "@Version")]
	pub version: &'static str,

	#[serde(rename = "@IssueInstant")]
	pub issue_instant: String,

	#[serde(rename = "saml:Issuer")]
	pub issuer: String,

	#[serde(rename = "saml:Subject")]
	pub subject: Subject,

	#[serde(rename = "saml:Conditions")]
	pub conditions: Conditions,

	#[serde(rename = "saml:AuthnStatement")]
	pub authn_statement: AuthnStatement,

	#[serde(rename = "saml:AttributeStatement", skip_serializing_if = "Option::is_none")]
	pub attribute_statement: Option<AttributeStatement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
	#[serde(rename = "saml:NameID")]
	pub name_id: NameID,

	#[serde(rename = "saml:SubjectConfirmation")]
	pub subject_confirmation: SubjectConfirmation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NameID {
	#[serde(rename = "@Format")]
	pub format: String,

	#[serde(rename = "$value")]
	pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectConfirmation {
	#[serde(rename = "@Method")]
	pub method: String,

	#[serde(rename = "saml:SubjectConfirmationData")]
	pub subject_confirmation_data: SubjectConfirmationData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectConfirmationData {
	#[serde(rename = "@NotOnOrAfter")]
	pub not_on_or_after: String,

	#[serde(rename = "@Recipient", skip_serializing_if = "Option::is_none")]
	pub recipient: Option<String>,

	#[serde(rename = "@InResponseTo", skip_serializing_if = "Option::is_none")]
	pub in_response_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conditions {
	#[serde(rename = "@NotBefore")]
	pub not_before: String,

	#[serde(rename = "@NotOnOrAfter")]
	pub not_on_or_after: String,

	#[serde(rename = "saml:AudienceRestriction")]
	pub audience_restriction: AudienceRestriction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudienceRestriction {
	#[serde(rename = "saml:Audience")]
	pub audience: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthnStatement {
	#[serde(rename = "@AuthnInstant")]
	pub authn_instant: String,

	#[serde(rename = "@SessionIndex")]
	pub session_index: String,

	#[serde(rename = "saml:AuthnContext")]
	pub authn_context: AuthnContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthnContext {
	#[serde(rename = "saml:AuthnContextClassRef")]
	pub authn_context_class_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeStatement {
	#[serde(rename = "saml:Attribute")]
	pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
	#[serde(rename = "@Name")]
	pub name: String,

	#[serde(rename = "@NameFormat")]
	pub name_format: String,

	#[serde(rename = "saml:AttributeValue")]
	pub values: Vec<String>,
}

/// Who the assertion is about and for whom it is meant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssertionSubject<'a> {
	pub issuer: &'a str,
	pub audience: &'a str,
	pub name_id: &'a str,
	pub recipient: Option<&'a str>,
	pub in_response_to: Option<&'a str>,
	pub session_index: Option<&'a str>,
}

impl Assertion {
	pub fn new(subject: &AssertionSubject<'_>, attributes: &BTreeMap<String, Vec<String>>) -> Self {
		let now = Utc::now();
		let expiry = now + Duration::minutes(ASSERTION_LIFETIME_MINUTES);

		let attributes: Vec<Attribute> = attributes
			.iter()
			.map(|(name, values)| Attribute {
				name: name.clone(),
				name_format: ATTRNAME_BASIC.to_string(),
				values: values.clone(),
			})
			.collect();

		Self {
			id: new_id(),
			version: SAML_VERSION,
			issue_instant: instant(now),
			issuer: subject.issuer.to_string(),
			subject: Subject {
				name_id: NameID {
					format: NAMEID_UNSPECIFIED.to_string(),
					value: subject.name_id.to_string(),
				},
				subject_confirmation: SubjectConfirmation {
					method: CM_BEARER.to_string(),
					subject_confirmation_data: SubjectConfirmationData {
						not_on_or_after: instant(expiry),
						recipient: subject.recipient.map(str::to_string),
						in_response_to: subject.in_response_to.map(str::to_string),
					},
				},
			},
			conditions: Conditions {
				not_before: instant(now),
				not_on_or_after: instant(expiry),
				audience_restriction: AudienceRestriction {
					audience: subject.audience.to_string(),
				},
			},
			authn_statement: AuthnStatement {
				authn_instant: instant(now),
				session_index: subject.session_index.map_or_else(new_id, str::to_string),
				authn_context: AuthnContext {
					authn_context_class_ref: AC_PASSWORD.to_string(),
				},
			},
			attribute_statement: if attributes.is_empty() {
				None
			} else {
				Some(AttributeStatement { attributes })
			},
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogoutRequest {
	#[serde(rename = "@xmlns:samlp")]
	pub xmlns_samlp: &'static str,

	#[serde(rename = "@xmlns:saml")]
	pub xmlns_saml: &'static str,

	#[serde(rename = "@ID")]
	pub id: String,

	#[serde(rename = "@Version")]
	pub version: &'static str,

	#[serde(rename = "@IssueInstant")]
	pub issue_instant: String,

	#[serde(rename = "@Destination", skip_serializing_if = "Option::is_none")]
	pub destination: Option<String>,

	#[serde(rename = "saml:Issuer")]
	pub issuer: String,

	#[serde(rename = "saml:NameID")]
	pub name_id: NameID,

	#[serde(rename = "samlp:SessionIndex", skip_serializing_if = "Option::is_none")]
	pub session_index: Option<String>,
}

impl LogoutRequest {
	pub fn new(issuer: &str, destination: Option<&str>, name_id: &str, session_index: Option<&str>) -> Self {
		Self {
			xmlns_samlp: NS_PROTOCOL,
			xmlns_saml: NS_ASSERTION,
			id: new_id(),
			version: SAML_VERSION,
			issue_instant: instant(Utc::now()),
			destination: destination.map(str::to_string),
			issuer: issuer.to_string(),
			name_id: NameID {
				format: NAMEID_UNSPECIFIED.to_string(),
				value: name_id.to_string(),
			},
			session_index: session_index.map(str::to_string),
		}
	}
}

impl Template for LogoutRequest {
	const ROOT: &'static str = "samlp:LogoutRequest";
	const KIND: MessageKind = MessageKind::Request;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogoutResponse {
	#[serde(rename = "@xmlns:samlp")]
	pub xmlns_samlp: &'static str,

	#[serde(rename = "@xmlns:saml")]
	pub xmlns_saml: &'static str,

	#[serde(rename = "@ID")]
	pub id: String,

	#[serde(rename = "@Version")]
	pub version: &'static str,

	#[serde(rename = "@IssueInstant")]
	pub issue_instant: String,

	#[serde(rename = "@Destination", skip_serializing_if = "Option::is_none")]
	pub destination: Option<String>,

	#[serde(rename = "@InResponseTo", skip_serializing_if = "Option::is_none")]
	pub in_response_to: Option<String>,

	#[serde(rename = "saml:Issuer")]
	pub issuer: String,

	#[serde(rename = "samlp:Status")]
	pub status: Status,
}

impl LogoutResponse {
	pub fn new(issuer: &str, destination: Option<&str>, in_response_to: Option<&str>, code: StatusCode) -> Self {
		Self {
			xmlns_samlp: NS_PROTOCOL,
			xmlns_saml: NS_ASSERTION,
			id: new_id(),
			version: SAML_VERSION,
			issue_instant: instant(Utc::now()),
			destination: destination.map(str::to_string),
			in_response_to: in_response_to.map(str::to_string),
			issuer: issuer.to_string(),
			status: Status::new(code, None),
		}
	}
}

impl Template for LogoutResponse {
	const ROOT: &'static str = "samlp:LogoutResponse";
	const KIND: MessageKind = MessageKind::Response;
}
