//! HTTP-POST binding
//!
//! The message is base64 encoded (not compressed) into a hidden form field and
//! delivered by an auto-submitting HTML form. There is no detached signature:
//! a POST message is either signed inside the XML or not at all.

use std::collections::BTreeMap;

use handlebars::Handlebars;

use super::{
	Binding, CodecLimits, DecodeError, Decoded, MessageKind, SignatureCheck, PARAM_RELAY_STATE, PARAM_REQUEST,
	PARAM_RESPONSE, PARAM_SIGNATURE, PARAM_SIG_ALG,
};
use crate::codec::{decode_base64_wrapped, encode_base64};
use crate::error::{CodecError, Result, SamlError};
use crate::xml::ParsedDocument;

const FORM_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Continue</title></head>
<body onload="document.forms[0].submit()">
<noscript><p>JavaScript is disabled, press Continue to proceed.</p></noscript>
<form method="post" action="{{action}}">
<input type="hidden" name="{{param}}" value="{{message}}"/>
{{#if relay_state}}<input type="hidden" name="RelayState" value="{{relay_state}}"/>
{{/if}}<noscript><input type="submit" value="Continue"/></noscript>
</form>
</body>
</html>
"#;

fn render_form(template: &str, data: &BTreeMap<&str, &str>) -> Result<String> {
	Handlebars::new()
		.render_template(template, data)
		.map_err(|e| SamlError::Render(format!("Could not render the POST form: {}", e)))
}

/// A POST binding message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostMessage {
	pub kind: MessageKind,
	/// Base64 of the serialized document
	pub message: String,
	pub relay_state: Option<String>,
}

impl PostMessage {
	/// Form fields in submission order
	pub fn form_fields(&self) -> Vec<(&'static str, &str)> {
		let mut fields = vec![(self.kind.param(), self.message.as_str())];
		if let Some(relay_state) = &self.relay_state {
			fields.push((PARAM_RELAY_STATE, relay_state.as_str()));
		}
		fields
	}

	/// `application/x-www-form-urlencoded` body
	pub fn to_form_body(&self) -> String {
		url::form_urlencoded::Serializer::new(String::new())
			.extend_pairs(self.form_fields())
			.finish()
	}

	/// Minimal HTML page that posts the message to `action` on load
	pub fn to_html(&self, action: &str) -> Result<String> {
		let mut data = BTreeMap::new();
		data.insert("action", action);
		data.insert("param", self.kind.param());
		data.insert("message", self.message.as_str());
		if let Some(relay_state) = &self.relay_state {
			data.insert("relay_state", relay_state.as_str());
		}

		render_form(FORM_TEMPLATE, &data)
	}

	/// Parse an `application/x-www-form-urlencoded` body
	pub fn from_form_body(body: &str) -> Result<Self> {
		let fields: Vec<(String, String)> = url::form_urlencoded::parse(body.as_bytes()).into_owned().collect();
		Self::from_fields(fields.iter().map(|(key, value)| (key.as_str(), value.as_str())))
	}

	/// Build from already decoded form fields
	pub fn from_fields<'a, I>(fields: I) -> Result<Self>
	where
		I: IntoIterator<Item = (&'a str, &'a str)>,
	{
		let mut message = None;
		let mut relay_state = None;

		for (key, value) in fields {
			match key {
				PARAM_REQUEST | PARAM_RESPONSE => {
					if message.is_some() {
						return Err(SamlError::MalformedDocument("More than one SAML message field".to_string()));
					}
					let kind = MessageKind::from_param(key).unwrap_or(MessageKind::Request);
					message = Some((kind, value.to_string()));
				}
				PARAM_RELAY_STATE => {
					if relay_state.is_some() {
						return Err(SamlError::MalformedDocument("Duplicate RelayState field".to_string()));
					}
					relay_state = Some(value.to_string());
				}
				PARAM_SIG_ALG | PARAM_SIGNATURE => {
					return Err(SamlError::MalformedDocument(format!(
						"{} is not allowed on the POST binding",
						key
					)));
				}
				_ => {}
			}
		}

		let (kind, message) = message.ok_or(CodecError::MissingParameter(PARAM_REQUEST))?;
		Ok(Self {
			kind,
			message,
			relay_state,
		})
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostBinding {
	pub limits: CodecLimits,
}

impl PostBinding {
	pub fn new(limits: CodecLimits) -> Self {
		Self { limits }
	}

	pub fn encode(&self, kind: MessageKind, doc: &ParsedDocument, relay_state: Option<&str>) -> Result<PostMessage> {
		self.limits.check_relay_state(relay_state)?;
		Ok(PostMessage {
			kind,
			message: encode_base64(doc.serialize()),
			relay_state: relay_state.map(str::to_string),
		})
	}

	/// Decode a message; the signature inside the document is left for the caller
	pub fn decode(&self, message: &PostMessage) -> std::result::Result<Decoded, DecodeError> {
		self.limits.check_relay_state(message.relay_state.as_deref())?;

		// base64 expands by 4/3, anything longer cannot decode within the limit
		if message.message.len() / 4 * 3 > self.limits.max_inflated_size {
			return Err(CodecError::TooLarge(self.limits.max_inflated_size).into());
		}

		let xml = decode_base64_wrapped(&message.message)?;
		let document = ParsedDocument::parse(&xml)?;

		Ok(Decoded {
			binding: Binding::HttpPost,
			kind: message.kind,
			document,
			relay_state: message.relay_state.clone(),
			sig_alg: None,
			signature_check: SignatureCheck::Absent,
		})
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use crate::accessor;
	use scraper::{Html, Selector};

	const RESPONSE: &str = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_p1" Version="2.0" IssueInstant="2024-01-01T00:00:00Z"><samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status></samlp:Response>"#;

	fn response() -> ParsedDocument {
		ParsedDocument::parse_str(RESPONSE).unwrap()
	}

	#[test]
	fn test_roundtrip_form_body() {
		let binding = PostBinding::default();
		let message = binding.encode(MessageKind::Response, &response(), Some("state+1 &2")).unwrap();
		assert!(!message.message.contains('\n'));

		let parsed = PostMessage::from_form_body(&message.to_form_body()).unwrap();
		assert_eq!(parsed, message);

		let decoded = binding.decode(&parsed).unwrap();
		assert_eq!(decoded.binding, Binding::HttpPost);
		assert_eq!(decoded.kind, MessageKind::Response);
		assert_eq!(decoded.relay_state.as_deref(), Some("state+1 &2"));
		assert_eq!(decoded.signature_check, SignatureCheck::Absent);
		assert_eq!(accessor::message_id(&decoded.document).unwrap(), "_p1");
	}

	#[test]
	fn test_html_form() {
		let message = PostBinding::default()
			.encode(MessageKind::Response, &response(), Some("\"><script>"))
			.unwrap();
		let html = message.to_html("https://sp.example.com/acs?a=1&b=2").unwrap();
		let document = Html::parse_document(&html);

		let form = document.select(&Selector::parse("form").unwrap()).next().unwrap();
		assert_eq!(form.value().attr("method"), Some("post"));
		assert_eq!(form.value().attr("action"), Some("https://sp.example.com/acs?a=1&b=2"));

		let saml = document
			.select(&Selector::parse("input[name=SAMLResponse]").unwrap())
			.next()
			.unwrap();
		assert_eq!(saml.value().attr("value"), Some(message.message.as_str()));

		let relay = document
			.select(&Selector::parse("input[name=RelayState]").unwrap())
			.next()
			.unwrap();
		assert_eq!(relay.value().attr("value"), Some("\"><script>"));
		assert!(document.select(&Selector::parse("script").unwrap()).next().is_none());
	}

	#[test]
	fn test_form_render_error() {
		let data = BTreeMap::from([("action", "https://sp.example.com/acs")]);
		let result = render_form("<form action=\"{{action}}\">{{#if relay_state}}", &data);
		assert!(matches!(result, Err(SamlError::Render(_))));
		assert!(result.unwrap_err().is_local());
	}

	#[test]
	fn test_html_without_relay_state() {
		let message = PostBinding::default().encode(MessageKind::Request, &response(), None).unwrap();
		let document = Html::parse_document(&message.to_html("https://idp.example.com/sso").unwrap());
		assert!(document.select(&Selector::parse("input[name=RelayState]").unwrap()).next().is_none());
		assert!(document.select(&Selector::parse("input[name=SAMLRequest]").unwrap()).next().is_some());
	}

	#[test]
	fn test_detached_signature_rejected() {
		let result = PostMessage::from_fields([("SAMLResponse", "abc"), ("Signature", "xyz")]);
		assert!(matches!(result, Err(SamlError::MalformedDocument(_))));
	}

	#[test]
	fn test_decode_errors() {
		let binding = PostBinding::default();
		let message = PostMessage::from_fields([("SAMLResponse", "not base64!")]).unwrap();
		let error = binding.decode(&message).unwrap_err();
		assert!(matches!(error.error, SamlError::Codec(CodecError::InvalidBase64(_))));

		let message = PostMessage::from_fields([("SAMLResponse", encode_base64("<unclosed>").as_str())]).unwrap();
		let error = binding.decode(&message).unwrap_err();
		assert!(matches!(error.error, SamlError::MalformedDocument(_)));
		assert!(error.document.is_none());

		let small = PostBinding::new(CodecLimits {
			max_inflated_size: 16,
			..CodecLimits::default()
		});
		let message = binding.encode(MessageKind::Response, &response(), None).unwrap();
		assert!(matches!(small.decode(&message).unwrap_err().error, SamlError::Codec(CodecError::TooLarge(16))));
	}

	#[test]
	fn test_wrapped_base64_accepted() {
		let binding = PostBinding::default();
		let message = binding.encode(MessageKind::Response, &response(), None).unwrap();
		let wrapped: String = message
			.message
			.as_bytes()
			.chunks(76)
			.map(|chunk| std::str::from_utf8(chunk).unwrap())
			.collect::<Vec<_>>()
			.join("\r\n");
		let decoded = binding
			.decode(&PostMessage {
				message: wrapped,
				..message
			})
			.unwrap();
		assert_eq!(accessor::message_id(&decoded.document).unwrap(), "_p1");
	}
}
