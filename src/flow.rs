//! Inbound verification pipeline and outbound signing
//!
//! Inbound messages walk a fixed sequence of stages:
//!
//! ```text
//! received -> decoded -> parsed -> issuer-extracted -> trust-resolved
//!          -> signature-verified -> fields-extracted -> accepted
//! ```
//!
//! and any failure ends in a [`Rejection`] that records how far the message
//! got and which status code a reply should carry. Outbound messages are
//! rendered from a template, signed and handed to a binding.

use std::fmt;

use derive_more::{Display, Error};

use crate::accessor::{self, ExtractedFields};
use crate::binding::{
	Binding, CodecLimits, DecodeError, Decoded, MessageKind, PostBinding, PostMessage, RedirectBinding,
	RedirectMessage, RedirectQuery, SignatureCheck,
};
use crate::dsig::{find_signature, sign_doc, verify_signed_node, SignOptions, VerifyOptions};
use crate::error::{Result, SamlError};
use crate::keys::{SignatureAlgorithm, SigningKey};
use crate::status::StatusCode;
use crate::template::{LogoutResponse, Response, Template};
use crate::trust::{resolve_issuer, TrustResolver};
use crate::xml::{schema, NodeId, ParsedDocument};
use crate::{NS_ASSERTION, SAML_VERSION};

/// Progress of an inbound message through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
	Received,
	Decoded,
	Parsed,
	IssuerExtracted,
	TrustResolved,
	SignatureVerified,
	FieldsExtracted,
}

impl fmt::Display for Stage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Received => "received",
			Self::Decoded => "decoded",
			Self::Parsed => "parsed",
			Self::IssuerExtracted => "issuer-extracted",
			Self::TrustResolved => "trust-resolved",
			Self::SignatureVerified => "signature-verified",
			Self::FieldsExtracted => "fields-extracted",
		})
	}
}

/// What an inbound message has to satisfy to be accepted
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct InboundPolicy {
	/// Reject messages that carry neither a detached nor an embedded signature
	pub require_signature: bool,
	/// Run the structural schema check after parsing
	pub validate_schema: bool,
	/// Extra ID attribute name for resolving signature references
	pub id_attr: Option<String>,
}

impl Default for InboundPolicy {
	fn default() -> Self {
		Self {
			require_signature: true,
			validate_schema: true,
			id_attr: None,
		}
	}
}

/// A message that passed every stage
#[derive(Debug, Clone)]
pub struct Accepted {
	pub binding: Binding,
	pub kind: MessageKind,
	pub fields: ExtractedFields,
	pub relay_state: Option<String>,
	pub document: ParsedDocument,
}

/// Why and where an inbound message was turned down
#[derive(Debug, Display, Error)]
#[display("Message rejected after stage {stage}: {error}")]
pub struct Rejection {
	/// Last stage the message completed
	pub stage: Stage,
	pub status: StatusCode,
	#[error(source)]
	pub error: SamlError,
	pub binding: Binding,
	/// Root element name of the rejected message, when it parsed
	pub message_kind: Option<String>,
	pub message_id: Option<String>,
	pub issuer: Option<String>,
	pub relay_state: Option<String>,
}

impl Rejection {
	fn new(stage: Stage, binding: Binding, error: SamlError, document: Option<&ParsedDocument>, relay_state: Option<String>) -> Self {
		let status = error.status();
		log::warn!("Rejecting {} message after stage {}: {}", binding.uri(), stage, error);

		Self {
			stage,
			status,
			error,
			binding,
			message_kind: document.and_then(accessor::message_kind),
			message_id: document.and_then(|doc| accessor::message_id(doc).ok()),
			issuer: document.and_then(accessor::issuer),
			relay_state,
		}
	}

	fn from_decode(binding: Binding, error: DecodeError, relay_state: Option<String>) -> Self {
		let stage = match (&error.document, &error.error) {
			(None, SamlError::Codec(_)) => Stage::Received,
			(None, _) => Stage::Decoded,
			(Some(_), SamlError::NotTrusted(_)) => Stage::IssuerExtracted,
			(Some(_), _) => Stage::Parsed,
		};
		Self::new(stage, binding, error.error, error.document.as_ref(), relay_state)
	}
}

/// Inbound message processor bound to one trust resolver
pub struct Inbound<'a> {
	resolver: &'a dyn TrustResolver,
	policy: InboundPolicy,
	limits: CodecLimits,
}

impl<'a> Inbound<'a> {
	pub fn new(resolver: &'a dyn TrustResolver, policy: InboundPolicy, limits: CodecLimits) -> Self {
		Self {
			resolver,
			policy,
			limits,
		}
	}

	pub fn policy(&self) -> &InboundPolicy {
		&self.policy
	}

	pub fn redirect(&self, query: &RedirectQuery) -> std::result::Result<Accepted, Rejection> {
		let relay_state = query.relay_state().map(str::to_string);
		match RedirectBinding::new(self.limits).decode(query, self.resolver) {
			Ok(decoded) => self.process(decoded),
			Err(error) => Err(Rejection::from_decode(Binding::HttpRedirect, error, relay_state)),
		}
	}

	pub fn post(&self, message: &PostMessage) -> std::result::Result<Accepted, Rejection> {
		match PostBinding::new(self.limits).decode(message) {
			Ok(decoded) => self.process(decoded),
			Err(error) => Err(Rejection::from_decode(Binding::HttpPost, error, message.relay_state.clone())),
		}
	}

	fn process(&self, decoded: Decoded) -> std::result::Result<Accepted, Rejection> {
		let Decoded {
			binding,
			kind,
			document,
			relay_state,
			signature_check,
			..
		} = decoded;

		let reject = |stage: Stage, error: SamlError| Rejection::new(stage, binding, error, Some(&document), relay_state.clone());

		match accessor::version(&document) {
			Some(version) if version == SAML_VERSION => {}
			Some(version) => return Err(reject(Stage::Parsed, SamlError::VersionMismatch(version))),
			None => {
				return Err(reject(
					Stage::Parsed,
					SamlError::MalformedDocument("Message has no Version attribute".to_string()),
				))
			}
		}
		if self.policy.validate_schema {
			schema::validate(&document).map_err(|error| reject(Stage::Parsed, error))?;
		}

		let issuer = accessor::issuer(&document);
		let keys = resolve_issuer(self.resolver, issuer.as_deref()).map_err(|error| reject(Stage::IssuerExtracted, error))?;

		match signature_check {
			SignatureCheck::Valid => {}
			SignatureCheck::Invalid => {
				return Err(reject(
					Stage::TrustResolved,
					SamlError::SignatureInvalid("detached signature does not verify".to_string()),
				));
			}
			SignatureCheck::Absent => {
				if find_signature(&document).is_some() {
					let options = VerifyOptions {
						id_attr: self.policy.id_attr.clone(),
					};
					match verify_signed_node(&keys, &document, &options) {
						Ok(Some(signed)) => {
							check_coverage(&document, signed).map_err(|error| reject(Stage::TrustResolved, error))?;
						}
						Ok(None) => {
							return Err(reject(
								Stage::TrustResolved,
								SamlError::SignatureInvalid("embedded signature does not verify".to_string()),
							));
						}
						Err(error) => return Err(reject(Stage::TrustResolved, error)),
					}
				} else if self.policy.require_signature {
					return Err(reject(
						Stage::TrustResolved,
						SamlError::SignatureInvalid("message is not signed".to_string()),
					));
				} else {
					log::debug!("Accepting unsigned message as allowed by policy");
				}
			}
		}

		let fields = ExtractedFields::extract(&document).map_err(|error| reject(Stage::SignatureVerified, error))?;
		log::info!(
			"Accepted {} {} from {}",
			fields.kind,
			fields.message_id,
			fields.issuer.as_deref().unwrap_or("-")
		);

		Ok(Accepted {
			binding,
			kind,
			fields,
			relay_state,
			document,
		})
	}
}

/// Make sure an embedded signature vouches for everything the accessor reads
///
/// A signature over the whole message always does. A signature over an
/// assertion only does when that assertion is the one and only assertion of
/// the message, otherwise an unsigned sibling could supply the subject.
fn check_coverage(doc: &ParsedDocument, signed: NodeId) -> Result<()> {
	let root = doc.root_element();
	if signed == root || signed == doc.document_node() {
		return Ok(());
	}

	match doc.find_children(root, NS_ASSERTION, "Assertion").as_slice() {
		[only] if *only == signed => Ok(()),
		[_] | [] => Err(SamlError::SignatureInvalid(
			"signature covers neither the message nor its assertion".to_string(),
		)),
		assertions => Err(SamlError::SignatureInvalid(format!(
			"signature covers one of {} assertions",
			assertions.len()
		))),
	}
}

/// An encoded message ready for the HTTP layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
	Post(PostMessage),
	Redirect(RedirectMessage),
}

/// Signs and encodes messages on behalf of our own entity
#[derive(Debug, Clone)]
pub struct Outbound {
	entity_id: String,
	key: SigningKey,
	algorithm: SignatureAlgorithm,
	limits: CodecLimits,
}

impl Outbound {
	pub fn new<S: Into<String>>(entity_id: S, key: SigningKey, algorithm: SignatureAlgorithm) -> Self {
		Self {
			entity_id: entity_id.into(),
			key,
			algorithm,
			limits: CodecLimits::default(),
		}
	}

	pub fn with_limits(mut self, limits: CodecLimits) -> Self {
		self.limits = limits;
		self
	}

	pub fn entity_id(&self) -> &str {
		&self.entity_id
	}

	/// Insert an embedded signature over the root element, right after its `Issuer`
	pub fn sign_embedded(&self, doc: &mut ParsedDocument) -> Result<()> {
		let options = SignOptions::default()
			.id_attr("ID")
			.insert_after(NS_ASSERTION, "Issuer");
		sign_doc(&self.key, self.algorithm, doc, &options)
	}

	/// Render, sign inside the XML and encode for the POST binding
	pub fn post<T: Template>(&self, message: &T, relay_state: Option<&str>) -> Result<PostMessage> {
		let mut doc = message.to_document()?;
		self.sign_embedded(&mut doc)?;
		PostBinding::new(self.limits).encode(T::KIND, &doc, relay_state)
	}

	/// Render and encode for the redirect binding with a detached signature
	pub fn redirect<T: Template>(&self, message: &T, relay_state: Option<&str>) -> Result<RedirectMessage> {
		let doc = message.to_document()?;
		RedirectBinding::new(self.limits).encode(T::KIND, &doc, relay_state, Some((&self.key, self.algorithm)))
	}

	pub fn send<T: Template>(&self, binding: Binding, message: &T, relay_state: Option<&str>) -> Result<OutboundMessage> {
		match binding {
			Binding::HttpPost => self.post(message, relay_state).map(OutboundMessage::Post),
			Binding::HttpRedirect => self.redirect(message, relay_state).map(OutboundMessage::Redirect),
		}
	}

	/// Signed status response answering a rejected message
	///
	/// Logout requests get a `LogoutResponse`, everything else a `Response`.
	/// Only our own signing failing makes this an error, which the caller has
	/// to surface as a transport-level failure.
	pub fn status_response(&self, rejection: &Rejection, destination: Option<&str>) -> Result<OutboundMessage> {
		// Details of local failures stay local
		let message = match rejection.status {
			StatusCode::Responder => None,
			_ => Some(rejection.error.to_string()),
		};
		let in_response_to = rejection.message_id.as_deref();
		let relay_state = rejection.relay_state.as_deref();

		let result = if rejection.message_kind.as_deref() == Some("LogoutRequest") {
			let response = LogoutResponse::new(&self.entity_id, destination, in_response_to, rejection.status);
			self.send(rejection.binding, &response, relay_state)
		} else {
			let response = Response::status(&self.entity_id, destination, in_response_to, rejection.status, message.as_deref());
			self.send(rejection.binding, &response, relay_state)
		};

		result.map_err(|error| {
			log::error!("Could not produce a status response: {}", error);
			error
		})
	}
}
