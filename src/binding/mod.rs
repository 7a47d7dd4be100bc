//! HTTP bindings: how a protocol message travels inside a URL or a form
//!
//! Both codecs turn a [`ParsedDocument`] into transport parameters and back.
//! Decoding failures that happen after the message was parsed hand the
//! document back alongside the error, so the caller can still address a
//! status response to the offending request.

use std::fmt;

use derive_more::{Display, Error};

use crate::codec::DEFAULT_MAX_INFLATED_SIZE;
use crate::error::{CodecError, SamlError};
use crate::keys::SignatureAlgorithm;
use crate::xml::ParsedDocument;
use crate::{BINDING_HTTP_POST, BINDING_HTTP_REDIRECT};

pub mod post;
pub mod redirect;

pub use self::post::{PostBinding, PostMessage};
pub use self::redirect::{RedirectBinding, RedirectMessage, RedirectQuery};

pub const PARAM_REQUEST: &str = "SAMLRequest";
pub const PARAM_RESPONSE: &str = "SAMLResponse";
pub const PARAM_RELAY_STATE: &str = "RelayState";
pub const PARAM_SIG_ALG: &str = "SigAlg";
pub const PARAM_SIGNATURE: &str = "Signature";

/// RelayState is capped at 80 bytes by the bindings profile
pub const DEFAULT_MAX_RELAY_STATE_LEN: usize = 80;

/// Whether a binding message carries a request or a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
	Request,
	Response,
}

impl MessageKind {
	/// Name of the query or form parameter carrying the message
	pub const fn param(&self) -> &'static str {
		match self {
			Self::Request => PARAM_REQUEST,
			Self::Response => PARAM_RESPONSE,
		}
	}

	pub fn from_param(param: &str) -> Option<Self> {
		match param {
			PARAM_REQUEST => Some(Self::Request),
			PARAM_RESPONSE => Some(Self::Response),
			_ => None,
		}
	}
}

impl fmt::Display for MessageKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.param())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
	HttpRedirect,
	HttpPost,
}

impl Binding {
	pub const fn uri(&self) -> &'static str {
		match self {
			Self::HttpRedirect => BINDING_HTTP_REDIRECT,
			Self::HttpPost => BINDING_HTTP_POST,
		}
	}

	pub fn from_uri(uri: &str) -> Option<Self> {
		match uri {
			BINDING_HTTP_REDIRECT => Some(Self::HttpRedirect),
			BINDING_HTTP_POST => Some(Self::HttpPost),
			_ => None,
		}
	}
}

/// Size limits applied while decoding untrusted input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecLimits {
	pub max_inflated_size: usize,
	pub max_relay_state_len: usize,
}

impl Default for CodecLimits {
	fn default() -> Self {
		Self {
			max_inflated_size: DEFAULT_MAX_INFLATED_SIZE,
			max_relay_state_len: DEFAULT_MAX_RELAY_STATE_LEN,
		}
	}
}

impl CodecLimits {
	pub(crate) fn check_relay_state(&self, relay_state: Option<&str>) -> Result<(), CodecError> {
		match relay_state {
			Some(relay_state) if relay_state.len() > self.max_relay_state_len => {
				Err(CodecError::RelayStateTooLong(relay_state.len(), self.max_relay_state_len))
			}
			_ => Ok(()),
		}
	}
}

/// Outcome of the detached-signature check of a redirect message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
	/// No detached signature was sent
	Absent,
	Valid,
	Invalid,
}

/// A successfully decoded binding message
#[derive(Debug, Clone)]
pub struct Decoded {
	pub binding: Binding,
	pub kind: MessageKind,
	pub document: ParsedDocument,
	pub relay_state: Option<String>,
	pub sig_alg: Option<SignatureAlgorithm>,
	pub signature_check: SignatureCheck,
}

/// A decoding failure, with the document when it got as far as parsing
#[derive(Debug, Display, Error)]
#[display("{error}")]
pub struct DecodeError {
	#[error(source)]
	pub error: SamlError,
	pub document: Option<ParsedDocument>,
}

impl DecodeError {
	pub(crate) fn with_document<E: Into<SamlError>>(error: E, document: ParsedDocument) -> Self {
		Self {
			error: error.into(),
			document: Some(document),
		}
	}
}

impl From<SamlError> for DecodeError {
	fn from(error: SamlError) -> Self {
		Self { error, document: None }
	}
}

impl From<CodecError> for DecodeError {
	fn from(error: CodecError) -> Self {
		Self::from(SamlError::from(error))
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	#[test]
	fn test_message_kind_param() {
		assert_eq!(MessageKind::Request.param(), "SAMLRequest");
		assert_eq!(MessageKind::from_param("SAMLResponse"), Some(MessageKind::Response));
		assert_eq!(MessageKind::from_param("samlresponse"), None);
	}

	#[test]
	fn test_binding_uri() {
		for binding in [Binding::HttpRedirect, Binding::HttpPost] {
			assert_eq!(Binding::from_uri(binding.uri()), Some(binding));
		}
		assert_eq!(Binding::from_uri("urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Artifact"), None);
	}

	#[test]
	fn test_relay_state_limit() {
		let limits = CodecLimits::default();
		assert!(limits.check_relay_state(None).is_ok());
		assert!(limits.check_relay_state(Some(&"a".repeat(80))).is_ok());
		assert_eq!(
			limits.check_relay_state(Some(&"a".repeat(81))),
			Err(CodecError::RelayStateTooLong(81, 80))
		);
	}
}
