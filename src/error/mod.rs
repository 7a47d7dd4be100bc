//! Error handling module with domain-specific error types
//!
//! Every fallible operation in the crate returns [`SamlError`]. The binding
//! codecs and the key loaders have their own error types which are folded into
//! it, so that an inbound handler always ends up with a value it can map to a
//! protocol status instead of a panic.

use derive_more::{Display, Error};

use crate::status::StatusCode;

pub use self::codec::CodecError;
pub use self::key::KeyError;

mod codec;
mod key;

pub type Result<T> = std::result::Result<T, SamlError>;

/// Core error that unifies all domain errors
#[derive(Debug, Display, Error)]
pub enum SamlError {
	#[display("Codec error: {_0}")]
	Codec(CodecError),

	#[display("Malformed document: {_0}")]
	MalformedDocument(#[error(not(source))] String),

	#[display("Issuer is not trusted: {_0}")]
	NotTrusted(#[error(not(source))] String),

	#[display("Signature is invalid: {_0}")]
	SignatureInvalid(#[error(not(source))] String),

	#[display("Unsupported algorithm: {_0}")]
	UnsupportedAlgorithm(#[error(not(source))] String),

	#[display("Signing failed: {_0}")]
	SigningFailed(#[error(not(source))] String),

	#[display("Rendering failed: {_0}")]
	Render(#[error(not(source))] String),

	#[display("Unsupported SAML version: {_0}")]
	VersionMismatch(#[error(not(source))] String),

	#[display("Key error: {_0}")]
	Key(KeyError),

	#[display("Config error: {_0}")]
	Config(#[error(not(source))] String),
}

impl SamlError {
	/// The top-level status code a response to the failed message should carry
	///
	/// Anything the remote party got wrong is a `Requester` error, anything
	/// that went wrong on our side is a `Responder` error.
	pub fn status(&self) -> StatusCode {
		match self {
			Self::Codec(_)
			| Self::MalformedDocument(_)
			| Self::NotTrusted(_)
			| Self::SignatureInvalid(_)
			| Self::UnsupportedAlgorithm(_) => StatusCode::Requester,

			Self::VersionMismatch(_) => StatusCode::VersionMismatch,

			Self::SigningFailed(_)
			| Self::Render(_)
			| Self::Key(_)
			| Self::Config(_) => StatusCode::Responder,
		}
	}

	/// Whether the error happened while producing our own signature
	///
	/// Those cannot be answered with a signed status response and have to
	/// surface as a transport-level failure.
	pub fn is_local(&self) -> bool {
		self.status() == StatusCode::Responder
	}
}

impl From<CodecError> for SamlError {
	fn from(error: CodecError) -> Self {
		Self::Codec(error)
	}
}

impl From<KeyError> for SamlError {
	fn from(error: KeyError) -> Self {
		Self::Key(error)
	}
}

impl From<quick_xml::Error> for SamlError {
	fn from(error: quick_xml::Error) -> Self {
		Self::MalformedDocument(format!("XML parse error: {}", error))
	}
}

impl From<quick_xml::events::attributes::AttrError> for SamlError {
	fn from(error: quick_xml::events::attributes::AttrError) -> Self {
		Self::MalformedDocument(format!("XML attribute error: {}", error))
	}
}

impl From<quick_xml::SeError> for SamlError {
	fn from(error: quick_xml::SeError) -> Self {
		Self::Render(format!("Template serialization error: {}", error))
	}
}

impl From<std::string::FromUtf8Error> for SamlError {
	fn from(error: std::string::FromUtf8Error) -> Self {
		Self::MalformedDocument(format!("Decoding error: {}", error))
	}
}

impl From<serde_yaml::Error> for SamlError {
	fn from(error: serde_yaml::Error) -> Self {
		Self::Config(format!("YAML error: {}", error))
	}
}
