//! HTTP-Redirect binding
//!
//! The message is deflated, base64 encoded and carried in the query string.
//! Signing happens over the query string itself rather than over the XML: the
//! signer builds
//!
//! ```text
//! SAMLRequest=<enc>[&RelayState=<enc>]&SigAlg=<enc>
//! ```
//!
//! from the URL-encoded values in exactly that order and appends the base64
//! signature as `Signature`. A verifier has to rebuild the same bytes from what
//! was actually transmitted, which is why [`RedirectQuery`] keeps the raw
//! encoded form of every parameter it parsed.

use url::Url;

use super::{
	Binding, CodecLimits, DecodeError, Decoded, MessageKind, SignatureCheck, PARAM_RELAY_STATE, PARAM_REQUEST,
	PARAM_RESPONSE, PARAM_SIGNATURE, PARAM_SIG_ALG,
};
use crate::accessor;
use crate::codec::{compress, decode_base64, decompress_limited, encode_base64, url_decode, url_encode};
use crate::dsig::{sign_binary, verify_binary};
use crate::error::{CodecError, Result, SamlError};
use crate::keys::{SignatureAlgorithm, SigningKey};
use crate::trust::{resolve_issuer, TrustResolver};
use crate::xml::ParsedDocument;

/// The exact byte string covered by a redirect-binding signature
///
/// All values must already be URL-encoded, as they appear on the wire.
pub fn signing_input(kind: MessageKind, message: &str, relay_state: Option<&str>, sig_alg: &str) -> String {
	let mut input = format!("{}={}", kind.param(), message);
	if let Some(relay_state) = relay_state {
		input.push_str("&RelayState=");
		input.push_str(relay_state);
	}
	input.push_str("&SigAlg=");
	input.push_str(sig_alg);
	input
}

/// Encoded redirect parameters, in transmission order, values not URL-encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectMessage {
	pub kind: MessageKind,
	pub params: Vec<(&'static str, String)>,
}

impl RedirectMessage {
	pub fn get(&self, name: &str) -> Option<&str> {
		self.params
			.iter()
			.find(|(key, _)| *key == name)
			.map(|(_, value)| value.as_str())
	}

	/// `key=value&...` with every value URL-encoded
	pub fn to_query_string(&self) -> String {
		self.params
			.iter()
			.map(|(key, value)| format!("{}={}", key, url_encode(value)))
			.collect::<Vec<_>>()
			.join("&")
	}

	/// Append the parameters to a destination URL, keeping any query it already has
	pub fn to_url(&self, destination: &str) -> Result<Url> {
		let mut url = Url::parse(destination)
			.map_err(|e| SamlError::Config(format!("Invalid destination URL {}: {}", destination, e)))?;
		let query = match url.query() {
			Some(existing) if !existing.is_empty() => format!("{}&{}", existing, self.to_query_string()),
			_ => self.to_query_string(),
		};
		url.set_query(Some(&query));
		Ok(url)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Param {
	/// Percent-decoded value
	value: String,
	/// Value as transmitted
	raw: String,
}

impl Param {
	fn from_raw(raw: &str) -> std::result::Result<Self, CodecError> {
		Ok(Self {
			value: url_decode(raw)?,
			raw: raw.to_string(),
		})
	}

	fn from_value(value: &str) -> Self {
		Self {
			value: value.to_string(),
			raw: url_encode(value),
		}
	}
}

/// Redirect parameters as received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectQuery {
	kind: MessageKind,
	message: Param,
	relay_state: Option<Param>,
	sig_alg: Option<Param>,
	signature: Option<Param>,
}

impl RedirectQuery {
	/// Parse a raw query string, preserving each value's transmitted encoding
	///
	/// A leading `?` is ignored. `+` is taken literally, not as a space.
	pub fn from_query(query: &str) -> Result<Self> {
		let query = query.strip_prefix('?').unwrap_or(query);
		let mut params = Vec::new();
		for pair in query.split('&').filter(|pair| !pair.is_empty()) {
			let (key, raw) = pair.split_once('=').unwrap_or((pair, ""));
			params.push((url_decode(key)?, Param::from_raw(raw)?));
		}
		Self::build(params)
	}

	/// Build from values the HTTP layer already percent-decoded
	///
	/// The signature input is then rebuilt with canonical RFC 3986 encoding,
	/// which only matches senders that encoded the same way. Prefer
	/// [`Self::from_query`] when the raw query string is available.
	pub fn from_params<'a, I>(params: I) -> Result<Self>
	where
		I: IntoIterator<Item = (&'a str, &'a str)>,
	{
		Self::build(
			params
				.into_iter()
				.map(|(key, value)| (key.to_string(), Param::from_value(value)))
				.collect(),
		)
	}

	fn build(params: Vec<(String, Param)>) -> Result<Self> {
		let mut message = None;
		let mut relay_state = None;
		let mut sig_alg = None;
		let mut signature = None;

		for (key, param) in params {
			let slot = match key.as_str() {
				PARAM_REQUEST | PARAM_RESPONSE => {
					if message.is_some() {
						return Err(SamlError::MalformedDocument("More than one SAML message parameter".to_string()));
					}
					let kind = MessageKind::from_param(&key).unwrap_or(MessageKind::Request);
					message = Some((kind, param));
					continue;
				}
				PARAM_RELAY_STATE => &mut relay_state,
				PARAM_SIG_ALG => &mut sig_alg,
				PARAM_SIGNATURE => &mut signature,
				_ => continue,
			};
			if slot.is_some() {
				return Err(SamlError::MalformedDocument(format!("Duplicate {} parameter", key)));
			}
			*slot = Some(param);
		}

		let (kind, message) = message.ok_or(CodecError::MissingParameter(PARAM_REQUEST))?;
		Ok(Self {
			kind,
			message,
			relay_state,
			sig_alg,
			signature,
		})
	}

	pub fn kind(&self) -> MessageKind {
		self.kind
	}

	pub fn relay_state(&self) -> Option<&str> {
		self.relay_state.as_ref().map(|param| param.value.as_str())
	}

	/// Signing input rebuilt from the transmitted parameters
	fn signing_input(&self, sig_alg: &Param) -> String {
		signing_input(
			self.kind,
			&self.message.raw,
			self.relay_state.as_ref().map(|param| param.raw.as_str()),
			&sig_alg.raw,
		)
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedirectBinding {
	pub limits: CodecLimits,
}

impl RedirectBinding {
	pub fn new(limits: CodecLimits) -> Self {
		Self { limits }
	}

	/// Encode a message, optionally with a detached signature
	pub fn encode(
		&self,
		kind: MessageKind,
		doc: &ParsedDocument,
		relay_state: Option<&str>,
		signer: Option<(&SigningKey, SignatureAlgorithm)>,
	) -> Result<RedirectMessage> {
		self.limits.check_relay_state(relay_state)?;

		let message = encode_base64(compress(&doc.serialize())?);
		let mut params = vec![(kind.param(), message)];
		if let Some(relay_state) = relay_state {
			params.push((PARAM_RELAY_STATE, relay_state.to_string()));
		}

		if let Some((key, algorithm)) = signer {
			let input = signing_input(
				kind,
				&url_encode(&params[0].1),
				relay_state.map(url_encode).as_deref(),
				&url_encode(algorithm.uri()),
			);
			let signature = sign_binary(key, algorithm, input.as_bytes())?;
			params.push((PARAM_SIG_ALG, algorithm.uri().to_string()));
			params.push((PARAM_SIGNATURE, encode_base64(signature)));
		}

		Ok(RedirectMessage { kind, params })
	}

	/// Decode a message and check its detached signature, if any
	///
	/// The signature is checked only against the keys of the issuer the
	/// message itself declares. An unsigned message decodes fine with
	/// [`SignatureCheck::Absent`]; whether that is acceptable is up to the
	/// caller.
	pub fn decode(&self, query: &RedirectQuery, resolver: &dyn TrustResolver) -> std::result::Result<Decoded, DecodeError> {
		self.limits.check_relay_state(query.relay_state())?;

		let deflated = decode_base64(&query.message.value)?;
		let xml = decompress_limited(&deflated, self.limits.max_inflated_size)?;
		let document = ParsedDocument::parse(&xml)?;

		let (sig_alg, signature) = match (&query.sig_alg, &query.signature) {
			(None, None) => {
				return Ok(Decoded {
					binding: Binding::HttpRedirect,
					kind: query.kind,
					document,
					relay_state: query.relay_state().map(str::to_string),
					sig_alg: None,
					signature_check: SignatureCheck::Absent,
				});
			}
			(Some(sig_alg), Some(signature)) => (sig_alg, signature),
			_ => {
				return Err(DecodeError::with_document(
					SamlError::MalformedDocument("SigAlg and Signature must be sent together".to_string()),
					document,
				));
			}
		};

		let algorithm = match SignatureAlgorithm::from_href(&sig_alg.value) {
			Ok(algorithm) => algorithm,
			Err(error) => return Err(DecodeError::with_document(error, document)),
		};

		let keys = match resolve_issuer(resolver, accessor::issuer(&document).as_deref()) {
			Ok(keys) => keys,
			Err(error) => return Err(DecodeError::with_document(error, document)),
		};

		let signature_check = match decode_base64(&signature.value) {
			Ok(signature) if verify_binary(&keys, algorithm, query.signing_input(sig_alg).as_bytes(), &signature) => {
				SignatureCheck::Valid
			}
			Ok(_) => {
				log::warn!("Redirect binding signature did not verify");
				SignatureCheck::Invalid
			}
			Err(error) => {
				log::warn!("Redirect binding signature is not valid base64: {}", error);
				SignatureCheck::Invalid
			}
		};

		Ok(Decoded {
			binding: Binding::HttpRedirect,
			kind: query.kind,
			document,
			relay_state: query.relay_state().map(str::to_string),
			sig_alg: Some(algorithm),
			signature_check,
		})
	}
}
