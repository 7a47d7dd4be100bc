use std::fmt;

use crate::STATUS_PREFIX;

/// Top-level SAML status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusCode {
	Success,
	Requester,
	Responder,
	VersionMismatch,
}

impl StatusCode {
	#[must_use]
	pub const fn uri(&self) -> &'static str {
		match self {
			Self::Success => "urn:oasis:names:tc:SAML:2.0:status:Success",
			Self::Requester => "urn:oasis:names:tc:SAML:2.0:status:Requester",
			Self::Responder => "urn:oasis:names:tc:SAML:2.0:status:Responder",
			Self::VersionMismatch => "urn:oasis:names:tc:SAML:2.0:status:VersionMismatch",
		}
	}

	#[must_use]
	pub fn from_uri(uri: &str) -> Option<Self> {
		match uri.strip_prefix(STATUS_PREFIX)? {
			"Success" => Some(Self::Success),
			"Requester" => Some(Self::Requester),
			"Responder" => Some(Self::Responder),
			"VersionMismatch" => Some(Self::VersionMismatch),
			_ => None,
		}
	}

	#[must_use]
	pub const fn is_success(&self) -> bool {
		matches!(self, Self::Success)
	}
}

impl fmt::Display for StatusCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.uri())
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	#[test]
	fn test_uri_roundtrip() {
		for code in [StatusCode::Success, StatusCode::Requester, StatusCode::Responder, StatusCode::VersionMismatch] {
			assert_eq!(StatusCode::from_uri(code.uri()), Some(code));
		}
		assert_eq!(StatusCode::from_uri("urn:oasis:names:tc:SAML:2.0:status:AuthnFailed"), None);
		assert_eq!(StatusCode::from_uri("Success"), None);
	}
}
