//! XML signatures: enveloped signatures inside documents and detached
//! signatures over raw bytes
//!
//! Only the profile SAML uses is supported: one `Reference` to the whole
//! document or to the element carrying the signature, the enveloped-signature
//! transform, exclusive canonicalization and RSA PKCS#1 v1.5.

pub mod sign;
pub mod verify;

pub use self::sign::{sign_binary, sign_doc, sign_xml};
pub use self::verify::{find_signature, verify_binary, verify_doc, verify_signed_node};

/// Attribute names always treated as element IDs
const DEFAULT_ID_ATTRS: &[&str] = &["ID", "Id", "id"];

fn id_attrs(extra: Option<&str>) -> Vec<&str> {
	let mut attrs = DEFAULT_ID_ATTRS.to_vec();
	if let Some(extra) = extra {
		if !attrs.contains(&extra) {
			attrs.push(extra);
		}
	}
	attrs
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignOptions {
	/// Sign the root element by the value of this attribute (`URI="#value"`)
	/// instead of the whole document (`URI=""`)
	pub id_attr: Option<String>,
	/// Place the signature right after this `(namespace, local name)` child of
	/// the root instead of appending it
	pub insert_after: Option<(String, String)>,
}

impl SignOptions {
	pub fn id_attr<S: Into<String>>(mut self, id_attr: S) -> Self {
		self.id_attr = Some(id_attr.into());
		self
	}

	pub fn insert_after<N: Into<String>, L: Into<String>>(mut self, namespace: N, local: L) -> Self {
		self.insert_after = Some((namespace.into(), local.into()));
		self
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyOptions {
	/// Extra attribute name to resolve `#id` references against
	pub id_attr: Option<String>,
}

impl VerifyOptions {
	pub fn id_attr<S: Into<String>>(mut self, id_attr: S) -> Self {
		self.id_attr = Some(id_attr.into());
		self
	}
}
