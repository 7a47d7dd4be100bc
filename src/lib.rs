//! SAML 2.0 binding and trust verification engine
//!
//! Encodes and decodes protocol messages over the HTTP-Redirect and HTTP-POST
//! bindings, signs outgoing messages and verifies incoming ones against a
//! per-issuer certificate store.
//!
//! ```text
//! inbound:  query/form -> binding -> ParsedDocument -> issuer -> TrustResolver
//!           -> signature check -> ExtractedFields
//! outbound: template -> ParsedDocument -> sign -> binding -> query/form
//! ```

pub mod accessor;
pub mod binding;
pub mod codec;
pub mod config;
pub mod dsig;
pub mod error;
pub mod flow;
pub mod keys;
pub mod status;
pub mod template;
pub mod trust;
pub mod xml;

#[cfg(test)]
pub mod tests;

pub use accessor::{AttributeValue, ExtractedFields};
pub use binding::{Binding, MessageKind};
pub use error::{Result, SamlError};
pub use keys::{Certificate, KeysManager, SignatureAlgorithm, SigningKey};
pub use status::StatusCode;
pub use trust::{TrustResolver, TrustStore, TrustTable};
pub use xml::ParsedDocument;

pub const NS_ASSERTION: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub const NS_PROTOCOL: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
pub const NS_METADATA: &str = "urn:oasis:names:tc:SAML:2.0:metadata";
pub const NS_DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const NS_XML: &str = "http://www.w3.org/XML/1998/namespace";
pub const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

pub const STATUS_PREFIX: &str = "urn:oasis:names:tc:SAML:2.0:status:";

pub const BINDING_HTTP_POST: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
pub const BINDING_HTTP_REDIRECT: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";

pub const SIG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const SIG_RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
pub const SIG_RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const DIGEST_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
pub const DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

pub const TRANSFORM_ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const TRANSFORM_EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

pub const SAML_VERSION: &str = "2.0";
