//! Keys, certificates and signature algorithms
//!
//! A [`SigningKey`] is our own RSA private key plus the certificates that
//! advertise it. A [`KeysManager`] is the read-only set of certificates that
//! may vouch for one remote issuer; any one of them validating is enough, which
//! is what makes certificate rollover work.

use std::fmt;
use std::path::Path;

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256, Sha384, Sha512};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::codec::encode_base64;
use crate::error::{KeyError, Result, SamlError};
use crate::{DIGEST_SHA256, DIGEST_SHA384, DIGEST_SHA512, SIG_RSA_SHA256, SIG_RSA_SHA384, SIG_RSA_SHA512};

fn read_file(path: &Path) -> std::result::Result<Vec<u8>, KeyError> {
	std::fs::read(path).map_err(|e| KeyError::Io {
		path: path.display().to_string(),
		cause: e.to_string(),
	})
}

/// An X.509 certificate carrying an RSA public key
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
	der: Vec<u8>,
	subject: String,
	public_key: RsaPublicKey,
}

impl Certificate {
	pub fn from_der(der: &[u8]) -> std::result::Result<Self, KeyError> {
		let (_, cert) = X509Certificate::from_der(der).map_err(|e| KeyError::InvalidCertificate(e.to_string()))?;

		let public_key = RsaPublicKey::from_public_key_der(cert.public_key().raw)
			.map_err(|e| KeyError::UnsupportedPublicKey(e.to_string()))?;

		Ok(Self {
			der: der.to_vec(),
			subject: cert.subject().to_string(),
			public_key,
		})
	}

	/// Load the first `CERTIFICATE` block of a PEM buffer
	pub fn load_pem<T: AsRef<[u8]>>(pem: T) -> std::result::Result<Self, KeyError> {
		let (_, pem) = x509_parser::pem::parse_x509_pem(pem.as_ref())
			.map_err(|e| KeyError::InvalidCertificate(e.to_string()))?;
		if pem.label != "CERTIFICATE" {
			return Err(KeyError::InvalidCertificate(format!("unexpected PEM block {}", pem.label)));
		}
		Self::from_der(&pem.contents)
	}

	pub fn load_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, KeyError> {
		Self::load_pem(read_file(path.as_ref())?)
	}

	pub fn der(&self) -> &[u8] {
		&self.der
	}

	pub fn subject(&self) -> &str {
		&self.subject
	}

	pub fn public_key(&self) -> &RsaPublicKey {
		&self.public_key
	}

	/// Unwrapped base64 of the DER encoding, as used in `X509Certificate` elements
	pub fn to_base64(&self) -> String {
		encode_base64(&self.der)
	}
}

impl fmt::Debug for Certificate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Certificate").field("subject", &self.subject).finish()
	}
}

/// Our own private key and the certificates attached to it
#[derive(Clone)]
pub struct SigningKey {
	private_key: RsaPrivateKey,
	certificates: Vec<Certificate>,
}

impl SigningKey {
	/// Load a PKCS#8 or PKCS#1 PEM private key
	pub fn load_pem(pem: &str) -> std::result::Result<Self, KeyError> {
		let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
			.or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
			.map_err(|e| KeyError::InvalidPrivateKey(e.to_string()))?;

		Ok(Self {
			private_key,
			certificates: Vec::new(),
		})
	}

	pub fn load_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, KeyError> {
		let path = path.as_ref();
		let pem = String::from_utf8(read_file(path)?).map_err(|e| KeyError::InvalidPrivateKey(e.to_string()))?;
		let key = Self::load_pem(&pem)?;
		log::debug!("Loaded signing key from {}", path.display());
		Ok(key)
	}

	/// Attach a certificate, which has to carry this key's public half
	pub fn add_certificate(&mut self, certificate: Certificate) -> std::result::Result<(), KeyError> {
		if certificate.public_key() != &self.public_key() {
			return Err(KeyError::CertificateMismatch);
		}
		self.certificates.push(certificate);
		Ok(())
	}

	pub fn add_cert<T: AsRef<[u8]>>(&mut self, pem: T) -> std::result::Result<(), KeyError> {
		self.add_certificate(Certificate::load_pem(pem)?)
	}

	pub fn add_cert_file<P: AsRef<Path>>(&mut self, path: P) -> std::result::Result<(), KeyError> {
		self.add_certificate(Certificate::load_file(path)?)
	}

	pub fn private_key(&self) -> &RsaPrivateKey {
		&self.private_key
	}

	pub fn public_key(&self) -> RsaPublicKey {
		RsaPublicKey::from(&self.private_key)
	}

	pub fn certificates(&self) -> &[Certificate] {
		&self.certificates
	}
}

impl fmt::Debug for SigningKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SigningKey")
			.field("certificates", &self.certificates)
			.finish_non_exhaustive()
	}
}

/// Read-only set of certificates trusted for one issuer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeysManager {
	certificates: Vec<Certificate>,
}

impl KeysManager {
	pub fn new(certificates: Vec<Certificate>) -> Self {
		Self { certificates }
	}

	/// Trust the certificates attached to the given keys
	pub fn from_signing_keys<'a, I: IntoIterator<Item = &'a SigningKey>>(keys: I) -> Self {
		Self::new(
			keys.into_iter()
				.flat_map(|key| key.certificates().iter().cloned())
				.collect(),
		)
	}

	pub fn certificates(&self) -> &[Certificate] {
		&self.certificates
	}

	pub fn is_empty(&self) -> bool {
		self.certificates.is_empty()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
	Sha256,
	Sha384,
	Sha512,
}

impl DigestAlgorithm {
	pub fn from_href(uri: &str) -> Result<Self> {
		match uri {
			DIGEST_SHA256 => Ok(Self::Sha256),
			DIGEST_SHA384 => Ok(Self::Sha384),
			DIGEST_SHA512 => Ok(Self::Sha512),
			_ => Err(SamlError::UnsupportedAlgorithm(uri.to_string())),
		}
	}

	pub const fn uri(&self) -> &'static str {
		match self {
			Self::Sha256 => DIGEST_SHA256,
			Self::Sha384 => DIGEST_SHA384,
			Self::Sha512 => DIGEST_SHA512,
		}
	}

	pub fn digest(&self, data: &[u8]) -> Vec<u8> {
		match self {
			Self::Sha256 => Sha256::digest(data).to_vec(),
			Self::Sha384 => Sha384::digest(data).to_vec(),
			Self::Sha512 => Sha512::digest(data).to_vec(),
		}
	}
}

/// RSA PKCS#1 v1.5 signature algorithms, resolved from their XML-DSig URIs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
	#[default]
	RsaSha256,
	RsaSha384,
	RsaSha512,
}

impl SignatureAlgorithm {
	/// Resolve an algorithm URI; an unknown URI is an error, never a default
	pub fn from_href(uri: &str) -> Result<Self> {
		match uri {
			SIG_RSA_SHA256 => Ok(Self::RsaSha256),
			SIG_RSA_SHA384 => Ok(Self::RsaSha384),
			SIG_RSA_SHA512 => Ok(Self::RsaSha512),
			_ => Err(SamlError::UnsupportedAlgorithm(uri.to_string())),
		}
	}

	pub const fn uri(&self) -> &'static str {
		match self {
			Self::RsaSha256 => SIG_RSA_SHA256,
			Self::RsaSha384 => SIG_RSA_SHA384,
			Self::RsaSha512 => SIG_RSA_SHA512,
		}
	}

	/// The digest paired with this algorithm for `Reference` elements
	pub const fn digest_algorithm(&self) -> DigestAlgorithm {
		match self {
			Self::RsaSha256 => DigestAlgorithm::Sha256,
			Self::RsaSha384 => DigestAlgorithm::Sha384,
			Self::RsaSha512 => DigestAlgorithm::Sha512,
		}
	}
}

impl fmt::Display for SignatureAlgorithm {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.uri())
	}
}
