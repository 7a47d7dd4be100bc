//! Key and certificate loading errors

use derive_more::{Display, Error};

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum KeyError {
	#[display("Could not read {path}: {cause}")]
	Io { path: String, cause: String },

	#[display("Private key is neither PKCS#8 nor PKCS#1 PEM: {_0}")]
	InvalidPrivateKey(#[error(not(source))] String),

	#[display("Certificate PEM could not be parsed: {_0}")]
	InvalidCertificate(#[error(not(source))] String),

	#[display("Certificate does not carry an RSA public key: {_0}")]
	UnsupportedPublicKey(#[error(not(source))] String),

	#[display("Certificate does not match the private key")]
	CertificateMismatch,

	#[display("No private key was loaded")]
	NoPrivateKey,
}
