//! YAML configuration of our own entity and of the issuers we trust
//!
//! ```yaml
//! entity_id: https://idp.example.com
//! signing:
//!   key_path: idp.key
//!   cert_path: idp.crt
//! trusted_issuers:
//!   - issuer: https://sp.example.com
//!     certificates: [sp.crt]
//! ```
//!
//! Relative paths are resolved against the directory of the config file.
//! A certificate entry starting with `-----BEGIN` is taken as inline PEM.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::binding::{CodecLimits, DEFAULT_MAX_RELAY_STATE_LEN};
use crate::codec::DEFAULT_MAX_INFLATED_SIZE;
use crate::error::{Result, SamlError};
use crate::flow::{InboundPolicy, Outbound};
use crate::keys::{Certificate, KeysManager, SignatureAlgorithm, SigningKey};
use crate::trust::{TrustStore, TrustTable};
use crate::SIG_RSA_SHA256;

const PEM_MARKER: &str = "-----BEGIN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningConfig {
	pub key_path: PathBuf,
	#[serde(default)]
	pub cert_path: Option<PathBuf>,
	#[serde(default = "default_algorithm")]
	pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedIssuer {
	pub issuer: String,
	/// Certificate file paths or inline PEM blocks, any of which may sign
	pub certificates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
	pub max_inflated_size: usize,
	pub max_relay_state_len: usize,
}

impl Default for CodecConfig {
	fn default() -> Self {
		Self {
			max_inflated_size: DEFAULT_MAX_INFLATED_SIZE,
			max_relay_state_len: DEFAULT_MAX_RELAY_STATE_LEN,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustConfig {
	pub entity_id: String,
	pub signing: Option<SigningConfig>,
	#[serde(default)]
	pub trusted_issuers: Vec<TrustedIssuer>,
	#[serde(default)]
	pub codec: CodecConfig,
	#[serde(default)]
	pub inbound: InboundPolicy,

	#[serde(skip)]
	pub base_dir: Option<PathBuf>,
}

fn default_algorithm() -> String {
	SIG_RSA_SHA256.to_string()
}

impl std::str::FromStr for TrustConfig {
	type Err = SamlError;

	fn from_str(yaml: &str) -> Result<Self> {
		Ok(serde_yaml::from_str(yaml)?)
	}
}

impl TrustConfig {
	pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
		let path = path.as_ref();
		let yaml = std::fs::read_to_string(path)
			.map_err(|e| SamlError::Config(format!("Unable to open config file {}: {}", path.display(), e)))?;

		let mut config: Self = yaml.parse()?;
		config.base_dir = path.parent().map(Path::to_path_buf);
		log::info!("Loaded config for {} from {}", config.entity_id, path.display());
		Ok(config)
	}

	fn resolve_path(&self, path: &Path) -> PathBuf {
		match &self.base_dir {
			Some(base) if path.is_relative() => base.join(path),
			_ => path.to_path_buf(),
		}
	}

	fn load_certificate(&self, entry: &str) -> Result<Certificate> {
		let entry = entry.trim();
		if entry.starts_with(PEM_MARKER) {
			Ok(Certificate::load_pem(entry)?)
		} else {
			Ok(Certificate::load_file(self.resolve_path(Path::new(entry)))?)
		}
	}

	pub fn limits(&self) -> CodecLimits {
		CodecLimits {
			max_inflated_size: self.codec.max_inflated_size,
			max_relay_state_len: self.codec.max_relay_state_len,
		}
	}

	pub fn policy(&self) -> InboundPolicy {
		self.inbound.clone()
	}

	/// Build the issuer table, failing on the first certificate that does not load
	pub fn trust_table(&self) -> Result<TrustTable> {
		let mut table = TrustTable::new();
		for trusted in &self.trusted_issuers {
			if trusted.certificates.is_empty() {
				return Err(SamlError::Config(format!("Issuer {} has no certificates", trusted.issuer)));
			}

			let certificates = trusted
				.certificates
				.iter()
				.map(|entry| self.load_certificate(entry))
				.collect::<Result<Vec<_>>>()?;
			log::debug!("Trusting {} with {} certificates", trusted.issuer, certificates.len());
			table.insert(trusted.issuer.clone(), KeysManager::new(certificates));
		}
		Ok(table)
	}

	pub fn signing_key(&self) -> Result<(SigningKey, SignatureAlgorithm)> {
		let signing = self
			.signing
			.as_ref()
			.ok_or_else(|| SamlError::Config("No signing key is configured".to_string()))?;

		let algorithm = SignatureAlgorithm::from_href(&signing.algorithm)?;
		let mut key = SigningKey::load_file(self.resolve_path(&signing.key_path))?;
		if let Some(cert_path) = &signing.cert_path {
			key.add_cert_file(self.resolve_path(cert_path))?;
		}
		Ok((key, algorithm))
	}

	pub fn outbound(&self) -> Result<Outbound> {
		let (key, algorithm) = self.signing_key()?;
		Ok(Outbound::new(&self.entity_id, key, algorithm).with_limits(self.limits()))
	}

	/// Rebuild the trust table and swap it into a live store
	///
	/// On error the store keeps serving the previous table.
	pub fn reload(&self, store: &TrustStore) -> Result<()> {
		let table = self.trust_table().map_err(|e| {
			log::error!("Keeping the previous trust table, reload failed: {}", e);
			e
		})?;
		store.swap(table);
		Ok(())
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use crate::tests::fixtures;
	use crate::trust::TrustResolver;

	const SAMPLE: &str = "config.sample.yaml";

	fn indent(pem: &str) -> String {
		pem.lines().map(|line| format!("      {}\n", line)).collect()
	}

	#[test]
	fn test_sample_config() {
		let config = TrustConfig::from_file(SAMPLE).unwrap();
		assert_eq!(config.entity_id, fixtures::IDP_ENTITY);
		assert_eq!(config.limits(), CodecLimits::default());
		assert_eq!(config.policy(), InboundPolicy::default());

		let table = config.trust_table().unwrap();
		assert!(table.resolve(fixtures::SP_ENTITY).is_some());
		assert!(table.resolve(fixtures::ROGUE_ENTITY).is_none());

		let outbound = config.outbound().unwrap();
		assert_eq!(outbound.entity_id(), fixtures::IDP_ENTITY);
	}

	#[test]
	fn test_inline_pem_and_defaults() {
		let yaml = format!(
			"entity_id: https://sp.example.com\ntrusted_issuers:\n  - issuer: {}\n    certificates:\n    - |\n{}",
			fixtures::IDP_ENTITY,
			indent(fixtures::IDP_CERT)
		);
		let config: TrustConfig = yaml.parse().unwrap();
		assert!(config.signing.is_none());
		assert_eq!(config.codec.max_relay_state_len, 80);
		assert!(config.inbound.require_signature);

		let table = config.trust_table().unwrap();
		assert_eq!(table.len(), 1);
		assert!(matches!(config.outbound(), Err(SamlError::Config(_))));
	}

	#[test]
	fn test_invalid_config() {
		assert!(matches!("entity_id: [".parse::<TrustConfig>(), Err(SamlError::Config(_))));

		let config: TrustConfig = "entity_id: a\nsigning:\n  key_path: src/tests/fixtures/idp.key\n  algorithm: http://www.w3.org/2000/09/xmldsig#rsa-sha1\n"
			.parse()
			.unwrap();
		assert!(matches!(config.signing_key(), Err(SamlError::UnsupportedAlgorithm(_))));

		let config: TrustConfig = "entity_id: a\ntrusted_issuers:\n  - issuer: b\n    certificates: []\n"
			.parse()
			.unwrap();
		assert!(matches!(config.trust_table(), Err(SamlError::Config(_))));
	}

	#[test]
	fn test_reload_keeps_old_table_on_error() {
		let store = TrustStore::new(fixtures::trust_table());
		let broken: TrustConfig = "entity_id: a\ntrusted_issuers:\n  - issuer: b\n    certificates: [does/not/exist.crt]\n"
			.parse()
			.unwrap();
		assert!(matches!(broken.reload(&store), Err(SamlError::Key(_))));
		assert!(store.resolve(fixtures::SP_ENTITY).is_some());

		let config = TrustConfig::from_file(SAMPLE).unwrap();
		config.reload(&store).unwrap();
		assert!(store.resolve(fixtures::IDP_ENTITY).is_none());
		assert!(store.resolve(fixtures::SP_ENTITY).is_some());
	}
}
