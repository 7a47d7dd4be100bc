//! Mapping of message issuers to the keys allowed to sign for them
//!
//! Lookups are exact string matches: no case folding, no trailing-slash
//! tolerance, no wildcards. An issuer that is missing or unknown is never
//! given a default key.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::error::{Result, SamlError};
use crate::keys::KeysManager;

/// Caller-supplied issuer lookup
pub trait TrustResolver: Send + Sync {
	fn resolve(&self, issuer: &str) -> Option<Arc<KeysManager>>;
}

impl<F> TrustResolver for F
where
	F: Fn(&str) -> Option<Arc<KeysManager>> + Send + Sync,
{
	fn resolve(&self, issuer: &str) -> Option<Arc<KeysManager>> {
		self(issuer)
	}
}

/// Resolve the keys for a message's declared issuer, failing closed
pub fn resolve_issuer(resolver: &dyn TrustResolver, issuer: Option<&str>) -> Result<Arc<KeysManager>> {
	let Some(issuer) = issuer else {
		log::info!("Rejecting message without an Issuer");
		return Err(SamlError::NotTrusted("message carries no Issuer".to_string()));
	};

	match resolver.resolve(issuer) {
		Some(keys) if !keys.is_empty() => Ok(keys),
		Some(_) => {
			log::warn!("Issuer {} is configured without any certificate", issuer);
			Err(SamlError::NotTrusted(issuer.to_string()))
		}
		None => {
			log::info!("Issuer {} is not trusted", issuer);
			Err(SamlError::NotTrusted(issuer.to_string()))
		}
	}
}

/// Immutable issuer → keys table
#[derive(Debug, Clone, Default)]
pub struct TrustTable {
	entries: HashMap<String, Arc<KeysManager>>,
}

impl TrustTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert<S: Into<String>>(&mut self, issuer: S, keys: KeysManager) {
		self.entries.insert(issuer.into(), Arc::new(keys));
	}

	pub fn with<S: Into<String>>(mut self, issuer: S, keys: KeysManager) -> Self {
		self.insert(issuer, keys);
		self
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn issuers(&self) -> impl Iterator<Item = &str> {
		self.entries.keys().map(String::as_str)
	}
}

impl TrustResolver for TrustTable {
	fn resolve(&self, issuer: &str) -> Option<Arc<KeysManager>> {
		self.entries.get(issuer).cloned()
	}
}

/// Shared, atomically replaceable trust snapshot
///
/// Readers never block and always see one complete table; a reload builds the
/// next table off to the side and swaps it in.
#[derive(Debug)]
pub struct TrustStore {
	current: ArcSwap<TrustTable>,
}

impl TrustStore {
	pub fn new(table: TrustTable) -> Self {
		Self {
			current: ArcSwap::from_pointee(table),
		}
	}

	pub fn snapshot(&self) -> Arc<TrustTable> {
		self.current.load_full()
	}

	/// Install a new table, returning the previous one
	pub fn swap(&self, table: TrustTable) -> Arc<TrustTable> {
		log::info!("Installing trust table with {} issuers", table.len());
		self.current.swap(Arc::new(table))
	}
}

impl Default for TrustStore {
	fn default() -> Self {
		Self::new(TrustTable::default())
	}
}

impl TrustResolver for TrustStore {
	fn resolve(&self, issuer: &str) -> Option<Arc<KeysManager>> {
		self.current.load().resolve(issuer)
	}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;
	use crate::keys::Certificate;
	use crate::tests::fixtures;

	fn idp_keys() -> KeysManager {
		KeysManager::new(vec![Certificate::load_pem(fixtures::IDP_CERT).unwrap()])
	}

	#[test]
	fn test_exact_match() {
		let table = TrustTable::new().with("https://idp.example.com", idp_keys());

		assert!(table.resolve("https://idp.example.com").is_some());
		assert!(table.resolve("https://idp.example.com/").is_none());
		assert!(table.resolve("HTTPS://IDP.EXAMPLE.COM").is_none());
		assert!(table.resolve("").is_none());
	}

	#[test]
	fn test_resolve_issuer_fails_closed() {
		let table = TrustTable::new()
			.with("https://idp.example.com", idp_keys())
			.with("empty", KeysManager::default());

		assert!(resolve_issuer(&table, Some("https://idp.example.com")).is_ok());
		assert!(matches!(resolve_issuer(&table, None), Err(SamlError::NotTrusted(_))));
		assert!(matches!(resolve_issuer(&table, Some("https://evil.example.com")), Err(SamlError::NotTrusted(_))));
		assert!(matches!(resolve_issuer(&table, Some("empty")), Err(SamlError::NotTrusted(_))));
	}

	#[test]
	fn test_closure_resolver() {
		let keys = Arc::new(idp_keys());
		let resolver = move |issuer: &str| (issuer == "idp").then(|| keys.clone());

		assert!(resolve_issuer(&resolver, Some("idp")).is_ok());
		assert!(resolve_issuer(&resolver, Some("sp")).is_err());
	}

	#[test]
	fn test_store_swap() {
		let store = TrustStore::new(TrustTable::new().with("old", idp_keys()));
		let before = store.snapshot();
		assert!(store.resolve("old").is_some());

		let previous = store.swap(TrustTable::new().with("new", idp_keys()));
		assert!(Arc::ptr_eq(&before, &previous));
		assert!(store.resolve("old").is_none());
		assert!(store.resolve("new").is_some());

		// Snapshots taken before the swap stay intact
		assert!(before.resolve("old").is_some());
	}
}
