use rsa::pkcs1v15;
use rsa::sha2::{Sha256, Sha384, Sha512};
use rsa::signature::Verifier;
use rsa::RsaPublicKey;

use super::{id_attrs, VerifyOptions};
use crate::codec::decode_base64_wrapped;
use crate::error::{Result, SamlError};
use crate::keys::{DigestAlgorithm, KeysManager, SignatureAlgorithm};
use crate::xml::c14n::canonicalize;
use crate::xml::{NodeId, ParsedDocument};
use crate::{NS_DSIG, TRANSFORM_ENVELOPED, TRANSFORM_EXC_C14N};

fn verify_with_key(public_key: &RsaPublicKey, algorithm: SignatureAlgorithm, data: &[u8], signature: &[u8]) -> bool {
	let Ok(signature) = pkcs1v15::Signature::try_from(signature) else {
		return false;
	};
	let public_key = public_key.clone();

	match algorithm {
		SignatureAlgorithm::RsaSha256 => pkcs1v15::VerifyingKey::<Sha256>::new(public_key)
			.verify(data, &signature)
			.is_ok(),
		SignatureAlgorithm::RsaSha384 => pkcs1v15::VerifyingKey::<Sha384>::new(public_key)
			.verify(data, &signature)
			.is_ok(),
		SignatureAlgorithm::RsaSha512 => pkcs1v15::VerifyingKey::<Sha512>::new(public_key)
			.verify(data, &signature)
			.is_ok(),
	}
}

/// Check a detached signature against every key of the manager
pub fn verify_binary(keys: &KeysManager, algorithm: SignatureAlgorithm, data: &[u8], signature: &[u8]) -> bool {
	keys.certificates().iter().any(|certificate| {
		let valid = verify_with_key(certificate.public_key(), algorithm, data, signature);
		if valid {
			log::debug!("Signature verified with certificate {}", certificate.subject());
		}
		valid
	})
}

/// The signature to verify: a direct child of the root, otherwise the first one in document order
pub fn find_signature(doc: &ParsedDocument) -> Option<NodeId> {
	let root = doc.root_element();
	doc.find_child(root, NS_DSIG, "Signature")
		.or_else(|| doc.find_descendant(root, NS_DSIG, "Signature"))
}

fn required_child(doc: &ParsedDocument, parent: NodeId, local: &str) -> Result<NodeId> {
	doc.find_child(parent, NS_DSIG, local)
		.ok_or_else(|| SamlError::MalformedDocument(format!("Signature has no {} element", local)))
}

fn algorithm_of(doc: &ParsedDocument, node: NodeId) -> Result<&str> {
	doc.attribute(node, "Algorithm")
		.ok_or_else(|| SamlError::MalformedDocument("Algorithm attribute is missing".to_string()))
}

/// Prefixes listed by an `ec:InclusiveNamespaces` child
fn inclusive_prefixes(doc: &ParsedDocument, node: NodeId) -> Vec<String> {
	doc.find_child(node, TRANSFORM_EXC_C14N, "InclusiveNamespaces")
		.and_then(|list| doc.attribute(list, "PrefixList"))
		.map(|list| list.split_whitespace().map(str::to_string).collect())
		.unwrap_or_default()
}

/// Verify the enveloped signature of `doc` against `keys`
///
/// `Ok(false)` means the signature is well-formed but does not check out: a
/// digest mismatch, or no trusted key produced the signature value. Structural
/// problems and unsupported algorithms are errors. Certificates embedded in
/// the signature are never consulted.
pub fn verify_doc(keys: &KeysManager, doc: &ParsedDocument, options: &VerifyOptions) -> Result<bool> {
	verify_signed_node(keys, doc, options).map(|node| node.is_some())
}

/// Like [`verify_doc`], but hand back the node the signature covers
///
/// That is the document node for `URI=""` and the referenced element
/// otherwise. Callers reading fields outside of it are reading unsigned data.
pub fn verify_signed_node(keys: &KeysManager, doc: &ParsedDocument, options: &VerifyOptions) -> Result<Option<NodeId>> {
	let signature = find_signature(doc).ok_or_else(|| SamlError::SignatureInvalid("document is not signed".to_string()))?;
	let signed_info = required_child(doc, signature, "SignedInfo")?;

	let c14n_method = required_child(doc, signed_info, "CanonicalizationMethod")?;
	let c14n_uri = algorithm_of(doc, c14n_method)?;
	if c14n_uri != TRANSFORM_EXC_C14N {
		return Err(SamlError::UnsupportedAlgorithm(c14n_uri.to_string()));
	}
	let signed_info_prefixes = inclusive_prefixes(doc, c14n_method);

	let signature_method = required_child(doc, signed_info, "SignatureMethod")?;
	let algorithm = SignatureAlgorithm::from_href(algorithm_of(doc, signature_method)?)?;

	let references = doc.find_children(signed_info, NS_DSIG, "Reference");
	let reference = match references.as_slice() {
		[reference] => *reference,
		[] => return Err(SamlError::MalformedDocument("SignedInfo has no Reference".to_string())),
		_ => return Err(SamlError::MalformedDocument("SignedInfo has more than one Reference".to_string())),
	};

	let apex = resolve_reference(doc, signature, doc.attribute(reference, "URI").unwrap_or(""), options)?;

	let mut exclude = None;
	let mut prefixes = Vec::new();
	if let Some(transforms) = doc.find_child(reference, NS_DSIG, "Transforms") {
		for transform in doc.find_children(transforms, NS_DSIG, "Transform") {
			match algorithm_of(doc, transform)? {
				TRANSFORM_ENVELOPED => exclude = Some(signature),
				TRANSFORM_EXC_C14N => prefixes = inclusive_prefixes(doc, transform),
				other => return Err(SamlError::UnsupportedAlgorithm(other.to_string())),
			}
		}
	}

	let digest_algorithm = DigestAlgorithm::from_href(algorithm_of(doc, required_child(doc, reference, "DigestMethod")?)?)?;
	let Ok(expected_digest) = decode_base64_wrapped(&doc.text(required_child(doc, reference, "DigestValue")?)) else {
		log::warn!("DigestValue is not valid base64");
		return Ok(None);
	};
	let Ok(signature_value) = decode_base64_wrapped(&doc.text(required_child(doc, signature, "SignatureValue")?)) else {
		log::warn!("SignatureValue is not valid base64");
		return Ok(None);
	};

	let canonical = canonicalize(doc, apex, exclude, &prefixes);
	if digest_algorithm.digest(&canonical) != expected_digest {
		log::warn!("Digest of the signed content does not match the Reference");
		return Ok(None);
	}

	let canonical_signed_info = canonicalize(doc, signed_info, None, &signed_info_prefixes);
	let valid = verify_binary(keys, algorithm, &canonical_signed_info, &signature_value);
	if !valid {
		log::warn!("SignatureValue does not verify against any of {} trusted certificates", keys.certificates().len());
		return Ok(None);
	}
	Ok(Some(apex))
}

/// Resolve a same-document reference to the node it covers
///
/// `#id` has to name exactly one element, and that element has to be the
/// parent of the signature. Anything else would let a verifier accept a
/// signature over content other than what the accessor later reads.
fn resolve_reference(doc: &ParsedDocument, signature: NodeId, uri: &str, options: &VerifyOptions) -> Result<NodeId> {
	if uri.is_empty() {
		return Ok(doc.document_node());
	}

	let Some(id) = uri.strip_prefix('#') else {
		return Err(SamlError::MalformedDocument(format!("Unsupported Reference URI {}", uri)));
	};

	let target = doc
		.find_by_id(&id_attrs(options.id_attr.as_deref()), id)?
		.ok_or_else(|| SamlError::MalformedDocument(format!("Reference #{} does not resolve", id)))?;

	if doc.parent(signature) != Some(target) {
		return Err(SamlError::SignatureInvalid(format!("Reference #{} does not envelope the signature", id)));
	}
	Ok(target)
}
