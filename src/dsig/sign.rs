use rsa::pkcs1v15;
use rsa::sha2::{Sha256, Sha384, Sha512};
use rsa::signature::{SignatureEncoding, Signer};

use super::SignOptions;
use crate::codec::encode_base64;
use crate::error::{Result, SamlError};
use crate::keys::{SignatureAlgorithm, SigningKey};
use crate::xml::c14n::canonicalize;
use crate::xml::{NodeId, ParsedDocument, QName};
use crate::{NS_DSIG, TRANSFORM_ENVELOPED, TRANSFORM_EXC_C14N};

/// Detached RSA signature over raw bytes
pub fn sign_binary(key: &SigningKey, algorithm: SignatureAlgorithm, data: &[u8]) -> Result<Vec<u8>> {
	let private_key = key.private_key().clone();
	let signature = match algorithm {
		SignatureAlgorithm::RsaSha256 => pkcs1v15::SigningKey::<Sha256>::new(private_key)
			.try_sign(data)
			.map(|signature| signature.to_vec()),
		SignatureAlgorithm::RsaSha384 => pkcs1v15::SigningKey::<Sha384>::new(private_key)
			.try_sign(data)
			.map(|signature| signature.to_vec()),
		SignatureAlgorithm::RsaSha512 => pkcs1v15::SigningKey::<Sha512>::new(private_key)
			.try_sign(data)
			.map(|signature| signature.to_vec()),
	};

	signature.map_err(|e| SamlError::SigningFailed(e.to_string()))
}

/// Insert an enveloped signature into `doc`
///
/// On error the signature element is removed again, but the document should
/// still be treated as spoiled.
pub fn sign_doc(
	key: &SigningKey,
	algorithm: SignatureAlgorithm,
	doc: &mut ParsedDocument,
	options: &SignOptions,
) -> Result<()> {
	let root = doc.root_element();

	let (reference_uri, apex) = match &options.id_attr {
		Some(id_attr) => {
			let id = doc
				.attribute(root, id_attr)
				.ok_or_else(|| SamlError::SigningFailed(format!("Root element has no {} attribute", id_attr)))?;
			(format!("#{}", id), root)
		}
		None => (String::new(), doc.document_node()),
	};

	let anchor = match &options.insert_after {
		Some((namespace, local)) => Some(
			doc.find_child(root, namespace, local)
				.ok_or_else(|| SamlError::SigningFailed(format!("No {{{}}}{} element to insert the signature after", namespace, local)))?,
		),
		None => None,
	};

	let template = SignatureTemplate::build(doc, algorithm, &reference_uri, key);
	match anchor {
		Some(anchor) => doc.insert_after(anchor, template.signature)?,
		None => doc.append_child(root, template.signature),
	}

	let result = template.fill(doc, key, algorithm, apex);
	if result.is_err() {
		doc.detach(template.signature);
	}
	result
}

/// Parse, sign and serialize in one go
pub fn sign_xml(key: &SigningKey, algorithm: SignatureAlgorithm, xml: &str, options: &SignOptions) -> Result<String> {
	let mut doc = ParsedDocument::parse_str(xml)?;
	sign_doc(key, algorithm, &mut doc, options)?;
	Ok(doc.to_xml_string())
}

/// The `ds:Signature` skeleton with handles to the parts filled in later
struct SignatureTemplate {
	signature: NodeId,
	signed_info: NodeId,
	digest_value: NodeId,
	signature_value: NodeId,
}

fn ds(doc: &mut ParsedDocument, parent: Option<NodeId>, local: &str) -> NodeId {
	let node = doc.create_element(QName::new(Some("ds"), local, Some(NS_DSIG)));
	if let Some(parent) = parent {
		doc.append_child(parent, node);
	}
	node
}

fn ds_with_algorithm(doc: &mut ParsedDocument, parent: NodeId, local: &str, algorithm: &str) -> NodeId {
	let node = ds(doc, Some(parent), local);
	doc.set_attribute(node, "Algorithm", algorithm);
	node
}

impl SignatureTemplate {
	fn build(doc: &mut ParsedDocument, algorithm: SignatureAlgorithm, reference_uri: &str, key: &SigningKey) -> Self {
		let signature = ds(doc, None, "Signature");
		doc.declare_namespace(signature, "ds", NS_DSIG);

		let signed_info = ds(doc, Some(signature), "SignedInfo");
		ds_with_algorithm(doc, signed_info, "CanonicalizationMethod", TRANSFORM_EXC_C14N);
		ds_with_algorithm(doc, signed_info, "SignatureMethod", algorithm.uri());

		let reference = ds(doc, Some(signed_info), "Reference");
		doc.set_attribute(reference, "URI", reference_uri);
		let transforms = ds(doc, Some(reference), "Transforms");
		ds_with_algorithm(doc, transforms, "Transform", TRANSFORM_ENVELOPED);
		ds_with_algorithm(doc, transforms, "Transform", TRANSFORM_EXC_C14N);
		ds_with_algorithm(doc, reference, "DigestMethod", algorithm.digest_algorithm().uri());
		let digest_value = ds(doc, Some(reference), "DigestValue");

		let signature_value = ds(doc, Some(signature), "SignatureValue");

		if let Some(certificate) = key.certificates().first() {
			let key_info = ds(doc, Some(signature), "KeyInfo");
			let x509_data = ds(doc, Some(key_info), "X509Data");
			let x509_certificate = ds(doc, Some(x509_data), "X509Certificate");
			doc.set_text(x509_certificate, &certificate.to_base64());
		}

		Self {
			signature,
			signed_info,
			digest_value,
			signature_value,
		}
	}

	fn fill(&self, doc: &mut ParsedDocument, key: &SigningKey, algorithm: SignatureAlgorithm, apex: NodeId) -> Result<()> {
		let canonical = canonicalize(doc, apex, Some(self.signature), &[]);
		let digest = algorithm.digest_algorithm().digest(&canonical);
		doc.set_text(self.digest_value, &encode_base64(digest));

		let signed_info = canonicalize(doc, self.signed_info, None, &[]);
		let signature = sign_binary(key, algorithm, &signed_info)?;
		doc.set_text(self.signature_value, &encode_base64(signature));

		log::debug!("Signed document with {}", algorithm);
		Ok(())
	}
}
