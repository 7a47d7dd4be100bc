//! Reversible transport transforms: raw deflate, base64 and RFC 3986 percent-encoding
//!
//! None of these know anything about SAML; the binding codecs chain them.

use std::io::Write;

use base64::engine::general_purpose;
use base64::Engine;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

use crate::error::CodecError;

/// Upper bound for an inflated redirect-binding message
pub const DEFAULT_MAX_INFLATED_SIZE: usize = 512 * 1024;

const INFLATE_CHUNK: usize = 16 * 1024;

/// Raw deflate (RFC 1951), no zlib header or trailer
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
	let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
	encoder
		.write_all(data)
		.map_err(|e| CodecError::Compression(e.to_string()))?;
	encoder
		.finish()
		.map_err(|e| CodecError::Compression(e.to_string()))
}

/// Inflate with [`DEFAULT_MAX_INFLATED_SIZE`] as the output cap
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
	decompress_limited(data, DEFAULT_MAX_INFLATED_SIZE)
}

/// Inflate, refusing to produce more than `max_size` bytes
///
/// The stream has to reach its final block; running out of input before that
/// is an error rather than a short read.
pub fn decompress_limited(data: &[u8], max_size: usize) -> Result<Vec<u8>, CodecError> {
	let mut inflater = Decompress::new(false);
	let mut inflated = Vec::with_capacity(data.len().saturating_mul(4).min(max_size.saturating_add(1)));

	loop {
		if inflated.len() == inflated.capacity() {
			inflated.reserve(INFLATE_CHUNK);
		}

		let consumed = inflater.total_in();
		let produced = inflated.len();
		let input = data.get(consumed as usize..).unwrap_or_default();

		let status = inflater
			.decompress_vec(input, &mut inflated, FlushDecompress::None)
			.map_err(|e| CodecError::Truncated(e.to_string()))?;

		if inflated.len() > max_size {
			return Err(CodecError::TooLarge(max_size));
		}

		match status {
			Status::StreamEnd => return Ok(inflated),
			Status::Ok | Status::BufError => {
				if inflater.total_in() == consumed && inflated.len() == produced {
					return Err(CodecError::Truncated("stream ended before the final block".to_string()));
				}
			}
		}
	}
}

pub fn encode_base64<T: AsRef<[u8]>>(data: T) -> String {
	general_purpose::STANDARD.encode(data)
}

/// Strict standard-alphabet decoding, padding required
pub fn decode_base64<T: AsRef<[u8]>>(data: T) -> Result<Vec<u8>, CodecError> {
	general_purpose::STANDARD
		.decode(data)
		.map_err(|e| CodecError::InvalidBase64(e.to_string()))
}

/// Decoding for base64 embedded in XML text nodes, which is routinely line-wrapped
pub(crate) fn decode_base64_wrapped(data: &str) -> Result<Vec<u8>, CodecError> {
	let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
	decode_base64(compact)
}

/// RFC 3986 percent-encoding of everything outside the unreserved set
///
/// A space becomes `%20`, never `+`. The redirect-binding signature input
/// depends on this exact form.
pub fn url_encode(data: &str) -> String {
	urlencoding::encode(data).into_owned()
}

/// RFC 3986 percent-decoding; `+` is left alone
pub fn url_decode(data: &str) -> Result<String, CodecError> {
	let bytes = data.as_bytes();
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'%' {
			let valid = bytes.len() > i + 2
				&& bytes[i + 1].is_ascii_hexdigit()
				&& bytes[i + 2].is_ascii_hexdigit();
			if !valid {
				return Err(CodecError::InvalidUrlEncoding(format!("stray '%' at offset {}", i)));
			}
			i += 3;
		} else {
			i += 1;
		}
	}

	urlencoding::decode(data)
		.map(|decoded| decoded.into_owned())
		.map_err(|e| CodecError::InvalidUrlEncoding(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
	use super::*;

	#[test]
	fn test_deflate_roundtrip() {
		let xml = br#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_1"/>"#;
		let compressed = compress(xml).unwrap();
		assert_ne!(compressed.as_slice(), xml.as_slice());
		assert_eq!(decompress(&compressed).unwrap(), xml);

		assert_eq!(decompress(&compress(b"").unwrap()).unwrap(), b"");
	}

	#[test]
	fn test_deflate_is_raw() {
		// A zlib header declares CM=8 in the low nibble, a raw block header never does
		let compressed = compress(b"hello hello hello hello").unwrap();
		assert_ne!(compressed[0] & 0x0f, 8);
		assert_ne!(compressed[0], 0x78);
	}

	#[test]
	fn test_decompress_truncated() {
		let compressed = compress(&vec![b'a'; 4096]).unwrap();
		let truncated = &compressed[..compressed.len() / 2];
		assert!(matches!(decompress(truncated), Err(CodecError::Truncated(_))));
		assert!(matches!(decompress(b"\xff\xff\xff\xff"), Err(CodecError::Truncated(_))));
	}

	#[test]
	fn test_decompress_limit() {
		let bomb = compress(&vec![0u8; 10_000]).unwrap();
		assert_eq!(decompress_limited(&bomb, 100), Err(CodecError::TooLarge(100)));
		assert_eq!(decompress_limited(&bomb, 10_000).unwrap().len(), 10_000);
	}

	#[test]
	fn test_base64() {
		let data = b"\x00\x01binary\xff";
		assert_eq!(decode_base64(encode_base64(data)).unwrap(), data);
		assert_eq!(encode_base64("abc"), "YWJj");

		assert!(matches!(decode_base64("YWJj!"), Err(CodecError::InvalidBase64(_))));
		assert!(matches!(decode_base64("YWJjZA"), Err(CodecError::InvalidBase64(_))));
		assert!(decode_base64("YW Jj").is_err());
		assert_eq!(decode_base64_wrapped("YW\nJj\r\n").unwrap(), b"abc");
	}

	#[test]
	fn test_url_encode_space_is_percent_20() {
		assert_eq!(url_encode("a b"), "a%20b");
		assert_eq!(url_encode("a+b/c=d"), "a%2Bb%2Fc%3Dd");
		assert_eq!(url_encode("safe-._~"), "safe-._~");
		assert_eq!(
			url_encode("http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"),
			"http%3A%2F%2Fwww.w3.org%2F2001%2F04%2Fxmldsig-more%23rsa-sha256"
		);
	}

	#[test]
	fn test_url_decode() {
		assert_eq!(url_decode("a%20b").unwrap(), "a b");
		assert_eq!(url_decode("a+b").unwrap(), "a+b");
		assert_eq!(url_decode("%2b%2F").unwrap(), "+/");
		assert!(matches!(url_decode("100%"), Err(CodecError::InvalidUrlEncoding(_))));
		assert!(matches!(url_decode("%zz"), Err(CodecError::InvalidUrlEncoding(_))));
		assert!(matches!(url_decode("%ff"), Err(CodecError::InvalidUrlEncoding(_))));
	}
}
