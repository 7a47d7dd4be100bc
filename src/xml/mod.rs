//! XML document model, canonicalization and structural validation

pub mod c14n;
pub mod document;
pub mod schema;

pub use self::document::{Attribute, Element, NodeId, NodeKind, ParsedDocument, QName};

/// Escape text content; `\r` is kept as a character reference so it survives a reparse
pub fn escape_text(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	for ch in text.chars() {
		match ch {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'\r' => out.push_str("&#xD;"),
			_ => out.push(ch),
		}
	}
	out
}

/// Escape a double-quoted attribute value
pub fn escape_attr(value: &str) -> String {
	let mut out = String::with_capacity(value.len());
	for ch in value.chars() {
		match ch {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'"' => out.push_str("&quot;"),
			'\t' => out.push_str("&#x9;"),
			'\n' => out.push_str("&#xA;"),
			'\r' => out.push_str("&#xD;"),
			_ => out.push(ch),
		}
	}
	out
}
