//! Transport encoding errors

use derive_more::{Display, Error};

/// Errors of the deflate/base64/percent-encoding layer
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum CodecError {
	#[display("Invalid base64: {_0}")]
	InvalidBase64(#[error(not(source))] String),

	#[display("Deflate stream is corrupt or truncated: {_0}")]
	Truncated(#[error(not(source))] String),

	#[display("Inflated message exceeds the {_0} byte limit")]
	TooLarge(#[error(not(source))] usize),

	#[display("Invalid percent-encoding: {_0}")]
	InvalidUrlEncoding(#[error(not(source))] String),

	#[display("RelayState is {_0} bytes long, the limit is {_1}")]
	RelayStateTooLong(usize, usize),

	#[display("Compression failed: {_0}")]
	Compression(#[error(not(source))] String),

	#[display("Missing binding parameter {_0}")]
	MissingParameter(#[error(not(source))] &'static str),
}
