//! Error types for the gptab library

use std::io;

/// Library error type for gptab decoding operations.
///
/// Structural and referential failures abort the decode with no partial
/// `Song`; the variants carry the absolute byte offset at which the
/// decoder gave up.
#[derive(Debug, thiserror::Error)]
pub enum TabError {
    /// The buffer ended before the record being decoded was complete
    #[error("truncated file: unexpected end of data at byte {offset}")]
    Truncated { offset: usize },

    /// A string length prefix that cannot describe a valid string
    #[error("malformed string length prefix at byte {offset}")]
    MalformedLengthPrefix { offset: usize },

    /// A measure header omitted its time signature with no predecessor to inherit from
    #[error("measure {index} carries no time signature and has no predecessor")]
    MissingTimeSignature { index: usize },

    /// A note effect code outside the set understood by the format generation
    #[error("unsupported note effect code {code} at byte {offset}")]
    UnsupportedNoteEffect { code: u8, offset: usize },

    /// Any other parsing error
    #[error("parsing error: {0}")]
    ParsingError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<io::Error> for TabError {
    fn from(error: io::Error) -> Self {
        Self::IoError(error.to_string())
    }
}
