//! Binary decoding of Guitar Pro tablature files.

use nom::error::ErrorKind;
use nom::IResult;

pub mod music_parser;
pub mod primitive_parser;
pub mod song_parser;
mod song_parser_tests;

/// Error threaded through every parser in this crate.
///
/// Stores the length of the input left at the failure point so that the
/// entry point can turn it into an absolute byte offset against the
/// original buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct GpError {
    pub remaining: usize,
    pub kind: GpErrorKind,
}

#[derive(Debug, PartialEq, Eq)]
pub enum GpErrorKind {
    /// Error raised by a nom primitive (`Eof` means a truncated buffer)
    Nom(ErrorKind),
    /// String length prefix that cannot describe a valid string
    MalformedLengthPrefix,
    /// Measure header with no time signature and no predecessor to inherit from
    MissingTimeSignature { index: usize },
    /// Note effect code outside the supported table
    UnsupportedNoteEffect { code: u8 },
}

impl<'a> nom::error::ParseError<&'a [u8]> for GpError {
    fn from_error_kind(input: &'a [u8], kind: ErrorKind) -> Self {
        GpError {
            remaining: input.len(),
            kind: GpErrorKind::Nom(kind),
        }
    }

    fn append(_input: &'a [u8], _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

/// Parse result used across the decoder modules.
pub type PResult<'a, O> = IResult<&'a [u8], O, GpError>;

/// Abort the whole decode with `kind` at the current position.
pub(crate) fn decode_failure<O>(i: &[u8], kind: GpErrorKind) -> PResult<'_, O> {
    Err(nom::Err::Failure(GpError {
        remaining: i.len(),
        kind,
    }))
}
