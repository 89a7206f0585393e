use crate::parser::{decode_failure, GpError, GpErrorKind, PResult};
use encoding_rs::WINDOWS_1252;
use nom::bytes::complete::take;
use nom::number::complete::{le_i16, le_i32, le_i8, le_u8};
use nom::IResult;

/// Parse signed byte
pub fn parse_signed_byte(i: &[u8]) -> PResult<'_, i8> {
    le_i8(i)
}

/// Parse unsigned byte
pub fn parse_byte(i: &[u8]) -> PResult<'_, u8> {
    le_u8(i)
}

/// Parse signed 32-bit little-endian integer
pub fn parse_int(i: &[u8]) -> PResult<'_, i32> {
    le_i32(i)
}

/// Parse signed 16-bit little-endian integer
pub fn parse_short(i: &[u8]) -> PResult<'_, i16> {
    le_i16(i)
}

/// Parse bool (any non-zero byte is true)
pub fn parse_bool(i: &[u8]) -> PResult<'_, bool> {
    let (i, b) = le_u8(i)?;
    Ok((i, b != 0))
}

/// Skip `n` bytes, failing on a truncated buffer.
pub fn skip(i: &[u8], n: usize) -> PResult<'_, ()> {
    let (i, _) = take(n)(i)?;
    Ok((i, ()))
}

/// Materialize properly encoded String
fn make_string(i: &[u8]) -> String {
    let (cow, encoding_used, had_errors) = WINDOWS_1252.decode(i);
    if had_errors {
        log::debug!("Error decoding string with {encoding_used:?}");
        match std::str::from_utf8(i) {
            Ok(s) => s.to_string(),
            Err(e) => {
                log::debug!("Error UTF-8 string parsing: {e}");
                String::new()
            }
        }
    } else {
        cow.to_string()
    }
}

/// Parse string field of total size `field_size` where only the first
/// `string_len` bytes are meaningful (the rest is blank padding).
fn parse_string_field(i: &[u8], field_size: usize, string_len: usize) -> PResult<'_, String> {
    log::debug!("Parsing string field: field_size={field_size}, string_len={string_len}");
    let (rest, field) = take(field_size)(i)?;
    let string = make_string(&field[..string_len.min(field_size)]);
    Ok((rest, string))
}

/// String with an 8-bit length prefix inside a fixed-width field of `size` bytes.
pub fn parse_byte_size_string(
    size: usize,
) -> impl FnMut(&[u8]) -> IResult<&[u8], String, GpError> {
    move |i: &[u8]| {
        let (i, length) = parse_byte(i)?;
        parse_string_field(i, size, length as usize)
    }
}

/// String with a 32-bit length prefix counting exactly the string bytes.
pub fn parse_int_sized_string(i: &[u8]) -> PResult<'_, String> {
    let (rest, len) = parse_int(i)?;
    let Ok(len) = usize::try_from(len) else {
        return decode_failure(i, GpErrorKind::MalformedLengthPrefix);
    };
    parse_string_field(rest, len, len)
}

/// String with a 32-bit length prefix that includes the following 8-bit
/// prefix byte, so the field consumed after both prefixes is `len - 1` bytes.
pub fn parse_int_byte_sized_string(i: &[u8]) -> PResult<'_, String> {
    let (rest, len) = parse_int(i)?;
    if len < 1 {
        return decode_failure(i, GpErrorKind::MalformedLengthPrefix);
    }
    let (rest, str_len) = parse_byte(rest)?;
    log::debug!("Parsing int byte sized string int_len={len} u8_len={str_len}");
    parse_string_field(rest, len as usize - 1, str_len as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nom::error::ErrorKind;

    #[test]
    fn test_read_byte_size_string() {
        let data: Vec<u8> = vec![
            0x18, 0x46, 0x49, 0x43, 0x48, 0x49, 0x45, 0x52, 0x20, 0x47, 0x55, 0x49, 0x54, 0x41,
            0x52, 0x20, 0x50, 0x52, 0x4f, 0x20, 0x76, 0x33, 0x2e, 0x30, 0x30, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00,
        ];
        let (rest, res) = parse_byte_size_string(30)(&data).unwrap();
        assert_eq!(res, "FICHIER GUITAR PRO v3.00");
        assert!(rest.is_empty());
    }

    #[test]
    fn test_read_int_byte_sized_string() {
        let mut data: Vec<u8> = vec![6, 0, 0, 0, 5];
        data.extend_from_slice(b"Title");
        let (rest, res) = parse_int_byte_sized_string(&data).unwrap();
        assert_eq!(res, "Title");
        assert!(rest.is_empty());
    }

    #[test]
    fn test_malformed_int_byte_size_prefix() {
        let data: Vec<u8> = vec![0, 0, 0, 0];
        let err = parse_int_byte_sized_string(&data).unwrap_err();
        match err {
            nom::Err::Failure(GpError { kind, .. }) => {
                assert_eq!(kind, GpErrorKind::MalformedLengthPrefix);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_truncated_int() {
        let data: Vec<u8> = vec![1, 2];
        let err = parse_int(&data).unwrap_err();
        match err {
            nom::Err::Error(GpError { kind, .. }) => {
                assert_eq!(kind, GpErrorKind::Nom(ErrorKind::Eof));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
