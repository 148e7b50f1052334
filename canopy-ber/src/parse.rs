//! BER decoding.
//!
//! Streaming parsers: an under-filled buffer yields
//! `Err(nom::Err::Incomplete(_))` rather than an error, so callers framing
//! network input can tell "bad data" from "not enough data yet".

use std::convert::TryFrom;

use crate::structure::{Payload, StructureTag};
use crate::tag::{TagClass, TagForm};

use nom::bits::streaming as bits;
use nom::bytes::streaming::take;
use nom::combinator::map_opt;
use nom::error::{Error, ErrorKind, ParseError};
use nom::number::streaming as number;
use nom::sequence::tuple;
use nom::{IResult, Needed};

#[derive(Clone, Copy, Debug)]
enum Length {
    Definite(usize),
    Indefinite,
}

fn class_bits(i: (&[u8], usize)) -> IResult<(&[u8], usize), TagClass> {
    map_opt(bits::take(2usize), TagClass::from_u8)(i)
}

fn form_bit(i: (&[u8], usize)) -> IResult<(&[u8], usize), TagForm> {
    map_opt(bits::take(1usize), TagForm::from_u8)(i)
}

fn number_bits(i: (&[u8], usize)) -> IResult<(&[u8], usize), u64> {
    bits::take(5usize)(i)
}

fn parse_identifier(i: &[u8]) -> IResult<&[u8], (TagClass, TagForm, u64)> {
    nom::bits(tuple((class_bits, form_bit, number_bits)))(i)
}

fn fail<T>(i: &[u8], kind: ErrorKind) -> IResult<&[u8], T> {
    Err(nom::Err::Failure(Error::from_error_kind(i, kind)))
}

fn parse_length(i: &[u8]) -> IResult<&[u8], Length> {
    let (i, first) = number::be_u8(i)?;
    if first < 0x80 {
        return Ok((i, Length::Definite(first as usize)));
    }
    if first == 0x80 {
        return Ok((i, Length::Indefinite));
    }
    let (i, octets) = take(first & 0x7F)(i)?;
    let (_, len) = parse_uint(octets)?;
    match usize::try_from(len) {
        Ok(len) => Ok((i, Length::Definite(len))),
        Err(_) => fail(i, ErrorKind::TooLarge),
    }
}

/// Fold the whole input slice into an unsigned integer, big-endian.
pub fn parse_uint(i: &[u8]) -> IResult<&[u8], u64> {
    if i.len() > 8 {
        return fail(i, ErrorKind::TooLarge);
    }
    Ok((
        &i[i.len()..],
        i.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)),
    ))
}

/// Fold the whole input slice into a signed integer, sign-extending the
/// leading octet. Encodings wider than eight octets are refused rather
/// than truncated.
pub fn parse_int(i: &[u8]) -> IResult<&[u8], i64> {
    if i.is_empty() {
        return fail(i, ErrorKind::Eof);
    }
    if i.len() > 8 {
        return fail(i, ErrorKind::TooLarge);
    }
    let mut val: i64 = if i[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in i {
        val = (val << 8) | i64::from(b);
    }
    Ok((&i[i.len()..], val))
}

/// Decode a BOOLEAN content octet. Only the canonical single-octet
/// encodings 0x00 and 0xFF are accepted.
pub fn parse_bool(i: &[u8]) -> IResult<&[u8], bool> {
    if i.len() != 1 {
        return fail(i, ErrorKind::Verify);
    }
    match i[0] {
        0x00 => Ok((&i[1..], false)),
        0xFF => Ok((&i[1..], true)),
        _ => fail(i, ErrorKind::Verify),
    }
}

/// Decode OBJECT IDENTIFIER content octets into the arc sequence.
pub fn parse_oid_arcs(i: &[u8]) -> IResult<&[u8], Vec<u64>> {
    if i.is_empty() {
        return fail(i, ErrorKind::Eof);
    }
    let mut arcs = Vec::new();
    let mut sub: u64 = 0;
    let mut mid = false;
    for (n, &b) in i.iter().enumerate() {
        if sub > u64::MAX >> 7 {
            return fail(&i[n..], ErrorKind::TooLarge);
        }
        sub = (sub << 7) | u64::from(b & 0x7F);
        if b & 0x80 != 0 {
            mid = true;
            continue;
        }
        if arcs.is_empty() {
            // first subidentifier folds the first two arcs
            arcs.push(sub / 40);
            arcs.push(sub % 40);
        } else {
            arcs.push(sub);
        }
        sub = 0;
        mid = false;
    }
    if mid {
        return fail(&i[i.len()..], ErrorKind::Complete);
    }
    Ok((&i[i.len()..], arcs))
}

/// Parse one BER value from the front of the input.
///
/// Definite lengths are always accepted. Indefinite lengths (terminated
/// by the end-of-contents octets `00 00`) are accepted for constructed
/// values only; a primitive value with indefinite length is malformed.
pub fn parse_tag(i: &[u8]) -> IResult<&[u8], StructureTag> {
    let (i, ((class, form, id), length)) = tuple((parse_identifier, parse_length))(i)?;
    match (form, length) {
        (TagForm::Primitive, Length::Definite(len)) => {
            let (i, content) = take(len)(i)?;
            Ok((
                i,
                StructureTag {
                    class,
                    id,
                    payload: Payload::Primitive(content.to_vec()),
                },
            ))
        }
        (TagForm::Primitive, Length::Indefinite) => fail(i, ErrorKind::LengthValue),
        (TagForm::Constructed, Length::Definite(len)) => {
            let (i, mut content) = take(len)(i)?;
            let mut inner = Vec::new();
            while !content.is_empty() {
                let (rest, sub) = parse_tag(content)?;
                content = rest;
                inner.push(sub);
            }
            Ok((
                i,
                StructureTag {
                    class,
                    id,
                    payload: Payload::Constructed(inner),
                },
            ))
        }
        (TagForm::Constructed, Length::Indefinite) => {
            let mut i = i;
            let mut inner = Vec::new();
            loop {
                if i.len() < 2 {
                    return Err(nom::Err::Incomplete(Needed::new(2 - i.len())));
                }
                if i[0] == 0x00 && i[1] == 0x00 {
                    i = &i[2..];
                    break;
                }
                let (rest, sub) = parse_tag(i)?;
                i = rest;
                inner.push(sub);
            }
            Ok((
                i,
                StructureTag {
                    class,
                    id,
                    payload: Payload::Constructed(inner),
                },
            ))
        }
    }
}

/// Stateless parser handle, shaped for use inside a tokio codec.
pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse<'a>(&mut self, input: &'a [u8]) -> IResult<&'a [u8], StructureTag> {
        if input.is_empty() {
            return Err(nom::Err::Incomplete(Needed::Unknown));
        }
        parse_tag(input)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{Payload, StructureTag};
    use crate::tag::TagClass;

    #[test]
    fn primitive() {
        let bytes = [0x02, 0x02, 0xFF, 0x7F];
        let expected = StructureTag {
            class: TagClass::Universal,
            id: 2,
            payload: Payload::Primitive(vec![0xFF, 0x7F]),
        };
        assert_eq!(parse_tag(&bytes), Ok((&[][..], expected)));
    }

    #[test]
    fn constructed() {
        let bytes = [0x30, 0x05, 0x04, 0x03, b'a', b'b', b'c'];
        let expected = StructureTag {
            class: TagClass::Universal,
            id: 16,
            payload: Payload::Constructed(vec![StructureTag {
                class: TagClass::Universal,
                id: 4,
                payload: Payload::Primitive(b"abc".to_vec()),
            }]),
        };
        assert_eq!(parse_tag(&bytes), Ok((&[][..], expected)));
    }

    #[test]
    fn empty_sequence() {
        let bytes = [0x30, 0x00];
        let expected = StructureTag {
            class: TagClass::Universal,
            id: 16,
            payload: Payload::Constructed(vec![]),
        };
        assert_eq!(parse_tag(&bytes), Ok((&[][..], expected)));
    }

    #[test]
    fn long_form_length() {
        let mut bytes = vec![0x04, 0x81, 0x80];
        bytes.extend(std::iter::repeat(b'x').take(128));
        let (rest, tag) = parse_tag(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(tag.expect_primitive().unwrap().len(), 128);
    }

    #[test]
    fn indefinite_constructed() {
        let bytes = [
            0x30, 0x80, 0x04, 0x01, b'a', 0x04, 0x01, b'b', 0x00, 0x00,
        ];
        let (rest, tag) = parse_tag(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(tag.expect_constructed().unwrap().len(), 2);
    }

    #[test]
    fn indefinite_primitive_rejected() {
        let bytes = [0x04, 0x80, b'a', 0x00, 0x00];
        assert!(matches!(parse_tag(&bytes), Err(nom::Err::Failure(_))));
    }

    #[test]
    fn incomplete_value() {
        let bytes = [0x04, 0x05, b'a', b'b'];
        assert!(matches!(parse_tag(&bytes), Err(nom::Err::Incomplete(_))));
    }

    #[test]
    fn trailing_input_left() {
        let bytes = [0x05, 0x00, 0x02, 0x01, 0x01];
        let (rest, tag) = parse_tag(&bytes).unwrap();
        assert_eq!(tag.id, 5);
        assert_eq!(rest.len(), 3);
    }

    #[test]
    fn int_roundtrip() {
        for v in [0i64, 1, 127, 128, 255, 256, -1, -128, -129, i64::MAX, i64::MIN] {
            let content = {
                use crate::types::{AsnTag, Integer};
                let tag = Integer {
                    inner: v,
                    ..Default::default()
                }
                .into_structure();
                tag.expect_primitive().unwrap()
            };
            assert_eq!(parse_int(&content), Ok((&[][..], v)), "value {}", v);
        }
    }

    #[test]
    fn int_overflow() {
        let content = [0x01u8; 9];
        assert!(matches!(parse_int(&content), Err(nom::Err::Failure(_))));
    }

    #[test]
    fn bool_canonical_only() {
        assert_eq!(parse_bool(&[0x00]), Ok((&[][..], false)));
        assert_eq!(parse_bool(&[0xFF]), Ok((&[][..], true)));
        assert!(parse_bool(&[0x01]).is_err());
        assert!(parse_bool(&[]).is_err());
        assert!(parse_bool(&[0xFF, 0xFF]).is_err());
    }

    #[test]
    fn oid_roundtrip() {
        use crate::types::{AsnTag, Oid};
        let arcs = vec![1, 3, 6, 1, 4, 1, 1466, 20037];
        let content = Oid {
            inner: arcs.clone(),
            ..Default::default()
        }
        .into_structure()
        .expect_primitive()
        .unwrap();
        assert_eq!(parse_oid_arcs(&content), Ok((&[][..], arcs)));
    }
}
