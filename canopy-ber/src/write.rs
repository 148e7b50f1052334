//! BER encoding.
//!
//! Only definite lengths are produced, as RFC 4511 requires for the
//! client side.

use crate::structure::{Payload, StructureTag};
use crate::tag::TagForm;
use bytes::BytesMut;

use std::io;

/// Serialize a tagged value onto the end of `buf`.
pub fn encode_into(buf: &mut BytesMut, tag: StructureTag) -> io::Result<()> {
    let mut out = Vec::new();
    encode_rec(&mut out, tag);
    buf.extend(out);
    Ok(())
}

fn encode_rec(out: &mut Vec<u8>, tag: StructureTag) {
    match tag.payload {
        Payload::Primitive(content) => {
            write_identifier(out, &tag.class, TagForm::Primitive, tag.id);
            write_length(out, content.len());
            out.extend(content);
        }
        Payload::Constructed(inner) => {
            let mut nested = Vec::new();
            for sub in inner {
                encode_rec(&mut nested, sub);
            }
            write_identifier(out, &tag.class, TagForm::Constructed, tag.id);
            write_length(out, nested.len());
            out.extend(nested);
        }
    }
}

fn write_identifier(out: &mut Vec<u8>, class: &crate::tag::TagClass, form: TagForm, id: u64) {
    let leading = (*class as u8) << 6 | (form as u8) << 5;
    if id <= 30 {
        out.push(leading | id as u8);
        return;
    }
    // high-tag-number form: 0x1F marker, then base-128 big-endian
    out.push(leading | 0x1F);
    let mut stack = [0u8; 10];
    let mut n = 0;
    let mut v = id;
    loop {
        stack[n] = (v & 0x7F) as u8;
        n += 1;
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    while n > 1 {
        n -= 1;
        out.push(stack[n] | 0x80);
    }
    out.push(stack[0]);
}

fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let repr = len.to_be_bytes();
    let skip = repr.iter().take_while(|&&b| b == 0).count();
    out.push(0x80 | (repr.len() - skip) as u8);
    out.extend_from_slice(&repr[skip..]);
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use crate::tag::TagClass::*;
    use crate::types::*;

    fn encoded(tag: Tag) -> BytesMut {
        let mut buf = BytesMut::new();
        super::encode_into(&mut buf, tag.into_structure()).unwrap();
        buf
    }

    #[test]
    fn integer() {
        let tag = Tag::Integer(Integer {
            inner: 1616,
            ..Default::default()
        });
        assert_eq!(encoded(tag), vec![0x02, 0x02, 0x06, 0x50].as_slice());
    }

    #[test]
    fn nested_sequence() {
        let tag = Tag::Sequence(Sequence {
            inner: vec![Tag::OctetString(OctetString {
                inner: b"Hello World!".to_vec(),
                ..Default::default()
            })],
            ..Default::default()
        });
        assert_eq!(
            encoded(tag),
            vec![48, 14, 4, 12, 72, 101, 108, 108, 111, 32, 87, 111, 114, 108, 100, 33].as_slice()
        );
    }

    #[test]
    fn application_and_context_tags() {
        // a bind request shape: version, name, simple password
        let tag = Tag::Sequence(Sequence {
            inner: vec![
                Tag::Integer(Integer {
                    inner: 1,
                    ..Default::default()
                }),
                Tag::Sequence(Sequence {
                    id: 0,
                    class: Application,
                    inner: vec![
                        Tag::Integer(Integer {
                            inner: 3,
                            ..Default::default()
                        }),
                        Tag::OctetString(OctetString {
                            inner: b"cn=root,dc=plabs".to_vec(),
                            ..Default::default()
                        }),
                        Tag::OctetString(OctetString {
                            id: 0,
                            class: Context,
                            inner: b"asdf".to_vec(),
                        }),
                    ],
                }),
            ],
            ..Default::default()
        });
        let expected = vec![
            0x30, 0x20, 0x02, 0x01, 0x01, 0x60, 0x1B, 0x02, 0x01, 0x03, 0x04, 0x10, 0x63, 0x6E,
            0x3D, 0x72, 0x6F, 0x6F, 0x74, 0x2C, 0x64, 0x63, 0x3D, 0x70, 0x6C, 0x61, 0x62, 0x73,
            0x80, 0x04, 0x61, 0x73, 0x64, 0x66,
        ];
        assert_eq!(encoded(tag), expected.as_slice());
    }

    #[test]
    fn long_form_length() {
        let tag = Tag::OctetString(OctetString {
            inner: vec![b'x'; 300],
            ..Default::default()
        });
        let buf = encoded(tag);
        assert_eq!(&buf[..4], &[0x04, 0x82, 0x01, 0x2C]);
        assert_eq!(buf.len(), 304);
    }

    #[test]
    fn roundtrip_through_parser() {
        let tag = Tag::Sequence(Sequence {
            inner: vec![
                Tag::Boolean(Boolean {
                    inner: true,
                    ..Default::default()
                }),
                Tag::Set(Set {
                    inner: vec![Tag::Null(Null::default())],
                    ..Default::default()
                }),
                Tag::Enumerated(Enumerated {
                    inner: 2,
                    ..Default::default()
                }),
            ],
            ..Default::default()
        });
        let structure = tag.into_structure();
        let buf = {
            let mut buf = BytesMut::new();
            super::encode_into(&mut buf, structure.clone()).unwrap();
            buf
        };
        let (rest, parsed) = crate::parse::parse_tag(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, structure);
    }
}
