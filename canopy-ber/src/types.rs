//! Typed value constructors.
//!
//! Every wrapper carries its own `id` and `class` so that the implicit
//! tagging ubiquitous in LDAP is expressed by overriding the defaults:
//!
//! ```
//! use canopy_ber::tag::TagClass;
//! use canopy_ber::types::OctetString;
//!
//! // [0] IMPLICIT OCTET STRING
//! let password = OctetString {
//!     id: 0,
//!     class: TagClass::Context,
//!     inner: b"secret".to_vec(),
//! };
//! # let _ = password;
//! ```

use crate::structure::{Payload, StructureTag};
use crate::tag::{TagClass, Universal};

/// Lowering of a typed value into its serializable form.
///
/// Only the content encoding differs between types; identifier and length
/// handling live in [`crate::write`], keyed off the resulting
/// `StructureTag`.
pub trait AsnTag {
    fn into_structure(self) -> StructureTag;
}

/// The closed set of value shapes LDAP messages are built from.
#[derive(Clone, Debug, PartialEq)]
pub enum Tag {
    Boolean(Boolean),
    Integer(Integer),
    Enumerated(Enumerated),
    OctetString(OctetString),
    Null(Null),
    Oid(Oid),
    Sequence(Sequence),
    Set(Set),
    ExplicitTag(ExplicitTag),
    StructureTag(StructureTag),
}

impl AsnTag for Tag {
    fn into_structure(self) -> StructureTag {
        match self {
            Tag::Boolean(t) => t.into_structure(),
            Tag::Integer(t) => t.into_structure(),
            Tag::Enumerated(t) => t.into_structure(),
            Tag::OctetString(t) => t.into_structure(),
            Tag::Null(t) => t.into_structure(),
            Tag::Oid(t) => t.into_structure(),
            Tag::Sequence(t) => t.into_structure(),
            Tag::Set(t) => t.into_structure(),
            Tag::ExplicitTag(t) => t.into_structure(),
            Tag::StructureTag(t) => t,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Boolean {
    pub id: u64,
    pub class: TagClass,
    pub inner: bool,
}

impl AsnTag for Boolean {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: Payload::Primitive(vec![if self.inner { 0xFF } else { 0x00 }]),
        }
    }
}

impl Default for Boolean {
    fn default() -> Boolean {
        Boolean {
            id: Universal::Boolean as u64,
            class: TagClass::Universal,
            inner: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Integer {
    pub id: u64,
    pub class: TagClass,
    pub inner: i64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Enumerated {
    pub id: u64,
    pub class: TagClass,
    pub inner: i64,
}

/// Minimal-length two's complement content octets.
///
/// Leading octets are dropped while they carry no information: a 0x00
/// octet followed by a clear sign bit, or a 0xFF octet followed by a set
/// sign bit.
fn int_content(value: i64) -> Vec<u8> {
    let repr = value.to_be_bytes();
    let mut skip = 0;
    while skip < repr.len() - 1 {
        let redundant = match repr[skip] {
            0x00 => repr[skip + 1] & 0x80 == 0,
            0xFF => repr[skip + 1] & 0x80 != 0,
            _ => false,
        };
        if !redundant {
            break;
        }
        skip += 1;
    }
    repr[skip..].to_vec()
}

impl AsnTag for Integer {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: Payload::Primitive(int_content(self.inner)),
        }
    }
}

impl AsnTag for Enumerated {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: Payload::Primitive(int_content(self.inner)),
        }
    }
}

impl Default for Integer {
    fn default() -> Integer {
        Integer {
            id: Universal::Integer as u64,
            class: TagClass::Universal,
            inner: 0,
        }
    }
}

impl Default for Enumerated {
    fn default() -> Enumerated {
        Enumerated {
            id: Universal::Enumerated as u64,
            class: TagClass::Universal,
            inner: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OctetString {
    pub id: u64,
    pub class: TagClass,
    pub inner: Vec<u8>,
}

impl AsnTag for OctetString {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: Payload::Primitive(self.inner),
        }
    }
}

impl Default for OctetString {
    fn default() -> OctetString {
        OctetString {
            id: Universal::OctetString as u64,
            class: TagClass::Universal,
            inner: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Null {
    pub id: u64,
    pub class: TagClass,
    pub inner: (),
}

impl AsnTag for Null {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: Payload::Primitive(Vec::new()),
        }
    }
}

impl Default for Null {
    fn default() -> Null {
        Null {
            id: Universal::Null as u64,
            class: TagClass::Universal,
            inner: (),
        }
    }
}

/// OBJECT IDENTIFIER value, held as its arc sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct Oid {
    pub id: u64,
    pub class: TagClass,
    pub inner: Vec<u64>,
}

impl AsnTag for Oid {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: Payload::Primitive(oid_content(&self.inner)),
        }
    }
}

impl Default for Oid {
    fn default() -> Oid {
        Oid {
            id: Universal::ObjectIdentifier as u64,
            class: TagClass::Universal,
            inner: Vec::new(),
        }
    }
}

/// Content octets of an OID: the first two arcs pack into one subidentifier,
/// every subidentifier is base-128 with continuation bits.
///
/// An OID needs at least two arcs; fewer is a caller error and yields
/// empty content, which a conformant peer will reject.
fn oid_content(arcs: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(arcs.len() + 1);
    if arcs.len() < 2 {
        return out;
    }
    let mut rest = vec![arcs[0] * 40 + arcs[1]];
    rest.extend_from_slice(&arcs[2..]);
    for sub in rest {
        let mut stack = [0u8; 10];
        let mut n = 0;
        let mut v = sub;
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
    out
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sequence {
    pub id: u64,
    pub class: TagClass,
    pub inner: Vec<Tag>,
}

impl AsnTag for Sequence {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: Payload::Constructed(
                self.inner.into_iter().map(Tag::into_structure).collect(),
            ),
        }
    }
}

impl Default for Sequence {
    fn default() -> Sequence {
        Sequence {
            id: Universal::Sequence as u64,
            class: TagClass::Universal,
            inner: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Set {
    pub id: u64,
    pub class: TagClass,
    pub inner: Vec<Tag>,
}

impl AsnTag for Set {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: Payload::Constructed(
                self.inner.into_iter().map(Tag::into_structure).collect(),
            ),
        }
    }
}

impl Default for Set {
    fn default() -> Set {
        Set {
            id: Universal::Set as u64,
            class: TagClass::Universal,
            inner: Vec::new(),
        }
    }
}

/// Explicitly tagged value. LDAP itself tags implicitly, with one
/// exception: the `not` filter wraps its inner filter explicitly.
#[derive(Clone, Debug, PartialEq)]
pub struct ExplicitTag {
    pub id: u64,
    pub class: TagClass,
    pub inner: Box<Tag>,
}

impl AsnTag for ExplicitTag {
    fn into_structure(self) -> StructureTag {
        StructureTag {
            id: self.id,
            class: self.class,
            payload: Payload::Constructed(vec![self.inner.into_structure()]),
        }
    }
}

impl Default for ExplicitTag {
    fn default() -> ExplicitTag {
        ExplicitTag {
            id: Universal::Sequence as u64,
            class: TagClass::Universal,
            inner: Box::new(Tag::Null(Null::default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_payload(v: i64) -> Vec<u8> {
        let tag = Integer {
            inner: v,
            ..Default::default()
        }
        .into_structure();
        match tag.payload {
            Payload::Primitive(p) => p,
            _ => unreachable!(),
        }
    }

    #[test]
    fn int_minimal_positive() {
        assert_eq!(int_payload(0), vec![0x00]);
        assert_eq!(int_payload(127), vec![0x7F]);
    }

    #[test]
    fn int_sign_extension() {
        // 128 needs a leading zero octet to stay positive
        assert_eq!(int_payload(128), vec![0x00, 0x80]);
        assert_eq!(int_payload(256), vec![0x01, 0x00]);
    }

    #[test]
    fn int_negative() {
        assert_eq!(int_payload(-1), vec![0xFF]);
        assert_eq!(int_payload(-128), vec![0x80]);
        assert_eq!(int_payload(-129), vec![0xFF, 0x7F]);
    }

    #[test]
    fn bool_canonical() {
        let t = Boolean {
            inner: true,
            ..Default::default()
        }
        .into_structure();
        assert_eq!(t.payload, Payload::Primitive(vec![0xFF]));
    }

    #[test]
    fn oid_arcs() {
        // 1.3.6.1.4.1.1466.20037
        let oid = Oid {
            inner: vec![1, 3, 6, 1, 4, 1, 1466, 20037],
            ..Default::default()
        }
        .into_structure();
        assert_eq!(
            oid.payload,
            Payload::Primitive(vec![0x2B, 0x06, 0x01, 0x04, 0x01, 0x8B, 0x3A, 0x81, 0x9C, 0x45])
        );
    }
}
