//! Serializable tagged values.

use crate::tag::TagClass;

/// A tagged value ready for serialization, or produced by the parser.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StructureTag {
    pub class: TagClass,
    pub id: u64,
    pub payload: Payload,
}

/// The content octets of a tagged value.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Payload {
    /// Raw content octets of a primitive value.
    Primitive(Vec<u8>),
    /// Nested values of a constructed value.
    Constructed(Vec<StructureTag>),
}

impl StructureTag {
    /// Keep the value only if it has the given class.
    pub fn match_class(self, class: TagClass) -> Option<Self> {
        (self.class == class).then_some(self)
    }

    /// Keep the value only if it has the given tag number.
    pub fn match_id(self, id: u64) -> Option<Self> {
        (self.id == id).then_some(self)
    }

    /// Unwrap the nested values of a constructed tag.
    pub fn expect_constructed(self) -> Option<Vec<StructureTag>> {
        match self.payload {
            Payload::Primitive(_) => None,
            Payload::Constructed(inner) => Some(inner),
        }
    }

    /// Unwrap the content octets of a primitive tag.
    pub fn expect_primitive(self) -> Option<Vec<u8>> {
        match self.payload {
            Payload::Primitive(inner) => Some(inner),
            Payload::Constructed(_) => None,
        }
    }

    /// True for a constructed tag.
    pub fn is_constructed(&self) -> bool {
        matches!(self.payload, Payload::Constructed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::TagClass;

    #[test]
    fn match_and_unwrap() {
        let tag = StructureTag {
            class: TagClass::Application,
            id: 3,
            payload: Payload::Constructed(vec![StructureTag {
                class: TagClass::Universal,
                id: 4,
                payload: Payload::Primitive(vec![b'x']),
            }]),
        };
        let inner = tag
            .clone()
            .match_class(TagClass::Application)
            .and_then(|t| t.match_id(3))
            .and_then(|t| t.expect_constructed())
            .unwrap();
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].clone().expect_primitive(), Some(vec![b'x']));
    }

    #[test]
    fn mismatched_class() {
        let tag = StructureTag {
            class: TagClass::Context,
            id: 0,
            payload: Payload::Primitive(vec![]),
        };
        assert!(tag.match_class(TagClass::Universal).is_none());
    }
}
