//! Tag classes, forms, and universal tag numbers.

/// Class bits of a BER identifier octet.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum TagClass {
    Universal = 0,
    Application = 1,
    Context = 2,
    Private = 3,
}

impl TagClass {
    pub fn from_u8(v: u8) -> Option<TagClass> {
        match v {
            0 => Some(TagClass::Universal),
            1 => Some(TagClass::Application),
            2 => Some(TagClass::Context),
            3 => Some(TagClass::Private),
            _ => None,
        }
    }
}

/// Primitive/constructed bit of a BER identifier octet.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum TagForm {
    Primitive = 0,
    Constructed = 1,
}

impl TagForm {
    pub fn from_u8(v: u8) -> Option<TagForm> {
        match v {
            0 => Some(TagForm::Primitive),
            1 => Some(TagForm::Constructed),
            _ => None,
        }
    }
}

/// Universal tag numbers for the types LDAP uses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u64)]
pub enum Universal {
    Boolean = 1,
    Integer = 2,
    OctetString = 4,
    Null = 5,
    ObjectIdentifier = 6,
    Enumerated = 10,
    Sequence = 16,
    Set = 17,
}
