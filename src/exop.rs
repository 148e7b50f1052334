//! Extended operation construction and parsing.
//!
//! A generic exop is represented by [`Exop`]. If a particular exop is
//! implemented by this library, it may have one or two associated
//! structs: one for constructing requests, and another for parsing
//! responses, named with the `Resp` suffix when the two differ.
//!
//! A request struct must implement the `From` conversion of itself into
//! `Exop`. A response struct must implement the [`ExopParser`] trait.

use bytes::BytesMut;

use canopy_ber::parse::parse_tag;
use canopy_ber::tag::TagClass;
use canopy_ber::types::{AsnTag, OctetString, Sequence, Tag};
use canopy_ber::write;

/// OID of the StartTLS extended operation.
pub const STARTTLS_OID: &str = "1.3.6.1.4.1.1466.20037";

/// OID of the "Who Am I?" extended operation (RFC 4532).
pub const WHOAMI_OID: &str = "1.3.6.1.4.1.4203.1.11.3";

/// OID of the Password Modify extended operation (RFC 3062).
pub const PASSMOD_OID: &str = "1.3.6.1.4.1.4203.1.11.1";

/// OID of the Notice of Disconnection unsolicited notification.
pub const DISCONNECTION_OID: &str = "1.3.6.1.4.1.1466.20036";

/// Generic extended operation.
///
/// Since the same struct is used for requests and responses, both
/// elements are optional: a request without a value leaves `val` empty,
/// and a response may omit either component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exop {
    /// OID of the operation.
    pub name: Option<String>,
    /// Request or response value.
    pub val: Option<Vec<u8>>,
}

/// Conversion trait for extended response values.
pub trait ExopParser {
    /// Convert the raw BER value into an exop-specific struct.
    fn parse(val: &[u8]) -> Self;
}

impl Exop {
    /// Parse the generic exop into an exop-specific struct.
    ///
    /// The parser will panic if the value is `None`.
    pub fn parse<T: ExopParser>(&self) -> T {
        T::parse(self.val.as_ref().expect("value"))
    }
}

pub(crate) fn construct_exop(exop: Exop) -> Vec<Tag> {
    let mut parts = vec![];
    if let Some(name) = exop.name {
        parts.push(Tag::OctetString(OctetString {
            id: 0,
            class: TagClass::Context,
            inner: Vec::from(name),
        }));
    }
    if let Some(val) = exop.val {
        parts.push(Tag::OctetString(OctetString {
            id: 1,
            class: TagClass::Context,
            inner: val,
        }));
    }
    parts
}

/// StartTLS extended operation (RFC 4511, section 4.14).
///
/// Issuing it through [`Ldap::extended()`](../struct.Ldap.html#method.extended)
/// only performs the protocol exchange; promoting the underlying stream
/// to TLS is the connection's affair and happens during connection setup
/// when the settings request it.
#[derive(Clone, Copy, Debug)]
pub struct StartTls;

impl From<StartTls> for Exop {
    fn from(_: StartTls) -> Exop {
        Exop {
            name: Some(STARTTLS_OID.to_owned()),
            val: None,
        }
    }
}

/// Who Am I? extended operation (RFC 4532).
#[derive(Clone, Copy, Debug)]
pub struct WhoAmI;

/// Who Am I? response.
#[derive(Clone, Debug)]
pub struct WhoAmIResp {
    /// The authorization identity of the bound connection, typically in
    /// the `dn:` or `u:` form.
    pub authzid: String,
}

impl From<WhoAmI> for Exop {
    fn from(_: WhoAmI) -> Exop {
        Exop {
            name: Some(WHOAMI_OID.to_owned()),
            val: None,
        }
    }
}

impl ExopParser for WhoAmIResp {
    fn parse(val: &[u8]) -> WhoAmIResp {
        WhoAmIResp {
            authzid: String::from_utf8(val.to_vec()).expect("authzid"),
        }
    }
}

/// Password Modify extended operation (RFC 3062).
///
/// All elements are optional: an absent `user_id` means the bound user,
/// and an absent `new_pass` asks the server to generate one, returned in
/// [`PasswordModifyResp`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PasswordModify<'a> {
    pub user_id: Option<&'a str>,
    pub old_pass: Option<&'a str>,
    pub new_pass: Option<&'a str>,
}

/// Password Modify response.
#[derive(Clone, Debug)]
pub struct PasswordModifyResp {
    /// Server-generated password, if one was requested.
    pub gen_pass: Option<String>,
}

impl<'a> From<PasswordModify<'a>> for Exop {
    fn from(pm: PasswordModify) -> Exop {
        let mut inner = vec![];
        let fields = [(0, pm.user_id), (1, pm.old_pass), (2, pm.new_pass)];
        for (id, field) in fields {
            if let Some(field) = field {
                inner.push(Tag::OctetString(OctetString {
                    id,
                    class: TagClass::Context,
                    inner: Vec::from(field),
                }));
            }
        }
        let mut buf = BytesMut::new();
        write::encode_into(
            &mut buf,
            Tag::Sequence(Sequence {
                inner,
                ..Default::default()
            })
            .into_structure(),
        )
        .expect("encoded passmod");
        Exop {
            name: Some(PASSMOD_OID.to_owned()),
            val: Some(Vec::from(&buf[..])),
        }
    }
}

impl ExopParser for PasswordModifyResp {
    fn parse(val: &[u8]) -> PasswordModifyResp {
        let (_, tag) = parse_tag(val).expect("passmod response");
        let gen_pass = tag
            .match_class(TagClass::Universal)
            .and_then(|t| t.expect_constructed())
            .and_then(|inner| inner.into_iter().find(|t| t.id == 0))
            .and_then(|t| t.expect_primitive())
            .map(|v| String::from_utf8(v).expect("generated password"));
        PasswordModifyResp { gen_pass }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn whoami_exop() {
        let exop: Exop = WhoAmI.into();
        assert_eq!(exop.name.as_deref(), Some(WHOAMI_OID));
        assert!(exop.val.is_none());
        let parts = construct_exop(exop);
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn passmod_encodes_fields() {
        let exop: Exop = PasswordModify {
            user_id: Some("dn:cn=admin,dc=example,dc=org"),
            old_pass: Some("old"),
            new_pass: Some("new"),
        }
        .into();
        assert_eq!(exop.name.as_deref(), Some(PASSMOD_OID));
        let val = exop.val.expect("value");
        // SEQUENCE wrapper with three context-tagged strings
        assert_eq!(val[0], 0x30);
        assert!(val.windows(2).any(|w| w == [0x81, 0x03]));
        assert!(val.windows(2).any(|w| w == [0x82, 0x03]));
    }
}
