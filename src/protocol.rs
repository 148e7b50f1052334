//! Typed protocol operations and the message envelope codec.
//!
//! Every RFC 4511 operation has a [`ProtocolOp`] variant carrying its
//! components; each variant knows its application tag and how to lower
//! itself into, or rebuild itself from, the BER structures. The
//! [`LdapCodec`] frames `{message id, operation, controls}` envelopes for
//! a `tokio_util` [`Framed`](tokio_util::codec::Framed) transport.

use std::io;

use crate::RequestId;
use crate::controls::{Control, RawControl, build_tag, parse_controls};
use crate::exop::Exop;
use crate::filter::Filter;
use crate::result::{LdapError, LdapResult, Result, ResultCode};
use crate::search::{DerefAliases, EntryItem, Scope, SearchItem};

use canopy_ber::Parser;
use canopy_ber::parse::{parse_int, parse_uint};
use canopy_ber::structure::{Payload, StructureTag};
use canopy_ber::tag::{TagClass, Universal};
use canopy_ber::types::{AsnTag, Boolean, Enumerated, Integer, Null, OctetString, Sequence, Set, Tag};
use canopy_ber::write;

use bytes::{Buf, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Decoder, Encoder};

pub type MaybeControls = Option<Vec<RawControl>>;
pub type ResultSender = oneshot::Sender<Option<(ProtocolOp, Vec<Control>)>>;

/// Per-search response sink. The bounded flavor applies backpressure to
/// the connection driver, and through it to the socket, when the caller
/// is slow to consume entries.
#[derive(Clone, Debug)]
pub enum ItemSender {
    Bounded(mpsc::Sender<(SearchItem, Vec<Control>)>),
    Unbounded(mpsc::UnboundedSender<(SearchItem, Vec<Control>)>),
}

impl ItemSender {
    pub(crate) async fn send(
        &self,
        item: (SearchItem, Vec<Control>),
    ) -> std::result::Result<(), ()> {
        match self {
            ItemSender::Bounded(tx) => tx.send(item).await.map_err(|_| ()),
            ItemSender::Unbounded(tx) => tx.send(item).map_err(|_| ()),
        }
    }
}

#[derive(Debug)]
pub(crate) enum ItemReceiver {
    Bounded(mpsc::Receiver<(SearchItem, Vec<Control>)>),
    Unbounded(mpsc::UnboundedReceiver<(SearchItem, Vec<Control>)>),
}

impl ItemReceiver {
    pub(crate) async fn recv(&mut self) -> Option<(SearchItem, Vec<Control>)> {
        match self {
            ItemReceiver::Bounded(rx) => rx.recv().await,
            ItemReceiver::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// How the driver should treat a request once written.
#[derive(Debug)]
pub enum LdapOp {
    /// Exactly one response completes the operation.
    Single,
    /// Responses stream to the sink until a terminal message.
    Search(ItemSender),
    /// No response; additionally scrub local state for the given ID.
    Abandon(RequestId),
    /// No response; shut the connection down after flushing.
    Unbind,
}

/// Modify sub-operation selector, with the RFC 4525 increment extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModOp {
    Add = 0,
    Delete = 1,
    Replace = 2,
    Increment = 3,
}

impl ModOp {
    fn from_i64(v: i64) -> Option<ModOp> {
        match v {
            0 => Some(ModOp::Add),
            1 => Some(ModOp::Delete),
            2 => Some(ModOp::Replace),
            3 => Some(ModOp::Increment),
            _ => None,
        }
    }
}

/// One atomic element of a Modify request, in wire form. An empty value
/// list on a delete means "all values"; on a replace it deletes the
/// attribute.
#[derive(Clone, Debug, PartialEq)]
pub struct ModSpec {
    pub op: ModOp,
    pub attr: String,
    pub values: Vec<Vec<u8>>,
}

/// An attribute with its values, as carried by add requests and search
/// result entries.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialAttribute {
    pub atype: String,
    pub vals: Vec<Vec<u8>>,
}

/// Authentication choice of a Bind request.
#[derive(Clone, Debug, PartialEq)]
pub enum AuthChoice {
    Simple(Vec<u8>),
    Sasl { mech: String, creds: Option<Vec<u8>> },
}

/// Common result components shared by all response operations.
#[derive(Clone, Debug, PartialEq)]
pub struct OpResult {
    pub rc: ResultCode,
    pub matched: String,
    pub text: String,
    pub refs: Vec<String>,
}

impl OpResult {
    pub(crate) fn success() -> OpResult {
        OpResult {
            rc: ResultCode::Success,
            matched: String::new(),
            text: String::new(),
            refs: vec![],
        }
    }

    pub(crate) fn into_ldap_result(self, ctrls: Vec<Control>) -> LdapResult {
        LdapResult {
            rc: self.rc,
            matched: self.matched,
            text: self.text,
            refs: self.refs,
            ctrls,
        }
    }
}

/// Parameters of a Search request.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchRequest {
    pub base: String,
    pub scope: Scope,
    pub deref: DerefAliases,
    pub sizelimit: i32,
    pub timelimit: i32,
    pub typesonly: bool,
    pub filter: Filter,
    pub attrs: Vec<String>,
}

/// A typed protocol operation, request or response.
#[derive(Clone, Debug, PartialEq)]
pub enum ProtocolOp {
    BindRequest {
        version: i32,
        dn: String,
        auth: AuthChoice,
    },
    BindResponse {
        res: OpResult,
        sasl_creds: Option<Vec<u8>>,
    },
    UnbindRequest,
    SearchRequest(SearchRequest),
    SearchResultEntry {
        dn: String,
        attrs: Vec<PartialAttribute>,
    },
    SearchResultDone(OpResult),
    SearchResultReference(Vec<String>),
    ModifyRequest {
        dn: String,
        mods: Vec<ModSpec>,
    },
    ModifyResponse(OpResult),
    AddRequest {
        dn: String,
        attrs: Vec<PartialAttribute>,
    },
    AddResponse(OpResult),
    DelRequest(String),
    DelResponse(OpResult),
    ModDnRequest {
        dn: String,
        rdn: String,
        delete_old: bool,
        new_sup: Option<String>,
    },
    ModDnResponse(OpResult),
    CompareRequest {
        dn: String,
        attr: String,
        value: Vec<u8>,
    },
    CompareResponse(OpResult),
    AbandonRequest(RequestId),
    ExtendedRequest(Exop),
    ExtendedResponse {
        res: OpResult,
        exop: Exop,
    },
    IntermediateResponse(Exop),
}

fn app_seq(id: u64, inner: Vec<Tag>) -> Tag {
    Tag::Sequence(Sequence {
        id,
        class: TagClass::Application,
        inner,
    })
}

fn octets(inner: Vec<u8>) -> Tag {
    Tag::OctetString(OctetString {
        inner,
        ..Default::default()
    })
}

fn string_octets(s: &str) -> Tag {
    octets(Vec::from(s.as_bytes()))
}

fn int_tag(v: i64) -> Tag {
    Tag::Integer(Integer {
        inner: v,
        ..Default::default()
    })
}

fn enum_tag(v: i64) -> Tag {
    Tag::Enumerated(Enumerated {
        inner: v,
        ..Default::default()
    })
}

fn bool_tag(v: bool) -> Tag {
    Tag::Boolean(Boolean {
        inner: v,
        ..Default::default()
    })
}

fn attr_list_tag(attrs: Vec<PartialAttribute>) -> Tag {
    Tag::Sequence(Sequence {
        inner: attrs
            .into_iter()
            .map(|pa| {
                Tag::Sequence(Sequence {
                    inner: vec![
                        string_octets(&pa.atype),
                        Tag::Set(Set {
                            inner: pa.vals.into_iter().map(octets).collect(),
                            ..Default::default()
                        }),
                    ],
                    ..Default::default()
                })
            })
            .collect(),
        ..Default::default()
    })
}

fn result_tags(res: &OpResult) -> Vec<Tag> {
    let mut tags = vec![
        enum_tag(res.rc.as_u32() as i64),
        string_octets(&res.matched),
        string_octets(&res.text),
    ];
    if !res.refs.is_empty() {
        tags.push(Tag::Sequence(Sequence {
            id: 3,
            class: TagClass::Context,
            inner: res.refs.iter().map(|r| string_octets(r)).collect(),
        }));
    }
    tags
}

impl ProtocolOp {
    /// Lower the operation into its BER form.
    pub fn into_tag(self) -> Tag {
        match self {
            ProtocolOp::BindRequest { version, dn, auth } => {
                let mut inner = vec![int_tag(version as i64), string_octets(&dn)];
                match auth {
                    AuthChoice::Simple(pw) => inner.push(Tag::OctetString(OctetString {
                        id: 0,
                        class: TagClass::Context,
                        inner: pw,
                    })),
                    AuthChoice::Sasl { mech, creds } => {
                        let mut sasl = vec![string_octets(&mech)];
                        if let Some(creds) = creds {
                            sasl.push(octets(creds));
                        }
                        inner.push(Tag::Sequence(Sequence {
                            id: 3,
                            class: TagClass::Context,
                            inner: sasl,
                        }));
                    }
                }
                app_seq(0, inner)
            }
            ProtocolOp::BindResponse { res, sasl_creds } => {
                let mut inner = result_tags(&res);
                if let Some(creds) = sasl_creds {
                    inner.push(Tag::OctetString(OctetString {
                        id: 7,
                        class: TagClass::Context,
                        inner: creds,
                    }));
                }
                app_seq(1, inner)
            }
            ProtocolOp::UnbindRequest => Tag::Null(Null {
                id: 2,
                class: TagClass::Application,
                inner: (),
            }),
            ProtocolOp::SearchRequest(req) => app_seq(
                3,
                vec![
                    string_octets(&req.base),
                    enum_tag(req.scope as i64),
                    enum_tag(req.deref as i64),
                    int_tag(req.sizelimit as i64),
                    int_tag(req.timelimit as i64),
                    bool_tag(req.typesonly),
                    req.filter.to_tag(),
                    Tag::Sequence(Sequence {
                        inner: req.attrs.iter().map(|a| string_octets(a)).collect(),
                        ..Default::default()
                    }),
                ],
            ),
            ProtocolOp::SearchResultEntry { dn, attrs } => {
                app_seq(4, vec![string_octets(&dn), attr_list_tag(attrs)])
            }
            ProtocolOp::SearchResultDone(res) => app_seq(5, result_tags(&res)),
            ProtocolOp::SearchResultReference(uris) => Tag::Sequence(Sequence {
                id: 19,
                class: TagClass::Application,
                inner: uris.iter().map(|u| string_octets(u)).collect(),
            }),
            ProtocolOp::ModifyRequest { dn, mods } => app_seq(
                6,
                vec![
                    string_octets(&dn),
                    Tag::Sequence(Sequence {
                        inner: mods
                            .into_iter()
                            .map(|m| {
                                Tag::Sequence(Sequence {
                                    inner: vec![
                                        enum_tag(m.op as i64),
                                        Tag::Sequence(Sequence {
                                            inner: vec![
                                                string_octets(&m.attr),
                                                Tag::Set(Set {
                                                    inner: m
                                                        .values
                                                        .into_iter()
                                                        .map(octets)
                                                        .collect(),
                                                    ..Default::default()
                                                }),
                                            ],
                                            ..Default::default()
                                        }),
                                    ],
                                    ..Default::default()
                                })
                            })
                            .collect(),
                        ..Default::default()
                    }),
                ],
            ),
            ProtocolOp::ModifyResponse(res) => app_seq(7, result_tags(&res)),
            ProtocolOp::AddRequest { dn, attrs } => {
                app_seq(8, vec![string_octets(&dn), attr_list_tag(attrs)])
            }
            ProtocolOp::AddResponse(res) => app_seq(9, result_tags(&res)),
            ProtocolOp::DelRequest(dn) => Tag::OctetString(OctetString {
                id: 10,
                class: TagClass::Application,
                inner: Vec::from(dn.as_bytes()),
            }),
            ProtocolOp::DelResponse(res) => app_seq(11, result_tags(&res)),
            ProtocolOp::ModDnRequest {
                dn,
                rdn,
                delete_old,
                new_sup,
            } => {
                let mut inner = vec![
                    string_octets(&dn),
                    string_octets(&rdn),
                    bool_tag(delete_old),
                ];
                if let Some(new_sup) = new_sup {
                    inner.push(Tag::OctetString(OctetString {
                        id: 0,
                        class: TagClass::Context,
                        inner: Vec::from(new_sup.as_bytes()),
                    }));
                }
                app_seq(12, inner)
            }
            ProtocolOp::ModDnResponse(res) => app_seq(13, result_tags(&res)),
            ProtocolOp::CompareRequest { dn, attr, value } => app_seq(
                14,
                vec![
                    string_octets(&dn),
                    Tag::Sequence(Sequence {
                        inner: vec![string_octets(&attr), octets(value)],
                        ..Default::default()
                    }),
                ],
            ),
            ProtocolOp::CompareResponse(res) => app_seq(15, result_tags(&res)),
            ProtocolOp::AbandonRequest(id) => Tag::Integer(Integer {
                id: 16,
                class: TagClass::Application,
                inner: id as i64,
            }),
            ProtocolOp::ExtendedRequest(exop) => {
                app_seq(23, crate::exop::construct_exop(exop))
            }
            ProtocolOp::ExtendedResponse { res, exop } => {
                let mut inner = result_tags(&res);
                if let Some(name) = exop.name {
                    inner.push(Tag::OctetString(OctetString {
                        id: 10,
                        class: TagClass::Context,
                        inner: Vec::from(name),
                    }));
                }
                if let Some(val) = exop.val {
                    inner.push(Tag::OctetString(OctetString {
                        id: 11,
                        class: TagClass::Context,
                        inner: val,
                    }));
                }
                app_seq(24, inner)
            }
            ProtocolOp::IntermediateResponse(exop) => {
                let mut inner = vec![];
                if let Some(name) = exop.name {
                    inner.push(Tag::OctetString(OctetString {
                        id: 0,
                        class: TagClass::Context,
                        inner: Vec::from(name),
                    }));
                }
                if let Some(val) = exop.val {
                    inner.push(Tag::OctetString(OctetString {
                        id: 1,
                        class: TagClass::Context,
                        inner: val,
                    }));
                }
                app_seq(25, inner)
            }
        }
    }

    /// Rebuild a typed operation from its BER form.
    pub fn from_tag(t: StructureTag) -> Result<ProtocolOp> {
        if t.class != TagClass::Application {
            return Err(malformed("operation tag class"));
        }
        let id = t.id;
        match id {
            0 => {
                let mut parts = constructed(t)?.into_iter();
                let version = prim_int(next(&mut parts)?)? as i32;
                let dn = prim_string(next(&mut parts)?)?;
                let auth_tag = next(&mut parts)?;
                let auth = match (auth_tag.class, auth_tag.id) {
                    (TagClass::Context, 0) => AuthChoice::Simple(prim_bytes(auth_tag)?),
                    (TagClass::Context, 3) => {
                        let mut sasl = constructed(auth_tag)?.into_iter();
                        let mech = prim_string(next(&mut sasl)?)?;
                        let creds = sasl.next().map(prim_bytes).transpose()?;
                        AuthChoice::Sasl { mech, creds }
                    }
                    _ => return Err(malformed("bind authentication choice")),
                };
                Ok(ProtocolOp::BindRequest { version, dn, auth })
            }
            1 => {
                let (res, extras) = parse_result_parts(constructed(t)?)?;
                let mut sasl_creds = None;
                for extra in extras {
                    if extra.class == TagClass::Context && extra.id == 7 {
                        sasl_creds = Some(prim_bytes(extra)?);
                    }
                }
                Ok(ProtocolOp::BindResponse { res, sasl_creds })
            }
            2 => Ok(ProtocolOp::UnbindRequest),
            3 => {
                let mut parts = constructed(t)?.into_iter();
                let base = prim_string(next(&mut parts)?)?;
                let scope = Scope::from_i64(prim_int(next(&mut parts)?)?)
                    .ok_or_else(|| malformed("search scope"))?;
                let deref = DerefAliases::from_i64(prim_int(next(&mut parts)?)?)
                    .ok_or_else(|| malformed("deref aliases"))?;
                let sizelimit = prim_int(next(&mut parts)?)? as i32;
                let timelimit = prim_int(next(&mut parts)?)? as i32;
                let typesonly = prim_bool(next(&mut parts)?)?;
                let filter = Filter::from_tag(next(&mut parts)?)?;
                let attrs = constructed(next(&mut parts)?)?
                    .into_iter()
                    .map(prim_string)
                    .collect::<Result<Vec<_>>>()?;
                Ok(ProtocolOp::SearchRequest(SearchRequest {
                    base,
                    scope,
                    deref,
                    sizelimit,
                    timelimit,
                    typesonly,
                    filter,
                    attrs,
                }))
            }
            4 => {
                let mut parts = constructed(t)?.into_iter();
                let dn = prim_string(next(&mut parts)?)?;
                let attrs = parse_attr_list(next(&mut parts)?)?;
                Ok(ProtocolOp::SearchResultEntry { dn, attrs })
            }
            5 => Ok(ProtocolOp::SearchResultDone(
                parse_result_parts(constructed(t)?)?.0,
            )),
            6 => {
                let mut parts = constructed(t)?.into_iter();
                let dn = prim_string(next(&mut parts)?)?;
                let mods = constructed(next(&mut parts)?)?
                    .into_iter()
                    .map(|change| {
                        let mut change = constructed(change)?.into_iter();
                        let op = ModOp::from_i64(prim_int(next(&mut change)?)?)
                            .ok_or_else(|| malformed("modify operation"))?;
                        let mut part_attr = constructed(next(&mut change)?)?.into_iter();
                        let attr = prim_string(next(&mut part_attr)?)?;
                        let values = constructed(next(&mut part_attr)?)?
                            .into_iter()
                            .map(prim_bytes)
                            .collect::<Result<Vec<_>>>()?;
                        Ok(ModSpec { op, attr, values })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(ProtocolOp::ModifyRequest { dn, mods })
            }
            7 => Ok(ProtocolOp::ModifyResponse(
                parse_result_parts(constructed(t)?)?.0,
            )),
            8 => {
                let mut parts = constructed(t)?.into_iter();
                let dn = prim_string(next(&mut parts)?)?;
                let attrs = parse_attr_list(next(&mut parts)?)?;
                Ok(ProtocolOp::AddRequest { dn, attrs })
            }
            9 => Ok(ProtocolOp::AddResponse(
                parse_result_parts(constructed(t)?)?.0,
            )),
            10 => Ok(ProtocolOp::DelRequest(prim_string(t)?)),
            11 => Ok(ProtocolOp::DelResponse(
                parse_result_parts(constructed(t)?)?.0,
            )),
            12 => {
                let mut parts = constructed(t)?.into_iter();
                let dn = prim_string(next(&mut parts)?)?;
                let rdn = prim_string(next(&mut parts)?)?;
                let delete_old = prim_bool(next(&mut parts)?)?;
                let new_sup = parts.next().map(prim_string).transpose()?;
                Ok(ProtocolOp::ModDnRequest {
                    dn,
                    rdn,
                    delete_old,
                    new_sup,
                })
            }
            13 => Ok(ProtocolOp::ModDnResponse(
                parse_result_parts(constructed(t)?)?.0,
            )),
            14 => {
                let mut parts = constructed(t)?.into_iter();
                let dn = prim_string(next(&mut parts)?)?;
                let mut ava = constructed(next(&mut parts)?)?.into_iter();
                let attr = prim_string(next(&mut ava)?)?;
                let value = prim_bytes(next(&mut ava)?)?;
                Ok(ProtocolOp::CompareRequest { dn, attr, value })
            }
            15 => Ok(ProtocolOp::CompareResponse(
                parse_result_parts(constructed(t)?)?.0,
            )),
            16 => {
                let content = t
                    .expect_primitive()
                    .ok_or_else(|| malformed("abandon request"))?;
                let (_, id) =
                    parse_int(&content).map_err(|_| malformed("abandon message id"))?;
                Ok(ProtocolOp::AbandonRequest(id as RequestId))
            }
            19 => {
                let uris = constructed(t)?
                    .into_iter()
                    .map(prim_string)
                    .collect::<Result<Vec<_>>>()?;
                Ok(ProtocolOp::SearchResultReference(uris))
            }
            23 => {
                let mut name = None;
                let mut val = None;
                for part in constructed(t)? {
                    match (part.class, part.id) {
                        (TagClass::Context, 0) => name = Some(prim_string(part)?),
                        (TagClass::Context, 1) => val = Some(prim_bytes(part)?),
                        _ => return Err(malformed("extended request component")),
                    }
                }
                Ok(ProtocolOp::ExtendedRequest(Exop { name, val }))
            }
            24 => {
                let (res, extras) = parse_result_parts(constructed(t)?)?;
                let mut exop = Exop {
                    name: None,
                    val: None,
                };
                for extra in extras {
                    match (extra.class, extra.id) {
                        (TagClass::Context, 10) => exop.name = Some(prim_string(extra)?),
                        (TagClass::Context, 11) => exop.val = Some(prim_bytes(extra)?),
                        _ => (),
                    }
                }
                Ok(ProtocolOp::ExtendedResponse { res, exop })
            }
            25 => {
                let mut exop = Exop {
                    name: None,
                    val: None,
                };
                for part in constructed(t)? {
                    match (part.class, part.id) {
                        (TagClass::Context, 0) => exop.name = Some(prim_string(part)?),
                        (TagClass::Context, 1) => exop.val = Some(prim_bytes(part)?),
                        _ => return Err(malformed("intermediate response component")),
                    }
                }
                Ok(ProtocolOp::IntermediateResponse(exop))
            }
            _ => Err(malformed("operation tag")),
        }
    }

    /// The item a search sink should receive for this response, if it is
    /// a search-stream response.
    pub(crate) fn into_search_item(self) -> Option<SearchItem> {
        match self {
            ProtocolOp::SearchResultEntry { dn, attrs } => {
                Some(SearchItem::Item(EntryItem::Entry { dn, attrs }))
            }
            ProtocolOp::SearchResultReference(uris) => {
                Some(SearchItem::Item(EntryItem::Referral(uris)))
            }
            ProtocolOp::IntermediateResponse(exop) => {
                Some(SearchItem::Item(EntryItem::Intermediate(exop)))
            }
            ProtocolOp::SearchResultDone(res) => {
                Some(SearchItem::Done(res.into_ldap_result(vec![])))
            }
            _ => None,
        }
    }
}

/// Split a single-response operation into the classic result triple:
/// the common result, the extended-operation components, and the SASL
/// server credentials.
pub(crate) fn split_response(
    op: ProtocolOp,
    ctrls: Vec<Control>,
) -> Result<(LdapResult, Exop, Option<Vec<u8>>)> {
    let no_exop = Exop {
        name: None,
        val: None,
    };
    match op {
        ProtocolOp::BindResponse { res, sasl_creds } => {
            Ok((res.into_ldap_result(ctrls), no_exop, sasl_creds))
        }
        ProtocolOp::SearchResultDone(res)
        | ProtocolOp::ModifyResponse(res)
        | ProtocolOp::AddResponse(res)
        | ProtocolOp::DelResponse(res)
        | ProtocolOp::ModDnResponse(res)
        | ProtocolOp::CompareResponse(res) => Ok((res.into_ldap_result(ctrls), no_exop, None)),
        ProtocolOp::ExtendedResponse { res, exop } => {
            Ok((res.into_ldap_result(ctrls), exop, None))
        }
        other => Err(LdapError::Protocol(format!(
            "unexpected response operation: {:?}",
            other
        ))),
    }
}

fn malformed(what: &str) -> LdapError {
    LdapError::Protocol(format!("malformed {}", what))
}

fn constructed(t: StructureTag) -> Result<Vec<StructureTag>> {
    t.expect_constructed()
        .ok_or_else(|| malformed("constructed value"))
}

fn next(iter: &mut std::vec::IntoIter<StructureTag>) -> Result<StructureTag> {
    iter.next().ok_or_else(|| malformed("missing component"))
}

fn prim_bytes(t: StructureTag) -> Result<Vec<u8>> {
    t.expect_primitive()
        .ok_or_else(|| malformed("primitive value"))
}

fn prim_string(t: StructureTag) -> Result<String> {
    String::from_utf8(prim_bytes(t)?).map_err(|_| malformed("utf8 string"))
}

fn prim_int(t: StructureTag) -> Result<i64> {
    let content = prim_bytes(t)?;
    let (_, v) = parse_int(&content).map_err(|_| malformed("integer"))?;
    Ok(v)
}

fn prim_bool(t: StructureTag) -> Result<bool> {
    let content = prim_bytes(t)?;
    let (_, v) =
        canopy_ber::parse::parse_bool(&content).map_err(|_| malformed("boolean"))?;
    Ok(v)
}

fn parse_attr_list(t: StructureTag) -> Result<Vec<PartialAttribute>> {
    constructed(t)?
        .into_iter()
        .map(|pa| {
            let mut pa = constructed(pa)?.into_iter();
            let atype = prim_string(next(&mut pa)?)?;
            let vals = constructed(next(&mut pa)?)?
                .into_iter()
                .map(prim_bytes)
                .collect::<Result<Vec<_>>>()?;
            Ok(PartialAttribute { atype, vals })
        })
        .collect()
}

/// Parse the referrals from a BER-encoded URI sequence.
pub fn parse_refs(t: StructureTag) -> Vec<String> {
    t.expect_constructed()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|t| t.expect_primitive())
        .filter_map(|v| String::from_utf8(v).ok())
        .collect()
}

fn parse_result_parts(
    parts: Vec<StructureTag>,
) -> Result<(OpResult, Vec<StructureTag>)> {
    let mut iter = parts.into_iter();
    let rc_content = next(&mut iter)?
        .match_class(TagClass::Universal)
        .and_then(|t| t.match_id(Universal::Enumerated as u64))
        .and_then(|t| t.expect_primitive())
        .ok_or_else(|| malformed("result code"))?;
    let (_, rc) = parse_uint(&rc_content).map_err(|_| malformed("result code"))?;
    let matched = prim_string(next(&mut iter)?)?;
    let text = prim_string(next(&mut iter)?)?;
    let mut refs = Vec::new();
    let mut extras = Vec::new();
    for comp in iter {
        if comp.class == TagClass::Context && comp.id == 3 {
            refs.extend(parse_refs(comp));
        } else {
            extras.push(comp);
        }
    }
    Ok((
        OpResult {
            rc: ResultCode::from_u32(rc as u32),
            matched,
            text,
            refs,
        },
        extras,
    ))
}

/// Codec framing LDAPMessage envelopes.
pub(crate) struct LdapCodec;

fn decoding_error(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("decoding error: {}", what))
}

impl Decoder for LdapCodec {
    type Item = (RequestId, ProtocolOp, Vec<Control>);
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        let mut parser = Parser::new();
        let (rest_len, tag) = match parser.parse(buf) {
            Err(e) if e.is_incomplete() => return Ok(None),
            Err(_) => return Err(decoding_error("framing")),
            Ok((rest, tag)) => (rest.len(), tag),
        };
        let consumed = buf.len() - rest_len;
        buf.advance(consumed);
        let parts = tag
            .match_class(TagClass::Universal)
            .and_then(|t| t.match_id(Universal::Sequence as u64))
            .and_then(|t| t.expect_constructed())
            .ok_or_else(|| decoding_error("envelope"))?;
        let mut iter = parts.into_iter();
        let msgid_content = iter
            .next()
            .and_then(|t| t.match_class(TagClass::Universal))
            .and_then(|t| t.match_id(Universal::Integer as u64))
            .and_then(|t| t.expect_primitive())
            .ok_or_else(|| decoding_error("message id"))?;
        let (_, msgid) =
            parse_int(&msgid_content).map_err(|_| decoding_error("message id"))?;
        let op_tag = iter.next().ok_or_else(|| decoding_error("operation"))?;
        let mut controls = vec![];
        for extra in iter {
            if extra.class == TagClass::Context && extra.id == 0 && extra.is_constructed() {
                controls = parse_controls(extra).ok_or_else(|| decoding_error("controls"))?;
            } else if extra.class == TagClass::Context && extra.id == 10 {
                // Active Directory encodes the Notice of Disconnection OID
                // outside the ExtendedResponse sequence, where the optional
                // controls belong. Skip the stray element.
            } else {
                return Err(decoding_error("envelope trailer"));
            }
        }
        let op = ProtocolOp::from_tag(op_tag)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("{}", e)))?;
        Ok(Some((msgid as RequestId, op, controls)))
    }
}

impl Encoder<(RequestId, ProtocolOp, MaybeControls)> for LdapCodec {
    type Error = io::Error;

    fn encode(
        &mut self,
        msg: (RequestId, ProtocolOp, MaybeControls),
        into: &mut BytesMut,
    ) -> io::Result<()> {
        let (id, op, controls) = msg;
        let mut envelope = vec![int_tag(id as i64), op.into_tag()];
        if let Some(controls) = controls {
            envelope.push(Tag::StructureTag(StructureTag {
                id: 0,
                class: TagClass::Context,
                payload: Payload::Constructed(controls.into_iter().map(build_tag).collect()),
            }));
        }
        let outstruct = Tag::Sequence(Sequence {
            inner: envelope,
            ..Default::default()
        })
        .into_structure();
        write::encode_into(into, outstruct)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::filter;

    fn roundtrip(op: ProtocolOp) {
        let mut codec = LdapCodec;
        let mut buf = BytesMut::new();
        codec.encode((7, op.clone(), None), &mut buf).unwrap();
        let (id, decoded, ctrls) = codec.decode(&mut buf).unwrap().expect("one message");
        assert!(buf.is_empty());
        assert_eq!(id, 7);
        assert!(ctrls.is_empty());
        assert_eq!(decoded, op);
    }

    fn sample_result() -> OpResult {
        OpResult {
            rc: ResultCode::Success,
            matched: String::new(),
            text: String::new(),
            refs: vec![],
        }
    }

    #[test]
    fn roundtrip_bind() {
        roundtrip(ProtocolOp::BindRequest {
            version: 3,
            dn: "cn=admin,dc=example,dc=org".into(),
            auth: AuthChoice::Simple(b"secret".to_vec()),
        });
        roundtrip(ProtocolOp::BindRequest {
            version: 3,
            dn: String::new(),
            auth: AuthChoice::Sasl {
                mech: "EXTERNAL".into(),
                creds: Some(vec![]),
            },
        });
        roundtrip(ProtocolOp::BindResponse {
            res: sample_result(),
            sasl_creds: Some(b"challenge".to_vec()),
        });
    }

    #[test]
    fn roundtrip_search() {
        roundtrip(ProtocolOp::SearchRequest(SearchRequest {
            base: "dc=example,dc=org".into(),
            scope: Scope::Subtree,
            deref: DerefAliases::Never,
            sizelimit: 0,
            timelimit: 0,
            typesonly: false,
            filter: filter::parse("(objectClass=posixAccount)").unwrap(),
            attrs: vec!["uid".into()],
        }));
        roundtrip(ProtocolOp::SearchResultEntry {
            dn: "uid=jdoe,dc=example,dc=org".into(),
            attrs: vec![PartialAttribute {
                atype: "uid".into(),
                vals: vec![b"jdoe".to_vec()],
            }],
        });
        roundtrip(ProtocolOp::SearchResultReference(vec![
            "ldap://other.example.org/dc=example,dc=org".into(),
        ]));
        roundtrip(ProtocolOp::SearchResultDone(OpResult {
            rc: ResultCode::NoSuchObject,
            matched: "dc=org".into(),
            text: "no such object".into(),
            refs: vec![],
        }));
    }

    #[test]
    fn roundtrip_updates() {
        roundtrip(ProtocolOp::ModifyRequest {
            dn: "cn=foo,dc=example,dc=org".into(),
            mods: vec![
                ModSpec {
                    op: ModOp::Add,
                    attr: "description".into(),
                    values: vec![b"b".to_vec()],
                },
                ModSpec {
                    op: ModOp::Delete,
                    attr: "seeAlso".into(),
                    values: vec![],
                },
                ModSpec {
                    op: ModOp::Replace,
                    attr: "mail".into(),
                    values: vec![b"a@b".to_vec(), b"c@d".to_vec()],
                },
            ],
        });
        roundtrip(ProtocolOp::AddRequest {
            dn: "cn=new,dc=example,dc=org".into(),
            attrs: vec![PartialAttribute {
                atype: "objectClass".into(),
                vals: vec![b"top".to_vec(), b"person".to_vec()],
            }],
        });
        roundtrip(ProtocolOp::DelRequest("cn=gone,dc=example,dc=org".into()));
        roundtrip(ProtocolOp::ModDnRequest {
            dn: "cn=a,dc=example,dc=org".into(),
            rdn: "cn=b".into(),
            delete_old: true,
            new_sup: Some("ou=elsewhere,dc=example,dc=org".into()),
        });
        roundtrip(ProtocolOp::CompareRequest {
            dn: "cn=a,dc=example,dc=org".into(),
            attr: "cn".into(),
            value: b"a".to_vec(),
        });
        for resp in [
            ProtocolOp::ModifyResponse(sample_result()),
            ProtocolOp::AddResponse(sample_result()),
            ProtocolOp::DelResponse(sample_result()),
            ProtocolOp::ModDnResponse(sample_result()),
            ProtocolOp::CompareResponse(OpResult {
                rc: ResultCode::CompareTrue,
                ..sample_result()
            }),
        ] {
            roundtrip(resp);
        }
    }

    #[test]
    fn roundtrip_misc() {
        roundtrip(ProtocolOp::UnbindRequest);
        roundtrip(ProtocolOp::AbandonRequest(42));
        roundtrip(ProtocolOp::ExtendedRequest(Exop {
            name: Some(crate::exop::WHOAMI_OID.into()),
            val: None,
        }));
        roundtrip(ProtocolOp::ExtendedResponse {
            res: sample_result(),
            exop: Exop {
                name: Some(crate::exop::DISCONNECTION_OID.into()),
                val: Some(vec![1, 2]),
            },
        });
        roundtrip(ProtocolOp::IntermediateResponse(Exop {
            name: Some("1.2.3.4".into()),
            val: Some(vec![9]),
        }));
    }

    #[test]
    fn result_with_referral() {
        roundtrip(ProtocolOp::SearchResultDone(OpResult {
            rc: ResultCode::Referral,
            matched: String::new(),
            text: String::new(),
            refs: vec!["ldap://a.example.org/".into(), "ldap://b.example.org/".into()],
        }));
    }

    #[test]
    fn controls_on_envelope() {
        use crate::controls::{ManageDsaIt, MakeCritical};
        let mut codec = LdapCodec;
        let mut buf = BytesMut::new();
        let ctrls: Vec<RawControl> = vec![ManageDsaIt.critical().into()];
        codec
            .encode(
                (3, ProtocolOp::DelRequest("cn=x".into()), Some(ctrls)),
                &mut buf,
            )
            .unwrap();
        let (_, _, decoded_ctrls) = codec.decode(&mut buf).unwrap().expect("message");
        assert_eq!(decoded_ctrls.len(), 1);
        assert!(decoded_ctrls[0].1.crit);
    }

    #[test]
    fn partial_input_needs_more() {
        let mut codec = LdapCodec;
        let mut buf = BytesMut::new();
        codec
            .encode((1, ProtocolOp::DelRequest("cn=x,dc=example".into()), None), &mut buf)
            .unwrap();
        let full = buf.clone();
        let mut partial = BytesMut::from(&full[..5]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&full[5..]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }
}
