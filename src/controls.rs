//! Control construction and parsing.
//!
//! A control can be associated with a request or a response. A request
//! control is attached by passing it to
//! [`with_controls()`](../struct.Ldap.html#method.with_controls); a control
//! implemented outside this library must provide a conversion of itself
//! into [`RawControl`], the general form. Response controls come back as a
//! vector of [`Control`], where the first element is populated if the OID
//! is one the library recognizes; a recognized or third-party response
//! control is parsed by calling [`parse()`](struct.RawControl.html#method.parse)
//! on the raw control, which requires a [`ControlParser`] implementation.
//!
//! Criticality is carried on the control structure itself: wrap any
//! control with [`MakeCritical::critical()`] before attaching it.

use std::collections::HashMap;
use std::sync::LazyLock;

use bytes::BytesMut;

use canopy_ber::parse::{parse_bool, parse_int, parse_tag};
use canopy_ber::structure::{Payload, StructureTag};
use canopy_ber::tag::{TagClass, Universal};
use canopy_ber::types::{AsnTag, Boolean, Integer, OctetString, Sequence, Tag};
use canopy_ber::write;

/// Recognized control types.
///
/// The variants can't be exhaustively matched, since the list of
/// recognized and internally implemented controls can change from one
/// release to the next.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlType {
    PagedResults,
    ManageDsaIt,
}

pub const PAGED_RESULTS_OID: &str = "1.2.840.113556.1.4.319";
pub const MANAGE_DSA_IT_OID: &str = "2.16.840.1.113730.3.4.2";

static CONTROLS: LazyLock<HashMap<&'static str, ControlType>> = LazyLock::new(|| {
    HashMap::from([
        (PAGED_RESULTS_OID, ControlType::PagedResults),
        (MANAGE_DSA_IT_OID, ControlType::ManageDsaIt),
    ])
});

/// Conversion trait for single control instances.
///
/// Operations accept a vector of controls, as dictated by the LDAP
/// specification, but most call sites attach a single one. If a control
/// implements this trait, its lone instance may be passed directly and a
/// single-element vector is constructed internally.
pub trait IntoRawControlVec {
    /// Create a control vector.
    fn into(self) -> Vec<RawControl>;
}

/// Trivial implementation for a control vector, returning itself.
impl IntoRawControlVec for Vec<RawControl> {
    fn into(self) -> Vec<RawControl> {
        self
    }
}

/// Blanket implementation for any control. The vector is constructed by
/// the conversion method.
impl<R> IntoRawControlVec for R
where
    RawControl: From<R>,
{
    fn into(self) -> Vec<RawControl> {
        vec![std::convert::Into::into(self)]
    }
}

/// Mark a control as critical.
///
/// All controls are instantiated as non-critical by default, unless
/// dictated otherwise by their specification.
pub trait MakeCritical {
    /// Mark the control instance as critical. This operation consumes the
    /// control, and is irreversible.
    fn critical(self) -> CriticalControl<Self>
    where
        Self: Sized,
    {
        CriticalControl { control: self }
    }
}

/// Wrapper for a control marked as critical.
pub struct CriticalControl<T> {
    control: T,
}

impl<T> From<CriticalControl<T>> for RawControl
where
    T: Into<RawControl>,
{
    fn from(cc: CriticalControl<T>) -> RawControl {
        let mut rc = cc.control.into();
        rc.crit = true;
        rc
    }
}

/// Conversion trait for response controls.
pub trait ControlParser {
    /// Convert the raw BER value into a control-specific struct.
    fn parse(val: &[u8]) -> Self;
}

/// Response control: the parsed type, if recognized, alongside the raw form.
#[derive(Clone, Debug)]
pub struct Control(pub Option<ControlType>, pub RawControl);

/// Generic control, usable for both requests and responses.
#[derive(Clone, Debug)]
pub struct RawControl {
    /// OID of the control.
    pub ctype: String,
    /// Criticality; has no meaning on response.
    pub crit: bool,
    /// Raw value of the control, if any.
    pub val: Option<Vec<u8>>,
}

impl RawControl {
    /// Parse the generic control into a control-specific struct.
    ///
    /// The parser will panic if the control value is `None`. No control
    /// known to the author signals the lack of return value by omitting
    /// the control value, so this shouldn't arise in practice.
    pub fn parse<T: ControlParser>(&self) -> T {
        T::parse(self.val.as_ref().expect("value"))
    }
}

pub(crate) fn build_tag(rc: RawControl) -> StructureTag {
    let mut seq = vec![Tag::OctetString(OctetString {
        inner: Vec::from(rc.ctype.as_bytes()),
        ..Default::default()
    })];
    if rc.crit {
        seq.push(Tag::Boolean(Boolean {
            inner: true,
            ..Default::default()
        }));
    }
    if let Some(val) = rc.val {
        seq.push(Tag::OctetString(OctetString {
            inner: val,
            ..Default::default()
        }));
    }
    Tag::Sequence(Sequence {
        inner: seq,
        ..Default::default()
    })
    .into_structure()
}

pub(crate) fn parse_controls(t: StructureTag) -> Option<Vec<Control>> {
    let mut ctrls = Vec::new();
    for ctrl in t.expect_constructed()? {
        let mut components = ctrl.expect_constructed()?.into_iter();
        let ctype = String::from_utf8(components.next()?.expect_primitive()?).ok()?;
        let next = components.next();
        let (crit, maybe_val) = match next {
            None => (false, None),
            Some(c) => match c {
                StructureTag {
                    id, ref payload, ..
                } if id == Universal::Boolean as u64 => match *payload {
                    Payload::Primitive(ref v) => {
                        let (_, crit) = parse_bool(v).ok()?;
                        (crit, components.next())
                    }
                    Payload::Constructed(_) => return None,
                },
                StructureTag { id, .. } if id == Universal::OctetString as u64 => {
                    (false, Some(c))
                }
                _ => return None,
            },
        };
        let val = match maybe_val {
            Some(v) => Some(v.expect_primitive()?),
            None => None,
        };
        let known_type = CONTROLS.get(&*ctype).copied();
        ctrls.push(Control(known_type, RawControl { ctype, crit, val }));
    }
    Some(ctrls)
}

/// Paged Results control (RFC 2696).
///
/// The same structure serves as the request and the response control:
/// `size` is the requested page size on request and the result-set size
/// estimate on response; `cookie` is empty on the first request and
/// echoed back from the previous response afterwards.
#[derive(Clone, Debug, Default)]
pub struct PagedResults {
    pub size: i32,
    pub cookie: Vec<u8>,
}

impl MakeCritical for PagedResults {}

impl From<PagedResults> for RawControl {
    fn from(pr: PagedResults) -> RawControl {
        let value = Tag::Sequence(Sequence {
            inner: vec![
                Tag::Integer(Integer {
                    inner: pr.size as i64,
                    ..Default::default()
                }),
                Tag::OctetString(OctetString {
                    inner: pr.cookie,
                    ..Default::default()
                }),
            ],
            ..Default::default()
        });
        let mut buf = BytesMut::new();
        write::encode_into(&mut buf, value.into_structure()).expect("encoded control");
        RawControl {
            ctype: PAGED_RESULTS_OID.to_owned(),
            crit: false,
            val: Some(Vec::from(&buf[..])),
        }
    }
}

impl ControlParser for PagedResults {
    fn parse(val: &[u8]) -> PagedResults {
        let (_, tag) = parse_tag(val).expect("paged results control");
        let mut components = tag
            .expect_constructed()
            .expect("paged results sequence")
            .into_iter();
        let size = components
            .next()
            .and_then(|t| t.expect_primitive())
            .and_then(|v| parse_int(&v).ok().map(|(_, n)| n as i32))
            .expect("size");
        let cookie = components
            .next()
            .and_then(|t| t.expect_primitive())
            .expect("cookie");
        PagedResults { size, cookie }
    }
}

/// Manage DSA IT control (RFC 3296): treat referral objects as regular
/// entries. The control has no value.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManageDsaIt;

impl MakeCritical for ManageDsaIt {}

impl From<ManageDsaIt> for RawControl {
    fn from(_: ManageDsaIt) -> RawControl {
        RawControl {
            ctype: MANAGE_DSA_IT_OID.to_owned(),
            crit: false,
            val: None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn paged_results_roundtrip() {
        let rc: RawControl = RawControl::from(PagedResults {
            size: 50,
            cookie: vec![1, 2, 3],
        });
        assert_eq!(rc.ctype, PAGED_RESULTS_OID);
        assert!(!rc.crit);
        let parsed: PagedResults = rc.parse();
        assert_eq!(parsed.size, 50);
        assert_eq!(parsed.cookie, vec![1, 2, 3]);
    }

    #[test]
    fn criticality_wrapper() {
        let rc: RawControl = RawControl::from(ManageDsaIt.critical());
        assert!(rc.crit);
        assert!(rc.val.is_none());
    }

    #[test]
    fn wire_roundtrip() {
        let rc: RawControl = RawControl::from(
            PagedResults {
                size: 7,
                cookie: vec![],
            }
            .critical(),
        );
        let built = build_tag(rc);
        let wrapped = StructureTag {
            class: TagClass::Context,
            id: 0,
            payload: Payload::Constructed(vec![built]),
        };
        let ctrls = parse_controls(wrapped).expect("controls");
        assert_eq!(ctrls.len(), 1);
        let Control(ctype, ref raw) = ctrls[0];
        assert_eq!(ctype, Some(ControlType::PagedResults));
        assert!(raw.crit);
        let pr: PagedResults = raw.parse();
        assert_eq!(pr.size, 7);
    }
}
