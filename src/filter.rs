//! Search filter parsing, rendering, and wire encoding.
//!
//! Filters exist in three concrete syntaxes:
//!
//! * __standard__: the RFC 4515 parenthesised prefix form,
//!   `(&(objectClass=person)(!(uid=root)))`;
//! * __simple__: an infix form with uppercase `AND`/`OR`/`NOT` connectives
//!   over parenthesised atomic items, `(uid=jdoe) AND NOT (loginShell=*)`,
//!   where `NOT` binds tightest, then `AND`, then `OR`, and parentheses
//!   may group subexpressions;
//! * __unified__ (the default): at every subexpression position, either
//!   form is accepted; a leading `(` followed by `&`, `|` or `!` selects
//!   the standard form.
//!
//! All three produce the same [`Filter`] tree. `Display` renders the
//! canonical RFC 4515 form; parsing that rendering yields an equal tree.

use std::fmt;

use crate::result::{LdapError, Result};

use canopy_ber::structure::StructureTag;
use canopy_ber::tag::{TagClass, Universal};
use canopy_ber::types::{Boolean, ExplicitTag, OctetString, Sequence, Tag};

use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{digit1, multispace0};
use nom::character::{is_alphabetic, is_alphanumeric, is_hex_digit};
use nom::combinator::{map_res, recognize, verify};
use nom::multi::{fold_many0, many0};
use nom::number::complete::be_u8;
use nom::sequence::{delimited, preceded};

const AND_FILT: u64 = 0;
const OR_FILT: u64 = 1;
const NOT_FILT: u64 = 2;
const EQ_MATCH: u64 = 3;
const SUBSTR_MATCH: u64 = 4;
const GTE_MATCH: u64 = 5;
const LTE_MATCH: u64 = 6;
const PRES_MATCH: u64 = 7;
const APPROX_MATCH: u64 = 8;
const EXT_MATCH: u64 = 9;

const SUB_INITIAL: u64 = 0;
const SUB_ANY: u64 = 1;
const SUB_FINAL: u64 = 2;

const XM_RULE: u64 = 1;
const XM_TYPE: u64 = 2;
const XM_VALUE: u64 = 3;
const XM_DNATTRS: u64 = 4;

/// Which concrete filter syntax a parse call accepts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilterMode {
    /// RFC 4515 only.
    Standard,
    /// Infix `AND`/`OR`/`NOT` only.
    Simple,
    /// Either form at every subexpression position.
    #[default]
    Unified,
}

/// Components of a substring assertion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Substrings {
    pub initial: Option<Vec<u8>>,
    pub any: Vec<Vec<u8>>,
    pub fin: Option<Vec<u8>>,
}

/// Components of an extensible match assertion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensibleMatch {
    pub rule: Option<String>,
    pub attr: Option<String>,
    pub value: Vec<u8>,
    pub dn_attributes: bool,
}

/// Abstract filter tree. Assertion values are octet strings with all
/// textual escapes already resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equality(String, Vec<u8>),
    Substring(String, Substrings),
    GreaterOrEqual(String, Vec<u8>),
    LessOrEqual(String, Vec<u8>),
    Present(String),
    Approx(String, Vec<u8>),
    Extensible(ExtensibleMatch),
}

/// Parse a filter in the unified syntax.
pub fn parse(input: &str) -> Result<Filter> {
    parse_with(FilterMode::Unified, input)
}

/// Parse a filter in the given syntax.
pub fn parse_with(mode: FilterMode, input: &str) -> Result<Filter> {
    let bytes = input.as_bytes();
    let run = |res: IResult<&[u8], Filter>| -> Result<Filter> {
        match res {
            Ok((rest, f)) => {
                let rest = rest.trim_ascii();
                if rest.is_empty() {
                    Ok(f)
                } else {
                    Err(syntax_error(bytes, rest, "end of filter"))
                }
            }
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                Err(syntax_error(bytes, e.input, "filter component"))
            }
            Err(nom::Err::Incomplete(_)) => Err(LdapError::FilterSyntax {
                pos: bytes.len(),
                expected: "more input",
            }),
        }
    };
    match mode {
        FilterMode::Standard => run(alt((|i| std_filter(i, mode), item))(bytes)),
        FilterMode::Simple | FilterMode::Unified => {
            match run(infix_or(bytes, mode)) {
                Ok(f) => Ok(f),
                // a bare item is accepted when it is the whole expression
                Err(e) => run(item(bytes)).map_err(|_| e),
            }
        }
    }
}

fn syntax_error(input: &[u8], rest: &[u8], expected: &'static str) -> LdapError {
    LdapError::FilterSyntax {
        pos: input.len() - rest.len(),
        expected,
    }
}

// ---- standard (RFC 4515) syntax ----
//
// The `mode` argument controls how the children of a composite are
// parsed: in unified mode every child position again accepts either
// syntax.

fn std_filter(i: &[u8], mode: FilterMode) -> IResult<&[u8], Filter> {
    delimited(tag(b"("), |i| filtercomp(i, mode), tag(b")"))(i)
}

fn filtercomp(i: &[u8], mode: FilterMode) -> IResult<&[u8], Filter> {
    alt((
        |i| and(i, mode),
        |i| or(i, mode),
        |i| not(i, mode),
        item,
    ))(i)
}

fn child(i: &[u8], mode: FilterMode) -> IResult<&[u8], Filter> {
    match mode {
        FilterMode::Standard => std_filter(i, mode),
        _ => paren_expr(i, mode),
    }
}

fn and(i: &[u8], mode: FilterMode) -> IResult<&[u8], Filter> {
    let (i, _) = tag(b"&")(i)?;
    let (i, children) = many0(|i| child(i, mode))(i)?;
    Ok((i, Filter::And(children)))
}

fn or(i: &[u8], mode: FilterMode) -> IResult<&[u8], Filter> {
    let (i, _) = tag(b"|")(i)?;
    let (i, children) = many0(|i| child(i, mode))(i)?;
    Ok((i, Filter::Or(children)))
}

fn not(i: &[u8], mode: FilterMode) -> IResult<&[u8], Filter> {
    let (i, _) = tag(b"!")(i)?;
    let (i, inner) = child(i, mode)?;
    Ok((i, Filter::Not(Box::new(inner))))
}

// ---- simple (infix) syntax ----

fn infix_or(i: &[u8], mode: FilterMode) -> IResult<&[u8], Filter> {
    let (mut i, first) = infix_and(i, mode)?;
    let mut children = vec![first];
    loop {
        let Ok((rest, _)) = keyword(i, b"OR") else {
            break;
        };
        let (rest, next) = infix_and(rest, mode)?;
        i = rest;
        children.push(next);
    }
    if children.len() == 1 {
        Ok((i, children.pop().expect("single child")))
    } else {
        Ok((i, Filter::Or(children)))
    }
}

fn infix_and(i: &[u8], mode: FilterMode) -> IResult<&[u8], Filter> {
    let (mut i, first) = infix_not(i, mode)?;
    let mut children = vec![first];
    loop {
        let Ok((rest, _)) = keyword(i, b"AND") else {
            break;
        };
        let (rest, next) = infix_not(rest, mode)?;
        i = rest;
        children.push(next);
    }
    if children.len() == 1 {
        Ok((i, children.pop().expect("single child")))
    } else {
        Ok((i, Filter::And(children)))
    }
}

fn infix_not(i: &[u8], mode: FilterMode) -> IResult<&[u8], Filter> {
    if let Ok((rest, _)) = keyword(i, b"NOT") {
        let (rest, inner) = infix_not(rest, mode)?;
        return Ok((rest, Filter::Not(Box::new(inner))));
    }
    let (i, _) = multispace0(i)?;
    paren_expr(i, mode)
}

fn keyword<'a>(i: &'a [u8], kw: &'static [u8]) -> IResult<&'a [u8], ()> {
    let (i, _) = multispace0(i)?;
    let (i, _) = tag(kw)(i)?;
    // connectives must not run into an attribute name
    if let Some(&c) = i.first() {
        if is_alphanumeric(c) {
            return Err(nom::Err::Error(nom::error::Error::new(
                i,
                nom::error::ErrorKind::Tag,
            )));
        }
    }
    Ok((i, ()))
}

/// A parenthesised subexpression in the infix or unified grammar: a
/// standard composite (unified only), an atomic item, or a grouped infix
/// expression.
fn paren_expr(i: &[u8], mode: FilterMode) -> IResult<&[u8], Filter> {
    if mode == FilterMode::Unified && i.len() >= 2 && i[0] == b'(' {
        if matches!(i[1], b'&' | b'|' | b'!') {
            return std_filter(i, mode);
        }
    }
    if let Ok(res) = delimited(tag(b"("), item, tag(b")"))(i) {
        return Ok(res);
    }
    delimited(
        tag(b"("),
        delimited(multispace0, |i| infix_or(i, mode), multispace0),
        tag(b")"),
    )(i)
}

// ---- atomic items, shared by all syntaxes ----

fn item(i: &[u8]) -> IResult<&[u8], Filter> {
    alt((eq, non_eq, extensible))(i)
}

pub(crate) enum Unescaper {
    WantFirst,
    WantSecond(u8),
    Value(u8),
    Error,
}

impl Unescaper {
    pub(crate) fn feed(&self, c: u8) -> Unescaper {
        fn hex_val(c: u8) -> u8 {
            c - if c <= b'9' { b'0' } else { (c & 0x20) + b'A' - 10 }
        }
        match *self {
            Unescaper::Error => Unescaper::Error,
            Unescaper::WantFirst => {
                if is_hex_digit(c) {
                    Unescaper::WantSecond(hex_val(c))
                } else {
                    Unescaper::Error
                }
            }
            Unescaper::WantSecond(hi) => {
                if is_hex_digit(c) {
                    Unescaper::Value((hi << 4) + hex_val(c))
                } else {
                    Unescaper::Error
                }
            }
            Unescaper::Value(_) => {
                if c != b'\\' {
                    Unescaper::Value(c)
                } else {
                    Unescaper::WantFirst
                }
            }
        }
    }
}

// Any byte in the assertion value may be represented by \NN, where N is a
// hex digit. Parentheses, asterisk, backslash and NUL must be.
fn unescaped(i: &[u8]) -> IResult<&[u8], Vec<u8>> {
    map_res(
        fold_many0(
            verify(be_u8, is_value_char),
            || (Unescaper::Value(0), Vec::new()),
            |(u, mut vec): (Unescaper, Vec<_>), c: u8| {
                let u = u.feed(c);
                if let Unescaper::Value(c) = u {
                    vec.push(c);
                }
                (u, vec)
            },
        ),
        |(u, vec): (Unescaper, Vec<_>)| -> std::result::Result<Vec<u8>, ()> {
            if let Unescaper::Value(_) = u {
                Ok(vec)
            } else {
                Err(())
            }
        },
    )(i)
}

fn is_value_char(&c: &u8) -> bool {
    c != 0 && c != b'(' && c != b')' && c != b'*'
}

fn non_eq(i: &[u8]) -> IResult<&[u8], Filter> {
    let (i, attr) = attributedescription(i)?;
    let (i, op) = alt((tag(b">="), tag(b"<="), tag(b"~=")))(i)?;
    let (i, value) = unescaped(i)?;
    let attr = String::from_utf8_lossy(attr).into_owned();
    let filter = match op {
        b">=" => Filter::GreaterOrEqual(attr, value),
        b"<=" => Filter::LessOrEqual(attr, value),
        b"~=" => Filter::Approx(attr, value),
        _ => unreachable!(),
    };
    Ok((i, filter))
}

fn eq(i: &[u8]) -> IResult<&[u8], Filter> {
    let (i, attr) = attributedescription(i)?;
    let (i, _) = tag(b"=")(i)?;
    let (i, initial) = unescaped(i)?;
    let (i, mid_final) = map_res(
        many0(preceded(tag(b"*"), unescaped)),
        |v: Vec<Vec<u8>>| -> std::result::Result<Vec<Vec<u8>>, ()> {
            // only the last segment may be empty (trailing asterisk)
            if v.iter()
                .enumerate()
                .any(|(n, seg)| seg.is_empty() && n + 1 != v.len())
            {
                Err(())
            } else {
                Ok(v)
            }
        },
    )(i)?;
    let attr = String::from_utf8_lossy(attr).into_owned();
    let filter = if mid_final.is_empty() {
        // no asterisks in the assertion value
        Filter::Equality(attr, initial)
    } else if initial.is_empty() && mid_final.len() == 1 && mid_final[0].is_empty() {
        // single asterisk
        Filter::Present(attr)
    } else {
        let n = mid_final.len();
        let mut subs = Substrings {
            initial: (!initial.is_empty()).then_some(initial),
            any: Vec::new(),
            fin: None,
        };
        for (ix, seg) in mid_final.into_iter().enumerate() {
            if seg.is_empty() {
                break;
            }
            if ix + 1 != n {
                subs.any.push(seg);
            } else {
                subs.fin = Some(seg);
            }
        }
        Filter::Substring(attr, subs)
    };
    Ok((i, filter))
}

fn extensible(i: &[u8]) -> IResult<&[u8], Filter> {
    alt((attr_dn_mrule, dn_mrule))(i)
}

fn attr_dn_mrule(i: &[u8]) -> IResult<&[u8], Filter> {
    let (i, attr) = attributedescription(i)?;
    let (i, dn) = nom::combinator::opt(tag(b":dn"))(i)?;
    let (i, rule) = nom::combinator::opt(preceded(tag(b":"), attributetype))(i)?;
    let (i, _) = tag(b":=")(i)?;
    let (i, value) = unescaped(i)?;
    Ok((
        i,
        Filter::Extensible(ExtensibleMatch {
            rule: rule.map(|r| String::from_utf8_lossy(r).into_owned()),
            attr: Some(String::from_utf8_lossy(attr).into_owned()),
            value,
            dn_attributes: dn.is_some(),
        }),
    ))
}

fn dn_mrule(i: &[u8]) -> IResult<&[u8], Filter> {
    let (i, dn) = nom::combinator::opt(tag(b":dn"))(i)?;
    let (i, rule) = preceded(tag(b":"), attributetype)(i)?;
    let (i, _) = tag(b":=")(i)?;
    let (i, value) = unescaped(i)?;
    Ok((
        i,
        Filter::Extensible(ExtensibleMatch {
            rule: Some(String::from_utf8_lossy(rule).into_owned()),
            attr: None,
            value,
            dn_attributes: dn.is_some(),
        }),
    ))
}

fn attributedescription(i: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(|i| -> IResult<&[u8], ()> {
        let (i, _) = attributetype(i)?;
        let (i, _) = many0(preceded(tag(b";"), take_while1(is_alnum_hyphen)))(i)?;
        Ok((i, ()))
    })(i)
}

fn is_alnum_hyphen(c: u8) -> bool {
    is_alphanumeric(c) || c == b'-'
}

fn attributetype(i: &[u8]) -> IResult<&[u8], &[u8]> {
    alt((numericoid, descr))(i)
}

fn numericoid(i: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(|i| -> IResult<&[u8], ()> {
        let (i, _) = number(i)?;
        let (i, _) = many0(preceded(tag(b"."), number))(i)?;
        Ok((i, ()))
    })(i)
}

// A number may be zero, but must not have superfluous leading zeroes
fn number(i: &[u8]) -> IResult<&[u8], &[u8]> {
    verify(digit1, |d: &[u8]| d.len() == 1 || d[0] != b'0')(i)
}

fn descr(i: &[u8]) -> IResult<&[u8], &[u8]> {
    recognize(|i| -> IResult<&[u8], ()> {
        let (i, _) = verify(be_u8, |c| is_alphabetic(*c))(i)?;
        let (i, _) = take_while(is_alnum_hyphen)(i)?;
        Ok((i, ()))
    })(i)
}

// ---- canonical rendering ----

fn write_value(f: &mut fmt::Formatter, value: &[u8]) -> fmt::Result {
    fn needs_escape(c: char) -> bool {
        matches!(c, '\0' | '(' | ')' | '*' | '\\') || (c as u32) < 0x20
    }

    match std::str::from_utf8(value) {
        Ok(text) => {
            for c in text.chars() {
                if needs_escape(c) {
                    let mut buf = [0u8; 4];
                    for b in c.encode_utf8(&mut buf).as_bytes() {
                        write!(f, "\\{:02x}", b)?;
                    }
                } else {
                    write!(f, "{}", c)?;
                }
            }
        }
        Err(_) => {
            // not text; keep printable ASCII readable, escape the rest
            for &b in value {
                if b.is_ascii_graphic() && !needs_escape(b as char) || b == b' ' {
                    write!(f, "{}", b as char)?;
                } else {
                    write!(f, "\\{:02x}", b)?;
                }
            }
        }
    }
    Ok(())
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Filter::And(children) => {
                write!(f, "(&")?;
                for c in children {
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            Filter::Or(children) => {
                write!(f, "(|")?;
                for c in children {
                    write!(f, "{}", c)?;
                }
                write!(f, ")")
            }
            Filter::Not(inner) => write!(f, "(!{})", inner),
            Filter::Equality(attr, value) => {
                write!(f, "({}=", attr)?;
                write_value(f, value)?;
                write!(f, ")")
            }
            Filter::Substring(attr, subs) => {
                write!(f, "({}=", attr)?;
                if let Some(ref initial) = subs.initial {
                    write_value(f, initial)?;
                }
                write!(f, "*")?;
                for seg in &subs.any {
                    write_value(f, seg)?;
                    write!(f, "*")?;
                }
                if let Some(ref fin) = subs.fin {
                    write_value(f, fin)?;
                }
                write!(f, ")")
            }
            Filter::GreaterOrEqual(attr, value) => {
                write!(f, "({}>=", attr)?;
                write_value(f, value)?;
                write!(f, ")")
            }
            Filter::LessOrEqual(attr, value) => {
                write!(f, "({}<=", attr)?;
                write_value(f, value)?;
                write!(f, ")")
            }
            Filter::Present(attr) => write!(f, "({}=*)", attr),
            Filter::Approx(attr, value) => {
                write!(f, "({}~=", attr)?;
                write_value(f, value)?;
                write!(f, ")")
            }
            Filter::Extensible(xm) => {
                write!(f, "(")?;
                if let Some(ref attr) = xm.attr {
                    write!(f, "{}", attr)?;
                }
                if xm.dn_attributes {
                    write!(f, ":dn")?;
                }
                if let Some(ref rule) = xm.rule {
                    write!(f, ":{}", rule)?;
                }
                write!(f, ":=")?;
                write_value(f, &xm.value)?;
                write!(f, ")")
            }
        }
    }
}

// ---- wire encoding ----

fn octets(inner: Vec<u8>) -> Tag {
    Tag::OctetString(OctetString {
        inner,
        ..Default::default()
    })
}

fn ctx_octets(id: u64, inner: Vec<u8>) -> Tag {
    Tag::OctetString(OctetString {
        id,
        class: TagClass::Context,
        inner,
    })
}

impl Filter {
    /// Lower the filter into the implicitly tagged BER choice used by
    /// SearchRequest.
    pub fn to_tag(&self) -> Tag {
        match self {
            Filter::And(children) => Tag::Sequence(Sequence {
                class: TagClass::Context,
                id: AND_FILT,
                inner: children.iter().map(Filter::to_tag).collect(),
            }),
            Filter::Or(children) => Tag::Sequence(Sequence {
                class: TagClass::Context,
                id: OR_FILT,
                inner: children.iter().map(Filter::to_tag).collect(),
            }),
            Filter::Not(inner) => Tag::ExplicitTag(ExplicitTag {
                class: TagClass::Context,
                id: NOT_FILT,
                inner: Box::new(inner.to_tag()),
            }),
            Filter::Equality(attr, value) => ava_tag(EQ_MATCH, attr, value),
            Filter::GreaterOrEqual(attr, value) => ava_tag(GTE_MATCH, attr, value),
            Filter::LessOrEqual(attr, value) => ava_tag(LTE_MATCH, attr, value),
            Filter::Approx(attr, value) => ava_tag(APPROX_MATCH, attr, value),
            Filter::Present(attr) => Tag::OctetString(OctetString {
                class: TagClass::Context,
                id: PRES_MATCH,
                inner: attr.as_bytes().to_vec(),
            }),
            Filter::Substring(attr, subs) => {
                let mut segs = vec![];
                if let Some(ref initial) = subs.initial {
                    segs.push(ctx_octets(SUB_INITIAL, initial.clone()));
                }
                for seg in &subs.any {
                    segs.push(ctx_octets(SUB_ANY, seg.clone()));
                }
                if let Some(ref fin) = subs.fin {
                    segs.push(ctx_octets(SUB_FINAL, fin.clone()));
                }
                Tag::Sequence(Sequence {
                    class: TagClass::Context,
                    id: SUBSTR_MATCH,
                    inner: vec![
                        octets(attr.as_bytes().to_vec()),
                        Tag::Sequence(Sequence {
                            inner: segs,
                            ..Default::default()
                        }),
                    ],
                })
            }
            Filter::Extensible(xm) => {
                let mut inner = vec![];
                if let Some(ref rule) = xm.rule {
                    inner.push(ctx_octets(XM_RULE, rule.as_bytes().to_vec()));
                }
                if let Some(ref attr) = xm.attr {
                    inner.push(ctx_octets(XM_TYPE, attr.as_bytes().to_vec()));
                }
                inner.push(ctx_octets(XM_VALUE, xm.value.clone()));
                if xm.dn_attributes {
                    inner.push(Tag::Boolean(Boolean {
                        class: TagClass::Context,
                        id: XM_DNATTRS,
                        inner: true,
                    }));
                }
                Tag::Sequence(Sequence {
                    class: TagClass::Context,
                    id: EXT_MATCH,
                    inner,
                })
            }
        }
    }

    /// Rebuild a filter from its wire form.
    pub fn from_tag(t: StructureTag) -> Result<Filter> {
        let malformed = || LdapError::Protocol("malformed filter".into());
        if t.class != TagClass::Context {
            return Err(malformed());
        }
        let filter = match t.id {
            AND_FILT | OR_FILT => {
                let id = t.id;
                let children = t
                    .expect_constructed()
                    .ok_or_else(malformed)?
                    .into_iter()
                    .map(Filter::from_tag)
                    .collect::<Result<Vec<_>>>()?;
                if id == AND_FILT {
                    Filter::And(children)
                } else {
                    Filter::Or(children)
                }
            }
            NOT_FILT => {
                let mut inner = t.expect_constructed().ok_or_else(malformed)?;
                if inner.len() != 1 {
                    return Err(malformed());
                }
                Filter::Not(Box::new(Filter::from_tag(
                    inner.pop().expect("inner filter"),
                )?))
            }
            EQ_MATCH | GTE_MATCH | LTE_MATCH | APPROX_MATCH => {
                let id = t.id;
                let (attr, value) = parse_ava(t).ok_or_else(malformed)?;
                match id {
                    EQ_MATCH => Filter::Equality(attr, value),
                    GTE_MATCH => Filter::GreaterOrEqual(attr, value),
                    LTE_MATCH => Filter::LessOrEqual(attr, value),
                    _ => Filter::Approx(attr, value),
                }
            }
            PRES_MATCH => {
                let attr = t.expect_primitive().ok_or_else(malformed)?;
                Filter::Present(String::from_utf8(attr).map_err(|_| malformed())?)
            }
            SUBSTR_MATCH => {
                let mut parts = t.expect_constructed().ok_or_else(malformed)?.into_iter();
                let attr = parts
                    .next()
                    .and_then(|t| t.expect_primitive())
                    .ok_or_else(malformed)?;
                let segs = parts
                    .next()
                    .and_then(|t| t.expect_constructed())
                    .ok_or_else(malformed)?;
                let mut subs = Substrings {
                    initial: None,
                    any: vec![],
                    fin: None,
                };
                for seg in segs {
                    let id = seg.id;
                    let content = seg.expect_primitive().ok_or_else(malformed)?;
                    match id {
                        SUB_INITIAL => subs.initial = Some(content),
                        SUB_ANY => subs.any.push(content),
                        SUB_FINAL => subs.fin = Some(content),
                        _ => return Err(malformed()),
                    }
                }
                Filter::Substring(String::from_utf8(attr).map_err(|_| malformed())?, subs)
            }
            EXT_MATCH => {
                let mut xm = ExtensibleMatch {
                    rule: None,
                    attr: None,
                    value: vec![],
                    dn_attributes: false,
                };
                for part in t.expect_constructed().ok_or_else(malformed)? {
                    let id = part.id;
                    match id {
                        XM_RULE | XM_TYPE => {
                            let s = String::from_utf8(
                                part.expect_primitive().ok_or_else(malformed)?,
                            )
                            .map_err(|_| malformed())?;
                            if id == XM_RULE {
                                xm.rule = Some(s);
                            } else {
                                xm.attr = Some(s);
                            }
                        }
                        XM_VALUE => xm.value = part.expect_primitive().ok_or_else(malformed)?,
                        XM_DNATTRS => {
                            let content = part.expect_primitive().ok_or_else(malformed)?;
                            let (_, b) = canopy_ber::parse::parse_bool(&content)
                                .map_err(|_| malformed())?;
                            xm.dn_attributes = b;
                        }
                        _ => return Err(malformed()),
                    }
                }
                Filter::Extensible(xm)
            }
            _ => return Err(malformed()),
        };
        Ok(filter)
    }
}

fn ava_tag(id: u64, attr: &str, value: &[u8]) -> Tag {
    Tag::Sequence(Sequence {
        class: TagClass::Context,
        id,
        inner: vec![octets(attr.as_bytes().to_vec()), octets(value.to_vec())],
    })
}

fn parse_ava(t: StructureTag) -> Option<(String, Vec<u8>)> {
    let mut parts = t.expect_constructed()?.into_iter();
    let attr = parts
        .next()?
        .match_class(TagClass::Universal)
        .and_then(|t| t.match_id(Universal::OctetString as u64))
        .and_then(|t| t.expect_primitive())?;
    let value = parts.next()?.expect_primitive()?;
    String::from_utf8(attr).ok().map(|attr| (attr, value))
}

#[cfg(test)]
mod test {
    use super::*;
    use canopy_ber::types::AsnTag;

    fn ber_vec_eq(filter: &str, ber: &[u8]) {
        use bytes::BytesMut;
        use canopy_ber::write;

        let mut buf = BytesMut::new();
        let parsed = parse_with(FilterMode::Standard, filter).unwrap();
        write::encode_into(&mut buf, parsed.to_tag().into_structure()).unwrap();
        assert_eq!(buf, ber);
    }

    #[test]
    fn filt_bare_item() {
        ber_vec_eq("a=v", b"\xa3\x06\x04\x01a\x04\x01v");
    }

    #[test]
    fn filt_simple_eq() {
        ber_vec_eq("(a=v)", b"\xa3\x06\x04\x01a\x04\x01v");
    }

    #[test]
    fn filt_extra_garbage() {
        assert!(parse_with(FilterMode::Standard, "(a=v)garbage").is_err());
    }

    #[test]
    fn filt_simple_noneq() {
        ber_vec_eq("(a<=2)", b"\xa6\x06\x04\x01a\x04\x012");
    }

    #[test]
    fn filt_pres() {
        ber_vec_eq("(a=*)", b"\x87\x01a");
    }

    #[test]
    fn filt_ast_ini() {
        ber_vec_eq("(a=*v)", b"\xa4\x08\x04\x01a0\x03\x82\x01v");
    }

    #[test]
    fn filt_ast_fin() {
        ber_vec_eq("(a=v*)", b"\xa4\x08\x04\x01a0\x03\x80\x01v");
    }

    #[test]
    fn filt_ast_multi() {
        ber_vec_eq(
            "(a=v*x*y)",
            b"\xa4\x0e\x04\x01a0\t\x80\x01v\x81\x01x\x82\x01y",
        );
    }

    #[test]
    fn filt_ast_double() {
        assert!(parse_with(FilterMode::Standard, "(a=f**)").is_err());
    }

    #[test]
    fn filt_esc_ok() {
        ber_vec_eq("(a=v\\2ax)", b"\xa3\x08\x04\x01a\x04\x03v*x");
    }

    #[test]
    fn filt_esc_runt() {
        assert!(parse_with(FilterMode::Standard, "(a=v\\2)").is_err());
    }

    #[test]
    fn filt_esc_invalid() {
        assert!(parse_with(FilterMode::Standard, "(a=v\\0x)").is_err());
    }

    #[test]
    fn filt_oid() {
        ber_vec_eq("(2.5.4.3=v)", b"\xa3\x0c\x04\x072.5.4.3\x04\x01v");
    }

    #[test]
    fn filt_oidl0() {
        assert!(parse_with(FilterMode::Standard, "(2.5.04.0=top)").is_err());
    }

    #[test]
    fn filt_complex() {
        ber_vec_eq(
            "(&(a=v)(b=x)(!(c=y)))",
            b"\xa0\x1a\xa3\x06\x04\x01a\x04\x01v\xa3\x06\x04\x01b\x04\x01x\xa2\x08\xa3\x06\x04\x01c\x04\x01y",
        );
    }

    #[test]
    fn filt_abs_true() {
        ber_vec_eq("(&)", b"\xa0\0");
    }

    #[test]
    fn filt_abs_false() {
        ber_vec_eq("(|)", b"\xa1\0");
    }

    #[test]
    fn filt_ext_dn() {
        ber_vec_eq(
            "(ou:dn:=People)",
            b"\xa9\x0f\x82\x02ou\x83\x06People\x84\x01\xff",
        );
    }

    #[test]
    fn filt_ext_mrule() {
        ber_vec_eq(
            "(cn:2.5.13.5:=J D)",
            b"\xa9\x13\x81\x082.5.13.5\x82\x02cn\x83\x03J D",
        );
    }

    #[test]
    fn filt_simple_utf8() {
        ber_vec_eq("(a=ć)", b"\xa3\x07\x04\x01a\x04\x02\xc4\x87");
    }

    #[test]
    fn canonical_roundtrip() {
        for s in [
            "(&(objectClass=person)(!(uid=root)))",
            "(|(cn=a*b*c)(sn<=x)(givenName~=y))",
            "(memberUid=*)",
            "(cn:2.5.13.5:=J D)",
            "(a=v\\2ax)",
        ] {
            let f = parse_with(FilterMode::Standard, s).unwrap();
            assert_eq!(f.to_string(), *s);
            assert_eq!(parse_with(FilterMode::Standard, &f.to_string()).unwrap(), f);
        }
    }

    #[test]
    fn simple_infix() {
        let f = parse_with(FilterMode::Simple, "(a=1) AND (b=2)").unwrap();
        assert_eq!(f.to_string(), "(&(a=1)(b=2))");
    }

    #[test]
    fn simple_precedence() {
        // NOT binds tightest, then AND, then OR
        let f = parse_with(FilterMode::Simple, "(a=1) OR (b=2) AND NOT (c=3)").unwrap();
        assert_eq!(f.to_string(), "(|(a=1)(&(b=2)(!(c=3))))");
    }

    #[test]
    fn simple_grouping() {
        let f = parse_with(FilterMode::Simple, "((a=1) OR (b=2)) AND (c=3)").unwrap();
        assert_eq!(f.to_string(), "(&(|(a=1)(b=2))(c=3))");
    }

    #[test]
    fn unified_mixes_forms() {
        let f = parse("(gidNumber<=1000) AND NOT (memberUid=*)").unwrap();
        assert_eq!(f.to_string(), "(&(gidNumber<=1000)(!(memberUid=*)))");
        let reparsed = parse(&f.to_string()).unwrap();
        assert_eq!(reparsed, f);
    }

    #[test]
    fn unified_matches_standard_on_rfc_input() {
        for s in ["(&(a=v)(b=x))", "(a=v)", "(!(uid=root))"] {
            assert_eq!(
                parse(s).unwrap(),
                parse_with(FilterMode::Standard, s).unwrap()
            );
        }
    }

    #[test]
    fn unified_matches_simple_on_infix_input() {
        for s in ["(a=1) AND (b=2)", "NOT (c=3)", "(a=1) OR NOT (b=2) AND (c=3)"] {
            assert_eq!(
                parse(s).unwrap(),
                parse_with(FilterMode::Simple, s).unwrap()
            );
        }
    }

    #[test]
    fn standard_rejects_infix() {
        assert!(parse_with(FilterMode::Standard, "(a=1) AND (b=2)").is_err());
    }

    #[test]
    fn error_position() {
        match parse_with(FilterMode::Standard, "(a=v)junk") {
            Err(LdapError::FilterSyntax { pos, .. }) => assert_eq!(pos, 5),
            other => panic!("unexpected: {:?}", other.map(|f| f.to_string())),
        }
    }

    #[test]
    fn wire_roundtrip() {
        for s in [
            "(&(a=v)(b=x)(!(c=y)))",
            "(a=v*x*y)",
            "(memberUid=*)",
            "(ou:dn:=People)",
            "(gidNumber>=100)",
        ] {
            let f = parse_with(FilterMode::Standard, s).unwrap();
            let tag = f.to_tag().into_structure();
            assert_eq!(Filter::from_tag(tag).unwrap(), f);
        }
    }
}
