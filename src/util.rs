//! String escaping helpers and LDAP URL parameters.

use std::borrow::Cow;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use crate::filter::Unescaper;
use crate::result::{LdapError, Result};
use crate::search::Scope;

use percent_encoding::percent_decode_str;
use url::Url;

#[inline]
fn xdigit(c: u8) -> u8 {
    c + if c < 10 { b'0' } else { b'a' - 10 }
}

/// Hex-escape the bytes selected by `pick`, allocating only when
/// something actually needs escaping.
fn escape_by<'a>(lit: Cow<'a, str>, pick: impl Fn(u8, usize, usize) -> bool) -> Cow<'a, str> {
    let mut output: Option<Vec<u8>> = None;
    for (i, &c) in lit.as_bytes().iter().enumerate() {
        if pick(c, i, lit.len()) {
            let output = output.get_or_insert_with(|| {
                let mut out = Vec::with_capacity(lit.len() + 12);
                out.extend(lit[..i].as_bytes());
                out
            });
            output.push(b'\\');
            output.push(xdigit(c >> 4));
            output.push(xdigit(c & 0xF));
        } else if let Some(ref mut output) = output {
            output.push(c);
        }
    }
    match output {
        Some(output) => Cow::Owned(String::from_utf8(output).expect("escaped string")),
        None => lit,
    }
}

/// Escape a filter literal.
///
/// Literal values appearing in an LDAP filter can contain any character,
/// but some characters (parentheses, asterisk, backslash, NUL) must be
/// escaped in the filter's string representation.
///
/// The argument can be owned or borrowed; the function doesn't allocate
/// the return value unless there's need to escape the input.
pub fn ldap_escape<'a, S: Into<Cow<'a, str>>>(lit: S) -> Cow<'a, str> {
    escape_by(lit.into(), |c, _, _| {
        matches!(c, b'\\' | b'*' | b'(' | b')' | 0)
    })
}

/// Escape an attribute value in a relative distinguished name (RDN).
///
/// When a literal string is used to represent an attribute value in an
/// RDN, some of its characters might need to be escaped according to the
/// rules of [RFC 4514](https://tools.ietf.org/html/rfc4514).
///
/// The function is named `dn_escape()` instead of `rdn_escape()` because
/// of a long-standing association of its intended use with the handling
/// of DNs.
pub fn dn_escape<'a, S: Into<Cow<'a, str>>>(val: S) -> Cow<'a, str> {
    escape_by(val.into(), |c, i, len| {
        matches!(
            c,
            b'"' | b'+' | b',' | b';' | b'<' | b'=' | b'>' | b'\\' | 0
        ) || (i == 0 && (c == b' ' || c == b'#'))
            || (i + 1 == len && c == b' ')
    })
}

/// Unescape a string using LDAP filter escapes.
///
/// If a string contains `\nn` hexadecimal escapes, return a string where
/// those escapes are turned back into the characters they represent. The
/// result must be a valid UTF-8 string.
pub fn ldap_unescape<'a, S: Into<Cow<'a, str>>>(val: S) -> Result<Cow<'a, str>> {
    let val = val.into();
    let mut output: Option<Vec<u8>> = None;
    let mut esc = Unescaper::Value(0);
    for (i, &c) in val.as_bytes().iter().enumerate() {
        esc = esc.feed(c);
        match esc {
            Unescaper::WantFirst => {
                if output.is_none() {
                    let mut out = Vec::with_capacity(val.len());
                    out.extend(val[..i].as_bytes());
                    output = Some(out);
                }
            }
            Unescaper::Value(c) => {
                if let Some(ref mut output) = output {
                    output.push(c);
                }
            }
            _ => (),
        }
    }
    match output {
        Some(output) => {
            if let Unescaper::Value(_) = esc {
                Ok(Cow::Owned(
                    String::from_utf8(output).map_err(|_| LdapError::DecodingUTF8)?,
                ))
            } else {
                Err(LdapError::DecodingUTF8)
            }
        }
        None => Ok(val),
    }
}

/// LDAP URL extensions.
///
/// Historically, very few extensions have been described in the LDAP
/// standards, and extension support is very library- and
/// application-specific. This crate recognizes two widely implemented
/// extensions (__bindname__ and __x-bindpw__) and the StartTLS marker.
#[derive(Clone, Debug)]
pub enum LdapUrlExt<'a> {
    /// __Bindname__, the DN for the Simple Bind operation. Originally
    /// specified in RFC 2256, but dropped from its successor, RFC 4516.
    Bindname(Cow<'a, str>),

    /// __X-bindpw__, the password for Simple Bind. Never standardized,
    /// and not recommended because of security implications.
    XBindpw(Cow<'a, str>),

    /// __1.3.6.1.4.1.1466.20037__, StartTLS. Has no value; signals to
    /// the application to use StartTLS when connecting.
    StartTLS,

    /// Unknown extension.
    Unknown(Cow<'a, str>),
}

impl<'a> PartialEq for LdapUrlExt<'a> {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (LdapUrlExt::Bindname(_), LdapUrlExt::Bindname(_))
                | (LdapUrlExt::XBindpw(_), LdapUrlExt::XBindpw(_))
                | (LdapUrlExt::StartTLS, LdapUrlExt::StartTLS)
                | (LdapUrlExt::Unknown(_), LdapUrlExt::Unknown(_))
        )
    }
}

impl<'a> Eq for LdapUrlExt<'a> {}

impl<'a> Hash for LdapUrlExt<'a> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            LdapUrlExt::Bindname(_) => "Bindname".hash(state),
            LdapUrlExt::XBindpw(_) => "XBindpw".hash(state),
            LdapUrlExt::StartTLS => "StartTLS".hash(state),
            LdapUrlExt::Unknown(_) => "Unknown".hash(state),
        }
    }
}

/// Parameters of an LDAP URL.
///
/// The LDAP URL specification describes a number of optional URL
/// parameters, contained in the query part, which mostly provide Search
/// operation settings. Additionally, the URL can have a list of
/// extensions, describing further options.
///
/// When populating the `extensions` set, extension value is ignored in
/// hashing and comparisons; searching the set for a value-bearing
/// variant is done with an empty value.
#[derive(Clone, Debug)]
pub struct LdapUrlParams<'a> {
    /// Search base, percent-decoded.
    pub base: Cow<'a, str>,

    /// Attribute list, returned as `*` (all attributes) if missing.
    pub attrs: Vec<&'a str>,

    /// Search scope, returned as `Scope::Subtree` if missing.
    pub scope: Scope,

    /// Filter string, percent-decoded.
    pub filter: Cow<'a, str>,

    /// Extensions, whose values are percent-decoded.
    pub extensions: HashSet<LdapUrlExt<'a>>,
}

#[inline]
fn ascii_lc_equal(fixed: &str, tested: &str) -> bool {
    fixed.len() == tested.len()
        && fixed
            .as_bytes()
            .iter()
            .zip(tested.as_bytes().iter().map(u8::to_ascii_lowercase))
            .all(|(&f, t)| f == t)
}

/// Extract parameters from an LDAP URL.
pub fn get_url_params(url: &Url) -> Result<LdapUrlParams<'_>> {
    let mut base = url.path();
    if base.starts_with('/') {
        base = &base[1..];
    }
    let base = percent_decode_str(base)
        .decode_utf8()
        .map_err(|_| LdapError::DecodingUTF8)?;
    let mut query = url.query().unwrap_or("").splitn(4, '?');
    let attrs = match query.next() {
        Some("") | None => vec!["*"],
        Some(alist) => alist.split(',').collect(),
    };
    let scope = match query.next() {
        Some("") | None => Scope::Subtree,
        Some("base") => Scope::Base,
        Some("one") => Scope::OneLevel,
        Some("sub") => Scope::Subtree,
        Some(any) => return Err(LdapError::InvalidScopeString(any.into())),
    };
    let filter = match query.next() {
        Some("") | None => "(objectClass=*)",
        Some(filter) => filter,
    };
    let filter = percent_decode_str(filter)
        .decode_utf8()
        .map_err(|_| LdapError::DecodingUTF8)?;
    let extensions = match query.next() {
        Some("") | None => HashSet::new(),
        Some(exts) => {
            let mut ext_set = HashSet::new();
            for ext in exts.split(',') {
                let mut crit = false;
                let mut idv = ext.splitn(2, '=');
                let mut id = idv.next().unwrap_or("");
                if let Some(stripped) = id.strip_prefix('!') {
                    id = stripped;
                    crit = true;
                }
                let val = percent_decode_str(idv.next().unwrap_or(""))
                    .decode_utf8()
                    .map_err(|_| LdapError::DecodingUTF8)?;
                let ext = if id == "1.3.6.1.4.1.1466.20037" {
                    LdapUrlExt::StartTLS
                } else if ascii_lc_equal("bindname", id) {
                    LdapUrlExt::Bindname(val)
                } else if ascii_lc_equal("x-bindpw", id) {
                    LdapUrlExt::XBindpw(val)
                } else if crit {
                    return Err(LdapError::UnrecognizedCriticalExtension(id.to_owned()));
                } else {
                    LdapUrlExt::Unknown("".into())
                };
                if ext != LdapUrlExt::Unknown("".into()) {
                    ext_set.insert(ext);
                }
            }
            ext_set
        }
    };
    Ok(LdapUrlParams {
        base,
        attrs,
        scope,
        filter,
        extensions,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dn_esc_leading_space() {
        assert_eq!(dn_escape(" foo"), "\\20foo");
    }

    #[test]
    fn dn_esc_trailing_space() {
        assert_eq!(dn_escape("foo "), "foo\\20");
    }

    #[test]
    fn dn_esc_inner_space() {
        assert_eq!(dn_escape("f o o"), "f o o");
    }

    #[test]
    fn dn_esc_single_space() {
        assert_eq!(dn_escape(" "), "\\20");
    }

    #[test]
    fn dn_esc_leading_hash() {
        assert_eq!(dn_escape("#rust"), "\\23rust");
    }

    #[test]
    fn ldap_esc_star() {
        assert_eq!(ldap_escape("a*b"), "a\\2ab");
        assert_eq!(ldap_escape("plain"), "plain");
    }

    #[test]
    fn unescape_roundtrip() {
        assert_eq!(ldap_unescape("a\\2ab").unwrap(), "a*b");
        assert_eq!(ldap_unescape("plain").unwrap(), "plain");
        assert!(ldap_unescape("runt\\2").is_err());
    }

    #[test]
    fn url_params() {
        let url = Url::parse("ldap://localhost/dc=example,dc=org?uid,cn?sub?(uid=jdoe)").unwrap();
        let params = get_url_params(&url).unwrap();
        assert_eq!(params.base, "dc=example,dc=org");
        assert_eq!(params.attrs, vec!["uid", "cn"]);
        assert_eq!(params.scope, Scope::Subtree);
        assert_eq!(params.filter, "(uid=jdoe)");
    }

    #[test]
    fn url_extensions() {
        let url =
            Url::parse("ldap://localhost/dc=example????bindname=cn=admin%2cdc=example").unwrap();
        let params = get_url_params(&url).unwrap();
        let bindname = match params.extensions.get(&LdapUrlExt::Bindname("".into())) {
            Some(LdapUrlExt::Bindname(val)) => val.as_ref(),
            _ => "",
        };
        assert_eq!(bindname, "cn=admin,dc=example");
    }

    #[test]
    fn critical_unknown_extension() {
        let url = Url::parse("ldap://localhost/dc=example????!x-frob=1").unwrap();
        assert!(get_url_params(&url).is_err());
    }
}
