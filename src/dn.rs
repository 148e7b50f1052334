//! Distinguished names (RFC 4514).
//!
//! A [`Dn`] is an immutable sequence of relative DNs, leftmost (leaf)
//! first; each [`Rdn`] is a set of attribute/value assertions. The empty
//! DN addresses the root DSE. Parsing accepts optional whitespace around
//! the separators, which several servers and most humans produce;
//! rendering emits the canonical escaped form, which parses back to an
//! equal value.

use std::fmt;
use std::str::FromStr;

use crate::result::{LdapError, Result};
use crate::util::dn_escape;

/// One attribute/value assertion of an RDN.
#[derive(Clone, Debug)]
pub struct Ava {
    pub attr: String,
    pub value: String,
}

impl PartialEq for Ava {
    fn eq(&self, other: &Self) -> bool {
        self.attr.eq_ignore_ascii_case(&other.attr)
            && self.value.to_lowercase() == other.value.to_lowercase()
    }
}

impl Eq for Ava {}

/// A relative distinguished name: one or more AVAs joined by `+`.
#[derive(Clone, Debug)]
pub struct Rdn {
    avas: Vec<Ava>,
}

impl Rdn {
    /// Build a single-valued RDN.
    pub fn new<A: Into<String>, V: Into<String>>(attr: A, value: V) -> Rdn {
        Rdn {
            avas: vec![Ava {
                attr: attr.into(),
                value: value.into(),
            }],
        }
    }

    /// Parse an RDN from its string form.
    pub fn parse(s: &str) -> Result<Rdn> {
        let dn = Dn::parse(s)?;
        match <[Rdn; 1]>::try_from(dn.rdns) {
            Ok([rdn]) => Ok(rdn),
            Err(_) => Err(LdapError::InvalidDN(format!("not a single RDN: {}", s))),
        }
    }

    pub fn avas(&self) -> &[Ava] {
        &self.avas
    }

    /// The attribute name, for a single-valued RDN.
    pub fn attr(&self) -> &str {
        &self.avas[0].attr
    }

    /// The attribute value, for a single-valued RDN.
    pub fn value(&self) -> &str {
        &self.avas[0].value
    }
}

impl PartialEq for Rdn {
    fn eq(&self, other: &Self) -> bool {
        self.avas.len() == other.avas.len()
            && self.avas.iter().all(|ava| other.avas.contains(ava))
    }
}

impl Eq for Rdn {}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (n, ava) in self.avas.iter().enumerate() {
            if n > 0 {
                write!(f, "+")?;
            }
            write!(f, "{}={}", ava.attr, dn_escape(&*ava.value))?;
        }
        Ok(())
    }
}

impl FromStr for Rdn {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Rdn> {
        Rdn::parse(s)
    }
}

/// A distinguished name. The empty DN is the root DSE address.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    /// The empty DN.
    pub fn root() -> Dn {
        Dn { rdns: vec![] }
    }

    /// Parse a DN from its RFC 4514 string form.
    pub fn parse(s: &str) -> Result<Dn> {
        parse_dn(s)
    }

    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    /// RDN components, leftmost (leaf) first.
    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    /// The leftmost RDN, if any.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    /// The DN with the leftmost RDN removed.
    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            None
        } else {
            Some(Dn {
                rdns: self.rdns[1..].to_vec(),
            })
        }
    }

    /// A new DN naming a child of this one.
    pub fn child(&self, rdn: Rdn) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(rdn);
        rdns.extend_from_slice(&self.rdns);
        Dn { rdns }
    }

    /// A new DN naming a child of this one, with the RDN in string form.
    pub fn child_str(&self, rdn: &str) -> Result<Dn> {
        Ok(self.child(Rdn::parse(rdn)?))
    }

    /// Render the DN with attribute names in their schema-registered
    /// canonical spelling where known; unknown names keep the spelling
    /// they were given with.
    pub fn to_canonical_string(&self, schema: &crate::schema::SchemaRegistry) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        for (n, rdn) in self.rdns.iter().enumerate() {
            if n > 0 {
                out.push(',');
            }
            for (m, ava) in rdn.avas.iter().enumerate() {
                if m > 0 {
                    out.push('+');
                }
                let _ = write!(
                    &mut out,
                    "{}={}",
                    schema.canonical_name(&ava.attr),
                    dn_escape(&*ava.value)
                );
            }
        }
        out
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (n, rdn) in self.rdns.iter().enumerate() {
            if n > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", rdn)?;
        }
        Ok(())
    }
}

impl FromStr for Dn {
    type Err = LdapError;

    fn from_str(s: &str) -> Result<Dn> {
        Dn::parse(s)
    }
}

fn is_special(c: char) -> bool {
    matches!(c, '"' | '+' | ',' | ';' | '<' | '>' | ' ' | '#' | '=' | '\\')
}

fn hex_val(c: char) -> Option<u8> {
    c.to_digit(16).map(|d| d as u8)
}

struct ValueChar {
    c: char,
    escaped: bool,
}

fn parse_dn(s: &str) -> Result<Dn> {
    if s.trim().is_empty() {
        return Ok(Dn::root());
    }
    let bad = |what: &str| LdapError::InvalidDN(format!("{} in \"{}\"", what, s));

    let mut rdns = Vec::new();
    let mut avas = Vec::new();
    let mut chars = s.chars().peekable();
    loop {
        // attribute type, up to the unescaped '='
        let mut attr = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                break;
            }
            if matches!(c, ',' | '+' | '\\') {
                return Err(bad("unexpected separator in attribute name"));
            }
            attr.push(c);
            chars.next();
        }
        if chars.next() != Some('=') {
            return Err(bad("missing '='"));
        }
        let attr = attr.trim();
        if attr.is_empty() || !attr.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        {
            return Err(bad("invalid attribute name"));
        }

        // attribute value, with RFC 4514 escapes; pending UTF-8 bytes
        // accumulate from successive \XX pairs
        let mut value: Vec<ValueChar> = Vec::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut terminator = None;
        while let Some(c) = chars.next() {
            if c == '\\' {
                let esc = chars.next().ok_or_else(|| bad("truncated escape"))?;
                if is_special(esc) {
                    flush_pending(&mut pending, &mut value, &bad)?;
                    value.push(ValueChar {
                        c: esc,
                        escaped: true,
                    });
                } else if let Some(hi) = hex_val(esc) {
                    let lo = chars
                        .next()
                        .and_then(hex_val)
                        .ok_or_else(|| bad("truncated hex escape"))?;
                    pending.push((hi << 4) | lo);
                } else {
                    return Err(bad("invalid escape"));
                }
                continue;
            }
            flush_pending(&mut pending, &mut value, &bad)?;
            if c == ',' || c == '+' {
                terminator = Some(c);
                break;
            }
            value.push(ValueChar { c, escaped: false });
        }
        flush_pending(&mut pending, &mut value, &bad)?;

        // unescaped outer spaces are insignificant
        let start = value
            .iter()
            .position(|vc| vc.c != ' ' || vc.escaped)
            .unwrap_or(value.len());
        let end = value
            .iter()
            .rposition(|vc| vc.c != ' ' || vc.escaped)
            .map(|p| p + 1)
            .unwrap_or(start);
        let value: String = value[start..end].iter().map(|vc| vc.c).collect();
        if value.is_empty() {
            return Err(bad("empty attribute value"));
        }
        avas.push(Ava {
            attr: attr.to_owned(),
            value,
        });

        match terminator {
            Some('+') => continue,
            Some(_) => {
                rdns.push(Rdn {
                    avas: std::mem::take(&mut avas),
                });
                continue;
            }
            None => {
                rdns.push(Rdn { avas });
                break;
            }
        }
    }
    Ok(Dn { rdns })
}

fn flush_pending(
    pending: &mut Vec<u8>,
    value: &mut Vec<ValueChar>,
    bad: &impl Fn(&str) -> LdapError,
) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }
    let decoded =
        String::from_utf8(std::mem::take(pending)).map_err(|_| bad("invalid UTF-8 escape"))?;
    value.extend(decoded.chars().map(|c| ValueChar {
        c,
        escaped: true,
    }));
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_render_roundtrip() {
        for s in [
            "cn=admin,dc=example,dc=org",
            "uid=jdoe,ou=People,dc=example,dc=org",
            "cn=John Doe+mail=jdoe,dc=example,dc=org",
        ] {
            let dn = Dn::parse(s).unwrap();
            assert_eq!(dn.to_string(), *s);
            assert_eq!(Dn::parse(&dn.to_string()).unwrap(), dn);
        }
    }

    #[test]
    fn escapes_resolved_and_reapplied() {
        let dn = Dn::parse("cn=Doe\\, John,dc=example").unwrap();
        assert_eq!(dn.rdn().unwrap().value(), "Doe, John");
        assert_eq!(dn.to_string(), "cn=Doe\\2c John,dc=example");
        assert_eq!(Dn::parse(&dn.to_string()).unwrap(), dn);
    }

    #[test]
    fn hex_escapes_decode_utf8() {
        let dn = Dn::parse("cn=\\c4\\87,dc=example").unwrap();
        assert_eq!(dn.rdn().unwrap().value(), "ć");
    }

    #[test]
    fn spaces_around_separators() {
        let a = Dn::parse("CN=Foo, DC=example").unwrap();
        let b = Dn::parse("cn=foo,dc=example").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn escaped_spaces_significant() {
        let dn = Dn::parse("cn=\\20padded\\20,dc=example").unwrap();
        assert_eq!(dn.rdn().unwrap().value(), " padded ");
        assert_eq!(Dn::parse(&dn.to_string()).unwrap(), dn);
    }

    #[test]
    fn root_dse() {
        let dn = Dn::parse("").unwrap();
        assert!(dn.is_root());
        assert_eq!(dn.to_string(), "");
        assert_eq!(dn.parent(), None);
    }

    #[test]
    fn parent_and_child() {
        let base = Dn::parse("dc=example,dc=org").unwrap();
        let child = base.child_str("ou=People").unwrap();
        assert_eq!(child.to_string(), "ou=People,dc=example,dc=org");
        assert_eq!(child.parent().unwrap(), base);
    }

    #[test]
    fn multivalued_rdn_order_insensitive() {
        let a = Dn::parse("cn=a+sn=b,dc=x").unwrap();
        let b = Dn::parse("sn=b+cn=a,dc=x").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn malformed_rejected() {
        for s in ["cn", "=x,dc=y", "cn=", "cn=a,", "cn=a\\", "cn=a\\zx"] {
            assert!(Dn::parse(s).is_err(), "should reject {:?}", s);
        }
    }

    #[test]
    fn canonical_attribute_names() {
        let schema = crate::schema::SchemaRegistry::with_core();
        let dn = Dn::parse("COMMONNAME=admin,DC=example,x-custom=1").unwrap();
        assert_eq!(
            dn.to_canonical_string(&schema),
            "cn=admin,dc=example,x-custom=1"
        );
    }

    #[test]
    fn single_rdn_parse() {
        let rdn = Rdn::parse("ou=People").unwrap();
        assert_eq!(rdn.attr(), "ou");
        assert_eq!(rdn.value(), "People");
        assert!(Rdn::parse("ou=a,dc=b").is_err());
    }
}
