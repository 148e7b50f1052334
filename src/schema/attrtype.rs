//! Attribute type descriptions (RFC 4512, section 4.1.2).

use crate::result::{LdapError, Result};
use crate::schema::grammar::*;

use nom::IResult;
use nom::character::complete::char;
use nom::sequence::tuple;

/// Attribute usage categories.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Usage {
    #[default]
    UserApplications,
    DirectoryOperation,
    DistributedOperation,
    DsaOperation,
}

impl Usage {
    fn from_str(s: &str) -> Option<Usage> {
        match s {
            "userApplications" => Some(Usage::UserApplications),
            "directoryOperation" => Some(Usage::DirectoryOperation),
            "distributedOperation" => Some(Usage::DistributedOperation),
            "dSAOperation" => Some(Usage::DsaOperation),
            _ => None,
        }
    }
}

/// A parsed attribute type description.
///
/// Fields not given in the description are `None`/`false`; resolution
/// through the supertype chain is the registry's affair.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeType {
    pub oid: String,
    pub names: Vec<String>,
    pub desc: Option<String>,
    pub obsolete: bool,
    pub sup: Option<String>,
    pub equality: Option<String>,
    pub ordering: Option<String>,
    pub substr: Option<String>,
    pub syntax: Option<String>,
    pub syntax_len: Option<usize>,
    pub single_value: bool,
    pub collective: bool,
    pub no_user_mod: bool,
    pub usage: Usage,
}

fn body(i: &str) -> IResult<&str, AttributeType> {
    let (i, _) = tuple((char('('), wsp))(i)?;
    let (mut i, numeric_oid) = numericoid(i)?;
    let mut at = AttributeType {
        oid: numeric_oid.to_owned(),
        ..Default::default()
    };
    loop {
        if let Ok((rest, _)) = keyword(i, "NAME") {
            let (rest, _) = wsp(rest)?;
            let (rest, names) = qdescrs(rest)?;
            at.names = names;
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "DESC") {
            let (rest, _) = wsp(rest)?;
            let (rest, desc) = qdstring(rest)?;
            at.desc = Some(desc);
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "OBSOLETE") {
            at.obsolete = true;
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "SUP") {
            let (rest, _) = wsp(rest)?;
            let (rest, sup) = oid(rest)?;
            at.sup = Some(sup.to_owned());
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "EQUALITY") {
            let (rest, _) = wsp(rest)?;
            let (rest, mr) = oid(rest)?;
            at.equality = Some(mr.to_owned());
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "ORDERING") {
            let (rest, _) = wsp(rest)?;
            let (rest, mr) = oid(rest)?;
            at.ordering = Some(mr.to_owned());
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "SUBSTR") {
            let (rest, _) = wsp(rest)?;
            let (rest, mr) = oid(rest)?;
            at.substr = Some(mr.to_owned());
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "SYNTAX") {
            let (rest, _) = wsp(rest)?;
            let (rest, (syntax, len)) = noidlen(rest)?;
            at.syntax = Some(syntax);
            at.syntax_len = len;
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "SINGLE-VALUE") {
            at.single_value = true;
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "COLLECTIVE") {
            at.collective = true;
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "NO-USER-MODIFICATION") {
            at.no_user_mod = true;
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "USAGE") {
            let (rest, _) = wsp(rest)?;
            let (rest, usage) = descr(rest)?;
            match Usage::from_str(usage) {
                Some(usage) => at.usage = usage,
                None => {
                    return Err(nom::Err::Failure(nom::error::Error::new(
                        rest,
                        nom::error::ErrorKind::Verify,
                    )));
                }
            }
            i = rest;
        } else {
            break;
        }
    }
    let (i, _) = many_extensions(i)?;
    let (i, _) = tuple((wsp, char(')')))(i)?;
    Ok((i, at))
}

/// Parse an attribute type description.
pub fn parse_attribute_type(spec: &str) -> Result<AttributeType> {
    match body(spec.trim()) {
        Ok((rest, at)) if rest.trim().is_empty() => Ok(at),
        _ => Err(LdapError::InvalidSyntax(format!(
            "attribute type description: {}",
            spec
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn full_description() {
        let at = parse_attribute_type(
            "( 0.9.2342.19200300.100.1.25 NAME ( 'dc' 'domainComponent' ) \
             EQUALITY caseIgnoreIA5Match SUBSTR caseIgnoreIA5SubstringsMatch \
             SYNTAX 1.3.6.1.4.1.1466.115.121.1.26 SINGLE-VALUE )",
        )
        .unwrap();
        assert_eq!(at.oid, "0.9.2342.19200300.100.1.25");
        assert_eq!(at.names, vec!["dc", "domainComponent"]);
        assert_eq!(at.equality.as_deref(), Some("caseIgnoreIA5Match"));
        assert_eq!(at.syntax.as_deref(), Some("1.3.6.1.4.1.1466.115.121.1.26"));
        assert!(at.single_value);
        assert!(!at.no_user_mod);
        assert_eq!(at.usage, Usage::UserApplications);
    }

    #[test]
    fn supertype_only() {
        let at = parse_attribute_type("( 2.5.4.3 NAME ( 'cn' 'commonName' ) SUP name )").unwrap();
        assert_eq!(at.sup.as_deref(), Some("name"));
        assert!(at.syntax.is_none());
    }

    #[test]
    fn operational_attribute() {
        let at = parse_attribute_type(
            "( 2.5.18.1 NAME 'createTimestamp' EQUALITY generalizedTimeMatch \
             SYNTAX 1.3.6.1.4.1.1466.115.121.1.24 SINGLE-VALUE NO-USER-MODIFICATION \
             USAGE directoryOperation )",
        )
        .unwrap();
        assert!(at.no_user_mod);
        assert_eq!(at.usage, Usage::DirectoryOperation);
    }

    #[test]
    fn extensions_skipped() {
        let at = parse_attribute_type(
            "( 1.2.3.4 NAME 'custom' SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 \
             X-ORIGIN 'local schema' )",
        )
        .unwrap();
        assert_eq!(at.names, vec!["custom"]);
    }

    #[test]
    fn garbage_rejected() {
        assert!(parse_attribute_type("( NAME 'broken' )").is_err());
        assert!(parse_attribute_type("( 1.2.3 NAME 'x' ) trailing").is_err());
    }
}
