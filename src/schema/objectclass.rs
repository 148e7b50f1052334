//! Object class descriptions (RFC 4512, section 4.1.1).

use crate::result::{LdapError, Result};
use crate::schema::grammar::*;

use nom::IResult;
use nom::character::complete::char;
use nom::sequence::tuple;

/// Object class kinds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClassKind {
    Abstract,
    #[default]
    Structural,
    Auxiliary,
}

/// A parsed object class description.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectClass {
    pub oid: String,
    pub names: Vec<String>,
    pub desc: Option<String>,
    pub obsolete: bool,
    pub sup: Vec<String>,
    pub kind: ClassKind,
    pub must: Vec<String>,
    pub may: Vec<String>,
}

fn body(i: &str) -> IResult<&str, ObjectClass> {
    let (i, _) = tuple((char('('), wsp))(i)?;
    let (mut i, oid) = numericoid(i)?;
    let mut oc = ObjectClass {
        oid: oid.to_owned(),
        ..Default::default()
    };
    loop {
        if let Ok((rest, _)) = keyword(i, "NAME") {
            let (rest, _) = wsp(rest)?;
            let (rest, names) = qdescrs(rest)?;
            oc.names = names;
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "DESC") {
            let (rest, _) = wsp(rest)?;
            let (rest, desc) = qdstring(rest)?;
            oc.desc = Some(desc);
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "OBSOLETE") {
            oc.obsolete = true;
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "SUP") {
            let (rest, _) = wsp(rest)?;
            let (rest, sup) = oids(rest)?;
            oc.sup = sup;
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "ABSTRACT") {
            oc.kind = ClassKind::Abstract;
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "STRUCTURAL") {
            oc.kind = ClassKind::Structural;
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "AUXILIARY") {
            oc.kind = ClassKind::Auxiliary;
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "MUST") {
            let (rest, _) = wsp(rest)?;
            let (rest, must) = oids(rest)?;
            oc.must = must;
            i = rest;
        } else if let Ok((rest, _)) = keyword(i, "MAY") {
            let (rest, _) = wsp(rest)?;
            let (rest, may) = oids(rest)?;
            oc.may = may;
            i = rest;
        } else {
            break;
        }
    }
    let (i, _) = many_extensions(i)?;
    let (i, _) = tuple((wsp, char(')')))(i)?;
    Ok((i, oc))
}

/// Parse an object class description.
pub fn parse_object_class(spec: &str) -> Result<ObjectClass> {
    match body(spec.trim()) {
        Ok((rest, oc)) if rest.trim().is_empty() => Ok(oc),
        _ => Err(LdapError::InvalidSyntax(format!(
            "object class description: {}",
            spec
        ))),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn structural_class() {
        let oc = parse_object_class(
            "( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST ( sn $ cn ) \
             MAY ( userPassword $ telephoneNumber $ seeAlso $ description ) )",
        )
        .unwrap();
        assert_eq!(oc.oid, "2.5.6.6");
        assert_eq!(oc.kind, ClassKind::Structural);
        assert_eq!(oc.sup, vec!["top"]);
        assert_eq!(oc.must, vec!["sn", "cn"]);
        assert_eq!(oc.may.len(), 4);
    }

    #[test]
    fn abstract_class() {
        let oc = parse_object_class("( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass )").unwrap();
        assert_eq!(oc.kind, ClassKind::Abstract);
        assert_eq!(oc.must, vec!["objectClass"]);
    }

    #[test]
    fn auxiliary_class() {
        let oc = parse_object_class(
            "( 1.3.6.1.4.1.1466.344 NAME 'dcObject' SUP top AUXILIARY MUST dc )",
        )
        .unwrap();
        assert_eq!(oc.kind, ClassKind::Auxiliary);
    }

    #[test]
    fn malformed_rejected() {
        assert!(parse_object_class("( 2.5.6.6 NAME person )").is_err());
    }
}
