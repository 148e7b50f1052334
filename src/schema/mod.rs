//! Schema subsystem: element descriptions, the registry, matching rules
//! and value preparation.
//!
//! The registry maintains three indices: OID to element, name to element
//! (case-insensitive, covering every alias), and syntax OID to syntax
//! rule. Registration is idempotent: registering an element identical to
//! one already present is a no-op, while re-registering an OID with a
//! different definition fails with
//! [`SchemaConflict`](crate::result::LdapError::SchemaConflict).
//!
//! The client is not authoritative for the schema: referencing an
//! unknown attribute type is permitted everywhere, with client-side
//! equality degrading to octet comparison and validation logging a
//! warning instead of failing.

mod attrtype;
mod grammar;
mod objectclass;
pub mod prep;
mod rules;

pub use attrtype::{AttributeType, Usage, parse_attribute_type};
pub use objectclass::{ClassKind, ObjectClass, parse_object_class};
pub use rules::{MatchingRule, PrepStep, SyntaxRule};

use std::collections::HashMap;

use crate::result::{LdapError, Result};

use log::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ElementKind {
    AttributeType,
    ObjectClass,
    MatchingRule,
}

impl ElementKind {
    fn label(&self) -> &'static str {
        match self {
            ElementKind::AttributeType => "attribute type",
            ElementKind::ObjectClass => "object class",
            ElementKind::MatchingRule => "matching rule",
        }
    }
}

/// Registry of schema elements with OID and name indices.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    attrs: Vec<AttributeType>,
    attr_by_oid: HashMap<String, usize>,
    attr_by_name: HashMap<String, usize>,
    ocs: Vec<ObjectClass>,
    oc_by_oid: HashMap<String, usize>,
    oc_by_name: HashMap<String, usize>,
    mrs: Vec<MatchingRule>,
    mr_by_oid: HashMap<String, usize>,
    mr_by_name: HashMap<String, usize>,
    syntaxes: HashMap<String, SyntaxRule>,
    oids: HashMap<String, ElementKind>,
    names: HashMap<String, ElementKind>,
}

impl SchemaRegistry {
    /// An empty registry carrying only the standard matching and syntax
    /// rules.
    pub fn new() -> SchemaRegistry {
        let mut reg = SchemaRegistry::default();
        for mr in rules::builtin_matching_rules() {
            let ix = reg.mrs.len();
            reg.oids.insert(mr.oid.to_owned(), ElementKind::MatchingRule);
            reg.mr_by_oid.insert(mr.oid.to_owned(), ix);
            for name in mr.names {
                reg.names
                    .insert(name.to_ascii_lowercase(), ElementKind::MatchingRule);
                reg.mr_by_name.insert(name.to_ascii_lowercase(), ix);
            }
            reg.mrs.push(mr);
        }
        for syn in rules::builtin_syntax_rules() {
            reg.syntaxes.insert(syn.oid.to_owned(), syn);
        }
        reg
    }

    /// A registry preloaded with the RFC 4519 core attribute types and
    /// object classes.
    pub fn with_core() -> SchemaRegistry {
        let mut reg = SchemaRegistry::new();
        for spec in CORE_ATTRIBUTE_TYPES {
            reg.register_attribute_type(spec).expect("core schema");
        }
        for spec in CORE_OBJECT_CLASSES {
            reg.register_object_class(spec).expect("core schema");
        }
        reg
    }

    /// Register an attribute type from its RFC 4512 description.
    pub fn register_attribute_type(&mut self, spec: &str) -> Result<()> {
        let at = parse_attribute_type(spec)?;
        if let Some(&ix) = self.attr_by_oid.get(&at.oid) {
            if self.attrs[ix] == at {
                return Ok(());
            }
            return Err(LdapError::SchemaConflict(format!(
                "attribute type {} re-registered with a different definition",
                at.oid
            )));
        }
        self.check_oid_free(&at.oid)?;
        for name in &at.names {
            self.check_name_free(name)?;
        }
        let ix = self.attrs.len();
        self.oids.insert(at.oid.clone(), ElementKind::AttributeType);
        self.attr_by_oid.insert(at.oid.clone(), ix);
        for name in &at.names {
            self.names
                .insert(name.to_ascii_lowercase(), ElementKind::AttributeType);
            self.attr_by_name.insert(name.to_ascii_lowercase(), ix);
        }
        self.attrs.push(at);
        Ok(())
    }

    /// Register an object class from its RFC 4512 description.
    pub fn register_object_class(&mut self, spec: &str) -> Result<()> {
        let oc = parse_object_class(spec)?;
        if let Some(&ix) = self.oc_by_oid.get(&oc.oid) {
            if self.ocs[ix] == oc {
                return Ok(());
            }
            return Err(LdapError::SchemaConflict(format!(
                "object class {} re-registered with a different definition",
                oc.oid
            )));
        }
        self.check_oid_free(&oc.oid)?;
        for name in &oc.names {
            self.check_name_free(name)?;
        }
        let ix = self.ocs.len();
        self.oids.insert(oc.oid.clone(), ElementKind::ObjectClass);
        self.oc_by_oid.insert(oc.oid.clone(), ix);
        for name in &oc.names {
            self.names
                .insert(name.to_ascii_lowercase(), ElementKind::ObjectClass);
            self.oc_by_name.insert(name.to_ascii_lowercase(), ix);
        }
        self.ocs.push(oc);
        Ok(())
    }

    fn check_oid_free(&self, oid: &str) -> Result<()> {
        match self.oids.get(oid) {
            Some(kind) => Err(LdapError::SchemaConflict(format!(
                "OID {} already registered as a {}",
                oid,
                kind.label()
            ))),
            None => Ok(()),
        }
    }

    fn check_name_free(&self, name: &str) -> Result<()> {
        match self.names.get(&name.to_ascii_lowercase()) {
            Some(kind) => Err(LdapError::SchemaConflict(format!(
                "name {} already registered as a {}",
                name,
                kind.label()
            ))),
            None => Ok(()),
        }
    }

    /// Look up an attribute type by OID or any of its names.
    pub fn attribute_type(&self, ident: &str) -> Option<&AttributeType> {
        let ix = if ident.starts_with(|c: char| c.is_ascii_digit()) {
            self.attr_by_oid.get(ident)
        } else {
            self.attr_by_name.get(&ident.to_ascii_lowercase())
        }?;
        self.attrs.get(*ix)
    }

    /// Look up an object class by OID or any of its names.
    pub fn object_class(&self, ident: &str) -> Option<&ObjectClass> {
        let ix = if ident.starts_with(|c: char| c.is_ascii_digit()) {
            self.oc_by_oid.get(ident)
        } else {
            self.oc_by_name.get(&ident.to_ascii_lowercase())
        }?;
        self.ocs.get(*ix)
    }

    /// Look up a matching rule by OID or name.
    pub fn matching_rule(&self, ident: &str) -> Option<&MatchingRule> {
        let ix = if ident.starts_with(|c: char| c.is_ascii_digit()) {
            self.mr_by_oid.get(ident)
        } else {
            self.mr_by_name.get(&ident.to_ascii_lowercase())
        }?;
        self.mrs.get(*ix)
    }

    /// Look up a syntax rule by OID.
    pub fn syntax(&self, oid: &str) -> Option<&SyntaxRule> {
        self.syntaxes.get(oid)
    }

    /// The schema-registered canonical spelling of an attribute name.
    pub fn canonical_name<'a>(&'a self, ident: &'a str) -> &'a str {
        match self.attribute_type(ident) {
            Some(at) => at.names.first().map(String::as_str).unwrap_or(ident),
            None => ident,
        }
    }

    /// Resolve the equality matching rule of an attribute type,
    /// following the supertype chain.
    pub fn equality_rule(&self, attr: &str) -> Option<&MatchingRule> {
        let mut current = self.attribute_type(attr)?;
        for _ in 0..16 {
            if let Some(ref mr) = current.equality {
                return self.matching_rule(mr);
            }
            current = self.attribute_type(current.sup.as_deref()?)?;
        }
        None
    }

    /// Resolve the syntax of an attribute type, following the supertype
    /// chain.
    pub fn syntax_of(&self, attr: &str) -> Option<&SyntaxRule> {
        let mut current = self.attribute_type(attr)?;
        for _ in 0..16 {
            if let Some(ref syntax) = current.syntax {
                return self.syntax(syntax);
            }
            current = self.attribute_type(current.sup.as_deref()?)?;
        }
        None
    }

    /// Compare two values of an attribute under its equality rule.
    /// Values of unknown attribute types compare by octet equality.
    pub fn equal(&self, attr: &str, a: &str, b: &str) -> bool {
        match self.equality_rule(attr) {
            Some(rule) => rule.equal(a, b),
            None => a == b,
        }
    }

    /// Validate a value against the attribute's syntax. An unknown
    /// attribute type is permitted, with a logged warning; the server is
    /// authoritative.
    pub fn validate_value(&self, attr: &str, value: &str) -> Result<()> {
        match self.syntax_of(attr) {
            Some(syntax) => syntax.validate(value),
            None => {
                warn!("no syntax known for attribute {}, value not validated", attr);
                Ok(())
            }
        }
    }
}

const CORE_ATTRIBUTE_TYPES: &[&str] = &[
    "( 2.5.4.0 NAME 'objectClass' EQUALITY objectIdentifierMatch \
     SYNTAX 1.3.6.1.4.1.1466.115.121.1.38 )",
    "( 2.5.4.41 NAME 'name' EQUALITY caseIgnoreMatch SUBSTR caseIgnoreSubstringsMatch \
     SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 2.5.4.3 NAME ( 'cn' 'commonName' ) SUP name )",
    "( 2.5.4.4 NAME ( 'sn' 'surname' ) SUP name )",
    "( 2.5.4.10 NAME ( 'o' 'organizationName' ) SUP name )",
    "( 2.5.4.11 NAME ( 'ou' 'organizationalUnitName' ) SUP name )",
    "( 2.5.4.49 NAME 'distinguishedName' EQUALITY distinguishedNameMatch \
     SYNTAX 1.3.6.1.4.1.1466.115.121.1.12 )",
    "( 2.5.4.31 NAME 'member' SUP distinguishedName )",
    "( 2.5.4.34 NAME 'seeAlso' SUP distinguishedName )",
    "( 2.5.4.13 NAME 'description' EQUALITY caseIgnoreMatch \
     SUBSTR caseIgnoreSubstringsMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 2.5.4.20 NAME 'telephoneNumber' EQUALITY telephoneNumberMatch \
     SUBSTR telephoneNumberSubstringsMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.50 )",
    "( 2.5.4.35 NAME 'userPassword' EQUALITY octetStringMatch \
     SYNTAX 1.3.6.1.4.1.1466.115.121.1.40 )",
    "( 0.9.2342.19200300.100.1.1 NAME ( 'uid' 'userid' ) EQUALITY caseIgnoreMatch \
     SUBSTR caseIgnoreSubstringsMatch SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
    "( 0.9.2342.19200300.100.1.25 NAME ( 'dc' 'domainComponent' ) \
     EQUALITY caseIgnoreIA5Match SUBSTR caseIgnoreIA5SubstringsMatch \
     SYNTAX 1.3.6.1.4.1.1466.115.121.1.26 SINGLE-VALUE )",
];

const CORE_OBJECT_CLASSES: &[&str] = &[
    "( 2.5.6.0 NAME 'top' ABSTRACT MUST objectClass )",
    "( 2.5.6.6 NAME 'person' SUP top STRUCTURAL MUST ( sn $ cn ) \
     MAY ( userPassword $ telephoneNumber $ seeAlso $ description ) )",
    "( 2.5.6.4 NAME 'organization' SUP top STRUCTURAL MUST o \
     MAY ( description $ telephoneNumber $ seeAlso ) )",
    "( 2.5.6.5 NAME 'organizationalUnit' SUP top STRUCTURAL MUST ou \
     MAY ( description $ telephoneNumber $ seeAlso ) )",
    "( 2.5.6.9 NAME 'groupOfNames' SUP top STRUCTURAL MUST ( member $ cn ) \
     MAY ( o $ ou $ description $ seeAlso ) )",
    "( 1.3.6.1.4.1.1466.344 NAME 'dcObject' SUP top AUXILIARY MUST dc )",
];

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn core_lookup_by_alias() {
        let reg = SchemaRegistry::with_core();
        let cn = reg.attribute_type("commonname").expect("cn by alias");
        assert_eq!(cn.oid, "2.5.4.3");
        assert_eq!(reg.canonical_name("COMMONNAME"), "cn");
        assert!(reg.object_class("TOP").is_some());
    }

    #[test]
    fn equality_via_supertype() {
        let reg = SchemaRegistry::with_core();
        // cn has no EQUALITY of its own; it inherits caseIgnoreMatch from name
        let rule = reg.equality_rule("cn").expect("inherited rule");
        assert!(rule.names.contains(&"caseIgnoreMatch"));
        assert!(reg.equal("cn", "Foo Bar", "foo  bar"));
    }

    #[test]
    fn unknown_attr_octet_equality() {
        let reg = SchemaRegistry::with_core();
        assert!(reg.equal("frobnicator", "A", "A"));
        assert!(!reg.equal("frobnicator", "A", "a"));
        assert!(reg.validate_value("frobnicator", "anything").is_ok());
    }

    #[test]
    fn idempotent_registration() {
        let mut reg = SchemaRegistry::with_core();
        reg.register_attribute_type(
            "( 2.5.4.3 NAME ( 'cn' 'commonName' ) SUP name )",
        )
        .expect("identical re-registration");
    }

    #[test]
    fn conflicting_registration() {
        let mut reg = SchemaRegistry::with_core();
        let res = reg.register_attribute_type(
            "( 2.5.4.3 NAME 'cn' EQUALITY caseExactMatch \
             SYNTAX 1.3.6.1.4.1.1466.115.121.1.15 )",
        );
        assert!(matches!(res, Err(LdapError::SchemaConflict(_))));
    }

    #[test]
    fn cross_kind_name_conflict() {
        let mut reg = SchemaRegistry::with_core();
        let res = reg.register_object_class("( 9.9.9.9 NAME 'cn' STRUCTURAL )");
        assert!(matches!(res, Err(LdapError::SchemaConflict(_))));
    }

    #[test]
    fn syntax_validation() {
        let reg = SchemaRegistry::with_core();
        assert!(reg.validate_value("dc", "example").is_ok());
        assert!(reg.validate_value("dc", "ex\u{00E4}mple").is_err());
    }
}
