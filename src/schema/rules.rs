//! Matching rules and syntax rules.
//!
//! A matching rule pairs a prep pipeline with a comparison; equality is
//! defined as equality of the prepared forms, and ordering rules compare
//! prepared forms lexicographically. A syntax rule is a validator for
//! candidate values.

use std::cmp::Ordering;

use crate::dn::Dn;
use crate::result::{LdapError, Result};
use crate::schema::prep;

/// One step of the RFC 4518 preparation pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrepStep {
    Transcode,
    MapCharacters,
    CaseFold,
    Normalize,
    Prohibit,
    InsignificantSpace,
    InsignificantNumeric,
    InsignificantTelephone,
}

/// A matching rule: OID, names, assertion syntax, and prep pipeline.
#[derive(Clone, Debug)]
pub struct MatchingRule {
    pub oid: &'static str,
    pub names: &'static [&'static str],
    pub syntax: &'static str,
    pub prep: &'static [PrepStep],
}

pub(crate) const OID_DN_MATCH: &str = "2.5.13.1";
pub(crate) const OID_INTEGER_MATCH: &str = "2.5.13.14";

impl MatchingRule {
    /// Run the rule's prep pipeline over a value.
    pub fn prepare(&self, value: &str) -> Result<String> {
        let mut value = value.to_owned();
        for step in self.prep {
            value = match step {
                PrepStep::Transcode => prep::transcode(&value),
                PrepStep::MapCharacters => prep::map_characters(&value),
                PrepStep::CaseFold => prep::case_fold(&value),
                PrepStep::Normalize => prep::normalize(&value),
                PrepStep::Prohibit => {
                    prep::prohibit(&value)?;
                    value
                }
                PrepStep::InsignificantSpace => prep::insignificant_space(&value),
                PrepStep::InsignificantNumeric => prep::insignificant_numeric(&value),
                PrepStep::InsignificantTelephone => prep::insignificant_telephone(&value),
            };
        }
        Ok(value)
    }

    /// Equality of the prepared forms. A value the pipeline rejects
    /// falls back to octet comparison.
    pub fn equal(&self, attribute_value: &str, assertion_value: &str) -> bool {
        match self.oid {
            OID_DN_MATCH => {
                match (Dn::parse(attribute_value), Dn::parse(assertion_value)) {
                    (Ok(a), Ok(b)) => return a == b,
                    _ => return attribute_value == assertion_value,
                }
            }
            OID_INTEGER_MATCH => {
                if let (Ok(a), Ok(b)) = (
                    attribute_value.trim().parse::<i128>(),
                    assertion_value.trim().parse::<i128>(),
                ) {
                    return a == b;
                }
            }
            _ => (),
        }
        match (self.prepare(attribute_value), self.prepare(assertion_value)) {
            (Ok(a), Ok(b)) => a == b,
            _ => attribute_value == assertion_value,
        }
    }

    /// Ordering of the prepared forms.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        if self.oid == OID_INTEGER_MATCH {
            if let (Ok(a), Ok(b)) = (a.trim().parse::<i128>(), b.trim().parse::<i128>()) {
                return a.cmp(&b);
            }
        }
        match (self.prepare(a), self.prepare(b)) {
            (Ok(pa), Ok(pb)) => pa.cmp(&pb),
            _ => a.cmp(b),
        }
    }
}

/// A syntax rule: OID, description, and value validator.
#[derive(Clone)]
pub struct SyntaxRule {
    pub oid: &'static str,
    pub desc: &'static str,
    validate: fn(&str) -> bool,
}

impl std::fmt::Debug for SyntaxRule {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("SyntaxRule")
            .field("oid", &self.oid)
            .field("desc", &self.desc)
            .finish()
    }
}

impl SyntaxRule {
    /// Check a candidate value against the syntax.
    pub fn validate(&self, value: &str) -> Result<()> {
        if (self.validate)(value) {
            Ok(())
        } else {
            Err(LdapError::InvalidSyntax(format!(
                "not a valid {}: {}",
                self.desc, value
            )))
        }
    }
}

const SPACE_PREP: &[PrepStep] = &[
    PrepStep::Transcode,
    PrepStep::MapCharacters,
    PrepStep::Normalize,
    PrepStep::Prohibit,
    PrepStep::InsignificantSpace,
];

const SPACE_FOLD_PREP: &[PrepStep] = &[
    PrepStep::Transcode,
    PrepStep::MapCharacters,
    PrepStep::CaseFold,
    PrepStep::Normalize,
    PrepStep::Prohibit,
    PrepStep::InsignificantSpace,
];

const NUMERIC_PREP: &[PrepStep] = &[
    PrepStep::Transcode,
    PrepStep::MapCharacters,
    PrepStep::Normalize,
    PrepStep::Prohibit,
    PrepStep::InsignificantNumeric,
];

const TELEPHONE_PREP: &[PrepStep] = &[
    PrepStep::Transcode,
    PrepStep::MapCharacters,
    PrepStep::CaseFold,
    PrepStep::Normalize,
    PrepStep::Prohibit,
    PrepStep::InsignificantTelephone,
];

pub(crate) fn builtin_matching_rules() -> Vec<MatchingRule> {
    vec![
        MatchingRule {
            oid: "2.5.13.0",
            names: &["objectIdentifierMatch"],
            syntax: "1.3.6.1.4.1.1466.115.121.1.38",
            prep: &[PrepStep::Transcode, PrepStep::CaseFold],
        },
        MatchingRule {
            oid: OID_DN_MATCH,
            names: &["distinguishedNameMatch"],
            syntax: "1.3.6.1.4.1.1466.115.121.1.12",
            prep: &[],
        },
        MatchingRule {
            oid: "2.5.13.2",
            names: &["caseIgnoreMatch"],
            syntax: "1.3.6.1.4.1.1466.115.121.1.15",
            prep: SPACE_FOLD_PREP,
        },
        MatchingRule {
            oid: "2.5.13.3",
            names: &["caseIgnoreOrderingMatch"],
            syntax: "1.3.6.1.4.1.1466.115.121.1.15",
            prep: SPACE_FOLD_PREP,
        },
        MatchingRule {
            oid: "2.5.13.5",
            names: &["caseExactMatch"],
            syntax: "1.3.6.1.4.1.1466.115.121.1.15",
            prep: SPACE_PREP,
        },
        MatchingRule {
            oid: "2.5.13.8",
            names: &["numericStringMatch"],
            syntax: "1.3.6.1.4.1.1466.115.121.1.36",
            prep: NUMERIC_PREP,
        },
        MatchingRule {
            oid: "2.5.13.13",
            names: &["booleanMatch"],
            syntax: "1.3.6.1.4.1.1466.115.121.1.7",
            prep: &[],
        },
        MatchingRule {
            oid: OID_INTEGER_MATCH,
            names: &["integerMatch"],
            syntax: "1.3.6.1.4.1.1466.115.121.1.27",
            prep: NUMERIC_PREP,
        },
        MatchingRule {
            oid: "2.5.13.15",
            names: &["integerOrderingMatch"],
            syntax: "1.3.6.1.4.1.1466.115.121.1.27",
            prep: NUMERIC_PREP,
        },
        MatchingRule {
            oid: "2.5.13.17",
            names: &["octetStringMatch"],
            syntax: "1.3.6.1.4.1.1466.115.121.1.40",
            prep: &[],
        },
        MatchingRule {
            oid: "2.5.13.20",
            names: &["telephoneNumberMatch"],
            syntax: "1.3.6.1.4.1.1466.115.121.1.50",
            prep: TELEPHONE_PREP,
        },
        MatchingRule {
            oid: "2.5.13.27",
            names: &["generalizedTimeMatch"],
            syntax: "1.3.6.1.4.1.1466.115.121.1.24",
            prep: NUMERIC_PREP,
        },
        MatchingRule {
            oid: "1.3.6.1.4.1.1466.109.114.1",
            names: &["caseExactIA5Match"],
            syntax: "1.3.6.1.4.1.1466.115.121.1.26",
            prep: SPACE_PREP,
        },
        MatchingRule {
            oid: "1.3.6.1.4.1.1466.109.114.2",
            names: &["caseIgnoreIA5Match"],
            syntax: "1.3.6.1.4.1.1466.115.121.1.26",
            prep: SPACE_FOLD_PREP,
        },
    ]
}

fn is_descr(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => (),
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_numericoid(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|part| {
            !part.is_empty()
                && part.chars().all(|c| c.is_ascii_digit())
                && (part.len() == 1 || !part.starts_with('0'))
        })
}

fn valid_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
        && (digits.len() == 1 || !digits.starts_with('0'))
}

fn valid_generalized_time(s: &str) -> bool {
    // YYYYMMDDHH at minimum, then optional minute/second/fraction,
    // terminated by Z or a numeric offset
    let bytes = s.as_bytes();
    if bytes.len() < 11 {
        return false;
    }
    if !bytes[..10].iter().all(u8::is_ascii_digit) {
        return false;
    }
    matches!(bytes[bytes.len() - 1], b'Z' | b'0'..=b'9')
        && s.chars().all(|c| c.is_ascii_digit() || matches!(c, 'Z' | '+' | '-' | '.' | ','))
}

pub(crate) fn builtin_syntax_rules() -> Vec<SyntaxRule> {
    vec![
        SyntaxRule {
            oid: "1.3.6.1.4.1.1466.115.121.1.7",
            desc: "Boolean",
            validate: |s| s == "TRUE" || s == "FALSE",
        },
        SyntaxRule {
            oid: "1.3.6.1.4.1.1466.115.121.1.11",
            desc: "Country String",
            validate: |s| s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic()),
        },
        SyntaxRule {
            oid: "1.3.6.1.4.1.1466.115.121.1.12",
            desc: "DN",
            validate: |s| Dn::parse(s).is_ok(),
        },
        SyntaxRule {
            oid: "1.3.6.1.4.1.1466.115.121.1.15",
            desc: "Directory String",
            validate: |s| !s.is_empty(),
        },
        SyntaxRule {
            oid: "1.3.6.1.4.1.1466.115.121.1.24",
            desc: "Generalized Time",
            validate: valid_generalized_time,
        },
        SyntaxRule {
            oid: "1.3.6.1.4.1.1466.115.121.1.26",
            desc: "IA5 String",
            validate: |s| s.is_ascii(),
        },
        SyntaxRule {
            oid: "1.3.6.1.4.1.1466.115.121.1.27",
            desc: "INTEGER",
            validate: valid_integer,
        },
        SyntaxRule {
            oid: "1.3.6.1.4.1.1466.115.121.1.36",
            desc: "Numeric String",
            validate: |s| {
                !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == ' ')
            },
        },
        SyntaxRule {
            oid: "1.3.6.1.4.1.1466.115.121.1.38",
            desc: "OID",
            validate: |s| is_numericoid(s) || is_descr(s),
        },
        SyntaxRule {
            oid: "1.3.6.1.4.1.1466.115.121.1.40",
            desc: "Octet String",
            validate: |_| true,
        },
        SyntaxRule {
            oid: "1.3.6.1.4.1.1466.115.121.1.50",
            desc: "Telephone Number",
            validate: |s| !s.is_empty() && s.chars().all(|c| c.is_ascii_graphic() || c == ' '),
        },
    ]
}

#[cfg(test)]
mod test {
    use super::*;

    fn rule(name: &str) -> MatchingRule {
        builtin_matching_rules()
            .into_iter()
            .find(|r| r.names.contains(&name))
            .expect("rule")
    }

    #[test]
    fn case_ignore_equality() {
        let r = rule("caseIgnoreMatch");
        assert!(r.equal("John  Doe", "JOHN DOE"));
        assert!(r.equal(" John Doe ", "john doe"));
        assert!(!r.equal("John Doe", "JohnDoe"));
    }

    #[test]
    fn case_exact_distinguishes() {
        let r = rule("caseExactMatch");
        assert!(r.equal("John", "John"));
        assert!(!r.equal("John", "john"));
    }

    #[test]
    fn numeric_string_spaces_insignificant() {
        let r = rule("numericStringMatch");
        assert!(r.equal("123 456", "123456"));
    }

    #[test]
    fn integer_numeric_compare() {
        let r = rule("integerMatch");
        assert!(r.equal("0100", "100"));
        assert_eq!(r.compare("99", "100"), std::cmp::Ordering::Less);
    }

    #[test]
    fn dn_match_parses() {
        let r = rule("distinguishedNameMatch");
        assert!(r.equal("CN=Foo, DC=example", "cn=foo,dc=example"));
    }

    #[test]
    fn boolean_syntax() {
        let syn = builtin_syntax_rules()
            .into_iter()
            .find(|s| s.desc == "Boolean")
            .unwrap();
        assert!(syn.validate("TRUE").is_ok());
        assert!(syn.validate("true").is_err());
    }

    #[test]
    fn integer_syntax() {
        let syn = builtin_syntax_rules()
            .into_iter()
            .find(|s| s.desc == "INTEGER")
            .unwrap();
        assert!(syn.validate("-123").is_ok());
        assert!(syn.validate("0").is_ok());
        assert!(syn.validate("007").is_err());
        assert!(syn.validate("12a").is_err());
    }
}
