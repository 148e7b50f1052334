//! Modification lists and the planner.
//!
//! A [`Mod`] is one high-level modification element; its value list is
//! an [`AttrValues`], so the delete-all sentinel can stand where a list
//! is expected. The planner functions build minimal, server-safe lists:
//! [`add_modlist`] drops values the entry already holds and
//! [`delete_modlist`] drops values it doesn't, both under the equality
//! matching rules, so the resulting Modify cannot fail with
//! `attributeOrValueExists` or `noSuchAttribute` for a reason the client
//! could see coming.

use crate::attrs::{AttrValues, Attrs};
use crate::config::EmptyListPolicy;
use crate::protocol::{ModOp, ModSpec};
use crate::result::{LdapError, Result};
use crate::schema::SchemaRegistry;

use log::warn;

/// A single modification element.
#[derive(Clone, Debug, PartialEq)]
pub struct Mod {
    pub op: ModOp,
    pub attr: String,
    pub values: AttrValues,
}

impl Mod {
    /// Add the given values to an attribute.
    pub fn add<A: Into<String>, V: Into<AttrValues>>(attr: A, values: V) -> Mod {
        Mod {
            op: ModOp::Add,
            attr: attr.into(),
            values: values.into(),
        }
    }

    /// Delete the given values of an attribute.
    pub fn delete<A: Into<String>, V: Into<AttrValues>>(attr: A, values: V) -> Mod {
        Mod {
            op: ModOp::Delete,
            attr: attr.into(),
            values: values.into(),
        }
    }

    /// Delete an attribute entirely.
    pub fn delete_all<A: Into<String>>(attr: A) -> Mod {
        Mod {
            op: ModOp::Delete,
            attr: attr.into(),
            values: AttrValues::All,
        }
    }

    /// Replace all values of an attribute with the given ones. Replacing
    /// with the sentinel (or an empty list, subject to the empty-list
    /// policy) deletes the attribute.
    pub fn replace<A: Into<String>, V: Into<AttrValues>>(attr: A, values: V) -> Mod {
        Mod {
            op: ModOp::Replace,
            attr: attr.into(),
            values: values.into(),
        }
    }

    /// Increment the attribute by the given value (RFC 4525).
    pub fn increment<A: Into<String>, V: Into<String>>(attr: A, value: V) -> Mod {
        Mod {
            op: ModOp::Increment,
            attr: attr.into(),
            values: AttrValues::Concrete(vec![value.into()]),
        }
    }
}

/// Build a modification list applying one operation to every attribute
/// of a map.
pub fn modlist(op: ModOp, attrs: Vec<(String, AttrValues)>) -> Vec<Mod> {
    attrs
        .into_iter()
        .map(|(attr, values)| Mod { op, attr, values })
        .collect()
}

/// Build a list adding only the values not already present on the entry
/// under the equality rules. Attributes with nothing left to add are
/// omitted.
pub fn add_modlist(current: &Attrs, new: &Attrs, schema: &SchemaRegistry) -> Vec<Mod> {
    let mut mods = Vec::new();
    for (attr, vals) in new.iter() {
        let missing: Vec<String> = vals
            .iter()
            .filter(|val| !current.contains_value(attr, val, schema))
            .cloned()
            .collect();
        if !missing.is_empty() {
            mods.push(Mod::add(attr, AttrValues::Concrete(missing)));
        }
    }
    mods
}

/// Build a list deleting only the values known to exist on the entry.
/// The delete-all sentinel passes through whenever the attribute is
/// present at all; attributes with nothing left to delete are omitted.
pub fn delete_modlist(
    current: &Attrs,
    del: Vec<(String, AttrValues)>,
    schema: &SchemaRegistry,
) -> Vec<Mod> {
    let mut mods = Vec::new();
    for (attr, values) in del {
        if !current.contains_attr(&attr) {
            continue;
        }
        match values {
            AttrValues::All => mods.push(Mod::delete_all(attr)),
            AttrValues::Concrete(vals) => {
                let present: Vec<String> = vals
                    .into_iter()
                    .filter(|val| current.contains_value(&attr, val, schema))
                    .collect();
                if !present.is_empty() {
                    mods.push(Mod::delete(attr, AttrValues::Concrete(present)));
                }
            }
        }
    }
    mods
}

/// Lower a modification list to its wire form, applying the empty-list
/// policy.
///
/// The sentinel lowers to the empty value set the protocol expects for
/// "all values". An *empty concrete list* is a different thing and is
/// resolved by the policy: dropped, dropped with a warning, refused
/// locally, or forwarded to the server as given.
pub(crate) fn to_wire(mods: Vec<Mod>, policy: EmptyListPolicy) -> Result<Vec<ModSpec>> {
    let mut out = Vec::with_capacity(mods.len());
    for m in mods {
        if m.op == ModOp::Add && m.values.is_all() {
            return Err(LdapError::InvalidValue(format!(
                "cannot add the delete-all sentinel to {}",
                m.attr
            )));
        }
        if m.values.is_empty() {
            match policy {
                EmptyListPolicy::Ignore => continue,
                EmptyListPolicy::Warn => {
                    warn!("dropping {:?} of {} with an empty value list", m.op, m.attr);
                    continue;
                }
                EmptyListPolicy::Error => {
                    return Err(LdapError::InvalidValue(format!(
                        "empty value list for {:?} of {}",
                        m.op, m.attr
                    )));
                }
                EmptyListPolicy::Forward => (),
            }
        }
        out.push(ModSpec {
            op: m.op,
            attr: m.attr,
            values: m
                .values
                .values()
                .iter()
                .map(|v| v.as_bytes().to_vec())
                .collect(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    fn schema() -> SchemaRegistry {
        SchemaRegistry::with_core()
    }

    fn entry() -> Attrs {
        Attrs::from_pairs(
            vec![("description", vec!["a"]), ("cn", vec!["foo"])],
            &schema(),
        )
        .unwrap()
    }

    #[test]
    fn add_drops_present_values() {
        let schema = schema();
        let new = Attrs::from_pairs(vec![("description", vec!["A", "b"])], &schema).unwrap();
        let mods = add_modlist(&entry(), &new, &schema);
        assert_eq!(mods.len(), 1);
        assert_eq!(
            mods[0],
            Mod::add("description", AttrValues::Concrete(vec!["b".into()]))
        );
    }

    #[test]
    fn add_skips_fully_present() {
        let schema = schema();
        let new = Attrs::from_pairs(vec![("description", vec!["A"])], &schema).unwrap();
        assert!(add_modlist(&entry(), &new, &schema).is_empty());
    }

    #[test]
    fn add_new_attribute_passes_through() {
        let schema = schema();
        let new = Attrs::from_pairs(vec![("seeAlso", vec!["cn=x"])], &schema).unwrap();
        let mods = add_modlist(&entry(), &new, &schema);
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].op, ModOp::Add);
    }

    #[test]
    fn delete_drops_absent_values() {
        let schema = schema();
        let mods = delete_modlist(
            &entry(),
            vec![("description".into(), vec!["a", "z"].into())],
            &schema,
        );
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].values.values(), &["a".to_owned()]);
    }

    #[test]
    fn delete_absent_attribute_skipped() {
        let schema = schema();
        let mods = delete_modlist(
            &entry(),
            vec![("mail".into(), AttrValues::All)],
            &schema,
        );
        assert!(mods.is_empty());
    }

    #[test]
    fn delete_all_passes_through() {
        let schema = schema();
        let mods = delete_modlist(
            &entry(),
            vec![("description".into(), AttrValues::All)],
            &schema,
        );
        assert_eq!(mods, vec![Mod::delete_all("description")]);
    }

    #[test]
    fn wire_sentinel_is_empty_set() {
        let wire = to_wire(
            vec![Mod::delete_all("description")],
            EmptyListPolicy::Error,
        )
        .unwrap();
        assert_eq!(wire.len(), 1);
        assert!(wire[0].values.is_empty());
    }

    #[test]
    fn wire_empty_list_policies() {
        let mods = || vec![Mod::add("description", AttrValues::Concrete(vec![]))];
        assert!(to_wire(mods(), EmptyListPolicy::Ignore).unwrap().is_empty());
        assert!(to_wire(mods(), EmptyListPolicy::Warn).unwrap().is_empty());
        assert!(to_wire(mods(), EmptyListPolicy::Error).is_err());
        let forwarded = to_wire(mods(), EmptyListPolicy::Forward).unwrap();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].op, ModOp::Add);
        assert!(forwarded[0].values.is_empty());
    }

    #[test]
    fn wire_add_sentinel_invalid() {
        let res = to_wire(
            vec![Mod {
                op: ModOp::Add,
                attr: "description".into(),
                values: AttrValues::All,
            }],
            EmptyListPolicy::Ignore,
        );
        assert!(matches!(res, Err(LdapError::InvalidValue(_))));
    }

    #[test]
    fn replace_empty_follows_policy() {
        let mods = || vec![Mod::replace("description", AttrValues::Concrete(vec![]))];
        assert!(to_wire(mods(), EmptyListPolicy::Ignore).unwrap().is_empty());
        assert!(to_wire(mods(), EmptyListPolicy::Error).is_err());
        // forwarded, an empty replace reaches the wire and deletes the attribute
        let wire = to_wire(mods(), EmptyListPolicy::Forward).unwrap();
        assert_eq!(wire.len(), 1);
        assert!(wire[0].values.is_empty());
        // the sentinel is the explicit way to delete via replace under any policy
        let wire = to_wire(
            vec![Mod::replace("description", AttrValues::All)],
            EmptyListPolicy::Error,
        )
        .unwrap();
        assert!(wire[0].values.is_empty());
    }
}
