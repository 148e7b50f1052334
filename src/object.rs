//! Directory objects: a mutable local view of an entry.
//!
//! An [`LdapObject`] couples a DN and an attribute map with an optional
//! connection handle and a relative search scope. Its high-level
//! modification methods plan a minimal change against the known server
//! state (fetching the referenced attributes first when they aren't
//! cached), send a single Modify, and mirror the applied change locally
//! on success.

use std::sync::Arc;

use crate::attrs::{AttrValues, Attrs};
use crate::dn::{Dn, Rdn};
use crate::ldap::Ldap;
use crate::modify::{self, Mod};
use crate::protocol::ModOp;
use crate::result::{CompareResult, LdapError, LdapResult, Result};
use crate::schema::SchemaRegistry;
use crate::search::{Scope, SearchEntry};

impl Ldap {
    /// Create a directory object bound to this connection, without
    /// querying the server.
    pub fn obj(&self, dn: &str) -> Result<LdapObject> {
        Ok(LdapObject {
            dn: Dn::parse(dn)?,
            attrs: Attrs::new(),
            schema: self.defaults.schema.clone(),
            ldap: Some(self.clone()),
            relative_scope: Scope::Subtree,
            rdn_attr: None,
        })
    }

    /// Fetch a single entry by DN. Fails with
    /// [`NoResults`](LdapError::NoResults) if the entry does not exist.
    pub async fn get<S: AsRef<str> + Send + Sync>(
        &mut self,
        dn: &str,
        attrs: &[S],
    ) -> Result<LdapObject> {
        let (mut entries, _res) = self
            .search(dn, Scope::Base, "(objectClass=*)", attrs)
            .await?
            .success()?;
        let entry = match entries.len() {
            0 => return Err(LdapError::NoResults),
            1 => entries.remove(0),
            _ => return Err(LdapError::MultipleResults),
        };
        let mut obj = self.obj(dn)?;
        obj.absorb(SearchEntry::construct(entry))?;
        Ok(obj)
    }
}

/// A single directory entry with optional server affinity.
///
/// Attribute values are kept in an [`Attrs`] map; presence of an
/// attribute in the map means the local view of that attribute is
/// complete, which is what the non-strict modification planner relies
/// on.
#[derive(Clone, Debug)]
pub struct LdapObject {
    dn: Dn,
    /// The local attribute map.
    pub attrs: Attrs,
    schema: Arc<SchemaRegistry>,
    ldap: Option<Ldap>,
    relative_scope: Scope,
    rdn_attr: Option<String>,
}

impl LdapObject {
    /// Create an unbound object. Methods touching the server fail with
    /// [`NotBound`](LdapError::NotBound) until a connection is attached.
    pub fn new(dn: &str, attrs: Attrs) -> Result<LdapObject> {
        Ok(LdapObject {
            dn: Dn::parse(dn)?,
            attrs,
            schema: Arc::new(SchemaRegistry::with_core()),
            ldap: None,
            relative_scope: Scope::Subtree,
            rdn_attr: None,
        })
    }

    /// Attach a connection handle.
    pub fn bind_connection(&mut self, ldap: &Ldap) {
        self.schema = ldap.defaults.schema.clone();
        self.ldap = Some(ldap.clone());
    }

    /// Set the default scope for relative searches.
    pub fn with_relative_scope(mut self, scope: Scope) -> Self {
        self.relative_scope = scope;
        self
    }

    /// Set the attribute assumed for bare RDN values in relative
    /// operations.
    pub fn with_rdn_attr<S: Into<String>>(mut self, attr: S) -> Self {
        self.rdn_attr = Some(attr.into());
        self
    }

    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    pub fn relative_scope(&self) -> Scope {
        self.relative_scope
    }

    fn ldap(&self) -> Result<Ldap> {
        self.ldap.clone().ok_or(LdapError::NotBound)
    }

    /// Resolve an RDN or bare RDN value against `rdn_attr`.
    fn full_rdn(&self, rdn: &str) -> Result<Rdn> {
        if rdn.contains('=') {
            Rdn::parse(rdn)
        } else {
            match self.rdn_attr {
                Some(ref attr) => Ok(Rdn::new(attr.clone(), rdn)),
                None => Err(LdapError::InvalidDN(format!(
                    "no rdn_attr set, need a full attr=value RDN: {}",
                    rdn
                ))),
            }
        }
    }

    /// The absolute DN of a child named by `rdn`.
    pub fn child_dn(&self, rdn: &str) -> Result<Dn> {
        Ok(self.dn.child(self.full_rdn(rdn)?))
    }

    fn absorb(&mut self, entry: SearchEntry) -> Result<()> {
        for (attr, vals) in entry.attrs {
            self.attrs
                .insert(&attr, AttrValues::Concrete(vals), &self.schema)?;
        }
        Ok(())
    }

    /// Search relative to this object, with its DN as the base and its
    /// relative scope.
    pub async fn search<S: AsRef<str> + Send + Sync>(
        &self,
        filter: &str,
        attrs: &[S],
    ) -> Result<Vec<SearchEntry>> {
        let mut ldap = self.ldap()?;
        let (entries, _res) = ldap
            .search(&self.dn.to_string(), self.relative_scope, filter, attrs)
            .await?
            .success()?;
        Ok(entries.into_iter().map(SearchEntry::construct).collect())
    }

    /// Query the server for the child object named by `rdn`.
    pub async fn get_child<S: AsRef<str> + Send + Sync>(
        &self,
        rdn: &str,
        attrs: &[S],
    ) -> Result<LdapObject> {
        let mut ldap = self.ldap()?;
        let dn = self.child_dn(rdn)?;
        let mut child = ldap.get(&dn.to_string(), attrs).await?;
        child.relative_scope = self.relative_scope;
        child.rdn_attr = self.rdn_attr.clone();
        Ok(child)
    }

    /// Find a descendant by RDN: a direct lookup in one-level scope, or
    /// a subtree search expected to match exactly once.
    pub async fn find<S: AsRef<str> + Send + Sync>(
        &self,
        rdn: &str,
        attrs: &[S],
    ) -> Result<LdapObject> {
        match self.relative_scope {
            Scope::Base => Err(LdapError::NoResults),
            Scope::OneLevel => self.get_child(rdn, attrs).await,
            Scope::Subtree => {
                let rdn = self.full_rdn(rdn)?;
                let filter = format!(
                    "({}={})",
                    rdn.attr(),
                    crate::util::ldap_escape(rdn.value())
                );
                let mut found = self.search(&filter, attrs).await?;
                match found.len() {
                    0 => Err(LdapError::NoResults),
                    1 => {
                        let entry = found.remove(0);
                        let mut obj = self.ldap()?.obj(&entry.dn)?;
                        obj.absorb(entry)?;
                        obj.relative_scope = self.relative_scope;
                        obj.rdn_attr = self.rdn_attr.clone();
                        Ok(obj)
                    }
                    _ => Err(LdapError::MultipleResults),
                }
            }
        }
    }

    /// Create a new entry directly below this one.
    pub async fn add_child(&self, rdn: &str, attrs: Vec<(&str, Vec<&str>)>) -> Result<LdapResult> {
        let mut ldap = self.ldap()?;
        let dn = self.child_dn(rdn)?;
        ldap.add(&dn.to_string(), attrs).await
    }

    /// Compare an attribute value on the server.
    pub async fn compare(&self, attr: &str, value: &str) -> Result<CompareResult> {
        let mut ldap = self.ldap()?;
        ldap.compare(&self.dn.to_string(), attr, value).await
    }

    /// Re-read the given attributes (or all user attributes) from the
    /// server into the local map.
    pub async fn refresh<S: AsRef<str> + Send + Sync>(&mut self, attrs: &[S]) -> Result<()> {
        let mut ldap = self.ldap()?;
        let fresh = ldap.get(&self.dn.to_string(), attrs).await?;
        for (attr, vals) in fresh.attrs.iter() {
            self.attrs
                .insert(attr, AttrValues::Concrete(vals.to_vec()), &self.schema)?;
        }
        Ok(())
    }

    /// Re-read all user and operational attributes.
    pub async fn refresh_all(&mut self) -> Result<()> {
        self.refresh(&["*", "+"]).await
    }

    /// Fetch only the attributes not already known locally.
    pub async fn refresh_missing<S: AsRef<str>>(&mut self, attrs: &[S]) -> Result<()> {
        let missing: Vec<&str> = attrs
            .iter()
            .map(AsRef::as_ref)
            .filter(|attr| !self.attrs.contains_attr(attr))
            .collect();
        if !missing.is_empty() {
            self.refresh(&missing).await?;
        }
        Ok(())
    }

    /// Apply a raw modification list to the server and mirror it
    /// locally on success.
    pub async fn modify(&mut self, mods: Vec<Mod>) -> Result<LdapResult> {
        let mut ldap = self.ldap()?;
        let res = ldap.modify(&self.dn.to_string(), mods.clone()).await?;
        if res.rc.is_success() {
            self.apply_local(mods)?;
        }
        Ok(res)
    }

    /// Add attribute values, skipping values the entry already holds.
    ///
    /// In the default non-strict mode the referenced attributes are
    /// fetched first if unknown, so the resulting Modify contains only
    /// the genuinely new values; if nothing remains, no request is sent.
    pub async fn add_attrs(&mut self, attrs: Vec<(&str, Vec<&str>)>) -> Result<Option<LdapResult>> {
        let strict = self.ldap()?.defaults.strict_modify;
        let new = Attrs::from_pairs(attrs, &self.schema)?;
        let mods = if strict {
            new.iter()
                .map(|(attr, vals)| Mod::add(attr, AttrValues::Concrete(vals.to_vec())))
                .collect()
        } else {
            let keys: Vec<&str> = new.keys().collect();
            let keys: Vec<String> = keys.iter().map(|s| s.to_string()).collect();
            self.refresh_missing(&keys).await?;
            modify::add_modlist(&self.attrs, &new, &self.schema)
        };
        if mods.is_empty() {
            return Ok(None);
        }
        self.modify(mods).await.map(Some)
    }

    /// Delete attribute values, skipping values the entry doesn't hold.
    /// The delete-all sentinel deletes whole attributes.
    pub async fn delete_attrs(
        &mut self,
        attrs: Vec<(&str, AttrValues)>,
    ) -> Result<Option<LdapResult>> {
        let strict = self.ldap()?.defaults.strict_modify;
        let del: Vec<(String, AttrValues)> = attrs
            .into_iter()
            .map(|(attr, vals)| (attr.to_owned(), vals))
            .collect();
        let mods = if strict {
            modify::modlist(ModOp::Delete, del)
        } else {
            let keys: Vec<String> = del.iter().map(|(attr, _)| attr.clone()).collect();
            self.refresh_missing(&keys).await?;
            modify::delete_modlist(&self.attrs, del, &self.schema)
        };
        if mods.is_empty() {
            return Ok(None);
        }
        self.modify(mods).await.map(Some)
    }

    /// Replace attribute values wholesale. A replace never needs the
    /// current state, so no pre-fetch is performed.
    pub async fn replace_attrs(
        &mut self,
        attrs: Vec<(&str, AttrValues)>,
    ) -> Result<Option<LdapResult>> {
        let mods = modify::modlist(
            ModOp::Replace,
            attrs
                .into_iter()
                .map(|(attr, vals)| (attr.to_owned(), vals))
                .collect(),
        );
        if mods.is_empty() {
            return Ok(None);
        }
        self.modify(mods).await.map(Some)
    }

    /// Mirror an applied modification list into the local map.
    fn apply_local(&mut self, mods: Vec<Mod>) -> Result<()> {
        for m in mods {
            match (m.op, m.values) {
                (ModOp::Add, AttrValues::Concrete(vals)) => {
                    for val in vals {
                        self.attrs.add_value(&m.attr, val, &self.schema);
                    }
                }
                (ModOp::Add, AttrValues::All) => {
                    return Err(LdapError::InvalidValue(format!(
                        "cannot add the delete-all sentinel to {}",
                        m.attr
                    )));
                }
                (ModOp::Delete, AttrValues::All) => {
                    self.attrs.remove(&m.attr);
                }
                (ModOp::Delete, AttrValues::Concrete(vals)) => {
                    for val in vals {
                        self.attrs.remove_value(&m.attr, &val, &self.schema);
                    }
                }
                (ModOp::Replace, AttrValues::All) => {
                    self.attrs.remove(&m.attr);
                }
                (ModOp::Replace, AttrValues::Concrete(vals)) => {
                    if vals.is_empty() {
                        self.attrs.remove(&m.attr);
                    } else {
                        self.attrs
                            .insert(&m.attr, AttrValues::Concrete(vals), &self.schema)?;
                    }
                }
                (ModOp::Increment, _) => {
                    // the server computes the new value; forget ours
                    self.attrs.remove(&m.attr);
                }
            }
        }
        Ok(())
    }

    /// Delete the entry from the server and render this instance
    /// unbound and empty.
    pub async fn delete(&mut self) -> Result<LdapResult> {
        let mut ldap = self.ldap()?;
        let res = ldap.delete(&self.dn.to_string()).await?;
        if res.rc.is_success() {
            self.attrs.clear();
            self.dn = Dn::root();
            self.ldap = None;
        }
        Ok(res)
    }

    /// Change the object's RDN, and possibly its location in the tree.
    pub async fn mod_dn(
        &mut self,
        new_rdn: &str,
        delete_old: bool,
        new_parent: Option<&str>,
    ) -> Result<LdapResult> {
        let mut ldap = self.ldap()?;
        let new_rdn = self.full_rdn(new_rdn)?;
        let parent = match new_parent {
            Some(p) => Dn::parse(p)?,
            None => self.dn.parent().ok_or_else(|| {
                LdapError::InvalidDN("cannot rename the root DSE".into())
            })?,
        };
        let res = ldap
            .modifydn(
                &self.dn.to_string(),
                &new_rdn.to_string(),
                delete_old,
                new_parent.map(|_| parent.to_string()).as_deref(),
            )
            .await?;
        if !res.rc.is_success() {
            return Ok(res);
        }
        if delete_old {
            if let Some(old_rdn) = self.dn.rdn() {
                for ava in old_rdn.avas() {
                    self.attrs.remove_value(&ava.attr, &ava.value, &self.schema);
                }
            }
        }
        for ava in new_rdn.avas() {
            self.attrs
                .add_value(&ava.attr, ava.value.clone(), &self.schema);
        }
        self.dn = parent.child(new_rdn);
        Ok(res)
    }

    /// Rename in place.
    pub async fn rename(&mut self, new_rdn: &str, delete_old: bool) -> Result<LdapResult> {
        self.mod_dn(new_rdn, delete_old, None).await
    }

    /// Move the whole entry to a new DN.
    pub async fn move_to(&mut self, new_dn: &str, delete_old: bool) -> Result<LdapResult> {
        let new_dn = Dn::parse(new_dn)?;
        let rdn = new_dn
            .rdn()
            .ok_or_else(|| LdapError::InvalidDN("cannot move to the root DSE".into()))?
            .clone();
        let parent = new_dn.parent().unwrap_or_else(Dn::root).to_string();
        self.mod_dn(&rdn.to_string(), delete_old, Some(&parent)).await
    }

    /// Whether the entry carries the given object class, fetching
    /// `objectClass` if not locally known.
    pub async fn has_object_class(&mut self, object_class: &str) -> Result<bool> {
        self.refresh_missing(&["objectClass"]).await?;
        Ok(self
            .attrs
            .contains_value("objectClass", object_class, &self.schema))
    }

    /// Validate the local view against the schema: every value must
    /// satisfy its attribute syntax, and every MUST attribute of the
    /// object's classes has to be present. Unknown attribute types and
    /// classes only produce logged warnings; the server is
    /// authoritative.
    pub fn validate(&self) -> Result<()> {
        for (attr, value) in self.attrs.iter_values() {
            self.schema.validate_value(attr, value)?;
        }
        for oc_name in self.attrs.get_attr("objectClass") {
            let Some(oc) = self.schema.object_class(oc_name) else {
                log::warn!("unknown object class {} not validated", oc_name);
                continue;
            };
            for must in &oc.must {
                if !self.attrs.contains_attr(must) {
                    return Err(LdapError::InvalidValue(format!(
                        "missing required attribute {} of object class {}",
                        must, oc_name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Render the local view in LDIF.
    pub fn format_ldif(&self) -> String {
        let mut lines = vec![format!("dn: {}", self.dn)];
        for (attr, val) in self.attrs.iter_values() {
            lines.push(format!("{}: {}", attr, val));
        }
        lines.push(String::new());
        lines.join("\n")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn unbound() -> LdapObject {
        let schema = SchemaRegistry::with_core();
        let attrs = Attrs::from_pairs(
            vec![
                ("objectClass", vec!["top", "person"]),
                ("cn", vec!["foo"]),
                ("sn", vec!["Foo"]),
                ("description", vec!["a"]),
            ],
            &schema,
        )
        .unwrap();
        LdapObject::new("cn=foo,dc=example,dc=org", attrs).unwrap()
    }

    #[test]
    fn child_dn_composition() {
        let obj = unbound().with_rdn_attr("cn");
        assert_eq!(
            obj.child_dn("bar").unwrap().to_string(),
            "cn=bar,cn=foo,dc=example,dc=org"
        );
        assert_eq!(
            obj.child_dn("uid=baz").unwrap().to_string(),
            "uid=baz,cn=foo,dc=example,dc=org"
        );
    }

    #[test]
    fn bare_rdn_needs_rdn_attr() {
        let obj = unbound();
        assert!(obj.child_dn("bar").is_err());
    }

    #[test]
    fn local_modify_mirrors() {
        let mut obj = unbound();
        obj.apply_local(vec![
            Mod::add("description", vec!["b"]),
            Mod::delete("description", vec!["a"]),
            Mod::replace("sn", vec!["Bar"]),
        ])
        .unwrap();
        assert_eq!(obj.attrs.get_attr("description"), &["b".to_owned()]);
        assert_eq!(obj.attrs.get_attr("sn"), &["Bar".to_owned()]);
    }

    #[test]
    fn local_delete_all_removes_attr() {
        let mut obj = unbound();
        obj.apply_local(vec![Mod::delete_all("description")]).unwrap();
        assert!(!obj.attrs.contains_attr("description"));
    }

    #[test]
    fn validate_must_attrs() {
        let obj = unbound();
        obj.validate().unwrap();
        let mut broken = obj.clone();
        broken.attrs.remove("sn");
        assert!(broken.validate().is_err());
    }

    #[test]
    fn ldif_rendering() {
        let text = unbound().format_ldif();
        assert!(text.starts_with("dn: cn=foo,dc=example,dc=org\n"));
        assert!(text.contains("\ndescription: a\n"));
    }

    #[test]
    fn unbound_server_methods_fail() {
        let obj = unbound();
        assert!(matches!(obj.ldap(), Err(LdapError::NotBound)));
    }
}
