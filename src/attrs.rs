//! Attribute maps.
//!
//! [`Attrs`] maps attribute descriptions to value lists. Keys compare
//! case-insensitively while preserving both their given spelling and the
//! insertion order, so the wire order of a request built from a map is
//! deterministic. Value lists behave as sets under the attribute type's
//! equality matching rule: adding an equal value is a no-op.
//!
//! [`AttrValues`] is the polymorphic value-list type accepted by the
//! modification surface: either a concrete list or the delete-all
//! sentinel. The sentinel is only meaningful in modifications; storing
//! it in a map fails with
//! [`InvalidValue`](crate::result::LdapError::InvalidValue).

use crate::result::{LdapError, Result};
use crate::schema::SchemaRegistry;

/// A value list, or the sentinel standing for all current values of an
/// attribute.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrValues {
    Concrete(Vec<String>),
    All,
}

/// Sentinel meaning "all current values of this attribute".
pub const DELETE_ALL: AttrValues = AttrValues::All;

impl AttrValues {
    /// The concrete values; the sentinel has none.
    pub fn values(&self) -> &[String] {
        match self {
            AttrValues::Concrete(v) => v,
            AttrValues::All => &[],
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, AttrValues::All)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, AttrValues::Concrete(v) if v.is_empty())
    }
}

impl From<Vec<String>> for AttrValues {
    fn from(v: Vec<String>) -> AttrValues {
        AttrValues::Concrete(v)
    }
}

impl From<Vec<&str>> for AttrValues {
    fn from(v: Vec<&str>) -> AttrValues {
        AttrValues::Concrete(v.into_iter().map(str::to_owned).collect())
    }
}

/// Case-insensitive, order-preserving attribute map.
#[derive(Clone, Debug, Default)]
pub struct Attrs {
    entries: Vec<(String, Vec<String>)>,
}

impl Attrs {
    pub fn new() -> Attrs {
        Attrs::default()
    }

    /// Build a map from attribute/values pairs, deduplicating values
    /// under the schema's equality rules.
    pub fn from_pairs<A, V>(pairs: Vec<(A, Vec<V>)>, schema: &SchemaRegistry) -> Result<Attrs>
    where
        A: Into<String>,
        V: Into<String>,
    {
        let mut attrs = Attrs::new();
        for (attr, vals) in pairs {
            let vals = vals.into_iter().map(Into::into).collect::<Vec<String>>();
            attrs.insert(&attr.into(), AttrValues::Concrete(vals), schema)?;
        }
        Ok(attrs)
    }

    fn position(&self, attr: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(attr))
    }

    /// The values of an attribute, if present.
    pub fn get(&self, attr: &str) -> Option<&Vec<String>> {
        self.position(attr).map(|ix| &self.entries[ix].1)
    }

    /// The values of an attribute, or an empty slice if it is absent.
    pub fn get_attr(&self, attr: &str) -> &[String] {
        self.get(attr).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether the attribute is present with at least one value.
    pub fn contains_attr(&self, attr: &str) -> bool {
        !self.get_attr(attr).is_empty()
    }

    /// Replace the values of an attribute. The delete-all sentinel is
    /// not a value and is refused; duplicates under the attribute's
    /// equality rule are dropped.
    pub fn insert(
        &mut self,
        attr: &str,
        values: AttrValues,
        schema: &SchemaRegistry,
    ) -> Result<()> {
        let values = match values {
            AttrValues::All => {
                return Err(LdapError::InvalidValue(format!(
                    "the delete-all sentinel is not a value for {}",
                    attr
                )));
            }
            AttrValues::Concrete(v) => v,
        };
        let mut deduped: Vec<String> = Vec::with_capacity(values.len());
        for val in values {
            if !deduped.iter().any(|have| schema.equal(attr, have, &val)) {
                deduped.push(val);
            }
        }
        match self.position(attr) {
            Some(ix) => self.entries[ix].1 = deduped,
            None => self.entries.push((attr.to_owned(), deduped)),
        }
        Ok(())
    }

    /// Remove an attribute and return its values.
    pub fn remove(&mut self, attr: &str) -> Option<Vec<String>> {
        self.position(attr).map(|ix| self.entries.remove(ix).1)
    }

    /// Drop all attributes.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Whether the attribute holds a value equal to `value` under its
    /// equality rule.
    pub fn contains_value(&self, attr: &str, value: &str, schema: &SchemaRegistry) -> bool {
        self.get_attr(attr)
            .iter()
            .any(|have| schema.equal(attr, have, value))
    }

    /// Add a value unless an equal one is already present.
    pub fn add_value(&mut self, attr: &str, value: String, schema: &SchemaRegistry) {
        if self.contains_value(attr, &value, schema) {
            return;
        }
        match self.position(attr) {
            Some(ix) => self.entries[ix].1.push(value),
            None => self.entries.push((attr.to_owned(), vec![value])),
        }
    }

    /// Remove the value equal to `value` under the attribute's equality
    /// rule. The attribute itself is removed with its last value.
    /// Returns whether a value was removed.
    pub fn remove_value(&mut self, attr: &str, value: &str, schema: &SchemaRegistry) -> bool {
        let Some(ix) = self.position(attr) else {
            return false;
        };
        let vals = &mut self.entries[ix].1;
        let Some(vix) = vals.iter().position(|have| schema.equal(attr, have, value)) else {
            return false;
        };
        vals.remove(vix);
        if vals.is_empty() {
            self.entries.remove(ix);
        }
        true
    }

    /// Iterate attributes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, vals)| (name.as_str(), vals.as_slice()))
    }

    /// Iterate `(attribute, value)` pairs in insertion order.
    pub fn iter_values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter()
            .flat_map(|(name, vals)| vals.iter().map(move |v| (name, v.as_str())))
    }

    /// Attribute names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Map equality under the schema's matching rules: the same
    /// attributes (case-insensitively) with pairwise-matching value
    /// sets, regardless of order.
    pub fn matches(&self, other: &Attrs, schema: &SchemaRegistry) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.iter().all(|(attr, vals)| {
            let theirs = other.get_attr(attr);
            vals.len() == theirs.len()
                && vals
                    .iter()
                    .all(|v| theirs.iter().any(|t| schema.equal(attr, v, t)))
        })
    }
}

/// Key-insensitive, value-exact comparison.
impl PartialEq for Attrs {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.iter().all(|(attr, vals)| {
                other
                    .get(attr)
                    .map(|theirs| theirs.as_slice() == vals)
                    .unwrap_or(false)
            })
    }
}

impl Eq for Attrs {}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::SchemaRegistry;

    fn schema() -> SchemaRegistry {
        SchemaRegistry::with_core()
    }

    fn sample() -> Attrs {
        let schema = schema();
        Attrs::from_pairs(
            vec![("objectClass", vec!["top", "person"]), ("cn", vec!["John Doe"])],
            &schema,
        )
        .unwrap()
    }

    #[test]
    fn case_insensitive_keys() {
        let attrs = sample();
        assert!(attrs.contains_attr("OBJECTCLASS"));
        assert_eq!(attrs.get_attr("CN"), &["John Doe".to_owned()]);
    }

    #[test]
    fn insertion_order_preserved() {
        let attrs = sample();
        let keys: Vec<&str> = attrs.keys().collect();
        assert_eq!(keys, vec!["objectClass", "cn"]);
    }

    #[test]
    fn rule_aware_membership() {
        let schema = schema();
        let attrs = sample();
        // cn inherits caseIgnoreMatch through its supertype
        assert!(attrs.contains_value("cn", "JOHN  DOE", &schema));
        assert!(!attrs.contains_value("cn", "John", &schema));
    }

    #[test]
    fn add_equal_value_is_noop() {
        let schema = schema();
        let mut attrs = sample();
        attrs.add_value("cn", "JOHN DOE".into(), &schema);
        assert_eq!(attrs.get_attr("cn").len(), 1);
        attrs.add_value("cn", "Johnny".into(), &schema);
        assert_eq!(attrs.get_attr("cn").len(), 2);
    }

    #[test]
    fn insert_dedups() {
        let schema = schema();
        let mut attrs = Attrs::new();
        attrs
            .insert(
                "description",
                vec!["a", "A", "b"].into(),
                &schema,
            )
            .unwrap();
        assert_eq!(attrs.get_attr("description").len(), 2);
    }

    #[test]
    fn sentinel_rejected_as_value() {
        let schema = schema();
        let mut attrs = Attrs::new();
        assert!(matches!(
            attrs.insert("cn", DELETE_ALL, &schema),
            Err(LdapError::InvalidValue(_))
        ));
    }

    #[test]
    fn remove_last_value_drops_attr() {
        let schema = schema();
        let mut attrs = sample();
        assert!(attrs.remove_value("cn", "john doe", &schema));
        assert!(!attrs.contains_attr("cn"));
        assert!(!attrs.remove_value("cn", "john doe", &schema));
    }

    #[test]
    fn matches_under_rules() {
        let schema = schema();
        let a = sample();
        let b = Attrs::from_pairs(
            vec![("CN", vec!["JOHN DOE"]), ("objectclass", vec!["TOP", "person"])],
            &schema,
        )
        .unwrap();
        assert!(a.matches(&b, &schema));
        assert!(a != b);
    }
}
