//! Connection defaults.
//!
//! A [`Defaults`] value is an immutable bundle of per-connection policy,
//! built once with [`DefaultsBuilder`] and inherited by every handle
//! cloned from the connection. There is no process-wide mutable state.

use std::sync::Arc;

use crate::filter::FilterMode;
use crate::result::{LdapError, Result};
use crate::schema::SchemaRegistry;

/// What to do with an empty value list in a high-level modification.
///
/// The policy decides whether such an element is dropped silently,
/// dropped with a logged warning, refused before any I/O, or forwarded
/// to the server as given.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmptyListPolicy {
    /// Drop the element silently.
    #[default]
    Ignore,
    /// Drop the element and log a warning.
    Warn,
    /// Fail the operation locally.
    Error,
    /// Send the element as given and let the server judge it. An empty
    /// replace deletes the attribute; an empty add or delete is a
    /// protocol-level error the server will report.
    Forward,
}

/// Immutable per-connection defaults.
#[derive(Clone, Debug)]
pub struct Defaults {
    /// Skip the pre-fetch and dedup in high-level modifications.
    pub strict_modify: bool,
    /// Empty-value-list handling in the modification planner.
    pub empty_list: EmptyListPolicy,
    /// Filter syntax accepted by operations taking a filter string.
    pub filter_mode: FilterMode,
    /// High-water mark for bounded search response queues.
    pub search_high_water: usize,
    /// SASL mechanism assumed for `ldapi://` connections.
    pub ldapi_sasl_mech: String,
    /// Schema consulted for value comparison and validation.
    pub schema: Arc<SchemaRegistry>,
}

impl Default for Defaults {
    fn default() -> Defaults {
        Defaults {
            strict_modify: false,
            empty_list: EmptyListPolicy::default(),
            filter_mode: FilterMode::default(),
            search_high_water: 256,
            ldapi_sasl_mech: String::from("EXTERNAL"),
            schema: Arc::new(SchemaRegistry::with_core()),
        }
    }
}

impl Defaults {
    pub fn new() -> Defaults {
        Defaults::default()
    }

    pub fn builder() -> DefaultsBuilder {
        DefaultsBuilder::default()
    }
}

/// Builder for [`Defaults`].
///
/// Setting the empty-list policy twice to different values is a
/// configuration conflict and fails at [`build()`](#method.build), before
/// a connection can be created with it.
#[derive(Clone, Debug, Default)]
pub struct DefaultsBuilder {
    defaults: Defaults,
    empty_list_set: Option<EmptyListPolicy>,
    empty_list_conflict: bool,
}

impl DefaultsBuilder {
    /// Skip the pre-fetch and dedup in high-level modifications.
    pub fn strict_modify(mut self, strict: bool) -> Self {
        self.defaults.strict_modify = strict;
        self
    }

    /// Set the empty-value-list policy.
    pub fn empty_list_policy(mut self, policy: EmptyListPolicy) -> Self {
        if let Some(prev) = self.empty_list_set {
            if prev != policy {
                self.empty_list_conflict = true;
            }
        }
        self.empty_list_set = Some(policy);
        self.defaults.empty_list = policy;
        self
    }

    /// Set the filter syntax accepted by operations taking a filter string.
    pub fn filter_mode(mut self, mode: FilterMode) -> Self {
        self.defaults.filter_mode = mode;
        self
    }

    /// Set the high-water mark for bounded search response queues.
    pub fn search_high_water(mut self, hwm: usize) -> Self {
        self.defaults.search_high_water = hwm;
        self
    }

    /// Set the SASL mechanism assumed for `ldapi://` connections.
    pub fn ldapi_sasl_mech<S: Into<String>>(mut self, mech: S) -> Self {
        self.defaults.ldapi_sasl_mech = mech.into();
        self
    }

    /// Use the given schema registry for value comparison and validation.
    pub fn schema(mut self, schema: Arc<SchemaRegistry>) -> Self {
        self.defaults.schema = schema;
        self
    }

    pub fn build(self) -> Result<Defaults> {
        if self.empty_list_conflict {
            return Err(LdapError::InvalidValue(
                "conflicting empty-list policies configured".into(),
            ));
        }
        if self.defaults.search_high_water == 0 {
            return Err(LdapError::InvalidValue(
                "search high-water mark must be positive".into(),
            ));
        }
        Ok(self.defaults)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn conflicting_empty_list_rejected() {
        let res = Defaults::builder()
            .empty_list_policy(EmptyListPolicy::Warn)
            .empty_list_policy(EmptyListPolicy::Error)
            .build();
        assert!(res.is_err());
    }

    #[test]
    fn repeated_same_policy_allowed() {
        let res = Defaults::builder()
            .empty_list_policy(EmptyListPolicy::Warn)
            .empty_list_policy(EmptyListPolicy::Warn)
            .build();
        assert!(res.is_ok());
    }
}
