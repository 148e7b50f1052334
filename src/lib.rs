//! A pure-Rust LDAP v3 client library using the Tokio stack, with a
//! schema-aware directory object model.
//!
//! ## Summary
//!
//! The library provides both synchronous and asynchronous interfaces.
//! [`LdapConn`](struct.LdapConn.html) is the starting point for all
//! synchronous operations. [`LdapConnAsync`](struct.LdapConnAsync.html)
//! is its asynchronous analogue, and [`Ldap`](struct.Ldap.html) is the
//! low-level asynchronous handle used internally by `LdapConn`, and
//! explicitly by the users of the asynchronous interface.
//!
//! On top of the protocol operations, [`LdapObject`](struct.LdapObject.html)
//! offers a local view of a directory entry with relative search
//! conventions and planner-backed modification methods, consulting the
//! schema in [`schema`](schema/index.html) for value comparison.
//!
//! The documentation is written for readers familiar with LDAP concepts
//! and terminology, which it won't attempt to explain.
//!
//! ## Compile-time features
//!
//! * __sync__ (enabled by default): synchronous API support.
//!
//! * __tls__ (enabled by default): TLS support, backed by the
//!   `native-tls` crate. Without it, only plain TCP connections and, on
//!   Unix-like platforms, Unix domain sockets are available.
//!
//! ## Examples
//!
//! ### Synchronous search
//!
//! ```rust,no_run
//! use canopy::{LdapConn, Scope, SearchEntry};
//! use canopy::result::Result;
//!
//! fn main() -> Result<()> {
//!     let mut ldap = LdapConn::new("ldap://localhost:2389")?;
//!     let (rs, _res) = ldap.search(
//!         "ou=Places,dc=example,dc=org",
//!         Scope::Subtree,
//!         "(&(objectClass=locality)(l=ma*))",
//!         vec!["l"]
//!     )?.success()?;
//!     for entry in rs {
//!         println!("{:?}", SearchEntry::construct(entry));
//!     }
//!     Ok(ldap.unbind()?)
//! }
//! ```
//!
//! ### Asynchronous search
//!
//! ```rust,no_run
//! use canopy::{LdapConnAsync, Scope, SearchEntry};
//! use canopy::result::Result;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (conn, mut ldap) = LdapConnAsync::new("ldap://localhost:2389").await?;
//!     canopy::drive!(conn);
//!     let (rs, _res) = ldap.search(
//!         "ou=Places,dc=example,dc=org",
//!         Scope::Subtree,
//!         "(&(objectClass=locality)(l=ma*))",
//!         vec!["l"]
//!     ).await?.success()?;
//!     for entry in rs {
//!         println!("{:?}", SearchEntry::construct(entry));
//!     }
//!     Ok(ldap.unbind().await?)
//! }
//! ```

#[doc(hidden)]
pub use log;
#[doc(hidden)]
pub use tokio;

/// Type alias for the LDAP message ID.
pub type RequestId = i32;

pub mod attrs;
mod conn;
pub mod config;
pub mod controls;
pub mod dn;
pub mod exop;
mod filter;
mod ldap;
pub mod modify;
mod object;
mod protocol;
pub mod result;
pub mod schema;
mod search;
#[cfg(feature = "sync")]
mod sync;
mod util;

pub use attrs::{AttrValues, Attrs, DELETE_ALL};
pub use config::{Defaults, DefaultsBuilder, EmptyListPolicy};
pub use conn::{LdapConnAsync, LdapConnSettings, UnsolicitedNotice};
pub use dn::{Dn, Rdn};
pub use filter::{Filter, FilterMode, parse as parse_filter, parse_with as parse_filter_with};
pub use ldap::{ConnState, Ldap, RootDse, SaslProvider};
pub use modify::{Mod, add_modlist, delete_modlist, modlist};
pub use object::LdapObject;
pub use protocol::{ModOp, ProtocolOp};
pub use result::{LdapError, LdapResult, ResultCode, SearchResult};
pub use search::{
    DerefAliases, ResultEntry, Scope, SearchEntry, SearchOptions, SearchStream, SinkMode,
    StreamState,
};
#[cfg(feature = "sync")]
pub use sync::{EntryStream, LdapConn};
pub use util::{LdapUrlExt, LdapUrlParams, dn_escape, get_url_params, ldap_escape, ldap_unescape};
