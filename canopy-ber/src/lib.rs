//! Encoding and decoding for the subset of BER used by LDAP.
//!
//! LDAP restricts BER considerably: only definite lengths may be sent,
//! implicit tagging is the norm, and a handful of universal types cover
//! the whole protocol. This crate models exactly that subset. Values are
//! built from typed wrappers ([`types::Tag`]) which lower into the
//! serializable [`structure::StructureTag`] form; the parser produces
//! `StructureTag`s directly.
//!
//! The parser is written with `nom`'s streaming combinators: handed a
//! partial buffer it returns `Err(nom::Err::Incomplete(Needed))` with the
//! number of further bytes required, which lets a network reader frame
//! messages without buffering entire values up front. Indefinite lengths
//! are accepted on read for constructed values, since some servers stream
//! responses that way, but are never produced on write.

pub mod parse;
pub mod structure;
pub mod tag;
pub mod types;
pub mod write;

pub use nom::IResult;

pub use parse::Parser;
