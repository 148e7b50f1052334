//! Operation result structures and the library error type.
//!
//! Most LDAP operations return an [`LdapResult`](struct.LdapResult.html). This module
//! contains its definition, the [`ResultCode`](enum.ResultCode.html) enumeration, and
//! a number of wrapper structs and helper methods which adapt LDAP result and error
//! handling to be a closer match to Rust conventions.

use std::error::Error;
use std::fmt;
use std::io;
use std::result::Result as StdResult;

use crate::RequestId;
use crate::controls::Control;
use crate::exop::Exop;
use crate::protocol::{LdapOp, MaybeControls, ProtocolOp, ResultSender};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time;

/// Type alias for the standard `Result` with the fixed `LdapError` error part.
pub type Result<T> = std::result::Result<T, LdapError>;

/// Error variants recognized by the library.
#[derive(Debug, Error)]
pub enum LdapError {
    /// No path given for a `ldapi://` URL.
    #[error("empty Unix domain socket path")]
    EmptyUnixPath,

    /// A `ldapi://` URL contains a port spec, which it shouldn't.
    #[error("the port must be empty in the ldapi scheme")]
    PortInUnixPath,

    /// Encapsulated I/O error.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    /// Malformed BER data or a message not conforming to RFC 4511.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error while sending an operation to the connection driver.
    #[error("op send error: {source}")]
    OpSend {
        #[from]
        source:
            mpsc::error::SendError<(RequestId, LdapOp, ProtocolOp, MaybeControls, ResultSender)>,
    },

    /// Error while receiving operation results from the connection driver.
    #[error("result recv error: {source}")]
    ResultRecv {
        #[from]
        source: oneshot::error::RecvError,
    },

    /// Error while sending an internal ID scrubbing request to the connection driver.
    #[error("id scrub send error: {source}")]
    IdScrubSend {
        #[from]
        source: mpsc::error::SendError<RequestId>,
    },

    /// Operation or connection timeout.
    #[error("timeout: {elapsed}")]
    Timeout {
        #[from]
        elapsed: time::error::Elapsed,
    },

    /// The operation was abandoned locally.
    #[error("operation abandoned")]
    Abandoned,

    /// No free message ID on the connection.
    #[error("too many outstanding operations")]
    TooManyOutstanding,

    /// The connection has been closed, or closed while the operation was in flight.
    #[error("connection closed")]
    ConnectionClosed,

    /// A Bind is in flight; only unbind, abandon and StartTLS may be issued.
    #[error("bind in progress")]
    BindInProgress,

    /// Error parsing the string representation of a search filter.
    #[error("filter syntax error at position {pos}: expected {expected}")]
    FilterSyntax { pos: usize, expected: &'static str },

    /// URL parsing error.
    #[error("url parse error: {source}")]
    UrlParsing {
        #[from]
        source: url::ParseError,
    },

    /// Unknown LDAP URL scheme.
    #[error("unknown LDAP URL scheme: {0}")]
    UnknownScheme(String),

    #[cfg(feature = "tls")]
    /// Native TLS library error.
    #[error("native TLS error: {source}")]
    NativeTLS {
        #[from]
        source: native_tls::Error,
    },

    /// LDAP operation result with an error return code.
    #[error("LDAP operation result: {result}")]
    LdapResult {
        #[from]
        result: LdapResult,
    },

    /// Referral returned where automatic following is not available.
    #[error("referral: {0:?}")]
    Referral(Vec<String>),

    /// No values provided for the Add operation.
    #[error("empty value set for Add")]
    AddNoValues,

    /// Error converting an octet- or percent-decoded string to UTF-8.
    #[error("utf8 decoding error")]
    DecodingUTF8,

    /// Invalid scope string in LDAP URL.
    #[error("invalid scope string in LDAP URL: {0}")]
    InvalidScopeString(String),

    /// Unrecognized LDAP URL extension marked as critical.
    #[error("unrecognized critical LDAP URL extension: {0}")]
    UnrecognizedCriticalExtension(String),

    /// Malformed distinguished name.
    #[error("invalid DN: {0}")]
    InvalidDN(String),

    /// Invalid attribute value, or the delete-all sentinel used as a value.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Conflicting re-registration of a schema element.
    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    /// Value rejected by an attribute syntax.
    #[error("invalid syntax: {0}")]
    InvalidSyntax(String),

    /// SASL provider failure during a bind exchange.
    #[error("SASL negotiation failed: {0}")]
    SaslNegotiationFailed(String),

    /// A critical control is not supported by the peer.
    #[error("unsupported critical control: {0}")]
    UnsupportedControl(String),

    /// A directory object method requiring a connection was called on an
    /// unbound object.
    #[error("object not bound to a connection")]
    NotBound,

    /// A relative search expected exactly one result and found none.
    #[error("no search results")]
    NoResults,

    /// A relative search expected exactly one result and found several.
    #[error("multiple search results")]
    MultipleResults,
}

impl From<LdapError> for io::Error {
    fn from(le: LdapError) -> io::Error {
        match le {
            LdapError::Io { source, .. } => source,
            _ => io::Error::new(io::ErrorKind::Other, format!("{}", le)),
        }
    }
}

/// LDAP result codes, per RFC 4511 Appendix A.1.
///
/// Codes not named by the RFC decode to [`Other`](#variant.Other), which
/// carries the numeric value verbatim; converting back yields the same
/// number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    OperationsError,
    ProtocolError,
    TimeLimitExceeded,
    SizeLimitExceeded,
    CompareFalse,
    CompareTrue,
    AuthMethodNotSupported,
    StrongerAuthRequired,
    Referral,
    AdminLimitExceeded,
    UnavailableCriticalExtension,
    ConfidentialityRequired,
    SaslBindInProgress,
    NoSuchAttribute,
    UndefinedAttributeType,
    InappropriateMatching,
    ConstraintViolation,
    AttributeOrValueExists,
    InvalidAttributeSyntax,
    NoSuchObject,
    AliasProblem,
    InvalidDnSyntax,
    AliasDereferencingProblem,
    InappropriateAuthentication,
    InvalidCredentials,
    InsufficientAccessRights,
    Busy,
    Unavailable,
    UnwillingToPerform,
    LoopDetect,
    NamingViolation,
    ObjectClassViolation,
    NotAllowedOnNonLeaf,
    NotAllowedOnRdn,
    EntryAlreadyExists,
    ObjectClassModsProhibited,
    AffectsMultipleDsas,
    /// Any code without a name in RFC 4511, carried verbatim. This
    /// includes 80 ("other") and post-RFC codes such as 88 (canceled)
    /// and 122 (assertion failed).
    Other(u32),
}

impl ResultCode {
    pub fn from_u32(rc: u32) -> ResultCode {
        use ResultCode::*;
        match rc {
            0 => Success,
            1 => OperationsError,
            2 => ProtocolError,
            3 => TimeLimitExceeded,
            4 => SizeLimitExceeded,
            5 => CompareFalse,
            6 => CompareTrue,
            7 => AuthMethodNotSupported,
            8 => StrongerAuthRequired,
            10 => Referral,
            11 => AdminLimitExceeded,
            12 => UnavailableCriticalExtension,
            13 => ConfidentialityRequired,
            14 => SaslBindInProgress,
            16 => NoSuchAttribute,
            17 => UndefinedAttributeType,
            18 => InappropriateMatching,
            19 => ConstraintViolation,
            20 => AttributeOrValueExists,
            21 => InvalidAttributeSyntax,
            32 => NoSuchObject,
            33 => AliasProblem,
            34 => InvalidDnSyntax,
            36 => AliasDereferencingProblem,
            48 => InappropriateAuthentication,
            49 => InvalidCredentials,
            50 => InsufficientAccessRights,
            51 => Busy,
            52 => Unavailable,
            53 => UnwillingToPerform,
            54 => LoopDetect,
            64 => NamingViolation,
            65 => ObjectClassViolation,
            66 => NotAllowedOnNonLeaf,
            67 => NotAllowedOnRdn,
            68 => EntryAlreadyExists,
            69 => ObjectClassModsProhibited,
            71 => AffectsMultipleDsas,
            n => Other(n),
        }
    }

    pub fn as_u32(&self) -> u32 {
        use ResultCode::*;
        match *self {
            Success => 0,
            OperationsError => 1,
            ProtocolError => 2,
            TimeLimitExceeded => 3,
            SizeLimitExceeded => 4,
            CompareFalse => 5,
            CompareTrue => 6,
            AuthMethodNotSupported => 7,
            StrongerAuthRequired => 8,
            Referral => 10,
            AdminLimitExceeded => 11,
            UnavailableCriticalExtension => 12,
            ConfidentialityRequired => 13,
            SaslBindInProgress => 14,
            NoSuchAttribute => 16,
            UndefinedAttributeType => 17,
            InappropriateMatching => 18,
            ConstraintViolation => 19,
            AttributeOrValueExists => 20,
            InvalidAttributeSyntax => 21,
            NoSuchObject => 32,
            AliasProblem => 33,
            InvalidDnSyntax => 34,
            AliasDereferencingProblem => 36,
            InappropriateAuthentication => 48,
            InvalidCredentials => 49,
            InsufficientAccessRights => 50,
            Busy => 51,
            Unavailable => 52,
            UnwillingToPerform => 53,
            LoopDetect => 54,
            NamingViolation => 64,
            ObjectClassViolation => 65,
            NotAllowedOnNonLeaf => 66,
            NotAllowedOnRdn => 67,
            EntryAlreadyExists => 68,
            ObjectClassModsProhibited => 69,
            AffectsMultipleDsas => 71,
            Other(n) => n,
        }
    }

    fn name(&self) -> &'static str {
        use ResultCode::*;
        match *self {
            Success => "success",
            OperationsError => "operationsError",
            ProtocolError => "protocolError",
            TimeLimitExceeded => "timeLimitExceeded",
            SizeLimitExceeded => "sizeLimitExceeded",
            CompareFalse => "compareFalse",
            CompareTrue => "compareTrue",
            AuthMethodNotSupported => "authMethodNotSupported",
            StrongerAuthRequired => "strongerAuthRequired",
            Referral => "referral",
            AdminLimitExceeded => "adminLimitExceeded",
            UnavailableCriticalExtension => "unavailableCriticalExtension",
            ConfidentialityRequired => "confidentialityRequired",
            SaslBindInProgress => "saslBindInProgress",
            NoSuchAttribute => "noSuchAttribute",
            UndefinedAttributeType => "undefinedAttributeType",
            InappropriateMatching => "inappropriateMatching",
            ConstraintViolation => "constraintViolation",
            AttributeOrValueExists => "attributeOrValueExists",
            InvalidAttributeSyntax => "invalidAttributeSyntax",
            NoSuchObject => "noSuchObject",
            AliasProblem => "aliasProblem",
            InvalidDnSyntax => "invalidDNSyntax",
            AliasDereferencingProblem => "aliasDereferencingProblem",
            InappropriateAuthentication => "inappropriateAuthentication",
            InvalidCredentials => "invalidCredentials",
            InsufficientAccessRights => "insufficientAccessRights",
            Busy => "busy",
            Unavailable => "unavailable",
            UnwillingToPerform => "unwillingToPerform",
            LoopDetect => "loopDetect",
            NamingViolation => "namingViolation",
            ObjectClassViolation => "objectClassViolation",
            NotAllowedOnNonLeaf => "notAllowedOnNonLeaf",
            NotAllowedOnRdn => "notAllowedOnRDN",
            EntryAlreadyExists => "entryAlreadyExists",
            ObjectClassModsProhibited => "objectClassModsProhibited",
            AffectsMultipleDsas => "affectsMultipleDSAs",
            Other(80) => "other",
            Other(88) => "canceled",
            Other(122) => "assertionFailed",
            Other(_) => "unknown",
        }
    }

    pub fn is_success(&self) -> bool {
        *self == ResultCode::Success
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> StdResult<(), fmt::Error> {
        write!(f, "{}", self.name())
    }
}

/// Common components of an LDAP operation result.
///
/// This structure faithfully replicates the components dictated by the standard.
/// It would be tempting to hide it behind an automatic `Result`-like interface,
/// but there are scenarios where this would preclude intentional incorporation
/// of error conditions into query design. Instead, the struct implements helper
/// methods, [`success()`](#method.success) and [`non_error()`](#method.non_error),
/// which may be used for ergonomic error handling when simple condition checking
/// suffices.
#[derive(Clone, Debug)]
pub struct LdapResult {
    /// Result code.
    pub rc: ResultCode,
    /// Matched component DN, where applicable.
    pub matched: String,
    /// Additional diagnostic text.
    pub text: String,
    /// Referrals. Absence of referrals is represented by an empty vector.
    pub refs: Vec<String>,
    /// Response controls. Missing and empty controls are both represented
    /// by an empty vector.
    pub ctrls: Vec<Control>,
}

impl Error for LdapResult {}

impl fmt::Display for LdapResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> StdResult<(), fmt::Error> {
        write!(
            f,
            "rc={} ({}), dn: \"{}\", text: \"{}\"",
            self.rc.as_u32(),
            self.rc,
            self.matched,
            self.text
        )
    }
}

impl LdapResult {
    /// If the result code is zero, return the instance itself wrapped
    /// in `Ok()`, otherwise wrap the instance in an `LdapError`.
    pub fn success(self) -> Result<Self> {
        if self.rc.is_success() {
            Ok(self)
        } else {
            Err(LdapError::from(self))
        }
    }

    /// If the result code is 0 or 10 (referral), return the instance
    /// itself wrapped in `Ok()`, otherwise wrap the instance in an
    /// `LdapError`.
    pub fn non_error(self) -> Result<Self> {
        if self.rc.is_success() || self.rc == ResultCode::Referral {
            Ok(self)
        } else {
            Err(LdapError::from(self))
        }
    }
}

/// Wrapper for results of a Search operation which returns all entries at once.
///
/// The wrapper exists so that methods [`success()`](#method.success) and
/// [`non_error()`](#method.non_error) can be called on an instance. Those methods
/// destructure the wrapper and return its components as elements of an anonymous
/// tuple.
#[derive(Clone, Debug)]
pub struct SearchResult(pub Vec<crate::search::ResultEntry>, pub LdapResult);

impl SearchResult {
    /// If the result code is zero, return an anonymous tuple of component structs
    /// wrapped in `Ok()`, otherwise wrap the `LdapResult` part in an `LdapError`.
    pub fn success(self) -> Result<(Vec<crate::search::ResultEntry>, LdapResult)> {
        if self.1.rc.is_success() {
            Ok((self.0, self.1))
        } else {
            Err(LdapError::from(self.1))
        }
    }

    /// If the result code is 0 or 10 (referral), return an anonymous tuple of component
    /// structs wrapped in `Ok()`, otherwise wrap the `LdapResult` part in an `LdapError`.
    pub fn non_error(self) -> Result<(Vec<crate::search::ResultEntry>, LdapResult)> {
        if self.1.rc.is_success() || self.1.rc == ResultCode::Referral {
            Ok((self.0, self.1))
        } else {
            Err(LdapError::from(self.1))
        }
    }
}

/// Wrapper for the result of a Compare operation.
///
/// Compare uniquely has two non-zero return codes to indicate the outcome of a
/// successful comparison, while other return codes indicate errors, as usual
/// (except 10 for referral). The [`equal()`](#method.equal) method optimizes
/// for the expected case of ignoring referrals; [`non_error()`](#method.non_error)
/// can be used when that's not possible.
#[derive(Clone, Debug)]
pub struct CompareResult(pub LdapResult);

impl CompareResult {
    /// If the result code is 5 (compareFalse) or 6 (compareTrue), return the
    /// corresponding boolean value wrapped in `Ok()`, otherwise wrap the
    /// `LdapResult` part in an `LdapError`.
    pub fn equal(self) -> Result<bool> {
        match self.0.rc {
            ResultCode::CompareFalse => Ok(false),
            ResultCode::CompareTrue => Ok(true),
            _ => Err(LdapError::from(self.0)),
        }
    }

    /// If the result code is 5 (compareFalse), 6 (compareTrue), or 10 (referral),
    /// return the inner `LdapResult`, otherwise rewrap it in an `LdapError`.
    pub fn non_error(self) -> Result<LdapResult> {
        match self.0.rc {
            ResultCode::CompareFalse | ResultCode::CompareTrue | ResultCode::Referral => Ok(self.0),
            _ => Err(LdapError::from(self.0)),
        }
    }
}

/// Wrapper for the result of an Extended operation.
///
/// Similarly to [`SearchResult`](struct.SearchResult.html), methods
/// [`success()`](#method.success) and [`non_error()`](#method.non_error) can be
/// called on an instance, and will destructure the wrapper into an anonymous
/// tuple of its components.
#[derive(Clone, Debug)]
pub struct ExopResult(pub Exop, pub LdapResult);

impl ExopResult {
    /// If the result code is zero, return an anonymous tuple of component structs
    /// wrapped in `Ok()`, otherwise wrap the `LdapResult` part in an `LdapError`.
    pub fn success(self) -> Result<(Exop, LdapResult)> {
        if self.1.rc.is_success() {
            Ok((self.0, self.1))
        } else {
            Err(LdapError::from(self.1))
        }
    }

    /// If the result code is 0 or 10 (referral), return an anonymous tuple of component
    /// structs wrapped in `Ok()`, otherwise wrap the `LdapResult` part in an `LdapError`.
    pub fn non_error(self) -> Result<(Exop, LdapResult)> {
        if self.1.rc.is_success() || self.1.rc == ResultCode::Referral {
            Ok((self.0, self.1))
        } else {
            Err(LdapError::from(self.1))
        }
    }
}

#[cfg(test)]
mod test {
    use super::ResultCode;

    #[test]
    fn code_roundtrip() {
        for rc in 0..130u32 {
            assert_eq!(ResultCode::from_u32(rc).as_u32(), rc);
        }
    }

    #[test]
    fn unknown_kept_verbatim() {
        assert_eq!(ResultCode::from_u32(4095), ResultCode::Other(4095));
        assert_eq!(ResultCode::Other(4095).as_u32(), 4095);
    }
}
