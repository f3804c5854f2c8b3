//! Error types for fido2-rp.
//!
//! Every failure in this library is a [`Fido2Error`]: a closed [`ErrorKind`]
//! plus a human readable message. The messages are part of the public
//! contract of this crate - embedding applications assert on them - so they
//! are never reworded casually.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of failure classes this library emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// An input had the wrong semantic type.
    ArgType,
    /// An input was out of its permitted range.
    ArgRange,
    /// A required expectation or field was absent.
    ArgMissing,
    /// An unknown expectation or option key was supplied.
    ArgInvalid,
    /// An attestation format was already registered.
    Duplicate,
    /// Malformed CBOR, JSON or binary input.
    ParseError,
    /// A plugin misbehaved, or format semantics were violated.
    ProtocolError,
    /// A key and its algorithm disagree.
    AlgMismatch,
    /// A cryptographic signature failed to verify.
    SigInvalid,
    /// A certificate chain or metadata statement is untrusted.
    TrustPath,
    /// The audit journal did not cover every parsed field.
    AuditIncomplete,
    /// No metadata service collections are registered.
    NoMds,
    /// A feature of the protocol is not implemented (e.g. ECDAA).
    Unsupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ArgType => "ARG_TYPE",
            ErrorKind::ArgRange => "ARG_RANGE",
            ErrorKind::ArgMissing => "ARG_MISSING",
            ErrorKind::ArgInvalid => "ARG_INVALID",
            ErrorKind::Duplicate => "DUPLICATE",
            ErrorKind::ParseError => "PARSE_ERROR",
            ErrorKind::ProtocolError => "PROTOCOL_ERROR",
            ErrorKind::AlgMismatch => "ALG_MISMATCH",
            ErrorKind::SigInvalid => "SIG_INVALID",
            ErrorKind::TrustPath => "TRUST_PATH",
            ErrorKind::AuditIncomplete => "AUDIT_INCOMPLETE",
            ErrorKind::NoMds => "NO_MDS",
            ErrorKind::Unsupported => "UNSUPPORTED",
        };
        write!(f, "{}", s)
    }
}

/// The error type returned by every fallible operation in this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Fido2Error {
    /// The class of failure.
    pub kind: ErrorKind,
    /// The human readable description. Part of the public contract.
    pub message: String,
}

/// Convenience alias for results from this crate.
pub type Fido2Result<T> = Result<T, Fido2Error>;

impl Fido2Error {
    /// Construct an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Fido2Error {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn arg_type(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArgType, message)
    }

    pub(crate) fn arg_range(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArgRange, message)
    }

    pub(crate) fn arg_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArgMissing, message)
    }

    pub(crate) fn arg_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArgInvalid, message)
    }

    pub(crate) fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Duplicate, message)
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message)
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, message)
    }

    pub(crate) fn alg_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlgMismatch, message)
    }

    pub(crate) fn sig_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SigInvalid, message)
    }

    pub(crate) fn trust_path(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TrustPath, message)
    }

    pub(crate) fn audit_incomplete(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuditIncomplete, message)
    }

    pub(crate) fn no_mds(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoMds, message)
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }
}

impl From<openssl::error::ErrorStack> for Fido2Error {
    fn from(e: openssl::error::ErrorStack) -> Self {
        // An ErrorStack out of a parse call means the input could not even be
        // interpreted, not that a signature mismatched.
        Fido2Error::parse(format!("openssl: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_carries_kind_and_message() {
        let e = Fido2Error::arg_type("expected timeout to be number, got: foo");
        assert_eq!(
            e.to_string(),
            "ARG_TYPE: expected timeout to be number, got: foo"
        );
        assert_eq!(e.kind, ErrorKind::ArgType);
    }
}
