//! fido2-rp - FIDO2/WebAuthn relying-party verification for Rust servers.
//!
//! Webauthn is a standard allowing communication between servers, browsers
//! and authenticators to allow strong, passwordless, cryptographic
//! authentication to be performed. This library implements the server side
//! verification pipeline: it issues registration and authentication
//! challenges, and verifies the cryptographic responses that client
//! authenticators return, producing validated credential records your
//! application can persist.
//!
//! The library speaks no network protocol. Hand [`Fido2`] the structured
//! response objects your transport layer received and persist what comes
//! back:
//!
//! * [`Fido2::attestation_options`] / [`Fido2::attestation_result`] for
//!   registration,
//! * [`Fido2::assertion_options`] / [`Fido2::assertion_result`] for
//!   authentication.
//!
//! Five attestation statement formats are built in (`none`, `fido-u2f`,
//! `packed`, `tpm`, `android-safetynet`) and others can be registered with
//! the [`registry::AttestationFormatRegistry`]. Trusted authenticator
//! metadata can be supplied through [`mds::MdsCollection`].

#![warn(missing_docs)]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

#[macro_use]
extern crate tracing;

#[macro_use]
mod macros;

pub mod attestation;
pub mod audit;
pub mod authdata;
pub mod base64_data;
pub mod constants;
mod core;
pub mod crypto;
pub mod error;
pub mod mds;
pub mod proto;
pub mod registry;
pub mod tpm;

pub use crate::core::{
    AssertionResult, AttestationResult, Credential, Fido2, Fido2Config, OptionsRequest,
};

/// The common imports an embedding application needs.
pub mod prelude {
    pub use crate::audit::{
        AssertionExpectations, AttestationExpectations, ExpectedOrigin, Factor,
    };
    pub use crate::error::{ErrorKind, Fido2Error, Fido2Result};
    pub use crate::proto::{PublicKeyCredential, RegisterPublicKeyCredential};
    pub use crate::{AssertionResult, AttestationResult, Credential, Fido2, Fido2Config};
}
