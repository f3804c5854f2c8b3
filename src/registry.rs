//! The attestation statement format registry.
//!
//! Each format registers a pair of functions: a parser that lifts the fields
//! it needs out of the CBOR `attStmt`, and a validator that performs the
//! format's verification procedure against the in-flight ceremony. The five
//! webauthn formats this crate implements are pre-registered; applications
//! can add their own.
//!
//! The shared default instance lives behind a `RwLock`; registration is
//! expected to complete before the first request is verified. Callers must
//! copy an [`AttestationFormat`] handle out under the lock and invoke the
//! plugin through the handle after releasing it - plugin code must never run
//! while the lock is held, so a panicking plugin can only fail its own
//! request rather than poisoning the registry for the whole process.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::audit::{cbor_to_audit_value, AuditContext, AuditValue};
use crate::error::{Fido2Error, Fido2Result};

/// Extracts format specific fields from the decoded `attStmt` map.
///
/// The returned value must be a CBOR map; its entries are merged into the
/// result's `authnrData` so the validator (and the audit journal) can see
/// them.
pub type ParseFn = fn(&serde_cbor::Value) -> Fido2Result<serde_cbor::Value>;

/// Performs the format's verification procedure. Must return `Ok(true)` on
/// success; anything else fails the ceremony.
pub type ValidateFn = fn(&AuditContext<'_>) -> Fido2Result<bool>;

/// A format implementation copied out of the registry. Cheap to copy, holds
/// no lock, and drives the plugin-contract checks itself.
#[derive(Clone)]
pub struct AttestationFormat {
    fmt: String,
    parse: ParseFn,
    validate: ValidateFn,
}

impl AttestationFormat {
    /// The format identifier this handle dispatches to.
    pub fn fmt(&self) -> &str {
        &self.fmt
    }

    /// Run the format's parser over the decoded `attStmt`, returning the
    /// audit-map entries it produced.
    pub fn parse(&self, att_stmt: &serde_cbor::Value) -> Fido2Result<Vec<(String, AuditValue)>> {
        let parsed = (self.parse)(att_stmt)?;

        let map = match parsed {
            serde_cbor::Value::Map(m) => m,
            _ => {
                return Err(Fido2Error::protocol(format!(
                    "{} parseFn did not return a Map",
                    self.fmt
                )))
            }
        };

        let mut out = Vec::with_capacity(map.len());
        for (k, v) in map.iter() {
            let key = match k {
                serde_cbor::Value::Text(t) => t.clone(),
                _ => {
                    return Err(Fido2Error::protocol(format!(
                        "{} parseFn returned a non-string key",
                        self.fmt
                    )))
                }
            };
            out.push((key, cbor_to_audit_value(v)?));
        }
        Ok(out)
    }

    /// Run the format's verification procedure.
    pub fn validate(&self, ctx: &AuditContext<'_>) -> Fido2Result<()> {
        match (self.validate)(ctx) {
            Ok(true) => Ok(()),
            Ok(false) => Err(Fido2Error::protocol(format!(
                "{} validateFn did not return 'true'",
                self.fmt
            ))),
            Err(e) => Err(e),
        }
    }
}

#[derive(Clone, Copy)]
struct FormatEntry {
    parse: ParseFn,
    validate: ValidateFn,
}

/// A mapping of attestation format identifier to its implementation.
#[derive(Default)]
pub struct AttestationFormatRegistry {
    formats: BTreeMap<String, FormatEntry>,
}

impl AttestationFormatRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the built-in formats: `none`, `fido-u2f`,
    /// `packed`, `tpm` and `android-safetynet`.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        let builtins: &[(&str, ParseFn, ValidateFn)] = &[
            (
                "none",
                crate::attestation::none_parse,
                crate::attestation::none_validate,
            ),
            (
                "fido-u2f",
                crate::attestation::fidou2f_parse,
                crate::attestation::fidou2f_validate,
            ),
            (
                "packed",
                crate::attestation::packed_parse,
                crate::attestation::packed_validate,
            ),
            ("tpm", crate::tpm::tpm_parse, crate::tpm::tpm_validate),
            (
                "android-safetynet",
                crate::attestation::safetynet_parse,
                crate::attestation::safetynet_validate,
            ),
        ];
        for (fmt, parse, validate) in builtins {
            reg.add(fmt, *parse, *validate)
                .expect("builtin formats cannot collide");
        }
        reg
    }

    /// Register an attestation format.
    pub fn add(&mut self, fmt: &str, parse: ParseFn, validate: ValidateFn) -> Fido2Result<()> {
        if fmt.is_empty() {
            return Err(Fido2Error::arg_type("expected fmt to be a non-empty string"));
        }
        if self.formats.contains_key(fmt) {
            return Err(Fido2Error::duplicate(format!(
                "can not add attestation format: {}, format already exists",
                fmt
            )));
        }
        self.formats
            .insert(fmt.to_string(), FormatEntry { parse, validate });
        Ok(())
    }

    /// Remove every registered format.
    pub fn delete_all(&mut self) {
        self.formats.clear();
    }

    /// The registered format identifiers.
    pub fn formats(&self) -> Vec<String> {
        self.formats.keys().cloned().collect()
    }

    /// Copy a format's implementation out of the registry. Unknown formats
    /// fail explicitly; they never fall through to `none`.
    pub fn handle(&self, fmt: &str) -> Fido2Result<AttestationFormat> {
        self.formats
            .get(fmt)
            .map(|entry| AttestationFormat {
                fmt: fmt.to_string(),
                parse: entry.parse,
                validate: entry.validate,
            })
            .ok_or_else(|| {
                Fido2Error::unsupported(format!("unknown attestation format: {}", fmt))
            })
    }

    /// Run a format's parser over the decoded `attStmt`. Convenience for
    /// direct registry users; the facade copies a handle out first.
    pub fn parse(
        &self,
        fmt: &str,
        att_stmt: &serde_cbor::Value,
    ) -> Fido2Result<Vec<(String, AuditValue)>> {
        self.handle(fmt)?.parse(att_stmt)
    }

    /// Run a format's verification procedure.
    pub fn validate(&self, fmt: &str, ctx: &AuditContext<'_>) -> Fido2Result<()> {
        self.handle(fmt)?.validate(ctx)
    }
}

static DEFAULT_REGISTRY: OnceLock<Arc<RwLock<AttestationFormatRegistry>>> = OnceLock::new();

/// The process-wide registry instance, created on first use with the
/// built-in formats loaded.
pub fn default_registry() -> Arc<RwLock<AttestationFormatRegistry>> {
    DEFAULT_REGISTRY
        .get_or_init(|| Arc::new(RwLock::new(AttestationFormatRegistry::builtin())))
        .clone()
}
