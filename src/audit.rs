//! The audit engine shared by attestation and assertion results.
//!
//! Every field the parsers produce lands in an [`AuditMap`], and every read
//! through the map is journaled. A result only succeeds once
//! [`Audit::assert_complete`] proves the journal covers every parsed field -
//! a defence against silently missed semantics: if a parser starts emitting a
//! field no check consumes, verification fails loudly instead of quietly
//! ignoring data an authenticator signed.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::authdata::AuthenticatorFlag;
use crate::base64_data::decode_forgiving;
use crate::error::{Fido2Error, Fido2Result};
use crate::proto::display_json_value;

/// A value stored in an audit map.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditValue {
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// A text value.
    Text(String),
    /// An unsigned integer, e.g. the signature counter.
    Uint(u64),
    /// A signed integer, e.g. a COSE algorithm id.
    Int(i64),
    /// A boolean.
    Bool(bool),
    /// The decoded flags set.
    Flags(BTreeSet<AuthenticatorFlag>),
    /// A JSON value, e.g. a derived JWK.
    Json(serde_json::Value),
    /// A CBOR value that keeps its native shape, e.g. a COSE key or x5c.
    Cbor(serde_cbor::Value),
}

impl AuditValue {
    /// Narrow to bytes.
    pub fn as_bytes(&self) -> Fido2Result<&[u8]> {
        match self {
            AuditValue::Bytes(b) => Ok(b),
            _ => Err(Fido2Error::protocol("field was not a byte string")),
        }
    }

    /// Narrow to text.
    pub fn as_text(&self) -> Fido2Result<&str> {
        match self {
            AuditValue::Text(t) => Ok(t),
            _ => Err(Fido2Error::protocol("field was not a text string")),
        }
    }

    /// Narrow to an unsigned integer.
    pub fn as_uint(&self) -> Fido2Result<u64> {
        match self {
            AuditValue::Uint(u) => Ok(*u),
            _ => Err(Fido2Error::protocol("field was not an unsigned integer")),
        }
    }

    /// Narrow to a signed integer.
    pub fn as_int(&self) -> Fido2Result<i64> {
        match self {
            AuditValue::Int(i) => Ok(*i),
            AuditValue::Uint(u) => i64::try_from(*u)
                .map_err(|_| Fido2Error::protocol("field overflowed a signed integer")),
            _ => Err(Fido2Error::protocol("field was not an integer")),
        }
    }

    /// Narrow to the flag set.
    pub fn as_flags(&self) -> Fido2Result<&BTreeSet<AuthenticatorFlag>> {
        match self {
            AuditValue::Flags(f) => Ok(f),
            _ => Err(Fido2Error::protocol("field was not a flag set")),
        }
    }

    /// Narrow to a CBOR value.
    pub fn as_cbor(&self) -> Fido2Result<&serde_cbor::Value> {
        match self {
            AuditValue::Cbor(c) => Ok(c),
            _ => Err(Fido2Error::protocol("field was not a CBOR value")),
        }
    }
}

/// Convert a CBOR value out of a plugin's parse map into an audit value,
/// keeping scalars in their natural shape.
pub(crate) fn cbor_to_audit_value(v: &serde_cbor::Value) -> Fido2Result<AuditValue> {
    Ok(match v {
        serde_cbor::Value::Bytes(b) => AuditValue::Bytes(b.clone()),
        serde_cbor::Value::Text(t) => AuditValue::Text(t.clone()),
        serde_cbor::Value::Bool(b) => AuditValue::Bool(*b),
        serde_cbor::Value::Integer(i) => AuditValue::Int(
            i64::try_from(*i).map_err(|_| Fido2Error::parse("CBOR integer out of range"))?,
        ),
        other => AuditValue::Cbor(other.clone()),
    })
}

type Journal = Arc<Mutex<BTreeSet<String>>>;

/// A map of parsed fields whose reads are journaled.
#[derive(Debug)]
pub struct AuditMap {
    name: &'static str,
    entries: BTreeMap<String, AuditValue>,
    journal: Journal,
}

impl AuditMap {
    pub(crate) fn new(name: &'static str, audit: &Audit) -> Self {
        AuditMap {
            name,
            entries: BTreeMap::new(),
            journal: audit.journal.clone(),
        }
    }

    /// The name this map journals under, `clientData` or `authnrData`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn insert(&mut self, key: impl Into<String>, value: AuditValue) {
        self.entries.insert(key.into(), value);
    }

    /// Read a field, recording the access in the journal.
    pub fn get(&self, key: &str) -> Option<&AuditValue> {
        let value = self.entries.get(key)?;
        self.journal
            .lock()
            .expect("audit journal lock poisoned")
            .insert(format!("{}.{}", self.name, key));
        Some(value)
    }

    /// Read a field that must be present.
    pub fn get_required(&self, key: &str) -> Fido2Result<&AuditValue> {
        self.get(key).ok_or_else(|| {
            Fido2Error::protocol(format!("{} missing required field: {}", self.name, key))
        })
    }

    /// Whether a field exists, without journaling it.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// The set of field names present.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// The number of fields present.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no fields are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The per-result audit record.
#[derive(Debug)]
pub struct Audit {
    journal: Journal,
    warnings: Mutex<BTreeMap<String, String>>,
    info: Mutex<BTreeMap<String, String>>,
    complete: Mutex<bool>,
}

impl Default for Audit {
    fn default() -> Self {
        Self::new()
    }
}

impl Audit {
    /// A fresh, empty audit record.
    pub fn new() -> Self {
        Audit {
            journal: Arc::new(Mutex::new(BTreeSet::new())),
            warnings: Mutex::new(BTreeMap::new()),
            info: Mutex::new(BTreeMap::new()),
            complete: Mutex::new(false),
        }
    }

    /// Record a non-fatal observation.
    pub fn warn(&self, key: impl Into<String>, message: impl Into<String>) {
        let key = key.into();
        let message = message.into();
        warn!(%key, %message, "audit warning");
        self.warnings
            .lock()
            .expect("audit warnings lock poisoned")
            .insert(key, message);
    }

    /// Record an informational fact about the ceremony.
    pub fn info(&self, key: impl Into<String>, message: impl Into<String>) {
        self.info
            .lock()
            .expect("audit info lock poisoned")
            .insert(key.into(), message.into());
    }

    /// A snapshot of the journal of visited field paths.
    pub fn journal(&self) -> BTreeSet<String> {
        self.journal
            .lock()
            .expect("audit journal lock poisoned")
            .clone()
    }

    /// A snapshot of the recorded warnings.
    pub fn warnings(&self) -> BTreeMap<String, String> {
        self.warnings
            .lock()
            .expect("audit warnings lock poisoned")
            .clone()
    }

    /// A snapshot of the recorded info entries.
    pub fn info_entries(&self) -> BTreeMap<String, String> {
        self.info.lock().expect("audit info lock poisoned").clone()
    }

    /// Whether the completeness gate has passed.
    pub fn is_complete(&self) -> bool {
        *self.complete.lock().expect("audit complete lock poisoned")
    }

    /// The final gate of every pipeline: every field present in the supplied
    /// maps must have been journaled, or verification fails.
    pub fn assert_complete(&self, maps: &[&AuditMap]) -> Fido2Result<()> {
        let journal = self.journal();
        let mut unvisited = Vec::new();
        for map in maps {
            for key in map.keys() {
                let path = format!("{}.{}", map.name(), key);
                if !journal.contains(&path) {
                    unvisited.push(path);
                }
            }
        }
        if !unvisited.is_empty() {
            return Err(Fido2Error::audit_incomplete(format!(
                "audit could not verify all fields were checked: {}",
                unvisited.join(", ")
            )));
        }
        *self.complete.lock().expect("audit complete lock poisoned") = true;
        Ok(())
    }
}

/// Tunables that apply to verification as a whole rather than to one
/// expectation set.
#[derive(Debug, Clone)]
pub struct VerificationPolicy {
    /// Accepted distance either side of "now" for a SafetyNet `timestampMs`.
    pub safetynet_timestamp_window_ms: u64,
    /// Skip certificate validity-window checks. Only for tests against
    /// captured fixtures whose certificates have expired.
    pub danger_disable_certificate_time_checks: bool,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        VerificationPolicy {
            safetynet_timestamp_window_ms: crate::constants::SAFETYNET_TIMESTAMP_WINDOW_MS,
            danger_disable_certificate_time_checks: false,
        }
    }
}

/// The handle an attestation format validator receives.
///
/// Formats read parsed fields through the journaled maps and record
/// observations through [`Audit`]; they never see the in-flight result
/// itself.
pub struct AuditContext<'a> {
    /// The parsed authenticator data fields, including the format's own
    /// parsed statement fields.
    pub authnr_data: &'a AuditMap,
    /// The parsed client data fields.
    pub client_data: &'a AuditMap,
    /// SHA-256 of the raw clientDataJSON bytes.
    pub client_data_hash: &'a [u8],
    /// The raw authenticator data bytes the attestation signature covers.
    pub authnr_data_raw: &'a [u8],
    /// The audit record for warnings and info.
    pub audit: &'a Audit,
    /// Verification tunables.
    pub policy: &'a VerificationPolicy,
}

/// Which authentication factor this ceremony is expected to provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Factor {
    /// A single-factor (passwordless) ceremony: presence and verification.
    First,
    /// A second factor alongside a password: presence without verification.
    Second,
    /// Either kind: presence only is checked.
    Either,
}

impl TryFrom<&str> for Factor {
    type Error = Fido2Error;

    fn try_from(s: &str) -> Fido2Result<Self> {
        match s {
            "first" => Ok(Factor::First),
            "second" => Ok(Factor::Second),
            "either" => Ok(Factor::Either),
            _ => Err(Fido2Error::arg_range(format!(
                "factor must be one of: first, second, either, got: {}",
                s
            ))),
        }
    }
}

/// The origin an assertion or attestation must have been performed under.
#[derive(Clone)]
pub enum ExpectedOrigin {
    /// The client origin must equal this string exactly.
    Exact(String),
    /// The client origin must satisfy this predicate.
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl fmt::Debug for ExpectedOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedOrigin::Exact(s) => write!(f, "ExpectedOrigin::Exact({})", s),
            ExpectedOrigin::Predicate(_) => write!(f, "ExpectedOrigin::Predicate(..)"),
        }
    }
}

impl From<&str> for ExpectedOrigin {
    fn from(s: &str) -> Self {
        ExpectedOrigin::Exact(s.to_string())
    }
}

impl From<String> for ExpectedOrigin {
    fn from(s: String) -> Self {
        ExpectedOrigin::Exact(s)
    }
}

impl ExpectedOrigin {
    fn matches(&self, origin: &str) -> bool {
        match self {
            ExpectedOrigin::Exact(s) => s == origin,
            ExpectedOrigin::Predicate(p) => p(origin),
        }
    }
}

/// The caller's expectations for a registration ceremony.
#[derive(Debug, Clone)]
pub struct AttestationExpectations {
    /// The expected client origin.
    pub origin: ExpectedOrigin,
    /// The base64url encoded challenge that was issued.
    pub challenge: String,
    /// The factor this registration must provide.
    pub factor: Factor,
    /// The relying party id; derived from the origin host when unset.
    pub rp_id: Option<String>,
}

impl AttestationExpectations {
    /// Expectations with the three required values.
    pub fn new(
        origin: impl Into<ExpectedOrigin>,
        challenge: impl Into<String>,
        factor: Factor,
    ) -> Self {
        AttestationExpectations {
            origin: origin.into(),
            challenge: challenge.into(),
            factor,
            rp_id: None,
        }
    }

    /// Set an explicit relying party id.
    pub fn rp_id(mut self, rp_id: impl Into<String>) -> Self {
        self.rp_id = Some(rp_id.into());
        self
    }

    /// Build expectations from the loosely typed map an embedding
    /// application supplies. Unknown keys are rejected.
    pub fn from_json(v: &serde_json::Value) -> Fido2Result<Self> {
        let map = expect_object(v)?;
        for key in map.keys() {
            match key.as_str() {
                "origin" | "challenge" | "factor" | "rpId" => {}
                other => {
                    return Err(Fido2Error::arg_invalid(format!(
                        "unknown expectation: {}",
                        other
                    )))
                }
            }
        }
        Ok(AttestationExpectations {
            origin: ExpectedOrigin::Exact(required_str(map, "origin")?),
            challenge: required_str(map, "challenge")?,
            factor: Factor::try_from(required_str(map, "factor")?.as_str())?,
            rp_id: optional_str(map, "rpId")?,
        })
    }
}

/// The caller's expectations for an authentication ceremony.
#[derive(Debug, Clone)]
pub struct AssertionExpectations {
    /// The expected client origin.
    pub origin: ExpectedOrigin,
    /// The base64url encoded challenge that was issued.
    pub challenge: String,
    /// The factor this assertion must provide.
    pub factor: Factor,
    /// The registered credential public key, PEM encoded.
    pub public_key: String,
    /// The stored signature counter from the last successful ceremony.
    pub prev_counter: u32,
    /// The expected user handle, or `None` for credentials registered
    /// without one.
    pub user_handle: Option<String>,
    /// The relying party id; derived from the origin host when unset.
    pub rp_id: Option<String>,
    /// The credential ids issued in `allowCredentials`, when the caller
    /// wants the response checked against them.
    pub allow_credentials: Option<Vec<Vec<u8>>>,
}

impl AssertionExpectations {
    /// Expectations with all required values.
    pub fn new(
        origin: impl Into<ExpectedOrigin>,
        challenge: impl Into<String>,
        factor: Factor,
        public_key: impl Into<String>,
        prev_counter: u32,
        user_handle: Option<String>,
    ) -> Self {
        AssertionExpectations {
            origin: origin.into(),
            challenge: challenge.into(),
            factor,
            public_key: public_key.into(),
            prev_counter,
            user_handle,
            rp_id: None,
            allow_credentials: None,
        }
    }

    /// Set an explicit relying party id.
    pub fn rp_id(mut self, rp_id: impl Into<String>) -> Self {
        self.rp_id = Some(rp_id.into());
        self
    }

    /// Restrict the response to one of these credential ids.
    pub fn allow_credentials(mut self, ids: Vec<Vec<u8>>) -> Self {
        self.allow_credentials = Some(ids);
        self
    }

    /// Build expectations from the loosely typed map an embedding
    /// application supplies. Unknown keys are rejected; `userHandle` is a
    /// required key whose value may be null.
    pub fn from_json(v: &serde_json::Value) -> Fido2Result<Self> {
        let map = expect_object(v)?;
        for key in map.keys() {
            match key.as_str() {
                "origin" | "challenge" | "factor" | "publicKey" | "prevCounter" | "userHandle"
                | "rpId" | "allowCredentials" => {}
                other => {
                    return Err(Fido2Error::arg_invalid(format!(
                        "unknown expectation: {}",
                        other
                    )))
                }
            }
        }

        let prev_counter_value = map.get("prevCounter").ok_or_else(|| {
            Fido2Error::arg_missing("expectation did not contain value for 'prevCounter'")
        })?;
        let prev_counter = prev_counter_value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                Fido2Error::arg_type(format!(
                    "expected prevCounter to be number, got: {}",
                    display_json_value(prev_counter_value)
                ))
            })?;

        let user_handle_value = map.get("userHandle").ok_or_else(|| {
            Fido2Error::arg_missing("expectation did not contain value for 'userHandle'")
        })?;
        let user_handle = match user_handle_value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => {
                return Err(Fido2Error::arg_type(format!(
                    "expected userHandle to be string or null, got: {}",
                    display_json_value(other)
                )))
            }
        };

        let allow_credentials = match map.get("allowCredentials") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Array(items)) => {
                let mut ids = Vec::with_capacity(items.len());
                for item in items {
                    let s = item.as_str().ok_or_else(|| {
                        Fido2Error::arg_type(format!(
                            "expected allowCredentials entry to be string, got: {}",
                            display_json_value(item)
                        ))
                    })?;
                    ids.push(decode_forgiving(s)?);
                }
                Some(ids)
            }
            Some(other) => {
                return Err(Fido2Error::arg_type(format!(
                    "expected allowCredentials to be array, got: {}",
                    display_json_value(other)
                )))
            }
        };

        Ok(AssertionExpectations {
            origin: ExpectedOrigin::Exact(required_str(map, "origin")?),
            challenge: required_str(map, "challenge")?,
            factor: Factor::try_from(required_str(map, "factor")?.as_str())?,
            public_key: required_str(map, "publicKey")?,
            prev_counter,
            user_handle,
            rp_id: optional_str(map, "rpId")?,
            allow_credentials,
        })
    }
}

fn expect_object(
    v: &serde_json::Value,
) -> Fido2Result<&serde_json::Map<String, serde_json::Value>> {
    v.as_object().ok_or_else(|| {
        Fido2Error::arg_type(format!(
            "expected expectations to be object, got: {}",
            display_json_value(v)
        ))
    })
}

fn required_str(
    map: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Fido2Result<String> {
    let v = map.get(key).ok_or_else(|| {
        Fido2Error::arg_missing(format!("expectation did not contain value for '{}'", key))
    })?;
    v.as_str().map(str::to_string).ok_or_else(|| {
        Fido2Error::arg_type(format!(
            "expected {} to be string, got: {}",
            key,
            display_json_value(v)
        ))
    })
}

fn optional_str(
    map: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Fido2Result<Option<String>> {
    match map.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v.as_str().map(|s| Some(s.to_string())).ok_or_else(|| {
            Fido2Error::arg_type(format!(
                "expected {} to be string, got: {}",
                key,
                display_json_value(v)
            ))
        }),
    }
}

// The expectation checks below run in the order spec'd for every result:
// type, challenge, origin, token binding, rpIdHash, flags, counter, then the
// ceremony specific signature work, then completeness.

pub(crate) fn validate_client_type(client_data: &AuditMap, expected: &str) -> Fido2Result<()> {
    let type_ = client_data.get_required("type")?.as_text()?;
    if type_ != expected {
        return Err(Fido2Error::protocol(format!(
            "clientData type was not '{}', got: {}",
            expected, type_
        )));
    }
    Ok(())
}

pub(crate) fn validate_challenge(client_data: &AuditMap, expected: &str) -> Fido2Result<()> {
    let challenge = client_data.get_required("challenge")?.as_text()?;
    let got = decode_forgiving(challenge)
        .map_err(|_| Fido2Error::protocol("clientData challenge was not valid base64url"))?;
    let want = decode_forgiving(expected)
        .map_err(|_| Fido2Error::arg_type("expected challenge was not valid base64url"))?;
    if got != want {
        return Err(Fido2Error::protocol(
            "clientData challenge does not match expected challenge",
        ));
    }
    Ok(())
}

pub(crate) fn validate_origin(
    client_data: &AuditMap,
    expected: &ExpectedOrigin,
) -> Fido2Result<String> {
    let origin = client_data.get_required("origin")?.as_text()?;
    if !expected.matches(origin) {
        return Err(Fido2Error::protocol(format!(
            "clientData origin did not match expected origin, got: {}",
            origin
        )));
    }
    Ok(origin.to_string())
}

pub(crate) fn validate_token_binding(client_data: &AuditMap, audit: &Audit) -> Fido2Result<()> {
    if let Some(tb) = client_data.get("tokenBinding") {
        let status = match tb {
            AuditValue::Json(v) => v
                .get("status")
                .and_then(|s| s.as_str())
                .map(str::to_string),
            _ => None,
        }
        .ok_or_else(|| Fido2Error::protocol("tokenBinding did not carry a status"))?;
        match status.as_str() {
            "present" | "supported" | "not-supported" => {
                audit.info("token-binding-status", status);
            }
            other => {
                return Err(Fido2Error::protocol(format!(
                    "tokenBinding status was not recognised: {}",
                    other
                )))
            }
        }
    }
    Ok(())
}

/// Derive the relying party id from the validated client origin.
pub(crate) fn derive_rp_id(origin: &str) -> Fido2Result<String> {
    let url = url::Url::parse(origin)
        .map_err(|_| Fido2Error::protocol(format!("origin was not a valid url: {}", origin)))?;
    url.host_str()
        .map(str::to_string)
        .ok_or_else(|| Fido2Error::protocol(format!("origin has no host: {}", origin)))
}

pub(crate) fn validate_rp_id_hash(authnr_data: &AuditMap, rp_id: &str) -> Fido2Result<()> {
    let rp_id_hash = authnr_data.get_required("rpIdHash")?.as_bytes()?;
    let expected = crate::crypto::compute_sha256(rp_id.as_bytes());
    if rp_id_hash != expected.as_slice() {
        return Err(Fido2Error::protocol(format!(
            "rpIdHash does not match SHA-256 of relying party id '{}'",
            rp_id
        )));
    }
    Ok(())
}

pub(crate) fn validate_flags(authnr_data: &AuditMap, factor: Factor) -> Fido2Result<()> {
    let flags = authnr_data.get_required("flags")?.as_flags()?;
    if !flags.contains(&AuthenticatorFlag::UP) {
        return Err(Fido2Error::protocol(
            "user was not present during the ceremony",
        ));
    }
    match factor {
        Factor::First => {
            if !flags.contains(&AuthenticatorFlag::UV) {
                return Err(Fido2Error::protocol(
                    "factor 'first' requires user verification",
                ));
            }
        }
        Factor::Second => {
            if flags.contains(&AuthenticatorFlag::UV) {
                return Err(Fido2Error::protocol(
                    "factor 'second' requires user verification to not be performed",
                ));
            }
        }
        Factor::Either => {}
    }
    Ok(())
}

/// Check and return the signature counter. For assertions `prev` carries the
/// stored counter; attestation passes `None` and only records the value.
pub(crate) fn validate_counter(
    authnr_data: &AuditMap,
    prev: Option<u32>,
    audit: &Audit,
) -> Fido2Result<u32> {
    let counter = u32::try_from(authnr_data.get_required("counter")?.as_uint()?)
        .map_err(|_| Fido2Error::parse("signature counter out of range"))?;
    audit.info("counter", counter.to_string());

    if let Some(prev) = prev {
        if counter == 0 && prev == 0 {
            // Authenticators that do not implement counters report zero
            // forever. Accept, but leave a trace for risk scoring.
            audit.warn(
                "counter-zero",
                "authenticator does not appear to implement a signature counter",
            );
        } else if counter <= prev {
            return Err(Fido2Error::protocol(
                "signature counter was not greater than stored counter",
            ));
        }
    }
    Ok(counter)
}

pub(crate) fn validate_user_handle(
    response_user_handle: Option<&[u8]>,
    expected: Option<&str>,
) -> Fido2Result<()> {
    let response = match response_user_handle {
        Some(b) if !b.is_empty() => Some(b),
        _ => None,
    };
    match (expected, response) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(Fido2Error::protocol(
            "response carried a userHandle but none was expected",
        )),
        (Some(_), None) => Err(Fido2Error::protocol(
            "expected a userHandle but the response carried none",
        )),
        (Some(want), Some(got)) => {
            // Clients disagree on the encoding they surface, so accept the
            // raw bytes or their base64url form.
            if want.as_bytes() == got || crate::base64_data::encode_b64url(got) == want {
                Ok(())
            } else {
                Err(Fido2Error::protocol(
                    "response userHandle did not match expected userHandle",
                ))
            }
        }
    }
}

pub(crate) fn validate_raw_id(
    client_data: &AuditMap,
    allow_credentials: Option<&[Vec<u8>]>,
) -> Fido2Result<Vec<u8>> {
    let raw_id = client_data.get_required("rawId")?.as_bytes()?.to_vec();
    if raw_id.is_empty() {
        return Err(Fido2Error::protocol("rawId was empty"));
    }
    if let Some(allowed) = allow_credentials {
        if !allowed.iter().any(|id| id.as_slice() == raw_id.as_slice()) {
            return Err(Fido2Error::protocol(
                "rawId was not one of the allowed credentials",
            ));
        }
    }
    Ok(raw_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn map_with(audit: &Audit, entries: &[(&str, AuditValue)]) -> AuditMap {
        let mut m = AuditMap::new("authnrData", audit);
        for (k, v) in entries {
            m.insert(*k, v.clone());
        }
        m
    }

    #[test]
    fn journal_records_reads_and_gates_completion() {
        let audit = Audit::new();
        let m = map_with(
            &audit,
            &[
                ("counter", AuditValue::Uint(7)),
                ("rpIdHash", AuditValue::Bytes(vec![0; 32])),
            ],
        );

        assert!(m.get("counter").is_some());
        let e = audit.assert_complete(&[&m]).unwrap_err();
        assert_eq!(e.kind, ErrorKind::AuditIncomplete);
        assert!(e.message.contains("authnrData.rpIdHash"));
        assert!(!audit.is_complete());

        assert!(m.get("rpIdHash").is_some());
        audit.assert_complete(&[&m]).unwrap();
        assert!(audit.is_complete());
        assert_eq!(audit.journal().len(), 2);
    }

    #[test]
    fn factor_flag_rules() {
        let audit = Audit::new();
        let up_only = map_with(
            &audit,
            &[(
                "flags",
                AuditValue::Flags(BTreeSet::from([AuthenticatorFlag::UP])),
            )],
        );
        let up_uv = map_with(
            &audit,
            &[(
                "flags",
                AuditValue::Flags(BTreeSet::from([
                    AuthenticatorFlag::UP,
                    AuthenticatorFlag::UV,
                ])),
            )],
        );
        let none = map_with(
            &audit,
            &[("flags", AuditValue::Flags(BTreeSet::new()))],
        );

        assert!(validate_flags(&up_only, Factor::Either).is_ok());
        assert!(validate_flags(&up_only, Factor::Second).is_ok());
        assert!(validate_flags(&up_only, Factor::First).is_err());
        assert!(validate_flags(&up_uv, Factor::First).is_ok());
        assert!(validate_flags(&up_uv, Factor::Second).is_err());
        assert!(validate_flags(&up_uv, Factor::Either).is_ok());
        assert!(validate_flags(&none, Factor::Either).is_err());
    }

    #[test]
    fn counter_must_move_forward_unless_both_zero() {
        let audit = Audit::new();
        let m = map_with(&audit, &[("counter", AuditValue::Uint(5))]);

        assert_eq!(validate_counter(&m, Some(4), &audit).unwrap(), 5);
        assert!(validate_counter(&m, Some(5), &audit).is_err());
        assert!(validate_counter(&m, Some(6), &audit).is_err());

        let zero = map_with(&audit, &[("counter", AuditValue::Uint(0))]);
        assert_eq!(validate_counter(&zero, Some(0), &audit).unwrap(), 0);
        assert!(audit.warnings().contains_key("counter-zero"));
        assert!(validate_counter(&zero, Some(1), &audit).is_err());
    }

    #[test]
    fn user_handle_null_semantics() {
        assert!(validate_user_handle(None, None).is_ok());
        assert!(validate_user_handle(Some(b""), None).is_ok());
        assert!(validate_user_handle(Some(b"abcd"), None).is_err());
        assert!(validate_user_handle(None, Some("abcd")).is_err());
        assert!(validate_user_handle(Some(b"abcd"), Some("abcd")).is_ok());
        // base64url form of the raw bytes also matches
        assert!(validate_user_handle(Some(&[0xde, 0xad, 0xbe, 0xef]), Some("3q2-7w")).is_ok());
        assert!(validate_user_handle(Some(b"abcd"), Some("efgh")).is_err());
    }

    #[test]
    fn unknown_expectation_key_is_rejected() {
        let v = serde_json::json!({
            "origin": "https://localhost:8443",
            "challenge": "AAAA",
            "factor": "either",
            "blah": 1,
        });
        let e = AttestationExpectations::from_json(&v).unwrap_err();
        assert_eq!(e.kind, ErrorKind::ArgInvalid);
        assert_eq!(e.message, "unknown expectation: blah");
    }

    #[test]
    fn missing_expectation_key_is_rejected() {
        let v = serde_json::json!({
            "origin": "https://localhost:8443",
            "factor": "either",
        });
        let e = AttestationExpectations::from_json(&v).unwrap_err();
        assert_eq!(e.kind, ErrorKind::ArgMissing);
        assert_eq!(
            e.message,
            "expectation did not contain value for 'challenge'"
        );
    }

    #[test]
    fn assertion_expectations_from_json() {
        let v = serde_json::json!({
            "origin": "https://localhost:8443",
            "challenge": "AAAA",
            "factor": "either",
            "publicKey": "-----BEGIN PUBLIC KEY-----\n...",
            "prevCounter": 362,
            "userHandle": null,
        });
        let e = AssertionExpectations::from_json(&v).unwrap();
        assert_eq!(e.prev_counter, 362);
        assert!(e.user_handle.is_none());

        let v = serde_json::json!({
            "origin": "https://localhost:8443",
            "challenge": "AAAA",
            "factor": "either",
            "publicKey": "x",
            "prevCounter": "foo",
            "userHandle": null,
        });
        let e = AssertionExpectations::from_json(&v).unwrap_err();
        assert_eq!(e.kind, ErrorKind::ArgType);
        assert_eq!(e.message, "expected prevCounter to be number, got: foo");
    }

    #[test]
    fn origin_predicate() {
        let audit = Audit::new();
        let mut m = AuditMap::new("clientData", &audit);
        m.insert(
            "origin",
            AuditValue::Text("https://app.example.com".to_string()),
        );

        let exact = ExpectedOrigin::Exact("https://app.example.com".to_string());
        assert!(validate_origin(&m, &exact).is_ok());

        let pred = ExpectedOrigin::Predicate(Arc::new(|o: &str| {
            o.ends_with(".example.com") || o == "https://example.com"
        }));
        assert!(validate_origin(&m, &pred).is_ok());

        let wrong = ExpectedOrigin::Exact("https://other.com".to_string());
        assert!(validate_origin(&m, &wrong).is_err());
    }

    #[test]
    fn derive_rp_id_from_origin() {
        assert_eq!(derive_rp_id("https://localhost:8443").unwrap(), "localhost");
        assert_eq!(
            derive_rp_id("https://www.example.com").unwrap(),
            "www.example.com"
        );
        assert!(derive_rp_id("not a url").is_err());
    }
}
