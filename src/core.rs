//! The relying party facade.
//!
//! [`Fido2`] issues registration and authentication challenges and verifies
//! the responses client authenticators return. It speaks no network
//! protocol: the embedding application passes the structured response
//! objects in and persists what comes back.
//!
//! Verification is a fixed pipeline: parse client data, parse authenticator
//! data, dispatch the attestation statement format, then walk the
//! expectation checks in a defined order. Every parsed field is tracked by
//! the audit journal and the ceremony only succeeds once the journal proves
//! every field was examined.

use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::audit::{
    derive_rp_id, validate_challenge, validate_client_type, validate_counter, validate_flags,
    validate_origin, validate_raw_id, validate_rp_id_hash, validate_token_binding,
    validate_user_handle, AssertionExpectations, AttestationExpectations, Audit, AuditContext,
    AuditMap, AuditValue, VerificationPolicy,
};
use crate::authdata::{AuthenticatorData, AuthenticatorFlag};
use crate::base64_data::Base64UrlSafeData;
use crate::constants::{
    AUTHENTICATOR_TIMEOUT_MS, CHALLENGE_SIZE_BYTES, CHALLENGE_SIZE_BYTES_MIN, DEFAULT_CRYPTO_PARAMS,
    DEFAULT_RP_NAME,
};
use crate::crypto::{compute_sha256, verify_signature_pem, COSEKey};
use crate::error::{Fido2Error, Fido2Result};
use crate::proto::{
    display_json_value, AssertionOptions, AttestationConveyancePreference, AttestationOptions,
    AuthenticatorAttachment, AuthenticatorSelectionCriteria, Challenge, CollectedClientData,
    PubKeyCredParams, PublicKeyCredential, RegisterPublicKeyCredential, RelyingParty,
    UserVerificationPolicy,
};
use crate::registry::{default_registry, AttestationFormatRegistry};

/// Relying party configuration. All fields have defaults; see the builder
/// style setters and [`Fido2Config::from_json`].
#[derive(Debug, Clone)]
pub struct Fido2Config {
    /// Client side ceremony timeout in milliseconds, carried in options.
    pub timeout_ms: u32,
    /// The relying party id. Derived from the origin host when unset.
    pub rp_id: Option<String>,
    /// The relying party display name.
    pub rp_name: String,
    /// An icon url for the relying party.
    pub rp_icon: Option<String>,
    /// Issued challenge length in bytes, at least 32.
    pub challenge_size: usize,
    /// The attestation conveyance requested from clients.
    pub attestation: AttestationConveyancePreference,
    /// Accepted COSE algorithms, in order of preference.
    pub crypto_params: Vec<i64>,
    /// Authenticator attachment hint.
    pub authenticator_attachment: Option<AuthenticatorAttachment>,
    /// Resident key requirement hint.
    pub authenticator_require_resident_key: Option<bool>,
    /// User verification requirement communicated to clients.
    pub authenticator_user_verification: Option<UserVerificationPolicy>,
    /// Verification tunables shared with format plugins.
    pub policy: VerificationPolicy,
}

impl Default for Fido2Config {
    fn default() -> Self {
        Fido2Config {
            timeout_ms: AUTHENTICATOR_TIMEOUT_MS,
            rp_id: None,
            rp_name: DEFAULT_RP_NAME.to_string(),
            rp_icon: None,
            challenge_size: CHALLENGE_SIZE_BYTES,
            attestation: AttestationConveyancePreference::Direct,
            crypto_params: DEFAULT_CRYPTO_PARAMS.to_vec(),
            authenticator_attachment: None,
            authenticator_require_resident_key: None,
            authenticator_user_verification: None,
            policy: VerificationPolicy::default(),
        }
    }
}

impl Fido2Config {
    /// Check the semantic constraints the types alone can not express.
    pub fn validate(&self) -> Fido2Result<()> {
        if self.challenge_size < CHALLENGE_SIZE_BYTES_MIN {
            return Err(Fido2Error::arg_range(format!(
                "challengeSize must be {} or greater, got: {}",
                CHALLENGE_SIZE_BYTES_MIN, self.challenge_size
            )));
        }
        if self.crypto_params.is_empty() {
            return Err(Fido2Error::arg_range("cryptoParams must not be empty"));
        }
        Ok(())
    }

    /// Build a configuration from the loosely typed options bag an
    /// embedding application supplies. Every key is validated exhaustively
    /// and unknown keys are rejected.
    pub fn from_json(options: &serde_json::Value) -> Fido2Result<Self> {
        let map = options.as_object().ok_or_else(|| {
            Fido2Error::arg_type(format!(
                "expected options to be object, got: {}",
                display_json_value(options)
            ))
        })?;

        let mut config = Fido2Config::default();

        for (key, value) in map {
            match key.as_str() {
                "timeout" => {
                    if !value.is_number() {
                        return Err(Fido2Error::arg_type(format!(
                            "expected timeout to be number, got: {}",
                            display_json_value(value)
                        )));
                    }
                    let timeout = value.as_u64().ok_or_else(|| {
                        Fido2Error::arg_range(format!(
                            "timeout must be a non-negative integer, got: {}",
                            display_json_value(value)
                        ))
                    })?;
                    config.timeout_ms = u32::try_from(timeout).map_err(|_| {
                        Fido2Error::arg_range(format!("timeout out of range, got: {}", timeout))
                    })?;
                }
                "rpId" => config.rp_id = Some(expect_string(key, value)?),
                "rpName" => config.rp_name = expect_string(key, value)?,
                "rpIcon" => config.rp_icon = Some(expect_string(key, value)?),
                "challengeSize" => {
                    if !value.is_number() {
                        return Err(Fido2Error::arg_type(format!(
                            "expected challengeSize to be number, got: {}",
                            display_json_value(value)
                        )));
                    }
                    let size = value.as_u64().ok_or_else(|| {
                        Fido2Error::arg_range(format!(
                            "challengeSize must be a non-negative integer, got: {}",
                            display_json_value(value)
                        ))
                    })?;
                    config.challenge_size = size as usize;
                }
                "attestation" => {
                    config.attestation =
                        AttestationConveyancePreference::try_from(expect_string(key, value)?.as_str())?;
                }
                "cryptoParams" => {
                    let arr = value.as_array().ok_or_else(|| {
                        Fido2Error::arg_type(format!(
                            "expected cryptoParams to be array, got: {}",
                            display_json_value(value)
                        ))
                    })?;
                    let mut params = Vec::with_capacity(arr.len());
                    for entry in arr {
                        let alg = entry.as_i64().ok_or_else(|| {
                            Fido2Error::arg_type(format!(
                                "expected cryptoParams entry to be number, got: {}",
                                display_json_value(entry)
                            ))
                        })?;
                        params.push(alg);
                    }
                    config.crypto_params = params;
                }
                "authenticatorAttachment" => {
                    config.authenticator_attachment =
                        Some(AuthenticatorAttachment::try_from(expect_string(key, value)?.as_str())?);
                }
                "authenticatorRequireResidentKey" => {
                    let b = value.as_bool().ok_or_else(|| {
                        Fido2Error::arg_type(format!(
                            "expected authenticatorRequireResidentKey to be boolean, got: {}",
                            display_json_value(value)
                        ))
                    })?;
                    config.authenticator_require_resident_key = Some(b);
                }
                "authenticatorUserVerification" => {
                    config.authenticator_user_verification =
                        Some(UserVerificationPolicy::try_from(expect_string(key, value)?.as_str())?);
                }
                other => {
                    return Err(Fido2Error::arg_invalid(format!(
                        "unknown config option: {}",
                        other
                    )))
                }
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn expect_string(key: &str, value: &serde_json::Value) -> Fido2Result<String> {
    value.as_str().map(str::to_string).ok_or_else(|| {
        Fido2Error::arg_type(format!(
            "expected {} to be string, got: {}",
            key,
            display_json_value(value)
        ))
    })
}

/// Extra inputs when issuing options.
#[derive(Debug, Clone, Default)]
pub struct OptionsRequest {
    /// Extension inputs to pass through to the client.
    pub extensions: Option<serde_json::Value>,
    /// Application data to bind into the challenge. When set, the issued
    /// challenge is `SHA-256(rawChallenge || extraData)` and both values
    /// are exposed so the caller can later reconstruct the binding.
    pub extra_data: Option<Vec<u8>>,
}

/// A user credential produced by a successful registration. Persist this;
/// it is everything needed to verify future assertions.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Credential {
    /// The credential id.
    pub cred_id: Vec<u8>,
    /// The credential public key.
    pub cred: COSEKey,
    /// The signature counter at registration.
    pub counter: u32,
    /// Whether the user was verified during registration.
    pub verified: bool,
}

/// The outcome of a successful registration ceremony.
#[derive(Debug)]
pub struct AttestationResult {
    request: RegisterPublicKeyCredential,
    expectations: AttestationExpectations,
    client_data: AuditMap,
    authnr_data: AuditMap,
    audit: Audit,
    credential: Credential,
}

impl AttestationResult {
    /// The response this result was verified from.
    pub fn request(&self) -> &RegisterPublicKeyCredential {
        &self.request
    }

    /// The expectations this result was verified against.
    pub fn expectations(&self) -> &AttestationExpectations {
        &self.expectations
    }

    /// The parsed client data fields.
    pub fn client_data(&self) -> &AuditMap {
        &self.client_data
    }

    /// The parsed authenticator data fields, including the attestation
    /// statement fields.
    pub fn authnr_data(&self) -> &AuditMap {
        &self.authnr_data
    }

    /// The completed audit record.
    pub fn audit(&self) -> &Audit {
        &self.audit
    }

    /// The credential to persist.
    pub fn credential(&self) -> &Credential {
        &self.credential
    }
}

/// The outcome of a successful authentication ceremony.
#[derive(Debug)]
pub struct AssertionResult {
    request: PublicKeyCredential,
    expectations: AssertionExpectations,
    client_data: AuditMap,
    authnr_data: AuditMap,
    audit: Audit,
    counter: u32,
}

impl AssertionResult {
    /// The response this result was verified from.
    pub fn request(&self) -> &PublicKeyCredential {
        &self.request
    }

    /// The expectations this result was verified against.
    pub fn expectations(&self) -> &AssertionExpectations {
        &self.expectations
    }

    /// The parsed client data fields.
    pub fn client_data(&self) -> &AuditMap {
        &self.client_data
    }

    /// The parsed authenticator data fields.
    pub fn authnr_data(&self) -> &AuditMap {
        &self.authnr_data
    }

    /// The completed audit record.
    pub fn audit(&self) -> &Audit {
        &self.audit
    }

    /// The new signature counter. Persist this against the credential; the
    /// next assertion must exceed it.
    pub fn counter(&self) -> u32 {
        self.counter
    }
}

/// The relying party facade.
pub struct Fido2 {
    config: Fido2Config,
    registry: Arc<RwLock<AttestationFormatRegistry>>,
}

impl Default for Fido2 {
    fn default() -> Self {
        Fido2 {
            config: Fido2Config::default(),
            registry: default_registry(),
        }
    }
}

impl Fido2 {
    /// A facade over the shared format registry.
    pub fn new(config: Fido2Config) -> Fido2Result<Self> {
        config.validate()?;
        Ok(Fido2 {
            config,
            registry: default_registry(),
        })
    }

    /// A facade over an injected format registry, for applications that
    /// need isolated plugin sets.
    pub fn with_registry(
        config: Fido2Config,
        registry: Arc<RwLock<AttestationFormatRegistry>>,
    ) -> Fido2Result<Self> {
        config.validate()?;
        Ok(Fido2 { config, registry })
    }

    /// The active configuration.
    pub fn config(&self) -> &Fido2Config {
        &self.config
    }

    fn challenge_pair(&self, extra_data: Option<&[u8]>) -> (Challenge, Option<Challenge>) {
        match extra_data {
            None => (Challenge::random(self.config.challenge_size), None),
            Some(extra) => {
                let raw = Challenge::random(self.config.challenge_size);
                let mut bound: Vec<u8> = raw.as_ref().to_vec();
                bound.extend_from_slice(extra);
                (Challenge::new(compute_sha256(&bound)), Some(raw))
            }
        }
    }

    /// Issue `PublicKeyCredentialCreationOptions` for a registration
    /// ceremony.
    pub fn attestation_options(&self, request: &OptionsRequest) -> Fido2Result<AttestationOptions> {
        let (challenge, raw_challenge) = self.challenge_pair(request.extra_data.as_deref());

        let authenticator_selection = if self.config.authenticator_attachment.is_some()
            || self.config.authenticator_require_resident_key.is_some()
            || self.config.authenticator_user_verification.is_some()
        {
            Some(AuthenticatorSelectionCriteria {
                authenticator_attachment: self.config.authenticator_attachment,
                require_resident_key: self.config.authenticator_require_resident_key,
                user_verification: self.config.authenticator_user_verification,
            })
        } else {
            None
        };

        Ok(AttestationOptions {
            rp: RelyingParty {
                name: self.config.rp_name.clone(),
                id: self.config.rp_id.clone(),
                icon: self.config.rp_icon.clone(),
            },
            challenge,
            raw_challenge,
            pub_key_cred_params: self
                .config
                .crypto_params
                .iter()
                .map(|alg| PubKeyCredParams {
                    type_: "public-key".to_string(),
                    alg: *alg,
                })
                .collect(),
            timeout: self.config.timeout_ms,
            authenticator_selection,
            attestation: self.config.attestation,
            extensions: request.extensions.clone(),
        })
    }

    /// Issue `PublicKeyCredentialRequestOptions` for an authentication
    /// ceremony.
    pub fn assertion_options(&self, request: &OptionsRequest) -> Fido2Result<AssertionOptions> {
        let (challenge, raw_challenge) = self.challenge_pair(request.extra_data.as_deref());

        Ok(AssertionOptions {
            rp_id: self.config.rp_id.clone(),
            challenge,
            raw_challenge,
            timeout: self.config.timeout_ms,
            user_verification: self.config.authenticator_user_verification,
            extensions: request.extensions.clone(),
        })
    }

    fn build_client_data_map(
        audit: &Audit,
        raw: &[u8],
        raw_id: &[u8],
    ) -> Fido2Result<AuditMap> {
        let parsed = CollectedClientData::parse(raw)?;
        let mut map = AuditMap::new("clientData", audit);
        map.insert("type", AuditValue::Text(parsed.type_));
        map.insert("challenge", AuditValue::Text(parsed.challenge));
        map.insert("origin", AuditValue::Text(parsed.origin));
        if let Some(tb) = parsed.token_binding {
            let tb = serde_json::to_value(tb)
                .map_err(|_| Fido2Error::parse("tokenBinding could not be represented"))?;
            map.insert("tokenBinding", AuditValue::Json(tb));
        }
        map.insert("rawId", AuditValue::Bytes(raw_id.to_vec()));
        Ok(map)
    }

    fn insert_authnr_common(map: &mut AuditMap, auth_data: &AuthenticatorData) -> Fido2Result<()> {
        map.insert("rpIdHash", AuditValue::Bytes(auth_data.rp_id_hash.clone()));
        map.insert("flags", AuditValue::Flags(auth_data.flags.clone()));
        map.insert("counter", AuditValue::Uint(auth_data.counter as u64));

        if let Some(acd) = &auth_data.acd {
            let cose_key = COSEKey::try_from(&acd.credential_pk)?;
            map.insert("aaguid", AuditValue::Bytes(acd.aaguid.clone()));
            map.insert("credId", AuditValue::Bytes(acd.credential_id.clone()));
            map.insert(
                "credentialPublicKeyCose",
                AuditValue::Bytes(acd.credential_pk_bytes.clone()),
            );
            map.insert("credentialPublicKeyJwk", AuditValue::Json(cose_key.to_jwk()));
            map.insert(
                "credentialPublicKeyPem",
                AuditValue::Text(cose_key.to_pem()?),
            );
        }

        if let Some(ext) = &auth_data.extensions {
            map.insert("webAuthnExtensions", AuditValue::Cbor(ext.clone()));
        }
        Ok(())
    }

    fn validate_aaguid(&self, authnr_data: &AuditMap, audit: &Audit) -> Fido2Result<()> {
        if !authnr_data.contains_key("aaguid") {
            return Ok(());
        }
        let aaguid = authnr_data.get_required("aaguid")?.as_bytes()?;
        let uuid = Uuid::from_slice(aaguid)
            .map_err(|_| Fido2Error::parse("aaguid was not 16 bytes"))?;
        audit.info("aaguid", uuid.to_string());

        // Consult the metadata service when collections are registered;
        // absence of metadata is recorded, not fatal. Trust policy over the
        // metadata is the caller's decision.
        if crate::mds::mds_available() {
            match crate::mds::find_mds_entry(&uuid.to_string()) {
                Ok(entries) if !entries.is_empty() => {
                    if let Some(description) = entries[0].description.as_deref() {
                        audit.info("mds-description", description);
                    }
                }
                _ => {
                    audit.warn("aaguid-unknown", "authenticator model not found in metadata");
                }
            }
        }
        Ok(())
    }

    /// Verify a registration response against the caller's expectations.
    pub fn attestation_result(
        &self,
        response: &RegisterPublicKeyCredential,
        expectations: &AttestationExpectations,
    ) -> Fido2Result<AttestationResult> {
        let audit = Audit::new();

        // Parse phase: client data, then the attestation object.
        let client_data_raw: &[u8] = response.response.client_data_json.as_ref();
        let client_data =
            Self::build_client_data_map(&audit, client_data_raw, response.raw_id.as_ref())?;
        let client_data_hash = compute_sha256(client_data_raw);

        let ao_value: serde_cbor::Value =
            serde_cbor::from_slice(response.response.attestation_object.as_ref()).map_err(|e| {
                Fido2Error::parse(format!("attestationObject was not valid CBOR: {}", e))
            })?;
        let ao_map = cbor_try_map!(&ao_value)?;

        let fmt_value = ao_map
            .get(&serde_cbor::Value::Text("fmt".to_string()))
            .ok_or_else(|| Fido2Error::parse("attestationObject missing fmt"))?;
        let fmt = cbor_try_string!(fmt_value)?.clone();

        let auth_data_value = ao_map
            .get(&serde_cbor::Value::Text("authData".to_string()))
            .ok_or_else(|| Fido2Error::parse("attestationObject missing authData"))?;
        let auth_data_raw = cbor_try_bytes!(auth_data_value)?.clone();

        let att_stmt = ao_map
            .get(&serde_cbor::Value::Text("attStmt".to_string()))
            .ok_or_else(|| Fido2Error::parse("attestationObject missing attStmt"))?
            .clone();

        let auth_data = AuthenticatorData::try_from(auth_data_raw.as_slice())?;
        if auth_data.acd.is_none() {
            return Err(Fido2Error::protocol(
                "attestation response did not include attested credential data",
            ));
        }

        let mut authnr_data = AuditMap::new("authnrData", &audit);
        authnr_data.insert("fmt", AuditValue::Text(fmt.clone()));
        Self::insert_authnr_common(&mut authnr_data, &auth_data)?;

        // Copy the format implementation out under a short lived read lock.
        // Plugin code only ever runs after the lock is released, so a
        // panicking plugin fails this request without poisoning the shared
        // registry. A lock poisoned by other means degrades to an error.
        let format = {
            let registry = self.registry.read().map_err(|_| {
                Fido2Error::protocol("attestation format registry lock poisoned")
            })?;
            registry.handle(&fmt)?
        };

        // Format specific parse: the registered parser lifts its statement
        // fields into the map so the validator and the journal see them.
        for (key, value) in format.parse(&att_stmt)? {
            authnr_data.insert(key, value);
        }

        // Audit phase, in pipeline order.
        validate_client_type(&client_data, "webauthn.create")?;
        validate_challenge(&client_data, &expectations.challenge)?;
        let origin = validate_origin(&client_data, &expectations.origin)?;
        validate_token_binding(&client_data, &audit)?;

        let rp_id = match &expectations.rp_id {
            Some(rp_id) => rp_id.clone(),
            None => derive_rp_id(&origin)?,
        };
        validate_rp_id_hash(&authnr_data, &rp_id)?;
        validate_flags(&authnr_data, expectations.factor)?;
        let counter = validate_counter(&authnr_data, None, &audit)?;

        // Attestation statement verification through the format handle.
        let _ = authnr_data.get_required("fmt")?.as_text()?;
        {
            let ctx = AuditContext {
                authnr_data: &authnr_data,
                client_data: &client_data,
                client_data_hash: &client_data_hash,
                authnr_data_raw: &auth_data_raw,
                audit: &audit,
                policy: &self.config.policy,
            };
            format.validate(&ctx)?;
        }

        self.validate_aaguid(&authnr_data, &audit)?;

        // Assemble the credential; this is also what proves the key
        // material fields were examined.
        let raw_id = validate_raw_id(&client_data, None)?;
        let cred_id = authnr_data.get_required("credId")?.as_bytes()?.to_vec();
        if cred_id != raw_id {
            return Err(Fido2Error::protocol(
                "rawId does not match the attested credential id",
            ));
        }

        let cose_bytes = authnr_data
            .get_required("credentialPublicKeyCose")?
            .as_bytes()?;
        let cose_value: serde_cbor::Value = serde_cbor::from_slice(cose_bytes)
            .map_err(|_| Fido2Error::parse("credential public key was not valid CBOR"))?;
        let cose_key = COSEKey::try_from(&cose_value)?;
        let _ = authnr_data.get_required("credentialPublicKeyJwk")?;
        let _ = authnr_data.get_required("credentialPublicKeyPem")?.as_text()?;

        if !self
            .config
            .crypto_params
            .contains(&cose_key.type_.as_i64())
        {
            return Err(Fido2Error::protocol(
                "credential algorithm was not one of the requested cryptoParams",
            ));
        }

        if authnr_data.contains_key("webAuthnExtensions") {
            let _ = authnr_data.get_required("webAuthnExtensions")?;
            audit.info("extensions", "present");
        }

        audit.assert_complete(&[&client_data, &authnr_data])?;

        let verified = auth_data.flags.contains(&AuthenticatorFlag::UV);
        Ok(AttestationResult {
            request: response.clone(),
            expectations: expectations.clone(),
            client_data,
            authnr_data,
            audit,
            credential: Credential {
                cred_id,
                cred: cose_key,
                counter,
                verified,
            },
        })
    }

    /// Verify an authentication response against the caller's expectations.
    pub fn assertion_result(
        &self,
        response: &PublicKeyCredential,
        expectations: &AssertionExpectations,
    ) -> Fido2Result<AssertionResult> {
        let audit = Audit::new();

        let client_data_raw: &[u8] = response.response.client_data_json.as_ref();
        let client_data =
            Self::build_client_data_map(&audit, client_data_raw, response.raw_id.as_ref())?;
        let client_data_hash = compute_sha256(client_data_raw);

        let auth_data_raw: &[u8] = response.response.authenticator_data.as_ref();
        let auth_data = AuthenticatorData::try_from(auth_data_raw)?;

        let mut authnr_data = AuditMap::new("authnrData", &audit);
        Self::insert_authnr_common(&mut authnr_data, &auth_data)?;

        validate_client_type(&client_data, "webauthn.get")?;
        validate_challenge(&client_data, &expectations.challenge)?;
        let origin = validate_origin(&client_data, &expectations.origin)?;
        validate_token_binding(&client_data, &audit)?;

        let rp_id = match &expectations.rp_id {
            Some(rp_id) => rp_id.clone(),
            None => derive_rp_id(&origin)?,
        };
        validate_rp_id_hash(&authnr_data, &rp_id)?;
        validate_flags(&authnr_data, expectations.factor)?;
        let counter = validate_counter(&authnr_data, Some(expectations.prev_counter), &audit)?;

        validate_user_handle(
            response.response.user_handle.as_ref().map(|uh| uh.as_ref()),
            expectations.user_handle.as_deref(),
        )?;
        validate_raw_id(&client_data, expectations.allow_credentials.as_deref())?;

        // The assertion signature covers authenticatorData || SHA-256 of
        // the raw client data.
        let verification_data: Vec<u8> = auth_data_raw
            .iter()
            .chain(client_data_hash.iter())
            .copied()
            .collect();
        let verified = verify_signature_pem(
            &expectations.public_key,
            response.response.signature.as_ref(),
            &verification_data,
        )?;
        if !verified {
            return Err(Fido2Error::sig_invalid(
                "assertion signature verification failed",
            ));
        }

        // Rarely an assertion carries attested credential data or
        // extensions; examine them so the audit closes.
        self.validate_aaguid(&authnr_data, &audit)?;
        if authnr_data.contains_key("credId") {
            let _ = authnr_data.get_required("credId")?;
            let _ = authnr_data.get_required("credentialPublicKeyCose")?;
            let _ = authnr_data.get_required("credentialPublicKeyJwk")?;
            let _ = authnr_data.get_required("credentialPublicKeyPem")?;
        }
        if authnr_data.contains_key("webAuthnExtensions") {
            let _ = authnr_data.get_required("webAuthnExtensions")?;
            audit.info("extensions", "present");
        }

        audit.assert_complete(&[&client_data, &authnr_data])?;

        Ok(AssertionResult {
            request: response.clone(),
            expectations: expectations.clone(),
            client_data,
            authnr_data,
            audit,
            counter,
        })
    }
}
