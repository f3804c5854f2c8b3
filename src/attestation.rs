//! Built-in attestation statement formats.
//!
//! Each format is a (parse, validate) pair registered with the
//! [`crate::registry::AttestationFormatRegistry`]. Parsers lift the fields a
//! format needs out of the CBOR `attStmt`; validators perform the webauthn
//! verification procedure for that format against the audit context.
//!
//! The TPM format lives in [`crate::tpm`] with its TCG structure parsers.

use openssl::x509;
use std::collections::BTreeMap;

use crate::audit::AuditContext;
use crate::base64_data::decode_forgiving;
use crate::constants::SAFETYNET_HOSTNAME;
use crate::crypto::{
    assert_packed_attest_req, compute_sha256, validate_cert_aaguid, verify_signature_x509,
    COSEAlgorithm, COSEKey,
};
use crate::error::{Fido2Error, Fido2Result};

pub(crate) fn att_stmt_map(
    att_stmt: &serde_cbor::Value,
) -> Fido2Result<&BTreeMap<serde_cbor::Value, serde_cbor::Value>> {
    match att_stmt {
        serde_cbor::Value::Map(m) => Ok(m),
        _ => Err(Fido2Error::parse("attStmt was not a CBOR map")),
    }
}

pub(crate) fn stmt_required<'a>(
    map: &'a BTreeMap<serde_cbor::Value, serde_cbor::Value>,
    key: &str,
) -> Fido2Result<&'a serde_cbor::Value> {
    map.get(&serde_cbor::Value::Text(key.to_string()))
        .ok_or_else(|| Fido2Error::protocol(format!("attStmt missing required field: {}", key)))
}

/// Decode an `x5c` CBOR array into certificates, leaf first.
pub(crate) fn x5c_to_certs(x5c: &serde_cbor::Value) -> Fido2Result<Vec<x509::X509>> {
    let arr = cbor_try_array!(x5c)?;
    arr.iter()
        .map(|v| {
            let der = cbor_try_bytes!(v)?;
            x509::X509::from_der(der)
                .map_err(|_| Fido2Error::parse("x5c entry was not a DER certificate"))
        })
        .collect()
}

/// Reconstruct the credential COSE key out of the audit map.
pub(crate) fn credential_cose_key(ctx: &AuditContext<'_>) -> Fido2Result<COSEKey> {
    let cose_bytes = ctx
        .authnr_data
        .get_required("credentialPublicKeyCose")?
        .as_bytes()?;
    let value: serde_cbor::Value = serde_cbor::from_slice(cose_bytes)
        .map_err(|_| Fido2Error::parse("credential public key was not valid CBOR"))?;
    COSEKey::try_from(&value)
}

// --- none ------------------------------------------------------------------

/// `none`: no statement fields.
pub fn none_parse(att_stmt: &serde_cbor::Value) -> Fido2Result<serde_cbor::Value> {
    // The statement must still be a (possibly empty) map on the wire.
    att_stmt_map(att_stmt)?;
    Ok(serde_cbor::Value::Map(BTreeMap::new()))
}

/// `none`: nothing to verify.
pub fn none_validate(ctx: &AuditContext<'_>) -> Fido2Result<bool> {
    ctx.audit.info("attestation-type", "none");
    Ok(true)
}

// --- fido-u2f --------------------------------------------------------------

/// `fido-u2f`: extract the certificate and DER ECDSA signature.
pub fn fidou2f_parse(att_stmt: &serde_cbor::Value) -> Fido2Result<serde_cbor::Value> {
    let map = att_stmt_map(att_stmt)?;
    let sig = stmt_required(map, "sig")?.clone();
    let x5c = stmt_required(map, "x5c")?.clone();

    let mut out = BTreeMap::new();
    out.insert(serde_cbor::Value::Text("sig".to_string()), sig);
    out.insert(serde_cbor::Value::Text("x5c".to_string()), x5c);
    Ok(serde_cbor::Value::Map(out))
}

/// `fido-u2f`: §8.6 of the webauthn spec, the CTAP1 signature layout.
pub fn fidou2f_validate(ctx: &AuditContext<'_>) -> Fido2Result<bool> {
    let certs = x5c_to_certs(ctx.authnr_data.get_required("x5c")?.as_cbor()?)?;
    // x5c contains exactly one element: the attestation certificate.
    if certs.len() != 1 {
        return Err(Fido2Error::protocol(
            "fido-u2f attestation requires exactly one certificate",
        ));
    }
    let att_cert = &certs[0];

    let sig = ctx.authnr_data.get_required("sig")?.as_bytes()?;

    let credential_public_key = credential_cose_key(ctx)?;
    if credential_public_key.type_ != COSEAlgorithm::ES256 {
        return Err(Fido2Error::alg_mismatch(
            "fido-u2f requires a P-256 credential key",
        ));
    }
    let public_key_u2f = credential_public_key.get_alg_key_ecc_x962_raw()?;

    let rp_id_hash = ctx.authnr_data.get_required("rpIdHash")?.as_bytes()?;
    let cred_id = ctx.authnr_data.get_required("credId")?.as_bytes()?;

    // verificationData = 0x00 || rpIdHash || clientDataHash || credentialId
    //                    || publicKeyU2F
    let r: [u8; 1] = [0x00];
    let verification_data: Vec<u8> = r
        .iter()
        .chain(rp_id_hash.iter())
        .chain(ctx.client_data_hash.iter())
        .chain(cred_id.iter())
        .chain(public_key_u2f.iter())
        .copied()
        .collect();

    let verified = verify_signature_x509(
        COSEAlgorithm::ES256,
        att_cert,
        sig,
        &verification_data,
    )?;
    if !verified {
        return Err(Fido2Error::sig_invalid(
            "fido-u2f attestation signature verification failed",
        ));
    }

    ctx.audit.info("attestation-type", "basic");
    Ok(true)
}

// --- packed ----------------------------------------------------------------

/// `packed`: extract alg, sig and the optional x5c / ecdaaKeyId.
pub fn packed_parse(att_stmt: &serde_cbor::Value) -> Fido2Result<serde_cbor::Value> {
    let map = att_stmt_map(att_stmt)?;
    let alg = stmt_required(map, "alg")?.clone();
    let sig = stmt_required(map, "sig")?.clone();

    let mut out = BTreeMap::new();
    out.insert(serde_cbor::Value::Text("alg".to_string()), alg);
    out.insert(serde_cbor::Value::Text("sig".to_string()), sig);
    for optional in ["x5c", "ecdaaKeyId"] {
        if let Some(v) = map.get(&serde_cbor::Value::Text(optional.to_string())) {
            out.insert(serde_cbor::Value::Text(optional.to_string()), v.clone());
        }
    }
    Ok(serde_cbor::Value::Map(out))
}

/// `packed`: §8.2 of the webauthn spec. Basic/AttCA with x5c, Self without.
pub fn packed_validate(ctx: &AuditContext<'_>) -> Fido2Result<bool> {
    if ctx.authnr_data.contains_key("ecdaaKeyId") {
        let _ = ctx.authnr_data.get("ecdaaKeyId");
        return Err(Fido2Error::unsupported(
            "packed ECDAA attestation is not supported",
        ));
    }

    let alg = COSEAlgorithm::try_from(ctx.authnr_data.get_required("alg")?.as_int()? as i128)?;
    let sig = ctx.authnr_data.get_required("sig")?.as_bytes()?;

    // The signed bytes are authenticatorData || clientDataHash.
    let verification_data: Vec<u8> = ctx
        .authnr_data_raw
        .iter()
        .chain(ctx.client_data_hash.iter())
        .copied()
        .collect();

    if ctx.authnr_data.contains_key("x5c") {
        // Basic or AttCA attestation with the leaf certificate's key.
        let certs = x5c_to_certs(ctx.authnr_data.get_required("x5c")?.as_cbor()?)?;
        let attestn_cert = certs
            .first()
            .ok_or_else(|| Fido2Error::protocol("packed x5c carried no certificates"))?;

        let verified = verify_signature_x509(alg, attestn_cert, sig, &verification_data)?;
        if !verified {
            return Err(Fido2Error::sig_invalid(
                "packed attestation signature verification failed",
            ));
        }

        // §8.2.1 certificate requirements, then the aaguid extension.
        assert_packed_attest_req(attestn_cert)?;
        let aaguid = ctx.authnr_data.get_required("aaguid")?.as_bytes()?;
        validate_cert_aaguid(attestn_cert, aaguid)?;

        ctx.audit.info("attestation-type", "basic");
    } else {
        // Self attestation with the credential's own key.
        let credential_public_key = credential_cose_key(ctx)?;
        if alg != credential_public_key.type_ {
            return Err(Fido2Error::alg_mismatch(
                "packed attestation alg does not match the credential algorithm",
            ));
        }

        let verified = credential_public_key.verify_signature(sig, &verification_data)?;
        if !verified {
            return Err(Fido2Error::sig_invalid(
                "packed attestation signature verification failed",
            ));
        }

        ctx.audit.info("attestation-type", "self");
    }

    Ok(true)
}

// --- android-safetynet -----------------------------------------------------

#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SafetyNetClaims {
    timestamp_ms: u64,
    #[serde(default)]
    apk_package_name: Option<String>,
    #[serde(default)]
    apk_certificate_digest_sha256: Option<Vec<String>>,
    cts_profile_match: bool,
    basic_integrity: bool,
    #[serde(default)]
    evaluation_type: Option<String>,
}

/// `android-safetynet`: extract the version and the JWS bytes.
pub fn safetynet_parse(att_stmt: &serde_cbor::Value) -> Fido2Result<serde_cbor::Value> {
    let map = att_stmt_map(att_stmt)?;
    let ver = stmt_required(map, "ver")?.clone();
    let response = stmt_required(map, "response")?.clone();

    let mut out = BTreeMap::new();
    out.insert(serde_cbor::Value::Text("ver".to_string()), ver);
    out.insert(serde_cbor::Value::Text("response".to_string()), response);
    Ok(serde_cbor::Value::Map(out))
}

/// `android-safetynet`: §8.5 of the webauthn spec plus the SafetyNet
/// response checks.
pub fn safetynet_validate(ctx: &AuditContext<'_>) -> Fido2Result<bool> {
    use jwt_simple::prelude::*;

    // There is only one response version; read it so the audit sees it.
    let _ver = ctx.authnr_data.get_required("ver")?.as_text()?;

    let response = ctx.authnr_data.get_required("response")?.as_bytes()?;
    let token = std::str::from_utf8(response)
        .map_err(|_| Fido2Error::parse("safetynet response was not valid utf-8"))?;

    let meta = jwt_simple::token::Token::decode_metadata(token)
        .map_err(|_| Fido2Error::parse("safetynet response was not a JWS"))?;

    if meta.algorithm() != "RS256" {
        return Err(Fido2Error::alg_mismatch(format!(
            "safetynet JWS alg was not RS256, got: {}",
            meta.algorithm()
        )));
    }

    let certs = meta
        .certificate_chain()
        .ok_or_else(|| Fido2Error::protocol("safetynet JWS carried no certificate chain"))?
        .iter()
        .map(|cert| {
            base64::decode(cert)
                .map_err(|_| Fido2Error::parse("safetynet x5c entry was not base64"))
                .and_then(|der| {
                    x509::X509::from_der(&der)
                        .map_err(|_| Fido2Error::parse("safetynet x5c entry was not DER"))
                })
        })
        .collect::<Fido2Result<Vec<_>>>()?;

    let leaf = certs
        .first()
        .ok_or_else(|| Fido2Error::protocol("safetynet JWS carried no certificate chain"))?;

    // The response must come from the SafetyNet service itself.
    let common_name = leaf
        .subject_name()
        .entries_by_nid(openssl::nid::Nid::COMMONNAME)
        .next()
        .and_then(|e| e.data().as_utf8().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| Fido2Error::trust_path("safetynet leaf certificate has no CN"))?;
    if common_name != SAFETYNET_HOSTNAME {
        return Err(Fido2Error::trust_path(format!(
            "safetynet leaf certificate was not issued to {}, got: {}",
            SAFETYNET_HOSTNAME, common_name
        )));
    }

    let public_key_der = leaf.public_key()?.public_key_to_der()?;
    let verified_claims: JWTClaims<SafetyNetClaims> = RS256PublicKey::from_der(&public_key_der)
        .map_err(|_| Fido2Error::parse("safetynet leaf key was not an RSA key"))?
        .verify_token(token, Some(VerificationOptions::default()))
        .map_err(|_| Fido2Error::sig_invalid("safetynet JWS signature verification failed"))?;

    // nonce == base64(SHA-256(authenticatorData || clientDataHash))
    let expected_nonce: Vec<u8> = {
        let data: Vec<u8> = ctx
            .authnr_data_raw
            .iter()
            .chain(ctx.client_data_hash.iter())
            .copied()
            .collect();
        compute_sha256(&data)
    };
    let nonce = verified_claims
        .nonce
        .as_deref()
        .ok_or_else(|| Fido2Error::protocol("safetynet response carried no nonce"))?;
    let nonce = decode_forgiving(nonce)
        .map_err(|_| Fido2Error::parse("safetynet nonce was not base64"))?;
    if nonce != expected_nonce {
        return Err(Fido2Error::protocol("safetynet nonce mismatch"));
    }

    if !verified_claims.custom.cts_profile_match {
        return Err(Fido2Error::protocol("safetynet ctsProfileMatch was not true"));
    }
    if !verified_claims.custom.basic_integrity {
        return Err(Fido2Error::protocol("safetynet basicIntegrity was not true"));
    }

    // timestampMs must sit inside the configured window around now.
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let distance = now_ms.abs_diff(verified_claims.custom.timestamp_ms);
    if distance > ctx.policy.safetynet_timestamp_window_ms {
        return Err(Fido2Error::protocol(
            "safetynet timestamp was outside the allowed window",
        ));
    }

    ctx.audit.info("attestation-type", "basic");
    Ok(true)
}
