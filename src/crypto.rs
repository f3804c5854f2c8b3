//! Cryptographic operation wrappers. This module exists to allow ease of
//! auditing and safe operation wrappers for the verification pipeline, and
//! currently uses OpenSSL as the cryptographic primitive provider.
//!
//! Why OpenSSL over another rust crate? The openssl crate allows us to
//! reconstruct a public key from the x/y group coords, where most others want
//! a pkcs formatted structure. As a result it gives us exactly what we need
//! for these operations.

#![allow(non_camel_case_types)]

use openssl::{bn, ec, hash, nid, pkey, rsa, sha, sign, stack, x509};
use serde::{Deserialize, Serialize};
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::oid_registry::Oid;

use crate::base64_data::encode_b64url;
use crate::constants::PACKED_ATTESTATION_OU;
use crate::error::{Fido2Error, Fido2Result};

/// Compute the SHA-256 of a slice of data.
pub fn compute_sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = sha::Sha256::new();
    hasher.update(data);
    hasher.finish().to_vec()
}

/// A COSE algorithm identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum COSEAlgorithm {
    /// ECDSA with SHA-256 over P-256.
    ES256 = -7,
    /// ECDSA with SHA-384 over P-384.
    ES384 = -35,
    /// ECDSA with SHA-512 over P-521.
    ES512 = -36,
    /// EdDSA (Ed25519).
    EDDSA = -8,
    /// RSASSA-PKCS1-v1_5 with SHA-256.
    RS256 = -257,
    /// RSASSA-PKCS1-v1_5 with SHA-1. Windows Hello TPM attestation
    /// statements still sign with this; never offered for credentials.
    INSECURE_RS1 = -65535,
}

impl TryFrom<i128> for COSEAlgorithm {
    type Error = Fido2Error;

    fn try_from(i: i128) -> Fido2Result<Self> {
        match i {
            -7 => Ok(COSEAlgorithm::ES256),
            -35 => Ok(COSEAlgorithm::ES384),
            -36 => Ok(COSEAlgorithm::ES512),
            -8 => Ok(COSEAlgorithm::EDDSA),
            -257 => Ok(COSEAlgorithm::RS256),
            -65535 => {
                warn!("attestation statement uses insecure SHA-1 hashing");
                Ok(COSEAlgorithm::INSECURE_RS1)
            }
            _ => Err(Fido2Error::alg_mismatch(format!(
                "unsupported COSE algorithm: {}",
                i
            ))),
        }
    }
}

impl COSEAlgorithm {
    /// The IANA registered integer value.
    pub fn as_i64(self) -> i64 {
        match self {
            COSEAlgorithm::ES256 => -7,
            COSEAlgorithm::ES384 => -35,
            COSEAlgorithm::ES512 => -36,
            COSEAlgorithm::EDDSA => -8,
            COSEAlgorithm::RS256 => -257,
            COSEAlgorithm::INSECURE_RS1 => -65535,
        }
    }

    /// The JOSE name of this algorithm, as used in JWK.
    pub fn jose_name(self) -> &'static str {
        match self {
            COSEAlgorithm::ES256 => "ES256",
            COSEAlgorithm::ES384 => "ES384",
            COSEAlgorithm::ES512 => "ES512",
            COSEAlgorithm::EDDSA => "EdDSA",
            COSEAlgorithm::RS256 => "RS256",
            COSEAlgorithm::INSECURE_RS1 => "RS1",
        }
    }

    fn digest(self) -> Fido2Result<hash::MessageDigest> {
        match self {
            COSEAlgorithm::ES256 | COSEAlgorithm::RS256 => Ok(hash::MessageDigest::sha256()),
            COSEAlgorithm::ES384 => Ok(hash::MessageDigest::sha384()),
            COSEAlgorithm::ES512 => Ok(hash::MessageDigest::sha512()),
            COSEAlgorithm::INSECURE_RS1 => Ok(hash::MessageDigest::sha1()),
            COSEAlgorithm::EDDSA => Err(Fido2Error::alg_mismatch(
                "EdDSA does not use a separate digest",
            )),
        }
    }
}

/// Hash data with the digest a COSE algorithm implies.
pub(crate) fn hash_by_cose_alg(alg: COSEAlgorithm, data: &[u8]) -> Fido2Result<Vec<u8>> {
    let digest = alg.digest()?;
    hash::hash(digest, data)
        .map(|d| d.to_vec())
        .map_err(Fido2Error::from)
}

/// An ECDSA curve identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ECDSACurve {
    /// NIST P-256, X9_62_PRIME256V1 in OpenSSL.
    SECP256R1 = 1,
    /// NIST P-384.
    SECP384R1 = 2,
    /// NIST P-521.
    SECP521R1 = 3,
}

impl TryFrom<i128> for ECDSACurve {
    type Error = Fido2Error;

    fn try_from(u: i128) -> Fido2Result<Self> {
        match u {
            1 => Ok(ECDSACurve::SECP256R1),
            2 => Ok(ECDSACurve::SECP384R1),
            3 => Ok(ECDSACurve::SECP521R1),
            _ => Err(Fido2Error::parse(format!("invalid EC2 curve: {}", u))),
        }
    }
}

impl ECDSACurve {
    fn to_openssl_nid(self) -> nid::Nid {
        match self {
            ECDSACurve::SECP256R1 => nid::Nid::X9_62_PRIME256V1,
            ECDSACurve::SECP384R1 => nid::Nid::SECP384R1,
            ECDSACurve::SECP521R1 => nid::Nid::SECP521R1,
        }
    }

    /// Coordinate length in bytes for keys on this curve.
    pub fn coordinate_size(self) -> usize {
        match self {
            ECDSACurve::SECP256R1 => 32,
            ECDSACurve::SECP384R1 => 48,
            ECDSACurve::SECP521R1 => 66,
        }
    }

    fn jwk_crv(self) -> &'static str {
        match self {
            ECDSACurve::SECP256R1 => "P-256",
            ECDSACurve::SECP384R1 => "P-384",
            ECDSACurve::SECP521R1 => "P-521",
        }
    }
}

/// An EdDSA curve identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EDDSACurve {
    /// Ed25519.
    ED25519 = 6,
}

impl TryFrom<i128> for EDDSACurve {
    type Error = Fido2Error;

    fn try_from(u: i128) -> Fido2Result<Self> {
        match u {
            6 => Ok(EDDSACurve::ED25519),
            7 => Err(Fido2Error::unsupported("Ed448 keys are not supported")),
            _ => Err(Fido2Error::parse(format!("invalid OKP curve: {}", u))),
        }
    }
}

/// A COSE elliptic curve public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct COSEEC2Key {
    /// The curve this key is on.
    pub curve: ECDSACurve,
    /// The public X coordinate.
    pub x: Vec<u8>,
    /// The public Y coordinate.
    pub y: Vec<u8>,
}

/// A COSE octet key pair public key (Ed25519).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct COSEOKPKey {
    /// The curve this key is on.
    pub curve: EDDSACurve,
    /// The public key bytes.
    pub x: Vec<u8>,
}

/// A COSE RSA public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct COSERSAKey {
    /// The RSA modulus.
    pub n: Vec<u8>,
    /// The RSA public exponent.
    pub e: Vec<u8>,
}

/// The key material inside a [`COSEKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum COSEKeyType {
    /// An octet key pair (kty 1).
    EC_OKP(COSEOKPKey),
    /// An elliptic curve x/y pair (kty 2).
    EC_EC2(COSEEC2Key),
    /// An RSA key (kty 3).
    RSA(COSERSAKey),
}

/// A credential public key as provided by the authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct COSEKey {
    /// The algorithm this key signs with.
    pub type_: COSEAlgorithm,
    /// The public key material.
    pub key: COSEKeyType,
}

impl TryFrom<&serde_cbor::Value> for COSEKey {
    type Error = Fido2Error;

    fn try_from(d: &serde_cbor::Value) -> Fido2Result<COSEKey> {
        let m = cbor_try_map!(d)?;

        // https://tools.ietf.org/html/rfc8152#section-7
        // kty (1) and alg (3) select the layout of the remaining fields.
        let key_type_value = m
            .get(&serde_cbor::Value::Integer(1))
            .ok_or_else(|| Fido2Error::parse("COSE key missing kty (1)"))?;
        let key_type = cbor_try_i128!(key_type_value)?;

        let content_type_value = m
            .get(&serde_cbor::Value::Integer(3))
            .ok_or_else(|| Fido2Error::parse("COSE key missing alg (3)"))?;
        let content_type = cbor_try_i128!(content_type_value)?;
        let type_ = COSEAlgorithm::try_from(content_type)?;

        if key_type == 2
            && (type_ == COSEAlgorithm::ES256
                || type_ == COSEAlgorithm::ES384
                || type_ == COSEAlgorithm::ES512)
        {
            // EC2: crv (-1), x (-2), y (-3).
            let curve_type_value = m
                .get(&serde_cbor::Value::Integer(-1))
                .ok_or_else(|| Fido2Error::parse("COSE EC2 key missing crv (-1)"))?;
            let curve = ECDSACurve::try_from(cbor_try_i128!(curve_type_value)?)?;

            let x_value = m
                .get(&serde_cbor::Value::Integer(-2))
                .ok_or_else(|| Fido2Error::parse("COSE EC2 key missing x (-2)"))?;
            let x = cbor_try_bytes!(x_value)?;

            let y_value = m
                .get(&serde_cbor::Value::Integer(-3))
                .ok_or_else(|| Fido2Error::parse("COSE EC2 key missing y (-3)"))?;
            let y = cbor_try_bytes!(y_value)?;

            let coord_len = curve.coordinate_size();
            if x.len() != coord_len || y.len() != coord_len {
                return Err(Fido2Error::parse("COSE EC2 key coordinate size invalid"));
            }

            let cose_key = COSEKey {
                type_,
                key: COSEKeyType::EC_EC2(COSEEC2Key {
                    curve,
                    x: x.clone(),
                    y: y.clone(),
                }),
            };

            // The rfc states applications MUST check that the curve and the
            // key type are consistent and reject the key if not, which means
            // feeding the coordinates to openssl to validate them for us.
            cose_key.validate()?;
            Ok(cose_key)
        } else if key_type == 3 && type_ == COSEAlgorithm::RS256 {
            // RSA: n (-1), e (-2).
            let n_value = m
                .get(&serde_cbor::Value::Integer(-1))
                .ok_or_else(|| Fido2Error::parse("COSE RSA key missing n (-1)"))?;
            let n = cbor_try_bytes!(n_value)?;

            let e_value = m
                .get(&serde_cbor::Value::Integer(-2))
                .ok_or_else(|| Fido2Error::parse("COSE RSA key missing e (-2)"))?;
            let e = cbor_try_bytes!(e_value)?;

            if n.len() != 256 || e.len() != 3 {
                return Err(Fido2Error::parse("COSE RSA key n/e size invalid"));
            }

            let cose_key = COSEKey {
                type_,
                key: COSEKeyType::RSA(COSERSAKey {
                    n: n.clone(),
                    e: e.clone(),
                }),
            };

            cose_key.validate()?;
            Ok(cose_key)
        } else if key_type == 1 && type_ == COSEAlgorithm::EDDSA {
            // OKP: crv (-1), x (-2). https://datatracker.ietf.org/doc/html/rfc8152#section-13.2
            let curve_type_value = m
                .get(&serde_cbor::Value::Integer(-1))
                .ok_or_else(|| Fido2Error::parse("COSE OKP key missing crv (-1)"))?;
            let curve = EDDSACurve::try_from(cbor_try_i128!(curve_type_value)?)?;

            let x_value = m
                .get(&serde_cbor::Value::Integer(-2))
                .ok_or_else(|| Fido2Error::parse("COSE OKP key missing x (-2)"))?;
            let x = cbor_try_bytes!(x_value)?;

            if x.len() != 32 {
                return Err(Fido2Error::parse("COSE OKP key coordinate size invalid"));
            }

            let cose_key = COSEKey {
                type_,
                key: COSEKeyType::EC_OKP(COSEOKPKey {
                    curve,
                    x: x.clone(),
                }),
            };

            cose_key.validate()?;
            Ok(cose_key)
        } else {
            Err(Fido2Error::alg_mismatch(format!(
                "COSE kty {} and alg {} disagree",
                key_type, content_type
            )))
        }
    }
}

impl COSEKey {
    /// The concatenation `0x04 || x || y`, the raw ANSI X9.62 uncompressed
    /// point used by the FIDO U2F registration format.
    pub(crate) fn get_alg_key_ecc_x962_raw(&self) -> Fido2Result<Vec<u8>> {
        match &self.key {
            COSEKeyType::EC_EC2(ecpk) => {
                let r: [u8; 1] = [0x04];
                Ok(r.iter()
                    .chain(ecpk.x.iter())
                    .chain(ecpk.y.iter())
                    .copied()
                    .collect())
            }
            _ => Err(Fido2Error::alg_mismatch(
                "only EC2 keys have an x9.62 representation",
            )),
        }
    }

    /// Check the key material is mathematically sound.
    pub fn validate(&self) -> Fido2Result<()> {
        self.get_openssl_pkey().map(|_| ())
    }

    fn get_openssl_pkey(&self) -> Fido2Result<pkey::PKey<pkey::Public>> {
        match &self.key {
            COSEKeyType::EC_EC2(ec2k) => {
                let curve = ec2k.curve.to_openssl_nid();
                let ec_group = ec::EcGroup::from_curve_name(curve)?;

                let xbn = bn::BigNum::from_slice(&ec2k.x)?;
                let ybn = bn::BigNum::from_slice(&ec2k.y)?;

                let ec_key = ec::EcKey::from_public_key_affine_coordinates(&ec_group, &xbn, &ybn)?;

                // This checks the point is actually on the curve.
                ec_key.check_key()?;

                Ok(pkey::PKey::from_ec_key(ec_key)?)
            }
            COSEKeyType::RSA(rsak) => {
                let nbn = bn::BigNum::from_slice(&rsak.n)?;
                let ebn = bn::BigNum::from_slice(&rsak.e)?;
                let rsa = rsa::Rsa::from_public_components(nbn, ebn)?;
                Ok(pkey::PKey::from_rsa(rsa)?)
            }
            COSEKeyType::EC_OKP(edk) => {
                let pkey =
                    pkey::PKey::public_key_from_raw_bytes(&edk.x, pkey::Id::ED25519)?;
                Ok(pkey)
            }
        }
    }

    /// This key as an RFC 7517 JWK.
    pub fn to_jwk(&self) -> serde_json::Value {
        match &self.key {
            COSEKeyType::EC_EC2(ec2k) => serde_json::json!({
                "kty": "EC",
                "alg": self.type_.jose_name(),
                "crv": ec2k.curve.jwk_crv(),
                "x": encode_b64url(&ec2k.x),
                "y": encode_b64url(&ec2k.y),
            }),
            COSEKeyType::RSA(rsak) => serde_json::json!({
                "kty": "RSA",
                "alg": self.type_.jose_name(),
                "n": encode_b64url(&rsak.n),
                "e": encode_b64url(&rsak.e),
            }),
            COSEKeyType::EC_OKP(edk) => serde_json::json!({
                "kty": "OKP",
                "alg": self.type_.jose_name(),
                "crv": "Ed25519",
                "x": encode_b64url(&edk.x),
            }),
        }
    }

    /// This key as a PEM encoded SubjectPublicKeyInfo.
    pub fn to_pem(&self) -> Fido2Result<String> {
        let pkey = self.get_openssl_pkey()?;
        let pem = pkey.public_key_to_pem()?;
        String::from_utf8(pem).map_err(|_| Fido2Error::parse("PEM was not valid utf-8"))
    }

    /// Verify `signature` over `verification_data` with this key.
    pub fn verify_signature(
        &self,
        signature: &[u8],
        verification_data: &[u8],
    ) -> Fido2Result<bool> {
        let pkey = self.get_openssl_pkey()?;
        verify_with_pkey(&pkey, self.type_, signature, verification_data)
    }
}

fn verify_with_pkey(
    pkey: &pkey::PKey<pkey::Public>,
    alg: COSEAlgorithm,
    signature: &[u8],
    verification_data: &[u8],
) -> Fido2Result<bool> {
    if alg == COSEAlgorithm::EDDSA {
        let mut verifier = sign::Verifier::new_without_digest(pkey)?;
        return verifier
            .verify_oneshot(signature, verification_data)
            .map_err(Fido2Error::from);
    }
    let mut verifier = sign::Verifier::new(alg.digest()?, pkey)?;
    verifier.update(verification_data)?;
    verifier.verify(signature).map_err(Fido2Error::from)
}

/// Verify `signature` over `verification_data` with the public key of an
/// x509 certificate, using the supplied COSE algorithm.
pub(crate) fn verify_signature_x509(
    alg: COSEAlgorithm,
    cert: &x509::X509,
    signature: &[u8],
    verification_data: &[u8],
) -> Fido2Result<bool> {
    let pkey = cert.public_key()?;
    verify_with_pkey(&pkey, alg, signature, verification_data)
}

/// Verify `signature` over `verification_data` with a PEM encoded public
/// key, using the algorithm the key itself implies.
pub(crate) fn verify_signature_pem(
    pem: &str,
    signature: &[u8],
    verification_data: &[u8],
) -> Fido2Result<bool> {
    let pkey = pkey::PKey::public_key_from_pem(pem.as_bytes())
        .map_err(|_| Fido2Error::parse("publicKey PEM could not be parsed"))?;

    let alg = match pkey.id() {
        pkey::Id::EC => {
            let ec_key = pkey.ec_key()?;
            match ec_key.group().curve_name() {
                Some(nid::Nid::X9_62_PRIME256V1) => COSEAlgorithm::ES256,
                Some(nid::Nid::SECP384R1) => COSEAlgorithm::ES384,
                Some(nid::Nid::SECP521R1) => COSEAlgorithm::ES512,
                _ => {
                    return Err(Fido2Error::alg_mismatch(
                        "publicKey PEM uses an unsupported EC curve",
                    ))
                }
            }
        }
        pkey::Id::RSA => COSEAlgorithm::RS256,
        pkey::Id::ED25519 => COSEAlgorithm::EDDSA,
        _ => {
            return Err(Fido2Error::alg_mismatch(
                "publicKey PEM uses an unsupported key type",
            ))
        }
    };

    verify_with_pkey(&pkey, alg, signature, verification_data)
}

// Extension and requirement checks below parse the DER form with
// x509-parser, since openssl does not expose custom extension values.

pub(crate) const OID_FIDO_GEN_CE_AAGUID: Oid<'static> =
    der_parser::oid!(1.3.6 .1 .4 .1 .45724 .1 .1 .4);
pub(crate) const OID_TCG_KP_AIK_CERTIFICATE: Oid<'static> = der_parser::oid!(2.23.133 .8 .3);
pub(crate) const OID_TCG_AT_TPM_MANUFACTURER: Oid<'static> = der_parser::oid!(2.23.133 .2 .1);
pub(crate) const OID_TCG_AT_TPM_MODEL: Oid<'static> = der_parser::oid!(2.23.133 .2 .2);
pub(crate) const OID_TCG_AT_TPM_VERSION: Oid<'static> = der_parser::oid!(2.23.133 .2 .3);

fn with_parsed_cert<T>(
    cert: &x509::X509,
    f: impl FnOnce(&x509_parser::certificate::X509Certificate) -> Fido2Result<T>,
) -> Fido2Result<T> {
    let der = cert.to_der()?;
    let (_, parsed) = x509_parser::parse_x509_certificate(&der)
        .map_err(|_| Fido2Error::parse("x509 certificate could not be parsed"))?;
    f(&parsed)
}

/// Extract the id-fido-gen-ce-aaguid extension value (a DER OCTET STRING
/// holding the 16 byte aaguid), when the certificate carries it.
pub(crate) fn fido_gen_ce_aaguid(cert: &x509::X509) -> Fido2Result<Option<Vec<u8>>> {
    with_parsed_cert(cert, |parsed| {
        for extension in parsed.extensions() {
            if extension.oid == OID_FIDO_GEN_CE_AAGUID {
                let (_, obj) = der_parser::der::parse_der_octetstring(extension.value)
                    .map_err(|_| Fido2Error::parse("id-fido-gen-ce-aaguid was not an octet string"))?;
                let aaguid = obj
                    .as_slice()
                    .map_err(|_| Fido2Error::parse("id-fido-gen-ce-aaguid was not an octet string"))?;
                if aaguid.len() != 16 {
                    return Err(Fido2Error::parse("id-fido-gen-ce-aaguid was not 16 bytes"));
                }
                return Ok(Some(aaguid.to_vec()));
            }
        }
        Ok(None)
    })
}

/// If the certificate carries the aaguid extension, require it to match the
/// authenticator data's aaguid.
pub(crate) fn validate_cert_aaguid(cert: &x509::X509, aaguid: &[u8]) -> Fido2Result<()> {
    match fido_gen_ce_aaguid(cert)? {
        Some(cert_aaguid) if cert_aaguid != aaguid => Err(Fido2Error::trust_path(
            "certificate aaguid does not match authenticator data",
        )),
        _ => Ok(()),
    }
}

fn basic_constraints_ca(cert: &x509::X509) -> Fido2Result<Option<bool>> {
    with_parsed_cert(cert, |parsed| {
        for extension in parsed.extensions() {
            if let ParsedExtension::BasicConstraints(bc) = extension.parsed_extension() {
                return Ok(Some(bc.ca));
            }
        }
        Ok(None)
    })
}

/// Verify that an attestation certificate meets the requirements of
/// webauthn §8.2.1 (Packed Attestation Statement Certificate Requirements).
pub(crate) fn assert_packed_attest_req(cert: &x509::X509) -> Fido2Result<()> {
    // Version MUST be set to 3, which DER encodes as the integer 2.
    if cert.version() != 2 {
        return Err(Fido2Error::trust_path(
            "attestation certificate is not x509 v3",
        ));
    }

    let subject = cert.subject_name();
    let subject_c = subject.entries_by_nid(nid::Nid::COUNTRYNAME).next();
    let subject_o = subject.entries_by_nid(nid::Nid::ORGANIZATIONNAME).next();
    let subject_cn = subject.entries_by_nid(nid::Nid::COMMONNAME).next();
    let subject_ou = subject
        .entries_by_nid(nid::Nid::ORGANIZATIONALUNITNAME)
        .next();

    if subject_c.is_none() || subject_o.is_none() || subject_cn.is_none() {
        return Err(Fido2Error::trust_path(
            "attestation certificate subject is incomplete",
        ));
    }

    let ou_ok = subject_ou
        .and_then(|ou| ou.data().as_utf8().ok())
        .map(|ou| ou.to_string() == PACKED_ATTESTATION_OU)
        .unwrap_or(false);
    if !ou_ok {
        return Err(Fido2Error::trust_path(format!(
            "attestation certificate subject OU is not \"{}\"",
            PACKED_ATTESTATION_OU
        )));
    }

    // The Basic Constraints extension MUST have the CA component set to false.
    if basic_constraints_ca(cert)? != Some(false) {
        return Err(Fido2Error::trust_path(
            "attestation certificate basicConstraints CA is not false",
        ));
    }

    Ok(())
}

/// Verify that an AIK certificate meets the requirements of webauthn §8.3.1
/// (TPM Attestation Statement Certificate Requirements).
pub(crate) fn assert_tpm_attest_req(cert: &x509::X509) -> Fido2Result<()> {
    if cert.version() != 2 {
        return Err(Fido2Error::trust_path("AIK certificate is not x509 v3"));
    }

    // Subject field MUST be set to empty.
    if cert.subject_name().entries().next().is_some() {
        return Err(Fido2Error::trust_path("AIK certificate subject is not empty"));
    }

    with_parsed_cert(cert, |parsed| {
        let mut manufacturer = None;
        let mut model = None;
        let mut version = None;
        let mut eku_ok = false;
        let mut ca = None;

        for extension in parsed.extensions() {
            match extension.parsed_extension() {
                ParsedExtension::SubjectAlternativeName(san) => {
                    for general_name in &san.general_names {
                        if let GeneralName::DirectoryName(dn) = general_name {
                            for rdn in dn.iter() {
                                for attr in rdn.iter() {
                                    let value = attr.as_str().ok().map(str::to_string);
                                    if *attr.attr_type() == OID_TCG_AT_TPM_MANUFACTURER {
                                        manufacturer = value;
                                    } else if *attr.attr_type() == OID_TCG_AT_TPM_MODEL {
                                        model = value;
                                    } else if *attr.attr_type() == OID_TCG_AT_TPM_VERSION {
                                        version = value;
                                    }
                                }
                            }
                        }
                    }
                }
                ParsedExtension::ExtendedKeyUsage(eku) => {
                    eku_ok = eku.other.iter().any(|o| *o == OID_TCG_KP_AIK_CERTIFICATE);
                }
                ParsedExtension::BasicConstraints(bc) => {
                    ca = Some(bc.ca);
                }
                _ => {}
            }
        }

        if manufacturer.is_none() || model.is_none() || version.is_none() {
            return Err(Fido2Error::trust_path(
                "AIK certificate SAN is missing TPM manufacturer, model or version",
            ));
        }

        if !eku_ok {
            return Err(Fido2Error::trust_path(
                "AIK certificate extended key usage is missing tcg-kp-AIKCertificate",
            ));
        }

        if ca != Some(false) {
            return Err(Fido2Error::trust_path(
                "AIK certificate basicConstraints CA is not false",
            ));
        }

        Ok(())
    })
}

/// Verify `leaf` (plus any intermediates in `chain`) terminates at one of
/// the supplied root certificates.
pub(crate) fn verify_x509_chain(
    leaf: &x509::X509,
    chain: &[x509::X509],
    roots: &[x509::X509],
    danger_disable_certificate_time_checks: bool,
) -> Fido2Result<()> {
    if roots.is_empty() {
        return Err(Fido2Error::trust_path("no trust anchors supplied"));
    }

    let mut chain_stack = stack::Stack::new()?;
    for crt in chain {
        chain_stack.push(crt.clone())?;
    }

    let mut ca_store = x509::store::X509StoreBuilder::new()?;

    // In tests we may need to allow disabling time window validity.
    if danger_disable_certificate_time_checks {
        ca_store.set_flags(x509::verify::X509VerifyFlags::NO_CHECK_TIME)?;
    }

    for root in roots {
        ca_store.add_cert(root.clone())?;
    }
    let ca_store = ca_store.build();

    let mut ca_ctx = x509::X509StoreContext::new()?;
    let res = ca_ctx.init(&ca_store, leaf, &chain_stack, |ca_ctx_ref| {
        ca_ctx_ref.verify_cert().map(|_| ca_ctx_ref.error())
    })?;

    if res != x509::X509VerifyResult::OK {
        error!("certificate chain validation failed: {}", res);
        return Err(Fido2Error::trust_path(format!(
            "certificate chain is not trusted: {}",
            res
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use serde_cbor::Value;

    #[test]
    fn cbor_es256() {
        let hex_data = hex!(
                "A5"         // Map - 5 elements
                "01 02"      //   1:   2,  ; kty: EC2 key type
                "03 26"      //   3:  -7,  ; alg: ES256 signature algorithm
                "20 01"      //  -1:   1,  ; crv: P-256 curve
                "21 58 20   65eda5a12577c2bae829437fe338701a10aaa375e1bb5b5de108de439c08551d" // -2:   x,  ; x-coordinate
                "22 58 20   1e52ed75701163f7f9e40ddf9f341b3dc9ba860af7e0ca7ca7e9eecd0084d19c" // -3:   y,  ; y-coordinate
        );

        let val: Value = serde_cbor::from_slice(&hex_data).unwrap();
        let key = COSEKey::try_from(&val).unwrap();

        assert_eq!(key.type_, COSEAlgorithm::ES256);
        match &key.key {
            COSEKeyType::EC_EC2(pkey) => {
                assert_eq!(
                    pkey.x.as_slice(),
                    hex!("65eda5a12577c2bae829437fe338701a10aaa375e1bb5b5de108de439c08551d")
                );
                assert_eq!(
                    pkey.y.as_slice(),
                    hex!("1e52ed75701163f7f9e40ddf9f341b3dc9ba860af7e0ca7ca7e9eecd0084d19c")
                );
                assert_eq!(pkey.curve, ECDSACurve::SECP256R1);
            }
            _ => panic!("Key should be parsed EC2 key"),
        }

        let jwk = key.to_jwk();
        assert_eq!(jwk["kty"], "EC");
        assert_eq!(jwk["crv"], "P-256");
        assert_eq!(jwk["alg"], "ES256");

        let pem = key.to_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
    }

    #[test]
    fn cbor_ed25519() {
        let hex_data = hex!(
            "A4"         // Map - 4 elements
            "01 01"      //   1:   1,  ; kty: OKP key type
            "03 27"      //   3:  -8,  ; alg: EDDSA signature algorithm
            "20 06"      //  -1:   6,  ; crv: Ed25519 curve
            "21 58 20   43565027f918beb00257d112b903d15b93f5cbc7562dfc8458fbefd714546e3c" // -2:   x
        );
        let val: Value = serde_cbor::from_slice(&hex_data).unwrap();
        let key = COSEKey::try_from(&val).unwrap();
        assert_eq!(key.type_, COSEAlgorithm::EDDSA);
        match &key.key {
            COSEKeyType::EC_OKP(pkey) => {
                assert_eq!(
                    pkey.x.as_slice(),
                    hex!("43565027f918beb00257d112b903d15b93f5cbc7562dfc8458fbefd714546e3c")
                );
                assert_eq!(pkey.curve, EDDSACurve::ED25519);
            }
            _ => panic!("Key should be parsed OKP key"),
        }
        assert_eq!(key.to_jwk()["crv"], "Ed25519");
    }

    #[test]
    fn cbor_rejects_mismatched_kty_alg() {
        // kty EC2 with alg RS256.
        let hex_data = hex!(
            "A5"
            "01 02"
            "03 39 0100"
            "20 01"
            "21 58 20 65eda5a12577c2bae829437fe338701a10aaa375e1bb5b5de108de439c08551d"
            "22 58 20 1e52ed75701163f7f9e40ddf9f341b3dc9ba860af7e0ca7ca7e9eecd0084d19c"
        );
        let val: Value = serde_cbor::from_slice(&hex_data).unwrap();
        let e = COSEKey::try_from(&val).unwrap_err();
        assert_eq!(e.kind, crate::error::ErrorKind::AlgMismatch);
    }

    #[test]
    fn cbor_rejects_point_off_curve() {
        // Valid layout, garbage y coordinate.
        let hex_data = hex!(
            "A5"
            "01 02"
            "03 26"
            "20 01"
            "21 58 20 65eda5a12577c2bae829437fe338701a10aaa375e1bb5b5de108de439c08551d"
            "22 58 20 0000000000000000000000000000000000000000000000000000000000000001"
        );
        let val: Value = serde_cbor::from_slice(&hex_data).unwrap();
        assert!(COSEKey::try_from(&val).is_err());
    }
}
