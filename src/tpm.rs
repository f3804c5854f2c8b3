//! TPM 2.0 attestation.
//!
//! The `tpm` statement format carries two TCG binary structures rather than
//! CBOR: `TPMS_ATTEST` (the signed certification of the key) and
//! `TPMT_PUBLIC` (the TPM's representation of the credential public key).
//! Layouts per TPMv2-Part2 sections 10.12.8 and 12.2.4.

use byteorder::{BigEndian, ByteOrder};
use std::collections::BTreeMap;

use crate::attestation::{att_stmt_map, stmt_required, x5c_to_certs};
use crate::audit::AuditContext;
use crate::constants::{TPM_GENERATED_VALUE, TPM_ST_ATTEST_CERTIFY};
use crate::crypto::{
    assert_tpm_attest_req, compute_sha256, hash_by_cose_alg, validate_cert_aaguid,
    verify_signature_x509, COSEAlgorithm, COSEKeyType,
};
use crate::error::{Fido2Error, Fido2Result};

/// A byte cursor over a TCG structure.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Fido2Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| Fido2Error::parse("unexpected end of TPM structure"))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Fido2Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16_be(&mut self) -> Fido2Result<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    fn u32_be(&mut self) -> Fido2Result<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    fn u64_be(&mut self) -> Fido2Result<u64> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    /// A TPM2B_*: a u16 length followed by that many bytes.
    fn tpm2b(&mut self) -> Fido2Result<&'a [u8]> {
        let len = self.u16_be()? as usize;
        self.take(len)
    }

    fn finish(&self) -> Fido2Result<()> {
        if self.pos != self.data.len() {
            return Err(Fido2Error::parse("trailing bytes after TPM structure"));
        }
        Ok(())
    }
}

/// The subset of TPM_ALG_ID values attestations use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmAlgId {
    /// TPM_ALG_RSA
    Rsa,
    /// TPM_ALG_SHA1
    Sha1,
    /// TPM_ALG_SHA256
    Sha256,
    /// TPM_ALG_SHA384
    Sha384,
    /// TPM_ALG_SHA512
    Sha512,
    /// TPM_ALG_NULL
    Null,
    /// TPM_ALG_RSASSA
    RsaSsa,
    /// TPM_ALG_ECDSA
    EcDsa,
    /// TPM_ALG_ECC
    Ecc,
}

impl TryFrom<u16> for TpmAlgId {
    type Error = Fido2Error;

    fn try_from(v: u16) -> Fido2Result<Self> {
        match v {
            0x0001 => Ok(TpmAlgId::Rsa),
            0x0004 => Ok(TpmAlgId::Sha1),
            0x000b => Ok(TpmAlgId::Sha256),
            0x000c => Ok(TpmAlgId::Sha384),
            0x000d => Ok(TpmAlgId::Sha512),
            0x0010 => Ok(TpmAlgId::Null),
            0x0014 => Ok(TpmAlgId::RsaSsa),
            0x0018 => Ok(TpmAlgId::EcDsa),
            0x0023 => Ok(TpmAlgId::Ecc),
            _ => Err(Fido2Error::parse(format!("unknown TPM_ALG_ID: {:#06x}", v))),
        }
    }
}

const TPM_ALG_NULL_RAW: u16 = 0x0010;

/// TPMS_CLOCK_INFO.
#[derive(Debug, Clone)]
pub struct TpmsClockInfo {
    /// TPM clock in milliseconds.
    pub clock: u64,
    /// Orderly reset count.
    pub reset_count: u32,
    /// Restart count.
    pub restart_count: u32,
    /// Whether clock is guaranteed to not move backwards.
    pub safe: bool,
}

/// The attested union of a TPMS_ATTEST. Only TPM_ST_ATTEST_CERTIFY is
/// meaningful for webauthn.
#[derive(Debug, Clone)]
pub enum TpmuAttest {
    /// TPMS_CERTIFY_INFO: the name and qualified name of the certified key.
    AttestCertify {
        /// The name, a hash alg id prefix followed by the digest of the
        /// certified TPMT_PUBLIC.
        name: Vec<u8>,
        /// The qualified name.
        qualified_name: Vec<u8>,
    },
}

/// TPMS_ATTEST, TPMv2-Part2 §10.12.8.
#[derive(Debug, Clone)]
pub struct TpmsAttest {
    /// Must be TPM_GENERATED_VALUE.
    pub magic: u32,
    /// The attestation structure type tag.
    pub type_: u16,
    /// The name of the signing key.
    pub qualified_signer: Vec<u8>,
    /// Caller supplied data - for webauthn, the hash of
    /// authenticatorData || clientDataHash.
    pub extra_data: Vec<u8>,
    /// TPM clock state at signing time.
    pub clock_info: TpmsClockInfo,
    /// The TPM firmware version.
    pub firmware_version: u64,
    /// The certified structure.
    pub attested: TpmuAttest,
}

impl TryFrom<&[u8]> for TpmsAttest {
    type Error = Fido2Error;

    fn try_from(data: &[u8]) -> Fido2Result<Self> {
        let mut c = Cursor::new(data);

        let magic = c.u32_be()?;
        let type_ = c.u16_be()?;
        let qualified_signer = c.tpm2b()?.to_vec();
        let extra_data = c.tpm2b()?.to_vec();
        let clock_info = TpmsClockInfo {
            clock: c.u64_be()?,
            reset_count: c.u32_be()?,
            restart_count: c.u32_be()?,
            safe: c.u8()? != 0,
        };
        let firmware_version = c.u64_be()?;

        let attested = match type_ {
            TPM_ST_ATTEST_CERTIFY => TpmuAttest::AttestCertify {
                name: c.tpm2b()?.to_vec(),
                qualified_name: c.tpm2b()?.to_vec(),
            },
            other => {
                return Err(Fido2Error::parse(format!(
                    "unsupported TPMS_ATTEST type: {:#06x}",
                    other
                )))
            }
        };
        c.finish()?;

        Ok(TpmsAttest {
            magic,
            type_,
            qualified_signer,
            extra_data,
            clock_info,
            firmware_version,
            attested,
        })
    }
}

/// The algorithm specific parameters of a TPMT_PUBLIC.
#[derive(Debug, Clone)]
pub enum TpmuPublicParms {
    /// TPMS_RSA_PARMS.
    Rsa {
        /// The symmetric algorithm (TPM_ALG_NULL for attestation keys).
        symmetric: u16,
        /// The signing scheme.
        scheme: u16,
        /// Key size in bits.
        key_bits: u16,
        /// Public exponent; zero means the default 65537.
        exponent: u32,
    },
    /// TPMS_ECC_PARMS.
    Ecc {
        /// The symmetric algorithm.
        symmetric: u16,
        /// The signing scheme.
        scheme: u16,
        /// The curve id.
        curve_id: u16,
        /// The kdf scheme.
        kdf: u16,
    },
}

/// The unique (public key) field of a TPMT_PUBLIC.
#[derive(Debug, Clone)]
pub enum TpmuPublicId {
    /// An RSA modulus.
    Rsa(Vec<u8>),
    /// An ECC point.
    Ecc {
        /// X coordinate.
        x: Vec<u8>,
        /// Y coordinate.
        y: Vec<u8>,
    },
}

/// TPMT_PUBLIC, TPMv2-Part2 §12.2.4.
#[derive(Debug, Clone)]
pub struct TpmtPublic {
    /// The key algorithm.
    pub type_: TpmAlgId,
    /// The algorithm the TPM names this object with.
    pub name_alg: TpmAlgId,
    /// TPMA_OBJECT attribute bits.
    pub object_attributes: u32,
    /// The authorization policy digest.
    pub auth_policy: Vec<u8>,
    /// Algorithm specific parameters.
    pub parameters: TpmuPublicParms,
    /// The public key itself.
    pub unique: TpmuPublicId,
}

// TPMT_SYM_DEF_OBJECT: algorithm, then keyBits + mode unless null.
fn read_symmetric(c: &mut Cursor<'_>) -> Fido2Result<u16> {
    let alg = c.u16_be()?;
    if alg != TPM_ALG_NULL_RAW {
        let _key_bits = c.u16_be()?;
        let _mode = c.u16_be()?;
    }
    Ok(alg)
}

// TPMT_RSA_SCHEME / TPMT_ECC_SCHEME: scheme, then hash alg unless null.
fn read_scheme(c: &mut Cursor<'_>) -> Fido2Result<u16> {
    let scheme = c.u16_be()?;
    if scheme != TPM_ALG_NULL_RAW {
        let _hash_alg = c.u16_be()?;
    }
    Ok(scheme)
}

impl TryFrom<&[u8]> for TpmtPublic {
    type Error = Fido2Error;

    fn try_from(data: &[u8]) -> Fido2Result<Self> {
        let mut c = Cursor::new(data);

        let type_ = TpmAlgId::try_from(c.u16_be()?)?;
        let name_alg = TpmAlgId::try_from(c.u16_be()?)?;
        let object_attributes = c.u32_be()?;
        let auth_policy = c.tpm2b()?.to_vec();

        let (parameters, unique) = match type_ {
            TpmAlgId::Rsa => {
                let symmetric = read_symmetric(&mut c)?;
                let scheme = read_scheme(&mut c)?;
                let key_bits = c.u16_be()?;
                let exponent = c.u32_be()?;
                let modulus = c.tpm2b()?.to_vec();
                (
                    TpmuPublicParms::Rsa {
                        symmetric,
                        scheme,
                        key_bits,
                        exponent,
                    },
                    TpmuPublicId::Rsa(modulus),
                )
            }
            TpmAlgId::Ecc => {
                let symmetric = read_symmetric(&mut c)?;
                let scheme = read_scheme(&mut c)?;
                let curve_id = c.u16_be()?;
                let kdf = read_scheme(&mut c)?;
                let x = c.tpm2b()?.to_vec();
                let y = c.tpm2b()?.to_vec();
                (
                    TpmuPublicParms::Ecc {
                        symmetric,
                        scheme,
                        curve_id,
                        kdf,
                    },
                    TpmuPublicId::Ecc { x, y },
                )
            }
            other => {
                return Err(Fido2Error::parse(format!(
                    "unsupported TPMT_PUBLIC type: {:?}",
                    other
                )))
            }
        };
        c.finish()?;

        Ok(TpmtPublic {
            type_,
            name_alg,
            object_attributes,
            auth_policy,
            parameters,
            unique,
        })
    }
}

/// Compute the TPM name of a public area: a two byte hash alg id followed by
/// the digest of the marshalled TPMT_PUBLIC under that algorithm.
fn tpm_name(name_alg: TpmAlgId, pub_area_bytes: &[u8]) -> Fido2Result<Vec<u8>> {
    // The name's leading alg id bytes are included in the comparison, so a
    // mismatched algorithm is caught as well.
    match name_alg {
        TpmAlgId::Sha256 => {
            let mut v = vec![0x00, 0x0b];
            v.extend(compute_sha256(pub_area_bytes));
            Ok(v)
        }
        other => Err(Fido2Error::unsupported(format!(
            "unsupported TPM name algorithm: {:?}",
            other
        ))),
    }
}

/// `tpm`: extract ver, alg, x5c, sig and the two TCG structures.
pub fn tpm_parse(att_stmt: &serde_cbor::Value) -> Fido2Result<serde_cbor::Value> {
    let map = att_stmt_map(att_stmt)?;

    let ver = stmt_required(map, "ver")?;
    if cbor_try_string!(ver)? != "2.0" {
        return Err(Fido2Error::unsupported(
            "tpm attestation version must be 2.0",
        ));
    }

    let mut out = BTreeMap::new();
    for field in ["ver", "alg", "x5c", "sig", "certInfo", "pubArea"] {
        out.insert(
            serde_cbor::Value::Text(field.to_string()),
            stmt_required(map, field)?.clone(),
        );
    }
    Ok(serde_cbor::Value::Map(out))
}

/// `tpm`: §8.3 of the webauthn spec.
pub fn tpm_validate(ctx: &AuditContext<'_>) -> Fido2Result<bool> {
    let _ver = ctx.authnr_data.get_required("ver")?.as_text()?;
    let alg = COSEAlgorithm::try_from(ctx.authnr_data.get_required("alg")?.as_int()? as i128)?;
    let sig = ctx.authnr_data.get_required("sig")?.as_bytes()?;

    let certinfo_bytes = ctx.authnr_data.get_required("certInfo")?.as_bytes()?;
    let certinfo = TpmsAttest::try_from(certinfo_bytes)?;

    let pubarea_bytes = ctx.authnr_data.get_required("pubArea")?.as_bytes()?;
    let pubarea = TpmtPublic::try_from(pubarea_bytes)?;

    let certs = x5c_to_certs(ctx.authnr_data.get_required("x5c")?.as_cbor()?)?;
    let aik_cert = certs
        .first()
        .ok_or_else(|| Fido2Error::protocol("tpm x5c carried no certificates"))?;

    // 1. The public key in pubArea must be the credential public key.
    let credential_public_key = crate::attestation::credential_cose_key(ctx)?;
    match (&credential_public_key.key, &pubarea.unique) {
        (COSEKeyType::RSA(cose_rsa), TpmuPublicId::Rsa(tpm_modulus)) => {
            // The exponent is not comparable: TPMs encode the default 65537
            // as 0 while COSE carries it literally.
            if &cose_rsa.n != tpm_modulus {
                return Err(Fido2Error::protocol(
                    "tpm pubArea does not match the credential public key",
                ));
            }
        }
        (COSEKeyType::EC_EC2(cose_ec), TpmuPublicId::Ecc { x, y }) => {
            if &cose_ec.x != x || &cose_ec.y != y {
                return Err(Fido2Error::protocol(
                    "tpm pubArea does not match the credential public key",
                ));
            }
        }
        _ => {
            return Err(Fido2Error::protocol(
                "tpm pubArea does not match the credential public key",
            ))
        }
    }

    // 2. magic and type.
    if certinfo.magic != TPM_GENERATED_VALUE {
        return Err(Fido2Error::protocol(
            "tpm certInfo magic was not TPM_GENERATED_VALUE",
        ));
    }
    if certinfo.type_ != TPM_ST_ATTEST_CERTIFY {
        return Err(Fido2Error::protocol(
            "tpm certInfo type was not TPM_ST_ATTEST_CERTIFY",
        ));
    }

    // 3. extraData is the hash of authenticatorData || clientDataHash under
    // the algorithm in "alg".
    let verification_data: Vec<u8> = ctx
        .authnr_data_raw
        .iter()
        .chain(ctx.client_data_hash.iter())
        .copied()
        .collect();
    let expected_extra_data = hash_by_cose_alg(alg, &verification_data)?;
    if certinfo.extra_data != expected_extra_data {
        return Err(Fido2Error::protocol("tpm certInfo extraData mismatch"));
    }

    // 4. attested.name is the name of pubArea under its own name algorithm.
    let TpmuAttest::AttestCertify { name, .. } = &certinfo.attested;
    let expected_name = tpm_name(pubarea.name_alg, pubarea_bytes)?;
    if name != &expected_name {
        return Err(Fido2Error::protocol(
            "tpm certInfo attested name does not match pubArea",
        ));
    }

    // 5. The signature covers the certInfo bytes.
    let verified = verify_signature_x509(alg, aik_cert, sig, certinfo_bytes)?;
    if !verified {
        return Err(Fido2Error::sig_invalid(
            "tpm attestation signature verification failed",
        ));
    }

    // 6. §8.3.1 AIK certificate requirements, then the aaguid extension.
    assert_tpm_attest_req(aik_cert)?;
    let aaguid = ctx.authnr_data.get_required("aaguid")?.as_bytes()?;
    validate_cert_aaguid(aik_cert, aaguid)?;

    ctx.audit.info("attestation-type", "attca");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    // A TPMS_ATTEST for certify: magic, TPM_ST_ATTEST_CERTIFY, empty
    // qualifiedSigner, 4 byte extraData, clock info, firmware, then the
    // attested name (sha256 alg prefix + 32 bytes) and qualified name.
    fn sample_certinfo(name: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend(hex!("ff544347")); // magic
        v.extend(hex!("8017")); // TPM_ST_ATTEST_CERTIFY
        v.extend(hex!("0000")); // qualifiedSigner: empty
        v.extend(hex!("0004 deadbeef")); // extraData
        v.extend(hex!("0000000000000001 00000002 00000003 01")); // clockInfo
        v.extend(hex!("0000000000000004")); // firmwareVersion
        v.extend((name.len() as u16).to_be_bytes());
        v.extend(name); // attested.name
        v.extend(hex!("0000")); // attested.qualifiedName: empty
        v
    }

    fn sample_rsa_pubarea(modulus: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend(hex!("0001")); // type: TPM_ALG_RSA
        v.extend(hex!("000b")); // nameAlg: sha256
        v.extend(hex!("00050072")); // objectAttributes
        v.extend(hex!("0000")); // authPolicy: empty
        v.extend(hex!("0010")); // symmetric: TPM_ALG_NULL
        v.extend(hex!("0014 000b")); // scheme: RSASSA + sha256
        v.extend(hex!("0800")); // keyBits: 2048
        v.extend(hex!("00000000")); // exponent: default
        v.extend((modulus.len() as u16).to_be_bytes());
        v.extend(modulus);
        v
    }

    #[test]
    fn parse_tpms_attest() {
        let name = [&hex!("000b")[..], &[0xaa; 32][..]].concat();
        let raw = sample_certinfo(&name);
        let certinfo = TpmsAttest::try_from(raw.as_slice()).unwrap();
        assert_eq!(certinfo.magic, TPM_GENERATED_VALUE);
        assert_eq!(certinfo.type_, TPM_ST_ATTEST_CERTIFY);
        assert_eq!(certinfo.extra_data, hex!("deadbeef"));
        assert_eq!(certinfo.clock_info.clock, 1);
        assert!(certinfo.clock_info.safe);
        let TpmuAttest::AttestCertify { name: got, .. } = &certinfo.attested;
        assert_eq!(got, &name);
    }

    #[test]
    fn tpms_attest_rejects_trailing_bytes() {
        let name = [&hex!("000b")[..], &[0xaa; 32][..]].concat();
        let mut raw = sample_certinfo(&name);
        raw.push(0);
        assert!(TpmsAttest::try_from(raw.as_slice()).is_err());
    }

    #[test]
    fn tpms_attest_rejects_non_certify() {
        let name = [&hex!("000b")[..], &[0xaa; 32][..]].concat();
        let mut raw = sample_certinfo(&name);
        raw[5] = 0x18; // type: TPM_ST_ATTEST_QUOTE
        assert!(TpmsAttest::try_from(raw.as_slice()).is_err());
    }

    #[test]
    fn parse_tpmt_public_rsa() {
        let modulus = vec![0x42; 256];
        let raw = sample_rsa_pubarea(&modulus);
        let pubarea = TpmtPublic::try_from(raw.as_slice()).unwrap();
        assert_eq!(pubarea.type_, TpmAlgId::Rsa);
        assert_eq!(pubarea.name_alg, TpmAlgId::Sha256);
        match &pubarea.parameters {
            TpmuPublicParms::Rsa {
                symmetric,
                scheme,
                key_bits,
                exponent,
            } => {
                assert_eq!(*symmetric, 0x0010);
                assert_eq!(*scheme, 0x0014);
                assert_eq!(*key_bits, 2048);
                assert_eq!(*exponent, 0);
            }
            _ => panic!("expected rsa parameters"),
        }
        match &pubarea.unique {
            TpmuPublicId::Rsa(m) => assert_eq!(m, &modulus),
            _ => panic!("expected rsa unique"),
        }
    }

    #[test]
    fn name_computation_matches_layout() {
        let modulus = vec![0x42; 256];
        let raw = sample_rsa_pubarea(&modulus);
        let name = tpm_name(TpmAlgId::Sha256, &raw).unwrap();
        assert_eq!(&name[0..2], &hex!("000b"));
        assert_eq!(&name[2..], compute_sha256(&raw).as_slice());

        assert!(tpm_name(TpmAlgId::Sha1, &raw).is_err());
    }

    #[test]
    fn tpm_parse_rejects_wrong_version() {
        let mut stmt = BTreeMap::new();
        stmt.insert(
            serde_cbor::Value::Text("ver".to_string()),
            serde_cbor::Value::Text("1.2".to_string()),
        );
        let e = tpm_parse(&serde_cbor::Value::Map(stmt)).unwrap_err();
        assert_eq!(e.kind, crate::error::ErrorKind::Unsupported);
    }
}
