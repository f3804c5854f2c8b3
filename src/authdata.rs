//! The authenticator data binary format.
//!
//! This is the fixed-plus-variable blob every authenticator emits:
//!
//! ```text
//! [ rpIdHash 32 | flags 1 | counter 4 | attestedCredentialData? | extensions? ]
//! ```
//!
//! The attested credential data section has no explicit length for its
//! trailing COSE key, so the parser measures one CBOR item to find where the
//! extension map begins. Anything left over after all declared sections is a
//! parse error.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Fido2Error, Fido2Result};

/// A bit in the authenticator data flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AuthenticatorFlag {
    /// User present.
    UP,
    /// User verified.
    UV,
    /// Attested credential data included.
    AT,
    /// Extension data included.
    ED,
}

/// Decode the flags byte into its set representation.
pub fn decode_flags(flags: u8) -> BTreeSet<AuthenticatorFlag> {
    let mut set = BTreeSet::new();
    if flags & (1 << 0) != 0 {
        set.insert(AuthenticatorFlag::UP);
    }
    if flags & (1 << 2) != 0 {
        set.insert(AuthenticatorFlag::UV);
    }
    if flags & (1 << 6) != 0 {
        set.insert(AuthenticatorFlag::AT);
    }
    if flags & (1 << 7) != 0 {
        set.insert(AuthenticatorFlag::ED);
    }
    set
}

/// The attested credential data section, present when AT is set.
#[derive(Debug, Clone)]
pub struct AttestedCredentialData {
    /// The authenticator model guid.
    pub aaguid: Vec<u8>,
    /// The credential id.
    pub credential_id: Vec<u8>,
    /// The COSE encoded credential public key, verbatim.
    pub credential_pk_bytes: Vec<u8>,
    /// The decoded COSE value.
    pub credential_pk: serde_cbor::Value,
}

/// A parsed authenticator data blob.
#[derive(Debug, Clone)]
pub struct AuthenticatorData {
    /// SHA-256 of the relying party id.
    pub rp_id_hash: Vec<u8>,
    /// The raw flags byte.
    pub flags_raw: u8,
    /// The decoded flag set.
    pub flags: BTreeSet<AuthenticatorFlag>,
    /// The signature counter.
    pub counter: u32,
    /// Attested credential data, when AT is set.
    pub acd: Option<AttestedCredentialData>,
    /// The extension map, when ED is set.
    pub extensions: Option<serde_cbor::Value>,
}

/// Measure the encoded length of a single CBOR data item starting at the
/// beginning of `data`.
///
/// Only the RFC 7049 subset authenticators emit is accepted; indefinite
/// length items are rejected.
pub(crate) fn cbor_item_len(data: &[u8]) -> Fido2Result<usize> {
    fn short() -> Fido2Error {
        Fido2Error::parse("unexpected end of CBOR item")
    }

    let initial = *data.first().ok_or_else(short)?;
    let major = initial >> 5;
    let additional = initial & 0x1f;

    let (arg, header_len): (u64, usize) = match additional {
        n if n < 24 => (n as u64, 1),
        24 => (*data.get(1).ok_or_else(short)? as u64, 2),
        25 => {
            let b = data.get(1..3).ok_or_else(short)?;
            (BigEndian::read_u16(b) as u64, 3)
        }
        26 => {
            let b = data.get(1..5).ok_or_else(short)?;
            (BigEndian::read_u32(b) as u64, 5)
        }
        27 => {
            let b = data.get(1..9).ok_or_else(short)?;
            (BigEndian::read_u64(b), 9)
        }
        _ => {
            return Err(Fido2Error::parse(
                "indefinite length CBOR is not supported",
            ))
        }
    };

    let total = match major {
        // unsigned, negative
        0 | 1 => header_len,
        // byte string, text string
        2 | 3 => header_len
            .checked_add(usize::try_from(arg).map_err(|_| short())?)
            .ok_or_else(short)?,
        // array, map
        4 | 5 => {
            let items = arg
                .checked_mul(if major == 5 { 2 } else { 1 })
                .ok_or_else(short)?;
            let mut offset = header_len;
            for _ in 0..items {
                let rest = data.get(offset..).ok_or_else(short)?;
                offset = offset.checked_add(cbor_item_len(rest)?).ok_or_else(short)?;
            }
            offset
        }
        // tag
        6 => {
            let rest = data.get(header_len..).ok_or_else(short)?;
            header_len
                .checked_add(cbor_item_len(rest)?)
                .ok_or_else(short)?
        }
        // simple / float
        _ => header_len,
    };

    if total > data.len() {
        return Err(short());
    }
    Ok(total)
}

impl TryFrom<&[u8]> for AuthenticatorData {
    type Error = Fido2Error;

    fn try_from(data: &[u8]) -> Fido2Result<Self> {
        if data.len() < 37 {
            return Err(Fido2Error::parse("authenticator data too short"));
        }

        let rp_id_hash = data[0..32].to_vec();
        let flags_raw = data[32];
        let flags = decode_flags(flags_raw);
        let counter = BigEndian::read_u32(&data[33..37]);

        let mut offset = 37;

        let acd = if flags.contains(&AuthenticatorFlag::AT) {
            if data.len() < offset + 18 {
                return Err(Fido2Error::parse(
                    "authenticator data too short for attested credential data",
                ));
            }
            let aaguid = data[offset..offset + 16].to_vec();
            let cred_id_len = BigEndian::read_u16(&data[offset + 16..offset + 18]) as usize;
            offset += 18;

            if data.len() < offset + cred_id_len {
                return Err(Fido2Error::parse(
                    "authenticator data too short for credential id",
                ));
            }
            let credential_id = data[offset..offset + cred_id_len].to_vec();
            offset += cred_id_len;

            // The COSE key has no length prefix; measure it.
            let pk_len = cbor_item_len(&data[offset..])?;
            let credential_pk_bytes = data[offset..offset + pk_len].to_vec();
            let credential_pk: serde_cbor::Value = serde_cbor::from_slice(&credential_pk_bytes)
                .map_err(|e| {
                    Fido2Error::parse(format!("credential public key was not valid CBOR: {}", e))
                })?;
            offset += pk_len;

            Some(AttestedCredentialData {
                aaguid,
                credential_id,
                credential_pk_bytes,
                credential_pk,
            })
        } else {
            None
        };

        let extensions = if flags.contains(&AuthenticatorFlag::ED) {
            let ext_len = cbor_item_len(&data[offset..])?;
            let extensions: serde_cbor::Value = serde_cbor::from_slice(&data[offset..offset + ext_len])
                .map_err(|e| Fido2Error::parse(format!("extension data was not valid CBOR: {}", e)))?;
            offset += ext_len;
            Some(extensions)
        } else {
            None
        };

        if offset != data.len() {
            return Err(Fido2Error::parse(
                "trailing bytes after authenticator data",
            ));
        }

        Ok(AuthenticatorData {
            rp_id_hash,
            flags_raw,
            flags,
            counter,
            acd,
            extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base64_data::decode_forgiving;
    use crate::crypto::compute_sha256;
    use crate::error::ErrorKind;

    // From a yubico 5 none-format registration against 127.0.0.1.
    const NONE_AUTH_DATA: &str = "EsoXtJryKJQ28wPgFmAwoh5SXSZuIJJnQzgBqP1AcaBBAAAAAAAAAAAAAAAAAAAAAAAAAAAAQCgxaVISCxE-DrcxP5_-aPM88CTI-04J-o61SK6mnepjGZYv062AbtydzWmbAxF00VSAyp0ImP94uoy-0y7w9yilAQIDJiABIVggGT9woA-UoX-jBxuiHQpdkm0kCVh75WTj3TXl4zLJuzoiWCBKiCneKgWJgWiwrZedNwl06GTaXyaGrYS4bPbBraInyg";

    // From a solokey registration carrying the credProtect extension.
    const CRED_PROTECT_AUTH_DATA: &str = "SZYN5YgOjGh0NBcPZHZgW4_krrmihjLHmVzzuoMdl2PFAAAAAS_AV5-BE0fqsRa7Wo25ICoAQPSicpWlIFaFhdnBdql-Wp-2bTwRXkTF8vozEhoDVgqIMYsnLVRbSHAyppFZnyjoJZX3yiTMpeIBXg5vCmpbaw-lAQIDJiABIVggH-dAf6QGbg6YN-p7OMUOv-3Q-zPomvKWQQ9YcWzZQH4iWCDvGTApz4gccjA8jwQnnJwzXO9YOebhsJqufUsBYBTcOqFrY3JlZFByb3RlY3QD";

    // From a yubico 5 assertion against localhost.
    const ASSERTION_AUTH_DATA: &str = "SZYN5YgOjGh0NBcPZHZgW4_krrmihjLHmVzzuoMdl2MBAAAAFA";

    #[test]
    fn parse_attested_credential_data() {
        let raw = decode_forgiving(NONE_AUTH_DATA).unwrap();
        let ad = AuthenticatorData::try_from(raw.as_slice()).unwrap();

        assert_eq!(ad.rp_id_hash, compute_sha256(b"127.0.0.1"));
        assert_eq!(ad.counter, 0);
        assert!(ad.flags.contains(&AuthenticatorFlag::UP));
        assert!(ad.flags.contains(&AuthenticatorFlag::AT));
        assert!(!ad.flags.contains(&AuthenticatorFlag::UV));
        assert!(!ad.flags.contains(&AuthenticatorFlag::ED));

        let acd = ad.acd.unwrap();
        assert_eq!(acd.aaguid, vec![0; 16]);
        assert_eq!(acd.credential_id.len(), 64);
        // The measured COSE region must reach exactly the end of the blob.
        assert!(ad.extensions.is_none());

        let key = crate::crypto::COSEKey::try_from(&acd.credential_pk).unwrap();
        assert_eq!(key.type_, crate::crypto::COSEAlgorithm::ES256);
    }

    #[test]
    fn parse_assertion_authenticator_data() {
        let raw = decode_forgiving(ASSERTION_AUTH_DATA).unwrap();
        let ad = AuthenticatorData::try_from(raw.as_slice()).unwrap();
        assert_eq!(ad.rp_id_hash, compute_sha256(b"localhost"));
        assert_eq!(ad.counter, 20);
        assert_eq!(
            ad.flags,
            BTreeSet::from([AuthenticatorFlag::UP])
        );
        assert!(ad.acd.is_none());
        assert!(ad.extensions.is_none());
    }

    #[test]
    fn parse_extension_data() {
        let raw = decode_forgiving(CRED_PROTECT_AUTH_DATA).unwrap();
        let ad = AuthenticatorData::try_from(raw.as_slice()).unwrap();
        assert!(ad.flags.contains(&AuthenticatorFlag::ED));
        assert!(ad.flags.contains(&AuthenticatorFlag::UV));

        let ext = ad.extensions.unwrap();
        let map = match &ext {
            serde_cbor::Value::Map(m) => m,
            _ => panic!("extensions should be a CBOR map"),
        };
        assert_eq!(
            map.get(&serde_cbor::Value::Text("credProtect".to_string())),
            Some(&serde_cbor::Value::Integer(3))
        );
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut raw = decode_forgiving(NONE_AUTH_DATA).unwrap();
        raw.push(0x00);
        let e = AuthenticatorData::try_from(raw.as_slice()).unwrap_err();
        assert_eq!(e.kind, ErrorKind::ParseError);
        assert_eq!(e.message, "trailing bytes after authenticator data");

        let mut raw = decode_forgiving(ASSERTION_AUTH_DATA).unwrap();
        raw.push(0x00);
        assert!(AuthenticatorData::try_from(raw.as_slice()).is_err());
    }

    #[test]
    fn short_input_is_rejected() {
        let raw = decode_forgiving(ASSERTION_AUTH_DATA).unwrap();
        assert!(AuthenticatorData::try_from(&raw[..36]).is_err());
    }

    #[test]
    fn cbor_item_len_measures_nested_items() {
        // {1: [h'0102', "ab"], -1: 5}
        let data = [
            0xa2, 0x01, 0x82, 0x42, 0x01, 0x02, 0x62, 0x61, 0x62, 0x20, 0x05,
        ];
        assert_eq!(cbor_item_len(&data).unwrap(), data.len());
        // One byte missing.
        assert!(cbor_item_len(&data[..data.len() - 1]).is_err());
        // Indefinite length map.
        assert!(cbor_item_len(&[0xbf, 0x01, 0x02, 0xff]).is_err());
    }
}
