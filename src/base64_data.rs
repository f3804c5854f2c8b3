//! Forgiving base64 handling for webauthn byte fields.
//!
//! Clients are wildly inconsistent about which base64 dialect they emit, so
//! deserialisation accepts url-safe and standard alphabets with or without
//! padding. Serialisation always emits url-safe without padding.

use serde::de::{Error, Unexpected, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{Fido2Error, Fido2Result};

static ALLOWED_DECODING_FORMATS: &[base64::Config] = &[
    base64::URL_SAFE_NO_PAD,
    base64::URL_SAFE,
    base64::STANDARD,
    base64::STANDARD_NO_PAD,
];

/// A vec of bytes that (de)serialises as base64url.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Base64UrlSafeData(pub Vec<u8>);

impl fmt::Display for Base64UrlSafeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", base64::encode_config(&self.0, base64::URL_SAFE_NO_PAD))
    }
}

impl From<Vec<u8>> for Base64UrlSafeData {
    fn from(v: Vec<u8>) -> Self {
        Base64UrlSafeData(v)
    }
}

impl From<&[u8]> for Base64UrlSafeData {
    fn from(v: &[u8]) -> Self {
        Base64UrlSafeData(v.to_vec())
    }
}

impl From<Base64UrlSafeData> for Vec<u8> {
    fn from(v: Base64UrlSafeData) -> Vec<u8> {
        v.0
    }
}

impl AsRef<[u8]> for Base64UrlSafeData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Decode a string in any of the accepted base64 dialects.
pub fn decode_forgiving(s: &str) -> Fido2Result<Vec<u8>> {
    for config in ALLOWED_DECODING_FORMATS {
        if let Ok(data) = base64::decode_config(s, *config) {
            return Ok(data);
        }
    }
    Err(Fido2Error::parse(format!("invalid base64 value: {}", s)))
}

/// Encode bytes as base64url without padding.
pub fn encode_b64url(data: &[u8]) -> String {
    base64::encode_config(data, base64::URL_SAFE_NO_PAD)
}

struct Base64UrlSafeDataVisitor;

impl<'de> Visitor<'de> for Base64UrlSafeDataVisitor {
    type Value = Base64UrlSafeData;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a base64 url encoded string")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: Error,
    {
        decode_forgiving(v)
            .map(Base64UrlSafeData)
            .map_err(|_| Error::invalid_value(Unexpected::Str(v), &self))
    }
}

impl<'de> Deserialize<'de> for Base64UrlSafeData {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(Base64UrlSafeDataVisitor)
    }
}

impl Serialize for Base64UrlSafeData {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forgives_alternate_dialects() {
        // url-safe no pad, url-safe padded, standard padded, standard no pad
        for s in ["3q2-7w", "3q2-7w==", "3q2+7w==", "3q2+7w"] {
            assert_eq!(decode_forgiving(s).unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        }
        assert!(decode_forgiving("n o t b 6 4").is_err());
    }

    #[test]
    fn serde_round_trip_is_urlsafe_nopad() {
        let data = Base64UrlSafeData(vec![0xde, 0xad, 0xbe, 0xef]);
        let enc = serde_json::to_string(&data).unwrap();
        assert_eq!(enc, "\"3q2-7w\"");
        let dec: Base64UrlSafeData = serde_json::from_str("\"3q2+7w==\"").unwrap();
        assert_eq!(dec, data);
    }
}
