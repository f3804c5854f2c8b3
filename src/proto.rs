//! JSON protocol structures for communication with clients.
//!
//! These are the option objects the relying party issues (WebAuthn Level 1
//! `PublicKeyCredentialCreationOptions` / `PublicKeyCredentialRequestOptions`)
//! and the credential responses the client hands back. Field names are
//! lowerCamelCase on the wire, byte fields are base64url.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::base64_data::Base64UrlSafeData;
use crate::error::{Fido2Error, Fido2Result};

/// A cryptographically random challenge issued to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Challenge(pub Base64UrlSafeData);

impl Challenge {
    /// Wrap existing bytes as a challenge.
    pub fn new(data: Vec<u8>) -> Self {
        Challenge(Base64UrlSafeData(data))
    }

    /// Generate `len` random bytes from the thread CSPRNG.
    pub fn random(len: usize) -> Self {
        let mut data = vec![0; len];
        rand::thread_rng().fill_bytes(&mut data);
        Challenge(Base64UrlSafeData(data))
    }

    /// The challenge length in bytes.
    pub fn len(&self) -> usize {
        self.0 .0.len()
    }

    /// True when the challenge holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.0 .0.is_empty()
    }
}

impl AsRef<[u8]> for Challenge {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The relying party entity carried in creation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelyingParty {
    /// Display name of the service.
    pub name: String,
    /// The relying party id, when configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// An icon url, when configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// An accepted credential algorithm, as `{type: "public-key", alg}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubKeyCredParams {
    /// Always the literal `public-key`.
    #[serde(rename = "type")]
    pub type_: String,
    /// A COSE algorithm identifier, e.g. -7 for ES256.
    pub alg: i64,
}

/// How much attestation the relying party requests from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationConveyancePreference {
    /// No attestation statement wanted.
    None,
    /// The client may substitute an anonymised attestation.
    Indirect,
    /// The full authenticator attestation statement.
    Direct,
}

impl TryFrom<&str> for AttestationConveyancePreference {
    type Error = Fido2Error;

    fn try_from(s: &str) -> Fido2Result<Self> {
        match s {
            "none" => Ok(AttestationConveyancePreference::None),
            "indirect" => Ok(AttestationConveyancePreference::Indirect),
            "direct" => Ok(AttestationConveyancePreference::Direct),
            _ => Err(Fido2Error::arg_range(format!(
                "attestation must be one of: direct, indirect, none, got: {}",
                s
            ))),
        }
    }
}

/// Authenticator attachment modality hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthenticatorAttachment {
    /// Bound to the client device.
    #[serde(rename = "platform")]
    Platform,
    /// Roaming, e.g. a usb or nfc key.
    #[serde(rename = "cross-platform")]
    CrossPlatform,
}

impl TryFrom<&str> for AuthenticatorAttachment {
    type Error = Fido2Error;

    fn try_from(s: &str) -> Fido2Result<Self> {
        match s {
            "platform" => Ok(AuthenticatorAttachment::Platform),
            "cross-platform" => Ok(AuthenticatorAttachment::CrossPlatform),
            _ => Err(Fido2Error::arg_range(format!(
                "authenticatorAttachment must be one of: platform, cross-platform, got: {}",
                s
            ))),
        }
    }
}

/// The user verification requirement communicated to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerificationPolicy {
    /// Verification must occur.
    Required,
    /// Verification should occur if the authenticator supports it.
    Preferred,
    /// Verification should not occur.
    Discouraged,
}

impl TryFrom<&str> for UserVerificationPolicy {
    type Error = Fido2Error;

    fn try_from(s: &str) -> Fido2Result<Self> {
        match s {
            "required" => Ok(UserVerificationPolicy::Required),
            "preferred" => Ok(UserVerificationPolicy::Preferred),
            "discouraged" => Ok(UserVerificationPolicy::Discouraged),
            _ => Err(Fido2Error::arg_range(format!(
                "authenticatorUserVerification must be one of: required, preferred, discouraged, got: {}",
                s
            ))),
        }
    }
}

/// The `authenticatorSelection` member of creation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelectionCriteria {
    /// Attachment modality hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<AuthenticatorAttachment>,
    /// Whether a client side discoverable credential is required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_resident_key: Option<bool>,
    /// The user verification requirement.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_verification: Option<UserVerificationPolicy>,
}

/// `PublicKeyCredentialCreationOptions` issued for a registration ceremony.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationOptions {
    /// The relying party entity.
    pub rp: RelyingParty,
    /// The issued challenge. When `raw_challenge` is set this is
    /// `SHA-256(raw_challenge || extra_data)`.
    pub challenge: Challenge,
    /// The pre-hash random challenge, present only in extra-data mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_challenge: Option<Challenge>,
    /// Accepted credential algorithms, in order of preference.
    pub pub_key_cred_params: Vec<PubKeyCredParams>,
    /// Client side timeout in milliseconds.
    pub timeout: u32,
    /// Authenticator selection criteria, when any are configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticator_selection: Option<AuthenticatorSelectionCriteria>,
    /// The attestation conveyance preference.
    pub attestation: AttestationConveyancePreference,
    /// Extension inputs requested by the caller, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

/// `PublicKeyCredentialRequestOptions` issued for an authentication ceremony.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionOptions {
    /// The relying party id, when configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rp_id: Option<String>,
    /// The issued challenge. When `raw_challenge` is set this is
    /// `SHA-256(raw_challenge || extra_data)`.
    pub challenge: Challenge,
    /// The pre-hash random challenge, present only in extra-data mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_challenge: Option<Challenge>,
    /// Client side timeout in milliseconds.
    pub timeout: u32,
    /// The user verification requirement, when configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_verification: Option<UserVerificationPolicy>,
    /// Extension inputs requested by the caller, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

/// The raw response member of a registration credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatorAttestationResponseRaw {
    /// The CBOR encoded attestation object.
    #[serde(rename = "attestationObject")]
    pub attestation_object: Base64UrlSafeData,
    /// The UTF-8 JSON the client collected and the authenticator signed over.
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Base64UrlSafeData,
}

/// A client response to a registration challenge, the output of
/// `navigator.credentials.create()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPublicKeyCredential {
    /// The credential id as the client encoded it.
    #[serde(default)]
    pub id: Option<String>,
    /// The binary credential id.
    #[serde(rename = "rawId")]
    pub raw_id: Base64UrlSafeData,
    /// The authenticator response.
    pub response: AuthenticatorAttestationResponseRaw,
    /// Always `public-key`.
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
}

/// The raw response member of an assertion credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatorAssertionResponseRaw {
    /// The raw authenticator data the signature covers.
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: Base64UrlSafeData,
    /// The UTF-8 JSON the client collected.
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Base64UrlSafeData,
    /// The assertion signature.
    pub signature: Base64UrlSafeData,
    /// The user handle, when the authenticator returned one.
    #[serde(rename = "userHandle", default)]
    pub user_handle: Option<Base64UrlSafeData>,
}

/// A client response to an authentication challenge, the output of
/// `navigator.credentials.get()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyCredential {
    /// The credential id as the client encoded it.
    #[serde(default)]
    pub id: Option<String>,
    /// The binary credential id.
    #[serde(rename = "rawId")]
    pub raw_id: Base64UrlSafeData,
    /// The authenticator response.
    pub response: AuthenticatorAssertionResponseRaw,
    /// Always `public-key`.
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
}

/// The `tokenBinding` member of collected client data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBinding {
    /// One of `present`, `supported`, `not-supported`.
    pub status: String,
    /// The token binding id when status is `present`.
    #[serde(default)]
    pub id: Option<String>,
}

/// The client data the browser collected, parsed from `clientDataJSON`.
///
/// Parsing never re-serialises: the raw bytes are retained by the caller for
/// hashing, and only interpreted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedClientData {
    /// `webauthn.create` or `webauthn.get`.
    pub type_: String,
    /// The base64url encoded challenge the client saw.
    pub challenge: String,
    /// The origin the client operated under.
    pub origin: String,
    /// Token binding state, when the client supplied it.
    pub token_binding: Option<TokenBinding>,
}

/// Render a JSON value for a `got: ...` error message. Strings render bare,
/// everything else as its JSON form.
pub(crate) fn display_json_value(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl CollectedClientData {
    /// Parse the raw `clientDataJSON` bytes.
    ///
    /// Unknown members are tolerated - clients add fields like
    /// `clientExtensions` freely - but the three required members must be
    /// present and correctly typed.
    pub fn parse(raw: &[u8]) -> Fido2Result<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| Fido2Error::parse("clientDataJSON was not valid utf-8"))?;

        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| Fido2Error::parse(format!("clientDataJSON was not valid JSON: {}", e)))?;

        let map = value
            .as_object()
            .ok_or_else(|| Fido2Error::parse("clientDataJSON was not a JSON object"))?;

        let required_string = |field: &str| -> Fido2Result<String> {
            let v = map.get(field).ok_or_else(|| {
                Fido2Error::arg_missing(format!("clientDataJSON missing required field: {}", field))
            })?;
            v.as_str().map(str::to_string).ok_or_else(|| {
                Fido2Error::arg_type(format!(
                    "expected {} to be string, got: {}",
                    field,
                    display_json_value(v)
                ))
            })
        };

        let type_ = required_string("type")?;
        let challenge = required_string("challenge")?;
        let origin = required_string("origin")?;

        let token_binding = match map.get("tokenBinding") {
            None | Some(serde_json::Value::Null) => None,
            Some(v @ serde_json::Value::Object(_)) => {
                let tb: TokenBinding = serde_json::from_value(v.clone()).map_err(|_| {
                    Fido2Error::arg_type(format!(
                        "expected tokenBinding to be object, got: {}",
                        display_json_value(v)
                    ))
                })?;
                Some(tb)
            }
            Some(v) => {
                return Err(Fido2Error::arg_type(format!(
                    "expected tokenBinding to be object, got: {}",
                    display_json_value(v)
                )))
            }
        };

        Ok(CollectedClientData {
            type_,
            challenge,
            origin,
            token_binding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parse_client_data_with_extra_members() {
        let raw = br#"{"challenge":"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA","clientExtensions":{},"hashAlgorithm":"SHA-256","origin":"http://127.0.0.1:8080","type":"webauthn.create"}"#;
        let c = CollectedClientData::parse(raw).unwrap();
        assert_eq!(c.type_, "webauthn.create");
        assert_eq!(c.origin, "http://127.0.0.1:8080");
        assert!(c.token_binding.is_none());
    }

    #[test]
    fn parse_client_data_missing_origin() {
        let raw = br#"{"challenge":"AAAA","type":"webauthn.get"}"#;
        let e = CollectedClientData::parse(raw).unwrap_err();
        assert_eq!(e.kind, ErrorKind::ArgMissing);
        assert_eq!(e.message, "clientDataJSON missing required field: origin");
    }

    #[test]
    fn parse_client_data_rejects_bad_json_and_utf8() {
        assert_eq!(
            CollectedClientData::parse(b"{not json").unwrap_err().kind,
            ErrorKind::ParseError
        );
        assert_eq!(
            CollectedClientData::parse(&[0xff, 0xfe, 0x00]).unwrap_err().kind,
            ErrorKind::ParseError
        );
    }

    #[test]
    fn parse_client_data_token_binding() {
        let raw = br#"{"challenge":"x","origin":"https://example.com","type":"webauthn.get","tokenBinding":{"status":"supported"}}"#;
        let c = CollectedClientData::parse(raw).unwrap();
        assert_eq!(
            c.token_binding,
            Some(TokenBinding {
                status: "supported".to_string(),
                id: None
            })
        );

        let raw = br#"{"challenge":"x","origin":"https://example.com","type":"webauthn.get","tokenBinding":"present"}"#;
        let e = CollectedClientData::parse(raw).unwrap_err();
        assert_eq!(e.kind, ErrorKind::ArgType);
        assert_eq!(e.message, "expected tokenBinding to be object, got: present");
    }

    #[test]
    fn challenge_random_length() {
        let c = Challenge::random(64);
        assert_eq!(c.len(), 64);
        // Two draws colliding would mean the rng is broken.
        assert_ne!(Challenge::random(64), c);
    }

    #[test]
    fn deserialise_register_response() {
        let x = r#"
        {"id":"4oiUggKcrpRIlB-cFzFbfkx_BNeM7UAnz3wO7ZpT4I2GL_n-g8TICyJTHg11l0wyc-VkQUVnJ0yM08-1D5oXnw","rawId":"4oiUggKcrpRIlB+cFzFbfkx/BNeM7UAnz3wO7ZpT4I2GL/n+g8TICyJTHg11l0wyc+VkQUVnJ0yM08+1D5oXnw==","response":{"attestationObject":"o2NmbXRkbm9uZWdhdHRTdG10oGhhdXRoRGF0YVjEEsoXtJryKJQ28wPgFmAwoh5SXSZuIJJnQzgBqP1AcaBBAAAAAAAAAAAAAAAAAAAAAAAAAAAAQOKIlIICnK6USJQfnBcxW35MfwTXjO1AJ898Du2aU+CNhi/5/oPEyAsiUx4NdZdMMnPlZEFFZydMjNPPtQ+aF5+lAQIDJiABIVggFo08FM4Je1yfCSuPsxP6h0zvlJSjfocUk75EvXw2oSMiWCArRwLD8doar0bACWS1PgVJKzp/wStyvOkTd4NlWHW8rQ==","clientDataJSON":"eyJjaGFsbGVuZ2UiOiJwZENXRDJWamRMSVkzN2VSYTVfazdhS3BqdkF2VmNOY04ycVozMjk0blpVIiwiY2xpZW50RXh0ZW5zaW9ucyI6e30sImhhc2hBbGdvcml0aG0iOiJTSEEtMjU2Iiwib3JpZ2luIjoiaHR0cDovLzEyNy4wLjAuMTo4MDgwIiwidHlwZSI6IndlYmF1dGhuLmNyZWF0ZSJ9"},"type":"public-key"}
        "#;
        let y: RegisterPublicKeyCredential = serde_json::from_str(x).unwrap();
        assert_eq!(y.type_.as_deref(), Some("public-key"));
        assert_eq!(y.raw_id.0.len(), 64);
    }

    #[test]
    fn deserialise_assertion_response_null_and_missing_user_handle() {
        let with_null = r#"
        {"id":"x","rawId":"3q2-7w","response":{"authenticatorData":"3q2-7w","clientDataJSON":"3q2-7w","signature":"3q2-7w","userHandle":null},"type":"public-key"}
        "#;
        let y: PublicKeyCredential = serde_json::from_str(with_null).unwrap();
        assert!(y.response.user_handle.is_none());

        let without = r#"
        {"id":"x","rawId":"3q2-7w","response":{"authenticatorData":"3q2-7w","clientDataJSON":"3q2-7w","signature":"3q2-7w"},"type":"public-key"}
        "#;
        let y: PublicKeyCredential = serde_json::from_str(without).unwrap();
        assert!(y.response.user_handle.is_none());
    }
}
