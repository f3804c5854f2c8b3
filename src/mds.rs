//! The FIDO Metadata Service collection.
//!
//! A collection is fed a signed table of contents (a compact JWS whose x5c
//! chain must terminate at the collection's root certificates) and a set of
//! base64url encoded metadata statements. Statements are staged until
//! validation, which admits only those whose hash appears in the verified
//! TOC, and canonicalizes the three protocol families (UAF, U2F, FIDO2) into
//! one entry shape.

use openssl::x509;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};
use uuid::Uuid;

use crate::base64_data::{decode_forgiving, encode_b64url};
use crate::crypto::{compute_sha256, verify_x509_chain};
use crate::error::{Fido2Error, Fido2Result};

/// The root the production FIDO metadata service chain terminates at.
static GLOBAL_SIGN_ROOT_CA_R3: &str = r#"
-----BEGIN CERTIFICATE-----
MIIDXzCCAkegAwIBAgILBAAAAAABIVhTCKIwDQYJKoZIhvcNAQELBQAwTDEgMB4G
A1UECxMXR2xvYmFsU2lnbiBSb290IENBIC0gUjMxEzARBgNVBAoTCkdsb2JhbFNp
Z24xEzARBgNVBAMTCkdsb2JhbFNpZ24wHhcNMDkwMzE4MTAwMDAwWhcNMjkwMzE4
MTAwMDAwWjBMMSAwHgYDVQQLExdHbG9iYWxTaWduIFJvb3QgQ0EgLSBSMzETMBEG
A1UEChMKR2xvYmFsU2lnbjETMBEGA1UEAxMKR2xvYmFsU2lnbjCCASIwDQYJKoZI
hvcNAQEBBQADggEPADCCAQoCggEBAMwldpB5BngiFvXAg7aEyiie/QV2EcWtiHL8
RgJDx7KKnQRfJMsuS+FggkbhUqsMgUdwbN1k0ev1LKMPgj0MK66X17YUhhB5uzsT
gHeMCOFJ0mpiLx9e+pZo34knlTifBtc+ycsmWQ1z3rDI6SYOgxXG71uL0gRgykmm
KPZpO/bLyCiR5Z2KYVc3rHQU3HTgOu5yLy6c+9C7v/U9AOEGM+iCK65TpjoWc4zd
QQ4gOsC0p6Hpsk+QLjJg6VfLuQSSaGjlOCZgdbKfd/+RFO+uIEn8rUAVSNECMWEZ
XriX7613t2Saer9fwRPvm2L7DWzgVGkWqQPabumDk3F2xmmFghcCAwEAAaNCMEAw
DgYDVR0PAQH/BAQDAgEGMA8GA1UdEwEB/wQFMAMBAf8wHQYDVR0OBBYEFI/wS3+o
LkUkrk1Q+mOai97i3Ru8MA0GCSqGSIb3DQEBCwUAA4IBAQBLQNvAUKr+yAzv95ZU
RUm7lgAJQayzE4aGKAczymvmdLm6AC2upArT9fHxD4q/c2dKg8dEe3jgr25sbwMp
jjM5RcOO5LlXbKr8EpbsU8Yt5CRsuZRj+9xTaGdWPoO4zzUhw8lo/s7awlOqzJCK
6fBdRoyV3XpYKBovHd7NADdBj+1EbddTKJd+82cEHhXXipa0095MJ6RMG3NzdvQX
mcIfeg7jLQitChws/zyrVQ4PkX4268NXSb7hLi18YIvDQVETI53O9zJrlAGomecs
Mx86OyXShkDOOyyGeMlhLxS67ttVb9+E7gUJTb0o2HLO02JQZR7rkpeDMdmztcpH
WD9f
-----END CERTIFICATE-----
"#;

/// The protocol family a metadata statement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolFamily {
    /// UAF, identified by AAID.
    Uaf,
    /// U2F, identified by attestation certificate key identifiers.
    U2f,
    /// FIDO2, identified by AAGUID.
    Fido2,
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolFamily::Uaf => write!(f, "uaf"),
            ProtocolFamily::U2f => write!(f, "u2f"),
            ProtocolFamily::Fido2 => write!(f, "fido2"),
        }
    }
}

/// One entry descriptor out of a verified table of contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MdsTocEntry {
    /// UAF identifier.
    #[serde(default)]
    pub aaid: Option<String>,
    /// FIDO2 identifier.
    #[serde(default)]
    pub aaguid: Option<String>,
    /// U2F identifiers.
    #[serde(default)]
    pub attestation_certificate_key_identifiers: Option<Vec<String>>,
    /// base64url of the SHA-256 of the entry as served.
    pub hash: String,
    /// Where the entry was published.
    #[serde(default)]
    pub url: Option<String>,
    /// Certification status history.
    #[serde(default)]
    pub status_reports: Vec<serde_json::Value>,
    /// ISO 8601 date of the last status change.
    #[serde(default)]
    pub time_of_last_status_change: Option<String>,
}

/// The payload of a verified table of contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MdsToc {
    /// The blob's legal header.
    #[serde(default)]
    pub legal_header: Option<String>,
    /// The serial number of this TOC.
    pub no: u64,
    /// When the next TOC will be published.
    #[serde(default)]
    pub next_update: Option<String>,
    /// The entry descriptors.
    pub entries: Vec<MdsTocEntry>,
}

/// A canonical, cross protocol view of one metadata statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdsEntry {
    /// Which protocol family the statement came from.
    pub protocol_family: ProtocolFamily,
    /// UAF identifier, `vvvv#mmmm`.
    pub aaid: Option<String>,
    /// FIDO2 authenticator model id.
    pub aaguid: Option<Uuid>,
    /// U2F attestation certificate key identifiers, lowercase hex.
    pub attestation_certificate_key_identifiers: Vec<String>,
    /// Human readable model description.
    pub description: Option<String>,
    /// Certification status history, from the TOC descriptor.
    pub status_reports: Vec<serde_json::Value>,
    /// ISO 8601 date of the last status change.
    pub time_of_last_status_change: Option<String>,
    /// Trust anchors for this model, base64 DER as served.
    pub attestation_root_certificates: Vec<String>,
    /// The statement's legal header, when it carries one.
    pub legal_header: Option<String>,
    /// The raw metadata statement.
    pub metadata_statement: serde_json::Value,
    /// The name of the collection this entry belongs to.
    pub collection: String,
}

/// Normalise an identifier for lookup: AAIDs keep their shape, AAGUIDs
/// accept hyphenated or bare hex, anything else is treated as a hex
/// certificate key identifier.
fn normalize_id(id: &str) -> String {
    if id.contains('#') {
        return id.to_lowercase();
    }
    if let Ok(uuid) = Uuid::try_parse(id) {
        return uuid.hyphenated().to_string();
    }
    id.to_lowercase()
}

/// A named set of metadata entries gated by a verified table of contents.
pub struct MdsCollection {
    name: String,
    root_certs: Vec<x509::X509>,
    danger_disable_certificate_time_checks: bool,
    toc: Option<MdsToc>,
    staged: Vec<String>,
    entries: Vec<Arc<MdsEntry>>,
    index: BTreeMap<String, usize>,
}

impl fmt::Debug for MdsCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdsCollection")
            .field("name", &self.name)
            .field("toc", &self.toc.as_ref().map(|t| t.no))
            .field("staged", &self.staged.len())
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl MdsCollection {
    /// A collection trusting the production FIDO metadata service root.
    pub fn new(name: impl Into<String>) -> Fido2Result<Self> {
        let root = x509::X509::from_pem(GLOBAL_SIGN_ROOT_CA_R3.as_bytes())?;
        Ok(Self::with_roots(name, vec![root]))
    }

    /// A collection trusting the supplied roots instead of the production
    /// metadata service root.
    pub fn with_roots(name: impl Into<String>, root_certs: Vec<x509::X509>) -> Self {
        MdsCollection {
            name: name.into(),
            root_certs,
            danger_disable_certificate_time_checks: false,
            toc: None,
            staged: Vec::new(),
            entries: Vec::new(),
            index: BTreeMap::new(),
        }
    }

    /// Skip certificate validity-window checks when verifying the TOC
    /// chain. Only for tests against captured fixtures.
    pub fn danger_disable_certificate_time_checks(mut self) -> Self {
        self.danger_disable_certificate_time_checks = true;
        self
    }

    /// The collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The verified table of contents, once one has been added.
    pub fn toc(&self) -> Option<&MdsToc> {
        self.toc.as_ref()
    }

    /// Verify a table of contents JWS and retain its entry descriptors.
    pub fn add_toc(&mut self, toc_jwt: &str) -> Fido2Result<()> {
        use jwt_simple::prelude::*;

        let meta = jwt_simple::token::Token::decode_metadata(toc_jwt)
            .map_err(|_| Fido2Error::parse("metadata TOC was not a JWS"))?;

        let certs = meta
            .certificate_chain()
            .ok_or_else(|| Fido2Error::trust_path("metadata TOC carried no certificate chain"))?
            .iter()
            .map(|cert| {
                base64::decode(cert)
                    .map_err(|_| Fido2Error::parse("metadata TOC x5c entry was not base64"))
                    .and_then(|der| {
                        x509::X509::from_der(&der)
                            .map_err(|_| Fido2Error::parse("metadata TOC x5c entry was not DER"))
                    })
            })
            .collect::<Fido2Result<Vec<_>>>()?;

        let (leaf, chain) = certs
            .split_first()
            .ok_or_else(|| Fido2Error::trust_path("metadata TOC carried no certificate chain"))?;

        // The chain must terminate at one of this collection's roots before
        // the signature means anything.
        verify_x509_chain(
            leaf,
            chain,
            &self.root_certs,
            self.danger_disable_certificate_time_checks,
        )?;

        let public_key = leaf.public_key()?;
        let claims: JWTClaims<MdsToc> = match (public_key.id(), meta.algorithm()) {
            (openssl::pkey::Id::RSA, "RS256") => {
                let der = public_key.public_key_to_der()?;
                RS256PublicKey::from_der(&der)
                    .map_err(|_| Fido2Error::parse("metadata TOC leaf key was not an RSA key"))?
                    .verify_token(toc_jwt, Some(VerificationOptions::default()))
                    .map_err(|_| {
                        Fido2Error::sig_invalid("metadata TOC signature verification failed")
                    })?
            }
            (openssl::pkey::Id::EC, "ES256") => {
                let ec_key = public_key.ec_key()?;
                let mut ctxt = openssl::bn::BigNumContext::new()?;
                let raw = ec_key.public_key().to_bytes(
                    ec_key.group(),
                    openssl::ec::PointConversionForm::UNCOMPRESSED,
                    &mut ctxt,
                )?;
                ES256PublicKey::from_bytes(&raw)
                    .map_err(|_| Fido2Error::parse("metadata TOC leaf key was not a P-256 key"))?
                    .verify_token(toc_jwt, Some(VerificationOptions::default()))
                    .map_err(|_| {
                        Fido2Error::sig_invalid("metadata TOC signature verification failed")
                    })?
            }
            (_, alg) => {
                return Err(Fido2Error::alg_mismatch(format!(
                    "metadata TOC uses an unsupported algorithm: {}",
                    alg
                )))
            }
        };

        debug!(no = claims.custom.no, "metadata TOC verified");
        self.toc = Some(claims.custom);
        Ok(())
    }

    /// Stage a base64url encoded metadata statement. Nothing is trusted
    /// until [`MdsCollection::validate`] gates it against the TOC.
    pub fn add_entry(&mut self, raw_entry: &str) -> Fido2Result<()> {
        if raw_entry.is_empty() {
            return Err(Fido2Error::arg_type("expected entry to be a non-empty string"));
        }
        self.staged.push(raw_entry.to_string());
        Ok(())
    }

    /// Move staged entries whose hash matches a TOC descriptor into the
    /// collection. Entries without a matching descriptor are dropped with a
    /// warning; they were never vouched for by the metadata service.
    pub fn validate(&mut self) -> Fido2Result<()> {
        let toc = self.toc.as_ref().ok_or_else(|| {
            Fido2Error::trust_path("no table of contents has been verified for this collection")
        })?;

        let staged = std::mem::take(&mut self.staged);
        for raw in staged {
            let hash = compute_sha256(raw.as_bytes());

            let descriptor = toc.entries.iter().find(|e| {
                decode_forgiving(&e.hash)
                    .map(|h| h == hash)
                    .unwrap_or(false)
            });

            let descriptor = match descriptor {
                Some(d) => d.clone(),
                None => {
                    warn!(
                        collection = %self.name,
                        hash = %encode_b64url(&hash),
                        "metadata entry hash not present in TOC, dropping"
                    );
                    continue;
                }
            };

            let entry = self.canonicalize(&raw, &descriptor)?;
            let idx = self.entries.len();
            let mut ids = Vec::new();
            if let Some(aaid) = &entry.aaid {
                ids.push(normalize_id(aaid));
            }
            if let Some(aaguid) = &entry.aaguid {
                ids.push(aaguid.hyphenated().to_string());
            }
            for ckid in &entry.attestation_certificate_key_identifiers {
                ids.push(normalize_id(ckid));
            }
            if ids.is_empty() {
                return Err(Fido2Error::parse(
                    "metadata statement carried no identifier",
                ));
            }
            self.entries.push(Arc::new(entry));
            for id in ids {
                self.index.insert(id, idx);
            }
        }
        Ok(())
    }

    fn canonicalize(&self, raw: &str, descriptor: &MdsTocEntry) -> Fido2Result<MdsEntry> {
        let bytes = decode_forgiving(raw)?;
        let statement: serde_json::Value = serde_json::from_slice(&bytes)
            .map_err(|e| Fido2Error::parse(format!("metadata statement was not valid JSON: {}", e)))?;

        let str_field = |key: &str| -> Option<String> {
            statement.get(key).and_then(|v| v.as_str()).map(str::to_string)
        };

        let aaid = str_field("aaid");
        let aaguid = match str_field("aaguid") {
            Some(raw_aaguid) => Some(Uuid::try_parse(&raw_aaguid).map_err(|_| {
                Fido2Error::parse(format!("metadata aaguid was not a uuid: {}", raw_aaguid))
            })?),
            None => None,
        };
        let ckids: Vec<String> = statement
            .get("attestationCertificateKeyIdentifiers")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_lowercase())
                    .collect()
            })
            .unwrap_or_default();

        // The protocol family is explicit in newer statements; older ones
        // are classified by which identifier they carry.
        let protocol_family = match str_field("protocolFamily").as_deref() {
            Some("uaf") => ProtocolFamily::Uaf,
            Some("u2f") => ProtocolFamily::U2f,
            Some("fido2") => ProtocolFamily::Fido2,
            Some(other) => {
                return Err(Fido2Error::parse(format!(
                    "unknown metadata protocol family: {}",
                    other
                )))
            }
            None if aaid.is_some() => ProtocolFamily::Uaf,
            None if aaguid.is_some() => ProtocolFamily::Fido2,
            None if !ckids.is_empty() => ProtocolFamily::U2f,
            None => {
                return Err(Fido2Error::parse(
                    "metadata statement carried no identifier",
                ))
            }
        };

        let attestation_root_certificates = statement
            .get("attestationRootCertificates")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(MdsEntry {
            protocol_family,
            aaid,
            aaguid,
            attestation_certificate_key_identifiers: ckids,
            description: str_field("description"),
            status_reports: descriptor.status_reports.clone(),
            time_of_last_status_change: descriptor.time_of_last_status_change.clone(),
            attestation_root_certificates,
            legal_header: str_field("legalHeader"),
            metadata_statement: statement,
            collection: self.name.clone(),
        })
    }

    /// Look an entry up by AAID, AAGUID (hyphens optional) or hex
    /// certificate key identifier.
    pub fn find_entry(&self, id: &str) -> Option<Arc<MdsEntry>> {
        self.index
            .get(&normalize_id(id))
            .map(|idx| self.entries[*idx].clone())
    }

    /// The number of validated entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries have been validated.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An ordered set of metadata collections, keyed by name.
#[derive(Debug, Default)]
pub struct MdsStore {
    collections: Vec<Arc<MdsCollection>>,
}

impl MdsStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a collection and add it to the store. Fails with
    /// `Duplicate` when a collection of the same name is already present.
    pub fn add_collection(&mut self, mut collection: MdsCollection) -> Fido2Result<()> {
        if self.collections.iter().any(|c| c.name() == collection.name()) {
            return Err(Fido2Error::duplicate(format!(
                "mds collection already registered: {}",
                collection.name()
            )));
        }
        collection.validate()?;
        self.collections.push(Arc::new(collection));
        Ok(())
    }

    /// Find matching entries across every collection, in collection
    /// registration order. Fails with `NoMds` when nothing is registered.
    pub fn find_entry(&self, id: &str) -> Fido2Result<Vec<Arc<MdsEntry>>> {
        if self.collections.is_empty() {
            return Err(Fido2Error::no_mds(
                "no metadata collections have been registered",
            ));
        }
        Ok(self
            .collections
            .iter()
            .filter_map(|c| c.find_entry(id))
            .collect())
    }

    /// A registered collection, by name.
    pub fn collection(&self, name: &str) -> Option<&Arc<MdsCollection>> {
        self.collections.iter().find(|c| c.name() == name)
    }

    /// How many collections are registered.
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    /// True when no collections are registered.
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

static DEFAULT_STORE: OnceLock<RwLock<MdsStore>> = OnceLock::new();

fn default_store() -> &'static RwLock<MdsStore> {
    DEFAULT_STORE.get_or_init(|| RwLock::new(MdsStore::new()))
}

/// Validate and register a collection with the process-wide store.
///
/// The store's lock is only ever held around plain data structure work -
/// never around plugin or caller code - so poisoning would indicate a bug in
/// this crate; it degrades to an error rather than a cascading panic.
pub fn add_mds_collection(collection: MdsCollection) -> Fido2Result<()> {
    default_store()
        .write()
        .map_err(|_| Fido2Error::protocol("mds store lock poisoned"))?
        .add_collection(collection)
}

/// Find matching entries across the process-wide store.
pub fn find_mds_entry(id: &str) -> Fido2Result<Vec<Arc<MdsEntry>>> {
    default_store()
        .read()
        .map_err(|_| Fido2Error::protocol("mds store lock poisoned"))?
        .find_entry(id)
}

/// Whether any collections are registered with the process-wide store.
pub fn mds_available() -> bool {
    default_store()
        .read()
        .map(|store| !store.is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    // A test metadata hierarchy: an RSA root CA, a signer certificate, and
    // two TOCs over a handful of statements across the protocol families.
    const TEST_ROOT_PEM: &str = r#"-----BEGIN CERTIFICATE-----
MIICxjCCAa6gAwIBAgIBATANBgkqhkiG9w0BAQsFADAbMRkwFwYDVQQDDBBUZXN0
IE1EUyBSb290IENBMCAXDTI2MDEwMTAwMDAwMFoYDzIxMjUxMjA4MDAwMDAwWjAb
MRkwFwYDVQQDDBBUZXN0IE1EUyBSb290IENBMIIBIjANBgkqhkiG9w0BAQEFAAOC
AQ8AMIIBCgKCAQEAk6eBwZUrEjZDydeUPWugPASJIr9HXxMmkbRMitaxklCqzuAI
JkUaFdiHCWoleAwsFvHp3X6CDupacAnntk5fLSkmy8XzAFzf7pJy1Xt+phlIqthD
GwOBwpuKobAjn4m/qQSzdwT2YL3I/cHvlrP7yDw1pKJ3j48nK4vmpaiLTPb+gezX
t3HDsNvoQ/UGxDll+vQ4My9Z3lcvAp9ovrjXamFX+co4FaGG/hMA5kU7o+Zexhpc
lphnbcFgj4rOUUyLK+pWi3H4BZNiR9bKZHK+UBBSMO/xDbN0gDRBw0ScRhrn0K2C
GzemkHw6WUnyYVqdrTpJJh9ZI9T+o0ikXWDTQQIDAQABoxMwETAPBgNVHRMBAf8E
BTADAQH/MA0GCSqGSIb3DQEBCwUAA4IBAQAVSidkyKwLxO82FxoWYz/Nc7v3f5pS
cn+YDp8PYtjsBwVmnUK7B9Yw3R3ZN/h+MW3Cg+2DV/zMd4W9I1+eBxKSLYoYpJXe
ob2RwENZ/b83UJyNgLo58K8xvl5LbklZ7YE1ADMIC7EE7LBe1WDN6q3i+A+rjpxu
gL8dVzQPGt2VQ0T0nt766LsS/O2AM+0dpwPsf9BOF+ddQJ36iaXbwsCCKjKMQ98p
5HIzUg+2cW7zql1XAXepWFhagPaavq1DZQffqRbFSfNe978HidC5v6FM0C1u3Fdk
wQlTo3jDpq1laa2Y195Hng+cc1RYIeSLGZpFvsft2glwtmyqmeTx+uQI
-----END CERTIFICATE-----
"#;

    const TOC_1: &str = "eyJhbGciOiJSUzI1NiIsIng1YyI6WyJNSUlDd2pDQ0FhcWdBd0lCQWdJQkFqQU5CZ2txaGtpRzl3MEJBUXNGQURBYk1Sa3dGd1lEVlFRRERCQlVaWE4wSUUxRVV5QlNiMjkwSUVOQk1DQVhEVEkyTURFd01UQXdNREF3TUZvWUR6SXhNalV4TWpBNE1EQXdNREF3V2pBYU1SZ3dGZ1lEVlFRRERBOVVaWE4wSUUxRVV5QlRhV2R1WlhJd2dnRWlNQTBHQ1NxR1NJYjNEUUVCQVFVQUE0SUJEd0F3Z2dFS0FvSUJBUUQ3MWgzcW10ZkpUTjVyQ3M1aWE2ckE5VWxlOHc5djBIb3duSzRxbGlFbTgxblhvN1A4NGdIN1A4YlZxMmtJNWtITGQxTkU0bHAvM2R6NFU3MzhnWEFWM3lJQ0xRQXFvK1dxLytMR1NXK0l4aFJrbnNrTFl2V3V4Ym9WZVM0TzQvZ3ZtSEk5YkRvNWsveS9qVlU5bXZUWGExeTVMZHMxMkdSaS9RT3EyT2NNM0ZGbmtyaGltTHBGeHlreVN5QVRZZ3VBYVRnaCtxZFY0TkY3dkdTdXZoL0taNUNFakNZNGp3UEdjcVdiOFd2Umw0Z3NiWDh0aDRQUHVmS29VamVHR3hjT0V4cVJDdkZsakEvYW1mQTZGUm1ZVVlhaVJCM09WUGI0SUxTdUs4V0E0Rk5MSGo3dk1oRDFuU2xmM3U0V2xqRm95WXdldDJqMklpVHMzSlRBb0hwSEFnTUJBQUdqRURBT01Bd0dBMVVkRXdFQi93UUNNQUF3RFFZSktvWklodmNOQVFFTEJRQURnZ0VCQUVVdWsvSXppdlR5Z0czSXQxZDg4TUZ6QmdCaitkbzNPSUJiTTd0eWU3eWJYVWw2MkRBV0w0dG4wVk4wc0tjd1Y1cjF3QXRtQkEwdXdya0NJbVFzUTdoYllhQldidnN6dVkwQlhKMDhpRUx3WkZLV3dIb0JLTFlwekNaZ3ZWNHJNL0YyK1BHaUNsN3RXUEFsWWFDdmtweGZYeHp6dmhYaFlLOG5uMXk2TDAwWWp6VDVYdGtycXQybUNzdGlSNW5HRGtiUUxLaDB6UlpYMTZFSGdWVnp2SFdHOGRLcEtLL2ZvTGRTYzdyMTlGcGhmQXdXdUw3akVHWUZTK1R0aldsVE5udFRlRWVGclJaMmppaE9zZXBnUFJEeUZRcmJIUllWUlh1aDR5djZscXBsMjY1cjdNS1pQVDdWbGdXNnBLSERuUC9WVzczTzNiVkl6RFk3VW4vdUVQZz0iLCJNSUlDeGpDQ0FhNmdBd0lCQWdJQkFUQU5CZ2txaGtpRzl3MEJBUXNGQURBYk1Sa3dGd1lEVlFRRERCQlVaWE4wSUUxRVV5QlNiMjkwSUVOQk1DQVhEVEkyTURFd01UQXdNREF3TUZvWUR6SXhNalV4TWpBNE1EQXdNREF3V2pBYk1Sa3dGd1lEVlFRRERCQlVaWE4wSUUxRVV5QlNiMjkwSUVOQk1JSUJJakFOQmdrcWhraUc5dzBCQVFFRkFBT0NBUThBTUlJQkNnS0NBUUVBazZlQndaVXJFalpEeWRlVVBXdWdQQVNKSXI5SFh4TW1rYlJNaXRheGtsQ3F6dUFJSmtVYUZkaUhDV29sZUF3c0Z2SHAzWDZDRHVwYWNBbm50azVmTFNrbXk4WHpBRnpmN3BKeTFYdCtwaGxJcXRoREd3T0J3cHVLb2JBam40bS9xUVN6ZHdUMllMM0kvY0h2bHJQN3lEdzFwS0ozajQ4bks0dm1wYWlMVFBiK2dlelh0M0hEc052b1EvVUd4RGxsK3ZRNE15OVozbGN2QXA5b3ZyalhhbUZYK2NvNEZhR0cvaE1BNWtVN28rWmV4aHBjbHBobmJjRmdqNHJPVVV5TEsrcFdpM0g0QlpOaVI5YktaSEsrVUJCU01PL3hEYk4wZ0RSQncwU2NSaHJuMEsyQ0d6ZW1rSHc2V1VueVlWcWRyVHBKSmg5Wkk5VCtvMGlrWFdEVFFRSURBUUFCb3hNd0VUQVBCZ05WSFJNQkFmOEVCVEFEQVFIL01BMEdDU3FHU0liM0RRRUJDd1VBQTRJQkFRQVZTaWRreUt3THhPODJGeG9XWXovTmM3djNmNXBTY24rWURwOFBZdGpzQndWbW5VSzdCOVl3M1IzWk4vaCtNVzNDZysyRFYvek1kNFc5STErZUJ4S1NMWW9ZcEpYZW9iMlJ3RU5aL2I4M1VKeU5nTG81OEs4eHZsNUxia2xaN1lFMUFETUlDN0VFN0xCZTFXRE42cTNpK0ErcmpweHVnTDhkVnpRUEd0MlZRMFQwbnQ3NjZMc1MvTzJBTSswZHB3UHNmOUJPRitkZFFKMzZpYVhid3NDQ0tqS01ROThwNUhJelVnKzJjVzd6cWwxWEFYZXBXRmhhZ1BhYXZxMURaUWZmcVJiRlNmTmU5NzhIaWRDNXY2Rk0wQzF1M0Zka3dRbFRvM2pEcHExbGFhMlkxOTVIbmcrY2MxUllJZVNMR1pwRnZzZnQyZ2x3dG15cW1lVHgrdVFJIl19.eyJsZWdhbEhlYWRlciI6Ik1ldGFkYXRhIExlZ2FsIEhlYWRlciB2MS4wMCIsIm5vIjoxLCJuZXh0VXBkYXRlIjoiMjEwMC0wMS0wMSIsImVudHJpZXMiOlt7ImFhaWQiOiI0ZTRlIzQwMDUiLCJ1cmwiOiJodHRwczovL21kcy5leGFtcGxlLmNvbS9tZXRhZGF0YS80ZTRlJTIzNDAwNSIsInN0YXR1c1JlcG9ydHMiOlt7InN0YXR1cyI6IkZJRE9fQ0VSVElGSUVEIiwiZWZmZWN0aXZlRGF0ZSI6IjIwMTktMDEtMDEifV0sInRpbWVPZkxhc3RTdGF0dXNDaGFuZ2UiOiIyMDE5LTAxLTAxIiwiaGFzaCI6InFKQkRaa2g3bDBsWWltY29KR2xpSk1Cbk5rZmF4LTFMYU83VFJyWnA0QVUifSx7ImFhZ3VpZCI6IjAxMzJkMTEwLWJmNGUtNDIwOC1hNDAzLWFiNGY1ZjEyZWZlNSIsInVybCI6Imh0dHBzOi8vbWRzLmV4YW1wbGUuY29tL21ldGFkYXRhLzAxMzJkMTEwIiwic3RhdHVzUmVwb3J0cyI6W3sic3RhdHVzIjoiRklET19DRVJUSUZJRURfTDEiLCJlZmZlY3RpdmVEYXRlIjoiMjAyMC0wNS0wNSJ9XSwidGltZU9mTGFzdFN0YXR1c0NoYW5nZSI6IjIwMjAtMDUtMDUiLCJoYXNoIjoiZ0RZRzhsdzJZcU81dW13aDZLb2dxanBIQ2hNSENEVXlfd1lNWmxNbnBuYyJ9LHsiYXR0ZXN0YXRpb25DZXJ0aWZpY2F0ZUtleUlkZW50aWZpZXJzIjpbIjkyMzg4MWZlMmYyMTRlZTQ2NTQ4NDM3MWFlYjcyZTk3ZjVhNThlMGEiXSwidXJsIjoiaHR0cHM6Ly9tZHMuZXhhbXBsZS5jb20vbWV0YWRhdGEvdTJmIiwic3RhdHVzUmVwb3J0cyI6W3sic3RhdHVzIjoiRklET19DRVJUSUZJRUQifV0sInRpbWVPZkxhc3RTdGF0dXNDaGFuZ2UiOiIyMDE4LTAzLTAyIiwiaGFzaCI6ImlNdFBFTjVseG8yNWRSamRINjZFTzNtOVdGd0lBejJJYnk3NmNaREdwMHMifV19.bcDk6t4dWA6pDMUuEWtZ7kykzn15QkuLkdmhokJ8eBhFCvHGLp4-gkb_yfvoa_JeYY0BCSyvwwh3oUcbOwGAHeEAf2OGuucQb2cxYqrBZt04EO5zHCTbt993qUaokkTxMbARe94oDRCdl2yEi_xAmwrvIkyRKFIi1eEm8cOsgpCmfoiSYGSPOkYSF5-JUh_Y62LKqXYhCWY0acxLm2aGQLKjuK5Vd9_Ucq5nih5-7dDhSWXyVh2NiV5f1IIlBpjuYV6grQZ0-CpKWpZFa0us5VRKW7W9Jnxqk0yjTKDCLuNcv0sWuil1xW0th5dwz-LwCijWrh7diAzEGTlFxcJqEg";

    const TOC_2: &str = "eyJhbGciOiJSUzI1NiIsIng1YyI6WyJNSUlDd2pDQ0FhcWdBd0lCQWdJQkFqQU5CZ2txaGtpRzl3MEJBUXNGQURBYk1Sa3dGd1lEVlFRRERCQlVaWE4wSUUxRVV5QlNiMjkwSUVOQk1DQVhEVEkyTURFd01UQXdNREF3TUZvWUR6SXhNalV4TWpBNE1EQXdNREF3V2pBYU1SZ3dGZ1lEVlFRRERBOVVaWE4wSUUxRVV5QlRhV2R1WlhJd2dnRWlNQTBHQ1NxR1NJYjNEUUVCQVFVQUE0SUJEd0F3Z2dFS0FvSUJBUUQ3MWgzcW10ZkpUTjVyQ3M1aWE2ckE5VWxlOHc5djBIb3duSzRxbGlFbTgxblhvN1A4NGdIN1A4YlZxMmtJNWtITGQxTkU0bHAvM2R6NFU3MzhnWEFWM3lJQ0xRQXFvK1dxLytMR1NXK0l4aFJrbnNrTFl2V3V4Ym9WZVM0TzQvZ3ZtSEk5YkRvNWsveS9qVlU5bXZUWGExeTVMZHMxMkdSaS9RT3EyT2NNM0ZGbmtyaGltTHBGeHlreVN5QVRZZ3VBYVRnaCtxZFY0TkY3dkdTdXZoL0taNUNFakNZNGp3UEdjcVdiOFd2Umw0Z3NiWDh0aDRQUHVmS29VamVHR3hjT0V4cVJDdkZsakEvYW1mQTZGUm1ZVVlhaVJCM09WUGI0SUxTdUs4V0E0Rk5MSGo3dk1oRDFuU2xmM3U0V2xqRm95WXdldDJqMklpVHMzSlRBb0hwSEFnTUJBQUdqRURBT01Bd0dBMVVkRXdFQi93UUNNQUF3RFFZSktvWklodmNOQVFFTEJRQURnZ0VCQUVVdWsvSXppdlR5Z0czSXQxZDg4TUZ6QmdCaitkbzNPSUJiTTd0eWU3eWJYVWw2MkRBV0w0dG4wVk4wc0tjd1Y1cjF3QXRtQkEwdXdya0NJbVFzUTdoYllhQldidnN6dVkwQlhKMDhpRUx3WkZLV3dIb0JLTFlwekNaZ3ZWNHJNL0YyK1BHaUNsN3RXUEFsWWFDdmtweGZYeHp6dmhYaFlLOG5uMXk2TDAwWWp6VDVYdGtycXQybUNzdGlSNW5HRGtiUUxLaDB6UlpYMTZFSGdWVnp2SFdHOGRLcEtLL2ZvTGRTYzdyMTlGcGhmQXdXdUw3akVHWUZTK1R0aldsVE5udFRlRWVGclJaMmppaE9zZXBnUFJEeUZRcmJIUllWUlh1aDR5djZscXBsMjY1cjdNS1pQVDdWbGdXNnBLSERuUC9WVzczTzNiVkl6RFk3VW4vdUVQZz0iLCJNSUlDeGpDQ0FhNmdBd0lCQWdJQkFUQU5CZ2txaGtpRzl3MEJBUXNGQURBYk1Sa3dGd1lEVlFRRERCQlVaWE4wSUUxRVV5QlNiMjkwSUVOQk1DQVhEVEkyTURFd01UQXdNREF3TUZvWUR6SXhNalV4TWpBNE1EQXdNREF3V2pBYk1Sa3dGd1lEVlFRRERCQlVaWE4wSUUxRVV5QlNiMjkwSUVOQk1JSUJJakFOQmdrcWhraUc5dzBCQVFFRkFBT0NBUThBTUlJQkNnS0NBUUVBazZlQndaVXJFalpEeWRlVVBXdWdQQVNKSXI5SFh4TW1rYlJNaXRheGtsQ3F6dUFJSmtVYUZkaUhDV29sZUF3c0Z2SHAzWDZDRHVwYWNBbm50azVmTFNrbXk4WHpBRnpmN3BKeTFYdCtwaGxJcXRoREd3T0J3cHVLb2JBam40bS9xUVN6ZHdUMllMM0kvY0h2bHJQN3lEdzFwS0ozajQ4bks0dm1wYWlMVFBiK2dlelh0M0hEc052b1EvVUd4RGxsK3ZRNE15OVozbGN2QXA5b3ZyalhhbUZYK2NvNEZhR0cvaE1BNWtVN28rWmV4aHBjbHBobmJjRmdqNHJPVVV5TEsrcFdpM0g0QlpOaVI5YktaSEsrVUJCU01PL3hEYk4wZ0RSQncwU2NSaHJuMEsyQ0d6ZW1rSHc2V1VueVlWcWRyVHBKSmg5Wkk5VCtvMGlrWFdEVFFRSURBUUFCb3hNd0VUQVBCZ05WSFJNQkFmOEVCVEFEQVFIL01BMEdDU3FHU0liM0RRRUJDd1VBQTRJQkFRQVZTaWRreUt3THhPODJGeG9XWXovTmM3djNmNXBTY24rWURwOFBZdGpzQndWbW5VSzdCOVl3M1IzWk4vaCtNVzNDZysyRFYvek1kNFc5STErZUJ4S1NMWW9ZcEpYZW9iMlJ3RU5aL2I4M1VKeU5nTG81OEs4eHZsNUxia2xaN1lFMUFETUlDN0VFN0xCZTFXRE42cTNpK0ErcmpweHVnTDhkVnpRUEd0MlZRMFQwbnQ3NjZMc1MvTzJBTSswZHB3UHNmOUJPRitkZFFKMzZpYVhid3NDQ0tqS01ROThwNUhJelVnKzJjVzd6cWwxWEFYZXBXRmhhZ1BhYXZxMURaUWZmcVJiRlNmTmU5NzhIaWRDNXY2Rk0wQzF1M0Zka3dRbFRvM2pEcHExbGFhMlkxOTVIbmcrY2MxUllJZVNMR1pwRnZzZnQyZ2x3dG15cW1lVHgrdVFJIl19.eyJsZWdhbEhlYWRlciI6Ik1ldGFkYXRhIExlZ2FsIEhlYWRlciB2MS4wMCIsIm5vIjoyNywibmV4dFVwZGF0ZSI6IjIxMDAtMDEtMDEiLCJlbnRyaWVzIjpbeyJhYWlkIjoiNGU0ZSM0MDA1IiwidXJsIjoiaHR0cHM6Ly9tZHMyLmV4YW1wbGUuY29tL21ldGFkYXRhLzRlNGUlMjM0MDA1Iiwic3RhdHVzUmVwb3J0cyI6W3sic3RhdHVzIjoiRklET19DRVJUSUZJRUQifV0sInRpbWVPZkxhc3RTdGF0dXNDaGFuZ2UiOiIyMDIxLTAyLTAzIiwiaGFzaCI6IkpmTVNkeDZfYWVKdnlqa2dieGhpaFVCbHE5TDhrQkdyblVSWU4tWFQtVjgifV19.teVuwn9rbZINFvDSPCPqRC9NrFHvndWjswdbQYKCQm6naKmYelFzYkn9rdSVaCv2OYJVqsKd2sErnxyU1p5UUmlO4ZJq-XLD05evDMuSXhP9n_fU64iiPysCelfkw-qWWE6bNeUHD2kobETy_SVuGgTJ39VOviGSOL3Q1rjnKnQOSELOhVjrrbq1zpO6a_dHTq6NEJZM-7egIEoXaXsABypciq0iaBCBHXNkiHzHrTdA4aJvnHvWrp2wBvMLFJBHWnYuZwMUBq3fuXM7FTjksKel_cESvtz-97_JyyNqM2gHLT0pRRIpGT6IdR0G6bC1SdNdQJhjhYoMB0IU0KJAOw";

    const ENTRY_UAF_1: &str = "eyJhYWlkIjoiNGU0ZSM0MDA1IiwiZGVzY3JpcHRpb24iOiJUZXN0IFVBRiBBdXRoZW50aWNhdG9yIiwiYXV0aGVudGljYXRvclZlcnNpb24iOjIsInByb3RvY29sRmFtaWx5IjoidWFmIiwidXB2IjpbeyJtYWpvciI6MSwibWlub3IiOjB9XSwiYXR0ZXN0YXRpb25Sb290Q2VydGlmaWNhdGVzIjpbXX0";
    const ENTRY_FIDO2: &str = "eyJhYWd1aWQiOiIwMTMyZDExMC1iZjRlLTQyMDgtYTQwMy1hYjRmNWYxMmVmZTUiLCJkZXNjcmlwdGlvbiI6IlRlc3QgRklETzIgQXV0aGVudGljYXRvciIsImF1dGhlbnRpY2F0b3JWZXJzaW9uIjo1LCJwcm90b2NvbEZhbWlseSI6ImZpZG8yIiwiYXR0ZXN0YXRpb25Sb290Q2VydGlmaWNhdGVzIjpbXX0";
    const ENTRY_U2F: &str = "eyJhdHRlc3RhdGlvbkNlcnRpZmljYXRlS2V5SWRlbnRpZmllcnMiOlsiOTIzODgxZmUyZjIxNGVlNDY1NDg0MzcxYWViNzJlOTdmNWE1OGUwYSJdLCJkZXNjcmlwdGlvbiI6IlRlc3QgVTJGIEF1dGhlbnRpY2F0b3IiLCJwcm90b2NvbEZhbWlseSI6InUyZiIsImF0dGVzdGF0aW9uUm9vdENlcnRpZmljYXRlcyI6W119";
    const ENTRY_UAF_2: &str = "eyJsZWdhbEhlYWRlciI6Imh0dHBzOi8vZmlkb2FsbGlhbmNlLm9yZy9tZXRhZGF0YS9tZXRhZGF0YS1zdGF0ZW1lbnQtbGVnYWwtaGVhZGVyLyIsImFhaWQiOiI0ZTRlIzQwMDUiLCJkZXNjcmlwdGlvbiI6IlRlc3QgVUFGIEF1dGhlbnRpY2F0b3IgdjIiLCJwcm90b2NvbEZhbWlseSI6InVhZiIsImF0dGVzdGF0aW9uUm9vdENlcnRpZmljYXRlcyI6W119";
    const ENTRY_UNLISTED: &str = "eyJhYWlkIjoiZmZmZiMwMDAxIiwiZGVzY3JpcHRpb24iOiJFdmlsIGVudHJ5In0";

    fn test_collection(name: &str) -> MdsCollection {
        let root = x509::X509::from_pem(TEST_ROOT_PEM.as_bytes()).unwrap();
        MdsCollection::with_roots(name, vec![root])
    }

    #[test]
    fn toc_verifies_and_entries_are_gated_by_hash() {
        let mut c = test_collection("mds1");
        c.add_toc(TOC_1).unwrap();
        assert_eq!(c.toc().unwrap().no, 1);
        assert_eq!(c.toc().unwrap().entries.len(), 3);

        c.add_entry(ENTRY_UAF_1).unwrap();
        c.add_entry(ENTRY_FIDO2).unwrap();
        c.add_entry(ENTRY_U2F).unwrap();
        c.add_entry(ENTRY_UNLISTED).unwrap();
        c.validate().unwrap();

        // The unlisted entry was dropped.
        assert_eq!(c.len(), 3);
        assert!(c.find_entry("ffff#0001").is_none());

        let uaf = c.find_entry("4e4e#4005").unwrap();
        assert_eq!(uaf.protocol_family, ProtocolFamily::Uaf);
        assert_eq!(uaf.description.as_deref(), Some("Test UAF Authenticator"));
        assert_eq!(
            uaf.time_of_last_status_change.as_deref(),
            Some("2019-01-01")
        );
        assert_eq!(uaf.status_reports.len(), 1);
    }

    #[test]
    fn aaguid_lookup_accepts_both_shapes() {
        let mut c = test_collection("mds1");
        c.add_toc(TOC_1).unwrap();
        c.add_entry(ENTRY_FIDO2).unwrap();
        c.validate().unwrap();

        let hyphenated = c.find_entry("0132d110-bf4e-4208-a403-ab4f5f12efe5").unwrap();
        let bare = c.find_entry("0132d110bf4e4208a403ab4f5f12efe5").unwrap();
        assert_eq!(hyphenated.aaguid, bare.aaguid);
        assert_eq!(
            hyphenated.description.as_deref(),
            Some("Test FIDO2 Authenticator")
        );
    }

    #[test]
    fn cert_key_identifier_lookup() {
        let mut c = test_collection("mds1");
        c.add_toc(TOC_1).unwrap();
        c.add_entry(ENTRY_U2F).unwrap();
        c.validate().unwrap();

        let entry = c
            .find_entry("923881FE2F214EE465484371AEB72E97F5A58E0A")
            .unwrap();
        assert_eq!(entry.protocol_family, ProtocolFamily::U2f);
    }

    #[test]
    fn toc_with_untrusted_root_is_rejected() {
        // Default construction trusts the production root, not our test CA.
        let mut c = MdsCollection::new("mds1").unwrap();
        let e = c.add_toc(TOC_1).unwrap_err();
        assert_eq!(e.kind, ErrorKind::TrustPath);
    }

    #[test]
    fn tampered_toc_signature_is_rejected() {
        let mut c = test_collection("mds1");
        // Flip a character of the signature.
        let mut tampered = TOC_1.to_string();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        let e = c.add_toc(&tampered).unwrap_err();
        assert_eq!(e.kind, ErrorKind::SigInvalid);
    }

    #[test]
    fn validate_without_toc_fails() {
        let mut c = test_collection("mds1");
        c.add_entry(ENTRY_UAF_1).unwrap();
        let e = c.validate().unwrap_err();
        assert_eq!(e.kind, ErrorKind::TrustPath);
    }

    #[test]
    fn store_returns_matches_in_registration_order() {
        let mut store = MdsStore::new();

        let mut c1 = test_collection("mds1");
        c1.add_toc(TOC_1).unwrap();
        c1.add_entry(ENTRY_UAF_1).unwrap();
        store.add_collection(c1).unwrap();

        let mut c2 = test_collection("mds2");
        c2.add_toc(TOC_2).unwrap();
        c2.add_entry(ENTRY_UAF_2).unwrap();
        store.add_collection(c2).unwrap();

        let matches = store.find_entry("4e4e#4005").unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].collection, "mds1");
        assert!(matches[0].legal_header.is_none());
        assert_eq!(matches[1].collection, "mds2");
        assert_eq!(
            matches[1].legal_header.as_deref(),
            Some("https://fidoalliance.org/metadata/metadata-statement-legal-header/")
        );
    }

    #[test]
    fn empty_store_is_no_mds() {
        let store = MdsStore::new();
        let e = store.find_entry("4e4e#4005").unwrap_err();
        assert_eq!(e.kind, ErrorKind::NoMds);
    }

    #[test]
    fn duplicate_collection_name_is_rejected() {
        let mut store = MdsStore::new();
        let mut c1 = test_collection("mds1");
        c1.add_toc(TOC_1).unwrap();
        store.add_collection(c1).unwrap();

        let mut c2 = test_collection("mds1");
        c2.add_toc(TOC_1).unwrap();
        let e = store.add_collection(c2).unwrap_err();
        assert_eq!(e.kind, ErrorKind::Duplicate);
    }
}
