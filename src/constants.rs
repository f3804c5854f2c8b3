//! Protocol constants.

/// Default challenge length in bytes.
pub const CHALLENGE_SIZE_BYTES: usize = 64;

/// The smallest challenge length the configuration accepts.
pub const CHALLENGE_SIZE_BYTES_MIN: usize = 32;

/// Default client side timeout carried in options, in milliseconds. This is
/// advisory for the client - nothing server side enforces it.
pub const AUTHENTICATOR_TIMEOUT_MS: u32 = 60_000;

/// Default relying party display name.
pub const DEFAULT_RP_NAME: &str = "Anonymous Service";

/// Default accepted COSE algorithms: ES256 and RS256.
pub const DEFAULT_CRYPTO_PARAMS: &[i64] = &[-7, -257];

/// Default window either side of "now" accepted for a SafetyNet
/// `timestampMs`, in milliseconds.
pub const SAFETYNET_TIMESTAMP_WINDOW_MS: u64 = 60_000;

/// TPM_GENERATED_VALUE - every TPMS_ATTEST opens with this magic.
pub const TPM_GENERATED_VALUE: u32 = 0xff54_4347;

/// TPM_ST_ATTEST_CERTIFY.
pub const TPM_ST_ATTEST_CERTIFY: u16 = 0x8017;

/// Subject CN required on the SafetyNet attestation leaf certificate.
pub const SAFETYNET_HOSTNAME: &str = "attest.android.com";

/// Subject OU required on packed attestation certificates.
pub const PACKED_ATTESTATION_OU: &str = "Authenticator Attestation";
