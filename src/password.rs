use std::num::NonZeroU32;

use fast32::base64;
use rand::Rng;
use ring::pbkdf2;
use serde::{Deserialize, Serialize};

/// Marker byte of the fixed-layout legacy hash format.
const FORMAT_MARKER_V2: u8 = 0x00;
/// Marker byte of the self-describing current hash format.
const FORMAT_MARKER_V3: u8 = 0x01;

/// PBKDF2 iteration count fixed by the legacy format.
const V2_ITERATIONS: NonZeroU32 = match NonZeroU32::new(1000) {
    Some(n) => n,
    None => unreachable!(),
};
const V2_SALT_LEN: usize = 16;
const V2_SUBKEY_LEN: usize = 32;
/// marker + salt + subkey
const V2_BLOB_LEN: usize = 1 + V2_SALT_LEN + V2_SUBKEY_LEN;

const V3_SALT_LEN: usize = 16;
const V3_SUBKEY_LEN: usize = 32;
/// marker + PRF id + iteration count + salt length
const V3_HEADER_LEN: usize = 1 + 4 + 4 + 4;

/// Shortest salt accepted when parsing a current-format hash.
const MIN_SALT_LEN: usize = 16;
/// Shortest derived subkey accepted when parsing a current-format hash.
const MIN_SUBKEY_LEN: usize = 16;

/// Default PBKDF2 iteration count for newly produced hashes.
pub const DEFAULT_ITERATION_COUNT: u32 = 100_000;

/// Pseudorandom function recorded in a current-format hash header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prf {
    HmacSha1,
    HmacSha256,
    HmacSha512,
}

impl Prf {
    fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(Self::HmacSha1),
            1 => Some(Self::HmacSha256),
            2 => Some(Self::HmacSha512),
            _ => None,
        }
    }

    fn id(self) -> u32 {
        match self {
            Self::HmacSha1 => 0,
            Self::HmacSha256 => 1,
            Self::HmacSha512 => 2,
        }
    }

    fn algorithm(self) -> pbkdf2::Algorithm {
        match self {
            Self::HmacSha1 => pbkdf2::PBKDF2_HMAC_SHA1,
            Self::HmacSha256 => pbkdf2::PBKDF2_HMAC_SHA256,
            Self::HmacSha512 => pbkdf2::PBKDF2_HMAC_SHA512,
        }
    }
}

/// Hash format produced for new passwords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompatibilityMode {
    /// Fixed-layout format: PBKDF2-HMAC-SHA1, 1000 iterations, 16-byte
    /// salt, 32-byte subkey.
    V2,
    /// Self-describing format: PBKDF2-HMAC-SHA256 with a configurable
    /// iteration count recorded in the hash itself.
    V3,
}

/// Configuration for a [PasswordHasher].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHasherOptions {
    /// Format produced by [PasswordHasher::hash_password]
    pub compatibility_mode: CompatibilityMode,
    /// PBKDF2 iteration count for [CompatibilityMode::V3] hashes
    pub iteration_count: u32,
}

impl Default for PasswordHasherOptions {
    fn default() -> Self {
        Self {
            compatibility_mode: CompatibilityMode::V3,
            iteration_count: DEFAULT_ITERATION_COUNT,
        }
    }
}

/// Error type for hasher construction
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    /// The current format requires at least one PBKDF2 iteration
    #[error("iteration count must be at least 1, got {0}")]
    IterationCount(u32),
}

/// Source of cryptographically secure salt bytes.
pub trait SaltSource {
    /// Fill `dest` with random bytes.
    fn fill(&self, dest: &mut [u8]);
}

/// Salt source backed by the process CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSaltSource;

impl SaltSource for OsSaltSource {
    fn fill(&self, dest: &mut [u8]) {
        rand::rng().fill(dest);
    }
}

/// Outcome of verifying a candidate password against a stored hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordVerification {
    /// The candidate does not match, or the stored hash is malformed.
    Failed,
    /// The candidate matches the stored hash.
    Success,
    /// The candidate matches, but the hash was produced under an
    /// outdated policy and should be replaced by the caller.
    SuccessRehashNeeded,
}

/// Versioned PBKDF2 password hasher.
///
/// Produces self-describing binary hashes and verifies candidates
/// against hashes in either supported format, whatever the configured
/// mode. Configuration is fixed at construction; the hasher holds no
/// other state and is safe to share across threads.
#[derive(Debug, Clone)]
pub struct PasswordHasher<R = OsSaltSource> {
    mode: CompatibilityMode,
    iteration_count: u32,
    salt_source: R,
}

impl PasswordHasher {
    /// Create a hasher with [PasswordHasherOptions::default].
    pub fn new() -> Self {
        Self {
            mode: CompatibilityMode::V3,
            iteration_count: DEFAULT_ITERATION_COUNT,
            salt_source: OsSaltSource,
        }
    }

    /// Create a hasher from `options`, drawing salts from the process
    /// CSPRNG.
    pub fn from_options(options: PasswordHasherOptions) -> Result<Self, OptionsError> {
        Self::with_salt_source(options, OsSaltSource)
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: SaltSource> PasswordHasher<R> {
    /// Create a hasher from `options`, drawing salts from `salt_source`.
    pub fn with_salt_source(
        options: PasswordHasherOptions,
        salt_source: R,
    ) -> Result<Self, OptionsError> {
        if options.compatibility_mode == CompatibilityMode::V3 && options.iteration_count == 0 {
            return Err(OptionsError::IterationCount(options.iteration_count));
        }
        Ok(Self {
            mode: options.compatibility_mode,
            iteration_count: options.iteration_count,
            salt_source,
        })
    }

    /// Hash a password into a binary record in the configured format.
    ///
    /// Every call draws a fresh salt, so hashing the same password
    /// twice yields different records.
    pub fn hash_password(&self, password: &str) -> Vec<u8> {
        match self.mode {
            CompatibilityMode::V2 => self.hash_v2(password),
            CompatibilityMode::V3 => self.hash_v3(password),
        }
    }

    /// Verify a candidate password against a stored hash record.
    ///
    /// Total over arbitrary input bytes: a truncated, tampered or
    /// unrecognized record verifies as [PasswordVerification::Failed]
    /// exactly like a wrong password does.
    pub fn verify_password(&self, stored: &[u8], candidate: &str) -> PasswordVerification {
        let Some((&marker, _)) = stored.split_first() else {
            return PasswordVerification::Failed;
        };
        match marker {
            FORMAT_MARKER_V2 => self.verify_v2(stored, candidate),
            FORMAT_MARKER_V3 => self.verify_v3(stored, candidate),
            other => {
                tracing::debug!(marker = other, "unknown password hash format marker");
                PasswordVerification::Failed
            }
        }
    }

    /// Hash a password and encode the record as standard base64.
    pub fn hash_password_b64(&self, password: &str) -> String {
        base64::RFC4648.encode(&self.hash_password(password))
    }

    /// Verify a candidate password against a base64-encoded stored hash.
    ///
    /// Text that does not decode as base64 verifies as
    /// [PasswordVerification::Failed].
    pub fn verify_password_b64(&self, stored: &str, candidate: &str) -> PasswordVerification {
        match base64::RFC4648.decode_str(stored) {
            Ok(blob) => self.verify_password(&blob, candidate),
            Err(_) => PasswordVerification::Failed,
        }
    }

    fn hash_v2(&self, password: &str) -> Vec<u8> {
        let mut salt = [0u8; V2_SALT_LEN];
        self.salt_source.fill(&mut salt);
        let subkey = derive_subkey(Prf::HmacSha1, V2_ITERATIONS, &salt, password, V2_SUBKEY_LEN);

        let mut blob = Vec::with_capacity(V2_BLOB_LEN);
        blob.push(FORMAT_MARKER_V2);
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&subkey);
        blob
    }

    fn hash_v3(&self, password: &str) -> Vec<u8> {
        // construction rejects a zero count under the current format
        let iterations = NonZeroU32::new(self.iteration_count).unwrap_or(NonZeroU32::MIN);
        let mut salt = [0u8; V3_SALT_LEN];
        self.salt_source.fill(&mut salt);
        let subkey = derive_subkey(Prf::HmacSha256, iterations, &salt, password, V3_SUBKEY_LEN);

        let mut blob = Vec::with_capacity(V3_HEADER_LEN + V3_SALT_LEN + V3_SUBKEY_LEN);
        blob.push(FORMAT_MARKER_V3);
        blob.extend_from_slice(&Prf::HmacSha256.id().to_be_bytes());
        blob.extend_from_slice(&iterations.get().to_be_bytes());
        blob.extend_from_slice(&(V3_SALT_LEN as u32).to_be_bytes());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&subkey);
        blob
    }

    fn verify_v2(&self, stored: &[u8], candidate: &str) -> PasswordVerification {
        if stored.len() != V2_BLOB_LEN {
            return PasswordVerification::Failed;
        }
        let salt = &stored[1..1 + V2_SALT_LEN];
        let expected = &stored[1 + V2_SALT_LEN..];
        let subkey = derive_subkey(Prf::HmacSha1, V2_ITERATIONS, salt, candidate, V2_SUBKEY_LEN);
        if !fixed_time_eq(&subkey, expected) {
            return PasswordVerification::Failed;
        }
        match self.mode {
            // a legacy hash is always due for an upgrade under the current policy
            CompatibilityMode::V3 => PasswordVerification::SuccessRehashNeeded,
            CompatibilityMode::V2 => PasswordVerification::Success,
        }
    }

    fn verify_v3(&self, stored: &[u8], candidate: &str) -> PasswordVerification {
        let Some((prf_id, iteration_count, salt, expected)) = split_v3(&stored[1..]) else {
            tracing::debug!(len = stored.len(), "malformed current-format password hash");
            return PasswordVerification::Failed;
        };
        let Some(prf) = Prf::from_id(prf_id) else {
            tracing::debug!(prf_id, "password hash uses an unrecognized PRF");
            return PasswordVerification::Failed;
        };
        let Some(iterations) = NonZeroU32::new(iteration_count) else {
            return PasswordVerification::Failed;
        };
        let subkey = derive_subkey(prf, iterations, salt, candidate, expected.len());
        if !fixed_time_eq(&subkey, expected) {
            return PasswordVerification::Failed;
        }
        if iteration_count < self.iteration_count {
            PasswordVerification::SuccessRehashNeeded
        } else {
            PasswordVerification::Success
        }
    }
}

/// Split the body of a current-format record (everything after the
/// marker byte) into its header fields, salt and stored subkey.
///
/// Returns `None` for any truncated or out-of-bounds layout.
fn split_v3(body: &[u8]) -> Option<(u32, u32, &[u8], &[u8])> {
    let prf_id = read_u32_be(body, 0)?;
    let iteration_count = read_u32_be(body, 4)?;
    let salt_len = usize::try_from(read_u32_be(body, 8)?).ok()?;
    if salt_len < MIN_SALT_LEN {
        return None;
    }
    let rest = body.get(12..)?;
    if rest.len() < salt_len {
        return None;
    }
    let (salt, subkey) = rest.split_at(salt_len);
    if subkey.len() < MIN_SUBKEY_LEN {
        return None;
    }
    Some((prf_id, iteration_count, salt, subkey))
}

fn read_u32_be(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes(bytes.try_into().ok()?))
}

fn derive_subkey(
    prf: Prf,
    iterations: NonZeroU32,
    salt: &[u8],
    password: &str,
    len: usize,
) -> Vec<u8> {
    let mut subkey = vec![0u8; len];
    pbkdf2::derive(prf.algorithm(), iterations, salt, password.as_bytes(), &mut subkey);
    subkey
}

/// Full-length byte comparison.
///
/// Scans both slices to the end instead of returning at the first
/// mismatch. Best effort only; this is not a rigorous constant-time
/// primitive.
fn fixed_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
