use std::time::SystemTime;

use fast32::base32;
use rand::Rng;
use ring::hmac;

/// Length of a code-derivation time step in seconds (10 minutes).
pub const TIME_STEP_SECS: u64 = 600;

/// Default secret length in bytes.
pub const SECRET_LENGTH: usize = 20;

/// Generated codes are six decimal digits.
const CODE_MODULUS: u32 = 1_000_000;

/// Shared secret for time-step one-time codes.
///
/// Codes are derived from the secret and the current 10-minute UTC time
/// step; nothing is persisted between calls. An optional modifier
/// string namespaces codes per purpose, so a code issued for one flow
/// cannot be replayed in another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotpSecret(Box<[u8]>);

impl AsRef<[u8]> for TotpSecret {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TotpSecret {
    /// Create a secret from a byte array
    pub fn new(secret: &[u8]) -> Self {
        Self(secret.into())
    }

    /// Create a random secret of [SECRET_LENGTH] bytes
    pub fn new_random() -> Self {
        let mut secret = [0u8; SECRET_LENGTH];
        rand::rng().fill(&mut secret);
        Self(secret.into())
    }

    /// Create a secret from a base32 encoded string
    pub fn try_from_base32(secret: impl AsRef<str>) -> Result<Self, fast32::DecodeError> {
        let secret = base32::RFC4648_NOPAD
            .decode_str(secret.as_ref())?
            .into_boxed_slice();
        Ok(Self(secret))
    }

    /// Generate the code for the current time step.
    ///
    /// - `modifier`: optional purpose string mixed into the derivation
    pub fn generate(&self, modifier: Option<&str>) -> u32 {
        self.generate_at(SystemTime::now(), modifier)
    }

    /// Generate the code for the time step containing `timestamp`.
    pub fn generate_at(&self, timestamp: SystemTime, modifier: Option<&str>) -> u32 {
        self.compute(time_step(timestamp), modifier)
    }

    /// Verify a code against the current time step.
    ///
    /// Only the current step is checked; a code from an adjacent step
    /// is rejected.
    ///
    /// - `code`: the code to be verified
    /// - `modifier`: must match the modifier the code was generated with
    pub fn verify(&self, code: u32, modifier: Option<&str>) -> bool {
        self.verify_at(SystemTime::now(), code, modifier)
    }

    /// Verify a code against the time step containing `timestamp`.
    pub fn verify_at(&self, timestamp: SystemTime, code: u32, modifier: Option<&str>) -> bool {
        if code >= CODE_MODULUS {
            return false;
        }
        self.compute(time_step(timestamp), modifier) == code
    }

    fn compute(&self, step: u64, modifier: Option<&str>) -> u32 {
        let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, &self.0);
        let mut message = step.to_be_bytes().to_vec();
        if let Some(modifier) = modifier.filter(|m| !m.is_empty()) {
            message.extend_from_slice(modifier.as_bytes());
        }
        let signature = hmac::sign(&key, &message);
        let signature = signature.as_ref();
        let offset = (signature[signature.len() - 1] & 0x0f) as usize;
        let mut code = ((signature[offset] & 0x7f) as u32) << 24
            | (signature[offset + 1] as u32) << 16
            | (signature[offset + 2] as u32) << 8
            | signature[offset + 3] as u32;
        code %= CODE_MODULUS;
        code
    }
}

fn time_step(timestamp: SystemTime) -> u64 {
    // SAFE: The timestamp is always after the UNIX epoch.
    #[allow(clippy::unwrap_used)]
    let secs = timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    secs / TIME_STEP_SECS
}
