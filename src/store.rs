use crate::password::{PasswordHasher, PasswordVerification, SaltSource};

/// Storage collaborator holding one opaque password hash per user.
///
/// The surrounding application owns persistence and concurrency; this
/// crate only reads the stored bytes and replaces them on upgrade.
pub trait PasswordHashStore<User> {
    /// Error type for storage operations
    type Error;

    /// Fetch the stored password hash for `user`, if any.
    fn password_hash(&self, user: &User) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Replace the stored password hash for `user`.
    fn set_password_hash(&mut self, user: &User, hash: Vec<u8>) -> Result<(), Self::Error>;
}

/// Check `candidate` against the hash stored for `user`, replacing the
/// stored hash when it matches but was produced under an outdated
/// policy.
///
/// Returns `Ok(false)` when no hash is stored or the candidate does not
/// match; storage errors are propagated.
pub fn check_password<User, S, R>(
    hasher: &PasswordHasher<R>,
    store: &mut S,
    user: &User,
    candidate: &str,
) -> Result<bool, S::Error>
where
    S: PasswordHashStore<User>,
    R: SaltSource,
{
    let Some(stored) = store.password_hash(user)? else {
        return Ok(false);
    };
    match hasher.verify_password(&stored, candidate) {
        PasswordVerification::Failed => Ok(false),
        PasswordVerification::Success => Ok(true),
        PasswordVerification::SuccessRehashNeeded => {
            tracing::debug!("replacing password hash stored under an outdated policy");
            store.set_password_hash(user, hasher.hash_password(candidate))?;
            Ok(true)
        }
    }
}
