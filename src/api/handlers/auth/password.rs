//! Argon2id password hashing and verification.
//!
//! Stored hashes are PHC strings, so the salt, algorithm version and cost
//! parameters travel with the hash and no separate salt column exists.
//! Verification reads the parameters from the stored string, which lets the
//! cost be raised later without invalidating existing hashes.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString},
    Algorithm, Argon2, Params, Version,
};
use tracing::warn;

const MEMORY_COST_KIB: u32 = 19_456;
const TIME_COST: u32 = 2;
const PARALLELISM: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("invalid argon2 parameters: {0}")]
    Params(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

#[derive(Clone, Debug)]
pub struct PasswordVerifier {
    params: Params,
    // Verified against when the account does not exist, so both paths cost one hash.
    dummy_hash: String,
}

impl PasswordVerifier {
    /// Build a verifier with the default Argon2id cost.
    ///
    /// # Errors
    /// Returns an error if the parameters are rejected or the dummy hash cannot be built.
    pub fn new() -> Result<Self, PasswordError> {
        Self::with_params(MEMORY_COST_KIB, TIME_COST, PARALLELISM)
    }

    /// Build a verifier with explicit Argon2id cost parameters.
    ///
    /// # Errors
    /// Returns an error if the parameters are rejected or the dummy hash cannot be built.
    pub fn with_params(
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
    ) -> Result<Self, PasswordError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|err| PasswordError::Params(err.to_string()))?;
        let mut verifier = Self {
            params,
            dummy_hash: String::new(),
        };
        verifier.dummy_hash = verifier.hash("partgate-dummy-password")?;
        Ok(verifier)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a plaintext secret into a PHC string with a fresh random salt.
    ///
    /// # Errors
    /// Returns an error if Argon2 fails to produce a hash.
    pub fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|err| PasswordError::Hash(err.to_string()))
    }

    /// Check a plaintext secret against a stored PHC hash.
    ///
    /// The comparison inside `argon2` is constant time. A stored hash that
    /// cannot be parsed never verifies.
    #[must_use]
    pub fn verify(&self, plaintext: &str, stored_hash: &str) -> bool {
        let parsed = match PasswordHash::new(stored_hash) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("Stored password hash is not a valid PHC string: {err}");
                return false;
            }
        };
        self.argon2()
            .verify_password(plaintext.as_bytes(), &parsed)
            .is_ok()
    }

    /// Burn one verification for a principal that does not exist.
    pub fn verify_dummy(&self, plaintext: &str) {
        let _ = self.verify(plaintext, &self.dummy_hash);
    }
}
