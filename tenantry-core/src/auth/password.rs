/// Password hashing and credential rotation using Argon2id
///
/// [`CredentialManager`] owns the hashing parameters and the length policy.
/// Hashes are PHC strings, so parameters travel with every stored hash and
/// can be raised later without invalidating existing credentials.
///
/// # Security
///
/// - **Algorithm**: Argon2id, version 0x13
/// - **Memory**: 64 MB (65536 KiB) by default
/// - **Iterations**: 3 passes by default
/// - **Parallelism**: 4 lanes by default
/// - **Output**: 32-byte hash
///
/// # Example
///
/// ```
/// use tenantry_core::auth::password::{CredentialManager, HashParams, PasswordPolicy, PasswordPurpose};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = CredentialManager::new(PasswordPolicy::default(), HashParams::light());
/// let hash = manager.hash("super_secret_password_123", PasswordPurpose::Initial)?;
///
/// assert!(manager.verify("super_secret_password_123", &hash)?);
/// assert!(!manager.verify("wrong_password", &hash)?);
/// # Ok(())
/// # }
/// ```

use crate::models::user::User;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder, Version,
};
use serde::Deserialize;

/// Error type for password hashing operations
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    /// Plaintext shorter than the policy minimum
    #[error("Password must be at least {min} characters long")]
    TooShort { min: usize },

    /// Failed to hash password
    #[error("Failed to hash password: {0}")]
    HashError(String),

    /// Failed to verify password
    #[error("Failed to verify password: {0}")]
    VerifyError(String),

    /// Invalid password hash format
    #[error("Invalid password hash format: {0}")]
    InvalidHash(String),

    /// Blocking worker panicked or was cancelled
    #[error("Hashing task failed: {0}")]
    TaskFailed(String),
}

/// Which length minimum applies to a plaintext
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordPurpose {
    /// Sign-up and invite acceptance
    Initial,

    /// Password resets, which may carry a lower historic bound
    Legacy,
}

/// Length policy for plaintext passwords
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub legacy_min_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            legacy_min_length: 8,
        }
    }
}

impl PasswordPolicy {
    /// Minimum length for the given purpose
    pub fn minimum(&self, purpose: PasswordPurpose) -> usize {
        match purpose {
            PasswordPurpose::Initial => self.min_length,
            PasswordPurpose::Legacy => self.legacy_min_length,
        }
    }
}

/// Argon2 cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HashParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    pub iterations: u32,
    pub lanes: u32,
}

impl Default for HashParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            lanes: 4,
        }
    }
}

impl HashParams {
    /// Minimal costs for tests and local development
    pub fn light() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            lanes: 1,
        }
    }
}

/// Password hashing, verification and credential-version stamping
#[derive(Debug, Clone, Copy)]
pub struct CredentialManager {
    policy: PasswordPolicy,
    params: HashParams,
}

impl Default for CredentialManager {
    fn default() -> Self {
        Self::new(PasswordPolicy::default(), HashParams::default())
    }
}

impl CredentialManager {
    pub fn new(policy: PasswordPolicy, params: HashParams) -> Self {
        Self { policy, params }
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    /// Checks the plaintext against the length policy without hashing
    pub fn check_length(&self, password: &str, purpose: PasswordPurpose) -> Result<(), PasswordError> {
        let min = self.policy.minimum(purpose);
        if password.chars().count() < min {
            return Err(PasswordError::TooShort { min });
        }
        Ok(())
    }

    fn argon2(&self) -> Result<Argon2<'static>, PasswordError> {
        let params = ParamsBuilder::new()
            .m_cost(self.params.memory_kib)
            .t_cost(self.params.iterations)
            .p_cost(self.params.lanes)
            .output_len(32)
            .build()
            .map_err(|e| PasswordError::HashError(format!("Invalid parameters: {}", e)))?;

        Ok(Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Hashes a plaintext into a PHC string
    ///
    /// # Errors
    ///
    /// `PasswordError::TooShort` when the plaintext is below the purpose's
    /// minimum, `PasswordError::HashError` when Argon2 rejects the parameters.
    pub fn hash(&self, password: &str, purpose: PasswordPurpose) -> Result<String, PasswordError> {
        self.check_length(password, purpose)?;
        self.hash_unchecked(password)
    }

    /// Hashes without applying the length policy (temporary credentials)
    pub(crate) fn hash_unchecked(&self, password: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = self
            .argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| PasswordError::HashError(format!("Hash generation failed: {}", e)))?;

        Ok(password_hash.to_string())
    }

    /// Whether a stored hash was produced with other costs than the configured ones
    pub fn needs_rehash(&self, hash: &str) -> Result<bool, PasswordError> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| PasswordError::InvalidHash(format!("Failed to parse hash: {}", e)))?;

        let stored = argon2::Params::try_from(&parsed_hash)
            .map_err(|e| PasswordError::InvalidHash(format!("Unsupported parameters: {}", e)))?;

        Ok(stored.m_cost() != self.params.memory_kib
            || stored.t_cost() != self.params.iterations
            || stored.p_cost() != self.params.lanes)
    }

    /// Verifies a plaintext against a stored hash in constant time
    ///
    /// Returns `Ok(false)` on mismatch. Only a malformed stored hash is an error.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| PasswordError::InvalidHash(format!("Failed to parse hash: {}", e)))?;

        // Parameters are read from the PHC string, not from self.params
        match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(PasswordError::VerifyError(format!("Verification failed: {}", e))),
        }
    }

    /// Replaces the user's credential and invalidates every earlier session
    pub fn rotate(
        &self,
        user: &mut User,
        new_password: &str,
        purpose: PasswordPurpose,
    ) -> Result<(), PasswordError> {
        let hash = self.hash(new_password, purpose)?;
        Self::apply_rotation(user, hash);
        Ok(())
    }

    /// Installs a hash computed earlier and invalidates every earlier session
    ///
    /// Services hash on the blocking pool before opening a write transaction
    /// and apply the result inside it.
    pub fn apply_rotation(user: &mut User, hash: String) {
        user.password_hash = hash;
        user.token_version += 1;
        user.updated_at = chrono::Utc::now();
    }

    /// [`hash`](Self::hash) on the blocking thread pool
    pub async fn hash_blocking(
        &self,
        password: &str,
        purpose: PasswordPurpose,
    ) -> Result<String, PasswordError> {
        self.check_length(password, purpose)?;
        let manager = *self;
        let password = password.to_string();
        tokio::task::spawn_blocking(move || manager.hash_unchecked(&password))
            .await
            .map_err(|e| PasswordError::TaskFailed(e.to_string()))?
    }

    /// [`hash`](Self::hash) on the blocking thread pool without the length policy
    ///
    /// For temporary credentials and for re-hashing a password that already
    /// verified.
    pub(crate) async fn hash_unchecked_blocking(&self, password: &str) -> Result<String, PasswordError> {
        let manager = *self;
        let password = password.to_string();
        tokio::task::spawn_blocking(move || manager.hash_unchecked(&password))
            .await
            .map_err(|e| PasswordError::TaskFailed(e.to_string()))?
    }

    /// [`verify`](Self::verify) on the blocking thread pool
    pub async fn verify_blocking(&self, password: &str, hash: &str) -> Result<bool, PasswordError> {
        let manager = *self;
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || manager.verify(&password, &hash))
            .await
            .map_err(|e| PasswordError::TaskFailed(e.to_string()))?
    }
}
