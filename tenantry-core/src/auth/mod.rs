/// Credential and session primitives
///
/// # Modules
///
/// - [`password`]: Argon2id hashing, verification and credential rotation
/// - [`tokens`]: Random transition tokens and temporary passwords
/// - [`jwt`]: HS256 session tokens carrying the credential version
/// - [`authorization`]: Role checks over verified claims
///
/// # Security Features
///
/// - **Password Hashing**: Argon2id, 64 MB memory, 3 iterations, 4 lanes by default
/// - **Sessions**: HS256 with a configured secret of at least 32 bytes
/// - **Revocation**: Every credential change bumps `token_version`, which
///   invalidates sessions issued earlier
/// - **Constant-time Comparison**: Password verification is constant-time

pub mod authorization;
pub mod jwt;
pub mod password;
pub mod tokens;

pub use authorization::{authorize, AuthzError};
pub use jwt::{JwtError, SessionClaims, SessionKeys};
pub use password::{CredentialManager, HashParams, PasswordError, PasswordPolicy, PasswordPurpose};
