/// Error handling for identity operations
///
/// Every component operation returns `Result<T, IdentityError>`. Callers at the
/// transport edge map [`IdentityError::kind`] to a status code; the kind is the
/// stable contract, the message is for humans.
///
/// # Example
///
/// ```
/// use tenantry_core::error::{ErrorKind, IdentityError};
///
/// let err = IdentityError::Forbidden("maintainer can invite only member".to_string());
/// assert_eq!(err.kind(), ErrorKind::Forbidden);
/// assert_eq!(err.kind().status_code(), 403);
/// ```

use crate::auth::authorization::AuthzError;
use crate::auth::jwt::JwtError;
use crate::auth::password::PasswordError;
use crate::db::store::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity result type alias
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Error taxonomy shared with the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing input (422)
    Validation,

    /// Bad credentials, inactive user, stale or invalid session (401)
    Unauthorized,

    /// Role not permitted for the requested action (403)
    Forbidden,

    /// Duplicate organization, duplicate or active invite target (409)
    Conflict,

    /// Token past its window (410)
    Expired,

    /// Organization, user or token absent (404)
    NotFound,

    /// Deadline exceeded or caller cancelled (408)
    Timeout,

    /// Storage or hashing failure (500)
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Expired => "expired",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal_error",
        }
    }

    /// HTTP status code the transport layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation => 422,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::Conflict => 409,
            ErrorKind::Expired => 410,
            ErrorKind::NotFound => 404,
            ErrorKind::Timeout => 408,
            ErrorKind::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified identity error type
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Malformed or missing input
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Password shorter than the policy minimum
    #[error("Password must be at least {min} characters long")]
    WeakInput { min: usize },

    /// Authentication failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Role does not permit the action
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Uniqueness or state conflict
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Account verification attempted twice
    #[error("Account already verified")]
    AlreadyVerified,

    /// No pending user matches the presented token
    #[error("Invalid token")]
    InvalidToken,

    /// Token past its expiry
    #[error("Expired: {0}")]
    Expired(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation did not finish before its deadline
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Storage failure
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Hashing failure
    #[error("Password operation failed: {0}")]
    Password(PasswordError),

    /// Session signing failure
    #[error("Session error: {0}")]
    Session(JwtError),

    /// Anything else that should never reach the client verbatim
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IdentityError {
    /// Maps the error onto the shared taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            IdentityError::Validation(_) | IdentityError::WeakInput { .. } => ErrorKind::Validation,
            IdentityError::Unauthorized(_) => ErrorKind::Unauthorized,
            IdentityError::Forbidden(_) => ErrorKind::Forbidden,
            IdentityError::Conflict(_) | IdentityError::AlreadyVerified => ErrorKind::Conflict,
            IdentityError::InvalidToken | IdentityError::NotFound(_) => ErrorKind::NotFound,
            IdentityError::Expired(_) => ErrorKind::Expired,
            IdentityError::DeadlineExceeded | IdentityError::Cancelled => ErrorKind::Timeout,
            IdentityError::Store(err) => match err {
                StoreError::UniqueViolation(_) | StoreError::SerializationFailure => {
                    ErrorKind::Conflict
                }
                _ => ErrorKind::Internal,
            },
            IdentityError::Password(_) | IdentityError::Session(_) | IdentityError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Message safe to hand to an unauthenticated client
    ///
    /// Internal failures are logged and replaced by a generic message.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => {
                tracing::error!(error = %self, "Internal identity error");
                "An internal error occurred".to_string()
            }
            _ => match self {
                IdentityError::Store(StoreError::UniqueViolation(constraint)) => {
                    conflict_message(constraint).to_string()
                }
                IdentityError::Store(StoreError::SerializationFailure) => {
                    "Concurrent update, please retry".to_string()
                }
                other => other.to_string(),
            },
        }
    }
}

/// Human description of a unique constraint violation
fn conflict_message(constraint: &str) -> &'static str {
    match constraint {
        "organizations_name_key" => "Organization with this name already exists",
        "users_org_email_key" => "A user with this email already exists in the organization",
        "users_owner_email_key" => "This email already owns an organization",
        "users_one_owner_per_org_key" => "Organization already has an owner",
        _ => "Resource already exists",
    }
}

impl From<PasswordError> for IdentityError {
    fn from(err: PasswordError) -> Self {
        match err {
            PasswordError::TooShort { min } => IdentityError::WeakInput { min },
            other => IdentityError::Password(other),
        }
    }
}

impl From<JwtError> for IdentityError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::CreateError(_) | JwtError::WeakSecret { .. } => IdentityError::Session(err),
            JwtError::Expired => IdentityError::Unauthorized("Session expired".to_string()),
            JwtError::InvalidIssuer => {
                IdentityError::Unauthorized("Invalid session issuer".to_string())
            }
            JwtError::ValidationError(_) => {
                IdentityError::Unauthorized("Invalid session".to_string())
            }
        }
    }
}

impl From<AuthzError> for IdentityError {
    fn from(err: AuthzError) -> Self {
        IdentityError::Forbidden(err.to_string())
    }
}

impl From<validator::ValidationErrors> for IdentityError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut details: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "is invalid".to_string());
                    format!("{}: {}", field, message)
                })
            })
            .collect();
        details.sort();
        IdentityError::Validation(details.join("; "))
    }
}
