/// Database models for identity management
///
/// - `organization`: Tenants addressed by their 16-digit account id
/// - `user`: Users, roles and the token-gated lifecycle

pub mod organization;
pub mod user;

pub use organization::{format_account_id, Organization, OrganizationStatus, FIRST_ACCOUNT_ID};
pub use user::{normalize_email, Role, User, UserStatus};
