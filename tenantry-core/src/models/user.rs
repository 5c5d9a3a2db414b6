/// User model and database operations
///
/// Every user belongs to exactly one organization and carries one role in it.
/// A user awaiting a token-gated transition (account verification, invite
/// acceptance, password reset) holds an `invite_token` + `expires_at` pair;
/// the pair is cleared exactly when the transition completes.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE user_role AS ENUM ('owner', 'maintainer', 'member');
/// CREATE TYPE user_status AS ENUM ('pending', 'active', 'suspended');
///
/// CREATE TABLE users (
///     id UUID PRIMARY KEY,
///     organization_id UUID NOT NULL REFERENCES organizations(id),
///     name VARCHAR(255) NOT NULL,
///     email VARCHAR(255) NOT NULL,
///     password_hash VARCHAR(255) NOT NULL,
///     role user_role NOT NULL,
///     status user_status NOT NULL DEFAULT 'pending',
///     invited_by UUID REFERENCES users(id),
///     invite_token VARCHAR(255),
///     expires_at TIMESTAMPTZ,
///     consumed_token VARCHAR(255),
///     token_version INTEGER NOT NULL DEFAULT 1,
///     reactivated_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
///     deleted_at TIMESTAMPTZ,
///     deleted_by UUID REFERENCES users(id)
/// );
/// ```
///
/// # Example
///
/// ```
/// use tenantry_core::models::user::{Role, User, UserStatus};
/// use uuid::Uuid;
///
/// let user = User::new(
///     Uuid::new_v4(),
///     "Bob",
///     "  Bob@Example.COM ",
///     "$argon2id$...".to_string(),
///     Role::Member,
///     UserStatus::Pending,
///     None,
/// );
/// assert_eq!(user.email, "bob@example.com");
/// assert_eq!(user.token_version, 1);
///
/// // Credentials never leave the process
/// let json = serde_json::to_value(&user).unwrap();
/// assert!(json.get("password_hash").is_none());
/// ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Roles within an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Created with the organization; exactly one per organization
    Owner,

    /// May invite and manage members
    Maintainer,

    /// No management rights
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Maintainer => "maintainer",
            Role::Member => "member",
        }
    }

    /// Roles this role may grant through an invitation
    ///
    /// Owners grant maintainer and member, maintainers grant member, members
    /// grant nothing. Nobody grants owner.
    pub fn invitable_roles(&self) -> &'static [Role] {
        match self {
            Role::Owner => &[Role::Maintainer, Role::Member],
            Role::Maintainer => &[Role::Member],
            Role::Member => &[],
        }
    }

    /// Whether this role may invite or manage a user holding `target`
    pub fn can_manage(&self, target: Role) -> bool {
        self.invitable_roles().contains(&target)
    }

    /// Whether this role sees organization-wide details
    pub fn can_view_organization_details(&self) -> bool {
        !matches!(self, Role::Member)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(Role::Owner),
            "maintainer" => Ok(Role::Maintainer),
            "member" => Ok(Role::Member),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Lifecycle state of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Pending,
    Active,
    Suspended,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Pending => "pending",
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalizes an email for storage and lookup (trimmed, lowercased)
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// User account within one organization
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,

    pub organization_id: Uuid,

    pub name: String,

    /// Stored normalized; unique per organization among non-deleted rows
    pub email: String,

    /// Argon2id PHC string, never serialized
    #[serde(skip_serializing)]
    pub password_hash: String,

    pub role: Role,

    pub status: UserStatus,

    /// Inviter, None for owners
    pub invited_by: Option<Uuid>,

    /// Raw transition token, never serialized
    #[serde(skip_serializing)]
    pub invite_token: Option<String>,

    /// Expiry of `invite_token`; present iff the token is
    pub expires_at: Option<DateTime<Utc>>,

    /// Token that activated the account, never serialized
    #[serde(skip_serializing)]
    pub consumed_token: Option<String>,

    /// Credential version stamped into every session; only ever increases
    pub token_version: i32,

    pub reactivated_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub is_deleted: bool,

    pub deleted_at: Option<DateTime<Utc>>,

    pub deleted_by: Option<Uuid>,
}

impl User {
    /// Builds a new user row, not yet persisted
    pub fn new(
        organization_id: Uuid,
        name: &str,
        email: &str,
        password_hash: String,
        role: Role,
        status: UserStatus,
        invited_by: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.trim().to_string(),
            email: normalize_email(email),
            password_hash,
            role,
            status,
            invited_by,
            invite_token: None,
            expires_at: None,
            consumed_token: None,
            token_version: 1,
            reactivated_at: None,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active && !self.is_deleted
    }

    /// Sets the token pair to a fresh token valid for `ttl` and returns its expiry
    ///
    /// Returns `None`, leaving the pair untouched, when `now + ttl` is out of
    /// range.
    #[must_use]
    pub fn issue_token(&mut self, token: String, ttl: Duration, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let expires_at = now.checked_add_signed(ttl)?;
        self.invite_token = Some(token);
        self.expires_at = Some(expires_at);
        self.updated_at = now;
        Some(expires_at)
    }

    /// Clears the token pair
    pub fn clear_token(&mut self) {
        self.invite_token = None;
        self.expires_at = None;
    }

    /// True when a token is present and not past its expiry
    pub fn has_live_token(&self, now: DateTime<Utc>) -> bool {
        match (&self.invite_token, self.expires_at) {
            (Some(_), Some(expires_at)) => expires_at > now,
            _ => false,
        }
    }

    /// True when the token pair exists and its expiry has passed
    pub fn token_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|expires_at| expires_at <= now).unwrap_or(false)
    }

    /// Retires the live token, remembering it as consumed
    pub fn consume_token(&mut self, now: DateTime<Utc>) {
        if let Some(token) = self.invite_token.take() {
            self.consumed_token = Some(token);
        }
        self.expires_at = None;
        self.updated_at = now;
    }

    /// Completes a token-gated transition
    ///
    /// Only the transition out of `pending` is remembered in `consumed_token`;
    /// later transitions of an active user clear their token without
    /// replacing it.
    pub fn activate(&mut self, now: DateTime<Utc>) {
        if self.status == UserStatus::Pending {
            self.consume_token(now);
        } else {
            self.clear_token();
            self.updated_at = now;
        }
        self.status = UserStatus::Active;
    }

    /// Inserts the user row
    ///
    /// # Errors
    ///
    /// Unique index violations (`users_org_email_key`, `users_one_owner_per_org_key`,
    /// `users_owner_email_key`, `users_invite_token_key`) surface as database errors
    /// carrying the index name.
    pub async fn insert(conn: &mut PgConnection, user: &User) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO users (id, organization_id, name, email, password_hash, role, status,
                               invited_by, invite_token, expires_at, consumed_token,
                               token_version, reactivated_at, created_at, updated_at,
                               is_deleted, deleted_at, deleted_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(user.id)
        .bind(user.organization_id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.status)
        .bind(user.invited_by)
        .bind(&user.invite_token)
        .bind(user.expires_at)
        .bind(&user.consumed_token)
        .bind(user.token_version)
        .bind(user.reactivated_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.is_deleted)
        .bind(user.deleted_at)
        .bind(user.deleted_by)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Writes every mutable column back; returns false when the row is gone
    pub async fn update(conn: &mut PgConnection, user: &User) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET name = $2, email = $3, password_hash = $4, role = $5, status = $6,
                invite_token = $7, expires_at = $8, consumed_token = $9, token_version = $10,
                reactivated_at = $11, updated_at = $12,
                is_deleted = $13, deleted_at = $14, deleted_by = $15
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role)
        .bind(user.status)
        .bind(&user.invite_token)
        .bind(user.expires_at)
        .bind(&user.consumed_token)
        .bind(user.token_version)
        .bind(user.reactivated_at)
        .bind(user.updated_at)
        .bind(user.is_deleted)
        .bind(user.deleted_at)
        .bind(user.deleted_by)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Finds a non-deleted user by ID
    pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE id = $1 AND NOT is_deleted
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
    }

    /// Finds a non-deleted user by email within an organization (case-insensitive)
    pub async fn find_by_email(
        conn: &mut PgConnection,
        organization_id: Uuid,
        email: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE organization_id = $1 AND lower(email) = $2 AND NOT is_deleted
            "#,
        )
        .bind(organization_id)
        .bind(normalize_email(email))
        .fetch_optional(&mut *conn)
        .await
    }

    /// Finds a non-deleted user holding the given transition token
    pub async fn find_by_token(conn: &mut PgConnection, token: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE invite_token = $1 AND NOT is_deleted
            "#,
        )
        .bind(token)
        .fetch_optional(&mut *conn)
        .await
    }

    /// Finds a non-deleted user whose last completed transition used `token`
    pub async fn find_by_consumed_token(
        conn: &mut PgConnection,
        token: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE consumed_token = $1 AND NOT is_deleted
            "#,
        )
        .bind(token)
        .fetch_optional(&mut *conn)
        .await
    }

    /// Lists non-deleted users of an organization, oldest first
    pub async fn list_by_organization(
        conn: &mut PgConnection,
        organization_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE organization_id = $1 AND NOT is_deleted
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(organization_id)
        .fetch_all(&mut *conn)
        .await
    }
}
