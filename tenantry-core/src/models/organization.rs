/// Organization model and database operations
///
/// Organizations are the tenants of the platform. Users address them at login
/// through the 16-digit `account_id`, allocated from a database sequence.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE organization_status AS ENUM ('pending', 'active');
///
/// CREATE SEQUENCE organization_account_id_seq
///     AS BIGINT START WITH 1100000000000001;
///
/// CREATE TABLE organizations (
///     id UUID PRIMARY KEY,
///     name VARCHAR(255) NOT NULL UNIQUE,
///     account_id VARCHAR(16) NOT NULL UNIQUE,
///     created_by UUID REFERENCES users(id) DEFERRABLE INITIALLY DEFERRED,
///     status organization_status NOT NULL DEFAULT 'pending',
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```
/// use tenantry_core::models::organization::{format_account_id, Organization, OrganizationStatus};
///
/// let org = Organization::new("Acme", format_account_id(1100000000000001));
/// assert_eq!(org.account_id, "1100000000000001");
/// assert_eq!(org.status, OrganizationStatus::Pending);
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

/// First account id ever handed out
pub const FIRST_ACCOUNT_ID: i64 = 1_100_000_000_000_001;

/// Renders a numeric account id at its fixed 16-digit width
pub fn format_account_id(value: i64) -> String {
    format!("{:016}", value)
}

/// Lifecycle state of an organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "organization_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrganizationStatus {
    /// Owner has not verified yet
    Pending,

    /// Owner verified
    Active,
}

impl OrganizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationStatus::Pending => "pending",
            OrganizationStatus::Active => "active",
        }
    }
}

/// Organization (tenant)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Organization {
    pub id: Uuid,

    /// Unique platform-wide, exact match
    pub name: String,

    /// Fixed-width numeric string, see [`format_account_id`]
    pub account_id: String,

    /// Owner user id, set once the owner row exists
    pub created_by: Option<Uuid>,

    pub status: OrganizationStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Organization {
    /// Builds a new pending organization, not yet persisted
    pub fn new(name: &str, account_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            account_id,
            created_by: None,
            status: OrganizationStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.status = OrganizationStatus::Active;
        self.updated_at = now;
    }

    /// Draws the next account id from the sequence
    pub async fn next_account_id(conn: &mut PgConnection) -> Result<String, sqlx::Error> {
        let value: i64 = sqlx::query_scalar("SELECT nextval('organization_account_id_seq')")
            .fetch_one(&mut *conn)
            .await?;

        Ok(format_account_id(value))
    }

    pub async fn insert(conn: &mut PgConnection, org: &Organization) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO organizations (id, name, account_id, created_by, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(org.id)
        .bind(&org.name)
        .bind(&org.account_id)
        .bind(org.created_by)
        .bind(org.status)
        .bind(org.created_at)
        .bind(org.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Writes name, creator and status back; returns false when the row is gone
    pub async fn update(conn: &mut PgConnection, org: &Organization) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE organizations
            SET name = $2, created_by = $3, status = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(org.id)
        .bind(&org.name)
        .bind(org.created_by)
        .bind(org.status)
        .bind(org.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
    }

    /// Exact, case-sensitive name match
    pub async fn find_by_name(conn: &mut PgConnection, name: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE name = $1")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await
    }

    pub async fn find_by_account_id(
        conn: &mut PgConnection,
        account_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await
    }
}
