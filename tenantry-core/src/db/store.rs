/// Transactional persistence seam
///
/// Services reach organizations and users only through [`IdentityStore`]
/// transactions. A transaction that is dropped without [`StoreTransaction::commit`]
/// rolls back, which is how every error path and every cancelled deadline
/// discards partial work.
///
/// Two implementations ship with the crate:
///
/// - [`PgStore`](crate::db::postgres::PgStore): PostgreSQL, `SERIALIZABLE`
///   read-write transactions and `READ ONLY` read transactions
/// - [`MemoryStore`](crate::db::memory::MemoryStore): exclusive lock plus a
///   staged copy, enforcing the same unique constraints
///
/// # Example
///
/// ```
/// use tenantry_core::db::memory::MemoryStore;
/// use tenantry_core::db::store::{IdentityStore, TxMode};
///
/// # async fn example() -> Result<(), tenantry_core::db::store::StoreError> {
/// let store = MemoryStore::new();
/// let mut tx = store.begin(TxMode::ReadWrite).await?;
/// let account_id = tx.allocate_account_id().await?;
/// assert_eq!(account_id, "1100000000000001");
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```

use crate::models::{Organization, User};
use async_trait::async_trait;
use uuid::Uuid;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique constraint or unique index violated; carries its name
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Check constraint or guard trigger violated; carries its name
    #[error("Check constraint violated: {0}")]
    CheckViolation(String),

    /// Referenced row does not exist
    #[error("Foreign key violated: {0}")]
    ForeignKeyViolation(String),

    /// Concurrent transaction conflict, safe to retry
    #[error("Serialization failure, retry the transaction")]
    SerializationFailure,

    /// Write attempted inside a read-only transaction
    #[error("Write attempted in a read-only transaction")]
    ReadOnly,

    /// Update targeted a row that does not exist
    #[error("Row not found: {0}")]
    NotFound(String),

    /// Store could not be reached in time
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Any other database failure
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    /// Whether re-running the whole transaction may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::SerializationFailure | StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();
            match db_err.code().as_deref() {
                Some("23505") => return StoreError::UniqueViolation(constraint),
                Some("23514") => return StoreError::CheckViolation(constraint),
                Some("23503") => return StoreError::ForeignKeyViolation(constraint),
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => return StoreError::SerializationFailure,
                Some("25006") => return StoreError::ReadOnly,
                _ => {}
            }
        }

        match err {
            sqlx::Error::PoolTimedOut => StoreError::Unavailable("connection pool timed out".to_string()),
            sqlx::Error::PoolClosed => StoreError::Unavailable("connection pool closed".to_string()),
            other => StoreError::Database(other),
        }
    }
}

/// Transaction access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Lookups only, no extra locking
    ReadOnly,

    /// Serializable multi-row mutation
    ReadWrite,
}

/// Source of transactions
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Opens a transaction in the given mode
    async fn begin(&self, mode: TxMode) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// One open transaction
///
/// Lookups never return soft-deleted users. Writes inside a
/// [`TxMode::ReadOnly`] transaction fail with [`StoreError::ReadOnly`].
#[async_trait]
pub trait StoreTransaction: Send {
    fn mode(&self) -> TxMode;

    /// Draws the next 16-digit account id from the monotonic counter
    ///
    /// Values are never reused, even when the transaction rolls back.
    async fn allocate_account_id(&mut self) -> Result<String, StoreError>;

    async fn insert_organization(&mut self, org: &Organization) -> Result<(), StoreError>;

    async fn update_organization(&mut self, org: &Organization) -> Result<(), StoreError>;

    async fn organization_by_id(&mut self, id: Uuid) -> Result<Option<Organization>, StoreError>;

    async fn organization_by_name(&mut self, name: &str) -> Result<Option<Organization>, StoreError>;

    async fn organization_by_account_id(
        &mut self,
        account_id: &str,
    ) -> Result<Option<Organization>, StoreError>;

    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError>;

    async fn update_user(&mut self, user: &User) -> Result<(), StoreError>;

    async fn user_by_id(&mut self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Case-insensitive email lookup within one organization
    async fn user_by_email(
        &mut self,
        organization_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, StoreError>;

    async fn user_by_token(&mut self, token: &str) -> Result<Option<User>, StoreError>;

    /// User whose last completed transition used `token`
    async fn user_by_consumed_token(&mut self, token: &str) -> Result<Option<User>, StoreError>;

    async fn users_in_organization(&mut self, organization_id: Uuid) -> Result<Vec<User>, StoreError>;

    /// Makes every write of this transaction visible atomically
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
