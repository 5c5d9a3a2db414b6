/// PostgreSQL implementation of [`IdentityStore`]
///
/// Read-write transactions run at `SERIALIZABLE`; conflicts come back as
/// [`StoreError::SerializationFailure`]. Read transactions are `READ ONLY`.
/// Account ids are drawn from `organization_account_id_seq`.

use crate::db::store::{IdentityStore, StoreError, StoreTransaction, TxMode};
use crate::models::{Organization, User};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

/// Store backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn begin(&self, mode: TxMode) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let statement = match mode {
            TxMode::ReadOnly => "SET TRANSACTION READ ONLY",
            TxMode::ReadWrite => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        };
        sqlx::query(statement).execute(&mut *tx).await?;

        debug!(?mode, "Opened PostgreSQL transaction");
        Ok(Box::new(PgTransaction { tx, mode }))
    }
}

/// Open PostgreSQL transaction; rolls back on drop
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    mode: TxMode,
}

impl PgTransaction {
    fn ensure_writable(&self) -> Result<(), StoreError> {
        match self.mode {
            TxMode::ReadWrite => Ok(()),
            TxMode::ReadOnly => Err(StoreError::ReadOnly),
        }
    }
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    fn mode(&self) -> TxMode {
        self.mode
    }

    async fn allocate_account_id(&mut self) -> Result<String, StoreError> {
        self.ensure_writable()?;
        Ok(Organization::next_account_id(&mut *self.tx).await?)
    }

    async fn insert_organization(&mut self, org: &Organization) -> Result<(), StoreError> {
        self.ensure_writable()?;
        Ok(Organization::insert(&mut *self.tx, org).await?)
    }

    async fn update_organization(&mut self, org: &Organization) -> Result<(), StoreError> {
        self.ensure_writable()?;
        if Organization::update(&mut *self.tx, org).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("organization {}", org.id)))
        }
    }

    async fn organization_by_id(&mut self, id: Uuid) -> Result<Option<Organization>, StoreError> {
        Ok(Organization::find_by_id(&mut *self.tx, id).await?)
    }

    async fn organization_by_name(&mut self, name: &str) -> Result<Option<Organization>, StoreError> {
        Ok(Organization::find_by_name(&mut *self.tx, name).await?)
    }

    async fn organization_by_account_id(
        &mut self,
        account_id: &str,
    ) -> Result<Option<Organization>, StoreError> {
        Ok(Organization::find_by_account_id(&mut *self.tx, account_id).await?)
    }

    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        self.ensure_writable()?;
        Ok(User::insert(&mut *self.tx, user).await?)
    }

    async fn update_user(&mut self, user: &User) -> Result<(), StoreError> {
        self.ensure_writable()?;
        if User::update(&mut *self.tx, user).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("user {}", user.id)))
        }
    }

    async fn user_by_id(&mut self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(User::find_by_id(&mut *self.tx, id).await?)
    }

    async fn user_by_email(
        &mut self,
        organization_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(User::find_by_email(&mut *self.tx, organization_id, email).await?)
    }

    async fn user_by_token(&mut self, token: &str) -> Result<Option<User>, StoreError> {
        Ok(User::find_by_token(&mut *self.tx, token).await?)
    }

    async fn user_by_consumed_token(&mut self, token: &str) -> Result<Option<User>, StoreError> {
        Ok(User::find_by_consumed_token(&mut *self.tx, token).await?)
    }

    async fn users_in_organization(&mut self, organization_id: Uuid) -> Result<Vec<User>, StoreError> {
        Ok(User::list_by_organization(&mut *self.tx, organization_id).await?)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
