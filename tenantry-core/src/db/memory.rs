/// In-memory implementation of [`IdentityStore`]
///
/// A read-write transaction takes the exclusive lock for its whole lifetime
/// and mutates a staged copy of the state; commit swaps the copy in. Read
/// transactions share the lock. The unique constraints of the SQL schema are
/// enforced on every write so both stores reject the same states.

use crate::db::store::{IdentityStore, StoreError, StoreTransaction, TxMode};
use crate::models::{format_account_id, normalize_email, Organization, Role, User, FIRST_ACCOUNT_ID};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    organizations: HashMap<Uuid, Organization>,
    users: HashMap<Uuid, User>,
}

impl MemoryState {
    fn check_organization(&self, org: &Organization) -> Result<(), StoreError> {
        for other in self.organizations.values().filter(|o| o.id != org.id) {
            if other.name == org.name {
                return Err(StoreError::UniqueViolation("organizations_name_key".to_string()));
            }
            if other.account_id == org.account_id {
                return Err(StoreError::UniqueViolation("organizations_account_id_key".to_string()));
            }
        }
        if org.account_id.len() != 16 || !org.account_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StoreError::CheckViolation("organizations_account_id_format".to_string()));
        }
        Ok(())
    }

    fn check_user(&self, user: &User) -> Result<(), StoreError> {
        if !self.organizations.contains_key(&user.organization_id) {
            return Err(StoreError::ForeignKeyViolation("users_organization_id_fkey".to_string()));
        }
        if user.invite_token.is_some() != user.expires_at.is_some() {
            return Err(StoreError::CheckViolation("users_token_pair".to_string()));
        }
        if user.token_version < 1 {
            return Err(StoreError::CheckViolation("users_token_version_positive".to_string()));
        }
        if let Some(previous) = self.users.get(&user.id) {
            if user.token_version < previous.token_version {
                return Err(StoreError::CheckViolation(
                    "users_token_version_monotonic".to_string(),
                ));
            }
        }

        let email = normalize_email(&user.email);
        for other in self.users.values().filter(|u| u.id != user.id) {
            if let (Some(mine), Some(theirs)) = (&user.invite_token, &other.invite_token) {
                if mine == theirs {
                    return Err(StoreError::UniqueViolation("users_invite_token_key".to_string()));
                }
            }
            if user.is_deleted || other.is_deleted {
                continue;
            }
            if other.organization_id == user.organization_id && normalize_email(&other.email) == email {
                return Err(StoreError::UniqueViolation("users_org_email_key".to_string()));
            }
            if user.role == Role::Owner && other.role == Role::Owner {
                if other.organization_id == user.organization_id {
                    return Err(StoreError::UniqueViolation(
                        "users_one_owner_per_org_key".to_string(),
                    ));
                }
                if normalize_email(&other.email) == email {
                    return Err(StoreError::UniqueViolation("users_owner_email_key".to_string()));
                }
            }
        }
        Ok(())
    }
}

/// Store kept entirely in process memory
///
/// Clones share the same state. Data is lost when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    next_account_id: Arc<AtomicI64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            next_account_id: Arc::new(AtomicI64::new(FIRST_ACCOUNT_ID)),
        }
    }

    /// Committed organizations, for inspection in tests
    pub async fn organizations(&self) -> Vec<Organization> {
        let state = self.state.read().await;
        let mut organizations: Vec<Organization> = state.organizations.values().cloned().collect();
        organizations.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        organizations
    }

    /// Committed users including soft-deleted rows, for inspection in tests
    pub async fn users(&self) -> Vec<User> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state.users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        users
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn begin(&self, mode: TxMode) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let access = match mode {
            TxMode::ReadOnly => Access::Read(self.state.clone().read_owned().await),
            TxMode::ReadWrite => {
                let guard = self.state.clone().write_owned().await;
                let staged = guard.clone();
                Access::Write { guard, staged }
            }
        };

        Ok(Box::new(MemoryTransaction {
            access,
            next_account_id: self.next_account_id.clone(),
        }))
    }
}

enum Access {
    Read(OwnedRwLockReadGuard<MemoryState>),
    Write {
        guard: OwnedRwLockWriteGuard<MemoryState>,
        staged: MemoryState,
    },
}

/// Open in-memory transaction; dropping it discards the staged copy
pub struct MemoryTransaction {
    access: Access,
    next_account_id: Arc<AtomicI64>,
}

impl MemoryTransaction {
    fn view(&self) -> &MemoryState {
        match &self.access {
            Access::Read(guard) => guard,
            Access::Write { staged, .. } => staged,
        }
    }

    fn staged(&mut self) -> Result<&mut MemoryState, StoreError> {
        match &mut self.access {
            Access::Read(_) => Err(StoreError::ReadOnly),
            Access::Write { staged, .. } => Ok(staged),
        }
    }

    fn live_user<F>(&self, predicate: F) -> Option<User>
    where
        F: Fn(&User) -> bool,
    {
        self.view()
            .users
            .values()
            .find(|u| !u.is_deleted && predicate(u))
            .cloned()
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    fn mode(&self) -> TxMode {
        match self.access {
            Access::Read(_) => TxMode::ReadOnly,
            Access::Write { .. } => TxMode::ReadWrite,
        }
    }

    async fn allocate_account_id(&mut self) -> Result<String, StoreError> {
        self.staged()?;
        let value = self.next_account_id.fetch_add(1, Ordering::SeqCst);
        Ok(format_account_id(value))
    }

    async fn insert_organization(&mut self, org: &Organization) -> Result<(), StoreError> {
        let state = self.staged()?;
        if state.organizations.contains_key(&org.id) {
            return Err(StoreError::UniqueViolation("organizations_pkey".to_string()));
        }
        state.check_organization(org)?;
        state.organizations.insert(org.id, org.clone());
        Ok(())
    }

    async fn update_organization(&mut self, org: &Organization) -> Result<(), StoreError> {
        let state = self.staged()?;
        if !state.organizations.contains_key(&org.id) {
            return Err(StoreError::NotFound(format!("organization {}", org.id)));
        }
        state.check_organization(org)?;
        state.organizations.insert(org.id, org.clone());
        Ok(())
    }

    async fn organization_by_id(&mut self, id: Uuid) -> Result<Option<Organization>, StoreError> {
        Ok(self.view().organizations.get(&id).cloned())
    }

    async fn organization_by_name(&mut self, name: &str) -> Result<Option<Organization>, StoreError> {
        Ok(self
            .view()
            .organizations
            .values()
            .find(|o| o.name == name)
            .cloned())
    }

    async fn organization_by_account_id(
        &mut self,
        account_id: &str,
    ) -> Result<Option<Organization>, StoreError> {
        Ok(self
            .view()
            .organizations
            .values()
            .find(|o| o.account_id == account_id)
            .cloned())
    }

    async fn insert_user(&mut self, user: &User) -> Result<(), StoreError> {
        let state = self.staged()?;
        if state.users.contains_key(&user.id) {
            return Err(StoreError::UniqueViolation("users_pkey".to_string()));
        }
        state.check_user(user)?;
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&mut self, user: &User) -> Result<(), StoreError> {
        let state = self.staged()?;
        if !state.users.contains_key(&user.id) {
            return Err(StoreError::NotFound(format!("user {}", user.id)));
        }
        state.check_user(user)?;
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn user_by_id(&mut self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.live_user(|u| u.id == id))
    }

    async fn user_by_email(
        &mut self,
        organization_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, StoreError> {
        let email = normalize_email(email);
        Ok(self.live_user(|u| {
            u.organization_id == organization_id && normalize_email(&u.email) == email
        }))
    }

    async fn user_by_token(&mut self, token: &str) -> Result<Option<User>, StoreError> {
        Ok(self.live_user(|u| u.invite_token.as_deref() == Some(token)))
    }

    async fn user_by_consumed_token(&mut self, token: &str) -> Result<Option<User>, StoreError> {
        Ok(self.live_user(|u| u.consumed_token.as_deref() == Some(token)))
    }

    async fn users_in_organization(&mut self, organization_id: Uuid) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self
            .view()
            .users
            .values()
            .filter(|u| u.organization_id == organization_id && !u.is_deleted)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if let Access::Write { mut guard, staged } = self.access {
            *guard = staged;
        }
        Ok(())
    }
}
