/// Identity services
///
/// Each service owns one slice of the account lifecycle and shares an
/// [`IdentityContext`] with the others:
///
/// - `registry`: Organization sign-up and account verification
/// - `invitations`: Invites, acceptance, resend
/// - `sessions`: Login and session verification
/// - `recovery`: Password reset family
/// - `members`: Organization details and member management
///
/// Every operation takes a [`Deadline`](crate::deadline::Deadline), runs its
/// store work in a single transaction inside it, and queues mail only after
/// that transaction committed.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tenantry_core::auth::{CredentialManager, SessionKeys};
/// use tenantry_core::db::MemoryStore;
/// use tenantry_core::deadline::Deadline;
/// use tenantry_core::notify::{mail_channel, LinkBuilder};
/// use tenantry_core::services::{Identity, IdentityContext, SignUpRequest, TokenLifetimes};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let (queue, _receiver) = mail_channel(64);
/// let ctx = IdentityContext::new(
///     Arc::new(MemoryStore::new()),
///     CredentialManager::default(),
///     queue,
///     LinkBuilder::new("https://app.example.com")?,
///     TokenLifetimes::default(),
/// );
/// let keys = SessionKeys::from_secret(&[7u8; 32], "tenantry", chrono::Duration::hours(24))?;
/// let identity = Identity::new(ctx, keys);
///
/// let outcome = identity
///     .registry
///     .sign_up(
///         SignUpRequest::new("Acme", "Alice", "alice@acme.com", "correct horse"),
///         &Deadline::none(),
///     )
///     .await?;
/// println!("account id {}", outcome.organization.account_id);
/// # Ok(())
/// # }
/// ```

pub mod invitations;
pub mod members;
pub mod recovery;
pub mod registry;
pub mod sessions;

pub use invitations::{AcceptInviteRequest, InvitationEngine, Invitation, InviteRequest, ResendOutcome};
pub use members::{MemberDirectory, OrganizationDetails};
pub use recovery::{CredentialRecovery, PasswordResetIssued};
pub use registry::{AccountRegistry, SignUpOutcome, SignUpRequest};
pub use sessions::{LoginOutcome, LoginRequest, SessionIssuer};

use crate::auth::{CredentialManager, SessionKeys};
use crate::config::{ConfigError, IdentityConfig};
use crate::db::{IdentityStore, StoreTransaction, TxMode};
use crate::deadline::{Deadline, DEFAULT_OPERATION_TIMEOUT};
use crate::error::{IdentityError, IdentityResult};
use crate::notify::{mail_channel, LinkBuilder, MailDispatcher, MailQueue};
use chrono::Duration;
use std::sync::Arc;

/// Validity windows of the token-gated transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetimes {
    /// Owner account verification
    pub verification: Duration,

    /// Invite acceptance
    pub invitation: Duration,

    /// Password reset by token
    pub password_reset: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            verification: Duration::hours(1),
            invitation: Duration::hours(48),
            password_reset: Duration::hours(1),
        }
    }
}

/// A token window that does not fit the calendar
pub(crate) fn expiry_out_of_range() -> IdentityError {
    IdentityError::Internal("Token expiry out of range".to_string())
}

/// Collaborators shared by every service
#[derive(Clone)]
pub struct IdentityContext {
    pub store: Arc<dyn IdentityStore>,
    pub credentials: CredentialManager,
    pub mail: MailQueue,
    pub links: LinkBuilder,
    pub lifetimes: TokenLifetimes,
    pub operation_timeout: std::time::Duration,
}

impl IdentityContext {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        credentials: CredentialManager,
        mail: MailQueue,
        links: LinkBuilder,
        lifetimes: TokenLifetimes,
    ) -> Self {
        Self {
            store,
            credentials,
            mail,
            links,
            lifetimes,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn with_operation_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.operation_timeout = crate::deadline::clamp_timeout(timeout);
        self
    }

    /// Deadline starting now with the configured operation timeout
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.operation_timeout)
    }

    pub(crate) async fn begin(&self, mode: TxMode) -> IdentityResult<Box<dyn StoreTransaction>> {
        Ok(self.store.begin(mode).await?)
    }
}

/// All identity services behind one handle
#[derive(Clone)]
pub struct Identity {
    pub registry: AccountRegistry,
    pub invitations: InvitationEngine,
    pub sessions: SessionIssuer,
    pub recovery: CredentialRecovery,
    pub members: MemberDirectory,
    operation_timeout: std::time::Duration,
}

impl Identity {
    pub fn new(ctx: IdentityContext, keys: SessionKeys) -> Self {
        let sessions = SessionIssuer::new(ctx.clone(), keys);
        Self {
            registry: AccountRegistry::new(ctx.clone()),
            invitations: InvitationEngine::new(ctx.clone()),
            recovery: CredentialRecovery::new(ctx.clone()),
            operation_timeout: ctx.operation_timeout,
            members: MemberDirectory::new(ctx),
            sessions,
        }
    }

    /// Fresh deadline with the configured operation timeout
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.operation_timeout)
    }

    /// Wires every service from configuration
    ///
    /// The returned dispatcher owns the receiving end of the mail queue and
    /// must be spawned by the caller; until it runs, mails stay queued.
    pub fn from_config(
        config: &IdentityConfig,
        store: Arc<dyn IdentityStore>,
    ) -> Result<(Self, MailDispatcher), ConfigError> {
        let (queue, receiver) = mail_channel(config.mail.queue_capacity);
        let ctx = IdentityContext::new(
            store,
            config.credential_manager(),
            queue,
            config.link_builder()?,
            config.token_lifetimes(),
        )
        .with_operation_timeout(config.operation_timeout());

        let dispatcher = MailDispatcher::new(receiver, config.notifier()?, config.dispatcher_config());
        Ok((Self::new(ctx, config.session_keys()?), dispatcher))
    }
}

/// Redacts a secret field in manual `Debug` impls
pub(crate) const REDACTED: &str = "<redacted>";
