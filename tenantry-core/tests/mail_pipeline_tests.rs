/// Integration tests for the post-commit mail pipeline
///
/// Services enqueue, the dispatcher delivers in the background. A delivery
/// failure never reaches the operation that queued the mail.

mod common;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tenantry_core::auth::{CredentialManager, HashParams, PasswordPolicy, SessionKeys};
use tenantry_core::db::MemoryStore;
use tenantry_core::deadline::Deadline;
use tenantry_core::notify::{mail_channel, DispatcherConfig, LinkBuilder, MailDispatcher, NotifyError, Notifier};
use tenantry_core::services::{Identity, IdentityContext, SignUpRequest, TokenLifetimes};
use tenantry_core::IdentityConfig;
use tokio_util::sync::CancellationToken;

/// Fails the first `failures` sends, then records every mail
struct FlakyNotifier {
    failures: u32,
    attempts: AtomicU32,
    delivered: Mutex<Vec<(String, String)>>,
}

impl FlakyNotifier {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            attempts: AtomicU32::new(0),
            delivered: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Notifier for FlakyNotifier {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn send(&self, to: &str, subject: &str, _html_body: &str) -> Result<(), NotifyError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(NotifyError::Transport(format!("attempt {} refused", attempt)));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string()));
        Ok(())
    }
}

fn fast_retries(max_attempts: u32) -> DispatcherConfig {
    DispatcherConfig {
        max_attempts,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        max_in_flight: 2,
    }
}

fn identity_with(notifier: Arc<dyn Notifier>, config: DispatcherConfig) -> (Identity, MailDispatcher) {
    tenantry_core::telemetry::init_test_tracing();

    let (queue, receiver) = mail_channel(16);
    let ctx = IdentityContext::new(
        Arc::new(MemoryStore::new()),
        CredentialManager::new(PasswordPolicy::default(), HashParams::light()),
        queue,
        LinkBuilder::new(common::FRONTEND).expect("valid frontend URL"),
        TokenLifetimes::default(),
    );
    let keys = SessionKeys::from_secret(common::SESSION_SECRET, "tenantry", chrono::Duration::hours(1))
        .expect("valid session keys");

    (Identity::new(ctx, keys), MailDispatcher::new(receiver, notifier, config))
}

async fn sign_up(identity: &Identity, organization: &str, email: &str) -> anyhow::Result<()> {
    identity
        .registry
        .sign_up(
            SignUpRequest::new(organization, "Owner", email, common::PASSWORD),
            &Deadline::after(Duration::from_secs(10)),
        )
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_retries_until_delivered() -> anyhow::Result<()> {
    let notifier = FlakyNotifier::new(2);
    let (identity, dispatcher) = identity_with(notifier.clone(), fast_retries(5));
    let handle = tokio::spawn(dispatcher.run(CancellationToken::new()));

    sign_up(&identity, "Acme", "alice@acme.com").await?;

    // Dropping every queue handle lets the dispatcher drain and stop
    drop(identity);
    let report = handle.await?;

    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(notifier.attempts.load(Ordering::SeqCst), 3);
    let delivered = notifier.delivered.lock().unwrap();
    assert_eq!(delivered.as_slice(), [("alice@acme.com".to_string(), "Verify Your Account".to_string())]);

    Ok(())
}

#[tokio::test]
async fn test_exhausted_retries_do_not_fail_the_operation() -> anyhow::Result<()> {
    let notifier = FlakyNotifier::new(u32::MAX);
    let (identity, dispatcher) = identity_with(notifier.clone(), fast_retries(3));
    let handle = tokio::spawn(dispatcher.run(CancellationToken::new()));

    sign_up(&identity, "Acme", "alice@acme.com").await?;
    sign_up(&identity, "Globex", "hank@globex.com").await?;

    drop(identity);
    let report = handle.await?;

    assert_eq!(report.delivered, 0);
    assert_eq!(report.failed, 2);
    assert_eq!(notifier.attempts.load(Ordering::SeqCst), 6);

    Ok(())
}

#[tokio::test]
async fn test_shutdown_stops_dispatcher() -> anyhow::Result<()> {
    let notifier = FlakyNotifier::new(0);
    let (identity, dispatcher) = identity_with(notifier.clone(), fast_retries(1));
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(dispatcher.run(shutdown.clone()));

    sign_up(&identity, "Acme", "alice@acme.com").await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Still running while the identity holds the queue
    assert!(!handle.is_finished());
    shutdown.cancel();
    let report = tokio::time::timeout(Duration::from_secs(5), handle).await??;
    assert_eq!(report.delivered, 1);

    // Mail queued after shutdown is dropped, the operation still succeeds
    sign_up(&identity, "Globex", "hank@globex.com").await?;

    Ok(())
}

#[tokio::test]
async fn test_identity_from_config() -> anyhow::Result<()> {
    tenantry_core::telemetry::init_test_tracing();

    let source = config::Config::builder()
        .set_override("session.secret", "0123456789abcdef0123456789abcdef")?
        .set_override("mail.frontend_base_url", "https://app.example.com")?
        .set_override("password.hashing.memory_kib", "1024")?
        .set_override("password.hashing.iterations", "1")?
        .set_override("password.hashing.lanes", "1")?
        .build()?;
    let config = IdentityConfig::from_source(source)?;

    let (identity, dispatcher) = Identity::from_config(&config, Arc::new(MemoryStore::new()))?;
    let handle = tokio::spawn(dispatcher.run(CancellationToken::new()));

    let outcome = identity
        .registry
        .sign_up(
            SignUpRequest::new("Acme", "Alice", "alice@acme.com", common::PASSWORD),
            &identity.deadline(),
        )
        .await?;
    identity
        .registry
        .verify_account(&outcome.verification_token, &Deadline::none())
        .await?;
    let session = identity
        .sessions
        .login(
            tenantry_core::services::LoginRequest::new(
                &outcome.organization.account_id,
                "alice@acme.com",
                common::PASSWORD,
            ),
            &Deadline::none(),
        )
        .await?;
    assert_eq!(session.claims.iss, "tenantry");

    drop(identity);
    let report = handle.await?;
    assert_eq!(report.delivered, 1);

    Ok(())
}
