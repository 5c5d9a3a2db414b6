/// Outbound mail
///
/// Services never talk to a mail transport directly. After a transaction
/// commits they put a [`MailMessage`] on the [`MailQueue`]; a
/// [`MailDispatcher`] running in the background hands it to a [`Notifier`],
/// retrying with exponential backoff. A failed delivery never fails the
/// operation that produced it.
///
/// # Modules
///
/// - `messages`: Link construction and mail bodies
/// - `dispatcher`: Queue, background dispatcher and retry policy
/// - `http`: Notifier posting JSON to a mail relay
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use tenantry_core::notify::{mail_channel, DispatcherConfig, LogNotifier, MailDispatcher};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() {
/// let (queue, receiver) = mail_channel(1024);
/// let dispatcher = MailDispatcher::new(receiver, Arc::new(LogNotifier), DispatcherConfig::default());
///
/// let shutdown = CancellationToken::new();
/// let handle = tokio::spawn(dispatcher.run(shutdown.clone()));
///
/// // hand `queue` to the services ...
///
/// shutdown.cancel();
/// let report = handle.await.unwrap();
/// println!("delivered {}", report.delivered);
/// # }
/// ```

pub mod dispatcher;
pub mod http;
pub mod messages;

pub use dispatcher::{mail_channel, DispatchReport, DispatcherConfig, MailDispatcher, MailQueue, MailReceiver};
pub use http::HttpRelayNotifier;
pub use messages::{LinkBuilder, MailKind, MailMessage};

use async_trait::async_trait;

/// Error type for mail delivery
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Could not reach the transport
    #[error("Mail transport failed: {0}")]
    Transport(String),

    /// Transport answered with a failure
    #[error("Mail relay rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Notifier misconfigured
    #[error("Invalid mail configuration: {0}")]
    Config(String),
}

/// Mail delivery collaborator
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Delivers one HTML mail
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError>;
}

/// Notifier that only logs; for development
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError> {
        // Bodies carry live tokens; only their size is logged
        tracing::info!(
            to = %to,
            subject = %subject,
            body_bytes = html_body.len(),
            "Mail delivered to log notifier"
        );
        Ok(())
    }
}
