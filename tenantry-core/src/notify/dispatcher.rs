/// Post-commit mail queue and background dispatcher
///
/// Services hold a [`MailQueue`] and enqueue only after their transaction has
/// committed. Enqueueing never blocks and never fails the caller: a full or
/// closed queue is logged and the mail is dropped.
///
/// The [`MailDispatcher`] drains the queue, delivering up to
/// `max_in_flight` mails concurrently. A failed delivery is retried with
/// exponential backoff (`initial_backoff`, doubling, capped at `max_backoff`)
/// until `max_attempts` is reached, after which the mail is logged at error
/// level and given up.
///
/// # Shutdown
///
/// Cancelling the shutdown token stops intake. Mails already taken off the
/// queue finish their current attempt; pending backoff sleeps are abandoned.

use super::{MailMessage, Notifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Creates a connected queue/receiver pair
pub fn mail_channel(capacity: usize) -> (MailQueue, MailReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (MailQueue { sender }, MailReceiver { receiver })
}

/// Sending half, cloned into every service
#[derive(Debug, Clone)]
pub struct MailQueue {
    sender: mpsc::Sender<MailMessage>,
}

impl MailQueue {
    /// Queues a mail without waiting; returns false when it was dropped
    pub fn enqueue(&self, message: MailMessage) -> bool {
        let kind = message.kind;
        match self.sender.try_send(message) {
            Ok(()) => {
                tracing::debug!(kind = kind.as_str(), "Mail queued");
                true
            }
            Err(mpsc::error::TrySendError::Full(message)) => {
                tracing::warn!(
                    kind = kind.as_str(),
                    to = %message.to,
                    "Mail queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                tracing::warn!(
                    kind = kind.as_str(),
                    to = %message.to,
                    "Mail dispatcher stopped, dropping message"
                );
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Receiving half, owned by the dispatcher
#[derive(Debug)]
pub struct MailReceiver {
    receiver: mpsc::Receiver<MailMessage>,
}

impl MailReceiver {
    /// Takes the next queued mail without waiting
    pub fn try_recv(&mut self) -> Option<MailMessage> {
        self.receiver.try_recv().ok()
    }
}

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Attempts per mail, including the first
    pub max_attempts: u32,

    /// Wait before the first retry
    pub initial_backoff: Duration,

    /// Upper bound for any wait
    pub max_backoff: Duration,

    /// Concurrent deliveries
    pub max_in_flight: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_in_flight: 8,
        }
    }
}

impl DispatcherConfig {
    /// Wait after the given failed attempt (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Outcome counts of a dispatcher run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: u64,
    pub failed: u64,
}

/// Background consumer of the mail queue
pub struct MailDispatcher {
    receiver: MailReceiver,
    notifier: Arc<dyn Notifier>,
    config: DispatcherConfig,
}

impl MailDispatcher {
    pub fn new(receiver: MailReceiver, notifier: Arc<dyn Notifier>, config: DispatcherConfig) -> Self {
        Self {
            receiver,
            notifier,
            config,
        }
    }

    /// Runs until shutdown is requested or every queue handle is dropped
    pub async fn run(mut self, shutdown: CancellationToken) -> DispatchReport {
        tracing::info!(
            notifier = self.notifier.name(),
            max_attempts = self.config.max_attempts,
            max_in_flight = self.config.max_in_flight,
            "Mail dispatcher started"
        );

        let permits = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let mut deliveries: JoinSet<bool> = JoinSet::new();
        let mut report = DispatchReport::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("Mail dispatcher shutdown requested");
                    break;
                }
                Some(result) = deliveries.join_next(), if !deliveries.is_empty() => {
                    record(&mut report, result);
                    continue;
                }
                next = self.receiver.receiver.recv() => next,
            };

            let Some(message) = next else {
                tracing::info!("Mail queue closed");
                break;
            };

            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let notifier = self.notifier.clone();
            let config = self.config.clone();
            let cancel = shutdown.clone();
            deliveries.spawn(async move {
                let delivered = deliver(notifier.as_ref(), &message, &config, &cancel).await;
                drop(permit);
                delivered
            });
        }

        self.receiver.receiver.close();
        while let Some(result) = deliveries.join_next().await {
            record(&mut report, result);
        }

        tracing::info!(
            delivered = report.delivered,
            failed = report.failed,
            "Mail dispatcher stopped"
        );
        report
    }
}

fn record(report: &mut DispatchReport, result: Result<bool, tokio::task::JoinError>) {
    match result {
        Ok(true) => report.delivered += 1,
        Ok(false) => report.failed += 1,
        Err(e) => {
            tracing::error!(error = %e, "Mail delivery task panicked");
            report.failed += 1;
        }
    }
}

/// Delivers one mail with retries; true when the notifier accepted it
pub async fn deliver(
    notifier: &dyn Notifier,
    message: &MailMessage,
    config: &DispatcherConfig,
    shutdown: &CancellationToken,
) -> bool {
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match notifier
            .send(&message.to, &message.subject, &message.html_body)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    kind = message.kind.as_str(),
                    to = %message.to,
                    attempt,
                    "Mail delivered"
                );
                return true;
            }
            Err(e) if attempt == max_attempts => {
                tracing::error!(
                    kind = message.kind.as_str(),
                    to = %message.to,
                    attempts = attempt,
                    error = %e,
                    "Mail delivery failed, retries exhausted"
                );
            }
            Err(e) => {
                let backoff = config.backoff_for(attempt);
                tracing::warn!(
                    kind = message.kind.as_str(),
                    to = %message.to,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Mail delivery failed, retrying"
                );

                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::warn!(
                            kind = message.kind.as_str(),
                            to = %message.to,
                            "Shutdown during retry backoff, abandoning mail"
                        );
                        return false;
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    false
}
