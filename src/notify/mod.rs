//! Fire-and-forget trade notifications.
//!
//! The engine pushes messages onto a [`NotificationHandle`]; a background
//! task drains the channel and hands each message to a [`Notifier`].
//! Delivery failures are logged and counted, never returned to the engine.

mod telegram;

pub use telegram::TelegramNotifier;

use crate::config::TelegramConfig;
use crate::error::NotifyError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Messages queued beyond this while the notifier is busy are dropped.
pub const NOTIFICATION_QUEUE_CAPACITY: usize = 256;

/// Delivers one message somewhere.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), NotifyError>;
}

/// Writes messages to the log instead of an external service.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        info!(target: "notifications", "{}", message);
        Ok(())
    }
}

/// Drops every message.
#[derive(Debug, Default, Clone)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, _message: &str) -> Result<(), NotifyError> {
        Err(NotifyError::Disabled)
    }
}

/// Pick a notifier from configuration: Telegram when both credentials are
/// present, the log otherwise.
pub fn notifier_from_config(config: &TelegramConfig) -> Arc<dyn Notifier> {
    match TelegramNotifier::from_config(config) {
        Some(telegram) => {
            info!("Telegram notifications enabled");
            Arc::new(telegram)
        }
        None => {
            warn!("Telegram bot token or chat ID not configured, notifications go to the log");
            Arc::new(LogNotifier)
        }
    }
}

/// Non-blocking sender side of the notification channel.
#[derive(Debug, Clone)]
pub struct NotificationHandle {
    tx: Option<mpsc::Sender<String>>,
}

impl NotificationHandle {
    /// A handle that silently discards every message.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue a message. Never blocks and never fails the caller; a full
    /// queue drops the message.
    pub fn notify(&self, message: impl Into<String>) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(message.into()) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                debug!("Notification queue full, dropping: {}", dropped);
            }
            Err(TrySendError::Closed(_)) => debug!("{}", NotifyError::ChannelClosed),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Delivery counters returned when the dispatcher finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: usize,
    pub failed: usize,
}

/// Spawn the background delivery task.
///
/// The task ends once every handle has been dropped and the queue is
/// drained.
pub fn spawn_dispatcher(
    notifier: Arc<dyn Notifier>,
) -> (NotificationHandle, JoinHandle<DispatchStats>) {
    spawn_dispatcher_with_capacity(notifier, NOTIFICATION_QUEUE_CAPACITY)
}

/// [`spawn_dispatcher`] with an explicit queue size.
pub fn spawn_dispatcher_with_capacity(
    notifier: Arc<dyn Notifier>,
    capacity: usize,
) -> (NotificationHandle, JoinHandle<DispatchStats>) {
    let (tx, mut rx) = mpsc::channel::<String>(capacity.max(1));

    let task = tokio::spawn(async move {
        let mut stats = DispatchStats::default();

        while let Some(message) = rx.recv().await {
            match notifier.send(&message).await {
                Ok(()) => stats.delivered += 1,
                Err(NotifyError::Disabled) => {}
                Err(e) => {
                    warn!("Notification delivery failed: {}", e);
                    stats.failed += 1;
                }
            }
        }

        debug!(
            delivered = stats.delivered,
            failed = stats.failed,
            "Notification dispatcher stopped"
        );
        stats
    });

    (NotificationHandle { tx: Some(tx) }, task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatcher_delivers_in_order() {
        let mut mock = MockNotifier::new();
        let mut seq = mockall::Sequence::new();
        for expected in ["first", "second"] {
            mock.expect_send()
                .withf(move |m| m == expected)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }

        let (handle, task) = spawn_dispatcher(Arc::new(mock));
        handle.notify("first");
        handle.notify("second");
        drop(handle);

        let stats = task.await.unwrap();
        assert_eq!(stats, DispatchStats { delivered: 2, failed: 0 });
    }

    #[tokio::test]
    async fn test_dispatcher_absorbs_failures() {
        let mut mock = MockNotifier::new();
        mock.expect_send().returning(|_| {
            Err(NotifyError::Rejected {
                status: 500,
                body: "boom".to_string(),
            })
        });

        let (handle, task) = spawn_dispatcher(Arc::new(mock));
        handle.notify("lost");
        handle.notify("also lost");
        drop(handle);

        let stats = task.await.unwrap();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.delivered, 0);
    }

    #[tokio::test]
    async fn test_noop_notifier_is_not_counted() {
        let (handle, task) = spawn_dispatcher(Arc::new(NoopNotifier));
        handle.notify("ignored");
        drop(handle);

        assert_eq!(task.await.unwrap(), DispatchStats::default());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let mut mock = MockNotifier::new();
        mock.expect_send().times(2).returning(|_| Ok(()));

        // The dispatcher cannot run until this task yields, so only the
        // first two messages fit
        let (handle, task) = spawn_dispatcher_with_capacity(Arc::new(mock), 2);
        for i in 0..5 {
            handle.notify(format!("message {}", i));
        }
        drop(handle);

        let stats = task.await.unwrap();
        assert_eq!(stats, DispatchStats { delivered: 2, failed: 0 });
    }

    #[test]
    fn test_disabled_handle_swallows_messages() {
        let handle = NotificationHandle::disabled();
        assert!(!handle.is_enabled());
        handle.notify("nobody listens");
    }

    #[tokio::test]
    async fn test_closed_channel_does_not_panic() {
        let (handle, task) = spawn_dispatcher(Arc::new(LogNotifier));
        task.abort();
        let _ = task.await;

        handle.notify("after shutdown");
        assert!(!handle.is_enabled());
    }

    #[test]
    fn test_notifier_from_config_falls_back_to_log() {
        let config = TelegramConfig::default();
        // Only checks that construction succeeds without credentials
        let _ = notifier_from_config(&config);
    }
}
