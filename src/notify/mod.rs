//! Best-effort operator notifications.
//!
//! `NotifyHandle` is what the live agent holds: each message is delivered on its own
//! task, so a slow or failing channel never delays trading, and failures are only logged.

mod telegram;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, warn};

pub use telegram::*;

/// Delivery failure of a notification channel.
#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    /// The request did not complete.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The channel answered with an error.
    #[error("Rejected ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },
}

/// A channel that delivers text messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), NotifyError>;
}

/// Notifier that discards every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, message: &str) -> Result<(), NotifyError> {
        debug!(text = message, "notification dropped");
        Ok(())
    }
}

/// Fire-and-forget front of a `Notifier`.
#[derive(Clone)]
pub struct NotifyHandle {
    notifier: Arc<dyn Notifier>,
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl NotifyHandle {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            pending: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopNotifier))
    }

    /// Queues `message` for delivery and returns immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn send(&self, message: impl Into<String>) {
        let message = message.into();
        let notifier = Arc::clone(&self.notifier);
        let Ok(mut pending) = self.pending.lock() else {
            warn!(text = %message, "notification dropped: pending set poisoned");
            return;
        };
        // reap deliveries that already finished
        while pending.try_join_next().is_some() {}
        pending.spawn(async move {
            if let Err(e) = notifier.notify(&message).await {
                warn!(error = %e, text = %message, "notification failed");
            }
        });
    }

    /// Waits up to `timeout` for queued deliveries to finish.
    ///
    /// Returns false when some were still running and have been aborted.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let mut set = match self.pending.lock() {
            Ok(mut pending) => std::mem::take(&mut *pending),
            Err(_) => return false,
        };
        let drained = tokio::time::timeout(timeout, async { while set.join_next().await.is_some() {} }).await;
        if drained.is_err() {
            warn!(remaining = set.len(), "notifications still pending at flush deadline");
            set.abort_all();
            return false;
        }
        true
    }
}
