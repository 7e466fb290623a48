use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::info;

/// Stop request shared between the trading loop and whoever may stop it.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// A signal that also triggers on Ctrl-C. Must be called from within a Tokio runtime.
    pub fn with_ctrl_c() -> Self {
        let signal = Self::new();
        let handle = signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, stopping after the current tick");
                handle.trigger();
            }
        });
        signal
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless a stop arrives first. Returns false when stopped.
    pub async fn sleep(&self, duration: Duration) -> bool {
        // registered before the flag check so a trigger in between still wakes us
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.triggered() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.triggered(),
            _ = notified => false,
        }
    }
}
