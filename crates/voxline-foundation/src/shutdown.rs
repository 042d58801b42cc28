use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;

/// Process-wide cooperative cancellation signal. Cloneable; every flow holds
/// one and checks it at each suspension point. Requesting shutdown twice is
/// a no-op: there is exactly one teardown.
#[derive(Clone)]
pub struct ShutdownToken {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn request(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            tracing::info!("Shutdown requested");
            self.notify.notify_waiters();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested. Safe against the request
    /// landing between the flag check and the wait.
    pub async fn wait(&self) {
        while !self.is_requested() {
            let notified = self.notify.notified();
            if self.is_requested() {
                break;
            }
            notified.await;
        }
    }
}

pub struct ShutdownHandler {
    token: ShutdownToken,
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandler {
    pub fn new() -> Self {
        Self {
            token: ShutdownToken::new(),
        }
    }

    /// Install the Ctrl-C watcher and panic hook, returning the shared token.
    /// Must be called from within a tokio runtime.
    pub fn install(self) -> ShutdownToken {
        let token = self.token.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested via Ctrl-C");
                token.request();
            }
        });

        let original_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            tracing::error!("PANIC: {}", panic_info);
            eprintln!("Application panicked: {}", panic_info);
            original_panic(panic_info);
        }));

        self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_after_request() {
        let token = ShutdownToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.request();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter did not observe shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_after_request_is_immediate() {
        let token = ShutdownToken::new();
        token.request();
        tokio::time::timeout(Duration::from_millis(100), token.wait())
            .await
            .expect("already-requested token must not block");
    }

    #[tokio::test]
    async fn request_is_idempotent() {
        let token = ShutdownToken::new();
        token.request();
        token.request();
        assert!(token.is_requested());
        token.wait().await;
    }
}
