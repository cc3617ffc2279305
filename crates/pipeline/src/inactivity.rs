//! Releases backend memory after the queue has been idle for a while.
//!
//! The monitor registers itself as the queue's idle callback. Each idle
//! transition (re)starts a single timer; when it expires and the queue is
//! still idle, the backend is asked to free its memory.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::generator::GenerationBackend;
use crate::queue::JobQueue;

pub struct InactivityMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    queue: JobQueue,
    backend: Arc<dyn GenerationBackend>,
    delay: Duration,
    /// Cancels the pending timer, if one is armed.
    timer: Mutex<Option<CancellationToken>>,
}

impl InactivityMonitor {
    /// Attach a monitor to `queue`.
    pub fn start(queue: JobQueue, backend: Arc<dyn GenerationBackend>, delay: Duration) -> Self {
        let inner = Arc::new(Inner {
            queue: queue.clone(),
            backend,
            delay,
            timer: Mutex::new(None),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        queue.on_idle(move || {
            if let Some(inner) = weak.upgrade() {
                inner.reset_timer();
            }
        });

        Self { inner }
    }

    /// Disarm the timer; called when new work arrives.
    pub fn clear_timer(&self) {
        self.inner.cancel_timer();
    }

    pub fn is_armed(&self) -> bool {
        self.inner
            .timer
            .lock()
            .map(|t| t.as_ref().is_some_and(|token| !token.is_cancelled()))
            .unwrap_or(false)
    }
}

impl Drop for InactivityMonitor {
    fn drop(&mut self) {
        self.inner.cancel_timer();
    }
}

impl Inner {
    fn reset_timer(self: &Arc<Self>) {
        let token = self.arm();
        let inner = Arc::clone(self);
        tracing::debug!(delay_secs = inner.delay.as_secs(), "Inactivity timer armed");

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(inner.delay) => {
                    if !inner.expire(&token) {
                        return;
                    }
                    if inner.queue.is_idle() {
                        tracing::info!(
                            idle_secs = inner.delay.as_secs(),
                            "No requests received, releasing backend memory",
                        );
                        inner.backend.free_memory().await;
                    }
                }
            }
        });
    }

    /// Install a fresh token, cancelling whatever was armed before.
    fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(previous) = timer.replace(token.clone()) {
                previous.cancel();
            }
        }
        token
    }

    /// Disarm the slot on expiry of `token`. Returns `false` when the timer
    /// was re-armed or cleared after the sleep finished, leaving the slot
    /// untouched.
    ///
    /// Tokens are only ever cancelled under the lock while being replaced
    /// or taken, so an uncancelled token is still the one in the slot.
    fn expire(&self, token: &CancellationToken) -> bool {
        let Ok(mut timer) = self.timer.lock() else {
            return false;
        };
        if token.is_cancelled() {
            return false;
        }
        timer.take();
        true
    }

    fn cancel_timer(&self) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(token) = timer.take() {
                token.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use fate_comfyui::error::ComfyUIError;
    use fate_comfyui::tracker::CompletedPrompt;

    use super::*;

    #[derive(Default)]
    struct CountingBackend {
        frees: AtomicUsize,
    }

    #[async_trait]
    impl GenerationBackend for CountingBackend {
        async fn run(
            &self,
            _workflow: &serde_json::Value,
            timeout: Duration,
        ) -> Result<CompletedPrompt, ComfyUIError> {
            Err(ComfyUIError::Timeout(timeout))
        }

        async fn free_memory(&self) {
            self.frees.fetch_add(1, Ordering::SeqCst);
        }
    }

    const DELAY: Duration = Duration::from_millis(50);

    fn setup() -> (JobQueue, Arc<CountingBackend>, InactivityMonitor) {
        let queue = JobQueue::new();
        let backend = Arc::new(CountingBackend::default());
        let monitor = InactivityMonitor::start(queue.clone(), backend.clone(), DELAY);
        (queue, backend, monitor)
    }

    #[tokio::test]
    async fn frees_memory_after_idle_delay() {
        let (queue, backend, monitor) = setup();

        queue.enqueue(|| async { Ok(()) });
        tokio::time::sleep(DELAY / 5).await;
        assert!(monitor.is_armed());
        assert_eq!(backend.frees.load(Ordering::SeqCst), 0);

        tokio::time::sleep(DELAY * 3).await;
        assert_eq!(backend.frees.load(Ordering::SeqCst), 1);
        assert!(!monitor.is_armed());
    }

    #[tokio::test]
    async fn cleared_timer_never_fires() {
        let (queue, backend, monitor) = setup();

        queue.enqueue(|| async { Ok(()) });
        tokio::time::sleep(DELAY / 5).await;
        monitor.clear_timer();

        tokio::time::sleep(DELAY * 3).await;
        assert_eq!(backend.frees.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn late_expiry_leaves_newer_timer_armed() {
        let (_queue, _backend, monitor) = setup();

        let first = monitor.inner.arm();
        let second = monitor.inner.arm();

        // The first timer's sleep finished just as the second was armed.
        assert!(!monitor.inner.expire(&first));
        assert!(monitor.is_armed());

        monitor.clear_timer();
        assert!(second.is_cancelled());
        assert!(!monitor.is_armed());
    }

    #[tokio::test]
    async fn late_expiry_after_clear_is_ignored() {
        let (_queue, _backend, monitor) = setup();

        let token = monitor.inner.arm();
        monitor.clear_timer();

        assert!(!monitor.inner.expire(&token));
        assert!(!monitor.is_armed());
    }

    #[tokio::test]
    async fn busy_queue_at_expiry_skips_release() {
        let (queue, backend, _monitor) = setup();

        queue.enqueue(|| async { Ok(()) });
        tokio::time::sleep(DELAY / 5).await;

        // Still running when the first timer expires.
        queue.enqueue(|| async {
            tokio::time::sleep(DELAY * 3).await;
            Ok(())
        });
        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(backend.frees.load(Ordering::SeqCst), 0);

        // Going idle again re-arms the timer.
        tokio::time::sleep(DELAY * 4).await;
        assert_eq!(backend.frees.load(Ordering::SeqCst), 1);
    }
}
