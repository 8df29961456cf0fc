//! Cooperative suspension primitives for campaign and scheduled-message
//! loops (`spec.md` §4.G, §5: cancellation and pause are both observed at
//! per-recipient boundaries, never mid-send).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cloneable, one-shot cancellation signal. All clones share the same
/// underlying state; cancelling one immediately makes every clone observe
/// `is_cancelled() == true`. Never resets.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Create a new token that is **not** cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// `true` once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken").field("cancelled", &self.is_cancelled()).finish()
    }
}

/// A cloneable, resettable pause signal. Unlike [`CancellationToken`], a
/// `PauseFlag` toggles back and forth: `pause()` then `resume()` lets a
/// paused campaign continue from where it left off.
#[derive(Clone)]
pub struct PauseFlag {
    inner: Arc<PauseInner>,
}

struct PauseInner {
    paused: AtomicBool,
    notify: Notify,
}

impl PauseFlag {
    /// Create a new flag, initially not paused.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PauseInner {
                paused: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Request a pause. Idempotent.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    /// Clear a pause request and wake any waiter.
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// `true` if a pause is currently requested.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }
}

impl Default for PauseFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PauseFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PauseFlag").field("paused", &self.is_paused()).finish()
    }
}
