//! Cancellation context installed by the kernel for the duration of one
//! evaluation.
//!
//! Only host functions that block (`jsonrpc.call`, `times.sleep`) consult it;
//! pure VM execution runs to completion regardless.

use std::{
    cell::RefCell,
    fmt,
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

/// Why a context stopped being live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "context canceled"),
            Self::DeadlineExceeded => write!(f, "context deadline exceeded"),
        }
    }
}

impl std::error::Error for ContextError {}

/// A cancellable context with an optional deadline.
///
/// Clones share the cancellation flag, so a clone handed to another thread can
/// cancel an evaluation running on the kernel's thread.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Returns a context sharing this one's cancellation flag that also
    /// expires after `timeout`.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Returns a context sharing this one's cancellation flag with the earlier
    /// of the two deadlines.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` without one.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// `Ok` while the context is live.
    pub fn check(&self) -> Result<(), ContextError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(ContextError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

/// The slot the kernel swaps a caller's context into; host functions hold a
/// clone and read the current value when called.
pub(crate) type ContextSlot = Rc<RefCell<Context>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_cancellation() {
        let ctx = Context::background();
        let child = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(child.check(), Ok(()));
        ctx.cancel();
        assert_eq!(child.check(), Err(ContextError::Cancelled));
    }

    #[test]
    fn elapsed_deadline_is_reported() {
        let ctx = Context::background().with_deadline(Instant::now());
        assert_eq!(ctx.check(), Err(ContextError::DeadlineExceeded));
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }
}
