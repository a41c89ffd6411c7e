//! Explicit per-call context.
//!
//! Rust has no ambient request context, so the deadline, the cancellation
//! signal and the operation-parameter overrides travel in an explicit
//! [`Context`] value passed down every call. Deadlines use
//! [`tokio::time::Instant`] so they cooperate with paused test clocks, and
//! cancellation is a [`CancellationToken`]: deriving a child context yields a
//! child token, so cancelling the child never affects the parent while a
//! cancelled parent still tears down all of its children.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::operation::OperationMode;

/// Request-scoped carrier for the caller deadline, cancellation and the
/// server-enforced operation-parameter overrides.
///
/// A `Context` is cheap to clone; clones share the same cancellation token.
/// The `with_*` builders return derived copies and never mutate the original.
#[derive(Debug, Clone)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: CancellationToken,
    op_timeout: Option<Duration>,
    op_cancel_after: Option<Duration>,
    op_mode: OperationMode,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A root context: no deadline, not cancelled, no overrides.
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancel: CancellationToken::new(),
            op_timeout: None,
            op_cancel_after: None,
            op_mode: OperationMode::Unspecified,
        }
    }

    /// Derive a child context with its own cancellation token.
    ///
    /// Cancelling the child leaves this context untouched; cancelling this
    /// context also cancels the child.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    /// Derive a child context whose deadline is at most `timeout` from now.
    ///
    /// An already tighter deadline on this context is kept.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) => existing.min(candidate),
            None => candidate,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    /// Attach a server-enforced operation timeout.
    pub fn with_operation_timeout(&self, timeout: Duration) -> Self {
        Self {
            op_timeout: Some(timeout),
            ..self.clone()
        }
    }

    /// Attach a server-enforced cancel-after duration.
    pub fn with_operation_cancel_after(&self, cancel_after: Duration) -> Self {
        Self {
            op_cancel_after: Some(cancel_after),
            ..self.clone()
        }
    }

    /// Attach an operation execution mode.
    pub fn with_operation_mode(&self, mode: OperationMode) -> Self {
        Self {
            op_mode: mode,
            ..self.clone()
        }
    }

    /// The absolute deadline, if one was set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time remaining until the deadline, saturating at zero.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cancel this context and all contexts derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether [`cancel`](Self::cancel) was called on this context or an
    /// ancestor.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when the context is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// The operation timeout override, if set.
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.op_timeout
    }

    /// The operation cancel-after override, if set.
    pub fn operation_cancel_after(&self) -> Option<Duration> {
        self.op_cancel_after
    }

    /// The operation execution mode.
    pub fn operation_mode(&self) -> OperationMode {
        self.op_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn child_cancellation_does_not_propagate_up() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_propagates_down() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_secs(5));
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_keeps_tighter_deadline() {
        let ctx = Context::background().with_timeout(Duration::from_secs(1));
        let loose = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(loose.remaining(), Some(Duration::from_secs(1)));

        let tight = ctx.with_timeout(Duration::from_millis(100));
        assert_eq!(tight.remaining(), Some(Duration::from_millis(100)));
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_saturates_at_zero() {
        let ctx = Context::background().with_timeout(Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }
}
