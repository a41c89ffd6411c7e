//! Server-enforced operation parameters and the operation response shape.
//!
//! Operation parameters (timeout, cancel-after, execution mode) are not local
//! deadlines: they travel inside the request payload and are enforced by the
//! remote server. The local call deadline is a separate, orthogonal domain —
//! both may be active on the same call.
//!
//! Responses optionally expose an operation status independent of transport
//! success. A type opts into this capability by implementing [`Operational`];
//! the unary pipeline checks it exactly once per call.

use std::fmt;
use std::time::Duration;

use crate::context::Context;

/// Execution mode requested from the server for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationMode {
    /// Let the server pick its default behavior.
    #[default]
    Unspecified,
    /// The call returns once the operation completed.
    Sync,
    /// The call returns an operation id immediately; completion is polled.
    Async,
}

/// Server-enforced timeout/cancel-after/mode values carried inside the
/// request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationParams {
    /// Hard server-side execution limit for the operation.
    pub timeout: Option<Duration>,
    /// Time after which the server cancels the operation but still reports
    /// its outcome.
    pub cancel_after: Option<Duration>,
    /// Requested execution mode.
    pub mode: OperationMode,
}

impl OperationParams {
    /// Resolve the parameters a request should carry for `ctx`.
    ///
    /// The context's explicit overrides are taken as-is. In [`Sync`] mode the
    /// caller's own deadline additionally bounds the operation timeout (the
    /// smaller of the two wins); in [`Async`] and [`Unspecified`] modes the
    /// local deadline never leaks into the server-side domain.
    ///
    /// [`Sync`]: OperationMode::Sync
    /// [`Async`]: OperationMode::Async
    /// [`Unspecified`]: OperationMode::Unspecified
    pub fn from_context(ctx: &Context) -> Self {
        let mut params = Self {
            timeout: ctx.operation_timeout(),
            cancel_after: ctx.operation_cancel_after(),
            mode: ctx.operation_mode(),
        };
        if params.mode == OperationMode::Sync {
            if let Some(remaining) = ctx.remaining() {
                params.timeout = Some(match params.timeout {
                    Some(timeout) => timeout.min(remaining),
                    None => remaining,
                });
            }
        }
        params
    }

    /// True when no parameter is set and the request payload needs no merge.
    pub fn is_empty(&self) -> bool {
        self.timeout.is_none()
            && self.cancel_after.is_none()
            && self.mode == OperationMode::Unspecified
    }
}

/// Request payloads that can carry [`OperationParams`].
///
/// The unary pipeline merges resolved parameters into the outgoing request
/// through this trait before encoding it.
pub trait OperationRequest {
    /// Merge `params` into the request payload.
    fn set_operation_params(&mut self, params: &OperationParams);
}

/// Completion status codes reported by the server inside an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub enum StatusCode {
    #[default]
    Unspecified,
    Success,
    BadRequest,
    Unauthorized,
    InternalError,
    Aborted,
    Unavailable,
    Overloaded,
    SchemeError,
    GenericError,
    Timeout,
    BadSession,
    PreconditionFailed,
    AlreadyExists,
    NotFound,
    SessionExpired,
    Cancelled,
    Undetermined,
    Unsupported,
    SessionBusy,
}

impl StatusCode {
    /// Decode a wire status value; unknown values map to `None`.
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Unspecified,
            400_000 => Self::Success,
            400_010 => Self::BadRequest,
            400_020 => Self::Unauthorized,
            400_030 => Self::InternalError,
            400_040 => Self::Aborted,
            400_050 => Self::Unavailable,
            400_060 => Self::Overloaded,
            400_070 => Self::SchemeError,
            400_080 => Self::GenericError,
            400_090 => Self::Timeout,
            400_100 => Self::BadSession,
            400_120 => Self::PreconditionFailed,
            400_130 => Self::AlreadyExists,
            400_140 => Self::NotFound,
            400_150 => Self::SessionExpired,
            400_160 => Self::Cancelled,
            400_170 => Self::Undetermined,
            400_180 => Self::Unsupported,
            400_190 => Self::SessionBusy,
            _ => return None,
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single diagnostic issue attached to an operation result.
///
/// Issues nest: the server groups related diagnostics under a parent issue.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Issue {
    /// Server-defined severity, lower is more severe.
    pub severity: u32,
    /// Server-defined issue code.
    pub code: u32,
    /// Human-readable message.
    pub message: String,
    /// Nested sub-issues.
    pub issues: Vec<Issue>,
}

/// Server-side completion state of an operation, independent of transport
/// success.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Operation {
    /// Operation identifier, usable for async polling.
    pub id: String,
    /// Whether the operation completed synchronously.
    pub ready: bool,
    /// Completion status; only meaningful when `ready`.
    pub status: StatusCode,
    /// Diagnostics attached by the server.
    pub issues: Vec<Issue>,
}

/// Response payloads that expose the operation capability.
///
/// Types without an embedded operation return `None` and pass through the
/// pipeline untranslated.
pub trait Operational {
    /// The embedded operation view, if this response carries one.
    fn operation(&self) -> Option<Operation>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: Duration = Duration::from_secs(1);
    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test(start_paused = true)]
    async fn nothing_set_yields_empty_params() {
        let params = OperationParams::from_context(&Context::background());
        assert!(params.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unspecified_mode_ignores_context_deadline() {
        let ctx = Context::background().with_timeout(SECOND);
        let params = OperationParams::from_context(&ctx);
        assert!(params.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sync_mode_applies_context_deadline() {
        let ctx = Context::background()
            .with_operation_mode(OperationMode::Sync)
            .with_timeout(SECOND);
        let params = OperationParams::from_context(&ctx);
        assert_eq!(params.timeout, Some(SECOND));
        assert_eq!(params.mode, OperationMode::Sync);
    }

    #[tokio::test(start_paused = true)]
    async fn async_mode_ignores_context_deadline() {
        let ctx = Context::background()
            .with_operation_mode(OperationMode::Async)
            .with_timeout(SECOND);
        let params = OperationParams::from_context(&ctx);
        assert_eq!(params.timeout, None);
        assert_eq!(params.mode, OperationMode::Async);
    }

    #[tokio::test(start_paused = true)]
    async fn unspecified_mode_keeps_operation_timeout() {
        let ctx = Context::background()
            .with_operation_timeout(HOUR)
            .with_timeout(SECOND);
        let params = OperationParams::from_context(&ctx);
        assert_eq!(params.timeout, Some(HOUR));
    }

    #[tokio::test(start_paused = true)]
    async fn sync_mode_tightens_operation_timeout() {
        let ctx = Context::background()
            .with_operation_mode(OperationMode::Sync)
            .with_operation_timeout(HOUR)
            .with_timeout(SECOND);
        let params = OperationParams::from_context(&ctx);
        assert_eq!(params.timeout, Some(SECOND));
        assert_eq!(params.mode, OperationMode::Sync);
    }

    #[tokio::test(start_paused = true)]
    async fn async_mode_keeps_operation_timeout() {
        let ctx = Context::background()
            .with_operation_mode(OperationMode::Async)
            .with_operation_timeout(HOUR)
            .with_timeout(SECOND);
        let params = OperationParams::from_context(&ctx);
        assert_eq!(params.timeout, Some(HOUR));
        assert_eq!(params.mode, OperationMode::Async);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_is_carried_unchanged() {
        let ctx = Context::background()
            .with_operation_cancel_after(HOUR)
            .with_timeout(SECOND);
        let params = OperationParams::from_context(&ctx);
        assert_eq!(params.cancel_after, Some(HOUR));
        assert_eq!(params.timeout, None);
    }

    #[test]
    fn status_code_round_trips_known_values() {
        assert_eq!(StatusCode::from_i32(400_000), Some(StatusCode::Success));
        assert_eq!(StatusCode::from_i32(400_090), Some(StatusCode::Timeout));
        assert_eq!(StatusCode::from_i32(123), None);
    }
}
