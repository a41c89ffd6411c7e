//! Tracing hooks for connection-level events.
//!
//! The wrapper reports its lifecycle through a fixed three-phase observer:
//! every start hook is paired with exactly one done hook per call, no matter
//! which error path the call took. All hooks default to no-ops, so a driver
//! only overrides what it observes.

use crate::addr::Addr;
use crate::error::Error;
use crate::operation::{Issue, OperationParams};

/// Fired when a unary call begins, before the transport is acquired.
#[derive(Debug)]
pub struct OperationStartInfo<'a> {
    /// Endpoint the call is bound to.
    pub addr: &'a Addr,
    /// Full gRPC method path.
    pub method: &'a str,
    /// Operation parameters resolved for this call.
    pub params: &'a OperationParams,
}

/// Fired exactly once when a unary call finishes, on every path.
#[derive(Debug)]
pub struct OperationDoneInfo<'a> {
    /// Endpoint the call was bound to.
    pub addr: &'a Addr,
    /// Full gRPC method path.
    pub method: &'a str,
    /// Operation id reported by the server, empty if none.
    pub op_id: &'a str,
    /// Issues reported by the server, empty if none.
    pub issues: &'a [Issue],
    /// Final error as returned to the caller.
    pub error: Option<&'a Error>,
}

/// Fired when stream setup begins.
#[derive(Debug)]
pub struct StreamStartInfo<'a> {
    /// Endpoint the stream is bound to.
    pub addr: &'a Addr,
    /// Full gRPC method path.
    pub method: &'a str,
}

/// Fired per received stream message.
#[derive(Debug)]
pub struct StreamRecvInfo<'a> {
    /// Endpoint the stream is bound to.
    pub addr: &'a Addr,
    /// Full gRPC method path.
    pub method: &'a str,
    /// Receive error, if the message failed.
    pub error: Option<&'a Error>,
}

/// Fired exactly once when a stream terminates — setup failure, receive
/// failure or end of stream.
#[derive(Debug)]
pub struct StreamDoneInfo<'a> {
    /// Endpoint the stream was bound to.
    pub addr: &'a Addr,
    /// Full gRPC method path.
    pub method: &'a str,
    /// Terminal error, `None` for a clean end of stream.
    pub error: Option<&'a Error>,
}

/// Fired before the balancer is told an endpoint looks unhealthy.
#[derive(Debug)]
pub struct PessimizationStartInfo<'a> {
    /// Endpoint being reported.
    pub addr: &'a Addr,
    /// Failure that triggered the report.
    pub cause: &'a Error,
}

/// Fired after the balancer processed the report.
#[derive(Debug)]
pub struct PessimizationDoneInfo<'a> {
    /// Endpoint that was reported.
    pub addr: &'a Addr,
    /// Error returned by the balancer, observed by tracing only.
    pub error: Option<&'a anyhow::Error>,
}

/// Observer for connection-level events.
///
/// Implementations must be safe for concurrent invocation: one trace value
/// may observe many in-flight calls on the same connection.
#[allow(unused_variables)]
pub trait ConnTrace: Send + Sync {
    /// A unary call started.
    fn operation_start(&self, info: &OperationStartInfo<'_>) {}
    /// A unary call finished.
    fn operation_done(&self, info: &OperationDoneInfo<'_>) {}
    /// Stream setup started.
    fn stream_start(&self, info: &StreamStartInfo<'_>) {}
    /// A stream message was received.
    fn stream_recv(&self, info: &StreamRecvInfo<'_>) {}
    /// A stream terminated.
    fn stream_done(&self, info: &StreamDoneInfo<'_>) {}
    /// Endpoint pessimization is about to be reported.
    fn pessimization_start(&self, info: &PessimizationStartInfo<'_>) {}
    /// Endpoint pessimization was reported.
    fn pessimization_done(&self, info: &PessimizationDoneInfo<'_>) {}
}

/// Trace observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTrace;

impl ConnTrace for NoopTrace {}
