//! Driver collaborator contract.
//!
//! The connection wrapper is policy-free: timeout defaults, authentication
//! metadata, tracing and balancer feedback all come from the [`Driver`] the
//! balancer injects. Driver methods are invoked without the wrapper's lock
//! held, so implementations must tolerate concurrent invocation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tonic::metadata::MetadataMap;

use crate::addr::Addr;
use crate::context::Context;
use crate::trace::{ConnTrace, NoopTrace};

/// Policy and feedback surface the connection wrapper requires from the
/// driver core.
///
/// All timeout accessors treat `None` and zero as "unset". Only
/// [`pessimize`](Driver::pessimize) has no default: balancer feedback is the
/// one thing the wrapper cannot invent.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Local deadline applied to every unary call.
    fn request_timeout(&self) -> Option<Duration> {
        None
    }

    /// Server-enforced operation timeout attached to every unary call.
    fn operation_timeout(&self) -> Option<Duration> {
        None
    }

    /// Server-enforced cancel-after attached to every unary call.
    fn operation_cancel_after(&self) -> Option<Duration> {
        None
    }

    /// Local deadline applied to stream setup and lifetime.
    fn stream_timeout(&self) -> Option<Duration> {
        None
    }

    /// Authentication metadata for an outgoing call.
    ///
    /// A failure here aborts the call before anything reaches the wire.
    async fn meta(&self, ctx: &Context) -> anyhow::Result<MetadataMap> {
        let _ = ctx;
        Ok(MetadataMap::new())
    }

    /// Trace hook set for a call context.
    fn trace(&self, ctx: &Context) -> Arc<dyn ConnTrace> {
        let _ = ctx;
        Arc::new(NoopTrace)
    }

    /// Tell the balancer `addr` looks unhealthy.
    ///
    /// The returned error is observed by tracing only; it never reaches the
    /// caller whose failure triggered the report.
    fn pessimize(&self, addr: &Addr) -> anyhow::Result<()>;
}
