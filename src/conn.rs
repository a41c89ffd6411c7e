//! The per-endpoint connection wrapper.
//!
//! One [`Conn`] is created by the balancer per cluster node and shared by
//! every caller routed to that node. It owns the lazily-dialed transport, an
//! idle timer that closes an unused channel, and the pipelines that decorate
//! unary and streaming calls with timeouts, auth metadata, tracing and
//! balancer feedback.
//!
//! # Locking
//!
//! All mutable state lives in one slot behind a `tokio::sync::Mutex`. The
//! lock is held across the dial await, so a burst of callers hitting an
//! absent channel serializes behind a single connection attempt instead of
//! racing to create duplicates — an accepted latency tradeoff under
//! thundering-herd reconnects. No other suspension point holds the lock.
//!
//! # Idle lifecycle
//!
//! A background task (one per wrapper, for its whole lifetime) watches the
//! idle deadline. Every successful transport acquisition re-arms the
//! deadline under the slot lock; when it elapses the task closes and clears
//! the channel, again under the lock, so a call that just observed a fresh
//! handle cannot have it snatched away concurrently. The wrapper itself
//! survives an idle close — the next call transparently redials.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use prost::Message;
use tokio::sync::{watch, Mutex};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tracing::{debug, info, warn};

use crate::addr::Addr;
use crate::config::ConnConfig;
use crate::context::Context;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::operation::{Issue, Operation, OperationParams, OperationRequest, Operational, StatusCode};
use crate::stats::{ConnStats, StatsSnapshot};
use crate::stream::StreamCall;
use crate::trace::{
    OperationDoneInfo, OperationStartInfo, PessimizationDoneInfo, PessimizationStartInfo,
    StreamDoneInfo, StreamStartInfo,
};
use crate::transport::{Call, CallOptions, Connectivity, Dialer, Transport};

/// Fallback idle TTL when the configured value is zero.
const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(60);

/// Hard cap on a single server-to-client stream message.
const MAX_STREAM_RECV_SIZE: usize = 50 * 1024 * 1024;

/// Lifecycle of the cached transport handle.
enum Slot {
    /// No channel yet, or the previous one was idle-closed.
    Absent,
    /// A channel usable by all callers.
    Live(Arc<dyn Transport>),
    /// The wrapper was closed; terminal.
    Closed,
}

struct Inner {
    addr: Addr,
    dialer: Box<dyn Dialer>,
    driver: Arc<dyn Driver>,
    ttl: Duration,
    slot: Mutex<Slot>,
    idle_deadline: watch::Sender<Instant>,
    close: CancellationToken,
    closed: AtomicBool,
    stats: Arc<ConnStats>,
}

impl Inner {
    fn reset_idle(&self) {
        let _ = self.idle_deadline.send(Instant::now() + self.ttl);
    }
}

/// Reusable, lazily-established connection to one endpoint.
///
/// Cheap to clone; clones share the same channel, idle timer and counters.
#[derive(Clone)]
pub struct Conn {
    inner: Arc<Inner>,
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("addr", &self.inner.addr)
            .finish_non_exhaustive()
    }
}

impl Conn {
    /// Create a wrapper for `addr`.
    ///
    /// Nothing is dialed until the first call. Must run inside a tokio
    /// runtime: the idle watcher is spawned here and lives until
    /// [`close`](Self::close).
    pub fn new(
        addr: Addr,
        dialer: Box<dyn Dialer>,
        driver: Arc<dyn Driver>,
        config: &ConnConfig,
    ) -> Self {
        let ttl = if config.idle_ttl.is_zero() {
            DEFAULT_IDLE_TTL
        } else {
            config.idle_ttl
        };
        let (idle_deadline, deadline_rx) = watch::channel(Instant::now() + ttl);
        let inner = Arc::new(Inner {
            addr,
            dialer,
            driver,
            ttl,
            slot: Mutex::new(Slot::Absent),
            idle_deadline,
            close: CancellationToken::new(),
            closed: AtomicBool::new(false),
            stats: Arc::new(ConnStats::default()),
        });
        tokio::spawn(idle_watch(Arc::clone(&inner), deadline_rx));
        Self { inner }
    }

    /// The endpoint this wrapper is bound to.
    pub fn addr(&self) -> &Addr {
        &self.inner.addr
    }

    /// Snapshot of this connection's call counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// True iff a channel exists and reports ready. Never blocks, never
    /// dials; a momentarily contended lock reads as not ready.
    pub fn is_ready(&self) -> bool {
        match self.inner.slot.try_lock() {
            Ok(slot) => {
                matches!(&*slot, Slot::Live(t) if t.connectivity() == Connectivity::Ready)
            }
            Err(_) => false,
        }
    }

    /// Tear the wrapper down: stop the idle watcher and close a cached
    /// channel, returning its closing error.
    ///
    /// In-flight calls already holding the channel are not cancelled; they
    /// run until the transport itself reports closure. Calling `close` twice
    /// is a contract violation and aborts the process.
    pub async fn close(&self) -> anyhow::Result<()> {
        assert!(
            !self.inner.closed.swap(true, Ordering::SeqCst),
            "connection closed twice"
        );
        self.inner.close.cancel();
        let mut slot = self.inner.slot.lock().await;
        let previous = mem::replace(&mut *slot, Slot::Closed);
        drop(slot);
        if let Slot::Live(transport) = previous {
            transport.close().await?;
        }
        Ok(())
    }

    /// Invoke a unary method.
    ///
    /// The request is decorated per the driver's policy (local deadline,
    /// server-side operation parameters, auth metadata), sent over the
    /// cached — or freshly dialed — channel, and the response's operation
    /// status, if it carries one, is translated into the error taxonomy.
    pub async fn invoke<Req, Res>(
        &self,
        ctx: &Context,
        method: &str,
        request: Req,
        options: CallOptions,
    ) -> Result<Res>
    where
        Req: Message + OperationRequest,
        Res: Message + Operational + Default,
    {
        let inner = &self.inner;

        // Three independent timeout domains: the local deadline bounds the
        // context, the operation values only decorate it for the server.
        let mut ctx = ctx.clone();
        if let Some(timeout) = positive(inner.driver.request_timeout()) {
            ctx = ctx.with_timeout(timeout);
        }
        if let Some(timeout) = positive(inner.driver.operation_timeout()) {
            ctx = ctx.with_operation_timeout(timeout);
        }
        if let Some(cancel_after) = positive(inner.driver.operation_cancel_after()) {
            ctx = ctx.with_operation_cancel_after(cancel_after);
        }

        let metadata = inner
            .driver
            .meta(&ctx)
            .await
            .map_err(|err| Error::Auth(err.to_string()))?;

        let mut request = request;
        let params = OperationParams::from_context(&ctx);
        if !params.is_empty() {
            request.set_operation_params(&params);
        }
        let payload = Bytes::from(request.encode_to_vec());

        let started = Instant::now();
        inner.stats.operation_start();
        let trace = inner.driver.trace(&ctx);
        trace.operation_start(&OperationStartInfo {
            addr: &inner.addr,
            method,
            params: &params,
        });

        let (result, op_id, issues) = self
            .unary_call::<Res>(&ctx, method, payload, metadata, options)
            .await;

        trace.operation_done(&OperationDoneInfo {
            addr: &inner.addr,
            method,
            op_id: &op_id,
            issues: &issues,
            error: result.as_ref().err(),
        });
        // Metrics see only the timeout-shaped errors; the caller gets the
        // original either way.
        inner
            .stats
            .operation_done(started, result.as_ref().err().filter(|e| e.is_timeout()));
        result
    }

    async fn unary_call<Res>(
        &self,
        ctx: &Context,
        method: &str,
        payload: Bytes,
        metadata: MetadataMap,
        options: CallOptions,
    ) -> (Result<Res>, String, Vec<Issue>)
    where
        Res: Message + Operational + Default,
    {
        let transport = match self.transport(ctx).await {
            Ok(transport) => transport,
            Err(err) => {
                self.report_if_endpoint_failure(ctx, &err);
                return (Err(err), String::new(), Vec::new());
            }
        };

        let call = Call {
            method,
            metadata,
            options,
        };
        let reply = match transport.unary(ctx, call, payload).await {
            Ok(reply) => reply,
            Err(status) => {
                let err = Error::from(status);
                self.report_if_endpoint_failure(ctx, &err);
                return (Err(err), String::new(), Vec::new());
            }
        };

        let response = match Res::decode(reply) {
            Ok(response) => response,
            Err(err) => return (Err(Error::Decode(err)), String::new(), Vec::new()),
        };

        match response.operation() {
            Some(Operation {
                id,
                ready: false,
                issues,
                ..
            }) => (Err(Error::OperationNotReady), id, issues),
            Some(Operation {
                id, status, issues, ..
            }) if status != StatusCode::Success => (
                Err(Error::OperationStatus {
                    status,
                    issues: issues.clone(),
                }),
                id,
                issues,
            ),
            Some(Operation { id, issues, .. }) => (Ok(response), id, issues),
            None => (Ok(response), String::new(), Vec::new()),
        }
    }

    /// Open a bidirectional stream.
    ///
    /// On success the derived cancellation context is owned by the returned
    /// [`StreamCall`]; on any setup failure it is cancelled here before the
    /// error is returned.
    pub async fn open_stream(
        &self,
        ctx: &Context,
        method: &str,
        options: CallOptions,
    ) -> Result<StreamCall> {
        let inner = &self.inner;

        // Trace hooks observe the caller's context, not the derived one.
        let raw_ctx = ctx.clone();
        let call_ctx = match positive(inner.driver.stream_timeout()) {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.child(),
        };

        let metadata = match inner.driver.meta(&call_ctx).await {
            Ok(metadata) => metadata,
            Err(err) => {
                call_ctx.cancel();
                return Err(Error::Auth(err.to_string()));
            }
        };

        inner.stats.stream_start();
        let trace = inner.driver.trace(&raw_ctx);
        trace.stream_start(&StreamStartInfo {
            addr: &inner.addr,
            method,
        });

        let transport = match self.transport(&call_ctx).await {
            Ok(transport) => transport,
            Err(err) => {
                self.report_if_endpoint_failure(&call_ctx, &err);
                inner.stats.stream_done(Some(&err));
                trace.stream_done(&StreamDoneInfo {
                    addr: &inner.addr,
                    method,
                    error: Some(&err),
                });
                call_ctx.cancel();
                return Err(err);
            }
        };

        let mut options = options;
        // Bound worst-case memory for a single server-to-client message.
        options.max_recv_message_size = Some(MAX_STREAM_RECV_SIZE);
        let call = Call {
            method,
            metadata,
            options,
        };
        match transport.open_stream(&call_ctx, call).await {
            Ok(raw) => Ok(StreamCall::new(
                raw,
                raw_ctx,
                call_ctx,
                trace,
                Arc::clone(&inner.stats),
                inner.addr.clone(),
                method.to_owned(),
            )),
            Err(status) => {
                let err = Error::from(status);
                self.report_if_endpoint_failure(&call_ctx, &err);
                inner.stats.stream_done(Some(&err));
                trace.stream_done(&StreamDoneInfo {
                    addr: &inner.addr,
                    method,
                    error: Some(&err),
                });
                call_ctx.cancel();
                Err(err)
            }
        }
    }

    /// Return the cached channel, dialing a fresh one if it is absent or in
    /// a terminal state. Every success path re-arms the idle deadline.
    async fn transport(&self, ctx: &Context) -> Result<Arc<dyn Transport>> {
        let inner = &self.inner;
        let mut slot = inner.slot.lock().await;
        match &*slot {
            Slot::Closed => return Err(Error::Closed),
            Slot::Live(transport) if !transport.connectivity().is_broken() => {
                let transport = Arc::clone(transport);
                inner.reset_idle();
                return Ok(transport);
            }
            _ => {}
        }

        debug!(addr = %inner.addr, "dialing");
        let transport = inner
            .dialer
            .dial(ctx, &inner.addr.host, inner.addr.port)
            .await
            .map_err(|err| {
                warn!(addr = %inner.addr, error = %err, "dial failed");
                Error::Dial(err.to_string())
            })?;
        info!(addr = %inner.addr, "transport established");
        // A broken predecessor is replaced wholesale; it shuts down on drop.
        *slot = Slot::Live(Arc::clone(&transport));
        inner.reset_idle();
        Ok(transport)
    }

    fn report_if_endpoint_failure(&self, ctx: &Context, err: &Error) {
        if err.must_pessimize() {
            self.pessimize(ctx, err);
        }
    }

    /// Tell the balancer this endpoint looks unhealthy. Fire-and-forget:
    /// the balancer's own error is visible to tracing only.
    fn pessimize(&self, ctx: &Context, cause: &Error) {
        let inner = &self.inner;
        let trace = inner.driver.trace(ctx);
        trace.pessimization_start(&PessimizationStartInfo {
            addr: &inner.addr,
            cause,
        });
        warn!(addr = %inner.addr, cause = %cause, "pessimizing endpoint");
        let result = inner.driver.pessimize(&inner.addr);
        if let Err(error) = &result {
            debug!(addr = %inner.addr, error = %error, "pessimization feedback failed");
        }
        trace.pessimization_done(&PessimizationDoneInfo {
            addr: &inner.addr,
            error: result.as_ref().err(),
        });
    }
}

/// Treat zero as "unset" for driver-supplied durations.
fn positive(duration: Option<Duration>) -> Option<Duration> {
    duration.filter(|d| !d.is_zero())
}

async fn idle_watch(inner: Arc<Inner>, mut deadline: watch::Receiver<Instant>) {
    loop {
        let at = *deadline.borrow_and_update();
        if at <= Instant::now() {
            // Already fired and not re-armed: park until a reset or close.
            tokio::select! {
                _ = inner.close.cancelled() => return,
                changed = deadline.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            continue;
        }
        tokio::select! {
            _ = inner.close.cancelled() => return,
            changed = deadline.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = time::sleep_until(at) => {
                let mut slot = inner.slot.lock().await;
                // A reset that raced the timer wins: the deadline moved
                // while we waited for the lock.
                if *deadline.borrow() <= Instant::now() && matches!(&*slot, Slot::Live(_)) {
                    if let Slot::Live(transport) = mem::replace(&mut *slot, Slot::Absent) {
                        debug!(addr = %inner.addr, "closing idle transport");
                        if let Err(error) = transport.close().await {
                            debug!(addr = %inner.addr, error = %error, "idle close failed");
                        }
                    }
                }
            }
        }
    }
}
