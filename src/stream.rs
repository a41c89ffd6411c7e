//! Stream wrapper handed to callers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use prost::Message;

use crate::addr::Addr;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::stats::ConnStats;
use crate::trace::{ConnTrace, StreamDoneInfo, StreamRecvInfo};
use crate::transport::RawStream;

/// An open bidirectional stream.
///
/// Owns the call's derived cancellation context: ownership transfers here
/// from the open pipeline on success, and dropping the wrapper cancels it.
/// Stream termination — a receive failure or a clean end of stream — is
/// reported to tracing and statistics exactly once.
pub struct StreamCall {
    raw: Box<dyn RawStream>,
    ctx: Context,
    call_ctx: Context,
    trace: Arc<dyn ConnTrace>,
    stats: Arc<ConnStats>,
    addr: Addr,
    method: String,
    done: AtomicBool,
}

impl fmt::Debug for StreamCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCall")
            .field("addr", &self.addr)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl StreamCall {
    pub(crate) fn new(
        raw: Box<dyn RawStream>,
        ctx: Context,
        call_ctx: Context,
        trace: Arc<dyn ConnTrace>,
        stats: Arc<ConnStats>,
        addr: Addr,
        method: String,
    ) -> Self {
        Self {
            raw,
            ctx,
            call_ctx,
            trace,
            stats,
            addr,
            method,
            done: AtomicBool::new(false),
        }
    }

    /// The caller's original context this stream was opened under.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Cancel the stream's derived context without waiting for the server.
    pub fn cancel(&self) {
        self.call_ctx.cancel();
    }

    /// Send one message.
    pub async fn send<M: Message>(&mut self, message: &M) -> Result<()> {
        self.raw
            .send(Bytes::from(message.encode_to_vec()))
            .await
            .map_err(Error::from)
    }

    /// Close the sending half; receiving stays usable.
    pub async fn close_send(&mut self) -> Result<()> {
        self.raw.close_send().await.map_err(Error::from)
    }

    /// Receive the next message. `None` is a clean end of stream; any
    /// terminal outcome also cancels the derived context.
    pub async fn recv<M: Message + Default>(&mut self) -> Result<Option<M>> {
        match self.raw.recv().await {
            Ok(Some(payload)) => match M::decode(payload) {
                Ok(message) => {
                    self.trace.stream_recv(&StreamRecvInfo {
                        addr: &self.addr,
                        method: &self.method,
                        error: None,
                    });
                    Ok(Some(message))
                }
                Err(err) => {
                    let err = Error::Decode(err);
                    self.trace.stream_recv(&StreamRecvInfo {
                        addr: &self.addr,
                        method: &self.method,
                        error: Some(&err),
                    });
                    self.finish(Some(&err));
                    Err(err)
                }
            },
            Ok(None) => {
                self.finish(None);
                Ok(None)
            }
            Err(status) => {
                let err = Error::from(status);
                self.trace.stream_recv(&StreamRecvInfo {
                    addr: &self.addr,
                    method: &self.method,
                    error: Some(&err),
                });
                self.finish(Some(&err));
                Err(err)
            }
        }
    }

    fn finish(&self, error: Option<&Error>) {
        if !self.done.swap(true, Ordering::SeqCst) {
            self.stats.stream_done(error);
            self.trace.stream_done(&StreamDoneInfo {
                addr: &self.addr,
                method: &self.method,
                error,
            });
            self.call_ctx.cancel();
        }
    }
}

impl Drop for StreamCall {
    fn drop(&mut self) {
        // An abandoned stream releases its context; termination accounting
        // stays with the terminal receive.
        self.call_ctx.cancel();
    }
}
