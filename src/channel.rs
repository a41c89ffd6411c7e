//! Production transport over a tonic channel.
//!
//! Payloads arrive here already prost-encoded, so calls go through
//! [`tonic::client::Grpc`] with a passthrough codec instead of a generated
//! client. tonic exposes no connectivity API on [`Channel`], so the
//! transport tracks a coarse state itself: ready after a successful connect
//! or call, transient-failure after a connection-class call error, shutdown
//! after close.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes};
use http::uri::PathAndQuery;
use tokio::sync::mpsc;
use tokio::time;
use tokio_stream::wrappers::ReceiverStream;
use tonic::client::Grpc;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status, Streaming};

use crate::config::ConnConfig;
use crate::context::Context;
use crate::transport::{Call, CallOptions, Connectivity, Dialer, RawStream, Transport};

/// Outbound messages buffered per stream before `send` applies backpressure.
const OUTBOUND_BUFFER: usize = 16;

const STATE_READY: u8 = 0;
const STATE_TRANSIENT_FAILURE: u8 = 1;
const STATE_SHUTDOWN: u8 = 2;

/// [`Transport`] implementation over an established tonic [`Channel`].
pub struct ChannelTransport {
    channel: Channel,
    state: AtomicU8,
}

impl ChannelTransport {
    /// Wrap an already-connected channel.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            state: AtomicU8::new(STATE_READY),
        }
    }

    fn grpc(&self, options: &CallOptions) -> Grpc<Channel> {
        let mut grpc = Grpc::new(self.channel.clone());
        if let Some(limit) = options.max_recv_message_size {
            grpc = grpc.max_decoding_message_size(limit);
        }
        grpc
    }

    fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::Relaxed);
    }

    fn note_failure(&self, status: &Status) {
        // Unknown covers "service was not ready", tonic's shape for a
        // channel that cannot reach the endpoint.
        if matches!(status.code(), Code::Unavailable | Code::Unknown) {
            self.set_state(STATE_TRANSIENT_FAILURE);
        }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn connectivity(&self) -> Connectivity {
        match self.state.load(Ordering::Relaxed) {
            STATE_READY => Connectivity::Ready,
            STATE_TRANSIENT_FAILURE => Connectivity::TransientFailure,
            _ => Connectivity::Shutdown,
        }
    }

    async fn unary(&self, ctx: &Context, call: Call<'_>, request: Bytes) -> Result<Bytes, Status> {
        let path = parse_path(call.method)?;
        let mut grpc = self.grpc(&call.options);
        let result = with_context(ctx, async {
            grpc.ready()
                .await
                .map_err(|e| Status::unknown(format!("service was not ready: {e}")))?;
            let mut request = Request::new(request);
            *request.metadata_mut() = call.metadata;
            if let Some(remaining) = ctx.remaining() {
                request.set_timeout(remaining);
            }
            let response = grpc.unary(request, path, RawCodec).await?;
            Ok(response.into_inner())
        })
        .await;
        match &result {
            Ok(_) => self.set_state(STATE_READY),
            Err(status) => self.note_failure(status),
        }
        result
    }

    async fn open_stream(
        &self,
        ctx: &Context,
        call: Call<'_>,
    ) -> Result<Box<dyn RawStream>, Status> {
        let path = parse_path(call.method)?;
        let mut grpc = self.grpc(&call.options);
        let (sender, receiver) = mpsc::channel::<Bytes>(OUTBOUND_BUFFER);
        let outbound = ReceiverStream::new(receiver);
        let result = with_context(ctx, async {
            grpc.ready()
                .await
                .map_err(|e| Status::unknown(format!("service was not ready: {e}")))?;
            let mut request = Request::new(outbound);
            *request.metadata_mut() = call.metadata;
            if let Some(remaining) = ctx.remaining() {
                request.set_timeout(remaining);
            }
            let response = grpc.streaming(request, path, RawCodec).await?;
            Ok(response.into_inner())
        })
        .await;
        match result {
            Ok(inbound) => {
                self.set_state(STATE_READY);
                Ok(Box::new(TonicStream {
                    sender: Some(sender),
                    inbound,
                }))
            }
            Err(status) => {
                self.note_failure(&status);
                Err(status)
            }
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        // tonic channels shut down when the last clone drops; record the
        // terminal state so the wrapper redials instead of reusing us.
        self.set_state(STATE_SHUTDOWN);
        Ok(())
    }
}

struct TonicStream {
    sender: Option<mpsc::Sender<Bytes>>,
    inbound: Streaming<Bytes>,
}

#[async_trait]
impl RawStream for TonicStream {
    async fn send(&mut self, message: Bytes) -> Result<(), Status> {
        match &self.sender {
            Some(sender) => sender
                .send(message)
                .await
                .map_err(|_| Status::cancelled("stream is closed")),
            None => Err(Status::failed_precondition("send half is closed")),
        }
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, Status> {
        self.inbound.message().await
    }

    async fn close_send(&mut self) -> Result<(), Status> {
        self.sender = None;
        Ok(())
    }
}

/// Default [`Dialer`]: connects a tonic channel and wraps it in
/// [`ChannelTransport`].
#[derive(Debug, Clone, Default)]
pub struct TonicDialer {
    config: ConnConfig,
}

impl TonicDialer {
    /// Dialer using `config` for connect timeout and keepalive.
    pub fn new(config: ConnConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Dialer for TonicDialer {
    async fn dial(
        &self,
        ctx: &Context,
        host: &str,
        port: u16,
    ) -> anyhow::Result<Arc<dyn Transport>> {
        let mut endpoint = Endpoint::from_shared(format!("http://{host}:{port}"))?;
        if !self.config.dial_timeout.is_zero() {
            endpoint = endpoint.connect_timeout(self.config.dial_timeout);
        }
        if let Some(keepalive) = self.config.tcp_keepalive {
            endpoint = endpoint.tcp_keepalive(Some(keepalive));
        }
        let channel = tokio::select! {
            _ = ctx.cancelled() => anyhow::bail!("dial cancelled"),
            result = endpoint.connect() => result?,
        };
        Ok(Arc::new(ChannelTransport::new(channel)))
    }
}

/// Race a transport future against the context's cancellation and deadline.
async fn with_context<T, F>(ctx: &Context, fut: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    match ctx.deadline() {
        Some(deadline) => tokio::select! {
            _ = ctx.cancelled() => Err(Status::cancelled("context cancelled")),
            _ = time::sleep_until(deadline) => Err(Status::deadline_exceeded("deadline exceeded")),
            result = fut => result,
        },
        None => tokio::select! {
            _ = ctx.cancelled() => Err(Status::cancelled("context cancelled")),
            result = fut => result,
        },
    }
}

fn parse_path(method: &str) -> Result<PathAndQuery, Status> {
    method
        .parse()
        .map_err(|_| Status::internal(format!("invalid method path: {method}")))
}

/// Passthrough codec: the wrapper already carries encoded payloads.
#[derive(Debug, Clone, Copy, Default)]
struct RawCodec;

impl Codec for RawCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = RawCodec;
    type Decoder = RawCodec;

    fn encoder(&mut self) -> Self::Encoder {
        RawCodec
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawCodec
    }
}

impl Encoder for RawCodec {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Bytes, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put(item);
        Ok(())
    }
}

impl Decoder for RawCodec {
    type Item = Bytes;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        Ok(Some(src.copy_to_bytes(src.remaining())))
    }
}
