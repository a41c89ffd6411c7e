//! Raw transport abstraction.
//!
//! The connection wrapper never talks to `tonic` directly: it drives an
//! object-safe [`Transport`] created by an injected [`Dialer`]. Payloads
//! cross this boundary already prost-encoded, which keeps the traits
//! dyn-compatible — typed encode/decode lives in the wrapper, and a test can
//! stand in a transport without a network.
//!
//! The production implementation over a tonic channel lives in
//! [`crate::channel`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::context::Context;

/// Coarse connectivity state of a raw channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// No activity yet.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// The channel is healthy.
    Ready,
    /// The channel saw a connection-level failure and is backing off.
    TransientFailure,
    /// The channel was closed and will not recover.
    Shutdown,
}

impl Connectivity {
    /// True for the terminal states that force the wrapper to redial.
    pub fn is_broken(self) -> bool {
        matches!(self, Self::TransientFailure | Self::Shutdown)
    }
}

/// Per-call knobs forwarded to the transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Upper bound for a single received message, in bytes.
    pub max_recv_message_size: Option<usize>,
}

/// One call as the transport sees it: method path, outgoing metadata and
/// options. The deadline and cancellation travel in the [`Context`] passed
/// alongside.
#[derive(Debug)]
pub struct Call<'a> {
    /// Full gRPC method path (`/package.Service/Method`).
    pub method: &'a str,
    /// Outgoing request metadata (auth ticket and friends).
    pub metadata: MetadataMap,
    /// Per-call options.
    pub options: CallOptions,
}

/// An established raw channel to one endpoint.
///
/// Implementations must be safe for concurrent calls: one transport is
/// shared by every caller of the owning connection wrapper.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Current connectivity state. Must not block.
    fn connectivity(&self) -> Connectivity;

    /// Invoke a unary method; `request` is the encoded request payload, the
    /// result the encoded response payload.
    async fn unary(&self, ctx: &Context, call: Call<'_>, request: Bytes) -> Result<Bytes, Status>;

    /// Open a bidirectional stream for `call`.
    async fn open_stream(&self, ctx: &Context, call: Call<'_>)
        -> Result<Box<dyn RawStream>, Status>;

    /// Close the channel. After close the transport reports
    /// [`Connectivity::Shutdown`].
    async fn close(&self) -> anyhow::Result<()>;
}

/// Message-granular view of an open bidirectional stream.
#[async_trait]
pub trait RawStream: Send {
    /// Send one encoded message.
    async fn send(&mut self, message: Bytes) -> Result<(), Status>;

    /// Receive the next encoded message; `None` is a clean end of stream.
    async fn recv(&mut self) -> Result<Option<Bytes>, Status>;

    /// Close the sending half; the receiving half stays usable.
    async fn close_send(&mut self) -> Result<(), Status>;
}

/// Factory for raw channels, injected into the connection wrapper.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    /// Establish a channel to `host:port`.
    async fn dial(&self, ctx: &Context, host: &str, port: u16)
        -> anyhow::Result<Arc<dyn Transport>>;
}
