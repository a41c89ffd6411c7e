//! # Meridian Driver Transport
//!
//! Client-side transport layer of the Meridian database driver: one
//! [`Conn`] per cluster endpoint turns a raw address into a reusable,
//! lazily-established gRPC channel, enforces the layered timeout domains
//! (local call deadline, server-side operation deadline/cancel-after,
//! stream deadline), feeds endpoint failures back to the balancer
//! ("pessimization") and translates transport and operation-status failures
//! into one error taxonomy.
//!
//! ## Crate Structure
//!
//! - **`addr`**: endpoint identity, the balancer's pessimization key.
//! - **`config`**: connection tunables (idle TTL, dial timeout).
//! - **`context`**: explicit per-call deadline/cancellation carrier.
//! - **`conn`**: the connection wrapper — lazy dial, idle lifecycle, unary
//!   and streaming call pipelines.
//! - **`channel`**: production transport over a tonic channel, plus the
//!   default dialer.
//! - **`driver`**: the collaborator contract the driver core fulfills
//!   (timeout policy, auth metadata, tracing, pessimization).
//! - **`error`**: the error taxonomy and its pessimize/timeout
//!   classifications.
//! - **`operation`**: server-enforced operation parameters and the
//!   operation response capability.
//! - **`stats`**: per-connection counters the balancer scores with.
//! - **`stream`**: the stream wrapper owning cancellation for open streams.
//! - **`trace`**: three-phase observer hooks for connection events.
//!
//! The balancer, token provider and typed client APIs live in their own
//! crates; this crate only defines the contracts it consumes from them.

pub mod addr;
pub mod channel;
pub mod config;
pub mod conn;
pub mod context;
pub mod driver;
pub mod error;
pub mod operation;
pub mod stats;
pub mod stream;
pub mod trace;

pub mod transport;

pub use addr::Addr;
pub use channel::{ChannelTransport, TonicDialer};
pub use config::ConnConfig;
pub use conn::Conn;
pub use context::Context;
pub use driver::Driver;
pub use error::{Error, Result, TransportCode};
pub use operation::{
    Issue, Operation, OperationMode, OperationParams, OperationRequest, Operational, StatusCode,
};
pub use stats::StatsSnapshot;
pub use stream::StreamCall;
pub use trace::ConnTrace;
pub use transport::{Call, CallOptions, Connectivity, Dialer, RawStream, Transport};
