//! Connection error taxonomy.
//!
//! Every failure a caller can observe from this crate is an [`Error`]. Raw
//! gRPC statuses are mapped into [`TransportCode`] so the rest of the driver
//! never matches on `tonic` types directly. Two classifications drive the
//! pipelines: [`Error::must_pessimize`] selects the endpoint-level failures
//! that feed back into the balancer, and [`Error::is_timeout`] selects the
//! timeout-shaped failures that metrics account separately.

use thiserror::Error;

use crate::operation::{Issue, StatusCode};

/// Convenience alias for results using the connection error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Normalized transport failure codes, mapped 1:1 from raw gRPC codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TransportCode {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl From<tonic::Code> for TransportCode {
    fn from(code: tonic::Code) -> Self {
        use tonic::Code;
        match code {
            Code::Cancelled => Self::Cancelled,
            Code::InvalidArgument => Self::InvalidArgument,
            Code::DeadlineExceeded => Self::DeadlineExceeded,
            Code::NotFound => Self::NotFound,
            Code::AlreadyExists => Self::AlreadyExists,
            Code::PermissionDenied => Self::PermissionDenied,
            Code::ResourceExhausted => Self::ResourceExhausted,
            Code::FailedPrecondition => Self::FailedPrecondition,
            Code::Aborted => Self::Aborted,
            Code::OutOfRange => Self::OutOfRange,
            Code::Unimplemented => Self::Unimplemented,
            Code::Internal => Self::Internal,
            Code::Unavailable => Self::Unavailable,
            Code::DataLoss => Self::DataLoss,
            Code::Unauthenticated => Self::Unauthenticated,
            Code::Ok | Code::Unknown => Self::Unknown,
        }
    }
}

impl std::fmt::Display for TransportCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Errors surfaced by the connection wrapper.
#[derive(Debug, Error)]
pub enum Error {
    /// The endpoint was unreachable at connect time.
    #[error("dial error: {0}")]
    Dial(String),

    /// An in-flight call failed at the transport level.
    #[error("transport error: {code}: {message}")]
    Transport {
        /// Normalized failure code.
        code: TransportCode,
        /// Raw status message from the transport.
        message: String,
    },

    /// The authentication metadata provider failed; no call was attempted.
    #[error("auth error: {0}")]
    Auth(String),

    /// The response payload could not be decoded.
    #[error("response decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The server accepted the operation but has not completed it
    /// synchronously.
    #[error("operation is not ready")]
    OperationNotReady,

    /// The server completed the operation with a non-success status.
    #[error("operation error: {status}")]
    OperationStatus {
        /// Server completion status.
        status: StatusCode,
        /// Diagnostics attached by the server.
        issues: Vec<Issue>,
    },

    /// The connection wrapper was closed before the call.
    #[error("connection is closed")]
    Closed,
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Self::Transport {
            code: status.code().into(),
            message: status.message().to_owned(),
        }
    }
}

impl Error {
    /// Whether this failure should feed back into the balancer as an
    /// endpoint-health signal.
    ///
    /// Dial failures always do. Transport failures do unless they describe
    /// the caller or its quota rather than the endpoint (`ResourceExhausted`,
    /// `OutOfRange`). Operation-status results never do: they prove the
    /// endpoint is reachable and serving.
    pub fn must_pessimize(&self) -> bool {
        match self {
            Self::Dial(_) => true,
            Self::Transport { code, .. } => !matches!(
                code,
                TransportCode::ResourceExhausted | TransportCode::OutOfRange
            ),
            _ => false,
        }
    }

    /// Whether this failure is timeout-shaped: a local deadline, a cancelled
    /// call, or a server-side operation deadline/cancel-after expiry.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport { code, .. } => matches!(
                code,
                TransportCode::DeadlineExceeded | TransportCode::Cancelled
            ),
            Self::OperationStatus { status, .. } => {
                matches!(status, StatusCode::Timeout | StatusCode::Cancelled)
            }
            _ => false,
        }
    }
}
