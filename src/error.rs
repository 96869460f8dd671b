//! Canonical error and result types for the crate.
//!
//! One public [`Error`] surface covers frame decoding, protocol violations,
//! resumption outcomes, and transport loss. The wire-level [`ErrorCode`]
//! lives here too because ERROR frames and local errors convert into each
//! other at the connection boundary.

use thiserror::Error;

/// Error codes carried by ERROR frames, with their wire values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    Reserved = 0x000,
    /// The SETUP frame was malformed.
    InvalidSetup = 0x001,
    /// The server does not support the requested setup parameters.
    UnsupportedSetup = 0x002,
    /// The server rejected the SETUP.
    RejectedSetup = 0x003,
    /// The server rejected a RESUME attempt.
    RejectedResume = 0x004,
    /// Connection-level protocol violation; the connection is closing.
    ConnectionError = 0x101,
    /// Application-level stream failure.
    ApplicationError = 0x201,
    /// The responder rejected the request.
    Rejected = 0x202,
    /// The stream was canceled.
    Canceled = 0x203,
    /// The stream received an invalid frame.
    Invalid = 0x204,
}

impl ErrorCode {
    /// Decode a wire value, mapping unknown codes to [`ErrorCode::Invalid`].
    #[must_use]
    pub fn from_wire(value: u32) -> Self {
        match value {
            0x000 => Self::Reserved,
            0x001 => Self::InvalidSetup,
            0x002 => Self::UnsupportedSetup,
            0x003 => Self::RejectedSetup,
            0x004 => Self::RejectedResume,
            0x101 => Self::ConnectionError,
            0x201 => Self::ApplicationError,
            0x202 => Self::Rejected,
            0x203 => Self::Canceled,
            _ => Self::Invalid,
        }
    }

    /// Whether an ERROR frame with this code at stream 0 terminates the
    /// connection.
    #[must_use]
    pub fn is_connection_terminal(self) -> bool {
        matches!(
            self,
            Self::InvalidSetup
                | Self::UnsupportedSetup
                | Self::RejectedSetup
                | Self::RejectedResume
                | Self::ConnectionError
        )
    }
}

/// Top-level error type exposed by `resock`.
///
/// Variants are kinds, not layers: a caller matching on this enum learns what
/// went wrong, while the carried message says where.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A frame could not be decoded.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    /// A well-formed frame arrived where the protocol forbids it.
    #[error("unexpected frame: {0}")]
    UnexpectedFrame(String),
    /// The peer speaks a protocol version this side cannot serve.
    #[error("protocol version mismatch: {0}")]
    ProtocolVersionMismatch(String),
    /// No KEEPALIVE acknowledgement arrived within the configured lifetime.
    #[error("keepalive timeout")]
    KeepaliveTimeout,
    /// The server refused to resume this session.
    #[error("resume rejected: {0}")]
    ResumeRejected(String),
    /// Resumption was attempted but could not complete.
    #[error("resume failed: {0}")]
    ResumeFailed(String),
    /// The peer's responder signalled an application failure for one stream.
    #[error("application error: {0}")]
    StreamApplication(String),
    /// Connection-level failure; all streams are terminated.
    #[error("connection error: {0}")]
    Connection(String),
    /// The underlying transport is gone.
    #[error("transport closed")]
    TransportClosed,
    /// The local call was invalid (for example `request(0)`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Build the error corresponding to an inbound ERROR frame.
    #[must_use]
    pub(crate) fn from_error_frame(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::RejectedResume => Self::ResumeRejected(message),
            ErrorCode::ApplicationError => Self::StreamApplication(message),
            _ => Self::Connection(message),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
