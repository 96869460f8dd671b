//! The protocol frame model.
//!
//! [`Frame`] is a tagged union over the frame kinds of the wire protocol,
//! with typed accessors for the fields the connection state machine needs.
//! Payload bytes use [`bytes::Bytes`] for zero-copy sharing between the
//! codec, the resume cache, and subscribers.

mod flags;

pub use flags::FrameFlags;

use bytes::Bytes;

use crate::{error::ErrorCode, resume::ResumeToken};

#[cfg(test)]
mod tests;

/// Identifier of a stream within a connection. Zero addresses the connection
/// itself.
pub type StreamId = u32;

/// Protocol version carried in SETUP and RESUME frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// The version this crate speaks natively.
    pub const CURRENT: Self = Self { major: 1, minor: 0 };
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Frame kinds with their six-bit wire codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Reserved = 0x00,
    Setup = 0x01,
    Lease = 0x02,
    Keepalive = 0x03,
    RequestResponse = 0x04,
    RequestFnf = 0x05,
    RequestStream = 0x06,
    RequestChannel = 0x07,
    RequestN = 0x08,
    Cancel = 0x09,
    Payload = 0x0a,
    Error = 0x0b,
    MetadataPush = 0x0c,
    Resume = 0x0d,
    ResumeOk = 0x0e,
    Ext = 0x3f,
}

impl FrameKind {
    /// Decode a six-bit wire code. Unknown codes return `None` so dispatch
    /// can skip frames from future protocol revisions.
    #[must_use]
    pub fn from_wire(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => Self::Reserved,
            0x01 => Self::Setup,
            0x02 => Self::Lease,
            0x03 => Self::Keepalive,
            0x04 => Self::RequestResponse,
            0x05 => Self::RequestFnf,
            0x06 => Self::RequestStream,
            0x07 => Self::RequestChannel,
            0x08 => Self::RequestN,
            0x09 => Self::Cancel,
            0x0a => Self::Payload,
            0x0b => Self::Error,
            0x0c => Self::MetadataPush,
            0x0d => Self::Resume,
            0x0e => Self::ResumeOk,
            0x3f => Self::Ext,
            _ => return None,
        })
    }

    /// Whether frames of this kind advance the resume position counters.
    ///
    /// Stream frames are replayable after a resume; connection plumbing
    /// (SETUP, KEEPALIVE, LEASE, METADATA_PUSH, RESUME, RESUME_OK) is not.
    /// Both peers must agree on this classification or their implied
    /// positions drift.
    #[must_use]
    pub fn is_resumable(self) -> bool {
        matches!(
            self,
            Self::RequestResponse
                | Self::RequestFnf
                | Self::RequestStream
                | Self::RequestChannel
                | Self::RequestN
                | Self::Cancel
                | Self::Payload
                | Self::Error
        )
    }

    /// Whether this kind opens a new stream when it arrives for an unknown
    /// stream id.
    #[must_use]
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Self::RequestResponse | Self::RequestFnf | Self::RequestStream | Self::RequestChannel
        )
    }
}

/// A payload: optional metadata plus data bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    pub metadata: Option<Bytes>,
    pub data: Bytes,
}

impl Payload {
    /// A payload with data only.
    #[must_use]
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            metadata: None,
            data: data.into(),
        }
    }

    /// A payload with metadata and data.
    #[must_use]
    pub fn with_metadata(metadata: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self {
            metadata: Some(metadata.into()),
            data: data.into(),
        }
    }

    /// An empty payload, used by standalone COMPLETE frames.
    #[must_use]
    pub fn empty() -> Self { Self::default() }

    /// Data interpreted as UTF-8, lossily.
    #[must_use]
    pub fn data_utf8(&self) -> String { String::from_utf8_lossy(&self.data).into_owned() }
}

impl From<&str> for Payload {
    fn from(data: &str) -> Self { Self::new(Bytes::copy_from_slice(data.as_bytes())) }
}

/// A decoded protocol frame.
///
/// Kind-specific fields live on the variant; the common header (stream id,
/// flags) is folded into each variant since several kinds omit one or both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Setup {
        version: ProtocolVersion,
        keepalive_interval_ms: u32,
        max_lifetime_ms: u32,
        resume_token: Option<ResumeToken>,
        metadata_mime_type: String,
        data_mime_type: String,
        payload: Payload,
    },
    Lease {
        ttl_ms: u32,
        number_of_requests: u32,
        metadata: Option<Bytes>,
    },
    Keepalive {
        respond: bool,
        last_received_position: u64,
        data: Bytes,
    },
    RequestResponse {
        stream_id: StreamId,
        payload: Payload,
    },
    RequestFnf {
        stream_id: StreamId,
        payload: Payload,
    },
    RequestStream {
        stream_id: StreamId,
        initial_request_n: u32,
        payload: Payload,
    },
    RequestChannel {
        stream_id: StreamId,
        /// Requester's producing half completed at request time.
        complete: bool,
        initial_request_n: u32,
        payload: Payload,
    },
    RequestN {
        stream_id: StreamId,
        n: u32,
    },
    Cancel {
        stream_id: StreamId,
    },
    Payload {
        stream_id: StreamId,
        next: bool,
        complete: bool,
        payload: Payload,
    },
    Error {
        stream_id: StreamId,
        code: ErrorCode,
        message: Bytes,
    },
    MetadataPush {
        metadata: Bytes,
    },
    Resume {
        version: ProtocolVersion,
        token: ResumeToken,
        last_received_server_position: u64,
        first_available_client_position: u64,
    },
    ResumeOk {
        last_received_client_position: u64,
    },
}

impl Frame {
    /// The kind tag of this frame.
    #[must_use]
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Setup { .. } => FrameKind::Setup,
            Self::Lease { .. } => FrameKind::Lease,
            Self::Keepalive { .. } => FrameKind::Keepalive,
            Self::RequestResponse { .. } => FrameKind::RequestResponse,
            Self::RequestFnf { .. } => FrameKind::RequestFnf,
            Self::RequestStream { .. } => FrameKind::RequestStream,
            Self::RequestChannel { .. } => FrameKind::RequestChannel,
            Self::RequestN { .. } => FrameKind::RequestN,
            Self::Cancel { .. } => FrameKind::Cancel,
            Self::Payload { .. } => FrameKind::Payload,
            Self::Error { .. } => FrameKind::Error,
            Self::MetadataPush { .. } => FrameKind::MetadataPush,
            Self::Resume { .. } => FrameKind::Resume,
            Self::ResumeOk { .. } => FrameKind::ResumeOk,
        }
    }

    /// The stream id this frame addresses; connection frames address zero.
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::RequestResponse { stream_id, .. }
            | Self::RequestFnf { stream_id, .. }
            | Self::RequestStream { stream_id, .. }
            | Self::RequestChannel { stream_id, .. }
            | Self::RequestN { stream_id, .. }
            | Self::Cancel { stream_id }
            | Self::Payload { stream_id, .. }
            | Self::Error { stream_id, .. } => *stream_id,
            _ => 0,
        }
    }

    /// A connection-level ERROR frame (stream 0).
    #[must_use]
    pub fn connection_error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            stream_id: 0,
            code,
            message: Bytes::from(message.into()),
        }
    }

    /// A stream-level ERROR frame.
    #[must_use]
    pub fn stream_error(stream_id: StreamId, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            stream_id,
            code,
            message: Bytes::from(message.into()),
        }
    }

    /// A standalone completion frame: PAYLOAD with COMPLETE set and no data.
    #[must_use]
    pub fn payload_complete(stream_id: StreamId) -> Self {
        Self::Payload {
            stream_id,
            next: false,
            complete: true,
            payload: Payload::empty(),
        }
    }

    /// The ERROR frame message interpreted as UTF-8, lossily.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Error { message, .. } => Some(String::from_utf8_lossy(message).into_owned()),
            _ => None,
        }
    }
}
