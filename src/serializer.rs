//! Frame serialization.
//!
//! This module defines the [`Serializer`] seam the connection core consumes
//! and the protocol 1.0 binary codec [`SerializerV1`] shipped as the default.
//! The serializer is chosen explicitly on clients and autodetected from the
//! first inbound SETUP/RESUME frame on servers.
//!
//! Frames handled here never carry the optional 24-bit length prefix; that
//! belongs to the transport layer (see [`crate::transport`]).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    error::{Error, ErrorCode, Result},
    frame::{Frame, FrameFlags, FrameKind, Payload, ProtocolVersion, StreamId},
    resume::ResumeToken,
};

/// Mask selecting the 31-bit stream id.
const STREAM_ID_MASK: u32 = 0x7fff_ffff;
/// Bytes of common header: stream id plus type/flags halfword.
const HEADER_LEN: usize = 6;

/// Serializes and deserializes frames for one protocol version.
///
/// Object-safe: the connection stores `Box<dyn Serializer>` because servers
/// pick the implementation at runtime from the first inbound frame.
pub trait Serializer: Send + Sync {
    /// The protocol version this serializer speaks.
    fn protocol_version(&self) -> ProtocolVersion;

    /// Read the frame kind without decoding. `None` when the header is
    /// truncated or the kind code is from a future protocol revision.
    fn peek_kind(&self, bytes: &[u8]) -> Option<FrameKind>;

    /// Read the stream id without decoding. `None` when the header is
    /// truncated.
    fn peek_stream_id(&self, bytes: &[u8]) -> Option<StreamId>;

    /// Serialize a frame. `resumable` tells the codec whether the connection
    /// tracks resume positions; protocol 1.0 encodes positions regardless,
    /// but the seam carries the bit for older revisions.
    fn serialize(&self, frame: &Frame, resumable: bool) -> Bytes;

    /// Decode a frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFrame`] on truncated or malformed input and
    /// [`Error::UnexpectedFrame`] for kind codes this version cannot decode.
    fn deserialize(&self, bytes: Bytes) -> Result<Frame>;
}

/// Detect a serializer from the first frame of a connection.
///
/// Servers call this before any serializer is set: the leading SETUP or
/// RESUME frame carries the version in a fixed spot. Returns `None` when the
/// frame is neither, is truncated, or names a version this crate cannot
/// speak.
#[must_use]
pub fn autodetect(first_frame: &[u8]) -> Option<Box<dyn Serializer>> {
    let codec = SerializerV1;
    let kind = codec.peek_kind(first_frame)?;
    if !matches!(kind, FrameKind::Setup | FrameKind::Resume) {
        return None;
    }
    if first_frame.len() < HEADER_LEN + 4 {
        return None;
    }
    let major = u16::from_be_bytes([first_frame[6], first_frame[7]]);
    let minor = u16::from_be_bytes([first_frame[8], first_frame[9]]);
    (ProtocolVersion { major, minor } == ProtocolVersion::CURRENT)
        .then(|| Box::new(SerializerV1) as Box<dyn Serializer>)
}

/// The protocol 1.0 binary codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerializerV1;

impl Serializer for SerializerV1 {
    fn protocol_version(&self) -> ProtocolVersion { ProtocolVersion::CURRENT }

    fn peek_kind(&self, bytes: &[u8]) -> Option<FrameKind> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let halfword = u16::from_be_bytes([bytes[4], bytes[5]]);
        FrameKind::from_wire((halfword >> 10) as u8)
    }

    fn peek_stream_id(&self, bytes: &[u8]) -> Option<StreamId> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) & STREAM_ID_MASK)
    }

    fn serialize(&self, frame: &Frame, _resumable: bool) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + 32);
        match frame {
            Frame::Setup {
                version,
                keepalive_interval_ms,
                max_lifetime_ms,
                resume_token,
                metadata_mime_type,
                data_mime_type,
                payload,
            } => {
                let mut flags = payload_flags(payload);
                if resume_token.is_some() {
                    flags |= FrameFlags::RESUME_ENABLE;
                }
                put_header(&mut buf, 0, FrameKind::Setup, flags);
                buf.put_u16(version.major);
                buf.put_u16(version.minor);
                buf.put_u32(*keepalive_interval_ms);
                buf.put_u32(*max_lifetime_ms);
                if let Some(token) = resume_token {
                    put_token(&mut buf, token);
                }
                put_mime(&mut buf, metadata_mime_type);
                put_mime(&mut buf, data_mime_type);
                put_payload(&mut buf, payload);
            }
            Frame::Lease {
                ttl_ms,
                number_of_requests,
                metadata,
            } => {
                let flags = match metadata {
                    Some(_) => FrameFlags::METADATA,
                    None => FrameFlags::EMPTY,
                };
                put_header(&mut buf, 0, FrameKind::Lease, flags);
                buf.put_u32(*ttl_ms);
                buf.put_u32(*number_of_requests);
                if let Some(metadata) = metadata {
                    buf.put_slice(metadata);
                }
            }
            Frame::Keepalive {
                respond,
                last_received_position,
                data,
            } => {
                let flags = if *respond {
                    FrameFlags::RESPOND
                } else {
                    FrameFlags::EMPTY
                };
                put_header(&mut buf, 0, FrameKind::Keepalive, flags);
                buf.put_u64(*last_received_position);
                buf.put_slice(data);
            }
            Frame::RequestResponse { stream_id, payload } => {
                put_header(
                    &mut buf,
                    *stream_id,
                    FrameKind::RequestResponse,
                    payload_flags(payload),
                );
                put_payload(&mut buf, payload);
            }
            Frame::RequestFnf { stream_id, payload } => {
                put_header(&mut buf, *stream_id, FrameKind::RequestFnf, payload_flags(payload));
                put_payload(&mut buf, payload);
            }
            Frame::RequestStream {
                stream_id,
                initial_request_n,
                payload,
            } => {
                put_header(
                    &mut buf,
                    *stream_id,
                    FrameKind::RequestStream,
                    payload_flags(payload),
                );
                buf.put_u32(*initial_request_n);
                put_payload(&mut buf, payload);
            }
            Frame::RequestChannel {
                stream_id,
                complete,
                initial_request_n,
                payload,
            } => {
                let mut flags = payload_flags(payload);
                if *complete {
                    flags |= FrameFlags::COMPLETE;
                }
                put_header(&mut buf, *stream_id, FrameKind::RequestChannel, flags);
                buf.put_u32(*initial_request_n);
                put_payload(&mut buf, payload);
            }
            Frame::RequestN { stream_id, n } => {
                put_header(&mut buf, *stream_id, FrameKind::RequestN, FrameFlags::EMPTY);
                buf.put_u32(*n);
            }
            Frame::Cancel { stream_id } => {
                put_header(&mut buf, *stream_id, FrameKind::Cancel, FrameFlags::EMPTY);
            }
            Frame::Payload {
                stream_id,
                next,
                complete,
                payload,
            } => {
                let mut flags = payload_flags(payload);
                if *next {
                    flags |= FrameFlags::NEXT;
                }
                if *complete {
                    flags |= FrameFlags::COMPLETE;
                }
                put_header(&mut buf, *stream_id, FrameKind::Payload, flags);
                put_payload(&mut buf, payload);
            }
            Frame::Error {
                stream_id,
                code,
                message,
            } => {
                put_header(&mut buf, *stream_id, FrameKind::Error, FrameFlags::EMPTY);
                buf.put_u32(*code as u32);
                buf.put_slice(message);
            }
            Frame::MetadataPush { metadata } => {
                put_header(&mut buf, 0, FrameKind::MetadataPush, FrameFlags::METADATA);
                buf.put_slice(metadata);
            }
            Frame::Resume {
                version,
                token,
                last_received_server_position,
                first_available_client_position,
            } => {
                put_header(&mut buf, 0, FrameKind::Resume, FrameFlags::EMPTY);
                buf.put_u16(version.major);
                buf.put_u16(version.minor);
                put_token(&mut buf, token);
                buf.put_u64(*last_received_server_position);
                buf.put_u64(*first_available_client_position);
            }
            Frame::ResumeOk {
                last_received_client_position,
            } => {
                put_header(&mut buf, 0, FrameKind::ResumeOk, FrameFlags::EMPTY);
                buf.put_u64(*last_received_client_position);
            }
        }
        buf.freeze()
    }

    fn deserialize(&self, mut bytes: Bytes) -> Result<Frame> {
        let (stream_id, kind, flags) = read_header(&mut bytes)?;
        let frame = match kind {
            FrameKind::Setup => {
                let version = read_version(&mut bytes)?;
                let keepalive_interval_ms = read_u32(&mut bytes)?;
                let max_lifetime_ms = read_u32(&mut bytes)?;
                let resume_token = if flags.contains(FrameFlags::RESUME_ENABLE) {
                    Some(read_token(&mut bytes)?)
                } else {
                    None
                };
                let metadata_mime_type = read_mime(&mut bytes)?;
                let data_mime_type = read_mime(&mut bytes)?;
                let payload = read_payload(&mut bytes, flags)?;
                Frame::Setup {
                    version,
                    keepalive_interval_ms,
                    max_lifetime_ms,
                    resume_token,
                    metadata_mime_type,
                    data_mime_type,
                    payload,
                }
            }
            FrameKind::Lease => {
                let ttl_ms = read_u32(&mut bytes)?;
                let number_of_requests = read_u32(&mut bytes)?;
                let metadata = flags.contains(FrameFlags::METADATA).then(|| bytes.clone());
                Frame::Lease {
                    ttl_ms,
                    number_of_requests,
                    metadata,
                }
            }
            FrameKind::Keepalive => Frame::Keepalive {
                respond: flags.contains(FrameFlags::RESPOND),
                last_received_position: read_u64(&mut bytes)?,
                data: bytes,
            },
            FrameKind::RequestResponse => Frame::RequestResponse {
                stream_id,
                payload: read_payload(&mut bytes, flags)?,
            },
            FrameKind::RequestFnf => Frame::RequestFnf {
                stream_id,
                payload: read_payload(&mut bytes, flags)?,
            },
            FrameKind::RequestStream => Frame::RequestStream {
                stream_id,
                initial_request_n: read_u32(&mut bytes)?,
                payload: read_payload(&mut bytes, flags)?,
            },
            FrameKind::RequestChannel => Frame::RequestChannel {
                stream_id,
                complete: flags.contains(FrameFlags::COMPLETE),
                initial_request_n: read_u32(&mut bytes)?,
                payload: read_payload(&mut bytes, flags)?,
            },
            FrameKind::RequestN => Frame::RequestN {
                stream_id,
                n: read_u32(&mut bytes)?,
            },
            FrameKind::Cancel => Frame::Cancel { stream_id },
            FrameKind::Payload => Frame::Payload {
                stream_id,
                next: flags.contains(FrameFlags::NEXT),
                complete: flags.contains(FrameFlags::COMPLETE),
                payload: read_payload(&mut bytes, flags)?,
            },
            FrameKind::Error => Frame::Error {
                stream_id,
                code: ErrorCode::from_wire(read_u32(&mut bytes)?),
                message: bytes,
            },
            FrameKind::MetadataPush => Frame::MetadataPush { metadata: bytes },
            FrameKind::Resume => {
                let version = read_version(&mut bytes)?;
                let token = read_token(&mut bytes)?;
                Frame::Resume {
                    version,
                    token,
                    last_received_server_position: read_u64(&mut bytes)?,
                    first_available_client_position: read_u64(&mut bytes)?,
                }
            }
            FrameKind::ResumeOk => Frame::ResumeOk {
                last_received_client_position: read_u64(&mut bytes)?,
            },
            FrameKind::Reserved | FrameKind::Ext => {
                return Err(Error::UnexpectedFrame(format!(
                    "cannot decode {kind:?} frame"
                )));
            }
        };
        Ok(frame)
    }
}

fn put_header(buf: &mut BytesMut, stream_id: StreamId, kind: FrameKind, flags: FrameFlags) {
    buf.put_u32(stream_id & STREAM_ID_MASK);
    buf.put_u16(((kind as u16) << 10) | flags.bits());
}

fn payload_flags(payload: &Payload) -> FrameFlags {
    match payload.metadata {
        Some(_) => FrameFlags::METADATA,
        None => FrameFlags::EMPTY,
    }
}

fn put_token(buf: &mut BytesMut, token: &ResumeToken) {
    let token = token.as_bytes();
    let len = u16::try_from(token.len()).unwrap_or(u16::MAX);
    buf.put_u16(len);
    buf.put_slice(&token[..usize::from(len)]);
}

fn put_mime(buf: &mut BytesMut, mime: &str) {
    let len = u8::try_from(mime.len()).unwrap_or(u8::MAX);
    buf.put_u8(len);
    buf.put_slice(&mime.as_bytes()[..usize::from(len)]);
}

/// Write the metadata-length-prefixed payload section. The data part is the
/// frame remainder and carries no length of its own.
fn put_payload(buf: &mut BytesMut, payload: &Payload) {
    if let Some(metadata) = &payload.metadata {
        put_u24(buf, metadata.len());
        buf.put_slice(metadata);
    }
    buf.put_slice(&payload.data);
}

fn put_u24(buf: &mut BytesMut, value: usize) {
    let value = u32::try_from(value).unwrap_or(0x00ff_ffff).min(0x00ff_ffff);
    buf.put_u8((value >> 16) as u8);
    buf.put_u8((value >> 8) as u8);
    buf.put_u8(value as u8);
}

fn truncated(what: &str) -> Error { Error::InvalidFrame(format!("truncated {what}")) }

fn read_header(bytes: &mut Bytes) -> Result<(StreamId, FrameKind, FrameFlags)> {
    if bytes.remaining() < HEADER_LEN {
        return Err(truncated("frame header"));
    }
    let stream_id = bytes.get_u32() & STREAM_ID_MASK;
    let halfword = bytes.get_u16();
    let kind = FrameKind::from_wire((halfword >> 10) as u8)
        .ok_or_else(|| Error::InvalidFrame(format!("unknown frame kind {:#x}", halfword >> 10)))?;
    Ok((stream_id, kind, FrameFlags::from_bits(halfword)))
}

fn read_u32(bytes: &mut Bytes) -> Result<u32> {
    if bytes.remaining() < 4 {
        return Err(truncated("u32 field"));
    }
    Ok(bytes.get_u32())
}

fn read_u64(bytes: &mut Bytes) -> Result<u64> {
    if bytes.remaining() < 8 {
        return Err(truncated("u64 field"));
    }
    Ok(bytes.get_u64())
}

fn read_version(bytes: &mut Bytes) -> Result<ProtocolVersion> {
    if bytes.remaining() < 4 {
        return Err(truncated("protocol version"));
    }
    Ok(ProtocolVersion {
        major: bytes.get_u16(),
        minor: bytes.get_u16(),
    })
}

fn read_token(bytes: &mut Bytes) -> Result<ResumeToken> {
    if bytes.remaining() < 2 {
        return Err(truncated("resume token length"));
    }
    let len = usize::from(bytes.get_u16());
    if bytes.remaining() < len {
        return Err(truncated("resume token"));
    }
    Ok(ResumeToken::from_bytes(bytes.split_to(len)))
}

fn read_mime(bytes: &mut Bytes) -> Result<String> {
    if bytes.remaining() < 1 {
        return Err(truncated("mime type length"));
    }
    let len = usize::from(bytes.get_u8());
    if bytes.remaining() < len {
        return Err(truncated("mime type"));
    }
    let raw = bytes.split_to(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| Error::InvalidFrame("mime type is not UTF-8".into()))
}

fn read_payload(bytes: &mut Bytes, flags: FrameFlags) -> Result<Payload> {
    let metadata = if flags.contains(FrameFlags::METADATA) {
        if bytes.remaining() < 3 {
            return Err(truncated("metadata length"));
        }
        let len = (usize::from(bytes.get_u8()) << 16)
            | (usize::from(bytes.get_u8()) << 8)
            | usize::from(bytes.get_u8());
        if bytes.remaining() < len {
            return Err(truncated("metadata"));
        }
        Some(bytes.split_to(len))
    } else {
        None
    };
    Ok(Payload {
        metadata,
        data: bytes.clone(),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn roundtrip(frame: Frame) -> Frame {
        let codec = SerializerV1;
        let bytes = codec.serialize(&frame, true);
        assert_eq!(codec.peek_kind(&bytes), Some(frame.kind()));
        assert_eq!(codec.peek_stream_id(&bytes), Some(frame.stream_id()));
        codec.deserialize(bytes).expect("frame must decode")
    }

    #[test]
    fn setup_roundtrip_with_resume_token() {
        let frame = Frame::Setup {
            version: ProtocolVersion::CURRENT,
            keepalive_interval_ms: 5_000,
            max_lifetime_ms: 30_000,
            resume_token: Some(ResumeToken::from_bytes(&b"tok-1"[..])),
            metadata_mime_type: "application/octet-stream".into(),
            data_mime_type: "text/plain".into(),
            payload: Payload::with_metadata(&b"md"[..], &b"hello"[..]),
        };
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn setup_without_token_omits_resume_section() {
        let frame = Frame::Setup {
            version: ProtocolVersion::CURRENT,
            keepalive_interval_ms: 1,
            max_lifetime_ms: 2,
            resume_token: None,
            metadata_mime_type: String::new(),
            data_mime_type: String::new(),
            payload: Payload::new(&b""[..]),
        };
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[rstest]
    #[case(Frame::RequestResponse { stream_id: 1, payload: Payload::from("ping") })]
    #[case(Frame::RequestFnf { stream_id: 3, payload: Payload::from("fire") })]
    #[case(Frame::RequestStream { stream_id: 5, initial_request_n: 3, payload: Payload::from("Bob") })]
    #[case(Frame::RequestChannel { stream_id: 7, complete: true, initial_request_n: 1, payload: Payload::from("c") })]
    #[case(Frame::RequestN { stream_id: 5, n: 7 })]
    #[case(Frame::Cancel { stream_id: 9 })]
    #[case(Frame::Payload { stream_id: 1, next: true, complete: true, payload: Payload::from("pong") })]
    #[case(Frame::Keepalive { respond: true, last_received_position: 99, data: Bytes::from_static(b"hb") })]
    #[case(Frame::MetadataPush { metadata: Bytes::from_static(b"routing") })]
    #[case(Frame::ResumeOk { last_received_client_position: 1234 })]
    fn frame_roundtrips(#[case] frame: Frame) {
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn resume_roundtrip() {
        let frame = Frame::Resume {
            version: ProtocolVersion::CURRENT,
            token: ResumeToken::from_bytes(&b"session"[..]),
            last_received_server_position: 10,
            first_available_client_position: 0,
        };
        assert_eq!(roundtrip(frame.clone()), frame);
    }

    #[test]
    fn error_frame_wire_code_survives() {
        let frame = Frame::stream_error(4, ErrorCode::ApplicationError, "boom");
        let decoded = roundtrip(frame);
        let Frame::Error { code, message, .. } = decoded else {
            panic!("expected ERROR frame");
        };
        assert_eq!(code, ErrorCode::ApplicationError);
        assert_eq!(message.as_ref(), b"boom");
    }

    #[test]
    fn header_layout_is_bit_exact() {
        let bytes = SerializerV1.serialize(
            &Frame::Payload {
                stream_id: 0x0102_0304,
                next: true,
                complete: false,
                payload: Payload::new(&b"z"[..]),
            },
            true,
        );
        assert_eq!(&bytes[..4], &[0x01, 0x02, 0x03, 0x04]);
        // Kind 0x0a in the top six bits, NEXT (0x020) in the flag bits.
        let halfword = u16::from_be_bytes([bytes[4], bytes[5]]);
        assert_eq!(halfword >> 10, 0x0a);
        assert_eq!(halfword & 0x3ff, 0x020);
        assert_eq!(&bytes[6..], b"z");
    }

    #[test]
    fn truncated_frames_are_invalid() {
        let codec = SerializerV1;
        let bytes = codec.serialize(
            &Frame::ResumeOk {
                last_received_client_position: 7,
            },
            true,
        );
        let result = codec.deserialize(bytes.slice(..bytes.len() - 2));
        assert!(matches!(result, Err(Error::InvalidFrame(_))));
        assert!(codec.peek_kind(&[0, 0, 0]).is_none());
    }

    #[test]
    fn autodetect_accepts_current_setup_only() {
        let codec = SerializerV1;
        let setup = codec.serialize(
            &Frame::Setup {
                version: ProtocolVersion::CURRENT,
                keepalive_interval_ms: 1,
                max_lifetime_ms: 2,
                resume_token: None,
                metadata_mime_type: String::new(),
                data_mime_type: String::new(),
                payload: Payload::empty(),
            },
            false,
        );
        assert!(autodetect(&setup).is_some());

        let payload = codec.serialize(
            &Frame::Payload {
                stream_id: 1,
                next: true,
                complete: false,
                payload: Payload::empty(),
            },
            false,
        );
        assert!(autodetect(&payload).is_none());

        let unknown_version = codec.serialize(
            &Frame::Setup {
                version: ProtocolVersion { major: 9, minor: 9 },
                keepalive_interval_ms: 1,
                max_lifetime_ms: 2,
                resume_token: None,
                metadata_mime_type: String::new(),
                data_mime_type: String::new(),
                payload: Payload::empty(),
            },
            false,
        );
        assert!(autodetect(&unknown_version).is_none());
    }
}
