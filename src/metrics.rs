//! Metric helpers for `resock`.
//!
//! This module defines metric names and helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. All functions become no-ops
//! if the optional `metrics` Cargo feature is disabled.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking open connections.
pub const CONNECTIONS_ACTIVE: &str = "resock_connections_active";
/// Name of the counter tracking frames sent to transports.
pub const FRAMES_SENT: &str = "resock_frames_sent_total";
/// Name of the counter tracking frames received from transports.
pub const FRAMES_RECEIVED: &str = "resock_frames_received_total";
/// Name of the counter tracking connection-level protocol errors.
pub const PROTOCOL_ERRORS: &str = "resock_protocol_errors_total";

/// Record a connection entering service.
pub(crate) fn connection_opened() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a connection reaching its terminal state.
pub(crate) fn connection_closed() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record one frame reaching the transport's outbound queue.
pub(crate) fn frame_sent() {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_SENT).increment(1);
}

/// Record one frame arriving from the transport.
pub(crate) fn frame_received() {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_RECEIVED).increment(1);
}

/// Record a protocol violation that closes the connection.
pub(crate) fn protocol_error() {
    #[cfg(feature = "metrics")]
    counter!(PROTOCOL_ERRORS).increment(1);
}
