//! Handling of frames addressed to the connection itself (stream 0).

use log::debug;
use tokio::time::Instant;

use crate::{
    config::Mode,
    error::{Error, ErrorCode},
    frame::Frame,
    stream::StreamSignal,
};

use super::{ConnectionState, core::ConnectionCore};

impl ConnectionCore {
    pub(super) fn handle_connection_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Keepalive {
                respond,
                last_received_position,
                data,
            } => {
                // The peer's last-received position acknowledges cached
                // frames on both roles.
                self.out.resume_mut().reset_up_to(last_received_position);
                match self.config.mode {
                    Mode::Server => {
                        if respond {
                            // The client's ping is the server's liveness
                            // signal.
                            self.keepalive.acknowledged(Instant::now());
                            let implied = self.out.resume().implied_position();
                            self.out.output_or_enqueue(&Frame::Keepalive {
                                respond: false,
                                last_received_position: implied,
                                data,
                            });
                        } else {
                            self.close_with_error(Frame::connection_error(
                                ErrorCode::ConnectionError,
                                "keepalive without respond flag",
                            ));
                        }
                    }
                    Mode::Client => {
                        if respond {
                            self.close_with_error(Frame::connection_error(
                                ErrorCode::ConnectionError,
                                "client received keepalive with respond flag",
                            ));
                        } else {
                            self.keepalive.acknowledged(Instant::now());
                        }
                    }
                }
            }
            Frame::MetadataPush { metadata } => {
                self.responder.handle_metadata_push(metadata);
            }
            Frame::ResumeOk {
                last_received_client_position,
            } => self.handle_resume_ok(last_received_client_position),
            Frame::Resume { .. } => {
                // Live resumes are routed by the acceptor before any
                // connection exists for the transport; one arriving here is
                // addressed at an established session.
                if self.config.mode == Mode::Server {
                    self.close_with_error(Frame::connection_error(
                        ErrorCode::RejectedResume,
                        "cannot resume an established connection",
                    ));
                } else {
                    self.close_with_error(Frame::connection_error(
                        ErrorCode::ConnectionError,
                        "unexpected RESUME frame",
                    ));
                }
            }
            Frame::Error { code, message, .. } => {
                let message = String::from_utf8_lossy(&message).into_owned();
                let error = Error::from_error_frame(code, message);
                debug!("connection error frame: {error}");
                if matches!(code, ErrorCode::ConnectionError | ErrorCode::RejectedResume)
                    && let Some(reply) = self.resume_reply.take()
                {
                    let _ = reply.send(Err(error.clone()));
                }
                self.close(Some(error), StreamSignal::ConnectionError);
            }
            Frame::Setup { .. } => {
                // SETUP belongs to the acceptance layer; post-setup it is a
                // violation.
                self.close_with_error(Frame::connection_error(
                    ErrorCode::ConnectionError,
                    "SETUP on an established connection",
                ));
            }
            other => {
                self.close_with_error(Frame::connection_error(
                    ErrorCode::ConnectionError,
                    format!("unexpected {:?} frame for stream 0", other.kind()),
                ));
            }
        }
    }

    fn handle_resume_ok(&mut self, position: u64) {
        if self.resume_reply.is_none() {
            self.close_with_error(Frame::connection_error(
                ErrorCode::ConnectionError,
                "RESUME_OK while not resuming",
            ));
            return;
        }
        if !self.out.resume().is_position_available(position) {
            let message =
                format!("cannot resume: server position {position} is no longer available");
            if let Some(reply) = self.resume_reply.take() {
                let _ = reply.send(Err(Error::ResumeFailed(message.clone())));
            }
            self.close_with_error(Frame::connection_error(
                ErrorCode::ConnectionError,
                message,
            ));
            return;
        }
        if let Some(reply) = self.resume_reply.take() {
            let _ = reply.send(Ok(()));
        }
        self.out.set_resuming(false);
        self.set_state(ConnectionState::Connected);
        self.out.replay_from_position(position);
        self.out.flush_pending();
        self.keepalive.start(Instant::now());
        log::info!("client resumed from server position {position}");
    }
}
