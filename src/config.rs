//! Connection configuration.

use tokio::time::Duration;

use crate::{
    frame::ProtocolVersion,
    resume::{DEFAULT_CACHE_LIMIT, ResumeToken},
};

/// Which end of the protocol this connection plays.
///
/// The mode fixes stream-id parity (clients allocate odd ids, servers even),
/// the keepalive direction (clients ping, servers echo), and the resume role.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Client,
    Server,
}

/// Parameters governing one connection.
///
/// Defaults follow common deployments: 5 s keepalive interval, 30 s maximum
/// lifetime, resumption off.
#[derive(Debug)]
pub struct ConnectionConfig {
    pub mode: Mode,
    /// Maintain a resume cache and advertise RESUME_ENABLE in SETUP.
    pub resumable: bool,
    /// Token identifying the session; generated when absent and resumable.
    pub resume_token: Option<ResumeToken>,
    pub keepalive_interval: Duration,
    pub max_lifetime: Duration,
    /// Force a protocol version. Clients default to the current version;
    /// servers autodetect from the first frame.
    pub protocol_version: Option<ProtocolVersion>,
    /// Echoed in SETUP.
    pub metadata_mime_type: String,
    /// Echoed in SETUP.
    pub data_mime_type: String,
    /// Bound on cached outbound bytes held for resumption.
    pub resume_cache_limit: usize,
}

impl ConnectionConfig {
    #[must_use]
    pub fn client() -> Self { Self::new(Mode::Client) }

    #[must_use]
    pub fn server() -> Self { Self::new(Mode::Server) }

    fn new(mode: Mode) -> Self {
        Self {
            mode,
            resumable: false,
            resume_token: None,
            keepalive_interval: Duration::from_secs(5),
            max_lifetime: Duration::from_secs(30),
            protocol_version: None,
            metadata_mime_type: "application/octet-stream".into(),
            data_mime_type: "application/octet-stream".into(),
            resume_cache_limit: DEFAULT_CACHE_LIMIT,
        }
    }

    /// Enable resumption, generating a token if none was supplied.
    #[must_use]
    pub fn resumable(mut self) -> Self {
        self.resumable = true;
        if self.resume_token.is_none() {
            self.resume_token = Some(ResumeToken::generate());
        }
        self
    }

    #[must_use]
    pub fn resume_token(mut self, token: ResumeToken) -> Self {
        self.resumable = true;
        self.resume_token = Some(token);
        self
    }

    #[must_use]
    pub fn keepalive(mut self, interval: Duration, max_lifetime: Duration) -> Self {
        self.keepalive_interval = interval;
        self.max_lifetime = max_lifetime;
        self
    }

    #[must_use]
    pub fn mime_types(
        mut self,
        metadata_mime_type: impl Into<String>,
        data_mime_type: impl Into<String>,
    ) -> Self {
        self.metadata_mime_type = metadata_mime_type.into();
        self.data_mime_type = data_mime_type.into();
        self
    }

    #[must_use]
    pub fn resume_cache_limit(mut self, bytes: usize) -> Self {
        self.resume_cache_limit = bytes;
        self
    }
}
