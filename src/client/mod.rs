//! Realtime synchronization client
//!
//! One [`ConnectionManager`] per logical client owns at most one live
//! [`Connection`]. Each connection is a single task that owns its socket and
//! its [`SessionSnapshot`]; inbound frames go through the [`MessageRouter`],
//! the countdown is smoothed by the [`TimerSyncEngine`], and closes are judged
//! by the [`ReconnectPolicy`]. Room displays pair with a group through
//! [`RoomcastPairing`].

mod connection;
pub mod reconnect;
mod roomcast;
pub mod router;
pub mod state;
pub mod timer;

pub use connection::{channel_url, Connection, ConnectionManager};
pub use reconnect::{CloseReason, ReconnectPolicy, RetryDecision};
pub use roomcast::{normalize_code, GroupSlot, RoomcastPairing};
pub use router::MessageRouter;
pub use state::{
    ChatLine, ConnectionStatus, Failure, GroupInfo, Navigation, Prompt, QuizState,
    RegistrationRejected, ResponseEntry, ResponseProgress, RoomcastView, SessionSnapshot,
    Submission, SummaryState,
};
pub use timer::{TimerState, TimerSyncEngine};

use crate::api::ApiError;
use crate::protocol::ProtocolError;
use std::fmt;
use thiserror::Error;

/// Who is on the other end of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Participant,
    Instructor,
    /// Shared room display paired to one group
    Display,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Participant => "participant",
            Role::Instructor => "instructor",
            Role::Display => "display",
        };
        f.write_str(name)
    }
}

/// Credential for the push channel
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// Session token; sent as a cookie, and as a query parameter when configured
    pub token: Option<String>,
}

impl Credentials {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }
}

/// Client-side errors
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,

    #[error("not available on a {0} connection")]
    WrongRole(Role),

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("invalid pairing code `{0}`")]
    InvalidCode(String),

    #[error("pairing code {0} not found")]
    CodeNotFound(String),

    #[error("pairing code {0} has expired")]
    CodeExpired(String),

    #[error("group {0} is already connected")]
    GroupTaken(String),

    #[error("group {0} is not part of this session")]
    UnknownGroup(String),

    #[error("registration for {group} rejected: {reason}")]
    RegistrationRejected { group: String, reason: String },

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error(transparent)]
    Failed(#[from] Failure),
}
