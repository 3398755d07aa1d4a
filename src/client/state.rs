//! Session snapshot - the single state value consumers read
//!
//! A snapshot is never mutated in place once published. The router and the
//! connection task build a new value for every change and hand it to the
//! watch channel.

use super::timer::TimerState;
use super::Role;
use crate::protocol::{InputKind, NavigationPayload, SubmissionPayload};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// Room display paired to a group
    Registered,
    /// Closed, may come back
    Disconnected,
    /// Closed for good until a manual reconnect
    Error,
}

impl ConnectionStatus {
    /// Whether frames may be sent
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionStatus::Connected | ConnectionStatus::Registered)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Registered => "registered",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(name)
    }
}

/// Why a connection sits in [`ConnectionStatus::Error`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Failure {
    #[error("session credential rejected, sign in again")]
    Reauthenticate,

    #[error("could not reconnect after {attempts} attempts")]
    CouldNotReconnect { attempts: u32 },

    #[error("server error: {message}")]
    Server { message: String },
}

/// One submission shown on a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub student_name: String,
    pub response: String,
    pub timestamp: Option<String>,
}

impl From<SubmissionPayload> for Submission {
    fn from(payload: SubmissionPayload) -> Self {
        Self {
            student_name: payload.student_name,
            response: payload.response,
            timestamp: payload.timestamp,
        }
    }
}

/// One-at-a-time view over a group's submissions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub group_name: Option<String>,
    pub index: usize,
    pub total: usize,
    pub current: Option<Submission>,
}

impl From<NavigationPayload> for Navigation {
    fn from(payload: NavigationPayload) -> Self {
        Self {
            group_name: payload.group_name,
            index: payload.index,
            total: payload.total,
            current: payload.submission.map(Submission::from),
        }
    }
}

/// The current unit of broadcast content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub id: Option<String>,
    pub statement: String,
    pub requires_input: bool,
    pub input_kind: InputKind,
    pub assigned_topic: Option<String>,
    pub group_submission_responses: Option<Vec<Submission>>,
    pub navigation: Option<Navigation>,
    /// Built locally rather than pushed by the server
    pub system: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub group_name: String,
    pub members: Vec<String>,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseEntry {
    /// `None` until the member answers
    pub response: Option<String>,
    pub timestamp: Option<String>,
}

/// Participant name to their answer for the current prompt
pub type ResponseProgress = BTreeMap<String, ResponseEntry>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryState {
    pub generating: bool,
    pub group_name: Option<String>,
    pub text: Option<String>,
    pub themes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuizState {
    pub group_name: Option<String>,
    pub mystery_item: Option<String>,
    pub categories: Vec<String>,
    pub correct_answer: Option<String>,
    pub submitted_answer: Option<String>,
    pub was_correct: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRejected {
    pub group_name: String,
    pub reason: Option<String>,
}

/// What a room display knows about its pairing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomcastView {
    pub code: Option<String>,
    pub expected_groups: Vec<String>,
    pub connected_groups: BTreeSet<String>,
    pub registered_group: Option<String>,
    pub rejection: Option<RegistrationRejected>,
    pub navigation: Option<Navigation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub sender: Option<String>,
    pub content: String,
}

/// Everything one connection knows about the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub role: Role,
    pub status: ConnectionStatus,
    pub attempt: u32,
    pub failure: Option<Failure>,
    pub prompt: Option<Prompt>,
    pub group: Option<GroupInfo>,
    pub timer: TimerState,
    pub responses: ResponseProgress,
    pub summary: SummaryState,
    pub quiz: QuizState,
    pub roomcast: RoomcastView,
    /// A reply is being produced (`typing` seen, no `message` yet)
    pub response_pending: bool,
    pub transcript: Vec<ChatLine>,
    /// Participants that answered the current ready check
    pub ready: BTreeSet<String>,
}

impl SessionSnapshot {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            status: ConnectionStatus::Connecting,
            attempt: 0,
            failure: None,
            prompt: None,
            group: None,
            timer: TimerState::default(),
            responses: ResponseProgress::new(),
            summary: SummaryState::default(),
            quiz: QuizState::default(),
            roomcast: RoomcastView::default(),
            response_pending: false,
            transcript: Vec::new(),
            ready: BTreeSet::new(),
        }
    }

    /// Copy with a new status; leaving `Error` clears the failure
    pub fn with_status(&self, status: ConnectionStatus) -> Self {
        let mut next = self.clone();
        next.status = status;
        if status != ConnectionStatus::Error {
            next.failure = None;
        }
        next
    }

    /// Copy parked in `Error`
    pub fn with_failure(&self, failure: Failure) -> Self {
        let mut next = self.clone();
        next.status = ConnectionStatus::Error;
        next.failure = Some(failure);
        next
    }

    pub fn with_attempt(&self, attempt: u32) -> Self {
        let mut next = self.clone();
        next.attempt = attempt;
        next
    }
}
