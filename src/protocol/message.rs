//! Message types for the promptcast push channel
//!
//! Every payload field is optional on the wire. Older and newer servers omit
//! or add fields freely, so payload structs default everything they hold.

use serde::{Deserialize, Deserializer, Serialize};

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// A chat turn from a participant
    Chat { message: String },

    /// Heartbeat, no payload
    Ping,

    /// Claim a group slot for a room display
    RegisterRoomcast { code: String, group_name: String },

    /// Submit the group's edited summary
    SubmitSummary { group_name: String, summary: String },

    /// Submit the group's answer to the category quiz
    SubmitQuizAnswer { group_name: String, answer: String },

    /// Answer a ready check
    Ready { ready: bool },
}

impl OutboundMessage {
    /// Wire name of this message, as carried in the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Chat { .. } => "chat",
            OutboundMessage::Ping => "ping",
            OutboundMessage::RegisterRoomcast { .. } => "register_roomcast",
            OutboundMessage::SubmitSummary { .. } => "submit_summary",
            OutboundMessage::SubmitQuizAnswer { .. } => "submit_quiz_answer",
            OutboundMessage::Ready { .. } => "ready",
        }
    }
}

/// Messages pushed from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Credential accepted
    AuthSuccess,

    /// A response is being produced for the participant
    Typing,

    /// New broadcast prompt
    Prompt(PromptPayload),

    /// Group assignment for the current prompt
    GroupInfo(GroupInfoPayload),

    /// One participant answered the current prompt
    StudentResponseReceived(StudentResponsePayload),

    /// Summary generation kicked off for a group
    SummaryGenerationStarted(GroupRefPayload),

    /// Generated group summary
    GroupSummary(GroupSummaryPayload),

    TimerStarted(TimerPayload),
    TimerUpdate(TimerPayload),
    TimerExpired,
    TimerStopped,

    /// Instructor asked everyone to confirm presence
    ReadyCheck(ReadyCheckPayload),

    /// Chat reply
    Message(ChatPayload),

    /// Category quiz for a group
    GroupQuiz(QuizPayload),

    /// Outcome of a submitted quiz answer
    QuizAnswerResult(QuizResultPayload),

    /// A participant answered the ready check (instructor only)
    ParticipantReady(ParticipantPayload),

    /// Group slots currently claimed on a roomcast code (display only)
    RoomcastConnected(RoomcastGroupsPayload),

    /// This display now owns a group slot (display only)
    RoomcastRegistered(RoomcastRegisteredPayload),

    /// The server refused a group slot (display only)
    RoomcastRegistrationRejected(RoomcastRejectedPayload),

    /// Group membership for the paired group (display only)
    RoomcastGroupInfo(GroupInfoPayload),

    /// One submission revealed under navigation control (display only)
    RoomcastNavigation(NavigationPayload),

    /// Server-side failure
    Error(ErrorPayload),

    /// Any type this client does not know about
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Whether only room displays act on this message
    pub fn is_display_only(&self) -> bool {
        matches!(
            self,
            InboundMessage::RoomcastConnected(_)
                | InboundMessage::RoomcastRegistered(_)
                | InboundMessage::RoomcastRegistrationRejected(_)
                | InboundMessage::RoomcastGroupInfo(_)
                | InboundMessage::RoomcastNavigation(_)
        )
    }

    /// Whether only instructors act on this message
    pub fn is_instructor_only(&self) -> bool {
        matches!(self, InboundMessage::ParticipantReady(_))
    }
}

/// Kind of input a prompt expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    #[default]
    None,
    Text,
    Code,
    MultipleChoice,
    Summary,
    Quiz,
    ReadyCheck,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptPayload {
    #[serde(alias = "id")]
    pub prompt_id: Option<String>,
    #[serde(alias = "text", alias = "question")]
    #[serde(deserialize_with = "null_as_default")]
    pub statement: String,
    #[serde(deserialize_with = "null_as_default")]
    pub requires_input: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub input_type: InputKind,
    pub assigned_topic: Option<String>,
    pub group_submission_responses: Option<Vec<SubmissionPayload>>,
    pub navigation: Option<NavigationPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionPayload {
    #[serde(deserialize_with = "null_as_default")]
    pub student_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub response: String,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationPayload {
    pub group_name: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub index: usize,
    #[serde(deserialize_with = "null_as_default")]
    pub total: usize,
    pub submission: Option<SubmissionPayload>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupInfoPayload {
    #[serde(deserialize_with = "null_as_default")]
    pub group_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub members: Vec<String>,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentResponsePayload {
    #[serde(deserialize_with = "null_as_default")]
    pub student_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub response: String,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupRefPayload {
    pub group_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSummaryPayload {
    pub group_name: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub summary: String,
    #[serde(deserialize_with = "null_as_default")]
    pub themes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerPayload {
    #[serde(alias = "duration")]
    pub duration_seconds: Option<u32>,
    #[serde(alias = "remaining")]
    pub remaining_seconds: Option<u32>,
    pub start_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadyCheckPayload {
    pub check_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatPayload {
    pub sender: Option<String>,
    #[serde(alias = "message")]
    #[serde(deserialize_with = "null_as_default")]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuizPayload {
    pub group_name: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub mystery_item: String,
    #[serde(deserialize_with = "null_as_default")]
    pub categories: Vec<String>,
    pub correct_category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuizResultPayload {
    #[serde(deserialize_with = "null_as_default")]
    pub answer: String,
    #[serde(deserialize_with = "null_as_default")]
    pub correct: bool,
    pub correct_answer: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantPayload {
    #[serde(deserialize_with = "null_as_default")]
    pub student_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomcastGroupsPayload {
    pub code: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub expected_groups: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub connected_groups: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomcastRegisteredPayload {
    #[serde(deserialize_with = "null_as_default")]
    pub group_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomcastRejectedPayload {
    #[serde(deserialize_with = "null_as_default")]
    pub group_name: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPayload {
    #[serde(deserialize_with = "null_as_default")]
    pub message: String,
}

/// An explicit `null` reads the same as an absent field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}
