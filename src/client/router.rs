//! Message router - inbound message to snapshot transition
//!
//! [`MessageRouter::route`] is a pure reducer: it reads the previous snapshot
//! and returns the next one. Messages meant for another role, and types this
//! client does not know, leave the snapshot as it was.

use super::state::{
    ChatLine, ConnectionStatus, Failure, GroupInfo, Navigation, Prompt, QuizState,
    RegistrationRejected, ResponseEntry, SessionSnapshot, Submission, SummaryState,
};
use super::timer::{TimerState, TimerSyncEngine};
use super::Role;
use crate::protocol::{
    GroupInfoPayload, InboundMessage, InputKind, PromptPayload, ReadyCheckPayload,
};
use chrono::{DateTime, Utc};

const READY_CHECK_STATEMENT: &str = "Ready check: let your instructor know you're here.";

/// Dispatch table for inbound messages
#[derive(Debug, Clone, Default)]
pub struct MessageRouter {
    timer: TimerSyncEngine,
}

impl MessageRouter {
    pub fn new(timer: TimerSyncEngine) -> Self {
        Self { timer }
    }

    /// Apply one inbound message
    pub fn route(
        &self,
        snapshot: &SessionSnapshot,
        message: InboundMessage,
        now: DateTime<Utc>,
    ) -> SessionSnapshot {
        if message.is_display_only() && snapshot.role != Role::Display {
            tracing::debug!("Ignoring display-only message on {} connection", snapshot.role);
            return snapshot.clone();
        }
        if message.is_instructor_only() && snapshot.role != Role::Instructor {
            tracing::debug!("Ignoring instructor-only message on {} connection", snapshot.role);
            return snapshot.clone();
        }

        let mut next = snapshot.clone();

        match message {
            InboundMessage::AuthSuccess => {
                tracing::debug!("Credential accepted");
            }
            InboundMessage::Typing => {
                next.response_pending = true;
            }
            InboundMessage::Message(chat) => {
                next.response_pending = false;
                next.transcript.push(ChatLine {
                    sender: chat.sender,
                    content: chat.content,
                });
            }
            InboundMessage::Prompt(payload) => {
                replace_prompt(&mut next, prompt_from_payload(payload));
            }
            InboundMessage::ReadyCheck(payload) => {
                replace_prompt(&mut next, ready_check_prompt(&payload));
            }
            InboundMessage::GroupInfo(payload) | InboundMessage::RoomcastGroupInfo(payload) => {
                apply_group_info(&mut next, payload);
            }
            InboundMessage::StudentResponseReceived(payload) => {
                next.responses.insert(
                    payload.student_name,
                    ResponseEntry {
                        response: Some(payload.response),
                        timestamp: payload.timestamp,
                    },
                );
            }
            InboundMessage::SummaryGenerationStarted(payload) => {
                next.summary = SummaryState {
                    generating: true,
                    group_name: payload.group_name,
                    ..SummaryState::default()
                };
            }
            InboundMessage::GroupSummary(payload) => {
                let group_name = payload.group_name.or_else(|| next.summary.group_name.take());
                next.summary = SummaryState {
                    generating: false,
                    group_name,
                    text: Some(payload.summary),
                    themes: payload.themes,
                };
            }
            InboundMessage::GroupQuiz(payload) => {
                next.quiz = QuizState {
                    group_name: payload.group_name,
                    mystery_item: Some(payload.mystery_item),
                    categories: payload.categories,
                    correct_answer: payload.correct_category,
                    ..QuizState::default()
                };
            }
            InboundMessage::QuizAnswerResult(payload) => {
                next.quiz.submitted_answer = Some(payload.answer);
                next.quiz.was_correct = Some(payload.correct);
                if payload.correct_answer.is_some() {
                    next.quiz.correct_answer = payload.correct_answer;
                }
            }
            InboundMessage::TimerStarted(payload) => {
                next.timer = self.timer.start(&payload, now);
            }
            InboundMessage::TimerUpdate(payload) => {
                next.timer = self.timer.update(&snapshot.timer, &payload, now);
            }
            InboundMessage::TimerExpired => {
                next.timer = self.timer.expire(&snapshot.timer, now);
            }
            InboundMessage::TimerStopped => {
                next.timer = self.timer.stop();
            }
            InboundMessage::ParticipantReady(payload) => {
                next.ready.insert(payload.student_name);
            }
            InboundMessage::RoomcastConnected(payload) => {
                if payload.code.is_some() {
                    next.roomcast.code = payload.code;
                }
                if !payload.expected_groups.is_empty() {
                    next.roomcast.expected_groups = payload.expected_groups;
                }
                next.roomcast.connected_groups = payload.connected_groups.into_iter().collect();
            }
            InboundMessage::RoomcastRegistered(payload) => {
                next.roomcast
                    .connected_groups
                    .insert(payload.group_name.clone());
                next.roomcast.registered_group = Some(payload.group_name);
                next.roomcast.rejection = None;
                next.status = ConnectionStatus::Registered;
            }
            InboundMessage::RoomcastRegistrationRejected(payload) => {
                tracing::warn!(
                    "Group {} refused by server: {}",
                    payload.group_name,
                    payload.reason.as_deref().unwrap_or("no reason given")
                );
                next.roomcast
                    .connected_groups
                    .insert(payload.group_name.clone());
                next.roomcast.rejection = Some(RegistrationRejected {
                    group_name: payload.group_name,
                    reason: payload.reason,
                });
            }
            InboundMessage::RoomcastNavigation(payload) => {
                next.roomcast.navigation = Some(Navigation::from(payload));
            }
            InboundMessage::Error(payload) => {
                tracing::error!("Server error: {}", payload.message);
                next = next.with_failure(Failure::Server {
                    message: payload.message,
                });
            }
            InboundMessage::Unknown => {}
        }

        next
    }

    /// Advance the countdown between authoritative pushes
    pub fn tick(&self, snapshot: &SessionSnapshot, now: DateTime<Utc>) -> SessionSnapshot {
        let timer = self.timer.tick(&snapshot.timer, now);
        if timer == snapshot.timer {
            return snapshot.clone();
        }
        let mut next = snapshot.clone();
        next.timer = timer;
        next
    }
}

/// A new prompt invalidates everything that belonged to the previous one
fn replace_prompt(next: &mut SessionSnapshot, prompt: Prompt) {
    if next.timer.has_expired() {
        next.timer = TimerState::default();
    }
    next.prompt = Some(prompt);
    next.group = None;
    next.responses.clear();
    next.summary = SummaryState::default();
    next.quiz = QuizState::default();
    next.roomcast.navigation = None;
    next.ready.clear();
}

/// Set the group and add a blank progress entry for every member not yet seen
fn apply_group_info(next: &mut SessionSnapshot, payload: GroupInfoPayload) {
    for member in &payload.members {
        next.responses.entry(member.clone()).or_default();
    }
    next.group = Some(GroupInfo {
        group_name: payload.group_name,
        members: payload.members,
        explanation: payload.explanation,
    });
}

fn prompt_from_payload(payload: PromptPayload) -> Prompt {
    Prompt {
        id: payload.prompt_id,
        statement: payload.statement,
        requires_input: payload.requires_input,
        input_kind: payload.input_type,
        assigned_topic: payload.assigned_topic,
        group_submission_responses: payload
            .group_submission_responses
            .map(|responses| responses.into_iter().map(Submission::from).collect()),
        navigation: payload.navigation.map(Navigation::from),
        system: false,
    }
}

fn ready_check_prompt(payload: &ReadyCheckPayload) -> Prompt {
    Prompt {
        id: payload.check_id.clone(),
        statement: payload
            .message
            .clone()
            .unwrap_or_else(|| READY_CHECK_STATEMENT.to_string()),
        requires_input: true,
        input_kind: InputKind::ReadyCheck,
        assigned_topic: None,
        group_submission_responses: None,
        navigation: None,
        system: true,
    }
}
