//! Room display pairing
//!
//! A display resolves the instructor's pairing code over HTTP, picks one of
//! the groups that no other display holds, then claims it on the push
//! channel with `register_roomcast`.

use super::connection::Connection;
use super::state::ConnectionStatus;
use super::{ClientError, Role};
use crate::api::{ApiClient, ApiError, RoomcastCode};
use crate::protocol::OutboundMessage;
use chrono::Utc;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static CODE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Z0-9]{4,8}$").unwrap());

/// Trim and uppercase a typed code, rejecting anything that cannot be one
pub fn normalize_code(raw: &str) -> Result<String, ClientError> {
    let code = raw.trim().to_ascii_uppercase();
    if CODE_RE.is_match(&code) {
        Ok(code)
    } else {
        Err(ClientError::InvalidCode(raw.trim().to_string()))
    }
}

/// A group as offered to the person setting up a display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSlot {
    pub name: String,
    /// No other display holds this group yet
    pub available: bool,
}

/// Code resolution and group registration for one display
#[derive(Debug, Clone)]
pub struct RoomcastPairing {
    api: ApiClient,
    register_timeout: Duration,
}

impl RoomcastPairing {
    pub fn new(api: ApiClient, register_timeout: Duration) -> Self {
        Self {
            api,
            register_timeout,
        }
    }

    /// Look up a code; unknown and lapsed codes are errors
    pub async fn resolve_code(&self, raw: &str) -> Result<RoomcastCode, ClientError> {
        let code = normalize_code(raw)?;

        let resolved = match self.api.roomcast_code(&code).await {
            Ok(resolved) => resolved,
            Err(ApiError::NotFound(_)) => return Err(ClientError::CodeNotFound(code)),
            Err(ApiError::Expired(_)) => return Err(ClientError::CodeExpired(code)),
            Err(e) => return Err(e.into()),
        };

        if resolved.is_expired_at(Utc::now()) {
            return Err(ClientError::CodeExpired(code));
        }

        tracing::info!(
            "Code {} covers {} groups, {} already connected",
            code,
            resolved.expected_groups.len(),
            resolved.connected_groups.len()
        );
        Ok(resolved)
    }

    /// Every expected group, with the ones already claimed marked unavailable
    pub fn group_slots(code: &RoomcastCode) -> Vec<GroupSlot> {
        code.expected_groups
            .iter()
            .map(|name| GroupSlot {
                name: name.clone(),
                available: !code.connected_groups.contains(name),
            })
            .collect()
    }

    /// Claim `group_name` on an open display connection and wait for the answer
    pub async fn register(
        &self,
        connection: &Connection,
        code: &RoomcastCode,
        group_name: &str,
    ) -> Result<(), ClientError> {
        if connection.role() != Role::Display {
            return Err(ClientError::WrongRole(connection.role()));
        }
        if !code.expected_groups.iter().any(|g| g == group_name) {
            return Err(ClientError::UnknownGroup(group_name.to_string()));
        }

        let live = connection.snapshot();
        if code.connected_groups.iter().any(|g| g == group_name)
            || (live.roomcast.connected_groups.contains(group_name)
                && live.roomcast.registered_group.as_deref() != Some(group_name))
        {
            return Err(ClientError::GroupTaken(group_name.to_string()));
        }

        connection
            .send(OutboundMessage::RegisterRoomcast {
                code: code.code.clone(),
                group_name: group_name.to_string(),
            })
            .await?;

        let settled = connection
            .wait_for(self.register_timeout, "group registration", |snapshot| {
                let registered = snapshot.status == ConnectionStatus::Registered
                    && snapshot.roomcast.registered_group.as_deref() == Some(group_name);
                let rejected = snapshot
                    .roomcast
                    .rejection
                    .as_ref()
                    .is_some_and(|r| r.group_name == group_name);
                registered || rejected || snapshot.failure.is_some()
            })
            .await?;

        if let Some(rejection) = settled
            .roomcast
            .rejection
            .filter(|r| r.group_name == group_name)
        {
            return Err(ClientError::RegistrationRejected {
                group: rejection.group_name,
                reason: rejection
                    .reason
                    .unwrap_or_else(|| "group already connected".to_string()),
            });
        }
        if let Some(failure) = settled.failure {
            return Err(failure.into());
        }

        tracing::info!("Display registered for group {}", group_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(" abcde ").unwrap(), "ABCDE");
        assert_eq!(normalize_code("x7k2").unwrap(), "X7K2");
        assert!(matches!(normalize_code("abc"), Err(ClientError::InvalidCode(_))));
        assert!(normalize_code("ABCDEFGHI").is_err());
        assert!(normalize_code("AB-CD").is_err());
        assert!(normalize_code("").is_err());
    }

    #[test]
    fn test_group_slots_mark_taken_groups() {
        let code = RoomcastCode {
            code: "ABCDE".to_string(),
            expected_groups: vec!["Group1".to_string(), "Group2".to_string()],
            connected_groups: vec!["Group1".to_string()],
            ..RoomcastCode::default()
        };

        let slots = RoomcastPairing::group_slots(&code);
        assert_eq!(
            slots,
            vec![
                GroupSlot {
                    name: "Group1".to_string(),
                    available: false
                },
                GroupSlot {
                    name: "Group2".to_string(),
                    available: true
                },
            ]
        );
    }
}
