//! Countdown synchronization
//!
//! The server pushes coarse authoritative values (`timer_started`,
//! `timer_update`); between them the client ticks locally. Each tick computes
//! two predictions, one from the authoritative start time and one from the
//! last sync, and picks between them so a single noisy update cannot yank the
//! display around while genuine corrections are still followed smoothly.

use crate::config::TimerConfig;
use crate::protocol::TimerPayload;
use chrono::{DateTime, NaiveDateTime, Utc};

/// Countdown state carried in the session snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerState {
    pub active: bool,
    pub duration_seconds: u32,
    pub remaining_seconds: u32,
    /// Authoritative start, always UTC
    pub start_time: Option<DateTime<Utc>>,
    last_sync_at: Option<DateTime<Utc>>,
    last_server_remaining: Option<u32>,
}

impl TimerState {
    /// An active countdown that has hit zero
    pub fn has_expired(&self) -> bool {
        self.active && self.remaining_seconds == 0
    }
}

/// Applies authoritative pushes and local ticks to a [`TimerState`]
#[derive(Debug, Clone)]
pub struct TimerSyncEngine {
    drift_tolerance_ms: i64,
}

impl Default for TimerSyncEngine {
    fn default() -> Self {
        Self::from_config(&TimerConfig::default())
    }
}

impl TimerSyncEngine {
    pub fn from_config(config: &TimerConfig) -> Self {
        Self {
            drift_tolerance_ms: config.drift_tolerance_secs.saturating_mul(1000),
        }
    }

    /// `timer_started`: a fresh countdown replaces whatever was running
    pub fn start(&self, payload: &TimerPayload, now: DateTime<Utc>) -> TimerState {
        let duration = payload
            .duration_seconds
            .or(payload.remaining_seconds)
            .unwrap_or(0);
        let remaining = payload.remaining_seconds.unwrap_or(duration);
        let start_time = payload.start_time.as_deref().and_then(parse_server_time);

        if payload.start_time.is_some() && start_time.is_none() {
            tracing::warn!("Unparseable timer start time: {:?}", payload.start_time);
        }

        TimerState {
            active: true,
            duration_seconds: duration,
            remaining_seconds: remaining,
            start_time,
            last_sync_at: Some(now),
            last_server_remaining: Some(remaining),
        }
    }

    /// `timer_update`: only meaningful while a countdown is running
    pub fn update(
        &self,
        timer: &TimerState,
        payload: &TimerPayload,
        now: DateTime<Utc>,
    ) -> TimerState {
        if !timer.active {
            tracing::debug!("Ignoring timer_update for inactive timer");
            return timer.clone();
        }
        let Some(server_remaining) = payload.remaining_seconds else {
            return timer.clone();
        };

        let mut next = timer.clone();
        next.remaining_seconds = timer.remaining_seconds.min(server_remaining);
        next.last_sync_at = Some(now);
        next.last_server_remaining = Some(server_remaining);
        if let Some(duration) = payload.duration_seconds {
            next.duration_seconds = duration;
        }
        if let Some(start) = payload.start_time.as_deref().and_then(parse_server_time) {
            next.start_time = Some(start);
        }
        next
    }

    /// `timer_expired`: pin the countdown at zero, leave `active` alone
    pub fn expire(&self, timer: &TimerState, now: DateTime<Utc>) -> TimerState {
        let mut next = timer.clone();
        next.remaining_seconds = 0;
        next.last_sync_at = Some(now);
        next.last_server_remaining = Some(0);
        next
    }

    /// `timer_stopped`
    pub fn stop(&self) -> TimerState {
        TimerState::default()
    }

    /// Local tick between authoritative pushes
    pub fn tick(&self, timer: &TimerState, now: DateTime<Utc>) -> TimerState {
        if !timer.active || timer.remaining_seconds == 0 {
            return timer.clone();
        }

        let Some(predicted_ms) = self.predict_remaining_ms(timer, now) else {
            return timer.clone();
        };

        let mut next = timer.clone();
        next.remaining_seconds = timer.remaining_seconds.min(ms_to_display_secs(predicted_ms));
        next
    }

    fn predict_remaining_ms(&self, timer: &TimerState, now: DateTime<Utc>) -> Option<i64> {
        let from_sync = match (timer.last_sync_at, timer.last_server_remaining) {
            (Some(synced_at), Some(server_remaining)) => Some(
                i64::from(server_remaining) * 1000 - (now - synced_at).num_milliseconds(),
            ),
            _ => None,
        };
        let from_start = timer.start_time.map(|start| {
            i64::from(timer.duration_seconds) * 1000 - (now - start).num_milliseconds()
        });

        match (from_start, from_sync) {
            (Some(start_ms), Some(sync_ms)) => {
                if (start_ms - sync_ms).abs() > self.drift_tolerance_ms {
                    tracing::debug!(
                        "Timer drift {}ms exceeds tolerance, using start time",
                        start_ms - sync_ms
                    );
                    Some(start_ms)
                } else {
                    Some(sync_ms)
                }
            }
            (None, sync) => sync,
            (start, None) => start,
        }
    }
}

/// Round a remaining-milliseconds prediction up to whole seconds, never below zero
fn ms_to_display_secs(ms: i64) -> u32 {
    if ms <= 0 {
        return 0;
    }
    u32::try_from((ms + 999) / 1000).unwrap_or(u32::MAX)
}

/// Parse a server timestamp. Timestamps without an offset are UTC.
pub fn parse_server_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&format!("{}Z", raw)) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}
