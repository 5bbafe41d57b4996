use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sounds at least this long loop until stopped; shorter ones play once.
pub const SHORT_SOUND_MAX: Duration = Duration::from_secs(5);
/// Teardown delay after a one-shot cue has played.
pub const SHORT_RING_STOP_AFTER: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RingPhase {
    Idle,
    Ringing,
    /// Observably not ringing, but the session ended by timeout rather than
    /// a user stop; presentation shows the ring count.
    Finished,
}

impl Default for RingPhase {
    fn default() -> Self {
        RingPhase::Idle
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackPlan {
    pub looping: bool,
    pub auto_stop_after: Option<Duration>,
}

/// Decides looping and auto-stop for a session.
///
/// An explicit ring duration wins: loop regardless of the sound's natural
/// length and hard-stop when the duration elapses. Otherwise short media
/// plays once with a fixed teardown delay, and long or unknown media loops
/// until the user stops it.
pub fn playback_plan(
    ring_duration: Option<Duration>,
    natural_duration: Option<Duration>,
) -> PlaybackPlan {
    if let Some(limit) = ring_duration {
        return PlaybackPlan {
            looping: true,
            auto_stop_after: Some(limit),
        };
    }

    match natural_duration {
        Some(natural) if natural < SHORT_SOUND_MAX => PlaybackPlan {
            looping: false,
            auto_stop_after: Some(SHORT_RING_STOP_AFTER),
        },
        _ => PlaybackPlan {
            looping: true,
            auto_stop_after: None,
        },
    }
}

/// In-memory mirror of the active ringing session. The durable copy lives
/// in the state store; this one serves snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingSession {
    pub phase: RingPhase,
    pub session_id: Option<String>,
    pub label: String,
    pub started_at: Option<DateTime<Utc>>,
    pub looping: bool,
    pub auto_stop_at: Option<i64>,
    pub ring_count: u32,
}

impl Default for RingSession {
    fn default() -> Self {
        Self {
            phase: RingPhase::Idle,
            session_id: None,
            label: String::new(),
            started_at: None,
            looping: false,
            auto_stop_at: None,
            ring_count: 0,
        }
    }
}

impl RingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ringing(&self) -> bool {
        self.phase == RingPhase::Ringing
    }

    pub fn begin(
        &mut self,
        session_id: String,
        label: String,
        started_at: DateTime<Utc>,
        looping: bool,
        auto_stop_at: Option<i64>,
        ring_count: u32,
    ) {
        *self = Self {
            phase: RingPhase::Ringing,
            session_id: Some(session_id),
            label,
            started_at: Some(started_at),
            looping,
            auto_stop_at,
            ring_count,
        };
    }

    /// User stop: back to idle, counter untouched.
    pub fn dismiss(&mut self) {
        let ring_count = self.ring_count;
        *self = Self::default();
        self.ring_count = ring_count;
    }

    /// Timeout: the phase flips to Finished; the controller owns the counter
    /// increment alongside the durable record.
    pub fn finish(&mut self) {
        self.phase = RingPhase::Finished;
        self.looping = false;
        self.auto_stop_at = None;
    }
}
