use std::{
    fs,
    path::PathBuf,
    sync::{Arc, RwLock},
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a ringing session presents itself: sound, vibration, timeout, popup.
/// Read from the store at trigger time and handed to the ringer explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertPrefs {
    /// Path to the alarm sound; empty selects the built-in chime.
    pub sound_path: String,
    pub vibration: bool,
    /// Hard ring timeout in seconds; negative means ring until stopped.
    pub ring_duration_secs: i32,
    /// Whether the ringing notification demands attention.
    pub popup: bool,
}

impl Default for AlertPrefs {
    fn default() -> Self {
        Self {
            sound_path: String::new(),
            vibration: true,
            ring_duration_secs: -1,
            popup: true,
        }
    }
}

impl AlertPrefs {
    /// The configured ring timeout, when one is set.
    pub fn ring_duration(&self) -> Option<Duration> {
        if self.ring_duration_secs > 0 {
            Some(Duration::from_secs(self.ring_duration_secs as u64))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReminderState {
    pub running: bool,
    pub interval_minutes: u32,
    /// Epoch milliseconds of the next armed fire; 0 when stopped.
    pub next_fire_at: i64,
}

impl Default for ReminderState {
    fn default() -> Self {
        Self {
            running: false,
            interval_minutes: 0,
            next_fire_at: 0,
        }
    }
}

/// Durable record of the ringing session, written on every transition so a
/// killed process is detected and resumed on the next start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RingerRecord {
    pub active: bool,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub label: String,
    pub looping: bool,
    /// Epoch milliseconds of the pending auto-stop, when the session has one.
    pub auto_stop_at: Option<i64>,
    /// Times a session ended by timeout rather than a user stop.
    pub ring_count: u32,
}

impl Default for RingerRecord {
    fn default() -> Self {
        Self {
            active: false,
            session_id: None,
            started_at: None,
            label: String::new(),
            looping: false,
            auto_stop_at: None,
            ring_count: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineState {
    pub alert_prefs: AlertPrefs,
    pub reminder: ReminderState,
    pub ringer: RingerRecord,
}

struct StoreInner {
    path: PathBuf,
    data: RwLock<EngineState>,
}

/// Durable engine state in a single JSON document. Every mutation rewrites
/// the whole file, so a reader never observes the ringing flag, ring count
/// and next-fire time torn across writes.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create state directory {}", parent.display())
            })?;
        }

        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("failed to read state from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            EngineState::default()
        };

        Ok(Self {
            inner: Arc::new(StoreInner {
                path,
                data: RwLock::new(data),
            }),
        })
    }

    pub fn snapshot(&self) -> EngineState {
        self.inner.data.read().unwrap().clone()
    }

    pub fn alert_prefs(&self) -> AlertPrefs {
        self.inner.data.read().unwrap().alert_prefs.clone()
    }

    pub fn reminder(&self) -> ReminderState {
        self.inner.data.read().unwrap().reminder.clone()
    }

    pub fn ringer(&self) -> RingerRecord {
        self.inner.data.read().unwrap().ringer.clone()
    }

    /// Applies a mutation to the whole document and persists it in one write.
    pub fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut EngineState),
    {
        let mut guard = self.inner.data.write().unwrap();
        apply(&mut guard);
        self.persist(&guard)
    }

    pub fn update_alert_prefs(&self, prefs: AlertPrefs) -> Result<()> {
        self.update(|state| state.alert_prefs = prefs)
    }

    pub fn update_reminder<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut ReminderState),
    {
        self.update(|state| apply(&mut state.reminder))
    }

    pub fn update_ringer<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut RingerRecord),
    {
        self.update(|state| apply(&mut state.ringer))
    }

    fn persist(&self, data: &EngineState) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.inner.path, serialized).with_context(|| {
            format!("failed to write state to {}", self.inner.path.display())
        })
    }
}
