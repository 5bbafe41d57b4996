use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::{sync::Mutex, task::JoinHandle, time};
use uuid::Uuid;

use crate::audio::{self, AlarmSounder, SoundSpec};
use crate::haptics::{Haptics, Repeat, VIBRATION_PATTERN_MS};
use crate::models::Trigger;
use crate::notify::{channel_identity, ring_count_body, Notification, Notifier, Priority};
use crate::store::{AlertPrefs, StateStore};

use super::session::{playback_plan, RingSession};

const ALERT_TITLE: &str = "Repeat Alarm";
const RINGING_BODY: &str = "Alarm is ringing";
/// Channel for the silent "rang N times" summary after a timeout.
const STATUS_CHANNEL: &str = "chimer_status";

/// Runs the ringing lifecycle: playback, vibration, notifications, the
/// auto-stop timer, and the durable record that makes sessions survive a
/// process death.
///
/// A single session at a time; a trigger landing mid-session restarts it.
/// Only the timeout path counts a ring.
#[derive(Clone)]
pub struct RingerController {
    state: Arc<Mutex<RingSession>>,
    store: StateStore,
    sounder: AlarmSounder,
    haptics: Arc<dyn Haptics>,
    notifier: Arc<dyn Notifier>,
    auto_stop: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RingerController {
    pub fn new(
        store: StateStore,
        sounder: AlarmSounder,
        haptics: Arc<dyn Haptics>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let mut session = RingSession::new();
        session.ring_count = store.ringer().ring_count;
        Self {
            state: Arc::new(Mutex::new(session)),
            store,
            sounder,
            haptics,
            notifier,
            auto_stop: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn session(&self) -> RingSession {
        self.state.lock().await.clone()
    }

    /// Enters Ringing for a fired trigger. An active session is torn down
    /// first (without counting); sessions never stack.
    pub async fn start_ringing(&self, trigger: &Trigger) -> Result<RingSession> {
        if self.state.lock().await.is_ringing() {
            info!("trigger while already ringing; restarting session");
            self.teardown().await?;
        }

        let prefs = self.store.alert_prefs();
        let spec = SoundSpec::from_pref(&prefs.sound_path);
        let plan = playback_plan(prefs.ring_duration(), audio::probe_duration(&spec));

        let started_at = Utc::now();
        let auto_stop_at = plan
            .auto_stop_after
            .map(|delay| started_at.timestamp_millis() + delay.as_millis() as i64);
        let session_id = Uuid::new_v4().to_string();
        let label = trigger.label().unwrap_or_default().to_string();

        self.enter_ringing(session_id, label, started_at, plan.looping, auto_stop_at, &prefs)
            .await?;
        Ok(self.session().await)
    }

    /// User stop: silences everything and returns to Idle without touching
    /// the ring counter. A no-op when nothing is ringing.
    pub async fn stop(&self) -> Result<()> {
        if !self.state.lock().await.is_ringing() {
            return Ok(());
        }
        self.teardown().await?;
        self.notifier.dismiss();
        info!("ringing dismissed");
        Ok(())
    }

    /// Silences playback and vibration without touching session state, for
    /// process shutdown. A live session stays persisted and resumes on the
    /// next start.
    pub async fn quiesce(&self) {
        self.clear_auto_stop(true).await;
        self.silence();
    }

    /// Resumes a session whose record was persisted before an unexpected
    /// exit. Returns whether there was one.
    ///
    /// An auto-stop that elapsed while the process was down completes the
    /// timeout path immediately, ring count included.
    pub async fn resume_persisted(&self) -> Result<bool> {
        let record = self.store.ringer();
        if !record.active {
            return Ok(false);
        }

        let session_id = record
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let started_at = record.started_at.unwrap_or_else(Utc::now);
        warn!("found ringing session {session_id} persisted before restart; resuming");

        let now_ms = Utc::now().timestamp_millis();
        if let Some(auto_stop_at) = record.auto_stop_at {
            if auto_stop_at <= now_ms {
                // The timeout elapsed while we were down.
                {
                    let mut state = self.state.lock().await;
                    state.begin(
                        session_id.clone(),
                        record.label.clone(),
                        started_at,
                        record.looping,
                        record.auto_stop_at,
                        record.ring_count,
                    );
                }
                self.finish_after_timeout(&session_id).await?;
                return Ok(true);
            }
        }

        let prefs = self.store.alert_prefs();
        self.enter_ringing(
            session_id,
            record.label.clone(),
            started_at,
            record.looping,
            record.auto_stop_at,
            &prefs,
        )
        .await?;
        Ok(true)
    }

    async fn enter_ringing(
        &self,
        session_id: String,
        label: String,
        started_at: DateTime<Utc>,
        looping: bool,
        auto_stop_at: Option<i64>,
        prefs: &AlertPrefs,
    ) -> Result<()> {
        let spec = SoundSpec::from_pref(&prefs.sound_path);
        if let Err(err) = self.sounder.play(spec, looping) {
            warn!("alarm sound unavailable ({err:#}); ringing silently");
        }
        if prefs.vibration {
            let repeat = if looping { Repeat::Loop } else { Repeat::Once };
            self.haptics.vibrate(&VIBRATION_PATTERN_MS, repeat);
        }

        {
            let mut state = self.state.lock().await;
            let ring_count = self.store.ringer().ring_count;
            state.begin(
                session_id.clone(),
                label.clone(),
                started_at,
                looping,
                auto_stop_at,
                ring_count,
            );
            self.store.update_ringer(|ringer| {
                ringer.active = true;
                ringer.session_id = Some(session_id.clone());
                ringer.started_at = Some(started_at);
                ringer.label = label.clone();
                ringer.looping = looping;
                ringer.auto_stop_at = auto_stop_at;
            })?;
        }

        let body = if label.is_empty() {
            RINGING_BODY.to_string()
        } else {
            label
        };
        self.notifier.notify(&Notification {
            title: ALERT_TITLE.to_string(),
            body,
            channel: channel_identity(prefs),
            priority: if prefs.popup {
                Priority::High
            } else {
                Priority::Low
            },
            popup: prefs.popup,
        });

        if let Some(at) = auto_stop_at {
            self.spawn_auto_stop(session_id, at).await;
        }
        Ok(())
    }

    /// Silences and persists the not-ringing record without counting.
    async fn teardown(&self) -> Result<()> {
        self.clear_auto_stop(true).await;
        {
            let mut state = self.state.lock().await;
            state.dismiss();
            self.store.update_ringer(|ringer| {
                ringer.active = false;
                ringer.session_id = None;
                ringer.started_at = None;
                ringer.looping = false;
                ringer.auto_stop_at = None;
            })?;
        }
        self.silence();
        Ok(())
    }

    async fn finish_after_timeout(&self, session_id: &str) -> Result<()> {
        let new_count;
        {
            let mut state = self.state.lock().await;
            // A stale auto-stop task must not touch a newer session.
            if !state.is_ringing() || state.session_id.as_deref() != Some(session_id) {
                return Ok(());
            }
            let mut counted = state.ring_count;
            self.store.update_ringer(|ringer| {
                ringer.active = false;
                ringer.session_id = None;
                ringer.started_at = None;
                ringer.looping = false;
                ringer.auto_stop_at = None;
                ringer.ring_count += 1;
                counted = ringer.ring_count;
            })?;
            state.finish();
            state.ring_count = counted;
            new_count = counted;
        }
        self.clear_auto_stop(false).await;
        self.silence();

        self.notifier.notify(&Notification {
            title: ALERT_TITLE.to_string(),
            body: ring_count_body(new_count),
            channel: STATUS_CHANNEL.to_string(),
            priority: Priority::Low,
            popup: false,
        });
        info!("ringing timed out; {}", ring_count_body(new_count));
        Ok(())
    }

    async fn spawn_auto_stop(&self, session_id: String, auto_stop_at: i64) {
        let mut guard = self.auto_stop.lock().await;
        if let Some(previous) = guard.take() {
            previous.abort();
        }

        let controller = self.clone();
        let delay_ms = auto_stop_at
            .saturating_sub(Utc::now().timestamp_millis())
            .max(0) as u64;

        let handle = tokio::spawn(async move {
            time::sleep(time::Duration::from_millis(delay_ms)).await;
            if let Err(err) = controller.finish_after_timeout(&session_id).await {
                warn!("auto-stop failed: {err:#}");
            }
        });
        *guard = Some(handle);
    }

    async fn clear_auto_stop(&self, abort: bool) {
        if let Some(handle) = self.auto_stop.lock().await.take() {
            if abort {
                handle.abort();
            }
        }
    }

    fn silence(&self) {
        if let Err(err) = self.sounder.stop() {
            warn!("failed to stop alarm sound: {err:#}");
        }
        self.haptics.cancel();
    }
}
