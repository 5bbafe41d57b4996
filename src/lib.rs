pub mod audio;
pub mod db;
pub mod dispatch;
pub mod haptics;
pub mod interval;
pub mod models;
pub mod notify;
pub mod recurrence;
pub mod ringer;
pub mod scheduler;
pub mod store;

use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveTime, Utc};
use log::{info, warn};
use serde::Serialize;
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use audio::AlarmSounder;
use db::Database;
use dispatch::TriggerDispatcher;
use haptics::{Haptics, LogHaptics};
use interval::IntervalEngine;
use models::{Alarm, Trigger, WeekdaySet};
use notify::{LogNotifier, Notifier};
use ringer::{RingSession, RingerController};
use scheduler::AlarmScheduler;
use store::{AlertPrefs, ReminderState, StateStore};

const DB_FILE: &str = "chimer.sqlite3";
const STATE_FILE: &str = "state.json";

/// Everything a caller can observe in one read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub reminder: ReminderState,
    pub ringing: RingSession,
    pub alert_prefs: AlertPrefs,
}

/// The assembled engine: alarm list, interval reminder, dispatcher, ringer
/// and the router that connects them.
///
/// Cheap to clone; clones share state. [`Chimer::start`] reconciles persisted
/// state and spawns the router; after that, armed wake-ups flow through the
/// router until [`Chimer::shutdown`].
#[derive(Clone)]
pub struct Chimer {
    db: Database,
    store: StateStore,
    dispatcher: TriggerDispatcher,
    scheduler: AlarmScheduler,
    interval: IntervalEngine,
    ringer: RingerController,
    trigger_rx: Arc<Mutex<Option<UnboundedReceiver<Trigger>>>>,
    router: Arc<Mutex<Option<JoinHandle<()>>>>,
    cancel_token: CancellationToken,
}

impl Chimer {
    /// Opens the engine over `data_dir` with log-only notification and
    /// haptics sinks.
    pub fn bootstrap(data_dir: &Path) -> Result<Self> {
        Self::bootstrap_with(data_dir, Arc::new(LogHaptics), Arc::new(LogNotifier))
    }

    /// Opens the engine with caller-supplied notification and haptics sinks.
    pub fn bootstrap_with(
        data_dir: &Path,
        haptics: Arc<dyn Haptics>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let db = Database::new(data_dir.join(DB_FILE))?;
        let store = StateStore::new(data_dir.join(STATE_FILE))?;
        let (dispatcher, trigger_rx) = TriggerDispatcher::new();

        let scheduler = AlarmScheduler::new(dispatcher.clone());
        let interval = IntervalEngine::new(store.clone(), dispatcher.clone());
        let ringer = RingerController::new(store.clone(), AlarmSounder::new(), haptics, notifier);

        Ok(Self {
            db,
            store,
            dispatcher,
            scheduler,
            interval,
            ringer,
            trigger_rx: Arc::new(Mutex::new(Some(trigger_rx))),
            router: Arc::new(Mutex::new(None)),
            cancel_token: CancellationToken::new(),
        })
    }

    /// Brings persisted state back to life and starts routing triggers.
    ///
    /// Enabled alarms are re-armed, the interval reminder is reconciled
    /// (catching up a fire time that passed while the process was down), and
    /// a ringing session persisted before an unexpected exit is resumed.
    pub async fn start(&self) -> Result<()> {
        let now = Local::now();

        let alarms = self.db.list_enabled_alarms().await?;
        let armed = self.scheduler.schedule_all(&alarms, now);
        info!("armed {armed} of {} enabled alarm(s)", alarms.len());

        if let Some(next) = self.interval.reconcile(now.timestamp_millis())? {
            info!("interval reminder reconciled; next fire at {next}");
        }

        if self.ringer.resume_persisted().await? {
            info!("resumed ringing session from persisted state");
        }

        self.spawn_router()
    }

    fn spawn_router(&self) -> Result<()> {
        let rx = self
            .trigger_rx
            .lock()
            .unwrap()
            .take()
            .context("trigger router is already running")?;

        let engine = self.clone();
        let cancel_token = self.cancel_token.clone();
        let handle = tokio::spawn(async move {
            engine.router_loop(rx, cancel_token).await;
        });
        *self.router.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn router_loop(
        &self,
        mut rx: UnboundedReceiver<Trigger>,
        cancel_token: CancellationToken,
    ) {
        info!("trigger router running");
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                received = rx.recv() => match received {
                    Some(trigger) => self.route_trigger(trigger).await,
                    None => break,
                },
            }
        }
        info!("trigger router stopped");
    }

    /// Handles one fired trigger. Errors are logged, never fatal; the router
    /// must outlive any single bad delivery.
    async fn route_trigger(&self, trigger: Trigger) {
        match trigger {
            Trigger::Interval { .. } => {
                // Capture the observed fire time before ringing work so the
                // rolling re-arm measures from delivery, not from teardown.
                let fired_at_ms = Utc::now().timestamp_millis();
                if let Err(err) = self.ringer.start_ringing(&trigger).await {
                    warn!("interval trigger could not start ringing: {err:#}");
                }
                if let Err(err) = self.interval.on_fire(fired_at_ms) {
                    warn!("interval re-arm failed: {err:#}");
                }
            }
            Trigger::Alarm { id, .. } => match self.db.get_alarm(id).await {
                Ok(Some(alarm)) if alarm.enabled => {
                    let trigger = Trigger::Alarm {
                        id: alarm.id,
                        label: alarm.label.clone(),
                    };
                    if let Err(err) = self.ringer.start_ringing(&trigger).await {
                        warn!("alarm {id} could not start ringing: {err:#}");
                    }
                    // One-off alarms stay unarmed until the next boot or
                    // edit; recurring ones chain to their next weekday.
                    if !alarm.days.is_empty() {
                        if let Err(err) = self.scheduler.schedule(&alarm, Local::now()) {
                            warn!("alarm {id} could not be rescheduled: {err:#}");
                        }
                    }
                }
                Ok(_) => info!("dropping trigger for missing or disabled alarm {id}"),
                Err(err) => warn!("could not load alarm {id} for trigger: {err:#}"),
            },
        }
    }

    /// Starts the repeating reminder. Returns the first fire time in epoch
    /// milliseconds.
    pub fn start_reminder(
        &self,
        interval_minutes: u32,
        fixed_start: Option<NaiveTime>,
    ) -> Result<i64> {
        self.interval
            .start(interval_minutes, fixed_start, Local::now())
    }

    /// Stops the repeating reminder and dismisses any ringing in progress.
    pub async fn stop_reminder(&self) -> Result<()> {
        self.interval.stop()?;
        self.ringer.stop().await
    }

    /// Dismisses the active ringing session, if any.
    pub async fn stop_ringing(&self) -> Result<()> {
        self.ringer.stop().await
    }

    pub async fn status(&self) -> Status {
        Status {
            reminder: self.interval.snapshot(),
            ringing: self.ringer.session().await,
            alert_prefs: self.store.alert_prefs(),
        }
    }

    /// Replaces the alert preferences. Takes effect on the next session.
    pub fn set_alert_prefs(&self, prefs: AlertPrefs) -> Result<()> {
        self.store.update_alert_prefs(prefs)
    }

    /// Creates an alarm and arms its first occurrence.
    pub async fn add_alarm(
        &self,
        hour: u32,
        minute: u32,
        days: WeekdaySet,
        label: &str,
    ) -> Result<Alarm> {
        let mut alarm = Alarm {
            id: 0,
            hour,
            minute,
            enabled: true,
            days,
            label: label.to_string(),
        };
        if alarm.time().is_none() {
            bail!("invalid alarm time {hour}:{minute:02}");
        }

        alarm.id = self.db.insert_alarm(&alarm).await?;
        self.scheduler.schedule(&alarm, Local::now())?;
        Ok(alarm)
    }

    /// Rewrites an alarm row and re-arms (or withdraws) its wake-up.
    pub async fn update_alarm(&self, alarm: &Alarm) -> Result<()> {
        self.db.update_alarm(alarm).await?;
        self.scheduler.schedule(alarm, Local::now())?;
        Ok(())
    }

    pub async fn set_alarm_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        self.db.set_alarm_enabled(id, enabled).await?;
        if enabled {
            let alarm = self
                .db
                .get_alarm(id)
                .await?
                .with_context(|| format!("alarm {id} disappeared after enabling"))?;
            self.scheduler.schedule(&alarm, Local::now())?;
        } else {
            self.scheduler.cancel(id);
        }
        Ok(())
    }

    pub async fn delete_alarm(&self, id: i64) -> Result<()> {
        self.scheduler.cancel(id);
        self.db.delete_alarm(id).await
    }

    pub async fn list_alarms(&self) -> Result<Vec<Alarm>> {
        self.db.list_alarms().await
    }

    /// Stops the router and silences playback.
    ///
    /// Persisted state is left exactly as it stands: a ringing session or a
    /// running reminder picks up again on the next [`Chimer::start`].
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel_token.cancel();
        self.dispatcher.cancel_all();

        let handle = self.router.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    warn!("router task ended abnormally: {err}");
                }
            }
        }

        self.ringer.quiesce().await;
        info!("engine shut down");
        Ok(())
    }
}
