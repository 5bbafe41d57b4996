use anyhow::{bail, Result};
use chrono::{DateTime, Local, NaiveTime};
use log::{info, warn};

use crate::dispatch::TriggerDispatcher;
use crate::models::{Trigger, TriggerKey, WeekdaySet};
use crate::recurrence;
use crate::store::{ReminderState, StateStore};

/// The single "repeat every N minutes" reminder.
///
/// Owns its persisted running/interval/next-fire state and the dispatcher
/// registration under [`TriggerKey::Interval`]. Reference times come in as
/// parameters so every path is deterministic under test.
#[derive(Clone)]
pub struct IntervalEngine {
    store: StateStore,
    dispatcher: TriggerDispatcher,
}

impl IntervalEngine {
    pub fn new(store: StateStore, dispatcher: TriggerDispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Starts the reminder and returns the first fire time in epoch ms.
    ///
    /// With a fixed start the first fire is the next wall-clock occurrence
    /// of that time strictly after `now`; otherwise it is now + interval.
    /// Starting resets the ring counter.
    pub fn start(
        &self,
        interval_minutes: u32,
        fixed_start: Option<NaiveTime>,
        now: DateTime<Local>,
    ) -> Result<i64> {
        if interval_minutes == 0 {
            bail!("interval must be at least one minute");
        }

        let next_fire_at = match fixed_start {
            Some(at) => {
                let wall = recurrence::next_occurrence(at, &WeekdaySet::empty(), now.naive_local());
                recurrence::epoch_ms(wall)
            }
            None => now.timestamp_millis() + interval_ms(interval_minutes),
        };

        self.store.update(|state| {
            state.reminder.running = true;
            state.reminder.interval_minutes = interval_minutes;
            state.reminder.next_fire_at = next_fire_at;
            state.ringer.ring_count = 0;
        })?;

        self.arm(interval_minutes, next_fire_at);
        info!("interval reminder started: every {interval_minutes}m, first fire at {next_fire_at}");
        Ok(next_fire_at)
    }

    /// Re-arms after a fire, rolling forward from the observed fire time.
    /// Late delivery therefore accumulates drift; repetition follows actual
    /// fires, not the original start instant.
    pub fn on_fire(&self, now_ms: i64) -> Result<Option<i64>> {
        let reminder = self.store.reminder();
        if !reminder.running {
            info!("interval fire observed while stopped; not re-arming");
            return Ok(None);
        }

        let next_fire_at = now_ms + interval_ms(reminder.interval_minutes);
        self.store
            .update_reminder(|state| state.next_fire_at = next_fire_at)?;
        self.arm(reminder.interval_minutes, next_fire_at);
        Ok(Some(next_fire_at))
    }

    /// Re-establishes the in-process wake-up from persisted state, typically
    /// at startup. A fire time that already passed while the process was
    /// down is recomputed relative to now rather than replayed.
    pub fn reconcile(&self, now_ms: i64) -> Result<Option<i64>> {
        let reminder = self.store.reminder();
        if !reminder.running {
            return Ok(None);
        }

        if reminder.next_fire_at <= now_ms {
            let next_fire_at = now_ms + interval_ms(reminder.interval_minutes);
            self.store
                .update_reminder(|state| state.next_fire_at = next_fire_at)?;
            self.arm(reminder.interval_minutes, next_fire_at);
            warn!(
                "missed interval wake-up at {}; rescheduled for {next_fire_at}",
                reminder.next_fire_at
            );
            Ok(Some(next_fire_at))
        } else {
            // Timer registrations do not survive a restart; re-arm at the
            // persisted instant.
            self.arm(reminder.interval_minutes, reminder.next_fire_at);
            Ok(Some(reminder.next_fire_at))
        }
    }

    pub fn stop(&self) -> Result<()> {
        self.dispatcher.cancel(&TriggerKey::Interval);
        self.store.update_reminder(|state| {
            state.running = false;
            state.next_fire_at = 0;
        })?;
        info!("interval reminder stopped");
        Ok(())
    }

    pub fn snapshot(&self) -> ReminderState {
        self.store.reminder()
    }

    fn arm(&self, interval_minutes: u32, fire_at_ms: i64) {
        self.dispatcher
            .arm(Trigger::Interval { interval_minutes }, fire_at_ms);
    }
}

fn interval_ms(interval_minutes: u32) -> i64 {
    i64::from(interval_minutes) * 60_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike, Utc};
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> (IntervalEngine, TriggerDispatcher, StateStore) {
        let store = StateStore::new(dir.path().join("state.json")).unwrap();
        let (dispatcher, _rx) = TriggerDispatcher::new();
        (
            IntervalEngine::new(store.clone(), dispatcher.clone()),
            dispatcher,
            store,
        )
    }

    fn local_now() -> DateTime<Local> {
        // A fixed instant keeps the arithmetic assertions exact.
        Utc.timestamp_millis_opt(1_718_020_800_000) // 2024-06-10 12:00:00 UTC
            .unwrap()
            .with_timezone(&Local)
    }

    #[tokio::test(start_paused = true)]
    async fn start_rolls_first_fire_from_now() {
        let dir = TempDir::new().unwrap();
        let (engine, dispatcher, store) = engine(&dir);

        let now = local_now();
        let next = engine.start(15, None, now).unwrap();

        assert_eq!(next, now.timestamp_millis() + 15 * 60_000);
        assert!(store.reminder().running);
        assert_eq!(store.reminder().interval_minutes, 15);
        assert_eq!(store.reminder().next_fire_at, next);
        assert_eq!(
            dispatcher.armed_fire_time(&TriggerKey::Interval),
            Some(next)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_start_fires_at_that_wall_time() {
        let dir = TempDir::new().unwrap();
        let (engine, _dispatcher, _store) = engine(&dir);

        let now = local_now();
        let at = NaiveTime::from_hms_opt((now.hour() + 1) % 24, 30, 0).unwrap();
        let next = engine.start(60, Some(at), now).unwrap();

        assert!(next > now.timestamp_millis());
        assert!(next <= now.timestamp_millis() + 24 * 3_600_000);

        let fire = Local.timestamp_millis_opt(next).unwrap();
        assert_eq!(fire.time().hour(), at.hour());
        assert_eq!(fire.time().minute(), at.minute());
    }

    #[tokio::test(start_paused = true)]
    async fn start_resets_ring_counter() {
        let dir = TempDir::new().unwrap();
        let (engine, _dispatcher, store) = engine(&dir);
        store
            .update_ringer(|ringer| ringer.ring_count = 7)
            .unwrap();

        engine.start(5, None, local_now()).unwrap();
        assert_eq!(store.ringer().ring_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (engine, _dispatcher, store) = engine(&dir);
        assert!(engine.start(0, None, local_now()).is_err());
        assert!(!store.reminder().running);
    }

    #[tokio::test(start_paused = true)]
    async fn fire_rearms_from_observed_fire_time() {
        let dir = TempDir::new().unwrap();
        let (engine, dispatcher, _store) = engine(&dir);

        let now = local_now();
        engine.start(15, None, now).unwrap();

        // Delivered two seconds late: the next fire rolls from the observed
        // instant, preserving the drift.
        let fired_at = now.timestamp_millis() + 15 * 60_000 + 2_000;
        let next = engine.on_fire(fired_at).unwrap().unwrap();
        assert_eq!(next, fired_at + 15 * 60_000);
        assert_eq!(
            dispatcher.armed_fire_time(&TriggerKey::Interval),
            Some(next)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fire_after_stop_is_ignored() {
        let dir = TempDir::new().unwrap();
        let (engine, dispatcher, _store) = engine(&dir);

        engine.start(15, None, local_now()).unwrap();
        engine.stop().unwrap();

        let next = engine.on_fire(local_now().timestamp_millis()).unwrap();
        assert!(next.is_none());
        assert!(dispatcher.armed_fire_time(&TriggerKey::Interval).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_catches_up_missed_fire() {
        let dir = TempDir::new().unwrap();
        let (engine, dispatcher, store) = engine(&dir);

        let now_ms = local_now().timestamp_millis();
        store
            .update_reminder(|reminder| {
                reminder.running = true;
                reminder.interval_minutes = 10;
                reminder.next_fire_at = now_ms - 5_000;
            })
            .unwrap();

        let next = engine.reconcile(now_ms).unwrap().unwrap();
        assert_eq!(next, now_ms + 10 * 60_000);
        assert_eq!(store.reminder().next_fire_at, next);
        assert_eq!(
            dispatcher.armed_fire_time(&TriggerKey::Interval),
            Some(next)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_preserves_future_fire() {
        let dir = TempDir::new().unwrap();
        let (engine, dispatcher, store) = engine(&dir);

        let now_ms = local_now().timestamp_millis();
        let future = now_ms + 120_000;
        store
            .update_reminder(|reminder| {
                reminder.running = true;
                reminder.interval_minutes = 10;
                reminder.next_fire_at = future;
            })
            .unwrap();

        let next = engine.reconcile(now_ms).unwrap();
        assert_eq!(next, Some(future));
        assert_eq!(store.reminder().next_fire_at, future);
        assert_eq!(
            dispatcher.armed_fire_time(&TriggerKey::Interval),
            Some(future)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_when_stopped_does_nothing() {
        let dir = TempDir::new().unwrap();
        let (engine, dispatcher, _store) = engine(&dir);

        assert!(engine
            .reconcile(local_now().timestamp_millis())
            .unwrap()
            .is_none());
        assert!(dispatcher.armed_fire_time(&TriggerKey::Interval).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_clears_state_and_registration() {
        let dir = TempDir::new().unwrap();
        let (engine, dispatcher, store) = engine(&dir);

        engine.start(15, None, local_now()).unwrap();
        engine.stop().unwrap();

        let reminder = store.reminder();
        assert!(!reminder.running);
        assert_eq!(reminder.next_fire_at, 0);
        assert!(dispatcher.armed_fire_time(&TriggerKey::Interval).is_none());
    }
}
