use anyhow::{bail, Result};
use chrono::{DateTime, Local};
use log::{info, warn};

use crate::dispatch::TriggerDispatcher;
use crate::models::{Alarm, Trigger, TriggerKey};
use crate::recurrence::{epoch_ms, next_occurrence};

/// Turns alarm rows into armed wake-ups.
///
/// Each alarm owns at most one pending wake-up, keyed by its id. Scheduling
/// a disabled alarm withdraws whatever is pending for it.
#[derive(Clone)]
pub struct AlarmScheduler {
    dispatcher: TriggerDispatcher,
}

impl AlarmScheduler {
    pub fn new(dispatcher: TriggerDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Arms the alarm's next occurrence after `now`. Returns the fire time in
    /// epoch milliseconds, or `None` when the alarm is disabled.
    pub fn schedule(&self, alarm: &Alarm, now: DateTime<Local>) -> Result<Option<i64>> {
        if !alarm.enabled {
            self.dispatcher.cancel(&TriggerKey::Alarm(alarm.id));
            return Ok(None);
        }

        let Some(at) = alarm.time() else {
            bail!(
                "alarm {} has invalid time {}:{:02}",
                alarm.id,
                alarm.hour,
                alarm.minute
            );
        };

        let next = next_occurrence(at, &alarm.days, now.naive_local());
        let fire_at_ms = epoch_ms(next);
        self.dispatcher.arm(
            Trigger::Alarm {
                id: alarm.id,
                label: alarm.label.clone(),
            },
            fire_at_ms,
        );
        info!(
            "scheduled alarm {} ({}) for {}",
            alarm.id,
            alarm.days.summary(),
            next.format("%Y-%m-%d %H:%M")
        );
        Ok(Some(fire_at_ms))
    }

    /// Withdraws the alarm's pending wake-up, if any.
    pub fn cancel(&self, alarm_id: i64) -> bool {
        self.dispatcher.cancel(&TriggerKey::Alarm(alarm_id))
    }

    /// Schedules every alarm in the slice, typically at boot. Failures are
    /// logged and skipped so one bad row cannot block the rest. Returns how
    /// many alarms ended up armed.
    pub fn schedule_all(&self, alarms: &[Alarm], now: DateTime<Local>) -> usize {
        let mut armed = 0;
        for alarm in alarms {
            match self.schedule(alarm, now) {
                Ok(Some(_)) => armed += 1,
                Ok(None) => {}
                Err(err) => warn!("skipping alarm {}: {err:#}", alarm.id),
            }
        }
        armed
    }

    pub fn armed_fire_time(&self, alarm_id: i64) -> Option<i64> {
        self.dispatcher.armed_fire_time(&TriggerKey::Alarm(alarm_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WeekdaySet;
    use chrono::TimeZone;

    fn alarm(id: i64, hour: u32, minute: u32, days: WeekdaySet) -> Alarm {
        Alarm {
            id,
            hour,
            minute,
            enabled: true,
            days,
            label: format!("alarm {id}"),
        }
    }

    fn fixed_now() -> DateTime<Local> {
        // Mid-June avoids DST transitions in the zones CI runs under.
        Local.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn enabled_alarm_arms_its_next_occurrence() {
        let (dispatcher, _rx) = TriggerDispatcher::new();
        let scheduler = AlarmScheduler::new(dispatcher);
        let now = fixed_now();
        let weekly = alarm(3, 9, 30, WeekdaySet::from_days(&[1]).unwrap());

        let fire_at = scheduler.schedule(&weekly, now).unwrap().unwrap();

        let expected = epoch_ms(next_occurrence(
            weekly.time().unwrap(),
            &weekly.days,
            now.naive_local(),
        ));
        assert_eq!(fire_at, expected);
        assert_eq!(scheduler.armed_fire_time(3), Some(expected));
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_withdraws_the_pending_wakeup() {
        let (dispatcher, _rx) = TriggerDispatcher::new();
        let scheduler = AlarmScheduler::new(dispatcher);
        let mut a = alarm(5, 7, 0, WeekdaySet::empty());

        scheduler.schedule(&a, fixed_now()).unwrap();
        assert!(scheduler.armed_fire_time(5).is_some());

        a.enabled = false;
        assert_eq!(scheduler.schedule(&a, fixed_now()).unwrap(), None);
        assert!(scheduler.armed_fire_time(5).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_time_is_rejected() {
        let (dispatcher, _rx) = TriggerDispatcher::new();
        let scheduler = AlarmScheduler::new(dispatcher);
        let broken = alarm(9, 24, 0, WeekdaySet::empty());

        assert!(scheduler.schedule(&broken, fixed_now()).is_err());
        assert!(scheduler.armed_fire_time(9).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_rather_than_stacks() {
        let (dispatcher, _rx) = TriggerDispatcher::new();
        let scheduler = AlarmScheduler::new(dispatcher);
        let mut a = alarm(2, 6, 0, WeekdaySet::empty());

        scheduler.schedule(&a, fixed_now()).unwrap();
        a.minute = 45;
        let second = scheduler.schedule(&a, fixed_now()).unwrap().unwrap();

        assert_eq!(scheduler.armed_fire_time(2), Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_reports_whether_anything_was_armed() {
        let (dispatcher, _rx) = TriggerDispatcher::new();
        let scheduler = AlarmScheduler::new(dispatcher);
        let a = alarm(4, 6, 0, WeekdaySet::empty());

        scheduler.schedule(&a, fixed_now()).unwrap();
        assert!(scheduler.cancel(4));
        assert!(!scheduler.cancel(4));
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_all_skips_disabled_and_broken_rows() {
        let (dispatcher, _rx) = TriggerDispatcher::new();
        let scheduler = AlarmScheduler::new(dispatcher);

        let mut off = alarm(2, 7, 0, WeekdaySet::empty());
        off.enabled = false;
        let alarms = vec![
            alarm(1, 6, 0, WeekdaySet::empty()),
            off,
            alarm(3, 25, 0, WeekdaySet::empty()),
            alarm(4, 8, 15, WeekdaySet::from_days(&[0, 6]).unwrap()),
        ];

        assert_eq!(scheduler.schedule_all(&alarms, fixed_now()), 2);
        assert!(scheduler.armed_fire_time(1).is_some());
        assert!(scheduler.armed_fire_time(2).is_none());
        assert!(scheduler.armed_fire_time(3).is_none());
        assert!(scheduler.armed_fire_time(4).is_some());
    }
}
