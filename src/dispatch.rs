use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use chrono::Utc;
use log::{info, warn};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::{self, Duration},
};
use tokio_util::sync::CancellationToken;

use crate::models::{Trigger, TriggerKey};

struct ArmedWakeup {
    // Generation distinguishes this arm from a replacement under the same
    // key, so a firing task never delivers on behalf of a newer arm.
    generation: u64,
    fire_at_ms: i64,
    cancel: CancellationToken,
}

struct DispatcherInner {
    armed: Mutex<HashMap<TriggerKey, ArmedWakeup>>,
    deliver_tx: UnboundedSender<Trigger>,
    generation: AtomicU64,
}

/// One-shot wake-up timers keyed by trigger identity.
///
/// Arming schedules exactly one delivery of the trigger payload on the
/// channel handed out by [`TriggerDispatcher::new`]; firing deregisters the
/// key, and re-arming is always an explicit call. Arming an already-armed
/// key replaces the pending wake-up.
#[derive(Clone)]
pub struct TriggerDispatcher {
    inner: Arc<DispatcherInner>,
}

impl TriggerDispatcher {
    pub fn new() -> (Self, UnboundedReceiver<Trigger>) {
        let (deliver_tx, deliver_rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            inner: Arc::new(DispatcherInner {
                armed: Mutex::new(HashMap::new()),
                deliver_tx,
                generation: AtomicU64::new(0),
            }),
        };
        (dispatcher, deliver_rx)
    }

    pub fn arm(&self, trigger: Trigger, fire_at_ms: i64) {
        let key = trigger.key();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        {
            let mut armed = self.inner.armed.lock().unwrap();
            let entry = ArmedWakeup {
                generation,
                fire_at_ms,
                cancel: cancel.clone(),
            };
            if let Some(previous) = armed.insert(key, entry) {
                previous.cancel.cancel();
                info!("replaced pending wake-up for {key:?}");
            }
        }

        let inner = Arc::clone(&self.inner);
        let delay_ms = fire_at_ms
            .saturating_sub(Utc::now().timestamp_millis())
            .max(0) as u64;

        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(Duration::from_millis(delay_ms)) => {
                    {
                        let mut armed = inner.armed.lock().unwrap();
                        match armed.get(&key) {
                            Some(entry) if entry.generation == generation => {
                                armed.remove(&key);
                            }
                            // A newer arm owns this key now.
                            _ => return,
                        }
                    }
                    if inner.deliver_tx.send(trigger).is_err() {
                        warn!("trigger receiver dropped; {key:?} not delivered");
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    /// Removes a pending wake-up. Returns false when nothing was armed under
    /// the key; a stale cancel is not an error.
    pub fn cancel(&self, key: &TriggerKey) -> bool {
        let removed = self.inner.armed.lock().unwrap().remove(key);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => {
                info!("cancel for {key:?} matched nothing");
                false
            }
        }
    }

    /// Fire time of the pending wake-up for a key, if one is armed.
    pub fn armed_fire_time(&self, key: &TriggerKey) -> Option<i64> {
        self.inner
            .armed
            .lock()
            .unwrap()
            .get(key)
            .map(|entry| entry.fire_at_ms)
    }

    pub fn cancel_all(&self) {
        let mut armed = self.inner.armed.lock().unwrap();
        for (_, entry) in armed.drain() {
            entry.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_ms(offset_ms: i64) -> i64 {
        Utc::now().timestamp_millis() + offset_ms
    }

    fn interval_trigger() -> Trigger {
        Trigger::Interval {
            interval_minutes: 15,
        }
    }

    fn alarm_trigger(id: i64) -> Trigger {
        Trigger::Alarm {
            id,
            label: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_and_deregisters() {
        let (dispatcher, mut rx) = TriggerDispatcher::new();
        dispatcher.arm(interval_trigger(), in_ms(1_000));
        assert!(dispatcher.armed_fire_time(&TriggerKey::Interval).is_some());

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, interval_trigger());
        assert!(dispatcher.armed_fire_time(&TriggerKey::Interval).is_none());

        // Single-shot: nothing else arrives.
        time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_delivery() {
        let (dispatcher, mut rx) = TriggerDispatcher::new();
        dispatcher.arm(alarm_trigger(7), in_ms(1_000));

        assert!(dispatcher.cancel(&TriggerKey::Alarm(7)));
        assert!(dispatcher.armed_fire_time(&TriggerKey::Alarm(7)).is_none());

        time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_of_unarmed_key_is_false() {
        let (dispatcher, _rx) = TriggerDispatcher::new();
        assert!(!dispatcher.cancel(&TriggerKey::Alarm(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_pending_wakeup() {
        let (dispatcher, mut rx) = TriggerDispatcher::new();
        let late = in_ms(60_000);
        let soon = in_ms(1_000);
        dispatcher.arm(interval_trigger(), late);
        dispatcher.arm(interval_trigger(), soon);
        assert_eq!(
            dispatcher.armed_fire_time(&TriggerKey::Interval),
            Some(soon)
        );

        rx.recv().await.unwrap();

        // The replaced wake-up never fires.
        time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_keys_fire_independently() {
        let (dispatcher, mut rx) = TriggerDispatcher::new();
        dispatcher.arm(alarm_trigger(1), in_ms(1_000));
        dispatcher.arm(alarm_trigger(2), in_ms(2_000));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.key(), TriggerKey::Alarm(1));
        assert_eq!(second.key(), TriggerKey::Alarm(2));
    }

    #[tokio::test(start_paused = true)]
    async fn past_fire_time_fires_immediately() {
        let (dispatcher, mut rx) = TriggerDispatcher::new();
        dispatcher.arm(interval_trigger(), in_ms(-5_000));
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_clears_everything() {
        let (dispatcher, mut rx) = TriggerDispatcher::new();
        dispatcher.arm(alarm_trigger(1), in_ms(1_000));
        dispatcher.arm(interval_trigger(), in_ms(1_000));

        dispatcher.cancel_all();
        assert!(dispatcher.armed_fire_time(&TriggerKey::Alarm(1)).is_none());
        assert!(dispatcher.armed_fire_time(&TriggerKey::Interval).is_none());

        time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
