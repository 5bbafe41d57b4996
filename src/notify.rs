use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use log::info;
use serde::Serialize;

use crate::store::AlertPrefs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Priority {
    High,
    Low,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    /// Presentation channel the notification posts under; see
    /// [`channel_identity`].
    pub channel: String,
    pub priority: Priority,
    /// Whether the notification should demand attention over other UI.
    pub popup: bool,
}

/// Presentation adapter for notifications. The engine decides content,
/// channel and urgency; the adapter decides how those are shown.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
    fn dismiss(&self);
}

/// Writes notifications to the log. The default adapter for headless runs.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        info!(
            "[notify:{}] {}: {} ({:?}{})",
            notification.channel,
            notification.title,
            notification.body,
            notification.priority,
            if notification.popup { ", popup" } else { "" },
        );
    }

    fn dismiss(&self) {
        info!("[notify] dismissed");
    }
}

/// Stable channel id for the current sound/vibration preferences.
///
/// Notification channels bake sound and vibration in at creation and cannot
/// be edited afterwards, so the id must change whenever either preference
/// does; adapters create channels they have not seen yet.
pub fn channel_identity(prefs: &AlertPrefs) -> String {
    let mut hasher = DefaultHasher::new();
    prefs.sound_path.hash(&mut hasher);
    format!("chimer_alert_{:x}_{}", hasher.finish(), prefs.vibration)
}

/// Body text summarizing how many sessions ended by timeout.
pub fn ring_count_body(count: u32) -> String {
    if count == 1 {
        "Alarm rang 1 time".to_string()
    } else {
        format!("Alarm rang {count} times")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_identity_is_stable() {
        let prefs = AlertPrefs::default();
        assert_eq!(channel_identity(&prefs), channel_identity(&prefs.clone()));
    }

    #[test]
    fn channel_identity_tracks_sound_and_vibration() {
        let base = AlertPrefs::default();

        let mut other_sound = base.clone();
        other_sound.sound_path = "/sounds/bell.ogg".into();
        assert_ne!(channel_identity(&base), channel_identity(&other_sound));

        let mut no_vibration = base.clone();
        no_vibration.vibration = false;
        assert_ne!(channel_identity(&base), channel_identity(&no_vibration));
    }

    #[test]
    fn channel_identity_ignores_unrelated_prefs() {
        let base = AlertPrefs::default();
        let mut longer_ring = base.clone();
        longer_ring.ring_duration_secs = 30;
        longer_ring.popup = false;
        assert_eq!(channel_identity(&base), channel_identity(&longer_ring));
    }

    #[test]
    fn ring_count_body_pluralizes() {
        assert_eq!(ring_count_body(1), "Alarm rang 1 time");
        assert_eq!(ring_count_body(2), "Alarm rang 2 times");
        assert_eq!(ring_count_body(0), "Alarm rang 0 times");
    }
}
