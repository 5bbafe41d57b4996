use serde::{Deserialize, Serialize};

/// Payload delivered when an armed wake-up fires. Carries enough of its
/// origin to re-derive the source record without a second lookup key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Trigger {
    Alarm { id: i64, label: String },
    Interval { interval_minutes: u32 },
}

impl Trigger {
    pub fn key(&self) -> TriggerKey {
        match self {
            Trigger::Alarm { id, .. } => TriggerKey::Alarm(*id),
            Trigger::Interval { .. } => TriggerKey::Interval,
        }
    }

    /// Presentation text for the ringing session, when the origin has one.
    pub fn label(&self) -> Option<&str> {
        match self {
            Trigger::Alarm { label, .. } if !label.is_empty() => Some(label),
            _ => None,
        }
    }
}

/// Identity a wake-up is armed and cancelled under. There is one interval
/// reminder per installation, so its key carries no id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerKey {
    Alarm(i64),
    Interval,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_matches_origin() {
        let alarm = Trigger::Alarm {
            id: 42,
            label: "wake".into(),
        };
        assert_eq!(alarm.key(), TriggerKey::Alarm(42));

        let interval = Trigger::Interval {
            interval_minutes: 15,
        };
        assert_eq!(interval.key(), TriggerKey::Interval);
    }

    #[test]
    fn empty_label_is_none() {
        let unlabeled = Trigger::Alarm {
            id: 1,
            label: String::new(),
        };
        assert!(unlabeled.label().is_none());

        let interval = Trigger::Interval {
            interval_minutes: 5,
        };
        assert!(interval.label().is_none());
    }
}
