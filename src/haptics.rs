use log::info;

/// Alarm buzz pattern in milliseconds: initial delay, on, off, on.
pub const VIBRATION_PATTERN_MS: [u64; 4] = [0, 500, 200, 500];

/// Whether the pattern runs once or repeats until cancelled. Repetition is
/// slaved to the sound's looping decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Once,
    Loop,
}

pub trait Haptics: Send + Sync {
    fn vibrate(&self, pattern: &[u64], repeat: Repeat);
    fn cancel(&self);
}

/// Logs vibration requests. Desktop hardware has no vibrator; embedders with
/// one supply their own adapter.
pub struct LogHaptics;

impl Haptics for LogHaptics {
    fn vibrate(&self, pattern: &[u64], repeat: Repeat) {
        info!("[haptics] vibrate {pattern:?} ({repeat:?})");
    }

    fn cancel(&self) {
        info!("[haptics] cancel");
    }
}
