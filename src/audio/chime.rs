use rodio::Source;
use std::f32::consts::PI;
use std::time::Duration;

/// Built-in alarm chime used when no sound file is configured.
/// Four decaying bell strikes over eight seconds; loops cleanly because the
/// last strike finishes fading before the buffer ends.
pub struct Chime {
    sample_rate: u32,
    num_sample: usize,
    total_samples: usize,
}

pub const CHIME_DURATION: Duration = Duration::from_secs(8);

const STRIKE_PERIOD_SECS: f32 = 2.0;
const FUNDAMENTAL_HZ: f32 = 880.0;

impl Chime {
    pub fn new() -> Self {
        let sample_rate = 44100;
        Self {
            sample_rate,
            num_sample: 0,
            total_samples: CHIME_DURATION.as_secs() as usize * sample_rate as usize,
        }
    }
}

impl Iterator for Chime {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.num_sample >= self.total_samples {
            return None;
        }

        let t = self.num_sample as f32 / self.sample_rate as f32;
        self.num_sample += 1;

        // Time since the current strike began
        let strike_t = t % STRIKE_PERIOD_SECS;
        let envelope = (-3.0 * strike_t).exp();

        let tone = (2.0 * PI * FUNDAMENTAL_HZ * strike_t).sin()
            + 0.5 * (2.0 * PI * FUNDAMENTAL_HZ * 1.5 * strike_t).sin();

        Some(tone * envelope * 0.2)
    }
}

impl Source for Chime {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        1 // Mono
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(CHIME_DURATION)
    }
}
