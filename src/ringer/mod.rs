pub mod controller;
pub mod session;

pub use controller::RingerController;
pub use session::{playback_plan, PlaybackPlan, RingPhase, RingSession};
