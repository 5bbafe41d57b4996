pub mod alarm;
pub mod trigger;

pub use alarm::{Alarm, WeekdaySet};
pub use trigger::{Trigger, TriggerKey};
