use anyhow::{anyhow, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Set of weekdays an alarm repeats on, indexed 0 = Sunday through
/// 6 = Saturday. An empty set means the alarm is a one-off.
///
/// Persisted as comma-separated indices ("1,3,5"), the same encoding the
/// alarm table uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn from_days(days: &[u8]) -> Result<Self> {
        let mut set = Self::empty();
        for &day in days {
            set.insert(day)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, day: u8) -> Result<()> {
        if day > 6 {
            return Err(anyhow!("weekday index {day} out of range (0-6)"));
        }
        self.0 |= 1 << day;
        Ok(())
    }

    pub fn contains(&self, day: u8) -> bool {
        day <= 6 && self.0 & (1 << day) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn days(&self) -> impl Iterator<Item = u8> + '_ {
        (0u8..7).filter(|&day| self.contains(day))
    }

    pub fn from_csv(value: &str) -> Result<Self> {
        let mut set = Self::empty();
        for part in value.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let day: u8 = part
                .parse()
                .map_err(|_| anyhow!("invalid weekday index '{part}'"))?;
            set.insert(day)?;
        }
        Ok(set)
    }

    pub fn to_csv(&self) -> String {
        self.days()
            .map(|day| day.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Short human summary: "Once", "Daily", or day names ("Sun, Wed").
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "Once".to_string();
        }
        if self.len() == 7 {
            return "Daily".to_string();
        }
        self.days()
            .map(|day| DAY_NAMES[day as usize])
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl From<WeekdaySet> for String {
    fn from(set: WeekdaySet) -> Self {
        set.to_csv()
    }
}

impl TryFrom<String> for WeekdaySet {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_csv(&value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    pub id: i64,
    pub hour: u32,
    pub minute: u32,
    pub enabled: bool,
    pub days: WeekdaySet,
    pub label: String,
}

impl Alarm {
    /// The alarm's wall-clock time, or None when hour/minute are out of range.
    pub fn time(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0)
    }

    /// 12-hour display form, e.g. "07:05 AM".
    pub fn formatted_time(&self) -> String {
        let (hour, meridiem) = match self.hour {
            0 => (12, "AM"),
            1..=11 => (self.hour, "AM"),
            12 => (12, "PM"),
            _ => (self.hour - 12, "PM"),
        };
        format!("{:02}:{:02} {}", hour, self.minute, meridiem)
    }
}
