//! In-game clock.

use serde::{Deserialize, Serialize};

/// Minutes in an in-game day.
pub const MINUTES_PER_DAY: i64 = 24 * 60;

/// In-game time of day. Only moves forward, by elapsed-minute deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GameTime {
    /// Day counter, starting at 1.
    pub day: u32,
    pub hour: u8,
    pub minute: u8,
}

impl Default for GameTime {
    fn default() -> Self {
        Self {
            day: 1,
            hour: 8,
            minute: 0,
        }
    }
}

impl GameTime {
    pub fn new(day: u32, hour: u8, minute: u8) -> Self {
        Self { day, hour, minute }.sanitized()
    }

    /// Minutes elapsed since day 1, 00:00.
    pub fn absolute_minutes(&self) -> i64 {
        let day = i64::from(self.day.max(1)) - 1;
        day * MINUTES_PER_DAY + i64::from(self.hour) * 60 + i64::from(self.minute)
    }

    /// Build a time from an absolute minute count. Negative input clamps to day 1, 00:00.
    pub fn from_absolute(minutes: i64) -> Self {
        let minutes = minutes.max(0);
        let day = minutes / MINUTES_PER_DAY;
        let rest = minutes % MINUTES_PER_DAY;
        Self {
            day: u32::try_from(day + 1).unwrap_or(u32::MAX),
            hour: (rest / 60) as u8,
            minute: (rest % 60) as u8,
        }
    }

    /// Return this time advanced by `minutes`, rolling hours into days.
    pub fn advanced(&self, minutes: u32) -> Self {
        Self::from_absolute(self.absolute_minutes() + i64::from(minutes))
    }

    /// Fold out-of-range hour/minute values into a valid time.
    ///
    /// Used on documents read from disk, which may have been edited by hand.
    pub fn sanitized(self) -> Self {
        let raw = (i64::from(self.day.max(1)) - 1) * MINUTES_PER_DAY
            + i64::from(self.hour) * 60
            + i64::from(self.minute);
        Self::from_absolute(raw)
    }

    pub fn is_daytime(&self) -> bool {
        (6..18).contains(&self.hour)
    }

    pub fn time_of_day(&self) -> &'static str {
        match self.hour {
            5..=7 => "aube",
            8..=11 => "matin",
            12..=13 => "midi",
            14..=17 => "après-midi",
            18..=20 => "soir",
            _ => "nuit",
        }
    }

    /// Human label, e.g. "Jour 2, 14h05".
    pub fn label(&self) -> String {
        format!("Jour {}, {:02}h{:02}", self.day, self.hour, self.minute)
    }
}
