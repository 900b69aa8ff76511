//! Basal schedule programming.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::time_serde;
use crate::units::UnitsPerHour;

/// One segment of a basal schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasalScheduleEntry {
    /// Offset from midnight at which this segment's rate takes effect.
    #[serde(with = "time_serde::duration_secs")]
    pub start_offset: Duration,
    pub rate: UnitsPerHour,
}

/// A full 24-hour basal schedule.
///
/// Entries are ordered by start offset; the first entry must start at
/// midnight so every instant of the day has a defined rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<BasalScheduleEntry>", into = "Vec<BasalScheduleEntry>")]
pub struct BasalSchedule {
    entries: Vec<BasalScheduleEntry>,
}

impl BasalSchedule {
    pub fn new(entries: Vec<BasalScheduleEntry>) -> Result<Self, ScheduleError> {
        if entries.is_empty() {
            return Err(ScheduleError::Empty);
        }
        if entries[0].start_offset != Duration::zero() {
            return Err(ScheduleError::MissingMidnightEntry);
        }
        for pair in entries.windows(2) {
            if pair[1].start_offset <= pair[0].start_offset {
                return Err(ScheduleError::UnorderedEntries);
            }
        }
        if let Some(last) = entries.last()
            && last.start_offset >= Duration::hours(24)
        {
            return Err(ScheduleError::EntryPastMidnight);
        }
        Ok(Self { entries })
    }

    /// A single flat rate for the whole day.
    pub fn flat(rate: UnitsPerHour) -> Self {
        Self {
            entries: vec![BasalScheduleEntry {
                start_offset: Duration::zero(),
                rate,
            }],
        }
    }

    pub fn entries(&self) -> &[BasalScheduleEntry] {
        &self.entries
    }

    /// The rate in effect at the given offset from midnight.
    ///
    /// Offsets outside 0..24h wrap by whole days.
    pub fn rate_at(&self, offset: Duration) -> UnitsPerHour {
        let day = Duration::hours(24).num_seconds();
        let secs = offset.num_seconds().rem_euclid(day);
        let offset = Duration::seconds(secs);
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.start_offset <= offset)
            .map(|entry| entry.rate)
            .unwrap_or_else(|| self.entries[0].rate)
    }
}

impl TryFrom<Vec<BasalScheduleEntry>> for BasalSchedule {
    type Error = ScheduleError;

    fn try_from(entries: Vec<BasalScheduleEntry>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<BasalSchedule> for Vec<BasalScheduleEntry> {
    fn from(schedule: BasalSchedule) -> Self {
        schedule.entries
    }
}

/// Validation failures for basal schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("basal schedule has no entries")]
    Empty,

    #[error("basal schedule must begin at midnight")]
    MissingMidnightEntry,

    #[error("basal schedule entries must be strictly ordered by start offset")]
    UnorderedEntries,

    #[error("basal schedule entry starts at or past 24:00")]
    EntryPastMidnight,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_segment() -> BasalSchedule {
        BasalSchedule::new(vec![
            BasalScheduleEntry {
                start_offset: Duration::zero(),
                rate: UnitsPerHour::from_f64(0.8),
            },
            BasalScheduleEntry {
                start_offset: Duration::hours(8),
                rate: UnitsPerHour::from_f64(1.2),
            },
        ])
        .unwrap()
    }

    #[test]
    fn rejects_empty_and_late_start() {
        assert_eq!(BasalSchedule::new(vec![]), Err(ScheduleError::Empty));
        let late = vec![BasalScheduleEntry {
            start_offset: Duration::hours(1),
            rate: UnitsPerHour::from_f64(1.0),
        }];
        assert_eq!(
            BasalSchedule::new(late),
            Err(ScheduleError::MissingMidnightEntry)
        );
    }

    #[test]
    fn rejects_unordered_entries() {
        let entries = vec![
            BasalScheduleEntry {
                start_offset: Duration::zero(),
                rate: UnitsPerHour::from_f64(1.0),
            },
            BasalScheduleEntry {
                start_offset: Duration::zero(),
                rate: UnitsPerHour::from_f64(2.0),
            },
        ];
        assert_eq!(
            BasalSchedule::new(entries),
            Err(ScheduleError::UnorderedEntries)
        );
    }

    #[test]
    fn rate_lookup_picks_latest_segment() {
        let schedule = two_segment();
        assert_eq!(
            schedule.rate_at(Duration::hours(3)),
            UnitsPerHour::from_f64(0.8)
        );
        assert_eq!(
            schedule.rate_at(Duration::hours(8)),
            UnitsPerHour::from_f64(1.2)
        );
        assert_eq!(
            schedule.rate_at(Duration::hours(23)),
            UnitsPerHour::from_f64(1.2)
        );
    }

    #[test]
    fn rate_lookup_wraps_by_whole_days() {
        let schedule = two_segment();
        assert_eq!(
            schedule.rate_at(Duration::hours(27)),
            UnitsPerHour::from_f64(0.8)
        );
        assert_eq!(
            schedule.rate_at(Duration::hours(-2)),
            UnitsPerHour::from_f64(1.2)
        );
    }

    #[test]
    fn schedule_serde_roundtrip() {
        let schedule = two_segment();
        let json = serde_json::to_string(&schedule).unwrap();
        assert_eq!(
            serde_json::from_str::<BasalSchedule>(&json).unwrap(),
            schedule
        );
    }
}
