use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `HH:MM` wire format for slot and appointment times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_time(&raw).map_err(de::Error::custom)
    }
}

/// Parses `HH:MM`, also accepting the `HH:MM:SS` form Postgres returns for `time` columns.
pub fn parse_time(raw: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| format!("Invalid time '{}', expected HH:MM", raw))
}

pub fn format_time(time: &NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub is_booked: bool,
    pub appointment_id: Option<Uuid>,
}

impl Slot {
    pub fn open(start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            start_time,
            end_time,
            is_booked: false,
            appointment_id: None,
        }
    }

    pub fn is_held_by(&self, appointment_id: Uuid) -> bool {
        self.is_booked && self.appointment_id == Some(appointment_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleDay {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub slots: Vec<Slot>,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
}

impl ScheduleDay {
    pub fn new(doctor_id: Uuid, date: NaiveDate, mut slots: Vec<Slot>) -> Self {
        slots.sort_by_key(|slot| slot.start_time);
        Self {
            id: Uuid::new_v4(),
            doctor_id,
            date,
            slots,
            is_available: true,
            created_at: Utc::now(),
        }
    }

    pub fn slot_at(&self, start_time: NaiveTime) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.start_time == start_time)
    }

    /// Slots must have `start < end` and unique start times.
    pub fn validate(&self) -> Result<(), String> {
        for slot in &self.slots {
            if slot.start_time >= slot.end_time {
                return Err(format!(
                    "Slot starting at {} must end after it starts",
                    format_time(&slot.start_time)
                ));
            }
        }

        let mut seen = HashSet::new();
        for slot in &self.slots {
            if !seen.insert(slot.start_time) {
                return Err(format!(
                    "Duplicate slot start time {}",
                    format_time(&slot.start_time)
                ));
            }
        }

        Ok(())
    }
}

/// Identifies one claimable slot entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
}

impl SlotKey {
    pub fn new(doctor_id: Uuid, date: NaiveDate, start_time: NaiveTime) -> Self {
        Self { doctor_id, date, start_time }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn time(raw: &str) -> NaiveTime {
        parse_time(raw).unwrap()
    }

    #[test]
    fn test_slot_times_use_hh_mm_on_the_wire() {
        let slot = Slot::open(time("10:00"), time("10:30"));
        let value = serde_json::to_value(&slot).unwrap();

        assert_eq!(value["start_time"], "10:00");
        assert_eq!(value["end_time"], "10:30");

        let parsed: Slot = serde_json::from_value(json!({
            "start_time": "09:15:00",
            "end_time": "09:45",
            "is_booked": true,
            "appointment_id": null
        }))
        .unwrap();
        assert_eq!(parsed.start_time, time("09:15"));
    }

    #[test]
    fn test_schedule_day_rejects_duplicate_start_times() {
        let day = ScheduleDay::new(
            Uuid::new_v4(),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            vec![
                Slot::open(time("10:30"), time("11:00")),
                Slot::open(time("10:00"), time("10:30")),
                Slot::open(time("10:00"), time("10:15")),
            ],
        );

        assert_eq!(day.slots[0].start_time, time("10:00"));
        assert!(day.validate().is_err());
    }

    #[test]
    fn test_schedule_day_rejects_inverted_slot() {
        let day = ScheduleDay::new(
            Uuid::new_v4(),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            vec![Slot::open(time("11:00"), time("10:30"))],
        );

        assert!(day.validate().is_err());
    }
}
