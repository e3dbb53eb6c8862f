use chrono::{NaiveDate, NaiveTime};

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledMeeting {
    pub id: u64,
    pub title: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// Meetings planned from this client. Kept in memory only.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    meetings: Vec<ScheduledMeeting>,
    next_id: u64,
}

impl Schedule {
    /// Starts out with the two sample meetings the schedule page shows.
    pub fn with_samples() -> Result<Self> {
        let mut schedule = Self::default();
        schedule.add("Team Sync", "2025-10-02", "10:00 AM")?;
        schedule.add("Project Review", "2025-10-03", "02:00 PM")?;
        Ok(schedule)
    }

    pub fn meetings(&self) -> &[ScheduledMeeting] {
        &self.meetings
    }

    pub fn add(&mut self, title: &str, date: &str, time: &str) -> Result<&ScheduledMeeting> {
        let title = title.trim();
        if title.is_empty() || date.trim().is_empty() || time.trim().is_empty() {
            return Err(ClientError::Validation(
                "Title, date and time are required.".into(),
            ));
        }
        let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .map_err(|_| ClientError::Validation(format!("Invalid date {date:?}.")))?;
        let time = parse_time(time.trim())
            .ok_or_else(|| ClientError::Validation(format!("Invalid time {time:?}.")))?;

        self.next_id += 1;
        self.meetings.push(ScheduledMeeting {
            id: self.next_id,
            title: title.to_string(),
            date,
            time,
        });
        self.meetings.sort_by_key(|m| (m.date, m.time, m.id));
        let id = self.next_id;
        self.meetings
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| ClientError::Validation("meeting vanished".into()))
    }

    pub fn remove(&mut self, id: u64) -> Option<ScheduledMeeting> {
        let pos = self.meetings.iter().position(|m| m.id == id)?;
        Some(self.meetings.remove(pos))
    }
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&raw.to_uppercase(), "%I:%M %p"))
        .ok()
}
